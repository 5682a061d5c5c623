use crate::error::ConfigError;
use crate::spec::ProcessSpec;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;

#[derive(Debug, Deserialize, Clone)]
pub struct ProgramConfig {
    #[serde(flatten)]
    pub spec: ProcessSpec,
    #[serde(default)]
    pub autostart: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub processes: BTreeMap<String, ProgramConfig>,
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        for (name, program) in &config.processes {
            program.spec.validate(name)?;
        }
        Ok(config)
    }
}



/*
    @@@
    @parser();
    . Reads the YAML file; I/O errors (file not found, permission denied, etc.) come back as ConfigError::Io.
    . Hands the text to serde_yaml and validates every process entry before returning the config.
*/
pub fn parser(path: &str) -> Result<Config, ConfigError> {
    let yaml_file = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    Config::from_yaml(&yaml_file)
}
