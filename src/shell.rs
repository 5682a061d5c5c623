use crate::control::{dispatch, ProcessTable};
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{error::ReadlineError, Config, Context, Editor, Helper};

pub const HELP: &str = "\
status                 show every process
start <name>           launch a process
await <name> [ms]      wait for its ready message
wait <name> [ms]       wait for it to exit
stop <name> [ms]       wait up to ms, then destroy
kill <name>            destroy now
console <name>         print the recent console output
exit                   destroy everything still running and leave";

const HISTORY: &str = "logs/history.txt";

/// One line of shell input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Status,
    Help,
    Exit,
    Start(String),
    Await(String, Option<u64>),
    Wait(String, Option<u64>),
    Stop(String, Option<u64>),
    Kill(String),
    Console(String),
}

/// Parses a shell line; `Err` carries the message to show the user.
pub fn parse_command(input: &str) -> Result<ShellCommand, String> {
    let mut words = input.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty command".to_string());
    };
    let name = words.next().map(str::to_string);
    let millis = match words.next() {
        Some(raw) => Some(
            raw.parse::<u64>()
                .map_err(|_| format!("`{raw}` is not a number of milliseconds"))?,
        ),
        None => None,
    };
    if words.next().is_some() {
        return Err(format!("too many arguments for `{verb}`"));
    }
    let needs_name = |name: Option<String>| name.ok_or_else(|| format!("usage: {verb} <name>"));

    match verb {
        "status" => Ok(ShellCommand::Status),
        "help" => Ok(ShellCommand::Help),
        "exit" | "quit" => Ok(ShellCommand::Exit),
        "start" => Ok(ShellCommand::Start(needs_name(name)?)),
        "await" => Ok(ShellCommand::Await(needs_name(name)?, millis)),
        "wait" => Ok(ShellCommand::Wait(needs_name(name)?, millis)),
        "stop" => Ok(ShellCommand::Stop(needs_name(name)?, millis)),
        "kill" => Ok(ShellCommand::Kill(needs_name(name)?)),
        "console" => Ok(ShellCommand::Console(needs_name(name)?)),
        other => Err(format!("Unknown command: {other}")),
    }
}




/*
    @@@
    @CmdCompleter;
    . Plugs into rustyline to complete the verb, then the process name after it.
*/
struct CmdCompleter {
    commands: Vec<String>,
    programs: Vec<String>,
}
impl Helper for CmdCompleter {}
impl Hinter for CmdCompleter {
    type Hint = String;
}
impl Highlighter for CmdCompleter {}
impl Validator for CmdCompleter {}
impl Completer for CmdCompleter {
    type Candidate = Pair;
    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Result<(usize, Vec<Pair>), ReadlineError> {
        let line = &line[..pos];
        let (start, word, pool) = match line.rfind(' ') {
            Some(space) => (space + 1, &line[space + 1..], &self.programs),
            None => (0, line, &self.commands),
        };
        let matches = pool
            .iter()
            .filter(|candidate| candidate.starts_with(word))
            .map(|candidate| Pair {
                display: candidate.clone(),
                replacement: candidate.clone(),
            })
            .collect();
        Ok((start, matches))
    }
}




/*
    @@@
    @run_shell();
    . Reads commands with history and completion until `exit`, Ctrl-C or Ctrl-D.
    . Each command is parsed, then dispatched against the process table; the answer is printed.
    . readline blocks, so it runs inside block_in_place on the multi-threaded runtime.
*/
pub async fn run_shell(table: ProcessTable) -> rustyline::Result<()> {
    let config = Config::builder().build();
    let mut rl: Editor<CmdCompleter, DefaultHistory> = Editor::with_config(config)?;
    rl.set_helper(Some(CmdCompleter {
        commands: ["status", "start", "await", "wait", "stop", "kill", "console", "help", "exit"]
            .into_iter()
            .map(String::from)
            .collect(),
        programs: table.keys().cloned().collect(),
    }));
    let _ = rl.load_history(HISTORY);

    loop {
        let line = tokio::task::block_in_place(|| rl.readline("managed> "));
        match line {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                rl.add_history_entry(input)?;
                match parse_command(input) {
                    Ok(ShellCommand::Exit) => break,
                    Ok(cmd) => println!("{}", dispatch(cmd, &table).await),
                    Err(message) => println!("{message}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    rl.save_history(HISTORY)?;
    Ok(())
}
