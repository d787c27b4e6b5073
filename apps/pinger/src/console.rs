//! Line-oriented stand-in for the UI: reads commands from stdin while the
//! monitor runs.

use std::fmt::Write as _;
use std::str::FromStr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use crate::monitoring::Target;
use crate::orchestrator::Orchestrator;

pub const HELP: &str = "\
commands:
  add <name> <url> [frequency]   start monitoring a target
  remove <url>                   stop monitoring a target
  list                           show every target and its last status
  help                           show this message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add { name: String, url: String, frequency: Option<u64> },
    Remove { url: String },
    List,
    Help,
}

impl FromStr for Command {
    type Err = String;

    /// `add` takes the last word as frequency when it is a number and the
    /// word before it as the url; everything else is the name.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return Err("empty command".to_string());
        }
        let verb = words.remove(0).to_ascii_lowercase();

        match verb.as_str() {
            "add" => {
                let frequency = match words.last().map(|w| w.parse::<u64>()) {
                    Some(Ok(frequency)) => {
                        words.pop();
                        Some(frequency)
                    }
                    _ => None,
                };
                let url = words.pop().ok_or("usage: add <name> <url> [frequency]")?;
                if words.is_empty() {
                    return Err("usage: add <name> <url> [frequency]".to_string());
                }
                Ok(Command::Add { name: words.join(" "), url: url.to_string(), frequency })
            }
            "remove" | "rm" => match words.as_slice() {
                [url] => Ok(Command::Remove { url: url.to_string() }),
                _ => Err("usage: remove <url>".to_string()),
            },
            "list" | "ls" => Ok(Command::List),
            "help" | "?" => Ok(Command::Help),
            other => Err(format!("unknown command `{other}`, try `help`")),
        }
    }
}

/// Render targets as an aligned text table
pub fn render_targets(targets: &[Target]) -> String {
    if targets.is_empty() {
        return "no targets".to_string();
    }

    let name_width = targets.iter().map(|t| t.name.len()).max().unwrap_or(0).max(4);
    let url_width = targets.iter().map(|t| t.url.len()).max().unwrap_or(0).max(3);

    let mut out = String::new();
    let _ = writeln!(out, "{:name_width$}  {:url_width$}  {:>6}  STATUS", "NAME", "URL", "EVERY");
    for target in targets {
        let _ = writeln!(
            out,
            "{:name_width$}  {:url_width$}  {:>5}s  {} ({})",
            target.name,
            target.url,
            target.frequency,
            target.last_status_code,
            target.status_class(),
        );
    }
    out.trim_end().to_string()
}

/// Apply one command and return the text to show the user
pub async fn execute(orchestrator: &Orchestrator, command: Command, default_frequency: u64) -> String {
    match command {
        Command::Add { name, url, frequency } => {
            match orchestrator.submit_target(&name, &url, frequency.unwrap_or(default_frequency)).await {
                Ok(target) => format!("monitoring {} every {}s", target.url, target.frequency),
                Err(e) => format!("error: {e}"),
            }
        }
        Command::Remove { url } => match orchestrator.request_removal(&url).await {
            Ok(target) => format!("removed {}", target.url),
            Err(e) => format!("error: {e}"),
        },
        Command::List => render_targets(&orchestrator.targets()),
        Command::Help => HELP.to_string(),
    }
}

/// Read commands from `input` until it is exhausted
pub async fn run_console<R>(orchestrator: &Orchestrator, input: R, default_frequency: u64)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "console input failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match line.parse::<Command>() {
            Ok(command) => execute(orchestrator, command, default_frequency).await,
            Err(e) => e,
        };
        println!("{reply}");
    }
    debug!("console input closed");
}
