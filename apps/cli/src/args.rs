use std::env;
use std::path::PathBuf;

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Serve { port: Option<u16> },
    ReconcileUser { username: String },
    ReconcileBatch { start: String, end: String },
    Partition { batch_size: Option<u64> },
    Current { username: String },
    InitCatalog,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub log_level: String,
    pub command: Command,
}

pub fn parse_args() -> Result<CliArgs, String> {
    parse_from(env::args().skip(1))
}

fn parse_from(args: impl IntoIterator<Item = String>) -> Result<CliArgs, String> {
    let mut args = args.into_iter();
    let mut config = None;
    let mut log_level = DEFAULT_LOG_LEVEL.to_string();
    let mut positional = Vec::new();
    let mut port = None;
    let mut batch_size = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --config".to_string())?;
                config = Some(PathBuf::from(value));
            }
            "--log-level" => {
                log_level = args
                    .next()
                    .ok_or_else(|| "missing value for --log-level".to_string())?;
            }
            "--port" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --port".to_string())?;
                let parsed = value
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port value: {value}"))?;
                port = Some(parsed);
            }
            "--batch-size" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --batch-size".to_string())?;
                let parsed = value
                    .parse::<u64>()
                    .ok()
                    .filter(|size| *size > 0)
                    .ok_or_else(|| format!("invalid batch size: {value}"))?;
                batch_size = Some(parsed);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            flag if flag.starts_with("--") => {
                return Err(format!("unknown argument: {arg}"));
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let name = positional
        .next()
        .ok_or_else(|| "missing command".to_string())?;
    let mut operand = |what: &str| {
        positional
            .next()
            .ok_or_else(|| format!("{name} requires <{what}>"))
    };
    let command = match name.as_str() {
        "serve" => Command::Serve { port },
        "reconcile-user" => Command::ReconcileUser {
            username: operand("username")?,
        },
        "reconcile-batch" => Command::ReconcileBatch {
            start: operand("start")?,
            end: operand("end")?,
        },
        "partition" => Command::Partition { batch_size },
        "current" => Command::Current {
            username: operand("username")?,
        },
        "init-catalog" => Command::InitCatalog,
        _ => return Err(format!("unknown command: {name}")),
    };
    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument: {extra}"));
    }

    Ok(CliArgs {
        config,
        log_level,
        command,
    })
}

pub fn print_help() {
    println!(
        "Data usage reconciliation\n\n\
Usage:\n  data-usage [--config <path>] [--log-level <level>] <command>\n\n\
Commands:\n  serve [--port <port>]           Run the HTTP API and the trigger worker\n  reconcile-user <username>       Measure one user and record the result\n  reconcile-batch <start> <end>   Measure every user in an inclusive range\n  partition [--batch-size <n>]    Compute batches and enqueue one trigger each\n  current <username>              Print the latest recorded usage\n  init-catalog                    Create an empty catalog schema for local use\n\n\
Options:\n  --config <path>     Config file (default /etc/data-usage/config.toml)\n  --log-level <lvl>   Log filter when RUST_LOG is unset (default info)\n  -h, --help          Show this help message\n"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs, String> {
        parse_from(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn parses_batch_command_with_options() {
        let parsed = parse(&["--config", "/tmp/c.toml", "reconcile-batch", "amy", "ben"])
            .expect("parse");
        assert_eq!(parsed.config, Some(PathBuf::from("/tmp/c.toml")));
        assert_eq!(parsed.log_level, "info");
        assert_eq!(
            parsed.command,
            Command::ReconcileBatch {
                start: "amy".to_string(),
                end: "ben".to_string(),
            }
        );
    }

    #[test]
    fn flags_may_follow_the_command() {
        let parsed = parse(&["serve", "--port", "8080", "--log-level", "debug"]).expect("parse");
        assert_eq!(parsed.command, Command::Serve { port: Some(8080) });
        assert_eq!(parsed.log_level, "debug");
    }

    #[test]
    fn rejects_missing_operands_and_zero_batches() {
        assert!(parse(&["reconcile-user"]).is_err());
        assert!(parse(&["partition", "--batch-size", "0"]).is_err());
        assert!(parse(&["current", "amy", "extra"]).is_err());
        assert!(parse(&[]).is_err());
    }
}
