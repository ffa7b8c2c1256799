//! Interactive REPL.

use crate::commands::{self, InvokeArgs};
use colored::Colorize;
use dubbo_invoke_client::{parse_type_hints, ClientContext};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::path::PathBuf;

const HELP_TEXT: &str = r#"
Available commands:
  help                              Show this help

  invoke <service> <method> [json]  Invoke a method, parameters as a JSON array
  types [t1,t2,..|-]                Show, set or clear parameter types for invoke

  address [addr|-]                  Show, set or clear the direct service address
  registry [addr]                   Show or set the registry address
  clear-cache                       Drop resolved endpoints
  config                            Show the current configuration

  quit, exit                        Exit the REPL
"#;

/// Session state kept between commands.
#[derive(Default)]
struct Session {
    types: String,
}

pub async fn run(ctx: ClientContext) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "dubbo-invoke".bold().cyan());
    println!("Target: {}", current_target(&ctx));

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = history_path();
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    let mut session = Session::default();
    loop {
        let prompt = format!("{} ", "dubbo>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&ctx, &mut session, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    Ok(())
}

async fn execute_repl_command(
    ctx: &ClientContext,
    session: &mut Session,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(Some(String::new()));
    }

    let cmd = parts[0].to_lowercase();
    let args = &parts[1..];

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "invoke" | "i" => {
            if args.len() < 2 {
                return Ok(Some(
                    "Usage: invoke <service> <method> [params_json]".to_string(),
                ));
            }
            let params = args[2..].join(" ");
            let call = InvokeArgs {
                service: args[0],
                method: args[1],
                params: &params,
                types: &session.types,
                version: None,
                group: None,
            };
            commands::invoke(ctx, call).await.map(Some)
        }

        "types" | "t" => {
            match args.first() {
                None => {}
                Some(&"-") => session.types.clear(),
                Some(_) => session.types = args.join(""),
            }
            let hints = parse_type_hints(&session.types);
            if hints.is_empty() {
                Ok(Some("Types: inferred from values".dimmed().to_string()))
            } else {
                Ok(Some(format!("Types: {}", hints.join(", ").yellow())))
            }
        }

        "address" | "a" => {
            match args.first() {
                None => {}
                Some(&"-") => ctx.update_addresses(Some(""), None)?,
                Some(address) => ctx.update_addresses(Some(*address), None)?,
            }
            Ok(Some(format!("Target: {}", current_target(ctx))))
        }

        "registry" | "r" => {
            if let Some(address) = args.first() {
                ctx.update_addresses(None, Some(*address))?;
            }
            Ok(Some(format!(
                "Registry: {}",
                ctx.config().registry_address.cyan()
            )))
        }

        "clear-cache" | "cc" => {
            let dropped = ctx.cache().len();
            ctx.clear_cache();
            Ok(Some(format!(
                "{} {} resolved endpoint(s)",
                "Cleared".green(),
                dropped
            )))
        }

        "config" => {
            let config = ctx.config();
            let value = serde_json::to_value(&config)?;
            Ok(Some(commands::format_json(&value)))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}

/// Describes where calls without an explicit address go.
fn current_target(ctx: &ClientContext) -> String {
    let config = ctx.config();
    let address = config.select_address(None);
    if config.service_address.trim().is_empty() {
        format!("{} (registry)", address.cyan())
    } else {
        format!("{} (direct)", address.cyan())
    }
}

fn history_path() -> PathBuf {
    home::home_dir()
        .map(|h| h.join(".dubbo_invoke_history"))
        .unwrap_or_else(|| ".dubbo_invoke_history".into())
}
