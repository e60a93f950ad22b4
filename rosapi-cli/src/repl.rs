//! Interactive REPL.

use crate::commands::{self, Format};
use colored::Colorize;
use rosapi_client::{Connection, EventReceiver, Sentence};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};

const HELP_TEXT: &str = r#"
Enter a sentence as whitespace-separated words:
  /interface/print                        Print all interfaces
  /interface/print ?type=ether            Filter with a query word
  /ip/address/add =address=10.0.0.1/24 =interface=ether1
  /system/resource/print =.proplist=uptime

Replies are printed until the command's !done. Ctrl+C cancels a running
command.

  status                          Show connection and login state
  help                            Show this help
  quit, exit                      Exit the REPL
"#;

pub async fn run(
    conn: &Connection,
    mut events: EventReceiver,
    host: &str,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "rosapi".bold().cyan());
    println!("{} {}", "Logged in to".green(), host);

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".rosapi_history"))
        .unwrap_or_else(|_| ".rosapi_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for usage.\n");

    loop {
        let prompt = format!("{} ", "rosapi>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(conn, &mut events, line, format).await {
                    Ok(true) => println!(),
                    Ok(false) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }

                if !conn.is_logged_in() {
                    println!("{}", "Connection lost.".red());
                    break;
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

    // Save history
    let _ = rl.save_history(&history_path);

    // Disconnect
    conn.close(false).await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

/// Runs one REPL line. Returns `false` when the REPL should exit.
async fn execute_repl_command(
    conn: &Connection,
    events: &mut EventReceiver,
    line: &str,
    format: Format,
) -> Result<bool, Box<dyn std::error::Error>> {
    match line.to_lowercase().as_str() {
        "help" => println!("{}", HELP_TEXT),

        "quit" | "exit" | "q" => return Ok(false),

        "status" => println!(
            "connection: {}, login: {}",
            conn.connection_state().to_string().yellow(),
            conn.login_state().to_string().yellow()
        ),

        _ => {
            let sentence = Sentence::parse_line(line);
            commands::execute(conn, events, &sentence, format).await?;
        }
    }
    Ok(true)
}
