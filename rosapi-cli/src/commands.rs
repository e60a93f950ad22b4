//! Sentence execution and output formatting.

use colored::Colorize;
use rosapi_client::{
    Connection, ConnectionEvent, ConnectionState, EventReceiver, LoginState, ResultType, Sentence,
};

/// How reply sentences are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Human,
    Json,
}

/// Connects and waits until the router accepted the credentials.
///
/// Fails with the last error reported by the connection.
pub async fn login(
    conn: &Connection,
    events: &mut EventReceiver,
    host: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    conn.connect(host, port)?;

    let mut last_error = None;
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::LoginStateChanged(LoginState::LoggedIn) => return Ok(()),
            ConnectionEvent::Error(msg) => last_error = Some(msg),
            ConnectionEvent::StateChanged(ConnectionState::Unconnected) => break,
            other => tracing::debug!("{:?}", other),
        }
    }

    Err(last_error
        .unwrap_or_else(|| "connection closed".to_string())
        .into())
}

/// Sends a sentence and prints every reply until the command completes.
///
/// Ctrl+C asks the router to cancel the command; its final replies are still
/// printed.
pub async fn execute(
    conn: &Connection,
    events: &mut EventReceiver,
    sentence: &Sentence,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let tag = conn.send(sentence, true)?;
    let mut cancelled = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ConnectionEvent::SentenceReceived(reply)) => {
                    println!("{}", format_sentence(&reply, format));
                    if is_final(&reply, &tag) {
                        return Ok(());
                    }
                }
                Some(ConnectionEvent::Error(msg)) => {
                    eprintln!("{}: {}", "Error".red(), msg);
                }
                Some(ConnectionEvent::StateChanged(ConnectionState::Unconnected)) | None => {
                    return Err("connection lost".into());
                }
                Some(other) => tracing::debug!("{:?}", other),
            },
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                cancelled = true;
                let cancel = Sentence::new("/cancel").with_attribute("tag", tag.as_str());
                conn.send(&cancel, true)?;
            }
        }
    }
}

/// Returns whether `reply` ends the command sent with `tag`.
fn is_final(reply: &Sentence, tag: &str) -> bool {
    match reply.result_type() {
        ResultType::Fatal => true,
        ResultType::Done => reply.tag() == tag,
        _ => false,
    }
}

pub fn format_sentence(sentence: &Sentence, format: Format) -> String {
    match format {
        Format::Json => {
            serde_json::to_string(sentence).unwrap_or_else(|_| sentence.to_string())
        }
        Format::Human => format_human(sentence),
    }
}

fn format_human(sentence: &Sentence) -> String {
    let command = match sentence.result_type() {
        ResultType::Done => sentence.command().green(),
        ResultType::Reply => sentence.command().cyan(),
        ResultType::Trap => sentence.command().yellow(),
        ResultType::Fatal => sentence.command().red(),
        ResultType::Unknown => sentence.command().normal(),
    };

    let mut output = command.bold().to_string();
    if !sentence.tag().is_empty() {
        output.push_str(&format!(" {}", format!("[{}]", sentence.tag()).dimmed()));
    }
    for (name, value) in sentence.attributes().iter() {
        output.push_str(&format!("\n  {}={}", name.cyan(), value));
    }
    for (name, value) in sentence.api_attributes().iter() {
        output.push_str(&format!("\n  .{}={}", name.dimmed(), value));
    }
    for query in sentence.queries() {
        output.push_str(&format!("\n  {}", query));
    }
    output
}
