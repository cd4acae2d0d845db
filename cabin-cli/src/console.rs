//! Interactive console session.

use anyhow::{Result, bail};
use cabin_live::gemini::GeminiLiveConnector;
use cabin_live::{
    ConversationTurn, LiveEndpoint, LiveSession, Role, SessionStatus, ToolDefinition, ToolOutput,
    ToolRegistry, Transcript,
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::CliConfig;

enum Input {
    Line(String),
    Quit,
}

/// Tools the console offers to the agent.
pub fn console_tools() -> ToolRegistry {
    ToolRegistry::new().with_fn(
        ToolDefinition::new("current_time")
            .with_description("Get the current local date and time")
            .with_parameters(json!({ "type": "object", "properties": {} })),
        |_args, _ctx| async {
            let now = chrono::Local::now();
            Ok(ToolOutput::structured(json!({ "local_time": now.to_rfc3339() }))
                .with_summary(format!("Local time is {}", now.format("%H:%M"))))
        },
    )
}

pub async fn run_console(config: CliConfig, audio: bool) -> Result<()> {
    let mut endpoint = LiveEndpoint::gemini(config.api_key()?);
    if let Some(url) = &config.url {
        endpoint = endpoint.with_url(url.clone());
    }
    let connector = Arc::new(GeminiLiveConnector::new(endpoint));

    let builder = LiveSession::builder(connector)
        .config(config.session.clone())
        .settings(config.client.clone())
        .tools(console_tools());
    let builder = attach_audio(builder, audio)?;
    let session = builder.build()?;

    let printer = tokio::spawn(print_settled_turns(session.transcript().clone()));

    if !session.connect().await {
        printer.abort();
        bail!("could not connect to {}", config.session.model);
    }

    println!("Cabin Live Console");
    println!("Model: {}", config.session.model);
    println!("Commands: /mute /unmute /volume <0-1> /log /quit. Ctrl+C to exit.\n");

    let (line_tx, mut lines) = mpsc::channel(8);
    // rustyline blocks on stdin; a plain thread lets the process exit while it waits.
    std::thread::spawn(move || read_lines(line_tx));

    let mut status = session.watch_status();
    let reconnecting = config.client.reconnect.is_some();

    loop {
        tokio::select! {
            input = lines.recv() => match input {
                Some(Input::Line(line)) => {
                    if !handle_line(&session, &line).await {
                        break;
                    }
                }
                Some(Input::Quit) | None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                if *status.borrow() == SessionStatus::Disconnected && !reconnecting {
                    println!("Session ended");
                    break;
                }
            }
        }
    }

    session.disconnect().await;
    printer.abort();
    Ok(())
}

#[cfg(feature = "desktop-audio")]
fn attach_audio(
    builder: cabin_live::LiveSessionBuilder,
    audio: bool,
) -> Result<cabin_live::LiveSessionBuilder> {
    if audio { Ok(builder.desktop_audio()?) } else { Ok(builder) }
}

#[cfg(not(feature = "desktop-audio"))]
fn attach_audio(
    builder: cabin_live::LiveSessionBuilder,
    audio: bool,
) -> Result<cabin_live::LiveSessionBuilder> {
    if audio {
        bail!("audio needs a build with the `desktop-audio` feature");
    }
    Ok(builder)
}

fn read_lines(tx: mpsc::Sender<Input>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("Error: {}", e);
            let _ = tx.blocking_send(Input::Quit);
            return;
        }
    };

    loop {
        match editor.readline("you -> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                if tx.blocking_send(Input::Line(line)).is_err() {
                    return;
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                let _ = tx.blocking_send(Input::Quit);
                return;
            }
            Err(err) => {
                eprintln!("Error: {}", err);
                let _ = tx.blocking_send(Input::Quit);
                return;
            }
        }
    }
}

/// Run one console line. Returns false when the console should exit.
async fn handle_line(session: &LiveSession, line: &str) -> bool {
    let line = line.trim();
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "/quit" | "/exit" => return false,
        "/mute" | "/unmute" => {
            if let Err(e) = session.set_muted(command == "/mute") {
                eprintln!("Error: {}", e);
            }
        }
        "/volume" => match rest.trim().parse::<f32>() {
            Ok(volume) => {
                session.set_volume(volume);
                println!("Volume {:.2}", session.volume());
            }
            Err(_) => eprintln!("Usage: /volume <0.0-1.0>"),
        },
        "/log" => {
            let entries = session.log().entries();
            for entry in entries.iter().rev().take(10).rev() {
                println!(
                    "{} {:<14} {}",
                    entry.timestamp.format("%H:%M:%S%.3f"),
                    entry.category.as_str(),
                    entry.payload
                );
            }
        }
        _ => {
            session.send_text(line).await;
        }
    }
    true
}

/// Print each turn once it is final, in transcript order.
async fn print_settled_turns(transcript: Transcript) {
    let mut revisions = transcript.subscribe();
    let mut printed = 0;
    loop {
        let turns = transcript.snapshot();
        if turns.len() < printed {
            printed = 0;
        }
        while let Some(turn) = turns.get(printed) {
            if !turn.is_final {
                break;
            }
            if turn.role != Role::User {
                println!("{}", render_turn(turn));
            }
            printed += 1;
        }
        if revisions.changed().await.is_err() {
            return;
        }
    }
}

fn render_turn(turn: &ConversationTurn) -> String {
    match turn.role {
        Role::User => format!("you -> {}", turn.text),
        Role::Agent => format!("agent -> {}", turn.text),
        Role::System => format!("  [{}]", turn.text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cabin_live::ToolHandler;

    #[test]
    fn test_render_turn() {
        assert_eq!(render_turn(&ConversationTurn::new(Role::Agent, "Hi!", true)), "agent -> Hi!");
        assert_eq!(render_turn(&ConversationTurn::system("Found 2 stations")), "  [Found 2 stations]");
    }

    #[tokio::test]
    async fn test_current_time_tool() {
        let registry = console_tools();
        let handler = registry.get("current_time").unwrap();
        let output = handler
            .invoke(serde_json::Map::new(), Arc::new(cabin_live::ToolContext::new()))
            .await
            .unwrap();
        assert!(output.response_value()["local_time"].is_string());
        assert!(output.summary.unwrap().starts_with("Local time is"));
    }
}
