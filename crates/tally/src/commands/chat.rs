use async_trait::async_trait;
use eyre::Result;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use super::Command;
use crate::output::EventPrinter;
use tally_core::app::SessionError;
use tally_core::auth::CredentialProvider;
use tally_core::config::ClientConfig;

const HELP: &str = "\
/cancel   stop the reply being streamed
/retry    ask the last question again
/confirm  approve the pending action
/reject   decline the pending action
/new      start a new session
/status   show session state
/quit     exit";

#[derive(Debug, PartialEq, Eq)]
enum ReplInput<'a> {
    Empty,
    Query(&'a str),
    Cancel,
    Retry,
    Confirm,
    Reject,
    New,
    Status,
    Help,
    Quit,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> ReplInput<'_> {
    let line = line.trim();
    if line.is_empty() {
        return ReplInput::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ReplInput::Query(line);
    };
    match command {
        "cancel" => ReplInput::Cancel,
        "retry" => ReplInput::Retry,
        "confirm" | "yes" => ReplInput::Confirm,
        "reject" | "no" => ReplInput::Reject,
        "new" => ReplInput::New,
        "status" => ReplInput::Status,
        "help" | "?" => ReplInput::Help,
        "quit" | "exit" | "q" => ReplInput::Quit,
        _ => ReplInput::Unknown(line),
    }
}

/// Interactive session reading questions and commands from stdin.
pub struct ChatCommand {
    pub config: ClientConfig,
    pub credentials: Arc<dyn CredentialProvider>,
    pub json: bool,
}

#[async_trait]
impl Command for ChatCommand {
    async fn execute(&self) -> Result<()> {
        let session = crate::spawn_session(self.config.clone(), self.credentials.clone())?;
        let mut events = session.subscribe().await?;
        let mut printer = EventPrinter::new(io::stdout(), self.json).with_hints();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        printer.note(&format!(
            "Connected to {}. Type /help for commands.",
            self.config.base_url
        ))?;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => printer.print(&event)?,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event printer fell behind");
                    }
                    Err(RecvError::Closed) => break,
                },

                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    let result = match parse_input(&line) {
                        ReplInput::Empty => Ok(()),
                        ReplInput::Quit => break,
                        ReplInput::Help => {
                            printer.note(HELP)?;
                            Ok(())
                        }
                        ReplInput::Unknown(command) => {
                            printer.note(&format!("Unknown command {command}. Type /help."))?;
                            Ok(())
                        }
                        ReplInput::Status => match session.get_state().await {
                            Ok(state) => {
                                printer.print_status(&state)?;
                                Ok(())
                            }
                            Err(e) => Err(report_error(e)),
                        },
                        ReplInput::Query(query) => session.submit(query).await.map_err(report_error),
                        ReplInput::Cancel => session.cancel().await.map_err(report_error),
                        ReplInput::Retry => session.retry().await.map_err(report_error),
                        ReplInput::Confirm => session.confirm().await.map_err(report_error),
                        ReplInput::Reject => session.reject().await.map_err(report_error),
                        ReplInput::New => session.new_session().await.map(|_| ()).map_err(report_error),
                    };
                    match result {
                        Ok(()) | Err(None) => {}
                        Err(Some(e)) => printer.error(&e)?,
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    let state = session.get_state().await?;
                    if !state.is_streaming() {
                        break;
                    }
                    session.cancel().await?;
                }
            }
        }

        session.shutdown();
        Ok(())
    }
}

/// Errors the session already surfaced as an event are not repeated.
fn report_error(error: SessionError) -> Option<SessionError> {
    match error {
        SessionError::AuthRequired => None,
        error => Some(error),
    }
}
