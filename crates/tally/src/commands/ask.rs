use async_trait::async_trait;
use eyre::{Result, eyre};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use super::Command;
use crate::output::EventPrinter;
use tally_core::app::domain::{DirectiveState, SessionEvent, SessionState};
use tally_core::auth::CredentialProvider;
use tally_core::config::ClientConfig;

/// Streams the reply to a single question, then exits.
pub struct AskCommand {
    pub query: String,
    pub config: ClientConfig,
    pub credentials: Arc<dyn CredentialProvider>,
    pub json: bool,
}

/// Nothing more will arrive for the current reply.
fn is_settled(state: &SessionState) -> bool {
    !state.is_streaming()
        && state.pending_confirmation.is_none()
        && !matches!(state.directive, Some(DirectiveState::Resolving { .. }))
}

fn is_approval(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl Command for AskCommand {
    async fn execute(&self) -> Result<()> {
        let session = crate::spawn_session(self.config.clone(), self.credentials.clone())?;
        let mut events = session.subscribe().await?;
        let mut printer = EventPrinter::new(io::stdout(), self.json);
        let mut answers = BufReader::new(tokio::io::stdin()).lines();
        let mut awaiting_answer = false;

        session.submit(self.query.clone()).await?;

        let outcome = loop {
            tokio::select! {
                event = events.recv() => {
                    let event = match event {
                        Ok(event) => event,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Event printer fell behind");
                            continue;
                        }
                        Err(RecvError::Closed) => break Err(eyre!("Session ended unexpectedly")),
                    };
                    printer.print(&event)?;

                    match &event {
                        SessionEvent::StreamFailed { message, .. } => {
                            break Err(eyre!(message.clone()));
                        }
                        SessionEvent::StreamCancelled { .. } => break Ok(()),
                        SessionEvent::ConfirmationRequested { .. } => awaiting_answer = true,
                        SessionEvent::ConfirmationResolved { .. } => awaiting_answer = false,
                        _ => {}
                    }
                    if event_may_settle(&event) && is_settled(&session.get_state().await?) {
                        break Ok(());
                    }
                }

                line = answers.next_line(), if awaiting_answer => {
                    awaiting_answer = false;
                    // EOF leaves the confirmation to expire.
                    if let Some(answer) = line? {
                        let result = if is_approval(&answer) {
                            session.confirm().await
                        } else {
                            session.reject().await
                        };
                        if let Err(e) = result {
                            printer.error(&e)?;
                        }
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    session.cancel().await?;
                }
            }
        };

        session.shutdown();
        outcome
    }
}

fn event_may_settle(event: &SessionEvent) -> bool {
    matches!(
        event,
        SessionEvent::StreamCompleted { .. }
            | SessionEvent::ConfirmationResolved { .. }
            | SessionEvent::DirectiveResolved { .. }
            | SessionEvent::DirectiveFailed { .. }
    )
}
