use colored::Colorize;
use std::io::{self, Write};
use std::time::Duration;

use chrono::Utc;
use tally_core::app::domain::confirmation::format_countdown;
use tally_core::app::domain::{ErrorKind, PendingConfirmation, Role, SessionEvent, SessionState};

/// Writes session events to a terminal, either as prose or as JSON lines.
pub struct EventPrinter<W: Write> {
    out: W,
    json: bool,
    /// Show REPL command hints (`/retry`, `/confirm`).
    hints: bool,
    /// The cursor is mid-line inside a streamed reply.
    in_reply: bool,
}

impl<W: Write> EventPrinter<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self {
            out,
            json,
            hints: false,
            in_reply: false,
        }
    }

    pub fn with_hints(mut self) -> Self {
        self.hints = true;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn print(&mut self, event: &SessionEvent) -> io::Result<()> {
        if self.json {
            serde_json::to_writer(&mut self.out, event)?;
            writeln!(self.out)?;
            return self.out.flush();
        }

        match event {
            SessionEvent::MessageAdded { message } if message.role == Role::System => {
                self.end_reply()?;
                writeln!(self.out, "{}", format!("» {}", message.content).yellow())?;
            }
            SessionEvent::MessageAdded { .. } | SessionEvent::StreamOpened { .. } => {}
            SessionEvent::MessageDelta { delta, .. } => {
                write!(self.out, "{delta}")?;
                self.in_reply = true;
            }
            SessionEvent::StreamCompleted { .. } => self.end_reply()?,
            SessionEvent::StreamCancelled { .. } => {
                writeln!(
                    self.out,
                    "{}",
                    tally_core::app::domain::CANCELLED_MARKER.dimmed()
                )?;
                self.in_reply = false;
            }
            SessionEvent::StreamFailed { kind, message, .. } => {
                self.end_reply()?;
                writeln!(self.out, "{} {message}", "error:".red().bold())?;
                if self.hints && kind.is_retryable() {
                    writeln!(self.out, "{}", "Type /retry to ask again.".dimmed())?;
                }
            }
            SessionEvent::Error { kind, message } => {
                self.end_reply()?;
                writeln!(self.out, "{} {message}", "error:".red().bold())?;
                if *kind == ErrorKind::AuthRequired {
                    writeln!(
                        self.out,
                        "{}",
                        "Set TALLY_TOKEN or pass --token.".dimmed()
                    )?;
                }
            }
            SessionEvent::ConfirmationRequested {
                confirmation,
                replaced,
            } => {
                self.end_reply()?;
                if let Some(previous) = replaced {
                    writeln!(
                        self.out,
                        "{}",
                        format!("(superseded confirmation {previous})").dimmed()
                    )?;
                }
                self.print_confirmation(confirmation)?;
            }
            SessionEvent::ConfirmationCountdown { remaining_secs, .. } => {
                if is_countdown_milestone(*remaining_secs) {
                    self.end_reply()?;
                    let remaining = format_countdown(Duration::from_secs(*remaining_secs));
                    writeln!(
                        self.out,
                        "{}",
                        format!("Confirmation expires in {remaining}.").dimmed()
                    )?;
                }
            }
            SessionEvent::ConfirmationResolved { .. } => {}
            SessionEvent::TruncationNotice { notice } => {
                self.end_reply()?;
                writeln!(self.out, "{} {}", "note:".cyan(), notice.message)?;
            }
            SessionEvent::PaginationNotice { info } => {
                self.end_reply()?;
                let text = info.message.as_deref().unwrap_or("More results are available.");
                writeln!(self.out, "{} {text}", "note:".cyan())?;
            }
            SessionEvent::ServiceUnavailable { info } => {
                self.end_reply()?;
                let text = info
                    .message
                    .as_deref()
                    .unwrap_or("A backing service is unavailable.");
                writeln!(self.out, "{} {text}", "warning:".yellow().bold())?;
            }
            SessionEvent::DirectiveDetected { directive, .. } => {
                self.end_reply()?;
                writeln!(
                    self.out,
                    "{}",
                    format!("Rendering {}...", directive.component).dimmed()
                )?;
            }
            SessionEvent::DirectiveResolved {
                directive,
                descriptor,
                ..
            } => {
                let body = serde_json::to_string_pretty(&descriptor.0)
                    .unwrap_or_else(|_| descriptor.0.to_string());
                writeln!(self.out, "{}", format!("[{}]", directive.component).green())?;
                writeln!(self.out, "{body}")?;
            }
            SessionEvent::DirectiveFailed {
                directive, error, ..
            } => {
                writeln!(
                    self.out,
                    "{} could not render {}: {error}",
                    "warning:".yellow().bold(),
                    directive.component
                )?;
            }
            SessionEvent::SessionReset { session_id, .. } => {
                self.end_reply()?;
                writeln!(self.out, "{}", format!("New session {session_id}").dimmed())?;
            }
        }

        self.out.flush()
    }

    fn print_confirmation(&mut self, confirmation: &PendingConfirmation) -> io::Result<()> {
        let remaining = format_countdown(confirmation.remaining(Utc::now()));
        let prompt = if confirmation.message.is_empty() {
            "The assistant wants to perform an action."
        } else {
            confirmation.message.as_str()
        };
        writeln!(
            self.out,
            "{} {prompt} [{}]",
            "Confirmation required:".yellow().bold(),
            confirmation.action
        )?;
        if self.hints {
            writeln!(
                self.out,
                "{}",
                format!("Reply /confirm or /reject within {remaining}.").dimmed()
            )?;
        } else {
            writeln!(
                self.out,
                "{}",
                format!("Confirm? [y/N] (expires in {remaining})").dimmed()
            )?;
        }
        Ok(())
    }

    /// A dimmed informational line.
    pub fn note(&mut self, text: &str) -> io::Result<()> {
        if self.json {
            return Ok(());
        }
        self.end_reply()?;
        writeln!(self.out, "{}", text.dimmed())?;
        self.out.flush()
    }

    pub fn error(&mut self, error: &dyn std::fmt::Display) -> io::Result<()> {
        self.end_reply()?;
        if self.json {
            let line = serde_json::json!({ "type": "cli_error", "message": error.to_string() });
            writeln!(self.out, "{line}")?;
        } else {
            writeln!(self.out, "{} {error}", "error:".red().bold())?;
        }
        self.out.flush()
    }

    /// One-screen summary for `/status`.
    pub fn print_status(&mut self, state: &SessionState) -> io::Result<()> {
        if self.json {
            let status = serde_json::json!({
                "session_id": state.session_id,
                "messages": state.messages.len(),
                "streaming": state.is_streaming(),
                "pending_confirmation": state.pending_confirmation,
                "truncation": state.truncation,
                "last_error": state.last_error,
            });
            writeln!(self.out, "{status}")?;
            return self.out.flush();
        }

        writeln!(self.out, "session:   {}", state.session_id)?;
        writeln!(self.out, "messages:  {}", state.messages.len())?;
        writeln!(
            self.out,
            "streaming: {}",
            if state.is_streaming() { "yes" } else { "no" }
        )?;
        if let Some(pending) = &state.pending_confirmation {
            writeln!(
                self.out,
                "pending:   {} ({} left)",
                pending.action,
                format_countdown(pending.remaining(Utc::now()))
            )?;
        }
        if let Some(notice) = &state.truncation {
            writeln!(self.out, "truncated: {}", notice.message)?;
        }
        if let Some(error) = &state.last_error {
            writeln!(self.out, "error:     {} ({})", error.message, error.kind)?;
        }
        self.out.flush()
    }

    fn end_reply(&mut self) -> io::Result<()> {
        if self.in_reply {
            writeln!(self.out)?;
            self.in_reply = false;
        }
        Ok(())
    }
}

/// Whole minutes and the ten-second mark get a readout line.
fn is_countdown_milestone(remaining_secs: u64) -> bool {
    remaining_secs > 0 && (remaining_secs % 60 == 0 || remaining_secs == 10)
}
