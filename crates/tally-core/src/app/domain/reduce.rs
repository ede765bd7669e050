use crate::app::domain::action::Action;
use crate::app::domain::confirmation::{
    ConfirmationDecision, ConfirmationOutcome, PendingConfirmation,
};
use crate::app::domain::directive::{self, ComponentDescriptor, ComponentDirective};
use crate::app::domain::effect::Effect;
use crate::app::domain::event::SessionEvent;
use crate::app::domain::frame::{ConfirmationRequest, DecodedFrame, StreamFrame, decode_frame};
use crate::app::domain::message::{CANCELLED_MARKER, Message};
use crate::app::domain::state::{
    ActiveStream, DirectiveState, ErrorKind, ErrorNotice, SessionState, TruncationNotice,
};
use crate::app::domain::types::{
    ConfirmationId, ConnectionId, MessageId, NonEmptyString, SessionId, Timestamp,
};

const DEFAULT_TRUNCATION_MESSAGE: &str = "Results were truncated";
const AUTH_REQUIRED_MESSAGE: &str = "Authentication required: sign in and try again";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidActionKind {
    StreamActive,
    NothingToRetry,
    UnknownConfirmation,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReduceError {
    #[error("{message}")]
    InvalidAction {
        message: String,
        kind: InvalidActionKind,
    },
}

impl ReduceError {
    fn invalid(kind: InvalidActionKind, message: impl Into<String>) -> Self {
        ReduceError::InvalidAction {
            message: message.into(),
            kind,
        }
    }
}

pub fn reduce(state: &mut SessionState, action: Action) -> Result<Vec<Effect>, ReduceError> {
    match action {
        Action::Submit {
            query,
            connection_id,
            user_message_id,
            assistant_message_id,
            timestamp,
        } => handle_submit(
            state,
            query,
            connection_id,
            user_message_id,
            assistant_message_id,
            timestamp,
        ),

        Action::Retry {
            connection_id,
            user_message_id,
            assistant_message_id,
            timestamp,
        } => handle_retry(
            state,
            connection_id,
            user_message_id,
            assistant_message_id,
            timestamp,
        ),

        Action::AuthenticationRequired => Ok(handle_auth_required(state)),

        Action::StreamOpened { connection_id } => Ok(handle_stream_opened(state, connection_id)),

        Action::FrameReceived {
            connection_id,
            data,
            timestamp,
        } => Ok(handle_frame(state, connection_id, &data, timestamp)),

        Action::TransportFailed {
            connection_id,
            error,
        } => Ok(handle_transport_failed(state, connection_id, error)),

        Action::Cancel => Ok(handle_cancel(state)),

        Action::ConfirmationDecided {
            confirmation_id,
            decision,
            message_id,
            timestamp,
        } => handle_confirmation_decided(state, confirmation_id, decision, message_id, timestamp),

        Action::ConfirmationDeliveryFailed {
            confirmation_id,
            error,
        } => Ok(handle_confirmation_delivery_failed(
            state,
            &confirmation_id,
            &error,
        )),

        Action::Tick {
            message_id,
            timestamp,
        } => Ok(handle_tick(state, message_id, timestamp)),

        Action::DirectiveResolved {
            message_id,
            directive,
            result,
        } => Ok(handle_directive_resolved(
            state, message_id, directive, result,
        )),

        Action::NewSession { session_id } => Ok(handle_new_session(state, session_id)),

        Action::Shutdown => Ok(handle_shutdown(state)),
    }
}

fn handle_submit(
    state: &mut SessionState,
    query: NonEmptyString,
    connection_id: ConnectionId,
    user_message_id: MessageId,
    assistant_message_id: MessageId,
    timestamp: Timestamp,
) -> Result<Vec<Effect>, ReduceError> {
    if state.is_streaming() {
        return Err(ReduceError::invalid(
            InvalidActionKind::StreamActive,
            "A reply is still streaming; cancel it or wait for it to finish",
        ));
    }

    let session_id = state.session_id;
    state.clear_reply_notices();
    state.last_query = Some(query.clone());

    let user_message = Message::user(user_message_id, query.as_str(), timestamp);
    let assistant_message = Message::assistant_placeholder(assistant_message_id.clone(), timestamp);
    state.messages.push(user_message.clone());
    state.messages.push(assistant_message.clone());
    state.active_stream = Some(ActiveStream {
        connection_id,
        message_id: assistant_message_id,
        opened: false,
    });

    tracing::debug!(
        session_id = %session_id,
        connection_id = %connection_id,
        "Submitting query"
    );

    Ok(vec![
        Effect::EmitEvent {
            session_id,
            event: SessionEvent::MessageAdded {
                message: user_message,
            },
        },
        Effect::EmitEvent {
            session_id,
            event: SessionEvent::MessageAdded {
                message: assistant_message,
            },
        },
        Effect::OpenStream {
            session_id,
            connection_id,
            query,
        },
    ])
}

fn handle_retry(
    state: &mut SessionState,
    connection_id: ConnectionId,
    user_message_id: MessageId,
    assistant_message_id: MessageId,
    timestamp: Timestamp,
) -> Result<Vec<Effect>, ReduceError> {
    if state.is_streaming() {
        return Err(ReduceError::invalid(
            InvalidActionKind::StreamActive,
            "A reply is still streaming; nothing to retry",
        ));
    }

    let Some(query) = state.last_query.clone() else {
        return Err(ReduceError::invalid(
            InvalidActionKind::NothingToRetry,
            "No previous query to retry",
        ));
    };

    handle_submit(
        state,
        query,
        connection_id,
        user_message_id,
        assistant_message_id,
        timestamp,
    )
}

fn handle_auth_required(state: &mut SessionState) -> Vec<Effect> {
    record_error(state, ErrorKind::AuthRequired, AUTH_REQUIRED_MESSAGE.to_string())
}

fn handle_stream_opened(state: &mut SessionState, connection_id: ConnectionId) -> Vec<Effect> {
    let session_id = state.session_id;
    match state.active_stream.as_mut() {
        Some(stream) if stream.connection_id == connection_id => {
            stream.opened = true;
            vec![Effect::EmitEvent {
                session_id,
                event: SessionEvent::StreamOpened { connection_id },
            }]
        }
        _ => {
            tracing::debug!(connection_id = %connection_id, "Ignoring open from stale connection");
            vec![]
        }
    }
}

fn handle_frame(
    state: &mut SessionState,
    connection_id: ConnectionId,
    data: &str,
    timestamp: Timestamp,
) -> Vec<Effect> {
    if !state.is_active_connection(connection_id) {
        tracing::debug!(
            session_id = %state.session_id,
            connection_id = %connection_id,
            closed = state.was_closed(connection_id),
            "Dropping frame from inactive connection"
        );
        return vec![];
    }

    match decode_frame(data, &state.config.completion_sentinel) {
        DecodedFrame::Done => complete_stream(state),
        DecodedFrame::Raw(text) => append_delta(state, text),
        DecodedFrame::Structured(frame) => match frame {
            StreamFrame::Text { text } => append_delta(state, text),
            StreamFrame::Error { message } => fail_stream(state, ErrorKind::Application, message),
            StreamFrame::Pagination(info) => {
                tracing::debug!(session_id = %state.session_id, "Pagination frame received");
                state.pagination = Some(info.clone());
                vec![Effect::EmitEvent {
                    session_id: state.session_id,
                    event: SessionEvent::PaginationNotice { info },
                }]
            }
            StreamFrame::ServiceUnavailable(info) => {
                tracing::warn!(
                    session_id = %state.session_id,
                    message = info.message.as_deref().unwrap_or_default(),
                    "Upstream service unavailable"
                );
                vec![Effect::EmitEvent {
                    session_id: state.session_id,
                    event: SessionEvent::ServiceUnavailable { info },
                }]
            }
            StreamFrame::PendingConfirmation(request) => {
                request_confirmation(state, request, timestamp)
            }
            StreamFrame::Truncated(metadata) => {
                let notice = TruncationNotice {
                    message: metadata
                        .warning
                        .unwrap_or_else(|| DEFAULT_TRUNCATION_MESSAGE.to_string()),
                    approximate_total: metadata.approximate_total,
                };
                state.truncation = Some(notice.clone());
                vec![Effect::EmitEvent {
                    session_id: state.session_id,
                    event: SessionEvent::TruncationNotice { notice },
                }]
            }
            StreamFrame::Unrecognized => {
                tracing::debug!(session_id = %state.session_id, "Ignoring unrecognized frame");
                vec![]
            }
        },
    }
}

fn append_delta(state: &mut SessionState, delta: String) -> Vec<Effect> {
    let session_id = state.session_id;
    let Some(message_id) = state.active_stream.as_ref().map(|s| s.message_id.clone()) else {
        return vec![];
    };
    let Some(message) = state.message_mut(&message_id) else {
        return vec![];
    };
    if delta.is_empty() {
        return vec![];
    }

    message.content.push_str(&delta);

    vec![Effect::EmitEvent {
        session_id,
        event: SessionEvent::MessageDelta { message_id, delta },
    }]
}

fn complete_stream(state: &mut SessionState) -> Vec<Effect> {
    let session_id = state.session_id;
    let Some(stream) = state.finish_stream() else {
        return vec![];
    };

    let mut effects = vec![
        Effect::CloseStream {
            session_id,
            connection_id: stream.connection_id,
        },
        Effect::EmitEvent {
            session_id,
            event: SessionEvent::StreamCompleted {
                message_id: stream.message_id.clone(),
            },
        },
    ];

    let detected = state
        .message(&stream.message_id)
        .and_then(|message| directive::detect(&message.content));

    if let Some(directive) = detected {
        tracing::debug!(
            session_id = %session_id,
            directive = %directive,
            "Directive detected in completed reply"
        );
        state.directive = Some(DirectiveState::Resolving {
            message_id: stream.message_id.clone(),
            directive: directive.clone(),
        });
        effects.push(Effect::EmitEvent {
            session_id,
            event: SessionEvent::DirectiveDetected {
                message_id: stream.message_id.clone(),
                directive: directive.clone(),
            },
        });
        effects.push(Effect::ResolveDirective {
            session_id,
            message_id: stream.message_id,
            directive,
        });
    }

    effects
}

fn fail_stream(state: &mut SessionState, kind: ErrorKind, message: String) -> Vec<Effect> {
    let session_id = state.session_id;
    let Some(stream) = state.finish_stream() else {
        return vec![];
    };

    tracing::warn!(
        session_id = %session_id,
        connection_id = %stream.connection_id,
        kind = %kind,
        error = %message,
        "Stream ended with error"
    );

    state.last_error = Some(ErrorNotice {
        kind,
        message: message.clone(),
    });

    vec![
        Effect::CloseStream {
            session_id,
            connection_id: stream.connection_id,
        },
        Effect::EmitEvent {
            session_id,
            event: SessionEvent::StreamFailed {
                message_id: stream.message_id,
                kind,
                message,
            },
        },
    ]
}

fn handle_transport_failed(
    state: &mut SessionState,
    connection_id: ConnectionId,
    error: String,
) -> Vec<Effect> {
    if !state.is_active_connection(connection_id) {
        tracing::debug!(
            connection_id = %connection_id,
            error = %error,
            "Ignoring transport error from inactive connection"
        );
        return vec![];
    }

    fail_stream(state, ErrorKind::Transport, error)
}

fn handle_cancel(state: &mut SessionState) -> Vec<Effect> {
    let session_id = state.session_id;
    let Some(stream) = state.finish_stream() else {
        return vec![];
    };

    let content = match state.message_mut(&stream.message_id) {
        Some(message) => {
            message.content.push_str(CANCELLED_MARKER);
            message.content.clone()
        }
        None => String::new(),
    };

    tracing::info!(
        session_id = %session_id,
        connection_id = %stream.connection_id,
        "Reply cancelled by user"
    );

    vec![
        Effect::CloseStream {
            session_id,
            connection_id: stream.connection_id,
        },
        Effect::EmitEvent {
            session_id,
            event: SessionEvent::StreamCancelled {
                message_id: stream.message_id,
                content,
            },
        },
    ]
}

fn request_confirmation(
    state: &mut SessionState,
    request: ConfirmationRequest,
    timestamp: Timestamp,
) -> Vec<Effect> {
    let pending = PendingConfirmation::from_request(request, timestamp, state.config.confirmation_ttl);
    state.countdown_secs = Some(pending.remaining_secs(timestamp));
    let replaced = state
        .pending_confirmation
        .replace(pending.clone())
        .map(|previous| previous.confirmation_id);

    if let Some(previous) = &replaced {
        tracing::warn!(
            session_id = %state.session_id,
            previous = %previous,
            confirmation_id = %pending.confirmation_id,
            "Confirmation requested while another was outstanding; replacing it"
        );
    } else {
        tracing::info!(
            session_id = %state.session_id,
            confirmation_id = %pending.confirmation_id,
            action = %pending.action,
            "Confirmation requested"
        );
    }

    vec![Effect::EmitEvent {
        session_id: state.session_id,
        event: SessionEvent::ConfirmationRequested {
            confirmation: pending,
            replaced,
        },
    }]
}

fn handle_confirmation_decided(
    state: &mut SessionState,
    confirmation_id: ConfirmationId,
    decision: ConfirmationDecision,
    message_id: MessageId,
    timestamp: Timestamp,
) -> Result<Vec<Effect>, ReduceError> {
    let pending = match state.pending_confirmation.take() {
        Some(p) if p.confirmation_id == confirmation_id => p,
        other => {
            state.pending_confirmation = other;
            return Err(ReduceError::invalid(
                InvalidActionKind::UnknownConfirmation,
                format!("No pending confirmation with id {confirmation_id}"),
            ));
        }
    };

    if pending.is_expired(timestamp) {
        return Ok(expire_confirmation(state, pending, message_id, timestamp));
    }

    let session_id = state.session_id;
    let outcome = ConfirmationOutcome::from(decision);
    let effects = resolve_confirmation(state, &pending, outcome, message_id, timestamp);

    Ok(effects
        .into_iter()
        .chain(std::iter::once(Effect::DeliverConfirmation {
            session_id,
            confirmation_id: pending.confirmation_id,
            approved: decision.is_approved(),
        }))
        .collect())
}

fn handle_tick(state: &mut SessionState, message_id: MessageId, timestamp: Timestamp) -> Vec<Effect> {
    match state.pending_confirmation.take() {
        Some(pending) if pending.is_expired(timestamp) => {
            state.countdown_secs = None;
            expire_confirmation(state, pending, message_id, timestamp)
        }
        Some(pending) => {
            let remaining_secs = pending.remaining_secs(timestamp);
            let confirmation_id = pending.confirmation_id.clone();
            state.pending_confirmation = Some(pending);
            if state.countdown_secs == Some(remaining_secs) {
                return vec![];
            }
            state.countdown_secs = Some(remaining_secs);
            vec![Effect::EmitEvent {
                session_id: state.session_id,
                event: SessionEvent::ConfirmationCountdown {
                    confirmation_id,
                    remaining_secs,
                },
            }]
        }
        None => vec![],
    }
}

fn expire_confirmation(
    state: &mut SessionState,
    pending: PendingConfirmation,
    message_id: MessageId,
    timestamp: Timestamp,
) -> Vec<Effect> {
    tracing::info!(
        session_id = %state.session_id,
        confirmation_id = %pending.confirmation_id,
        "Confirmation expired without a decision"
    );
    state.last_error = Some(ErrorNotice {
        kind: ErrorKind::ConfirmationExpired,
        message: format!("Confirmation {} expired", pending.confirmation_id),
    });
    resolve_confirmation(
        state,
        &pending,
        ConfirmationOutcome::Expired,
        message_id,
        timestamp,
    )
}

/// Records the outcome in the transcript. The pending confirmation must
/// already have been taken out of the state.
fn resolve_confirmation(
    state: &mut SessionState,
    pending: &PendingConfirmation,
    outcome: ConfirmationOutcome,
    message_id: MessageId,
    timestamp: Timestamp,
) -> Vec<Effect> {
    let session_id = state.session_id;
    let message = Message::system(message_id, outcome.transcript_text(&pending.action), timestamp);
    state.messages.push(message.clone());

    vec![
        Effect::EmitEvent {
            session_id,
            event: SessionEvent::MessageAdded { message },
        },
        Effect::EmitEvent {
            session_id,
            event: SessionEvent::ConfirmationResolved {
                confirmation_id: pending.confirmation_id.clone(),
                outcome,
            },
        },
    ]
}

fn handle_confirmation_delivery_failed(
    state: &mut SessionState,
    confirmation_id: &ConfirmationId,
    error: &str,
) -> Vec<Effect> {
    record_error(
        state,
        ErrorKind::ConfirmationDelivery,
        format!("Failed to deliver decision for confirmation {confirmation_id}: {error}"),
    )
}

fn handle_directive_resolved(
    state: &mut SessionState,
    message_id: MessageId,
    directive: ComponentDirective,
    result: Result<ComponentDescriptor, String>,
) -> Vec<Effect> {
    let is_current = matches!(
        &state.directive,
        Some(DirectiveState::Resolving { message_id: m, directive: d })
            if *m == message_id && *d == directive
    );
    if !is_current {
        tracing::debug!(directive = %directive, "Ignoring resolution for superseded directive");
        return vec![];
    }

    let session_id = state.session_id;
    match result {
        Ok(descriptor) => {
            state.directive = Some(DirectiveState::Resolved {
                message_id: message_id.clone(),
                directive: directive.clone(),
                descriptor: descriptor.clone(),
            });
            vec![Effect::EmitEvent {
                session_id,
                event: SessionEvent::DirectiveResolved {
                    message_id,
                    directive,
                    descriptor,
                },
            }]
        }
        Err(error) => {
            tracing::warn!(directive = %directive, error = %error, "Directive resolution failed");
            state.directive = Some(DirectiveState::Failed {
                message_id: message_id.clone(),
                directive: directive.clone(),
                error: error.clone(),
            });
            state.last_error = Some(ErrorNotice {
                kind: ErrorKind::DirectiveResolution,
                message: error.clone(),
            });
            vec![Effect::EmitEvent {
                session_id,
                event: SessionEvent::DirectiveFailed {
                    message_id,
                    directive,
                    error,
                },
            }]
        }
    }
}

fn handle_new_session(state: &mut SessionState, session_id: SessionId) -> Vec<Effect> {
    let previous_session_id = state.session_id;
    let mut effects = Vec::new();

    if let Some(stream) = state.finish_stream() {
        effects.push(Effect::CloseStream {
            session_id: previous_session_id,
            connection_id: stream.connection_id,
        });
    }

    let config = state.config.clone();
    *state = SessionState::with_config(session_id, config);

    effects.push(Effect::EmitEvent {
        session_id,
        event: SessionEvent::SessionReset {
            previous_session_id,
            session_id,
        },
    });

    effects
}

fn handle_shutdown(state: &mut SessionState) -> Vec<Effect> {
    let session_id = state.session_id;
    match state.finish_stream() {
        Some(stream) => vec![Effect::CloseStream {
            session_id,
            connection_id: stream.connection_id,
        }],
        None => vec![],
    }
}

fn record_error(state: &mut SessionState, kind: ErrorKind, message: String) -> Vec<Effect> {
    state.last_error = Some(ErrorNotice {
        kind,
        message: message.clone(),
    });
    vec![Effect::EmitEvent {
        session_id: state.session_id,
        event: SessionEvent::Error { kind, message },
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::domain::message::Role;
    use crate::app::domain::state::StreamingConfig;
    use crate::app::domain::types::SessionId;
    use chrono::{Duration, TimeZone, Utc};

    fn test_state() -> SessionState {
        SessionState::new(SessionId::new())
    }

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    fn submit(state: &mut SessionState, query: &str) -> (ConnectionId, Vec<Effect>) {
        let connection_id = ConnectionId::new();
        let effects = reduce(
            state,
            Action::Submit {
                query: NonEmptyString::new(query).unwrap(),
                connection_id,
                user_message_id: MessageId::new(),
                assistant_message_id: MessageId::new(),
                timestamp: t0(),
            },
        )
        .unwrap();
        (connection_id, effects)
    }

    fn frame(state: &mut SessionState, connection_id: ConnectionId, data: &str) -> Vec<Effect> {
        frame_at(state, connection_id, data, t0())
    }

    fn frame_at(
        state: &mut SessionState,
        connection_id: ConnectionId,
        data: &str,
        timestamp: Timestamp,
    ) -> Vec<Effect> {
        reduce(
            state,
            Action::FrameReceived {
                connection_id,
                data: data.to_string(),
                timestamp,
            },
        )
        .unwrap()
    }

    fn close_count(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, Effect::CloseStream { .. }))
            .count()
    }

    fn last_assistant(state: &SessionState) -> &Message {
        state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .unwrap()
    }

    fn confirmation_frame(id: &str) -> String {
        format!(
            r#"{{"status":"pending_confirmation","confirmationId":"{id}","message":"Approve invoice INV-{id}?","action":"approve_invoice"}}"#
        )
    }

    #[test]
    fn submit_adds_messages_and_opens_stream() {
        let mut state = test_state();
        let (connection_id, effects) = submit(&mut state, "  What is our Q1 budget?  ");

        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].role, Role::User);
        assert_eq!(state.messages[0].content, "What is our Q1 budget?");
        assert!(state.messages[1].is_streaming);
        assert!(state.messages[1].content.is_empty());
        assert!(state.is_active_connection(connection_id));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::OpenStream { connection_id: c, query, .. }
                if *c == connection_id && query.as_str() == "What is our Q1 budget?"
        )));
        assert!(state.streaming_invariant_holds());
    }

    #[test]
    fn end_to_end_budget_question() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "What is our Q1 budget?");

        frame(&mut state, connection_id, r#"{"type":"text","text":"The total "}"#);
        frame(&mut state, connection_id, r#"{"type":"text","text":"is $1M."}"#);
        let effects = frame(&mut state, connection_id, "[DONE]");

        let reply = last_assistant(&state);
        assert_eq!(reply.content, "The total is $1M.");
        assert!(!reply.is_streaming);
        assert!(state.pending_confirmation.is_none());
        assert!(state.truncation.is_none());
        assert!(state.directive.is_none());
        assert!(!state.is_streaming());
        assert_eq!(close_count(&effects), 1);
        assert!(state.streaming_invariant_holds());
    }

    #[test]
    fn raw_frames_are_appended_verbatim() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "hi");

        let effects = frame(&mut state, connection_id, "plain chunk");

        assert_eq!(last_assistant(&state).content, "plain chunk");
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::EmitEvent { event: SessionEvent::MessageDelta { delta, .. }, .. } if delta == "plain chunk"
        )));
        assert!(state.last_error.is_none());
    }

    #[test]
    fn mixed_framing_concatenates_in_order() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "hi");

        frame(&mut state, connection_id, r#"{"type":"text","text":"a"}"#);
        frame(&mut state, connection_id, "b");
        frame(&mut state, connection_id, r#"{"type":"text","text":"c"}"#);
        frame(&mut state, connection_id, "{d");

        assert_eq!(last_assistant(&state).content, "abc{d");
    }

    #[test]
    fn sentinel_closes_exactly_once() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "hi");
        frame(&mut state, connection_id, "partial");

        let first = frame(&mut state, connection_id, "[DONE]");
        let second = frame(&mut state, connection_id, "[DONE]");
        let late = frame(&mut state, connection_id, "late text");
        let error = reduce(
            &mut state,
            Action::TransportFailed {
                connection_id,
                error: "connection reset".to_string(),
            },
        )
        .unwrap();

        assert_eq!(close_count(&first), 1);
        assert!(second.is_empty());
        assert!(late.is_empty());
        assert!(error.is_empty());
        assert_eq!(last_assistant(&state).content, "partial");
        assert!(state.last_error.is_none());
        assert_eq!(state.messages.iter().filter(|m| m.is_streaming).count(), 0);
    }

    #[test]
    fn submit_while_streaming_is_rejected() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "first");
        let count = state.messages.len();

        let result = reduce(
            &mut state,
            Action::Submit {
                query: NonEmptyString::new("second").unwrap(),
                connection_id: ConnectionId::new(),
                user_message_id: MessageId::new(),
                assistant_message_id: MessageId::new(),
                timestamp: t0(),
            },
        );

        assert!(matches!(
            result,
            Err(ReduceError::InvalidAction {
                kind: InvalidActionKind::StreamActive,
                ..
            })
        ));
        assert_eq!(state.messages.len(), count);
        assert!(state.is_active_connection(connection_id));
    }

    #[test]
    fn cancel_appends_marker_and_stops_streaming() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "hi");
        frame(&mut state, connection_id, r#"{"type":"text","text":"Hello "}"#);

        let effects = reduce(&mut state, Action::Cancel).unwrap();

        let reply = last_assistant(&state);
        assert_eq!(reply.content, "Hello [Response cancelled]");
        assert!(!reply.is_streaming);
        assert_eq!(close_count(&effects), 1);

        let late = frame(&mut state, connection_id, r#"{"type":"text","text":"world"}"#);
        assert!(late.is_empty());
        assert_eq!(last_assistant(&state).content, "Hello [Response cancelled]");
    }

    #[test]
    fn cancel_without_stream_is_noop() {
        let mut state = test_state();
        assert!(reduce(&mut state, Action::Cancel).unwrap().is_empty());

        let (connection_id, _) = submit(&mut state, "hi");
        frame(&mut state, connection_id, "[DONE]");
        let before = state.messages.clone();

        assert!(reduce(&mut state, Action::Cancel).unwrap().is_empty());
        assert_eq!(state.messages, before);
    }

    #[test]
    fn error_frame_preserves_partial_content() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "hi");
        frame(&mut state, connection_id, r#"{"type":"text","text":"Partial "}"#);

        let effects = frame(
            &mut state,
            connection_id,
            r#"{"type":"error","message":"Budget service timed out"}"#,
        );

        assert_eq!(close_count(&effects), 1);
        assert_eq!(last_assistant(&state).content, "Partial ");
        assert!(!last_assistant(&state).is_streaming);
        let error = state.last_error.clone().unwrap();
        assert_eq!(error.kind, ErrorKind::Application);
        assert_eq!(error.message, "Budget service timed out");
        assert!(state.can_retry());
    }

    #[test]
    fn transport_failure_preserves_partial_content() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "hi");
        frame(&mut state, connection_id, "Some ");

        let effects = reduce(
            &mut state,
            Action::TransportFailed {
                connection_id,
                error: "connection reset".to_string(),
            },
        )
        .unwrap();

        assert_eq!(close_count(&effects), 1);
        assert_eq!(last_assistant(&state).content, "Some ");
        assert_eq!(
            state.last_error.as_ref().map(|e| e.kind),
            Some(ErrorKind::Transport)
        );
    }

    #[test]
    fn retry_resubmits_last_query_verbatim() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "Show pending invoices");
        reduce(
            &mut state,
            Action::TransportFailed {
                connection_id,
                error: "gone".to_string(),
            },
        )
        .unwrap();

        let retry_connection = ConnectionId::new();
        let effects = reduce(
            &mut state,
            Action::Retry {
                connection_id: retry_connection,
                user_message_id: MessageId::new(),
                assistant_message_id: MessageId::new(),
                timestamp: t0(),
            },
        )
        .unwrap();

        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::OpenStream { query, connection_id, .. }
                if query.as_str() == "Show pending invoices" && *connection_id == retry_connection
        )));
        assert_eq!(state.messages.len(), 4);
        assert_eq!(state.messages[2].content, "Show pending invoices");
        assert!(state.last_error.is_none());
    }

    #[test]
    fn retry_without_history_is_rejected() {
        let mut state = test_state();
        let result = reduce(
            &mut state,
            Action::Retry {
                connection_id: ConnectionId::new(),
                user_message_id: MessageId::new(),
                assistant_message_id: MessageId::new(),
                timestamp: t0(),
            },
        );
        assert!(matches!(
            result,
            Err(ReduceError::InvalidAction {
                kind: InvalidActionKind::NothingToRetry,
                ..
            })
        ));
    }

    #[test]
    fn pending_confirmation_keeps_stream_open() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "Approve INV-7");

        let effects = frame(&mut state, connection_id, &confirmation_frame("7"));

        let pending = state.pending_confirmation.clone().unwrap();
        assert_eq!(pending.confirmation_id.as_str(), "7");
        assert_eq!(pending.expires_at, t0() + Duration::seconds(300));
        assert_eq!(close_count(&effects), 0);
        assert!(state.is_streaming());

        frame(&mut state, connection_id, "Awaiting your approval.");
        assert_eq!(last_assistant(&state).content, "Awaiting your approval.");
    }

    #[test]
    fn confirming_appends_one_outcome_message() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "Approve INV-7");
        frame(&mut state, connection_id, &confirmation_frame("7"));
        frame(&mut state, connection_id, "[DONE]");
        let count = state.messages.len();

        for offset in [0, 60, 299] {
            let remaining = state
                .pending_confirmation
                .as_ref()
                .unwrap()
                .remaining(t0() + Duration::seconds(offset));
            assert!(remaining > std::time::Duration::ZERO);
        }

        let effects = reduce(
            &mut state,
            Action::ConfirmationDecided {
                confirmation_id: ConfirmationId::new("7"),
                decision: ConfirmationDecision::Confirmed,
                message_id: MessageId::new(),
                timestamp: t0() + Duration::seconds(30),
            },
        )
        .unwrap();

        assert!(state.pending_confirmation.is_none());
        assert_eq!(state.messages.len(), count + 1);
        let outcome = state.messages.last().unwrap();
        assert_eq!(outcome.role, Role::System);
        assert!(outcome.content.contains("confirmed and executed"));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::DeliverConfirmation { approved: true, .. }
        )));
    }

    #[test]
    fn rejecting_records_cancellation() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "Delete budget line");
        frame(&mut state, connection_id, &confirmation_frame("9"));

        let effects = reduce(
            &mut state,
            Action::ConfirmationDecided {
                confirmation_id: ConfirmationId::new("9"),
                decision: ConfirmationDecision::Rejected,
                message_id: MessageId::new(),
                timestamp: t0(),
            },
        )
        .unwrap();

        assert!(state.messages.last().unwrap().content.ends_with("cancelled"));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::DeliverConfirmation { approved: false, .. }
        )));
    }

    #[test]
    fn second_confirmation_replaces_first() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "hi");
        frame(&mut state, connection_id, &confirmation_frame("a"));

        let effects = frame_at(
            &mut state,
            connection_id,
            &confirmation_frame("b"),
            t0() + Duration::seconds(10),
        );

        let pending = state.pending_confirmation.clone().unwrap();
        assert_eq!(pending.confirmation_id.as_str(), "b");
        assert_eq!(pending.expires_at, t0() + Duration::seconds(310));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::EmitEvent {
                event: SessionEvent::ConfirmationRequested { replaced: Some(id), .. },
                ..
            } if id.as_str() == "a"
        )));
    }

    #[test]
    fn deciding_unknown_confirmation_is_rejected() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "hi");
        frame(&mut state, connection_id, &confirmation_frame("a"));

        let result = reduce(
            &mut state,
            Action::ConfirmationDecided {
                confirmation_id: ConfirmationId::new("zzz"),
                decision: ConfirmationDecision::Confirmed,
                message_id: MessageId::new(),
                timestamp: t0(),
            },
        );

        assert!(matches!(
            result,
            Err(ReduceError::InvalidAction {
                kind: InvalidActionKind::UnknownConfirmation,
                ..
            })
        ));
        assert!(state.pending_confirmation.is_some());
    }

    #[test]
    fn tick_expires_confirmation_as_rejection() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "hi");
        frame(&mut state, connection_id, &confirmation_frame("a"));
        let count = state.messages.len();

        let early = reduce(
            &mut state,
            Action::Tick {
                message_id: MessageId::new(),
                timestamp: t0() + Duration::seconds(299),
            },
        )
        .unwrap();
        assert!(matches!(
            early.as_slice(),
            [Effect::EmitEvent {
                event: SessionEvent::ConfirmationCountdown {
                    remaining_secs: 1,
                    ..
                },
                ..
            }]
        ));
        assert!(state.pending_confirmation.is_some());

        let effects = reduce(
            &mut state,
            Action::Tick {
                message_id: MessageId::new(),
                timestamp: t0() + Duration::seconds(300),
            },
        )
        .unwrap();

        assert!(state.pending_confirmation.is_none());
        assert_eq!(state.messages.len(), count + 1);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::EmitEvent {
                event: SessionEvent::ConfirmationResolved {
                    outcome: ConfirmationOutcome::Expired,
                    ..
                },
                ..
            }
        )));
        assert!(
            !effects
                .iter()
                .any(|e| matches!(e, Effect::DeliverConfirmation { .. }))
        );
        assert_eq!(
            state.last_error.as_ref().map(|e| e.kind),
            Some(ErrorKind::ConfirmationExpired)
        );
    }

    #[test]
    fn countdown_is_broadcast_once_per_second() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "hi");
        frame(&mut state, connection_id, &confirmation_frame("a"));

        let mut countdown = |offset_ms: i64| {
            let effects = reduce(
                &mut state,
                Action::Tick {
                    message_id: MessageId::new(),
                    timestamp: t0() + Duration::milliseconds(offset_ms),
                },
            )
            .unwrap();
            effects
                .iter()
                .filter_map(|e| match e {
                    Effect::EmitEvent {
                        event: SessionEvent::ConfirmationCountdown { remaining_secs, .. },
                        ..
                    } => Some(*remaining_secs),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };

        assert!(countdown(0).is_empty());
        assert!(countdown(400).is_empty());
        assert_eq!(countdown(1000), vec![299]);
        assert!(countdown(1500).is_empty());
        assert_eq!(countdown(61_000), vec![239]);
    }

    #[test]
    fn oversized_ttl_does_not_break_confirmation() {
        let mut state = SessionState::with_config(
            SessionId::new(),
            StreamingConfig {
                confirmation_ttl: Duration::seconds(9_000_000_000_000),
                ..StreamingConfig::default()
            },
        );
        let (connection_id, _) = submit(&mut state, "Approve INV-88");
        let effects = frame(&mut state, connection_id, &confirmation_frame("a"));

        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::EmitEvent {
                event: SessionEvent::ConfirmationRequested { .. },
                ..
            }
        )));
        let pending = state.pending_confirmation.as_ref().unwrap();
        assert_eq!(pending.remaining_secs(t0()), 300);
    }

    #[test]
    fn late_decision_counts_as_expired() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "hi");
        frame(&mut state, connection_id, &confirmation_frame("a"));

        let effects = reduce(
            &mut state,
            Action::ConfirmationDecided {
                confirmation_id: ConfirmationId::new("a"),
                decision: ConfirmationDecision::Confirmed,
                message_id: MessageId::new(),
                timestamp: t0() + Duration::seconds(301),
            },
        )
        .unwrap();

        assert!(state.messages.last().unwrap().content.contains("expired"));
        assert!(
            !effects
                .iter()
                .any(|e| matches!(e, Effect::DeliverConfirmation { .. }))
        );
    }

    #[test]
    fn truncation_notice_is_replaced_wholesale() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "List all expenses");

        frame(
            &mut state,
            connection_id,
            r#"{"metadata":{"truncated":true,"warning":"first","totalCount":500}}"#,
        );
        frame(
            &mut state,
            connection_id,
            r#"{"metadata":{"truncated":true,"warning":"second"}}"#,
        );

        assert_eq!(
            state.truncation,
            Some(TruncationNotice {
                message: "second".to_string(),
                approximate_total: None,
            })
        );
        assert!(last_assistant(&state).content.is_empty());
    }

    #[test]
    fn informational_frames_do_not_touch_transcript() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "hi");

        frame(&mut state, connection_id, r#"{"type":"pagination","hasMore":true}"#);
        frame(&mut state, connection_id, r#"{"type":"service_unavailable","message":"down"}"#);
        frame(&mut state, connection_id, r#"{"unknown":"shape"}"#);

        assert!(last_assistant(&state).content.is_empty());
        assert!(state.pagination.is_some());
        assert!(state.is_streaming());
    }

    #[test]
    fn directive_detected_only_after_completion() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "Show Q1 budget");

        let mid = frame(
            &mut state,
            connection_id,
            "Here you go: display:finance:budget_summary:quarter=Q1 and display:hr:org_chart:depth=1",
        );
        assert!(
            !mid.iter()
                .any(|e| matches!(e, Effect::ResolveDirective { .. }))
        );
        assert!(state.directive.is_none());

        let done = frame(&mut state, connection_id, "[DONE]");
        let resolves: Vec<_> = done
            .iter()
            .filter_map(|e| match e {
                Effect::ResolveDirective { directive, .. } => Some(directive),
                _ => None,
            })
            .collect();
        assert_eq!(resolves.len(), 1);
        assert_eq!(resolves[0].component, "budget_summary");
        assert!(matches!(state.directive, Some(DirectiveState::Resolving { .. })));
    }

    #[test]
    fn directive_resolution_outcomes() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "Show Q1 budget");
        frame(&mut state, connection_id, "display:finance:budget_summary:quarter=Q1");
        frame(&mut state, connection_id, "[DONE]");
        let Some(DirectiveState::Resolving {
            message_id,
            directive,
        }) = state.directive.clone()
        else {
            panic!("expected resolving directive");
        };

        let effects = reduce(
            &mut state,
            Action::DirectiveResolved {
                message_id: message_id.clone(),
                directive: directive.clone(),
                result: Err("render service returned 502".to_string()),
            },
        )
        .unwrap();

        assert!(matches!(state.directive, Some(DirectiveState::Failed { .. })));
        assert_eq!(
            last_assistant(&state).content,
            "display:finance:budget_summary:quarter=Q1"
        );
        assert!(!state.is_streaming());
        assert!(
            !effects
                .iter()
                .any(|e| matches!(e, Effect::OpenStream { .. }))
        );
        assert!(!state.can_retry());
    }

    #[test]
    fn directive_resolution_success_and_stale_results() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "Show Q1 budget");
        frame(&mut state, connection_id, "display:finance:budget_summary:quarter=Q1");
        frame(&mut state, connection_id, "[DONE]");
        let directive = state.directive.as_ref().unwrap().directive().clone();
        let message_id = state.directive.as_ref().unwrap().message_id().clone();

        let stale = reduce(
            &mut state,
            Action::DirectiveResolved {
                message_id: MessageId::new(),
                directive: directive.clone(),
                result: Ok(ComponentDescriptor(serde_json::json!({}))),
            },
        )
        .unwrap();
        assert!(stale.is_empty());

        reduce(
            &mut state,
            Action::DirectiveResolved {
                message_id,
                directive,
                result: Ok(ComponentDescriptor(serde_json::json!({"component": "BudgetSummary"}))),
            },
        )
        .unwrap();

        assert!(matches!(
            state.directive,
            Some(DirectiveState::Resolved { ref descriptor, .. })
                if descriptor.0["component"] == "BudgetSummary"
        ));
    }

    #[test]
    fn new_session_closes_live_connection_first() {
        let mut state = test_state();
        let previous = state.session_id;
        let (connection_id, _) = submit(&mut state, "hi");
        frame(&mut state, connection_id, "partial");

        let next = SessionId::new();
        let effects = reduce(&mut state, Action::NewSession { session_id: next }).unwrap();

        assert!(matches!(
            effects.first(),
            Some(Effect::CloseStream { connection_id: c, .. }) if *c == connection_id
        ));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::EmitEvent {
                event: SessionEvent::SessionReset { previous_session_id, .. },
                ..
            } if *previous_session_id == previous
        )));
        assert_eq!(state.session_id, next);
        assert!(state.messages.is_empty());
        assert!(!state.is_streaming());
        assert!(frame(&mut state, connection_id, "late").is_empty());
    }

    #[test]
    fn shutdown_closes_without_marker() {
        let mut state = test_state();
        let (connection_id, _) = submit(&mut state, "hi");
        frame(&mut state, connection_id, "partial");

        let effects = reduce(&mut state, Action::Shutdown).unwrap();

        assert_eq!(close_count(&effects), 1);
        assert_eq!(last_assistant(&state).content, "partial");
        assert!(reduce(&mut state, Action::Shutdown).unwrap().is_empty());
    }

    #[test]
    fn auth_required_records_error_without_messages() {
        let mut state = test_state();
        let effects = reduce(&mut state, Action::AuthenticationRequired).unwrap();

        assert!(state.messages.is_empty());
        assert_eq!(
            state.last_error.as_ref().map(|e| e.kind),
            Some(ErrorKind::AuthRequired)
        );
        assert!(effects.iter().all(Effect::is_emit_event));
    }

    #[test]
    fn frames_from_foreign_connection_are_ignored() {
        let mut state = test_state();
        let (_connection_id, _) = submit(&mut state, "hi");

        let effects = frame(&mut state, ConnectionId::new(), "intruder");
        assert!(effects.is_empty());
        assert!(last_assistant(&state).content.is_empty());

        let opened = reduce(
            &mut state,
            Action::StreamOpened {
                connection_id: ConnectionId::new(),
            },
        )
        .unwrap();
        assert!(opened.is_empty());
        assert!(!state.active_stream.as_ref().unwrap().opened);
    }
}
