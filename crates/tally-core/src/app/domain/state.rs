use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use strum::Display;

use crate::app::domain::confirmation::{DEFAULT_CONFIRMATION_TTL_SECS, PendingConfirmation};
use crate::app::domain::directive::{ComponentDescriptor, ComponentDirective};
use crate::app::domain::frame::{DEFAULT_COMPLETION_SENTINEL, InfoFrame};
use crate::app::domain::message::Message;
use crate::app::domain::types::{ConnectionId, MessageId, NonEmptyString, SessionId};

#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: SessionId,
    pub messages: Vec<Message>,

    pub active_stream: Option<ActiveStream>,

    pub pending_confirmation: Option<PendingConfirmation>,
    /// Seconds left on the pending confirmation as last broadcast.
    pub countdown_secs: Option<u64>,
    pub truncation: Option<TruncationNotice>,
    pub pagination: Option<InfoFrame>,
    pub directive: Option<DirectiveState>,
    pub last_error: Option<ErrorNotice>,

    /// The last submitted query, re-sent verbatim by retry.
    pub last_query: Option<NonEmptyString>,

    pub config: StreamingConfig,

    closed_connections: VecDeque<ConnectionId>,
}

/// The single live push connection and the reply it feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveStream {
    pub connection_id: ConnectionId,
    pub message_id: MessageId,
    pub opened: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationNotice {
    pub message: String,
    pub approximate_total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DirectiveState {
    Resolving {
        message_id: MessageId,
        directive: ComponentDirective,
    },
    Resolved {
        message_id: MessageId,
        directive: ComponentDirective,
        descriptor: ComponentDescriptor,
    },
    Failed {
        message_id: MessageId,
        directive: ComponentDirective,
        error: String,
    },
}

impl DirectiveState {
    pub fn directive(&self) -> &ComponentDirective {
        match self {
            DirectiveState::Resolving { directive, .. }
            | DirectiveState::Resolved { directive, .. }
            | DirectiveState::Failed { directive, .. } => directive,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        match self {
            DirectiveState::Resolving { message_id, .. }
            | DirectiveState::Resolved { message_id, .. }
            | DirectiveState::Failed { message_id, .. } => message_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    AuthRequired,
    Transport,
    Application,
    ConfirmationExpired,
    ConfirmationDelivery,
    DirectiveResolution,
}

impl ErrorKind {
    /// Whether re-submitting the last query is a sensible recovery.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transport | ErrorKind::Application)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct StreamingConfig {
    pub completion_sentinel: String,
    pub confirmation_ttl: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            completion_sentinel: DEFAULT_COMPLETION_SENTINEL.to_string(),
            confirmation_ttl: Duration::seconds(DEFAULT_CONFIRMATION_TTL_SECS),
        }
    }
}

const MAX_CLOSED_CONNECTIONS: usize = 32;

impl SessionState {
    pub fn new(session_id: SessionId) -> Self {
        Self::with_config(session_id, StreamingConfig::default())
    }

    pub fn with_config(session_id: SessionId, config: StreamingConfig) -> Self {
        Self {
            session_id,
            messages: Vec::new(),
            active_stream: None,
            pending_confirmation: None,
            countdown_secs: None,
            truncation: None,
            pagination: None,
            directive: None,
            last_error: None,
            last_query: None,
            config,
            closed_connections: VecDeque::new(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.active_stream.is_some()
    }

    pub fn can_retry(&self) -> bool {
        !self.is_streaming()
            && self.last_query.is_some()
            && self
                .last_error
                .as_ref()
                .is_some_and(|notice| notice.kind.is_retryable())
    }

    /// True when `connection_id` is the live connection. Callbacks from any
    /// other connection are stale and must not touch the state.
    pub fn is_active_connection(&self, connection_id: ConnectionId) -> bool {
        self.active_stream
            .as_ref()
            .is_some_and(|stream| stream.connection_id == connection_id)
    }

    pub fn was_closed(&self, connection_id: ConnectionId) -> bool {
        self.closed_connections.contains(&connection_id)
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().rev().find(|m| &m.id == id)
    }

    pub fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|m| &m.id == id)
    }

    /// The assistant message currently receiving deltas.
    pub fn streaming_message(&self) -> Option<&Message> {
        let stream = self.active_stream.as_ref()?;
        self.message(&stream.message_id)
    }

    /// Ends the active stream and marks its message finished. Returns the
    /// connection that was live, if any.
    pub fn finish_stream(&mut self) -> Option<ActiveStream> {
        let stream = self.active_stream.take()?;
        if let Some(message) = self.message_mut(&stream.message_id) {
            message.is_streaming = false;
        }
        self.closed_connections.push_back(stream.connection_id);
        if self.closed_connections.len() > MAX_CLOSED_CONNECTIONS {
            self.closed_connections.pop_front();
        }
        Some(stream)
    }

    /// Clears the notices that belong to a single reply.
    pub fn clear_reply_notices(&mut self) {
        self.truncation = None;
        self.pagination = None;
        self.directive = None;
        self.last_error = None;
    }

    /// Checks that at most one message is streaming and that it is the most
    /// recent assistant message.
    pub fn streaming_invariant_holds(&self) -> bool {
        let streaming: Vec<_> = self.messages.iter().filter(|m| m.is_streaming).collect();
        match streaming.as_slice() {
            [] => self.active_stream.is_none(),
            [message] => {
                let last_assistant = self.messages.iter().rev().find(|m| m.is_assistant());
                last_assistant.is_some_and(|last| last.id == message.id)
                    && self
                        .active_stream
                        .as_ref()
                        .is_some_and(|s| s.message_id == message.id)
            }
            _ => false,
        }
    }
}
