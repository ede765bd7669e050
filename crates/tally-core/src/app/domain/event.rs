use serde::{Deserialize, Serialize};

use crate::app::domain::confirmation::{ConfirmationOutcome, PendingConfirmation};
use crate::app::domain::directive::{ComponentDescriptor, ComponentDirective};
use crate::app::domain::frame::InfoFrame;
use crate::app::domain::message::Message;
use crate::app::domain::state::{ErrorKind, TruncationNotice};
use crate::app::domain::types::{ConfirmationId, ConnectionId, MessageId, SessionId};

/// Observable changes to a session, broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    MessageAdded {
        message: Message,
    },

    MessageDelta {
        message_id: MessageId,
        delta: String,
    },

    StreamOpened {
        connection_id: ConnectionId,
    },

    StreamCompleted {
        message_id: MessageId,
    },

    StreamCancelled {
        message_id: MessageId,
        content: String,
    },

    StreamFailed {
        message_id: MessageId,
        kind: ErrorKind,
        message: String,
    },

    Error {
        kind: ErrorKind,
        message: String,
    },

    ConfirmationRequested {
        confirmation: PendingConfirmation,
        /// Set when this request replaced one that was still outstanding.
        replaced: Option<ConfirmationId>,
    },

    /// Emitted when the whole-second countdown of the pending confirmation
    /// changes.
    ConfirmationCountdown {
        confirmation_id: ConfirmationId,
        remaining_secs: u64,
    },

    ConfirmationResolved {
        confirmation_id: ConfirmationId,
        outcome: ConfirmationOutcome,
    },

    TruncationNotice {
        notice: TruncationNotice,
    },

    PaginationNotice {
        info: InfoFrame,
    },

    ServiceUnavailable {
        info: InfoFrame,
    },

    DirectiveDetected {
        message_id: MessageId,
        directive: ComponentDirective,
    },

    DirectiveResolved {
        message_id: MessageId,
        directive: ComponentDirective,
        descriptor: ComponentDescriptor,
    },

    DirectiveFailed {
        message_id: MessageId,
        directive: ComponentDirective,
        error: String,
    },

    SessionReset {
        previous_session_id: SessionId,
        session_id: SessionId,
    },
}

impl SessionEvent {
    /// Events after which no further stream output is expected for a reply.
    pub fn ends_stream(&self) -> bool {
        matches!(
            self,
            SessionEvent::StreamCompleted { .. }
                | SessionEvent::StreamCancelled { .. }
                | SessionEvent::StreamFailed { .. }
        )
    }
}
