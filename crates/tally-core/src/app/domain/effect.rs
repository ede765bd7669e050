use crate::app::domain::directive::ComponentDirective;
use crate::app::domain::types::{ConfirmationId, ConnectionId, MessageId, NonEmptyString, SessionId};

use super::event::SessionEvent;

#[derive(Debug, Clone)]
pub enum Effect {
    EmitEvent {
        session_id: SessionId,
        event: SessionEvent,
    },

    OpenStream {
        session_id: SessionId,
        connection_id: ConnectionId,
        query: NonEmptyString,
    },

    CloseStream {
        session_id: SessionId,
        connection_id: ConnectionId,
    },

    ResolveDirective {
        session_id: SessionId,
        message_id: MessageId,
        directive: ComponentDirective,
    },

    DeliverConfirmation {
        session_id: SessionId,
        confirmation_id: ConfirmationId,
        approved: bool,
    },
}

impl Effect {
    pub fn session_id(&self) -> SessionId {
        match self {
            Effect::EmitEvent { session_id, .. }
            | Effect::OpenStream { session_id, .. }
            | Effect::CloseStream { session_id, .. }
            | Effect::ResolveDirective { session_id, .. }
            | Effect::DeliverConfirmation { session_id, .. } => *session_id,
        }
    }

    pub fn is_emit_event(&self) -> bool {
        matches!(self, Effect::EmitEvent { .. })
    }

    pub fn into_event(self) -> Option<SessionEvent> {
        match self {
            Effect::EmitEvent { event, .. } => Some(event),
            _ => None,
        }
    }
}
