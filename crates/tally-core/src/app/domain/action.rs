use crate::app::domain::confirmation::ConfirmationDecision;
use crate::app::domain::directive::{ComponentDescriptor, ComponentDirective};
use crate::app::domain::types::{
    ConfirmationId, ConnectionId, MessageId, NonEmptyString, SessionId, Timestamp,
};

#[derive(Debug, Clone)]
pub enum Action {
    Submit {
        query: NonEmptyString,
        connection_id: ConnectionId,
        user_message_id: MessageId,
        assistant_message_id: MessageId,
        timestamp: Timestamp,
    },

    /// Re-submits the last query verbatim.
    Retry {
        connection_id: ConnectionId,
        user_message_id: MessageId,
        assistant_message_id: MessageId,
        timestamp: Timestamp,
    },

    /// A submit was attempted with no credential available.
    AuthenticationRequired,

    StreamOpened {
        connection_id: ConnectionId,
    },

    FrameReceived {
        connection_id: ConnectionId,
        data: String,
        timestamp: Timestamp,
    },

    TransportFailed {
        connection_id: ConnectionId,
        error: String,
    },

    Cancel,

    ConfirmationDecided {
        confirmation_id: ConfirmationId,
        decision: ConfirmationDecision,
        message_id: MessageId,
        timestamp: Timestamp,
    },

    ConfirmationDeliveryFailed {
        confirmation_id: ConfirmationId,
        error: String,
    },

    /// Periodic clock signal used to expire pending confirmations.
    Tick {
        message_id: MessageId,
        timestamp: Timestamp,
    },

    DirectiveResolved {
        message_id: MessageId,
        directive: ComponentDirective,
        result: Result<ComponentDescriptor, String>,
    },

    NewSession {
        session_id: SessionId,
    },

    Shutdown,
}
