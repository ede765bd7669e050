pub mod action;
pub mod confirmation;
pub mod directive;
pub mod effect;
pub mod event;
pub mod frame;
pub mod message;
pub mod reduce;
pub mod runtime;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;

pub use action::Action;
pub use confirmation::{ConfirmationDecision, ConfirmationOutcome, PendingConfirmation};
pub use directive::{ComponentDescriptor, ComponentDirective};
pub use effect::Effect;
pub use event::SessionEvent;
pub use frame::{DecodedFrame, StreamFrame, decode_frame};
pub use message::{CANCELLED_MARKER, Message, Role};
pub use reduce::{InvalidActionKind, ReduceError, reduce};
pub use state::{
    ActiveStream, DirectiveState, ErrorKind, ErrorNotice, SessionState, StreamingConfig,
    TruncationNotice,
};
pub use types::{
    ConfirmationId, ConnectionId, MessageId, NonEmptyString, SessionId, Timestamp,
};
