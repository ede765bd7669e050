pub mod domain;

pub use domain::runtime::{SessionError, SessionHandle, SessionRuntime, SessionRuntimeConfig};
pub use domain::{Message, Role, SessionEvent, SessionState};
