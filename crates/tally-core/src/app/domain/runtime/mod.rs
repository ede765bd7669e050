mod session_actor;

pub use session_actor::{SessionError, SessionHandle, SessionRuntime, SessionRuntimeConfig};
