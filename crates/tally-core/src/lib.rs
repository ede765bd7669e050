// Core session engine for the Tally assistant, without any terminal UI

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod utils;

pub use app::{
    Message, Role, SessionError, SessionEvent, SessionHandle, SessionRuntime,
    SessionRuntimeConfig, SessionState,
};
pub use error::{Error, Result};
