pub mod error;
pub mod render;
pub mod sse;
pub mod stream;

pub use error::{ApiError, SseParseError};
pub use render::{AssistantApi, HttpApiClient};
pub use sse::{SseEvent, SseStream, parse_sse_stream};
pub use stream::{
    HttpStreamTransport, StreamClient, StreamHandle, StreamRequest, StreamTransport,
    TransportEvent,
};
