//! The push connection that carries a reply.
//!
//! [`StreamClient`] owns at most one live connection. Each connection runs in
//! its own task and reports back through [`TransportEvent`]s tagged with the
//! connection id, so the session can recognize callbacks that arrive after the
//! connection was closed.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::api::error::ApiError;
use crate::api::sse::{SseStream, parse_sse_stream};
use crate::app::domain::types::{ConnectionId, NonEmptyString, SessionId};
use crate::auth::Credential;
use crate::config::{ClientConfig, CredentialPlacement};

/// Everything needed to open one stream.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub session_id: SessionId,
    pub query: NonEmptyString,
    pub credential: Credential,
}

#[derive(Debug)]
pub enum TransportEvent {
    Opened {
        connection_id: ConnectionId,
    },
    Frame {
        connection_id: ConnectionId,
        data: String,
    },
    Failed {
        connection_id: ConnectionId,
        error: ApiError,
    },
}

impl TransportEvent {
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            TransportEvent::Opened { connection_id }
            | TransportEvent::Frame { connection_id, .. }
            | TransportEvent::Failed { connection_id, .. } => *connection_id,
        }
    }
}

#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Opens the push connection and returns its raw frames.
    async fn connect(&self, request: StreamRequest) -> Result<SseStream, ApiError>;
}

/// Server-sent events over HTTP.
#[derive(Clone)]
pub struct HttpStreamTransport {
    http_client: reqwest::Client,
    config: Arc<ClientConfig>,
}

impl HttpStreamTransport {
    pub fn new(config: Arc<ClientConfig>) -> Result<Self, ApiError> {
        // No overall timeout: the connection stays open for the whole reply.
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            http_client,
            config,
        })
    }

    /// The stream URL for `request`. Contains the credential when the
    /// configured placement is [`CredentialPlacement::Query`]; never log it.
    pub fn request_url(&self, request: &StreamRequest) -> Url {
        let mut url = self.config.stream_url();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", request.query.as_str());
            pairs.append_pair("sessionId", &request.session_id.to_string());
            if self.config.credential_placement == CredentialPlacement::Query {
                pairs.append_pair("token", request.credential.expose());
            }
        }
        url
    }
}

#[async_trait]
impl StreamTransport for HttpStreamTransport {
    async fn connect(&self, request: StreamRequest) -> Result<SseStream, ApiError> {
        let url = self.request_url(&request);
        let mut request_builder = self
            .http_client
            .get(url)
            .header(ACCEPT, "text/event-stream");

        if self.config.credential_placement == CredentialPlacement::Header {
            request_builder = request_builder.bearer_auth(request.credential.expose());
        }

        let response = request_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::Network(e.without_url())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, error_text));
        }

        Ok(parse_sse_stream(response.bytes_stream()))
    }
}

/// A handle to one connection. Clones share the closed flag.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    connection_id: ConnectionId,
    token: CancellationToken,
    closed: Arc<AtomicBool>,
}

impl StreamHandle {
    fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            token: CancellationToken::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Closes the connection. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

pub struct StreamClient {
    transport: Arc<dyn StreamTransport>,
    events_tx: mpsc::Sender<TransportEvent>,
    completion_sentinel: String,
    current: Option<StreamHandle>,
}

impl StreamClient {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        events_tx: mpsc::Sender<TransportEvent>,
        completion_sentinel: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            events_tx,
            completion_sentinel: completion_sentinel.into(),
            current: None,
        }
    }

    /// Opens a connection for `request`. Fails if another connection is still
    /// open; it has to be closed first.
    pub fn open(
        &mut self,
        connection_id: ConnectionId,
        request: StreamRequest,
    ) -> Result<StreamHandle, ApiError> {
        if let Some(current) = &self.current
            && !current.is_closed()
        {
            return Err(ApiError::StreamAlreadyOpen);
        }

        let handle = StreamHandle::new(connection_id);
        tracing::debug!(
            session_id = %request.session_id,
            connection_id = %connection_id,
            "Opening stream"
        );

        tokio::spawn(pump(
            self.transport.clone(),
            request,
            handle.clone(),
            self.completion_sentinel.clone(),
            self.events_tx.clone(),
        ));

        self.current = Some(handle.clone());
        Ok(handle)
    }

    /// Closes `connection_id` if it is the current connection. Returns `true`
    /// only for the call that actually closed it.
    pub fn close(&mut self, connection_id: ConnectionId) -> bool {
        let Some(handle) = self
            .current
            .take_if(|handle| handle.connection_id == connection_id)
        else {
            return false;
        };
        let closed = handle.close();
        if closed {
            tracing::debug!(connection_id = %connection_id, "Stream closed");
        }
        closed
    }

    /// Closes whatever connection is open.
    pub fn close_active(&mut self) -> Option<ConnectionId> {
        let handle = self.current.take()?;
        handle.close().then_some(handle.connection_id)
    }

    pub fn is_open(&self) -> bool {
        self.current.as_ref().is_some_and(|h| !h.is_closed())
    }

    pub fn active_connection(&self) -> Option<ConnectionId> {
        self.current
            .as_ref()
            .filter(|h| !h.is_closed())
            .map(StreamHandle::connection_id)
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.close_active();
    }
}

async fn pump(
    transport: Arc<dyn StreamTransport>,
    request: StreamRequest,
    handle: StreamHandle,
    completion_sentinel: String,
    events_tx: mpsc::Sender<TransportEvent>,
) {
    let connection_id = handle.connection_id;
    let token = handle.token.clone();

    let connected = tokio::select! {
        biased;
        () = token.cancelled() => {
            tracing::debug!(connection_id = %connection_id, "Stream closed before it opened");
            return;
        }
        result = transport.connect(request) => result,
    };

    let mut frames = match connected {
        Ok(frames) => frames,
        Err(error) => {
            if !handle.is_closed() {
                tracing::warn!(connection_id = %connection_id, error = %error, "Failed to open stream");
                let _ = events_tx
                    .send(TransportEvent::Failed {
                        connection_id,
                        error,
                    })
                    .await;
            }
            return;
        }
    };

    if events_tx
        .send(TransportEvent::Opened { connection_id })
        .await
        .is_err()
    {
        return;
    }

    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => {
                tracing::debug!(connection_id = %connection_id, "Stream task stopping after close");
                return;
            }
            next = frames.next() => next,
        };

        if handle.is_closed() {
            return;
        }

        let event = match next {
            Some(Ok(event)) => TransportEvent::Frame {
                connection_id,
                data: event.data,
            },
            Some(Err(error)) => TransportEvent::Failed {
                connection_id,
                error,
            },
            None => TransportEvent::Failed {
                connection_id,
                error: ApiError::PrematureEnd,
            },
        };

        let finished = match &event {
            TransportEvent::Frame { data, .. } => data.trim() == completion_sentinel,
            _ => true,
        };

        if events_tx.send(event).await.is_err() || finished {
            return;
        }
    }
}
