use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::api::{
    ApiError, AssistantApi, HttpApiClient, HttpStreamTransport, StreamClient, StreamRequest,
    StreamTransport, TransportEvent,
};
use crate::app::domain::action::Action;
use crate::app::domain::confirmation::ConfirmationDecision;
use crate::app::domain::effect::Effect;
use crate::app::domain::event::SessionEvent;
use crate::app::domain::reduce::{InvalidActionKind, ReduceError, reduce};
use crate::app::domain::state::{SessionState, StreamingConfig};
use crate::app::domain::types::{
    ConfirmationId, ConnectionId, MessageId, NonEmptyString, SessionId,
};
use crate::auth::{Credential, CredentialProvider};
use crate::config::ClientConfig;

const EVENT_BROADCAST_CAPACITY: usize = 256;
const TRANSPORT_CHANNEL_CAPACITY: usize = 256;
const INTERNAL_ACTION_CAPACITY: usize = 64;
const COMMAND_CHANNEL_CAPACITY: usize = 32;
const MIN_EXPIRY_TICK: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct SessionRuntimeConfig {
    pub streaming: StreamingConfig,
    /// How often a pending confirmation is checked for expiry.
    pub expiry_tick: Duration,
}

impl Default for SessionRuntimeConfig {
    fn default() -> Self {
        Self {
            streaming: StreamingConfig::default(),
            expiry_tick: Duration::from_secs(1),
        }
    }
}

impl From<&ClientConfig> for SessionRuntimeConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            streaming: config.streaming_config(),
            expiry_tick: config.expiry_tick(),
        }
    }
}

pub(crate) enum SessionCmd {
    Submit {
        query: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Retry {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Cancel {
        reply: oneshot::Sender<()>,
    },
    Decide {
        confirmation_id: Option<ConfirmationId>,
        decision: ConfirmationDecision,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    NewSession {
        reply: oneshot::Sender<SessionId>,
    },
    Subscribe {
        reply: oneshot::Sender<broadcast::Receiver<SessionEvent>>,
    },
    GetState {
        reply: oneshot::Sender<SessionState>,
    },
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Authentication required: sign in and try again")]
    AuthRequired,

    #[error("Query must not be empty")]
    EmptyQuery,

    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        kind: InvalidActionKind,
    },

    #[error("Session shutting down")]
    ShuttingDown,

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<ReduceError> for SessionError {
    fn from(err: ReduceError) -> Self {
        match err {
            ReduceError::InvalidAction { message, kind } => {
                SessionError::InvalidInput { message, kind }
            }
        }
    }
}

/// Cheap, cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCmd>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCmd,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SessionError::ShuttingDown)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Submits a query. Rejected while a reply is streaming.
    pub async fn submit(&self, query: impl Into<String>) -> Result<(), SessionError> {
        let query = query.into();
        self.request(|reply| SessionCmd::Submit { query, reply })
            .await?
    }

    /// Re-submits the last query verbatim.
    pub async fn retry(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCmd::Retry { reply }).await?
    }

    /// Cancels the in-flight reply. A no-op when nothing is streaming.
    pub async fn cancel(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCmd::Cancel { reply }).await
    }

    /// Resolves the pending confirmation, or the one named by `confirmation_id`.
    pub async fn decide(
        &self,
        confirmation_id: Option<ConfirmationId>,
        decision: ConfirmationDecision,
    ) -> Result<(), SessionError> {
        self.request(|reply| SessionCmd::Decide {
            confirmation_id,
            decision,
            reply,
        })
        .await?
    }

    pub async fn confirm(&self) -> Result<(), SessionError> {
        self.decide(None, ConfirmationDecision::Confirmed).await
    }

    pub async fn reject(&self) -> Result<(), SessionError> {
        self.decide(None, ConfirmationDecision::Rejected).await
    }

    /// Closes any live connection and starts over with a fresh session id.
    pub async fn new_session(&self) -> Result<SessionId, SessionError> {
        self.request(|reply| SessionCmd::NewSession { reply }).await
    }

    pub async fn subscribe(&self) -> Result<broadcast::Receiver<SessionEvent>, SessionError> {
        self.request(|reply| SessionCmd::Subscribe { reply }).await
    }

    pub async fn get_state(&self) -> Result<SessionState, SessionError> {
        self.request(|reply| SessionCmd::GetState { reply }).await
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.try_send(SessionCmd::Shutdown);
    }
}

pub struct SessionRuntime;

impl SessionRuntime {
    /// Starts a session actor on the current tokio runtime.
    pub fn spawn(
        config: SessionRuntimeConfig,
        transport: Arc<dyn StreamTransport>,
        api: Arc<dyn AssistantApi>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let actor = SessionActor::new(SessionId::new(), config, transport, api, credentials);

        tokio::spawn(actor.run(cmd_rx));

        SessionHandle { cmd_tx }
    }

    /// Starts a session that talks HTTP to the configured service.
    pub fn spawn_http(
        config: Arc<ClientConfig>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<SessionHandle, ApiError> {
        let transport = Arc::new(HttpStreamTransport::new(config.clone())?);
        let api = Arc::new(HttpApiClient::new(config.clone())?);
        Ok(Self::spawn(
            SessionRuntimeConfig::from(config.as_ref()),
            transport,
            api,
            credentials,
        ))
    }
}

struct SessionActor {
    state: SessionState,
    stream_client: StreamClient,
    transport_rx: mpsc::Receiver<TransportEvent>,
    api: Arc<dyn AssistantApi>,
    credentials: Arc<dyn CredentialProvider>,
    /// Credential fetched for the submission currently being reduced.
    staged_credential: Option<Credential>,
    event_broadcast: broadcast::Sender<SessionEvent>,
    internal_action_tx: mpsc::Sender<Action>,
    internal_action_rx: mpsc::Receiver<Action>,
    expiry_tick: Duration,
}

impl SessionActor {
    fn new(
        session_id: SessionId,
        config: SessionRuntimeConfig,
        transport: Arc<dyn StreamTransport>,
        api: Arc<dyn AssistantApi>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let (event_broadcast, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        let (transport_tx, transport_rx) = mpsc::channel(TRANSPORT_CHANNEL_CAPACITY);
        let (internal_action_tx, internal_action_rx) = mpsc::channel(INTERNAL_ACTION_CAPACITY);
        let stream_client = StreamClient::new(
            transport,
            transport_tx,
            config.streaming.completion_sentinel.clone(),
        );

        Self {
            state: SessionState::with_config(session_id, config.streaming),
            stream_client,
            transport_rx,
            api,
            credentials,
            staged_credential: None,
            event_broadcast,
            internal_action_tx,
            internal_action_rx,
            expiry_tick: config.expiry_tick.max(MIN_EXPIRY_TICK),
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<SessionCmd>) {
        let mut expiry_ticker = tokio::time::interval(self.expiry_tick);
        expiry_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(session_id = %self.state.session_id, "Session actor started");

        loop {
            let awaiting_confirmation = self.state.pending_confirmation.is_some();

            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SessionCmd::Shutdown) | None => {
                            self.shutdown();
                            break;
                        }
                        Some(cmd) => self.handle_cmd(cmd).await,
                    }
                }

                Some(event) = self.transport_rx.recv() => {
                    self.handle_transport_event(event);
                }

                Some(action) = self.internal_action_rx.recv() => {
                    if let Err(e) = self.dispatch(action) {
                        tracing::error!(
                            session_id = %self.state.session_id,
                            error = %e,
                            "Failed to handle internal action"
                        );
                    }
                }

                _ = expiry_ticker.tick(), if awaiting_confirmation => {
                    let tick = Action::Tick {
                        message_id: MessageId::new(),
                        timestamp: Utc::now(),
                    };
                    if let Err(e) = self.dispatch(tick) {
                        tracing::error!(error = %e, "Failed to handle expiry tick");
                    }
                }
            }
        }

        tracing::debug!(session_id = %self.state.session_id, "Session actor stopped");
    }

    async fn handle_cmd(&mut self, cmd: SessionCmd) {
        match cmd {
            SessionCmd::Submit { query, reply } => {
                let result = match NonEmptyString::new(&query) {
                    Some(query) => self.submit(Some(query)).await,
                    None => Err(SessionError::EmptyQuery),
                };
                let _ = reply.send(result);
            }
            SessionCmd::Retry { reply } => {
                let result = self.submit(None).await;
                let _ = reply.send(result);
            }
            SessionCmd::Cancel { reply } => {
                if let Err(e) = self.dispatch(Action::Cancel) {
                    tracing::error!(error = %e, "Failed to cancel stream");
                }
                let _ = reply.send(());
            }
            SessionCmd::Decide {
                confirmation_id,
                decision,
                reply,
            } => {
                let _ = reply.send(self.decide(confirmation_id, decision));
            }
            SessionCmd::NewSession { reply } => {
                let session_id = SessionId::new();
                if let Err(e) = self.dispatch(Action::NewSession { session_id }) {
                    tracing::error!(error = %e, "Failed to reset session");
                }
                let _ = reply.send(self.state.session_id);
            }
            SessionCmd::Subscribe { reply } => {
                let _ = reply.send(self.event_broadcast.subscribe());
            }
            SessionCmd::GetState { reply } => {
                let _ = reply.send(self.state.clone());
            }
            SessionCmd::Shutdown => {}
        }
    }

    /// Submits `query`, or re-submits the last query when `None`.
    async fn submit(&mut self, query: Option<NonEmptyString>) -> Result<(), SessionError> {
        let has_query = query.is_some() || self.state.last_query.is_some();
        if has_query && !self.state.is_streaming() {
            let Some(credential) = self.credentials.token().await else {
                tracing::info!(session_id = %self.state.session_id, "No credential available");
                self.dispatch(Action::AuthenticationRequired)?;
                return Err(SessionError::AuthRequired);
            };
            self.staged_credential = Some(credential);
        }

        let connection_id = ConnectionId::new();
        let user_message_id = MessageId::new();
        let assistant_message_id = MessageId::new();
        let timestamp = Utc::now();
        let action = match query {
            Some(query) => Action::Submit {
                query,
                connection_id,
                user_message_id,
                assistant_message_id,
                timestamp,
            },
            None => Action::Retry {
                connection_id,
                user_message_id,
                assistant_message_id,
                timestamp,
            },
        };

        let result = self.dispatch(action);
        self.staged_credential = None;
        result
    }

    fn decide(
        &mut self,
        confirmation_id: Option<ConfirmationId>,
        decision: ConfirmationDecision,
    ) -> Result<(), SessionError> {
        let confirmation_id = confirmation_id
            .or_else(|| {
                self.state
                    .pending_confirmation
                    .as_ref()
                    .map(|p| p.confirmation_id.clone())
            })
            .ok_or_else(|| SessionError::InvalidInput {
                message: "No confirmation is pending".to_string(),
                kind: InvalidActionKind::UnknownConfirmation,
            })?;

        self.dispatch(Action::ConfirmationDecided {
            confirmation_id,
            decision,
            message_id: MessageId::new(),
            timestamp: Utc::now(),
        })
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        let action = match event {
            TransportEvent::Opened { connection_id } => Action::StreamOpened { connection_id },
            TransportEvent::Frame {
                connection_id,
                data,
            } => Action::FrameReceived {
                connection_id,
                data,
                timestamp: Utc::now(),
            },
            TransportEvent::Failed {
                connection_id,
                error,
            } => Action::TransportFailed {
                connection_id,
                error: error.to_string(),
            },
        };

        if let Err(e) = self.dispatch(action) {
            tracing::error!(
                session_id = %self.state.session_id,
                error = %e,
                "Failed to handle transport event"
            );
        }
    }

    fn dispatch(&mut self, action: Action) -> Result<(), SessionError> {
        let effects = reduce(&mut self.state, action)?;
        for effect in effects {
            self.handle_effect(effect);
        }
        Ok(())
    }

    fn handle_effect(&mut self, effect: Effect) {
        match effect {
            Effect::EmitEvent { event, .. } => {
                let _ = self.event_broadcast.send(event);
            }

            Effect::OpenStream {
                session_id,
                connection_id,
                query,
            } => {
                let Some(credential) = self.staged_credential.take() else {
                    tracing::error!(
                        session_id = %session_id,
                        connection_id = %connection_id,
                        "Stream requested without a credential"
                    );
                    self.fail_connection(connection_id, SessionError::AuthRequired.to_string());
                    return;
                };

                let request = StreamRequest {
                    session_id,
                    query,
                    credential,
                };
                if let Err(e) = self.stream_client.open(connection_id, request) {
                    self.fail_connection(connection_id, e.to_string());
                }
            }

            Effect::CloseStream { connection_id, .. } => {
                self.stream_client.close(connection_id);
            }

            Effect::ResolveDirective {
                message_id,
                directive,
                ..
            } => {
                let api = self.api.clone();
                let credentials = self.credentials.clone();
                let action_tx = self.internal_action_tx.clone();

                tokio::spawn(async move {
                    let result = match credentials.token().await {
                        Some(credential) => api
                            .resolve_directive(&directive, &credential)
                            .await
                            .map_err(|e| e.to_string()),
                        None => Err(SessionError::AuthRequired.to_string()),
                    };
                    let _ = action_tx
                        .send(Action::DirectiveResolved {
                            message_id,
                            directive,
                            result,
                        })
                        .await;
                });
            }

            Effect::DeliverConfirmation {
                confirmation_id,
                approved,
                ..
            } => {
                let api = self.api.clone();
                let credentials = self.credentials.clone();
                let action_tx = self.internal_action_tx.clone();

                tokio::spawn(async move {
                    let result = match credentials.token().await {
                        Some(credential) => api
                            .deliver_confirmation(&confirmation_id, approved, &credential)
                            .await
                            .map_err(|e| e.to_string()),
                        None => Err(SessionError::AuthRequired.to_string()),
                    };
                    if let Err(error) = result {
                        let _ = action_tx
                            .send(Action::ConfirmationDeliveryFailed {
                                confirmation_id,
                                error,
                            })
                            .await;
                    }
                });
            }
        }
    }

    fn fail_connection(&mut self, connection_id: ConnectionId, error: String) {
        if let Err(e) = self.dispatch(Action::TransportFailed {
            connection_id,
            error,
        }) {
            tracing::error!(error = %e, "Failed to record stream failure");
        }
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.dispatch(Action::Shutdown) {
            tracing::error!(error = %e, "Failed to shut down session");
        }
        self.stream_client.close_active();
    }
}
