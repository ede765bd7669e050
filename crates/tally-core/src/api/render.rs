use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::app::domain::directive::{ComponentDescriptor, ComponentDirective};
use crate::app::domain::types::ConfirmationId;
use crate::auth::Credential;
use crate::config::ClientConfig;

/// Header-authenticated calls made outside the push connection.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Fetches the render descriptor for a directive.
    async fn resolve_directive(
        &self,
        directive: &ComponentDirective,
        credential: &Credential,
    ) -> Result<ComponentDescriptor, ApiError>;

    /// Tells the server whether a held action was approved.
    async fn deliver_confirmation(
        &self,
        confirmation_id: &ConfirmationId,
        approved: bool,
        credential: &Credential,
    ) -> Result<(), ApiError>;
}

#[derive(Serialize)]
struct RenderRequest<'a> {
    directive: &'a str,
}

#[derive(Serialize)]
struct ConfirmationRequestBody {
    approved: bool,
}

#[derive(Clone)]
pub struct HttpApiClient {
    http_client: reqwest::Client,
    config: Arc<ClientConfig>,
}

impl HttpApiClient {
    pub fn new(config: Arc<ClientConfig>) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http_client,
            config,
        })
    }
}

fn map_send_error(error: reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Network(error)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response.text().await.unwrap_or_default();
    Err(ApiError::from_status(status, error_text))
}

#[async_trait]
impl AssistantApi for HttpApiClient {
    async fn resolve_directive(
        &self,
        directive: &ComponentDirective,
        credential: &Credential,
    ) -> Result<ComponentDescriptor, ApiError> {
        tracing::debug!(directive = %directive, "Resolving directive");

        let response = self
            .http_client
            .post(self.config.render_url())
            .bearer_auth(credential.expose())
            .json(&RenderRequest {
                directive: &directive.raw,
            })
            .send()
            .await
            .map_err(map_send_error)?;

        let response = check_status(response).await?;
        let descriptor = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ApiError::ResponseParsingError {
                details: e.to_string(),
            })?;

        Ok(ComponentDescriptor(descriptor))
    }

    async fn deliver_confirmation(
        &self,
        confirmation_id: &ConfirmationId,
        approved: bool,
        credential: &Credential,
    ) -> Result<(), ApiError> {
        tracing::debug!(
            confirmation_id = %confirmation_id,
            approved,
            "Delivering confirmation decision"
        );

        let response = self
            .http_client
            .post(self.config.confirm_url(confirmation_id.as_str()))
            .bearer_auth(credential.expose())
            .json(&ConfirmationRequestBody { approved })
            .send()
            .await
            .map_err(map_send_error)?;

        check_status(response).await?;
        Ok(())
    }
}
