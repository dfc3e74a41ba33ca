//! REST collaborators over reqwest.

use crate::client::config::ClientConfig;
use crate::client::retry::{parse_retry_after, Failure, RetryConfig, RetryDecision, RetryState};
use crate::client::utils::api_url;
use crate::error::{ChatError, Result};
use crate::traits::ChatApi;
use crate::types::{Conversation, DeleteScope, Message, UserId, UserSummary};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// The REST API client, authenticated with a bearer token.
#[derive(Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    config: Arc<ClientConfig>,
    token: Arc<str>,
}

impl HttpChatApi {
    pub fn new(config: ClientConfig, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ChatError::Config(e.to_string()))?;
        Ok(Self::with_client(client, config, token))
    }

    pub fn with_client(client: reqwest::Client, config: ClientConfig, token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self {
            client,
            config: Arc::new(config),
            token: Arc::from(token),
        }
    }

    fn url(&self, path: &str) -> Result<Url> {
        api_url(&self.config.api_base_url, path)
    }

    fn read_retry_config(&self) -> RetryConfig {
        if self.config.max_retries == 0 {
            RetryConfig::never()
        } else {
            RetryConfig::reads(
                self.config.max_retries,
                Duration::from_millis(self.config.retry_delay_ms),
            )
        }
    }

    /// One request, with non-2xx statuses mapped onto the error taxonomy.
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        tracing::debug!("[HTTP-Out] {} {}", method, url.path());

        let mut builder = self
            .client
            .request(method.clone(), url.clone())
            .bearer_auth(&*self.token);
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ChatError::Http(e.to_string()))?;
        let status = response.status();
        tracing::debug!("[HTTP-In] {} {} -> {}", method, url.path(), status);

        if status.is_success() {
            return Ok(response);
        }
        Err(rejection(status, response).await)
    }

    /// GET with the retry policy applied to transient statuses and network errors.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let mut retry_state = RetryState::new(self.read_retry_config());

        loop {
            let err = match self.send(Method::GET, url.clone(), None).await {
                Ok(response) => {
                    return response
                        .json::<T>()
                        .await
                        .map_err(|e| ChatError::Serialization(e.to_string()));
                }
                Err(err) => err,
            };

            let decision = match &err {
                ChatError::Http(_) => retry_state.after(Failure::Network),
                ChatError::ServerRejection {
                    status,
                    retry_after,
                    ..
                } => retry_state.after(Failure::Status {
                    code: *status,
                    retry_after: *retry_after,
                }),
                _ => RetryDecision::GiveUp,
            };

            match decision {
                RetryDecision::Wait(delay) => {
                    tracing::warn!(
                        "[HTTP] GET {} failed (attempt {}): {}; retrying in {:?}",
                        url.path(),
                        retry_state.attempts(),
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => return Err(err),
            }
        }
    }
}

async fn rejection(status: StatusCode, response: reqwest::Response) -> ChatError {
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let text = response.text().await.unwrap_or_default();
    rejection_from(status, &text, retry_after)
}

/// Map a non-success response to an error. The body's `{"error"}` text, when
/// present, becomes the message.
fn rejection_from(status: StatusCode, body: &str, retry_after: Option<Duration>) -> ChatError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_owned))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });

    if status == StatusCode::UNAUTHORIZED {
        return ChatError::Auth(message);
    }
    ChatError::ServerRejection {
        status: status.as_u16(),
        message,
        retry_after,
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn me(&self) -> Result<UserSummary> {
        let value: serde_json::Value = self.get_json(self.url("user/me")?).await?;
        // Older servers wrap the profile in `{ "user": ... }`.
        let user = value.get("user").cloned().unwrap_or(value);
        Ok(serde_json::from_value(user)?)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let list: Option<Vec<Conversation>> = self.get_json(self.url("chats")?).await?;
        Ok(list.unwrap_or_default())
    }

    async fn fetch_history(&self, peer: UserId) -> Result<Vec<Message>> {
        let list: Option<Vec<Message>> = self
            .get_json(self.url(&format!("messages/{}", peer))?)
            .await?;
        Ok(list.unwrap_or_default())
    }

    async fn mark_read(&self, message_id: u64) -> Result<()> {
        let url = self.url(&format!("messages/{}/read", message_id))?;
        self.send(Method::PUT, url, None).await?;
        Ok(())
    }

    async fn edit_message(&self, message_id: u64, content: &str) -> Result<Message> {
        let url = self.url(&format!("messages/{}", message_id))?;
        let response = self
            .send(Method::PUT, url, Some(json!({ "content": content })))
            .await?;
        response
            .json::<Message>()
            .await
            .map_err(|e| ChatError::Serialization(e.to_string()))
    }

    async fn delete_message(&self, message_id: u64, scope: DeleteScope) -> Result<()> {
        let url = self.url(&format!("messages/{}", message_id))?;
        self.send(Method::DELETE, url, Some(json!({ "delete_for": scope })))
            .await?;
        Ok(())
    }

    async fn delete_conversation(&self, peer: UserId, scope: DeleteScope) -> Result<()> {
        let url = self.url(&format!("chats/{}", peer))?;
        self.send(Method::DELETE, url, Some(json!({ "delete_for": scope })))
            .await?;
        Ok(())
    }

    async fn search_users(&self, fragment: &str) -> Result<Vec<UserSummary>> {
        let mut url = self.url("users/search")?;
        url.query_pairs_mut().append_pair("username", fragment);
        let list: Option<Vec<UserSummary>> = self.get_json(url).await?;
        Ok(list.unwrap_or_default())
    }
}
