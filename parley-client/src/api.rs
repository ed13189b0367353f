//! REST collaborator for conversation CRUD and profile lookups.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::models::{
    Conversation, PagingResponse, ParticipantProfile, ParticipantRef, ParticipantType, Session,
};

#[async_trait]
pub trait ConversationApi: Send + Sync {
    /// `GET conversations?page&size`
    async fn list_conversations(
        &self,
        session: &Session,
        page: u32,
        size: u32,
    ) -> Result<PagingResponse<Conversation>>;

    /// `DELETE conversations/{id}`
    async fn delete_conversation(&self, session: &Session, conversation_id: &str) -> Result<()>;

    /// `GET users/{id}` or `GET companies/{id}`
    async fn fetch_profile(
        &self,
        session: &Session,
        participant: &ParticipantRef,
    ) -> Result<ParticipantProfile>;
}

/// reqwest-backed implementation of [`ConversationApi`]
pub struct RestConversationApi {
    client: Client,
    base_url: Url,
}

impl RestConversationApi {
    pub fn new(base_url: &str, client: Client) -> Result<Self> {
        let base_url =
            Url::parse(base_url).map_err(|e| ChatError::Config(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ChatError::Config(format!("{} cannot be a base URL", base_url)));
        }
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Self::new(&config.api_url, client)
    }

    /// Append percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ChatError::Config(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl ConversationApi for RestConversationApi {
    async fn list_conversations(
        &self,
        session: &Session,
        page: u32,
        size: u32,
    ) -> Result<PagingResponse<Conversation>> {
        let url = self.endpoint(&["conversations"])?;
        debug!(%url, page, size, "Fetching conversations");

        let response = self
            .client
            .get(url)
            .bearer_auth(&session.token)
            .query(&[("page", page), ("size", size)])
            .send()
            .await?;

        read_json(check_status(response, "conversations").await?).await
    }

    async fn delete_conversation(&self, session: &Session, conversation_id: &str) -> Result<()> {
        let url = self.endpoint(&["conversations", conversation_id])?;
        debug!(%url, "Deleting conversation");

        let response = self
            .client
            .delete(url)
            .bearer_auth(&session.token)
            .send()
            .await?;

        check_status(response, conversation_id).await?;
        Ok(())
    }

    async fn fetch_profile(
        &self,
        session: &Session,
        participant: &ParticipantRef,
    ) -> Result<ParticipantProfile> {
        let collection = match participant.participant_type {
            ParticipantType::User => "users",
            ParticipantType::Company => "companies",
        };
        let url = self.endpoint(&[collection, participant.id.as_str()])?;
        debug!(%url, "Fetching participant profile");

        let response = self
            .client
            .get(url)
            .bearer_auth(&session.token)
            .send()
            .await?;

        read_json(check_status(response, &participant.id).await?).await
    }
}

/// Map HTTP status codes onto the error taxonomy.
async fn check_status(response: Response, resource: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(%status, resource, body = %body.chars().take(200).collect::<String>(), "API request failed");

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ChatError::Auth(format!("{} rejected by API ({})", resource, status))
        }
        StatusCode::NOT_FOUND => ChatError::NotFound(resource.to_string()),
        _ => ChatError::Network(format!("HTTP error: {}", status)),
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
