//! Video-room provider client.
//!
//! Classhub never handles media itself; scheduled sessions get a room
//! provisioned at an external provider, and joining mints a short-lived
//! access token scoped to that room. The provider is behind a trait so
//! the join flow can be exercised without network access in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RoomError {
    /// No API key configured; rooms cannot be provisioned.
    #[error("room provider is not configured")]
    Unconfigured,
    #[error("room provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("room provider error: {status} - {message}")]
    Provider { status: u16, message: String },
}

/// A room reference returned by the provider. Stable for the lifetime of
/// the session it belongs to.
#[derive(Debug, Clone)]
pub struct ProvisionedRoom {
    pub room_id: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct JoinTokenRequest {
    pub room_id: String,
    pub user_name: String,
    pub is_owner: bool,
    pub expires_at_unix: i64,
}

#[async_trait]
pub trait RoomProvider: Send + Sync {
    /// Create a room for a session. Called once at session setup.
    async fn provision_room(&self, title: &str) -> Result<ProvisionedRoom, RoomError>;

    /// Best-effort cleanup when a session is deleted.
    async fn deprovision_room(&self, room_id: &str) -> Result<(), RoomError>;

    /// Mint a short-lived access token scoped to a room.
    async fn mint_join_token(&self, req: JoinTokenRequest) -> Result<String, RoomError>;
}

/// Append a join token to a room URL, respecting an existing query string.
pub fn compose_join_url(base_url: &str, token: &str) -> String {
    if base_url.contains('?') {
        format!("{}&t={}", base_url, token)
    } else {
        format!("{}?t={}", base_url, token)
    }
}

/// HTTP implementation against a Daily-style rooms REST API.
pub struct HttpRoomProvider {
    api_base: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpRoomProvider {
    pub fn new(api_base: String, api_key: Option<String>) -> Self {
        Self {
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn key(&self) -> Result<&str, RoomError> {
        self.api_key.as_deref().ok_or(RoomError::Unconfigured)
    }

    async fn post<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RoomError> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Bearer {}", self.key()?))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(RoomError::Provider { status, message });
        }

        Ok(response.json().await?)
    }
}

#[derive(Debug, Serialize)]
struct CreateRoomBody<'a> {
    name: &'a str,
    privacy: &'a str,
    properties: RoomProperties,
}

#[derive(Debug, Serialize)]
struct RoomProperties {
    enable_chat: bool,
    enable_screenshare: bool,
}

#[derive(Debug, Deserialize)]
struct CreateRoomResponse {
    name: String,
    url: String,
}

#[derive(Debug, Serialize)]
struct MeetingTokenBody<'a> {
    properties: MeetingTokenProperties<'a>,
}

#[derive(Debug, Serialize)]
struct MeetingTokenProperties<'a> {
    room_name: &'a str,
    user_name: &'a str,
    is_owner: bool,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct MeetingTokenResponse {
    token: String,
}

#[async_trait]
impl RoomProvider for HttpRoomProvider {
    async fn provision_room(&self, title: &str) -> Result<ProvisionedRoom, RoomError> {
        // Provider room names must be URL-safe; the title is display-only
        let name = format!("classhub-{}", uuid::Uuid::new_v4());
        debug!(room = %name, title = %title, "Provisioning video room");

        let created: CreateRoomResponse = self
            .post(
                "/rooms",
                &CreateRoomBody {
                    name: &name,
                    privacy: "private",
                    properties: RoomProperties {
                        enable_chat: true,
                        enable_screenshare: true,
                    },
                },
            )
            .await?;

        Ok(ProvisionedRoom {
            room_id: created.name,
            url: created.url,
        })
    }

    async fn deprovision_room(&self, room_id: &str) -> Result<(), RoomError> {
        let response = self
            .client
            .delete(format!("{}/rooms/{}", self.api_base, room_id))
            .header("Authorization", format!("Bearer {}", self.key()?))
            .send()
            .await?;

        // Already-deleted rooms are fine; this is best-effort cleanup
        if !response.status().is_success() && response.status().as_u16() != 404 {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(RoomError::Provider { status, message });
        }

        Ok(())
    }

    async fn mint_join_token(&self, req: JoinTokenRequest) -> Result<String, RoomError> {
        let response: MeetingTokenResponse = self
            .post(
                "/meeting-tokens",
                &MeetingTokenBody {
                    properties: MeetingTokenProperties {
                        room_name: &req.room_id,
                        user_name: &req.user_name,
                        is_owner: req.is_owner,
                        exp: req.expires_at_unix,
                    },
                },
            )
            .await?;

        Ok(response.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_join_url_without_query() {
        assert_eq!(
            compose_join_url("https://x.daily.co/room1", "abc"),
            "https://x.daily.co/room1?t=abc"
        );
    }

    #[test]
    fn test_compose_join_url_with_query() {
        assert_eq!(
            compose_join_url("https://x.daily.co/room1?v=2", "abc"),
            "https://x.daily.co/room1?v=2&t=abc"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_provider_refuses_to_provision() {
        let provider = HttpRoomProvider::new("https://api.daily.co/v1".to_string(), None);
        let err = provider.provision_room("Algebra I").await.unwrap_err();
        assert!(matches!(err, RoomError::Unconfigured));
    }
}
