//! Discord direct-message delivery over the REST API.
//!
//! Opens a DM channel with the recipient and posts the rendered alert. When
//! that fails and a fallback channel is configured, the alert is posted
//! there with a mention instead.

use super::{AlertMessage, Notifier};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Discord bot notifier.
pub struct DiscordNotifier {
    client: reqwest::Client,
    api_base: String,
    token: String,
    fallback_channel_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateDmRequest<'a> {
    recipient_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    content: &'a str,
}

impl DiscordNotifier {
    /// Create a notifier for the given bot token.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(token: String, fallback_channel_id: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            token,
            fallback_channel_id,
        })
    }

    /// Point at a different API root.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn open_dm(&self, recipient: &str) -> Result<String> {
        let channel: Channel = self
            .client
            .post(format!("{}/users/@me/channels", self.api_base))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .json(&CreateDmRequest {
                recipient_id: recipient,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(channel.id)
    }

    async fn post(&self, channel_id: &str, content: &str) -> Result<()> {
        self.client
            .post(format!("{}/channels/{channel_id}/messages", self.api_base))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .json(&CreateMessageRequest { content })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn send_dm(&self, recipient: &str, content: &str) -> Result<()> {
        let channel_id = self.open_dm(recipient).await?;
        self.post(&channel_id, content).await
    }
}

impl Notifier for DiscordNotifier {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn is_ready(&self) -> bool {
        let response = self
            .client
            .get(format!("{}/users/@me", self.api_base))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .send()
            .await;
        match response {
            Ok(r) if r.status().is_success() => true,
            Ok(r) => {
                warn!(status = %r.status(), "Discord rejected bot token");
                false
            }
            Err(e) => {
                debug!(error = %e, "Discord not reachable");
                false
            }
        }
    }

    async fn deliver(&self, recipient: &str, message: &AlertMessage) -> Result<()> {
        let content = message.render();

        let dm_error = match self.send_dm(recipient, &content).await {
            Ok(()) => {
                debug!(recipient, "DM delivered");
                return Ok(());
            }
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback_channel_id else {
            return Err(Error::NotificationUnreachable {
                recipient: recipient.to_string(),
                reason: dm_error.to_string(),
            });
        };

        warn!(recipient, error = %dm_error, "DM failed, using fallback channel");
        let mentioned = format!("<@{recipient}>\n{content}");
        self.post(fallback, &mentioned)
            .await
            .map_err(|e| Error::NotificationUnreachable {
                recipient: recipient.to_string(),
                reason: format!("DM: {dm_error}; fallback: {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertType, Money, Retailer};
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    /// Minimal stand-in for the Discord REST API.
    #[derive(Clone, Default)]
    struct FakeDiscord {
        dm_closed: bool,
        posted: Arc<Mutex<Vec<(String, String)>>>,
    }

    async fn open_dm(State(api): State<FakeDiscord>, Json(body): Json<Value>) -> std::result::Result<Json<Value>, StatusCode> {
        if api.dm_closed {
            return Err(StatusCode::FORBIDDEN);
        }
        let recipient = body["recipient_id"].as_str().unwrap_or_default();
        Ok(Json(json!({ "id": format!("dm-{recipient}") })))
    }

    async fn create_message(
        State(api): State<FakeDiscord>,
        Path(channel_id): Path<String>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        let content = body["content"].as_str().unwrap_or_default().to_string();
        api.posted.lock().unwrap().push((channel_id, content));
        StatusCode::OK
    }

    async fn serve(api: FakeDiscord) -> String {
        let app = Router::new()
            .route("/users/@me", get(|| async { StatusCode::OK }))
            .route("/users/@me/channels", post(open_dm))
            .route("/channels/:channel_id/messages", post(create_message))
            .with_state(api);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn notifier(base: &str, fallback: Option<&str>) -> DiscordNotifier {
        DiscordNotifier::new("token".into(), fallback.map(str::to_string), Duration::from_secs(5))
            .unwrap()
            .with_api_base(base)
    }

    fn message() -> AlertMessage {
        AlertMessage {
            product_name: "Desk Lamp".into(),
            product_url: "https://www.target.com/p/desk-lamp/-/A-1".into(),
            retailer: Retailer::Target,
            alert_type: AlertType::Shipping,
            price: Money::from_cents(4500),
            threshold: Money::from_cents(5000),
            zip_code: "10001".into(),
            store_id: None,
        }
    }

    #[tokio::test]
    async fn test_delivers_by_direct_message() {
        let api = FakeDiscord::default();
        let base = serve(api.clone()).await;
        let discord = notifier(&base, Some("999"));

        assert!(discord.is_ready().await);
        discord.deliver("1001", &message()).await.unwrap();

        let posted = api.posted.lock().unwrap();
        assert_eq!(*posted, vec![("dm-1001".to_string(), message().render())]);
    }

    #[tokio::test]
    async fn test_closed_dm_falls_back_to_channel_mention() {
        let api = FakeDiscord {
            dm_closed: true,
            ..FakeDiscord::default()
        };
        let base = serve(api.clone()).await;

        notifier(&base, Some("999")).deliver("1001", &message()).await.unwrap();

        let posted = api.posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].0, "999");
        assert!(posted[0].1.starts_with("<@1001>\n"));
        assert!(posted[0].1.ends_with(&message().render()));
    }

    #[tokio::test]
    async fn test_closed_dm_without_fallback_is_unreachable() {
        let api = FakeDiscord {
            dm_closed: true,
            ..FakeDiscord::default()
        };
        let base = serve(api.clone()).await;

        let err = notifier(&base, None).deliver("1001", &message()).await.unwrap_err();
        assert!(matches!(err, Error::NotificationUnreachable { ref recipient, .. } if recipient == "1001"));
        assert!(api.posted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_ready_when_api_is_down() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(!notifier(&format!("http://{addr}"), None).is_ready().await);
    }
}
