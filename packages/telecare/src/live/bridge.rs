use std::future::Future;

use futures::StreamExt;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tracing::{debug, info};

use super::channel::{self, ChannelHandle, Handlers};
use super::protocol::Room;
use crate::config::LiveConfig;
use crate::error::ChannelError;

/// Opens live channels. Each call yields an independent channel that must
/// be closed by its owner.
pub trait Connect: Send + Sync {
    fn open(
        &self,
        room: Room,
        handlers: Handlers,
    ) -> impl Future<Output = Result<ChannelHandle, ChannelError>> + Send;
}

/// WebSocket connector for the backend's live endpoint.
#[derive(Clone)]
pub struct LiveBridge {
    url: String,
    token: Option<String>,
}

impl LiveBridge {
    pub fn new(config: &LiveConfig, token: Option<String>) -> Self {
        Self {
            url: config.url.clone(),
            token,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for LiveBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveBridge")
            .field("url", &self.url)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl Connect for LiveBridge {
    async fn open(&self, room: Room, handlers: Handlers) -> Result<ChannelHandle, ChannelError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(ChannelError::from_tungstenite)?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ChannelError::Other(e.into()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        debug!(url = %self.url, room = %room.id(), "Opening live channel");
        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(ChannelError::from_tungstenite)?;
        let (sink, stream) = ws.split();

        let handle = channel::start(room, handlers, sink, stream).await?;
        info!(channel = %handle.id(), room = %handle.room().id(), "Live channel open");
        Ok(handle)
    }
}
