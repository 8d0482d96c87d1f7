//! # Block Number WebSocket Subscription
//!
//! Feeds a [`BlockStream`] from `eth_subscribe("newHeads")`.
//!
//! ## Features
//!
//! - **Real-time Updates**: one message per new head
//! - **Automatic Reconnection**: exponential backoff on connection failures

use crate::block_stream::BlockStream;
use anyhow::{Context, Result};
use ethers::prelude::*;
use ethers::providers::{Provider, Ws};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// WebSocket head subscriber with automatic reconnection
pub struct BlockNumberWebSocket {
    provider_url: String,
    stream: Arc<BlockStream>,
    reconnect_delay: Duration,
    max_reconnect_delay: Duration,
}

impl BlockNumberWebSocket {
    /// * `provider_url` - `ws://`/`wss://` URL; `http(s)://` is rewritten to the websocket scheme
    pub fn new(provider_url: String, stream: Arc<BlockStream>) -> Self {
        Self {
            provider_url,
            stream,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
        }
    }

    pub fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    /// Spawns the subscription loop. The task runs until aborted.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let ws_url = websocket_url(&self.provider_url);
            let mut reconnect_delay = self.reconnect_delay;
            loop {
                match Self::connect_and_subscribe(&ws_url, &self.stream).await {
                    Ok(()) => {
                        reconnect_delay = self.reconnect_delay;
                        info!("[BlockNumberWS] Stream ended cleanly, reconnecting");
                    }
                    Err(e) => {
                        error!(
                            "[BlockNumberWS] WebSocket connection failed: {}. Reconnecting in {:?}...",
                            e, reconnect_delay
                        );
                    }
                }

                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(self.max_reconnect_delay);
            }
        })
    }

    async fn connect_and_subscribe(ws_url: &str, stream: &BlockStream) -> Result<()> {
        info!("[BlockNumberWS] Connecting to WebSocket: {}", ws_url);
        let provider = Provider::<Ws>::connect(ws_url)
            .await
            .context("Failed to connect to WebSocket provider")?;

        let mut heads = provider
            .subscribe_blocks()
            .await
            .context("Failed to subscribe to newHeads")?;
        info!("[BlockNumberWS] Subscribed to newHeads");

        while let Some(block) = heads.next().await {
            match stream.publish(&block) {
                Ok(subscribers) => debug!(
                    "[BlockNumberWS] New block {:?} -> {} subscribers",
                    block.number, subscribers
                ),
                Err(e) => warn!("[BlockNumberWS] Skipping head: {}", e),
            }
        }
        warn!("[BlockNumberWS] WebSocket stream ended");
        Ok(())
    }
}

/// Converts an HTTP endpoint to its websocket equivalent.
pub fn websocket_url(provider_url: &str) -> String {
    if let Some(rest) = provider_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = provider_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if provider_url.starts_with("ws://") || provider_url.starts_with("wss://") {
        provider_url.to_string()
    } else {
        format!("ws://{}", provider_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url_conversion() {
        assert_eq!(websocket_url("http://127.0.0.1:8545"), "ws://127.0.0.1:8545");
        assert_eq!(websocket_url("https://rpc.example.org/key"), "wss://rpc.example.org/key");
        assert_eq!(websocket_url("wss://rpc.example.org"), "wss://rpc.example.org");
        assert_eq!(websocket_url("127.0.0.1:8546"), "ws://127.0.0.1:8546");
    }
}
