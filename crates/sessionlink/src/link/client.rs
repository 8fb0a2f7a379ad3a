//! HTTP client for the session link call.

use std::time::Duration;

use log::debug;
use reqwest::Client;
use sessionlink_protocol::{LinkRequest, LinkResponse};

use super::error::{LinkError, LinkResult};
use crate::config::ClientConfig;

/// Longest error body kept in [`LinkError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Client for `POST /api/socket/session/link`.
#[derive(Debug, Clone)]
pub struct LinkClient {
    client: Client,
    /// Full URL of the link endpoint.
    url: String,
}

impl LinkClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> LinkResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LinkError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> LinkResult<Self> {
        Self::new(config.link_url(), config.link.timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Link a connection id and return the assigned session index.
    pub async fn link(&self, connection_id: &str) -> LinkResult<u32> {
        debug!("Linking connection {} via {}", connection_id, self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&LinkRequest::new(connection_id))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = body
                    .char_indices()
                    .map(|(i, _)| i)
                    .take_while(|i| *i <= MAX_ERROR_BODY)
                    .last()
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(LinkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let parsed: LinkResponse = serde_json::from_slice(&bytes)
            .map_err(|e| LinkError::InvalidResponse(e.to_string()))?;

        debug!(
            "Connection {} linked to session index {}",
            connection_id, parsed.socket_index
        );
        Ok(parsed.socket_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_uses_configured_url() {
        let mut config = ClientConfig::default();
        config.server.base_url = "http://127.0.0.1:9000/".to_string();
        let client = LinkClient::from_config(&config).unwrap();
        assert_eq!(client.url(), "http://127.0.0.1:9000/api/socket/session/link");
    }
}
