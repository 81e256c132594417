//! HTTP chat backend responder.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::core::event::QueuedEvent;
use crate::error::{Error, Result};

use super::Responder;

/// Posts the batch as a JSON array and expects `{"response": "..."}` back.
pub struct BackendResponder {
    client: Client,
    url: String,
}

#[derive(Deserialize)]
struct BackendReply {
    response: String,
}

impl BackendResponder {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Responder for BackendResponder {
    fn name(&self) -> &str {
        "backend"
    }

    async fn respond(&self, batch: &[QueuedEvent]) -> Result<String> {
        let response = self.client.post(&self.url).json(batch).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Processor(format!(
                "backend returned {}: {}",
                status, body
            )));
        }

        let reply: BackendReply = response.json().await?;
        Ok(reply.response)
    }
}
