use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::RestStoreConfig;
use crate::error::StoreError;
use crate::scripts::{EXTEND_IF_OWNER, RECORD_IN_WINDOW, RELEASE_IF_OWNER, window_expiry_secs};
use crate::traits::CoordinationStore;
use crate::types::WindowEntry;

/// Redis-protocol store reached over an Upstash-style `/pipeline` REST
/// endpoint. Each trait call is one pipeline holding one atomic command.
#[derive(Clone)]
pub struct RestPipelineStore {
    config: RestStoreConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct PipelineReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl RestPipelineStore {
    pub fn new(config: RestStoreConfig) -> Result<Self, StoreError> {
        if config.url.trim().is_empty() || config.token.trim().is_empty() {
            return Err(StoreError::Config(
                "rest store url and token are required".to_string(),
            ));
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn pipeline_url(&self) -> String {
        format!("{}/pipeline", self.config.url.trim_end_matches('/'))
    }

    async fn run(&self, command: Vec<String>) -> Result<Value, StoreError> {
        let res = self
            .client
            .post(self.pipeline_url())
            .bearer_auth(&self.config.token)
            .json(&vec![command])
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(StoreError::Api { status, body });
        }

        let replies: Vec<PipelineReply> = res.json().await?;
        first_result(replies)
    }
}

fn first_result(replies: Vec<PipelineReply>) -> Result<Value, StoreError> {
    let reply = replies
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::InvalidResponse("empty pipeline reply".to_string()))?;
    if let Some(err) = reply.error {
        return Err(StoreError::Command(err));
    }
    Ok(reply.result.unwrap_or(Value::Null))
}

fn as_flag(value: &Value) -> Result<bool, StoreError> {
    match value {
        Value::Number(n) => Ok(n.as_i64().unwrap_or(0) > 0),
        Value::Null => Ok(false),
        other => Err(StoreError::InvalidResponse(format!(
            "expected integer reply, got {other}"
        ))),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl CoordinationStore for RestPipelineStore {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let reply = self
            .run(vec![
                "SET".to_string(),
                key.to_string(),
                token.to_string(),
                "NX".to_string(),
                "PX".to_string(),
                millis(ttl).to_string(),
            ])
            .await?;
        Ok(reply.as_str() == Some("OK"))
    }

    async fn release_if_owner(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let reply = self
            .run(vec![
                "EVAL".to_string(),
                RELEASE_IF_OWNER.to_string(),
                "1".to_string(),
                key.to_string(),
                token.to_string(),
            ])
            .await?;
        as_flag(&reply)
    }

    async fn extend_if_owner(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let reply = self
            .run(vec![
                "EVAL".to_string(),
                EXTEND_IF_OWNER.to_string(),
                "1".to_string(),
                key.to_string(),
                token.to_string(),
                millis(ttl).to_string(),
            ])
            .await?;
        as_flag(&reply)
    }

    async fn record_in_window(
        &self,
        key: &str,
        entry: &WindowEntry,
        window: Duration,
        limit: usize,
    ) -> Result<bool, StoreError> {
        let window_ms = millis(window);
        let reply = self
            .run(vec![
                "EVAL".to_string(),
                RECORD_IN_WINDOW.to_string(),
                "1".to_string(),
                key.to_string(),
                entry.timestamp_ms.to_string(),
                window_ms.to_string(),
                limit.to_string(),
                entry.member.clone(),
                window_expiry_secs(window_ms).to_string(),
            ])
            .await?;
        as_flag(&reply)
    }
}
