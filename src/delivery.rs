//! Delivery of queued records to the remote API.
//!
//! `Deliverer` is the seam between the flush loop and the network. The real
//! implementation, `HttpDeliverer`, POSTs each record as a JSON object to the
//! endpoint configured for its queue:
//!
//! ```text
//! POST <endpoint>
//! Content-Type: application/json
//! Idempotency-Key: <record id>
//! Authorization: Bearer <token>        (when configured)
//!
//! {"id": "<record id>", ...payload fields}
//! ```
//!
//! Any 2xx response counts as delivered. The same contract applies to all
//! three queues.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::FieldsyncConfig;
use crate::errors::DeliveryError;
use crate::queue::{QueueName, QueuedRecord};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Abstraction over remote delivery for testability.
/// Real implementation: `HttpDeliverer`.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, queue: QueueName, record: &QueuedRecord) -> Result<(), DeliveryError>;
}

/// Wire body: the payload object with the record id alongside its fields.
#[derive(Serialize)]
struct WireRecord<'a> {
    id: &'a str,
    #[serde(flatten)]
    payload: &'a Map<String, Value>,
}

pub struct HttpDeliverer {
    client: reqwest::Client,
    endpoints: HashMap<QueueName, String>,
    api_token: Option<String>,
    timeout_ms: u64,
}

impl HttpDeliverer {
    pub fn new(
        endpoints: HashMap<QueueName, String>,
        api_token: Option<String>,
        timeout_ms: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .user_agent(concat!("fieldsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoints,
            api_token,
            timeout_ms,
        })
    }

    pub fn from_config(config: &FieldsyncConfig) -> Result<Self> {
        let endpoints = QueueName::ALL
            .into_iter()
            .filter_map(|queue| config.endpoint(queue).map(|url| (queue, url)))
            .collect();
        Self::new(
            endpoints,
            config.toml.delivery.api_token.clone(),
            config.toml.delivery.timeout_ms,
        )
    }

    pub fn endpoint(&self, queue: QueueName) -> Option<&str> {
        self.endpoints.get(&queue).map(String::as_str)
    }
}

#[async_trait]
impl Deliverer for HttpDeliverer {
    async fn deliver(&self, queue: QueueName, record: &QueuedRecord) -> Result<(), DeliveryError> {
        let url = self
            .endpoint(queue)
            .ok_or(DeliveryError::EndpointNotConfigured { queue })?;

        let body = WireRecord {
            id: &record.id,
            payload: &record.payload,
        };
        let mut request = self
            .client
            .post(url)
            .header(IDEMPOTENCY_HEADER, &record.id)
            .json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout {
                    timeout_ms: self.timeout_ms,
                }
            } else {
                DeliveryError::from(e)
            }
        })?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}
