use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::BrokerError;

/// Opaque command channel to the broker bridge. Accepts a named operation
/// with structured parameters and returns the raw structured result; all
/// decoding into domain types happens in the gateway.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn execute(&self, operation: &str, params: Value) -> Result<Value, BrokerError>;
}

#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    command: &'a str,
    params: &'a Value,
}

/// HTTP bridge transport: every operation is a JSON POST against a single
/// command endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/command", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl BrokerTransport for HttpTransport {
    async fn execute(&self, operation: &str, params: Value) -> Result<Value, BrokerError> {
        let request = CommandRequest {
            command: operation,
            params: &params,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| BrokerError::Transport(format!("{operation}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Transport(format!(
                "{operation}: bridge returned {status}: {body}"
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| BrokerError::Malformed(format!("{operation}: {e}")))
    }
}
