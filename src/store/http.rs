//! HTTP client for the OpenFGA-compatible store API

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::{BatchCheckItem, CheckOutcome, FgaClient, ReadPage};
use crate::config::Args;
use crate::tuple::TupleKey;
use crate::types::{Result, WardenError};

/// Default timeout for store API calls
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the store's read/write/batch-check endpoints
pub struct HttpFgaClient {
    client: Client,
    api_url: String,
    store_id: String,
    model_id: Option<String>,
}

impl HttpFgaClient {
    pub fn new(args: &Args) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| WardenError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: args.fga_api_url.trim_end_matches('/').to_string(),
            store_id: args.fga_store_id.clone(),
            model_id: args.fga_model_id.clone(),
        })
    }

    fn endpoint(&self, op: &str) -> String {
        format!("{}/stores/{}/{}", self.api_url, self.store_id, op)
    }

    async fn post<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        op: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.endpoint(op))
            .json(body)
            .send()
            .await
            .map_err(|e| WardenError::Transport(format!("{} request failed: {}", op, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WardenError::Transport(format!(
                "{} returned {}: {}",
                op, status, text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| WardenError::Transport(format!("{} response decode failed: {}", op, e)))
    }
}

#[derive(Serialize, Deserialize)]
struct WireTupleKey {
    user: String,
    relation: String,
    object: String,
}

impl From<&TupleKey> for WireTupleKey {
    fn from(tuple: &TupleKey) -> Self {
        Self {
            user: tuple.user.clone(),
            relation: tuple.relation.clone(),
            object: tuple.object.clone(),
        }
    }
}

impl From<WireTupleKey> for TupleKey {
    fn from(key: WireTupleKey) -> Self {
        Self {
            user: key.user,
            relation: key.relation,
            object: key.object,
        }
    }
}

#[derive(Serialize)]
struct ReadRequest {
    tuple_key: ReadFilter,
    #[serde(skip_serializing_if = "Option::is_none")]
    continuation_token: Option<String>,
}

#[derive(Serialize)]
struct ReadFilter {
    object: String,
}

#[derive(Deserialize)]
struct ReadResponse {
    #[serde(default)]
    tuples: Vec<ReadTuple>,
    #[serde(default)]
    continuation_token: String,
}

#[derive(Deserialize)]
struct ReadTuple {
    key: WireTupleKey,
}

#[derive(Serialize)]
struct WriteRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    writes: Option<TupleKeys>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deletes: Option<TupleKeys>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_model_id: Option<String>,
}

#[derive(Serialize)]
struct TupleKeys {
    tuple_keys: Vec<WireTupleKey>,
}

#[derive(Serialize)]
struct BatchCheckRequest {
    checks: Vec<WireCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_model_id: Option<String>,
}

#[derive(Serialize)]
struct WireCheck {
    tuple_key: WireTupleKey,
    correlation_id: String,
}

#[derive(Deserialize)]
struct BatchCheckResponse {
    #[serde(default)]
    result: HashMap<String, WireCheckResult>,
}

#[derive(Deserialize)]
struct WireCheckResult {
    #[serde(default)]
    allowed: bool,
}

#[async_trait]
impl FgaClient for HttpFgaClient {
    async fn read(&self, object: &str, continuation: Option<&str>) -> Result<ReadPage> {
        let request = ReadRequest {
            tuple_key: ReadFilter {
                object: object.to_string(),
            },
            continuation_token: continuation.map(str::to_string),
        };

        let response: ReadResponse = self.post("read", &request).await?;

        Ok(ReadPage {
            tuples: response.tuples.into_iter().map(|t| t.key.into()).collect(),
            continuation: if response.continuation_token.is_empty() {
                None
            } else {
                Some(response.continuation_token)
            },
        })
    }

    async fn write(&self, writes: &[TupleKey], deletes: &[TupleKey]) -> Result<()> {
        // The store rejects empty tuple-key lists; omit them instead.
        let request = WriteRequest {
            writes: (!writes.is_empty()).then(|| TupleKeys {
                tuple_keys: writes.iter().map(Into::into).collect(),
            }),
            deletes: (!deletes.is_empty()).then(|| TupleKeys {
                tuple_keys: deletes.iter().map(Into::into).collect(),
            }),
            authorization_model_id: self.model_id.clone(),
        };

        let _: serde_json::Value = self.post("write", &request).await?;
        Ok(())
    }

    async fn batch_check(
        &self,
        checks: &[BatchCheckItem],
    ) -> Result<HashMap<String, CheckOutcome>> {
        let request = BatchCheckRequest {
            checks: checks
                .iter()
                .map(|check| WireCheck {
                    tuple_key: (&check.tuple).into(),
                    correlation_id: check.correlation_id.clone(),
                })
                .collect(),
            authorization_model_id: self.model_id.clone(),
        };

        let response: BatchCheckResponse = self.post("batch-check", &request).await?;

        Ok(response
            .result
            .into_iter()
            .map(|(id, result)| {
                (
                    id,
                    CheckOutcome {
                        allowed: result.allowed,
                    },
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_request_omits_empty_lists() {
        let request = WriteRequest {
            writes: None,
            deletes: Some(TupleKeys {
                tuple_keys: vec![WireTupleKey {
                    user: "user:a".into(),
                    relation: "writer".into(),
                    object: "project:1".into(),
                }],
            }),
            authorization_model_id: None,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("writes").is_none());
        assert!(json.get("authorization_model_id").is_none());
        assert_eq!(
            json["deletes"]["tuple_keys"][0]["relation"],
            serde_json::json!("writer")
        );
    }

    #[test]
    fn test_read_response_decodes() {
        let body = r#"{
            "tuples": [
                {"key": {"user": "user:a", "relation": "writer", "object": "project:1"},
                 "timestamp": "2024-01-01T00:00:00Z"}
            ],
            "continuation_token": "abc"
        }"#;

        let response: ReadResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.tuples.len(), 1);
        assert_eq!(response.tuples[0].key.user, "user:a");
        assert_eq!(response.continuation_token, "abc");
    }

    #[test]
    fn test_batch_check_response_decodes() {
        let body = r#"{"result": {"1": {"allowed": true}, "2": {"allowed": false}}}"#;
        let response: BatchCheckResponse = serde_json::from_str(body).unwrap();
        assert!(response.result["1"].allowed);
        assert!(!response.result["2"].allowed);
    }

    #[test]
    fn test_batch_check_error_entry_defaults_denied() {
        // Per-check errors come back without an "allowed" field.
        let body = r#"{"result": {"1": {"error": {"message": "model mismatch"}}}}"#;
        let response: BatchCheckResponse = serde_json::from_str(body).unwrap();
        assert!(!response.result["1"].allowed);
    }
}
