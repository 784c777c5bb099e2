//! Authoritative response store adapters.
//!
//! The core only cares about presence: a record for a step key means the step
//! is answered, regardless of payload.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::SourceError;

/// A saved response as reported by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    #[serde(alias = "questionKey", alias = "stepId")]
    pub step_key: String,
    #[serde(default)]
    pub response: serde_json::Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ResponseRecord {
    pub fn answered(step_key: impl Into<String>) -> Self {
        Self {
            step_key: step_key.into(),
            response: serde_json::Value::Null,
            created_at: None,
            updated_at: None,
        }
    }
}

/// Asynchronous query for the saved responses of one participant.
#[async_trait]
pub trait ResponseSource: Send + Sync {
    async fn fetch_responses(
        &self,
        research_id: &str,
        participant_id: &str,
    ) -> Result<Vec<ResponseRecord>, SourceError>;
}

/// Body shapes accepted from the HTTP store.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResponsesBody {
    Wrapped { data: WrappedData },
    Bare(Vec<ResponseRecord>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WrappedData {
    List(Vec<ResponseRecord>),
    Nested { responses: Vec<ResponseRecord> },
}

impl ResponsesBody {
    fn into_records(self) -> Vec<ResponseRecord> {
        match self {
            ResponsesBody::Bare(records) => records,
            ResponsesBody::Wrapped {
                data: WrappedData::List(records),
            }
            | ResponsesBody::Wrapped {
                data: WrappedData::Nested { responses: records },
            } => records,
        }
    }
}

/// Parse a response-store body into records.
pub fn parse_responses(body: &str) -> Result<Vec<ResponseRecord>, SourceError> {
    let parsed: ResponsesBody = serde_json::from_str(body)?;
    Ok(parsed.into_records())
}

/// HTTP response store: `GET {base_url}/module-responses?researchId=..&participantId=..`.
#[derive(Debug, Clone)]
pub struct HttpResponseSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResponseSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/module-responses", self.base_url)
    }
}

#[async_trait]
impl ResponseSource for HttpResponseSource {
    async fn fetch_responses(
        &self,
        research_id: &str,
        participant_id: &str,
    ) -> Result<Vec<ResponseRecord>, SourceError> {
        let response = self
            .client
            .get(self.endpoint())
            .query(&[("researchId", research_id), ("participantId", participant_id)])
            .send()
            .await?;

        // No document yet for this participant
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(SourceError::Status {
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await?;
        parse_responses(&body)
    }
}

/// Fixed set of records, e.g. loaded from a JSON file.
#[derive(Debug, Clone, Default)]
pub struct StaticResponseSource {
    records: Vec<ResponseRecord>,
}

impl StaticResponseSource {
    pub fn new(records: Vec<ResponseRecord>) -> Self {
        Self { records }
    }

    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(keys.into_iter().map(ResponseRecord::answered).collect())
    }

    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let body = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(parse_responses(&body)?))
    }
}

#[async_trait]
impl ResponseSource for StaticResponseSource {
    async fn fetch_responses(
        &self,
        _research_id: &str,
        _participant_id: &str,
    ) -> Result<Vec<ResponseRecord>, SourceError> {
        Ok(self.records.clone())
    }
}
