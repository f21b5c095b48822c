// src/analysis.rs

use crate::catalog::QueryCatalog;
use crate::config::AnalysisSection;
use crate::error::BoxError;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

/// Location of a bill in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DocumentRef {
    pub bucket: String,
    pub key: String,
}

impl DocumentRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Opaque id the service hands out for an asynchronous analysis job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    InProgress,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// One analysis job per bill. Only the poller moves `status` forward.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub handle: JobHandle,
    pub source_document: DocumentRef,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum BlockType {
    #[serde(rename = "QUERY")]
    Query,
    #[serde(rename = "QUERY_RESULT")]
    QueryResult,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BlockQuery {
    #[serde(default)]
    pub text: String,
    pub alias: Option<String>,
}

/// A single element of the service's result stream. Only query and
/// query-result blocks matter to us; the rest (pages, lines, words) are
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Block {
    pub block_type: BlockType,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub query: Option<BlockQuery>,
}

#[cfg(test)]
impl Block {
    pub fn query(alias: &str) -> Self {
        Self {
            block_type: BlockType::Query,
            id: None,
            text: None,
            query: Some(BlockQuery {
                text: String::new(),
                alias: Some(alias.to_string()),
            }),
        }
    }

    pub fn answer(text: &str) -> Self {
        Self {
            block_type: BlockType::QueryResult,
            id: None,
            text: Some(text.to_string()),
            query: None,
        }
    }

    pub fn other(text: &str) -> Self {
        Self {
            block_type: BlockType::Other,
            id: None,
            text: Some(text.to_string()),
            query: None,
        }
    }
}

/// One status check. `blocks` is only populated once the job has succeeded,
/// and may be split over several pages linked by `next_token`.
#[derive(Debug, Clone)]
pub struct PollResponse {
    pub status: JobStatus,
    pub blocks: Vec<Block>,
    pub next_token: Option<String>,
    pub status_message: Option<String>,
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn submit(
        &self,
        document: &DocumentRef,
        catalog: &QueryCatalog,
    ) -> Result<JobHandle, BoxError>;

    async fn poll(
        &self,
        handle: &JobHandle,
        next_token: Option<&str>,
    ) -> Result<PollResponse, BoxError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation (JSON 1.1 protocol)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartRequest<'a> {
    document_location: DocumentLocation<'a>,
    feature_types: [&'static str; 1],
    queries_config: QueriesConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DocumentLocation<'a> {
    s3_object: S3Object<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct S3Object<'a> {
    bucket: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct QueriesConfig<'a> {
    queries: Vec<WireQuery<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireQuery<'a> {
    text: &'a str,
    alias: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartResponse {
    job_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetRequest<'a> {
    job_id: &'a str,
    max_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetResponse {
    job_status: String,
    #[serde(default)]
    blocks: Vec<Block>,
    next_token: Option<String>,
    status_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceFault {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(alias = "Message", default)]
    message: String,
}

/// Talks to the asynchronous document-analysis API over HTTP.
pub struct HttpAnalysisService {
    client: Client,
    endpoint: String,
    max_results: u32,
    request_timeout: Duration,
}

impl HttpAnalysisService {
    pub fn new(section: &AnalysisSection) -> Self {
        let endpoint = section.resolved_endpoint();
        info!(endpoint = %endpoint, "Using document analysis endpoint");
        Self {
            client: Client::new(),
            endpoint,
            max_results: section.max_results,
            request_timeout: Duration::from_secs(section.request_timeout_secs),
        }
    }

    async fn call<Req, Resp>(&self, target: &str, body: &Req) -> Result<Resp, BoxError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Amz-Target", format!("Textract.{target}"))
            .header("Content-Type", "application/x-amz-json-1.1")
            .body(serde_json::to_vec(body)?)
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ServiceFault>(&body) {
                Ok(fault) => {
                    let kind = fault.kind.rsplit('#').next().unwrap_or_default();
                    format!("{target} {status}: {kind}: {}", fault.message).into()
                }
                Err(_) => format!("{target} {status}: {body}").into(),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    async fn submit(
        &self,
        document: &DocumentRef,
        catalog: &QueryCatalog,
    ) -> Result<JobHandle, BoxError> {
        let request = StartRequest {
            document_location: DocumentLocation {
                s3_object: S3Object {
                    bucket: &document.bucket,
                    name: &document.key,
                },
            },
            feature_types: ["QUERIES"],
            queries_config: QueriesConfig {
                queries: catalog
                    .entries()
                    .iter()
                    .map(|q| WireQuery {
                        text: &q.question,
                        alias: q.alias.as_str(),
                    })
                    .collect(),
            },
        };

        let response: StartResponse = self.call("StartDocumentAnalysis", &request).await?;
        Ok(JobHandle::new(response.job_id))
    }

    async fn poll(
        &self,
        handle: &JobHandle,
        next_token: Option<&str>,
    ) -> Result<PollResponse, BoxError> {
        let request = GetRequest {
            job_id: handle.as_str(),
            max_results: self.max_results,
            next_token,
        };
        let response: GetResponse = self.call("GetDocumentAnalysis", &request).await?;
        Ok(PollResponse {
            status: parse_status(&response.job_status, handle)?,
            blocks: response.blocks,
            next_token: response.next_token,
            status_message: response.status_message,
        })
    }
}

fn parse_status(raw: &str, handle: &JobHandle) -> Result<JobStatus, BoxError> {
    match raw {
        "IN_PROGRESS" => Ok(JobStatus::InProgress),
        "SUCCEEDED" => Ok(JobStatus::Succeeded),
        "PARTIAL_SUCCESS" => {
            warn!(job = %handle, "Analysis finished with partial success");
            Ok(JobStatus::Succeeded)
        }
        "FAILED" => Ok(JobStatus::Failed),
        other => Err(format!("unknown job status {other:?}").into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_stream_deserializes_from_wire() {
        let raw = r#"{
            "JobStatus": "SUCCEEDED",
            "Blocks": [
                {"BlockType": "PAGE", "Id": "p1"},
                {"BlockType": "QUERY", "Id": "q1", "Query": {"Text": "What is the meter ID?", "Alias": "ES_ID"}},
                {"BlockType": "QUERY_RESULT", "Id": "r1", "Text": "ES-88812", "Confidence": 97.5}
            ]
        }"#;
        let response: GetResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.blocks.len(), 3);
        assert_eq!(response.blocks[0].block_type, BlockType::Other);
        assert_eq!(response.blocks[1].block_type, BlockType::Query);
        assert_eq!(
            response.blocks[1].query.as_ref().unwrap().alias.as_deref(),
            Some("ES_ID")
        );
        assert_eq!(response.blocks[2].text.as_deref(), Some("ES-88812"));
        assert!(response.next_token.is_none());
    }

    #[test]
    fn test_start_request_carries_every_query() {
        let catalog = QueryCatalog::utility_bill();
        let doc = DocumentRef::new("bills", "incoming/march.pdf");
        let request = StartRequest {
            document_location: DocumentLocation {
                s3_object: S3Object {
                    bucket: &doc.bucket,
                    name: &doc.key,
                },
            },
            feature_types: ["QUERIES"],
            queries_config: QueriesConfig {
                queries: catalog
                    .entries()
                    .iter()
                    .map(|q| WireQuery {
                        text: &q.question,
                        alias: q.alias.as_str(),
                    })
                    .collect(),
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["DocumentLocation"]["S3Object"]["Name"], "incoming/march.pdf");
        assert_eq!(json["FeatureTypes"][0], "QUERIES");
        assert_eq!(json["QueriesConfig"]["Queries"].as_array().unwrap().len(), 7);
        assert_eq!(json["QueriesConfig"]["Queries"][4]["Alias"], "Bill_Date");
    }

    #[test]
    fn test_status_mapping() {
        let handle = JobHandle::new("j");
        assert_eq!(parse_status("IN_PROGRESS", &handle).unwrap(), JobStatus::InProgress);
        assert_eq!(parse_status("PARTIAL_SUCCESS", &handle).unwrap(), JobStatus::Succeeded);
        assert_eq!(parse_status("FAILED", &handle).unwrap(), JobStatus::Failed);
        assert!(parse_status("PAUSED", &handle).is_err());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Submitted.is_terminal());
    }
}
