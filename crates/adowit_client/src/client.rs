//! The `AdoClient` trait and its `reqwest` implementation.

use crate::error::AdoError;
use crate::types::{PatchOp, Relation, WorkItem};
use adowit_auth::TokenProvider;
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Unreserved characters stay literal; everything else (spaces included)
/// is escaped. Organization and project names can contain spaces.
const PATH_SEGMENT_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const API_VERSION: &str = "7.1";
const COMMENTS_API_VERSION: &str = "7.1-preview.4";

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Encode one URL path segment.
pub(crate) fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT_SET).to_string()
}

/// The HTTP verbs the core consumes, expressed as work-item operations.
#[async_trait]
pub trait AdoClient: Send + Sync {
    async fn get_work_item(&self, id: i64) -> Result<WorkItem, AdoError>;

    /// Fetch several work items with a field projection. Order follows `ids`.
    async fn get_work_items_batch(
        &self,
        ids: &[i64],
        fields: &[&str],
    ) -> Result<Vec<WorkItem>, AdoError>;

    async fn update_work_item(&self, id: i64, ops: Vec<PatchOp>) -> Result<WorkItem, AdoError>;

    async fn add_comment(&self, id: i64, text: &str) -> Result<(), AdoError>;

    async fn get_relations(&self, id: i64) -> Result<Vec<Relation>, AdoError>;

    async fn add_relation(
        &self,
        id: i64,
        reference_name: &str,
        target_url: &str,
    ) -> Result<(), AdoError>;

    /// Canonical API URL for a work item (used as relation target).
    fn work_item_url(&self, id: i64) -> String;

    /// Validate an iteration path against the project's classification nodes.
    async fn iteration_path_exists(&self, path: &str) -> Result<bool, AdoError>;

    /// Forward a WIQL string unmodified; returns matching ids in query order.
    async fn run_wiql(&self, query: &str) -> Result<Vec<i64>, AdoError>;

    /// Forward an OData query string unmodified to the Analytics surface;
    /// returns matching ids in result order.
    async fn run_odata(&self, query: &str) -> Result<Vec<i64>, AdoError>;
}

/// Production client over the ADO REST API.
pub struct RestAdoClient {
    http: reqwest::Client,
    tokens: Arc<TokenProvider>,
    /// `https://dev.azure.com/<org>` with the organization percent-encoded
    base_url: String,
    /// `https://analytics.dev.azure.com/<org>` (OData surface)
    analytics_url: String,
    project: String,
}

impl RestAdoClient {
    pub fn new(organization: &str, project: &str, tokens: Arc<TokenProvider>) -> Self {
        let organization = encode_segment(organization);
        Self {
            http: reqwest::Client::new(),
            tokens,
            base_url: format!("https://dev.azure.com/{organization}"),
            analytics_url: format!("https://analytics.dev.azure.com/{organization}"),
            project: encode_segment(project),
        }
    }

    fn project_api(&self, tail: &str) -> String {
        format!("{}/{}/_apis/wit/{}", self.base_url, self.project, tail)
    }

    /// Issue a request with bounded retry on transient failures. The body is
    /// rebuilt per attempt; bearer tokens are fetched fresh from the provider
    /// (normally a cache hit).
    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<(&'static str, Value)>,
    ) -> Result<Value, AdoError> {
        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 1u32;
        loop {
            let result = self.send_once(method.clone(), url, body.as_ref()).await;
            match result {
                Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(%url, attempt, "Transient ADO error, retrying: {err}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn send_once(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&(&'static str, Value)>,
    ) -> Result<Value, AdoError> {
        let token = self.tokens.get_token().await?;
        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some((content_type, payload)) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, *content_type)
                .body(payload.to_string());
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() || err.is_connect() {
                AdoError::Transient(err.to_string())
            } else {
                AdoError::Decode(err.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| AdoError::Decode(err.to_string()))?;

        if !status.is_success() {
            let message = extract_error_message(&text).unwrap_or_else(|| text.clone());
            return Err(AdoError::from_status(status.as_u16(), message));
        }

        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| AdoError::Decode(err.to_string()))
    }
}

/// ADO error bodies carry `{"message": "..."}`.
fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
struct WiqlResponse {
    #[serde(default, rename = "workItems")]
    work_items: Vec<WiqlRef>,
}

#[derive(Debug, Deserialize)]
struct WiqlRef {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    value: Vec<WorkItem>,
}

#[async_trait]
impl AdoClient for RestAdoClient {
    async fn get_work_item(&self, id: i64) -> Result<WorkItem, AdoError> {
        let url = self.project_api(&format!(
            "workitems/{id}?$expand=relations&api-version={API_VERSION}"
        ));
        let value = self.send(reqwest::Method::GET, &url, None).await?;
        serde_json::from_value(value).map_err(|err| AdoError::Decode(err.to_string()))
    }

    async fn get_work_items_batch(
        &self,
        ids: &[i64],
        fields: &[&str],
    ) -> Result<Vec<WorkItem>, AdoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.project_api(&format!("workitemsbatch?api-version={API_VERSION}"));
        let body = json!({ "ids": ids, "fields": fields });
        let value = self
            .send(reqwest::Method::POST, &url, Some(("application/json", body)))
            .await?;
        let batch: BatchResponse =
            serde_json::from_value(value).map_err(|err| AdoError::Decode(err.to_string()))?;
        Ok(batch.value)
    }

    async fn update_work_item(&self, id: i64, ops: Vec<PatchOp>) -> Result<WorkItem, AdoError> {
        let url = self.project_api(&format!("workitems/{id}?api-version={API_VERSION}"));
        let body = serde_json::to_value(&ops).map_err(|err| AdoError::Decode(err.to_string()))?;
        let value = self
            .send(
                reqwest::Method::PATCH,
                &url,
                Some(("application/json-patch+json", body)),
            )
            .await?;
        serde_json::from_value(value).map_err(|err| AdoError::Decode(err.to_string()))
    }

    async fn add_comment(&self, id: i64, text: &str) -> Result<(), AdoError> {
        let url = self.project_api(&format!(
            "workItems/{id}/comments?api-version={COMMENTS_API_VERSION}"
        ));
        let body = json!({ "text": text });
        self.send(reqwest::Method::POST, &url, Some(("application/json", body)))
            .await?;
        Ok(())
    }

    async fn get_relations(&self, id: i64) -> Result<Vec<Relation>, AdoError> {
        Ok(self.get_work_item(id).await?.relations)
    }

    async fn add_relation(
        &self,
        id: i64,
        reference_name: &str,
        target_url: &str,
    ) -> Result<(), AdoError> {
        let ops = vec![PatchOp::add(
            "/relations/-",
            json!({ "rel": reference_name, "url": target_url }),
        )];
        self.update_work_item(id, ops).await?;
        Ok(())
    }

    fn work_item_url(&self, id: i64) -> String {
        format!("{}/_apis/wit/workItems/{id}", self.base_url)
    }

    async fn iteration_path_exists(&self, path: &str) -> Result<bool, AdoError> {
        // The classification node API drops the leading project segment and
        // takes the remaining backslash-separated parts as URL segments.
        let tail: Vec<&str> = path.split('\\').skip(1).collect();
        let encoded = tail
            .iter()
            .map(|segment| encode_segment(segment))
            .collect::<Vec<_>>()
            .join("/");
        let url = if encoded.is_empty() {
            self.project_api(&format!("classificationnodes/Iterations?api-version={API_VERSION}"))
        } else {
            self.project_api(&format!(
                "classificationnodes/Iterations/{encoded}?api-version={API_VERSION}"
            ))
        };
        match self.send(reqwest::Method::GET, &url, None).await {
            Ok(_) => Ok(true),
            Err(AdoError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn run_wiql(&self, query: &str) -> Result<Vec<i64>, AdoError> {
        let url = self.project_api(&format!("wiql?api-version={API_VERSION}"));
        let body = json!({ "query": query });
        debug!("Running WIQL query");
        let value = self
            .send(reqwest::Method::POST, &url, Some(("application/json", body)))
            .await?;
        let response: WiqlResponse =
            serde_json::from_value(value).map_err(|err| AdoError::Decode(err.to_string()))?;
        Ok(response.work_items.into_iter().map(|r| r.id).collect())
    }

    async fn run_odata(&self, query: &str) -> Result<Vec<i64>, AdoError> {
        let url = format!(
            "{}/{}/_odata/v4.0-preview/{}",
            self.analytics_url, self.project, query
        );
        debug!("Running OData query");
        let value = self.send(reqwest::Method::GET, &url, None).await?;
        let rows = value
            .get("value")
            .and_then(Value::as_array)
            .ok_or_else(|| AdoError::Decode("OData response missing 'value'".to_string()))?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("WorkItemId").and_then(Value::as_i64))
            .collect())
    }
}
