//! HTTP gateway to the remote opportunity search API.

use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "aipply-search";

pub const DEFAULT_SEARCH_URL: &str =
    "https://aipply-ai-agent-main-production.up.railway.app";

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SEARCH_URL.to_string(),
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

impl SearchConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("AIPPLY_SEARCH_URL")
                .unwrap_or_else(|_| DEFAULT_SEARCH_URL.to_string()),
            timeout: Duration::from_secs(
                std::env::var("AIPPLY_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
            ),
            user_agent: std::env::var("AIPPLY_USER_AGENT").ok(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    pub keyword: String,
    pub region: Option<String>,
    pub kind: Option<String>,
}

/// One opportunity-like record as the remote API returns it. Fields are
/// best-effort; absent ones default.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub is_verified: Option<bool>,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("search API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unexpected search response body: {0}")]
    Body(#[source] serde_json::Error),
}

/// The API answers either `{"opportunities": [...]}` or a bare array;
/// both normalize to one ordered sequence.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Wrapped {
        #[serde(default)]
        opportunities: Vec<SearchHit>,
    },
    Bare(Vec<SearchHit>),
}

impl SearchResponse {
    fn into_hits(self) -> Vec<SearchHit> {
        match self {
            Self::Wrapped { opportunities } => opportunities,
            Self::Bare(hits) => hits,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Stateless request/response wrapper around the remote search API. One
/// attempt per call: no retry, no backoff, no cancellation; callers own
/// any policy on top.
#[derive(Debug)]
pub struct SearchGateway {
    client: reqwest::Client,
    base_url: String,
}

impl SearchGateway {
    pub fn new(config: SearchConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `GET <base>/search` with only the non-empty parameters attached.
    pub async fn search(&self, params: &SearchParams) -> Result<Vec<SearchHit>, SearchError> {
        let url = format!("{}/search", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&query_pairs(params))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(SearchError::Api {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        let parsed: SearchResponse =
            serde_json::from_slice(&body).map_err(SearchError::Body)?;
        Ok(parsed.into_hits())
    }

    /// Keywordless search; the API treats it as "list everything".
    pub async fn fetch_all(&self) -> Result<Vec<SearchHit>, SearchError> {
        self.search(&SearchParams::default()).await
    }

    /// `GET <base>/` liveness probe, returning the raw JSON body.
    pub async fn health_check(&self) -> Result<serde_json::Value, SearchError> {
        let url = format!("{}/", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(SearchError::Api {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }
        serde_json::from_slice(&body).map_err(SearchError::Body)
    }
}

fn query_pairs(params: &SearchParams) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::new();
    if !params.keyword.trim().is_empty() {
        pairs.push(("keyword", params.keyword.clone()));
    }
    if let Some(region) = params.region.as_deref().filter(|r| !r.trim().is_empty()) {
        pairs.push(("region", region.to_string()));
    }
    if let Some(kind) = params.kind.as_deref().filter(|k| !k.trim().is_empty()) {
        pairs.push(("type", kind.to_string()));
    }
    pairs
}

/// Error body `message` when present, generic status text otherwise.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| format!("API Error: {}", status.as_u16()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_omits_empty_parameters() {
        let params = SearchParams {
            keyword: "machine learning scholarship".into(),
            region: Some("  ".into()),
            kind: None,
        };
        let pairs = query_pairs(&params);
        assert_eq!(
            pairs,
            vec![("keyword", "machine learning scholarship".to_string())]
        );

        let all = SearchParams {
            keyword: "ai".into(),
            region: Some("Europe".into()),
            kind: Some("fellowship".into()),
        };
        let keys: Vec<_> = query_pairs(&all).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["keyword", "region", "type"]);
    }

    #[test]
    fn keywordless_search_sends_no_parameters() {
        assert!(query_pairs(&SearchParams::default()).is_empty());
    }

    #[test]
    fn wrapped_and_bare_responses_normalize_identically() {
        let wrapped = r#"{"opportunities":[{"title":"Rhodes Scholarship","type":"scholarship"}]}"#;
        let bare = r#"[{"title":"Rhodes Scholarship","type":"scholarship"}]"#;

        let from_wrapped = serde_json::from_str::<SearchResponse>(wrapped)
            .unwrap()
            .into_hits();
        let from_bare = serde_json::from_str::<SearchResponse>(bare)
            .unwrap()
            .into_hits();

        assert_eq!(from_wrapped, from_bare);
        assert_eq!(from_wrapped[0].title, "Rhodes Scholarship");
        assert_eq!(from_wrapped[0].kind.as_deref(), Some("scholarship"));
    }

    #[test]
    fn wrapped_response_without_array_is_empty() {
        let hits = serde_json::from_str::<SearchResponse>("{}")
            .unwrap()
            .into_hits();
        assert!(hits.is_empty());
    }

    #[test]
    fn error_message_prefers_body_message() {
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, br#"{"message":"scraper offline"}"#),
            "scraper offline"
        );
        assert_eq!(
            error_message(StatusCode::INTERNAL_SERVER_ERROR, b"<html>oops</html>"),
            "API Error: 500"
        );
    }

    #[test]
    fn hit_tolerates_sparse_records() {
        let hit: SearchHit =
            serde_json::from_str(r#"{"title":"Grant","deadline":null}"#).unwrap();
        assert_eq!(hit.title, "Grant");
        assert_eq!(hit.deadline, None);
        assert_eq!(hit.organization, None);
    }
}
