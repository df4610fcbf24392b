//! Change feed source: incremental document feed over HTTP
//!
//! Speaks the Cosmos DB incremental feed dialect: every request carries the
//! continuation (`If-None-Match: <etag>`) from the previous response, `304`
//! means there is nothing new, and `200` returns a page of changed documents.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use super::GatewaySource;
use crate::config::SourceConfig;
use crate::error::{GatewayError, Result};
use crate::registry::GatewayRecord;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct FeedPage {
    #[serde(rename = "Documents", default)]
    documents: Vec<FeedDocument>,
}

#[derive(Debug, Deserialize)]
struct FeedDocument {
    id: String,
    #[serde(default)]
    gateway: GatewayRecord,
}

impl FeedDocument {
    fn into_record(self) -> GatewayRecord {
        GatewayRecord {
            id: self.id,
            ..self.gateway
        }
    }
}

/// Incremental change feed source
pub struct ChangeFeedSource {
    client: reqwest::Client,
    url: String,
    authorization: Option<String>,
    batch_size: usize,
    continuation: Option<String>,
}

impl ChangeFeedSource {
    /// Create a source from a `change_feed` source configuration
    pub fn new(config: &SourceConfig, batch_size: usize) -> Result<Self> {
        let field = |value: &Option<String>, name: &str| {
            value.clone().filter(|v| !v.is_empty()).ok_or_else(|| {
                GatewayError::Config(format!("Change feed source requires '{}'", name))
            })
        };
        let endpoint = field(&config.endpoint, "endpoint")?;
        let database = field(&config.database, "database")?;
        let collection = field(&config.collection, "collection")?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            url: format!(
                "{}/dbs/{}/colls/{}/docs",
                endpoint.trim_end_matches('/'),
                database,
                collection
            ),
            authorization: config.authorization.clone(),
            batch_size,
            continuation: None,
        })
    }

    /// Document feed URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl GatewaySource for ChangeFeedSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<GatewayRecord>>> {
        let mut request = self
            .client
            .get(&self.url)
            .header("A-IM", "Incremental feed")
            .header("x-ms-max-item-count", self.batch_size.to_string());
        if let Some(etag) = &self.continuation {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(auth) = &self.authorization {
            request = request.header(AUTHORIZATION, auth);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(GatewayError::Source(format!(
                "Change feed {} returned status {}",
                self.url, status
            )));
        }

        let etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let page: FeedPage = resp.json().await?;
        if etag.is_some() {
            self.continuation = etag;
        }

        Ok(Some(
            page.documents
                .into_iter()
                .map(FeedDocument::into_record)
                .collect(),
        ))
    }
}
