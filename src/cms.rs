//! Client for the CMS delivery (CDA) and management (CMA) APIs.
//!
//! Only the read endpoints the gateway needs are covered: entry listing,
//! single entries and assets, and content types.

use crate::config::Config;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::debug;

/// Page size used when listing entries or content types
pub const MAX_PAGE_SIZE: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum CmsError {
    #[error("Failed to send request to CMS API: {0}")]
    Request(#[from] reqwest::Error),

    #[error("CMS API error ({status}) for {url}: {body}")]
    Status {
        status: StatusCode,
        url: String,
        body: String,
    },

    #[error("Invalid CMS filter '{0}'")]
    InvalidFilter(String),

    #[error("Invalid CMS base URL '{0}'")]
    InvalidBaseUrl(String),
}

// ==================== Wire Types ====================

/// The `sys` block shared by every CMS resource and link
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sys {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<Box<Link>>,
}

/// A `{"sys": {...}}` reference to another resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub sys: Sys,
}

impl Link {
    /// Read a link out of a field value, if it is one
    pub fn from_value(value: &Value) -> Option<Link> {
        let link: Link = serde_json::from_value(value.clone()).ok()?;
        (link.sys.kind.as_deref() == Some("Link")).then_some(link)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub sys: Sys,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Entry {
    pub fn content_type_id(&self) -> Option<&str> {
        self.sys.content_type.as_ref().map(|ct| ct.sys.id.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub sys: Sys,
    #[serde(default)]
    pub fields: AssetFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetFields {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub file: Option<AssetFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetFile {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryCollection {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub skip: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub items: Vec<Entry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentType {
    pub sys: Sys,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_field: Option<String>,
    #[serde(default)]
    pub fields: Vec<ContentTypeField>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentTypeField {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub link_type: Option<String>,
    #[serde(default)]
    pub items: Option<FieldItems>,
    #[serde(default)]
    pub validations: Vec<Validation>,
    #[serde(default)]
    pub omitted: bool,
    #[serde(default)]
    pub disabled: bool,
}

/// Element description of an `Array` field
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldItems {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub link_type: Option<String>,
    #[serde(default)]
    pub validations: Vec<Validation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    #[serde(default)]
    pub link_content_type: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ContentTypeCollection {
    #[serde(default)]
    items: Vec<ContentType>,
}

// ==================== Timeline ====================

/// One CMS HTTP call made while serving a request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub url: String,
    pub start: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Collects the CMS calls made while executing one GraphQL request
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Arc<Mutex<Vec<TimelineEntry>>>,
}

impl Timeline {
    fn record(&self, entry: TimelineEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub fn entries(&self) -> Vec<TimelineEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ==================== Queries ====================

/// Parameters of an entry listing
#[derive(Debug, Clone, Default)]
pub struct EntryQuery {
    pub content_type: Option<String>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// Raw CMS search parameters, e.g. `fields.slug=home&order=-sys.createdAt`
    pub filter: Option<String>,
}

impl EntryQuery {
    fn to_pairs(&self) -> Result<Vec<(String, String)>, CmsError> {
        let mut pairs = Vec::new();

        if let Some(content_type) = &self.content_type {
            pairs.push(("content_type".to_string(), content_type.clone()));
        }
        if let Some(skip) = self.skip {
            pairs.push(("skip".to_string(), skip.to_string()));
        }
        pairs.push((
            "limit".to_string(),
            self.limit.unwrap_or(MAX_PAGE_SIZE).min(MAX_PAGE_SIZE).to_string(),
        ));

        if let Some(filter) = self.filter.as_deref().filter(|f| !f.trim().is_empty()) {
            let parsed = Url::parse(&format!("http://filter.invalid/?{}", filter.trim_start_matches('?')))
                .map_err(|_| CmsError::InvalidFilter(filter.to_string()))?;
            for (key, value) in parsed.query_pairs() {
                if matches!(key.as_ref(), "content_type" | "locale") {
                    continue;
                }
                pairs.push((key.into_owned(), value.into_owned()));
            }
        }

        Ok(pairs)
    }
}

// ==================== Client ====================

/// CMS client, optionally bound to a locale
#[derive(Debug, Clone)]
pub struct CmsClient {
    http: reqwest::Client,
    space_id: String,
    environment: Option<String>,
    cda_url: String,
    cda_token: String,
    cma_url: String,
    cma_token: Option<String>,
    locale: Option<String>,
}

impl CmsClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            space_id: config.space_id.clone(),
            environment: config.environment.clone(),
            cda_url: config.cda_url.trim_end_matches('/').to_string(),
            cda_token: config.cda_token.clone(),
            cma_url: config.cma_url.trim_end_matches('/').to_string(),
            cma_token: config.cma_token.clone(),
            locale: None,
        }
    }

    /// Copy of this client whose requests are made in `locale`
    pub fn for_locale(&self, locale: &str) -> Self {
        Self {
            locale: Some(locale.to_string()),
            ..self.clone()
        }
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    /// URL of a space resource; each of `resource` becomes one encoded path segment
    fn space_url(&self, base: &str, resource: &[&str]) -> Result<Url, CmsError> {
        let invalid = || CmsError::InvalidBaseUrl(base.to_string());
        let mut url = Url::parse(base).map_err(|_| invalid())?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| invalid())?;
            segments.pop_if_empty().push("spaces").push(&self.space_id);
            if let Some(env) = &self.environment {
                segments.push("environments").push(env);
            }
            segments.extend(resource);
        }
        Ok(url)
    }

    fn locale_pair(&self) -> Option<(String, String)> {
        self.locale
            .as_ref()
            .map(|locale| ("locale".to_string(), locale.clone()))
    }

    /// List entries of the space
    pub async fn get_entries(
        &self,
        query: &EntryQuery,
        timeline: Option<&Timeline>,
    ) -> Result<EntryCollection, CmsError> {
        let url = self.space_url(&self.cda_url, &["entries"])?;
        let mut pairs = query.to_pairs()?;
        pairs.extend(self.locale_pair());

        let response = self.send(url, &self.cda_token, &pairs, timeline).await?;
        read_json(response).await
    }

    /// Fetch a single entry; `None` when the CMS does not know the id
    pub async fn get_entry(
        &self,
        id: &str,
        timeline: Option<&Timeline>,
    ) -> Result<Option<Entry>, CmsError> {
        let url = self.space_url(&self.cda_url, &["entries", id])?;
        let pairs: Vec<_> = self.locale_pair().into_iter().collect();
        let response = self.send(url, &self.cda_token, &pairs, timeline).await?;
        read_json_if_found(response).await
    }

    /// Fetch a single asset; `None` when the CMS does not know the id
    pub async fn get_asset(
        &self,
        id: &str,
        timeline: Option<&Timeline>,
    ) -> Result<Option<Asset>, CmsError> {
        let url = self.space_url(&self.cda_url, &["assets", id])?;
        let pairs: Vec<_> = self.locale_pair().into_iter().collect();
        let response = self.send(url, &self.cda_token, &pairs, timeline).await?;
        read_json_if_found(response).await
    }

    /// List all content types of the space.
    ///
    /// Uses the management API when a CMA token is configured (it reports
    /// omitted fields), the delivery API otherwise.
    pub async fn get_content_types(&self) -> Result<Vec<ContentType>, CmsError> {
        let (url, token) = match &self.cma_token {
            Some(token) => (self.space_url(&self.cma_url, &["content_types"])?, token),
            None => (
                self.space_url(&self.cda_url, &["content_types"])?,
                &self.cda_token,
            ),
        };
        let pairs = vec![("limit".to_string(), MAX_PAGE_SIZE.to_string())];

        let response = self.send(url, token, &pairs, None).await?;
        let collection: ContentTypeCollection = read_json(response).await?;
        Ok(collection.items)
    }

    async fn send(
        &self,
        url: Url,
        token: &str,
        query: &[(String, String)],
        timeline: Option<&Timeline>,
    ) -> Result<reqwest::Response, CmsError> {
        debug!("GET {} {:?}", url, query);
        let start = Utc::now();
        let started = Instant::now();

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        if let Some(timeline) = timeline {
            timeline.record(TimelineEntry {
                url: response.url().to_string(),
                start,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        Ok(response)
    }
}

/// Decode a successful response; any other status is an error, 404 included
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, CmsError> {
    let status = response.status();
    if !status.is_success() {
        let url = response.url().clone();
        let body = response.text().await.unwrap_or_default();
        return Err(CmsError::Status {
            status,
            url: url.to_string(),
            body,
        });
    }

    Ok(response.json().await?)
}

/// Like [`read_json`], but a 404 means the resource does not exist
async fn read_json_if_found<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Option<T>, CmsError> {
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    read_json(response).await.map(Some)
}
