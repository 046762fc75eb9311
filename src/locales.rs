//! Locale discovery through the space's `settings` entry.

use crate::cms::{CmsClient, CmsError, EntryQuery, MAX_PAGE_SIZE};
use futures::future::try_join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

/// Content type id of the singleton settings entry
pub const SETTINGS_CONTENT_TYPE: &str = "settings";

/// Settings field listing the locale tags of the space
pub const AVAILABLE_LOCALES_FIELD: &str = "availableLocales";

#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error(transparent)]
    Cms(#[from] CmsError),

    #[error("No '{content_type}' entry found (locale: {locale})")]
    NotFound {
        content_type: &'static str,
        locale: String,
    },

    #[error("Settings field 'availableLocales' is missing or not a list of locale tags")]
    InvalidAvailableLocales,
}

/// Settings of the space as seen in one locale.
///
/// Serializes as the settings field map with `locale` set to the short code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpaceLocaleMeta {
    pub locale: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SpaceLocaleMeta {
    pub fn new(locale: &str, mut fields: Map<String, Value>) -> Self {
        fields.remove("locale");
        Self {
            locale: locale.to_string(),
            fields,
        }
    }
}

/// Short locale code: everything before the first `-` or `_`
pub fn short_locale_code(tag: &str) -> &str {
    tag.split(|c: char| c == '-' || c == '_').next().unwrap_or(tag)
}

/// Fetch the fields of the `settings` entry, in the client's locale if bound.
///
/// When several settings entries exist the last one listed wins.
pub async fn fetch_space_meta(client: &CmsClient) -> Result<Map<String, Value>, MetaError> {
    let query = EntryQuery {
        limit: Some(MAX_PAGE_SIZE),
        ..Default::default()
    };
    let entries = client.get_entries(&query, None).await?;

    entries
        .items
        .into_iter()
        .filter(|entry| entry.content_type_id() == Some(SETTINGS_CONTENT_TYPE))
        .last()
        .map(|entry| entry.fields)
        .ok_or_else(|| MetaError::NotFound {
            content_type: SETTINGS_CONTENT_TYPE,
            locale: client.locale().unwrap_or("default").to_string(),
        })
}

/// Read the short locale codes from the default-locale settings
pub fn available_locale_codes(fields: &Map<String, Value>) -> Result<Vec<String>, MetaError> {
    let tags = fields
        .get(AVAILABLE_LOCALES_FIELD)
        .and_then(Value::as_array)
        .ok_or(MetaError::InvalidAvailableLocales)?;

    tags.iter()
        .map(|tag| {
            tag.as_str()
                .map(|t| short_locale_code(t).to_string())
                .ok_or(MetaError::InvalidAvailableLocales)
        })
        .collect()
}

/// Discover every locale of the space and fetch its settings.
///
/// The default-locale settings are fetched first; the per-locale fetches then
/// run concurrently. Order follows `availableLocales`.
pub async fn fetch_space_locale_metas(client: &CmsClient) -> Result<Vec<SpaceLocaleMeta>, MetaError> {
    let defaults = fetch_space_meta(client).await?;
    let codes = available_locale_codes(&defaults)?;
    info!("Space lists {} locales: {:?}", codes.len(), codes);

    try_join_all(codes.iter().map(|code| async move {
        let fields = fetch_space_meta(&client.for_locale(code)).await?;
        Ok::<_, MetaError>(SpaceLocaleMeta::new(code, fields))
    }))
    .await
}
