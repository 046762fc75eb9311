use anyhow::{Context, Result};

/// Port used when neither `GRAPHQL_PORT` nor `PORT` is set
pub const DEFAULT_PORT: u16 = 5000;

/// Toggles for the optional parts of a GraphQL response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphQlOptions {
    /// Report the server version under `extensions.version`
    pub version: bool,
    /// Report the CMS calls made by a request under `extensions.timeline`
    pub timeline: bool,
    /// Keep `extensions` on errors instead of stripping them
    pub detailed_errors: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    // HTTP listener
    pub host: String,
    pub port: u16,

    // CMS space
    pub space_id: String,
    pub environment: Option<String>,
    pub cda_token: String,
    pub cma_token: Option<String>,
    pub cda_url: String,
    pub cma_url: String,

    // GraphQL responses
    pub graphql: GraphQlOptions,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: std::env::var("GRAPHQL_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: resolve_port(
                std::env::var("GRAPHQL_PORT").ok(),
                std::env::var("PORT").ok(),
            )?,

            space_id: std::env::var("SPACE_ID").context("SPACE_ID not set")?,
            environment: non_empty_var("CMS_ENVIRONMENT"),
            cda_token: std::env::var("CDA_TOKEN").context("CDA_TOKEN not set")?,
            cma_token: non_empty_var("CMA_TOKEN"),
            cda_url: std::env::var("CDA_URL")
                .unwrap_or_else(|_| "https://cdn.contentful.com".to_string()),
            cma_url: std::env::var("CMA_URL")
                .unwrap_or_else(|_| "https://api.contentful.com".to_string()),

            graphql: GraphQlOptions {
                version: flag_var("GRAPHQL_VERSION"),
                timeline: flag_var("GRAPHQL_TIMELINE"),
                detailed_errors: flag_var("GRAPHQL_DETAILED_ERRORS"),
            },
        })
    }
}

/// Pick the listener port: `GRAPHQL_PORT` first, then `PORT`, then the default.
///
/// Empty values count as unset.
pub fn resolve_port(graphql_port: Option<String>, port: Option<String>) -> Result<u16> {
    let raw = [graphql_port, port]
        .into_iter()
        .flatten()
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty());

    match raw {
        Some(value) => value
            .parse()
            .with_context(|| format!("Invalid port: {}", value)),
        None => Ok(DEFAULT_PORT),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn flag_var(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
