//! Space descriptor and locale resolution

use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::{IngestionError, Result};
use crate::params::RequestParams;
use crate::sources::CmsTransport;

pub const SPACE_ENDPOINT: &str = "cdn/spaces/me";

/// Locale token; the empty string means "no locale filter"
pub type Locale = String;

pub const DEFAULT_LOCALE: &str = "";

/// Configuration the space reports about itself
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SpaceDescriptor {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub language_codes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SpaceResponse {
    #[serde(default)]
    space: Option<SpaceDescriptor>,
}

/// Fetches the descriptor of the space the access token belongs to
///
/// A body without a `space` object yields an empty descriptor.
pub async fn fetch_space(transport: &dyn CmsTransport) -> Result<SpaceDescriptor> {
    let response = transport.get(SPACE_ENDPOINT, &RequestParams::new()).await?;

    let parsed: SpaceResponse =
        serde_json::from_value(response.data).map_err(|e| IngestionError::InvalidResponse {
            endpoint: SPACE_ENDPOINT.to_string(),
            reason: e.to_string(),
        })?;

    let space = parsed.space.unwrap_or_default();
    info!(
        space = ?space.name,
        languages = ?space.language_codes,
        "Resolved space"
    );
    Ok(space)
}

/// Locales to iterate: the neutral locale first, then each declared code once
pub fn resolve_locales(language_codes: &[String]) -> Vec<Locale> {
    let mut seen: HashSet<&str> = HashSet::new();
    seen.insert(DEFAULT_LOCALE);

    let mut locales = vec![DEFAULT_LOCALE.to_string()];
    for code in language_codes {
        if seen.insert(code.as_str()) {
            locales.push(code.clone());
        }
    }

    debug!(locales = ?locales, "Resolved locales");
    locales
}
