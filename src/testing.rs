//! In-memory CMS used by unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

use crate::error::{IngestionError, Result};
use crate::params::{RequestParams, LANGUAGE, PAGE};
use crate::sources::{CmsResponse, CmsTransport};
use crate::space::SPACE_ENDPOINT;

/// Serves fixed collections page by page
///
/// Collections are keyed `kind` or `kind@locale`; a localized request falls
/// back to the plain key.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    language_codes: Vec<String>,
    collections: HashMap<String, Vec<Value>>,
    failures: HashSet<String>,
    calls: Mutex<Vec<(String, RequestParams)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_languages(mut self, codes: &[&str]) -> Self {
        self.language_codes = codes.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_collection(mut self, key: &str, entries: Vec<Value>) -> Self {
        self.collections.insert(key.to_string(), entries);
        self
    }

    pub fn failing(mut self, key: &str) -> Self {
        self.failures.insert(key.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, RequestParams)> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RequestParams> {
        self.calls
            .lock()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait]
impl CmsTransport for ScriptedTransport {
    async fn get(&self, path: &str, params: &RequestParams) -> Result<CmsResponse> {
        self.calls.lock().push((path.to_string(), params.clone()));

        if path == SPACE_ENDPOINT {
            let body = json!({ "space": { "id": 1, "name": "test", "language_codes": self.language_codes } });
            return Ok(CmsResponse::new(body, None));
        }

        let kind = path.strip_prefix("cdn/").unwrap_or(path);
        let key = match params.get(LANGUAGE).and_then(Value::as_str) {
            Some(locale) => format!("{}@{}", kind, locale),
            None => kind.to_string(),
        };

        if self.failures.contains(&key) {
            return Err(IngestionError::ApiError {
                code: "500".to_string(),
                message: format!("{} unavailable", key),
            });
        }

        let entries = self
            .collections
            .get(&key)
            .or_else(|| self.collections.get(kind))
            .cloned()
            .unwrap_or_default();

        let page = params.get(PAGE).and_then(Value::as_u64).unwrap_or(1);
        let per_page = params.per_page()?;
        let start = ((page - 1) * per_page) as usize;
        let items: Vec<Value> = entries.iter().skip(start).take(per_page as usize).cloned().collect();

        Ok(CmsResponse::new(
            json!({ kind: items }),
            Some(entries.len() as u64),
        ))
    }
}
