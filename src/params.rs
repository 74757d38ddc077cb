//! Request parameters and their layered merge
//!
//! Every listing request is built from up to three layers. Precedence, lowest
//! first:
//!
//! 1. [`Precedence::Defaults`]: values the caller falls back to (`per_page`)
//! 2. [`Precedence::Caller`]: user-supplied parameters from configuration
//! 3. [`Precedence::Fixed`]: values the run pins regardless of user input
//!    (the content `version`)
//!
//! A key present in a higher layer always replaces the same key from a lower
//! one, independent of the order in which layers were added.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{IngestionError, Result};

pub const PER_PAGE: &str = "per_page";
pub const PAGE: &str = "page";
pub const VERSION: &str = "version";
pub const LANGUAGE: &str = "language";

/// Query parameters for one CMS request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestParams(BTreeMap<String, Value>);

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overwrites keys of `self` with every key of `other`
    pub fn extend_from(&mut self, other: &RequestParams) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Reads `per_page` as a positive integer
    ///
    /// Configuration sourced from the environment carries numbers as strings,
    /// so numeric strings are accepted too.
    pub fn per_page(&self) -> Result<u64> {
        let value = self
            .get(PER_PAGE)
            .ok_or_else(|| IngestionError::InvalidParams("per_page is not set".to_string()))?;

        let parsed = match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };

        match parsed {
            Some(n) if n > 0 => Ok(n),
            _ => Err(IngestionError::InvalidParams(format!(
                "per_page must be a positive integer, got {}",
                value
            ))),
        }
    }

    /// Renders the parameters as query-string pairs
    ///
    /// Arrays are comma-joined, nulls are dropped, objects are sent as JSON.
    pub fn to_query(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .filter_map(|(key, value)| render_value(value).map(|v| (key.clone(), v)))
            .collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for RequestParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(render_value)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Some(value.to_string()),
    }
}

/// Merge precedence of a parameter layer, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    Defaults,
    Caller,
    Fixed,
}

/// Builder that merges parameter layers by [`Precedence`]
#[derive(Debug, Clone, Default)]
pub struct ParamLayers {
    layers: Vec<(Precedence, RequestParams)>,
}

impl ParamLayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(mut self, precedence: Precedence, params: RequestParams) -> Self {
        self.layers.push((precedence, params));
        self
    }

    pub fn defaults(self, params: RequestParams) -> Self {
        self.layer(Precedence::Defaults, params)
    }

    pub fn caller(self, params: RequestParams) -> Self {
        self.layer(Precedence::Caller, params)
    }

    pub fn fixed(self, params: RequestParams) -> Self {
        self.layer(Precedence::Fixed, params)
    }

    /// Resolves all layers into one parameter set
    pub fn merge(mut self) -> RequestParams {
        // stable: layers of equal precedence keep insertion order
        self.layers.sort_by_key(|(precedence, _)| *precedence);

        let mut merged = RequestParams::new();
        for (_, params) in &self.layers {
            merged.extend_from(params);
        }
        merged
    }
}
