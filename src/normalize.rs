//! Per-kind record normalization
//!
//! Every entity kind maps to a normalizer that turns a raw API entry into a
//! [`NormalizedRecord`] with a store-wide unique `id`. Kinds without an entry
//! fall back to [`passthrough`].

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{IngestionError, Result};
use crate::loader::RawRecord;

pub const STORIES: &str = "stories";
pub const TAGS: &str = "tags";

/// Field that keeps the numeric story id after the transform
pub const STORY_ID: &str = "story_id";

const DEFAULT_LANG: &str = "default";
const FALLBACK_COMPONENT: &str = "story";

/// Record ready for the node store
///
/// The serialized form and [`NormalizedRecord::into_fields`] always carry
/// [`NormalizedRecord::id`] as `id`, whatever `fields_mut` did to that key.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    id: String,
    fields: RawRecord,
}

impl NormalizedRecord {
    pub fn new(id: impl Into<String>, mut fields: RawRecord) -> Self {
        let id = id.into();
        fields.insert("id".to_string(), Value::String(id.clone()));
        Self { id, fields }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &RawRecord {
        &self.fields
    }

    /// Mutable access for in-place rewriting
    ///
    /// Writes to `id` are ignored by serialization and `into_fields`.
    pub fn fields_mut(&mut self) -> &mut RawRecord {
        &mut self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn into_fields(mut self) -> RawRecord {
        self.fields
            .insert("id".to_string(), Value::String(self.id));
        self.fields
    }
}

impl TryFrom<RawRecord> for NormalizedRecord {
    type Error = IngestionError;

    fn try_from(fields: RawRecord) -> Result<Self> {
        let id = fields
            .get("id")
            .and_then(id_string)
            .ok_or_else(|| IngestionError::InvalidRecord {
                kind: "node".to_string(),
                reason: "missing id".to_string(),
            })?;
        Ok(Self::new(id, fields))
    }
}

impl Serialize for NormalizedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let len = self.fields.len() + usize::from(!self.fields.contains_key("id"));
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("id", &self.id)?;
        for (key, value) in self.fields.iter().filter(|(key, _)| key.as_str() != "id") {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for NormalizedRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let fields = RawRecord::deserialize(deserializer)?;
        NormalizedRecord::try_from(fields).map_err(serde::de::Error::custom)
    }
}

/// Normalization function for one kind
pub type Normalizer = Arc<dyn Fn(RawRecord) -> Result<NormalizedRecord> + Send + Sync>;

/// Maps entity kinds to their normalizers
#[derive(Clone)]
pub struct NormalizerRegistry {
    by_kind: HashMap<String, Normalizer>,
    fallback: Normalizer,
}

impl NormalizerRegistry {
    /// Registry without any kind-specific entries
    pub fn empty() -> Self {
        Self {
            by_kind: HashMap::new(),
            fallback: Arc::new(passthrough),
        }
    }

    /// Stories and tags get their own id derivation
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(STORIES, transform_story);
        registry.register(TAGS, tag_by_name);
        registry
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, normalizer: F)
    where
        F: Fn(RawRecord) -> Result<NormalizedRecord> + Send + Sync + 'static,
    {
        self.by_kind.insert(kind.into(), Arc::new(normalizer));
    }

    pub fn has(&self, kind: &str) -> bool {
        self.by_kind.contains_key(kind)
    }

    pub fn normalize(&self, kind: &str, record: RawRecord) -> Result<NormalizedRecord> {
        let normalizer = self.by_kind.get(kind).unwrap_or(&self.fallback);
        normalizer(record)
    }
}

impl Default for NormalizerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for NormalizerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&String> = self.by_kind.keys().collect();
        kinds.sort();
        f.debug_struct("NormalizerRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

/// Namespaces a story id by content type and locale
///
/// Stories of different content types (and the same story in different
/// languages) share numeric ids, so the node id becomes
/// `{component}-{id}` or `{component}-{id}-{lang}`. The numeric id moves to
/// `story_id`, which is also where a second pass reads it from.
pub fn transform_story(mut story: RawRecord) -> Result<NormalizedRecord> {
    let source_id = story
        .get(STORY_ID)
        .or_else(|| story.get("id"))
        .cloned()
        .ok_or_else(|| invalid(STORIES, "missing id"))?;
    let numeric = id_string(&source_id).ok_or_else(|| invalid(STORIES, "unusable id"))?;

    let component = story
        .get("content")
        .and_then(|c| c.get("component"))
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .unwrap_or(FALLBACK_COMPONENT);

    let lang = story
        .get("lang")
        .and_then(Value::as_str)
        .filter(|l| !l.is_empty() && *l != DEFAULT_LANG);

    let id = match lang {
        Some(lang) => format!("{}-{}-{}", component, numeric, lang),
        None => format!("{}-{}", component, numeric),
    };

    story.insert(STORY_ID.to_string(), source_id);
    Ok(NormalizedRecord::new(id, story))
}

/// Tags have no id of their own; the name is used
pub fn tag_by_name(tag: RawRecord) -> Result<NormalizedRecord> {
    let name = tag
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .ok_or_else(|| invalid(TAGS, "missing name"))?;
    Ok(NormalizedRecord::new(name, tag))
}

/// Keeps the entry as is, using its `id` (or `uuid`) as node id
pub fn passthrough(record: RawRecord) -> Result<NormalizedRecord> {
    let id = record
        .get("id")
        .and_then(id_string)
        .or_else(|| record.get("uuid").and_then(id_string))
        .ok_or_else(|| invalid("entry", "missing id"))?;
    Ok(NormalizedRecord::new(id, record))
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn invalid(kind: &str, reason: &str) -> IngestionError {
    IngestionError::InvalidRecord {
        kind: kind.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_overwritten_id_is_not_serialized() {
        let mut node = NormalizedRecord::try_from(record(json!({ "id": 3, "name": "x" }))).unwrap();
        node.fields_mut()
            .insert("id".to_string(), json!("tampered"));

        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["id"], json!("3"));
        assert_eq!(value["name"], json!("x"));
        assert_eq!(value.as_object().unwrap().len(), 2);

        let back: NormalizedRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.id(), "3");
        assert_eq!(node.into_fields()["id"], json!("3"));
    }

    #[test]
    fn test_tag_id_is_name() {
        let tag = tag_by_name(record(json!({ "name": "foo", "count": 3 }))).unwrap();

        assert_eq!(tag.id(), "foo");
        assert_eq!(tag.get("id"), Some(&json!("foo")));
        assert_eq!(tag.get("count"), Some(&json!(3)));
    }

    #[test]
    fn test_tag_without_name_rejected() {
        assert!(tag_by_name(record(json!({ "count": 3 }))).is_err());
    }

    #[test]
    fn test_story_id_namespaced_by_component_and_lang() {
        let page = transform_story(record(json!({
            "id": 7, "lang": "default", "content": { "component": "page" }
        })))
        .unwrap();
        let post_de = transform_story(record(json!({
            "id": 7, "lang": "de", "content": { "component": "post" }
        })))
        .unwrap();

        assert_eq!(page.id(), "page-7");
        assert_eq!(post_de.id(), "post-7-de");
        assert_eq!(page.get(STORY_ID), Some(&json!(7)));
    }

    #[test]
    fn test_story_transform_deterministic_and_idempotent() {
        let raw = record(json!({ "id": 12, "name": "Home", "content": { "component": "page" } }));

        let first = transform_story(raw.clone()).unwrap();
        let second = transform_story(raw).unwrap();
        assert_eq!(first.id(), second.id());

        let again = transform_story(first.clone().into_fields()).unwrap();
        assert_eq!(again, first);
    }

    #[test]
    fn test_story_without_component_uses_fallback() {
        let story = transform_story(record(json!({ "id": 3 }))).unwrap();
        assert_eq!(story.id(), "story-3");
    }

    #[test]
    fn test_passthrough_stringifies_id() {
        let entry = passthrough(record(json!({ "id": 99, "value": "x" }))).unwrap();
        assert_eq!(entry.id(), "99");

        let link = passthrough(record(json!({ "uuid": "abc-123", "slug": "home" }))).unwrap();
        assert_eq!(link.id(), "abc-123");

        assert!(passthrough(record(json!({ "slug": "home" }))).is_err());
    }

    #[test]
    fn test_registry_dispatch_and_custom_kind() {
        let mut registry = NormalizerRegistry::with_defaults();
        registry.register("datasources", |r: RawRecord| {
            let slug = r.get("slug").and_then(Value::as_str).unwrap_or_default().to_string();
            Ok(NormalizedRecord::new(format!("datasource-{}", slug), r))
        });

        let tag = registry.normalize(TAGS, record(json!({ "name": "news" }))).unwrap();
        let ds = registry
            .normalize("datasources", record(json!({ "id": 1, "slug": "colors" })))
            .unwrap();
        let other = registry.normalize("links", record(json!({ "id": 5 }))).unwrap();

        assert_eq!(tag.id(), "news");
        assert_eq!(ds.id(), "datasource-colors");
        assert_eq!(other.id(), "5");
        assert!(registry.has(STORIES));
        assert!(!registry.has("links"));
    }

    #[test]
    fn test_serializes_as_flat_fields() {
        let tag = tag_by_name(record(json!({ "name": "foo" }))).unwrap();
        let json = serde_json::to_value(&tag).unwrap();
        assert_eq!(json, json!({ "name": "foo", "id": "foo" }));

        let back: NormalizedRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, tag);
    }
}
