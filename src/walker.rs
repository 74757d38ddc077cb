//! Recursive discovery and rewriting of asset references in content trees
//!
//! Content bodies have no fixed schema, so the walk dispatches on the runtime
//! shape of every node. It performs no I/O: each rewritten reference yields a
//! [`PendingDownload`] that the caller must await before the record is
//! considered complete.
//!
//! A string that is exactly one asset URL becomes a descriptor object. URLs
//! embedded in longer text (markdown, HTML) are replaced in place by their
//! local path, and the string stays a string.

use serde_json::{Map, Value};

use crate::assets::{AssetLayout, AssetResolver, PendingDownload};
use crate::error::IngestionError;

/// Shape of one node in a content tree
enum ContentNode<'a> {
    Text(&'a str),
    Scalar,
    Sequence(&'a mut Vec<Value>),
    Keyed(&'a mut Map<String, Value>),
}

impl<'a> ContentNode<'a> {
    fn of(value: &'a mut Value) -> Self {
        match value {
            Value::String(text) => ContentNode::Text(text),
            Value::Null | Value::Bool(_) | Value::Number(_) => ContentNode::Scalar,
            Value::Array(items) => ContentNode::Sequence(items),
            Value::Object(map) => ContentNode::Keyed(map),
        }
    }
}

/// A reference that matched but could not be rewritten
#[derive(Debug)]
pub struct WalkFailure {
    /// JSON pointer of the offending value
    pub pointer: String,
    pub reference: String,
    pub error: IngestionError,
}

/// Everything a walk produced
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub downloads: Vec<PendingDownload>,
    pub failures: Vec<WalkFailure>,
}

#[derive(Debug, Clone)]
pub struct ContentWalker {
    resolver: AssetResolver,
    layout: AssetLayout,
}

impl ContentWalker {
    pub fn new(resolver: AssetResolver, layout: AssetLayout) -> Self {
        Self { resolver, layout }
    }

    /// Rewrites every asset reference under `node` in place
    pub fn walk(&self, node: &mut Value, asset_directory: &str) -> WalkOutcome {
        let mut outcome = WalkOutcome::default();
        self.visit(node, String::new(), asset_directory, &mut outcome);
        outcome
    }

    fn visit(&self, node: &mut Value, pointer: String, directory: &str, outcome: &mut WalkOutcome) {
        let replacement = match ContentNode::of(node) {
            ContentNode::Text(text) => self.rewrite(text, &pointer, directory, outcome),
            ContentNode::Scalar => None,
            ContentNode::Sequence(items) => {
                for (index, item) in items.iter_mut().enumerate() {
                    self.visit(item, format!("{}/{}", pointer, index), directory, outcome);
                }
                None
            }
            ContentNode::Keyed(map) if is_descriptor(map) => None,
            ContentNode::Keyed(map) => {
                for (key, value) in map.iter_mut() {
                    let child = format!("{}/{}", pointer, escape_pointer(key));
                    self.visit(value, child, directory, outcome);
                }
                None
            }
        };

        if let Some(value) = replacement {
            *node = value;
        }
    }

    fn rewrite(
        &self,
        text: &str,
        pointer: &str,
        directory: &str,
        outcome: &mut WalkOutcome,
    ) -> Option<Value> {
        if !self.resolver.is_asset_reference(text) {
            return None;
        }

        let spans = self.resolver.reference_spans(text);
        if let [only] = spans.as_slice() {
            if &text[only.clone()] == text.trim() {
                return self.replace_whole(text, pointer, directory, outcome);
            }
        }

        let mut rewritten = String::with_capacity(text.len());
        let mut cursor = 0;
        let mut changed = false;
        for span in spans {
            let reference = &text[span.clone()];
            match self.layout.plan(reference, directory) {
                Ok(pending) => {
                    rewritten.push_str(&text[cursor..span.start]);
                    rewritten.push_str(&pending.descriptor.path);
                    cursor = span.end;
                    changed = true;
                    outcome.downloads.push(pending);
                }
                Err(error) => outcome.failures.push(WalkFailure {
                    pointer: pointer.to_string(),
                    reference: reference.to_string(),
                    error,
                }),
            }
        }

        if !changed {
            return None;
        }
        rewritten.push_str(&text[cursor..]);
        Some(Value::String(rewritten))
    }

    fn replace_whole(
        &self,
        text: &str,
        pointer: &str,
        directory: &str,
        outcome: &mut WalkOutcome,
    ) -> Option<Value> {
        match self.layout.plan(text, directory) {
            Ok(pending) => {
                let value = pending.descriptor.to_value();
                outcome.downloads.push(pending);
                Some(value)
            }
            Err(error) => {
                outcome.failures.push(WalkFailure {
                    pointer: pointer.to_string(),
                    reference: text.to_string(),
                    error,
                });
                None
            }
        }
    }
}

/// Objects produced by an earlier rewrite are left alone
fn is_descriptor(map: &Map<String, Value>) -> bool {
    map.len() == 3
        && ["url", "filename", "path"]
            .iter()
            .all(|key| map.get(*key).is_some_and(Value::is_string))
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}
