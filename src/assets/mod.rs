//! Remote asset references and their local materialization
//!
//! - [`AssetResolver`] recognizes asset URLs by host path segment
//! - [`AssetLayout`] maps a URL to its descriptor and on-disk target
//! - [`AssetMaterializer`] walks a story's content, rewrites references and
//!   waits for the resulting downloads

pub mod downloader;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::ops::Range;
use std::path::PathBuf;
use tracing::{info, warn};
use url::Url;

use crate::error::{IngestionError, Result};
use crate::normalize::NormalizedRecord;
use crate::walker::ContentWalker;

pub use downloader::{
    AssetDownloader, AssetFetcher, AssetFs, ByteStream, DownloadOutcome, DownloadSummary,
    HttpAssetFetcher, TokioFs,
};

const HASH_DIR_LEN: usize = 12;

/// Decides whether a string points at a CMS-hosted asset
#[derive(Debug, Clone)]
pub struct AssetResolver {
    hosts: Vec<String>,
}

impl AssetResolver {
    /// `hosts` are protocol-relative path prefixes such as `//a.storyblok.com/f/`
    pub fn new(hosts: Vec<String>) -> Self {
        Self { hosts }
    }

    pub fn is_asset_reference(&self, value: &str) -> bool {
        self.hosts.iter().any(|host| value.contains(host.as_str()))
    }

    /// Byte ranges of every asset URL inside `text`, in order
    ///
    /// A URL starts at its host (or the `http:`/`https:` right before it) and
    /// runs to the next whitespace, quote or bracket. Trailing sentence
    /// punctuation is not part of it.
    pub fn reference_spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans: Vec<Range<usize>> = self
            .hosts
            .iter()
            .flat_map(|host| text.match_indices(host.as_str()).map(|(index, _)| index))
            .map(|index| {
                let before = &text[..index];
                let start = if before.ends_with("https:") {
                    index - "https:".len()
                } else if before.ends_with("http:") {
                    index - "http:".len()
                } else {
                    index
                };

                let end = text[index..]
                    .find(|c: char| c.is_whitespace() || URL_TERMINATORS.contains(&c))
                    .map_or(text.len(), |offset| index + offset);
                let end = start + text[start..end].trim_end_matches(TRAILING_PUNCTUATION).len();

                start..end
            })
            .collect();

        spans.sort_by_key(|span| span.start);
        let mut kept: Vec<Range<usize>> = Vec::with_capacity(spans.len());
        for span in spans {
            if kept.last().is_some_and(|last| span.start < last.end) {
                continue;
            }
            kept.push(span);
        }
        kept
    }
}

const URL_TERMINATORS: [char; 8] = ['"', '\'', '(', ')', '<', '>', '[', ']'];

const TRAILING_PUNCTUATION: [char; 6] = ['.', ',', ';', ':', '!', '?'];

impl Default for AssetResolver {
    fn default() -> Self {
        Self::new(vec![
            "//a.storyblok.com/f/".to_string(),
            "//a-us.storyblok.com/f/".to_string(),
        ])
    }
}

/// Replacement for an asset URL inside a content tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// Reference as found in the content
    pub url: String,
    /// Last path segment of the URL
    pub filename: String,
    /// Location relative to the asset root, `/`-separated
    pub path: String,
}

impl AssetDescriptor {
    pub fn to_value(&self) -> Value {
        json!({
            "url": self.url,
            "filename": self.filename,
            "path": self.path,
        })
    }
}

/// How local file names are derived from asset URLs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetNaming {
    /// `{dir}/{url-hash}/{filename}`: distinct URLs never share a target
    #[default]
    HashQualified,
    /// `{dir}/{filename}`: same-named assets overwrite each other
    Basename,
}

/// One download the content walk asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDownload {
    pub descriptor: AssetDescriptor,
    /// URL actually requested (`https:` applied to protocol-relative refs)
    pub source_url: String,
    /// Absolute or root-relative file to write
    pub target: PathBuf,
}

/// Maps asset URLs to local paths under one root
#[derive(Debug, Clone)]
pub struct AssetLayout {
    root: PathBuf,
    naming: AssetNaming,
}

impl AssetLayout {
    pub fn new(root: impl Into<PathBuf>, naming: AssetNaming) -> Self {
        Self {
            root: root.into(),
            naming,
        }
    }

    /// Computes descriptor and target file for `reference` in `directory`
    pub fn plan(&self, reference: &str, directory: &str) -> Result<PendingDownload> {
        let source_url = normalize_url(reference);
        let filename = filename_of(&source_url)?;

        let mut segments: Vec<String> = directory
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if self.naming == AssetNaming::HashQualified {
            segments.push(url_hash(&source_url));
        }
        segments.push(filename.clone());

        let target = segments
            .iter()
            .fold(self.root.clone(), |path, segment| path.join(segment));

        Ok(PendingDownload {
            descriptor: AssetDescriptor {
                url: reference.to_string(),
                filename,
                path: segments.join("/"),
            },
            source_url,
            target,
        })
    }
}

/// Applies `https:` to protocol-relative references
pub fn normalize_url(reference: &str) -> String {
    let trimmed = reference.trim();
    if trimmed.starts_with("//") {
        format!("https:{}", trimmed)
    } else {
        trimmed.to_string()
    }
}

fn filename_of(url: &str) -> Result<String> {
    let parsed = Url::parse(url)
        .map_err(|e| IngestionError::AssetError(format!("unparseable asset URL {}: {}", url, e)))?;

    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| IngestionError::AssetError(format!("asset URL has no file name: {}", url)))
}

/// Short SHA-256 prefix of the URL, used as a collision-free directory
pub fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..HASH_DIR_LEN].to_string()
}

/// Per-record asset outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetReport {
    pub rewritten: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Rewrites and downloads the assets of story records
pub struct AssetMaterializer {
    walker: ContentWalker,
    downloader: AssetDownloader,
    directory: String,
}

impl AssetMaterializer {
    pub fn new(walker: ContentWalker, downloader: AssetDownloader, directory: impl Into<String>) -> Self {
        Self {
            walker,
            downloader,
            directory: directory.into(),
        }
    }

    /// Rewrites asset references in `record.content` and awaits every download
    ///
    /// Failures are logged and counted; rewrites already made stay in place
    /// even when their download fails.
    pub async fn materialize(&self, record: &mut NormalizedRecord) -> AssetReport {
        let record_id = record.id().to_string();
        let name = record
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let Some(content) = record.fields_mut().get_mut("content") else {
            return AssetReport::default();
        };

        info!(story = %name, id = %record_id, "Searching story content for assets");
        let outcome = self.walker.walk(content, &self.directory);

        for failure in &outcome.failures {
            warn!(
                id = %record_id,
                pointer = %failure.pointer,
                error = %failure.error,
                "Could not rewrite asset reference"
            );
        }

        let summary = self.downloader.download_all(&outcome.downloads).await;
        for (url, error) in &summary.failures {
            warn!(id = %record_id, url = %url, error = %error, "Asset download failed");
        }

        AssetReport {
            rewritten: outcome.downloads.len(),
            downloaded: summary.downloaded,
            skipped: summary.skipped,
            failed: summary.failures.len() + outcome.failures.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_resolver_matches_known_hosts() {
        let resolver = AssetResolver::default();

        assert!(resolver.is_asset_reference("//a.storyblok.com/f/123/x.png"));
        assert!(resolver.is_asset_reference("https://a.storyblok.com/f/123/x.png"));
        assert!(resolver.is_asset_reference("https://a-us.storyblok.com/f/9/y.jpg"));
        assert!(!resolver.is_asset_reference("https://example.com/f/123/x.png"));
        assert!(!resolver.is_asset_reference("not an asset"));
    }

    #[test]
    fn test_reference_spans_inside_prose() {
        let resolver = AssetResolver::default();
        let text = "See ![hero](//a.storyblok.com/f/1/x.png) and https://a-us.storyblok.com/f/2/y.jpg.";

        let found: Vec<&str> = resolver
            .reference_spans(text)
            .into_iter()
            .map(|span| &text[span])
            .collect();

        assert_eq!(
            found,
            vec!["//a.storyblok.com/f/1/x.png", "https://a-us.storyblok.com/f/2/y.jpg"]
        );
    }

    #[test]
    fn test_reference_spans_whole_value_and_none() {
        let resolver = AssetResolver::default();
        let whole = "https://a.storyblok.com/f/1/x.png";

        assert_eq!(resolver.reference_spans(whole), vec![0..whole.len()]);
        assert!(resolver.reference_spans("no assets here").is_empty());
    }

    #[test]
    fn test_plan_basename_layout() {
        let layout = AssetLayout::new("/srv/site", AssetNaming::Basename);

        let plan = layout.plan("//a.storyblok.com/f/123/x.png", "images").unwrap();

        assert_eq!(plan.descriptor.url, "//a.storyblok.com/f/123/x.png");
        assert_eq!(plan.descriptor.filename, "x.png");
        assert_eq!(plan.descriptor.path, "images/x.png");
        assert_eq!(plan.source_url, "https://a.storyblok.com/f/123/x.png");
        assert_eq!(plan.target, Path::new("/srv/site/images/x.png"));
    }

    #[test]
    fn test_hash_qualified_layout_separates_same_basename() {
        let layout = AssetLayout::new("root", AssetNaming::HashQualified);

        let a = layout.plan("//a.storyblok.com/f/1/logo.png", "assets").unwrap();
        let b = layout.plan("//a.storyblok.com/f/2/logo.png", "assets").unwrap();

        assert_eq!(a.descriptor.filename, "logo.png");
        assert_eq!(b.descriptor.filename, "logo.png");
        assert_ne!(a.target, b.target);
        assert!(a.descriptor.path.starts_with("assets/"));
        assert!(a.descriptor.path.ends_with("/logo.png"));

        // deterministic across calls
        let again = layout.plan("//a.storyblok.com/f/1/logo.png", "assets").unwrap();
        assert_eq!(again.target, a.target);
    }

    #[test]
    fn test_plan_rejects_url_without_filename() {
        let layout = AssetLayout::new("root", AssetNaming::Basename);
        assert!(layout.plan("//a.storyblok.com/f/123/", "assets").is_err());
    }

    #[test]
    fn test_url_hash_length() {
        assert_eq!(url_hash("https://a.storyblok.com/f/1/x.png").len(), HASH_DIR_LEN);
    }
}
