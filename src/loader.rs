//! Exhaustive page-by-page loading of one CMS collection

use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::error::{IngestionError, Result};
use crate::metrics;
use crate::params::{RequestParams, LANGUAGE, PAGE};
use crate::sources::CmsTransport;

/// Opaque remote entry
pub type RawRecord = Map<String, Value>;

/// One listing response
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<RawRecord>,
    pub total: Option<u64>,
}

/// Number of pages needed for `total` entries at `per_page` entries each
pub fn last_page(total: u64, per_page: u64) -> u64 {
    if per_page == 0 {
        return 0;
    }
    total.div_ceil(per_page)
}

/// Fetches every page of a listing endpoint, strictly in page order
pub struct PaginatedLoader<'a> {
    transport: &'a dyn CmsTransport,
}

impl<'a> PaginatedLoader<'a> {
    pub fn new(transport: &'a dyn CmsTransport) -> Self {
        Self { transport }
    }

    /// Loads the whole `cdn/{kind}` collection
    ///
    /// `params` must carry a positive `per_page`; the same value is sent with
    /// every page so the page count derived from page 1 stays valid. Pages are
    /// requested one after another and any failure aborts the load.
    #[instrument(skip(self, params))]
    pub async fn load_all(
        &self,
        kind: &str,
        params: &RequestParams,
        locale: Option<&str>,
    ) -> Result<Vec<RawRecord>> {
        let per_page = params.per_page()?;

        let first = self.load_page(kind, 1, params, locale).await?;
        let total = first.total.unwrap_or(0);
        let last = last_page(total, per_page);

        let mut all = first.items;
        let mut page = 1;
        while page < last {
            page += 1;
            debug!(kind = %kind, page, last_page = last, "Fetching next page");
            let next = self.load_page(kind, page, params, locale).await?;
            all.extend(next.items);
        }

        info!(
            kind = %kind,
            total,
            pages = last.max(1),
            loaded = all.len(),
            "Loaded collection"
        );

        Ok(all)
    }

    /// Fetches a single page
    pub async fn load_page(
        &self,
        kind: &str,
        page: u64,
        params: &RequestParams,
        locale: Option<&str>,
    ) -> Result<Page> {
        let mut request = params.clone().with(PAGE, page);
        if let Some(locale) = locale.filter(|l| !l.is_empty()) {
            request.insert(LANGUAGE, locale);
        }

        let path = format!("cdn/{}", kind);
        let response = self.transport.get(&path, &request).await?;
        metrics::record_page_fetched(kind);

        let items = extract_items(&path, kind, response.data)?;
        Ok(Page {
            items,
            total: response.total,
        })
    }
}

/// Pulls the entries of `kind` out of a listing body
///
/// Most collections arrive as an array; some (`links`) are keyed by id, in
/// which case the values are taken in body order.
fn extract_items(endpoint: &str, kind: &str, mut data: Value) -> Result<Vec<RawRecord>> {
    let invalid = |reason: String| IngestionError::InvalidResponse {
        endpoint: endpoint.to_string(),
        reason,
    };

    let collection = data
        .get_mut(kind)
        .map(Value::take)
        .ok_or_else(|| invalid(format!("missing `{}` field", kind)))?;

    let entries: Vec<Value> = match collection {
        Value::Array(items) => items,
        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        Value::Null => Vec::new(),
        other => return Err(invalid(format!("`{}` is not a collection: {}", kind, other))),
    };

    entries
        .into_iter()
        .map(|entry| match entry {
            Value::Object(record) => Ok(record),
            other => Err(invalid(format!("entry is not an object: {}", other))),
        })
        .collect()
}
