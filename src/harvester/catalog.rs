//! Catalog endpoints and response envelopes
//!
//! The detail endpoint wraps each document in an envelope keyed by the
//! identifier: `{"<id>": {"success": bool, "data": {...}}}`. The review
//! endpoint returns pages of `{"success": 1, "reviews": [...], "cursor": "..."}`
//! chained through an opaque cursor that starts at `*`.

use crate::config::{CatalogConfig, APPID_PLACEHOLDER};
use serde_json::Value;
use url::Url;

/// Cursor that requests the first review page
pub const FIRST_REVIEW_CURSOR: &str = "*";

/// Largest page the review endpoint serves
pub const MAX_REVIEWS_PER_PAGE: usize = 100;

/// Resolved endpoint templates
#[derive(Debug, Clone)]
pub struct CatalogEndpoints {
    list_url: String,
    details_template: String,
    reviews_template: String,
    review_filter: String,
}

impl CatalogEndpoints {
    pub fn from_config(config: &CatalogConfig) -> Self {
        Self {
            list_url: config.list_url.clone(),
            details_template: config.details_url.clone(),
            reviews_template: config.reviews_url.clone(),
            review_filter: config.review_filter.clone(),
        }
    }

    pub fn list_url(&self) -> &str {
        &self.list_url
    }

    pub fn detail_url(&self, appid: u64) -> String {
        self.details_template
            .replace(APPID_PLACEHOLDER, &appid.to_string())
    }

    /// URL for one review page
    ///
    /// Query parameters are appended to whatever the template already has.
    pub fn review_page_url(&self, appid: u64, cursor: &str, per_page: usize) -> String {
        let base = self
            .reviews_template
            .replace(APPID_PLACEHOLDER, &appid.to_string());

        match Url::parse(&base) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .append_pair("json", "1")
                    .append_pair("purchase_type", "all")
                    .append_pair("num_per_page", &per_page.to_string())
                    .append_pair("cursor", cursor)
                    .append_pair("filter", &self.review_filter);
                url.to_string()
            }
            // Templates are validated at load time; keep the raw string otherwise
            Err(_) => base,
        }
    }
}

/// Outcome of opening a detail envelope
#[derive(Debug, Clone, PartialEq)]
pub enum DetailEnvelope<'a> {
    /// The catalog served the document
    Available(&'a Value),

    /// The catalog answered but reported no document for this identifier
    Unavailable,

    /// The payload is not a detail envelope
    Malformed(String),
}

/// Opens the `{"<id>": {"success", "data"}}` envelope
pub fn open_detail_envelope(payload: &Value, appid: u64) -> DetailEnvelope<'_> {
    let Some(entry) = payload.get(appid.to_string()) else {
        return DetailEnvelope::Malformed(format!("no entry for {}", appid));
    };

    match entry.get("success").and_then(Value::as_bool) {
        Some(true) => match entry.get("data") {
            Some(data) if data.is_object() => DetailEnvelope::Available(data),
            _ => DetailEnvelope::Malformed("success without a data object".to_string()),
        },
        Some(false) => DetailEnvelope::Unavailable,
        None => DetailEnvelope::Malformed("missing success flag".to_string()),
    }
}

/// One parsed review page
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewPage {
    pub reviews: Vec<Value>,
    pub cursor: Option<String>,
}

impl ReviewPage {
    /// Parses a review page; `None` if the page reports failure
    pub fn parse(payload: &Value) -> Option<Self> {
        let success = match payload.get("success") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            _ => false,
        };
        if !success {
            return None;
        }

        let reviews = payload
            .get("reviews")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let cursor = payload
            .get("cursor")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        Some(Self { reviews, cursor })
    }
}
