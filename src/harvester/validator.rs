//! Classification of fetched detail documents

use crate::config::CatalogConfig;
use crate::harvester::catalog::{open_detail_envelope, DetailEnvelope};
use serde_json::{Map, Value};
use std::fmt;

/// Why a candidate does not count toward the quota
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The catalog has no document for this identifier
    Unavailable,

    /// The document's type is not accepted (e.g. "dlc", "demo")
    WrongType(String),

    /// No usable name
    MissingName,

    /// Carries an excluded category
    ExcludedCategory(i64),

    /// The payload could not be interpreted
    Malformed(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::WrongType(t) => write!(f, "type '{}'", t),
            Self::MissingName => write!(f, "missing name"),
            Self::ExcludedCategory(id) => write!(f, "excluded category {}", id),
            Self::Malformed(reason) => write!(f, "malformed: {}", reason),
        }
    }
}

/// A valid game ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct GameRecord {
    pub appid: u64,

    /// The detail document with an `appid` field added
    pub document: Value,
}

/// Classification result
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Valid(GameRecord),
    Rejected(Rejection),
}

/// Decides whether a fetched payload is a valid game
///
/// Pure: the same payload always gets the same verdict.
#[derive(Debug, Clone)]
pub struct Validator {
    accepted_types: Vec<String>,
    excluded_category_ids: Vec<i64>,
}

impl Validator {
    pub fn new(accepted_types: Vec<String>, excluded_category_ids: Vec<i64>) -> Self {
        Self {
            accepted_types,
            excluded_category_ids,
        }
    }

    pub fn from_config(config: &CatalogConfig) -> Self {
        Self::new(
            config.accepted_types.clone(),
            config.excluded_category_ids.clone(),
        )
    }

    /// Classifies the detail payload fetched for `appid`
    pub fn classify(&self, appid: u64, payload: &Value) -> Verdict {
        let data = match open_detail_envelope(payload, appid) {
            DetailEnvelope::Available(data) => data,
            DetailEnvelope::Unavailable => return Verdict::Rejected(Rejection::Unavailable),
            DetailEnvelope::Malformed(reason) => {
                return Verdict::Rejected(Rejection::Malformed(reason))
            }
        };

        let Some(fields) = data.as_object() else {
            return Verdict::Rejected(Rejection::Malformed("data is not an object".to_string()));
        };

        if let Err(rejection) = self.check(fields) {
            return Verdict::Rejected(rejection);
        }

        let mut document = fields.clone();
        document.insert("appid".to_string(), Value::from(appid));

        Verdict::Valid(GameRecord {
            appid,
            document: Value::Object(document),
        })
    }

    fn check(&self, fields: &Map<String, Value>) -> Result<(), Rejection> {
        let kind = fields.get("type").and_then(Value::as_str).unwrap_or("");
        if !self.accepted_types.iter().any(|t| t == kind) {
            return Err(Rejection::WrongType(kind.to_string()));
        }

        let has_name = fields
            .get("name")
            .and_then(Value::as_str)
            .map(|n| !n.trim().is_empty())
            .unwrap_or(false);
        if !has_name {
            return Err(Rejection::MissingName);
        }

        let categories = fields
            .get("categories")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        for category in categories {
            if let Some(id) = category.get("id").and_then(Value::as_i64) {
                if self.excluded_category_ids.contains(&id) {
                    return Err(Rejection::ExcludedCategory(id));
                }
            }
        }

        Ok(())
    }
}
