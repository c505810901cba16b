//! Upload requests as fetched from the store, and parsing of their
//! loosely-typed `portals` and `other_data` fields.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RequestError;

/// Lifecycle of an upload row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadStatus {
    Pending,
    Processing,
    Completed,
    Partial,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "Pending",
            UploadStatus::Processing => "Processing",
            UploadStatus::Completed => "Completed",
            UploadStatus::Partial => "Partial",
            UploadStatus::Failed => "Failed",
        }
    }

    /// Whether this status is one the loop never moves away from.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Partial | UploadStatus::Failed
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(UploadStatus::Pending),
            "Processing" => Ok(UploadStatus::Processing),
            "Completed" => Ok(UploadStatus::Completed),
            "Partial" => Ok(UploadStatus::Partial),
            "Failed" => Ok(UploadStatus::Failed),
            other => Err(RequestError::UnknownStatus(other.to_string())),
        }
    }
}

/// One pending upload.
///
/// `portals` and `other_data` are kept as raw JSON values: the store may
/// hand them over either as JSON-encoded strings or as parsed structures.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub id: i64,
    /// Base64-encoded census workbook.
    pub census_file: String,
    pub portals: Value,
    pub other_data: Value,
    pub status: UploadStatus,
}

impl UploadRequest {
    pub fn portal_names(&self) -> Result<Vec<String>, RequestError> {
        parse_portals(&self.portals)
    }

    pub fn auxiliary_data(&self) -> Result<AuxiliaryData, RequestError> {
        parse_other_data(&self.other_data)
    }
}

/// Parses the requested portal list, preserving order and duplicates.
pub fn parse_portals(value: &Value) -> Result<Vec<String>, RequestError> {
    match value {
        Value::Null => Err(RequestError::MissingPortals),
        Value::String(raw) => {
            let parsed: Value = serde_json::from_str(raw).map_err(RequestError::PortalsJson)?;
            match parsed {
                Value::String(_) => Err(RequestError::PortalsShape("a string".to_string())),
                other => parse_portals(&other),
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(name) => Ok(name.clone()),
                other => Err(RequestError::PortalsShape(format!(
                    "an array containing {}",
                    json_kind(other)
                ))),
            })
            .collect(),
        other => Err(RequestError::PortalsShape(json_kind(other).to_string())),
    }
}

/// Parses the auxiliary data map. Null and blank strings are an empty map.
pub fn parse_other_data(value: &Value) -> Result<AuxiliaryData, RequestError> {
    match value {
        Value::Null => Ok(AuxiliaryData::default()),
        Value::String(raw) if raw.trim().is_empty() => Ok(AuxiliaryData::default()),
        Value::String(raw) => {
            let parsed: Value =
                serde_json::from_str(raw).map_err(RequestError::OtherDataJson)?;
            match parsed {
                Value::Object(map) => Ok(AuxiliaryData(map)),
                Value::Null => Ok(AuxiliaryData::default()),
                other => Err(RequestError::OtherDataShape(json_kind(&other).to_string())),
            }
        }
        Value::Object(map) => Ok(AuxiliaryData(map.clone())),
        other => Err(RequestError::OtherDataShape(json_kind(other).to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Key names under which the effective date has been observed, in lookup order.
pub const EFFECTIVE_DATE_KEYS: &[&str] = &[
    "Effective from",
    "effective_from",
    "effective_date",
    "effectiveFrom",
];

/// Open-ended auxiliary fields attached to an upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuxiliaryData(Map<String, Value>);

impl AuxiliaryData {
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Returns the effective date, trying every known key alias in order.
    /// Blank and null values are skipped; numbers are rendered as text.
    pub fn effective_date(&self) -> Option<String> {
        EFFECTIVE_DATE_KEYS
            .iter()
            .filter_map(|key| self.0.get(*key))
            .find_map(|value| match value {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }
}
