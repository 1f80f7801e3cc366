//! Request and response messages exchanged with the remote store.

use crate::directive::ActionResponse;
use crate::error::{ProtocolError, ProtocolResult};
use crate::record::{Map, Value};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Search filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Domain expression.
    #[serde(rename = "_domain", default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Context used to evaluate the domain.
    #[serde(
        rename = "_domainContext",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub domain_context: Option<Map>,
    /// Include archived records.
    #[serde(rename = "_archived", default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    /// Additional criteria.
    #[serde(flatten)]
    pub criteria: Map,
}

/// Search request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// Offset of the first record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    /// Maximum number of records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Sort fields (`name`, `-name`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort_by: Vec<String>,
    /// Fields to fetch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    /// Filter.
    #[serde(rename = "data", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<SearchFilter>,
    /// Translate values.
    #[serde(default)]
    pub translate: bool,
}

/// Search response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Matching records.
    #[serde(default)]
    pub data: Vec<Map>,
    /// Offset of the first returned record.
    #[serde(default)]
    pub offset: u64,
    /// Total number of matching records.
    #[serde(default)]
    pub total: u64,
}

/// Options for reading a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Fields to fetch. Empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    /// Related fields to fetch per relation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub related: BTreeMap<String, Vec<String>>,
}

impl ReadOptions {
    /// Creates options restricted to the given fields.
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            related: BTreeMap::new(),
        }
    }

    /// Adds a related-field set.
    pub fn with_related<I, S>(mut self, relation: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related
            .insert(relation.into(), fields.into_iter().map(Into::into).collect());
        self
    }
}

/// Identity of a record for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Record id.
    pub id: i64,
    /// Expected version.
    pub version: i64,
}

/// A write or action request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PostRequest {
    /// Fetch one record.
    Fetch {
        /// Record id.
        id: i64,
        /// Read options.
        options: ReadOptions,
    },
    /// Create or update records.
    Save {
        /// Records to write.
        records: Vec<Map>,
        /// Read options for the returned records.
        options: ReadOptions,
    },
    /// Delete records.
    Remove {
        /// Records to delete.
        records: Vec<RecordKey>,
    },
    /// Fetch an unsaved copy of a record.
    Copy {
        /// Record id.
        id: i64,
    },
    /// Export the records matching a search.
    Export {
        /// Search to export.
        request: SearchRequest,
    },
    /// Check that a record version is still current.
    Verify {
        /// Record values.
        record: Map,
    },
    /// Run a named remote action.
    Action {
        /// Action name.
        action: String,
        /// Model name.
        model: String,
        /// Action context.
        context: Map,
    },
}

impl PostRequest {
    /// Returns a short name used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            PostRequest::Fetch { .. } => "fetch",
            PostRequest::Save { .. } => "save",
            PostRequest::Remove { .. } => "remove",
            PostRequest::Copy { .. } => "copy",
            PostRequest::Export { .. } => "export",
            PostRequest::Verify { .. } => "verify",
            PostRequest::Action { .. } => "action",
        }
    }
}

/// Response to a [`PostRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostResponse {
    /// Records or directive sets.
    #[serde(default)]
    pub data: Vec<Value>,
    /// Per-field error messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, String>>,
}

impl PostResponse {
    /// Creates a response carrying records.
    pub fn records(records: impl IntoIterator<Item = Map>) -> Self {
        Self {
            data: records.into_iter().map(Value::Object).collect(),
            errors: None,
        }
    }

    /// Returns the object entries of `data` as record maps.
    pub fn into_records(self) -> Vec<Map> {
        self.data
            .into_iter()
            .filter_map(|value| match value {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect()
    }

    /// Returns the first record of `data`.
    pub fn first_record(self) -> Option<Map> {
        self.into_records().into_iter().next()
    }

    /// Decodes `data` as an action response.
    pub fn into_action_response(self) -> ProtocolResult<ActionResponse> {
        ActionResponse::from_values(self.data)
    }

    /// Decodes the first entry of `data` as an export result.
    pub fn into_export_result(self) -> ProtocolResult<ExportResult> {
        let first = self
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProtocolError::invalid_payload("empty export response"))?;
        Ok(serde_json::from_value(first)?)
    }
}

/// Binary upload request.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    /// Record values sent along the file.
    pub record: Map,
    /// Field receiving the file.
    pub field: String,
    /// Original file name.
    pub file_name: String,
    /// File content.
    pub content: Bytes,
}

/// Result of an export request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    /// Number of exported records.
    pub export_size: u64,
    /// Name of the produced file.
    pub file_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn search_request_wire_shape() {
        let request = SearchRequest {
            offset: Some(0),
            limit: Some(40),
            sort_by: vec!["-name".into()],
            fields: vec![],
            filter: Some(SearchFilter {
                domain: Some("self.active = true".into()),
                ..SearchFilter::default()
            }),
            translate: false,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["sortBy"], json!(["-name"]));
        assert_eq!(value["data"]["_domain"], json!("self.active = true"));
        assert!(value.get("fields").is_none());
    }

    #[test]
    fn post_response_records() {
        let response: PostResponse =
            serde_json::from_value(json!({"data": [{"id": 1}, 3, {"id": 2}]})).unwrap();
        let records = response.into_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["id"], json!(2));
    }

    #[test]
    fn export_result_decoding() {
        let response = PostResponse {
            data: vec![json!({"exportSize": 12, "fileName": "contacts.csv"})],
            errors: None,
        };
        let result = response.into_export_result().unwrap();
        assert_eq!(result.export_size, 12);
        assert_eq!(result.file_name, "contacts.csv");

        assert!(PostResponse::default().into_export_result().is_err());
    }

    #[test]
    fn read_options_builder() {
        let options = ReadOptions::fields(["name", "lines"]).with_related("lines", ["qty"]);
        assert_eq!(options.fields, vec!["name", "lines"]);
        assert_eq!(options.related["lines"], vec!["qty"]);
    }
}
