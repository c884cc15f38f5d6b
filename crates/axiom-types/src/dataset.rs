//! Dataset resource models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named container of events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// Unique ID, used in URLs. Equal to the name for most datasets.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// ID of the user that created the dataset.
    #[serde(rename = "who", default)]
    pub created_by: String,
    #[serde(rename = "created")]
    pub created_at: DateTime<Utc>,
}

/// Body of a dataset creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetCreateRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl DatasetCreateRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Body of a dataset update request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetUpdateRequest {
    pub description: String,
}

/// Body of a dataset trim request.
///
/// Trimming deletes blocks older than the given duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimRequest {
    /// Maximum age to keep, as a duration string such as `"1h"` or `"30d"`.
    pub max_duration: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dataset_uses_server_field_names() {
        let ds: Dataset = serde_json::from_value(json!({
            "id": "test",
            "name": "test",
            "description": "This is a test description",
            "who": "f83e245a-afdc-47ad-a765-4addd1994321",
            "created": "2020-11-17T22:29:00.521238198Z"
        }))
        .unwrap();
        assert_eq!(ds.created_by, "f83e245a-afdc-47ad-a765-4addd1994321");
        assert_eq!(ds.created_at.to_rfc3339(), "2020-11-17T22:29:00.521238198+00:00");
    }

    #[test]
    fn create_request_omits_empty_description() {
        let req = DatasetCreateRequest::new("logs");
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({"name": "logs"}));
        let req = req.with_description("app logs");
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"name": "logs", "description": "app logs"})
        );
    }
}
