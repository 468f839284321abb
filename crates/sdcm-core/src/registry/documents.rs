//! Registry document shapes.
//!
//! Both shapes keep unknown fields in `extra` so a version section can be
//! re-serialized without losing what the registry sent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatorDocument {
    pub username: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// The model summary embedded in a version document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBrief {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub poi: bool,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDocument {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "sizeKB", default)]
    pub size_kb: f64,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub hashes: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub primary: Option<bool>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileDocument {
    /// Declared SHA-256, uppercased.
    pub fn sha256(&self) -> Option<String> {
        self.hashes
            .as_ref()?
            .iter()
            .find(|(k, v)| k.eq_ignore_ascii_case("sha256") && !v.is_empty())
            .map(|(_, v)| v.to_uppercase())
    }

    /// Size in bytes from the registry's kilobyte figure.
    pub fn size_bytes(&self) -> u64 {
        if self.size_kb.is_finite() && self.size_kb > 0.0 {
            (self.size_kb * 1024.0).round() as u64
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDocument {
    pub url: String,
    #[serde(default)]
    pub nsfw: Option<Value>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub meta: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImageDocument {
    /// Content rating: 0 none, 1 soft, 2 mature, 3 x, -1 unknown.
    ///
    /// Older documents use rating names, newer ones a boolean.
    pub fn nsfw_level(&self) -> i32 {
        match &self.nsfw {
            Some(Value::String(s)) => match s.to_lowercase().as_str() {
                "none" => 0,
                "soft" => 1,
                "mature" => 2,
                "x" => 3,
                _ => -1,
            },
            Some(Value::Bool(b)) => i32::from(*b),
            Some(Value::Number(n)) => n.as_i64().map(|n| n as i32).unwrap_or(-1),
            _ => -1,
        }
    }

    /// Key that identifies the image within its version.
    pub fn blur_key(&self) -> String {
        match &self.hash {
            Some(hash) if !hash.is_empty() => hash.clone(),
            _ => self.url.clone(),
        }
    }
}

/// A model-version document, as served by the version endpoints and stored
/// in `.civitai.info` descriptors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDocument {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub model_id: Option<i64>,
    #[serde(default)]
    pub model: Option<ModelBrief>,
    #[serde(default)]
    pub base_model: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub trained_words: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileDocument>,
    #[serde(default)]
    pub images: Vec<ImageDocument>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VersionDocument {
    /// Activation prompts: every entry split on commas and trimmed, empty
    /// fragments dropped.
    pub fn prompts(&self) -> Vec<String> {
        normalize_prompts(&self.trained_words)
    }
}

/// A full model document with every version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDocument {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub poi: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub creator: Option<CreatorDocument>,
    #[serde(default)]
    pub model_versions: Vec<VersionDocument>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub fn normalize_prompts<S: AsRef<str>>(words: &[S]) -> Vec<String> {
    words
        .iter()
        .flat_map(|w| w.as_ref().split(','))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prompts() {
        let words = vec!["masterpiece, best quality".to_string(), " ,lineart ".to_string()];
        assert_eq!(
            normalize_prompts(&words),
            vec!["masterpiece", "best quality", "lineart"]
        );
    }

    #[test]
    fn test_file_document_fields() {
        let doc: FileDocument = serde_json::from_str(
            r#"{"id": 5, "name": "a.safetensors", "sizeKB": 1.5, "type": "Model",
                "hashes": {"AutoV2": "ABC", "SHA256": "deadbeef"}, "primary": true,
                "pickleScanResult": "Success"}"#,
        )
        .unwrap();
        assert_eq!(doc.sha256().as_deref(), Some("DEADBEEF"));
        assert_eq!(doc.size_bytes(), 1536);
        assert_eq!(doc.extra["pickleScanResult"], "Success");
    }

    #[test]
    fn test_nsfw_levels() {
        let image = |nsfw: Value| ImageDocument {
            url: "u".into(),
            nsfw: Some(nsfw),
            width: None,
            height: None,
            hash: None,
            meta: None,
            extra: Map::new(),
        };
        assert_eq!(image(Value::from("Mature")).nsfw_level(), 2);
        assert_eq!(image(Value::from("X")).nsfw_level(), 3);
        assert_eq!(image(Value::from(false)).nsfw_level(), 0);
        assert_eq!(image(Value::from("weird")).nsfw_level(), -1);
    }

    #[test]
    fn test_version_round_trip_keeps_unknown_fields() {
        let raw = r#"{"id": 1, "name": "v1", "modelId": 2, "stats": {"downloadCount": 3}}"#;
        let doc: VersionDocument = serde_json::from_str(raw).unwrap();
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["stats"]["downloadCount"], 3);
        assert_eq!(value["modelId"], 2);
    }
}
