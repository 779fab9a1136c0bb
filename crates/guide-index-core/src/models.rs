//! Core data models for descriptors, descriptor sets and retrieval results.
//!
//! A descriptor's wire properties are a flat record: `pdf_name` plus exactly
//! one of `text` (text modality) or `image_index` (image modality). The
//! [`Content`] enum makes the "exactly one" rule structural.

use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::store::StoreError;

/// Search engine every descriptor set is created with.
pub const ENGINE_FLAT: &str = "Flat";

/// Distance metric every descriptor set is created with (inner product).
///
/// Scores returned under this metric are similarities: higher is closer.
pub const METRIC_IP: &str = "IP";

/// Origin of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
        }
    }
}

/// Modality-specific payload of a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// A cleaned heading string.
    Text { text: String },
    /// Position of an extracted image within its document (after filtering).
    Image { image_index: u32 },
}

impl Content {
    pub fn modality(&self) -> Modality {
        match self {
            Content::Text { .. } => Modality::Text,
            Content::Image { .. } => Modality::Image,
        }
    }
}

/// Metadata persisted alongside an embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorMetadata {
    /// Source document name (PDF file stem).
    pub pdf_name: String,
    pub content: Content,
}

impl DescriptorMetadata {
    pub fn text(pdf_name: &str, text: &str) -> Self {
        Self {
            pdf_name: pdf_name.to_string(),
            content: Content::Text {
                text: text.to_string(),
            },
        }
    }

    pub fn image(pdf_name: &str, image_index: u32) -> Self {
        Self {
            pdf_name: pdf_name.to_string(),
            content: Content::Image { image_index },
        }
    }

    pub fn modality(&self) -> Modality {
        self.content.modality()
    }

    /// Flat property record as stored by the vector service.
    pub fn to_properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("pdf_name".to_string(), Value::from(self.pdf_name.clone()));
        match &self.content {
            Content::Text { text } => {
                props.insert("text".to_string(), Value::from(text.clone()));
            }
            Content::Image { image_index } => {
                props.insert("image_index".to_string(), Value::from(*image_index));
            }
        }
        props
    }

    /// Parse a property record returned by the vector service.
    ///
    /// Unknown keys (e.g. `_distance`, `_label`) are ignored. Exactly one of
    /// `text` / `image_index` must be present.
    pub fn from_properties(props: &Map<String, Value>) -> Result<Self, StoreError> {
        let pdf_name = props
            .get("pdf_name")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::InvalidMetadata("missing pdf_name".to_string()))?
            .to_string();

        let text = props.get("text").and_then(Value::as_str);
        let image_index = props.get("image_index").and_then(Value::as_u64);

        let content = match (text, image_index) {
            (Some(text), None) => Content::Text {
                text: text.to_string(),
            },
            (None, Some(index)) => Content::Image {
                image_index: u32::try_from(index).map_err(|_| {
                    StoreError::InvalidMetadata(format!("image_index out of range: {}", index))
                })?,
            },
            (Some(_), Some(_)) => {
                return Err(StoreError::InvalidMetadata(format!(
                    "descriptor for '{}' has both text and image_index",
                    pdf_name
                )))
            }
            (None, None) => {
                return Err(StoreError::InvalidMetadata(format!(
                    "descriptor for '{}' has neither text nor image_index",
                    pdf_name
                )))
            }
        };

        Ok(Self { pdf_name, content })
    }
}

/// Declared schema of a descriptor set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetSpec {
    pub name: String,
    pub dimensions: usize,
}

impl SetSpec {
    pub fn new(name: impl Into<String>, dimensions: usize) -> Self {
        Self {
            name: name.into(),
            dimensions,
        }
    }
}

/// What a store reports about an existing descriptor set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetInfo {
    pub name: String,
    pub dimensions: usize,
    pub engine: String,
    pub metric: String,
    /// Number of stored descriptors, when the backend can report it cheaply.
    pub count: Option<u64>,
}

/// One k-NN candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Inner product between the query and the stored embedding.
    /// Both are unit-length, so this is cosine similarity; higher is closer.
    pub score: f32,
    pub metadata: DescriptorMetadata,
}

/// The single best retrieval result handed to downstream consumers.
///
/// Serializes as `{pdf_name, type, similarity, text?, image_index?, companion?}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestMatch {
    pub pdf_name: String,
    #[serde(flatten)]
    pub content: Content,
    pub similarity: f32,
    /// Companion PDF resolved from `pdf_name`, when a corpus root is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub companion: Option<PathBuf>,
}

impl BestMatch {
    pub fn modality(&self) -> Modality {
        self.content.modality()
    }
}

impl From<Hit> for BestMatch {
    fn from(hit: Hit) -> Self {
        Self {
            pdf_name: hit.metadata.pdf_name,
            content: hit.metadata.content,
            similarity: hit.score,
            companion: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_properties_have_no_image_index() {
        let props = DescriptorMetadata::text("create_organization", "Create Organization")
            .to_properties();
        assert_eq!(props.get("pdf_name"), Some(&json!("create_organization")));
        assert_eq!(props.get("text"), Some(&json!("Create Organization")));
        assert!(props.get("image_index").is_none());
    }

    #[test]
    fn properties_from_service_ignore_reserved_keys() {
        let value = json!({"pdf_name": "invite_team_member", "image_index": 2, "_distance": 0.7});
        let meta = DescriptorMetadata::from_properties(value.as_object().unwrap()).unwrap();
        assert_eq!(meta, DescriptorMetadata::image("invite_team_member", 2));
        assert_eq!(meta.modality(), Modality::Image);
    }

    #[test]
    fn properties_with_both_payloads_are_rejected() {
        let value = json!({"pdf_name": "x", "text": "Heading", "image_index": 0});
        let err = DescriptorMetadata::from_properties(value.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMetadata(_)));
    }

    #[test]
    fn properties_without_payload_are_rejected() {
        let value = json!({"pdf_name": "x"});
        assert!(DescriptorMetadata::from_properties(value.as_object().unwrap()).is_err());
    }

    #[test]
    fn best_match_serializes_output_contract() {
        let m = BestMatch::from(Hit {
            score: 0.5,
            metadata: DescriptorMetadata::text("create_new_user", "Create New User"),
        });
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(
            v,
            json!({
                "pdf_name": "create_new_user",
                "type": "text",
                "text": "Create New User",
                "similarity": 0.5
            })
        );

        let img = BestMatch::from(Hit {
            score: 0.25,
            metadata: DescriptorMetadata::image("create_new_user", 3),
        });
        let v = serde_json::to_value(&img).unwrap();
        assert_eq!(v["type"], json!("image"));
        assert_eq!(v["image_index"], json!(3));
        assert!(v.get("text").is_none());
    }
}
