//! Index definition and idempotent index creation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    service::SearchService,
};

/// Field names used in the index mapping.
pub mod fields {
    pub const NAME: &str = "name";
    pub const TAGS: &str = "tags";
    /// Sub-field carrying the n-gram analysis of its parent.
    pub const NGRAM: &str = "ngram";
    pub const NAME_NGRAM: &str = "name.ngram";
    pub const TAGS_NGRAM: &str = "tags.ngram";

    /// Fields a free-text query is matched against.
    pub const SEARCHABLE: [&str; 4] = [NAME, NAME_NGRAM, TAGS, TAGS_NGRAM];
}

pub const ANALYZER: &str = "catalog_ngram";
pub const TOKENIZER: &str = "catalog_ngram_tokenizer";
pub const NGRAM_FILTER: &str = "catalog_ngram_filter";

/// Error type reported by the service when the index is already there.
pub const ALREADY_EXISTS: &str = "resource_already_exists_exception";

/// Bounds of the n-gram tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NgramSpec {
    pub min: u32,
    pub max: u32,
}

impl NgramSpec {
    pub const DEFAULT: Self = Self { min: 2, max: 8 };

    pub fn new(min: u32, max: u32) -> Result<Self> {
        if min == 0 || min > max {
            return Err(Error::Config(format!(
                "invalid n-gram bounds {min}..={max}"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn diff(&self) -> u32 {
        self.max - self.min
    }
}

impl Default for NgramSpec {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The create-index request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub settings: IndexSettings,
    #[serde(default)]
    pub mappings: Mappings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSettings {
    #[serde(default = "default_max_ngram_diff")]
    pub max_ngram_diff: u32,
    #[serde(default)]
    pub analysis: Analysis,
}

fn default_max_ngram_diff() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub analyzer: BTreeMap<String, AnalyzerDef>,
    #[serde(default)]
    pub tokenizer: BTreeMap<String, ComponentDef>,
    #[serde(default)]
    pub filter: BTreeMap<String, ComponentDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerDef {
    #[serde(rename = "type")]
    pub kind: String,
    pub tokenizer: String,
    #[serde(default)]
    pub filter: Vec<String>,
}

/// A tokenizer or token filter definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDef {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_gram: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_gram: Option<u32>,
}

impl ComponentDef {
    fn ngram(spec: NgramSpec) -> Self {
        Self {
            kind: "ngram".to_string(),
            min_gram: Some(spec.min),
            max_gram: Some(spec.max),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mappings {
    #[serde(default)]
    pub properties: BTreeMap<String, FieldMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, FieldMapping>,
}

impl FieldMapping {
    fn text_with_ngram() -> Self {
        let ngram = Self {
            kind: "text".to_string(),
            analyzer: Some(ANALYZER.to_string()),
            fields: BTreeMap::new(),
        };
        Self {
            kind: "text".to_string(),
            analyzer: None,
            fields: BTreeMap::from([(fields::NGRAM.to_string(), ngram)]),
        }
    }
}

impl IndexDefinition {
    /// The catalog index: `name` and `tags` as text, each with an n-gram
    /// sub-field analysed by a custom analyzer.
    pub fn catalog(spec: NgramSpec) -> Self {
        let analyzer = AnalyzerDef {
            kind: "custom".to_string(),
            tokenizer: TOKENIZER.to_string(),
            filter: vec!["lowercase".to_string(), NGRAM_FILTER.to_string()],
        };

        Self {
            settings: IndexSettings {
                max_ngram_diff: spec.diff(),
                analysis: Analysis {
                    analyzer: BTreeMap::from([(ANALYZER.to_string(), analyzer)]),
                    tokenizer: BTreeMap::from([(
                        TOKENIZER.to_string(),
                        ComponentDef::ngram(spec),
                    )]),
                    filter: BTreeMap::from([(
                        NGRAM_FILTER.to_string(),
                        ComponentDef::ngram(spec),
                    )]),
                },
            },
            mappings: Mappings {
                properties: BTreeMap::from([
                    (fields::NAME.to_string(), FieldMapping::text_with_ngram()),
                    (fields::TAGS.to_string(), FieldMapping::text_with_ngram()),
                ]),
            },
        }
    }
}

impl Default for IndexDefinition {
    fn default() -> Self {
        Self::catalog(NgramSpec::DEFAULT)
    }
}

/// Outcome of [`ensure_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Created,
    AlreadyExists,
}

/// Create `index` unless it already exists.
///
/// An "already exists" answer is success; an existing index is never reset.
/// Any other rejection is a [`Error::Schema`].
pub async fn ensure_index(
    service: &dyn SearchService,
    index: &str,
    definition: &IndexDefinition,
) -> Result<IndexStatus> {
    let body = serde_json::to_value(definition)?;
    let resp = service.create_index(index, &body).await?;

    if resp.is_success() {
        tracing::warn!(index, "created new index");
        return Ok(IndexStatus::Created);
    }

    if let Some(err) = resp.service_error()
        && err.is(ALREADY_EXISTS)
    {
        tracing::info!(index, "index already exists, continuing");
        return Ok(IndexStatus::AlreadyExists);
    }

    Err(Error::Schema {
        status: resp.status,
        reason: resp.reason(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        service::WireResponse,
        tantivy_index::EmbeddedService,
        testing::ScriptedService,
    };

    #[test]
    fn ngram_bounds_are_validated() {
        assert!(NgramSpec::new(0, 3).is_err());
        assert!(NgramSpec::new(5, 3).is_err());
        assert_eq!(NgramSpec::new(3, 3).unwrap().diff(), 0);
    }

    #[test]
    fn catalog_definition_shape() {
        let value = serde_json::to_value(IndexDefinition::default()).unwrap();

        assert_eq!(value["settings"]["max_ngram_diff"], 6);
        let analysis = &value["settings"]["analysis"];
        assert_eq!(analysis["tokenizer"][TOKENIZER]["type"], "ngram");
        assert_eq!(analysis["tokenizer"][TOKENIZER]["min_gram"], 2);
        assert_eq!(analysis["tokenizer"][TOKENIZER]["max_gram"], 8);
        assert_eq!(analysis["filter"][NGRAM_FILTER]["type"], "ngram");
        assert_eq!(analysis["analyzer"][ANALYZER]["tokenizer"], TOKENIZER);

        let name = &value["mappings"]["properties"]["name"];
        assert_eq!(name["type"], "text");
        assert!(name.get("analyzer").is_none());
        assert_eq!(name["fields"]["ngram"]["analyzer"], ANALYZER);
        assert_eq!(
            value["mappings"]["properties"]["tags"]["fields"]["ngram"]["type"],
            "text"
        );
    }

    #[test]
    fn definition_reads_back() {
        let def = IndexDefinition::catalog(NgramSpec::new(3, 5).unwrap());
        let value = serde_json::to_value(&def).unwrap();
        let back: IndexDefinition = serde_json::from_value(value).unwrap();
        assert_eq!(back, def);
    }

    #[tokio::test]
    async fn ensure_twice_is_idempotent() {
        let service = EmbeddedService::in_memory();
        let def = IndexDefinition::default();

        let first = ensure_index(&service, "documents", &def).await.unwrap();
        let second = ensure_index(&service, "documents", &def).await.unwrap();

        assert_eq!(first, IndexStatus::Created);
        assert_eq!(second, IndexStatus::AlreadyExists);
    }

    #[tokio::test]
    async fn oversized_ngram_range_is_schema_error() {
        let service = EmbeddedService::in_memory();
        let mut def = IndexDefinition::default();
        def.settings.max_ngram_diff = 1;

        let err = ensure_index(&service, "documents", &def).await.unwrap_err();
        match err {
            Error::Schema { status, reason } => {
                assert_eq!(status, 400);
                assert!(reason.contains("illegal_argument_exception"));
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_rejections_are_schema_errors() {
        let service = ScriptedService::new(vec![Ok(WireResponse::json(
            403,
            &json!({"error": {
                "type": "security_exception",
                "reason": "action [indices:admin/create] is unauthorized",
                "root_cause": [{"type": "security_exception"}]
            }}),
        ))]);

        let err = ensure_index(&service, "documents", &IndexDefinition::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Schema { status: 403, .. }));
    }

    #[tokio::test]
    async fn unparseable_rejection_is_schema_error() {
        let service =
            ScriptedService::new(vec![Ok(WireResponse::new(500, "oops"))]);
        let err = ensure_index(&service, "documents", &IndexDefinition::default())
            .await
            .unwrap_err();
        match err {
            Error::Schema { status, reason } => {
                assert_eq!(status, 500);
                assert_eq!(reason, "oops");
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }
}
