//! Schema registry
//!
//! Known record types carry a schema describing required and optional
//! fields. Validation yields one of three outcomes: valid, unknown, or
//! invalid. Unknown types are counted and passed through for forward
//! compatibility; invalid records are dropped with a structured error
//! pushed onto a bounded ring.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::core::constants::LEXICON_ERROR_RING_CAPACITY;
use crate::data::types::collections;

/// Outcome of validating a record against the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    /// No schema registered for this type; counted, not an error
    Unknown,
    Invalid(String),
}

/// What a field is expected to look like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Bool,
    Object,
    Array,
}

impl FieldKind {
    fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Bool => "bool",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
        }
    }
}

/// One field requirement in a record schema
#[derive(Debug, Clone)]
struct FieldSpec {
    name: &'static str,
    kind: FieldKind,
    required: bool,
}

/// Schema for one record type
#[derive(Debug, Clone)]
struct RecordSchema {
    fields: Vec<FieldSpec>,
}

/// A recorded validation failure
#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub collection: String,
    pub uri: String,
    pub error: String,
}

/// Aggregate validation counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LexiconStats {
    pub valid: u64,
    pub invalid: u64,
    pub unknown: u64,
}

/// Registry of known record schemas.
///
/// The handler table is keyed by collection NSID and extensible at load
/// time via `register`.
pub struct Lexicon {
    schemas: HashMap<&'static str, RecordSchema>,
    valid: AtomicU64,
    invalid: AtomicU64,
    unknown: AtomicU64,
    errors: Mutex<VecDeque<ValidationFailure>>,
}

impl Lexicon {
    /// Registry pre-loaded with the record types the indexer understands
    pub fn new() -> Self {
        let mut lexicon = Self {
            schemas: HashMap::new(),
            valid: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
            unknown: AtomicU64::new(0),
            errors: Mutex::new(VecDeque::new()),
        };

        lexicon.register(
            collections::POST,
            &[
                ("text", FieldKind::String, true),
                ("reply", FieldKind::Object, false),
                ("embed", FieldKind::Object, false),
                ("facets", FieldKind::Array, false),
                ("createdAt", FieldKind::String, true),
            ],
        );
        lexicon.register(
            collections::LIKE,
            &[
                ("subject", FieldKind::Object, true),
                ("createdAt", FieldKind::String, true),
            ],
        );
        lexicon.register(
            collections::REPOST,
            &[
                ("subject", FieldKind::Object, true),
                ("createdAt", FieldKind::String, true),
            ],
        );
        lexicon.register(
            collections::FOLLOW,
            &[
                ("subject", FieldKind::String, true),
                ("createdAt", FieldKind::String, true),
            ],
        );
        lexicon.register(
            collections::BLOCK,
            &[
                ("subject", FieldKind::String, true),
                ("createdAt", FieldKind::String, true),
            ],
        );
        lexicon.register(
            collections::LIST,
            &[
                ("purpose", FieldKind::String, true),
                ("name", FieldKind::String, true),
                ("description", FieldKind::String, false),
            ],
        );
        lexicon.register(
            collections::LIST_ITEM,
            &[
                ("list", FieldKind::String, true),
                ("subject", FieldKind::String, true),
            ],
        );
        lexicon.register(
            collections::PROFILE,
            &[
                ("displayName", FieldKind::String, false),
                ("description", FieldKind::String, false),
            ],
        );
        lexicon.register(
            collections::FEED_GENERATOR,
            &[
                ("did", FieldKind::String, true),
                ("displayName", FieldKind::String, true),
                ("description", FieldKind::String, false),
            ],
        );
        lexicon.register(collections::STARTER_PACK, &[("name", FieldKind::String, true)]);
        lexicon.register(
            collections::LABELER_SERVICE,
            &[("policies", FieldKind::Object, false)],
        );
        lexicon.register(
            collections::THREAD_GATE,
            &[
                ("post", FieldKind::String, true),
                ("allow", FieldKind::Array, false),
            ],
        );
        lexicon.register(
            collections::LABEL,
            &[
                ("uri", FieldKind::String, true),
                ("val", FieldKind::String, true),
                ("neg", FieldKind::Bool, false),
            ],
        );

        lexicon
    }

    /// Register (or replace) the schema for a record type
    pub fn register(
        &mut self,
        collection: &'static str,
        fields: &[(&'static str, FieldKind, bool)],
    ) {
        self.schemas.insert(
            collection,
            RecordSchema {
                fields: fields
                    .iter()
                    .map(|&(name, kind, required)| FieldSpec {
                        name,
                        kind,
                        required,
                    })
                    .collect(),
            },
        );
    }

    /// Validate a record against its collection's schema.
    ///
    /// Counts the outcome; invalid outcomes also land on the error ring.
    pub fn validate(
        &self,
        collection: &str,
        uri: &str,
        record: &serde_json::Value,
    ) -> Validation {
        let Some(schema) = self.schemas.get(collection) else {
            self.unknown.fetch_add(1, Ordering::Relaxed);
            return Validation::Unknown;
        };

        let result = Self::check(schema, record);
        match &result {
            Validation::Valid => {
                self.valid.fetch_add(1, Ordering::Relaxed);
            }
            Validation::Invalid(error) => {
                self.invalid.fetch_add(1, Ordering::Relaxed);
                let mut errors = self.errors.lock();
                if errors.len() >= LEXICON_ERROR_RING_CAPACITY {
                    errors.pop_front();
                }
                errors.push_back(ValidationFailure {
                    collection: collection.to_string(),
                    uri: uri.to_string(),
                    error: error.clone(),
                });
            }
            Validation::Unknown => unreachable!("schema lookup already handled"),
        }
        result
    }

    fn check(schema: &RecordSchema, record: &serde_json::Value) -> Validation {
        let Some(object) = record.as_object() else {
            return Validation::Invalid("record is not an object".into());
        };

        for field in &schema.fields {
            match object.get(field.name) {
                None | Some(serde_json::Value::Null) => {
                    if field.required {
                        return Validation::Invalid(format!(
                            "missing required field '{}'",
                            field.name
                        ));
                    }
                }
                Some(value) => {
                    if !field.kind.matches(value) {
                        return Validation::Invalid(format!(
                            "field '{}' should be a {}",
                            field.name,
                            field.kind.name()
                        ));
                    }
                }
            }
        }

        Validation::Valid
    }

    /// Aggregate counters
    pub fn stats(&self) -> LexiconStats {
        LexiconStats {
            valid: self.valid.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
        }
    }

    /// Most recent validation failures, oldest first
    pub fn recent_errors(&self) -> Vec<ValidationFailure> {
        self.errors.lock().iter().cloned().collect()
    }
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_post() {
        let lexicon = Lexicon::new();
        let record = json!({"text": "hello", "createdAt": "2024-05-01T00:00:00Z"});
        assert_eq!(
            lexicon.validate(collections::POST, "at://a/b/c", &record),
            Validation::Valid
        );
        assert_eq!(lexicon.stats().valid, 1);
    }

    #[test]
    fn test_missing_required_field_is_invalid() {
        let lexicon = Lexicon::new();
        let record = json!({"createdAt": "2024-05-01T00:00:00Z"});
        let result = lexicon.validate(collections::POST, "at://a/b/c", &record);
        assert!(matches!(result, Validation::Invalid(ref e) if e.contains("text")));
        assert_eq!(lexicon.stats().invalid, 1);

        let errors = lexicon.recent_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].collection, collections::POST);
    }

    #[test]
    fn test_wrong_field_type_is_invalid() {
        let lexicon = Lexicon::new();
        let record = json!({"text": 42, "createdAt": "2024-05-01T00:00:00Z"});
        let result = lexicon.validate(collections::POST, "at://a/b/c", &record);
        assert!(matches!(result, Validation::Invalid(ref e) if e.contains("string")));
    }

    #[test]
    fn test_unknown_collection_passes_through() {
        let lexicon = Lexicon::new();
        let record = json!({"anything": true});
        assert_eq!(
            lexicon.validate("com.example.custom", "at://a/b/c", &record),
            Validation::Unknown
        );
        assert_eq!(lexicon.stats().unknown, 1);
        assert_eq!(lexicon.stats().invalid, 0);
    }

    #[test]
    fn test_optional_fields_may_be_absent_or_null() {
        let lexicon = Lexicon::new();
        let record = json!({
            "text": "x", "createdAt": "2024-05-01T00:00:00Z",
            "reply": null
        });
        assert_eq!(
            lexicon.validate(collections::POST, "at://a/b/c", &record),
            Validation::Valid
        );
    }

    #[test]
    fn test_error_ring_is_bounded() {
        let lexicon = Lexicon::new();
        let bad = json!({});
        for i in 0..(LEXICON_ERROR_RING_CAPACITY + 10) {
            lexicon.validate(collections::LIKE, &format!("at://a/l/{}", i), &bad);
        }
        let errors = lexicon.recent_errors();
        assert_eq!(errors.len(), LEXICON_ERROR_RING_CAPACITY);
        // Oldest entries were evicted
        assert_eq!(errors[0].uri, "at://a/l/10");
    }

    #[test]
    fn test_registered_schema_is_extensible() {
        let mut lexicon = Lexicon::new();
        lexicon.register("com.example.widget", &[("size", FieldKind::String, true)]);
        assert_eq!(
            lexicon.validate("com.example.widget", "at://a/w/1", &json!({"size": "xl"})),
            Validation::Valid
        );
    }
}
