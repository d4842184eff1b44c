//! CodeSystem model
//!
//! Version-agnostic model for code systems (terminology). Concepts may be
//! nested (tree form) and may additionally declare `parent` properties, so
//! hierarchies form a DAG with multiple parents.

use crate::coding::PublicationStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A code system: a named collection of concepts with defined meanings
/// and relationships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystem {
    /// Canonical identifier
    pub url: String,

    /// Business version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Name (computer friendly)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Name (human friendly)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Publication status
    pub status: PublicationStatus,

    /// If code comparison is case sensitive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,

    /// Hierarchy meaning (grouped-by | is-a | part-of | classified-with)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchy_meaning: Option<String>,

    /// Content type (not-present | example | fragment | complete | supplement)
    pub content: CodeSystemContentMode,

    /// Property definitions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub property: Vec<CodeSystemProperty>,

    /// Concepts in the code system
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept: Vec<CodeSystemConcept>,
}

impl CodeSystem {
    /// Create a new CodeSystem with minimal required fields
    pub fn new(
        url: impl Into<String>,
        status: PublicationStatus,
        content: CodeSystemContentMode,
    ) -> Self {
        Self {
            url: url.into(),
            version: None,
            name: None,
            title: None,
            status,
            case_sensitive: None,
            hierarchy_meaning: None,
            content,
            property: Vec::new(),
            concept: Vec::new(),
        }
    }
}

/// Content mode for a code system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodeSystemContentMode {
    NotPresent,
    Example,
    Fragment,
    Complete,
    Supplement,
}

/// Property definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSystemProperty {
    /// Identifies the property
    pub code: String,

    /// Formal identifier for the property
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// Description of the property
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Type of property (code | string | integer | boolean | decimal)
    #[serde(rename = "type")]
    pub property_type: String,
}

/// Concept in the code system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSystemConcept {
    /// Code that identifies the concept
    pub code: String,

    /// Text to display to the user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    /// Formal definition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,

    /// Additional representations for the concept
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub designation: Vec<ConceptDesignation>,

    /// Property values for the concept
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub property: Vec<ConceptProperty>,

    /// Child concepts (nested hierarchy)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept: Vec<CodeSystemConcept>,
}

impl CodeSystemConcept {
    /// Create a concept with just a code.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            display: None,
            definition: None,
            designation: Vec::new(),
            property: Vec::new(),
            concept: Vec::new(),
        }
    }

    /// Attach a display string.
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// Declare an additional `parent` property (multi-parent hierarchies).
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.property.push(ConceptProperty {
            code: "parent".to_string(),
            value: PropertyValue::Code(parent.into()),
        });
        self
    }
}

/// Language-tagged synonym for a concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptDesignation {
    /// Human language of the designation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// The text value for this designation
    pub value: String,
}

/// Property value for a concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptProperty {
    /// Reference to a property definition
    pub code: String,

    /// Value of the property
    #[serde(flatten)]
    pub value: PropertyValue,
}

/// Typed property value, resolved once at load time.
///
/// Serializes with the conventional `value[x]` key so the surrounding
/// serialization layer round-trips it untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    #[serde(rename = "valueCode")]
    Code(String),
    #[serde(rename = "valueString")]
    String(String),
    #[serde(rename = "valueBoolean")]
    Boolean(bool),
    #[serde(rename = "valueInteger")]
    Integer(i64),
    #[serde(rename = "valueDecimal")]
    Decimal(Decimal),
}

impl PropertyValue {
    /// Render the value as the string used for filter comparison.
    pub fn as_comparison_string(&self) -> String {
        match self {
            PropertyValue::Code(v) | PropertyValue::String(v) => v.clone(),
            PropertyValue::Boolean(v) => v.to_string(),
            PropertyValue::Integer(v) => v.to_string(),
            PropertyValue::Decimal(v) => v.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concept_property_serializes_with_value_key() {
        let prop = ConceptProperty {
            code: "status".to_string(),
            value: PropertyValue::Code("retired".to_string()),
        };
        let json = serde_json::to_value(&prop).unwrap();
        assert_eq!(json["code"], "status");
        assert_eq!(json["valueCode"], "retired");
    }

    #[test]
    fn concept_property_round_trips_typed_values() {
        let json = serde_json::json!({ "code": "rank", "valueInteger": 3 });
        let prop: ConceptProperty = serde_json::from_value(json).unwrap();
        assert_eq!(prop.value, PropertyValue::Integer(3));
    }
}
