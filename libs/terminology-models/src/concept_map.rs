//! ConceptMap model
//!
//! Mappings between codes from a source system and a target system, graded
//! by equivalence.

use crate::coding::PublicationStatus;
use serde::{Deserialize, Serialize};

/// A mapping between codes in two code systems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMap {
    /// Canonical identifier
    pub url: String,

    /// Business version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Name (computer friendly)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Publication status
    pub status: PublicationStatus,

    /// Same source and target systems
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group: Vec<ConceptMapGroup>,
}

impl ConceptMap {
    /// Create a new ConceptMap with minimal required fields
    pub fn new(url: impl Into<String>, status: PublicationStatus) -> Self {
        Self {
            url: url.into(),
            version: None,
            name: None,
            status,
            group: Vec::new(),
        }
    }
}

/// A group of mappings sharing a source and a target system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMapGroup {
    /// Canonical URL of the source code system
    pub source: String,

    /// Canonical URL of the target code system
    pub target: String,

    /// Mappings for codes in the source system
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub element: Vec<ConceptMapGroupElement>,

    /// What to do when there is no mapping for a source code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmapped: Option<ConceptMapGroupUnmapped>,
}

/// A source concept and its mappings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptMapGroupElement {
    /// Identifies the source concept
    pub code: String,

    /// Display for the source concept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    /// Concepts in the target system this maps to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target: Vec<ConceptMapTarget>,
}

/// A target concept in a mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptMapTarget {
    /// Code in the target system
    pub code: String,

    /// Display for the target concept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    /// How precisely the source corresponds to the target
    pub equivalence: Equivalence,
}

/// Behavior when a source concept has no mapping in a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMapGroupUnmapped {
    /// How unmapped codes are handled
    pub mode: UnmappedMode,

    /// Fixed code to use (mode = fixed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Display for the fixed code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    /// Canonical URL of another concept map to consult (mode = other-map)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Mode for unmapped handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnmappedMode {
    Provided,
    Fixed,
    OtherMap,
}

/// Graded measure of how precisely a source concept corresponds to a
/// target concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Equivalence {
    Equal,
    Equivalent,
    Wider,
    Subsumes,
    Narrower,
    Specializes,
    #[serde(rename = "relatedto")]
    RelatedTo,
    Inexact,
    Unmatched,
    Disjoint,
}

impl Equivalence {
    /// Rank from most precise (0) to least precise. Composition of chained
    /// mappings reduces along this total order and never upgrades.
    /// `equivalent` outranks `equal`: an equal mapping asserts identity of
    /// meaning only for the stated concepts, while equivalent covers the
    /// intended use.
    pub fn precision_rank(self) -> u8 {
        match self {
            Equivalence::Equivalent => 0,
            Equivalence::Equal => 1,
            Equivalence::Wider => 2,
            Equivalence::Subsumes => 3,
            Equivalence::Narrower => 4,
            Equivalence::Specializes => 5,
            Equivalence::RelatedTo => 6,
            Equivalence::Inexact => 7,
            Equivalence::Unmatched => 8,
            Equivalence::Disjoint => 9,
        }
    }

    /// The weaker (less precise) of two grades.
    pub fn weaker(a: Equivalence, b: Equivalence) -> Equivalence {
        if a.precision_rank() >= b.precision_rank() {
            a
        } else {
            b
        }
    }

    /// Whether this grade represents an actual correspondence.
    pub fn is_match(self) -> bool {
        !matches!(self, Equivalence::Unmatched | Equivalence::Disjoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weaker_never_upgrades() {
        assert_eq!(
            Equivalence::weaker(Equivalence::Equivalent, Equivalence::Wider),
            Equivalence::Wider
        );
        assert_eq!(
            Equivalence::weaker(Equivalence::Inexact, Equivalence::Equal),
            Equivalence::Inexact
        );
        assert_eq!(
            Equivalence::weaker(Equivalence::Narrower, Equivalence::Narrower),
            Equivalence::Narrower
        );
    }

    #[test]
    fn equivalent_is_more_precise_than_equal() {
        assert!(Equivalence::Equivalent.precision_rank() < Equivalence::Equal.precision_rank());
        assert_eq!(
            Equivalence::weaker(Equivalence::Equal, Equivalence::Equivalent),
            Equivalence::Equal
        );
    }

    #[test]
    fn equivalence_serializes_as_lowercase_codes() {
        assert_eq!(
            serde_json::to_value(Equivalence::RelatedTo).unwrap(),
            serde_json::json!("relatedto")
        );
        assert_eq!(
            serde_json::to_value(Equivalence::Equivalent).unwrap(),
            serde_json::json!("equivalent")
        );
    }
}
