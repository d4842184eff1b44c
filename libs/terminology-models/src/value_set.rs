//! ValueSet model
//!
//! A value set selects a set of codes from one or more code systems, either
//! by rule (compose) or as an enumerated expansion.

use crate::coding::PublicationStatus;
use serde::{Deserialize, Serialize};

/// A set of codes drawn from one or more code systems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSet {
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

    /// Content logical definition (the "intension")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose: Option<ValueSetCompose>,

    /// Used when the value set is "expanded"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion: Option<ValueSetExpansion>,
}

impl ValueSet {
    /// Create a new ValueSet with minimal required fields
    pub fn new(url: impl Into<String>, status: PublicationStatus) -> Self {
        Self {
            url: url.into(),
            version: None,
            name: None,
            title: None,
            status,
            compose: None,
            expansion: None,
        }
    }
}

/// Content logical definition of the value set (intension)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetCompose {
    /// Whether inactive codes are in the value set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactive: Option<bool>,

    /// Include one or more codes from a code system or other value set
    pub include: Vec<ComposeInclude>,

    /// Explicitly exclude codes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<ComposeInclude>,
}

/// One include (or exclude) rule. Filters within a rule combine with AND;
/// rules combine with OR.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeInclude {
    /// The system the codes come from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Specific version of the code system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Specific codes from the system
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept: Vec<ValueSetConcept>,

    /// Select codes/concepts by their properties
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<ValueSetFilter>,

    /// Select only contents included in the referenced value set(s)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_set: Vec<String>,
}

/// A concept listed explicitly in a compose rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueSetConcept {
    /// Code from the system
    pub code: String,

    /// Text to display for this code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// Select codes by property
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueSetFilter {
    /// Property name
    pub property: String,

    /// Filter operator
    pub op: FilterOperator,

    /// Value of the filter
    pub value: String,
}

/// Filter operators usable in a compose rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Equal,
    IsA,
    DescendentOf,
    IsNotA,
    Regex,
    In,
    NotIn,
    Generalizes,
    Exists,
}

impl FilterOperator {
    /// The wire code for this operator.
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOperator::Equal => "=",
            FilterOperator::IsA => "is-a",
            FilterOperator::DescendentOf => "descendent-of",
            FilterOperator::IsNotA => "is-not-a",
            FilterOperator::Regex => "regex",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not-in",
            FilterOperator::Generalizes => "generalizes",
            FilterOperator::Exists => "exists",
        }
    }
}

/// Expansion of the value set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetExpansion {
    /// Uniquely identifies this expansion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,

    /// Time the expansion was generated
    pub timestamp: String,

    /// Total number of codes matched by the compose (before truncation
    /// and paging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,

    /// Offset at which this page starts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,

    /// Codes in the value set
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<ExpansionContains>,
}

/// Codes in an expansion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionContains {
    /// System value for the code
    pub system: String,

    /// Code - the symbol itself
    pub code: String,

    /// User display for the concept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    /// If the concept is inactive in the code system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactive: Option<bool>,
}
