//! Terminology resource models
//!
//! Version-agnostic models for the terminology resources consumed by the
//! `glossa-terminology` engine: CodeSystem, ValueSet, ConceptMap, and the
//! small datatypes they share (Coding, CodeableConcept, Equivalence).
//!
//! These are interface-boundary shapes: wire encoding/decoding and the
//! surrounding resource machinery live elsewhere; this crate only defines
//! the in-memory structures and their serde mapping.

pub mod code_system;
pub mod coding;
pub mod concept_map;
pub mod value_set;

pub use code_system::{
    CodeSystem, CodeSystemConcept, CodeSystemContentMode, CodeSystemProperty, ConceptDesignation,
    ConceptProperty, PropertyValue,
};
pub use coding::{CodeableConcept, Coding, PublicationStatus};
pub use concept_map::{
    ConceptMap, ConceptMapGroup, ConceptMapGroupElement, ConceptMapGroupUnmapped,
    ConceptMapTarget, Equivalence, UnmappedMode,
};
pub use value_set::{
    ComposeInclude, ExpansionContains, FilterOperator, ValueSet, ValueSetCompose,
    ValueSetConcept, ValueSetExpansion, ValueSetFilter,
};
