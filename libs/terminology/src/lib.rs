//! Terminology engine
//!
//! Answers the set-theoretic and graph questions behind terminology
//! operations over pre-loaded, read-mostly vocabularies:
//!
//! - [`ConceptIndex`] — per-system code lookup, hierarchy traversal and
//!   property retrieval
//! - [`filter::evaluate`] — inclusion/exclusion filter evaluation against
//!   an index
//! - [`expand::expand`] — value set expansion with compose/filter
//!   semantics, exclusions, deduplication and paging
//! - [`ConceptMapTranslator`] — source→target code translation, optionally
//!   chained through an intermediate map
//! - [`ClosureRegistry`] — named, monotonically-growing closure tables
//!   returning per-caller deltas
//! - [`TerminologyService`] — the operation facade wiring the above to the
//!   standard entry points ($expand, $lookup, $validate-code, $translate,
//!   $subsumes, $closure)
//!
//! Vocabulary loading is a collaborator's responsibility: every component
//! here is constructed from already-parsed in-memory resources and performs
//! no I/O.

pub mod cancel;
pub mod closure;
pub mod config;
pub mod error;
pub mod expand;
pub mod filter;
pub mod index;
pub mod service;
pub mod translate;

pub use cancel::CancelToken;
pub use closure::{ClosureContext, ClosureRegistry, ClosureRow, ClosureUpdate};
pub use config::TerminologyConfig;
pub use error::{Error, Result};
pub use expand::{ExpandOptions, Expansion, ExpansionEntry, ValueSetResolver};
pub use filter::FilterCache;
pub use index::{ConceptIndex, IndexedConcept};
pub use service::{
    CodeValidation, ConceptDetails, SubsumptionOutcome, TerminologyService, TranslateResult,
};
pub use translate::{ConceptMapTranslator, TranslationMatch};
