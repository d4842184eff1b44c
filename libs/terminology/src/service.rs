//! Terminology operation facade
//!
//! Wires the concept indexes, expander, translators and closure registry
//! behind the standard operation entry points: expand, lookup,
//! validate-code, translate, subsumes and closure. Vocabularies are loaded
//! up front; afterwards every operation is a read against prebuilt
//! structures, so the facade hands out `&self` methods throughout (the
//! closure registry and caches synchronize internally).

use crate::cancel::CancelToken;
use crate::closure::{ClosureContext, ClosureRegistry, ClosureUpdate};
use crate::config::TerminologyConfig;
use crate::error::{Error, Result};
use crate::expand::{self, ExpandOptions, Expansion, ExpansionEntry, IndexSet};
use crate::filter::FilterCache;
use crate::index::ConceptIndex;
use crate::translate::{ConceptMapTranslator, TranslationMatch};
use glossa_models::{
    CodeSystem, Coding, ConceptDesignation, ConceptMap, ConceptProperty, ValueSet,
};
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Everything known about one concept, as returned by lookup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptDetails {
    pub system: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub designation: Vec<ConceptDesignation>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub property: Vec<ConceptProperty>,

    pub inactive: bool,
}

/// Outcome of validating a code against a value set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeValidation {
    pub valid: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of a translate call across all loaded maps.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateResult {
    /// True when at least one match represents an actual correspondence
    pub result: bool,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<TranslationMatch>,
}

/// Relationship between two codes of one system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsumptionOutcome {
    Equivalent,
    Subsumes,
    SubsumedBy,
    NotSubsumed,
}

impl SubsumptionOutcome {
    /// The wire code for this outcome.
    pub fn as_str(self) -> &'static str {
        match self {
            SubsumptionOutcome::Equivalent => "equivalent",
            SubsumptionOutcome::Subsumes => "subsumes",
            SubsumptionOutcome::SubsumedBy => "subsumed-by",
            SubsumptionOutcome::NotSubsumed => "not-subsumed",
        }
    }
}

/// The operation facade over pre-loaded vocabularies.
pub struct TerminologyService {
    config: TerminologyConfig,
    indexes: IndexSet,
    value_sets: HashMap<String, ValueSet>,
    translators: Vec<Arc<ConceptMapTranslator>>,
    closures: ClosureRegistry,
    expansion_cache: Mutex<LruCache<String, Arc<Expansion>>>,
    filter_cache: Arc<FilterCache>,
}

impl TerminologyService {
    pub fn new() -> Self {
        Self::with_config(TerminologyConfig::default())
    }

    pub fn with_config(config: TerminologyConfig) -> Self {
        let cache_size = NonZeroUsize::new(config.expansion_cache_size.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        let filter_cache_size = NonZeroUsize::new(config.filter_cache_size.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            indexes: IndexSet::new(),
            value_sets: HashMap::new(),
            translators: Vec::new(),
            closures: ClosureRegistry::new(),
            expansion_cache: Mutex::new(LruCache::new(cache_size)),
            filter_cache: Arc::new(FilterCache::new(filter_cache_size)),
        }
    }

    /// Load a code system, building its concept index eagerly so malformed
    /// hierarchies are rejected at load time rather than at query time.
    pub fn add_code_system(&mut self, code_system: &CodeSystem) -> Result<()> {
        let index = ConceptIndex::build(code_system)?;
        tracing::info!(
            system = %index.system(),
            concepts = index.len(),
            "loaded code system"
        );
        self.indexes
            .insert(index.system().to_string(), Arc::new(index));
        self.clear_expansion_cache();
        Ok(())
    }

    /// Load a value set, keyed by its canonical URL.
    pub fn add_value_set(&mut self, value_set: ValueSet) {
        tracing::info!(url = %value_set.url, "loaded value set");
        self.value_sets.insert(value_set.url.clone(), value_set);
        self.clear_expansion_cache();
    }

    /// Load a concept map, making it available to translate and closure.
    pub fn add_concept_map(&mut self, map: &ConceptMap) {
        tracing::info!(url = %map.url, "loaded concept map");
        self.translators.push(Arc::new(ConceptMapTranslator::new(map)));
    }

    /// Expand a value set by canonical URL, through the expansion cache.
    pub fn expand(&self, url: &str, options: &ExpandOptions) -> Result<Arc<Expansion>> {
        let value_set = self
            .value_sets
            .get(url)
            .ok_or_else(|| Error::UnknownValueSet(url.to_string()))?;

        let key = self.cache_key(value_set, options);
        {
            let mut cache = self.expansion_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(&key) {
                tracing::debug!(url, "expansion cache hit");
                return Ok(Arc::clone(hit));
            }
        }

        let expansion = Arc::new(self.expand_value_set(value_set, options)?);
        self.expansion_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(key, Arc::clone(&expansion));
        Ok(expansion)
    }

    /// Expand an inline value set, bypassing the cache.
    pub fn expand_value_set(
        &self,
        value_set: &ValueSet,
        options: &ExpandOptions,
    ) -> Result<Expansion> {
        let compose = value_set
            .compose
            .as_ref()
            .ok_or_else(|| Error::UnknownValueSet(value_set.url.clone()))?;
        let effective = self.effective_options(options);
        expand::expand(compose, &self.indexes, &self.value_sets, &effective)
    }

    /// Retrieve the details of one concept.
    pub fn lookup(&self, system: &str, code: &str) -> Result<ConceptDetails> {
        let index = self.index(system)?;
        let concept = index.lookup(code).ok_or_else(|| Error::CodeNotFound {
            system: system.to_string(),
            code: code.to_string(),
        })?;
        Ok(ConceptDetails {
            system: system.to_string(),
            version: index.version().map(str::to_string),
            code: concept.code.clone(),
            display: concept.display.clone(),
            definition: concept.definition.clone(),
            designation: concept.designations.clone(),
            property: concept.properties.clone(),
            inactive: concept.inactive,
        })
    }

    /// Validate a code against its code system and, when a value set is
    /// given, against the value set's membership. The supplied display is
    /// checked against the known one.
    pub fn validate_code(
        &self,
        value_set_url: Option<&str>,
        system: &str,
        code: &str,
        display: Option<&str>,
    ) -> Result<CodeValidation> {
        let known_display = match value_set_url {
            Some(url) => {
                // Membership is checked against the full (unpaged) expansion.
                let options = ExpandOptions {
                    offset: 0,
                    count: None,
                    ..ExpandOptions::default()
                };
                let expansion = self.expand(url, &options)?;
                let mut member = expansion
                    .entries
                    .iter()
                    .find(|entry| entry.system == system && entry.code == code)
                    .cloned();
                if member.is_none() && expansion.too_costly {
                    // A truncated expansion cannot prove absence. Membership
                    // is a set question, not a page, so settle it against
                    // the uncapped set.
                    member = self.uncapped_member(url, system, code)?;
                }
                let Some(member) = member else {
                    return Ok(CodeValidation {
                        valid: false,
                        display: None,
                        message: Some(format!(
                            "code '{code}' from system '{system}' is not in value set '{url}'"
                        )),
                    });
                };
                member.display
            }
            None => {
                let index = self.index(system)?;
                let Some(concept) = index.lookup(code) else {
                    return Ok(CodeValidation {
                        valid: false,
                        display: None,
                        message: Some(format!(
                            "unknown code '{code}' in system '{system}'"
                        )),
                    });
                };
                concept.display.clone()
            }
        };

        if let (Some(supplied), Some(expected)) = (display, known_display.as_deref()) {
            if supplied != expected {
                return Ok(CodeValidation {
                    valid: true,
                    display: Some(expected.to_string()),
                    message: Some(format!(
                        "display '{supplied}' does not match '{expected}'"
                    )),
                });
            }
        }

        Ok(CodeValidation {
            valid: true,
            display: known_display,
            message: None,
        })
    }

    /// Translate a code across every loaded concept map.
    pub fn translate(
        &self,
        source_system: &str,
        source_code: &str,
        target_system: Option<&str>,
        reverse: bool,
    ) -> TranslateResult {
        let mut matches: Vec<TranslationMatch> = Vec::new();
        for translator in &self.translators {
            let found = if reverse {
                translator.translate_reverse(source_system, source_code, target_system)
            } else {
                translator.translate(source_system, source_code, target_system)
            };
            for m in found {
                if !matches.contains(&m) {
                    matches.push(m);
                }
            }
        }
        self.finish_translate(matches)
    }

    /// Translate through one specific map, addressed by canonical URL.
    pub fn translate_with_map(
        &self,
        map_url: &str,
        source_system: &str,
        source_code: &str,
        target_system: Option<&str>,
        reverse: bool,
    ) -> Result<TranslateResult> {
        let translator = self
            .translators
            .iter()
            .find(|t| t.url() == map_url)
            .ok_or_else(|| Error::UnknownConceptMap(map_url.to_string()))?;
        let matches = if reverse {
            translator.translate_reverse(source_system, source_code, target_system)
        } else {
            translator.translate(source_system, source_code, target_system)
        };
        Ok(self.finish_translate(matches))
    }

    fn finish_translate(&self, mut matches: Vec<TranslationMatch>) -> TranslateResult {
        // Fill in displays the map itself did not carry.
        for m in &mut matches {
            if m.display.is_none() {
                if let Some(index) = self.indexes.get(&m.system) {
                    if let Some(concept) = index.lookup(&m.code) {
                        m.display = concept.display.clone();
                    }
                }
            }
        }
        let result = matches.iter().any(|m| m.equivalence.is_match());
        TranslateResult { result, matches }
    }

    /// Test the subsumption relationship between two codes of one system.
    pub fn subsumes(&self, system: &str, code_a: &str, code_b: &str) -> Result<SubsumptionOutcome> {
        let index = self.index(system)?;
        for code in [code_a, code_b] {
            if !index.contains(code) {
                return Err(Error::CodeNotFound {
                    system: system.to_string(),
                    code: code.to_string(),
                });
            }
        }
        if code_a == code_b {
            return Ok(SubsumptionOutcome::Equivalent);
        }
        if index.is_a(code_b, code_a) {
            return Ok(SubsumptionOutcome::Subsumes);
        }
        if index.is_a(code_a, code_b) {
            return Ok(SubsumptionOutcome::SubsumedBy);
        }
        Ok(SubsumptionOutcome::NotSubsumed)
    }

    /// Register codings into a named closure table and return the delta.
    pub fn closure(&self, name: &str, concepts: &[Coding]) -> ClosureUpdate {
        let ctx = ClosureContext {
            indexes: &self.indexes,
            translators: &self.translators,
        };
        self.closures.update(name, concepts, &ctx)
    }

    /// Drop a closure table so the next update starts over.
    pub fn closure_reset(&self, name: &str) -> bool {
        self.closures.reset(name)
    }

    pub fn clear_expansion_cache(&self) {
        self.expansion_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Look for a code in the full, untruncated expansion of a value set.
    fn uncapped_member(
        &self,
        url: &str,
        system: &str,
        code: &str,
    ) -> Result<Option<ExpansionEntry>> {
        let value_set = self
            .value_sets
            .get(url)
            .ok_or_else(|| Error::UnknownValueSet(url.to_string()))?;
        let compose = value_set
            .compose
            .as_ref()
            .ok_or_else(|| Error::UnknownValueSet(url.to_string()))?;
        let options = ExpandOptions {
            max_entries: usize::MAX,
            max_depth: self.config.max_recursion_depth,
            filter_cache: Some(Arc::clone(&self.filter_cache)),
            ..ExpandOptions::default()
        };
        let expansion = expand::expand(compose, &self.indexes, &self.value_sets, &options)?;
        Ok(expansion
            .entries
            .iter()
            .find(|entry| entry.system == system && entry.code == code)
            .cloned())
    }

    fn index(&self, system: &str) -> Result<&Arc<ConceptIndex>> {
        self.indexes
            .get(system)
            .ok_or_else(|| Error::UnknownCodeSystem(system.to_string()))
    }

    /// Apply the configured limits on top of the caller's options.
    fn effective_options(&self, options: &ExpandOptions) -> ExpandOptions {
        let mut effective = options.clone();
        effective.max_entries = effective
            .max_entries
            .min(self.config.max_expansion_entries);
        effective.max_depth = effective.max_depth.min(self.config.max_recursion_depth);
        if effective.filter_cache.is_none() {
            effective.filter_cache = Some(Arc::clone(&self.filter_cache));
        }
        effective
    }

    fn cache_key(&self, value_set: &ValueSet, options: &ExpandOptions) -> String {
        let mut hasher = Sha256::new();
        hasher.update(value_set.url.as_bytes());
        hasher.update(value_set.version.as_deref().unwrap_or("").as_bytes());
        hasher.update(
            format!(
                "|{}|{:?}|{}|{}|{}",
                options.offset,
                options.count,
                options.active_only,
                options.max_entries,
                options.max_depth
            )
            .as_bytes(),
        );
        format!("{:x}", hasher.finalize())
    }

    /// Construct a cancel token callers can hand to [`ExpandOptions`].
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken::new()
    }
}

impl Default for TerminologyService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glossa_models::{
        CodeSystemConcept, CodeSystemContentMode, ComposeInclude, PublicationStatus,
        ValueSetCompose,
    };

    fn illness_system() -> CodeSystem {
        let mut cs = CodeSystem::new(
            "http://example.org/cs/illness",
            PublicationStatus::Active,
            CodeSystemContentMode::Complete,
        );
        let mut root = CodeSystemConcept::new("respiratory-illness").with_display("Respiratory illness");
        root.concept = vec![
            CodeSystemConcept::new("flu").with_display("Influenza"),
            CodeSystemConcept::new("cold").with_display("Common cold"),
        ];
        cs.concept = vec![root, CodeSystemConcept::new("fracture").with_display("Fracture")];
        cs
    }

    fn whole_system_value_set(url: &str) -> ValueSet {
        let mut vs = ValueSet::new(url, PublicationStatus::Active);
        vs.compose = Some(ValueSetCompose {
            inactive: None,
            include: vec![ComposeInclude {
                system: Some("http://example.org/cs/illness".to_string()),
                ..ComposeInclude::default()
            }],
            exclude: Vec::new(),
        });
        vs
    }

    fn make_service() -> TerminologyService {
        let mut service = TerminologyService::new();
        service.add_code_system(&illness_system()).unwrap();
        service.add_value_set(whole_system_value_set("http://example.org/vs/all"));
        service
    }

    #[test]
    fn expand_returns_cached_result_on_second_call() {
        let service = make_service();
        let options = ExpandOptions::default();
        let first = service.expand("http://example.org/vs/all", &options).unwrap();
        let second = service.expand("http://example.org/vs/all", &options).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.total, 4);
    }

    #[test]
    fn lookup_returns_display_and_properties() {
        let service = make_service();
        let details = service.lookup("http://example.org/cs/illness", "flu").unwrap();
        assert_eq!(details.system, "http://example.org/cs/illness");
        assert_eq!(details.display.as_deref(), Some("Influenza"));
        assert!(!details.inactive);
    }

    #[test]
    fn validate_code_accepts_members_and_rejects_others() {
        let service = make_service();
        let ok = service
            .validate_code(
                Some("http://example.org/vs/all"),
                "http://example.org/cs/illness",
                "flu",
                None,
            )
            .unwrap();
        assert!(ok.valid);
        assert_eq!(ok.display.as_deref(), Some("Influenza"));

        let missing = service
            .validate_code(
                Some("http://example.org/vs/all"),
                "http://example.org/cs/illness",
                "measles",
                None,
            )
            .unwrap();
        assert!(!missing.valid);
        assert!(missing.message.is_some());
    }

    #[test]
    fn validate_code_sees_members_beyond_the_truncation_cut() {
        let mut service = TerminologyService::with_config(TerminologyConfig {
            max_expansion_entries: 2,
            ..TerminologyConfig::default()
        });
        service.add_code_system(&illness_system()).unwrap();
        service.add_value_set(whole_system_value_set("http://example.org/vs/all"));

        // Sorts past the two-entry cut, so the truncated expansion does
        // not carry it.
        let member = service
            .validate_code(
                Some("http://example.org/vs/all"),
                "http://example.org/cs/illness",
                "respiratory-illness",
                None,
            )
            .unwrap();
        assert!(member.valid);
        assert_eq!(member.display.as_deref(), Some("Respiratory illness"));

        let missing = service
            .validate_code(
                Some("http://example.org/vs/all"),
                "http://example.org/cs/illness",
                "measles",
                None,
            )
            .unwrap();
        assert!(!missing.valid);
    }

    #[test]
    fn validate_code_without_a_value_set_checks_the_code_system() {
        let service = make_service();
        let ok = service
            .validate_code(None, "http://example.org/cs/illness", "flu", None)
            .unwrap();
        assert!(ok.valid);

        let missing = service
            .validate_code(None, "http://example.org/cs/illness", "measles", None)
            .unwrap();
        assert!(!missing.valid);
    }

    #[test]
    fn validate_code_flags_display_mismatch() {
        let service = make_service();
        let validation = service
            .validate_code(
                Some("http://example.org/vs/all"),
                "http://example.org/cs/illness",
                "flu",
                Some("Sniffles"),
            )
            .unwrap();
        assert!(validation.valid);
        assert_eq!(validation.display.as_deref(), Some("Influenza"));
        assert!(validation.message.is_some());
    }

    #[test]
    fn subsumes_distinguishes_all_four_outcomes() {
        let service = make_service();
        let sys = "http://example.org/cs/illness";
        assert_eq!(
            service.subsumes(sys, "flu", "flu").unwrap(),
            SubsumptionOutcome::Equivalent
        );
        assert_eq!(
            service.subsumes(sys, "respiratory-illness", "flu").unwrap(),
            SubsumptionOutcome::Subsumes
        );
        assert_eq!(
            service.subsumes(sys, "flu", "respiratory-illness").unwrap(),
            SubsumptionOutcome::SubsumedBy
        );
        assert_eq!(
            service.subsumes(sys, "flu", "fracture").unwrap(),
            SubsumptionOutcome::NotSubsumed
        );
    }

    #[test]
    fn subsumes_rejects_unknown_codes() {
        let service = make_service();
        let err = service
            .subsumes("http://example.org/cs/illness", "flu", "measles")
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn loading_a_vocabulary_invalidates_the_expansion_cache() {
        let mut service = make_service();
        let options = ExpandOptions::default();
        let first = service.expand("http://example.org/vs/all", &options).unwrap();

        service.add_code_system(&illness_system()).unwrap();
        let second = service.expand("http://example.org/vs/all", &options).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.entries, second.entries);
    }
}
