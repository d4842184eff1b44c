//! Value set expansion
//!
//! Evaluates compose rules (explicit codes, AND-combined filters, nested
//! value set references) against the loaded concept indexes, subtracts
//! exclusions, and produces a deduplicated expansion with a stable
//! (system, code) order so repeated expansions of an unchanged input are
//! byte-identical. Truncation is a degraded success (`too_costly`), never
//! a failure; paging is applied last so pages are stable across calls.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::filter::{self, FilterCache};
use crate::index::ConceptIndex;
use glossa_models::{
    ComposeInclude, ExpansionContains, ValueSet, ValueSetCompose, ValueSetExpansion,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Loaded concept indexes keyed by system URI.
pub type IndexSet = HashMap<String, Arc<ConceptIndex>>;

/// Resolves nested value set references during expansion.
pub trait ValueSetResolver {
    fn resolve(&self, url: &str) -> Option<&ValueSet>;
}

impl ValueSetResolver for HashMap<String, ValueSet> {
    fn resolve(&self, url: &str) -> Option<&ValueSet> {
        self.get(url)
    }
}

/// An empty resolver for composes without nested references.
pub struct NoNestedValueSets;

impl ValueSetResolver for NoNestedValueSets {
    fn resolve(&self, _url: &str) -> Option<&ValueSet> {
        None
    }
}

/// Options controlling one expansion call.
#[derive(Debug, Clone)]
pub struct ExpandOptions {
    /// Paging offset into the full sorted set
    pub offset: usize,

    /// Page size; `None` returns everything from the offset on
    pub count: Option<usize>,

    /// Drop concepts marked inactive in their code system
    pub active_only: bool,

    /// Truncate (and flag `too_costly`) beyond this many entries
    pub max_entries: usize,

    /// Maximum nesting depth for value set references
    pub max_depth: usize,

    /// Caller-supplied abort signal, checked between evaluation steps
    pub cancel: Option<CancelToken>,

    /// Shared memoization of filter results across expansions
    pub filter_cache: Option<Arc<FilterCache>>,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            count: None,
            active_only: false,
            max_entries: 10_000,
            max_depth: 10,
            cancel: None,
            filter_cache: None,
        }
    }
}

/// One code in an expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionEntry {
    pub system: String,
    pub code: String,
    pub display: Option<String>,
    pub inactive: bool,
}

/// The result of expanding a compose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    /// Entries in stable (system, code) order, after truncation and paging
    pub entries: Vec<ExpansionEntry>,

    /// Number of codes matched by the compose (after `active_only`,
    /// before truncation and paging)
    pub total: usize,

    /// The paging offset this page starts at
    pub offset: usize,

    /// Set when the match set exceeded `max_entries` and was truncated
    pub too_costly: bool,
}

impl Expansion {
    /// Render as the resource-level expansion container, stamped with a
    /// fresh identifier and timestamp.
    pub fn to_value_set_expansion(&self) -> ValueSetExpansion {
        ValueSetExpansion {
            identifier: Some(format!("urn:uuid:{}", uuid::Uuid::new_v4())),
            timestamp: chrono::Utc::now().to_rfc3339(),
            total: Some(self.total as i64),
            offset: Some(self.offset as i64),
            contains: self
                .entries
                .iter()
                .map(|e| ExpansionContains {
                    system: e.system.clone(),
                    code: e.code.clone(),
                    display: e.display.clone(),
                    inactive: if e.inactive { Some(true) } else { None },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct EntryData {
    display: Option<String>,
    inactive: bool,
}

type SelectedSet = BTreeMap<(String, String), EntryData>;

/// Expand a compose definition against the loaded indexes.
pub fn expand(
    compose: &ValueSetCompose,
    indexes: &IndexSet,
    resolver: &dyn ValueSetResolver,
    options: &ExpandOptions,
) -> Result<Expansion> {
    let mut visiting: Vec<String> = Vec::new();
    let selected = collect_compose(compose, indexes, resolver, options, 0, &mut visiting)?;

    let mut matched: Vec<ExpansionEntry> = selected
        .into_iter()
        .filter(|(_, data)| !(options.active_only && data.inactive))
        .map(|((system, code), data)| ExpansionEntry {
            system,
            code,
            display: data.display,
            inactive: data.inactive,
        })
        .collect();

    let total = matched.len();
    let too_costly = total > options.max_entries;
    if too_costly {
        tracing::warn!(
            total,
            max_entries = options.max_entries,
            "expansion truncated: too costly"
        );
        matched.truncate(options.max_entries);
    }

    let entries: Vec<ExpansionEntry> = match options.count {
        Some(count) => matched.into_iter().skip(options.offset).take(count).collect(),
        None => matched.into_iter().skip(options.offset).collect(),
    };

    Ok(Expansion {
        entries,
        total,
        offset: options.offset,
        too_costly,
    })
}

/// Evaluate includes minus excludes for one compose, recursing into
/// nested value set references.
fn collect_compose(
    compose: &ValueSetCompose,
    indexes: &IndexSet,
    resolver: &dyn ValueSetResolver,
    options: &ExpandOptions,
    depth: usize,
    visiting: &mut Vec<String>,
) -> Result<SelectedSet> {
    let mut included = SelectedSet::new();
    for rule in &compose.include {
        collect_rule(rule, indexes, resolver, options, depth, visiting, &mut included)?;
    }

    if !compose.exclude.is_empty() {
        let mut excluded = SelectedSet::new();
        for rule in &compose.exclude {
            collect_rule(rule, indexes, resolver, options, depth, visiting, &mut excluded)?;
        }
        for key in excluded.into_keys() {
            included.remove(&key);
        }
    }

    Ok(included)
}

/// Evaluate a single include/exclude rule into `out`.
fn collect_rule(
    rule: &ComposeInclude,
    indexes: &IndexSet,
    resolver: &dyn ValueSetResolver,
    options: &ExpandOptions,
    depth: usize,
    visiting: &mut Vec<String>,
    out: &mut SelectedSet,
) -> Result<()> {
    if let Some(cancel) = &options.cancel {
        cancel.check()?;
    }

    if let Some(system) = rule.system.as_deref() {
        // An unknown system must be reported: silently skipping it would
        // produce an under-inclusive expansion.
        let index = indexes
            .get(system)
            .ok_or_else(|| Error::UnknownCodeSystem(system.to_string()))?;

        for concept in &rule.concept {
            let (display, inactive) = match index.lookup(&concept.code) {
                Some(found) => (
                    concept.display.clone().or_else(|| found.display.clone()),
                    found.inactive,
                ),
                // Explicitly listed codes are taken at face value even
                // when the loaded system does not carry them.
                None => (concept.display.clone(), false),
            };
            out.insert(
                (system.to_string(), concept.code.clone()),
                EntryData { display, inactive },
            );
        }

        if !rule.filter.is_empty() {
            let mut matches: Option<Vec<String>> = None;
            for vs_filter in &rule.filter {
                if let Some(cancel) = &options.cancel {
                    cancel.check()?;
                }
                let filtered: Arc<Vec<String>> = match &options.filter_cache {
                    Some(cache) => cache.evaluate(vs_filter, index)?,
                    None => Arc::new(filter::evaluate_to_set(vs_filter, index)?),
                };
                matches = Some(match matches {
                    // Filters within a rule are conjunctive.
                    Some(previous) => previous
                        .into_iter()
                        .filter(|code| filtered.binary_search(code).is_ok())
                        .collect(),
                    None => filtered.as_ref().clone(),
                });
            }
            for code in matches.unwrap_or_default() {
                insert_from_index(out, index, system, &code);
            }
        }

        if rule.concept.is_empty() && rule.filter.is_empty() && rule.value_set.is_empty() {
            // The rule selects the entire system.
            for code in index.codes() {
                insert_from_index(out, index, system, code);
            }
        }
    }

    for vs_url in &rule.value_set {
        let nested = expand_reference(vs_url, indexes, resolver, options, depth, visiting)?;
        out.extend(nested);
    }

    Ok(())
}

fn insert_from_index(out: &mut SelectedSet, index: &ConceptIndex, system: &str, code: &str) {
    if let Some(concept) = index.lookup(code) {
        out.insert(
            (system.to_string(), code.to_string()),
            EntryData {
                display: concept.display.clone(),
                inactive: concept.inactive,
            },
        );
    }
}

/// Expand a referenced value set, guarding against reference cycles and
/// runaway nesting.
fn expand_reference(
    url: &str,
    indexes: &IndexSet,
    resolver: &dyn ValueSetResolver,
    options: &ExpandOptions,
    depth: usize,
    visiting: &mut Vec<String>,
) -> Result<SelectedSet> {
    if visiting.iter().any(|seen| seen == url) || depth >= options.max_depth {
        return Err(Error::ValueSetCycle(url.to_string()));
    }

    let value_set = resolver
        .resolve(url)
        .ok_or_else(|| Error::UnknownValueSet(url.to_string()))?;

    let Some(compose) = &value_set.compose else {
        // A reference without a compose contributes nothing.
        return Ok(SelectedSet::new());
    };

    visiting.push(url.to_string());
    let result = collect_compose(compose, indexes, resolver, options, depth + 1, visiting);
    visiting.pop();
    result
}
