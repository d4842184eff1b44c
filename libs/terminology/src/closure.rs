//! Closure table maintenance
//!
//! A closure table tracks the subsumption (and cross-system mapping)
//! relationships among the concepts a client has registered so far. Each
//! update registers new codings, relates them to everything already in the
//! table, and returns only the delta of new relationship rows together
//! with the incremented table version. Re-sending already registered
//! codings is a no-op: empty delta, unchanged version.

use crate::expand::IndexSet;
use crate::translate::ConceptMapTranslator;
use glossa_models::{Coding, Equivalence};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

/// One relationship row. `concept2` subsumes `concept1` for hierarchical
/// rows; for cross-system rows the equivalence is taken from the map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureRow {
    pub equivalence: Equivalence,
    pub concept1: Coding,
    pub concept2: Coding,
}

/// The delta produced by one closure update.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureUpdate {
    pub name: String,

    /// Table version after this update
    pub version: u64,

    /// Relationship rows added by this update, in a stable order
    pub rows: Vec<ClosureRow>,

    /// Codings that could not be related (unknown system or code)
    pub warnings: Vec<String>,
}

/// Lookup context for relating codings: the loaded concept indexes plus
/// any translators usable for cross-system rows.
pub struct ClosureContext<'a> {
    pub indexes: &'a IndexSet,
    pub translators: &'a [Arc<ConceptMapTranslator>],
}

struct ClosureTable {
    version: u64,
    registered: HashMap<(String, String), Coding>,
    rows: HashSet<ClosureRow>,
}

impl ClosureTable {
    fn new() -> Self {
        Self {
            version: 0,
            registered: HashMap::new(),
            rows: HashSet::new(),
        }
    }
}

/// Named closure tables, independently versioned. Tables are created on
/// first use and updated under their own lock so concurrent updates to
/// different tables do not contend.
#[derive(Default)]
pub struct ClosureRegistry {
    tables: RwLock<HashMap<String, Arc<Mutex<ClosureTable>>>>,
}

impl ClosureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register codings into the named table and return the delta of new
    /// relationship rows.
    pub fn update(
        &self,
        name: &str,
        concepts: &[Coding],
        ctx: &ClosureContext<'_>,
    ) -> ClosureUpdate {
        let table = self.table_handle(name);
        let mut table = table.lock().unwrap_or_else(|e| e.into_inner());

        let mut warnings = Vec::new();
        let mut added: Vec<Coding> = Vec::new();
        for coding in concepts {
            let (Some(system), Some(code)) = (&coding.system, &coding.code) else {
                warnings.push(format!("coding without system and code skipped: {coding:?}"));
                continue;
            };
            let key = (system.clone(), code.clone());
            if table.registered.contains_key(&key)
                || added.iter().any(|c| c.system == coding.system && c.code == coding.code)
            {
                continue;
            }
            added.push(coding.clone());
        }

        if added.is_empty() {
            // Idempotent re-poll: nothing new, nothing to report.
            return ClosureUpdate {
                name: name.to_string(),
                version: table.version,
                rows: Vec::new(),
                warnings,
            };
        }

        // Validate each new coding once, so an unresolvable coding records
        // a single warning instead of one per pair it would join.
        let scannable: Vec<Coding> = added
            .iter()
            .filter(|&coding| resolvable(coding, ctx, &mut warnings))
            .cloned()
            .collect();

        // Relate each new coding against everything seen before it, so
        // each unordered pair with at least one new member is visited once.
        let mut known: Vec<Coding> = table.registered.values().cloned().collect();
        known.sort_by(|a, b| (&a.system, &a.code).cmp(&(&b.system, &b.code)));

        let mut delta: Vec<ClosureRow> = Vec::new();
        for coding in &scannable {
            for other in &known {
                if let Some(row) = relate(other, coding, ctx) {
                    if !table.rows.contains(&row) {
                        table.rows.insert(row.clone());
                        delta.push(row);
                    }
                }
            }
            known.push(coding.clone());
        }

        for coding in added {
            // Checked above that both fields are present.
            if let (Some(system), Some(code)) = (coding.system.clone(), coding.code.clone()) {
                table.registered.insert((system, code), coding);
            }
        }
        table.version += 1;

        delta.sort_by(|a, b| {
            (&a.concept1.system, &a.concept1.code, &a.concept2.system, &a.concept2.code)
                .cmp(&(&b.concept1.system, &b.concept1.code, &b.concept2.system, &b.concept2.code))
        });

        tracing::debug!(
            name,
            version = table.version,
            new_rows = delta.len(),
            "closure table updated"
        );

        ClosureUpdate {
            name: name.to_string(),
            version: table.version,
            rows: delta,
            warnings,
        }
    }

    /// Drop the named table. The next update starts over at version 1.
    pub fn reset(&self, name: &str) -> bool {
        self.tables
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some()
    }

    /// Current version of the named table, if it exists.
    pub fn version(&self, name: &str) -> Option<u64> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let table = tables.get(name)?;
        let version = table.lock().unwrap_or_else(|e| e.into_inner()).version;
        Some(version)
    }

    fn table_handle(&self, name: &str) -> Arc<Mutex<ClosureTable>> {
        if let Some(table) = self
            .tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            return Arc::clone(table);
        }
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            tables
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(ClosureTable::new()))),
        )
    }
}

/// Whether a coding can be resolved at all, recording one warning when it
/// cannot. Systems known only through a concept map pass: their codes
/// cannot be checked without an index, but may still relate via mappings.
fn resolvable(coding: &Coding, ctx: &ClosureContext<'_>, warnings: &mut Vec<String>) -> bool {
    let (Some(system), Some(code)) = (coding.system.as_deref(), coding.code.as_deref()) else {
        return false;
    };
    if let Some(index) = ctx.indexes.get(system) {
        if index.contains(code) {
            return true;
        }
        warnings.push(format!("code '{code}' not found in system '{system}'"));
        return false;
    }
    if ctx
        .translators
        .iter()
        .any(|t| t.system_pairs().any(|(source, target)| source == system || target == system))
    {
        return true;
    }
    warnings.push(format!("unknown code system '{system}'"));
    false
}

/// Work out the relationship between two registered codings, if any.
fn relate(a: &Coding, b: &Coding, ctx: &ClosureContext<'_>) -> Option<ClosureRow> {
    let (a_system, a_code) = (a.system.as_deref()?, a.code.as_deref()?);
    let (b_system, b_code) = (b.system.as_deref()?, b.code.as_deref()?);

    if a_system == b_system {
        let index = ctx.indexes.get(a_system)?;
        if !index.is_a_hierarchy() {
            return None;
        }
        // Row convention: concept2 subsumes concept1.
        if index.is_a(b_code, a_code) {
            return Some(ClosureRow {
                equivalence: Equivalence::Subsumes,
                concept1: b.clone(),
                concept2: a.clone(),
            });
        }
        if index.is_a(a_code, b_code) {
            return Some(ClosureRow {
                equivalence: Equivalence::Subsumes,
                concept1: a.clone(),
                concept2: b.clone(),
            });
        }
        return None;
    }

    // Cross-system: relate through a loaded map, in either direction.
    for translator in ctx.translators {
        for found in translator.translate(a_system, a_code, Some(b_system)) {
            if found.code == b_code && found.equivalence.is_match() {
                return Some(ClosureRow {
                    equivalence: found.equivalence,
                    concept1: a.clone(),
                    concept2: b.clone(),
                });
            }
        }
        for found in translator.translate(b_system, b_code, Some(a_system)) {
            if found.code == a_code && found.equivalence.is_match() {
                return Some(ClosureRow {
                    equivalence: found.equivalence,
                    concept1: b.clone(),
                    concept2: a.clone(),
                });
            }
        }
    }
    None
}
