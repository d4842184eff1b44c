//! Filter evaluation
//!
//! Evaluates a single compose filter against a concept index. Validation
//! (unknown property, malformed regex, unknown hierarchy anchor) happens
//! eagerly so a bad filter never partially matches; the matching itself is
//! a lazy, restartable iterator over the index.

use crate::error::{Error, Result};
use crate::index::ConceptIndex;
use glossa_models::{FilterOperator, PropertyValue, ValueSetFilter};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Evaluate a filter against an index, yielding matching codes lazily.
///
/// Each call returns a fresh iterator producing the same sequence for the
/// same filter and index; nothing is cached across calls (see
/// [`FilterCache`] for opt-in memoization).
pub fn evaluate<'a>(
    filter: &ValueSetFilter,
    index: &'a ConceptIndex,
) -> Result<impl Iterator<Item = &'a str> + 'a> {
    let predicate = build_predicate(filter, index)?;
    Ok(index.codes().filter(move |code| predicate(code)))
}

/// Evaluate a filter and collect the matches into a sorted vector.
pub fn evaluate_to_set(filter: &ValueSetFilter, index: &ConceptIndex) -> Result<Vec<String>> {
    let mut codes: Vec<String> = evaluate(filter, index)?.map(str::to_string).collect();
    codes.sort();
    Ok(codes)
}

type Predicate<'a> = Box<dyn Fn(&str) -> bool + 'a>;

fn build_predicate<'a>(
    filter: &ValueSetFilter,
    index: &'a ConceptIndex,
) -> Result<Predicate<'a>> {
    match filter.op {
        FilterOperator::IsA => {
            let anchor = hierarchy_anchor(filter, index)?;
            Ok(Box::new(move |code| index.is_a(code, &anchor)))
        }
        FilterOperator::DescendentOf => {
            let anchor = hierarchy_anchor(filter, index)?;
            Ok(Box::new(move |code| {
                code != anchor && index.is_a(code, &anchor)
            }))
        }
        FilterOperator::IsNotA => {
            let anchor = hierarchy_anchor(filter, index)?;
            Ok(Box::new(move |code| !index.is_a(code, &anchor)))
        }
        FilterOperator::Generalizes => {
            // The upward dual of is-a: the anchor and everything it
            // specializes.
            let anchor = hierarchy_anchor(filter, index)?;
            Ok(Box::new(move |code| index.is_a(&anchor, code)))
        }
        FilterOperator::Equal => {
            let property = known_property(filter, index)?;
            let expected = filter.value.clone();
            Ok(Box::new(move |code| {
                property_string(index, code, &property).as_deref() == Some(expected.as_str())
            }))
        }
        FilterOperator::In => {
            let property = known_property(filter, index)?;
            let values = split_values(&filter.value);
            Ok(Box::new(move |code| {
                property_string(index, code, &property)
                    .is_some_and(|v| values.iter().any(|want| *want == v))
            }))
        }
        FilterOperator::NotIn => {
            let property = known_property(filter, index)?;
            let values = split_values(&filter.value);
            Ok(Box::new(move |code| {
                !property_string(index, code, &property)
                    .is_some_and(|v| values.iter().any(|want| *want == v))
            }))
        }
        FilterOperator::Exists => {
            let property = known_property(filter, index)?;
            let want_present = filter.value != "false";
            Ok(Box::new(move |code| {
                let present = if property == "code" {
                    true
                } else {
                    index.property_value(code, &property).is_some()
                };
                present == want_present
            }))
        }
        FilterOperator::Regex => {
            let property = known_property(filter, index)?;
            // The whole value must match.
            let pattern = format!("^(?:{})$", filter.value);
            let re = regex::Regex::new(&pattern)
                .map_err(|e| invalid(filter, format!("malformed regex: {e}")))?;
            Ok(Box::new(move |code| {
                property_string(index, code, &property).is_some_and(|v| re.is_match(&v))
            }))
        }
    }
}

/// Resolve the anchor code of a hierarchy filter, failing fast when the
/// anchor is not part of the system.
fn hierarchy_anchor(filter: &ValueSetFilter, index: &ConceptIndex) -> Result<String> {
    if !index.contains(&filter.value) {
        return Err(invalid(
            filter,
            format!("anchor code '{}' not in system '{}'", filter.value, index.system()),
        ));
    }
    Ok(filter.value.clone())
}

fn known_property(filter: &ValueSetFilter, index: &ConceptIndex) -> Result<String> {
    if !index.knows_property(&filter.property) {
        return Err(invalid(
            filter,
            format!(
                "unknown property '{}' in system '{}'",
                filter.property,
                index.system()
            ),
        ));
    }
    Ok(filter.property.clone())
}

fn invalid(filter: &ValueSetFilter, reason: String) -> Error {
    Error::InvalidFilter {
        property: filter.property.clone(),
        op: filter.op.as_str().to_string(),
        value: filter.value.clone(),
        reason,
    }
}

fn split_values(raw: &str) -> Vec<String> {
    raw.split(',').map(|v| v.trim().to_string()).collect()
}

/// The value a property filter compares against. `code` is a built-in
/// property naming the concept itself.
fn property_string(index: &ConceptIndex, code: &str, property: &str) -> Option<String> {
    if property == "code" {
        return Some(code.to_string());
    }
    index
        .property_value(code, property)
        .map(PropertyValue::as_comparison_string)
}

/// Opt-in memoization of filter results, scoped to a single index.
///
/// Keys include the system URI so a cache accidentally shared across
/// systems stays correct.
pub struct FilterCache {
    cache: Mutex<LruCache<(String, ValueSetFilter), Arc<Vec<String>>>>,
}

impl FilterCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of materialized filter results currently held.
    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluate through the cache, materializing on first use.
    pub fn evaluate(
        &self,
        filter: &ValueSetFilter,
        index: &ConceptIndex,
    ) -> Result<Arc<Vec<String>>> {
        let key = (index.system().to_string(), filter.clone());
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = cache.get(&key) {
            tracing::debug!(system = %index.system(), "filter cache hit");
            return Ok(Arc::clone(hit));
        }
        drop(cache);

        let codes = Arc::new(evaluate_to_set(filter, index)?);
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(key, Arc::clone(&codes));
        Ok(codes)
    }
}

impl std::fmt::Debug for FilterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterCache")
            .field("entries", &self.len())
            .finish()
    }
}
