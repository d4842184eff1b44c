//! Concept map translation
//!
//! Resolves source→target code equivalences from a loaded concept map.
//! Forward and inverted indexes are built once per map load; translation
//! afterwards is read-only lookup. A missing mapping is an empty match
//! list — "known to have no mapping" — never an error.

use glossa_models::{ConceptMap, Equivalence, UnmappedMode};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// One resolved mapping for a source code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationMatch {
    pub system: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    pub equivalence: Equivalence,
}

/// Fixed-code fallback carried by a group's `unmapped` element.
#[derive(Debug, Clone)]
struct UnmappedFixed {
    source: String,
    target: String,
    code: String,
    display: Option<String>,
}

/// Read-only translator over one concept map version.
pub struct ConceptMapTranslator {
    url: String,
    version: Option<String>,
    forward: HashMap<(String, String), Vec<TranslationMatch>>,
    reverse: HashMap<(String, String), Vec<TranslationMatch>>,
    unmapped_fixed: Vec<UnmappedFixed>,
    chain: Option<Arc<ConceptMapTranslator>>,
}

impl ConceptMapTranslator {
    /// Build the forward and inverted indexes from a loaded map.
    pub fn new(map: &ConceptMap) -> Self {
        let mut forward: HashMap<(String, String), Vec<TranslationMatch>> = HashMap::new();
        let mut reverse: HashMap<(String, String), Vec<TranslationMatch>> = HashMap::new();
        let mut unmapped_fixed = Vec::new();

        for group in &map.group {
            for element in &group.element {
                for target in &element.target {
                    forward
                        .entry((group.source.clone(), element.code.clone()))
                        .or_default()
                        .push(TranslationMatch {
                            system: group.target.clone(),
                            code: target.code.clone(),
                            display: target.display.clone(),
                            equivalence: target.equivalence,
                        });
                    reverse
                        .entry((group.target.clone(), target.code.clone()))
                        .or_default()
                        .push(TranslationMatch {
                            system: group.source.clone(),
                            code: element.code.clone(),
                            display: element.display.clone(),
                            equivalence: target.equivalence,
                        });
                }
            }

            if let Some(unmapped) = &group.unmapped {
                if unmapped.mode == UnmappedMode::Fixed {
                    if let Some(code) = &unmapped.code {
                        unmapped_fixed.push(UnmappedFixed {
                            source: group.source.clone(),
                            target: group.target.clone(),
                            code: code.clone(),
                            display: unmapped.display.clone(),
                        });
                    }
                }
            }
        }

        tracing::debug!(url = %map.url, entries = forward.len(), "built concept map translator");

        Self {
            url: map.url.clone(),
            version: map.version.clone(),
            forward,
            reverse,
            unmapped_fixed,
            chain: None,
        }
    }

    /// Configure a second map (intermediate→target) consulted when a
    /// source code has no direct target.
    pub fn with_chain(mut self, chain: Arc<ConceptMapTranslator>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Systems this map translates between, as (source, target) pairs.
    pub fn system_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward
            .iter()
            .flat_map(|((source, _), matches)| {
                matches
                    .iter()
                    .map(move |m| (source.as_str(), m.system.as_str()))
            })
    }

    /// Translate a source code, optionally restricted to one target
    /// system. An empty result is the explicit "unmatched" answer.
    pub fn translate(
        &self,
        source_system: &str,
        source_code: &str,
        target_system: Option<&str>,
    ) -> Vec<TranslationMatch> {
        let key = (source_system.to_string(), source_code.to_string());

        let direct: Vec<TranslationMatch> = self
            .forward
            .get(&key)
            .map(|matches| {
                matches
                    .iter()
                    .filter(|m| target_system.map_or(true, |want| m.system == want))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if !direct.is_empty() {
            return direct;
        }

        // Group-level fixed fallback for codes the map does not list.
        if !self.forward.contains_key(&key) {
            let fixed: Vec<TranslationMatch> = self
                .unmapped_fixed
                .iter()
                .filter(|u| {
                    u.source == source_system
                        && target_system.map_or(true, |want| u.target == want)
                })
                .map(|u| TranslationMatch {
                    system: u.target.clone(),
                    code: u.code.clone(),
                    display: u.display.clone(),
                    equivalence: Equivalence::Inexact,
                })
                .collect();
            if !fixed.is_empty() {
                return fixed;
            }
        }

        // No direct target: chain through the intermediate map, composing
        // equivalences by taking the weaker of the two hops.
        if let Some(chain) = &self.chain {
            let mut chained = Vec::new();
            for hop in self
                .forward
                .get(&key)
                .map(Vec::as_slice)
                .unwrap_or_default()
            {
                for onward in chain.translate(&hop.system, &hop.code, target_system) {
                    chained.push(TranslationMatch {
                        system: onward.system,
                        code: onward.code,
                        display: onward.display,
                        equivalence: Equivalence::weaker(hop.equivalence, onward.equivalence),
                    });
                }
            }
            return chained;
        }

        Vec::new()
    }

    /// Reverse translation (target → source) over the prebuilt inverted
    /// index, optionally restricted to one source system.
    pub fn translate_reverse(
        &self,
        target_system: &str,
        target_code: &str,
        source_system: Option<&str>,
    ) -> Vec<TranslationMatch> {
        self.reverse
            .get(&(target_system.to_string(), target_code.to_string()))
            .map(|matches| {
                matches
                    .iter()
                    .filter(|m| source_system.map_or(true, |want| m.system == want))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ConceptMapTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConceptMapTranslator")
            .field("url", &self.url)
            .field("entries", &self.forward.len())
            .field("chained", &self.chain.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glossa_models::{
        ConceptMapGroup, ConceptMapGroupElement, ConceptMapGroupUnmapped, ConceptMapTarget,
        PublicationStatus,
    };

    fn make_map(url: &str, groups: Vec<ConceptMapGroup>) -> ConceptMap {
        let mut map = ConceptMap::new(url, PublicationStatus::Active);
        map.group = groups;
        map
    }

    fn make_group(
        source: &str,
        target: &str,
        mappings: &[(&str, &str, Equivalence)],
    ) -> ConceptMapGroup {
        ConceptMapGroup {
            source: source.to_string(),
            target: target.to_string(),
            element: mappings
                .iter()
                .map(|(src, tgt, eq)| ConceptMapGroupElement {
                    code: src.to_string(),
                    display: None,
                    target: vec![ConceptMapTarget {
                        code: tgt.to_string(),
                        display: None,
                        equivalence: *eq,
                    }],
                })
                .collect(),
            unmapped: None,
        }
    }

    #[test]
    fn direct_translation() {
        let map = make_map(
            "http://example.org/cm/a-to-x",
            vec![make_group("sys1", "sys2", &[("A", "X", Equivalence::Equivalent)])],
        );
        let translator = ConceptMapTranslator::new(&map);

        let matches = translator.translate("sys1", "A", Some("sys2"));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].system, "sys2");
        assert_eq!(matches[0].code, "X");
        assert_eq!(matches[0].equivalence, Equivalence::Equivalent);
    }

    #[test]
    fn missing_mapping_is_empty_not_error() {
        let map = make_map(
            "http://example.org/cm/a-to-x",
            vec![make_group("sys1", "sys2", &[("A", "X", Equivalence::Equivalent)])],
        );
        let translator = ConceptMapTranslator::new(&map);

        assert!(translator.translate("sys1", "A", Some("sys3")).is_empty());
        assert!(translator.translate("sys1", "B", None).is_empty());
    }

    #[test]
    fn chained_translation_takes_weaker_equivalence() {
        let first = make_map(
            "http://example.org/cm/one-two",
            vec![make_group("sys1", "sys2", &[("A", "M", Equivalence::Equivalent)])],
        );
        let second = make_map(
            "http://example.org/cm/two-three",
            vec![make_group("sys2", "sys3", &[("M", "Z", Equivalence::Wider)])],
        );
        let translator = ConceptMapTranslator::new(&first)
            .with_chain(Arc::new(ConceptMapTranslator::new(&second)));

        // Direct lookup into sys3 finds nothing, so the chain kicks in.
        let matches = translator.translate("sys1", "A", Some("sys3"));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].system, "sys3");
        assert_eq!(matches[0].code, "Z");
        assert_eq!(matches[0].equivalence, Equivalence::Wider);
    }

    #[test]
    fn unmapped_fixed_fallback() {
        let mut group = make_group("sys1", "sys2", &[("A", "X", Equivalence::Equivalent)]);
        group.unmapped = Some(ConceptMapGroupUnmapped {
            mode: UnmappedMode::Fixed,
            code: Some("other".to_string()),
            display: Some("Other".to_string()),
            url: None,
        });
        let translator =
            ConceptMapTranslator::new(&make_map("http://example.org/cm/a-to-x", vec![group]));

        let matches = translator.translate("sys1", "unlisted", Some("sys2"));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].code, "other");
        assert_eq!(matches[0].equivalence, Equivalence::Inexact);
    }

    #[test]
    fn reverse_translation_uses_inverted_index() {
        let map = make_map(
            "http://example.org/cm/a-to-x",
            vec![make_group("sys1", "sys2", &[("A", "X", Equivalence::Narrower)])],
        );
        let translator = ConceptMapTranslator::new(&map);

        let matches = translator.translate_reverse("sys2", "X", None);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].system, "sys1");
        assert_eq!(matches[0].code, "A");
        assert_eq!(matches[0].equivalence, Equivalence::Narrower);
    }
}
