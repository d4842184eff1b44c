//! Concept index
//!
//! Built once per code system from the loaded resource, then read-only:
//! O(1) code lookup, parent/child traversal over the declared hierarchy
//! (a DAG, concepts may have multiple parents), and property retrieval.
//! The transitive ancestor closure is computed lazily and memoized for the
//! lifetime of the index.

use crate::error::{Error, Result};
use glossa_models::{
    CodeSystem, CodeSystemConcept, ConceptDesignation, ConceptProperty, PropertyValue,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// A concept flattened out of the code system tree.
#[derive(Debug, Clone)]
pub struct IndexedConcept {
    pub code: String,
    pub display: Option<String>,
    pub definition: Option<String>,
    pub designations: Vec<ConceptDesignation>,
    pub properties: Vec<ConceptProperty>,
    /// Direct parents: nesting parent plus any `parent` properties.
    pub parents: Vec<String>,
    /// Derived from `inactive` / `status` properties at build time.
    pub inactive: bool,
}

/// Read-after-build index over one code system.
pub struct ConceptIndex {
    system: String,
    version: Option<String>,
    is_a_hierarchy: bool,
    concepts: HashMap<String, IndexedConcept>,
    children: HashMap<String, Vec<String>>,
    property_names: HashSet<String>,
    ancestor_cache: RwLock<HashMap<String, Arc<HashSet<String>>>>,
}

impl ConceptIndex {
    /// Build the index from a loaded code system.
    ///
    /// Fails when a concept declares a parent that does not exist in the
    /// system, or when the parent graph contains a cycle.
    pub fn build(code_system: &CodeSystem) -> Result<Self> {
        let mut concepts: HashMap<String, IndexedConcept> = HashMap::new();
        flatten_concepts(&code_system.concept, None, &mut concepts);

        // Hierarchies default to is-a when unstated, matching common
        // terminology publishing practice.
        let is_a_hierarchy = code_system
            .hierarchy_meaning
            .as_deref()
            .map(|m| m == "is-a")
            .unwrap_or(true);

        let mut property_names: HashSet<String> = HashSet::new();
        property_names.insert("code".to_string());
        property_names.insert("parent".to_string());
        for def in &code_system.property {
            property_names.insert(def.code.clone());
        }
        for concept in concepts.values() {
            for prop in &concept.properties {
                property_names.insert(prop.code.clone());
            }
        }

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for concept in concepts.values() {
            for parent in &concept.parents {
                if !concepts.contains_key(parent) {
                    return Err(Error::MalformedHierarchy {
                        system: code_system.url.clone(),
                        code: concept.code.clone(),
                        parent: parent.clone(),
                    });
                }
                children
                    .entry(parent.clone())
                    .or_default()
                    .push(concept.code.clone());
            }
        }
        // Deterministic traversal order regardless of load order.
        for child_list in children.values_mut() {
            child_list.sort();
            child_list.dedup();
        }

        detect_cycles(&code_system.url, &concepts)?;

        tracing::debug!(
            system = %code_system.url,
            concepts = concepts.len(),
            "built concept index"
        );

        Ok(Self {
            system: code_system.url.clone(),
            version: code_system.version.clone(),
            is_a_hierarchy,
            concepts,
            children,
            property_names,
            ancestor_cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Whether the declared hierarchy carries is-a (subsumption) meaning.
    pub fn is_a_hierarchy(&self) -> bool {
        self.is_a_hierarchy
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    pub fn lookup(&self, code: &str) -> Option<&IndexedConcept> {
        self.concepts.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.concepts.contains_key(code)
    }

    /// All codes in the system, unordered.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.concepts.keys().map(String::as_str)
    }

    /// Whether the property name is declared or observed in this system.
    pub fn knows_property(&self, name: &str) -> bool {
        self.property_names.contains(name)
    }

    /// First value of the named property on a concept.
    pub fn property_value(&self, code: &str, name: &str) -> Option<&PropertyValue> {
        self.concepts.get(code).and_then(|c| {
            c.properties
                .iter()
                .find(|p| p.code == name)
                .map(|p| &p.value)
        })
    }

    /// The set of all transitive ancestors of a code.
    ///
    /// Computed on first use and memoized; the index is immutable so the
    /// cache is never invalidated.
    pub fn ancestors_of(&self, code: &str) -> Result<Arc<HashSet<String>>> {
        if !self.concepts.contains_key(code) {
            return Err(Error::CodeNotFound {
                system: self.system.clone(),
                code: code.to_string(),
            });
        }

        let cache = self
            .ancestor_cache
            .read()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.get(code) {
            return Ok(Arc::clone(cached));
        }
        drop(cache);

        let mut ancestors: HashSet<String> = HashSet::new();
        let mut stack: Vec<&str> = vec![code];
        while let Some(current) = stack.pop() {
            if let Some(concept) = self.concepts.get(current) {
                for parent in &concept.parents {
                    if ancestors.insert(parent.clone()) {
                        stack.push(parent);
                    }
                }
            }
        }

        let ancestors = Arc::new(ancestors);
        self.ancestor_cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(code.to_string(), Arc::clone(&ancestors));
        Ok(ancestors)
    }

    /// All transitive descendants of a code (excluding the code itself).
    /// Unknown codes yield an empty set.
    pub fn descendants_of(&self, code: &str) -> HashSet<String> {
        let mut descendants: HashSet<String> = HashSet::new();
        let mut stack: Vec<&str> = vec![code];
        while let Some(current) = stack.pop() {
            if let Some(child_list) = self.children.get(current) {
                for child in child_list {
                    if descendants.insert(child.clone()) {
                        stack.push(child);
                    }
                }
            }
        }
        descendants
    }

    /// `candidate_ancestor == code || candidate_ancestor ∈ ancestors_of(code)`.
    /// Unknown codes are never subsumed by anything.
    pub fn is_a(&self, code: &str, candidate_ancestor: &str) -> bool {
        if !self.concepts.contains_key(code) {
            return false;
        }
        if code == candidate_ancestor {
            return true;
        }
        match self.ancestors_of(code) {
            Ok(ancestors) => ancestors.contains(candidate_ancestor),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for ConceptIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConceptIndex")
            .field("system", &self.system)
            .field("version", &self.version)
            .field("concepts", &self.concepts.len())
            .finish()
    }
}

fn flatten_concepts(
    tree: &[CodeSystemConcept],
    nesting_parent: Option<&str>,
    out: &mut HashMap<String, IndexedConcept>,
) {
    for concept in tree {
        let mut parents: Vec<String> = Vec::new();
        if let Some(parent) = nesting_parent {
            parents.push(parent.to_string());
        }
        for prop in &concept.property {
            if prop.code == "parent" {
                if let PropertyValue::Code(parent) | PropertyValue::String(parent) = &prop.value {
                    if !parents.contains(parent) {
                        parents.push(parent.clone());
                    }
                }
            }
        }

        let inactive = concept.property.iter().any(|p| match (&p.code[..], &p.value) {
            ("inactive", PropertyValue::Boolean(true)) => true,
            ("status", PropertyValue::Code(s)) | ("status", PropertyValue::String(s)) => {
                s == "retired" || s == "inactive"
            }
            _ => false,
        });

        out.insert(
            concept.code.clone(),
            IndexedConcept {
                code: concept.code.clone(),
                display: concept.display.clone(),
                definition: concept.definition.clone(),
                designations: concept.designation.clone(),
                properties: concept.property.clone(),
                parents,
                inactive,
            },
        );

        flatten_concepts(&concept.concept, Some(&concept.code), out);
    }
}

/// Reject cyclic parent graphs at build time with an iterative
/// three-color DFS over the parent edges.
fn detect_cycles(system: &str, concepts: &HashMap<String, IndexedConcept>) -> Result<()> {
    const UNSEEN: u8 = 0;
    const IN_PROGRESS: u8 = 1;
    const DONE: u8 = 2;

    let mut state: HashMap<&str, u8> = HashMap::with_capacity(concepts.len());

    for start in concepts.keys() {
        if *state.get(start.as_str()).unwrap_or(&UNSEEN) != UNSEEN {
            continue;
        }
        // (code, next parent position) pairs form the explicit DFS stack.
        let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
        state.insert(start.as_str(), IN_PROGRESS);

        while let Some((code, pos)) = stack.pop() {
            let parents = concepts
                .get(code)
                .map(|c| c.parents.as_slice())
                .unwrap_or(&[]);
            if pos < parents.len() {
                stack.push((code, pos + 1));
                let parent = parents[pos].as_str();
                match *state.get(parent).unwrap_or(&UNSEEN) {
                    IN_PROGRESS => {
                        return Err(Error::CyclicHierarchy {
                            system: system.to_string(),
                            code: parent.to_string(),
                        });
                    }
                    UNSEEN => {
                        state.insert(parent, IN_PROGRESS);
                        stack.push((parent, 0));
                    }
                    _ => {}
                }
            } else {
                state.insert(code, DONE);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glossa_models::{CodeSystemContentMode, PublicationStatus};

    fn make_system(concepts: Vec<CodeSystemConcept>) -> CodeSystem {
        let mut cs = CodeSystem::new(
            "http://example.org/cs/test",
            PublicationStatus::Active,
            CodeSystemContentMode::Complete,
        );
        cs.concept = concepts;
        cs
    }

    fn respiratory_system() -> CodeSystem {
        let mut root = CodeSystemConcept::new("respiratory-illness")
            .with_display("Respiratory illness");
        root.concept = vec![
            CodeSystemConcept::new("flu").with_display("Influenza"),
            CodeSystemConcept::new("cold").with_display("Common cold"),
        ];
        make_system(vec![root])
    }

    #[test]
    fn lookup_and_hierarchy() {
        let index = ConceptIndex::build(&respiratory_system()).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(
            index.lookup("flu").unwrap().display.as_deref(),
            Some("Influenza")
        );
        assert!(index.lookup("measles").is_none());

        let ancestors = index.ancestors_of("flu").unwrap();
        assert_eq!(ancestors.len(), 1);
        assert!(ancestors.contains("respiratory-illness"));

        let descendants = index.descendants_of("respiratory-illness");
        assert_eq!(descendants.len(), 2);
        assert!(descendants.contains("flu"));
        assert!(descendants.contains("cold"));
    }

    #[test]
    fn is_a_is_reflexive_and_antisymmetric_for_unrelated_codes() {
        let index = ConceptIndex::build(&respiratory_system()).unwrap();
        assert!(index.is_a("flu", "flu"));
        assert!(index.is_a("flu", "respiratory-illness"));
        assert!(!index.is_a("respiratory-illness", "flu"));
        assert!(!index.is_a("flu", "cold"));
        assert!(!index.is_a("cold", "flu"));
    }

    #[test]
    fn multiple_parents_via_parent_property() {
        let mut cs = respiratory_system();
        cs.concept.push(CodeSystemConcept::new("infection"));
        cs.concept
            .push(CodeSystemConcept::new("viral-flu").with_parent("flu").with_parent("infection"));
        let index = ConceptIndex::build(&cs).unwrap();

        let ancestors = index.ancestors_of("viral-flu").unwrap();
        assert!(ancestors.contains("flu"));
        assert!(ancestors.contains("infection"));
        assert!(ancestors.contains("respiratory-illness"));
    }

    #[test]
    fn missing_parent_is_rejected_at_build() {
        let cs = make_system(vec![CodeSystemConcept::new("orphan").with_parent("nowhere")]);
        let err = ConceptIndex::build(&cs).unwrap_err();
        assert!(matches!(err, Error::MalformedHierarchy { parent, .. } if parent == "nowhere"));
    }

    #[test]
    fn cyclic_parent_graph_is_rejected_at_build() {
        let cs = make_system(vec![
            CodeSystemConcept::new("a").with_parent("b"),
            CodeSystemConcept::new("b").with_parent("c"),
            CodeSystemConcept::new("c").with_parent("a"),
        ]);
        let err = ConceptIndex::build(&cs).unwrap_err();
        assert!(matches!(err, Error::CyclicHierarchy { .. }));
    }

    #[test]
    fn inactive_is_derived_from_properties() {
        let mut cs = respiratory_system();
        let mut retired = CodeSystemConcept::new("grippe").with_display("Grippe (retired)");
        retired.property.push(ConceptProperty {
            code: "status".to_string(),
            value: PropertyValue::Code("retired".to_string()),
        });
        cs.concept.push(retired);

        let index = ConceptIndex::build(&cs).unwrap();
        assert!(index.lookup("grippe").unwrap().inactive);
        assert!(!index.lookup("flu").unwrap().inactive);
    }

    #[test]
    fn unknown_code_ancestors_is_not_found() {
        let index = ConceptIndex::build(&respiratory_system()).unwrap();
        let err = index.ancestors_of("measles").unwrap_err();
        assert!(err.is_not_found());
    }
}
