//! Operation-level behavior through the service facade: expand, lookup,
//! validate-code, translate, subsumes and closure working together over
//! one loaded vocabulary set.

use glossa_models::{
    CodeSystem, CodeSystemConcept, CodeSystemContentMode, Coding, ComposeInclude, ConceptMap,
    ConceptMapGroup, ConceptMapGroupElement, ConceptMapTarget, Equivalence, PublicationStatus,
    ValueSet, ValueSetCompose,
};
use glossa_terminology::{
    ExpandOptions, SubsumptionOutcome, TerminologyConfig, TerminologyService,
};

const ILLNESS: &str = "http://example.org/cs/illness";
const SNOWBALL: &str = "http://example.org/cs/snowball";

fn illness_system() -> CodeSystem {
    let mut cs = CodeSystem::new(
        ILLNESS,
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

fn snowball_system() -> CodeSystem {
    let mut cs = CodeSystem::new(
        SNOWBALL,
        PublicationStatus::Active,
        CodeSystemContentMode::Complete,
    );
    cs.concept = vec![CodeSystemConcept::new("influenza").with_display("Influenza (disorder)")];
    cs
}

fn illness_to_snowball() -> ConceptMap {
    let mut map = ConceptMap::new("http://example.org/cm/illness-snowball", PublicationStatus::Active);
    map.group = vec![ConceptMapGroup {
        source: ILLNESS.to_string(),
        target: SNOWBALL.to_string(),
        element: vec![ConceptMapGroupElement {
            code: "flu".to_string(),
            display: None,
            target: vec![ConceptMapTarget {
                code: "influenza".to_string(),
                display: None,
                equivalence: Equivalence::Equivalent,
            }],
        }],
        unmapped: None,
    }];
    map
}

fn whole_system_value_set(url: &str) -> ValueSet {
    let mut vs = ValueSet::new(url, PublicationStatus::Active);
    vs.compose = Some(ValueSetCompose {
        inactive: None,
        include: vec![ComposeInclude {
            system: Some(ILLNESS.to_string()),
            ..ComposeInclude::default()
        }],
        exclude: Vec::new(),
    });
    vs
}

fn make_service() -> TerminologyService {
    let mut service = TerminologyService::new();
    service.add_code_system(&illness_system()).unwrap();
    service.add_code_system(&snowball_system()).unwrap();
    service.add_value_set(whole_system_value_set("http://example.org/vs/all"));
    service.add_concept_map(&illness_to_snowball());
    service
}

#[test]
fn translate_enriches_display_from_the_target_system() {
    let service = make_service();
    let result = service.translate(ILLNESS, "flu", Some(SNOWBALL), false);
    assert!(result.result);
    assert_eq!(result.matches.len(), 1);
    assert_eq!(result.matches[0].code, "influenza");
    // The map carried no display; the target index supplies it.
    assert_eq!(result.matches[0].display.as_deref(), Some("Influenza (disorder)"));
}

#[test]
fn translate_of_an_unmapped_code_reports_no_match() {
    let service = make_service();
    let result = service.translate(ILLNESS, "fracture", Some(SNOWBALL), false);
    assert!(!result.result);
    assert!(result.matches.is_empty());
}

#[test]
fn reverse_translate_walks_the_map_backwards() {
    let service = make_service();
    let result = service.translate(SNOWBALL, "influenza", Some(ILLNESS), true);
    assert!(result.result);
    assert_eq!(result.matches[0].code, "flu");
    assert_eq!(result.matches[0].display.as_deref(), Some("Influenza"));
}

#[test]
fn translate_with_map_addresses_one_map_by_url() {
    let service = make_service();
    let result = service
        .translate_with_map(
            "http://example.org/cm/illness-snowball",
            ILLNESS,
            "flu",
            None,
            false,
        )
        .unwrap();
    assert!(result.result);
    assert_eq!(result.matches[0].code, "influenza");

    let err = service
        .translate_with_map("http://example.org/cm/no-such", ILLNESS, "flu", None, false)
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn configured_limit_truncates_service_expansions() {
    let mut service = TerminologyService::with_config(TerminologyConfig {
        max_expansion_entries: 2,
        ..TerminologyConfig::default()
    });
    service.add_code_system(&illness_system()).unwrap();
    service.add_value_set(whole_system_value_set("http://example.org/vs/all"));

    let expansion = service
        .expand("http://example.org/vs/all", &ExpandOptions::default())
        .unwrap();
    assert!(expansion.too_costly);
    assert_eq!(expansion.entries.len(), 2);
    assert_eq!(expansion.total, 4);
}

#[test]
fn subsumes_and_lookup_agree_on_the_hierarchy() {
    let service = make_service();
    assert_eq!(
        service.subsumes(ILLNESS, "respiratory-illness", "cold").unwrap(),
        SubsumptionOutcome::Subsumes
    );
    let details = service.lookup(ILLNESS, "cold").unwrap();
    assert_eq!(details.display.as_deref(), Some("Common cold"));
}

#[test]
fn validate_code_uses_the_expansion_for_membership() {
    let service = make_service();
    let validation = service
        .validate_code(
            Some("http://example.org/vs/all"),
            ILLNESS,
            "flu",
            Some("Influenza"),
        )
        .unwrap();
    assert!(validation.valid);
    assert!(validation.message.is_none());

    let outside = service
        .validate_code(Some("http://example.org/vs/all"), SNOWBALL, "influenza", None)
        .unwrap();
    assert!(!outside.valid);
}

#[test]
fn closure_relates_codes_across_systems_through_the_loaded_map() {
    let service = make_service();
    let update = service.closure(
        "shared",
        &[
            Coding::new(ILLNESS, "flu"),
            Coding::new(SNOWBALL, "influenza"),
            Coding::new(ILLNESS, "respiratory-illness"),
        ],
    );
    assert_eq!(update.version, 1);
    // One hierarchy row and one cross-system row.
    assert_eq!(update.rows.len(), 2);
    assert!(update
        .rows
        .iter()
        .any(|row| row.equivalence == Equivalence::Subsumes));
    assert!(update
        .rows
        .iter()
        .any(|row| row.equivalence == Equivalence::Equivalent));

    let repeat = service.closure(
        "shared",
        &[Coding::new(ILLNESS, "flu"), Coding::new(SNOWBALL, "influenza")],
    );
    assert_eq!(repeat.version, 1);
    assert!(repeat.rows.is_empty());

    assert!(service.closure_reset("shared"));
    let fresh = service.closure("shared", &[Coding::new(ILLNESS, "flu")]);
    assert_eq!(fresh.version, 1);
}
