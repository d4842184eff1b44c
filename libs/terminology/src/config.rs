//! Engine configuration

use serde::Deserialize;

/// Tunables for the terminology service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct TerminologyConfig {
    /// Expansions larger than this are truncated and flagged too-costly
    pub max_expansion_entries: usize,

    /// Maximum nesting depth when a compose references other value sets
    pub max_recursion_depth: usize,

    /// Number of whole-expansion results kept in the LRU cache
    pub expansion_cache_size: usize,

    /// Number of materialized filter results kept per engine
    pub filter_cache_size: usize,
}

impl Default for TerminologyConfig {
    fn default() -> Self {
        Self {
            max_expansion_entries: 10_000,
            max_recursion_depth: 10,
            expansion_cache_size: 128,
            filter_cache_size: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config: TerminologyConfig =
            serde_json::from_str(r#"{"max_expansion_entries": 50}"#).unwrap();
        assert_eq!(config.max_expansion_entries, 50);
        assert_eq!(config.max_recursion_depth, 10);
        assert_eq!(config.expansion_cache_size, 128);
    }
}
