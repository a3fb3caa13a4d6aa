//! Rich diagnostic error types for the disjointness engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains.
//!
//! Insufficient evidence and conjoint vetoes are *outcomes*, not errors; they
//! never appear here.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the disjointness engine.
#[derive(Debug, Error, Diagnostic)]
pub enum DisjointError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Taxonomy(#[from] TaxonomyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Mining(#[from] MiningError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Pool(#[from] PoolError),
}

// ---------------------------------------------------------------------------
// Taxonomy errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TaxonomyError {
    #[error("concept not found: {concept_id}")]
    #[diagnostic(
        code(akh::taxonomy::concept_not_found),
        help("The concept id is not registered in the taxonomy store. Register it first.")
    )]
    ConceptNotFound { concept_id: u64 },

    #[error("required root concept \"{name}\" is missing from the taxonomy")]
    #[diagnostic(
        code(akh::taxonomy::missing_root),
        help(
            "Disjointness reasoning needs the tangible root category to be present. \
             Load a taxonomy that defines it, or set `tangible_root` in the config."
        )
    )]
    MissingRoot { name: String },

    #[error("duplicate concept label: \"{label}\" already registered as {existing_id}")]
    #[diagnostic(
        code(akh::taxonomy::duplicate_label),
        help("Concept labels are unique (case-insensitive). Choose a different name.")
    )]
    DuplicateLabel { label: String, existing_id: u64 },

    #[error("fact creation failed: {message}")]
    #[diagnostic(
        code(akh::taxonomy::write_failed),
        help(
            "The taxonomy store rejected or could not persist the fact. \
             Transient failures are retried; persistent ones drop the candidate."
        )
    )]
    WriteFailed { message: String },

    #[error("concept allocator exhausted")]
    #[diagnostic(
        code(akh::taxonomy::exhausted),
        help("The concept ID space is exhausted. Check for allocation loops.")
    )]
    AllocatorExhausted,

    #[error("invalid taxonomy snapshot: {message}")]
    #[diagnostic(
        code(akh::taxonomy::snapshot),
        help("Snapshot files are JSON with `concepts`, `genls`, `isa` and `disjoint` arrays.")
    )]
    Snapshot { message: String },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(akh::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(akh::config::parse),
        help("Check the TOML syntax. Unknown keys are rejected.")
    )]
    Parse { path: String, message: String },

    #[error("invalid config value for `{field}`: {message}")]
    #[diagnostic(
        code(akh::config::invalid),
        help("Ratios and thresholds must lie in [0, 1]; sizes and worker counts must be positive.")
    )]
    Invalid { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Mining errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum MiningError {
    #[error("failed to read observations: {path}")]
    #[diagnostic(
        code(akh::mining::io),
        help("Check that the observation file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed observation on line {line_no}: {line}")]
    #[diagnostic(
        code(akh::mining::malformed),
        help("Observation lines are `relation<TAB>left<TAB>right`.")
    )]
    Malformed { line_no: usize, line: String },
}

// ---------------------------------------------------------------------------
// Worker pool errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum PoolError {
    #[error("failed to build worker pool: {message}")]
    #[diagnostic(
        code(akh::pool::build),
        help(
            "The worker pool could not spawn its threads. \
             Lower `pool.workers` or check system limits."
        )
    )]
    Build { message: String },
}

/// Convenience alias for functions returning engine results.
pub type DisjointResult<T> = std::result::Result<T, DisjointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_error_converts_to_top_level() {
        let err = TaxonomyError::ConceptNotFound { concept_id: 7 };
        let top: DisjointError = err.into();
        assert!(matches!(
            top,
            DisjointError::Taxonomy(TaxonomyError::ConceptNotFound { concept_id: 7 })
        ));
    }

    #[test]
    fn config_error_display_names_field() {
        let err = ConfigError::Invalid {
            field: "bubble_up.acceptance_ratio".into(),
            message: "must be in [0, 1]".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("bubble_up.acceptance_ratio"));
    }

    #[test]
    fn diagnostic_codes_are_namespaced() {
        let err = TaxonomyError::MissingRoot {
            name: "PartiallyTangible".into(),
        };
        let code = err.code().map(|c| c.to_string()).unwrap_or_default();
        assert_eq!(code, "akh::taxonomy::missing_root");
    }
}
