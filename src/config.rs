//! Tunable thresholds for every heuristic in the engine.
//!
//! All magic numbers live here with their defaults. The whole structure can
//! be loaded from TOML; missing keys fall back to the defaults below.
//!
//! ```toml
//! max_write_attempts = 3
//!
//! [bubble_up]
//! acceptance_ratio = 0.3
//! acceptance = "either"
//!
//! [mining]
//! bucketing = "minimal"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DisjointResult};

/// Whether one or both sampling directions must clear the acceptance ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AcceptancePolicy {
    /// Either `parent → target` or `target → parent` suffices.
    #[default]
    Either,
    /// Both directions must have adequate samples and clear the ratio.
    Both,
}

/// Which common ancestors receive a mining evidence bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AncestorBucketing {
    /// Every tangible common ancestor.
    #[default]
    All,
    /// Only the most specific tangible common ancestors.
    Minimal,
}

/// Evidence sampling bounds shared by the sampler and the abstractness filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingConfig {
    /// A parent with this many children or fewer yields no decision.
    pub min_children: usize,
    /// Above this many children, sample this many with replacement.
    pub max_exploration: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            min_children: 10,
            max_exploration: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AbstractnessConfig {
    /// Concepts with this many children or fewer are never too abstract.
    pub min_children: usize,
    /// Lower-tail mean similarity below this marks a concept too abstract.
    pub threshold: f32,
    /// Fraction of the sorted similarity list averaged (the lowest tail).
    pub tail_fraction: f32,
    /// Upper bound on pairwise comparisons per concept.
    pub max_pairs: usize,
    /// Score cached for concepts too small to judge.
    pub neutral_score: f32,
}

impl Default for AbstractnessConfig {
    fn default() -> Self {
        Self {
            min_children: 5,
            threshold: 0.7,
            tail_fraction: 0.2,
            max_pairs: 3_160,
            neutral_score: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BubbleUpConfig {
    /// A sampled direction is accepted when its ratio exceeds this.
    pub acceptance_ratio: f32,
    pub acceptance: AcceptancePolicy,
    /// A tree node is mature when its direct specializations exceed this.
    pub min_maturity: usize,
    /// Passes over newly asserted facts; 1 means seeds only.
    pub max_iterations: usize,
}

impl Default for BubbleUpConfig {
    fn default() -> Self {
        Self {
            acceptance_ratio: 0.3,
            acceptance: AcceptancePolicy::Either,
            min_maturity: 10,
            max_iterations: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MiningConfig {
    /// Minimum global score for a relation to be swept at all.
    pub relation_threshold: f64,
    /// Minimum disjoint+conjoint count for a relation score.
    pub relation_min_samples: u64,
    /// Minimum score every significant backing bucket must reach.
    pub bucket_threshold: f64,
    /// Minimum disjoint+conjoint count for a bucket to count as significant.
    pub bucket_min_samples: u64,
    pub bucketing: AncestorBucketing,
    /// Candidates shallower than this are dropped. `None` disables the filter.
    pub min_candidate_depth: Option<u32>,
    /// Candidates that are instances of any of these are dropped.
    pub excluded_types: Vec<String>,
    /// Observations dispatched per worker batch.
    pub batch_size: usize,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            relation_threshold: 0.85,
            relation_min_samples: 100,
            bucket_threshold: 0.95,
            bucket_min_samples: 100,
            bucketing: AncestorBucketing::All,
            min_candidate_depth: None,
            excluded_types: Vec::new(),
            batch_size: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub workers: usize,
    /// Per-item budget; a batch times out after `items * per_item_timeout_ms`.
    pub per_item_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            per_item_timeout_ms: 2_000,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisjointConfig {
    /// Name of the category every tangible concept specializes.
    pub tangible_root: String,
    /// Attempts per fact before a store write is given up.
    pub max_write_attempts: usize,
    pub sampling: SamplingConfig,
    pub abstractness: AbstractnessConfig,
    pub bubble_up: BubbleUpConfig,
    pub mining: MiningConfig,
    pub pool: PoolConfig,
}

impl Default for DisjointConfig {
    fn default() -> Self {
        Self {
            tangible_root: "PartiallyTangible".into(),
            max_write_attempts: 3,
            sampling: SamplingConfig::default(),
            abstractness: AbstractnessConfig::default(),
            bubble_up: BubbleUpConfig::default(),
            mining: MiningConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl DisjointConfig {
    /// Load and validate a config from a TOML file.
    pub fn load(path: &Path) -> DisjointResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty TOML.
    pub fn to_toml(&self) -> DisjointResult<String> {
        toml::to_string_pretty(self).map_err(|e| {
            ConfigError::Parse {
                path: "<memory>".into(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> DisjointResult<()> {
        unit_interval("abstractness.threshold", self.abstractness.threshold as f64)?;
        unit_interval("abstractness.tail_fraction", self.abstractness.tail_fraction as f64)?;
        unit_interval("abstractness.neutral_score", self.abstractness.neutral_score as f64)?;
        unit_interval("bubble_up.acceptance_ratio", self.bubble_up.acceptance_ratio as f64)?;
        unit_interval("mining.relation_threshold", self.mining.relation_threshold)?;
        unit_interval("mining.bucket_threshold", self.mining.bucket_threshold)?;

        positive("sampling.max_exploration", self.sampling.max_exploration)?;
        positive("abstractness.max_pairs", self.abstractness.max_pairs)?;
        positive("bubble_up.max_iterations", self.bubble_up.max_iterations)?;
        positive("mining.batch_size", self.mining.batch_size)?;
        positive("pool.workers", self.pool.workers)?;
        if self.pool.per_item_timeout_ms == 0 {
            return Err(invalid("pool.per_item_timeout_ms", "must be greater than 0"));
        }
        positive("max_write_attempts", self.max_write_attempts)?;

        if self.abstractness.tail_fraction == 0.0 {
            return Err(invalid("abstractness.tail_fraction", "must be greater than 0"));
        }
        if self.sampling.max_exploration <= self.sampling.min_children {
            return Err(invalid(
                "sampling.max_exploration",
                "must exceed sampling.min_children",
            ));
        }
        if self.tangible_root.trim().is_empty() {
            return Err(invalid("tangible_root", "must name a concept"));
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> crate::error::DisjointError {
    ConfigError::Invalid {
        field: field.into(),
        message: message.into(),
    }
    .into()
}

fn unit_interval(field: &str, value: f64) -> DisjointResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, &format!("{value} is outside [0, 1]")))
    }
}

fn positive(field: &str, value: usize) -> DisjointResult<()> {
    if value == 0 {
        Err(invalid(field, "must be greater than 0"))
    } else {
        Ok(())
    }
}
