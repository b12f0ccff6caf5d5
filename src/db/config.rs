use serde::Deserialize;

use crate::query::PlannerConfig;

/// Engine configuration.
///
/// Deserialises from the `[engine]` table of the CLI config file; missing
/// keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rows returned by set and groupby queries without a `limit`.
    pub default_limit: usize,
    /// Upper bound applied to any `limit`.
    pub max_limit: usize,
    /// Partitions learned by edge `default` domains without a `limit`.
    pub default_domain_limit: usize,
    /// Reject `groupby` over a declared domain.
    pub strict_groupby: bool,
    /// Random bytes in generated `_id`s (rendered as hex).
    pub id_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 10_000,
            default_domain_limit: 10,
            strict_groupby: true,
            id_bytes: 16,
        }
    }
}

impl Config {
    /// Accepts groupby over declared domains and raises the limit ceiling.
    pub fn permissive() -> Self {
        Self {
            max_limit: 1_000_000,
            strict_groupby: false,
            ..Self::default()
        }
    }

    /// Planner settings derived from this configuration.
    pub fn planner(&self) -> PlannerConfig {
        PlannerConfig {
            default_limit: self.default_limit.min(self.max_limit),
            max_limit: self.max_limit,
            default_domain_limit: self.default_domain_limit,
            strict_groupby: self.strict_groupby,
        }
    }
}
