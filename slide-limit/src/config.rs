//! Declarative rule configuration.
//!
//! ```yaml
//! default:
//!   - max_count: 100
//!     window: 1m
//!   - max_count: 5
//!     window: 1s
//! requesters:
//!   batch-importer:
//!     - max_count: 1000
//!       window: 1m
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::RuleSet;
use crate::RuleTable;
use crate::Threshold;

/// Rules as written in a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesConfig {
    /// Thresholds applied to requesters without their own entry.
    #[serde(default)]
    pub default: Option<Vec<ThresholdConfig>>,

    /// Per-requester thresholds, keyed by requester id.
    #[serde(default)]
    pub requesters: BTreeMap<String, Vec<ThresholdConfig>>,
}

/// One `(max_count, window)` pair. `window` uses humantime syntax, e.g. `"10s"` or `"1m 30s"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdConfig {
    pub max_count: usize,
    pub window: String,
}

impl ThresholdConfig {
    fn to_threshold(&self) -> Result<Threshold, Error> {
        let window = humantime::parse_duration(&self.window)
            .map_err(|err| Error::invalid(format!("window {:?}: {err}", self.window)))?;
        Threshold::new(self.max_count, window)
    }
}

fn to_rule_set(owner: &str, thresholds: &[ThresholdConfig]) -> Result<RuleSet, Error> {
    let thresholds = thresholds
        .iter()
        .enumerate()
        .map(|(index, threshold)| {
            threshold.to_threshold().map_err(|err| match err {
                Error::InvalidConfiguration { reason } => {
                    Error::invalid(format!("{owner} threshold {index}: {reason}"))
                }
                other => other,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RuleSet::new(thresholds))
}

impl RulesConfig {
    /// Parse rules from a YAML document.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Load rules from a YAML file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Validate every threshold and build the lookup table.
    pub fn into_table(self) -> Result<RuleTable, Error> {
        RuleTable::try_from(self)
    }
}

impl TryFrom<RulesConfig> for RuleTable {
    type Error = Error;

    fn try_from(config: RulesConfig) -> Result<Self, Self::Error> {
        let mut table = RuleTable::new();
        if let Some(default) = &config.default {
            table = table.with_default(to_rule_set("default", default)?);
        }
        for (requester, thresholds) in &config.requesters {
            let rules = to_rule_set(&format!("requester {requester:?}"), thresholds)?;
            table.insert(requester.clone(), rules);
        }
        Ok(table)
    }
}
