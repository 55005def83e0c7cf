//! Compiled metric rules.

use crate::config::{MetricRule, SiftConfig};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// A rule ready for evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Exact metric name this rule applies to
    pub name: String,
    /// Drop the series
    pub remove_metric: bool,
    /// Tags to strip
    pub remove_tags: HashSet<String>,
    /// Override the host
    pub remove_host: bool,
}

impl From<&MetricRule> for Rule {
    fn from(config: &MetricRule) -> Self {
        Self {
            name: config.name.clone(),
            remove_metric: config.remove_metric,
            remove_tags: config.remove_tags.iter().cloned().collect(),
            remove_host: config.remove_host,
        }
    }
}

/// The process-wide, read-only set of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    /// Metric name -> positions in `rules`, ascending
    by_name: HashMap<String, Vec<usize>>,
    remove_all_host: bool,
}

impl RuleSet {
    /// Build a rule set from rules in declaration order.
    pub fn new(rules: Vec<Rule>, remove_all_host: bool) -> Self {
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, rule) in rules.iter().enumerate() {
            by_name.entry(rule.name.clone()).or_default().push(i);
        }

        for (name, positions) in &by_name {
            if positions.len() > 1 {
                warn!(
                    metric = %name,
                    rules = positions.len(),
                    "Metric is configured by more than one rule; rules apply in declaration order"
                );
            }
        }

        Self {
            rules,
            by_name,
            remove_all_host,
        }
    }

    /// Compile the rule set described by a configuration.
    pub fn from_config(config: &SiftConfig) -> Self {
        let rule_set = Self::new(
            config.metrics.iter().map(Rule::from).collect(),
            config.remove_all_host,
        );

        info!(
            rules = rule_set.rules.len(),
            remove_all_host = rule_set.remove_all_host,
            "Rule set compiled"
        );

        rule_set
    }

    /// Rules whose name equals `metric`, in declaration order.
    pub fn matching<'a>(&'a self, metric: &str) -> impl Iterator<Item = &'a Rule> + 'a {
        self.by_name
            .get(metric)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(move |&i| &self.rules[i])
    }

    /// All rules in declaration order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn remove_all_host(&self) -> bool {
        self.remove_all_host
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && !self.remove_all_host
    }
}
