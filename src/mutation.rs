//! Applies a rule set to a decoded series payload.

use crate::rule::RuleSet;
use crate::series::{Metric, SeriesPayload};

/// Host written into metrics whose host is removed.
pub const HOST_OVERRIDE: &str = "dogstatsd-sift";

/// What a mutation pass did to a payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationSummary {
    /// Series dropped by a `remove_metric` rule
    pub removed_metrics: usize,
    /// Tags stripped across all surviving series
    pub removed_tags: usize,
    /// Series whose host was overridden
    pub hosts_overridden: usize,
}

impl MutationSummary {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Apply `rules` to every metric of `payload`.
///
/// Survivors are moved into a fresh series so a removal can never shift the
/// metric that follows it. Points are never touched.
pub fn apply(
    payload: SeriesPayload,
    rules: &RuleSet,
    host_override: &str,
) -> (SeriesPayload, MutationSummary) {
    let mut summary = MutationSummary::default();
    let mut series = Vec::with_capacity(payload.series.len());

    for metric in payload.series {
        if let Some(metric) = apply_metric(metric, rules, host_override, &mut summary) {
            series.push(metric);
        }
    }

    (SeriesPayload { series }, summary)
}

/// Returns `None` when the metric is dropped.
fn apply_metric(
    mut metric: Metric,
    rules: &RuleSet,
    host_override: &str,
    summary: &mut MutationSummary,
) -> Option<Metric> {
    let mut host_overridden = false;

    for rule in rules.matching(&metric.name) {
        if rule.remove_metric {
            summary.removed_metrics += 1;
            return None;
        }

        if !rule.remove_tags.is_empty() {
            if let Some(tags) = metric.tags.as_mut() {
                let before = tags.len();
                tags.retain(|tag| !rule.remove_tags.contains(tag));
                summary.removed_tags += before - tags.len();
            }
        }

        if rule.remove_host {
            metric.host = Some(host_override.to_string());
            host_overridden = true;
        }
    }

    // The global override runs last so it wins over everything above.
    if rules.remove_all_host() {
        metric.host = Some(host_override.to_string());
        host_overridden = true;
    }

    if host_overridden {
        summary.hosts_overridden += 1;
    }

    Some(metric)
}
