//! Rule executor: per-(rule, node) execution with timing and
//! auto-disable of chronically slow rules.
//!
//! Timeouts are enforced after the fact by measurement; there is no
//! preemption. A slow rule delays the current node by its own runtime,
//! but once its timeout count reaches the limit it is disabled from the
//! next invocation on. Executor state is instance-scoped: concurrent
//! scans use independent instances.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::check::{CheckContext, CheckError};
use crate::node::ConfigNode;
use crate::rule::{Rule, RuleResult};

/// Default per-(rule, node) execution time threshold.
pub const DEFAULT_RULE_TIMEOUT: Duration = Duration::from_millis(100);
/// Default number of over-threshold runs before a rule is disabled.
pub const DEFAULT_MAX_TIMEOUTS: u32 = 3;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Elapsed time above which one invocation counts as a timeout.
    pub timeout: Duration,
    /// Timeout count at which a rule is auto-disabled.
    pub max_timeouts: u32,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_RULE_TIMEOUT,
            max_timeouts: DEFAULT_MAX_TIMEOUTS,
        }
    }
}

/// Accumulated execution statistics for one rule.
#[derive(Debug, Clone, Default)]
pub struct RuleStats {
    pub invocations: u64,
    pub total_elapsed: Duration,
    pub timeouts: u32,
}

type RuleDisabledCallback = Box<dyn FnMut(&str) + Send>;
type RuleErrorCallback = Box<dyn FnMut(&str, &CheckError) + Send>;

/// Executes rules against nodes, tracking elapsed time per rule.
#[derive(Default)]
pub struct RuleExecutor {
    options: ExecutorOptions,
    stats: HashMap<String, RuleStats>,
    disabled: HashSet<String>,
    on_rule_disabled: Option<RuleDisabledCallback>,
    on_error: Option<RuleErrorCallback>,
}

impl RuleExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ExecutorOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Called with the rule id when a rule is auto-disabled.
    pub fn on_rule_disabled<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.on_rule_disabled = Some(Box::new(callback));
        self
    }

    /// Called when a rule's check errors. The error never reaches
    /// reports; this hook exists for logging and telemetry.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&str, &CheckError) + Send + 'static,
    {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Execute one rule against one node.
    ///
    /// Returns `None` when the rule has been auto-disabled. A check error
    /// yields a synthetic failing result with a generic message.
    pub fn execute(
        &mut self,
        rule: &Rule,
        node: &ConfigNode,
        ctx: &CheckContext<'_>,
    ) -> Option<RuleResult> {
        if self.disabled.contains(&rule.id) {
            return None;
        }

        let start = Instant::now();
        let outcome = rule.check.evaluate(node, ctx);
        let elapsed = start.elapsed();

        let stats = self.stats.entry(rule.id.clone()).or_default();
        stats.invocations += 1;
        stats.total_elapsed += elapsed;

        if elapsed > self.options.timeout {
            stats.timeouts += 1;
            if stats.timeouts >= self.options.max_timeouts {
                self.disabled.insert(rule.id.clone());
                tracing::warn!(
                    rule = %rule.id,
                    timeouts = self.options.max_timeouts,
                    "rule auto-disabled after repeated timeouts"
                );
                if let Some(callback) = &mut self.on_rule_disabled {
                    callback(&rule.id);
                }
            }
        }

        match outcome {
            Ok(passed) => Some(RuleResult::from_outcome(rule, node, passed)),
            Err(error) => {
                tracing::debug!(rule = %rule.id, %error, "rule check errored");
                if let Some(callback) = &mut self.on_error {
                    callback(&rule.id, &error);
                }
                Some(RuleResult::execution_failure(rule, node))
            }
        }
    }

    /// Ids of rules auto-disabled so far.
    pub fn disabled_rules(&self) -> &HashSet<String> {
        &self.disabled
    }

    pub fn is_disabled(&self, rule_id: &str) -> bool {
        self.disabled.contains(rule_id)
    }

    /// Statistics for one rule, if it has run.
    pub fn stats(&self, rule_id: &str) -> Option<&RuleStats> {
        self.stats.get(rule_id)
    }

    /// Clear all per-scan state (stats, timeout counts, disabled set).
    pub fn reset(&mut self) {
        self.stats.clear();
        self.disabled.clear();
    }
}
