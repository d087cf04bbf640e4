//! `Labeler` — evaluates a rule set with per-rule fault isolation
//!
//! Rules run in order: built-in rules, then configured rules, then drop-in
//! directory rules. Outputs are merged in that order, so a later rule
//! overrides an earlier one on the same label. A rule that fails is logged
//! and contributes nothing; the remaining rules still run.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::thread;

use tracing::{debug, error};

use crate::{CustomRule, Features, Labels, Result, RuleSet, SourceRegistry};

/// Evaluates a [`RuleSet`] against feature snapshots.
#[derive(Debug, Clone, Default)]
pub struct Labeler {
    rules: RuleSet,
}

impl Labeler {
    /// Create a labeler for exactly these rules.
    #[must_use]
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    /// Start a builder.
    #[must_use]
    pub fn builder() -> LabelerBuilder {
        LabelerBuilder::default()
    }

    /// The rules, in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Evaluate every rule and merge the outputs.
    #[must_use]
    pub fn labels(&self, features: &Features) -> Labels {
        let mut labels = Labels::new();
        for rule in &self.rules {
            if let Some(out) = self.run(rule, features) {
                labels.extend(out);
            }
        }
        labels
    }

    /// Same as [`labels`](Self::labels), evaluating rules on scoped threads.
    ///
    /// Rules are split into contiguous batches, one per available core.
    /// Outputs are merged in declared order, so the result is identical. A
    /// batch whose thread panics is logged and contributes nothing.
    #[must_use]
    pub fn labels_parallel(&self, features: &Features) -> Labels {
        let rules: Vec<&CustomRule> = self.rules.iter().collect();
        if rules.is_empty() {
            return Labels::new();
        }
        let workers = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        let batch_len = rules.len().div_ceil(workers);

        let outputs: Vec<Option<Labels>> = thread::scope(|scope| {
            let handles: Vec<_> = rules
                .chunks(batch_len)
                .map(|batch| {
                    scope.spawn(move || {
                        batch
                            .iter()
                            .map(|rule| self.run(rule, features))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| match h.join() {
                    Ok(outputs) => outputs,
                    Err(_) => {
                        error!("rule evaluation thread panicked");
                        Vec::new()
                    }
                })
                .collect()
        });

        let mut labels = Labels::new();
        for out in outputs.into_iter().flatten() {
            labels.extend(out);
        }
        labels
    }

    /// Take a snapshot from the registry and label it.
    #[must_use]
    pub fn label_sources(&self, registry: &SourceRegistry) -> Labels {
        self.labels(&registry.snapshot())
    }

    fn run(&self, rule: &CustomRule, features: &Features) -> Option<Labels> {
        match rule.execute(features) {
            Ok(Some(out)) => {
                debug!(rule = rule.name(), labels = out.len(), "rule matched");
                Some(out)
            }
            Ok(None) => None,
            Err(err) => {
                error!(rule = rule.name(), error = %err, "skipping rule");
                None
            }
        }
    }
}

/// Assembles a [`Labeler`] from built-in, configured and drop-in rules.
#[derive(Debug, Clone, Default)]
pub struct LabelerBuilder {
    builtin: bool,
    rules: RuleSet,
    dirs: Vec<PathBuf>,
}

impl LabelerBuilder {
    /// Include [`RuleSet::builtin`] ahead of everything else.
    #[must_use]
    pub fn builtin_rules(mut self, enabled: bool) -> Self {
        self.builtin = enabled;
        self
    }

    /// Append configured rules.
    #[must_use]
    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Append rules from a drop-in directory, loaded at [`build`](Self::build).
    #[must_use]
    pub fn rules_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dirs.push(dir.into());
        self
    }

    /// Load drop-in directories and build the labeler.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Config`](crate::LabelError::Config) if a drop-in
    /// directory cannot be read. Individual broken files are skipped.
    pub fn build(self) -> Result<Labeler> {
        let mut rules = if self.builtin {
            RuleSet::builtin()
        } else {
            RuleSet::new()
        };
        rules.extend(self.rules);
        for dir in &self.dirs {
            rules.extend(RuleSet::load_dir(dir)?);
        }
        Ok(Labeler::new(rules))
    }
}
