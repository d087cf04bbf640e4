//! nodelabel - rule engine turning discovered node features into labels
//!
//! Feature sources (CPU, kernel, PCI, USB, system) each populate one
//! [`DomainFeatures`]. A [`Features`] snapshot of all domains is then fed to a
//! [`RuleSet`], and every rule decides which labels it contributes.
//!
//! # Architecture
//!
//! - [`Features`] / [`DomainFeatures`] — Immutable snapshot: per domain, key sets,
//!   value sets and instance sets
//! - [`MatchExpression`] — One operator plus operands (`In`, `Gt`, `Exists`, ...)
//! - [`MatchExpressionSet`] — AND over attribute name → expression
//! - [`FeatureMatcher`] — AND over `domain.feature` terms, returns [`MatchedFeatures`]
//! - [`Rule`] — Modern dialect: `matchAny` (OR) + `matchFeatures` (AND) + labels + template
//! - [`LegacyRule`] — Legacy dialect: OR over fixed-shape [`LegacyMatcher`]s
//! - [`CustomRule`] — Either dialect, detected at decode time
//! - [`Labeler`] — Evaluates a rule set against a snapshot with per-rule fault isolation
//!
//! # Key Invariants
//!
//! 1. **Non-match is not an error**: a rule that does not match yields `Ok(None)`.
//!
//! 2. **Errors are per rule**: an unknown domain or a broken template aborts the
//!    enclosing rule only. The [`Labeler`] logs it and continues.
//!
//! 3. **Declared order wins**: rule outputs are merged in configuration order,
//!    static labels override template output within a rule.
//!
//! # Example
//!
//! ```
//! use nodelabel::prelude::*;
//!
//! let mut features = Features::new();
//! features.insert(
//!     "kernel",
//!     DomainFeatures::new().with_values("config", [("NO_HZ", "y"), ("PREEMPT", "n")]),
//! );
//!
//! let rules = RuleSet::from_yaml_str(
//!     r#"
//! - name: tickless
//!   labels:
//!     kernel-tickless: "true"
//!   matchFeatures:
//!     - feature: kernel.config
//!       matchExpressions:
//!         NO_HZ: {op: In, value: ["y"]}
//! "#,
//! )
//! .unwrap();
//!
//! let labels = Labeler::new(rules).labels(&features);
//! assert_eq!(labels.get("kernel-tickless").map(String::as_str), Some("true"));
//! ```

// ═══════════════════════════════════════════════════════════════════════════════
// Modules
// ═══════════════════════════════════════════════════════════════════════════════

mod config;
mod expression;
mod feature;
mod labeler;
mod legacy;
mod matched;
mod matcher;
mod registry;
mod rule;
pub mod template;

// ═══════════════════════════════════════════════════════════════════════════════
// Public API
// ═══════════════════════════════════════════════════════════════════════════════

// Feature model
pub use feature::{
    DomainFeatures, FeatureSetRef, Features, InstanceFeature, InstanceFeatureSet, KeyFeatureSet,
    ValueFeatureSet,
};

// Expressions
pub use expression::{MatchExpression, MatchExpressionSet, MatchOp};

// Matching
pub use matched::{MatchedElement, MatchedFeatures, MatchedSet};
pub use matcher::{FeatureMatcher, FeatureMatcherTerm, MatchAnyElem, MatchOutcome};

// Rules
pub use config::{load_document, CustomRule, RuleSet};
pub use legacy::{
    CpuIdRule, DeviceIdRule, KconfigEntry, KconfigRule, LegacyMatcher, LegacyRule,
    LegacySubRule, LoadedKModRule, NodenameRule, PciIdRule, UsbIdRule,
};
pub use rule::Rule;
pub use template::LabelTemplate;

// Engine
pub use labeler::{Labeler, LabelerBuilder};
pub use registry::{FeatureSource, SourceRegistry, SourceRegistryBuilder, StaticSource};

/// Final label map: label name → label value.
///
/// Ordered so that output is stable across runs.
pub type Labels = std::collections::BTreeMap<String, String>;

/// Result alias used throughout the crate.
pub type Result<T, E = LabelError> = std::result::Result<T, E>;

// ═══════════════════════════════════════════════════════════════════════════════
// Prelude
// ═══════════════════════════════════════════════════════════════════════════════

/// Prelude module for convenient imports.
///
/// ```
/// use nodelabel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Rules
        CustomRule,
        // Feature model
        DomainFeatures,
        // Matching
        FeatureMatcher,
        FeatureMatcherTerm,
        Features,
        InstanceFeature,
        // Errors
        LabelError,
        LabelTemplate,
        // Engine
        Labeler,
        Labels,
        LegacyRule,
        MatchAnyElem,
        // Expressions
        MatchExpression,
        MatchExpressionSet,
        MatchOp,
        MatchedFeatures,
        MatchedSet,
        Rule,
        RuleSet,
    };
}

// ═══════════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════════

/// Maximum length for `InRegexp` and `nodename` patterns.
///
/// The `regex` crate matches in linear time, but compilation cost grows with
/// pattern size.
pub const MAX_REGEX_PATTERN_LENGTH: usize = 4096;

/// Maximum nesting of `if`/`range`/`with` blocks in a label template.
pub const MAX_TEMPLATE_DEPTH: usize = 32;

/// Separator between domain and feature name in a term reference.
pub const FEATURE_SEPARATOR: char = '.';

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors from rule construction and evaluation.
///
/// Construction errors (invalid operands, template syntax) surface when a rule
/// set is decoded. Evaluation errors (unknown domain or feature, unparsable
/// values) abort only the rule being evaluated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LabelError {
    /// A term references a domain absent from the snapshot.
    #[error("unknown feature source/domain \"{domain}\"")]
    UnknownDomain {
        /// The domain name from the term reference.
        domain: String,
    },

    /// A feature name resolves in none of the key, value or instance sets.
    #[error("\"{feature}\" feature of source/domain \"{domain}\" not available")]
    UnknownFeature {
        /// The domain that was searched.
        domain: String,
        /// The (lowercased) feature name.
        feature: String,
    },

    /// A feature reference is missing the `domain.feature` separator.
    #[error("invalid feature \"{reference}\": must be <domain>.<feature>")]
    MalformedReference {
        /// The reference as written in the rule.
        reference: String,
    },

    /// An operator's operands or the matched value cannot be used.
    #[error("invalid {op} expression: {reason}")]
    Expression {
        /// The operator being built or evaluated.
        op: MatchOp,
        /// What went wrong.
        reason: String,
    },

    /// A label template failed to parse or execute.
    #[error("template error: {message}")]
    Template {
        /// The parse or execution failure.
        message: String,
    },

    /// A rule decodes to neither dialect, or to both.
    #[error("invalid rule: {message}")]
    Dialect {
        /// Why the dialect could not be determined.
        message: String,
    },

    /// A rule file or snapshot could not be read or deserialized.
    #[error("invalid config: {message}")]
    Config {
        /// The underlying error message.
        message: String,
    },

    /// A legacy sub-rule's raw feature source is missing from the snapshot.
    #[error("{what} not available")]
    SourceUnavailable {
        /// Human-readable name of the missing source.
        what: String,
    },

    /// A rule failed; wraps the underlying error with the rule name.
    #[error("failed to execute rule \"{rule}\": {source}")]
    Rule {
        /// Name of the failing rule.
        rule: String,
        /// The underlying failure.
        #[source]
        source: Box<LabelError>,
    },
}

impl LabelError {
    pub(crate) fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    pub(crate) fn expression(op: MatchOp, reason: impl Into<String>) -> Self {
        Self::Expression {
            op,
            reason: reason.into(),
        }
    }

    pub(crate) fn config(message: impl std::fmt::Display) -> Self {
        Self::Config {
            message: message.to_string(),
        }
    }
}
