//! `FeatureMatcher` — AND over `domain.feature` terms
//!
//! Each [`FeatureMatcherTerm`] names one feature as `<domain>.<feature>` and
//! carries the [`MatchExpressionSet`] to evaluate against it. The matcher walks
//! the terms in order and stops at the first one that matches nothing.
//!
//! # Errors vs. non-match
//!
//! A reference to a missing domain or feature is an error: the rule is
//! misconfigured for this node. A term that simply matches nothing is a normal
//! non-match, reported as `None` / `matched == false`.

use serde::{Deserialize, Serialize};

use crate::{
    Features, LabelError, MatchExpressionSet, MatchedFeatures, Result, FEATURE_SEPARATOR,
};

/// One term: a feature reference plus the expressions to evaluate against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureMatcherTerm {
    /// Feature reference, `<domain>.<feature>`.
    pub feature: String,

    /// Expressions evaluated against the resolved feature set.
    #[serde(default, deserialize_with = "crate::config::null_as_default")]
    pub match_expressions: MatchExpressionSet,
}

impl FeatureMatcherTerm {
    /// Create a term.
    pub fn new(feature: impl Into<String>, match_expressions: MatchExpressionSet) -> Self {
        Self {
            feature: feature.into(),
            match_expressions,
        }
    }

    /// Split the reference into domain and lowercased feature name.
    ///
    /// Splits on the first separator only, so feature names may contain dots.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::MalformedReference`] if there is no separator.
    pub fn reference(&self) -> Result<(&str, String)> {
        self.feature
            .split_once(FEATURE_SEPARATOR)
            .map(|(domain, feature)| (domain, feature.to_lowercase()))
            .ok_or_else(|| LabelError::MalformedReference {
                reference: self.feature.clone(),
            })
    }
}

/// Result of a full matcher evaluation.
///
/// `features` holds every term evaluated so far, including the subset of the
/// failing term, so callers can inspect partial matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Whether every term matched.
    pub matched: bool,
    /// Matched subsets, keyed by domain and feature.
    pub features: MatchedFeatures,
}

/// Ordered list of terms combined with logical AND.
///
/// # Example
///
/// ```
/// use nodelabel::prelude::*;
///
/// let features = Features::new().with_domain(
///     "kernel",
///     DomainFeatures::new().with_keys("loadedmodule", ["kvm", "vfio"]),
/// );
/// let matcher = FeatureMatcher::new(vec![FeatureMatcherTerm::new(
///     "kernel.loadedmodule",
///     MatchExpressionSet::new().with("kvm", MatchExpression::unary(MatchOp::Exists).unwrap()),
/// )]);
///
/// let matched = matcher.matches(&features).unwrap().unwrap();
/// assert_eq!(matched.get("kernel", "loadedmodule").unwrap().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureMatcher {
    terms: Vec<FeatureMatcherTerm>,
}

impl FeatureMatcher {
    /// Create a matcher from terms.
    #[must_use]
    pub fn new(terms: Vec<FeatureMatcherTerm>) -> Self {
        Self { terms }
    }

    /// Append a term (builder pattern).
    #[must_use]
    pub fn with_term(mut self, term: FeatureMatcherTerm) -> Self {
        self.terms.push(term);
        self
    }

    /// The terms, in evaluation order.
    #[must_use]
    pub fn terms(&self) -> &[FeatureMatcherTerm] {
        &self.terms
    }

    /// Mutable access to the terms.
    pub fn terms_mut(&mut self) -> &mut Vec<FeatureMatcherTerm> {
        &mut self.terms
    }

    /// Number of terms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Returns `true` if there are no terms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Evaluate all terms, keeping partial results.
    ///
    /// Short-circuits at the first term that matches nothing. A matcher with
    /// no terms matches vacuously.
    ///
    /// # Errors
    ///
    /// - [`LabelError::MalformedReference`]: term reference has no `.`
    /// - [`LabelError::UnknownDomain`]: domain not in the snapshot
    /// - [`LabelError::UnknownFeature`]: feature in none of the domain's sets
    /// - [`LabelError::Expression`]: an expression could not be evaluated
    pub fn evaluate(&self, features: &Features) -> Result<MatchOutcome> {
        let mut matched = MatchedFeatures::new();

        for term in &self.terms {
            let (domain, feature) = term.reference()?;
            let domain_features =
                features
                    .domain(domain)
                    .ok_or_else(|| LabelError::UnknownDomain {
                        domain: domain.to_owned(),
                    })?;
            let set = domain_features
                .resolve(&feature)
                .ok_or_else(|| LabelError::UnknownFeature {
                    domain: domain.to_owned(),
                    feature: feature.clone(),
                })?;

            let subset = term.match_expressions.evaluate(set)?;
            let hit = !subset.is_empty();
            matched.insert(domain, &feature, subset);

            if !hit {
                return Ok(MatchOutcome {
                    matched: false,
                    features: matched,
                });
            }
        }

        Ok(MatchOutcome {
            matched: true,
            features: matched,
        })
    }

    /// Evaluate all terms; `None` on non-match.
    ///
    /// # Errors
    ///
    /// Same as [`evaluate`](Self::evaluate).
    pub fn matches(&self, features: &Features) -> Result<Option<MatchedFeatures>> {
        let outcome = self.evaluate(features)?;
        Ok(outcome.matched.then_some(outcome.features))
    }
}

impl From<Vec<FeatureMatcherTerm>> for FeatureMatcher {
    fn from(terms: Vec<FeatureMatcherTerm>) -> Self {
        Self::new(terms)
    }
}

/// One `matchAny` alternative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchAnyElem {
    /// The alternative's matcher.
    #[serde(default, deserialize_with = "crate::config::null_as_default")]
    pub match_features: FeatureMatcher,
}

impl MatchAnyElem {
    /// Wrap a matcher as an alternative.
    #[must_use]
    pub fn new(match_features: FeatureMatcher) -> Self {
        Self { match_features }
    }

    /// Evaluate the wrapped matcher.
    ///
    /// # Errors
    ///
    /// Same as [`FeatureMatcher::evaluate`].
    pub fn matches(&self, features: &Features) -> Result<Option<MatchedFeatures>> {
        self.match_features.matches(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DomainFeatures, InstanceFeature, MatchExpression, MatchOp};

    fn snapshot() -> Features {
        Features::new().with_domain(
            "domain-1",
            DomainFeatures::new()
                .with_keys("kf-1", ["key-1"])
                .with_values("vf-1", [("key-1", "val-1")])
                .with_instances(
                    "if-1",
                    [
                        InstanceFeature::new([("attr-1", "1")]),
                        InstanceFeature::new([("attr-1", "10")]),
                    ],
                ),
        )
    }

    fn term(feature: &str, attr: &str, op: MatchOp, values: &[&str]) -> FeatureMatcherTerm {
        FeatureMatcherTerm::new(
            feature,
            MatchExpressionSet::new().with(
                attr,
                MatchExpression::new(op, values.iter().copied()).unwrap(),
            ),
        )
    }

    #[test]
    fn reference_splits_on_first_dot() {
        let t = term("pci.device.v2", "x", MatchOp::Exists, &[]);
        assert_eq!(t.reference().unwrap(), ("pci", "device.v2".to_owned()));

        let t = term("nodot", "x", MatchOp::Exists, &[]);
        assert!(matches!(
            t.reference(),
            Err(LabelError::MalformedReference { .. })
        ));
    }

    #[test]
    fn unknown_domain_is_error() {
        let m = FeatureMatcher::new(vec![term("nope.kf-1", "key-1", MatchOp::Exists, &[])]);
        assert_eq!(
            m.matches(&snapshot()),
            Err(LabelError::UnknownDomain {
                domain: "nope".into()
            })
        );
    }

    #[test]
    fn unknown_feature_is_error() {
        let m = FeatureMatcher::new(vec![term("domain-1.zz", "key-1", MatchOp::Exists, &[])]);
        assert!(matches!(
            m.matches(&snapshot()),
            Err(LabelError::UnknownFeature { .. })
        ));
    }

    #[test]
    fn feature_name_is_case_insensitive() {
        let m = FeatureMatcher::new(vec![term("domain-1.KF-1", "key-1", MatchOp::Exists, &[])]);
        let matched = m.matches(&snapshot()).unwrap().unwrap();
        assert!(matched.get("domain-1", "kf-1").is_some());
    }

    #[test]
    fn and_semantics() {
        let a = term("domain-1.vf-1", "key-1", MatchOp::In, &["val-1"]);
        let b = term("domain-1.if-1", "attr-1", MatchOp::Lt, &["100"]);
        let both = FeatureMatcher::new(vec![a.clone(), b.clone()]);
        assert!(both.matches(&snapshot()).unwrap().is_some());

        let failing_b = term("domain-1.if-1", "attr-1", MatchOp::Gt, &["100"]);
        let m = FeatureMatcher::new(vec![a, failing_b.clone()]);
        assert!(m.matches(&snapshot()).unwrap().is_none());

        let failing_a = term("domain-1.vf-1", "key-1", MatchOp::In, &["val-x"]);
        let m = FeatureMatcher::new(vec![failing_a, b]);
        assert!(m.matches(&snapshot()).unwrap().is_none());
    }

    #[test]
    fn partial_match_is_kept_on_failure() {
        let m = FeatureMatcher::new(vec![
            term("domain-1.kf-1", "key-1", MatchOp::Exists, &[]),
            term("domain-1.vf-1", "key-1", MatchOp::In, &["val-x"]),
            term("domain-1.if-1", "attr-1", MatchOp::Exists, &[]),
        ]);
        let outcome = m.evaluate(&snapshot()).unwrap();
        assert!(!outcome.matched);
        assert_eq!(outcome.features.get("domain-1", "kf-1").unwrap().len(), 1);
        assert!(outcome.features.get("domain-1", "vf-1").unwrap().is_empty());
        // Short-circuited before the third term.
        assert!(outcome.features.get("domain-1", "if-1").is_none());
    }

    #[test]
    fn expression_error_aborts() {
        let m = FeatureMatcher::new(vec![term("domain-1.kf-1", "key-1", MatchOp::In, &["x"])]);
        assert!(matches!(
            m.matches(&snapshot()),
            Err(LabelError::Expression { .. })
        ));
    }

    #[test]
    fn empty_matcher_matches_vacuously() {
        let m = FeatureMatcher::default();
        assert_eq!(m.matches(&Features::new()).unwrap(), Some(MatchedFeatures::new()));
    }

    #[test]
    fn deserialize_terms() {
        let m: FeatureMatcher = serde_yaml::from_str(
            r#"
- feature: domain-1.vf-1
  matchExpressions:
    key-1: {op: In, value: [val-1]}
"#,
        )
        .unwrap();
        assert_eq!(m.len(), 1);
        assert!(m.matches(&snapshot()).unwrap().is_some());
    }
}
