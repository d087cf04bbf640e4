//! `Rule` — the modern rule dialect
//!
//! ```yaml
//! - name: rdma-devices
//!   labels:
//!     rdma: "true"
//!   labelsTemplate: |
//!     {{range .pci.device}}vendor-{{.vendor}}=present
//!     {{end}}
//!   matchAny:
//!     - matchFeatures: [...]
//!   matchFeatures:
//!     - feature: pci.device
//!       matchExpressions:
//!         vendor: {op: In, value: ["15b3"]}
//! ```
//!
//! | Part | Semantics |
//! |------|-----------|
//! | `matchAny` | OR over alternatives; no alternative matching means no labels |
//! | `matchFeatures` | AND over terms; must also match when present |
//! | `labelsTemplate` | Rendered against each match, output parsed as `key=value` lines |
//! | `labels` | Static labels, merged last so they win over template output |

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    FeatureMatcher, Features, LabelTemplate, Labels, MatchAnyElem, MatchedFeatures, Result,
};

/// A modern-dialect rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Rule name, used in logs and errors.
    pub name: String,

    /// Static labels, emitted on match.
    #[serde(
        default,
        deserialize_with = "crate::config::null_as_default",
        skip_serializing_if = "Labels::is_empty"
    )]
    pub labels: Labels,

    /// Template producing extra labels from the matched features.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels_template: Option<LabelTemplate>,

    /// Terms that must all match.
    #[serde(
        default,
        deserialize_with = "crate::config::null_as_default",
        skip_serializing_if = "FeatureMatcher::is_empty"
    )]
    pub match_features: FeatureMatcher,

    /// Alternatives of which at least one must match.
    #[serde(
        default,
        deserialize_with = "crate::config::null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub match_any: Vec<MatchAnyElem>,
}

impl Rule {
    /// Create a rule with no matchers. It matches unconditionally.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a static label (builder pattern).
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set the labels template (builder pattern).
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Template`](crate::LabelError::Template) if the
    /// template does not compile.
    pub fn with_labels_template(mut self, source: impl Into<String>) -> Result<Self> {
        self.labels_template = Some(LabelTemplate::parse(source)?);
        Ok(self)
    }

    /// Set the `matchFeatures` matcher (builder pattern).
    #[must_use]
    pub fn with_match_features(mut self, matcher: FeatureMatcher) -> Self {
        self.match_features = matcher;
        self
    }

    /// Add a `matchAny` alternative (builder pattern).
    #[must_use]
    pub fn with_match_any(mut self, alternative: MatchAnyElem) -> Self {
        self.match_any.push(alternative);
        self
    }

    /// Evaluate the rule against a snapshot.
    ///
    /// Returns `Ok(None)` when the rule does not match. With a template, every
    /// matching `matchAny` alternative contributes template output; without
    /// one, the first matching alternative ends the scan.
    ///
    /// # Errors
    ///
    /// Any matcher or template error aborts the rule.
    pub fn execute(&self, features: &Features) -> Result<Option<Labels>> {
        let mut labels = Labels::new();

        if !self.match_any.is_empty() {
            let mut matched = false;
            for alternative in &self.match_any {
                let Some(m) = alternative.matches(features)? else {
                    continue;
                };
                matched = true;
                dump_matches("matchAny", &self.name, &m);

                match &self.labels_template {
                    Some(template) => labels.extend(template.expand(&m)?),
                    None => break,
                }
            }
            if !matched {
                return Ok(None);
            }
        }

        if !self.match_features.is_empty() {
            let Some(m) = self.match_features.matches(features)? else {
                return Ok(None);
            };
            dump_matches("matchFeatures", &self.name, &m);
            if let Some(template) = &self.labels_template {
                labels.extend(template.expand(&m)?);
            }
        }

        labels.extend(self.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(Some(labels))
    }
}

fn dump_matches(kind: &str, rule: &str, matched: &MatchedFeatures) {
    debug!(
        rule,
        matches = %serde_json::to_string(matched).unwrap_or_default(),
        "matches for {kind}"
    );
}
