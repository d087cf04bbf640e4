//! Conformance fixture runner
//!
//! A fixture is a rule set plus cases; each case supplies a feature snapshot
//! and the exact labels the labeler must produce for it.
//!
//! ```yaml
//! name: value_in
//! description: In on a value-set attribute
//! rules:
//!   - name: r
//!     labels: {label-3: label-val-3}
//!     matchFeatures:
//!       - feature: domain-1.vf-1
//!         matchExpressions:
//!           key-1: {op: In, value: [val-1]}
//! cases:
//!   - name: present
//!     features:
//!       domain-1: {values: {vf-1: {key-1: val-1}}}
//!     expect: {label-3: label-val-3}
//! ```

use nodelabel::prelude::*;
use serde::Deserialize;

/// A complete test fixture
#[derive(Debug, Deserialize)]
pub struct Fixture {
    pub name: String,
    pub description: String,
    /// Rules are decoded with the same code path as rule files.
    pub rules: RuleSet,
    pub cases: Vec<Case>,
}

/// One snapshot and its expected labels
#[derive(Debug, Deserialize)]
pub struct Case {
    pub name: String,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub expect: Labels,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Runner
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of running a single test case
#[derive(Debug)]
pub struct CaseResult {
    pub case_name: String,
    pub passed: bool,
    pub expected: Labels,
    pub actual: Labels,
    /// Output of the threaded evaluation, which must equal `actual`.
    pub parallel: Labels,
}

impl Fixture {
    /// Parse a fixture from YAML
    ///
    /// # Errors
    ///
    /// Returns the YAML error if the document does not describe a fixture.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Parse multiple fixtures from a YAML file with `---` separators
    ///
    /// # Errors
    ///
    /// Returns the first document's YAML error.
    pub fn from_yaml_multi(yaml: &str) -> Result<Vec<Self>, serde_yaml::Error> {
        let mut fixtures = Vec::new();
        for doc in serde_yaml::Deserializer::from_str(yaml) {
            fixtures.push(Self::deserialize(doc)?);
        }
        Ok(fixtures)
    }

    /// Run all test cases and return results
    #[must_use]
    pub fn run(&self) -> Vec<CaseResult> {
        let labeler = Labeler::new(self.rules.clone());
        self.cases
            .iter()
            .map(|case| {
                let actual = labeler.labels(&case.features);
                let parallel = labeler.labels_parallel(&case.features);
                CaseResult {
                    case_name: case.name.clone(),
                    passed: actual == case.expect && parallel == actual,
                    expected: case.expect.clone(),
                    actual,
                    parallel,
                }
            })
            .collect()
    }

    /// Run all test cases and panic on first failure
    ///
    /// # Panics
    ///
    /// Panics when a case's labels differ from its expectation.
    pub fn run_and_assert(&self) {
        for result in self.run() {
            assert!(
                result.passed,
                "Fixture '{}' case '{}' failed: expected {:?}, got {:?} (parallel {:?})",
                self.name, result.case_name, result.expected, result.actual, result.parallel
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATIC_ONLY: &str = r#"
name: static
description: rule without matchers
rules:
  - name: always
    labels: {fixed: "yes"}
cases:
  - name: empty snapshot
    expect: {fixed: "yes"}
"#;

    #[test]
    fn parses_single_document() {
        let fixture = Fixture::from_yaml(STATIC_ONLY).unwrap();
        assert_eq!(fixture.name, "static");
        assert_eq!(fixture.rules.len(), 1);
        assert_eq!(fixture.cases.len(), 1);
        assert!(fixture.cases[0].features.is_empty());
        fixture.run_and_assert();
    }

    #[test]
    fn parses_multiple_documents() {
        let yaml = format!("{STATIC_ONLY}---{STATIC_ONLY}");
        let fixtures = Fixture::from_yaml_multi(&yaml).unwrap();
        assert_eq!(fixtures.len(), 2);
    }

    #[test]
    fn reports_mismatch() {
        let mut fixture = Fixture::from_yaml(STATIC_ONLY).unwrap();
        fixture.cases[0].expect.insert("other".into(), "1".into());
        let results = fixture.run();
        assert!(!results[0].passed);
        assert_eq!(results[0].actual.len(), 1);
    }

    #[test]
    #[should_panic(expected = "case 'empty snapshot' failed")]
    fn run_and_assert_panics_on_mismatch() {
        let mut fixture = Fixture::from_yaml(STATIC_ONLY).unwrap();
        fixture.cases[0].expect.clear();
        fixture.run_and_assert();
    }

    #[test]
    fn snapshot_serializes_to_fixture_shape() {
        let json = serde_json::to_value(crate::node_snapshot()).unwrap();
        assert_eq!(json["system"]["values"]["name"]["nodename"], "worker-3");
        assert_eq!(json["pci"]["instances"]["device"][1]["vendor"], "15b3");
    }
}
