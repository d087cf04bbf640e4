//! `MatchedFeatures` — exactly what a matcher matched
//!
//! This is the only data a label template ever sees. It is rebuilt for every
//! rule evaluation and dropped once labels are extracted.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::template::Value;

/// One matched element: `{Name}` for keys, `{Name, Value}` for values, or the
/// full attribute map of a matched instance.
pub type MatchedElement = BTreeMap<String, String>;

/// The subset of one feature set that matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MatchedSet {
    /// Matched elements of a key set.
    Keys(Vec<MatchedElement>),
    /// Matched elements of a value set.
    Values(Vec<MatchedElement>),
    /// Matched instances.
    Instances(Vec<MatchedElement>),
}

impl MatchedSet {
    /// The matched elements, whatever the set kind.
    #[must_use]
    pub fn elements(&self) -> &[MatchedElement] {
        match self {
            Self::Keys(e) | Self::Values(e) | Self::Instances(e) => e,
        }
    }

    /// Number of matched elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements().len()
    }

    /// Returns `true` if nothing matched (the term failed).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements().is_empty()
    }
}

/// Domain → feature → matched subset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MatchedFeatures {
    domains: BTreeMap<String, BTreeMap<String, MatchedSet>>,
}

impl MatchedFeatures {
    /// Create an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the subset matched for `domain.feature`.
    pub fn insert(&mut self, domain: &str, feature: &str, set: MatchedSet) {
        self.domains
            .entry(domain.to_owned())
            .or_default()
            .insert(feature.to_owned(), set);
    }

    /// Get the subset matched for `domain.feature`.
    #[must_use]
    pub fn get(&self, domain: &str, feature: &str) -> Option<&MatchedSet> {
        self.domains.get(domain).and_then(|d| d.get(feature))
    }

    /// Iterate `(domain, feature, set)` triples in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &MatchedSet)> {
        self.domains.iter().flat_map(|(domain, features)| {
            features
                .iter()
                .map(move |(feature, set)| (domain.as_str(), feature.as_str(), set))
        })
    }

    /// Returns `true` if no term was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Convert to template data: `.domain.feature` is a list of element maps.
    #[must_use]
    pub fn to_template_value(&self) -> Value {
        Value::Map(
            self.domains
                .iter()
                .map(|(domain, features)| {
                    let features = features
                        .iter()
                        .map(|(name, set)| {
                            let elements = set
                                .elements()
                                .iter()
                                .map(|e| {
                                    Value::Map(
                                        e.iter()
                                            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                                            .collect(),
                                    )
                                })
                                .collect();
                            (name.clone(), Value::List(elements))
                        })
                        .collect();
                    (domain.clone(), Value::Map(features))
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut m = MatchedFeatures::new();
        m.insert(
            "cpu",
            "cpuid",
            MatchedSet::Keys(vec![MatchedElement::from([("Name".into(), "AVX".into())])]),
        );
        assert_eq!(m.get("cpu", "cpuid").map(MatchedSet::len), Some(1));
        assert!(m.get("cpu", "model").is_none());
        assert_eq!(m.iter().count(), 1);
    }

    #[test]
    fn template_value_shape() {
        let mut m = MatchedFeatures::new();
        m.insert(
            "pci",
            "device",
            MatchedSet::Instances(vec![MatchedElement::from([(
                "vendor".into(),
                "8086".into(),
            )])]),
        );
        let Value::Map(domains) = m.to_template_value() else {
            panic!("expected map");
        };
        let Value::Map(features) = &domains["pci"] else {
            panic!("expected map");
        };
        let Value::List(devices) = &features["device"] else {
            panic!("expected list");
        };
        assert_eq!(devices.len(), 1);
    }

    #[test]
    fn serializes_as_nested_maps() {
        let mut m = MatchedFeatures::new();
        m.insert("d", "f", MatchedSet::Values(Vec::new()));
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json, serde_json::json!({"d": {"f": []}}));
    }
}
