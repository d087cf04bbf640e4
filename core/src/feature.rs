//! Feature domain model: what discovery found
//!
//! A [`Features`] snapshot maps domain names (`cpu`, `kernel`, `pci`, ...) to
//! [`DomainFeatures`]. Each domain carries three independent feature maps:
//!
//! | Map | Element type | Example |
//! |-----|--------------|---------|
//! | `keys` | [`KeyFeatureSet`] — names only | loaded kernel modules |
//! | `values` | [`ValueFeatureSet`] — name → value | kconfig options |
//! | `instances` | [`InstanceFeatureSet`] — list of attribute maps | PCI devices |
//!
//! Feature names are case-insensitive: they are stored lowercased and looked
//! up lowercased. A name lives in at most one of the three maps; the builder
//! methods evict the name from the other two.
//!
//! # Serialized form
//!
//! ```yaml
//! kernel:
//!   keys:
//!     loadedmodule: [ib_uverbs, rdma_ucm]
//!   values:
//!     config: {NO_HZ: "y"}
//! pci:
//!   instances:
//!     device:
//!       - {class: "0300", vendor: "8086", device: "1234"}
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::Result;

/// Snapshot of every domain discovered in one pass.
///
/// Built once per discovery pass and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Features {
    domains: BTreeMap<String, DomainFeatures>,
}

impl Features {
    /// Create an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a domain.
    pub fn insert(&mut self, domain: impl Into<String>, features: DomainFeatures) {
        self.domains.insert(domain.into(), features);
    }

    /// Add a domain (builder pattern).
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>, features: DomainFeatures) -> Self {
        self.insert(domain, features);
        self
    }

    /// Look up a domain by its exact name.
    #[must_use]
    pub fn domain(&self, name: &str) -> Option<&DomainFeatures> {
        self.domains.get(name)
    }

    /// Iterate domains in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DomainFeatures)> {
        self.domains.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of domains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Returns `true` if no domain was discovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Load a snapshot from a YAML or JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Config`](crate::LabelError::Config) if the file cannot
    /// be read or does not describe a snapshot.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        crate::load_document(path.as_ref())
    }
}

impl FromIterator<(String, DomainFeatures)> for Features {
    fn from_iter<I: IntoIterator<Item = (String, DomainFeatures)>>(iter: I) -> Self {
        Self {
            domains: iter.into_iter().collect(),
        }
    }
}

/// All features of one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainFeatures {
    /// Presence-only feature sets.
    #[serde(
        deserialize_with = "lowercase_keys",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub keys: BTreeMap<String, KeyFeatureSet>,

    /// Scalar feature sets.
    #[serde(
        deserialize_with = "lowercase_keys",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub values: BTreeMap<String, ValueFeatureSet>,

    /// Repeated-object feature sets.
    #[serde(
        deserialize_with = "lowercase_keys",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub instances: BTreeMap<String, InstanceFeatureSet>,
}

/// Borrowed view of whichever set a feature name resolved to.
///
/// Closed set of variants: the evaluator handles each one exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSetRef<'a> {
    /// Resolved in `keys`.
    Keys(&'a KeyFeatureSet),
    /// Resolved in `values`.
    Values(&'a ValueFeatureSet),
    /// Resolved in `instances`.
    Instances(&'a InstanceFeatureSet),
}

impl DomainFeatures {
    /// Create an empty domain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a feature name: keys first, then values, then instances.
    ///
    /// The name is matched case-insensitively.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<FeatureSetRef<'_>> {
        let name = name.to_lowercase();
        if let Some(f) = self.keys.get(&name) {
            Some(FeatureSetRef::Keys(f))
        } else if let Some(f) = self.values.get(&name) {
            Some(FeatureSetRef::Values(f))
        } else {
            self.instances.get(&name).map(FeatureSetRef::Instances)
        }
    }

    /// Insert a key feature set, evicting the name from the other maps.
    pub fn insert_keys(&mut self, name: &str, set: KeyFeatureSet) {
        let name = self.evict(name);
        self.keys.insert(name, set);
    }

    /// Insert a value feature set, evicting the name from the other maps.
    pub fn insert_values(&mut self, name: &str, set: ValueFeatureSet) {
        let name = self.evict(name);
        self.values.insert(name, set);
    }

    /// Insert an instance feature set, evicting the name from the other maps.
    pub fn insert_instances(&mut self, name: &str, set: InstanceFeatureSet) {
        let name = self.evict(name);
        self.instances.insert(name, set);
    }

    /// Add a key feature set (builder pattern).
    #[must_use]
    pub fn with_keys<I, S>(mut self, name: &str, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert_keys(name, elements.into_iter().collect());
        self
    }

    /// Add a value feature set (builder pattern).
    #[must_use]
    pub fn with_values<I, K, V>(mut self, name: &str, elements: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.insert_values(name, elements.into_iter().collect());
        self
    }

    /// Add an instance feature set (builder pattern).
    #[must_use]
    pub fn with_instances<I>(mut self, name: &str, instances: I) -> Self
    where
        I: IntoIterator<Item = InstanceFeature>,
    {
        self.insert_instances(name, instances.into_iter().collect());
        self
    }

    fn evict(&mut self, name: &str) -> String {
        let name = name.to_lowercase();
        self.keys.remove(&name);
        self.values.remove(&name);
        self.instances.remove(&name);
        name
    }
}

/// Presence-only collection of element names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyFeatureSet {
    /// Names of the elements present.
    pub elements: BTreeSet<String>,
}

impl KeyFeatureSet {
    /// Returns `true` if the element is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.elements.contains(name)
    }
}

impl<S: Into<String>> FromIterator<S> for KeyFeatureSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            elements: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Mapping from attribute name to one scalar value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueFeatureSet {
    /// Attribute name → value.
    pub elements: BTreeMap<String, String>,
}

impl ValueFeatureSet {
    /// Get the value of an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.elements.get(name).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ValueFeatureSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            elements: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Ordered list of discovered objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceFeatureSet {
    /// One entry per discovered object, in discovery order.
    pub elements: Vec<InstanceFeature>,
}

impl FromIterator<InstanceFeature> for InstanceFeatureSet {
    fn from_iter<I: IntoIterator<Item = InstanceFeature>>(iter: I) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}

/// One discovered object: attribute name → value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceFeature {
    /// Attribute name → value.
    pub attributes: BTreeMap<String, String>,
}

impl InstanceFeature {
    /// Create an instance from attribute pairs.
    pub fn new<I, K, V>(attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Get the value of an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

fn lowercase_keys<'de, D, V>(deserializer: D) -> Result<BTreeMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    let raw = BTreeMap::<String, V>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| (k.to_lowercase(), v))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> DomainFeatures {
        DomainFeatures::new()
            .with_keys("kf-1", ["key-1"])
            .with_values("vf-1", [("key-1", "val-1")])
            .with_instances("if-1", [InstanceFeature::new([("attr-1", "1")])])
    }

    #[test]
    fn resolve_each_kind() {
        let d = domain();
        assert!(matches!(d.resolve("kf-1"), Some(FeatureSetRef::Keys(_))));
        assert!(matches!(d.resolve("vf-1"), Some(FeatureSetRef::Values(_))));
        assert!(matches!(
            d.resolve("if-1"),
            Some(FeatureSetRef::Instances(_))
        ));
        assert!(d.resolve("nope").is_none());
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let d = DomainFeatures::new().with_keys("LoadedModule", ["kvm"]);
        assert!(d.keys.contains_key("loadedmodule"));
        assert!(matches!(
            d.resolve("LOADEDMODULE"),
            Some(FeatureSetRef::Keys(_))
        ));
    }

    #[test]
    fn name_lives_in_one_map_only() {
        let d = DomainFeatures::new()
            .with_keys("f", ["a"])
            .with_values("f", [("a", "1")]);
        assert!(d.keys.is_empty());
        assert!(matches!(d.resolve("f"), Some(FeatureSetRef::Values(_))));
    }

    #[test]
    fn deserialize_snapshot_lowercases_feature_names() {
        let yaml = r#"
kernel:
  keys:
    LoadedModule: [kvm, vfio]
  values:
    config: {NO_HZ: "y"}
pci:
  instances:
    device:
      - {class: "0300", vendor: "8086"}
"#;
        let features: Features = serde_yaml::from_str(yaml).unwrap();
        let kernel = features.domain("kernel").unwrap();
        assert!(kernel.keys["loadedmodule"].contains("kvm"));
        assert_eq!(kernel.values["config"].get("NO_HZ"), Some("y"));

        let pci = features.domain("pci").unwrap();
        assert_eq!(pci.instances["device"].elements[0].get("vendor"), Some("8086"));
        assert!(pci.keys.is_empty());
    }

    #[test]
    fn snapshot_builder() {
        let f = Features::new().with_domain("cpu", DomainFeatures::new());
        assert_eq!(f.len(), 1);
        assert!(f.domain("cpu").is_some());
        assert!(f.domain("gpu").is_none());
    }
}
