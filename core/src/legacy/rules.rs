//! Legacy sub-rule kinds and the raw features they read.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use super::LegacySubRule;
use crate::expression::compile_regex;
use crate::{
    Features, InstanceFeatureSet, KeyFeatureSet, LabelError, MatchExpression, MatchExpressionSet,
    MatchOp, Result, ValueFeatureSet,
};

// ═══════════════════════════════════════════════════════════════════════════════
// Raw feature lookup
// ═══════════════════════════════════════════════════════════════════════════════

fn unavailable(what: &str) -> LabelError {
    LabelError::SourceUnavailable {
        what: what.to_owned(),
    }
}

fn key_set<'a>(
    features: &'a Features,
    domain: &str,
    name: &str,
    what: &str,
) -> Result<&'a KeyFeatureSet> {
    features
        .domain(domain)
        .and_then(|d| d.keys.get(name))
        .ok_or_else(|| unavailable(what))
}

fn value_set<'a>(
    features: &'a Features,
    domain: &str,
    name: &str,
    what: &str,
) -> Result<&'a ValueFeatureSet> {
    features
        .domain(domain)
        .and_then(|d| d.values.get(name))
        .ok_or_else(|| unavailable(what))
}

fn instance_set<'a>(
    features: &'a Features,
    domain: &str,
    name: &str,
    what: &str,
) -> Result<&'a InstanceFeatureSet> {
    features
        .domain(domain)
        .and_then(|d| d.instances.get(name))
        .ok_or_else(|| unavailable(what))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Device IDs
// ═══════════════════════════════════════════════════════════════════════════════

/// Attribute → allowed values, matched against device instances.
///
/// A device matches when each listed attribute has one of the listed values.
/// The rule matches when any device does. Typical attributes are `class`,
/// `vendor`, `device`, `subsystem_vendor` and `subsystem_device` for PCI, and
/// `class`, `vendor`, `device` and `serial` for USB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, Vec<String>>",
    into = "BTreeMap<String, Vec<String>>"
)]
pub struct DeviceIdRule {
    expressions: MatchExpressionSet,
}

impl DeviceIdRule {
    /// Build from attribute → allowed values.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Expression`] if an attribute lists no values.
    pub fn new<I, K, V>(attributes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        let mut expressions = MatchExpressionSet::new();
        for (name, values) in attributes {
            expressions.insert(name, MatchExpression::new(MatchOp::In, values)?);
        }
        Ok(Self { expressions })
    }

    /// Returns `true` if any device satisfies every attribute.
    ///
    /// # Errors
    ///
    /// Propagates expression errors.
    pub fn matches_devices(&self, devices: &InstanceFeatureSet) -> Result<bool> {
        for device in &devices.elements {
            if self.expressions.matches_attributes(&device.attributes)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl TryFrom<BTreeMap<String, Vec<String>>> for DeviceIdRule {
    type Error = LabelError;

    fn try_from(attributes: BTreeMap<String, Vec<String>>) -> Result<Self> {
        Self::new(attributes)
    }
}

impl From<DeviceIdRule> for BTreeMap<String, Vec<String>> {
    fn from(rule: DeviceIdRule) -> Self {
        rule.expressions
            .iter()
            .map(|(k, e)| (k.to_owned(), e.values().to_vec()))
            .collect()
    }
}

/// `pciId`: a [`DeviceIdRule`] over `pci.device`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PciIdRule(pub DeviceIdRule);

impl LegacySubRule for PciIdRule {
    fn kind(&self) -> &'static str {
        "pciId"
    }

    fn matches(&self, features: &Features) -> Result<bool> {
        self.0
            .matches_devices(instance_set(features, "pci", "device", "pci devices")?)
    }
}

/// `usbId`: a [`DeviceIdRule`] over `usb.device`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsbIdRule(pub DeviceIdRule);

impl LegacySubRule for UsbIdRule {
    fn kind(&self) -> &'static str {
        "usbId"
    }

    fn matches(&self, features: &Features) -> Result<bool> {
        self.0
            .matches_devices(instance_set(features, "usb", "device", "usb devices")?)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Key lists
// ═══════════════════════════════════════════════════════════════════════════════

/// `loadedKMod`: every module must be in `kernel.loadedmodule`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoadedKModRule(pub Vec<String>);

impl LegacySubRule for LoadedKModRule {
    fn kind(&self) -> &'static str {
        "loadedKMod"
    }

    fn matches(&self, features: &Features) -> Result<bool> {
        let loaded = key_set(features, "kernel", "loadedmodule", "loaded kernel modules")?;
        Ok(self.0.iter().all(|m| loaded.contains(m)))
    }
}

/// `cpuId`: every flag must be in `cpu.cpuid`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CpuIdRule(pub Vec<String>);

impl LegacySubRule for CpuIdRule {
    fn kind(&self) -> &'static str {
        "cpuId"
    }

    fn matches(&self, features: &Features) -> Result<bool> {
        let flags = key_set(features, "cpu", "cpuid", "cpuid flags")?;
        Ok(self.0.iter().all(|f| flags.contains(f)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Kernel config
// ═══════════════════════════════════════════════════════════════════════════════

/// One kconfig requirement, written `NAME` or `NAME=VALUE`.
///
/// A bare `NAME` requires the value `"true"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KconfigEntry {
    /// Option name.
    pub name: String,
    /// Required value.
    pub value: String,
}

impl FromStr for KconfigEntry {
    type Err = LabelError;

    fn from_str(raw: &str) -> Result<Self> {
        let (name, value) = raw.split_once('=').unwrap_or((raw, "true"));
        if name.is_empty() {
            return Err(LabelError::config(format!(
                "invalid kconfig entry \"{raw}\": empty name"
            )));
        }
        Ok(Self {
            name: name.to_owned(),
            value: value.to_owned(),
        })
    }
}

impl TryFrom<String> for KconfigEntry {
    type Error = LabelError;

    fn try_from(raw: String) -> Result<Self> {
        raw.parse()
    }
}

impl From<KconfigEntry> for String {
    fn from(entry: KconfigEntry) -> Self {
        entry.to_string()
    }
}

impl fmt::Display for KconfigEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// `kConfig`: every entry must equal its value in `kernel.config`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KconfigRule(pub Vec<KconfigEntry>);

impl LegacySubRule for KconfigRule {
    fn kind(&self) -> &'static str {
        "kConfig"
    }

    fn matches(&self, features: &Features) -> Result<bool> {
        let options = value_set(features, "kernel", "config", "kernel config options")?;
        Ok(self
            .0
            .iter()
            .all(|e| options.get(&e.name) == Some(e.value.as_str())))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Node name
// ═══════════════════════════════════════════════════════════════════════════════

/// `nodename`: any pattern must match `system.name` value `nodename`.
///
/// Patterns are unanchored and compiled once, when the rule is built. An
/// invalid pattern is logged then and never matches; the rule keeps its source
/// text so it serializes back unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct NodenameRule {
    patterns: Vec<String>,
    compiled: Vec<Regex>,
}

impl NodenameRule {
    /// Compile the patterns, logging and dropping invalid ones.
    pub fn new<I>(patterns: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let compiled = patterns
            .iter()
            .filter_map(|pattern| match compile_regex(MatchOp::InRegexp, pattern) {
                Ok(re) => Some(re),
                Err(err) => {
                    error!(pattern = %pattern, error = %err, "nodename rule: invalid nodename regexp");
                    None
                }
            })
            .collect();
        Self { patterns, compiled }
    }

    /// The patterns as written, including invalid ones.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl PartialEq for NodenameRule {
    fn eq(&self, other: &Self) -> bool {
        self.patterns == other.patterns
    }
}

impl Eq for NodenameRule {}

impl From<Vec<String>> for NodenameRule {
    fn from(patterns: Vec<String>) -> Self {
        Self::new(patterns)
    }
}

impl From<NodenameRule> for Vec<String> {
    fn from(rule: NodenameRule) -> Self {
        rule.patterns
    }
}

impl LegacySubRule for NodenameRule {
    fn kind(&self) -> &'static str {
        "nodename"
    }

    fn matches(&self, features: &Features) -> Result<bool> {
        let node_name = value_set(features, "system", "name", "node name")?
            .get("nodename")
            .ok_or_else(|| unavailable("node name"))?;

        for re in &self.compiled {
            if re.is_match(node_name) {
                trace!(pattern = %re, node = node_name, "nodename rule: match");
                return Ok(true);
            }
            trace!(pattern = %re, node = node_name, "nodename rule: no match");
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DomainFeatures, InstanceFeature};
    use tracing_test::traced_test;

    fn devices() -> Features {
        Features::new().with_domain(
            "pci",
            DomainFeatures::new().with_instances(
                "device",
                [
                    InstanceFeature::new([("class", "0300"), ("vendor", "10de")]),
                    InstanceFeature::new([("class", "0207"), ("vendor", "15b3")]),
                ],
            ),
        )
    }

    #[test]
    fn pci_any_device_with_all_attributes() {
        let rule = PciIdRule(
            DeviceIdRule::new([("vendor", vec!["15b3"]), ("class", vec!["0207", "0200"])]).unwrap(),
        );
        assert!(rule.matches(&devices()).unwrap());

        // Attributes are ANDed on one device, not across devices.
        let rule = PciIdRule(
            DeviceIdRule::new([("vendor", vec!["15b3"]), ("class", vec!["0300"])]).unwrap(),
        );
        assert!(!rule.matches(&devices()).unwrap());
    }

    #[test]
    fn usb_source_missing() {
        let rule = UsbIdRule(DeviceIdRule::new([("vendor", vec!["03e7"])]).unwrap());
        assert_eq!(
            rule.matches(&devices()),
            Err(LabelError::SourceUnavailable {
                what: "usb devices".into()
            })
        );
    }

    #[test]
    fn device_id_requires_values() {
        assert!(DeviceIdRule::new([("vendor", Vec::<String>::new())]).is_err());
        assert!(serde_yaml::from_str::<DeviceIdRule>("{vendor: []}").is_err());
    }

    #[test]
    fn device_id_round_trip() {
        let rule: DeviceIdRule = serde_yaml::from_str("{vendor: ['8086'], device: ['1521']}").unwrap();
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"device": ["1521"], "vendor": ["8086"]})
        );
    }

    #[test]
    fn key_lists() {
        let f = Features::new()
            .with_domain(
                "kernel",
                DomainFeatures::new().with_keys("loadedmodule", ["kvm", "vfio"]),
            )
            .with_domain("cpu", DomainFeatures::new().with_keys("cpuid", ["AVX", "SSE4"]));

        assert!(LoadedKModRule(vec!["kvm".into(), "vfio".into()]).matches(&f).unwrap());
        assert!(!LoadedKModRule(vec!["kvm".into(), "nvidia".into()]).matches(&f).unwrap());
        assert!(CpuIdRule(vec!["AVX".into()]).matches(&f).unwrap());
        assert!(!CpuIdRule(vec!["AVX512F".into()]).matches(&f).unwrap());
        assert!(CpuIdRule(vec![]).matches(&f).unwrap());
        assert!(CpuIdRule(vec![]).matches(&Features::new()).is_err());
    }

    #[test]
    fn kconfig_entries() {
        let e: KconfigEntry = "NO_HZ".parse().unwrap();
        assert_eq!((e.name.as_str(), e.value.as_str()), ("NO_HZ", "true"));
        let e: KconfigEntry = "HZ=1000".parse().unwrap();
        assert_eq!((e.name.as_str(), e.value.as_str()), ("HZ", "1000"));
        assert!("=y".parse::<KconfigEntry>().is_err());

        let f = Features::new().with_domain(
            "kernel",
            DomainFeatures::new().with_values("config", [("HZ", "1000"), ("X86", "true")]),
        );
        let rule: KconfigRule = serde_yaml::from_str("[X86, HZ=1000]").unwrap();
        assert!(rule.matches(&f).unwrap());
        let rule: KconfigRule = serde_yaml::from_str("[HZ=250]").unwrap();
        assert!(!rule.matches(&f).unwrap());
    }

    fn named(name: &str) -> Features {
        Features::new().with_domain(
            "system",
            DomainFeatures::new().with_values("name", [("nodename", name)]),
        )
    }

    #[test]
    fn nodename_any_pattern() {
        let rule = NodenameRule::new(["^master", "worker-[0-9]+$"]);
        assert!(rule.matches(&named("worker-12")).unwrap());
        assert!(!rule.matches(&named("edge-1")).unwrap());
        assert!(rule.matches(&Features::new()).is_err());
    }

    #[test]
    #[traced_test]
    fn nodename_invalid_pattern_is_skipped_at_decode() {
        let rule: NodenameRule = serde_yaml::from_str("['(', '^node']").unwrap();
        assert!(logs_contain("invalid nodename regexp"));
        assert_eq!(rule.patterns(), ["(", "^node"]);
        assert!(rule.matches(&named("node-a")).unwrap());
        assert!(!rule.matches(&named("(")).unwrap());
        assert_eq!(serde_json::to_value(&rule).unwrap(), serde_json::json!(["(", "^node"]));
    }
}
