//! Legacy rule dialect
//!
//! ```yaml
//! - name: my-nic
//!   value: mellanox
//!   matchOn:
//!     - pciId: {vendor: ["15b3"]}
//!       loadedKMod: ["mlx5_core"]
//!     - nodename: ["^worker-.*"]
//! ```
//!
//! `matchOn` is an OR over [`LegacyMatcher`]s. Inside one matcher, every
//! sub-rule that is set must match. A rule with an empty `matchOn` always
//! matches. The output is a single label, the rule's name with its value
//! (default `"true"`).

mod rules;

use serde::{Deserialize, Serialize};

pub use rules::{
    CpuIdRule, DeviceIdRule, KconfigEntry, KconfigRule, LoadedKModRule, NodenameRule, PciIdRule,
    UsbIdRule,
};

use crate::{Features, Labels, Result};

/// One fixed-shape sub-rule kind of a [`LegacyMatcher`].
///
/// Each kind reads its own raw feature from the snapshot.
pub trait LegacySubRule {
    /// Name used in logs, matching the config key.
    fn kind(&self) -> &'static str;

    /// Returns `true` if the sub-rule holds for the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::SourceUnavailable`](crate::LabelError::SourceUnavailable)
    /// if the raw feature the sub-rule reads is missing.
    fn matches(&self, features: &Features) -> Result<bool>;
}

/// A legacy-dialect rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyRule {
    /// Label name emitted on match.
    pub name: String,

    /// Label value; `"true"` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Alternatives, any of which may match.
    #[serde(default, deserialize_with = "crate::config::null_as_default")]
    pub match_on: Vec<LegacyMatcher>,
}

impl LegacyRule {
    /// Create a rule with no alternatives. It matches unconditionally.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the label value (builder pattern).
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Add an alternative (builder pattern).
    #[must_use]
    pub fn with_matcher(mut self, matcher: LegacyMatcher) -> Self {
        self.match_on.push(matcher);
        self
    }

    /// Evaluate the rule. Alternatives are tried in order; the first match wins.
    ///
    /// # Errors
    ///
    /// A sub-rule error aborts the rule, even if a later alternative would match.
    pub fn execute(&self, features: &Features) -> Result<Option<Labels>> {
        if !self.match_on.is_empty() {
            let mut matched = false;
            for matcher in &self.match_on {
                if matcher.matches(features)? {
                    matched = true;
                    break;
                }
            }
            if !matched {
                return Ok(None);
            }
        }

        let value = self.value.clone().unwrap_or_else(|| "true".to_owned());
        Ok(Some(Labels::from([(self.name.clone(), value)])))
    }
}

/// Up to six sub-rules, combined with AND. Unset sub-rules are skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyMatcher {
    /// PCI device attributes, matched against `pci.device`.
    #[serde(rename = "pciId", default, skip_serializing_if = "Option::is_none")]
    pub pci_id: Option<PciIdRule>,

    /// USB device attributes, matched against `usb.device`.
    #[serde(rename = "usbId", default, skip_serializing_if = "Option::is_none")]
    pub usb_id: Option<UsbIdRule>,

    /// Kernel modules that must be loaded.
    #[serde(rename = "loadedKMod", default, skip_serializing_if = "Option::is_none")]
    pub loaded_kmod: Option<LoadedKModRule>,

    /// CPUID flags that must be present.
    #[serde(rename = "cpuId", default, skip_serializing_if = "Option::is_none")]
    pub cpu_id: Option<CpuIdRule>,

    /// Kernel config options that must be set.
    #[serde(rename = "kConfig", default, skip_serializing_if = "Option::is_none")]
    pub kconfig: Option<KconfigRule>,

    /// Node name patterns, any of which may match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodename: Option<NodenameRule>,
}

impl LegacyMatcher {
    /// Sub-rule keys as written in rule files, in evaluation order.
    pub const KINDS: [&'static str; 6] =
        ["pciId", "usbId", "loadedKMod", "cpuId", "kConfig", "nodename"];

    /// The sub-rules that are set, in evaluation order.
    pub fn sub_rules(&self) -> Vec<&dyn LegacySubRule> {
        let mut out: Vec<&dyn LegacySubRule> = Vec::new();
        if let Some(r) = &self.pci_id {
            out.push(r);
        }
        if let Some(r) = &self.usb_id {
            out.push(r);
        }
        if let Some(r) = &self.loaded_kmod {
            out.push(r);
        }
        if let Some(r) = &self.cpu_id {
            out.push(r);
        }
        if let Some(r) = &self.kconfig {
            out.push(r);
        }
        if let Some(r) = &self.nodename {
            out.push(r);
        }
        out
    }

    /// Returns `true` if every set sub-rule matches.
    ///
    /// # Errors
    ///
    /// Propagates the first sub-rule error.
    pub fn matches(&self, features: &Features) -> Result<bool> {
        for rule in self.sub_rules() {
            if !rule.matches(features)? {
                tracing::trace!(kind = rule.kind(), "legacy sub-rule did not match");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DomainFeatures, InstanceFeature, LabelError};

    fn node() -> Features {
        Features::new()
            .with_domain(
                "kernel",
                DomainFeatures::new()
                    .with_keys("loadedmodule", ["kvm", "vfio_pci"])
                    .with_values("config", [("NO_HZ", "y"), ("PREEMPT", "true")]),
            )
            .with_domain(
                "pci",
                DomainFeatures::new().with_instances(
                    "device",
                    [InstanceFeature::new([
                        ("class", "0200"),
                        ("vendor", "8086"),
                        ("device", "1521"),
                    ])],
                ),
            )
            .with_domain(
                "system",
                DomainFeatures::new().with_values("name", [("nodename", "worker-3")]),
            )
    }

    fn matcher(yaml: &str) -> LegacyMatcher {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn empty_match_on_is_unconditional() {
        let r = LegacyRule::new("always");
        assert_eq!(
            r.execute(&Features::new()).unwrap(),
            Some(Labels::from([("always".into(), "true".into())]))
        );
    }

    #[test]
    fn and_within_matcher() {
        let both = matcher("{pciId: {vendor: ['8086']}, loadedKMod: [kvm]}");
        assert!(both.matches(&node()).unwrap());

        let one_fails = matcher("{pciId: {vendor: ['8086']}, loadedKMod: [nvidia]}");
        assert!(!one_fails.matches(&node()).unwrap());
    }

    #[test]
    fn or_across_matchers() {
        let r = LegacyRule::new("nic")
            .with_value("intel")
            .with_matcher(matcher("{cpuId: [AVX512F]}"))
            .with_matcher(matcher("{kConfig: [NO_HZ=y, PREEMPT]}"));
        // cpu domain is missing: the first alternative errors before the second
        // one is considered.
        assert!(matches!(
            r.execute(&node()),
            Err(LabelError::SourceUnavailable { .. })
        ));

        let r = LegacyRule::new("nic")
            .with_value("intel")
            .with_matcher(matcher("{loadedKMod: [nvidia]}"))
            .with_matcher(matcher("{kConfig: [NO_HZ=y, PREEMPT]}"));
        assert_eq!(
            r.execute(&node()).unwrap(),
            Some(Labels::from([("nic".into(), "intel".into())]))
        );
    }

    #[test]
    fn no_match_yields_none() {
        let r = LegacyRule::new("x").with_matcher(matcher("{nodename: ['^master']}"));
        assert_eq!(r.execute(&node()).unwrap(), None);
    }

    #[test]
    fn sub_rules_in_order() {
        let m = matcher("{nodename: [w], pciId: {vendor: ['1']}, kConfig: [A]}");
        let kinds: Vec<_> = m.sub_rules().iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, ["pciId", "kConfig", "nodename"]);
    }

    #[test]
    fn kinds_cover_every_sub_rule() {
        let m = matcher(
            "{pciId: {vendor: ['1']}, usbId: {vendor: ['2']}, loadedKMod: [a], \
             cpuId: [B], kConfig: [C], nodename: [d]}",
        );
        let kinds: Vec<_> = m.sub_rules().iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, LegacyMatcher::KINDS);
    }

    #[test]
    fn decode_rule() {
        let r: LegacyRule = serde_yaml::from_str(
            r#"
name: my-rule
matchOn:
  - loadedKMod: [kvm]
  - usbId: {class: ["ff"], vendor: ["03e7"]}
"#,
        )
        .unwrap();
        assert_eq!(r.match_on.len(), 2);
        assert!(r.match_on[1].usb_id.is_some());
        assert_eq!(
            r.execute(&node()).unwrap(),
            Some(Labels::from([("my-rule".into(), "true".into())]))
        );
    }
}
