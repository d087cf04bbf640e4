//! Rule configuration: dialect detection and rule sets
//!
//! A rule file is a list of rules in either dialect. A rule with a top-level
//! `matchOn` key (compared case-insensitively) is a [`LegacyRule`]; anything
//! else is a modern [`Rule`].
//!
//! | Source | Loader |
//! |--------|--------|
//! | YAML string | [`RuleSet::from_yaml_str`] |
//! | JSON string | [`RuleSet::from_json_str`] |
//! | File (`.json` → JSON, else YAML) | [`RuleSet::load_file`] |
//! | Drop-in directory | [`RuleSet::load_dir`] |

use std::fs;
use std::path::Path;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::{
    DeviceIdRule, Features, LabelError, Labels, LegacyMatcher, LegacyRule, LoadedKModRule,
    PciIdRule, Result, Rule,
};

const MATCH_ON: &str = "matchOn";

/// File extensions picked up by [`RuleSet::load_dir`].
const RULE_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Read a YAML or JSON document, chosen by file extension.
///
/// # Errors
///
/// Returns [`LabelError::Config`] if the file cannot be read or decoded.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .map_err(|e| LabelError::config(format!("{}: {e}", path.display())))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&text)
            .map_err(|e| LabelError::config(format!("{}: {e}", path.display())))
    } else {
        serde_yaml::from_str(&text)
            .map_err(|e| LabelError::config(format!("{}: {e}", path.display())))
    }
}

/// Field deserializer mapping an explicit `null` to the type's default.
///
/// Rule files written as `matchOn:` with nothing after the colon decode to an
/// empty list rather than failing the whole file.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ═══════════════════════════════════════════════════════════════════════════════
// CustomRule
// ═══════════════════════════════════════════════════════════════════════════════

/// A rule in either dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomRule {
    /// `matchOn`-style rule.
    Legacy(LegacyRule),
    /// `matchFeatures` / `matchAny` rule.
    Rule(Rule),
}

impl CustomRule {
    /// Assemble from optional variants.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Dialect`] unless exactly one variant is given.
    pub fn from_parts(legacy: Option<LegacyRule>, rule: Option<Rule>) -> Result<Self> {
        match (legacy, rule) {
            (Some(legacy), None) => Ok(Self::Legacy(legacy)),
            (None, Some(rule)) => Ok(Self::Rule(rule)),
            (Some(legacy), Some(_)) => Err(LabelError::Dialect {
                message: format!(
                    "rule \"{}\" sets both the legacy and the modern dialect",
                    legacy.name
                ),
            }),
            (None, None) => Err(LabelError::Dialect {
                message: "empty rule".into(),
            }),
        }
    }

    /// Decode from a generic document value.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Dialect`] if the value is not a mapping, or
    /// [`LabelError::Config`] if the detected dialect fails to decode.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let mut map = match value {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(LabelError::Dialect {
                    message: format!("rule must be a mapping, got {other}"),
                })
            }
        };

        let match_on = map
            .keys()
            .find(|k| k.eq_ignore_ascii_case(MATCH_ON))
            .cloned();
        match match_on {
            Some(key) => {
                if key != MATCH_ON {
                    if let Some(v) = map.remove(&key) {
                        map.insert(MATCH_ON.to_owned(), v);
                    }
                }
                serde_json::from_value(serde_json::Value::Object(map))
                    .map(Self::Legacy)
                    .map_err(LabelError::config)
            }
            None => serde_json::from_value(serde_json::Value::Object(map))
                .map(Self::Rule)
                .map_err(LabelError::config),
        }
    }

    /// The rule's name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Legacy(r) => &r.name,
            Self::Rule(r) => &r.name,
        }
    }

    /// Returns `true` for the legacy dialect.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }

    /// Evaluate the rule. `Ok(None)` means no match.
    ///
    /// # Errors
    ///
    /// Wraps any failure in [`LabelError::Rule`] with the rule name.
    pub fn execute(&self, features: &Features) -> Result<Option<Labels>> {
        let result = match self {
            Self::Legacy(r) => r.execute(features),
            Self::Rule(r) => r.execute(features),
        };
        result.map_err(|source| LabelError::Rule {
            rule: self.name().to_owned(),
            source: Box::new(source),
        })
    }
}

impl From<LegacyRule> for CustomRule {
    fn from(rule: LegacyRule) -> Self {
        Self::Legacy(rule)
    }
}

impl From<Rule> for CustomRule {
    fn from(rule: Rule) -> Self {
        Self::Rule(rule)
    }
}

impl<'de> Deserialize<'de> for CustomRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}

impl Serialize for CustomRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Legacy(r) => r.serialize(serializer),
            Self::Rule(r) => r.serialize(serializer),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RuleSet
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered list of rules. Order decides which label wins on conflicts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<CustomRule>,
}

impl RuleSet {
    /// Create an empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a YAML list of rules.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Config`] on malformed input or an invalid rule.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(LabelError::config)
    }

    /// Decode a JSON list of rules.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Config`] on malformed input or an invalid rule.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(LabelError::config)
    }

    /// Load one rule file.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Config`] if the file cannot be read or decoded.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        load_document(path.as_ref())
    }

    /// Load every rule file in a drop-in directory.
    ///
    /// Files are read in name order. Hidden files and files with other
    /// extensions are ignored. A file that fails to load is logged and
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Config`] only if the directory cannot be read.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir)
            .map_err(|e| LabelError::config(format!("{}: {e}", dir.display())))?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_rule_file(path))
            .collect();
        paths.sort();

        let mut set = Self::new();
        for path in paths {
            match Self::load_file(&path) {
                Ok(rules) => set.extend(rules),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping rule file"),
            }
        }
        Ok(set)
    }

    /// Rules that are always evaluated before configured ones.
    #[must_use]
    pub fn builtin() -> Self {
        let rdma_capable = LegacyRule::new("rdma.capable").with_matcher(LegacyMatcher {
            pci_id: DeviceIdRule::new([("vendor", ["15b3"])]).ok().map(PciIdRule),
            ..LegacyMatcher::default()
        });
        let rdma_available = LegacyRule::new("rdma.available").with_matcher(LegacyMatcher {
            loaded_kmod: Some(LoadedKModRule(vec!["ib_uverbs".into(), "rdma_ucm".into()])),
            ..LegacyMatcher::default()
        });
        Self {
            rules: vec![rdma_capable.into(), rdma_available.into()],
        }
    }

    /// Append a rule.
    pub fn push(&mut self, rule: impl Into<CustomRule>) {
        self.rules.push(rule.into());
    }

    /// Add a rule (builder pattern).
    #[must_use]
    pub fn with(mut self, rule: impl Into<CustomRule>) -> Self {
        self.push(rule);
        self
    }

    /// The rules, in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &CustomRule> {
        self.rules.iter()
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Extend<CustomRule> for RuleSet {
    fn extend<I: IntoIterator<Item = CustomRule>>(&mut self, iter: I) {
        self.rules.extend(iter);
    }
}

impl FromIterator<CustomRule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = CustomRule>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for RuleSet {
    type Item = CustomRule;
    type IntoIter = std::vec::IntoIter<CustomRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.into_iter()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a CustomRule;
    type IntoIter = std::slice::Iter<'a, CustomRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

fn is_rule_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'));
    let known_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| RULE_FILE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)));
    path.is_file() && !hidden && known_ext
}
