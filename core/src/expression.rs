//! Match expressions: one operator plus operands
//!
//! A [`MatchExpression`] is validated and compiled when it is built (regexes
//! compiled, integer operands parsed), so evaluation only fails on the
//! *candidate* value, e.g. a non-numeric attribute under `Gt`.
//!
//! A [`MatchExpressionSet`] maps attribute names to expressions and evaluates
//! them with AND semantics against one of the three feature set shapes:
//!
//! | Set | Result on match |
//! |-----|-----------------|
//! | keys | one `{Name}` element per expression |
//! | values | one `{Name, Value}` element per expression |
//! | instances | every instance satisfying all expressions |
//!
//! # Serialized form
//!
//! ```yaml
//! matchExpressions:
//!   vendor: {op: In, value: ["8086", "10de"]}
//!   driver: {op: Exists}
//!   numa: {op: Gt, value: "0"}
//! ```

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    FeatureSetRef, InstanceFeatureSet, KeyFeatureSet, LabelError, MatchedElement, MatchedSet,
    Result, ValueFeatureSet, MAX_REGEX_PATTERN_LENGTH,
};

/// Match operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchOp {
    /// Value equals any operand.
    In,
    /// Value equals no operand.
    NotIn,
    /// Value matches any operand as a regular expression.
    InRegexp,
    /// Element or attribute is present.
    Exists,
    /// Element or attribute is absent.
    DoesNotExist,
    /// Value, as an integer, is greater than the operand.
    Gt,
    /// Value, as an integer, is less than the operand.
    Lt,
    /// Value, as an integer, is strictly between the two operands.
    GtLt,
    /// Value is `"true"` (case-insensitive).
    IsTrue,
    /// Value is `"false"` (case-insensitive).
    IsFalse,
}

impl MatchOp {
    /// Every operator, in documentation order.
    pub const ALL: [MatchOp; 10] = [
        Self::In,
        Self::NotIn,
        Self::InRegexp,
        Self::Exists,
        Self::DoesNotExist,
        Self::Gt,
        Self::Lt,
        Self::GtLt,
        Self::IsTrue,
        Self::IsFalse,
    ];

    /// Operator name as written in rule files.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::In => "In",
            Self::NotIn => "NotIn",
            Self::InRegexp => "InRegexp",
            Self::Exists => "Exists",
            Self::DoesNotExist => "DoesNotExist",
            Self::Gt => "Gt",
            Self::Lt => "Lt",
            Self::GtLt => "GtLt",
            Self::IsTrue => "IsTrue",
            Self::IsFalse => "IsFalse",
        }
    }
}

impl fmt::Display for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operands prepared for evaluation.
#[derive(Debug, Clone)]
enum Operands {
    None,
    Strings,
    Regexes(Vec<Regex>),
    Int(i64),
    Range(i64, i64),
}

/// A validated operator + operands pair.
///
/// # Example
///
/// ```
/// use nodelabel::{MatchExpression, MatchOp};
///
/// let expr = MatchExpression::new(MatchOp::Lt, ["100"]).unwrap();
/// assert!(expr.match_value(Some("10")).unwrap());
/// assert!(!expr.match_value(Some("100")).unwrap());
/// assert!(!expr.match_value(None).unwrap());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MatchExpressionConfig", into = "MatchExpressionConfig")]
pub struct MatchExpression {
    op: MatchOp,
    value: Vec<String>,
    operands: Operands,
}

impl PartialEq for MatchExpression {
    fn eq(&self, other: &Self) -> bool {
        self.op == other.op && self.value == other.value
    }
}

impl MatchExpression {
    /// Build and validate an expression.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Expression`] when the operand count is wrong for the
    /// operator, a numeric operand is not an integer, `GtLt` bounds are not
    /// ascending, or a regex does not compile.
    pub fn new<I, S>(op: MatchOp, value: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let value: Vec<String> = value.into_iter().map(Into::into).collect();
        let operands = match op {
            MatchOp::Exists | MatchOp::DoesNotExist | MatchOp::IsTrue | MatchOp::IsFalse => {
                if !value.is_empty() {
                    return Err(LabelError::expression(op, "value must be empty"));
                }
                Operands::None
            }
            MatchOp::In | MatchOp::NotIn => {
                if value.is_empty() {
                    return Err(LabelError::expression(op, "value must be non-empty"));
                }
                Operands::Strings
            }
            MatchOp::InRegexp => {
                if value.is_empty() {
                    return Err(LabelError::expression(op, "value must be non-empty"));
                }
                Operands::Regexes(value.iter().map(|p| compile_regex(op, p)).collect::<Result<_>>()?)
            }
            MatchOp::Gt | MatchOp::Lt => match value.as_slice() {
                [v] => Operands::Int(parse_int(op, v)?),
                _ => {
                    return Err(LabelError::expression(
                        op,
                        format!("expected exactly one value, got {}", value.len()),
                    ))
                }
            },
            MatchOp::GtLt => match value.as_slice() {
                [lo, hi] => {
                    let (lo, hi) = (parse_int(op, lo)?, parse_int(op, hi)?);
                    if lo >= hi {
                        return Err(LabelError::expression(
                            op,
                            format!("lower bound {lo} must be less than upper bound {hi}"),
                        ));
                    }
                    Operands::Range(lo, hi)
                }
                _ => {
                    return Err(LabelError::expression(
                        op,
                        format!("expected exactly two values, got {}", value.len()),
                    ))
                }
            },
        };
        Ok(Self {
            op,
            value,
            operands,
        })
    }

    /// Shorthand for an operand-less expression (`Exists`, `IsTrue`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Expression`] if `op` requires operands.
    pub fn unary(op: MatchOp) -> Result<Self> {
        Self::new(op, std::iter::empty::<String>())
    }

    /// The operator.
    #[must_use]
    pub fn op(&self) -> MatchOp {
        self.op
    }

    /// The operands as written.
    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.value
    }

    /// Evaluate against element presence in a key set.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Expression`] for operators other than `Exists` and
    /// `DoesNotExist`; key sets carry no values to compare.
    pub fn match_key(&self, exists: bool) -> Result<bool> {
        match self.op {
            MatchOp::Exists => Ok(exists),
            MatchOp::DoesNotExist => Ok(!exists),
            op => Err(LabelError::expression(op, "operator not valid when matching keys")),
        }
    }

    /// Evaluate against a single (possibly missing) value.
    ///
    /// A missing value fails every operator except `DoesNotExist`.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Expression`] if a numeric operator meets a value that
    /// is not an integer.
    pub fn match_value(&self, value: Option<&str>) -> Result<bool> {
        let Some(value) = value else {
            return Ok(self.op == MatchOp::DoesNotExist);
        };
        let matched = match (&self.operands, self.op) {
            (_, MatchOp::Exists) => true,
            (_, MatchOp::DoesNotExist) => false,
            (_, MatchOp::In) => self.value.iter().any(|v| v == value),
            (_, MatchOp::NotIn) => !self.value.iter().any(|v| v == value),
            (Operands::Regexes(res), MatchOp::InRegexp) => res.iter().any(|re| re.is_match(value)),
            (Operands::Int(bound), MatchOp::Gt) => parse_int(self.op, value)? > *bound,
            (Operands::Int(bound), MatchOp::Lt) => parse_int(self.op, value)? < *bound,
            (Operands::Range(lo, hi), MatchOp::GtLt) => {
                let v = parse_int(self.op, value)?;
                v > *lo && v < *hi
            }
            (_, MatchOp::IsTrue) => value.eq_ignore_ascii_case("true"),
            (_, MatchOp::IsFalse) => value.eq_ignore_ascii_case("false"),
            (_, op) => return Err(LabelError::expression(op, "operands not compiled")),
        };
        Ok(matched)
    }
}

impl fmt::Display for MatchExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.op, self.value)
    }
}

fn parse_int(op: MatchOp, value: &str) -> Result<i64> {
    value
        .parse()
        .map_err(|_| LabelError::expression(op, format!("not a number \"{value}\"")))
}

pub(crate) fn compile_regex(op: MatchOp, pattern: &str) -> Result<Regex> {
    if pattern.len() > MAX_REGEX_PATTERN_LENGTH {
        return Err(LabelError::expression(
            op,
            format!(
                "pattern length is {}, but maximum allowed is {MAX_REGEX_PATTERN_LENGTH}",
                pattern.len()
            ),
        ));
    }
    Regex::new(pattern)
        .map_err(|e| LabelError::expression(op, format!("invalid regexp \"{pattern}\": {e}")))
}

/// Wire form of a [`MatchExpression`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MatchExpressionConfig {
    op: MatchOp,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    value: Vec<String>,
}

impl TryFrom<MatchExpressionConfig> for MatchExpression {
    type Error = LabelError;

    fn try_from(config: MatchExpressionConfig) -> Result<Self> {
        Self::new(config.op, config.value)
    }
}

impl From<MatchExpression> for MatchExpressionConfig {
    fn from(expr: MatchExpression) -> Self {
        Self {
            op: expr.op,
            value: expr.value,
        }
    }
}

/// YAML authors write `value: 100` as often as `value: ["100"]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<Scalar> for String {
    fn from(s: Scalar) -> Self {
        match s {
            Scalar::Str(s) => s,
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(Scalar),
    Many(Vec<Scalar>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s.into()],
        Some(OneOrMany::Many(v)) => v.into_iter().map(Into::into).collect(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Expression sets
// ═══════════════════════════════════════════════════════════════════════════════

/// Attribute name → expression, combined with logical AND.
///
/// Iteration is in attribute-name order, so matched output is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchExpressionSet {
    expressions: BTreeMap<String, MatchExpression>,
}

impl MatchExpressionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the expression for an attribute.
    pub fn insert(&mut self, name: impl Into<String>, expr: MatchExpression) {
        self.expressions.insert(name.into(), expr);
    }

    /// Add an expression (builder pattern).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, expr: MatchExpression) -> Self {
        self.insert(name, expr);
        self
    }

    /// Get the expression for an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MatchExpression> {
        self.expressions.get(name)
    }

    /// Iterate (attribute, expression) pairs in attribute order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MatchExpression)> {
        self.expressions.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of expressions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    /// Returns `true` if the set has no expressions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    /// Evaluate against whichever set a feature resolved to.
    ///
    /// # Errors
    ///
    /// Propagates [`LabelError::Expression`] from any expression.
    pub fn evaluate(&self, set: FeatureSetRef<'_>) -> Result<MatchedSet> {
        Ok(match set {
            FeatureSetRef::Keys(keys) => MatchedSet::Keys(self.match_keys(keys)?),
            FeatureSetRef::Values(values) => MatchedSet::Values(self.match_values(values)?),
            FeatureSetRef::Instances(instances) => {
                MatchedSet::Instances(self.match_instances(instances)?)
            }
        })
    }

    /// Match against a key set. Empty result means no match.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Expression`] for operators that need values.
    pub fn match_keys(&self, keys: &KeyFeatureSet) -> Result<Vec<MatchedElement>> {
        let mut out = Vec::with_capacity(self.expressions.len());
        for (name, expr) in &self.expressions {
            if !expr.match_key(keys.contains(name))? {
                return Ok(Vec::new());
            }
            out.push(MatchedElement::from([("Name".to_owned(), name.clone())]));
        }
        Ok(out)
    }

    /// Match against a value set. Empty result means no match.
    ///
    /// A matched `DoesNotExist` attribute is reported with an empty `Value`.
    ///
    /// # Errors
    ///
    /// Propagates [`LabelError::Expression`] from numeric operators.
    pub fn match_values(&self, values: &ValueFeatureSet) -> Result<Vec<MatchedElement>> {
        let mut out = Vec::with_capacity(self.expressions.len());
        for (name, expr) in &self.expressions {
            let value = values.get(name);
            if !expr.match_value(value)? {
                return Ok(Vec::new());
            }
            out.push(MatchedElement::from([
                ("Name".to_owned(), name.clone()),
                ("Value".to_owned(), value.unwrap_or_default().to_owned()),
            ]));
        }
        Ok(out)
    }

    /// Match against an instance set, returning every instance that satisfies
    /// all expressions.
    ///
    /// # Errors
    ///
    /// Propagates [`LabelError::Expression`] from numeric operators.
    pub fn match_instances(&self, instances: &InstanceFeatureSet) -> Result<Vec<MatchedElement>> {
        let mut out = Vec::new();
        for instance in &instances.elements {
            if self.matches_attributes(&instance.attributes)? {
                out.push(instance.attributes.clone());
            }
        }
        Ok(out)
    }

    /// Returns `true` if every expression holds for the attribute map.
    ///
    /// # Errors
    ///
    /// Propagates [`LabelError::Expression`] from numeric operators.
    pub fn matches_attributes(&self, attributes: &BTreeMap<String, String>) -> Result<bool> {
        for (name, expr) in &self.expressions {
            if !expr.match_value(attributes.get(name).map(String::as_str))? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl FromIterator<(String, MatchExpression)> for MatchExpressionSet {
    fn from_iter<I: IntoIterator<Item = (String, MatchExpression)>>(iter: I) -> Self {
        Self {
            expressions: iter.into_iter().collect(),
        }
    }
}
