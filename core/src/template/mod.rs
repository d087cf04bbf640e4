//! Label templates
//!
//! A rule's `labelsTemplate` is rendered once per match against the
//! [`MatchedFeatures`] of that match. The output is read back as
//! `key=value` lines.
//!
//! # Syntax
//!
//! A subset of Go `text/template`, so existing rule files keep working:
//!
//! | Construct | Example |
//! |-----------|---------|
//! | Field access | `{{.pci.device}}`, `{{$.cpu.cpuid}}` |
//! | Variables | `{{$d := .x}}`, `{{range $i, $e := .list}}` |
//! | Control | `if` / `else if` / `else`, `with`, `range`, `end` |
//! | Functions | `index`, `len`, `eq`, `ne`, `not`, `and`, `or`, `print`, `printf` |
//! | Pipelines | `{{.list \| len}}`, `{{(index . "a")}}` |
//! | Trimming | `{{- ... -}}` |
//! | Comments | `{{/* ... */}}` |
//!
//! Field access on a missing map key is an error. `index` on a missing map key
//! yields an empty string. Maps are ranged over in key order.

mod exec;
mod lex;
mod parse;
mod value;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use value::Value;

use crate::{Labels, MatchedFeatures, Result};

/// A compiled label template.
///
/// Compiled when constructed, so syntax errors surface when the rule set is
/// decoded rather than at first match. Cloning shares the compiled tree.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LabelTemplate {
    source: String,
    nodes: Arc<[parse::Node]>,
}

impl LabelTemplate {
    /// Compile a template.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Template`](crate::LabelError::Template) on a
    /// syntax error, an unknown function, or nesting deeper than
    /// [`MAX_TEMPLATE_DEPTH`](crate::MAX_TEMPLATE_DEPTH).
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let nodes = parse::parse(lex::lex(&source)?)?;
        Ok(Self {
            source,
            nodes: nodes.into(),
        })
    }

    /// The template text as written.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render against arbitrary data.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Template`](crate::LabelError::Template) if
    /// execution fails, e.g. on a missing key.
    pub fn execute(&self, data: &Value) -> Result<String> {
        exec::execute(&self.nodes, data)
    }

    /// Render against matched features and parse the output as labels.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub fn expand(&self, matched: &MatchedFeatures) -> Result<Labels> {
        let text = self.execute(&matched.to_template_value())?;
        Ok(parse_labels(&text))
    }
}

/// Parse rendered template output into labels.
///
/// One label per non-blank line, split on the first `=`. A line without `=`
/// becomes a label with value `"true"`.
#[must_use]
pub fn parse_labels(text: &str) -> Labels {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once('=') {
            Some((key, value)) => (key.to_owned(), value.to_owned()),
            None => (line.to_owned(), "true".to_owned()),
        })
        .collect()
}

impl fmt::Debug for LabelTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LabelTemplate").field(&self.source).finish()
    }
}

impl PartialEq for LabelTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for LabelTemplate {}

impl TryFrom<String> for LabelTemplate {
    type Error = crate::LabelError;

    fn try_from(source: String) -> Result<Self> {
        Self::parse(source)
    }
}

impl From<LabelTemplate> for String {
    fn from(template: LabelTemplate) -> Self {
        template.source
    }
}
