//! Namespace-aware node paths
//!
//! A small subset of XPath sufficient for addressing configuration nodes:
//! absolute location paths made of `prefix:name` steps, each with an
//! optional `[prefix:child='value']` predicate selecting on the text of a
//! child element, e.g.
//! `/d:datastores/d:startup/n:nacm/n:groups/n:group[n:name='almighty']`.

use std::collections::HashMap;
use std::fmt;

use crate::error::{ConfiguratorError, Result};

/// Registered prefix to namespace URI bindings
#[derive(Debug, Clone, Default)]
pub struct Namespaces {
    bindings: HashMap<String, String>,
}

impl Namespaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `prefix` to `uri`
    pub fn with(mut self, prefix: &str, uri: &str) -> Self {
        self.bindings.insert(prefix.to_string(), uri.to_string());
        self
    }

    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.bindings.get(prefix).map(|s| s.as_str())
    }
}

/// Element name qualified by its namespace URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub namespace: Option<String>,
    pub local: String,
}

/// `[child='value']`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub child: QualifiedName,
    pub value: String,
}

/// One location step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: QualifiedName,
    pub predicate: Option<Predicate>,
}

/// Parsed absolute node path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePath {
    expr: String,
    steps: Vec<Step>,
}

impl NodePath {
    /// Parse `expr`, resolving prefixes through `namespaces`
    pub fn parse(expr: &str, namespaces: &Namespaces) -> Result<Self> {
        let invalid = |reason: &str| ConfiguratorError::InvalidPath {
            path: expr.to_string(),
            reason: reason.to_string(),
        };

        let body = expr
            .strip_prefix('/')
            .ok_or_else(|| invalid("path must be absolute"))?;

        let mut steps = Vec::new();
        for raw in split_steps(body).map_err(|reason| invalid(reason))? {
            let (name, predicate) = match raw.find('[') {
                Some(open) => {
                    let inner = raw[open + 1..]
                        .strip_suffix(']')
                        .ok_or_else(|| invalid("unterminated predicate"))?;
                    (&raw[..open], Some(parse_predicate(inner, namespaces, &invalid)?))
                }
                None => (raw, None),
            };
            steps.push(Step {
                name: parse_name(name, namespaces, &invalid)?,
                predicate,
            });
        }

        if steps.is_empty() {
            return Err(invalid("empty path"));
        }

        Ok(Self {
            expr: expr.to_string(),
            steps,
        })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The last step
    pub fn leaf(&self) -> &Step {
        // parse() rejects empty paths
        &self.steps[self.steps.len() - 1]
    }

    pub fn as_str(&self) -> &str {
        &self.expr
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

/// Split on `/` outside of predicates and quotes
fn split_steps(body: &str) -> std::result::Result<Vec<&str>, &'static str> {
    let mut steps = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.checked_sub(1).ok_or("unbalanced ']'")?,
            (None, '/') if depth == 0 => {
                steps.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err("unterminated string literal");
    }
    if depth != 0 {
        return Err("unterminated predicate");
    }
    steps.push(&body[start..]);

    if steps.iter().any(|s| s.is_empty()) {
        return Err("empty step");
    }
    Ok(steps)
}

fn parse_name(
    name: &str,
    namespaces: &Namespaces,
    invalid: &dyn Fn(&str) -> ConfiguratorError,
) -> Result<QualifiedName> {
    let name = name.trim();
    let (namespace, local) = match name.split_once(':') {
        Some((prefix, local)) => {
            let uri = namespaces
                .resolve(prefix)
                .ok_or_else(|| invalid(&format!("unknown prefix '{}'", prefix)))?;
            (Some(uri.to_string()), local)
        }
        None => (None, name),
    };
    if local.is_empty() || local.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
        return Err(invalid(&format!("invalid element name '{}'", name)));
    }
    Ok(QualifiedName {
        namespace,
        local: local.to_string(),
    })
}

fn parse_predicate(
    inner: &str,
    namespaces: &Namespaces,
    invalid: &dyn Fn(&str) -> ConfiguratorError,
) -> Result<Predicate> {
    let (child, literal) = inner
        .split_once('=')
        .ok_or_else(|| invalid("predicate must compare a child with a literal"))?;
    let literal = literal.trim();
    let value = literal
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| literal.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .ok_or_else(|| invalid("predicate value must be quoted"))?;
    Ok(Predicate {
        child: parse_name(child, namespaces, invalid)?,
        value: value.to_string(),
    })
}
