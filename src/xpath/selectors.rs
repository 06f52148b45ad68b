//! XPath Selectors for XML Schema
//!
//! Parsing and matching of `xs:selector` and `xs:field` expressions.

use crate::error::{Error, Result};
use crate::names::{is_valid_ncname, split_qname};
use crate::namespaces::{NamespaceResolver, QName};
use std::fmt;

/// A name test of one path step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameTest {
    /// `*`
    Any,
    /// `prefix:*`
    Namespace(Option<String>),
    /// A QName; unprefixed names are in no namespace
    Name(QName),
}

impl NameTest {
    fn parse(token: &str, ns: &dyn NamespaceResolver) -> Result<Self> {
        if token == "*" {
            return Ok(NameTest::Any);
        }
        if let Some(prefix) = token.strip_suffix(":*") {
            if !is_valid_ncname(prefix) {
                return Err(Error::value(format!("invalid name test '{}'", token)));
            }
            let uri = ns.lookup_prefix(prefix).ok_or_else(|| {
                Error::Namespace(format!("prefix '{}' is not bound", prefix))
            })?;
            return Ok(NameTest::Namespace(Some(uri.to_string())));
        }
        let (prefix, local) = split_qname(token);
        if !is_valid_ncname(local) || prefix.is_some_and(|p| !is_valid_ncname(p)) {
            return Err(Error::value(format!("invalid name test '{}'", token)));
        }
        let namespace = match prefix {
            Some(p) => Some(
                ns.lookup_prefix(p)
                    .ok_or_else(|| Error::Namespace(format!("prefix '{}' is not bound", p)))?
                    .to_string(),
            ),
            None => None,
        };
        Ok(NameTest::Name(QName::new(namespace, local)))
    }

    /// Whether a name passes the test
    pub fn matches(&self, name: &QName) -> bool {
        match self {
            NameTest::Any => true,
            NameTest::Namespace(ns) => name.namespace == *ns,
            NameTest::Name(q) => q == name,
        }
    }
}

/// A location path over child elements, optionally rooted at `.//`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    /// Leading `.//`
    pub descendant: bool,
    /// Child steps; `.` steps are dropped
    pub steps: Vec<NameTest>,
}

impl PathPattern {
    /// Whether the pattern selects the element reached through `path`
    /// (the names below the context node, outermost first)
    pub fn matches(&self, path: &[QName]) -> bool {
        if self.descendant {
            if path.len() < self.steps.len() {
                return false;
            }
            let tail = &path[path.len() - self.steps.len()..];
            tail.iter().zip(&self.steps).all(|(n, t)| t.matches(n))
        } else {
            path.len() == self.steps.len()
                && path.iter().zip(&self.steps).all(|(n, t)| t.matches(n))
        }
    }

    /// Whether a deeper element could still be matched below `path`
    pub fn may_match_below(&self, path: &[QName]) -> bool {
        self.descendant || path.len() < self.steps.len()
    }
}

/// Split one alternative into its `.//` flag and its step tokens
fn split_steps(alternative: &str) -> Result<(bool, Vec<&str>)> {
    let text = alternative.trim();
    if text.is_empty() {
        return Err(Error::value("empty path expression"));
    }
    let (descendant, rest) = if let Some(rest) = text.strip_prefix(".//") {
        (true, rest)
    } else if let Some(rest) = text.strip_prefix("//") {
        (true, rest)
    } else {
        (false, text)
    };
    let mut steps = Vec::new();
    for step in rest.split('/') {
        let step = step.trim();
        if step.is_empty() {
            return Err(Error::value(format!(
                "'{}' is not a valid identity-constraint path",
                alternative.trim()
            )));
        }
        steps.push(step);
    }
    Ok((descendant, steps))
}

fn element_step(step: &str, ns: &dyn NamespaceResolver) -> Result<Option<NameTest>> {
    if step == "." || step == "self::node()" {
        return Ok(None);
    }
    let test = step.strip_prefix("child::").map(str::trim).unwrap_or(step);
    NameTest::parse(test, ns).map(Some)
}

/// A compiled `xs:selector`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    /// Expression as written
    pub source: String,
    /// `|`-separated alternatives
    pub alternatives: Vec<PathPattern>,
}

impl Selector {
    /// Compile a selector expression with the bindings of its `xs:selector`
    pub fn parse(source: &str, ns: &dyn NamespaceResolver) -> Result<Self> {
        let mut alternatives = Vec::new();
        for alternative in source.split('|') {
            let (descendant, tokens) = split_steps(alternative)?;
            let mut steps = Vec::new();
            for token in tokens {
                if token.starts_with('@') || token.starts_with("attribute::") {
                    return Err(Error::value(format!(
                        "selector '{}' may not select attributes",
                        source
                    )));
                }
                if let Some(test) = element_step(token, ns)? {
                    steps.push(test);
                }
            }
            alternatives.push(PathPattern { descendant, steps });
        }
        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }

    /// Whether the element at `path` below the scope element is selected
    pub fn matches(&self, path: &[QName]) -> bool {
        self.alternatives.iter().any(|p| p.matches(path))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// What a field alternative finally selects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldTarget {
    /// The element reached by the path
    Element,
    /// An attribute of that element
    Attribute(NameTest),
}

/// One `|`-separated alternative of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAlternative {
    /// Element part of the path
    pub path: PathPattern,
    /// Element or attribute
    pub target: FieldTarget,
}

/// A compiled `xs:field`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    /// Expression as written
    pub source: String,
    /// `|`-separated alternatives
    pub alternatives: Vec<FieldAlternative>,
}

impl FieldPath {
    /// Compile a field expression with the bindings of its `xs:field`
    pub fn parse(source: &str, ns: &dyn NamespaceResolver) -> Result<Self> {
        let mut alternatives = Vec::new();
        for alternative in source.split('|') {
            let (descendant, tokens) = split_steps(alternative)?;
            let last = tokens.len() - 1;
            let mut steps = Vec::new();
            let mut target = FieldTarget::Element;
            for (i, token) in tokens.iter().enumerate() {
                let attribute = token
                    .strip_prefix('@')
                    .or_else(|| token.strip_prefix("attribute::"))
                    .map(str::trim);
                match attribute {
                    Some(name) if i == last => {
                        target = FieldTarget::Attribute(NameTest::parse(name, ns)?);
                    }
                    Some(_) => {
                        return Err(Error::value(format!(
                            "attribute step must be last in field '{}'",
                            source
                        )));
                    }
                    None if *token == "node()" && i == last => {
                        steps.push(NameTest::Any);
                    }
                    None => {
                        if let Some(test) = element_step(token, ns)? {
                            steps.push(test);
                        }
                    }
                }
            }
            alternatives.push(FieldAlternative {
                path: PathPattern { descendant, steps },
                target,
            });
        }
        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }

    /// Alternatives whose element part selects the element at `path`
    /// below the selected node
    pub fn matching(&self, path: &[QName]) -> impl Iterator<Item = &FieldAlternative> + '_ {
        let path = path.to_vec();
        self.alternatives.iter().filter(move |a| a.path.matches(&path))
    }

    /// Whether any alternative selects an attribute
    pub fn selects_attribute(&self) -> bool {
        self.alternatives
            .iter()
            .any(|a| matches!(a.target, FieldTarget::Attribute(_)))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespaces::NamespaceContext;

    fn ctx() -> NamespaceContext {
        let mut ctx = NamespaceContext::new();
        ctx.add_prefix("t", "urn:t");
        ctx
    }

    #[test]
    fn test_selector_child_path() {
        let sel = Selector::parse("t:items/t:item", &ctx()).unwrap();
        let items = QName::namespaced("urn:t", "items");
        let item = QName::namespaced("urn:t", "item");
        assert!(sel.matches(&[items.clone(), item.clone()]));
        assert!(!sel.matches(&[item.clone()]));
        assert!(!sel.matches(&[items, item.clone(), item]));
    }

    #[test]
    fn test_selector_descendant_and_union() {
        let sel = Selector::parse(".//item | ./other", &ctx()).unwrap();
        assert_eq!(sel.alternatives.len(), 2);
        let item = QName::local("item");
        assert!(sel.matches(&[QName::local("a"), QName::local("b"), item.clone()]));
        assert!(sel.matches(&[item]));
        assert!(sel.matches(&[QName::local("other")]));
    }

    #[test]
    fn test_selector_rejects_attribute() {
        assert!(Selector::parse("item/@id", &ctx()).is_err());
        assert!(Selector::parse("a//b", &ctx()).is_err());
        assert!(Selector::parse("u:item", &ctx()).is_err());
        assert!(Selector::parse("", &ctx()).is_err());
    }

    #[test]
    fn test_field_attribute() {
        let field = FieldPath::parse("@id", &ctx()).unwrap();
        assert!(field.selects_attribute());
        let alt = &field.alternatives[0];
        assert!(alt.path.steps.is_empty());
        assert_eq!(alt.target, FieldTarget::Attribute(NameTest::Name(QName::local("id"))));
        assert_eq!(field.matching(&[]).count(), 1);
    }

    #[test]
    fn test_field_element() {
        let field = FieldPath::parse("t:code", &ctx()).unwrap();
        assert!(!field.selects_attribute());
        assert_eq!(field.matching(&[QName::namespaced("urn:t", "code")]).count(), 1);
        assert_eq!(field.matching(&[QName::local("code")]).count(), 0);
        assert!(FieldPath::parse("@id/x", &ctx()).is_err());
    }

    #[test]
    fn test_namespace_wildcard() {
        let sel = Selector::parse("t:*", &ctx()).unwrap();
        assert!(sel.matches(&[QName::namespaced("urn:t", "anything")]));
        assert!(!sel.matches(&[QName::local("anything")]));
        assert!(Selector::parse(".", &ctx()).unwrap().matches(&[]));
    }
}
