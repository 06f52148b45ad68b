//! XML namespace handling
//!
//! Qualified names, captured namespace contexts, and the small resolver trait
//! shared by schema-side contexts and the instance tokenizer's live binding
//! stack.

use crate::error::{Error, Result};
use crate::names::is_valid_ncname;
use std::collections::BTreeMap;
use std::fmt;

/// XML Schema namespace
pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// XML Schema instance namespace
pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// XML namespace (bound to the `xml` prefix)
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// XMLNS namespace
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// Qualified name (QName) - combination of namespace and local name
///
/// An empty namespace URI is normalized to `None` ("no namespace"). The
/// derived ordering sorts by namespace first, then local name, and is the
/// order every global table is walked in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    /// Namespace URI (None for no namespace)
    pub namespace: Option<String>,
    /// Local name
    pub local_name: String,
}

impl QName {
    /// Create a new QName
    pub fn new(namespace: Option<String>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()),
            local_name: local_name.into(),
        }
    }

    /// Create a QName without a namespace
    pub fn local(local_name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            local_name: local_name.into(),
        }
    }

    /// Create a QName with a namespace
    pub fn namespaced(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self::new(Some(namespace.into()), local_name)
    }

    /// Create a QName in the XML Schema namespace
    pub fn xsd(local_name: impl Into<String>) -> Self {
        Self::namespaced(XSD_NAMESPACE, local_name)
    }

    /// Namespace URI, empty for no namespace
    pub fn namespace_str(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }

    /// Whether the name is in the given namespace (`None` = no namespace)
    pub fn in_namespace(&self, namespace: Option<&str>) -> bool {
        self.namespace.as_deref() == namespace.filter(|ns| !ns.is_empty())
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local_name),
            None => f.write_str(&self.local_name),
        }
    }
}

/// Something that can map a prefix to a namespace URI
pub trait NamespaceResolver {
    /// Namespace bound to `prefix`; the empty prefix asks for the default
    /// namespace. `None` means unbound (or no default namespace).
    fn lookup_prefix(&self, prefix: &str) -> Option<&str>;

    /// Resolve a lexical QName (`prefix:local` or `local`).
    ///
    /// Unprefixed names take the default namespace, which is the rule for
    /// QName-valued content and attribute values.
    fn resolve_qname(&self, lexical: &str) -> Result<QName> {
        let (prefix, local) = match lexical.split_once(':') {
            Some((p, l)) => (p, l),
            None => ("", lexical),
        };
        if !is_valid_ncname(local) || (!prefix.is_empty() && !is_valid_ncname(prefix)) {
            return Err(Error::Name(format!("'{}' is not a valid QName", lexical)));
        }
        if prefix.is_empty() {
            Ok(QName::new(self.lookup_prefix("").map(str::to_string), local))
        } else {
            let ns = self
                .lookup_prefix(prefix)
                .ok_or_else(|| Error::Namespace(format!("prefix '{}' is not bound", prefix)))?;
            Ok(QName::namespaced(ns, local))
        }
    }
}

/// Namespace bindings captured from a lexical context
///
/// Schema components keep one of these next to every QName-valued default,
/// fixed value and enumeration so the lexical form can be re-interpreted
/// later with the bindings of the place it was written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceContext {
    /// Mapping from prefix to namespace URI
    prefixes: BTreeMap<String, String>,
    /// Default namespace (no prefix)
    default_namespace: Option<String>,
}

impl NamespaceContext {
    /// Create a new empty namespace context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a namespace prefix mapping
    pub fn add_prefix(&mut self, prefix: impl Into<String>, namespace: impl Into<String>) {
        self.prefixes.insert(prefix.into(), namespace.into());
    }

    /// Set the default namespace; an empty URI clears it
    pub fn set_default_namespace(&mut self, namespace: impl Into<String>) {
        let ns = namespace.into();
        self.default_namespace = if ns.is_empty() { None } else { Some(ns) };
    }

    /// Get the namespace for a prefix
    pub fn get_namespace(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(|s| s.as_str())
    }

    /// Get the default namespace
    pub fn get_default_namespace(&self) -> Option<&str> {
        self.default_namespace.as_deref()
    }

    /// Iterate over prefixed bindings in prefix order
    pub fn prefixes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.prefixes.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }
}

impl NamespaceResolver for NamespaceContext {
    fn lookup_prefix(&self, prefix: &str) -> Option<&str> {
        if prefix.is_empty() {
            self.get_default_namespace()
        } else if prefix == "xml" {
            Some(XML_NAMESPACE)
        } else {
            self.get_namespace(prefix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qname_creation() {
        let qname = QName::namespaced("http://example.com", "element");
        assert_eq!(qname.namespace, Some("http://example.com".to_string()));
        assert_eq!(qname.local_name, "element");
        assert_eq!(QName::namespaced("", "a"), QName::local("a"));
    }

    #[test]
    fn test_qname_display() {
        let qname = QName::namespaced("http://example.com", "element");
        assert_eq!(qname.to_string(), "{http://example.com}element");
        assert_eq!(QName::local("element").to_string(), "element");
    }

    #[test]
    fn test_qname_ordering() {
        let mut names = vec![
            QName::namespaced("urn:b", "a"),
            QName::local("z"),
            QName::namespaced("urn:a", "b"),
        ];
        names.sort();
        assert_eq!(names[0], QName::local("z"));
        assert_eq!(names[1], QName::namespaced("urn:a", "b"));
    }

    #[test]
    fn test_namespace_context() {
        let mut ctx = NamespaceContext::new();
        ctx.add_prefix("xs", XSD_NAMESPACE);
        ctx.set_default_namespace("http://example.com");

        assert_eq!(ctx.lookup_prefix("xs"), Some(XSD_NAMESPACE));
        assert_eq!(ctx.lookup_prefix(""), Some("http://example.com"));
        assert_eq!(ctx.lookup_prefix("xml"), Some(XML_NAMESPACE));
        assert_eq!(ctx.lookup_prefix("nope"), None);
    }

    #[test]
    fn test_resolve_qname() {
        let mut ctx = NamespaceContext::new();
        ctx.add_prefix("xs", XSD_NAMESPACE);

        let qname = ctx.resolve_qname("xs:element").unwrap();
        assert_eq!(qname, QName::xsd("element"));
        assert_eq!(ctx.resolve_qname("plain").unwrap(), QName::local("plain"));
        assert!(matches!(ctx.resolve_qname("p:x"), Err(Error::Namespace(_))));
        assert!(matches!(ctx.resolve_qname("1x"), Err(Error::Name(_))));
    }
}
