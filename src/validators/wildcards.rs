//! XSD Wildcards
//!
//! `xs:any` and `xs:anyAttribute`. A namespace constraint is kept in one of
//! three shapes (any, a set of allowed namespaces, or a set of excluded
//! namespaces) so union, intersection and subset are plain set algebra. The
//! empty string stands for "no namespace".

use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;

/// Process contents mode for wildcards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
pub enum ProcessContents {
    /// Skip validation entirely
    Skip,
    /// Validate if declaration found, otherwise accept
    Lax,
    /// Validate strictly - element/attribute must be declared
    #[default]
    Strict,
}

impl ProcessContents {
    /// Parse from string value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "strict" => Some(Self::Strict),
            "lax" => Some(Self::Lax),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }

    /// Check if this is a valid restriction of another process contents
    pub fn is_restriction_of(&self, other: &Self) -> bool {
        self >= other
    }
}

impl fmt::Display for ProcessContents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Lax => write!(f, "lax"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

/// Namespace constraint for wildcards
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NamespaceConstraint {
    /// Any namespace is allowed (##any)
    #[default]
    Any,
    /// Only these namespaces
    Enum(BTreeSet<String>),
    /// Every namespace except these (##other excludes the target namespace
    /// and no-namespace)
    Not(BTreeSet<String>),
}

impl NamespaceConstraint {
    /// Create from the `namespace` attribute value
    pub fn from_namespace_attr(value: &str, target_namespace: Option<&str>) -> Result<Self> {
        let tns = target_namespace.unwrap_or("").to_string();
        match value.trim() {
            "##any" => Ok(Self::Any),
            "##other" => Ok(Self::Not([tns, String::new()].into_iter().collect())),
            value => {
                let mut namespaces = BTreeSet::new();
                for ns in value.split_whitespace() {
                    match ns {
                        "##local" => {
                            namespaces.insert(String::new());
                        }
                        "##targetNamespace" => {
                            namespaces.insert(tns.clone());
                        }
                        s if s.starts_with("##") => {
                            return Err(Error::value(format!(
                                "wrong value '{}' in 'namespace' attribute",
                                s
                            )));
                        }
                        uri => {
                            namespaces.insert(uri.to_string());
                        }
                    }
                }
                Ok(Self::Enum(namespaces))
            }
        }
    }

    /// Check if a namespace ("" for none) is allowed by this constraint
    pub fn allows(&self, namespace: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Enum(set) => set.contains(namespace),
            Self::Not(set) => !set.contains(namespace),
        }
    }

    /// Whether some namespace is allowed by both constraints
    pub fn intersects(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Enum(a), Self::Enum(b)) => !a.is_disjoint(b),
            (Self::Enum(a), c) | (c, Self::Enum(a)) => a.iter().any(|ns| c.allows(ns)),
            // Any and Not both allow infinitely many namespaces
            _ => true,
        }
    }

    /// Whether every namespace allowed here is allowed by `other`
    pub fn is_subset(&self, other: &Self) -> bool {
        match (self, other) {
            (_, Self::Any) => true,
            (Self::Any, Self::Not(b)) => b.is_empty(),
            (Self::Any, Self::Enum(_)) => false,
            (Self::Enum(a), _) => a.iter().all(|ns| other.allows(ns)),
            (Self::Not(a), Self::Not(b)) => b.is_subset(a),
            (Self::Not(_), Self::Enum(_)) => false,
        }
    }

    /// Compute union with another constraint
    pub fn union(&self, other: &Self) -> Self {
        let result = match (self, other) {
            (Self::Any, _) | (_, Self::Any) => Self::Any,
            (Self::Enum(a), Self::Enum(b)) => Self::Enum(a.union(b).cloned().collect()),
            (Self::Not(a), Self::Not(b)) => Self::Not(a.intersection(b).cloned().collect()),
            (Self::Enum(a), Self::Not(b)) | (Self::Not(b), Self::Enum(a)) => {
                Self::Not(b.difference(a).cloned().collect())
            }
        };
        match result {
            Self::Not(set) if set.is_empty() => Self::Any,
            other => other,
        }
    }

    /// Compute intersection with another constraint
    pub fn intersection(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Any, x) | (x, Self::Any) => x.clone(),
            (Self::Enum(a), Self::Enum(b)) => Self::Enum(a.intersection(b).cloned().collect()),
            (Self::Not(a), Self::Not(b)) => Self::Not(a.union(b).cloned().collect()),
            (Self::Enum(a), Self::Not(b)) | (Self::Not(b), Self::Enum(a)) => {
                Self::Enum(a.difference(b).cloned().collect())
            }
        }
    }
}

impl fmt::Display for NamespaceConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |set: &BTreeSet<String>| {
            set.iter()
                .map(|ns| if ns.is_empty() { "##local" } else { ns.as_str() })
                .collect::<Vec<_>>()
                .join(" ")
        };
        match self {
            Self::Any => f.write_str("##any"),
            Self::Enum(set) => write!(f, "{}", list(set)),
            Self::Not(set) => write!(f, "not({})", list(set)),
        }
    }
}

/// An element or attribute wildcard
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Wildcard {
    /// Namespace constraint
    pub namespace: NamespaceConstraint,
    /// Process contents mode
    pub process_contents: ProcessContents,
}

impl Wildcard {
    /// Create a wildcard
    pub fn new(namespace: NamespaceConstraint, process_contents: ProcessContents) -> Self {
        Self {
            namespace,
            process_contents,
        }
    }

    /// The lax `##any` wildcard of `xs:anyType`
    pub fn any_lax() -> Self {
        Self::new(NamespaceConstraint::Any, ProcessContents::Lax)
    }

    /// Check if a namespace is allowed
    pub fn allows(&self, namespace: &str) -> bool {
        self.namespace.allows(namespace)
    }

    /// Intersection, keeping this wildcard's process contents
    pub fn intersect(&self, other: &Wildcard) -> Wildcard {
        Wildcard::new(self.namespace.intersection(&other.namespace), self.process_contents)
    }

    /// Union, keeping this wildcard's process contents
    pub fn unite(&self, other: &Wildcard) -> Wildcard {
        Wildcard::new(self.namespace.union(&other.namespace), self.process_contents)
    }

    /// Whether this wildcard validly restricts `base`
    pub fn is_restriction_of(&self, base: &Wildcard) -> bool {
        self.namespace.is_subset(&base.namespace)
            && self.process_contents.is_restriction_of(&base.process_contents)
    }
}

impl fmt::Display for Wildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.namespace, self.process_contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_namespace_attr() {
        let other = NamespaceConstraint::from_namespace_attr("##other", Some("urn:t")).unwrap();
        assert!(other.allows("urn:x"));
        assert!(!other.allows("urn:t"));
        assert!(!other.allows(""));

        let list =
            NamespaceConstraint::from_namespace_attr("##local ##targetNamespace urn:a", Some("urn:t"))
                .unwrap();
        assert_eq!(list, NamespaceConstraint::Enum(set(&["", "urn:t", "urn:a"])));

        assert!(NamespaceConstraint::from_namespace_attr("##bogus", None).is_err());
    }

    #[test]
    fn test_set_algebra() {
        let a = NamespaceConstraint::Enum(set(&["urn:a", "urn:b"]));
        let not_a = NamespaceConstraint::Not(set(&["urn:a"]));
        assert_eq!(a.union(&not_a), NamespaceConstraint::Any);
        assert_eq!(a.intersection(&not_a), NamespaceConstraint::Enum(set(&["urn:b"])));
        assert!(a.intersects(&not_a));
        assert!(!NamespaceConstraint::Enum(set(&["urn:a"])).intersects(&not_a));
    }

    #[test]
    fn test_subset() {
        let a = NamespaceConstraint::Enum(set(&["urn:a"]));
        let other = NamespaceConstraint::Not(set(&["urn:t", ""]));
        assert!(a.is_subset(&other));
        assert!(a.is_subset(&NamespaceConstraint::Any));
        assert!(!NamespaceConstraint::Any.is_subset(&other));
        assert!(NamespaceConstraint::Not(set(&["urn:t", "", "urn:x"])).is_subset(&other));
        assert!(!other.is_subset(&a));
    }

    #[test]
    fn test_process_contents_strength() {
        assert!(ProcessContents::Strict.is_restriction_of(&ProcessContents::Lax));
        assert!(ProcessContents::Lax.is_restriction_of(&ProcessContents::Skip));
        assert!(!ProcessContents::Skip.is_restriction_of(&ProcessContents::Strict));
        assert_eq!(ProcessContents::parse("lax"), Some(ProcessContents::Lax));
        assert_eq!(ProcessContents::default(), ProcessContents::Strict);
    }

    #[test]
    fn test_wildcard_restriction() {
        let base = Wildcard::any_lax();
        let derived = Wildcard::new(NamespaceConstraint::Enum(set(&["urn:a"])), ProcessContents::Strict);
        assert!(derived.is_restriction_of(&base));
        assert!(!base.is_restriction_of(&derived));
    }
}
