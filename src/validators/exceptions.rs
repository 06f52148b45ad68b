//! Violation records
//!
//! Every problem found while compiling a schema or validating an instance is
//! reported as a [`Violation`] carrying a stable [`ViolationCode`]. Codes are
//! part of the public contract: their string forms never change.

use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::fmt;
use std::sync::Arc;

/// Stable violation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViolationCode {
    // Compile time
    /// A schema document is not well-formed or not a valid schema document
    SchemaParse,
    /// Two different global components share an expanded name
    DuplicateGlobal,
    /// An include brings in a different target namespace, or an import's
    /// namespace does not match the imported document
    ImportContradiction,
    /// An import has no location and its namespace cannot be found
    MissingImportLocation,
    /// A QName reference names no component
    ReferenceNotFound,
    /// A type is (indirectly) its own base
    CyclicDerivation,
    /// A substitution-group head chain loops
    CyclicSubstitutionGroup,
    /// An attribute group (indirectly) references itself
    CyclicAttributeGroup,
    /// A model group (indirectly) references itself
    CyclicGroup,
    /// A facet is not applicable, malformed, or loosens its base
    InvalidFacet,
    /// A default or fixed value does not validate against its type
    InvalidDefaultOrFixed,
    /// A substitution-group member's type is not derived from the head's type
    InvalidSubstitutionDerivation,
    /// A `final` setting forbids the derivation
    FinalBlocksDerivation,
    /// A derivation is structurally invalid
    InvalidDerivation,
    /// Two attribute uses in one type share a name
    DuplicateAttributeUse,
    /// An identity constraint is ill-formed
    IdentityConstraintMalformed,
    /// A content model violates unique particle attribution
    AmbiguousContentModel,
    /// A content model automaton exceeds the state budget
    DfaStateExplosion,
    /// An `<all>` group breaks the XSD 1.0 shape rules
    AllGroupTooComplex,
    /// A cross-namespace reference has no matching import
    ImportNotDeclared,

    // Validation time
    /// The instance is not well-formed XML
    XmlParse,
    /// An element is not allowed where it appears
    UnexpectedElement,
    /// An attribute is not allowed on its element
    UnexpectedAttribute,
    /// A required attribute is absent
    MissingRequiredAttribute,
    /// An attribute value is not valid for its type
    InvalidAttributeValue,
    /// Character content is not allowed or not valid for the type
    InvalidCharacterContent,
    /// An element ended before its content model was satisfied
    IncompleteContent,
    /// `xsi:nil` used on an element that is not nillable
    ElementNotNillable,
    /// A nilled element has content
    NilledWithContent,
    /// An `xsi:type` value is unknown or not validly derived
    XsiTypeInvalid,
    /// A keyref tuple matches no key or unique tuple
    UnresolvedKeyref,
    /// A key or unique tuple occurs twice in one scope
    DuplicateKey,
    /// An ID value occurs twice in the document
    DuplicateId,
    /// An IDREF names no ID in the document
    UnresolvedIdRef,
    /// A schema-location hint could not be honored
    SchemaLocationHint,
    /// A resource cap was breached
    LimitExceeded,
    /// An identity-constraint field selected several nodes, a non-simple
    /// node, or nothing for a key
    IdentityFieldInvalid,

    // Infrastructure
    /// A schema document could not be fetched
    SchemaNotLoaded,
}

impl ViolationCode {
    /// The stable string form of the code
    pub fn as_str(&self) -> &'static str {
        use ViolationCode::*;
        match self {
            SchemaParse => "SchemaParse",
            DuplicateGlobal => "DuplicateGlobal",
            ImportContradiction => "ImportContradiction",
            MissingImportLocation => "MissingImportLocation",
            ReferenceNotFound => "ReferenceNotFound",
            CyclicDerivation => "CyclicDerivation",
            CyclicSubstitutionGroup => "CyclicSubstitutionGroup",
            CyclicAttributeGroup => "CyclicAttributeGroup",
            CyclicGroup => "CyclicGroup",
            InvalidFacet => "InvalidFacet",
            InvalidDefaultOrFixed => "InvalidDefaultOrFixed",
            InvalidSubstitutionDerivation => "InvalidSubstitutionDerivation",
            FinalBlocksDerivation => "FinalBlocksDerivation",
            InvalidDerivation => "InvalidDerivation",
            DuplicateAttributeUse => "DuplicateAttributeUse",
            IdentityConstraintMalformed => "IdentityConstraintMalformed",
            AmbiguousContentModel => "AmbiguousContentModel",
            DfaStateExplosion => "DFAStateExplosion",
            AllGroupTooComplex => "AllGroupTooComplex",
            ImportNotDeclared => "ImportNotDeclared",
            XmlParse => "XMLParse",
            UnexpectedElement => "UnexpectedElement",
            UnexpectedAttribute => "UnexpectedAttribute",
            MissingRequiredAttribute => "MissingRequiredAttribute",
            InvalidAttributeValue => "InvalidAttributeValue",
            InvalidCharacterContent => "InvalidCharacterContent",
            IncompleteContent => "IncompleteContent",
            ElementNotNillable => "ElementNotNillable",
            NilledWithContent => "NilledWithContent",
            XsiTypeInvalid => "XsiTypeInvalid",
            UnresolvedKeyref => "UnresolvedKeyref",
            DuplicateKey => "DuplicateKey",
            DuplicateId => "DuplicateID",
            UnresolvedIdRef => "UnresolvedIDRef",
            SchemaLocationHint => "SchemaLocationHint",
            LimitExceeded => "LimitExceeded",
            IdentityFieldInvalid => "IdentityFieldInvalid",
            SchemaNotLoaded => "SchemaNotLoaded",
        }
    }

    /// Whether this code is raised while compiling a schema
    pub fn is_compile_time(&self) -> bool {
        use ViolationCode::*;
        !matches!(
            self,
            XmlParse
                | UnexpectedElement
                | UnexpectedAttribute
                | MissingRequiredAttribute
                | InvalidAttributeValue
                | InvalidCharacterContent
                | IncompleteContent
                | ElementNotNillable
                | NilledWithContent
                | XsiTypeInvalid
                | UnresolvedKeyref
                | DuplicateKey
                | DuplicateId
                | UnresolvedIdRef
                | SchemaLocationHint
                | IdentityFieldInvalid
        )
    }
}

impl fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ViolationCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A position inside a schema document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePos {
    /// Canonical system id of the document (the component origin)
    pub origin: Arc<str>,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

impl SourcePos {
    /// Create a position
    pub fn new(origin: Arc<str>, line: u32, column: u32) -> Self {
        Self { origin, line, column }
    }

    /// A position with no meaningful line information
    pub fn unknown(origin: Arc<str>) -> Self {
        Self { origin, line: 0, column: 0 }
    }
}

/// A single violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Stable code
    pub code: ViolationCode,
    /// Human-readable message
    pub message: String,
    /// Document (schema or instance) the violation was found in
    pub document: Option<String>,
    /// 1-based line, 0 when unknown
    pub line: u32,
    /// 1-based column, 0 when unknown
    pub column: u32,
    /// XPath-like pointer to the offending element
    pub path: Option<String>,
}

impl Violation {
    /// Create a violation without location information
    pub fn new(code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            document: None,
            line: 0,
            column: 0,
            path: None,
        }
    }

    /// Set the document
    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    /// Set line and column
    pub fn with_position(mut self, line: u32, column: u32) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    /// Set document, line and column from a schema source position
    pub fn at(self, pos: &SourcePos) -> Self {
        self.with_document(pos.origin.as_ref())
            .with_position(pos.line, pos.column)
    }

    /// Set the element path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref document) = self.document {
            write!(f, "{}:", document)?;
        }
        if self.line > 0 {
            write!(f, "{}:{}: ", self.line, self.column)?;
        } else if self.document.is_some() {
            f.write_str(" ")?;
        }
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref path) = self.path {
            write!(f, " (at {})", path)?;
        }
        Ok(())
    }
}

impl Serialize for Violation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Violation", 6)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("document", &self.document)?;
        state.serialize_field("line", &self.line)?;
        state.serialize_field("column", &self.column)?;
        state.serialize_field("path", &self.path)?;
        state.end()
    }
}

/// Default cap on recorded violations
pub const DEFAULT_MAX_VIOLATIONS: usize = 1000;

/// Ordered, bounded list of violations
#[derive(Debug, Clone)]
pub struct ViolationList {
    items: Vec<Violation>,
    limit: usize,
    truncated: bool,
}

impl Default for ViolationList {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ViolationList {
    /// Create a list holding at most `limit` violations (0 = default cap)
    pub fn new(limit: usize) -> Self {
        Self {
            items: Vec::new(),
            limit: if limit == 0 { DEFAULT_MAX_VIOLATIONS } else { limit },
            truncated: false,
        }
    }

    /// Append a violation; ignored once the cap is reached
    pub fn push(&mut self, violation: Violation) {
        if self.items.len() < self.limit {
            self.items.push(violation);
        } else {
            self.truncated = true;
        }
    }

    /// Append every violation of another sequence
    pub fn extend(&mut self, violations: impl IntoIterator<Item = Violation>) {
        for v in violations {
            self.push(v);
        }
    }

    /// Whether no violations were recorded
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of recorded violations
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether violations were dropped because of the cap
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Iterate over recorded violations
    pub fn iter(&self) -> std::slice::Iter<'_, Violation> {
        self.items.iter()
    }

    /// Whether any recorded violation has the given code
    pub fn has_code(&self, code: ViolationCode) -> bool {
        self.items.iter().any(|v| v.code == code)
    }

    /// Number of recorded violations with the given code
    pub fn count_code(&self, code: ViolationCode) -> usize {
        self.items.iter().filter(|v| v.code == code).count()
    }

    /// Codes of all recorded violations, in order
    pub fn codes(&self) -> Vec<ViolationCode> {
        self.items.iter().map(|v| v.code).collect()
    }

    /// Borrow the violations as a slice
    pub fn as_slice(&self) -> &[Violation] {
        &self.items
    }

    /// Serialize to a JSON array
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.items).unwrap_or_else(|_| "[]".to_string())
    }
}

impl IntoIterator for ViolationList {
    type Item = Violation;
    type IntoIter = std::vec::IntoIter<Violation>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a ViolationList {
    type Item = &'a Violation;
    type IntoIter = std::slice::Iter<'a, Violation>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl fmt::Display for ViolationList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for v in &self.items {
            writeln!(f, "{}", v)?;
        }
        if self.truncated {
            writeln!(f, "(further violations omitted)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_strings_are_stable() {
        assert_eq!(ViolationCode::DfaStateExplosion.as_str(), "DFAStateExplosion");
        assert_eq!(ViolationCode::XmlParse.to_string(), "XMLParse");
        assert_eq!(ViolationCode::DuplicateId.as_str(), "DuplicateID");
        assert_eq!(ViolationCode::UnresolvedIdRef.as_str(), "UnresolvedIDRef");
        assert!(ViolationCode::CyclicGroup.is_compile_time());
        assert!(!ViolationCode::DuplicateKey.is_compile_time());
    }

    #[test]
    fn test_violation_display() {
        let v = Violation::new(ViolationCode::UnexpectedElement, "element 'age' not expected")
            .with_document("doc.xml")
            .with_position(3, 7)
            .with_path("/person/age");
        assert_eq!(
            v.to_string(),
            "doc.xml:3:7: [UnexpectedElement] element 'age' not expected (at /person/age)"
        );
    }

    #[test]
    fn test_list_is_bounded() {
        let mut list = ViolationList::new(2);
        for _ in 0..5 {
            list.push(Violation::new(ViolationCode::DuplicateId, "dup"));
        }
        assert_eq!(list.len(), 2);
        assert!(list.truncated());
        assert_eq!(list.count_code(ViolationCode::DuplicateId), 2);
    }

    #[test]
    fn test_json_uses_stable_codes() {
        let mut list = ViolationList::new(0);
        list.push(Violation::new(ViolationCode::XmlParse, "bad").with_position(1, 2));
        let json = list.to_json();
        assert!(json.contains("\"code\":\"XMLParse\""));
        assert!(json.contains("\"line\":1"));
    }
}
