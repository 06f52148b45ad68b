//! XSD Document Parsing
//!
//! Translates one schema document tree into components of a
//! [`ComponentSet`]. References stay symbolic (`TypeRef::Named`,
//! `Term::ElementRef`, ...) until the resolver links them. `<include>` and
//! `<import>` are returned as [`Directive`]s for the loader to follow.
//!
//! Problems are reported as `SchemaParse` (or a more specific code) and the
//! offending construct is skipped, so one pass reports everything it can.

use std::sync::Arc;

use roxmltree::{Document, Node};

use super::builtins::Builtin;
use super::components::{
    AttrTarget, AttributeDecl, AttributeGroupDef, AttributeUseDecl, AttributeUseKind,
    ComplexTypeDef, ComponentSet, ContentDecl, ContentType, DerivationMethod, DerivationSet,
    ElemId, ElementDecl, GlobalKind, IdcId, IdentityConstraint, IdentityKind, ModelGroupDef,
    Notation, RawFacet, ReferenceSite, SimpleDerivation, SimpleTypeDef, TypeDef, TypeId, TypeRef,
    ValueConstraint, Variety,
};
use super::exceptions::{SourcePos, Violation, ViolationCode, ViolationList};
use super::facets::{FacetKind, FacetSet, WhiteSpace};
use super::particles::{parse_occurs, Compositor, ModelGroup, Particle, Term};
use super::wildcards::{NamespaceConstraint, ProcessContents, Wildcard};
use crate::names::{is_valid_ncname, split_qname};
use crate::namespaces::{NamespaceContext, QName, XSD_NAMESPACE};
use crate::xpath::{FieldPath, Selector};

/// XSD element local names
mod xsd_elements {
    pub const SCHEMA: &str = "schema";
    pub const ELEMENT: &str = "element";
    pub const COMPLEX_TYPE: &str = "complexType";
    pub const SIMPLE_TYPE: &str = "simpleType";
    pub const ATTRIBUTE: &str = "attribute";
    pub const ATTRIBUTE_GROUP: &str = "attributeGroup";
    pub const GROUP: &str = "group";
    pub const SEQUENCE: &str = "sequence";
    pub const CHOICE: &str = "choice";
    pub const ALL: &str = "all";
    pub const ANNOTATION: &str = "annotation";
    pub const IMPORT: &str = "import";
    pub const INCLUDE: &str = "include";
    pub const REDEFINE: &str = "redefine";
    pub const RESTRICTION: &str = "restriction";
    pub const EXTENSION: &str = "extension";
    pub const LIST: &str = "list";
    pub const UNION: &str = "union";
    pub const COMPLEX_CONTENT: &str = "complexContent";
    pub const SIMPLE_CONTENT: &str = "simpleContent";
    pub const ANY: &str = "any";
    pub const ANY_ATTRIBUTE: &str = "anyAttribute";
    pub const NOTATION: &str = "notation";
    pub const UNIQUE: &str = "unique";
    pub const KEY: &str = "key";
    pub const KEYREF: &str = "keyref";
    pub const SELECTOR: &str = "selector";
    pub const FIELD: &str = "field";
}

/// XSD attribute names
mod xsd_attrs {
    pub const NAME: &str = "name";
    pub const TYPE: &str = "type";
    pub const REF: &str = "ref";
    pub const TARGET_NAMESPACE: &str = "targetNamespace";
    pub const ELEMENT_FORM_DEFAULT: &str = "elementFormDefault";
    pub const ATTRIBUTE_FORM_DEFAULT: &str = "attributeFormDefault";
    pub const BLOCK_DEFAULT: &str = "blockDefault";
    pub const FINAL_DEFAULT: &str = "finalDefault";
    pub const FORM: &str = "form";
    pub const NILLABLE: &str = "nillable";
    pub const DEFAULT: &str = "default";
    pub const FIXED: &str = "fixed";
    pub const BASE: &str = "base";
    pub const VALUE: &str = "value";
    pub const MIXED: &str = "mixed";
    pub const ABSTRACT: &str = "abstract";
    pub const BLOCK: &str = "block";
    pub const FINAL: &str = "final";
    pub const SUBSTITUTION_GROUP: &str = "substitutionGroup";
    pub const NAMESPACE: &str = "namespace";
    pub const PROCESS_CONTENTS: &str = "processContents";
    pub const SCHEMA_LOCATION: &str = "schemaLocation";
    pub const ITEM_TYPE: &str = "itemType";
    pub const MEMBER_TYPES: &str = "memberTypes";
    pub const PUBLIC: &str = "public";
    pub const SYSTEM: &str = "system";
    pub const MIN_OCCURS: &str = "minOccurs";
    pub const MAX_OCCURS: &str = "maxOccurs";
    pub const USE: &str = "use";
    pub const REFER: &str = "refer";
    pub const XPATH: &str = "xpath";
}

/// Kinds of composition directives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    /// `<include>`
    Include,
    /// `<import>`
    Import,
}

/// An `<include>` or `<import>` found in a document
#[derive(Debug, Clone)]
pub struct Directive {
    /// Include or import
    pub kind: DirectiveKind,
    /// `schemaLocation`
    pub location: Option<String>,
    /// `namespace` (imports)
    pub namespace: Option<String>,
    /// Where the directive was written
    pub pos: SourcePos,
}

/// How a document's components are named
#[derive(Debug, Clone)]
pub struct DocumentTarget {
    /// Canonical system id
    pub origin: Arc<str>,
    /// Effective target namespace
    pub target_namespace: Option<String>,
    /// The document has no `targetNamespace` and is stamped with the
    /// includer's namespace
    pub chameleon: bool,
}

/// Parse one schema document into `set`; returns its directives
pub fn parse_schema_document(
    set: &mut ComponentSet,
    violations: &mut ViolationList,
    doc: &Document<'_>,
    text: &str,
    target: DocumentTarget,
) -> Vec<Directive> {
    let mut parser = DocumentParser::new(set, violations, doc, text, target);
    parser.parse_schema(doc.root_element());
    parser.directives
}

/// Namespace bindings in scope at a node
pub fn namespace_context(node: Node<'_, '_>) -> NamespaceContext {
    let mut ctx = NamespaceContext::new();
    for ns in node.namespaces() {
        match ns.name() {
            Some(prefix) => ctx.add_prefix(prefix, ns.uri()),
            None => ctx.set_default_namespace(ns.uri()),
        }
    }
    ctx
}

/// Whether a node is an element in the XSD namespace
pub fn is_xsd_element(node: Node<'_, '_>, local: &str) -> bool {
    node.is_element() && node.tag_name().namespace() == Some(XSD_NAMESPACE) && node.tag_name().name() == local
}

#[derive(Default)]
struct ContentParts {
    particle: Option<Particle>,
    facets: Vec<RawFacet>,
    inline: Option<TypeId>,
}

struct DocumentParser<'s, 'd, 'input> {
    set: &'s mut ComponentSet,
    violations: &'s mut ViolationList,
    doc: &'d Document<'input>,
    text: &'s str,
    origin: Arc<str>,
    target_namespace: Option<String>,
    chameleon: bool,
    element_qualified: bool,
    attribute_qualified: bool,
    block_default: DerivationSet,
    final_default: DerivationSet,
    directives: Vec<Directive>,
}

fn type_final_set() -> DerivationSet {
    DerivationSet::EXTENSION.union(DerivationSet::RESTRICTION)
}

fn simple_final_set() -> DerivationSet {
    DerivationSet::RESTRICTION
        .union(DerivationSet::LIST)
        .union(DerivationSet::UNION)
}

fn element_block_set() -> DerivationSet {
    type_final_set().union(DerivationSet::SUBSTITUTION)
}

fn mask(set: DerivationSet, allowed: DerivationSet) -> DerivationSet {
    let mut result = DerivationSet::empty();
    for flag in [
        DerivationSet::EXTENSION,
        DerivationSet::RESTRICTION,
        DerivationSet::SUBSTITUTION,
        DerivationSet::LIST,
        DerivationSet::UNION,
    ] {
        if set.contains(flag) && allowed.contains(flag) {
            result = result.union(flag);
        }
    }
    result
}

impl<'s, 'd, 'input> DocumentParser<'s, 'd, 'input> {
    fn new(
        set: &'s mut ComponentSet,
        violations: &'s mut ViolationList,
        doc: &'d Document<'input>,
        text: &'s str,
        target: DocumentTarget,
    ) -> Self {
        Self {
            set,
            violations,
            doc,
            text,
            origin: target.origin,
            target_namespace: target.target_namespace,
            chameleon: target.chameleon,
            element_qualified: false,
            attribute_qualified: false,
            block_default: DerivationSet::empty(),
            final_default: DerivationSet::empty(),
            directives: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn pos(&self, node: Node<'_, '_>) -> SourcePos {
        let at = self.doc.text_pos_at(node.range().start);
        SourcePos::new(self.origin.clone(), at.row, at.col)
    }

    fn report(&mut self, node: Node<'_, '_>, code: ViolationCode, message: impl Into<String>) {
        let pos = self.pos(node);
        self.violations.push(Violation::new(code, message).at(&pos));
    }

    fn parse_error(&mut self, node: Node<'_, '_>, message: impl Into<String>) {
        self.report(node, ViolationCode::SchemaParse, message);
    }

    /// Element children in the XSD namespace, annotations dropped
    fn children<'a>(&mut self, node: Node<'a, 'input>) -> Vec<Node<'a, 'input>> {
        let mut result = Vec::new();
        for child in node.children().filter(|c| c.is_element()) {
            if child.tag_name().namespace() != Some(XSD_NAMESPACE) {
                self.parse_error(
                    child,
                    format!("element '{}' is not allowed in a schema", child.tag_name().name()),
                );
                continue;
            }
            if child.tag_name().name() != xsd_elements::ANNOTATION {
                result.push(child);
            }
        }
        result
    }

    fn qualify(&self, local: &str) -> QName {
        QName::new(self.target_namespace.clone(), local)
    }

    fn required_name(&mut self, node: Node<'_, '_>) -> Option<String> {
        match node.attribute(xsd_attrs::NAME).map(str::trim) {
            Some(name) if is_valid_ncname(name) => Some(name.to_string()),
            Some(name) => {
                self.parse_error(node, format!("'{}' is not a valid NCName", name));
                None
            }
            None => {
                self.parse_error(
                    node,
                    format!("<{}> requires a 'name' attribute", node.tag_name().name()),
                );
                None
            }
        }
    }

    fn boolean(&mut self, node: Node<'_, '_>, attr: &str) -> bool {
        match node.attribute(attr).map(str::trim) {
            None | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(other) => {
                self.parse_error(node, format!("'{}' is not a valid boolean for '{}'", other, attr));
                false
            }
        }
    }

    fn derivation_set(
        &mut self,
        node: Node<'_, '_>,
        attr: &str,
        allowed: DerivationSet,
        default: DerivationSet,
    ) -> DerivationSet {
        match node.attribute(attr) {
            None => mask(default, allowed),
            Some(value) => DerivationSet::parse(value, allowed).unwrap_or_else(|| {
                self.parse_error(node, format!("'{}' is not a valid value for '{}'", value, attr));
                DerivationSet::empty()
            }),
        }
    }

    /// Resolve a QName-valued attribute and record the reference site
    fn reference(&mut self, node: Node<'_, '_>, lexical: &str, kind: GlobalKind) -> Option<QName> {
        let lexical = lexical.trim();
        let (prefix, local) = split_qname(lexical);
        if !is_valid_ncname(local) || prefix.is_some_and(|p| !is_valid_ncname(p)) {
            self.parse_error(node, format!("'{}' is not a valid QName", lexical));
            return None;
        }
        let namespace = match prefix {
            Some(p) => match node.lookup_namespace_uri(Some(p)) {
                Some(uri) => Some(uri.to_string()),
                None => {
                    self.parse_error(node, format!("prefix '{}' is not bound", p));
                    return None;
                }
            },
            None => node.lookup_namespace_uri(None).map(str::to_string),
        };
        let mut name = QName::new(namespace, local);
        if self.chameleon && name.namespace.is_none() {
            name.namespace = self.target_namespace.clone();
        }
        let pos = self.pos(node);
        self.set.references.push(ReferenceSite {
            name: name.clone(),
            kind,
            pos,
        });
        Some(name)
    }

    fn type_reference(&mut self, node: Node<'_, '_>, attr: &str) -> Option<TypeRef> {
        let lexical = node.attribute(attr)?;
        Some(match self.reference(node, lexical, GlobalKind::Type) {
            Some(name) => TypeRef::Named(name),
            None => TypeRef::Unspecified,
        })
    }

    fn value_constraint(&self, node: Node<'_, '_>, attr: &str) -> Option<ValueConstraint> {
        node.attribute(attr).map(|lexical| ValueConstraint {
            lexical: lexical.to_string(),
            ns: namespace_context(node),
        })
    }

    /// Claim a global name; false when the node must be skipped
    fn claim(&mut self, node: Node<'_, '_>, kind: GlobalKind, name: &QName) -> bool {
        let range = node.range();
        let source = self.text.get(range).unwrap_or_default();
        match self.set.claim_global(kind, name, source) {
            Ok(fresh) => fresh,
            Err(()) => {
                self.report(
                    node,
                    ViolationCode::DuplicateGlobal,
                    format!("duplicate global {} '{}'", kind, name),
                );
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Schema
    // -------------------------------------------------------------------------

    fn parse_schema(&mut self, root: Node<'_, 'input>) {
        if !is_xsd_element(root, xsd_elements::SCHEMA) {
            self.parse_error(root, "root element is not xs:schema");
            return;
        }
        self.element_qualified = root.attribute(xsd_attrs::ELEMENT_FORM_DEFAULT) == Some("qualified");
        self.attribute_qualified =
            root.attribute(xsd_attrs::ATTRIBUTE_FORM_DEFAULT) == Some("qualified");
        self.block_default = self.derivation_set(
            root,
            xsd_attrs::BLOCK_DEFAULT,
            element_block_set(),
            DerivationSet::empty(),
        );
        self.final_default = self.derivation_set(
            root,
            xsd_attrs::FINAL_DEFAULT,
            type_final_set().union(simple_final_set()),
            DerivationSet::empty(),
        );
        let declared_tns = root
            .attribute(xsd_attrs::TARGET_NAMESPACE)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);
        let info = self.set.documents.entry(self.origin.to_string()).or_default();
        if let Some(tns) = self.target_namespace.clone().or(declared_tns) {
            info.target_namespaces.insert(tns);
        } else {
            info.target_namespaces.insert(String::new());
        }

        for child in self.children(root) {
            match child.tag_name().name() {
                xsd_elements::INCLUDE => self.parse_include(child),
                xsd_elements::IMPORT => self.parse_import(child),
                xsd_elements::REDEFINE => {
                    self.parse_error(child, "<redefine> is not supported");
                }
                xsd_elements::SIMPLE_TYPE => {
                    if let Some(name) = self.required_name(child).map(|n| self.qualify(&n)) {
                        if self.claim(child, GlobalKind::Type, &name) {
                            if let Some(id) = self.parse_simple_type(child, Some(name.clone())) {
                                self.set.type_names.insert(name, id);
                            }
                        }
                    }
                }
                xsd_elements::COMPLEX_TYPE => {
                    if let Some(name) = self.required_name(child).map(|n| self.qualify(&n)) {
                        if self.claim(child, GlobalKind::Type, &name) {
                            let id = self.parse_complex_type(child, Some(name.clone()));
                            self.set.type_names.insert(name, id);
                        }
                    }
                }
                xsd_elements::ELEMENT => {
                    if let Some(name) = self.required_name(child).map(|n| self.qualify(&n)) {
                        if self.claim(child, GlobalKind::Element, &name) {
                            let id = self.parse_element(child, name.clone(), true);
                            self.set.element_names.insert(name, id);
                        }
                    }
                }
                xsd_elements::ATTRIBUTE => {
                    if let Some(name) = self.required_name(child).map(|n| self.qualify(&n)) {
                        if self.claim(child, GlobalKind::Attribute, &name) {
                            let decl = self.parse_attribute_decl(child, name.clone(), true);
                            let id = self.set.add_attribute(decl);
                            self.set.attribute_names.insert(name, id);
                        }
                    }
                }
                xsd_elements::GROUP => self.parse_group_def(child),
                xsd_elements::ATTRIBUTE_GROUP => self.parse_attribute_group_def(child),
                xsd_elements::NOTATION => self.parse_notation(child),
                other => {
                    self.parse_error(child, format!("<{}> is not allowed at the top level", other));
                }
            }
        }
    }

    fn parse_include(&mut self, node: Node<'_, '_>) {
        let pos = self.pos(node);
        match node.attribute(xsd_attrs::SCHEMA_LOCATION) {
            Some(location) => self.directives.push(Directive {
                kind: DirectiveKind::Include,
                location: Some(location.trim().to_string()),
                namespace: None,
                pos,
            }),
            None => self.parse_error(node, "<include> requires 'schemaLocation'"),
        }
    }

    fn parse_import(&mut self, node: Node<'_, '_>) {
        let namespace = node
            .attribute(xsd_attrs::NAMESPACE)
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty());
        if namespace == self.target_namespace {
            self.report(
                node,
                ViolationCode::ImportContradiction,
                format!(
                    "a document may not import its own target namespace '{}'",
                    namespace.as_deref().unwrap_or("")
                ),
            );
            return;
        }
        self.set
            .documents
            .entry(self.origin.to_string())
            .or_default()
            .imports
            .insert(namespace.clone().unwrap_or_default());
        let pos = self.pos(node);
        self.directives.push(Directive {
            kind: DirectiveKind::Import,
            location: node
                .attribute(xsd_attrs::SCHEMA_LOCATION)
                .map(|l| l.trim().to_string()),
            namespace,
            pos,
        });
    }

    fn parse_notation(&mut self, node: Node<'_, '_>) {
        let Some(name) = self.required_name(node).map(|n| self.qualify(&n)) else {
            return;
        };
        let public = node.attribute(xsd_attrs::PUBLIC).map(str::to_string);
        let system = node.attribute(xsd_attrs::SYSTEM).map(str::to_string);
        if public.is_none() && system.is_none() {
            self.parse_error(node, "<notation> requires 'public' or 'system'");
        }
        if self.claim(node, GlobalKind::Notation, &name) {
            let pos = self.pos(node);
            self.set.notations.insert(
                name.clone(),
                Notation {
                    name,
                    public,
                    system,
                    pos,
                },
            );
        }
    }

    // -------------------------------------------------------------------------
    // Simple types
    // -------------------------------------------------------------------------

    fn parse_simple_type(&mut self, node: Node<'_, 'input>, name: Option<QName>) -> Option<TypeId> {
        let final_ = self.derivation_set(node, xsd_attrs::FINAL, simple_final_set(), self.final_default);
        let children = self.children(node);
        let Some(constructor) = children.first().copied() else {
            self.parse_error(node, "<simpleType> requires restriction, list or union");
            return None;
        };
        if children.len() > 1 {
            self.parse_error(children[1], "<simpleType> has more than one derivation");
        }
        let mut raw_facets = Vec::new();
        let (derivation, variety) = match constructor.tag_name().name() {
            xsd_elements::RESTRICTION => {
                let mut base = self.type_reference(constructor, xsd_attrs::BASE);
                for child in self.children(constructor) {
                    let local = child.tag_name().name();
                    if local == xsd_elements::SIMPLE_TYPE {
                        if base.is_some() {
                            self.parse_error(child, "restriction has both 'base' and an inline type");
                        } else if let Some(id) = self.parse_simple_type(child, None) {
                            base = Some(TypeRef::Id(id));
                        }
                    } else if let Some(facet) = self.parse_facet(child) {
                        raw_facets.push(facet);
                    }
                }
                let base = base.unwrap_or_else(|| {
                    self.parse_error(constructor, "restriction requires 'base' or an inline type");
                    TypeRef::Unspecified
                });
                (SimpleDerivation::Restriction { base }, Variety::Atomic)
            }
            xsd_elements::LIST => {
                let mut item = self.type_reference(constructor, xsd_attrs::ITEM_TYPE);
                for child in self.children(constructor) {
                    if child.tag_name().name() == xsd_elements::SIMPLE_TYPE && item.is_none() {
                        if let Some(id) = self.parse_simple_type(child, None) {
                            item = Some(TypeRef::Id(id));
                        }
                    } else {
                        self.parse_error(child, "unexpected content in <list>");
                    }
                }
                let item = item.unwrap_or_else(|| {
                    self.parse_error(constructor, "list requires 'itemType' or an inline type");
                    TypeRef::Unspecified
                });
                (SimpleDerivation::List { item }, Variety::List)
            }
            xsd_elements::UNION => {
                let mut members = Vec::new();
                if let Some(list) = constructor.attribute(xsd_attrs::MEMBER_TYPES) {
                    for lexical in list.split_whitespace() {
                        if let Some(name) = self.reference(constructor, lexical, GlobalKind::Type) {
                            members.push(TypeRef::Named(name));
                        }
                    }
                }
                for child in self.children(constructor) {
                    if child.tag_name().name() == xsd_elements::SIMPLE_TYPE {
                        if let Some(id) = self.parse_simple_type(child, None) {
                            members.push(TypeRef::Id(id));
                        }
                    } else {
                        self.parse_error(child, "unexpected content in <union>");
                    }
                }
                if members.is_empty() {
                    self.parse_error(constructor, "union has no member types");
                }
                (SimpleDerivation::Union { members }, Variety::Union)
            }
            other => {
                self.parse_error(constructor, format!("<{}> is not a simple type derivation", other));
                return None;
            }
        };
        let pos = self.pos(node);
        Some(self.set.add_type(TypeDef::Simple(SimpleTypeDef {
            name,
            derivation,
            raw_facets,
            facets: FacetSet::default(),
            white_space: WhiteSpace::Collapse,
            variety,
            final_,
            pos,
        })))
    }

    fn parse_facet(&mut self, node: Node<'_, '_>) -> Option<RawFacet> {
        let local = node.tag_name().name();
        let Some(kind) = FacetKind::from_local_name(local) else {
            self.parse_error(node, format!("<{}> is not a facet", local));
            return None;
        };
        let Some(value) = node.attribute(xsd_attrs::VALUE) else {
            self.report(node, ViolationCode::InvalidFacet, format!("<{}> requires 'value'", local));
            return None;
        };
        let fixed = self.boolean(node, xsd_attrs::FIXED);
        Some(RawFacet {
            kind,
            value: value.to_string(),
            fixed,
            ns: namespace_context(node),
            pos: self.pos(node),
        })
    }

    // -------------------------------------------------------------------------
    // Complex types
    // -------------------------------------------------------------------------

    fn parse_complex_type(&mut self, node: Node<'_, 'input>, name: Option<QName>) -> TypeId {
        let block = self.derivation_set(node, xsd_attrs::BLOCK, type_final_set(), self.block_default);
        let final_ = self.derivation_set(node, xsd_attrs::FINAL, type_final_set(), self.final_default);
        let mut def = ComplexTypeDef {
            name,
            base: TypeRef::Id(ComponentSet::builtin(Builtin::AnyType)),
            method: DerivationMethod::Restriction,
            mixed: self.boolean(node, xsd_attrs::MIXED),
            abstract_: self.boolean(node, xsd_attrs::ABSTRACT),
            block,
            final_,
            model: ContentDecl::Complex { particle: None },
            attribute_decls: Vec::new(),
            attribute_group_refs: Vec::new(),
            any_attribute: None,
            content: ContentType::Empty,
            attributes: Vec::new(),
            attribute_wildcard: None,
            pos: self.pos(node),
        };

        let children = self.children(node);
        let first = children.first().map(|c| c.tag_name().name());
        match first {
            Some(xsd_elements::SIMPLE_CONTENT) | Some(xsd_elements::COMPLEX_CONTENT) => {
                let wrapper = children[0];
                if children.len() > 1 {
                    self.parse_error(children[1], "unexpected content after derivation");
                }
                let simple = first == Some(xsd_elements::SIMPLE_CONTENT);
                if !simple && wrapper.attribute(xsd_attrs::MIXED).is_some() {
                    def.mixed = self.boolean(wrapper, xsd_attrs::MIXED);
                }
                let derivations = self.children(wrapper);
                let Some(derivation) = derivations.first().copied() else {
                    self.parse_error(wrapper, "expected <restriction> or <extension>");
                    return self.set.add_type(TypeDef::Complex(def));
                };
                def.method = match derivation.tag_name().name() {
                    xsd_elements::RESTRICTION => DerivationMethod::Restriction,
                    xsd_elements::EXTENSION => DerivationMethod::Extension,
                    other => {
                        self.parse_error(derivation, format!("<{}> is not a derivation", other));
                        return self.set.add_type(TypeDef::Complex(def));
                    }
                };
                def.base = self.type_reference(derivation, xsd_attrs::BASE).unwrap_or_else(|| {
                    self.parse_error(derivation, "derivation requires 'base'");
                    TypeRef::Unspecified
                });
                let facets_allowed = simple && def.method == DerivationMethod::Restriction;
                let parts = self.parse_content(derivation, &mut def, facets_allowed, !simple);
                def.model = if simple {
                    match def.method {
                        DerivationMethod::Extension => ContentDecl::SimpleExtension,
                        DerivationMethod::Restriction => ContentDecl::SimpleRestriction {
                            inline: parts.inline,
                            facets: parts.facets,
                        },
                    }
                } else {
                    ContentDecl::Complex {
                        particle: parts.particle,
                    }
                };
            }
            _ => {
                let parts = self.parse_content(node, &mut def, false, true);
                def.model = ContentDecl::Complex {
                    particle: parts.particle,
                };
            }
        }
        self.set.add_type(TypeDef::Complex(def))
    }

    /// Particle, attribute declarations and (for simple content) facets
    fn parse_content(
        &mut self,
        parent: Node<'_, 'input>,
        def: &mut ComplexTypeDef,
        facets_allowed: bool,
        particles_allowed: bool,
    ) -> ContentParts {
        let mut parts = ContentParts::default();
        let mut seen_attributes = false;
        for child in self.children(parent) {
            let local = child.tag_name().name();
            match local {
                xsd_elements::SEQUENCE | xsd_elements::CHOICE | xsd_elements::ALL | xsd_elements::GROUP
                    if particles_allowed =>
                {
                    if parts.particle.is_some() || seen_attributes {
                        self.parse_error(child, format!("unexpected <{}>", local));
                    } else {
                        parts.particle = self.parse_particle(child);
                    }
                }
                xsd_elements::ATTRIBUTE => {
                    seen_attributes = true;
                    if let Some(decl) = self.parse_attribute_use(child) {
                        def.attribute_decls.push(decl);
                    }
                }
                xsd_elements::ATTRIBUTE_GROUP => {
                    seen_attributes = true;
                    if let Some(entry) = self.attribute_group_ref(child) {
                        def.attribute_group_refs.push(entry);
                    }
                }
                xsd_elements::ANY_ATTRIBUTE => {
                    if def.any_attribute.is_some() {
                        self.parse_error(child, "more than one <anyAttribute>");
                    }
                    seen_attributes = true;
                    def.any_attribute = self.parse_wildcard(child);
                }
                xsd_elements::SIMPLE_TYPE if facets_allowed => {
                    if parts.inline.is_none() {
                        parts.inline = self.parse_simple_type(child, None);
                    } else {
                        self.parse_error(child, "more than one inline simple type");
                    }
                }
                _ if facets_allowed && FacetKind::from_local_name(local).is_some() => {
                    if let Some(facet) = self.parse_facet(child) {
                        parts.facets.push(facet);
                    }
                }
                other => {
                    self.parse_error(child, format!("<{}> is not allowed here", other));
                }
            }
        }
        parts
    }

    // -------------------------------------------------------------------------
    // Particles
    // -------------------------------------------------------------------------

    fn parse_particle(&mut self, node: Node<'_, 'input>) -> Option<Particle> {
        let occurs = match parse_occurs(
            node.attribute(xsd_attrs::MIN_OCCURS),
            node.attribute(xsd_attrs::MAX_OCCURS),
        ) {
            Ok(occurs) => occurs,
            Err(e) => {
                self.parse_error(node, e.to_string());
                return None;
            }
        };
        let pos = self.pos(node);
        let term = match node.tag_name().name() {
            xsd_elements::ELEMENT => {
                if let Some(lexical) = node.attribute(xsd_attrs::REF) {
                    Term::ElementRef(self.reference(node, lexical, GlobalKind::Element)?)
                } else {
                    let local = self.required_name(node)?;
                    let qualified = match node.attribute(xsd_attrs::FORM) {
                        Some("qualified") => true,
                        Some("unqualified") => false,
                        _ => self.element_qualified,
                    };
                    let name = if qualified {
                        self.qualify(&local)
                    } else {
                        QName::local(local)
                    };
                    Term::Element(self.parse_element(node, name, false))
                }
            }
            xsd_elements::GROUP => {
                let Some(lexical) = node.attribute(xsd_attrs::REF) else {
                    self.parse_error(node, "local <group> requires 'ref'");
                    return None;
                };
                Term::GroupRef(self.reference(node, lexical, GlobalKind::Group)?)
            }
            xsd_elements::ANY => Term::Any(self.parse_wildcard(node)?),
            xsd_elements::SEQUENCE => Term::Group(self.parse_model_group(node, Compositor::Sequence)),
            xsd_elements::CHOICE => Term::Group(self.parse_model_group(node, Compositor::Choice)),
            xsd_elements::ALL => Term::Group(self.parse_model_group(node, Compositor::All)),
            other => {
                self.parse_error(node, format!("<{}> is not a particle", other));
                return None;
            }
        };
        Some(Particle::new(occurs, term, pos))
    }

    fn parse_model_group(&mut self, node: Node<'_, 'input>, compositor: Compositor) -> ModelGroup {
        let mut group = ModelGroup::new(compositor);
        for child in self.children(node) {
            if let Some(particle) = self.parse_particle(child) {
                group.particles.push(particle);
            }
        }
        group
    }

    fn parse_wildcard(&mut self, node: Node<'_, '_>) -> Option<Wildcard> {
        let namespace = match NamespaceConstraint::from_namespace_attr(
            node.attribute(xsd_attrs::NAMESPACE).unwrap_or("##any"),
            self.target_namespace.as_deref(),
        ) {
            Ok(ns) => ns,
            Err(e) => {
                self.parse_error(node, e.to_string());
                return None;
            }
        };
        let process_contents = match node.attribute(xsd_attrs::PROCESS_CONTENTS) {
            None => ProcessContents::Strict,
            Some(value) => match ProcessContents::parse(value.trim()) {
                Some(pc) => pc,
                None => {
                    self.parse_error(node, format!("'{}' is not a valid processContents", value));
                    return None;
                }
            },
        };
        Some(Wildcard::new(namespace, process_contents))
    }

    fn parse_group_def(&mut self, node: Node<'_, 'input>) {
        let Some(name) = self.required_name(node).map(|n| self.qualify(&n)) else {
            return;
        };
        if !self.claim(node, GlobalKind::Group, &name) {
            return;
        }
        let children = self.children(node);
        let compositor = match children.first().map(|c| c.tag_name().name()) {
            Some(xsd_elements::SEQUENCE) => Compositor::Sequence,
            Some(xsd_elements::CHOICE) => Compositor::Choice,
            Some(xsd_elements::ALL) => Compositor::All,
            _ => {
                self.parse_error(node, "<group> requires sequence, choice or all");
                return;
            }
        };
        if children.len() > 1 {
            self.parse_error(children[1], "<group> has more than one model group");
        }
        let model = children[0];
        if model.attribute(xsd_attrs::MIN_OCCURS).is_some()
            || model.attribute(xsd_attrs::MAX_OCCURS).is_some()
        {
            self.parse_error(model, "model groups of a named group take no occurrence bounds");
        }
        let pos = self.pos(node);
        let group = self.parse_model_group(model, compositor);
        let particle = Particle::new(Default::default(), Term::Group(group), self.pos(model));
        self.set
            .groups
            .insert(name.clone(), ModelGroupDef { name, particle, pos });
    }

    // -------------------------------------------------------------------------
    // Attributes
    // -------------------------------------------------------------------------

    fn parse_attribute_decl(&mut self, node: Node<'_, 'input>, name: QName, global: bool) -> AttributeDecl {
        let mut type_ref = self.type_reference(node, xsd_attrs::TYPE);
        for child in self.children(node) {
            if child.tag_name().name() == xsd_elements::SIMPLE_TYPE {
                if type_ref.is_some() {
                    self.parse_error(child, "attribute has both 'type' and an inline type");
                } else if let Some(id) = self.parse_simple_type(child, None) {
                    type_ref = Some(TypeRef::Id(id));
                }
            } else {
                self.parse_error(child, "unexpected content in <attribute>");
            }
        }
        let default = self.value_constraint(node, xsd_attrs::DEFAULT);
        let fixed = self.value_constraint(node, xsd_attrs::FIXED);
        if default.is_some() && fixed.is_some() {
            self.parse_error(node, "attribute has both 'default' and 'fixed'");
        }
        AttributeDecl {
            name,
            type_ref: type_ref.unwrap_or(TypeRef::Id(ComponentSet::builtin(Builtin::AnySimpleType))),
            default,
            fixed,
            global,
            pos: self.pos(node),
        }
    }

    fn parse_attribute_use(&mut self, node: Node<'_, 'input>) -> Option<AttributeUseDecl> {
        let use_kind = match node.attribute(xsd_attrs::USE).map(str::trim) {
            None | Some("optional") => AttributeUseKind::Optional,
            Some("required") => AttributeUseKind::Required,
            Some("prohibited") => AttributeUseKind::Prohibited,
            Some(other) => {
                self.parse_error(node, format!("'{}' is not a valid 'use'", other));
                AttributeUseKind::Optional
            }
        };
        let pos = self.pos(node);
        if let Some(lexical) = node.attribute(xsd_attrs::REF) {
            let name = self.reference(node, lexical, GlobalKind::Attribute)?;
            let default = self.value_constraint(node, xsd_attrs::DEFAULT);
            let fixed = self.value_constraint(node, xsd_attrs::FIXED);
            if default.is_some() && fixed.is_some() {
                self.parse_error(node, "attribute has both 'default' and 'fixed'");
            }
            return Some(AttributeUseDecl {
                target: AttrTarget::Ref(name),
                use_kind,
                default,
                fixed,
                pos,
            });
        }
        let local = self.required_name(node)?;
        let qualified = match node.attribute(xsd_attrs::FORM) {
            Some("qualified") => true,
            Some("unqualified") => false,
            _ => self.attribute_qualified,
        };
        let name = if qualified {
            self.qualify(&local)
        } else {
            QName::local(local)
        };
        let decl = self.parse_attribute_decl(node, name, false);
        let id = self.set.add_attribute(decl);
        Some(AttributeUseDecl {
            target: AttrTarget::Local(id),
            use_kind,
            default: None,
            fixed: None,
            pos,
        })
    }

    fn attribute_group_ref(&mut self, node: Node<'_, '_>) -> Option<(QName, SourcePos)> {
        let Some(lexical) = node.attribute(xsd_attrs::REF) else {
            self.parse_error(node, "local <attributeGroup> requires 'ref'");
            return None;
        };
        let name = self.reference(node, lexical, GlobalKind::AttributeGroup)?;
        Some((name, self.pos(node)))
    }

    fn parse_attribute_group_def(&mut self, node: Node<'_, 'input>) {
        let Some(name) = self.required_name(node).map(|n| self.qualify(&n)) else {
            return;
        };
        if !self.claim(node, GlobalKind::AttributeGroup, &name) {
            return;
        }
        let mut def = AttributeGroupDef {
            name: name.clone(),
            uses: Vec::new(),
            group_refs: Vec::new(),
            any_attribute: None,
            resolved: None,
            pos: self.pos(node),
        };
        for child in self.children(node) {
            match child.tag_name().name() {
                xsd_elements::ATTRIBUTE => {
                    if let Some(decl) = self.parse_attribute_use(child) {
                        def.uses.push(decl);
                    }
                }
                xsd_elements::ATTRIBUTE_GROUP => {
                    if let Some(entry) = self.attribute_group_ref(child) {
                        def.group_refs.push(entry);
                    }
                }
                xsd_elements::ANY_ATTRIBUTE => def.any_attribute = self.parse_wildcard(child),
                other => self.parse_error(child, format!("<{}> is not allowed in <attributeGroup>", other)),
            }
        }
        self.set.attribute_groups.insert(name, def);
    }

    // -------------------------------------------------------------------------
    // Elements
    // -------------------------------------------------------------------------

    fn parse_element(&mut self, node: Node<'_, 'input>, name: QName, global: bool) -> ElemId {
        let mut type_ref = self.type_reference(node, xsd_attrs::TYPE);
        let mut idc_nodes = Vec::new();
        for child in self.children(node) {
            match child.tag_name().name() {
                xsd_elements::SIMPLE_TYPE | xsd_elements::COMPLEX_TYPE => {
                    if type_ref.is_some() {
                        self.parse_error(child, "element has both 'type' and an inline type");
                        continue;
                    }
                    let id = if child.tag_name().name() == xsd_elements::SIMPLE_TYPE {
                        self.parse_simple_type(child, None)
                    } else {
                        Some(self.parse_complex_type(child, None))
                    };
                    type_ref = Some(id.map(TypeRef::Id).unwrap_or(TypeRef::Unspecified));
                }
                xsd_elements::UNIQUE | xsd_elements::KEY | xsd_elements::KEYREF => {
                    idc_nodes.push(child);
                }
                other => self.parse_error(child, format!("<{}> is not allowed in <element>", other)),
            }
        }
        let default = self.value_constraint(node, xsd_attrs::DEFAULT);
        let fixed = self.value_constraint(node, xsd_attrs::FIXED);
        if default.is_some() && fixed.is_some() {
            self.parse_error(node, "element has both 'default' and 'fixed'");
        }
        let substitution_head = match node.attribute(xsd_attrs::SUBSTITUTION_GROUP) {
            Some(lexical) if global => self.reference(node, lexical, GlobalKind::Element),
            Some(_) => {
                self.parse_error(node, "only global elements may have 'substitutionGroup'");
                None
            }
            None => None,
        };
        let abstract_ = self.boolean(node, xsd_attrs::ABSTRACT);
        if abstract_ && !global {
            self.parse_error(node, "only global elements may be abstract");
        }
        let decl = ElementDecl {
            name,
            type_explicit: type_ref.is_some(),
            type_ref: type_ref.unwrap_or(TypeRef::Unspecified),
            nillable: self.boolean(node, xsd_attrs::NILLABLE),
            default,
            fixed,
            abstract_: abstract_ && global,
            block: self.derivation_set(node, xsd_attrs::BLOCK, element_block_set(), self.block_default),
            final_: self.derivation_set(node, xsd_attrs::FINAL, type_final_set(), self.final_default),
            substitution_head,
            head: None,
            identity_constraints: Vec::new(),
            global,
            pos: self.pos(node),
        };
        let id = self.set.add_element(decl);
        for idc in idc_nodes {
            if let Some(idc_id) = self.parse_identity(idc, id) {
                self.set.elements[id.0].identity_constraints.push(idc_id);
            }
        }
        id
    }

    fn parse_identity(&mut self, node: Node<'_, 'input>, owner: ElemId) -> Option<IdcId> {
        let kind = match node.tag_name().name() {
            xsd_elements::UNIQUE => IdentityKind::Unique,
            xsd_elements::KEY => IdentityKind::Key,
            _ => IdentityKind::KeyRef,
        };
        let name = self.required_name(node).map(|n| self.qualify(&n))?;
        let mut selector = None;
        let mut fields = Vec::new();
        let mut malformed = false;
        for child in self.children(node) {
            let Some(xpath) = child.attribute(xsd_attrs::XPATH) else {
                self.report(
                    child,
                    ViolationCode::IdentityConstraintMalformed,
                    format!("<{}> requires 'xpath'", child.tag_name().name()),
                );
                malformed = true;
                continue;
            };
            let ctx = namespace_context(child);
            match child.tag_name().name() {
                xsd_elements::SELECTOR if selector.is_none() && fields.is_empty() => {
                    match Selector::parse(xpath, &ctx) {
                        Ok(s) => selector = Some(s),
                        Err(e) => {
                            self.report(child, ViolationCode::IdentityConstraintMalformed, e.to_string());
                            malformed = true;
                        }
                    }
                }
                xsd_elements::FIELD if selector.is_some() || malformed => match FieldPath::parse(xpath, &ctx) {
                    Ok(f) => fields.push(f),
                    Err(e) => {
                        self.report(child, ViolationCode::IdentityConstraintMalformed, e.to_string());
                        malformed = true;
                    }
                },
                other => {
                    self.report(
                        child,
                        ViolationCode::IdentityConstraintMalformed,
                        format!("unexpected <{}> in <{}>", other, node.tag_name().name()),
                    );
                    malformed = true;
                }
            }
        }
        let refer = match (kind, node.attribute(xsd_attrs::REFER)) {
            (IdentityKind::KeyRef, Some(lexical)) => {
                Some(self.reference(node, lexical, GlobalKind::IdentityConstraint)?)
            }
            (IdentityKind::KeyRef, None) => {
                self.report(node, ViolationCode::IdentityConstraintMalformed, "<keyref> requires 'refer'");
                return None;
            }
            _ => None,
        };
        if malformed {
            return None;
        }
        let Some(selector) = selector else {
            self.report(node, ViolationCode::IdentityConstraintMalformed, format!("'{}' has no selector", name));
            return None;
        };
        if fields.is_empty() {
            self.report(node, ViolationCode::IdentityConstraintMalformed, format!("'{}' has no field", name));
            return None;
        }
        if self.set.identity_names.contains_key(&name) {
            self.report(
                node,
                ViolationCode::DuplicateGlobal,
                format!("duplicate identity constraint '{}'", name),
            );
            return None;
        }
        let pos = self.pos(node);
        let id = self.set.add_identity(IdentityConstraint {
            name: name.clone(),
            kind,
            selector,
            fields,
            refer,
            referenced: None,
            owner,
            pos,
        });
        self.set.identity_names.insert(name, id);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> (ComponentSet, ViolationList, Vec<Directive>) {
        let mut set = ComponentSet::new();
        let mut violations = ViolationList::new(0);
        let doc = Document::parse(text).unwrap();
        let tns = doc
            .root_element()
            .attribute("targetNamespace")
            .map(str::to_string);
        let directives = parse_schema_document(
            &mut set,
            &mut violations,
            &doc,
            text,
            DocumentTarget {
                origin: Arc::from("test.xsd"),
                target_namespace: tns,
                chameleon: false,
            },
        );
        (set, violations, directives)
    }

    #[test]
    fn test_parse_globals() {
        let (set, violations, _) = parse(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" targetNamespace="urn:t" xmlns:t="urn:t">
                 <xs:element name="person" type="t:personType"/>
                 <xs:complexType name="personType">
                   <xs:sequence>
                     <xs:element name="name" type="xs:string"/>
                     <xs:element name="age" type="xs:integer" minOccurs="0"/>
                   </xs:sequence>
                   <xs:attribute name="id" type="xs:ID" use="required"/>
                 </xs:complexType>
                 <xs:simpleType name="code">
                   <xs:restriction base="xs:string"><xs:length value="3"/></xs:restriction>
                 </xs:simpleType>
               </xs:schema>"#,
        );
        assert!(violations.is_empty(), "{:?}", violations.as_slice());
        let person = set.element_names[&QName::namespaced("urn:t", "person")];
        assert_eq!(
            set.element(person).type_ref,
            TypeRef::Named(QName::namespaced("urn:t", "personType"))
        );
        let ty = set.type_names[&QName::namespaced("urn:t", "personType")];
        let def = set.complex(ty).unwrap();
        assert_eq!(def.attribute_decls.len(), 1);
        match &def.model {
            ContentDecl::Complex { particle: Some(p) } => match &p.term {
                Term::Group(g) => assert_eq!(g.particles.len(), 2),
                other => panic!("unexpected term {:?}", other),
            },
            other => panic!("unexpected model {:?}", other),
        }
        // local elements are unqualified by default
        let name_decl = set.elements.iter().find(|e| e.name.local_name == "name").unwrap();
        assert_eq!(name_decl.name, QName::local("name"));
        assert!(set.type_names.contains_key(&QName::namespaced("urn:t", "code")));
    }

    #[test]
    fn test_duplicate_global() {
        let (_, violations, _) = parse(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
                 <xs:element name="a" type="xs:string"/>
                 <xs:element name="a" type="xs:int"/>
               </xs:schema>"#,
        );
        assert!(violations.has_code(ViolationCode::DuplicateGlobal));
    }

    #[test]
    fn test_directives_and_redefine() {
        let (set, violations, directives) = parse(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" targetNamespace="urn:a">
                 <xs:include schemaLocation="b.xsd"/>
                 <xs:import namespace="urn:c" schemaLocation="c.xsd"/>
                 <xs:redefine schemaLocation="d.xsd"/>
               </xs:schema>"#,
        );
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].kind, DirectiveKind::Include);
        assert_eq!(directives[1].namespace.as_deref(), Some("urn:c"));
        assert!(violations.has_code(ViolationCode::SchemaParse));
        assert!(set.documents["test.xsd"].imports.contains("urn:c"));
    }

    #[test]
    fn test_identity_constraints() {
        let (set, violations, _) = parse(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
                 <xs:element name="root">
                   <xs:complexType><xs:sequence>
                     <xs:element name="item" maxOccurs="unbounded"/>
                   </xs:sequence></xs:complexType>
                   <xs:key name="itemKey"><xs:selector xpath="item"/><xs:field xpath="@id"/></xs:key>
                   <xs:keyref name="itemRef" refer="itemKey"><xs:selector xpath="item"/><xs:field xpath="@ref"/></xs:keyref>
                   <xs:unique name="broken"><xs:selector xpath="item/@id"/><xs:field xpath="@id"/></xs:unique>
                 </xs:element>
               </xs:schema>"#,
        );
        assert_eq!(set.identities.len(), 2);
        assert_eq!(set.identities[1].refer, Some(QName::local("itemKey")));
        assert_eq!(violations.count_code(ViolationCode::IdentityConstraintMalformed), 1);
    }

    #[test]
    fn test_occurs_errors() {
        let (_, violations, _) = parse(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
                 <xs:complexType name="t"><xs:sequence>
                   <xs:element name="a" minOccurs="3" maxOccurs="2"/>
                 </xs:sequence></xs:complexType>
               </xs:schema>"#,
        );
        assert!(violations.has_code(ViolationCode::SchemaParse));
    }

    #[test]
    fn test_captured_namespace_context() {
        let (set, _, _) = parse(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:p="urn:p">
                 <xs:element name="q" type="xs:QName" default="p:thing"/>
               </xs:schema>"#,
        );
        let id = set.element_names[&QName::local("q")];
        let default = set.element(id).default.as_ref().unwrap();
        assert_eq!(default.ns.get_namespace("p"), Some("urn:p"));
    }
}
