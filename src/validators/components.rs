//! Schema component model
//!
//! Components live in arenas owned by a [`ComponentSet`] and refer to each
//! other by index (`TypeId`, `ElemId`, ...) or, before resolution, by
//! expanded name. Anonymous types get an arena slot like any other type, so
//! their identity is their index. Built-in types occupy the first slots, at
//! the index of [`Builtin::index`].

use crate::namespaces::{NamespaceContext, QName, XSD_NAMESPACE};
use crate::validators::builtins::Builtin;
use crate::validators::exceptions::SourcePos;
use crate::validators::facets::{FacetKind, FacetSet, WhiteSpace};
use crate::validators::particles::{Occurs, Particle, Term};
use crate::validators::wildcards::Wildcard;
use crate::xpath::{FieldPath, Selector};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Index of a type definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub usize);

/// Index of an element declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElemId(pub usize);

/// Index of an attribute declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrId(pub usize);

/// Index of an identity constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdcId(pub usize);

// =============================================================================
// Derivation control
// =============================================================================

/// How a type is derived from its base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationMethod {
    /// `<restriction>`
    Restriction,
    /// `<extension>`
    Extension,
}

impl DerivationMethod {
    /// Matching flag in a [`DerivationSet`]
    pub fn flag(&self) -> DerivationSet {
        match self {
            DerivationMethod::Restriction => DerivationSet::RESTRICTION,
            DerivationMethod::Extension => DerivationSet::EXTENSION,
        }
    }
}

/// A `final` / `block` value: a set of derivation methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DerivationSet(u8);

impl DerivationSet {
    /// `extension`
    pub const EXTENSION: DerivationSet = DerivationSet(1);
    /// `restriction`
    pub const RESTRICTION: DerivationSet = DerivationSet(2);
    /// `substitution`
    pub const SUBSTITUTION: DerivationSet = DerivationSet(4);
    /// `list`
    pub const LIST: DerivationSet = DerivationSet(8);
    /// `union`
    pub const UNION: DerivationSet = DerivationSet(16);

    /// The empty set
    pub fn empty() -> Self {
        DerivationSet(0)
    }

    /// Whether no method is in the set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Whether every flag of `other` is in the set
    pub fn contains(&self, other: DerivationSet) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Union of two sets
    pub fn union(self, other: DerivationSet) -> DerivationSet {
        DerivationSet(self.0 | other.0)
    }

    /// Parse a `final`/`block` attribute; `allowed` is the set `#all` means
    pub fn parse(value: &str, allowed: DerivationSet) -> Option<DerivationSet> {
        let value = value.trim();
        if value == "#all" {
            return Some(allowed);
        }
        let mut set = DerivationSet::empty();
        for token in value.split_whitespace() {
            let flag = match token {
                "extension" => DerivationSet::EXTENSION,
                "restriction" => DerivationSet::RESTRICTION,
                "substitution" => DerivationSet::SUBSTITUTION,
                "list" => DerivationSet::LIST,
                "union" => DerivationSet::UNION,
                _ => return None,
            };
            if !allowed.contains(flag) {
                return None;
            }
            set = set.union(flag);
        }
        Some(set)
    }
}

// =============================================================================
// Type definitions
// =============================================================================

/// A link to a type definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    /// Known only by name (before resolution)
    Named(QName),
    /// Resolved
    Id(TypeId),
    /// Names nothing (already reported)
    Dangling(QName),
    /// No type given
    Unspecified,
}

impl TypeRef {
    /// The resolved type, if any
    pub fn id(&self) -> Option<TypeId> {
        match self {
            TypeRef::Id(id) => Some(*id),
            _ => None,
        }
    }
}

/// Varieties of simple types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variety {
    /// Atomic values
    Atomic,
    /// Whitespace-separated lists of an item type
    List,
    /// Values of any member type
    Union,
}

/// How a user-defined simple type is built
#[derive(Debug, Clone)]
pub enum SimpleDerivation {
    /// `<restriction base="...">`
    Restriction {
        /// Base type
        base: TypeRef,
    },
    /// `<list itemType="...">`
    List {
        /// Item type
        item: TypeRef,
    },
    /// `<union memberTypes="...">`
    Union {
        /// Member types in declaration order
        members: Vec<TypeRef>,
    },
}

/// A facet as written, before it is parsed in the base type's value space
#[derive(Debug, Clone)]
pub struct RawFacet {
    /// Which facet
    pub kind: FacetKind,
    /// The `value` attribute
    pub value: String,
    /// `fixed="true"`
    pub fixed: bool,
    /// Bindings in scope at the facet element
    pub ns: NamespaceContext,
    /// Where the facet was written
    pub pos: SourcePos,
}

/// A user-defined simple type
#[derive(Debug, Clone)]
pub struct SimpleTypeDef {
    /// Name (anonymous types have none)
    pub name: Option<QName>,
    /// Restriction, list or union
    pub derivation: SimpleDerivation,
    /// Facets as written
    pub raw_facets: Vec<RawFacet>,
    /// Facets compiled by the checker
    pub facets: FacetSet,
    /// Effective whiteSpace, filled in by the resolver
    pub white_space: WhiteSpace,
    /// Variety, filled in by the resolver
    pub variety: Variety,
    /// `final`
    pub final_: DerivationSet,
    /// Where the type was defined
    pub pos: SourcePos,
}

/// Content of a complex type as written
#[derive(Debug, Clone)]
pub enum ContentDecl {
    /// Element content (`complexContent` or the shorthand form)
    Complex {
        /// The content particle, if any
        particle: Option<Particle>,
    },
    /// `simpleContent/extension`
    SimpleExtension,
    /// `simpleContent/restriction`
    SimpleRestriction {
        /// Inline `<simpleType>` of the restriction
        inline: Option<TypeId>,
        /// Facets of the restriction
        facets: Vec<RawFacet>,
    },
}

/// Resolved content type of a complex type
#[derive(Debug, Clone)]
pub enum ContentType {
    /// No element or character children
    Empty,
    /// Character content of a simple type
    Simple(TypeId),
    /// Element children only
    ElementOnly(Particle),
    /// Elements interleaved with character data
    Mixed(Particle),
}

impl ContentType {
    /// The content particle
    pub fn particle(&self) -> Option<&Particle> {
        match self {
            ContentType::ElementOnly(p) | ContentType::Mixed(p) => Some(p),
            _ => None,
        }
    }
}

/// `use` of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributeUseKind {
    /// `optional` (default)
    #[default]
    Optional,
    /// `required`
    Required,
    /// `prohibited`
    Prohibited,
}

/// What an attribute use points at
#[derive(Debug, Clone)]
pub enum AttrTarget {
    /// A local declaration
    Local(AttrId),
    /// `ref="..."` to a global declaration
    Ref(QName),
}

/// An attribute use as written in a type or attribute group
#[derive(Debug, Clone)]
pub struct AttributeUseDecl {
    /// The declaration used
    pub target: AttrTarget,
    /// `use`
    pub use_kind: AttributeUseKind,
    /// `default` on the use
    pub default: Option<ValueConstraint>,
    /// `fixed` on the use
    pub fixed: Option<ValueConstraint>,
    /// Where the use was written
    pub pos: SourcePos,
}

/// An attribute use in a type's resolved attribute table
#[derive(Debug, Clone)]
pub struct AttributeUse {
    /// Expanded attribute name
    pub name: QName,
    /// Declaration
    pub decl: AttrId,
    /// `use="required"`
    pub required: bool,
    /// Effective default
    pub default: Option<ValueConstraint>,
    /// Effective fixed value
    pub fixed: Option<ValueConstraint>,
    /// Where the use was written
    pub pos: SourcePos,
}

/// A complex type definition
#[derive(Debug, Clone)]
pub struct ComplexTypeDef {
    /// Name (anonymous types have none)
    pub name: Option<QName>,
    /// Base type (`xs:anyType` when implicit)
    pub base: TypeRef,
    /// Derivation method from the base
    pub method: DerivationMethod,
    /// `mixed`
    pub mixed: bool,
    /// `abstract`
    pub abstract_: bool,
    /// `block`
    pub block: DerivationSet,
    /// `final`
    pub final_: DerivationSet,
    /// Content as written
    pub model: ContentDecl,
    /// Attribute uses as written
    pub attribute_decls: Vec<AttributeUseDecl>,
    /// `<attributeGroup ref>` uses
    pub attribute_group_refs: Vec<(QName, SourcePos)>,
    /// `<anyAttribute>`
    pub any_attribute: Option<Wildcard>,
    /// Resolved content
    pub content: ContentType,
    /// Resolved attribute table, sorted by name, prohibited uses removed
    pub attributes: Vec<AttributeUse>,
    /// Resolved attribute wildcard
    pub attribute_wildcard: Option<Wildcard>,
    /// Where the type was defined
    pub pos: SourcePos,
}

impl ComplexTypeDef {
    /// Find an attribute use by name
    pub fn attribute(&self, name: &QName) -> Option<&AttributeUse> {
        self.attributes
            .binary_search_by(|u| u.name.cmp(name))
            .ok()
            .map(|i| &self.attributes[i])
    }
}

/// A type definition
#[derive(Debug, Clone)]
pub enum TypeDef {
    /// Built-in type
    Builtin(Builtin),
    /// User-defined simple type
    Simple(SimpleTypeDef),
    /// Complex type
    Complex(ComplexTypeDef),
}

impl TypeDef {
    /// Declared name, if any
    pub fn name(&self) -> Option<QName> {
        match self {
            TypeDef::Builtin(b) => Some(b.qname()),
            TypeDef::Simple(s) => s.name.clone(),
            TypeDef::Complex(c) => c.name.clone(),
        }
    }

    /// Whether the definition is a simple type
    pub fn is_simple(&self) -> bool {
        match self {
            TypeDef::Builtin(b) => b.is_simple(),
            TypeDef::Simple(_) => true,
            TypeDef::Complex(_) => false,
        }
    }
}

// =============================================================================
// Declarations
// =============================================================================

/// A default or fixed value with the bindings of the place it was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueConstraint {
    /// Lexical form
    pub lexical: String,
    /// Namespace bindings in scope
    pub ns: NamespaceContext,
}

/// An element declaration
#[derive(Debug, Clone)]
pub struct ElementDecl {
    /// Expanded name
    pub name: QName,
    /// Type
    pub type_ref: TypeRef,
    /// Whether `type` or an inline type was given
    pub type_explicit: bool,
    /// `nillable`
    pub nillable: bool,
    /// `default`
    pub default: Option<ValueConstraint>,
    /// `fixed`
    pub fixed: Option<ValueConstraint>,
    /// `abstract`
    pub abstract_: bool,
    /// `block`
    pub block: DerivationSet,
    /// `final`
    pub final_: DerivationSet,
    /// `substitutionGroup` as written
    pub substitution_head: Option<QName>,
    /// Resolved substitution-group head
    pub head: Option<ElemId>,
    /// Owned identity constraints
    pub identity_constraints: Vec<IdcId>,
    /// Whether this is a global declaration
    pub global: bool,
    /// Where the declaration was written
    pub pos: SourcePos,
}

/// An attribute declaration
#[derive(Debug, Clone)]
pub struct AttributeDecl {
    /// Expanded name
    pub name: QName,
    /// Simple type
    pub type_ref: TypeRef,
    /// `default`
    pub default: Option<ValueConstraint>,
    /// `fixed`
    pub fixed: Option<ValueConstraint>,
    /// Whether this is a global declaration
    pub global: bool,
    /// Where the declaration was written
    pub pos: SourcePos,
}

/// A named model group
#[derive(Debug, Clone)]
pub struct ModelGroupDef {
    /// Expanded name
    pub name: QName,
    /// The group's top-level particle
    pub particle: Particle,
    /// Where the group was defined
    pub pos: SourcePos,
}

/// Attribute uses and wildcard after attribute-group resolution
#[derive(Debug, Clone, Default)]
pub struct ResolvedAttributes {
    /// Uses, in declaration order
    pub uses: Vec<AttributeUse>,
    /// Prohibited names
    pub prohibited: Vec<QName>,
    /// Intersected wildcard
    pub wildcard: Option<Wildcard>,
}

/// A named attribute group
#[derive(Debug, Clone)]
pub struct AttributeGroupDef {
    /// Expanded name
    pub name: QName,
    /// Uses as written
    pub uses: Vec<AttributeUseDecl>,
    /// Nested group references
    pub group_refs: Vec<(QName, SourcePos)>,
    /// `<anyAttribute>`
    pub any_attribute: Option<Wildcard>,
    /// Filled in by the resolver
    pub resolved: Option<ResolvedAttributes>,
    /// Where the group was defined
    pub pos: SourcePos,
}

/// A notation declaration
#[derive(Debug, Clone)]
pub struct Notation {
    /// Expanded name
    pub name: QName,
    /// `public`
    pub public: Option<String>,
    /// `system`
    pub system: Option<String>,
    /// Where the notation was declared
    pub pos: SourcePos,
}

/// Kinds of identity constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    /// `<unique>`
    Unique,
    /// `<key>`
    Key,
    /// `<keyref>`
    KeyRef,
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IdentityKind::Unique => "unique",
            IdentityKind::Key => "key",
            IdentityKind::KeyRef => "keyref",
        })
    }
}

/// An identity constraint
#[derive(Debug, Clone)]
pub struct IdentityConstraint {
    /// Expanded name
    pub name: QName,
    /// unique / key / keyref
    pub kind: IdentityKind,
    /// Compiled selector
    pub selector: Selector,
    /// Compiled fields
    pub fields: Vec<FieldPath>,
    /// `refer` as written (keyrefs)
    pub refer: Option<QName>,
    /// Resolved referenced key or unique
    pub referenced: Option<IdcId>,
    /// Declaring element
    pub owner: ElemId,
    /// Where the constraint was written
    pub pos: SourcePos,
}

// =============================================================================
// Component set
// =============================================================================

/// Kinds of global components, for diagnostics and duplicate detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GlobalKind {
    /// Type definition
    Type,
    /// Element declaration
    Element,
    /// Attribute declaration
    Attribute,
    /// Model group
    Group,
    /// Attribute group
    AttributeGroup,
    /// Notation
    Notation,
    /// Identity constraint
    IdentityConstraint,
}

impl fmt::Display for GlobalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GlobalKind::Type => "type",
            GlobalKind::Element => "element",
            GlobalKind::Attribute => "attribute",
            GlobalKind::Group => "group",
            GlobalKind::AttributeGroup => "attribute group",
            GlobalKind::Notation => "notation",
            GlobalKind::IdentityConstraint => "identity constraint",
        })
    }
}

/// What the loader learned about one schema document
#[derive(Debug, Clone, Default)]
pub struct DocumentInfo {
    /// Effective target namespaces (a chameleon may be stamped with several)
    pub target_namespaces: BTreeSet<String>,
    /// Namespaces imported by the document
    pub imports: BTreeSet<String>,
    /// Documents that include this one
    pub includers: BTreeSet<String>,
}

/// A cross-component QName reference, checked against import visibility
#[derive(Debug, Clone)]
pub struct ReferenceSite {
    /// Referenced name
    pub name: QName,
    /// Kind of component referenced
    pub kind: GlobalKind,
    /// Where the reference was written (its origin is the document)
    pub pos: SourcePos,
}

/// The flat collection of components assembled from a set of documents
#[derive(Debug, Clone)]
pub struct ComponentSet {
    /// Type arena (built-ins first)
    pub types: Vec<TypeDef>,
    /// Element arena (globals and locals)
    pub elements: Vec<ElementDecl>,
    /// Attribute arena (globals and locals)
    pub attributes: Vec<AttributeDecl>,
    /// Identity constraint arena
    pub identities: Vec<IdentityConstraint>,
    /// Global type names
    pub type_names: BTreeMap<QName, TypeId>,
    /// Global element names
    pub element_names: BTreeMap<QName, ElemId>,
    /// Global attribute names
    pub attribute_names: BTreeMap<QName, AttrId>,
    /// Identity constraint names
    pub identity_names: BTreeMap<QName, IdcId>,
    /// Named model groups
    pub groups: BTreeMap<QName, ModelGroupDef>,
    /// Named attribute groups
    pub attribute_groups: BTreeMap<QName, AttributeGroupDef>,
    /// Notations
    pub notations: BTreeMap<QName, Notation>,
    /// Per-document load information, keyed by origin
    pub documents: BTreeMap<String, DocumentInfo>,
    /// Every QName reference to a global component
    pub references: Vec<ReferenceSite>,
    /// Direct substitution-group members per head
    pub substitution_members: BTreeMap<ElemId, Vec<ElemId>>,
    /// Source text of each global, for the identical-redeclaration rule
    global_sources: HashMap<(GlobalKind, QName), Arc<str>>,
}

impl Default for ComponentSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentSet {
    /// Create a set holding only the built-in types
    pub fn new() -> Self {
        let types: Vec<TypeDef> = Builtin::ALL.iter().map(|b| TypeDef::Builtin(*b)).collect();
        let type_names = Builtin::ALL
            .iter()
            .map(|b| (b.qname(), TypeId(b.index())))
            .collect();
        Self {
            types,
            elements: Vec::new(),
            attributes: Vec::new(),
            identities: Vec::new(),
            type_names,
            element_names: BTreeMap::new(),
            attribute_names: BTreeMap::new(),
            identity_names: BTreeMap::new(),
            groups: BTreeMap::new(),
            attribute_groups: BTreeMap::new(),
            notations: BTreeMap::new(),
            documents: BTreeMap::new(),
            references: Vec::new(),
            substitution_members: BTreeMap::new(),
            global_sources: HashMap::new(),
        }
    }

    /// Arena slot of a built-in
    pub fn builtin(b: Builtin) -> TypeId {
        TypeId(b.index())
    }

    /// Type definition
    pub fn type_def(&self, id: TypeId) -> &TypeDef {
        &self.types[id.0]
    }

    /// Element declaration
    pub fn element(&self, id: ElemId) -> &ElementDecl {
        &self.elements[id.0]
    }

    /// Attribute declaration
    pub fn attribute(&self, id: AttrId) -> &AttributeDecl {
        &self.attributes[id.0]
    }

    /// Identity constraint
    pub fn identity(&self, id: IdcId) -> &IdentityConstraint {
        &self.identities[id.0]
    }

    /// Complex type definition, if `id` is one
    pub fn complex(&self, id: TypeId) -> Option<&ComplexTypeDef> {
        match self.type_def(id) {
            TypeDef::Complex(c) => Some(c),
            _ => None,
        }
    }

    /// Add a type to the arena
    pub fn add_type(&mut self, def: TypeDef) -> TypeId {
        self.types.push(def);
        TypeId(self.types.len() - 1)
    }

    /// Add an element declaration to the arena
    pub fn add_element(&mut self, decl: ElementDecl) -> ElemId {
        self.elements.push(decl);
        ElemId(self.elements.len() - 1)
    }

    /// Add an attribute declaration to the arena
    pub fn add_attribute(&mut self, decl: AttributeDecl) -> AttrId {
        self.attributes.push(decl);
        AttrId(self.attributes.len() - 1)
    }

    /// Add an identity constraint to the arena
    pub fn add_identity(&mut self, idc: IdentityConstraint) -> IdcId {
        self.identities.push(idc);
        IdcId(self.identities.len() - 1)
    }

    /// Record the source of a global. Returns `Ok(true)` for a new name,
    /// `Ok(false)` when an identical declaration is already present and
    /// `Err(())` for a conflicting duplicate.
    pub fn claim_global(
        &mut self,
        kind: GlobalKind,
        name: &QName,
        source: &str,
    ) -> std::result::Result<bool, ()> {
        let key = (kind, name.clone());
        match self.global_sources.get(&key) {
            Some(existing) if existing.as_ref() == source => Ok(false),
            Some(_) => Err(()),
            None => {
                self.global_sources.insert(key, Arc::from(source));
                Ok(true)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Walk order
    // -------------------------------------------------------------------------

    /// User-defined types: named globals in QName order, then anonymous
    /// types in definition order
    pub fn type_order(&self) -> Vec<TypeId> {
        let named = self.type_names.values().copied().filter(|id| id.0 >= Builtin::ALL.len());
        walk_order(named, (Builtin::ALL.len()..self.types.len()).map(TypeId))
    }

    /// Global elements in QName order, then local declarations
    pub fn element_order(&self) -> Vec<ElemId> {
        walk_order(self.element_names.values().copied(), (0..self.elements.len()).map(ElemId))
    }

    /// Global attributes in QName order, then local declarations
    pub fn attribute_order(&self) -> Vec<AttrId> {
        walk_order(self.attribute_names.values().copied(), (0..self.attributes.len()).map(AttrId))
    }

    /// Identity constraints in QName order
    pub fn identity_order(&self) -> Vec<IdcId> {
        walk_order(self.identity_names.values().copied(), (0..self.identities.len()).map(IdcId))
    }

    /// Human-readable name of a type
    pub fn type_name(&self, id: TypeId) -> String {
        match self.type_def(id) {
            TypeDef::Builtin(b) => b.to_string(),
            def => def
                .name()
                .map(|n| n.to_string())
                .unwrap_or_else(|| format!("anonymous type #{}", id.0)),
        }
    }

    // -------------------------------------------------------------------------
    // Derivation
    // -------------------------------------------------------------------------

    /// Base type and the method of the step deriving `id` from it
    pub fn base_step(&self, id: TypeId) -> Option<(TypeId, DerivationMethod)> {
        match self.type_def(id) {
            TypeDef::Builtin(b) => b
                .base()
                .map(|base| (Self::builtin(base), DerivationMethod::Restriction)),
            TypeDef::Simple(s) => match &s.derivation {
                SimpleDerivation::Restriction { base } => {
                    base.id().map(|b| (b, DerivationMethod::Restriction))
                }
                _ => Some((Self::builtin(Builtin::AnySimpleType), DerivationMethod::Restriction)),
            },
            TypeDef::Complex(c) => c.base.id().map(|b| (b, c.method)),
        }
    }

    /// Base type
    pub fn base_of(&self, id: TypeId) -> Option<TypeId> {
        self.base_step(id).map(|(b, _)| b)
    }

    /// Methods used on the chain from `derived` up to `base`, or `None` if
    /// `base` is not an ancestor
    pub fn derivation_methods(&self, derived: TypeId, base: TypeId) -> Option<DerivationSet> {
        let mut methods = DerivationSet::empty();
        let mut current = derived;
        let mut steps = 0;
        while current != base {
            let (next, method) = self.base_step(current)?;
            methods = methods.union(method.flag());
            current = next;
            steps += 1;
            if steps > self.types.len() {
                return None;
            }
        }
        Some(methods)
    }

    /// Whether `derived` is validly derived from `base` without using any
    /// method in `blocked`. Union bases admit their members' derivations.
    pub fn is_derived_from(&self, derived: TypeId, base: TypeId, blocked: DerivationSet) -> bool {
        if derived == base {
            return true;
        }
        if base == Self::builtin(Builtin::AnyType) {
            return !self.derivation_methods(derived, base).is_some_and(|m| blocked_any(m, blocked));
        }
        if let Some(methods) = self.derivation_methods(derived, base) {
            return !blocked_any(methods, blocked);
        }
        if let TypeDef::Simple(SimpleTypeDef {
            derivation: SimpleDerivation::Union { members },
            ..
        }) = self.type_def(base)
        {
            if !self.derivation_methods(base, Self::builtin(Builtin::AnySimpleType)).is_some() {
                return false;
            }
            return members
                .iter()
                .filter_map(TypeRef::id)
                .any(|m| m != base && self.is_derived_from(derived, m, blocked));
        }
        false
    }

    /// Whether the type is simple
    pub fn is_simple(&self, id: TypeId) -> bool {
        self.type_def(id).is_simple()
    }

    /// The simple type governing character content, if any
    pub fn simple_content_type(&self, id: TypeId) -> Option<TypeId> {
        match self.type_def(id) {
            TypeDef::Builtin(Builtin::AnyType) => None,
            TypeDef::Builtin(_) | TypeDef::Simple(_) => Some(id),
            TypeDef::Complex(c) => match c.content {
                ContentType::Simple(t) => Some(t),
                _ => None,
            },
        }
    }

    /// Variety of a simple type
    pub fn variety(&self, id: TypeId) -> Variety {
        match self.type_def(id) {
            TypeDef::Builtin(b) if b.is_list() => Variety::List,
            TypeDef::Simple(s) => s.variety,
            _ => Variety::Atomic,
        }
    }

    /// Nearest built-in ancestor
    pub fn builtin_ancestor(&self, id: TypeId) -> Option<Builtin> {
        let mut current = id;
        for _ in 0..=self.types.len() {
            if let TypeDef::Builtin(b) = self.type_def(current) {
                return Some(*b);
            }
            current = self.base_of(current)?;
        }
        None
    }

    /// Primitive built-in of an atomic type
    pub fn primitive_builtin(&self, id: TypeId) -> Option<Builtin> {
        if self.variety(id) != Variety::Atomic {
            return None;
        }
        self.builtin_ancestor(id).and_then(|b| b.primitive())
    }

    /// Item type of a list type
    pub fn list_item(&self, id: TypeId) -> Option<TypeId> {
        let mut current = id;
        for _ in 0..=self.types.len() {
            match self.type_def(current) {
                TypeDef::Builtin(b) => return b.list_item().map(Self::builtin),
                TypeDef::Simple(s) => match &s.derivation {
                    SimpleDerivation::List { item } => return item.id(),
                    SimpleDerivation::Restriction { base } => current = base.id()?,
                    SimpleDerivation::Union { .. } => return None,
                },
                TypeDef::Complex(_) => return None,
            }
        }
        None
    }

    /// Member types of a union type
    pub fn union_members(&self, id: TypeId) -> Vec<TypeId> {
        let mut current = id;
        for _ in 0..=self.types.len() {
            match self.type_def(current) {
                TypeDef::Simple(s) => match &s.derivation {
                    SimpleDerivation::Union { members } => {
                        return members.iter().filter_map(TypeRef::id).collect()
                    }
                    SimpleDerivation::Restriction { base } => match base.id() {
                        Some(b) => current = b,
                        None => return Vec::new(),
                    },
                    SimpleDerivation::List { .. } => return Vec::new(),
                },
                _ => return Vec::new(),
            }
        }
        Vec::new()
    }

    /// Effective whiteSpace of a simple type
    pub fn white_space(&self, id: TypeId) -> WhiteSpace {
        match self.type_def(id) {
            TypeDef::Builtin(b) => b.white_space(),
            TypeDef::Simple(s) => s.white_space,
            TypeDef::Complex(_) => WhiteSpace::Preserve,
        }
    }

    /// Whether the type is `xs:ID` or derived from it
    pub fn is_id_type(&self, id: TypeId) -> bool {
        self.derivation_methods(id, Self::builtin(Builtin::Id)).is_some()
    }

    /// ID/IDREF role of values of a simple type
    pub fn id_class(&self, id: TypeId) -> IdClass {
        if self.is_id_type(id) {
            IdClass::Id
        } else if self.derivation_methods(id, Self::builtin(Builtin::IdRef)).is_some() {
            IdClass::IdRef
        } else if self.variety(id) == Variety::List
            && self
                .list_item(id)
                .is_some_and(|item| self.derivation_methods(item, Self::builtin(Builtin::IdRef)).is_some())
        {
            IdClass::IdRefs
        } else {
            IdClass::None
        }
    }

    /// The elements that may appear where `head` is expected, in name order
    ///
    /// Includes `head` itself unless abstract; members are filtered through
    /// the head's `block` and its type's `block`.
    pub fn substitutable(&self, head: ElemId) -> Vec<ElemId> {
        let head_decl = self.element(head);
        let mut blocked = head_decl.block;
        if let Some(c) = head_decl.type_ref.id().and_then(|t| self.complex(t)) {
            blocked = blocked.union(c.block);
        }
        let mut result = Vec::new();
        if !head_decl.abstract_ {
            result.push(head);
        }
        if blocked.contains(DerivationSet::SUBSTITUTION) {
            return result;
        }
        let head_type = head_decl.type_ref.id();
        let mut seen: BTreeSet<ElemId> = [head].into_iter().collect();
        let mut stack: Vec<ElemId> = self.substitution_members.get(&head).cloned().unwrap_or_default();
        while let Some(member) = stack.pop() {
            if !seen.insert(member) {
                continue;
            }
            let decl = self.element(member);
            let allowed = match (decl.type_ref.id(), head_type) {
                (Some(t), Some(h)) => self.is_derived_from(t, h, blocked),
                _ => false,
            };
            if allowed && !decl.abstract_ {
                result.push(member);
            }
            if allowed {
                if let Some(nested) = self.substitution_members.get(&member) {
                    stack.extend(nested.iter().copied());
                }
            }
        }
        result.sort_by(|a, b| self.element(*a).name.cmp(&self.element(*b).name));
        result
    }

    /// Content particle of `xs:anyType`
    pub fn any_type_particle(pos: SourcePos) -> Particle {
        Particle::new(Occurs::zero_or_more(), Term::Any(Wildcard::any_lax()), pos)
    }

    /// Whether a namespace is the XSD namespace
    pub fn is_xsd_namespace(ns: Option<&str>) -> bool {
        ns == Some(XSD_NAMESPACE)
    }
}

/// `named` first, then every other index of `all` in arena order
fn walk_order<T: Copy + Ord>(named: impl Iterator<Item = T>, all: impl Iterator<Item = T>) -> Vec<T> {
    let mut order: Vec<T> = named.collect();
    let seen: BTreeSet<T> = order.iter().copied().collect();
    order.extend(all.filter(|id| !seen.contains(id)));
    order
}

fn blocked_any(methods: DerivationSet, blocked: DerivationSet) -> bool {
    (methods.contains(DerivationSet::EXTENSION) && blocked.contains(DerivationSet::EXTENSION))
        || (methods.contains(DerivationSet::RESTRICTION) && blocked.contains(DerivationSet::RESTRICTION))
}

/// ID/IDREF role of a simple type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdClass {
    /// Neither
    None,
    /// `xs:ID`
    Id,
    /// `xs:IDREF`
    IdRef,
    /// A list of `xs:IDREF`
    IdRefs,
}
