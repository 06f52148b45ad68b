//! Reference Resolution
//!
//! Links the symbolic references left by the parser to arena indices and
//! fills in everything derived from them: simple type varieties and
//! whitespace, complex content types, attribute tables and wildcards,
//! substitution-group membership and keyref targets.
//!
//! Unresolvable names are reported once and the reference becomes
//! [`TypeRef::Dangling`] (or is dropped), so later phases can skip it.

use std::collections::{BTreeMap, BTreeSet};

use super::builtins::Builtin;
use super::components::{
    AttrTarget, AttributeUse, AttributeUseDecl, AttributeUseKind, ComplexTypeDef, ComponentSet,
    AttrId, ContentDecl, ContentType, DerivationMethod, DerivationSet, ElemId, IdcId, ResolvedAttributes,
    SimpleDerivation, SimpleTypeDef, TypeDef, TypeId, TypeRef, Variety,
};
use super::exceptions::{SourcePos, Violation, ViolationCode, ViolationList};
use super::facets::{FacetKind, FacetSet, WhiteSpace};
use super::particles::{Compositor, ModelGroup, Occurs, Particle, Term};
use super::wildcards::Wildcard;
use crate::namespaces::QName;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Pending,
    Active,
    Done,
}

/// Resolve every reference in `set`
pub fn resolve(set: &mut ComponentSet, violations: &mut ViolationList) {
    let mut resolver = Resolver {
        state: vec![Visit::Pending; set.types.len()],
        set,
        violations,
        group_cache: BTreeMap::new(),
        group_stack: Vec::new(),
        attribute_group_stack: Vec::new(),
    };
    resolver.link_type_references();
    resolver.resolve_simple_types();
    resolver.resolve_complex_types();
    resolver.resolve_groups();
    resolver.resolve_elements();
    resolver.resolve_attributes();
    resolver.resolve_attribute_groups();
    resolver.resolve_identities();
    log::debug!(
        "resolved {} types, {} elements, {} attributes",
        resolver.set.types.len(),
        resolver.set.elements.len(),
        resolver.set.attributes.len()
    );
}

struct Resolver<'a> {
    set: &'a mut ComponentSet,
    violations: &'a mut ViolationList,
    state: Vec<Visit>,
    group_cache: BTreeMap<QName, Option<Particle>>,
    group_stack: Vec<QName>,
    attribute_group_stack: Vec<QName>,
}

/// An empty `<sequence/>`
fn empty_particle(pos: SourcePos) -> Particle {
    Particle::new(Occurs::once(), Term::Group(ModelGroup::new(Compositor::Sequence)), pos)
}

fn intersect_wildcards(a: Option<Wildcard>, b: Option<Wildcard>) -> Option<Wildcard> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.intersect(&b)),
        (a, None) => a,
        (None, b) => b,
    }
}

impl<'a> Resolver<'a> {
    fn report(&mut self, code: ViolationCode, message: String, pos: &SourcePos) {
        self.violations.push(Violation::new(code, message).at(pos));
    }

    fn lookup_type(&mut self, reference: &TypeRef, pos: &SourcePos) -> TypeRef {
        match reference {
            TypeRef::Named(name) => match self.set.type_names.get(name) {
                Some(id) => TypeRef::Id(*id),
                None => {
                    self.report(
                        ViolationCode::ReferenceNotFound,
                        format!("type '{}' not found", name),
                        pos,
                    );
                    TypeRef::Dangling(name.clone())
                }
            },
            other => other.clone(),
        }
    }

    // -------------------------------------------------------------------------
    // Types
    // -------------------------------------------------------------------------

    fn link_type_references(&mut self) {
        for TypeId(index) in self.set.type_order() {
            match self.set.types[index].clone() {
                TypeDef::Simple(def) => {
                    let derivation = match &def.derivation {
                        SimpleDerivation::Restriction { base } => SimpleDerivation::Restriction {
                            base: self.lookup_type(base, &def.pos),
                        },
                        SimpleDerivation::List { item } => SimpleDerivation::List {
                            item: self.lookup_type(item, &def.pos),
                        },
                        SimpleDerivation::Union { members } => SimpleDerivation::Union {
                            members: members.iter().map(|m| self.lookup_type(m, &def.pos)).collect(),
                        },
                    };
                    if let TypeDef::Simple(target) = &mut self.set.types[index] {
                        target.derivation = derivation;
                    }
                }
                TypeDef::Complex(def) => {
                    let base = self.lookup_type(&def.base, &def.pos);
                    if let TypeDef::Complex(target) = &mut self.set.types[index] {
                        target.base = base;
                    }
                }
                TypeDef::Builtin(_) => {}
            }
        }
    }

    fn resolve_simple_types(&mut self) {
        for id in self.set.type_order() {
            if matches!(self.set.type_def(id), TypeDef::Simple(_)) {
                self.finish_simple(id);
            }
        }
    }

    fn finish_simple(&mut self, id: TypeId) {
        if self.state[id.0] != Visit::Pending {
            return;
        }
        self.state[id.0] = Visit::Active;
        let TypeDef::Simple(def) = self.set.type_def(id).clone() else {
            return;
        };
        let mut derivation = def.derivation.clone();
        let edges: Vec<&mut TypeRef> = match &mut derivation {
            SimpleDerivation::Restriction { base } => vec![base],
            SimpleDerivation::List { item } => vec![item],
            SimpleDerivation::Union { members } => members.iter_mut().collect(),
        };
        for edge in edges {
            let Some(dep) = edge.id() else { continue };
            if !matches!(self.set.type_def(dep), TypeDef::Simple(_)) {
                continue;
            }
            if self.state[dep.0] == Visit::Active {
                self.report(
                    ViolationCode::CyclicDerivation,
                    format!("{} is derived from itself", self.set.type_name(id)),
                    &def.pos,
                );
                *edge = TypeRef::Dangling(self.set.type_def(dep).name().unwrap_or_else(|| QName::local("")));
                continue;
            }
            self.finish_simple(dep);
        }

        let (variety, white_space) = match &derivation {
            SimpleDerivation::Restriction { base } => {
                let own = def
                    .raw_facets
                    .iter()
                    .rev()
                    .find(|f| f.kind == FacetKind::WhiteSpace)
                    .and_then(|f| WhiteSpace::parse(f.value.trim()));
                match base.id() {
                    Some(b) if self.set.is_simple(b) => (
                        self.set.variety(b),
                        own.unwrap_or_else(|| self.set.white_space(b)),
                    ),
                    _ => (Variety::Atomic, own.unwrap_or(WhiteSpace::Collapse)),
                }
            }
            SimpleDerivation::List { .. } => (Variety::List, WhiteSpace::Collapse),
            SimpleDerivation::Union { .. } => (Variety::Union, WhiteSpace::Preserve),
        };
        if let TypeDef::Simple(target) = &mut self.set.types[id.0] {
            target.derivation = derivation;
            target.variety = variety;
            target.white_space = white_space;
        }
        self.state[id.0] = Visit::Done;
    }

    fn resolve_complex_types(&mut self) {
        for id in self.set.type_order() {
            if matches!(self.set.type_def(id), TypeDef::Complex(_)) {
                self.finish_complex(id);
            }
        }
    }

    /// Content type of a base as seen by a deriving type
    fn base_content(&self, base: TypeId) -> ContentType {
        match self.set.type_def(base) {
            TypeDef::Builtin(Builtin::AnyType) => {
                ContentType::Mixed(ComponentSet::any_type_particle(SourcePos::unknown("".into())))
            }
            TypeDef::Builtin(_) | TypeDef::Simple(_) => ContentType::Simple(base),
            TypeDef::Complex(c) => c.content.clone(),
        }
    }

    fn finish_complex(&mut self, id: TypeId) {
        if self.state[id.0] != Visit::Pending {
            return;
        }
        self.state[id.0] = Visit::Active;
        let Some(def) = self.set.complex(id).cloned() else {
            return;
        };
        let mut base = def.base.clone();
        if let Some(b) = base.id() {
            if self.set.complex(b).is_some() {
                if self.state[b.0] == Visit::Active {
                    self.report(
                        ViolationCode::CyclicDerivation,
                        format!("{} is derived from itself", self.set.type_name(id)),
                        &def.pos,
                    );
                    base = TypeRef::Dangling(self.set.type_def(b).name().unwrap_or_else(|| QName::local("")));
                } else {
                    self.finish_complex(b);
                }
            }
        }
        let base_id = base.id();

        let content = match &def.model {
            ContentDecl::Complex { particle } => {
                let explicit = particle
                    .as_ref()
                    .and_then(|p| self.expand_particle(p))
                    .filter(|p| !p.is_void());
                let own = match explicit.clone() {
                    Some(p) if def.mixed => ContentType::Mixed(p),
                    Some(p) => ContentType::ElementOnly(p),
                    None if def.mixed => ContentType::Mixed(empty_particle(def.pos.clone())),
                    None => ContentType::Empty,
                };
                match (def.method, base_id) {
                    (DerivationMethod::Extension, Some(b)) => {
                        match (self.base_content(b), explicit) {
                            (ContentType::ElementOnly(bp), None) if def.mixed => ContentType::Mixed(bp),
                            (base_content @ (ContentType::ElementOnly(_) | ContentType::Mixed(_)), None) => {
                                base_content
                            }
                            (ContentType::ElementOnly(bp) | ContentType::Mixed(bp), Some(p)) => {
                                let mut group = ModelGroup::new(Compositor::Sequence);
                                group.particles.push(bp);
                                group.particles.push(p);
                                let particle = Particle::new(Occurs::once(), Term::Group(group), def.pos.clone());
                                if def.mixed {
                                    ContentType::Mixed(particle)
                                } else {
                                    ContentType::ElementOnly(particle)
                                }
                            }
                            (ContentType::Simple(t), None) => ContentType::Simple(t),
                            _ => own,
                        }
                    }
                    _ => own,
                }
            }
            ContentDecl::SimpleExtension => base_id
                .and_then(|b| self.set.simple_content_type(b))
                .map(ContentType::Simple)
                .unwrap_or(ContentType::Empty),
            ContentDecl::SimpleRestriction { inline, facets } => {
                match base_id.and_then(|b| self.set.simple_content_type(b)) {
                    Some(bt) if facets.is_empty() && inline.is_none() => ContentType::Simple(bt),
                    Some(bt) => {
                        let restricted = inline.unwrap_or(bt);
                        let own_ws = facets
                            .iter()
                            .rev()
                            .find(|f| f.kind == FacetKind::WhiteSpace)
                            .and_then(|f| WhiteSpace::parse(f.value.trim()));
                        let content = self.set.add_type(TypeDef::Simple(SimpleTypeDef {
                            name: None,
                            derivation: SimpleDerivation::Restriction {
                                base: TypeRef::Id(restricted),
                            },
                            raw_facets: facets.clone(),
                            facets: FacetSet::default(),
                            white_space: own_ws.unwrap_or_else(|| self.set.white_space(restricted)),
                            variety: self.set.variety(restricted),
                            final_: DerivationSet::empty(),
                            pos: def.pos.clone(),
                        }));
                        self.state.push(Visit::Done);
                        ContentType::Simple(content)
                    }
                    None => ContentType::Empty,
                }
            }
        };

        let (attributes, attribute_wildcard) = self.attribute_table(&def.attribute_decls, &def, base_id);
        if let TypeDef::Complex(target) = &mut self.set.types[id.0] {
            target.base = base;
            target.content = content;
            target.attributes = attributes;
            target.attribute_wildcard = attribute_wildcard;
        }
        self.state[id.0] = Visit::Done;
    }

    // -------------------------------------------------------------------------
    // Particles and groups
    // -------------------------------------------------------------------------

    /// Replace element and group references in a particle tree
    fn expand_particle(&mut self, particle: &Particle) -> Option<Particle> {
        let term = match &particle.term {
            Term::ElementRef(name) => match self.set.element_names.get(name) {
                Some(id) => Term::Element(*id),
                None => {
                    self.report(
                        ViolationCode::ReferenceNotFound,
                        format!("element '{}' not found", name),
                        &particle.pos,
                    );
                    return None;
                }
            },
            Term::GroupRef(name) => {
                let group = self.expanded_group(name, &particle.pos)?;
                return Some(Particle::new(particle.occurs, group.term, particle.pos.clone()));
            }
            Term::Group(group) => {
                let mut expanded = ModelGroup::new(group.compositor);
                for child in &group.particles {
                    if let Some(child) = self.expand_particle(child) {
                        expanded.particles.push(child);
                    }
                }
                Term::Group(expanded)
            }
            other => other.clone(),
        };
        Some(Particle::new(particle.occurs, term, particle.pos.clone()))
    }

    fn expanded_group(&mut self, name: &QName, pos: &SourcePos) -> Option<Particle> {
        if let Some(cached) = self.group_cache.get(name) {
            return cached.clone();
        }
        if self.group_stack.contains(name) {
            self.report(
                ViolationCode::CyclicGroup,
                format!("group '{}' refers to itself", name),
                pos,
            );
            return None;
        }
        let Some(def) = self.set.groups.get(name) else {
            self.report(
                ViolationCode::ReferenceNotFound,
                format!("group '{}' not found", name),
                pos,
            );
            return None;
        };
        let particle = def.particle.clone();
        self.group_stack.push(name.clone());
        let expanded = self.expand_particle(&particle);
        self.group_stack.pop();
        self.group_cache.insert(name.clone(), expanded.clone());
        expanded
    }

    fn resolve_groups(&mut self) {
        let names: Vec<(QName, SourcePos)> = self
            .set
            .groups
            .iter()
            .map(|(name, def)| (name.clone(), def.pos.clone()))
            .collect();
        for (name, pos) in names {
            if let Some(expanded) = self.expanded_group(&name, &pos) {
                if let Some(def) = self.set.groups.get_mut(&name) {
                    def.particle = expanded;
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Elements
    // -------------------------------------------------------------------------

    fn resolve_elements(&mut self) {
        for ElemId(index) in self.set.element_order() {
            let decl = &self.set.elements[index];
            let pos = decl.pos.clone();
            let type_ref = decl.type_ref.clone();
            let head_name = decl.substitution_head.clone();
            let type_ref = self.lookup_type(&type_ref, &pos);
            let head = head_name.and_then(|name| match self.set.element_names.get(&name) {
                Some(id) => Some(*id),
                None => {
                    self.report(
                        ViolationCode::ReferenceNotFound,
                        format!("substitution group head '{}' not found", name),
                        &pos,
                    );
                    None
                }
            });
            let decl = &mut self.set.elements[index];
            decl.type_ref = type_ref;
            decl.head = head;
        }

        // Cut cycles in head chains
        for ElemId(index) in self.set.element_order() {
            let start = ElemId(index);
            let mut seen = BTreeSet::new();
            let mut current = self.set.elements[index].head;
            while let Some(head) = current {
                if head == start {
                    let decl = self.set.element(start);
                    let (name, pos) = (decl.name.clone(), decl.pos.clone());
                    self.report(
                        ViolationCode::CyclicSubstitutionGroup,
                        format!("substitution group of '{}' is cyclic", name),
                        &pos,
                    );
                    self.set.elements[index].head = None;
                    break;
                }
                if !seen.insert(head) {
                    break;
                }
                current = self.set.element(head).head;
            }
        }

        let mut members: BTreeMap<ElemId, Vec<ElemId>> = BTreeMap::new();
        for (index, decl) in self.set.elements.iter().enumerate() {
            if let Some(head) = decl.head {
                members.entry(head).or_default().push(ElemId(index));
            }
        }
        self.set.substitution_members = members;

        for index in 0..self.set.elements.len() {
            let ty = self.element_type(ElemId(index));
            self.set.elements[index].type_ref = ty;
        }
    }

    /// Declared type, the head's type, or `xs:anyType`
    fn element_type(&self, id: ElemId) -> TypeRef {
        let mut current = id;
        for _ in 0..=self.set.elements.len() {
            let decl = self.set.element(current);
            match (&decl.type_ref, decl.head) {
                (TypeRef::Unspecified, Some(head)) => current = head,
                (TypeRef::Unspecified, None) => break,
                (resolved, _) => return resolved.clone(),
            }
        }
        TypeRef::Id(ComponentSet::builtin(Builtin::AnyType))
    }

    // -------------------------------------------------------------------------
    // Attributes
    // -------------------------------------------------------------------------

    fn resolve_attributes(&mut self) {
        for AttrId(index) in self.set.attribute_order() {
            let decl = &self.set.attributes[index];
            let pos = decl.pos.clone();
            let name = decl.name.clone();
            let type_ref = decl.type_ref.clone();
            let type_ref = match type_ref {
                TypeRef::Unspecified => TypeRef::Id(ComponentSet::builtin(Builtin::AnySimpleType)),
                other => self.lookup_type(&other, &pos),
            };
            if let Some(ty) = type_ref.id() {
                if !self.set.is_simple(ty) {
                    self.report(
                        ViolationCode::SchemaParse,
                        format!(
                            "attribute '{}' has complex type {}",
                            name,
                            self.set.type_name(ty)
                        ),
                        &pos,
                    );
                    self.set.attributes[index].type_ref = TypeRef::Dangling(name);
                    continue;
                }
            }
            self.set.attributes[index].type_ref = type_ref;
        }
    }

    /// Effective use of one written attribute use; `Err` carries a
    /// prohibited name
    fn attribute_use(&mut self, decl: &AttributeUseDecl) -> Option<Result<AttributeUse, QName>> {
        let (attr, name) = match &decl.target {
            AttrTarget::Local(id) => (*id, self.set.attribute(*id).name.clone()),
            AttrTarget::Ref(name) => match self.set.attribute_names.get(name) {
                Some(id) => (*id, name.clone()),
                None => {
                    self.report(
                        ViolationCode::ReferenceNotFound,
                        format!("attribute '{}' not found", name),
                        &decl.pos,
                    );
                    return None;
                }
            },
        };
        if decl.use_kind == AttributeUseKind::Prohibited {
            return Some(Err(name));
        }
        let declaration = self.set.attribute(attr);
        let fixed = decl.fixed.clone().or_else(|| declaration.fixed.clone());
        let default = if fixed.is_some() {
            None
        } else {
            decl.default.clone().or_else(|| declaration.default.clone())
        };
        Some(Ok(AttributeUse {
            name,
            decl: attr,
            required: decl.use_kind == AttributeUseKind::Required,
            default,
            fixed,
            pos: decl.pos.clone(),
        }))
    }

    fn collect_uses(
        &mut self,
        decls: &[AttributeUseDecl],
        group_refs: &[(QName, SourcePos)],
        any_attribute: Option<Wildcard>,
    ) -> ResolvedAttributes {
        let mut resolved = ResolvedAttributes {
            wildcard: any_attribute,
            ..ResolvedAttributes::default()
        };
        for decl in decls {
            match self.attribute_use(decl) {
                Some(Ok(attribute_use)) => resolved.uses.push(attribute_use),
                Some(Err(name)) => resolved.prohibited.push(name),
                None => {}
            }
        }
        for (name, pos) in group_refs {
            if let Some(group) = self.resolved_attribute_group(name, pos) {
                resolved.uses.extend(group.uses);
                resolved.prohibited.extend(group.prohibited);
                resolved.wildcard = intersect_wildcards(resolved.wildcard.take(), group.wildcard);
            }
        }
        resolved
    }

    fn resolved_attribute_group(&mut self, name: &QName, pos: &SourcePos) -> Option<ResolvedAttributes> {
        if self.attribute_group_stack.contains(name) {
            self.report(
                ViolationCode::CyclicAttributeGroup,
                format!("attribute group '{}' refers to itself", name),
                pos,
            );
            return None;
        }
        let Some(def) = self.set.attribute_groups.get(name) else {
            self.report(
                ViolationCode::ReferenceNotFound,
                format!("attribute group '{}' not found", name),
                pos,
            );
            return None;
        };
        if let Some(resolved) = &def.resolved {
            return Some(resolved.clone());
        }
        let (uses, group_refs, any_attribute) =
            (def.uses.clone(), def.group_refs.clone(), def.any_attribute.clone());
        self.attribute_group_stack.push(name.clone());
        let resolved = self.collect_uses(&uses, &group_refs, any_attribute);
        self.attribute_group_stack.pop();
        if let Some(def) = self.set.attribute_groups.get_mut(name) {
            def.resolved = Some(resolved.clone());
        }
        Some(resolved)
    }

    fn resolve_attribute_groups(&mut self) {
        let names: Vec<(QName, SourcePos)> = self
            .set
            .attribute_groups
            .iter()
            .map(|(name, def)| (name.clone(), def.pos.clone()))
            .collect();
        for (name, pos) in names {
            self.resolved_attribute_group(&name, &pos);
        }
    }

    /// Attribute table and wildcard of a complex type
    fn attribute_table(
        &mut self,
        decls: &[AttributeUseDecl],
        def: &ComplexTypeDef,
        base: Option<TypeId>,
    ) -> (Vec<AttributeUse>, Option<Wildcard>) {
        let own = self.collect_uses(decls, &def.attribute_group_refs, def.any_attribute.clone());
        let mut uses: Vec<AttributeUse> = Vec::new();
        for attribute_use in own.uses {
            if uses.iter().any(|u| u.name == attribute_use.name) {
                self.report(
                    ViolationCode::DuplicateAttributeUse,
                    format!(
                        "attribute '{}' is used twice in {}",
                        attribute_use.name,
                        def.name.as_ref().map(|n| n.to_string()).unwrap_or_else(|| "anonymous type".to_string())
                    ),
                    &attribute_use.pos,
                );
                continue;
            }
            uses.push(attribute_use);
        }

        let (base_uses, base_wildcard) = match base {
            Some(b) if b == ComponentSet::builtin(Builtin::AnyType) => (Vec::new(), Some(Wildcard::any_lax())),
            Some(b) => match self.set.complex(b) {
                Some(c) => (c.attributes.clone(), c.attribute_wildcard.clone()),
                None => (Vec::new(), None),
            },
            None => (Vec::new(), None),
        };
        let wildcard = match def.method {
            DerivationMethod::Extension => {
                for inherited in base_uses {
                    if uses.iter().any(|u| u.name == inherited.name) {
                        self.report(
                            ViolationCode::DuplicateAttributeUse,
                            format!("extension redeclares inherited attribute '{}'", inherited.name),
                            &def.pos,
                        );
                        continue;
                    }
                    uses.push(inherited);
                }
                match (own.wildcard, base_wildcard) {
                    (Some(w), Some(b)) => Some(w.unite(&b)),
                    (w, None) => w,
                    (None, b) => b,
                }
            }
            DerivationMethod::Restriction => {
                for inherited in base_uses {
                    if uses.iter().any(|u| u.name == inherited.name)
                        || own.prohibited.contains(&inherited.name)
                    {
                        continue;
                    }
                    uses.push(inherited);
                }
                own.wildcard
            }
        };
        uses.sort_by(|a, b| a.name.cmp(&b.name));
        (uses, wildcard)
    }

    // -------------------------------------------------------------------------
    // Identity constraints
    // -------------------------------------------------------------------------

    fn resolve_identities(&mut self) {
        for IdcId(index) in self.set.identity_order() {
            let idc = &self.set.identities[index];
            let Some(refer) = idc.refer.clone() else {
                continue;
            };
            let pos = idc.pos.clone();
            match self.set.identity_names.get(&refer) {
                Some(id) => self.set.identities[index].referenced = Some(*id),
                None => self.report(
                    ViolationCode::ReferenceNotFound,
                    format!("identity constraint '{}' not found", refer),
                    &pos,
                ),
            }
        }
    }
}
