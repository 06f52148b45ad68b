//! Semantic checks
//!
//! Rules of the XSD 1.0 component model that go beyond reference
//! existence. Facets are compiled here too, since their values can only be
//! parsed once the base type is known. Every independent check runs, and
//! walks go through the `ComponentSet` walk orders (globals by expanded
//! name, anonymous components after them) so the violation list is stable.

use std::collections::BTreeSet;

use super::builtins::Builtin;
use super::components::{
    AttrId, AttrTarget, AttributeUseDecl, AttributeUseKind, ComplexTypeDef, ComponentSet,
    ContentDecl, ContentType, DerivationMethod, DerivationSet, ElemId, IdentityConstraint,
    IdentityKind, SimpleDerivation, TypeDef, TypeId, ValueConstraint, Variety,
};
use super::exceptions::{SourcePos, Violation, ViolationCode, ViolationList};
use super::facets::{FacetKind, FacetSet, PatternFacet, WhiteSpace};
use super::loading::visible_imports;
use super::particles::{Particle, Term};
use super::simple_types::validate_simple;
use super::values::XsdValue;
use crate::xpath::{FieldPath, FieldTarget, PathPattern, Selector};

/// Compile facets and run every semantic check
pub fn check(set: &mut ComponentSet, violations: &mut ViolationList) {
    let mut compiled = vec![false; set.types.len()];
    for id in set.type_order() {
        compile_facets(set, violations, id, &mut compiled);
    }

    let before = violations.len();
    let mut checker = Checker {
        set: &*set,
        violations,
    };
    checker.check_simple_types();
    checker.check_complex_types();
    checker.check_elements();
    checker.check_attribute_declarations();
    checker.check_attribute_uses();
    checker.check_substitution_groups();
    checker.check_identities();
    checker.check_imports();
    log::debug!("semantic checks reported {} violations", checker.violations.len() - before);
}

fn invalid(violations: &mut ViolationList, code: ViolationCode, message: String, pos: &SourcePos) {
    violations.push(Violation::new(code, message).at(pos));
}

// =============================================================================
// Facets
// =============================================================================

fn compile_facets(set: &mut ComponentSet, violations: &mut ViolationList, id: TypeId, compiled: &mut [bool]) {
    if id.0 >= compiled.len() || compiled[id.0] {
        return;
    }
    compiled[id.0] = true;
    let deps: Vec<TypeId> = match set.type_def(id) {
        TypeDef::Simple(def) => match &def.derivation {
            SimpleDerivation::Restriction { base } => base.id().into_iter().collect(),
            SimpleDerivation::List { item } => item.id().into_iter().collect(),
            SimpleDerivation::Union { members } => members.iter().filter_map(|m| m.id()).collect(),
        },
        _ => return,
    };
    for dep in deps {
        compile_facets(set, violations, dep, compiled);
    }
    let facets = compile_step(set, violations, id);
    if let TypeDef::Simple(def) = &mut set.types[id.0] {
        def.facets = facets;
    }
}

fn admits(set: &ComponentSet, base: TypeId, kind: FacetKind) -> bool {
    use FacetKind::*;
    match set.variety(base) {
        Variety::List => matches!(kind, Length | MinLength | MaxLength | Pattern | Enumeration | WhiteSpace),
        Variety::Union => matches!(kind, Pattern | Enumeration),
        Variety::Atomic => match set.builtin_ancestor(base) {
            Some(b) => b.admitted_facets().contains(&kind),
            None => false,
        },
    }
}

fn parse_count(value: &str) -> Option<usize> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Facets of one restriction step, parsed in the base's value space
fn compile_step(set: &ComponentSet, violations: &mut ViolationList, id: TypeId) -> FacetSet {
    let TypeDef::Simple(def) = set.type_def(id) else {
        return FacetSet::default();
    };
    let base = match &def.derivation {
        SimpleDerivation::Restriction { base } => base.id(),
        _ => None,
    };
    let Some(base) = base else {
        return FacetSet::default();
    };
    // Bounds are compared in the primitive value space, without base facets
    let value_base = set
        .builtin_ancestor(base)
        .map(ComponentSet::builtin)
        .unwrap_or(base);

    let mut facets = FacetSet::default();
    let mut enumeration = Vec::new();
    let mut has_enumeration = false;
    let mut seen = BTreeSet::new();
    for raw in &def.raw_facets {
        let kind = raw.kind;
        if !admits(set, base, kind) {
            invalid(
                violations,
                ViolationCode::InvalidFacet,
                format!("facet {} does not apply to {}", kind, set.type_name(base)),
                &raw.pos,
            );
            continue;
        }
        if !matches!(kind, FacetKind::Pattern | FacetKind::Enumeration) && !seen.insert(kind) {
            invalid(
                violations,
                ViolationCode::InvalidFacet,
                format!("facet {} is given twice", kind),
                &raw.pos,
            );
            continue;
        }
        if raw.fixed {
            facets.fixed.push(kind);
        }
        let value = raw.value.as_str();
        let bad = |violations: &mut ViolationList, detail: String| {
            invalid(
                violations,
                ViolationCode::InvalidFacet,
                format!("invalid {} '{}': {}", kind, value, detail),
                &raw.pos,
            )
        };
        match kind {
            FacetKind::Length | FacetKind::MinLength | FacetKind::MaxLength => match parse_count(value) {
                Some(n) => match kind {
                    FacetKind::Length => facets.length = Some(n),
                    FacetKind::MinLength => facets.min_length = Some(n),
                    _ => facets.max_length = Some(n),
                },
                None => bad(violations, "expected a non-negative integer".to_string()),
            },
            FacetKind::TotalDigits => match parse_count(value) {
                Some(n) if n > 0 && n <= u32::MAX as usize => facets.total_digits = Some(n as u32),
                _ => bad(violations, "expected a positive integer".to_string()),
            },
            FacetKind::FractionDigits => match parse_count(value) {
                Some(n) if n <= u32::MAX as usize => facets.fraction_digits = Some(n as u32),
                _ => bad(violations, "expected a non-negative integer".to_string()),
            },
            FacetKind::Pattern => match PatternFacet::new(value) {
                Ok(p) => facets.patterns.push(p),
                Err(e) => bad(violations, e.to_string()),
            },
            FacetKind::Enumeration => {
                has_enumeration = true;
                match validate_simple(set, base, value, &raw.ns) {
                    Ok(v) => enumeration.push(v),
                    Err(e) => bad(violations, e.to_string()),
                }
            }
            FacetKind::WhiteSpace => match WhiteSpace::parse(value.trim()) {
                Some(ws) => facets.white_space = Some(ws),
                None => bad(violations, "expected preserve, replace or collapse".to_string()),
            },
            FacetKind::MinInclusive
            | FacetKind::MinExclusive
            | FacetKind::MaxInclusive
            | FacetKind::MaxExclusive => match validate_simple(set, value_base, value, &raw.ns) {
                Ok(v) => {
                    let slot = match kind {
                        FacetKind::MinInclusive => &mut facets.min_inclusive,
                        FacetKind::MinExclusive => &mut facets.min_exclusive,
                        FacetKind::MaxInclusive => &mut facets.max_inclusive,
                        _ => &mut facets.max_exclusive,
                    };
                    *slot = Some(v);
                }
                Err(e) => bad(violations, e.to_string()),
            },
        }
    }
    if has_enumeration {
        facets.enumeration = Some(enumeration);
    }
    check_narrowing(set, violations, id, base, &facets, &def.pos);
    facets
}

/// Nearest value of a facet along the restriction chain starting at `from`
fn inherited<T>(set: &ComponentSet, from: TypeId, get: impl Fn(&FacetSet) -> Option<T>) -> Option<T> {
    let mut current = Some(from);
    for _ in 0..=set.types.len() {
        let id = current?;
        let TypeDef::Simple(def) = set.type_def(id) else {
            return None;
        };
        if let Some(value) = get(&def.facets) {
            return Some(value);
        }
        current = match &def.derivation {
            SimpleDerivation::Restriction { base } => base.id(),
            _ => None,
        };
    }
    None
}

/// The nearest ancestor step that declares `kind` fixed
fn fixed_step(set: &ComponentSet, from: TypeId, kind: FacetKind) -> Option<&FacetSet> {
    let mut current = Some(from);
    for _ in 0..=set.types.len() {
        let id = current?;
        let TypeDef::Simple(def) = set.type_def(id) else {
            return None;
        };
        if def.facets.is_fixed(kind) {
            return Some(&def.facets);
        }
        current = match &def.derivation {
            SimpleDerivation::Restriction { base } => base.id(),
            _ => None,
        };
    }
    None
}

fn same_facet_value(a: &FacetSet, b: &FacetSet, kind: FacetKind) -> bool {
    let values_eq = |x: &Option<XsdValue>, y: &Option<XsdValue>| match (x, y) {
        (Some(x), Some(y)) => x.value_eq(y),
        (None, None) => true,
        _ => false,
    };
    match kind {
        FacetKind::Length => a.length == b.length,
        FacetKind::MinLength => a.min_length == b.min_length,
        FacetKind::MaxLength => a.max_length == b.max_length,
        FacetKind::TotalDigits => a.total_digits == b.total_digits,
        FacetKind::FractionDigits => a.fraction_digits == b.fraction_digits,
        FacetKind::WhiteSpace => a.white_space == b.white_space,
        FacetKind::MinInclusive => values_eq(&a.min_inclusive, &b.min_inclusive),
        FacetKind::MinExclusive => values_eq(&a.min_exclusive, &b.min_exclusive),
        FacetKind::MaxInclusive => values_eq(&a.max_inclusive, &b.max_inclusive),
        FacetKind::MaxExclusive => values_eq(&a.max_exclusive, &b.max_exclusive),
        FacetKind::Pattern | FacetKind::Enumeration => true,
    }
}

fn declares(facets: &FacetSet, kind: FacetKind) -> bool {
    match kind {
        FacetKind::Length => facets.length.is_some(),
        FacetKind::MinLength => facets.min_length.is_some(),
        FacetKind::MaxLength => facets.max_length.is_some(),
        FacetKind::TotalDigits => facets.total_digits.is_some(),
        FacetKind::FractionDigits => facets.fraction_digits.is_some(),
        FacetKind::WhiteSpace => facets.white_space.is_some(),
        FacetKind::MinInclusive => facets.min_inclusive.is_some(),
        FacetKind::MinExclusive => facets.min_exclusive.is_some(),
        FacetKind::MaxInclusive => facets.max_inclusive.is_some(),
        FacetKind::MaxExclusive => facets.max_exclusive.is_some(),
        FacetKind::Pattern => !facets.patterns.is_empty(),
        FacetKind::Enumeration => facets.enumeration.is_some(),
    }
}

fn strength(ws: WhiteSpace) -> u8 {
    match ws {
        WhiteSpace::Preserve => 0,
        WhiteSpace::Replace => 1,
        WhiteSpace::Collapse => 2,
    }
}

/// `Some(true)` when `a < b` (or `a <= b` with `or_equal`)
fn below(a: &XsdValue, b: &XsdValue, or_equal: bool) -> Option<bool> {
    a.partial_cmp_value(b).map(|o| match o {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Equal => or_equal,
        std::cmp::Ordering::Greater => false,
    })
}

fn check_narrowing(
    set: &ComponentSet,
    violations: &mut ViolationList,
    id: TypeId,
    base: TypeId,
    facets: &FacetSet,
    pos: &SourcePos,
) {
    let name = set.type_name(id);
    let mut fail = |message: String| invalid(violations, ViolationCode::InvalidFacet, format!("{}: {}", name, message), pos);

    for kind in [
        FacetKind::Length,
        FacetKind::MinLength,
        FacetKind::MaxLength,
        FacetKind::TotalDigits,
        FacetKind::FractionDigits,
        FacetKind::WhiteSpace,
        FacetKind::MinInclusive,
        FacetKind::MinExclusive,
        FacetKind::MaxInclusive,
        FacetKind::MaxExclusive,
    ] {
        if !declares(facets, kind) {
            continue;
        }
        if let Some(step) = fixed_step(set, base, kind) {
            if !same_facet_value(step, facets, kind) {
                fail(format!("{} is fixed in the base type", kind));
            }
        }
    }

    // Length family
    let base_length = inherited(set, base, |f| f.length);
    let base_min = inherited(set, base, |f| f.min_length);
    let base_max = inherited(set, base, |f| f.max_length);
    if let Some(length) = facets.length {
        if base_length.is_some_and(|l| l != length) {
            fail(format!("length {} differs from the base length", length));
        }
        if base_min.is_some_and(|m| length < m) || base_max.is_some_and(|m| length > m) {
            fail(format!("length {} is outside the base length range", length));
        }
    }
    let min = facets.min_length.or(base_min);
    let max = facets.max_length.or(base_max);
    if let Some(m) = facets.min_length {
        if base_min.is_some_and(|b| m < b) {
            fail(format!("minLength {} is below the base minLength", m));
        }
    }
    if let Some(m) = facets.max_length {
        if base_max.is_some_and(|b| m > b) {
            fail(format!("maxLength {} exceeds the base maxLength", m));
        }
    }
    if let (Some(lo), Some(hi)) = (min, max) {
        if lo > hi {
            fail(format!("minLength {} exceeds maxLength {}", lo, hi));
        }
    }
    if let Some(length) = facets.length.or(base_length) {
        if facets.min_length.is_some_and(|m| m > length) || facets.max_length.is_some_and(|m| m < length) {
            fail(format!("length {} conflicts with minLength/maxLength", length));
        }
    }

    // Digits
    let total = facets.total_digits.or_else(|| inherited(set, base, |f| f.total_digits));
    if let Some(t) = facets.total_digits {
        if inherited(set, base, |f| f.total_digits).is_some_and(|b| t > b) {
            fail(format!("totalDigits {} exceeds the base totalDigits", t));
        }
    }
    if let Some(fd) = facets.fraction_digits {
        if inherited(set, base, |f| f.fraction_digits).is_some_and(|b| fd > b) {
            fail(format!("fractionDigits {} exceeds the base fractionDigits", fd));
        }
        if total.is_some_and(|t| fd > t) {
            fail(format!("fractionDigits {} exceeds totalDigits", fd));
        }
    }

    // whiteSpace
    if let Some(ws) = facets.white_space {
        if set.variety(base) == Variety::List && ws != WhiteSpace::Collapse {
            fail("whiteSpace of a list type must be collapse".to_string());
        } else if strength(ws) < strength(set.white_space(base)) {
            fail(format!("whiteSpace {} is weaker than the base's {}", ws, set.white_space(base)));
        }
    }

    // Bounds
    if facets.min_inclusive.is_some() && facets.min_exclusive.is_some() {
        fail("minInclusive and minExclusive are both given".to_string());
    }
    if facets.max_inclusive.is_some() && facets.max_exclusive.is_some() {
        fail("maxInclusive and maxExclusive are both given".to_string());
    }
    let lower = [
        (facets.min_inclusive.clone().or_else(|| inherited(set, base, |f| f.min_inclusive.clone())), true),
        (facets.min_exclusive.clone().or_else(|| inherited(set, base, |f| f.min_exclusive.clone())), false),
    ];
    let upper = [
        (facets.max_inclusive.clone().or_else(|| inherited(set, base, |f| f.max_inclusive.clone())), true),
        (facets.max_exclusive.clone().or_else(|| inherited(set, base, |f| f.max_exclusive.clone())), false),
    ];
    for (lo, lo_inclusive) in &lower {
        for (hi, hi_inclusive) in &upper {
            let (Some(lo), Some(hi)) = (lo, hi) else { continue };
            if below(lo, hi, *lo_inclusive && *hi_inclusive) == Some(false) {
                fail(format!("lower bound {} is not below upper bound {}", lo, hi));
            }
        }
    }
    let base_checks = [
        (&facets.min_inclusive, inherited(set, base, |f| f.min_inclusive.clone()), true),
        (&facets.min_exclusive, inherited(set, base, |f| f.min_exclusive.clone()), true),
        (&facets.max_inclusive, inherited(set, base, |f| f.max_inclusive.clone()), false),
        (&facets.max_exclusive, inherited(set, base, |f| f.max_exclusive.clone()), false),
    ];
    for (own, inherited_bound, is_lower) in base_checks {
        let (Some(own), Some(inherited_bound)) = (own, inherited_bound) else { continue };
        let widened = if is_lower {
            below(own, &inherited_bound, false) == Some(true)
        } else {
            below(&inherited_bound, own, false) == Some(true)
        };
        if widened {
            fail(format!("bound {} widens the base bound {}", own, inherited_bound));
        }
    }
}

// =============================================================================
// Component checks
// =============================================================================

struct Checker<'a> {
    set: &'a ComponentSet,
    violations: &'a mut ViolationList,
}

/// A node an identity-constraint field can select
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum FieldNode {
    Element(ElemId),
    Attribute(AttrId),
}

fn blocks(final_: DerivationSet, methods: DerivationSet) -> bool {
    (methods.contains(DerivationSet::EXTENSION) && final_.contains(DerivationSet::EXTENSION))
        || (methods.contains(DerivationSet::RESTRICTION) && final_.contains(DerivationSet::RESTRICTION))
}

impl<'a> Checker<'a> {
    fn report(&mut self, code: ViolationCode, message: String, pos: &SourcePos) {
        invalid(self.violations, code, message, pos);
    }

    fn final_of(&self, id: TypeId) -> DerivationSet {
        let set = self.set;
        match set.type_def(id) {
            TypeDef::Simple(s) => s.final_,
            TypeDef::Complex(c) => c.final_,
            TypeDef::Builtin(_) => DerivationSet::empty(),
        }
    }

    /// Validate a value constraint against a simple type
    fn check_value(&mut self, ty: TypeId, vc: &ValueConstraint, what: &str, pos: &SourcePos) {
        let set = self.set;
        if let Err(e) = validate_simple(set, ty, &vc.lexical, &vc.ns) {
            self.report(
                ViolationCode::InvalidDefaultOrFixed,
                format!("{} '{}' is not valid: {}", what, vc.lexical, e),
                pos,
            );
        }
    }

    fn same_value(&self, ty: Option<TypeId>, a: &ValueConstraint, b: &ValueConstraint) -> bool {
        let set = self.set;
        match ty {
            Some(t) if set.is_simple(t) => match (
                validate_simple(set, t, &a.lexical, &a.ns),
                validate_simple(set, t, &b.lexical, &b.ns),
            ) {
                (Ok(x), Ok(y)) => x.value_eq(&y),
                _ => a.lexical == b.lexical,
            },
            _ => a.lexical == b.lexical,
        }
    }

    fn is_notation_builtin(&self, ty: Option<TypeId>) -> bool {
        ty == Some(ComponentSet::builtin(Builtin::Notation))
    }

    // -------------------------------------------------------------------------
    // Types
    // -------------------------------------------------------------------------

    fn check_simple_types(&mut self) {
        let set = self.set;
        for id in set.type_order() {
            let TypeDef::Simple(def) = set.type_def(id) else {
                continue;
            };
            let name = set.type_name(id);
            match &def.derivation {
                SimpleDerivation::Restriction { base } => {
                    let Some(base) = base.id() else { continue };
                    if !set.is_simple(base) {
                        self.report(
                            ViolationCode::InvalidDerivation,
                            format!("{} restricts the complex type {}", name, set.type_name(base)),
                            &def.pos,
                        );
                        continue;
                    }
                    if self.final_of(base).contains(DerivationSet::RESTRICTION) {
                        self.report(
                            ViolationCode::FinalBlocksDerivation,
                            format!("{} is final for restriction", set.type_name(base)),
                            &def.pos,
                        );
                    }
                }
                SimpleDerivation::List { item } => {
                    let Some(item) = item.id() else { continue };
                    if !set.is_simple(item) {
                        self.report(
                            ViolationCode::InvalidDerivation,
                            format!("item type of {} is complex", name),
                            &def.pos,
                        );
                    } else if set.variety(item) == Variety::List {
                        self.report(
                            ViolationCode::InvalidDerivation,
                            format!("item type of {} is itself a list", name),
                            &def.pos,
                        );
                    } else if set.is_id_type(item) {
                        self.report(
                            ViolationCode::InvalidDerivation,
                            format!("item type of {} is derived from xs:ID", name),
                            &def.pos,
                        );
                    }
                    if self.final_of(item).contains(DerivationSet::LIST) {
                        self.report(
                            ViolationCode::FinalBlocksDerivation,
                            format!("{} is final for list", set.type_name(item)),
                            &def.pos,
                        );
                    }
                }
                SimpleDerivation::Union { members } => {
                    for member in members.iter().filter_map(|m| m.id()) {
                        if !set.is_simple(member) {
                            self.report(
                                ViolationCode::InvalidDerivation,
                                format!("member type {} of {} is complex", set.type_name(member), name),
                                &def.pos,
                            );
                        }
                        if self.final_of(member).contains(DerivationSet::UNION) {
                            self.report(
                                ViolationCode::FinalBlocksDerivation,
                                format!("{} is final for union", set.type_name(member)),
                                &def.pos,
                            );
                        }
                    }
                }
            }
            if set.primitive_builtin(id) == Some(Builtin::Notation) {
                self.check_notation_type(id);
            }
        }
    }

    fn check_notation_type(&mut self, id: TypeId) {
        let set = self.set;
        let TypeDef::Simple(def) = set.type_def(id) else {
            return;
        };
        match inherited(set, id, |f| f.enumeration.clone()) {
            None => self.report(
                ViolationCode::InvalidFacet,
                format!("{} restricts xs:NOTATION without an enumeration", set.type_name(id)),
                &def.pos,
            ),
            Some(values) => {
                for value in &values {
                    if let XsdValue::Notation(q) = value {
                        if !set.notations.contains_key(q) {
                            self.report(
                                ViolationCode::InvalidFacet,
                                format!("enumeration names the undeclared notation '{}'", q),
                                &def.pos,
                            );
                        }
                    }
                }
            }
        }
    }

    fn check_complex_types(&mut self) {
        let set = self.set;
        for id in set.type_order() {
            let Some(def) = set.complex(id) else {
                continue;
            };
            let Some(base) = def.base.id() else { continue };
            let name = set.type_name(id);
            let base_name = set.type_name(base);
            if self.final_of(base).contains(def.method.flag()) {
                self.report(
                    ViolationCode::FinalBlocksDerivation,
                    format!(
                        "{} is final for {}",
                        base_name,
                        match def.method {
                            DerivationMethod::Extension => "extension",
                            DerivationMethod::Restriction => "restriction",
                        }
                    ),
                    &def.pos,
                );
            }
            let base_complex = set.complex(base);
            let has_particle = matches!(&def.model, ContentDecl::Complex { particle: Some(p) } if !p.is_void());
            match &def.model {
                ContentDecl::Complex { .. } if set.is_simple(base) => {
                    self.report(
                        ViolationCode::InvalidDerivation,
                        format!("{} uses complexContent over the simple type {}", name, base_name),
                        &def.pos,
                    );
                }
                ContentDecl::Complex { .. } => {
                    let Some(bc) = base_complex else { continue };
                    match (def.method, &bc.content) {
                        (_, ContentType::Simple(_)) if has_particle => self.report(
                            ViolationCode::InvalidDerivation,
                            format!("{} adds elements to the simple content of {}", name, base_name),
                            &def.pos,
                        ),
                        (DerivationMethod::Extension, ContentType::ElementOnly(_)) if def.mixed => self.report(
                            ViolationCode::InvalidDerivation,
                            format!("mixed {} extends the element-only {}", name, base_name),
                            &def.pos,
                        ),
                        (DerivationMethod::Extension, ContentType::Mixed(_)) if !def.mixed && has_particle => {
                            self.report(
                                ViolationCode::InvalidDerivation,
                                format!("element-only {} extends the mixed {}", name, base_name),
                                &def.pos,
                            )
                        }
                        (DerivationMethod::Restriction, ContentType::ElementOnly(_) | ContentType::Empty)
                            if def.mixed =>
                        {
                            self.report(
                                ViolationCode::InvalidDerivation,
                                format!("mixed {} restricts the non-mixed {}", name, base_name),
                                &def.pos,
                            )
                        }
                        (DerivationMethod::Restriction, ContentType::ElementOnly(p) | ContentType::Mixed(p))
                            if !has_particle && !p.is_emptiable() =>
                        {
                            self.report(
                                ViolationCode::InvalidDerivation,
                                format!("{} empties the required content of {}", name, base_name),
                                &def.pos,
                            )
                        }
                        _ => {}
                    }
                }
                ContentDecl::SimpleExtension => {
                    if base_complex.is_some() && set.simple_content_type(base).is_none() {
                        self.report(
                            ViolationCode::InvalidDerivation,
                            format!("{} extends {} which has no simple content", name, base_name),
                            &def.pos,
                        );
                    }
                }
                ContentDecl::SimpleRestriction { .. } => {
                    let allowed = match base_complex.map(|c| &c.content) {
                        Some(ContentType::Simple(_)) => true,
                        Some(ContentType::Mixed(p)) => p.is_emptiable(),
                        _ => false,
                    };
                    if !allowed {
                        self.report(
                            ViolationCode::InvalidDerivation,
                            format!("{} restricts {} which has no simple content", name, base_name),
                            &def.pos,
                        );
                    }
                }
            }
            if def.method == DerivationMethod::Restriction {
                if let Some(bc) = base_complex {
                    self.check_attribute_restriction(id, bc);
                }
            }
        }
    }

    fn check_attribute_restriction(&mut self, id: TypeId, base: &ComplexTypeDef) {
        let set = self.set;
        let Some(def) = set.complex(id) else { return };
        let name = set.type_name(id);
        for attribute_use in &def.attributes {
            match base.attribute(&attribute_use.name) {
                Some(bu) => {
                    if bu.required && !attribute_use.required {
                        self.report(
                            ViolationCode::InvalidDerivation,
                            format!("{} makes the required attribute '{}' optional", name, attribute_use.name),
                            &attribute_use.pos,
                        );
                    }
                    if let Some(base_fixed) = &bu.fixed {
                        let ty = set.attribute(bu.decl).type_ref.id();
                        let kept = attribute_use
                            .fixed
                            .as_ref()
                            .is_some_and(|f| self.same_value(ty, f, base_fixed));
                        if !kept {
                            self.report(
                                ViolationCode::InvalidDerivation,
                                format!("{} changes the fixed value of attribute '{}'", name, attribute_use.name),
                                &attribute_use.pos,
                            );
                        }
                    }
                }
                None => {
                    let covered = base
                        .attribute_wildcard
                        .as_ref()
                        .is_some_and(|w| w.allows(attribute_use.name.namespace_str()));
                    if !covered {
                        self.report(
                            ViolationCode::InvalidDerivation,
                            format!("{} adds attribute '{}' not allowed by its base", name, attribute_use.name),
                            &attribute_use.pos,
                        );
                    }
                }
            }
        }
        for bu in base.attributes.iter().filter(|u| u.required) {
            if def.attribute(&bu.name).is_none() {
                self.report(
                    ViolationCode::InvalidDerivation,
                    format!("{} removes the required attribute '{}'", name, bu.name),
                    &def.pos,
                );
            }
        }
        if let Some(wildcard) = &def.attribute_wildcard {
            let narrows = base
                .attribute_wildcard
                .as_ref()
                .is_some_and(|b| wildcard.is_restriction_of(b));
            if !narrows {
                self.report(
                    ViolationCode::InvalidDerivation,
                    format!("attribute wildcard of {} does not restrict its base wildcard", name),
                    &def.pos,
                );
            }
        }
    }

    // -------------------------------------------------------------------------
    // Declarations
    // -------------------------------------------------------------------------

    fn check_elements(&mut self) {
        let set = self.set;
        for decl in set.element_order().into_iter().map(|id| set.element(id)) {
            let ty = decl.type_ref.id();
            if self.is_notation_builtin(ty) {
                self.report(
                    ViolationCode::SchemaParse,
                    format!("element '{}' uses xs:NOTATION directly", decl.name),
                    &decl.pos,
                );
            }
            let Some(ty) = ty else { continue };
            let (what, vc) = match (&decl.fixed, &decl.default) {
                (Some(f), _) => ("fixed value", f),
                (None, Some(d)) => ("default", d),
                (None, None) => continue,
            };
            match set.simple_content_type(ty) {
                Some(st) => {
                    if set.is_id_type(st) {
                        self.report(
                            ViolationCode::InvalidDefaultOrFixed,
                            format!("element '{}' of an ID type may not have a {}", decl.name, what),
                            &decl.pos,
                        );
                    } else {
                        self.check_value(st, vc, what, &decl.pos);
                    }
                }
                None => {
                    let textual = match set.complex(ty).map(|c| &c.content) {
                        None => true,
                        Some(ContentType::Mixed(p)) => p.is_emptiable(),
                        _ => false,
                    };
                    if !textual {
                        self.report(
                            ViolationCode::InvalidDefaultOrFixed,
                            format!("element '{}' cannot have a {}: its content is not textual", decl.name, what),
                            &decl.pos,
                        );
                    }
                }
            }
        }
    }

    fn check_attribute_declarations(&mut self) {
        let set = self.set;
        for decl in set.attribute_order().into_iter().map(|id| set.attribute(id)) {
            let ty = decl.type_ref.id();
            if self.is_notation_builtin(ty) {
                self.report(
                    ViolationCode::SchemaParse,
                    format!("attribute '{}' uses xs:NOTATION directly", decl.name),
                    &decl.pos,
                );
            }
            if decl.global && decl.name.namespace.is_none() && decl.name.local_name == "xmlns" {
                self.report(
                    ViolationCode::SchemaParse,
                    "an attribute may not be named 'xmlns'".to_string(),
                    &decl.pos,
                );
            }
            let Some(ty) = ty else { continue };
            for (what, vc) in [("default", &decl.default), ("fixed value", &decl.fixed)] {
                let Some(vc) = vc else { continue };
                if set.is_id_type(ty) {
                    self.report(
                        ViolationCode::InvalidDefaultOrFixed,
                        format!("attribute '{}' of an ID type may not have a {}", decl.name, what),
                        &decl.pos,
                    );
                } else {
                    self.check_value(ty, vc, what, &decl.pos);
                }
            }
        }
    }

    fn check_use(&mut self, decl: &AttributeUseDecl) {
        let set = self.set;
        let (attr, is_ref) = match &decl.target {
            AttrTarget::Local(id) => (*id, false),
            AttrTarget::Ref(name) => match set.attribute_names.get(name) {
                Some(id) => (*id, true),
                None => return,
            },
        };
        let declaration = set.attribute(attr);
        let has_default = decl.default.is_some() || (!is_ref && declaration.default.is_some());
        if decl.use_kind == AttributeUseKind::Required && has_default {
            self.report(
                ViolationCode::InvalidDefaultOrFixed,
                format!("required attribute '{}' may not have a default", declaration.name),
                &decl.pos,
            );
        }
        if !is_ref {
            return;
        }
        let ty = declaration.type_ref.id();
        if decl.default.is_some() && declaration.fixed.is_some() {
            self.report(
                ViolationCode::InvalidDefaultOrFixed,
                format!("attribute '{}' is fixed; the reference may not give a default", declaration.name),
                &decl.pos,
            );
        }
        if let (Some(f), Some(df)) = (&decl.fixed, &declaration.fixed) {
            if !self.same_value(ty, f, df) {
                self.report(
                    ViolationCode::InvalidDefaultOrFixed,
                    format!(
                        "fixed value '{}' differs from the declared fixed value '{}' of '{}'",
                        f.lexical, df.lexical, declaration.name
                    ),
                    &decl.pos,
                );
            }
        }
        if let Some(ty) = ty {
            for (what, vc) in [("default", &decl.default), ("fixed value", &decl.fixed)] {
                if let Some(vc) = vc {
                    self.check_value(ty, vc, what, &decl.pos);
                }
            }
        }
    }

    fn check_attribute_uses(&mut self) {
        let set = self.set;
        for def in set.type_order().into_iter().filter_map(|id| set.complex(id)) {
            for decl in &def.attribute_decls {
                self.check_use(decl);
            }
        }
        for group in set.attribute_groups.values() {
            for decl in &group.uses {
                self.check_use(decl);
            }
        }
    }

    fn check_substitution_groups(&mut self) {
        let set = self.set;
        for decl in set.element_order().into_iter().map(|id| set.element(id)) {
            let Some(head) = decl.head else { continue };
            let head_decl = set.element(head);
            let (Some(t), Some(h)) = (decl.type_ref.id(), head_decl.type_ref.id()) else {
                continue;
            };
            if !set.is_derived_from(t, h, DerivationSet::empty()) {
                self.report(
                    ViolationCode::InvalidSubstitutionDerivation,
                    format!(
                        "type {} of '{}' is not derived from type {} of its head '{}'",
                        set.type_name(t),
                        decl.name,
                        set.type_name(h),
                        head_decl.name
                    ),
                    &decl.pos,
                );
                continue;
            }
            let methods = set.derivation_methods(t, h).unwrap_or_default();
            if blocks(head_decl.final_, methods) {
                self.report(
                    ViolationCode::InvalidSubstitutionDerivation,
                    format!("head '{}' is final for the derivation used by '{}'", head_decl.name, decl.name),
                    &decl.pos,
                );
            }
        }
    }

    // -------------------------------------------------------------------------
    // Identity constraints
    // -------------------------------------------------------------------------

    fn collect_children(&self, particle: &Particle, out: &mut BTreeSet<ElemId>) {
        let set = self.set;
        match &particle.term {
            Term::Element(id) => {
                if set.element(*id).global {
                    out.extend(set.substitutable(*id));
                }
                out.insert(*id);
            }
            Term::Group(group) => {
                for child in &group.particles {
                    self.collect_children(child, out);
                }
            }
            _ => {}
        }
    }

    /// Element declarations that may appear as children of `elem`
    fn children_of(&self, elem: ElemId) -> BTreeSet<ElemId> {
        let set = self.set;
        let mut out = BTreeSet::new();
        if let Some(p) = self
            .set
            .element(elem)
            .type_ref
            .id()
            .and_then(|t| set.complex(t))
            .and_then(|c| c.content.particle())
        {
            self.collect_children(p, &mut out);
        }
        out
    }

    fn apply(&self, context: ElemId, pattern: &PathPattern) -> BTreeSet<ElemId> {
        let set = self.set;
        let mut current: BTreeSet<ElemId> = [context].into_iter().collect();
        if pattern.descendant {
            let mut stack: Vec<ElemId> = vec![context];
            while let Some(e) = stack.pop() {
                for child in self.children_of(e) {
                    if current.insert(child) {
                        stack.push(child);
                    }
                }
            }
        }
        for step in &pattern.steps {
            current = current
                .iter()
                .flat_map(|e| self.children_of(*e))
                .filter(|c| step.matches(&set.element(*c).name))
                .collect();
        }
        current
    }

    fn selected(&self, owner: ElemId, selector: &Selector) -> BTreeSet<ElemId> {
        selector.alternatives.iter().flat_map(|p| self.apply(owner, p)).collect()
    }

    fn field_nodes(&self, selected: &BTreeSet<ElemId>, field: &FieldPath) -> BTreeSet<FieldNode> {
        let set = self.set;
        let mut nodes = BTreeSet::new();
        for alternative in &field.alternatives {
            for elem in selected.iter().flat_map(|s| self.apply(*s, &alternative.path)) {
                match &alternative.target {
                    FieldTarget::Element => {
                        nodes.insert(FieldNode::Element(elem));
                    }
                    FieldTarget::Attribute(test) => {
                        if let Some(c) = set.element(elem).type_ref.id().and_then(|t| set.complex(t)) {
                            nodes.extend(
                                c.attributes
                                    .iter()
                                    .filter(|u| test.matches(&u.name))
                                    .map(|u| FieldNode::Attribute(u.decl)),
                            );
                        }
                    }
                }
            }
        }
        nodes
    }

    fn node_type(&self, node: FieldNode) -> Option<TypeId> {
        let set = self.set;
        match node {
            FieldNode::Element(e) => self
                .set
                .element(e)
                .type_ref
                .id()
                .and_then(|t| set.simple_content_type(t)),
            FieldNode::Attribute(a) => set.attribute(a).type_ref.id(),
        }
    }

    fn compatible(&self, a: TypeId, b: TypeId) -> bool {
        let set = self.set;
        a == b
            || set.derivation_methods(a, b).is_some()
            || set.derivation_methods(b, a).is_some()
            || self
                .set
                .primitive_builtin(a)
                .is_some_and(|p| set.primitive_builtin(b) == Some(p))
    }

    fn field_types(&self, idc: &IdentityConstraint) -> Vec<BTreeSet<TypeId>> {
        let selected = self.selected(idc.owner, &idc.selector);
        idc.fields
            .iter()
            .map(|f| {
                self.field_nodes(&selected, f)
                    .into_iter()
                    .filter_map(|n| self.node_type(n))
                    .collect()
            })
            .collect()
    }

    fn check_identities(&mut self) {
        let set = self.set;
        for idc in set.identity_order().into_iter().map(|id| set.identity(id)) {
            match idc.kind {
                IdentityKind::Key => {
                    let selected = self.selected(idc.owner, &idc.selector);
                    for field in &idc.fields {
                        for node in self.field_nodes(&selected, field) {
                            if let FieldNode::Element(e) = node {
                                if set.element(e).nillable {
                                    self.report(
                                        ViolationCode::IdentityConstraintMalformed,
                                        format!(
                                            "key '{}' field '{}' selects the nillable element '{}'",
                                            idc.name,
                                            field,
                                            set.element(e).name
                                        ),
                                        &idc.pos,
                                    );
                                }
                            }
                        }
                    }
                }
                IdentityKind::KeyRef => {
                    let Some(referenced) = idc.referenced.map(|r| set.identity(r)) else {
                        continue;
                    };
                    if referenced.kind == IdentityKind::KeyRef {
                        self.report(
                            ViolationCode::IdentityConstraintMalformed,
                            format!("keyref '{}' refers to the keyref '{}'", idc.name, referenced.name),
                            &idc.pos,
                        );
                        continue;
                    }
                    if referenced.fields.len() != idc.fields.len() {
                        self.report(
                            ViolationCode::IdentityConstraintMalformed,
                            format!(
                                "keyref '{}' has {} fields but '{}' has {}",
                                idc.name,
                                idc.fields.len(),
                                referenced.name,
                                referenced.fields.len()
                            ),
                            &idc.pos,
                        );
                        continue;
                    }
                    let own = self.field_types(idc);
                    let target = self.field_types(referenced);
                    for (i, (a, b)) in own.iter().zip(&target).enumerate() {
                        if a.is_empty() || b.is_empty() {
                            continue;
                        }
                        if !a.iter().any(|x| b.iter().any(|y| self.compatible(*x, *y))) {
                            self.report(
                                ViolationCode::IdentityConstraintMalformed,
                                format!(
                                    "field {} of keyref '{}' is not comparable with '{}'",
                                    i + 1,
                                    idc.name,
                                    referenced.name
                                ),
                                &idc.pos,
                            );
                        }
                    }
                }
                IdentityKind::Unique => {}
            }
        }
    }

    // -------------------------------------------------------------------------
    // Imports
    // -------------------------------------------------------------------------

    fn check_imports(&mut self) {
        let set = self.set;
        let mut reported = BTreeSet::new();
        let mut sites: Vec<_> = set.references.iter().collect();
        sites.sort_by(|a, b| a.name.cmp(&b.name));
        for site in sites {
            if ComponentSet::is_xsd_namespace(site.name.namespace.as_deref()) {
                continue;
            }
            let namespace = site.name.namespace_str().to_string();
            let origin = site.pos.origin.to_string();
            let Some(info) = set.documents.get(&origin) else {
                continue;
            };
            if info.target_namespaces.contains(&namespace) {
                continue;
            }
            if visible_imports(set, &origin).contains(&namespace) {
                continue;
            }
            if reported.insert((origin, namespace.clone())) {
                self.report(
                    ViolationCode::ImportNotDeclared,
                    format!(
                        "{} '{}' is referenced but namespace '{}' is not imported",
                        site.kind, site.name, namespace
                    ),
                    &site.pos,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::parsing::{parse_schema_document, DocumentTarget};
    use crate::validators::resolving::resolve;
    use roxmltree::Document;
    use std::sync::Arc;

    fn checked(text: &str) -> ViolationList {
        let mut set = ComponentSet::new();
        let mut violations = ViolationList::new(0);
        let doc = Document::parse(text).unwrap();
        let tns = doc.root_element().attribute("targetNamespace").map(str::to_string);
        parse_schema_document(
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
        resolve(&mut set, &mut violations);
        check(&mut set, &mut violations);
        violations
    }

    fn schema(body: &str) -> String {
        format!(r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">{}</xs:schema>"#, body)
    }

    #[test]
    fn test_list_default_length() {
        let ok = checked(&schema(
            r#"<xs:simpleType name="pair"><xs:restriction base="xs:NMTOKENS"><xs:length value="2"/></xs:restriction></xs:simpleType>
               <xs:element name="e" type="pair" default="a b"/>"#,
        ));
        assert!(ok.is_empty(), "{}", ok);
        let bad = checked(&schema(
            r#"<xs:simpleType name="pair"><xs:restriction base="xs:NMTOKENS"><xs:length value="2"/></xs:restriction></xs:simpleType>
               <xs:element name="e" type="pair" default="a b c"/>"#,
        ));
        assert_eq!(bad.codes(), vec![ViolationCode::InvalidDefaultOrFixed]);
    }

    #[test]
    fn test_facet_errors() {
        let violations = checked(&schema(
            r#"<xs:simpleType name="a"><xs:restriction base="xs:string"><xs:totalDigits value="3"/></xs:restriction></xs:simpleType>
               <xs:simpleType name="b"><xs:restriction base="xs:int"><xs:maxInclusive value="x"/></xs:restriction></xs:simpleType>
               <xs:simpleType name="c"><xs:restriction base="xs:string"><xs:minLength value="5"/><xs:maxLength value="2"/></xs:restriction></xs:simpleType>
               <xs:simpleType name="d"><xs:restriction base="xs:string"><xs:pattern value="[a-"/></xs:restriction></xs:simpleType>"#,
        ));
        assert_eq!(violations.count_code(ViolationCode::InvalidFacet), 4, "{}", violations);
    }

    #[test]
    fn test_facet_narrowing() {
        let violations = checked(&schema(
            r#"<xs:simpleType name="small"><xs:restriction base="xs:int"><xs:maxInclusive value="10"/></xs:restriction></xs:simpleType>
               <xs:simpleType name="wider"><xs:restriction base="small"><xs:maxInclusive value="20"/></xs:restriction></xs:simpleType>
               <xs:simpleType name="narrower"><xs:restriction base="small"><xs:maxExclusive value="10"/></xs:restriction></xs:simpleType>
               <xs:simpleType name="short"><xs:restriction base="xs:string"><xs:maxLength value="4" fixed="true"/></xs:restriction></xs:simpleType>
               <xs:simpleType name="shorter"><xs:restriction base="short"><xs:maxLength value="3"/></xs:restriction></xs:simpleType>"#,
        ));
        assert_eq!(violations.count_code(ViolationCode::InvalidFacet), 2, "{}", violations);
    }

    #[test]
    fn test_enumeration_validates_against_base() {
        let violations = checked(&schema(
            r#"<xs:simpleType name="dir"><xs:restriction base="xs:int">
                 <xs:enumeration value="1"/><xs:enumeration value="north"/>
               </xs:restriction></xs:simpleType>"#,
        ));
        assert_eq!(violations.codes(), vec![ViolationCode::InvalidFacet]);
    }

    #[test]
    fn test_final_blocks_derivation() {
        let violations = checked(&schema(
            r#"<xs:simpleType name="s" final="restriction"><xs:restriction base="xs:string"/></xs:simpleType>
               <xs:simpleType name="t"><xs:restriction base="s"/></xs:simpleType>
               <xs:complexType name="c" final="extension"><xs:sequence/></xs:complexType>
               <xs:complexType name="d"><xs:complexContent><xs:extension base="c"/></xs:complexContent></xs:complexType>"#,
        ));
        assert_eq!(violations.count_code(ViolationCode::FinalBlocksDerivation), 2, "{}", violations);
    }

    #[test]
    fn test_key_on_nillable_field() {
        let violations = checked(&schema(
            r#"<xs:element name="root">
                 <xs:complexType><xs:sequence>
                   <xs:element name="item" maxOccurs="unbounded">
                     <xs:complexType><xs:sequence>
                       <xs:element name="code" type="xs:string" nillable="true"/>
                     </xs:sequence></xs:complexType>
                   </xs:element>
                 </xs:sequence></xs:complexType>
                 <xs:key name="k"><xs:selector xpath="item"/><xs:field xpath="code"/></xs:key>
               </xs:element>"#,
        ));
        assert_eq!(violations.codes(), vec![ViolationCode::IdentityConstraintMalformed]);
    }

    #[test]
    fn test_keyref_arity() {
        let violations = checked(&schema(
            r#"<xs:element name="root">
                 <xs:complexType><xs:sequence>
                   <xs:element name="item" maxOccurs="unbounded">
                     <xs:complexType>
                       <xs:attribute name="id" type="xs:string"/>
                       <xs:attribute name="ref" type="xs:string"/>
                     </xs:complexType>
                   </xs:element>
                 </xs:sequence></xs:complexType>
                 <xs:key name="k"><xs:selector xpath="item"/><xs:field xpath="@id"/></xs:key>
                 <xs:keyref name="r" refer="k"><xs:selector xpath="item"/><xs:field xpath="@ref"/><xs:field xpath="@id"/></xs:keyref>
               </xs:element>"#,
        ));
        assert_eq!(violations.codes(), vec![ViolationCode::IdentityConstraintMalformed]);
    }

    #[test]
    fn test_substitution_type_mismatch() {
        let violations = checked(&schema(
            r#"<xs:element name="head" type="xs:int"/>
               <xs:element name="member" type="xs:string" substitutionGroup="head"/>"#,
        ));
        assert_eq!(violations.codes(), vec![ViolationCode::InvalidSubstitutionDerivation]);
    }

    #[test]
    fn test_attribute_use_rules() {
        let violations = checked(&schema(
            r#"<xs:attribute name="version" type="xs:decimal" fixed="1.0"/>
               <xs:complexType name="t">
                 <xs:attribute name="a" type="xs:string" use="required" default="x"/>
                 <xs:attribute ref="version" fixed="1.00"/>
               </xs:complexType>
               <xs:complexType name="u">
                 <xs:attribute ref="version" fixed="2"/>
               </xs:complexType>"#,
        ));
        assert_eq!(violations.count_code(ViolationCode::InvalidDefaultOrFixed), 2, "{}", violations);
    }

    #[test]
    fn test_import_not_declared() {
        let violations = checked(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:o="urn:other" targetNamespace="urn:main">
                 <xs:element name="e" type="o:t"/>
               </xs:schema>"#,
        );
        assert!(violations.has_code(ViolationCode::ImportNotDeclared));
        assert!(violations.has_code(ViolationCode::ReferenceNotFound));
    }

    #[test]
    fn test_complex_derivation_rules() {
        let violations = checked(&schema(
            r#"<xs:complexType name="base">
                 <xs:sequence><xs:element name="a" type="xs:string"/></xs:sequence>
                 <xs:attribute name="x" type="xs:string" use="required"/>
               </xs:complexType>
               <xs:complexType name="drop">
                 <xs:complexContent><xs:restriction base="base">
                   <xs:sequence><xs:element name="a" type="xs:string"/></xs:sequence>
                   <xs:attribute name="x" use="prohibited"/>
                 </xs:restriction></xs:complexContent>
               </xs:complexType>
               <xs:complexType name="mixedExt" mixed="true">
                 <xs:complexContent><xs:extension base="base">
                   <xs:sequence><xs:element name="b" type="xs:string"/></xs:sequence>
                 </xs:extension></xs:complexContent>
               </xs:complexType>"#,
        ));
        assert_eq!(violations.count_code(ViolationCode::InvalidDerivation), 2, "{}", violations);
    }

    #[test]
    fn test_notation_enumeration() {
        let violations = checked(&schema(
            r#"<xs:notation name="gif" public="image/gif"/>
               <xs:simpleType name="format"><xs:restriction base="xs:NOTATION">
                 <xs:enumeration value="gif"/>
               </xs:restriction></xs:simpleType>
               <xs:simpleType name="loose"><xs:restriction base="xs:NOTATION"/></xs:simpleType>"#,
        ));
        assert_eq!(violations.codes(), vec![ViolationCode::InvalidFacet]);
    }
}
