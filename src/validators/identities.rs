//! XSD Identity Constraints
//!
//! Streaming evaluation of `xs:unique`, `xs:key` and `xs:keyref`:
//! - a constraint opens a fresh scope at every instance of its declaring
//!   element;
//! - selectors and fields are matched against the element path as start
//!   tags arrive, field values are filled in from attribute values at the
//!   start tag or from the element's simple content at its end tag;
//! - key and unique tables of a closed scope propagate to the enclosing
//!   element, where keyrefs declared on an ancestor can see them.
//!
//! Violations are kept until [`IdentityTracker::finish`] so they can be
//! reported after the document's other violations.

use std::collections::{HashMap, HashSet};

use super::components::{ComponentSet, ElemId, IdcId, IdentityKind};
use super::exceptions::{Violation, ViolationCode};
use super::values::{ValueKey, XsdValue};
use crate::namespaces::QName;
use crate::xpath::FieldTarget;

/// Where an instance element was seen, for violation reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
    /// Element path such as `/root/item`
    pub path: String,
}

/// A key tuple and its display form
type Tuple = (Vec<ValueKey>, String);

#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Value(ValueKey, String),
    /// Selected node had no usable value; the tuple is dropped silently
    Unusable,
    Invalid(String),
}

/// An active constraint scope
#[derive(Debug)]
struct Scope {
    idc: IdcId,
    depth: usize,
    table: HashSet<Vec<ValueKey>>,
    /// Keyref tuples waiting for the scope to close
    references: Vec<(Tuple, Location)>,
}

/// A node picked by a selector, collecting its fields
#[derive(Debug)]
struct Selection {
    scope: usize,
    depth: usize,
    slots: Vec<Slot>,
    /// Element fields to fill from simple content: (field, depth)
    pending: Vec<(usize, usize)>,
    location: Location,
}

/// Identity-constraint state of one validation run
#[derive(Debug)]
pub struct IdentityTracker<'s> {
    set: &'s ComponentSet,
    path: Vec<QName>,
    scopes: Vec<Scope>,
    selections: Vec<Selection>,
    /// Key/unique tables visible at each open element
    tables: Vec<HashMap<IdcId, HashSet<Vec<ValueKey>>>>,
    violations: Vec<Violation>,
}

impl<'s> IdentityTracker<'s> {
    /// Create a tracker for a compiled component set
    pub fn new(set: &'s ComponentSet) -> Self {
        Self {
            set,
            path: Vec::new(),
            scopes: Vec::new(),
            selections: Vec::new(),
            tables: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// An element started.
    ///
    /// `attributes` carries the typed value of every attribute present or
    /// defaulted on the element; `None` marks a value that failed
    /// validation.
    pub fn start_element(
        &mut self,
        name: &QName,
        decl: Option<ElemId>,
        attributes: &[(QName, Option<XsdValue>)],
        location: impl FnOnce() -> Location,
    ) {
        let depth = self.path.len();
        self.path.push(name.clone());
        self.tables.push(HashMap::new());

        if let Some(decl) = decl {
            for idc in &self.set.element(decl).identity_constraints {
                self.scopes.push(Scope {
                    idc: *idc,
                    depth,
                    table: HashSet::new(),
                    references: Vec::new(),
                });
            }
        }
        if self.scopes.is_empty() {
            return;
        }

        let mut location = Some(location);
        let mut resolved_location: Option<Location> = None;
        for (index, scope) in self.scopes.iter().enumerate() {
            let idc = self.set.identity(scope.idc);
            if idc.selector.matches(&self.path[scope.depth + 1..]) {
                let loc = match &resolved_location {
                    Some(l) => l.clone(),
                    None => {
                        let l = location.take().map(|f| f()).unwrap_or_else(|| Location {
                            line: 0,
                            column: 0,
                            path: String::new(),
                        });
                        resolved_location = Some(l.clone());
                        l
                    }
                };
                self.selections.push(Selection {
                    scope: index,
                    depth,
                    slots: vec![Slot::Empty; idc.fields.len()],
                    pending: Vec::new(),
                    location: loc,
                });
            }
        }

        for selection in &mut self.selections {
            let idc = self.set.identity(self.scopes[selection.scope].idc);
            let relative = &self.path[selection.depth + 1..];
            for (i, field) in idc.fields.iter().enumerate() {
                for alternative in field.matching(relative) {
                    match &alternative.target {
                        FieldTarget::Element => selection.pending.push((i, depth)),
                        FieldTarget::Attribute(test) => {
                            for (attr, value) in attributes.iter().filter(|(n, _)| test.matches(n)) {
                                fill(&mut selection.slots[i], value.as_ref(), attr, &field.source);
                            }
                        }
                    }
                }
            }
        }
    }

    /// The current element ended.
    ///
    /// `value` is its simple content value; `None` when it has complex
    /// content or its content failed validation (`simple` tells which).
    pub fn end_element(&mut self, value: Option<&XsdValue>, simple: bool) {
        let Some(depth) = self.path.len().checked_sub(1) else {
            return;
        };
        let name = self.path[depth].clone();

        for selection in &mut self.selections {
            let mut i = 0;
            while i < selection.pending.len() {
                let (field, at) = selection.pending[i];
                if at != depth {
                    i += 1;
                    continue;
                }
                selection.pending.swap_remove(i);
                let source = &self.set.identity(self.scopes[selection.scope].idc).fields[field].source;
                if simple {
                    fill(&mut selection.slots[field], value, &name, source);
                } else {
                    selection.slots[field] = Slot::Invalid(format!(
                        "field '{}' selects element {} which does not have simple content",
                        source, name
                    ));
                }
            }
        }

        let mut closed = Vec::new();
        let mut i = 0;
        while i < self.selections.len() {
            if self.selections[i].depth == depth {
                closed.push(self.selections.swap_remove(i));
            } else {
                i += 1;
            }
        }
        closed.sort_by_key(|s| (s.location.line, s.location.column, s.scope));
        for selection in closed {
            self.finish_selection(selection);
        }

        self.close_scopes(depth);
        self.path.pop();
        if let Some(tables) = self.tables.pop() {
            if let Some(parent) = self.tables.last_mut() {
                for (idc, table) in tables {
                    parent.entry(idc).or_default().extend(table);
                }
            }
        }
    }

    fn finish_selection(&mut self, selection: Selection) {
        let set = self.set;
        let scope = &mut self.scopes[selection.scope];
        let idc = set.identity(scope.idc);
        let mut keys = Vec::with_capacity(selection.slots.len());
        let mut shown = Vec::with_capacity(selection.slots.len());
        for (slot, field) in selection.slots.into_iter().zip(&idc.fields) {
            match slot {
                Slot::Value(key, text) => {
                    keys.push(key);
                    shown.push(text);
                }
                Slot::Invalid(message) => {
                    self.violations.push(located(ViolationCode::IdentityFieldInvalid, message, &selection.location));
                    return;
                }
                Slot::Unusable => return,
                Slot::Empty => {
                    if idc.kind == IdentityKind::Key {
                        self.violations.push(located(
                            ViolationCode::IdentityFieldInvalid,
                            format!("key {} field '{}' selects no value", idc.name, field.source),
                            &selection.location,
                        ));
                    }
                    return;
                }
            }
        }
        let shown = shown.join(", ");
        match idc.kind {
            IdentityKind::Key | IdentityKind::Unique => {
                if !scope.table.insert(keys) {
                    self.violations.push(located(
                        ViolationCode::DuplicateKey,
                        format!("duplicate value ({}) for {} {}", shown, idc.kind, idc.name),
                        &selection.location,
                    ));
                }
            }
            IdentityKind::KeyRef => scope.references.push(((keys, shown), selection.location)),
        }
    }

    /// Close the scopes opened at `depth`: tables first, then keyrefs.
    /// They sit at the tail of the scope stack, above every scope a live
    /// selection refers to.
    fn close_scopes(&mut self, depth: usize) {
        let set = self.set;
        let Some(at) = self.scopes.iter().position(|s| s.depth == depth) else {
            return;
        };
        let mut closing = self.scopes.split_off(at);
        let Some(here) = self.tables.last_mut() else {
            return;
        };
        for scope in closing.iter_mut() {
            if set.identity(scope.idc).kind != IdentityKind::KeyRef {
                here.entry(scope.idc).or_default().extend(std::mem::take(&mut scope.table));
            }
        }
        for scope in closing {
            let idc = set.identity(scope.idc);
            if idc.kind != IdentityKind::KeyRef {
                continue;
            }
            let Some(refer) = idc.referenced else {
                continue;
            };
            let table = here.get(&refer);
            for ((keys, shown), location) in scope.references {
                if !table.is_some_and(|t| t.contains(&keys)) {
                    self.violations.push(located(
                        ViolationCode::UnresolvedKeyref,
                        format!(
                            "keyref {} value ({}) matches no {} value",
                            idc.name,
                            shown,
                            set.identity(refer).name
                        ),
                        &location,
                    ));
                }
            }
        }
    }

    /// Violations found, in the order the offending nodes were closed
    pub fn finish(self) -> Vec<Violation> {
        self.violations
    }
}

fn fill(slot: &mut Slot, value: Option<&XsdValue>, node: &QName, source: &str) {
    *slot = match (&*slot, value) {
        (Slot::Empty, Some(value)) => Slot::Value(value.key(), value.canonical()),
        (Slot::Empty, None) => Slot::Unusable,
        (Slot::Invalid(_), _) => return,
        _ => Slot::Invalid(format!("field '{}' selects more than one node ({})", source, node)),
    };
}

fn located(code: ViolationCode, message: String, location: &Location) -> Violation {
    let violation = Violation::new(code, message).with_position(location.line, location.column);
    if location.path.is_empty() {
        violation
    } else {
        violation.with_path(location.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespaces::NamespaceContext;
    use crate::validators::components::{DerivationSet, ElementDecl, IdentityConstraint, TypeRef};
    use crate::validators::exceptions::SourcePos;
    use crate::xpath::{FieldPath, Selector};
    use std::sync::Arc;

    fn pos() -> SourcePos {
        SourcePos::unknown(Arc::from("test.xsd"))
    }

    fn element(set: &mut ComponentSet, name: &str) -> ElemId {
        set.add_element(ElementDecl {
            name: QName::local(name),
            type_ref: TypeRef::Unspecified,
            type_explicit: false,
            nillable: false,
            default: None,
            fixed: None,
            abstract_: false,
            block: DerivationSet::empty(),
            final_: DerivationSet::empty(),
            substitution_head: None,
            head: None,
            identity_constraints: Vec::new(),
            global: true,
            pos: pos(),
        })
    }

    fn constraint(
        set: &mut ComponentSet,
        owner: ElemId,
        name: &str,
        kind: IdentityKind,
        selector: &str,
        fields: &[&str],
        referenced: Option<IdcId>,
    ) -> IdcId {
        let ns = NamespaceContext::new();
        let id = set.add_identity(IdentityConstraint {
            name: QName::local(name),
            kind,
            selector: Selector::parse(selector, &ns).unwrap(),
            fields: fields.iter().map(|f| FieldPath::parse(f, &ns).unwrap()).collect(),
            refer: None,
            referenced,
            owner,
            pos: pos(),
        });
        set.elements[owner.0].identity_constraints.push(id);
        id
    }

    fn here() -> Location {
        Location {
            line: 1,
            column: 1,
            path: "/root".to_string(),
        }
    }

    fn item(tracker: &mut IdentityTracker<'_>, attrs: &[(&str, &str)]) {
        let attributes: Vec<(QName, Option<XsdValue>)> = attrs
            .iter()
            .map(|(n, v)| (QName::local(*n), Some(XsdValue::String(v.to_string()))))
            .collect();
        tracker.start_element(&QName::local("item"), None, &attributes, here);
        tracker.end_element(None, false);
    }

    fn keyed_root() -> (ComponentSet, ElemId) {
        let mut set = ComponentSet::new();
        let root = element(&mut set, "root");
        let key = constraint(&mut set, root, "itemKey", IdentityKind::Key, "item", &["@id"], None);
        constraint(&mut set, root, "itemRef", IdentityKind::KeyRef, "item", &["@ref"], Some(key));
        (set, root)
    }

    #[test]
    fn test_duplicate_key() {
        let (set, root) = keyed_root();
        let mut tracker = IdentityTracker::new(&set);
        tracker.start_element(&QName::local("root"), Some(root), &[], here);
        item(&mut tracker, &[("id", "a")]);
        item(&mut tracker, &[("id", "a")]);
        tracker.end_element(None, false);
        let violations = tracker.finish();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].code, ViolationCode::DuplicateKey);
        assert!(violations[0].message.contains("itemKey"));
    }

    #[test]
    fn test_keyref_resolution() {
        let (set, root) = keyed_root();
        let mut tracker = IdentityTracker::new(&set);
        tracker.start_element(&QName::local("root"), Some(root), &[], here);
        item(&mut tracker, &[("id", "a"), ("ref", "a")]);
        tracker.end_element(None, false);
        assert!(tracker.finish().is_empty());

        let mut tracker = IdentityTracker::new(&set);
        tracker.start_element(&QName::local("root"), Some(root), &[], here);
        item(&mut tracker, &[("id", "a"), ("ref", "b")]);
        tracker.end_element(None, false);
        let violations = tracker.finish();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].code, ViolationCode::UnresolvedKeyref);
    }

    #[test]
    fn test_missing_key_field() {
        let (set, root) = keyed_root();
        let mut tracker = IdentityTracker::new(&set);
        tracker.start_element(&QName::local("root"), Some(root), &[], here);
        item(&mut tracker, &[]);
        tracker.end_element(None, false);
        let codes: Vec<_> = tracker.finish().into_iter().map(|v| v.code).collect();
        assert_eq!(codes, vec![ViolationCode::IdentityFieldInvalid]);
    }

    #[test]
    fn test_element_field_and_scopes() {
        let mut set = ComponentSet::new();
        let root = element(&mut set, "root");
        let group = element(&mut set, "group");
        constraint(&mut set, group, "uniqueCode", IdentityKind::Unique, "item", &["code"], None);
        let mut tracker = IdentityTracker::new(&set);
        tracker.start_element(&QName::local("root"), Some(root), &[], here);
        for _ in 0..2 {
            // same code in two scopes is fine
            tracker.start_element(&QName::local("group"), Some(group), &[], here);
            tracker.start_element(&QName::local("item"), None, &[], here);
            tracker.start_element(&QName::local("code"), None, &[], here);
            tracker.end_element(Some(&XsdValue::String("x".into())), true);
            tracker.end_element(None, false);
            tracker.end_element(None, false);
        }
        tracker.end_element(None, false);
        assert!(tracker.finish().is_empty());
    }

    #[test]
    fn test_typed_equality() {
        use bigdecimal::BigDecimal;
        let mut set = ComponentSet::new();
        let root = element(&mut set, "root");
        constraint(&mut set, root, "u", IdentityKind::Unique, "item", &["@n"], None);
        let mut tracker = IdentityTracker::new(&set);
        tracker.start_element(&QName::local("root"), Some(root), &[], here);
        for text in ["1.0", "1"] {
            let value = XsdValue::Decimal(text.parse::<BigDecimal>().unwrap());
            tracker.start_element(&QName::local("item"), None, &[(QName::local("n"), Some(value))], here);
            tracker.end_element(None, false);
        }
        tracker.end_element(None, false);
        let codes: Vec<_> = tracker.finish().into_iter().map(|v| v.code).collect();
        assert_eq!(codes, vec![ViolationCode::DuplicateKey]);
    }
}
