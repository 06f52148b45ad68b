//! Streaming Validation Engine
//!
//! [`Engine`] consumes tokens from an [`XmlTokenizer`] and keeps one frame
//! per open element holding the element's declaration, its governing type
//! and the state of its content automaton. Attributes are checked at the
//! start tag, character content is buffered only for simple content, and
//! identity constraints and ID/IDREF consistency are settled when the
//! document ends.
//!
//! Validation never stops at the first violation; only malformed input or
//! a breached resource cap ends the walk early.

use std::collections::HashSet;
use std::io::BufRead;

use super::automata::{ContentAutomaton, Match};
use super::builtins::Builtin;
use super::components::{
    AttributeUse, ComponentSet, ContentType, ElemId, IdClass, TypeDef, TypeId, ValueConstraint,
};
use super::exceptions::{Violation, ViolationCode, ViolationList};
use super::identities::{IdentityTracker, Location};
use super::simple_types::validate_simple;
use super::values::XsdValue;
use super::wildcards::{ProcessContents, Wildcard};
use crate::documents::{StartTag, Token, XmlTokenizer};
use crate::namespaces::{NamespaceResolver, QName, XSI_NAMESPACE};
use crate::options::RuntimeOptions;

/// How the children of an open element are checked
#[derive(Debug, Clone, Copy)]
enum Content<'s> {
    /// No children, no character data
    Empty,
    /// Character data of a simple type
    Simple(TypeId),
    /// Children driven by a content automaton
    Elements {
        automaton: &'s ContentAutomaton,
        state: u64,
        mixed: bool,
    },
    /// `xs:anyType` or an undeclared element met laxly
    AnyType,
    /// Inside a `processContents="skip"` subtree
    Skip,
}

#[derive(Debug)]
struct Frame<'s> {
    name: QName,
    decl: Option<ElemId>,
    content: Content<'s>,
    text: String,
    nilled: bool,
    has_children: bool,
    /// Non-whitespace character data was seen
    has_text: bool,
    /// Character-content violation already reported
    text_reported: bool,
    /// Fed to the identity tracker
    tracked: bool,
}

/// Position of the current token
struct Here<'t> {
    ns: &'t dyn NamespaceResolver,
    line: u32,
    column: u32,
    document: Option<&'t str>,
}

/// Schema-location hints of a start tag: `(namespace, location)` pairs
pub fn schema_location_hints(tag: &StartTag) -> Vec<(Option<String>, String)> {
    let mut hints = Vec::new();
    if let Some(value) = tag.attribute(&QName::namespaced(XSI_NAMESPACE, "schemaLocation")) {
        let tokens: Vec<&str> = value.split_whitespace().collect();
        for pair in tokens.chunks(2) {
            if let [ns, location] = pair {
                hints.push((Some(ns.to_string()), location.to_string()));
            }
        }
    }
    if let Some(value) = tag.attribute(&QName::namespaced(XSI_NAMESPACE, "noNamespaceSchemaLocation")) {
        let location = value.trim();
        if !location.is_empty() {
            hints.push((None, location.to_string()));
        }
    }
    hints
}

/// Render an element path such as `/person/age`
pub fn format_path<'a>(names: impl Iterator<Item = &'a QName>) -> String {
    let mut path = String::new();
    for name in names {
        path.push('/');
        path.push_str(&name.local_name);
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

/// Validation state of one document
pub struct Engine<'s> {
    set: &'s ComponentSet,
    models: &'s [Option<ContentAutomaton>],
    frames: Vec<Frame<'s>>,
    violations: ViolationList,
    identities: IdentityTracker<'s>,
    ids: HashSet<String>,
    /// Pending IDREF values with where they were seen
    idrefs: Vec<(String, Location, Option<String>)>,
    /// Identity failures reported after the walk
    deferred: Vec<Violation>,
    options: RuntimeOptions,
    finished: bool,
}

impl<'s> Engine<'s> {
    /// Create an engine over a compiled component set and its content
    /// automata (indexed by type)
    pub fn new(set: &'s ComponentSet, models: &'s [Option<ContentAutomaton>], options: &RuntimeOptions) -> Self {
        Self {
            set,
            models,
            frames: Vec::new(),
            violations: ViolationList::new(options.max_violations),
            identities: IdentityTracker::new(set),
            ids: HashSet::new(),
            idrefs: Vec::new(),
            deferred: Vec::new(),
            options: *options,
            finished: false,
        }
    }

    /// Validate every remaining token; `first` is a token already read
    /// from the tokenizer
    pub fn run<R: BufRead>(mut self, tokenizer: &mut XmlTokenizer<R>, first: Option<Token>) -> ViolationList {
        if let Some(token) = first {
            self.handle(token, tokenizer);
        }
        while !self.finished {
            match tokenizer.next_token() {
                Ok(token) => self.handle(token, tokenizer),
                Err(violation) => {
                    let path = self.path(None);
                    self.violations.push(violation.with_path(path));
                    self.finished = true;
                }
            }
        }
        self.finish()
    }

    /// Record a violation found outside the token stream
    pub fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    /// Handle one token
    pub fn handle<R: BufRead>(&mut self, token: Token, tokenizer: &XmlTokenizer<R>) {
        if self.finished {
            return;
        }
        let (line, column) = tokenizer.position();
        let here = Here {
            ns: tokenizer,
            line,
            column,
            document: tokenizer.system_id(),
        };
        match token {
            Token::StartElement => self.start_element(tokenizer.start_tag(), &here),
            Token::Text => self.characters(tokenizer.text(), &here),
            Token::EndElement => self.end_element(&here),
            Token::Eof => self.end_document(),
        }
    }

    /// Close the run and hand back every violation
    pub fn finish(mut self) -> ViolationList {
        if !self.finished {
            self.end_document();
        }
        self.violations
    }

    fn path(&self, extra: Option<&QName>) -> String {
        format_path(self.frames.iter().map(|f| &f.name).chain(extra))
    }

    fn report(&mut self, here: &Here<'_>, code: ViolationCode, message: String, extra: Option<&QName>) {
        let mut violation = Violation::new(code, message)
            .with_position(here.line, here.column)
            .with_path(self.path(extra));
        if let Some(document) = here.document {
            violation = violation.with_document(document);
        }
        self.violations.push(violation);
    }

    fn location(&self, here: &Here<'_>, extra: Option<&QName>) -> Location {
        Location {
            line: here.line,
            column: here.column,
            path: self.path(extra),
        }
    }

    // =========================================================================
    // Start tags
    // =========================================================================

    fn start_element(&mut self, tag: &StartTag, here: &Here<'_>) {
        let set = self.set;
        let name = &tag.name;
        if let Some(parent) = self.frames.last_mut() {
            parent.has_children = true;
        }

        let decl = match self.child_declaration(name, here) {
            Ok(decl) => decl,
            Err(content) => {
                self.push_frame(name, None, content, false, false);
                return;
            }
        };

        let mut content_type: Option<TypeId> = None;
        let mut nilled = false;
        if let Some(decl) = decl {
            let d = set.element(decl);
            if d.abstract_ {
                self.report(
                    here,
                    ViolationCode::UnexpectedElement,
                    format!("element {} is abstract", name),
                    Some(name),
                );
            }
            content_type = Some(d.type_ref.id().unwrap_or(ComponentSet::builtin(Builtin::AnyType)));
        }

        // xsi:type
        let xsi_type = QName::namespaced(XSI_NAMESPACE, "type");
        if let Some(lexical) = tag.attribute(&xsi_type) {
            match self.substituted_type(lexical, decl, content_type, here) {
                Ok(ty) => content_type = Some(ty),
                Err(message) => self.report(here, ViolationCode::XsiTypeInvalid, message, Some(name)),
            }
        } else if let Some(ty) = content_type {
            if set.complex(ty).is_some_and(|c| c.abstract_) {
                self.report(
                    here,
                    ViolationCode::XsiTypeInvalid,
                    format!("type {} of element {} is abstract", set.type_name(ty), name),
                    Some(name),
                );
            }
        }

        // xsi:nil
        if let Some(value) = tag.attribute(&QName::namespaced(XSI_NAMESPACE, "nil")) {
            match value.trim() {
                "true" | "1" => match decl {
                    Some(d) if set.element(d).nillable => nilled = true,
                    _ => self.report(
                        here,
                        ViolationCode::ElementNotNillable,
                        format!("element {} is not nillable", name),
                        Some(name),
                    ),
                },
                "false" | "0" => {}
                other => self.report(
                    here,
                    ViolationCode::InvalidAttributeValue,
                    format!("'{}' is not a valid xsi:nil value", other),
                    Some(name),
                ),
            }
        }

        let attributes = self.check_attributes(tag, content_type, here);

        let frames = &self.frames;
        let location = || Location {
            line: here.line,
            column: here.column,
            path: format_path(frames.iter().map(|f| &f.name).chain(Some(name))),
        };
        self.identities.start_element(name, decl, &attributes, location);

        let content = match content_type {
            Some(ty) => self.content_of(ty),
            None => Content::AnyType,
        };
        self.push_frame(name, decl, content, nilled, true);
    }

    fn push_frame(&mut self, name: &QName, decl: Option<ElemId>, content: Content<'s>, nilled: bool, tracked: bool) {
        self.frames.push(Frame {
            name: name.clone(),
            decl,
            content,
            text: String::new(),
            nilled,
            has_children: false,
            has_text: false,
            text_reported: false,
            tracked,
        });
    }

    /// The declaration governing a new element, `Ok(None)` for an element
    /// assessed laxly without one, or the content mode of a subtree that is
    /// not assessed
    fn child_declaration(&mut self, name: &QName, here: &Here<'_>) -> Result<Option<ElemId>, Content<'s>> {
        let set = self.set;
        let Some(parent) = self.frames.last() else {
            return match set.element_names.get(name) {
                Some(id) => Ok(Some(*id)),
                None => {
                    self.report(
                        here,
                        ViolationCode::UnexpectedElement,
                        format!("no global declaration for root element {}", name),
                        Some(name),
                    );
                    Err(Content::Skip)
                }
            };
        };
        let (content, parent_nilled) = (parent.content, parent.nilled);
        match content {
            Content::Skip => Err(Content::Skip),
            Content::AnyType => Ok(set.element_names.get(name).copied()),
            Content::Empty | Content::Simple(_) => {
                if !parent_nilled {
                    self.report(
                        here,
                        ViolationCode::UnexpectedElement,
                        format!("element {} is not allowed: the parent does not have element content", name),
                        Some(name),
                    );
                }
                Err(Content::Skip)
            }
            Content::Elements { automaton, state, mixed } => match automaton.step(state, name) {
                None => {
                    if !parent_nilled {
                        let expected = automaton.expected(state);
                        let message = if expected.is_empty() {
                            format!("element {} is not expected here: no more elements are allowed", name)
                        } else {
                            format!("element {} is not expected here; expected {}", name, expected.join(", "))
                        };
                        self.report(here, ViolationCode::UnexpectedElement, message, Some(name));
                    }
                    Err(Content::Skip)
                }
                Some((next, matched)) => {
                    if let Some(frame) = self.frames.last_mut() {
                        frame.content = Content::Elements { automaton, state: next, mixed };
                    }
                    match matched {
                        Match::Element(id) => Ok(Some(id)),
                        Match::Wildcard(wildcard) => self.wildcard_declaration(wildcard, name, here),
                    }
                }
            },
        }
    }

    fn wildcard_declaration(
        &mut self,
        wildcard: &Wildcard,
        name: &QName,
        here: &Here<'_>,
    ) -> Result<Option<ElemId>, Content<'s>> {
        match wildcard.process_contents {
            ProcessContents::Skip => Err(Content::Skip),
            ProcessContents::Lax => Ok(self.set.element_names.get(name).copied()),
            ProcessContents::Strict => match self.set.element_names.get(name) {
                Some(id) => Ok(Some(*id)),
                None => {
                    self.report(
                        here,
                        ViolationCode::UnexpectedElement,
                        format!("no declaration found for element {} matched by a strict wildcard", name),
                        Some(name),
                    );
                    Err(Content::Skip)
                }
            },
        }
    }

    fn substituted_type(
        &self,
        lexical: &str,
        decl: Option<ElemId>,
        declared: Option<TypeId>,
        here: &Here<'_>,
    ) -> Result<TypeId, String> {
        let set = self.set;
        let qname = here
            .ns
            .resolve_qname(lexical.trim())
            .map_err(|e| format!("xsi:type '{}' is not a valid QName: {}", lexical.trim(), e))?;
        let ty = *set
            .type_names
            .get(&qname)
            .ok_or_else(|| format!("xsi:type {} names no type", qname))?;
        let declared = declared.unwrap_or(ComponentSet::builtin(Builtin::AnyType));
        let mut blocked = decl.map(|d| set.element(d).block).unwrap_or_default();
        if let Some(c) = set.complex(declared) {
            blocked = blocked.union(c.block);
        }
        if !set.is_derived_from(ty, declared, blocked) {
            return Err(format!(
                "xsi:type {} is not validly derived from {}",
                qname,
                set.type_name(declared)
            ));
        }
        if set.complex(ty).is_some_and(|c| c.abstract_) {
            return Err(format!("xsi:type {} is abstract", qname));
        }
        Ok(ty)
    }

    fn content_of(&self, ty: TypeId) -> Content<'s> {
        let set = self.set;
        match set.type_def(ty) {
            TypeDef::Builtin(Builtin::AnyType) => Content::AnyType,
            TypeDef::Builtin(_) | TypeDef::Simple(_) => Content::Simple(ty),
            TypeDef::Complex(c) => match &c.content {
                ContentType::Empty => Content::Empty,
                ContentType::Simple(t) => Content::Simple(*t),
                ContentType::ElementOnly(_) | ContentType::Mixed(_) => {
                    let mixed = matches!(c.content, ContentType::Mixed(_));
                    match self.models.get(ty.0).and_then(Option::as_ref) {
                        Some(automaton) => Content::Elements {
                            automaton,
                            state: automaton.initial(),
                            mixed,
                        },
                        None => Content::AnyType,
                    }
                }
            },
        }
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    /// Check the attributes of a start tag.
    ///
    /// Returns the typed value (or `None` for an invalid value) of every
    /// attribute present or defaulted, for identity-constraint fields.
    fn check_attributes(
        &mut self,
        tag: &StartTag,
        ty: Option<TypeId>,
        here: &Here<'_>,
    ) -> Vec<(QName, Option<XsdValue>)> {
        let set = self.set;
        let element = &tag.name;
        let complex = ty.and_then(|t| set.complex(t));
        let any_type = ty.map_or(true, |t| t == ComponentSet::builtin(Builtin::AnyType));
        let mut values = Vec::with_capacity(tag.attributes.len());
        let mut seen: Vec<&QName> = Vec::new();

        for attr in &tag.attributes {
            if attr.name.in_namespace(Some(XSI_NAMESPACE)) {
                if !matches!(
                    attr.name.local_name.as_str(),
                    "type" | "nil" | "schemaLocation" | "noNamespaceSchemaLocation"
                ) {
                    self.report(
                        here,
                        ViolationCode::UnexpectedAttribute,
                        format!("attribute {} is not defined in the XSI namespace", attr.name),
                        Some(element),
                    );
                }
                continue;
            }
            let declared: Option<&AttributeUse> = complex.and_then(|c| c.attribute(&attr.name));
            if let Some(use_) = declared {
                seen.push(&use_.name);
                let attr_ty = set.attribute(use_.decl).type_ref.id();
                let value = self.attribute_value(attr_ty, &attr.name, &attr.value, use_.fixed.as_ref(), element, here);
                values.push((attr.name.clone(), value));
                continue;
            }
            let wildcard = if any_type {
                Some(Wildcard::any_lax())
            } else {
                complex.and_then(|c| c.attribute_wildcard.clone())
            };
            match wildcard {
                Some(w) if w.allows(attr.name.namespace_str()) => {
                    let global = set.attribute_names.get(&attr.name).copied();
                    match (w.process_contents, global) {
                        (ProcessContents::Skip, _) => {}
                        (_, Some(id)) => {
                            let decl = set.attribute(id);
                            let value = self.attribute_value(
                                decl.type_ref.id(),
                                &attr.name,
                                &attr.value,
                                decl.fixed.as_ref(),
                                element,
                                here,
                            );
                            values.push((attr.name.clone(), value));
                        }
                        (ProcessContents::Lax, None) => {
                            values.push((attr.name.clone(), Some(XsdValue::String(attr.value.clone()))));
                        }
                        (ProcessContents::Strict, None) => self.report(
                            here,
                            ViolationCode::UnexpectedAttribute,
                            format!("no declaration found for attribute {} matched by a strict wildcard", attr.name),
                            Some(element),
                        ),
                    }
                }
                _ => self.report(
                    here,
                    ViolationCode::UnexpectedAttribute,
                    format!("attribute {} is not allowed on element {}", attr.name, element),
                    Some(element),
                ),
            }
        }

        if let Some(c) = complex {
            for use_ in &c.attributes {
                if seen.contains(&&use_.name) {
                    continue;
                }
                if use_.required {
                    self.report(
                        here,
                        ViolationCode::MissingRequiredAttribute,
                        format!("required attribute {} is missing on element {}", use_.name, element),
                        Some(element),
                    );
                } else if let Some(constraint) = use_.fixed.as_ref().or(use_.default.as_ref()) {
                    let value = set
                        .attribute(use_.decl)
                        .type_ref
                        .id()
                        .and_then(|t| validate_simple(set, t, &constraint.lexical, &constraint.ns).ok());
                    values.push((use_.name.clone(), value));
                }
            }
        }
        values
    }

    fn attribute_value(
        &mut self,
        ty: Option<TypeId>,
        name: &QName,
        text: &str,
        fixed: Option<&ValueConstraint>,
        element: &QName,
        here: &Here<'_>,
    ) -> Option<XsdValue> {
        let set = self.set;
        let ty = ty.unwrap_or(ComponentSet::builtin(Builtin::AnySimpleType));
        let value = match validate_simple(set, ty, text, here.ns) {
            Ok(value) => value,
            Err(e) => {
                self.report(
                    here,
                    ViolationCode::InvalidAttributeValue,
                    format!("invalid value for attribute {}: {}", name, e),
                    Some(element),
                );
                return None;
            }
        };
        if let Some(fixed) = fixed {
            let expected = validate_simple(set, ty, &fixed.lexical, &fixed.ns).ok();
            if !expected.as_ref().is_some_and(|f| f.value_eq(&value)) {
                self.report(
                    here,
                    ViolationCode::InvalidAttributeValue,
                    format!("attribute {} must have the fixed value '{}'", name, fixed.lexical),
                    Some(element),
                );
                return None;
            }
        }
        self.record_ids(ty, &value, here, Some(element));
        Some(value)
    }

    fn record_ids(&mut self, ty: TypeId, value: &XsdValue, here: &Here<'_>, extra: Option<&QName>) {
        match self.set.id_class(ty) {
            IdClass::None => {}
            IdClass::Id => {
                let id = value.to_string();
                if !self.ids.insert(id.clone()) {
                    let location = self.location(here, extra);
                    self.deferred.push(located(
                        ViolationCode::DuplicateId,
                        format!("ID '{}' is not unique in the document", id),
                        &location,
                        here.document,
                    ));
                }
            }
            IdClass::IdRef => {
                let location = self.location(here, extra);
                let document = here.document.map(str::to_string);
                self.idrefs.push((value.to_string(), location, document));
            }
            IdClass::IdRefs => {
                if let XsdValue::List(items) = value {
                    for item in items {
                        let location = self.location(here, extra);
                        let document = here.document.map(str::to_string);
                        self.idrefs.push((item.to_string(), location, document));
                    }
                }
            }
        }
    }

    // =========================================================================
    // Character data and end tags
    // =========================================================================

    fn characters(&mut self, text: &str, here: &Here<'_>) {
        let options = self.options;
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        let significant = !text.trim().is_empty();
        if significant {
            frame.has_text = true;
        }
        let report = match frame.content {
            Content::Skip | Content::AnyType => None,
            Content::Simple(_) => {
                frame.text.push_str(text);
                options
                    .check_token_size(frame.text.len())
                    .err()
                    .map(|e| (ViolationCode::LimitExceeded, e.to_string()))
            }
            Content::Elements { mixed: true, .. } => None,
            Content::Empty | Content::Elements { .. } if significant && !frame.nilled && !frame.text_reported => {
                frame.text_reported = true;
                Some((
                    ViolationCode::InvalidCharacterContent,
                    format!("character data is not allowed in element {}", frame.name),
                ))
            }
            Content::Empty | Content::Elements { .. } => None,
        };
        if let Some((code, message)) = report {
            self.report(here, code, message, None);
            if code == ViolationCode::LimitExceeded {
                self.finished = true;
            }
        }
    }

    fn end_element(&mut self, here: &Here<'_>) {
        let Some(frame) = self.frames.last() else {
            return;
        };
        let (content, nilled, tracked) = (frame.content, frame.nilled, frame.tracked);
        let had_content = frame.has_children || frame.has_text;
        let mut value: Option<XsdValue> = None;
        let mut simple = false;

        if nilled {
            if had_content {
                let message = format!("element {} is nilled but has content", self.current_name());
                self.report(here, ViolationCode::NilledWithContent, message, None);
            }
            simple = true;
        } else {
            match content {
                Content::Simple(ty) => {
                    simple = true;
                    value = self.simple_content(ty, here);
                }
                Content::Elements { automaton, state, .. } => {
                    if !automaton.is_accepting(state) {
                        let message = format!(
                            "content of element {} is incomplete; expected {}",
                            self.current_name(),
                            automaton.expected(state).join(", ")
                        );
                        self.report(here, ViolationCode::IncompleteContent, message, None);
                    }
                }
                Content::Empty | Content::AnyType | Content::Skip => {}
            }
        }

        if tracked {
            self.identities.end_element(value.as_ref(), simple);
        }
        self.frames.pop();
    }

    fn current_name(&self) -> String {
        self.frames.last().map(|f| f.name.to_string()).unwrap_or_default()
    }

    fn simple_content(&mut self, ty: TypeId, here: &Here<'_>) -> Option<XsdValue> {
        let set = self.set;
        let frame = self.frames.last()?;
        let decl = frame.decl.map(|d| set.element(d));
        let mut text = std::mem::take(&mut self.frames.last_mut()?.text);
        let mut constraint_ns = None;
        if text.is_empty() {
            if let Some(c) = decl.and_then(|d| d.fixed.as_ref().or(d.default.as_ref())) {
                text = c.lexical.clone();
                constraint_ns = Some(&c.ns);
            }
        }
        let ns: &dyn NamespaceResolver = match constraint_ns {
            Some(ns) => ns,
            None => here.ns,
        };
        let result = validate_simple(set, ty, &text, ns);
        let name = self.current_name();
        let value = match result {
            Ok(value) => value,
            Err(e) => {
                self.report(
                    here,
                    ViolationCode::InvalidCharacterContent,
                    format!("invalid content for element {}: {}", name, e),
                    None,
                );
                return None;
            }
        };
        if let Some(fixed) = decl.and_then(|d| d.fixed.as_ref()) {
            let expected = validate_simple(set, ty, &fixed.lexical, &fixed.ns).ok();
            if !expected.as_ref().is_some_and(|f| f.value_eq(&value)) {
                self.report(
                    here,
                    ViolationCode::InvalidCharacterContent,
                    format!("element {} must have the fixed value '{}'", name, fixed.lexical),
                    None,
                );
                return None;
            }
        }
        self.record_ids(ty, &value, here, None);
        Some(value)
    }

    fn end_document(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let identities = std::mem::replace(&mut self.identities, IdentityTracker::new(self.set));
        self.violations.extend(identities.finish());
        self.violations.extend(self.deferred.drain(..));
        let ids = &self.ids;
        for (idref, location, document) in self.idrefs.drain(..) {
            if !ids.contains(&idref) {
                self.violations.push(located(
                    ViolationCode::UnresolvedIdRef,
                    format!("IDREF '{}' matches no ID in the document", idref),
                    &location,
                    document.as_deref(),
                ));
            }
        }
    }
}

fn located(code: ViolationCode, message: String, location: &Location, document: Option<&str>) -> Violation {
    let violation = Violation::new(code, message)
        .with_position(location.line, location.column)
        .with_path(location.path.clone());
    match document {
        Some(document) => violation.with_document(document),
        None => violation,
    }
}
