//! Schema Loading
//!
//! Drives a [`SchemaResolver`] over the include/import graph of one or more
//! root locations and parses every reached document into a single
//! [`ComponentSet`]. A document is loaded once per effective target
//! namespace: including the same location twice is a no-op, while a
//! chameleon document included from two namespaces is stamped twice.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::io::Read;
use std::sync::Arc;

use roxmltree::{Document, Node};

use super::components::ComponentSet;
use super::exceptions::{SourcePos, Violation, ViolationCode, ViolationList};
use super::parsing::{parse_schema_document, Directive, DirectiveKind, DocumentTarget};
use crate::error::Error;
use crate::loaders::{ResolveKind, ResolveRequest, ResolvedDocument, SchemaResolver};
use crate::namespaces::XSD_NAMESPACE;
use crate::options::LoadOptions;

/// One document waiting to be loaded
#[derive(Debug, Clone)]
struct Pending {
    kind: ResolveKind,
    location: String,
    base: Option<String>,
    /// Namespace of an import
    namespace: Option<String>,
    /// Namespace of the including document
    includer_namespace: Option<String>,
    /// System id of the referring document
    referrer: Option<String>,
    pos: Option<SourcePos>,
}

/// An import without `schemaLocation`, settled once the queue drains
#[derive(Debug, Clone)]
struct DeferredImport {
    namespace: Option<String>,
    referrer: String,
    pos: SourcePos,
}

/// What a finished load produced
#[derive(Debug)]
pub struct Loaded {
    /// Components of every reached document
    pub set: ComponentSet,
    /// Violations found while loading
    pub violations: ViolationList,
    /// System ids of the root documents, in load order
    pub roots: Vec<String>,
}

/// Loads schema documents into a component set
pub struct SchemaLoader<'r> {
    resolver: &'r dyn SchemaResolver,
    options: LoadOptions,
    set: ComponentSet,
    violations: ViolationList,
    queue: VecDeque<Pending>,
    loaded: HashSet<(String, Option<String>)>,
    deferred: Vec<DeferredImport>,
    roots: Vec<String>,
}

impl<'r> SchemaLoader<'r> {
    /// Create a loader
    pub fn new(resolver: &'r dyn SchemaResolver, options: LoadOptions, max_violations: usize) -> Self {
        Self {
            resolver,
            options,
            set: ComponentSet::new(),
            violations: ViolationList::new(max_violations),
            queue: VecDeque::new(),
            loaded: HashSet::new(),
            deferred: Vec::new(),
            roots: Vec::new(),
        }
    }

    /// Queue a root location
    pub fn add_root(&mut self, location: &str) {
        self.queue.push_back(Pending {
            kind: ResolveKind::Root,
            location: location.to_string(),
            base: None,
            namespace: None,
            includer_namespace: None,
            referrer: None,
            pos: None,
        });
    }

    /// Queue an in-memory root document
    pub fn add_document(&mut self, document: ResolvedDocument) {
        self.load_document(
            Pending {
                kind: ResolveKind::Root,
                location: document.system_id.clone(),
                base: None,
                namespace: None,
                includer_namespace: None,
                referrer: None,
                pos: None,
            },
            document,
        );
    }

    /// Load everything reachable
    pub fn load(mut self) -> Loaded {
        loop {
            self.drain();
            let deferred = std::mem::take(&mut self.deferred);
            if deferred.is_empty() {
                break;
            }
            for import in deferred {
                self.settle_import(import);
            }
        }
        log::debug!(
            "loaded {} schema document(s): {} types, {} elements, {} attributes",
            self.set.documents.len(),
            self.set.type_names.len(),
            self.set.element_names.len(),
            self.set.attribute_names.len()
        );
        Loaded {
            set: self.set,
            violations: self.violations,
            roots: self.roots,
        }
    }

    fn drain(&mut self) {
        while let Some(pending) = self.queue.pop_front() {
            let request = ResolveRequest {
                kind: pending.kind,
                base_system_id: pending.base.as_deref(),
                location: &pending.location,
                namespace: pending.namespace.as_deref(),
            };
            match self.resolver.open(&request) {
                Ok(document) => self.load_document(pending, document),
                Err(e) => {
                    let mut violation = Violation::new(
                        ViolationCode::SchemaNotLoaded,
                        format!("cannot load schema '{}': {}", pending.location, e),
                    );
                    if let Some(pos) = &pending.pos {
                        violation = violation.at(pos);
                    }
                    self.violations.push(violation);
                }
            }
        }
    }

    /// A loaded document whose components are in the given namespace
    fn namespace_loaded(&self, namespace: Option<&str>) -> bool {
        let key = namespace.unwrap_or("");
        self.set
            .documents
            .values()
            .any(|info| info.target_namespaces.contains(key))
    }

    fn settle_import(&mut self, import: DeferredImport) {
        if self.namespace_loaded(import.namespace.as_deref()) {
            return;
        }
        let request = ResolveRequest {
            kind: ResolveKind::Import,
            base_system_id: Some(&import.referrer),
            location: "",
            namespace: import.namespace.as_deref(),
        };
        match self.resolver.open(&request) {
            Ok(document) => {
                let pending = Pending {
                    kind: ResolveKind::Import,
                    location: document.system_id.clone(),
                    base: Some(import.referrer.clone()),
                    namespace: import.namespace.clone(),
                    includer_namespace: None,
                    referrer: Some(import.referrer.clone()),
                    pos: Some(import.pos.clone()),
                };
                self.load_document(pending, document);
            }
            Err(_) if self.options.allow_missing_import_locations => {
                log::debug!(
                    "import of '{}' has no location and is not loaded",
                    import.namespace.as_deref().unwrap_or("")
                );
            }
            Err(_) => {
                self.violations.push(
                    Violation::new(
                        ViolationCode::MissingImportLocation,
                        format!(
                            "import of namespace '{}' has no schemaLocation and the namespace is not loaded",
                            import.namespace.as_deref().unwrap_or("")
                        ),
                    )
                    .at(&import.pos),
                );
            }
        }
    }

    fn load_document(&mut self, pending: Pending, mut document: ResolvedDocument) {
        let system_id = document.system_id.clone();
        let origin: Arc<str> = Arc::from(system_id.as_str());
        let mut text = String::new();
        if let Err(e) = document.reader.read_to_string(&mut text) {
            self.violations.push(
                Violation::new(
                    ViolationCode::SchemaNotLoaded,
                    format!("cannot read schema '{}': {}", system_id, e),
                )
                .with_document(system_id.as_str()),
            );
            return;
        }
        let doc = match Document::parse(&text) {
            Ok(doc) => doc,
            Err(e) => {
                let at = e.pos();
                self.violations.push(
                    Violation::new(ViolationCode::SchemaParse, format!("malformed schema document: {}", e))
                        .with_document(system_id.as_str())
                        .with_position(at.row, at.col),
                );
                return;
            }
        };
        if let Err(violation) = check_limits(&doc, &origin, &self.options) {
            self.violations.push(violation);
            return;
        }

        let root = doc.root_element();
        let declared = root
            .attribute("targetNamespace")
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);
        let (target_namespace, chameleon) = match pending.kind {
            ResolveKind::Root => (declared.clone(), false),
            ResolveKind::Include => match (&declared, &pending.includer_namespace) {
                (None, Some(includer)) => (Some(includer.clone()), true),
                (declared, includer) if declared == includer => (declared.clone(), false),
                (declared, includer) => {
                    self.contradiction(
                        &pending,
                        format!(
                            "included document '{}' has target namespace '{}' but the includer has '{}'",
                            system_id,
                            declared.as_deref().unwrap_or(""),
                            includer.as_deref().unwrap_or("")
                        ),
                    );
                    return;
                }
            },
            ResolveKind::Import => {
                if declared != pending.namespace {
                    self.contradiction(
                        &pending,
                        format!(
                            "imported document '{}' has target namespace '{}', expected '{}'",
                            system_id,
                            declared.as_deref().unwrap_or(""),
                            pending.namespace.as_deref().unwrap_or("")
                        ),
                    );
                    return;
                }
                (declared.clone(), false)
            }
        };

        if let Some(referrer) = &pending.referrer {
            if pending.kind == ResolveKind::Include {
                self.set
                    .documents
                    .entry(system_id.clone())
                    .or_default()
                    .includers
                    .insert(referrer.clone());
            }
        }
        if !self.loaded.insert((system_id.clone(), target_namespace.clone())) {
            log::trace!("schema '{}' already loaded", system_id);
            return;
        }
        if pending.kind == ResolveKind::Root {
            self.roots.push(system_id.clone());
        }
        log::debug!(
            "parsing schema '{}' (target namespace '{}'{})",
            system_id,
            target_namespace.as_deref().unwrap_or(""),
            if chameleon { ", chameleon" } else { "" }
        );

        let directives = parse_schema_document(
            &mut self.set,
            &mut self.violations,
            &doc,
            &text,
            DocumentTarget {
                origin: origin.clone(),
                target_namespace: target_namespace.clone(),
                chameleon,
            },
        );
        self.follow(directives, &system_id, target_namespace);
    }

    fn follow(&mut self, directives: Vec<Directive>, system_id: &str, target_namespace: Option<String>) {
        for directive in directives {
            match directive.kind {
                DirectiveKind::Include => {
                    if let Some(location) = directive.location {
                        self.queue.push_back(Pending {
                            kind: ResolveKind::Include,
                            location,
                            base: Some(system_id.to_string()),
                            namespace: None,
                            includer_namespace: target_namespace.clone(),
                            referrer: Some(system_id.to_string()),
                            pos: Some(directive.pos),
                        });
                    }
                }
                DirectiveKind::Import => {
                    if directive.namespace.as_deref() == Some(XSD_NAMESPACE) {
                        continue;
                    }
                    match directive.location {
                        Some(location) => self.queue.push_back(Pending {
                            kind: ResolveKind::Import,
                            location,
                            base: Some(system_id.to_string()),
                            namespace: directive.namespace,
                            includer_namespace: None,
                            referrer: Some(system_id.to_string()),
                            pos: Some(directive.pos),
                        }),
                        None => self.deferred.push(DeferredImport {
                            namespace: directive.namespace,
                            referrer: system_id.to_string(),
                            pos: directive.pos,
                        }),
                    }
                }
            }
        }
    }

    fn contradiction(&mut self, pending: &Pending, message: String) {
        let mut violation = Violation::new(ViolationCode::ImportContradiction, message);
        if let Some(pos) = &pending.pos {
            violation = violation.at(pos);
        }
        self.violations.push(violation);
    }
}

/// Namespaces imported from a document or any document that includes it
pub fn visible_imports(set: &ComponentSet, origin: &str) -> BTreeSet<String> {
    let mut visible = BTreeSet::new();
    let mut stack = vec![origin.to_string()];
    let mut seen = HashSet::new();
    while let Some(doc) = stack.pop() {
        if !seen.insert(doc.clone()) {
            continue;
        }
        if let Some(info) = set.documents.get(&doc) {
            visible.extend(info.imports.iter().cloned());
            stack.extend(info.includers.iter().cloned());
        }
    }
    visible
}

/// Enforce the schema document caps over the whole tree
fn check_limits(doc: &Document<'_>, origin: &Arc<str>, options: &LoadOptions) -> Result<(), Violation> {
    let mut names = HashSet::new();
    let mut stack: Vec<(Node<'_, '_>, usize)> = vec![(doc.root_element(), 1)];
    while let Some((node, depth)) = stack.pop() {
        let at = doc.text_pos_at(node.range().start);
        let breach = |error: Error| {
            Violation::new(ViolationCode::LimitExceeded, error.to_string())
                .with_document(origin.as_ref())
                .with_position(at.row, at.col)
        };
        if node.is_text() {
            if let Some(text) = node.text() {
                options.check_token_size(text.len()).map_err(breach)?;
            }
            continue;
        }
        if !node.is_element() {
            continue;
        }
        options.check_depth(depth).map_err(breach)?;
        options.check_attrs(node.attributes().count()).map_err(breach)?;
        for attr in node.attributes() {
            options.check_token_size(attr.value().len()).map_err(breach)?;
        }
        names.insert((node.tag_name().namespace(), node.tag_name().name()));
        options.check_names(names.len()).map_err(breach)?;
        stack.extend(node.children().map(|child| (child, depth + 1)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loaders::MemoryResolver;
    use crate::namespaces::QName;

    const XS: &str = r#"xmlns:xs="http://www.w3.org/2001/XMLSchema""#;

    fn load(resolver: &MemoryResolver, root: &str, options: LoadOptions) -> (ComponentSet, ViolationList) {
        let mut loader = SchemaLoader::new(resolver, options, 0);
        loader.add_root(root);
        let loaded = loader.load();
        (loaded.set, loaded.violations)
    }

    #[test]
    fn test_idempotent_include() {
        let resolver = MemoryResolver::new()
            .with_document(
                "main.xsd",
                format!(
                    r#"<xs:schema {XS}><xs:include schemaLocation="part.xsd"/><xs:include schemaLocation="part.xsd"/></xs:schema>"#
                ),
            )
            .with_document(
                "part.xsd",
                format!(r#"<xs:schema {XS}><xs:element name="a" type="xs:string"/></xs:schema>"#),
            );
        let (set, violations) = load(&resolver, "main.xsd", LoadOptions::new());
        assert!(violations.is_empty(), "{}", violations);
        assert_eq!(set.element_names.len(), 1);
        assert_eq!(set.elements.len(), 1);
    }

    #[test]
    fn test_roots_are_reported_after_loading() {
        let resolver = MemoryResolver::new()
            .with_document(
                "main.xsd",
                format!(r#"<xs:schema {XS}><xs:include schemaLocation="part.xsd"/></xs:schema>"#),
            )
            .with_document("part.xsd", format!(r#"<xs:schema {XS}/>"#))
            .with_document("other.xsd", format!(r#"<xs:schema {XS}/>"#));
        let mut loader = SchemaLoader::new(&resolver, LoadOptions::new(), 0);
        loader.add_root("main.xsd");
        loader.add_root("other.xsd");
        loader.add_root("main.xsd");
        let loaded = loader.load();
        assert!(loaded.violations.is_empty(), "{}", loaded.violations);
        assert_eq!(loaded.roots, vec!["main.xsd".to_string(), "other.xsd".to_string()]);
        assert_eq!(loaded.set.documents.len(), 3);
    }

    #[test]
    fn test_chameleon_include() {
        let resolver = MemoryResolver::new()
            .with_document(
                "main.xsd",
                format!(
                    r#"<xs:schema {XS} targetNamespace="urn:main"><xs:include schemaLocation="part.xsd"/></xs:schema>"#
                ),
            )
            .with_document(
                "part.xsd",
                format!(
                    r#"<xs:schema {XS}><xs:simpleType name="code"><xs:restriction base="xs:string"/></xs:simpleType>
                       <xs:element name="a" type="code"/></xs:schema>"#
                ),
            );
        let (set, violations) = load(&resolver, "main.xsd", LoadOptions::new());
        assert!(violations.is_empty(), "{}", violations);
        let a = set.element_names[&QName::namespaced("urn:main", "a")];
        assert_eq!(
            set.element(a).type_ref,
            crate::validators::components::TypeRef::Named(QName::namespaced("urn:main", "code"))
        );
    }

    #[test]
    fn test_include_namespace_mismatch() {
        let resolver = MemoryResolver::new()
            .with_document(
                "main.xsd",
                format!(r#"<xs:schema {XS} targetNamespace="urn:a"><xs:include schemaLocation="b.xsd"/></xs:schema>"#),
            )
            .with_document("b.xsd", format!(r#"<xs:schema {XS} targetNamespace="urn:b"/>"#));
        let (_, violations) = load(&resolver, "main.xsd", LoadOptions::new());
        assert!(violations.has_code(ViolationCode::ImportContradiction));
    }

    #[test]
    fn test_missing_import_location() {
        let resolver = MemoryResolver::new().with_document(
            "main.xsd",
            format!(r#"<xs:schema {XS}><xs:import namespace="urn:other"/></xs:schema>"#),
        );
        let (_, strict) = load(&resolver, "main.xsd", LoadOptions::new());
        assert!(strict.has_code(ViolationCode::MissingImportLocation));
        let lenient = LoadOptions::new().with_allow_missing_import_locations(true);
        let (_, violations) = load(&resolver, "main.xsd", lenient);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_unloadable_root_and_include() {
        let resolver = MemoryResolver::new().with_document(
            "main.xsd",
            format!(r#"<xs:schema {XS}><xs:include schemaLocation="gone.xsd"/></xs:schema>"#),
        );
        let (_, violations) = load(&resolver, "main.xsd", LoadOptions::new());
        assert_eq!(violations.count_code(ViolationCode::SchemaNotLoaded), 1);
        let (_, violations) = load(&resolver, "nothing.xsd", LoadOptions::new());
        assert!(violations.has_code(ViolationCode::SchemaNotLoaded));
    }

    #[test]
    fn test_schema_depth_limit() {
        let resolver = MemoryResolver::new().with_document(
            "main.xsd",
            format!(
                r#"<xs:schema {XS}><xs:element name="a"><xs:complexType><xs:sequence/></xs:complexType></xs:element></xs:schema>"#
            ),
        );
        let (_, violations) = load(&resolver, "main.xsd", LoadOptions::new().with_schema_max_depth(3));
        let breach = violations
            .iter()
            .find(|v| v.code == ViolationCode::LimitExceeded)
            .unwrap();
        assert!(breach.message.contains("element depth 4 exceeds maximum 3"));
        assert_eq!(breach.document.as_deref(), Some("main.xsd"));
    }

    #[test]
    fn test_visible_imports_follow_includers() {
        let resolver = MemoryResolver::new()
            .with_document(
                "main.xsd",
                format!(
                    r#"<xs:schema {XS}><xs:import namespace="urn:o" schemaLocation="o.xsd"/><xs:include schemaLocation="part.xsd"/></xs:schema>"#
                ),
            )
            .with_document("part.xsd", format!(r#"<xs:schema {XS}/>"#))
            .with_document("o.xsd", format!(r#"<xs:schema {XS} targetNamespace="urn:o"/>"#));
        let (set, violations) = load(&resolver, "main.xsd", LoadOptions::new());
        assert!(violations.is_empty(), "{}", violations);
        assert!(visible_imports(&set, "part.xsd").contains("urn:o"));
        assert!(!visible_imports(&set, "o.xsd").contains("urn:o"));
    }
}
