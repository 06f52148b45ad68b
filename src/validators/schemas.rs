//! Compiled schemas
//!
//! Runs the compilation pipeline (load, resolve, check, content automata)
//! and exposes the immutable result as a [`Schema`]. A schema is cheap to
//! clone and may be shared between threads; every validation run carries
//! its own [`Engine`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::automata::{compile_content, is_restriction, ContentAutomaton};
use super::builtins::Builtin;
use super::checking::check;
use super::components::{ComponentSet, DerivationMethod, TypeDef, TypeId};
use super::engine::{schema_location_hints, Engine};
use super::exceptions::{Violation, ViolationCode, ViolationList};
use super::loading::{Loaded, SchemaLoader};
use super::resolving::resolve;
use crate::documents::{Token, XmlTokenizer};
use crate::error::{Error, Result};
use crate::loaders::{FileResolver, ResolveKind, ResolveRequest, ResolvedDocument, SchemaResolver};
use crate::locations::join_location;
use crate::options::{Options, RuntimeOptions, SchemaLocationPolicy};

/// System id given to a schema compiled from a bare reader
const INLINE_SYSTEM_ID: &str = "schema.xsd";

/// Output of the compilation pipeline
pub struct CompiledSchema {
    /// Resolved and checked components
    pub set: ComponentSet,
    /// Content automata, indexed by type
    pub models: Vec<Option<ContentAutomaton>>,
    /// System ids of the root documents
    pub roots: Vec<String>,
    /// Target namespaces of the loaded documents (`""` for none)
    pub namespaces: BTreeSet<String>,
}

impl CompiledSchema {
    /// Total number of automaton states
    pub fn state_count(&self) -> usize {
        self.models.iter().flatten().map(ContentAutomaton::state_count).sum()
    }

    /// Whether components for `namespace` are loaded
    pub fn covers(&self, namespace: Option<&str>) -> bool {
        self.namespaces.contains(namespace.unwrap_or(""))
    }
}

/// A root location together with the resolver that opens it
#[derive(Clone)]
struct Source {
    resolver: Arc<dyn SchemaResolver>,
    location: String,
}

/// Routes each request to the resolver of the root it descends from
struct SourceRouter<'a> {
    sources: &'a [Source],
    owners: Mutex<HashMap<String, usize>>,
}

impl<'a> SourceRouter<'a> {
    fn new(sources: &'a [Source]) -> Self {
        Self {
            sources,
            owners: Mutex::new(HashMap::new()),
        }
    }

    fn owner(&self, request: &ResolveRequest<'_>) -> usize {
        match request.kind {
            ResolveKind::Root => self
                .sources
                .iter()
                .position(|s| s.location == request.location)
                .unwrap_or(0),
            ResolveKind::Include | ResolveKind::Import => request
                .base_system_id
                .and_then(|base| self.owners.lock().ok()?.get(base).copied())
                .unwrap_or(0),
        }
    }
}

impl SchemaResolver for SourceRouter<'_> {
    fn open(&self, request: &ResolveRequest<'_>) -> Result<ResolvedDocument> {
        let index = self.owner(request);
        let source = self
            .sources
            .get(index)
            .ok_or_else(|| Error::Resource(format!("no resolver for '{}'", request.location)))?;
        let document = source.resolver.open(request)?;
        if let Ok(mut owners) = self.owners.lock() {
            owners.insert(document.system_id.clone(), index);
        }
        Ok(document)
    }
}

/// Compile everything a loader has queued
fn compile_loaded(loader: SchemaLoader<'_>, options: &Options) -> Result<CompiledSchema> {
    let Loaded {
        mut set,
        mut violations,
        roots,
    } = loader.load();
    if set.documents.is_empty() {
        if violations.is_empty() {
            violations.push(Violation::new(ViolationCode::SchemaNotLoaded, "no schema document was loaded"));
        }
        return Err(Error::Compile(violations));
    }

    resolve(&mut set, &mut violations);
    log::debug!("resolved {} references", set.references.len());
    check(&mut set, &mut violations);
    log::debug!("semantic checks done ({} violation(s) so far)", violations.len());

    let models = compile_models(&set, &options.runtime, &mut violations)?;
    check_restrictions(&set, &models, &mut violations);

    if !violations.is_empty() {
        log::debug!("compilation failed with {} violation(s)", violations.len());
        return Err(Error::Compile(violations));
    }

    let namespaces = set
        .documents
        .values()
        .flat_map(|info| info.target_namespaces.iter().cloned())
        .collect();
    let compiled = CompiledSchema {
        set,
        models,
        roots,
        namespaces,
    };
    log::debug!(
        "compiled schema: {} type(s), {} automaton state(s)",
        compiled.set.types.len(),
        compiled.state_count()
    );
    Ok(compiled)
}

/// Build the content automaton of every complex type with element content
fn compile_models(
    set: &ComponentSet,
    options: &RuntimeOptions,
    violations: &mut ViolationList,
) -> Result<Vec<Option<ContentAutomaton>>> {
    let max_states = options.max_dfa_states();
    let mut total = 0;
    let mut models = Vec::with_capacity(set.types.len());
    for (index, def) in set.types.iter().enumerate() {
        let particle = match def {
            TypeDef::Complex(complex) => complex.content.particle(),
            _ => None,
        };
        let Some(particle) = particle else {
            models.push(None);
            continue;
        };
        let owner = set.type_name(TypeId(index));
        match compile_content(set, particle, options, &owner, violations) {
            Ok(automaton) => {
                total += automaton.state_count();
                log::trace!("content model of {}: {} state(s)", owner, automaton.state_count());
                if total > max_states {
                    violations.push(
                        Violation::new(
                            ViolationCode::DfaStateExplosion,
                            format!("content automata exceed {} states in total", max_states),
                        )
                        .at(&particle.pos),
                    );
                    return Err(Error::Compile(violations.clone()));
                }
                models.push(Some(automaton));
            }
            Err(violation) => {
                violations.push(violation);
                return Err(Error::Compile(violations.clone()));
            }
        }
    }
    Ok(models)
}

/// Check that every restricted content model accepts a subset of its base
fn check_restrictions(set: &ComponentSet, models: &[Option<ContentAutomaton>], violations: &mut ViolationList) {
    for (index, def) in set.types.iter().enumerate().skip(Builtin::ALL.len()) {
        let TypeDef::Complex(complex) = def else {
            continue;
        };
        if complex.method != DerivationMethod::Restriction {
            continue;
        }
        let Some(base) = complex.base.id() else {
            continue;
        };
        if base == ComponentSet::builtin(Builtin::AnyType) {
            continue;
        }
        let (Some(Some(derived)), Some(Some(base_model))) = (models.get(index), models.get(base.0)) else {
            continue;
        };
        if !is_restriction(derived, base_model) {
            violations.push(
                Violation::new(
                    ViolationCode::InvalidDerivation,
                    format!(
                        "content model of {} is not a valid restriction of {}",
                        set.type_name(TypeId(index)),
                        set.type_name(base)
                    ),
                )
                .at(&complex.pos),
            );
        }
    }
}

/// An immutable compiled schema
#[derive(Clone)]
pub struct Schema {
    compiled: Arc<CompiledSchema>,
    sources: Arc<Vec<Source>>,
    options: Options,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("roots", &self.compiled.roots)
            .field("namespaces", &self.compiled.namespaces)
            .field("types", &self.compiled.set.types.len())
            .finish()
    }
}

impl Schema {
    /// The compiled components
    pub fn compiled(&self) -> &CompiledSchema {
        &self.compiled
    }

    /// The component set
    pub fn components(&self) -> &ComponentSet {
        &self.compiled.set
    }

    /// Options the schema was compiled with
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Validate a document read from `reader`
    pub fn validate<R: Read>(&self, reader: R, options: &RuntimeOptions) -> ViolationList {
        self.validate_input(BufReader::new(reader), options, None, None)
    }

    /// Validate a document with the schema's own runtime options
    pub fn validate_str(&self, text: &str) -> ViolationList {
        self.validate_input(text.as_bytes(), &self.options.runtime, None, None)
    }

    /// Check a document and report only whether it is valid
    pub fn is_valid<R: Read>(&self, reader: R) -> bool {
        self.validate(reader, &self.options.runtime).is_empty()
    }

    /// Validate a file; relative hints resolve against its path
    pub fn validate_file(&self, path: impl AsRef<Path>) -> ViolationList {
        let path = path.as_ref();
        let system_id = path.to_string_lossy().replace('\\', "/");
        match fs::File::open(path) {
            Ok(file) => {
                let policy = self.options.runtime.schema_location_policy;
                if policy == SchemaLocationPolicy::Document {
                    return self.validate_seekable_as(file, &self.options.runtime, Some(&system_id));
                }
                self.validate_input(BufReader::new(file), &self.options.runtime, Some(&system_id), None)
            }
            Err(e) => {
                let mut list = ViolationList::new(self.options.runtime.max_violations);
                list.push(
                    Violation::new(ViolationCode::XmlParse, format!("cannot read '{}': {}", system_id, e))
                        .with_document(system_id.as_str()),
                );
                list
            }
        }
    }

    /// Validate seekable input; under the `Document` policy the input is
    /// scanned for hints first and then rewound
    pub fn validate_seekable<R: Read + Seek>(&self, reader: R, options: &RuntimeOptions) -> ViolationList {
        self.validate_seekable_as(reader, options, None)
    }

    fn validate_seekable_as<R: Read + Seek>(
        &self,
        mut reader: R,
        options: &RuntimeOptions,
        system_id: Option<&str>,
    ) -> ViolationList {
        if options.schema_location_policy != SchemaLocationPolicy::Document {
            return self.validate_input(BufReader::new(reader), options, system_id, None);
        }
        let hints = prescan(&mut reader, options);
        if let Err(e) = reader.seek(SeekFrom::Start(0)) {
            let mut list = ViolationList::new(options.max_violations);
            list.push(Violation::new(ViolationCode::XmlParse, format!("cannot rewind input: {}", e)));
            return list;
        }
        self.validate_input(BufReader::new(reader), options, system_id, Some(hints))
    }

    fn validate_input<B: BufRead>(
        &self,
        input: B,
        options: &RuntimeOptions,
        system_id: Option<&str>,
        prescanned: Option<Vec<(Option<String>, String)>>,
    ) -> ViolationList {
        let mut tokenizer = XmlTokenizer::new(input, options);
        if let Some(id) = system_id {
            tokenizer = tokenizer.with_system_id(id);
        }
        let first = match tokenizer.next_token() {
            Ok(token) => token,
            Err(violation) => {
                let mut list = ViolationList::new(options.max_violations);
                list.push(violation);
                return list;
            }
        };

        let mut notes = Vec::new();
        let compiled = match options.schema_location_policy {
            SchemaLocationPolicy::Ignore => Arc::clone(&self.compiled),
            policy => {
                let hints = match prescanned {
                    Some(hints) => hints,
                    None => {
                        if policy == SchemaLocationPolicy::Document {
                            notes.push(Violation::new(
                                ViolationCode::SchemaLocationHint,
                                "the Document hint policy needs seekable input; only root hints were applied",
                            ));
                        }
                        match first {
                            Token::StartElement => schema_location_hints(tokenizer.start_tag()),
                            _ => Vec::new(),
                        }
                    }
                };
                self.apply_hints(hints, system_id, &mut notes)
            }
        };

        let mut engine = Engine::new(&compiled.set, &compiled.models, options);
        for note in notes {
            engine.push(note);
        }
        engine.run(&mut tokenizer, Some(first))
    }

    /// Recompile with hinted locations for namespaces not yet covered
    fn apply_hints(
        &self,
        hints: Vec<(Option<String>, String)>,
        base: Option<&str>,
        notes: &mut Vec<Violation>,
    ) -> Arc<CompiledSchema> {
        let mut seen = BTreeSet::new();
        let missing: Vec<(Option<String>, String)> = hints
            .into_iter()
            .filter(|(ns, _)| !self.compiled.covers(ns.as_deref()))
            .filter(|(ns, _)| seen.insert(ns.clone()))
            .collect();
        if missing.is_empty() {
            return Arc::clone(&self.compiled);
        }
        let Some(first) = self.sources.first() else {
            for (ns, location) in &missing {
                log::debug!("ignoring schema location hint '{}': no resolver", location);
                notes.push(Violation::new(
                    ViolationCode::SchemaLocationHint,
                    format!(
                        "hint '{}' for namespace '{}' ignored: the schema has no resolver",
                        location,
                        ns.as_deref().unwrap_or("")
                    ),
                ));
            }
            return Arc::clone(&self.compiled);
        };

        let mut sources: Vec<Source> = self.sources.as_ref().clone();
        for (_, location) in &missing {
            let joined = join_location(base, location);
            log::debug!("applying schema location hint '{}'", joined);
            sources.push(Source {
                resolver: Arc::clone(&first.resolver),
                location: joined,
            });
        }
        match compile_sources(&sources, &self.options) {
            Ok(compiled) => Arc::new(compiled),
            Err(e) => {
                notes.push(Violation::new(
                    ViolationCode::SchemaLocationHint,
                    format!("hinted schema could not be compiled: {}", e),
                ));
                Arc::clone(&self.compiled)
            }
        }
    }
}

/// Collect the hints of every start tag
fn prescan<R: Read>(reader: &mut R, options: &RuntimeOptions) -> Vec<(Option<String>, String)> {
    let mut tokenizer = XmlTokenizer::new(BufReader::new(reader), options);
    let mut hints = Vec::new();
    loop {
        match tokenizer.next_token() {
            Ok(Token::StartElement) => hints.extend(schema_location_hints(tokenizer.start_tag())),
            Ok(Token::Eof) | Err(_) => break,
            Ok(_) => {}
        }
    }
    log::trace!("prescan found {} schema location hint(s)", hints.len());
    hints
}

fn compile_sources(sources: &[Source], options: &Options) -> Result<CompiledSchema> {
    let router = SourceRouter::new(sources);
    let mut loader = SchemaLoader::new(&router, options.load, options.runtime.max_violations);
    for source in sources {
        loader.add_root(&source.location);
    }
    compile_loaded(loader, options)
}

/// Several root locations merged into one component set
#[derive(Clone, Default)]
pub struct SchemaSet {
    sources: Vec<Source>,
}

impl SchemaSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root location opened by `resolver`
    pub fn add(&mut self, resolver: Arc<dyn SchemaResolver>, location: impl Into<String>) -> &mut Self {
        self.sources.push(Source {
            resolver,
            location: location.into(),
        });
        self
    }

    /// Number of root locations
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether no root was added
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Compile all roots into one schema
    pub fn compile(&self, options: Options) -> Result<Schema> {
        let compiled = compile_sources(&self.sources, &options)?;
        Ok(Schema {
            compiled: Arc::new(compiled),
            sources: Arc::new(self.sources.clone()),
            options,
        })
    }
}

/// Compile a single schema document read from `reader`
///
/// Includes and imports resolve against the current directory.
pub fn compile_schema<R: Read>(reader: R) -> Result<Schema> {
    compile_schema_with(reader, Options::default())
}

/// Compile a single schema document with explicit options
pub fn compile_schema_with<R: Read>(mut reader: R, options: Options) -> Result<Schema> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    let resolver = FileResolver::new();
    let mut loader = SchemaLoader::new(&resolver, options.load, options.runtime.max_violations);
    loader.add_document(ResolvedDocument::from_text(INLINE_SYSTEM_ID, text));
    let compiled = compile_loaded(loader, &options)?;
    Ok(Schema {
        compiled: Arc::new(compiled),
        sources: Arc::new(Vec::new()),
        options,
    })
}

/// Compile the schema at `location` and everything it reaches
pub fn compile_from<S: SchemaResolver + 'static>(resolver: S, location: &str, options: Options) -> Result<Schema> {
    let mut set = SchemaSet::new();
    set.add(Arc::new(resolver), location);
    set.compile(options)
}
