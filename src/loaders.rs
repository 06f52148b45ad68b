//! Schema document resolvers
//!
//! The loader never touches the filesystem itself: it asks a
//! [`SchemaResolver`] to open each location and hand back a reader plus a
//! canonical system id. The system id is opaque to the loader; it is the
//! cache key for "already loaded" and the origin stamped on components.

use crate::error::{Error, Result};
use crate::locations::{is_url, join_location};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use url::Url;

/// Why a document is being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveKind {
    /// A root location handed to the compiler
    Root,
    /// An `<include>`
    Include,
    /// An `<import>`
    Import,
}

/// A request to open a schema document
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    /// Kind of reference
    pub kind: ResolveKind,
    /// System id of the referring document, if any
    pub base_system_id: Option<&'a str>,
    /// Location as written (may be empty for an import without a location)
    pub location: &'a str,
    /// Namespace of an import
    pub namespace: Option<&'a str>,
}

/// An opened schema document
pub struct ResolvedDocument {
    /// Document bytes
    pub reader: Box<dyn Read + Send>,
    /// Canonical system id
    pub system_id: String,
}

impl ResolvedDocument {
    /// Wrap an in-memory text
    pub fn from_text(system_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            reader: Box::new(Cursor::new(text.into().into_bytes())),
            system_id: system_id.into(),
        }
    }
}

impl fmt::Debug for ResolvedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedDocument")
            .field("system_id", &self.system_id)
            .finish_non_exhaustive()
    }
}

/// Opens schema documents on behalf of the loader
pub trait SchemaResolver: Send + Sync {
    /// Open the document a request points at
    fn open(&self, request: &ResolveRequest<'_>) -> Result<ResolvedDocument>;
}

/// Resolver for documents on the local filesystem
#[derive(Debug, Clone, Default)]
pub struct FileResolver {
    /// Directory root locations are relative to (current directory if unset)
    base_dir: Option<PathBuf>,
}

impl FileResolver {
    /// Create a resolver rooted at the current directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve root locations relative to `dir`
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    fn locate(&self, request: &ResolveRequest<'_>) -> Result<PathBuf> {
        if request.location.is_empty() {
            return Err(Error::Resource(format!(
                "no location given for namespace '{}'",
                request.namespace.unwrap_or("")
            )));
        }
        let joined = join_location(request.base_system_id, request.location);
        if is_url(&joined) {
            let url = Url::parse(&joined)?;
            if url.scheme() != "file" {
                return Err(Error::Resource(format!(
                    "remote schema locations are not supported: {}",
                    joined
                )));
            }
            return url
                .to_file_path()
                .map_err(|_| Error::Resource(format!("invalid file URL: {}", joined)));
        }
        let path = PathBuf::from(&joined);
        if path.is_absolute() || request.base_system_id.is_some() {
            Ok(path)
        } else {
            Ok(self
                .base_dir
                .as_deref()
                .map(|dir| dir.join(&path))
                .unwrap_or(path))
        }
    }
}

impl SchemaResolver for FileResolver {
    fn open(&self, request: &ResolveRequest<'_>) -> Result<ResolvedDocument> {
        let path = self.locate(request)?;
        let canonical = fs::canonicalize(&path).map_err(|e| {
            Error::Resource(format!("failed to open '{}': {}", path.display(), e))
        })?;
        let file = fs::File::open(&canonical)?;
        Ok(ResolvedDocument {
            reader: Box::new(file),
            system_id: path_to_system_id(&canonical),
        })
    }
}

fn path_to_system_id(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Resolver over a fixed set of in-memory documents
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    documents: HashMap<String, String>,
    namespaces: HashMap<String, String>,
}

impl MemoryResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document under a system id
    pub fn with_document(mut self, system_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.add_document(system_id, text);
        self
    }

    /// Add a document under a system id
    pub fn add_document(&mut self, system_id: impl Into<String>, text: impl Into<String>) {
        self.documents.insert(system_id.into(), text.into());
    }

    /// Map a namespace to a system id for imports without a location
    pub fn with_namespace(mut self, namespace: impl Into<String>, system_id: impl Into<String>) -> Self {
        self.namespaces.insert(namespace.into(), system_id.into());
        self
    }
}

impl SchemaResolver for MemoryResolver {
    fn open(&self, request: &ResolveRequest<'_>) -> Result<ResolvedDocument> {
        let key = if request.location.is_empty() {
            request
                .namespace
                .and_then(|ns| self.namespaces.get(ns))
                .cloned()
                .ok_or_else(|| {
                    Error::Resource(format!(
                        "no document registered for namespace '{}'",
                        request.namespace.unwrap_or("")
                    ))
                })?
        } else {
            join_location(request.base_system_id, request.location)
        };
        let text = self
            .documents
            .get(&key)
            .or_else(|| self.documents.get(request.location))
            .ok_or_else(|| Error::Resource(format!("no document registered as '{}'", key)))?;
        let system_id = if self.documents.contains_key(&key) {
            key
        } else {
            request.location.to_string()
        };
        Ok(ResolvedDocument::from_text(system_id, text.clone()))
    }
}
