//! # xsdstream
//!
//! A streaming XML Schema (XSD 1.0) validator.
//!
//! Schema documents are loaded through a [`loaders::SchemaResolver`],
//! resolved and checked into a single component set, and every content
//! model is compiled to a deterministic automaton. Instances are then
//! validated in one forward pass over a pull tokenizer with bounded memory.
//!
//! ## Features
//!
//! - include/import graphs, chameleon includes, import visibility
//! - content models compiled to DFAs with unique particle attribution
//! - all built-in simple types with facets, lists and unions
//! - `xsi:type`, `xsi:nil` and schema-location hints
//! - `unique`/`key`/`keyref` and ID/IDREF checking while streaming
//! - configurable caps on every unbounded input
//!
//! ## Example
//!
//! ```rust,no_run
//! use xsdstream::{compile_schema, RuntimeOptions};
//!
//! let schema = compile_schema(std::fs::File::open("person.xsd")?)?;
//! let violations = schema.validate(std::fs::File::open("person.xml")?, &RuntimeOptions::default());
//! for violation in &violations {
//!     println!("{}", violation);
//! }
//! # Ok::<(), xsdstream::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Foundation
pub mod error;
pub mod options;

// Utilities
pub mod locations;
pub mod names;
pub mod namespaces;

// Resource loading
pub mod documents;
pub mod loaders;

// Identity constraint paths
pub mod xpath;

// Validators
pub mod validators;

// Re-exports for convenience
pub use error::{Error, Result};
pub use loaders::{FileResolver, MemoryResolver, SchemaResolver};
pub use options::{LoadOptions, Options, RuntimeOptions, SchemaLocationPolicy};
pub use validators::{
    compile_from, compile_schema, compile_schema_with, Schema, SchemaSet, Violation, ViolationCode,
    ViolationList,
};

/// Version of the xsdstream library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
