//! XML Schema validators
//!
//! The component model, the compilation pipeline that turns schema
//! documents into a [`Schema`], and the streaming engine that validates
//! instances against it.

// Component model
pub mod builtins;
pub mod components;
pub mod exceptions;
pub mod facets;
pub mod particles;
pub mod wildcards;

// Values
pub mod datetime;
pub mod patterns;
pub mod simple_types;
pub mod values;

// Compilation
pub mod automata;
pub mod checking;
pub mod loading;
pub mod parsing;
pub mod resolving;

// Validation
pub mod engine;
pub mod identities;
pub mod schemas;

pub use automata::ContentAutomaton;
pub use builtins::Builtin;
pub use components::{ComponentSet, ElemId, TypeId};
pub use engine::Engine;
pub use exceptions::{SourcePos, Violation, ViolationCode, ViolationList};
pub use schemas::{compile_from, compile_schema, compile_schema_with, CompiledSchema, Schema, SchemaSet};
pub use values::XsdValue;
