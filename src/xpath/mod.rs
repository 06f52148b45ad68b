//! XPath Support for XML Schema
//!
//! Identity constraints use a small XPath subset: `.`, child steps with
//! QNames, `*` or `prefix:*`, a leading `.//`, and for fields a final
//! attribute step, combined with `|`. Expressions compile to
//! [`PathPattern`]s that are matched against the element path of the
//! streaming walk, so no tree is ever built.

mod selectors;

pub use selectors::{FieldAlternative, FieldPath, FieldTarget, NameTest, PathPattern, Selector};
