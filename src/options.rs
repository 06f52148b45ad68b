//! Compile and runtime options
//!
//! Options are small value builders. Every numeric field uses `0` to mean
//! "use the default", so `LoadOptions::default()` and a builder where nothing
//! was set behave identically. Resolved getters apply the defaults; the
//! `check_*` helpers turn a breached cap into [`Error::LimitExceeded`].

use crate::error::{Error, Result};

/// Default maximum element nesting depth
pub const DEFAULT_MAX_DEPTH: usize = 256;
/// Default maximum attributes on one element
pub const DEFAULT_MAX_ATTRS: usize = 256;
/// Default maximum size of one token (text run, attribute value) in bytes
pub const DEFAULT_MAX_TOKEN_SIZE: usize = 4 * 1024 * 1024;
/// Default maximum number of distinct expanded names per document
pub const DEFAULT_MAX_QNAME_INTERN_ENTRIES: usize = 65_536;
/// Default maximum number of automaton states per compile
pub const DEFAULT_MAX_DFA_STATES: usize = 100_000;
/// Default ceiling for finite `maxOccurs` expansion
pub const DEFAULT_MAX_OCCURS_LIMIT: u32 = 5_000;

fn or_default(value: usize, default: usize) -> usize {
    if value == 0 {
        default
    } else {
        value
    }
}

/// How `xsi:schemaLocation` / `xsi:noNamespaceSchemaLocation` hints are used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaLocationPolicy {
    /// Apply hints found on the root element only
    #[default]
    RootOnly,
    /// Pre-scan the whole document for hints (requires seekable input)
    Document,
    /// Never look at hints
    Ignore,
}

/// Options for loading and parsing schema documents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Tolerate `<import>` without a location whose namespace is not loaded
    pub allow_missing_import_locations: bool,
    /// Maximum element depth in a schema document
    pub schema_max_depth: usize,
    /// Maximum attributes on one schema element
    pub schema_max_attrs: usize,
    /// Maximum size of one attribute value or text node in bytes
    pub schema_max_token_size: usize,
    /// Maximum distinct expanded names in one schema document
    pub schema_max_qname_intern_entries: usize,
}

impl LoadOptions {
    /// Create options with every value defaulted
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow or reject imports without a usable location
    pub fn with_allow_missing_import_locations(mut self, allow: bool) -> Self {
        self.allow_missing_import_locations = allow;
        self
    }

    /// Set the schema document depth cap
    pub fn with_schema_max_depth(mut self, depth: usize) -> Self {
        self.schema_max_depth = depth;
        self
    }

    /// Set the per-element attribute cap for schema documents
    pub fn with_schema_max_attrs(mut self, attrs: usize) -> Self {
        self.schema_max_attrs = attrs;
        self
    }

    /// Set the token size cap for schema documents
    pub fn with_schema_max_token_size(mut self, size: usize) -> Self {
        self.schema_max_token_size = size;
        self
    }

    /// Set the distinct name cap for schema documents
    pub fn with_schema_max_qname_intern_entries(mut self, entries: usize) -> Self {
        self.schema_max_qname_intern_entries = entries;
        self
    }

    /// Resolved depth cap
    pub fn schema_max_depth(&self) -> usize {
        or_default(self.schema_max_depth, DEFAULT_MAX_DEPTH)
    }

    /// Resolved attribute cap
    pub fn schema_max_attrs(&self) -> usize {
        or_default(self.schema_max_attrs, DEFAULT_MAX_ATTRS)
    }

    /// Resolved token size cap
    pub fn schema_max_token_size(&self) -> usize {
        or_default(self.schema_max_token_size, DEFAULT_MAX_TOKEN_SIZE)
    }

    /// Resolved distinct name cap
    pub fn schema_max_qname_intern_entries(&self) -> usize {
        or_default(
            self.schema_max_qname_intern_entries,
            DEFAULT_MAX_QNAME_INTERN_ENTRIES,
        )
    }

    /// Check a schema element depth against the cap
    pub fn check_depth(&self, depth: usize) -> Result<()> {
        check("element depth", depth, self.schema_max_depth())
    }

    /// Check a schema attribute count against the cap
    pub fn check_attrs(&self, count: usize) -> Result<()> {
        check("attribute count", count, self.schema_max_attrs())
    }

    /// Check a schema token size against the cap
    pub fn check_token_size(&self, size: usize) -> Result<()> {
        check("token size", size, self.schema_max_token_size())
    }

    /// Check a schema distinct name count against the cap
    pub fn check_names(&self, count: usize) -> Result<()> {
        check("distinct names", count, self.schema_max_qname_intern_entries())
    }
}

/// Options for compiling content models and validating instances
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Maximum automaton states for one compile
    pub max_dfa_states: usize,
    /// Ceiling for finite `maxOccurs`/`minOccurs` expansion
    pub max_occurs_limit: u32,
    /// Maximum instance element depth
    pub instance_max_depth: usize,
    /// Maximum attributes on one instance element
    pub instance_max_attrs: usize,
    /// Maximum size of one instance token in bytes
    pub instance_max_token_size: usize,
    /// Maximum distinct expanded names in one instance document
    pub instance_max_qname_intern_entries: usize,
    /// Maximum recorded violations per validation
    pub max_violations: usize,
    /// Schema-location hint policy
    pub schema_location_policy: SchemaLocationPolicy,
}

impl RuntimeOptions {
    /// Create options with every value defaulted
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the automaton state budget
    pub fn with_max_dfa_states(mut self, states: usize) -> Self {
        self.max_dfa_states = states;
        self
    }

    /// Set the occurrence expansion ceiling
    pub fn with_max_occurs_limit(mut self, limit: u32) -> Self {
        self.max_occurs_limit = limit;
        self
    }

    /// Set the instance depth cap
    pub fn with_instance_max_depth(mut self, depth: usize) -> Self {
        self.instance_max_depth = depth;
        self
    }

    /// Set the instance attribute cap
    pub fn with_instance_max_attrs(mut self, attrs: usize) -> Self {
        self.instance_max_attrs = attrs;
        self
    }

    /// Set the instance token size cap
    pub fn with_instance_max_token_size(mut self, size: usize) -> Self {
        self.instance_max_token_size = size;
        self
    }

    /// Set the instance distinct name cap
    pub fn with_instance_max_qname_intern_entries(mut self, entries: usize) -> Self {
        self.instance_max_qname_intern_entries = entries;
        self
    }

    /// Set the violation cap
    pub fn with_max_violations(mut self, max: usize) -> Self {
        self.max_violations = max;
        self
    }

    /// Set the schema-location policy
    pub fn with_schema_location_policy(mut self, policy: SchemaLocationPolicy) -> Self {
        self.schema_location_policy = policy;
        self
    }

    /// Resolved automaton state budget
    pub fn max_dfa_states(&self) -> usize {
        or_default(self.max_dfa_states, DEFAULT_MAX_DFA_STATES)
    }

    /// Resolved occurrence expansion ceiling
    pub fn max_occurs_limit(&self) -> u32 {
        if self.max_occurs_limit == 0 {
            DEFAULT_MAX_OCCURS_LIMIT
        } else {
            self.max_occurs_limit
        }
    }

    /// Resolved instance depth cap
    pub fn instance_max_depth(&self) -> usize {
        or_default(self.instance_max_depth, DEFAULT_MAX_DEPTH)
    }

    /// Resolved instance attribute cap
    pub fn instance_max_attrs(&self) -> usize {
        or_default(self.instance_max_attrs, DEFAULT_MAX_ATTRS)
    }

    /// Resolved instance token size cap
    pub fn instance_max_token_size(&self) -> usize {
        or_default(self.instance_max_token_size, DEFAULT_MAX_TOKEN_SIZE)
    }

    /// Resolved instance distinct name cap
    pub fn instance_max_qname_intern_entries(&self) -> usize {
        or_default(
            self.instance_max_qname_intern_entries,
            DEFAULT_MAX_QNAME_INTERN_ENTRIES,
        )
    }

    /// Check an element depth against the instance cap
    pub fn check_depth(&self, depth: usize) -> Result<()> {
        check("element depth", depth, self.instance_max_depth())
    }

    /// Check an attribute count against the instance cap
    pub fn check_attrs(&self, count: usize) -> Result<()> {
        check("attribute count", count, self.instance_max_attrs())
    }

    /// Check a token size against the instance cap
    pub fn check_token_size(&self, size: usize) -> Result<()> {
        check("token size", size, self.instance_max_token_size())
    }

    /// Check a distinct name count against the instance cap
    pub fn check_names(&self, count: usize) -> Result<()> {
        check("distinct names", count, self.instance_max_qname_intern_entries())
    }
}

/// Load and runtime options together, as taken by the compile entry points
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Schema loading options
    pub load: LoadOptions,
    /// Compilation and validation options
    pub runtime: RuntimeOptions,
}

impl Options {
    /// Create options with every value defaulted
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the load options
    pub fn with_load(mut self, load: LoadOptions) -> Self {
        self.load = load;
        self
    }

    /// Replace the runtime options
    pub fn with_runtime(mut self, runtime: RuntimeOptions) -> Self {
        self.runtime = runtime;
        self
    }
}

/// Compare a measured value against a cap
pub fn check(what: &str, value: usize, max: usize) -> Result<()> {
    if value > max {
        Err(Error::LimitExceeded(format!(
            "{} {} exceeds maximum {}",
            what, value, max
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_means_default() {
        let opts = RuntimeOptions::new();
        assert_eq!(opts.instance_max_depth(), 256);
        assert_eq!(opts.instance_max_attrs(), 256);
        assert_eq!(opts.instance_max_token_size(), 4 * 1024 * 1024);
        assert_eq!(opts.max_occurs_limit(), DEFAULT_MAX_OCCURS_LIMIT);
        assert_eq!(opts.schema_location_policy, SchemaLocationPolicy::RootOnly);

        let load = LoadOptions::new();
        assert_eq!(load.schema_max_depth(), 256);
        assert!(!load.allow_missing_import_locations);
    }

    #[test]
    fn test_builders_override() {
        let opts = RuntimeOptions::new()
            .with_instance_max_depth(4)
            .with_max_dfa_states(10)
            .with_schema_location_policy(SchemaLocationPolicy::Ignore);
        assert_eq!(opts.instance_max_depth(), 4);
        assert_eq!(opts.max_dfa_states(), 10);
        assert_eq!(opts.schema_location_policy, SchemaLocationPolicy::Ignore);
    }

    #[test]
    fn test_checks() {
        let opts = RuntimeOptions::new().with_instance_max_depth(2);
        assert!(opts.check_depth(2).is_ok());
        let err = opts.check_depth(3).unwrap_err();
        assert!(matches!(err, Error::LimitExceeded(_)));
        assert!(err.to_string().contains("element depth 3 exceeds maximum 2"));

        let load = LoadOptions::new().with_schema_max_qname_intern_entries(5);
        assert!(load.check_names(5).is_ok());
        let err = load.check_names(6).unwrap_err();
        assert_eq!(err.to_string(), "limit exceeded: distinct names 6 exceeds maximum 5");
    }
}
