//! Variable system for clusterdeck.
//!
//! Every configuration entity owns a [`Variables`] scope holding named
//! template values. Values may reference each other with `${name}`; calling
//! [`Variables::build`] resolves every registered value against the rest of
//! the scope, and [`Variables::rendering`] substitutes references inside
//! arbitrary strings (configuration values, hostnames, file contents).
//!
//! Two kinds of variables end up in an entity's scope:
//!
//! - **Service variables**: derived from the entity itself (host, role, id,
//!   ports, directories) plus the user-defined `global.variable` map.
//! - **Cluster variables**: aggregates computed from every sibling entity of
//!   a deployment (e.g. the joined etcd peer list). They are registered as
//!   immutable once all entities have been built.
//!
//! # Example
//!
//! ```rust
//! use clusterdeck::vars::{Variable, Variables};
//!
//! let mut vars = Variables::new();
//! vars.register(Variable::new("home", "/opt")).unwrap();
//! vars.register(Variable::new("log_dir", "${home}/logs")).unwrap();
//! vars.build().unwrap();
//!
//! assert_eq!(vars.get("log_dir"), Some("/opt/logs"));
//! assert_eq!(vars.rendering("${log_dir}/etcd").unwrap(), "/opt/logs/etcd");
//! ```

use std::collections::HashMap;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum nesting depth followed while resolving a single reference chain.
pub const MAX_RESOLVE_DEPTH: usize = 32;

static VARIABLE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{(\w+)\}").expect("Invalid variable regex"));

/// Errors that can occur in the variable system
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VarsError {
    #[error("unresolved variable reference: '${{{0}}}'")]
    UnresolvedReference(String),

    #[error("circular variable reference: {0}")]
    CycleDetected(String),

    #[error("variable '{0}' is immutable and cannot be overwritten")]
    Immutable(String),

    #[error("variable '{0}' is not registered")]
    NotRegistered(String),
}

/// Result type for variable operations
pub type VarsResult<T> = Result<T, VarsError>;

/// A named template value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Variable name, referenced as `${name}`
    pub name: String,
    /// Human readable description
    #[serde(default)]
    pub description: String,
    /// Raw value before build, resolved value afterwards
    pub value: String,
    /// Whether `value` no longer contains references
    #[serde(default)]
    pub resolved: bool,
    /// Immutable variables cannot be replaced once registered
    #[serde(default)]
    pub immutable: bool,
}

impl Variable {
    /// Create a new mutable variable
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            value: value.into(),
            resolved: false,
            immutable: false,
        }
    }

    /// Create an immutable variable whose value is already final
    pub fn immutable(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            resolved: true,
            immutable: true,
            ..Self::new(name, value)
        }
    }

    /// Attach a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// An ordered scope of variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Variables {
    vars: IndexMap<String, Variable>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a variable.
    ///
    /// Registering a name that already exists replaces it, unless the
    /// existing variable is immutable.
    pub fn register(&mut self, variable: Variable) -> VarsResult<()> {
        if let Some(existing) = self.vars.get(&variable.name) {
            if existing.immutable {
                return Err(VarsError::Immutable(variable.name));
            }
        }
        self.vars.insert(variable.name.clone(), variable);
        Ok(())
    }

    /// Overwrite the value of a registered, mutable variable.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> VarsResult<()> {
        let var = self
            .vars
            .get_mut(name)
            .ok_or_else(|| VarsError::NotRegistered(name.to_string()))?;
        if var.immutable {
            return Err(VarsError::Immutable(name.to_string()));
        }
        var.value = value.into();
        var.resolved = !contains_reference(&var.value);
        Ok(())
    }

    /// Get the current value of a variable
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|v| v.value.as_str())
    }

    /// Get the full variable record
    pub fn get_variable(&self, name: &str) -> Option<&Variable> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate over variables in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.values()
    }

    /// Returns true once every registered variable is resolved
    pub fn is_built(&self) -> bool {
        self.vars.values().all(|v| v.resolved)
    }

    /// Resolve every registered value against the scope.
    ///
    /// On error the scope is left untouched.
    pub fn build(&mut self) -> VarsResult<()> {
        let names: Vec<String> = self.vars.keys().cloned().collect();
        self.build_only(&names)
    }

    /// Resolve `names` and whatever they reference, leaving the rest of
    /// the scope untouched.
    ///
    /// Lets part of a scope be used before every variable it may refer to
    /// has been registered.
    pub fn build_only<S: AsRef<str>>(&mut self, names: &[S]) -> VarsResult<()> {
        let mut memo = HashMap::new();
        for name in names {
            let mut chain = Vec::new();
            self.resolve(name.as_ref(), &mut memo, &mut chain)?;
        }

        for (name, value) in memo {
            if let Some(var) = self.vars.get_mut(&name) {
                var.value = value;
                var.resolved = true;
            }
        }
        Ok(())
    }

    /// Substitute every `${name}` in `text`.
    ///
    /// Text without references is returned unchanged.
    pub fn rendering(&self, text: &str) -> VarsResult<String> {
        if !contains_reference(text) {
            return Ok(text.to_string());
        }
        let mut memo = HashMap::new();
        let mut chain = Vec::new();
        self.substitute(text, &mut memo, &mut chain)
    }

    fn resolve(
        &self,
        name: &str,
        memo: &mut HashMap<String, String>,
        chain: &mut Vec<String>,
    ) -> VarsResult<String> {
        if let Some(value) = memo.get(name) {
            return Ok(value.clone());
        }
        let var = self
            .vars
            .get(name)
            .ok_or_else(|| VarsError::UnresolvedReference(name.to_string()))?;
        if var.resolved {
            return Ok(var.value.clone());
        }

        if chain.iter().any(|n| n == name) || chain.len() >= MAX_RESOLVE_DEPTH {
            chain.push(name.to_string());
            return Err(VarsError::CycleDetected(chain.join(" -> ")));
        }

        chain.push(name.to_string());
        let value = self.substitute(&var.value, memo, chain)?;
        chain.pop();

        memo.insert(name.to_string(), value.clone());
        Ok(value)
    }

    fn substitute(
        &self,
        text: &str,
        memo: &mut HashMap<String, String>,
        chain: &mut Vec<String>,
    ) -> VarsResult<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in VARIABLE_REGEX.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&text[last..whole.start()]);
            out.push_str(&self.resolve(reference_name(&caps), memo, chain)?);
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }
}

fn reference_name<'t>(caps: &Captures<'t>) -> &'t str {
    caps.get(1).map_or("", |m| m.as_str())
}

/// Returns true if `text` contains at least one `${name}` reference
pub fn contains_reference(text: &str) -> bool {
    VARIABLE_REGEX.is_match(text)
}

/// List the variable names referenced by `text`, in order of appearance
pub fn references(text: &str) -> Vec<String> {
    VARIABLE_REGEX
        .captures_iter(text)
        .map(|caps| reference_name(&caps).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scope(pairs: &[(&str, &str)]) -> Variables {
        let mut vars = Variables::new();
        for (name, value) in pairs {
            vars.register(Variable::new(*name, *value)).unwrap();
        }
        vars
    }

    #[test]
    fn test_build_resolves_chain() {
        let mut vars = scope(&[("a", "${b}"), ("b", "x")]);
        vars.build().unwrap();
        assert_eq!(vars.get("a"), Some("x"));
        assert!(vars.is_built());
    }

    #[test]
    fn test_build_resolves_nested_references() {
        let mut vars = scope(&[
            ("home", "/opt"),
            ("role", "mds"),
            ("log_dir", "${home}/logs/${role}${seq}"),
            ("seq", "0"),
        ]);
        vars.build().unwrap();
        assert_eq!(vars.get("log_dir"), Some("/opt/logs/mds0"));
    }

    #[test]
    fn test_build_only_leaves_unrelated_pending() {
        let mut vars = scope(&[
            ("port", "82${seq}"),
            ("seq", "01"),
            ("endpoints", "${cluster_etcd_addr}"),
        ]);
        vars.build_only(&["port"]).unwrap();
        assert_eq!(vars.get("port"), Some("8201"));
        assert_eq!(vars.get("endpoints"), Some("${cluster_etcd_addr}"));
        assert!(!vars.is_built());

        vars.register(Variable::immutable("cluster_etcd_addr", "10.0.0.1:2379"))
            .unwrap();
        vars.build().unwrap();
        assert_eq!(vars.get("endpoints"), Some("10.0.0.1:2379"));
    }

    #[test]
    fn test_build_detects_cycle() {
        let mut vars = scope(&[("a", "${b}"), ("b", "${a}")]);
        let err = vars.build().unwrap_err();
        assert!(matches!(err, VarsError::CycleDetected(_)));
        // scope untouched on failure
        assert_eq!(vars.get("a"), Some("${b}"));
    }

    #[test]
    fn test_build_detects_self_reference() {
        let mut vars = scope(&[("a", "${a}${a}")]);
        assert!(matches!(vars.build(), Err(VarsError::CycleDetected(_))));
    }

    #[test]
    fn test_build_unresolved_reference() {
        let mut vars = scope(&[("a", "${missing}")]);
        assert_eq!(
            vars.build(),
            Err(VarsError::UnresolvedReference("missing".to_string()))
        );
    }

    #[test]
    fn test_deep_chain_is_bounded() {
        let mut vars = Variables::new();
        for i in 0..(MAX_RESOLVE_DEPTH + 4) {
            vars.register(Variable::new(format!("v{}", i), format!("${{v{}}}", i + 1)))
                .unwrap();
        }
        vars.register(Variable::new(format!("v{}", MAX_RESOLVE_DEPTH + 4), "end"))
            .unwrap();
        assert!(matches!(vars.build(), Err(VarsError::CycleDetected(_))));
    }

    #[test]
    fn test_immutable_cannot_be_overwritten() {
        let mut vars = Variables::new();
        vars.register(Variable::immutable("cluster_etcd_addr", "10.0.0.1:2379"))
            .unwrap();

        let err = vars
            .register(Variable::new("cluster_etcd_addr", "other"))
            .unwrap_err();
        assert_eq!(err, VarsError::Immutable("cluster_etcd_addr".to_string()));
        assert!(vars.set("cluster_etcd_addr", "other").is_err());
        assert_eq!(vars.get("cluster_etcd_addr"), Some("10.0.0.1:2379"));
    }

    #[test]
    fn test_mutable_register_replaces() {
        let mut vars = scope(&[("a", "1")]);
        vars.register(Variable::new("a", "2")).unwrap();
        assert_eq!(vars.get("a"), Some("2"));
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn test_set_unknown_variable() {
        let mut vars = Variables::new();
        assert_eq!(
            vars.set("nope", "1"),
            Err(VarsError::NotRegistered("nope".to_string()))
        );
    }

    #[test]
    fn test_rendering_unknown_reference() {
        let vars = scope(&[("a", "1")]);
        assert!(matches!(
            vars.rendering("${a}-${b}"),
            Err(VarsError::UnresolvedReference(name)) if name == "b"
        ));
    }

    #[test]
    fn test_rendering_before_build_resolves_lazily() {
        let vars = scope(&[("a", "${b}"), ("b", "x")]);
        assert_eq!(vars.rendering("[${a}]").unwrap(), "[x]");
    }

    #[test]
    fn test_references() {
        assert_eq!(
            references("${service_host}:${service_port}"),
            vec!["service_host".to_string(), "service_port".to_string()]
        );
        assert!(references("plain").is_empty());
    }

    proptest! {
        #[test]
        fn rendering_without_references_is_identity(text in "[^$]*") {
            let vars = scope(&[("a", "1")]);
            prop_assert_eq!(vars.rendering(&text).unwrap(), text);
        }
    }
}
