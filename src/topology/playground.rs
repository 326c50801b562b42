//! Playground entity.
//!
//! A playground is a throwaway all-in-one cluster running in a single
//! local container. It never needs SSH.

use indexmap::IndexMap;

use super::{format_named_id, Entity, Kind};
use crate::connection::SshTarget;
use crate::error::{Error, Result};
use crate::vars::{Variable, Variables};

/// A local sandbox cluster.
#[derive(Debug, Clone)]
pub struct PlaygroundConfig {
    id: String,
    name: String,
    kind: Kind,
    config: IndexMap<String, String>,
    variables: Variables,
}

impl PlaygroundConfig {
    pub fn new(name: &str, kind: Kind, container_image: &str) -> Result<Self> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(Error::Topology(format!("invalid playground name '{}'", name)));
        }

        let mut config = IndexMap::new();
        config.insert("container_image".to_string(), container_image.to_string());
        config.insert("kind".to_string(), kind.as_str().to_string());

        let mut variables = Variables::new();
        variables.register(Variable::new("playground_name", name))?;
        variables.register(Variable::new("prefix", format!("/{}", kind)))?;
        variables.build()?;

        Ok(Self {
            id: format_named_id("playground", "localhost", name),
            name: name.to_string(),
            kind,
            config,
            variables,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn container_image(&self) -> &str {
        self.config("container_image").unwrap_or_default()
    }

    pub fn container_name(&self) -> String {
        format!("playground-{}-{}", self.kind, self.name)
    }
}

impl Entity for PlaygroundConfig {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> &str {
        "playground"
    }

    fn host(&self) -> &str {
        "localhost"
    }

    fn config(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    fn variables(&self) -> &Variables {
        &self.variables
    }

    fn ssh_target(&self) -> Option<&SshTarget> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playground() {
        let pc = PlaygroundConfig::new("demo", Kind::CurveFs, "curvefs:latest").unwrap();
        assert_eq!(pc.id(), "playground_localhost_demo");
        assert_eq!(pc.container_name(), "playground-curvefs-demo");
        assert!(pc.ssh_target().is_none());
        assert!(PlaygroundConfig::new("bad name", Kind::CurveFs, "x").is_err());
    }
}
