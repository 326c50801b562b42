//! Management console entity.
//!
//! ```yaml
//! kind: curvebs
//! host: 10.0.1.1
//! container_image: opencurvedocker/curve-manager:latest
//! listen_port: 443
//! data_dir: /tmp/website/data
//! ```

use indexmap::IndexMap;
use std::sync::Arc;

use super::{format_id, stringify_map, Entity, Kind, SshSettings};
use crate::connection::SshTarget;
use crate::error::{Error, Result};
use crate::vars::{Variable, Variables};

const CONTAINER_NAME: &str = "curve-website";

/// The console on its host.
#[derive(Debug, Clone)]
pub struct WebsiteConfig {
    id: String,
    kind: Kind,
    host: String,
    config: IndexMap<String, String>,
    variables: Variables,
    ssh: Option<SshTarget>,
}

impl WebsiteConfig {
    pub fn new(mut config: IndexMap<String, String>) -> Result<Self> {
        let host = config
            .get("host")
            .cloned()
            .ok_or_else(|| Error::Topology("website config requires 'host'".to_string()))?;
        let kind: Kind = config
            .get("kind")
            .map(String::as_str)
            .unwrap_or("curvebs")
            .parse()?;
        config
            .entry("listen_port".to_string())
            .or_insert_with(|| "443".to_string());

        let mut variables = Variables::new();
        variables.register(Variable::new("service_role", "website"))?;
        variables.register(Variable::new("service_host", host.clone()))?;
        variables.register(Variable::new("prefix", format!("/{}/website", kind)))?;
        variables.build()?;
        for value in config.values_mut() {
            *value = variables.rendering(value)?;
        }

        let ssh = SshSettings::from_config(&config)?.target(&host);
        Ok(Self {
            id: format_id("website", &host, 0),
            kind,
            host,
            config,
            variables,
            ssh,
        })
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn container_image(&self) -> &str {
        self.config("container_image").unwrap_or_default()
    }

    pub fn listen_port(&self) -> &str {
        self.config("listen_port").unwrap_or_default()
    }

    pub fn data_dir(&self) -> &str {
        self.config("data_dir").unwrap_or_default()
    }

    pub fn container_name(&self) -> &'static str {
        CONTAINER_NAME
    }
}

impl Entity for WebsiteConfig {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> &str {
        "website"
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn config(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    fn variables(&self) -> &Variables {
        &self.variables
    }

    fn ssh_target(&self) -> Option<&SshTarget> {
        self.ssh.as_ref()
    }
}

/// Parse a website file.
pub fn parse_website(data: &str) -> Result<Arc<WebsiteConfig>> {
    let map: serde_yaml::Mapping = serde_yaml::from_str(data)?;
    Ok(Arc::new(WebsiteConfig::new(stringify_map(&map, "website")?)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_website() {
        let wc = parse_website(
            "host: 10.0.1.1\nuser: curve\ncontainer_image: manager:v1\ndata_dir: /srv/${service_role}\n",
        )
        .unwrap();
        assert_eq!(wc.id(), "website_10.0.1.1_0");
        assert_eq!(wc.listen_port(), "443");
        assert_eq!(wc.data_dir(), "/srv/website");
        assert_eq!(wc.kind(), Kind::CurveBs);
        assert!(wc.ssh_target().is_some());
    }

    #[test]
    fn test_website_requires_host() {
        assert!(parse_website("container_image: x\n").is_err());
    }
}
