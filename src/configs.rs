//! Heterogeneous config container.
//!
//! A playbook step carries exactly one kind of entity. [`Configs`] is the
//! closed set of kinds, and [`SmartConfig`] is the indexable per-step view
//! the task factory iterates. Typed accessors return `None` on a kind
//! mismatch or an out-of-range index; they never panic.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::topology::{
    ClientConfig, DeployConfig, Entity, FormatConfig, HostConfig, MonitorConfig,
    PlaygroundConfig, WebsiteConfig,
};

/// Entity collection of one playbook step.
#[derive(Debug, Clone, Default)]
pub enum Configs {
    /// No entity; yields a single local task
    #[default]
    None,
    Deploy(Vec<Arc<DeployConfig>>),
    Client(Vec<Arc<ClientConfig>>),
    Format(Vec<Arc<FormatConfig>>),
    Host(Vec<Arc<HostConfig>>),
    Monitor(Vec<Arc<MonitorConfig>>),
    Website(Vec<Arc<WebsiteConfig>>),
    Playground(Vec<Arc<PlaygroundConfig>>),
    /// Untyped payloads for steps that carry plain data
    Any(Vec<serde_json::Value>),
}

/// Discriminant of [`Configs`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigType {
    None,
    Deploy,
    Client,
    Format,
    Host,
    Monitor,
    Website,
    Playground,
    Any,
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigType::None => "none",
            ConfigType::Deploy => "deploy",
            ConfigType::Client => "client",
            ConfigType::Format => "format",
            ConfigType::Host => "host",
            ConfigType::Monitor => "monitor",
            ConfigType::Website => "website",
            ConfigType::Playground => "playground",
            ConfigType::Any => "any",
        };
        f.write_str(name)
    }
}

macro_rules! impl_from_entity {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Configs {
                fn from(config: $ty) -> Self {
                    Configs::$variant(vec![Arc::new(config)])
                }
            }

            impl From<Arc<$ty>> for Configs {
                fn from(config: Arc<$ty>) -> Self {
                    Configs::$variant(vec![config])
                }
            }

            impl From<Vec<Arc<$ty>>> for Configs {
                fn from(configs: Vec<Arc<$ty>>) -> Self {
                    Configs::$variant(configs)
                }
            }
        )*
    };
}

impl_from_entity! {
    Deploy => DeployConfig,
    Client => ClientConfig,
    Format => FormatConfig,
    Host => HostConfig,
    Monitor => MonitorConfig,
    Website => WebsiteConfig,
    Playground => PlaygroundConfig,
}

impl From<Vec<serde_json::Value>> for Configs {
    fn from(values: Vec<serde_json::Value>) -> Self {
        Configs::Any(values)
    }
}

impl From<()> for Configs {
    fn from((): ()) -> Self {
        Configs::None
    }
}

impl Configs {
    pub fn config_type(&self) -> ConfigType {
        match self {
            Configs::None => ConfigType::None,
            Configs::Deploy(_) => ConfigType::Deploy,
            Configs::Client(_) => ConfigType::Client,
            Configs::Format(_) => ConfigType::Format,
            Configs::Host(_) => ConfigType::Host,
            Configs::Monitor(_) => ConfigType::Monitor,
            Configs::Website(_) => ConfigType::Website,
            Configs::Playground(_) => ConfigType::Playground,
            Configs::Any(_) => ConfigType::Any,
        }
    }

    /// Convert a dynamically typed value.
    ///
    /// Accepts a single entity, an `Arc` of one, a `Vec<Arc<_>>` of one
    /// kind, `()` or a `Vec<serde_json::Value>`.
    pub fn from_dyn(value: Box<dyn Any>) -> Result<Self> {
        macro_rules! try_kinds {
            ($value:ident, $($ty:ty),*) => {
                $(
                    let $value = match $value.downcast::<$ty>() {
                        Ok(config) => return Ok(Configs::from(*config)),
                        Err(other) => other,
                    };
                    let $value = match $value.downcast::<Arc<$ty>>() {
                        Ok(config) => return Ok(Configs::from(*config)),
                        Err(other) => other,
                    };
                    let $value = match $value.downcast::<Vec<Arc<$ty>>>() {
                        Ok(configs) => return Ok(Configs::from(*configs)),
                        Err(other) => other,
                    };
                )*
            };
        }

        try_kinds!(
            value,
            DeployConfig,
            ClientConfig,
            FormatConfig,
            HostConfig,
            MonitorConfig,
            WebsiteConfig,
            PlaygroundConfig
        );

        if value.is::<()>() {
            return Ok(Configs::None);
        }
        match value.downcast::<Vec<serde_json::Value>>() {
            Ok(values) => Ok(Configs::Any(*values)),
            Err(_) => Err(Error::UnsupportedConfigType(
                "expected an entity, a list of one entity kind, () or a list of JSON values"
                    .to_string(),
            )),
        }
    }
}

/// Per-step indexable view over a [`Configs`].
#[derive(Debug, Clone)]
pub struct SmartConfig {
    configs: Configs,
}

impl SmartConfig {
    pub fn new(configs: impl Into<Configs>) -> Self {
        Self {
            configs: configs.into(),
        }
    }

    /// Wrap a dynamically typed value; see [`Configs::from_dyn`].
    pub fn from_dyn(value: Box<dyn Any>) -> Result<Self> {
        Ok(Self {
            configs: Configs::from_dyn(value)?,
        })
    }

    /// Number of units. A null config counts as one.
    pub fn len(&self) -> usize {
        match &self.configs {
            Configs::None => 1,
            Configs::Deploy(v) => v.len(),
            Configs::Client(v) => v.len(),
            Configs::Format(v) => v.len(),
            Configs::Host(v) => v.len(),
            Configs::Monitor(v) => v.len(),
            Configs::Website(v) => v.len(),
            Configs::Playground(v) => v.len(),
            Configs::Any(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config_type(&self) -> ConfigType {
        self.configs.config_type()
    }

    pub fn configs(&self) -> &Configs {
        &self.configs
    }

    pub fn get_dc(&self, index: usize) -> Option<Arc<DeployConfig>> {
        match &self.configs {
            Configs::Deploy(v) => v.get(index).cloned(),
            _ => None,
        }
    }

    pub fn get_cc(&self, index: usize) -> Option<Arc<ClientConfig>> {
        match &self.configs {
            Configs::Client(v) => v.get(index).cloned(),
            _ => None,
        }
    }

    pub fn get_fc(&self, index: usize) -> Option<Arc<FormatConfig>> {
        match &self.configs {
            Configs::Format(v) => v.get(index).cloned(),
            _ => None,
        }
    }

    pub fn get_hc(&self, index: usize) -> Option<Arc<HostConfig>> {
        match &self.configs {
            Configs::Host(v) => v.get(index).cloned(),
            _ => None,
        }
    }

    pub fn get_mc(&self, index: usize) -> Option<Arc<MonitorConfig>> {
        match &self.configs {
            Configs::Monitor(v) => v.get(index).cloned(),
            _ => None,
        }
    }

    pub fn get_wc(&self, index: usize) -> Option<Arc<WebsiteConfig>> {
        match &self.configs {
            Configs::Website(v) => v.get(index).cloned(),
            _ => None,
        }
    }

    pub fn get_pc(&self, index: usize) -> Option<Arc<PlaygroundConfig>> {
        match &self.configs {
            Configs::Playground(v) => v.get(index).cloned(),
            _ => None,
        }
    }

    pub fn get_any(&self, index: usize) -> Option<&serde_json::Value> {
        match &self.configs {
            Configs::Any(v) => v.get(index),
            _ => None,
        }
    }

    /// Uniform entity view of unit `index`; `None` for null and untyped units.
    pub fn entity(&self, index: usize) -> Option<Arc<dyn Entity>> {
        fn erase<T: Entity + 'static>(v: &[Arc<T>], index: usize) -> Option<Arc<dyn Entity>> {
            v.get(index).map(|c| Arc::clone(c) as Arc<dyn Entity>)
        }

        match &self.configs {
            Configs::None | Configs::Any(_) => None,
            Configs::Deploy(v) => erase(v, index),
            Configs::Client(v) => erase(v, index),
            Configs::Format(v) => erase(v, index),
            Configs::Host(v) => erase(v, index),
            Configs::Monitor(v) => erase(v, index),
            Configs::Website(v) => erase(v, index),
            Configs::Playground(v) => erase(v, index),
        }
    }
}
