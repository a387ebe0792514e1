//! Configuration
//!
//! A session is described by an optional TOML file and the command line.
//! Command-line values win over the file; module options from both are
//! merged into one `key -> value` map handed to the modules.
//!
//! ```toml
//! interface = "tun"
//! transport = "udp"
//! role = "initiator"
//!
//! [logging]
//! filter = "pppoat=debug"
//!
//! [options]
//! remote_host = "203.0.113.7"
//! remote_port = 49153
//! ```

pub mod cli;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;

use crate::module::{ModuleContext, Role};

pub use cli::Cli;

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `"info"` or `"pppoat::transport=debug"`
    #[serde(default)]
    pub filter: Option<String>,

    /// One JSON object per event (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// Contents of a configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub interface: Option<String>,

    #[serde(default)]
    pub transport: Option<String>,

    #[serde(default)]
    pub role: Option<Role>,

    #[serde(default)]
    pub logging: Option<LoggingConfig>,

    /// Module options; scalars are converted to their string form
    #[serde(default)]
    pub options: HashMap<String, toml::Value>,
}

impl FileConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Module options as strings
    pub fn string_options(&self) -> anyhow::Result<HashMap<String, String>> {
        self.options
            .iter()
            .map(|(key, value)| {
                let text = match value {
                    toml::Value::String(s) => s.clone(),
                    toml::Value::Integer(i) => i.to_string(),
                    toml::Value::Float(f) => f.to_string(),
                    toml::Value::Boolean(b) => b.to_string(),
                    other => anyhow::bail!(
                        "option '{}' must be a string, number or boolean, got {}",
                        key,
                        other.type_str()
                    ),
                };
                Ok((key.clone(), text))
            })
            .collect()
    }
}

/// Everything needed to start one tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Interface module name; the default interface when `None`
    pub interface: Option<String>,
    pub transport: String,
    pub role: Role,
    pub options: HashMap<String, String>,
}

impl SessionConfig {
    pub fn new(transport: impl Into<String>) -> Self {
        Self {
            interface: None,
            transport: transport.into(),
            role: Role::default(),
            options: HashMap::new(),
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Context handed to module constructors
    pub fn module_context(&self) -> ModuleContext {
        ModuleContext::new(self.role, self.options.clone())
    }

    /// Check for values no module could accept
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.transport.trim().is_empty() {
            anyhow::bail!("transport module name is empty");
        }
        if matches!(&self.interface, Some(name) if name.trim().is_empty()) {
            anyhow::bail!("interface module name is empty");
        }
        if self.options.keys().any(|k| k.is_empty()) {
            anyhow::bail!("module option with an empty key");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let config = FileConfig::from_toml_str(
            r#"
            interface = "tun"
            transport = "udp"
            role = "initiator"

            [logging]
            filter = "debug"

            [options]
            remote_host = "203.0.113.7"
            remote_port = 49153
            accept_remote_terminate = false
            "#,
        )
        .unwrap();
        assert_eq!(config.interface.as_deref(), Some("tun"));
        assert_eq!(config.transport.as_deref(), Some("udp"));
        assert_eq!(config.role, Some(Role::Initiator));
        assert_eq!(config.logging.unwrap().filter.as_deref(), Some("debug"));
    }

    #[test]
    fn test_string_options() {
        let config = FileConfig::from_toml_str(
            r#"
            [options]
            remote_host = "203.0.113.7"
            remote_port = 49153
            accept_remote_terminate = false
            "#,
        )
        .unwrap();
        let options = config.string_options().unwrap();
        assert_eq!(options["remote_host"], "203.0.113.7");
        assert_eq!(options["remote_port"], "49153");
        assert_eq!(options["accept_remote_terminate"], "false");
    }

    #[test]
    fn test_rejects_nested_option_and_unknown_key() {
        let config = FileConfig::from_toml_str("[options]\nlist = [1, 2]\n").unwrap();
        assert!(config.string_options().is_err());
        assert!(FileConfig::from_toml_str("transprot = \"udp\"\n").is_err());
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(FileConfig::from_toml_str("").unwrap(), FileConfig::default());
    }

    #[test]
    fn test_session_validate() {
        assert!(SessionConfig::new("udp").validate().is_ok());
        assert!(SessionConfig::new(" ").validate().is_err());
        assert!(SessionConfig::new("udp").with_interface("").validate().is_err());
        assert!(SessionConfig::new("udp").with_option("", "x").validate().is_err());
    }

    #[test]
    fn test_module_context_carries_role_and_options() {
        let ctx = SessionConfig::new("udp")
            .with_role(Role::Initiator)
            .with_option("local_port", "0")
            .module_context();
        assert_eq!(ctx.role, Role::Initiator);
        assert_eq!(ctx.get_option("local_port"), Some("0"));
    }
}
