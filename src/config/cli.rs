//! Command-line arguments

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use super::{FileConfig, SessionConfig};
use crate::module::Role;

/// PPP over Any Transport
#[derive(Debug, Parser)]
#[command(name = "pppoat", version, about = "PPP over Any Transport")]
pub struct Cli {
    /// TOML configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Interface module (default: ppp)
    #[arg(short = 'i', long = "interface", value_name = "IF")]
    pub interface: Option<String>,

    /// Transport module
    #[arg(short = 'm', long = "module", value_name = "TRANSPORT")]
    pub transport: Option<String>,

    /// Act as the initiator side of the link
    #[arg(short = 'S', long = "server")]
    pub server: bool,

    /// Remote address for address-based transports
    #[arg(short = 'd', long = "dest", value_name = "HOST[:PORT]")]
    pub dest: Option<String>,

    /// Local address for address-based transports
    #[arg(short = 's', long = "src", value_name = "[HOST:]PORT")]
    pub src: Option<String>,

    /// List available modules and exit
    #[arg(short = 'l', long = "list")]
    pub list: bool,

    /// Log filter, e.g. "debug" (RUST_LOG takes precedence)
    #[arg(long = "log-filter", value_name = "FILTER")]
    pub log_filter: Option<String>,

    /// Module options; a bare KEY means KEY=true
    #[arg(value_name = "KEY=VALUE")]
    pub options: Vec<String>,
}

/// Split a trailing `key=value` argument
pub fn parse_option_arg(arg: &str) -> anyhow::Result<(String, String)> {
    let (key, value) = arg.split_once('=').unwrap_or((arg, "true"));
    if key.is_empty() {
        anyhow::bail!("module option '{}' has an empty key", arg);
    }
    Ok((key.to_string(), value.to_string()))
}

/// Split `host`, `port`, `host:port` or `[v6]:port`
pub fn split_host_port(value: &str) -> anyhow::Result<(Option<String>, Option<u16>)> {
    let parse_port = |port: &str| {
        port.parse::<u16>()
            .with_context(|| format!("invalid port '{}' in '{}'", port, value))
    };

    if value.is_empty() {
        anyhow::bail!("empty address");
    }
    if value.bytes().all(|b| b.is_ascii_digit()) {
        return Ok((None, Some(parse_port(value)?)));
    }
    if let Some(rest) = value.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .with_context(|| format!("unterminated '[' in '{}'", value))?;
        let port = match tail {
            "" => None,
            tail => Some(parse_port(tail.strip_prefix(':').unwrap_or(tail))?),
        };
        return Ok((Some(host.to_string()), port));
    }
    match value.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            Ok((Some(host.to_string()), Some(parse_port(port)?)))
        }
        _ => Ok((Some(value.to_string()), None)),
    }
}

impl Cli {
    /// Merge the command line over `file` into a session description
    pub fn session_config(&self, file: Option<&FileConfig>) -> anyhow::Result<SessionConfig> {
        let mut options = match file {
            Some(file) => file.string_options()?,
            None => Default::default(),
        };

        if let Some(dest) = &self.dest {
            let (host, port) = split_host_port(dest).context("invalid --dest")?;
            if let Some(host) = host {
                options.insert("remote_host".into(), host);
            }
            if let Some(port) = port {
                options.insert("remote_port".into(), port.to_string());
            }
        }
        if let Some(src) = &self.src {
            let (host, port) = split_host_port(src).context("invalid --src")?;
            if let Some(host) = host {
                options.insert("local_host".into(), host);
            }
            if let Some(port) = port {
                options.insert("local_port".into(), port.to_string());
            }
        }
        for arg in &self.options {
            let (key, value) = parse_option_arg(arg)?;
            options.insert(key, value);
        }

        let transport = self
            .transport
            .clone()
            .or_else(|| file.and_then(|f| f.transport.clone()))
            .context("no transport module given (use -m, or -l to list modules)")?;
        let role = if self.server {
            Role::Initiator
        } else {
            file.and_then(|f| f.role).unwrap_or_default()
        };

        let session = SessionConfig {
            interface: self
                .interface
                .clone()
                .or_else(|| file.and_then(|f| f.interface.clone())),
            transport,
            role,
            options,
        };
        session.validate()?;
        Ok(session)
    }
}
