// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server used for TLSA lookups. Empty means the system resolver.
    #[serde(default)]
    pub dns_address: String,

    /// Port used for TLSA lookups against `dns_address`.
    #[serde(default = "default_dns_port")]
    pub dns_port: u16,

    /// IP address both listeners bind to.
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    /// Root CA certificate used for signing.
    #[serde(default = "default_root_cert")]
    pub root_cert: PathBuf,

    /// Root CA private key used for signing.
    #[serde(default = "default_root_key")]
    pub root_key: PathBuf,

    /// TLS certificate chain presented by the HTTPS listener.
    #[serde(default = "default_listen_chain")]
    pub listen_chain: PathBuf,

    /// TLS private key used by the HTTPS listener.
    #[serde(default = "default_listen_key")]
    pub listen_key: PathBuf,
}

fn default_dns_port() -> u16 {
    53
}

fn default_listen_ip() -> String {
    "127.127.127.127".to_string()
}

fn default_root_cert() -> PathBuf {
    PathBuf::from("root_cert.pem")
}

fn default_root_key() -> PathBuf {
    PathBuf::from("root_key.pem")
}

fn default_listen_chain() -> PathBuf {
    PathBuf::from("listen_chain.pem")
}

fn default_listen_key() -> PathBuf {
    PathBuf::from("listen_key.pem")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dns_address: String::new(),
            dns_port: default_dns_port(),
            listen_ip: default_listen_ip(),
            root_cert: default_root_cert(),
            root_key: default_root_key(),
            listen_chain: default_listen_chain(),
            listen_key: default_listen_key(),
        }
    }
}

impl Config {
    /// Load the config file if present, falling back to defaults, and
    /// resolve relative key/certificate paths against `config_dir`.
    pub fn load(path: Option<&Path>, config_dir: &Path) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path).map_err(|e| Error::ReadFile {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?
            }
            _ => Self::default(),
        };

        config.resolve_paths(config_dir);
        config.validate()?;

        Ok(config)
    }

    fn resolve_paths(&mut self, config_dir: &Path) {
        for path in [
            &mut self.root_cert,
            &mut self.root_key,
            &mut self.listen_chain,
            &mut self.listen_key,
        ] {
            if path.is_relative() {
                *path = config_dir.join(&*path);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.dns_port == 0 {
            return Err(Error::Config("dns_port cannot be 0".into()));
        }
        if self.listen_ip.parse::<std::net::IpAddr>().is_err() {
            return Err(Error::Config(format!(
                "listen_ip '{}' is not a valid IP address",
                self.listen_ip
            )));
        }
        if !self.dns_address.is_empty() && self.dns_address.parse::<std::net::IpAddr>().is_err() {
            return Err(Error::Config(format!(
                "dns_address '{}' is not a valid IP address",
                self.dns_address
            )));
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| Error::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
