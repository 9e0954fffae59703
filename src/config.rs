//! Configuration loading (A1): a TOML file matched against the options
//! table, with CLI overrides for the bind address and config path. A
//! missing file is generated with the documented defaults on first run.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_CONFIG_TOML: &str = include_str!("../nullrouted.default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind: String,
    pub api: String,
    pub nameservers: Vec<String>,
    pub doh: String,
    pub nullroute: Ipv4Addr,
    pub nullroutev6: Ipv6Addr,
    pub nxdomain: bool,
    pub ttl: u32,
    pub expire: u32,
    pub maxcount: usize,
    pub questioncachecap: usize,
    pub timeout: u64,
    pub interval: u64,
    pub sources: Vec<String>,
    pub sourcedirs: Vec<String>,
    pub blocklist: Vec<String>,
    pub whitelist: Vec<String>,
    pub togglename: String,
    pub reactivationdelay: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "0.0.0.0:53".to_string(),
            api: "127.0.0.1:8080".to_string(),
            nameservers: vec!["8.8.8.8:53".to_string(), "8.8.4.4:53".to_string()],
            doh: String::new(),
            nullroute: Ipv4Addr::new(0, 0, 0, 0),
            nullroutev6: Ipv6Addr::UNSPECIFIED,
            nxdomain: false,
            ttl: 10,
            expire: 600,
            maxcount: 0,
            questioncachecap: 5000,
            timeout: 5,
            interval: 200,
            sources: Vec::new(),
            sourcedirs: vec!["sources".to_string()],
            blocklist: Vec::new(),
            whitelist: Vec::new(),
            togglename: String::new(),
            reactivationdelay: 300,
        }
    }
}

impl Config {
    /// Loads `path`, generating the default file there first if it does
    /// not exist, then validates the result.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            Self::write_default(path)?;
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {path:?}: {e}")))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("failed to parse {path:?}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, DEFAULT_CONFIG_TOML)
            .map_err(|e| Error::Config(format!("failed to generate {path:?}: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        self.bind
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("invalid bind address {:?}: {e}", self.bind)))?;
        self.api
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("invalid api address {:?}: {e}", self.api)))?;
        for ns in &self.nameservers {
            ns.parse::<SocketAddr>()
                .map_err(|e| Error::Config(format!("invalid nameserver {ns:?}: {e}")))?;
        }
        if self.timeout == 0 {
            return Err(Error::Config("timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address {:?}: {e}", self.bind)))
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        self.api
            .parse()
            .map_err(|e| Error::Config(format!("invalid api address {:?}: {e}", self.api)))
    }

    pub fn nameserver_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.nameservers
            .iter()
            .map(|ns| {
                ns.parse()
                    .map_err(|e| Error::Config(format!("invalid nameserver {ns:?}: {e}")))
            })
            .collect()
    }

    pub fn doh_url(&self) -> Option<String> {
        if self.doh.trim().is_empty() {
            None
        } else {
            Some(self.doh.clone())
        }
    }

    pub fn sources_dir(&self) -> PathBuf {
        PathBuf::from(
            self.sourcedirs
                .first()
                .cloned()
                .unwrap_or_else(|| "sources".to_string()),
        )
    }

    pub fn source_dirs(&self) -> Vec<PathBuf> {
        self.sourcedirs.iter().map(PathBuf::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_generates_default_and_validates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nullrouted.toml");
        let config = Config::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.bind, "0.0.0.0:53");
        assert_eq!(config.nameservers.len(), 2);
    }

    #[test]
    fn invalid_bind_address_fails_validation() {
        let mut config = Config::default();
        config.bind = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn doh_url_is_none_when_blank() {
        let config = Config::default();
        assert_eq!(config.doh_url(), None);
    }
}
