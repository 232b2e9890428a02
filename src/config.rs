//! Layered configuration: TOML file < environment variables < CLI flags, resolved
//! once at startup into an immutable `Config`. Nothing past `main` re-reads `std::env`
//! for these values; the only exception is known-hosts/key path resolution, which is
//! itself part of startup path resolution (see `crypto::known_hosts`).

use directories::ProjectDirs;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid port {0}: must be 1-65535")]
    InvalidPort(u32),
    #[error("config file {path:?} could not be read: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config file {path:?} is not valid TOML: {source}")]
    FileParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("key file {0:?} does not exist")]
    MissingKeyFile(PathBuf),
    #[error("key file {path:?} has insecure permissions (must be owner-only)")]
    InsecureKeyPermissions { path: PathBuf },
    #[error("--max-clients must be greater than zero")]
    ZeroMaxClients,
}

/// Values that may come from a TOML config file, used only as defaults that CLI
/// flags and environment variables can override. Every field is optional because a
/// config file is itself optional and may set only a subset of keys.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub address: Option<String>,
    pub max_clients: Option<u32>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub client_keys: Option<PathBuf>,
    pub no_encrypt: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::FileParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default config file location: `<config dir>/asciichat/config.toml`, following
    /// the same XDG-aware lookup the teacher uses `directories` for.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "asciichat").map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: IpAddr,
    pub port: u16,
    pub key: Option<PathBuf>,
    pub client_keys: Option<PathBuf>,
    pub password: Option<String>,
    pub no_encrypt: bool,
    pub max_clients: u32,
    pub log: LogTarget,
}

#[derive(Debug, Clone)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_clients == 0 {
            return Err(ConfigError::ZeroMaxClients);
        }
        if let Some(key) = &self.key {
            check_key_permissions(key)?;
        }
        Ok(())
    }
}

/// Refuses to use a private key file that is readable/writable by anyone other than
/// its owner. POSIX-only check; non-Unix platforms are trusted to enforce an
/// equivalent owner-only ACL out of band (see SPEC_FULL.md §6).
#[cfg(unix)]
pub fn check_key_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingKeyFile(path.to_path_buf()))?;
    let mode = metadata.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(ConfigError::InsecureKeyPermissions {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_key_permissions(path: &Path) -> Result<(), ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingKeyFile(path.to_path_buf()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_max_clients_is_rejected() {
        let cfg = ServerConfig {
            address: "127.0.0.1".parse().unwrap(),
            port: 9000,
            key: None,
            client_keys: None,
            password: None,
            no_encrypt: true,
            max_clients: 0,
            log: LogTarget::Stderr,
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroMaxClients)));
    }

    #[test]
    fn file_config_parses_partial_toml() {
        let toml_text = "port = 9999\nmax_clients = 50\n";
        let parsed: FileConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(parsed.port, Some(9999));
        assert_eq!(parsed.max_clients, Some(50));
        assert!(parsed.address.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn insecure_key_permissions_are_rejected() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_ed25519");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"not a real key").unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(matches!(
            check_key_permissions(&path),
            Err(ConfigError::InsecureKeyPermissions { .. })
        ));
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(check_key_permissions(&path).is_ok());
    }
}
