//! Trust-on-first-use host key store (SPEC_FULL.md §3, §4.3.4, §6). Text format is
//! one `host ip port algorithm base64-fingerprint first-seen-unix` line per entry,
//! in the spirit of OpenSSH's own known_hosts, resolved under the XDG config
//! directory the same way `config::FileConfig` locates its own file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use directories::ProjectDirs;

use super::CryptoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyStatus {
    Match,
    Absent,
    Mismatch,
}

/// The TOFU lookup key (SPEC_FULL.md §3): hostname, resolved IP, and port
/// together, since a hostname can resolve to more than one address over time and
/// a single IP can serve more than one hostname.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostId {
    pub hostname: String,
    pub ip: String,
    pub port: u16,
}

impl HostId {
    pub fn new(hostname: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            ip: ip.into(),
            port,
        }
    }
}

impl std::fmt::Display for HostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}:{})", self.hostname, self.ip, self.port)
    }
}

struct Entry {
    algorithm: String,
    fingerprint: String,
    first_seen: u64,
}

/// Splits a `keys::fingerprint`-style string (`"SHA256:base64"`) into its
/// algorithm tag and base64 digest, the two fields the persisted format keeps
/// separate.
fn split_fingerprint(fingerprint: &str) -> (&str, &str) {
    fingerprint.split_once(':').unwrap_or(("SHA256", fingerprint))
}

fn join_fingerprint(algorithm: &str, fingerprint: &str) -> String {
    format!("{algorithm}:{fingerprint}")
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[derive(Default)]
pub struct KnownHosts {
    entries: HashMap<HostId, Entry>,
}

impl KnownHosts {
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "asciichat").map(|dirs| dirs.config_dir().join("known_hosts"))
    }

    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .map_err(|err| CryptoError::KnownHosts(format!("{}: {err}", path.display())))?;
        let mut entries = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(hostname), Some(ip), Some(port), Some(algorithm), Some(fingerprint), Some(first_seen)) =
                (fields.next(), fields.next(), fields.next(), fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let Ok(port) = port.parse::<u16>() else { continue };
            let first_seen = first_seen.parse::<u64>().unwrap_or(0);
            entries.insert(
                HostId::new(hostname, ip, port),
                Entry {
                    algorithm: algorithm.to_string(),
                    fingerprint: fingerprint.to_string(),
                    first_seen,
                },
            );
        }
        Ok(Self { entries })
    }

    pub fn save(&self, path: &Path) -> Result<(), CryptoError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| CryptoError::KnownHosts(format!("{}: {err}", parent.display())))?;
        }
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort_by(|a, b| (&a.hostname, &a.ip, a.port).cmp(&(&b.hostname, &b.ip, b.port)));
        let mut text = String::new();
        for key in keys {
            let entry = &self.entries[key];
            text.push_str(&format!(
                "{} {} {} {} {} {}\n",
                key.hostname, key.ip, key.port, entry.algorithm, entry.fingerprint, entry.first_seen
            ));
        }
        fs::write(path, text).map_err(|err| CryptoError::KnownHosts(format!("{}: {err}", path.display())))
    }

    /// Checks `id` against the stored fingerprint (`"algorithm:base64"`, e.g. the
    /// output of `keys::fingerprint`). Does not record on `Absent`; callers decide
    /// whether to TOFU-record via `record`.
    pub fn check(&self, id: &HostId, fingerprint: &str) -> HostKeyStatus {
        match self.entries.get(id) {
            None => HostKeyStatus::Absent,
            Some(entry) if join_fingerprint(&entry.algorithm, &entry.fingerprint) == fingerprint => HostKeyStatus::Match,
            Some(_) => HostKeyStatus::Mismatch,
        }
    }

    /// Records `id -> fingerprint` with the current time as its first-seen
    /// timestamp (SPEC_FULL.md §6: `first-seen-unix`).
    pub fn record(&mut self, id: &HostId, fingerprint: &str) {
        let (algorithm, fingerprint) = split_fingerprint(fingerprint);
        self.entries.insert(
            id.clone(),
            Entry {
                algorithm: algorithm.to_string(),
                fingerprint: fingerprint.to_string(),
                first_seen: unix_now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(host: &str, port: u16) -> HostId {
        HostId::new(host, "192.0.2.10", port)
    }

    #[test]
    fn unknown_host_is_absent() {
        let hosts = KnownHosts::default();
        assert_eq!(hosts.check(&id("example.com", 1234), "SHA256:abc"), HostKeyStatus::Absent);
    }

    #[test]
    fn recorded_host_matches_and_rejects_mismatch() {
        let mut hosts = KnownHosts::default();
        hosts.record(&id("example.com", 1234), "SHA256:abc");
        assert_eq!(hosts.check(&id("example.com", 1234), "SHA256:abc"), HostKeyStatus::Match);
        assert_eq!(hosts.check(&id("example.com", 1234), "SHA256:xyz"), HostKeyStatus::Mismatch);
    }

    #[test]
    fn same_ip_different_port_is_a_distinct_entry() {
        let mut hosts = KnownHosts::default();
        hosts.record(&id("example.com", 1234), "SHA256:abc");
        assert_eq!(hosts.check(&id("example.com", 4321), "SHA256:abc"), HostKeyStatus::Absent);
    }

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        let mut hosts = KnownHosts::default();
        hosts.record(&id("a", 1), "SHA256:one");
        hosts.record(&id("b", 2), "SHA256:two");
        hosts.save(&path).unwrap();

        let reloaded = KnownHosts::load(&path).unwrap();
        assert_eq!(reloaded.check(&id("a", 1), "SHA256:one"), HostKeyStatus::Match);
        assert_eq!(reloaded.check(&id("b", 2), "SHA256:two"), HostKeyStatus::Match);
    }

    #[test]
    fn persisted_line_carries_all_six_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        let mut hosts = KnownHosts::default();
        hosts.record(&id("example.com", 4242), "SHA256:abcXYZ");
        hosts.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let fields: Vec<&str> = text.trim().split_whitespace().collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0], "example.com");
        assert_eq!(fields[1], "192.0.2.10");
        assert_eq!(fields[2], "4242");
        assert_eq!(fields[3], "SHA256");
        assert_eq!(fields[4], "abcXYZ");
        assert!(fields[5].parse::<u64>().is_ok());
    }
}
