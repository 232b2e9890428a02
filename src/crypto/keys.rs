//! Loading long-term Ed25519 identities from OpenSSH-format key files (SPEC_FULL.md
//! §4.3.4-5, §6). No teacher file loads SSH keys; `ssh-key` is a fresh dependency
//! chosen because it is the crate the wider Rust ecosystem reaches for here, in
//! keeping with "never fall back to the standard library where the ecosystem shows
//! a way."

use super::CryptoError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use ssh_key::private::PrivateKey;
use ssh_key::public::PublicKey;
use std::path::Path;

/// Loads an Ed25519 signing key from an OpenSSH private key file. Refuses group- or
/// world-readable files on Unix, mirroring `config::check_key_permissions`.
pub fn load_signing_key(path: &Path) -> Result<SigningKey, CryptoError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(path)
            .map_err(|err| CryptoError::Key(format!("{}: {err}", path.display())))?;
        if metadata.permissions().mode() & 0o077 != 0 {
            return Err(CryptoError::Key(format!(
                "{}: insecure permissions, expected owner-only",
                path.display()
            )));
        }
    }

    let text = std::fs::read_to_string(path)
        .map_err(|err| CryptoError::Key(format!("{}: {err}", path.display())))?;
    let private = PrivateKey::from_openssh(text.trim())
        .map_err(|err| CryptoError::Key(format!("{}: {err}", path.display())))?;
    let keypair = private
        .key_data()
        .ed25519()
        .ok_or_else(|| CryptoError::Key(format!("{}: not an Ed25519 key", path.display())))?;
    // ssh-key stores the 32-byte seed as the first half of its private key bytes;
    // ed25519-dalek's `SigningKey` is constructed directly from that seed.
    let seed: [u8; 32] = keypair
        .private
        .as_ref()
        .try_into()
        .map_err(|_| CryptoError::Key(format!("{}: malformed Ed25519 seed", path.display())))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Loads a client-key allowlist (SPEC_FULL.md §4.3.5, `--client-keys <path>`): one
/// OpenSSH public key per line, blank lines and `#`-comments skipped.
pub fn load_authorized_keys(path: &Path) -> Result<Vec<VerifyingKey>, CryptoError> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| CryptoError::Key(format!("{}: {err}", path.display())))?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let public = PublicKey::from_openssh(line)
                .map_err(|err| CryptoError::Key(format!("{}: {err}", path.display())))?;
            let ed25519 = public
                .key_data()
                .ed25519()
                .ok_or_else(|| CryptoError::Key(format!("{}: not an Ed25519 key", path.display())))?;
            VerifyingKey::from_bytes(&ed25519.0)
                .map_err(|_| CryptoError::Key(format!("{}: malformed Ed25519 public key", path.display())))
        })
        .collect()
}

/// OpenSSH-style fingerprint: `SHA256:` followed by the unpadded base64 of the
/// SHA-256 digest of the raw 32-byte public key.
pub fn fingerprint(key: &VerifyingKey) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("SHA256:{}", STANDARD.encode(digest).trim_end_matches('='))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn fingerprint_is_stable_for_the_same_key() {
        let signing = SigningKey::generate(&mut OsRng);
        let verifying = signing.verifying_key();
        assert_eq!(fingerprint(&verifying), fingerprint(&verifying));
    }

    #[test]
    fn fingerprint_differs_between_keys() {
        let a = SigningKey::generate(&mut OsRng).verifying_key();
        let b = SigningKey::generate(&mut OsRng).verifying_key();
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
