// =============================================================================
// auth.rs — THE FRONT DOOR
// =============================================================================
//
// A tiny credential gate in front of the pipeline commands. Users are
// configured as `name:sha256hex` pairs, comma separated:
//
//   ORDER_INTEL_USERS="analyst:5e88489...,desk:a665a45..."
//
// When no users are configured the door is open. The gate knows nothing
// about the pipeline and the pipeline knows nothing about the gate.
// =============================================================================

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::error::AuthError;

/// Hex SHA-256 of a password, the form stored in `ORDER_INTEL_USERS`.
pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDirectory {
    users: HashMap<String, String>,
}

impl UserDirectory {
    /// Parse `name:hash` pairs. Malformed entries are skipped with a warning.
    pub fn parse(raw: &str) -> Self {
        let mut users = HashMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once(':') {
                Some((name, hash)) if !name.trim().is_empty() && !hash.trim().is_empty() => {
                    users.insert(name.trim().to_string(), hash.trim().to_ascii_lowercase());
                }
                _ => warn!(entry = entry, "ignoring malformed user entry, expected name:sha256hex"),
            }
        }
        Self { users }
    }

    /// No users configured means no login required.
    pub fn is_open(&self) -> bool {
        self.users.is_empty()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Check a username and password against the directory.
    pub fn verify(&self, user: &str, password: &str) -> Result<(), AuthError> {
        let Some(expected) = self.users.get(user) else {
            return Err(AuthError::InvalidCredentials(user.to_string()));
        };
        if *expected == hash_password(password) {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials(user.to_string()))
        }
    }

    /// Gate a command. Open directories let everyone in.
    pub fn authorize(&self, user: Option<&str>, password: Option<&str>) -> Result<(), AuthError> {
        if self.is_open() {
            return Ok(());
        }
        let (Some(user), Some(password)) = (user, password) else {
            return Err(AuthError::MissingCredentials);
        };
        self.verify(user, password)?;
        info!(user = user, "login accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password_is_sha256_hex() {
        assert_eq!(
            hash_password("password"),
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
    }

    #[test]
    fn test_parse_skips_malformed_entries() {
        let dir = UserDirectory::parse("analyst:ABCDEF, broken, :nohash, desk:123");
        assert_eq!(dir.len(), 2);
        assert!(!dir.is_open());
    }

    #[test]
    fn test_empty_directory_is_open() {
        let dir = UserDirectory::parse("");
        assert!(dir.is_open());
        assert!(dir.authorize(None, None).is_ok());
    }

    #[test]
    fn test_verify_accepts_right_and_rejects_wrong_password() {
        let dir = UserDirectory::parse(&format!("analyst:{}", hash_password("s3cret")));
        assert!(dir.verify("analyst", "s3cret").is_ok());
        assert!(matches!(
            dir.verify("analyst", "guess"),
            Err(AuthError::InvalidCredentials(u)) if u == "analyst"
        ));
        assert!(dir.verify("stranger", "s3cret").is_err());
    }

    #[test]
    fn test_authorize_requires_credentials_when_closed() {
        let dir = UserDirectory::parse(&format!("analyst:{}", hash_password("s3cret")));
        assert!(matches!(dir.authorize(None, None), Err(AuthError::MissingCredentials)));
        assert!(matches!(dir.authorize(Some("analyst"), None), Err(AuthError::MissingCredentials)));
        assert!(dir.authorize(Some("analyst"), Some("s3cret")).is_ok());
    }
}
