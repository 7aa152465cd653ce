//! Username and password policy.
//!
//! The gatekeeper doesn't decide what a good name or password is, or how
//! a password is stored. It asks a [`Credentials`] implementation.
//! [`StandardCredentials`] is the policy the server ships with:
//!
//! - usernames are 1 to 14 lowercase ASCII letters and not banned
//! - passwords are 5 to 20 printable ASCII characters
//! - hashes are `hex(salt)$hex(sha256(salt || password))` with a 16-byte
//!   random salt

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::BannedNames;

const SALT_LEN: usize = 16;

/// Validation and hashing rules for account credentials.
pub trait Credentials: Send + Sync + 'static {
    /// Whether `name` (already lowercased) may be used as a username.
    fn is_valid_username(&self, name: &str) -> bool;

    /// Whether `password` satisfies the strength rules.
    fn is_valid_password(&self, password: &str) -> bool;

    /// Produces a storable hash of `password`.
    fn hash_password(&self, password: &str) -> String;

    /// Checks `password` against a hash from [`hash_password`](Self::hash_password).
    ///
    /// A malformed hash never verifies.
    fn verify_password(&self, password: &str, hash: &str) -> bool;

    /// One line explaining the password rules to a player.
    fn password_rules(&self) -> String {
        "Please choose a password.".to_string()
    }
}

/// Length limits for [`StandardCredentials`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialLimits {
    pub username_max_len: usize,
    pub password_min_len: usize,
    pub password_max_len: usize,
}

impl Default for CredentialLimits {
    fn default() -> Self {
        Self {
            username_max_len: 14,
            password_min_len: 5,
            password_max_len: 20,
        }
    }
}

/// The default credential policy.
#[derive(Debug, Clone, Default)]
pub struct StandardCredentials {
    limits: CredentialLimits,
    banned: BannedNames,
}

impl StandardCredentials {
    pub fn new(limits: CredentialLimits, banned: BannedNames) -> Self {
        Self { limits, banned }
    }

    pub fn limits(&self) -> CredentialLimits {
        self.limits
    }
}

impl Credentials for StandardCredentials {
    fn is_valid_username(&self, name: &str) -> bool {
        !name.is_empty()
            && name.len() <= self.limits.username_max_len
            && name.bytes().all(|b| b.is_ascii_lowercase())
            && !self.banned.is_banned(name)
    }

    fn is_valid_password(&self, password: &str) -> bool {
        let len = password.len();
        (self.limits.password_min_len..=self.limits.password_max_len).contains(&len)
            && password.bytes().all(|b| (0x20..=0x7e).contains(&b))
    }

    fn hash_password(&self, password: &str) -> String {
        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        format!("{}${}", hex::encode(salt), digest(&salt, password))
    }

    fn verify_password(&self, password: &str, hash: &str) -> bool {
        let Some((salt, expected)) = hash.split_once('$') else {
            return false;
        };
        let Ok(salt) = hex::decode(salt) else {
            return false;
        };
        digest(&salt, password)
            .as_bytes()
            .ct_eq(expected.as_bytes())
            .into()
    }

    fn password_rules(&self) -> String {
        format!(
            "Passwords must be between {} and {} characters long and include any terminal character.",
            self.limits.password_min_len, self.limits.password_max_len
        )
    }
}

fn digest(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
