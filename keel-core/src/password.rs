//! Password hashing seam.
//!
//! The entity store only ever sees the output of a [`PasswordHasher`]. The
//! default implementation is a salted SHA-256 digest; deployments that need a
//! slow KDF plug their own hasher in at construction time.

use sha2::{Digest, Sha256};
use uuid::Uuid;

pub trait PasswordHasher: Send + Sync {
    /// Hash a plaintext password into an opaque, storable string.
    fn hash(&self, plaintext: &str) -> String;
}

/// `{salt}${hex(sha256(salt || password))}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256PasswordHasher;

impl Sha256PasswordHasher {
    fn digest(salt: &str, plaintext: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(plaintext.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl PasswordHasher for Sha256PasswordHasher {
    fn hash(&self, plaintext: &str) -> String {
        let salt = Uuid::new_v4().simple().to_string();
        format!("{}${}", salt, Self::digest(&salt, plaintext))
    }
}
