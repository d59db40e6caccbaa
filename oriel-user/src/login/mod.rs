pub mod demo_provider;
pub mod static_provider;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// The identity a request is served for, once its credentials are checked
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
}

/// The trait LoginProvider defines the interface for a login provider that allows
/// to check a username and a password against a user database.
#[async_trait]
pub trait LoginProvider {
    /// The login method takes an account's login and password and returns
    /// the principal it authenticates, or an error if they are invalid.
    async fn login(&self, username: &str, password: &str) -> Result<Principal>;
}

/// ArcLoginProvider is simply an alias on a structure that is used
/// in many places in the code
pub type ArcLoginProvider = Arc<dyn LoginProvider + Send + Sync>;

pub fn hash_password(password: &str) -> Result<String> {
    use argon2::{
        password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
        Argon2,
    };
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    Ok(argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Argon2 error: {}", e))?
        .to_string())
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    use argon2::{
        password_hash::{PasswordHash, PasswordVerifier},
        Argon2,
    };
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow!("Invalid hashed password: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("battery staple", &hash).unwrap());
        assert!(verify_password("x", "not a hash").is_err());
    }
}
