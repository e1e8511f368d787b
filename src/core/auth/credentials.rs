// src/core/auth/credentials.rs

//! Server users and password verification.
//!
//! Users are loaded at startup from a JSON file next to the main TOML
//! config. Passwords are stored as Argon2 hashes; verification failures are
//! answered after a short delay to blunt timing probes.

use crate::core::ZirconDBError;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Represents the data structure of the separate users file (e.g., users.json).
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UsersFile {
    pub users: Vec<ServerUser>,
}

/// A single server user.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerUser {
    pub username: String,
    /// The Argon2 password hash.
    pub password_hash: String,
    /// Admins may issue the `shutdown` request.
    #[serde(default)]
    pub is_admin: bool,
}

/// The set of users the server authenticates against.
#[derive(Debug, Clone, Default)]
pub struct ServerUsers {
    users: Vec<ServerUser>,
}

impl ServerUsers {
    pub fn new(users: Vec<ServerUser>) -> Self {
        Self { users }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Verifies a username/password pair, returning the matched user.
    pub async fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> Result<ServerUser, ZirconDBError> {
        for user in &self.users {
            if user.username != username {
                continue;
            }
            if let Ok(parsed_hash) = PasswordHash::new(&user.password_hash)
                && Argon2::default()
                    .verify_password(password.as_bytes(), &parsed_hash)
                    .is_ok()
            {
                return Ok(user.clone());
            }
        }
        // Add a delay on failure to mitigate timing attacks.
        tokio::time::sleep(Duration::from_millis(100)).await;
        Err(ZirconDBError::InvalidCredentials)
    }

    /// Like [`verify`](Self::verify) but additionally requires the admin
    /// flag; used by the `shutdown` request's re-authentication.
    pub async fn verify_admin(
        &self,
        username: &str,
        password: &str,
    ) -> Result<ServerUser, ZirconDBError> {
        let user = self.verify(username, password).await?;
        if !user.is_admin {
            return Err(ZirconDBError::PermissionDenied(format!(
                "user '{username}' may not shut the server down"
            )));
        }
        Ok(user)
    }

    /// Hashes a plaintext password for storage in the users file.
    pub fn hash_password(password: &str) -> Result<String, ZirconDBError> {
        let salt = SaltString::generate(&mut OsRng);
        Ok(Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|_| ZirconDBError::Internal("Password hashing failed".to_string()))?
            .to_string())
    }
}
