// src/core/auth/mod.rs

//! Authentication: signed session tokens and server user credentials.

mod credentials;
mod token;

pub use credentials::{ServerUser, ServerUsers, UsersFile};
pub use token::{DatabaseKind, ParsedToken, SignedTokenHandler, TokenClaims, TokenHash};
