// src/models/auth.rs
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AdminInfo {
    pub email: String,
    pub role: String,
}

/// JWT payload for admin tokens. Issuer and audience are fixed strings the
/// verifier also requires, so a token minted for another service never
/// validates here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub admin: bool,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}
