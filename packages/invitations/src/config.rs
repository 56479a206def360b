use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

use crate::domains::invitations::{MailSettings, TokenHashParams};

/// Longest lifetime an invitation may be configured with
pub const MAX_INVITATION_EXPIRY_DAYS: i64 = 365;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Public base URL the accept/decline links are built on
    pub invitation_base_url: String,
    pub mail_from: String,
    pub invitation_expiry_days: i64,
    pub token_hash_memory_kib: u32,
    pub token_hash_iterations: u32,
    pub token_hash_parallelism: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            invitation_base_url: env::var("INVITATION_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            mail_from: env::var("MAIL_FROM").unwrap_or_else(|_| "no-reply@localhost".to_string()),
            invitation_expiry_days: parse_expiry_days(
                &env::var("INVITATION_EXPIRY_DAYS").unwrap_or_else(|_| "3".to_string()),
            )?,
            token_hash_memory_kib: env::var("TOKEN_HASH_MEMORY_KIB")
                .unwrap_or_else(|_| argon2::Params::DEFAULT_M_COST.to_string())
                .parse()
                .context("TOKEN_HASH_MEMORY_KIB must be a valid number")?,
            token_hash_iterations: env::var("TOKEN_HASH_ITERATIONS")
                .unwrap_or_else(|_| argon2::Params::DEFAULT_T_COST.to_string())
                .parse()
                .context("TOKEN_HASH_ITERATIONS must be a valid number")?,
            token_hash_parallelism: env::var("TOKEN_HASH_PARALLELISM")
                .unwrap_or_else(|_| argon2::Params::DEFAULT_P_COST.to_string())
                .parse()
                .context("TOKEN_HASH_PARALLELISM must be a valid number")?,
        })
    }

    /// Argon2 cost parameters for token and credential hashing
    pub fn token_hash_params(&self) -> TokenHashParams {
        TokenHashParams {
            memory_kib: self.token_hash_memory_kib,
            iterations: self.token_hash_iterations,
            parallelism: self.token_hash_parallelism,
        }
    }

    pub fn mail_settings(&self) -> MailSettings {
        MailSettings {
            from: self.mail_from.clone(),
            base_url: self.invitation_base_url.clone(),
        }
    }

    pub fn invitation_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.invitation_expiry_days)
    }
}

fn parse_expiry_days(raw: &str) -> Result<i64> {
    let days: i64 = raw
        .trim()
        .parse()
        .context("INVITATION_EXPIRY_DAYS must be a valid number")?;
    if !(1..=MAX_INVITATION_EXPIRY_DAYS).contains(&days) {
        anyhow::bail!(
            "INVITATION_EXPIRY_DAYS must be between 1 and {}, got {}",
            MAX_INVITATION_EXPIRY_DAYS,
            days
        );
    }
    Ok(days)
}
