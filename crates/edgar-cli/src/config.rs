//! Environment configuration.

use std::env;

use edgar_core::{EdgarError, Result};

/// Postgres connection string, required by every `db` subcommand.
pub fn db_url() -> Result<String> {
    required_var("EDGAR_DB_URL")
}

/// User agent identifying a contact, required by EDGAR for all requests.
pub fn user_agent() -> Result<String> {
    required_var("EDGAR_UA")
}

fn required_var(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(EdgarError::Config(format!(
            "environment variable {name} is not set"
        ))),
    }
}
