//! API key lookup.
//!
//! Keys are handed out as [`SecretString`] so they never show up in `Debug`
//! output or log lines.

use secrecy::{ExposeSecret, SecretString};

use crate::error::{EnrichError, Result};

pub trait CredentialProvider: Send + Sync {
    fn api_key(&self) -> Result<SecretString>;
}

/// Reads the key from a named environment variable.
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    var_name: String,
}

impl EnvCredentialProvider {
    pub fn new(var_name: impl Into<String>) -> Self {
        Self {
            var_name: var_name.into(),
        }
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn api_key(&self) -> Result<SecretString> {
        let key = std::env::var(&self.var_name).map_err(|_| {
            EnrichError::Credential(format!(
                "API key not found. Set the {} environment variable.",
                self.var_name
            ))
        })?;
        let key = SecretString::from(key);
        if key.expose_secret().trim().is_empty() {
            return Err(EnrichError::Credential(format!(
                "{} is set but empty",
                self.var_name
            )));
        }
        Ok(key)
    }
}

/// Fixed key, for callers that resolved the credential elsewhere.
pub struct StaticCredentialProvider {
    key: SecretString,
}

impl StaticCredentialProvider {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: SecretString::from(key.into()),
        }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn api_key(&self) -> Result<SecretString> {
        Ok(SecretString::from(self.key.expose_secret().to_string()))
    }
}
