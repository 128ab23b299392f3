use std::collections::HashMap;
use std::env;

use kestrel_core::{Error, Result};

/// Resolves credential identifiers to secret values at call time.
///
/// Descriptors and step arguments carry only the identifier; the value is
/// looked up immediately before the request is built and is never stored
/// on a step or written to a log.
pub trait CredentialSource: Send + Sync {
    /// Resolves one credential identifier.
    ///
    /// # Errors
    /// Returns [`Error::MissingCredential`] when the identifier is unknown
    fn resolve(&self, credential_id: &str) -> Result<String>;
}

/// Production source: credential ids are environment variable names.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialSource;

impl CredentialSource for EnvCredentialSource {
    fn resolve(&self, credential_id: &str) -> Result<String> {
        env::var(credential_id).map_err(|_| Error::MissingCredential(credential_id.to_owned()))
    }
}

/// Fixed in-memory source for tests and demos, immune to the process
/// environment.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialSource {
    values: HashMap<String, String>,
}

impl StaticCredentialSource {
    /// Creates an empty source that resolves nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one credential.
    #[must_use]
    pub fn with_credential(mut self, credential_id: String, value: String) -> Self {
        self.values.insert(credential_id, value);
        self
    }
}

impl CredentialSource for StaticCredentialSource {
    fn resolve(&self, credential_id: &str) -> Result<String> {
        self.values
            .get(credential_id)
            .cloned()
            .ok_or_else(|| Error::MissingCredential(credential_id.to_owned()))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test code is allowed to use unwrap/expect"
)]
mod tests {
    use super::*;

    #[test]
    fn test_static_source_resolves_known_ids() {
        let source = StaticCredentialSource::new()
            .with_credential("WEATHER_API_KEY".to_owned(), "sekrit".to_owned());
        assert_eq!(source.resolve("WEATHER_API_KEY").unwrap(), "sekrit");
        assert!(matches!(
            source.resolve("OTHER_KEY"),
            Err(Error::MissingCredential(_))
        ));
    }
}
