use kestrel_core::{AuthLocation, AuthSpec, Error, HttpMethod, Result};
use reqwest::Client;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::credentials::CredentialSource;
use crate::schema::render_scalar;

/// Longest response-body prefix quoted in an error message.
const ERROR_BODY_LIMIT: usize = 200;

/// Adapter for tools exposed as plain HTTP endpoints.
#[derive(Debug, Clone, Default)]
pub struct HttpAdapter {
    client: Client,
}

impl HttpAdapter {
    /// Creates an adapter with its own connection pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls an HTTP tool endpoint.
    ///
    /// GET requests carry the arguments as query parameters, POST requests
    /// as a JSON body. An `api_key` auth block is resolved through the
    /// credential source and injected into the outgoing request here; the
    /// secret never appears in the arguments or in log output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on transport failure, [`Error::Execution`]
    /// for non-success status codes, and [`Error::MissingCredential`] when
    /// the auth block names a credential the source cannot resolve.
    pub async fn call(
        &self,
        url: &str,
        method: HttpMethod,
        auth: Option<&AuthSpec>,
        credentials: &dyn CredentialSource,
        arguments: &Map<String, Value>,
    ) -> Result<Value> {
        let mut request = match method {
            HttpMethod::Get => {
                let pairs: Vec<(String, String)> = arguments
                    .iter()
                    .map(|(name, value)| (name.clone(), render_scalar(value)))
                    .collect();
                self.client.get(url).query(&pairs)
            }
            HttpMethod::Post => self.client.post(url).json(arguments),
        };

        if let Some(AuthSpec::ApiKey {
            location,
            param_name,
            credential_id,
        }) = auth
        {
            let secret = credentials.resolve(credential_id)?;
            request = match location {
                AuthLocation::Query => request.query(&[(param_name.as_str(), secret.as_str())]),
                AuthLocation::Header => request.header(param_name.as_str(), secret),
            };
        }

        debug!("{method} {url}");
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::Execution(format!(
                "HTTP {status} from '{url}': {}",
                truncate(&body, ERROR_BODY_LIMIT)
            )));
        }

        Ok(serde_json::from_str(&body).unwrap_or_else(|_| json!({ "raw": body })))
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_owned()
    } else {
        let head: String = text.chars().take(limit).collect();
        format!("{head}...")
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
    fn test_truncate_keeps_short_bodies() {
        assert_eq!(truncate("short", 200), "short");
    }

    #[test]
    fn test_truncate_cuts_long_bodies() {
        let long = "x".repeat(300);
        let cut = truncate(&long, 200);
        assert_eq!(cut.chars().count(), 203);
        assert!(cut.ends_with("..."));
    }
}
