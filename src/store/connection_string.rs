//! Connection string parsing
//!
//! Format: `Endpoint=<url>;Id=<credential id>;Secret=<credential secret>`.
//! Segment names are case-insensitive. Only `Endpoint` is required.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use url::Url;

#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub endpoint: Url,
    pub id: Option<String>,
    secret: Option<String>,
}

impl ConnectionString {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            bail!("connection string is empty");
        }

        let mut endpoint = None;
        let mut id = None;
        let mut secret = None;

        for (position, segment) in input
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .enumerate()
        {
            // Never echo the segment itself, it may be the secret
            let (name, value) = segment
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed connection string segment at position {}", position))?;

            match name.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value.trim().to_string()),
                "id" => id = Some(value.trim().to_string()),
                "secret" => secret = Some(value.trim().to_string()),
                other => tracing::debug!(segment = %other, "Ignoring unknown connection string segment"),
            }
        }

        let endpoint = endpoint
            .filter(|e| !e.is_empty())
            .ok_or_else(|| anyhow!("connection string is missing Endpoint"))?;
        let endpoint = Url::parse(&endpoint)
            .with_context(|| format!("invalid connection string Endpoint `{}`", endpoint))?;

        Ok(Self {
            endpoint,
            id: id.filter(|i| !i.is_empty()),
            secret: secret.filter(|s| !s.is_empty()),
        })
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    /// First four characters of the credential id, safe to log
    pub fn id_prefix(&self) -> String {
        self.id
            .as_deref()
            .map(|id| id.chars().take(4).collect())
            .unwrap_or_default()
    }
}

impl FromStr for ConnectionString {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint.as_str())
            .field("id", &self.id)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_connection_string() {
        let cs = ConnectionString::parse(
            "Endpoint=https://demo.azconfig.io;Id=abcd-l0-s0:123;Secret=c2VjcmV0PT0=",
        )
        .unwrap();
        assert_eq!(cs.endpoint.host_str(), Some("demo.azconfig.io"));
        assert_eq!(cs.id.as_deref(), Some("abcd-l0-s0:123"));
        // base64 padding survives because only the first '=' splits
        assert_eq!(cs.secret(), Some("c2VjcmV0PT0="));
        assert_eq!(cs.id_prefix(), "abcd");
    }

    #[test]
    fn names_are_case_insensitive_and_trailing_separator_is_allowed() {
        let cs: ConnectionString = "endpoint=file:///tmp/settings.json;".parse().unwrap();
        assert_eq!(cs.endpoint.scheme(), "file");
        assert!(cs.id.is_none());
        assert!(cs.secret().is_none());
    }

    #[test]
    fn rejects_empty_and_missing_endpoint() {
        assert!(ConnectionString::parse("  ").is_err());
        let err = ConnectionString::parse("Id=abc;Secret=xyz").unwrap_err();
        assert!(err.to_string().contains("missing Endpoint"));
    }

    #[test]
    fn malformed_segment_does_not_leak_value() {
        let err = ConnectionString::parse("Endpoint=https://x.io;supersecret").unwrap_err();
        assert!(!err.to_string().contains("supersecret"));
    }

    #[test]
    fn debug_redacts_secret() {
        let cs = ConnectionString::parse("Endpoint=https://x.io;Id=abc;Secret=hunter2").unwrap();
        let debug = format!("{:?}", cs);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("hunter2"));
    }
}
