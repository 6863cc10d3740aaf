//! Endpoint identity
//!
//! An endpoint is the (broker address, principal, credential) triple. It keys
//! both the connection factory cache and the per-endpoint connection pools.

use std::fmt;

/// Identifies one broker endpoint and therefore one connection pool.
///
/// Two keys that differ only in credential are different endpoints.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    url: String,
    principal: String,
    credential: Option<String>,
}

impl EndpointKey {
    /// Blank credentials are treated as absent.
    pub fn new(
        url: impl Into<String>,
        principal: impl Into<String>,
        credential: Option<String>,
    ) -> Self {
        Self {
            url: url.into(),
            principal: principal.into(),
            credential: credential.filter(|c| !c.is_empty()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    /// URL scheme (the part before `://`), lowercased
    pub fn scheme(&self) -> Option<String> {
        self.url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
    }
}

// Credentials stay out of logs.
impl fmt::Debug for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointKey")
            .field("url", &self.url)
            .field("principal", &self.principal)
            .field("credential", &self.credential.as_ref().map(|_| "***"))
            .finish()
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.principal, self.url)
    }
}
