//! Boundary with the remote provisioning API.
//!
//! The engine never builds request bodies itself; the field-mapping layer
//! hands it a [`Mutation`] and the engine only issues the call and
//! interprets success, typed error or paged result.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::kind::ResourceKind;
use crate::resource::{Page, RemoteResource};

/// Errors reported by the provisioning API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The service answered with a typed error code.
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    /// The call did not complete (connection, throttling, decoding...).
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Service {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn transport(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ApiError::Transport(source.into())
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Service { code, .. } => Some(code),
            ApiError::Transport(_) => None,
        }
    }

    pub fn is_code(&self, expected: &str) -> bool {
        self.code() == Some(expected)
    }
}

/// Idempotency token sent with every mutating call.
///
/// Retrying a call with the same token must not create a second resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(String);

impl RequestToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RequestToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RequestToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An already-mapped request body plus its idempotency token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub token: RequestToken,
    #[serde(default)]
    pub body: Value,
}

impl Mutation {
    /// Mutation with a freshly generated token.
    pub fn new(body: Value) -> Self {
        Self {
            token: RequestToken::generate(),
            body,
        }
    }

    pub fn with_token(token: impl Into<RequestToken>, body: Value) -> Self {
        Self {
            token: token.into(),
            body,
        }
    }
}

/// Named filter accepted by describe operations, e.g. `file-system-id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

/// Identifier set and filters for one describe operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeQuery {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

impl DescribeQuery {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            ids: vec![id.into()],
            filters: Vec::new(),
        }
    }

    pub fn by_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            filters: Vec::new(),
        }
    }

    pub fn filter<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.push(Filter {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }
}

impl fmt::Display for DescribeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // A single-id lookup prints as the bare id so errors read naturally.
        if self.filters.is_empty() && self.ids.len() == 1 {
            return f.write_str(&self.ids[0]);
        }
        let mut parts: Vec<String> = Vec::new();
        if !self.ids.is_empty() {
            parts.push(format!("ids=[{}]", self.ids.join(",")));
        }
        for filter in &self.filters {
            parts.push(format!("{}=[{}]", filter.name, filter.values.join(",")));
        }
        if parts.is_empty() {
            f.write_str("<all>")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}

/// Client for the remote provisioning API.
///
/// Implementations must be safe for concurrent use: several reconcilers may
/// share one client.
#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    async fn create(
        &self,
        kind: ResourceKind,
        mutation: &Mutation,
    ) -> Result<RemoteResource, ApiError>;

    /// One page of the kind's describe operation. `next_token` is the
    /// continuation returned by the previous page.
    async fn describe(
        &self,
        kind: ResourceKind,
        query: &DescribeQuery,
        next_token: Option<&str>,
    ) -> Result<Page, ApiError>;

    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        mutation: &Mutation,
    ) -> Result<RemoteResource, ApiError>;

    async fn delete(&self, kind: ResourceKind, id: &str, mutation: &Mutation)
    -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_display() {
        assert_eq!(DescribeQuery::by_id("fs-001").to_string(), "fs-001");
        let query = DescribeQuery::default().filter("file-system-id", ["fs-001"]);
        assert_eq!(query.to_string(), "file-system-id=[fs-001]");
        assert_eq!(DescribeQuery::default().to_string(), "<all>");
    }

    #[test]
    fn test_api_error_code() {
        let err = ApiError::service("BackupNotFound", "backup-1 does not exist");
        assert!(err.is_code("BackupNotFound"));
        assert!(!ApiError::transport("connection reset").is_code("BackupNotFound"));
    }

    #[test]
    fn test_generated_tokens_differ() {
        assert_ne!(RequestToken::generate(), RequestToken::generate());
    }
}
