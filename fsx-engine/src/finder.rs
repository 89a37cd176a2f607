//! Locates resources through the paged describe operation.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::{DescribeQuery, ProvisioningApi};
use crate::error::{ReconcileError, Result};
use crate::kind::{Operation, ResourceKind};
use crate::resource::RemoteResource;

/// Finder for one resource kind.
///
/// Accumulates every page before evaluating and never retries; polling is
/// the waiter's job.
#[derive(Clone)]
pub struct Finder {
    kind: ResourceKind,
    api: Arc<dyn ProvisioningApi>,
}

impl Finder {
    pub fn new(kind: ResourceKind, api: Arc<dyn ProvisioningApi>) -> Self {
        Self { kind, api }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// All resources of this kind matching the query, possibly none.
    pub async fn find_all(&self, query: &DescribeQuery) -> Result<Vec<RemoteResource>> {
        let operation = self.kind.operation_name(Operation::Describe);
        let mut found = Vec::new();
        let mut next_token: Option<String> = None;
        let mut seen_tokens: HashSet<String> = HashSet::new();
        let mut pages = 0usize;

        loop {
            let page = match self
                .api
                .describe(self.kind, query, next_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) if e.is_code(self.kind.not_found_code()) => {
                    return Err(ReconcileError::not_found(self.kind, query.to_string()));
                }
                Err(e) => {
                    return Err(ReconcileError::Transport {
                        kind: self.kind,
                        id: query.to_string(),
                        operation,
                        source: e,
                    });
                }
            };
            pages += 1;

            // Kinds sharing a describe operation come back mixed.
            found.extend(page.items.into_iter().filter(|r| r.kind == self.kind));

            match page.next_token {
                Some(token) if !token.is_empty() => {
                    // A token handed out twice would page forever.
                    if !seen_tokens.insert(token.clone()) {
                        warn!(kind = %self.kind, query = %query, token = %token, "{} returned a repeated page token", operation);
                        break;
                    }
                    next_token = Some(token);
                }
                _ => break,
            }
        }

        debug!(
            kind = %self.kind,
            query = %query,
            pages,
            matches = found.len(),
            "{} complete",
            operation
        );
        Ok(found)
    }

    /// Exactly one resource matching the query.
    pub async fn find_one(&self, query: &DescribeQuery) -> Result<RemoteResource> {
        let found = self.find_all(query).await?;
        single(self.kind, query, found)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<RemoteResource> {
        self.find_one(&DescribeQuery::by_id(id)).await
    }
}

fn single(
    kind: ResourceKind,
    query: &DescribeQuery,
    mut found: Vec<RemoteResource>,
) -> Result<RemoteResource> {
    match found.len() {
        0 => Err(ReconcileError::not_found(kind, query.to_string())),
        1 => Ok(found.remove(0)),
        count => Err(ReconcileError::TooManyResults {
            kind,
            query: query.to_string(),
            count,
        }),
    }
}
