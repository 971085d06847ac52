//! Authorization oracle consumed by the dispatch pipeline.

use std::sync::Arc;

use async_trait::async_trait;

/// Answers "who is this sender" questions backed by external persistence.
///
/// Identities passed in are sender numbers as produced by
/// [`sender_number_of`](crate::sender_number_of).
#[async_trait]
pub trait AccessOracle: Send + Sync + 'static {
    /// Whether `identity` is a persisted owner.
    async fn is_owner(&self, identity: &str) -> bool;

    /// Whether `identity` currently holds premium access.
    async fn is_premium(&self, identity: &str) -> bool;
}

/// A shareable oracle handle.
pub type BoxedAccessOracle = Arc<dyn AccessOracle>;

/// An oracle that knows no owners and no premium users.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAccess;

#[async_trait]
impl AccessOracle for NoAccess {
    async fn is_owner(&self, _identity: &str) -> bool {
        false
    }

    async fn is_premium(&self, _identity: &str) -> bool {
        false
    }
}
