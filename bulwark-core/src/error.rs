//! Error types for store operations.

use std::sync::Arc;

use thiserror::Error;

/// Error type for store operations.
///
/// The inner errors are reference counted so a single failure can be handed
/// to every caller that was coalesced onto the same load.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Internal store error, state or computation error.
    ///
    /// Any error not related to network interaction.
    #[error(transparent)]
    Internal(Arc<dyn std::error::Error + Send + Sync>),

    /// Network interaction error.
    ///
    /// Errors occurring during communication with remote stores (e.g., Redis).
    #[error(transparent)]
    Connection(Arc<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wraps any error as an [`StoreError::Internal`].
    pub fn internal<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(Arc::new(error))
    }

    /// Wraps any error as a [`StoreError::Connection`].
    pub fn connection<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection(Arc::new(error))
    }
}
