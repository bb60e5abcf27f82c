//! Cleanup reconciler - removes a code from every tier it could exist in.
//!
//! Each removal is attempted independently; a failure in one tier is
//! logged and never aborts the others. Calling cleanup twice, or for a
//! transaction that was already removed, is a no-op.

use crate::engine::cache::CodeCache;
use crate::store::{CodeArchive, CodeMirror, PaymentStore};
use std::sync::Arc;
use tracing::{debug, warn};

/// Removes verified/expired/exhausted codes from the primary cache, the
/// durable mirror, and the optional archival store.
#[derive(Clone)]
pub struct CleanupReconciler {
    cache: CodeCache,
    payments: Arc<dyn PaymentStore>,
    mirror: Arc<dyn CodeMirror>,
    archive: Option<Arc<dyn CodeArchive>>,
}

/// What a cleanup pass managed to remove. A tier reads `true` when its
/// removal call completed, including the no-op case of an already-absent
/// entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// A record was present in the primary cache and was dropped.
    pub cache_removed: bool,
    /// The mirror removal completed (or there was nothing to remove).
    pub mirror_cleared: bool,
    /// The archive removal completed (or no archive is configured).
    pub archive_cleared: bool,
}

impl CleanupReconciler {
    /// Create a reconciler over the given tiers.
    #[must_use]
    pub fn new(
        cache: CodeCache,
        payments: Arc<dyn PaymentStore>,
        mirror: Arc<dyn CodeMirror>,
        archive: Option<Arc<dyn CodeArchive>>,
    ) -> Self {
        Self {
            cache,
            payments,
            mirror,
            archive,
        }
    }

    /// Remove every trace of a transaction's code.
    pub async fn cleanup(&self, transaction_id: &str) -> CleanupReport {
        self.cleanup_with_hint(transaction_id, None).await
    }

    /// Remove every trace of a transaction's code, with the owning
    /// account already known (saves a payment lookup).
    pub async fn cleanup_with_hint(
        &self,
        transaction_id: &str,
        account_hint: Option<&str>,
    ) -> CleanupReport {
        let removed = self.cache.remove(transaction_id);
        let cache_removed = removed.is_some();

        let account_id = match account_hint {
            Some(id) => Some(id.to_string()),
            None => match removed {
                Some(record) => Some(record.account_id),
                None => self.resolve_account(transaction_id).await,
            },
        };

        let mirror_fut = self.clear_mirror(transaction_id, account_id.as_deref());
        let archive_fut = self.clear_archive(transaction_id);
        let (mirror_cleared, archive_cleared) = tokio::join!(mirror_fut, archive_fut);

        let report = CleanupReport {
            cache_removed,
            mirror_cleared,
            archive_cleared,
        };
        debug!(%transaction_id, ?report, "cleanup pass finished");
        report
    }

    async fn resolve_account(&self, transaction_id: &str) -> Option<String> {
        match self.payments.lookup_payment(transaction_id).await {
            Ok(payment) => payment.map(|p| p.account_id),
            Err(e) => {
                warn!(%transaction_id, error = %e, "payment lookup failed during cleanup");
                None
            }
        }
    }

    async fn clear_mirror(&self, transaction_id: &str, account_id: Option<&str>) -> bool {
        let Some(account_id) = account_id else {
            debug!(%transaction_id, "owning account unresolved, skipping mirror removal");
            return false;
        };
        match self.mirror.remove_code(account_id, transaction_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%transaction_id, %account_id, error = %e, "mirror removal failed");
                false
            }
        }
    }

    async fn clear_archive(&self, transaction_id: &str) -> bool {
        let Some(archive) = &self.archive else {
            return true;
        };
        match archive.remove(transaction_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%transaction_id, error = %e, "archive removal failed");
                false
            }
        }
    }
}
