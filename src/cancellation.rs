// ABOUTME: Cooperative cancellation tokens built on tokio watch channels
// ABOUTME: Child tokens observe their parents so shutdown reaches every in-flight attempt
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::iter;
use std::sync::Arc;

use futures_util::future::{select_all, FutureExt};
use tokio::sync::watch;

/// Cooperative cancellation signal
///
/// Cancelling a token cancels every child made from it; cancelling a child
/// leaves the parent untouched. The engine holds the root, each sync attempt
/// holds a child so a disconnect can stop just that attempt.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    own: Arc<watch::Sender<bool>>,
    ancestors: Vec<Arc<watch::Sender<bool>>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Fresh root token
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            own: Arc::new(sender),
            ancestors: Vec::new(),
        }
    }

    /// Token cancelled together with `self`
    #[must_use]
    pub fn child(&self) -> Self {
        let (sender, _) = watch::channel(false);
        let mut ancestors = self.ancestors.clone();
        ancestors.push(Arc::clone(&self.own));
        Self {
            own: Arc::new(sender),
            ancestors,
        }
    }

    /// Signal cancellation to this token and its children
    pub fn cancel(&self) {
        self.own.send_replace(true);
    }

    /// Whether this token or any ancestor was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.own.borrow() || self.ancestors.iter().any(|sender| *sender.borrow())
    }

    /// Resolve once the token is cancelled
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut receivers: Vec<watch::Receiver<bool>> = self
            .ancestors
            .iter()
            .chain(iter::once(&self.own))
            .map(|sender| sender.subscribe())
            .collect();
        let waits = receivers.iter_mut().map(|receiver| {
            async move { receiver.wait_for(|cancelled| *cancelled).await.is_ok() }.boxed()
        });
        let _ = select_all(waits).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_parent_cancels_child() {
        let root = CancellationToken::new();
        let child = root.child();
        let grandchild = child.child();

        let waiter = tokio::spawn({
            let grandchild = grandchild.clone();
            async move { grandchild.cancelled().await }
        });
        root.cancel();

        timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_child_does_not_cancel_parent() {
        let root = CancellationToken::new();
        let child = root.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }
}
