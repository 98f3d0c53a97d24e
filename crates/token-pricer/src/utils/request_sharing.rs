//! Share one in-flight computation between callers asking for the same key.

use futures::future::{FutureExt, Shared, WeakShared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;

/// Requests issued while an identical one is still pending get a handle to
/// the pending future instead of starting a new one. Finished futures are
/// forgotten, so the next request after completion runs again.
pub struct RequestSharing<Request, Fut: Future> {
    in_flight: Mutex<HashMap<Request, WeakShared<Fut>>>,
}

impl<Request, Fut: Future> Default for RequestSharing<Request, Fut> {
    fn default() -> Self {
        Self { in_flight: Mutex::new(HashMap::new()) }
    }
}

impl<Request, Fut> RequestSharing<Request, Fut>
where
    Request: Eq + Hash,
    Fut: Future,
    Fut::Output: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing in-flight future for `request`, or starts one
    /// with `future`.
    pub fn shared_or_else<F>(&self, request: Request, future: F) -> Shared<Fut>
    where
        F: FnOnce(&Request) -> Fut,
    {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.retain(|_, weak| weak.upgrade().is_some());

        if let Some(existing) = in_flight.get(&request).and_then(WeakShared::upgrade) {
            return existing;
        }

        let shared = future(&request).shared();
        // downgrade only fails on an already completed future; this one was never polled
        if let Some(weak) = shared.downgrade() {
            in_flight.insert(request, weak);
        }
        shared
    }

    /// Number of requests currently being shared.
    pub fn pending(&self) -> usize {
        let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.values().filter(|weak| weak.upgrade().is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;

    #[tokio::test]
    async fn shares_request() {
        let sharing: RequestSharing<u64, BoxFuture<'static, u64>> = RequestSharing::new();

        let shared0 = sharing.shared_or_else(0, |_| futures::future::ready(0).boxed());
        let shared1 = sharing.shared_or_else(0, |_| async { panic!() }.boxed());
        assert!(shared0.ptr_eq(&shared1));
        assert_eq!(sharing.pending(), 1);

        assert_eq!(shared0.await, 0);
        assert_eq!(shared1.await, 0);
        assert_eq!(sharing.pending(), 0);
    }

    #[tokio::test]
    async fn different_keys_run_separately() {
        let sharing: RequestSharing<u64, BoxFuture<'static, u64>> = RequestSharing::new();
        let a = sharing.shared_or_else(1, |k| futures::future::ready(*k).boxed());
        let b = sharing.shared_or_else(2, |k| futures::future::ready(*k).boxed());
        assert!(!a.ptr_eq(&b));
        assert_eq!((a.await, b.await), (1, 2));
    }

    #[tokio::test]
    async fn completed_request_runs_again() {
        let sharing: RequestSharing<u64, BoxFuture<'static, u64>> = RequestSharing::new();
        assert_eq!(sharing.shared_or_else(0, |_| futures::future::ready(1).boxed()).await, 1);
        assert_eq!(sharing.shared_or_else(0, |_| futures::future::ready(2).boxed()).await, 2);
    }
}
