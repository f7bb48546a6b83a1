//! Warm-up hooks fired by `HEAD` requests.
//!
//! A warm-up pays a cold-start cost (opening a pool, priming a cache) ahead of real traffic.
//! It is shared by every call, so implementations must tolerate concurrent invocation;
//! [`WarmOnce`] makes any warm-up idempotent.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn, Instrument};

use crate::context::CallContext;

/// A side effect run on `HEAD` requests before the middleware chain.
#[async_trait]
pub trait Warmup: Send + Sync {
    async fn warm(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl<W: Warmup + ?Sized> Warmup for Arc<W> {
    async fn warm(&self) -> anyhow::Result<()> {
        (**self).warm().await
    }
}

/// Wrap a closure as a [`Warmup`].
pub struct WarmFn<F>(F);

/// Build a warm-up from an async closure.
pub fn warm_fn<F, Fut>(f: F) -> WarmFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    WarmFn(f)
}

#[async_trait]
impl<F, Fut> Warmup for WarmFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn warm(&self) -> anyhow::Result<()> {
        (self.0)().await
    }
}

/// Runs the inner warm-up until it succeeds once; later calls return immediately.
///
/// Concurrent callers wait on the same attempt. A failed attempt is retried by the next call.
pub struct WarmOnce<W> {
    inner: W,
    done: OnceCell<()>,
}

impl<W: Warmup> WarmOnce<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            done: OnceCell::new(),
        }
    }

    pub fn is_warm(&self) -> bool {
        self.done.initialized()
    }
}

#[async_trait]
impl<W: Warmup> Warmup for WarmOnce<W> {
    async fn warm(&self) -> anyhow::Result<()> {
        self.done.get_or_try_init(|| self.inner.warm()).await?;
        Ok(())
    }
}

/// Fire the warm-up without holding up the response.
pub(crate) fn trigger(warmup: Arc<dyn Warmup>, ctx: &CallContext) {
    let span = ctx.span().clone();
    tokio::spawn(
        async move {
            match warmup.warm().await {
                Ok(()) => debug!("warm-up finished"),
                Err(err) => warn!("Warm-up failed: {:#}", err),
            }
        }
        .instrument(span),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_warm_once_runs_inner_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let warmup = Arc::new(WarmOnce::new(warm_fn(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let warmup = warmup.clone();
                tokio::spawn(async move { warmup.warm().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(warmup.is_warm());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_warm_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let warmup = WarmOnce::new(warm_fn(move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("database not ready");
                }
                Ok(())
            }
        }));

        assert!(warmup.warm().await.is_err());
        assert!(!warmup.is_warm());
        warmup.warm().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
