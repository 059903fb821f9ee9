// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::app::errors::{AppError, AppResult, codes};

pub type EffectFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Worker pool for transition side effects.
///
/// Effects are spawned as independent tasks, optionally onto a dedicated runtime
/// so a slow backend call never occupies the request runtime. Dispatch is refused
/// while the executor is stopped.
#[derive(Clone)]
pub struct TransitionExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    running: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    handle: Option<Handle>,
}

struct InFlightGuard(Arc<ExecutorInner>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl TransitionExecutor {
    /// Spawns onto whichever runtime is current at dispatch time.
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self::build(Some(handle))
    }

    fn build(handle: Option<Handle>) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                running: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                handle,
            }),
        }
    }

    pub fn start(&self) {
        self.inner.running.store(true, Ordering::Release);
    }

    /// Stops accepting new effects. Effects already dispatched keep running;
    /// use `wait_idle` to drain them.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn dispatch(&self, effect: EffectFuture) -> AppResult<JoinHandle<()>> {
        if !self.is_running() {
            return Err(AppError::internal(
                codes::INTERNAL_ERROR,
                "transition executor is not running",
            ));
        }
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard(self.inner.clone());
        let task = async move {
            let _guard = guard;
            effect.await;
        };
        let handle = match &self.inner.handle {
            Some(handle) => handle.spawn(task),
            None => tokio::spawn(task),
        };
        Ok(handle)
    }

    /// Resolves once no dispatched effect is running, including effects
    /// dispatched by other effects while waiting.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for TransitionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn refuses_dispatch_until_started() {
        let executor = TransitionExecutor::new();
        assert!(executor.dispatch(Box::pin(async {})).is_err());
        executor.start();
        executor.dispatch(Box::pin(async {})).unwrap().await.unwrap();
        executor.stop();
        assert!(executor.dispatch(Box::pin(async {})).is_err());
    }

    #[tokio::test]
    async fn wait_idle_drains_nested_effects() {
        let executor = TransitionExecutor::new();
        executor.start();
        let counter = Arc::new(AtomicU32::new(0));

        let nested_executor = executor.clone();
        let nested_counter = counter.clone();
        executor
            .dispatch(Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let inner_counter = nested_counter.clone();
                nested_executor
                    .dispatch(Box::pin(async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        inner_counter.fetch_add(1, Ordering::SeqCst);
                    }))
                    .unwrap();
                nested_counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        executor.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(executor.in_flight(), 0);
    }

    #[test]
    fn runs_effects_on_a_dedicated_runtime() {
        let effects = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("effects")
            .enable_all()
            .build()
            .unwrap();
        let executor = TransitionExecutor::with_handle(effects.handle().clone());
        executor.start();

        let requests = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let joined = requests.block_on(async {
            executor
                .dispatch(Box::pin(async {
                    assert_eq!(std::thread::current().name(), Some("effects"));
                }))
                .unwrap()
                .await
        });
        assert!(joined.is_ok());
    }
}
