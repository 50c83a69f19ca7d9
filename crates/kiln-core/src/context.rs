//! Deadline and cancellation carried through a build
//!
//! A [`Context`] is cheap to clone. Children created with [`Context::with_timeout`]
//! share the parent's cancellation signal and never outlive the parent's deadline.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::{KilnError, Result};

/// Deadline plus cancellation signal
#[derive(Debug, Clone)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: watch::Receiver<bool>,
}

/// Cancels every context derived from the one it was created with
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace never fails, even with no receivers left
        self.tx.send_replace(true);
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        // With the sender gone `done()` stays pending forever
        let (_, rx) = watch::channel(false);
        Self {
            deadline: None,
            cancel: rx,
        }
    }

    /// A cancellable context plus the handle that cancels it
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                deadline: None,
                cancel: rx,
            },
            CancelHandle { tx },
        )
    }

    /// Child context whose deadline is the earlier of the parent's and `now + timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing <= candidate => existing,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.clone(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Cancelled or past the deadline
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left before the deadline, if there is one
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// The error that ends this context
    pub fn err(&self) -> Option<KilnError> {
        if self.is_cancelled() {
            Some(KilnError::Cancelled)
        } else if self.is_done() {
            Some(KilnError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves when the context is cancelled or its deadline passes
    pub async fn done(&self) -> KilnError {
        let mut cancel = self.cancel.clone();
        let cancelled = async move {
            loop {
                if *cancel.borrow_and_update() {
                    return;
                }
                if cancel.changed().await.is_err() {
                    // Sender dropped without cancelling: never fires
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = cancelled => KilnError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => KilnError::DeadlineExceeded,
                }
            }
            None => {
                cancelled.await;
                KilnError::Cancelled
            }
        }
    }

    /// Run a fallible future bounded by this context
    ///
    /// On cancellation or deadline the future is dropped, not awaited.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_never_done() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        assert!(ctx.remaining().is_none());
        let value = ctx.run(async { Ok::<_, KilnError>(5) }).await.unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_run() {
        let (ctx, handle) = Context::with_cancel();
        let task = tokio::spawn({
            let ctx = ctx.clone();
            async move {
                ctx.run(async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok::<_, KilnError>(())
                })
                .await
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(KilnError::Cancelled)));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, KilnError>(())
            })
            .await;
        assert!(matches!(result, Err(KilnError::DeadlineExceeded)));
        assert!(ctx.is_done());
    }

    #[tokio::test]
    async fn test_child_keeps_earlier_deadline() {
        let parent = Context::background().with_timeout(Duration::from_millis(50));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let tighter = parent.with_timeout(Duration::from_millis(5));
        assert!(tighter.deadline() < parent.deadline());
    }

    #[tokio::test]
    async fn test_child_shares_cancellation() {
        let (parent, handle) = Context::with_cancel();
        let child = parent.with_timeout(Duration::from_secs(60));
        handle.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.done().await, KilnError::Cancelled));
    }

    #[tokio::test]
    async fn test_run_on_done_context_skips_future() {
        let (ctx, handle) = Context::with_cancel();
        handle.cancel();
        let result: Result<()> = ctx
            .run(async { Err(KilnError::Other("polled".to_string())) })
            .await;
        assert!(matches!(result, Err(KilnError::Cancelled)));
    }
}
