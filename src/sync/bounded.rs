//! Fixed-width task pool for storage writes.

use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::Semaphore;
use tracing::error;

/// Run `f` over every item with at most `width` futures in flight.
///
/// Results come back in input order. A task that panics yields an error in
/// its slot instead of tearing down the whole run.
pub async fn run_bounded<T, R, F, Fut>(width: usize, items: Vec<T>, mut f: F) -> Vec<anyhow::Result<R>>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(width.max(1)));
    let mut handles = Vec::with_capacity(items.len());

    for item in items {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                handles.push(None);
                continue;
            }
        };
        let task = f(item);
        handles.push(Some(tokio::spawn(async move {
            let _permit = permit; // held until the write completes
            task.await
        })));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let result = match handle {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(error = ?e, "Bounded task panicked or was cancelled");
                    Err(anyhow!("task failed: {}", e))
                }
            },
            None => Err(anyhow!("task pool closed")),
        };
        results.push(result);
    }
    results
}
