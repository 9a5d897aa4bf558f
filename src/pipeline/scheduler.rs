use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, Semaphore};

use super::types::{FetchResult, Identifier};

/// Runs `task` once per identifier with at most `limit` in flight.
///
/// Permits are handed out in submission order. Each task reports back over a
/// channel; the collected results come back in submission order, one per
/// identifier, whatever happened to the task that produced it.
pub async fn run_bounded<F, Fut>(ids: Vec<Identifier>, limit: usize, task: F) -> Vec<FetchResult>
where
    F: Fn(Identifier) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(limit.max(1)));
    let task = Arc::new(task);
    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, FetchResult)>();

    for (idx, id) in ids.iter().cloned().enumerate() {
        let Ok(permit) = permits.clone().acquire_owned().await else { break };
        let tx = tx.clone();
        let task = Arc::clone(&task);
        tokio::spawn(async move {
            let owned = id.clone();
            let res = match AssertUnwindSafe(async move { task(owned).await }).catch_unwind().await {
                Ok(res) => res,
                Err(panic) => {
                    let msg = panic_message(panic.as_ref());
                    tracing::error!(identifier = %id, error = %msg, "worker panicked");
                    FetchResult::failed(id, format!("worker panicked: {}", msg), 0)
                }
            };
            drop(permit);
            let _ = tx.send((idx, res));
        });
    }
    drop(tx);

    let mut slots: Vec<Option<FetchResult>> = vec![None; ids.len()];
    while let Some((idx, res)) = rx.recv().await {
        slots[idx] = Some(res);
    }

    slots
        .into_iter()
        .zip(ids)
        .map(|(slot, id)| slot.unwrap_or_else(|| FetchResult::failed(id, "worker exited without a result", 0)))
        .collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
