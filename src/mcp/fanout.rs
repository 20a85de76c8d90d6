//! Fan-out engine
//!
//! Runs the same fetch across N servers with a bounded worker pool over an
//! indexed input list, so output order always equals input order and one
//! unreachable server never masks the rest.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;

/// Per-server slot in a fan-out result.
#[derive(Debug)]
pub struct FanoutResult<T> {
    pub server: String,
    pub result: Result<T, String>,
}

/// Execute `fetch` for every server with at most `concurrency` in flight.
pub async fn fan_out<T, F, Fut>(
    servers: Vec<String>,
    concurrency: usize,
    fetch: F,
) -> Vec<FanoutResult<T>>
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send,
{
    let total = servers.len();
    let servers = Arc::new(servers);
    let next: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let slots: Arc<Mutex<Vec<Option<FanoutResult<T>>>>> =
        Arc::new(Mutex::new((0..total).map(|_| None).collect()));

    let workers = concurrency.max(1).min(total.max(1));
    let mut pool = JoinSet::new();
    for _ in 0..workers {
        let servers = servers.clone();
        let next = next.clone();
        let slots = slots.clone();
        let fetch = fetch.clone();
        pool.spawn(async move {
            loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                if index >= servers.len() {
                    return;
                }
                let server = servers[index].clone();
                let result = fetch(server.clone())
                    .await
                    .map_err(|e| format!("{:#}", e));
                if let Err(message) = &result {
                    tracing::debug!("fan-out: '{}' failed: {}", server, message);
                }
                let mut slots = slots.lock().expect("fan-out slots poisoned");
                slots[index] = Some(FanoutResult { server, result });
            }
        });
    }

    // Drain every worker before returning.
    while let Some(joined) = pool.join_next().await {
        if let Err(e) = joined {
            tracing::warn!("fan-out worker panicked: {}", e);
        }
    }

    let mut slots = slots.lock().expect("fan-out slots poisoned");
    slots
        .drain(..)
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| FanoutResult {
                server: servers.get(index).cloned().unwrap_or_default(),
                result: Err("worker terminated before writing a result".to_string()),
            })
        })
        .collect()
}
