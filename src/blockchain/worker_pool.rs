//! Shared fan-out helper: N inputs, W identical workers.
//!
//! Errors are collected per input and never cancel peers; the only way to
//! stop early is the caller's cancellation token, observed between inputs.
//! Callers must not assume result order matches input order.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Runs `worker_fn` over `inputs` with up to `workers` concurrent tasks.
/// Returns the successful results and the per-input errors.
pub async fn fan_out<T, R, E, F, Fut>(
    inputs: Vec<T>,
    workers: usize,
    cancel: &CancellationToken,
    worker_fn: F,
) -> (Vec<R>, Vec<E>)
where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    if inputs.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let amount = inputs.len();
    let workers = workers.clamp(1, amount);

    // Buffer every input up front so feeding cannot block, then drop the
    // sender: an empty closed channel is the workers' stop signal.
    let (input_tx, input_rx) = mpsc::channel::<T>(amount);
    for input in inputs {
        input_tx
            .send(input)
            .await
            .expect("input channel has capacity for all inputs");
    }
    drop(input_tx);
    let input_rx = Arc::new(Mutex::new(input_rx));

    let (output_tx, mut output_rx) = mpsc::channel::<Result<R, E>>(amount);

    let mut handles = Vec::with_capacity(workers);
    for id in 0..workers {
        let input_rx = input_rx.clone();
        let output_tx = output_tx.clone();
        let cancel = cancel.clone();
        let worker_fn = worker_fn.clone();

        handles.push(tokio::spawn(async move {
            loop {
                let input = {
                    let mut rx = input_rx.lock().await;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            debug!(worker = id, "worker cancelled");
                            break;
                        }
                        input = rx.recv() => match input {
                            Some(input) => input,
                            None => break,
                        },
                    }
                };

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(worker = id, "worker cancelled mid-input");
                        break;
                    }
                    result = worker_fn(input) => result,
                };
                if output_tx.send(result).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(output_tx);

    let mut results = Vec::new();
    let mut errors = Vec::new();
    while let Some(outcome) = output_rx.recv().await {
        match outcome {
            Ok(result) => results.push(result),
            Err(error) => errors.push(error),
        }
    }

    for handle in handles {
        let _ = handle.await;
    }

    (results, errors)
}
