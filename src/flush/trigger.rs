use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, unbounded};

use crate::flush::{FlushCoordinator, FlushResult};
use crate::ring::RingWindow;

enum TriggerMsg {
    Flush,
    Shutdown,
}

/// Cloneable sender for zero-argument save signals (hotkey, stdin, ...).
#[derive(Clone)]
pub struct TriggerHandle {
    tx: Sender<TriggerMsg>,
}

impl TriggerHandle {
    /// Returns `false` once the trigger loop has shut down.
    pub fn fire(&self) -> bool {
        self.tx.send(TriggerMsg::Flush).is_ok()
    }
}

pub struct TriggerLoop {
    tx: Sender<TriggerMsg>,
    thread: Option<JoinHandle<()>>,
}

impl TriggerLoop {
    /// Stops accepting signals and waits for in-flight stores to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        let _ = self.tx.send(TriggerMsg::Shutdown);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("[trigger] dispatcher thread panicked");
            }
        }
    }
}

impl Drop for TriggerLoop {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// Dispatches save signals to `coordinator`.
///
/// The snapshot is taken on the dispatcher thread as each signal arrives;
/// the store itself runs on a worker thread so a slow sink never delays the
/// next signal, which is then rejected with `FlushInProgress`. Every outcome
/// is passed to `on_result`.
pub fn spawn_trigger_loop<F>(
    coordinator: FlushCoordinator,
    ring: Arc<RingWindow>,
    on_result: F,
) -> anyhow::Result<(TriggerHandle, TriggerLoop)>
where
    F: Fn(FlushResult) + Send + Sync + 'static,
{
    let (tx, rx) = unbounded();
    let on_result: Arc<dyn Fn(FlushResult) + Send + Sync> = Arc::new(on_result);

    let thread = std::thread::Builder::new()
        .name("replay-trigger".into())
        .spawn(move || run_dispatcher(rx, coordinator, ring, on_result))?;

    Ok((
        TriggerHandle { tx: tx.clone() },
        TriggerLoop {
            tx,
            thread: Some(thread),
        },
    ))
}

fn run_dispatcher(
    rx: Receiver<TriggerMsg>,
    coordinator: FlushCoordinator,
    ring: Arc<RingWindow>,
    on_result: Arc<dyn Fn(FlushResult) + Send + Sync>,
) {
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    let mut signals: u64 = 0;

    while let Ok(TriggerMsg::Flush) = rx.recv() {
        signals += 1;
        workers.retain(|w| !w.is_finished());

        match coordinator.begin(&ring) {
            Ok(pending) => {
                let worker_cb = on_result.clone();
                let spawned = std::thread::Builder::new()
                    .name("replay-flush".into())
                    .spawn(move || worker_cb(pending.complete()));
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(e) => {
                        log::error!("[trigger] failed to spawn flush worker: {}", e);
                        on_result(Err(crate::core::ReplayError::sink_failure(e)));
                    }
                }
            }
            Err(err) => on_result(Err(err)),
        }
    }

    for worker in workers {
        let _ = worker.join();
    }
    log::debug!("[trigger] dispatcher exited after {} signals", signals);
}
