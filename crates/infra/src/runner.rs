//! Background loops for the dispatcher and the liveness sweep.
//!
//! Each loop runs its cycle every `interval`. A failed cycle is an
//! infrastructure fault: it is logged and retried after the configured
//! backoff, never turned into a job failure.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::backoff::BackoffPolicy;
use crate::dispatcher::Dispatcher;
use crate::error::StoreError;
use crate::liveness::LivenessSweeper;

/// Runtime statistics of one loop.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct LoopStats {
    pub cycles: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub uptime_secs: u64,
}

/// Handle to the running background loops.
#[derive(Debug)]
pub struct BackgroundHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    dispatcher_stats: Arc<Mutex<LoopStats>>,
    sweeper_stats: Arc<Mutex<LoopStats>>,
}

impl BackgroundHandle {
    /// Request shutdown and wait for both loops to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }

    pub fn dispatcher_stats(&self) -> LoopStats {
        snapshot(&self.dispatcher_stats)
    }

    pub fn sweeper_stats(&self) -> LoopStats {
        snapshot(&self.sweeper_stats)
    }
}

fn snapshot(stats: &Mutex<LoopStats>) -> LoopStats {
    stats.lock().map(|s| s.clone()).unwrap_or_default()
}

/// Spawn the dispatcher and sweeper loops on the current tokio runtime.
pub fn spawn(
    dispatcher: Dispatcher,
    dispatch_interval: Duration,
    sweeper: LivenessSweeper,
    sweep_interval: Duration,
    backoff: BackoffPolicy,
) -> BackgroundHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_stats = Arc::new(Mutex::new(LoopStats::default()));
    let sweeper_stats = Arc::new(Mutex::new(LoopStats::default()));

    let dispatch_task = tokio::spawn(run_loop(
        "dispatcher",
        dispatch_interval,
        backoff.clone(),
        shutdown_rx.clone(),
        dispatcher_stats.clone(),
        move || {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.run_cycle(Utc::now()).await.map(|_| ()) }
        },
    ));

    let sweep_task = tokio::spawn(run_loop(
        "liveness-sweep",
        sweep_interval,
        backoff,
        shutdown_rx,
        sweeper_stats.clone(),
        move || {
            let sweeper = sweeper.clone();
            async move { sweeper.run_once(Utc::now()).await.map(|_| ()) }
        },
    ));

    BackgroundHandle {
        shutdown: shutdown_tx,
        tasks: vec![dispatch_task, sweep_task],
        dispatcher_stats,
        sweeper_stats,
    }
}

async fn run_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    backoff: BackoffPolicy,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<Mutex<LoopStats>>,
    mut cycle: F,
) where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<(), StoreError>> + Send,
{
    info!(task = name, "background loop started");
    let started = Instant::now();
    let mut consecutive_failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let delay = match cycle().await {
            Ok(()) => {
                consecutive_failures = 0;
                interval
            }
            Err(e) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                let delay = backoff.delay_for_attempt(consecutive_failures);
                error!(
                    task = name,
                    error = %e,
                    consecutive_failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "background cycle failed"
                );
                delay
            }
        };

        if let Ok(mut s) = stats.lock() {
            s.cycles += 1;
            if consecutive_failures > 0 {
                s.failures += 1;
            }
            s.consecutive_failures = consecutive_failures;
            s.uptime_secs = started.elapsed().as_secs();
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!(task = name, "background loop stopped");
}
