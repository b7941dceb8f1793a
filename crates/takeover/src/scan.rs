use crate::cancel::CancelToken;
use crate::config::ScanConfig;
use crate::model::ScanVerdict;
use crate::report::VerdictSink;
use crate::verify::Engine;
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn, Instrument};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub total: usize,
    /// Hosts that went through full verification.
    pub checked: usize,
    pub vulnerable: usize,
    /// Hosts dropped by the CNAME triage.
    pub skipped: usize,
    pub cancelled: bool,
}

#[derive(Default)]
struct Counters {
    checked: AtomicUsize,
    vulnerable: AtomicUsize,
    skipped: AtomicUsize,
}

type HostQueue = Arc<Mutex<mpsc::Receiver<String>>>;

// region:        --- Scan main function

/// Runs every host through the engine with `config.threads` workers and
/// returns once all of them are done (or the run was cancelled).
#[instrument(name = "scan", level = "info", skip_all, fields(hosts = hosts.len()))]
pub async fn scan(
    hosts: Vec<String>,
    engine: Arc<Engine>,
    config: Arc<ScanConfig>,
    sink: Arc<dyn VerdictSink>,
    cancel: CancelToken,
) -> ScanSummary {
    let total = hosts.len();
    let threads = config.threads.max(1);
    info!("{:12} - {} hosts, {} workers", "START", total, threads);

    let (tx, rx) = mpsc::channel(config.queue_capacity());
    let queue: HostQueue = Arc::new(Mutex::new(rx));
    let counters = Arc::new(Counters::default());

    let producer = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            for host in hosts {
                tokio::select! {
                    sent = tx.send(host) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            // dropping `tx` lets the workers drain and stop
        })
    };

    let workers: Vec<_> = (0..threads)
        .map(|id| {
            let worker = Worker {
                id,
                queue: queue.clone(),
                engine: engine.clone(),
                config: config.clone(),
                sink: sink.clone(),
                cancel: cancel.clone(),
                counters: counters.clone(),
            };
            tokio::spawn(worker.run().in_current_span())
        })
        .collect();

    // barrier: every worker has finished its last host
    for res in join_all(workers).await {
        if let Err(err) = res {
            error!("{:12} - {}", "WORKER PANIC", err);
        }
    }
    if let Err(err) = producer.await {
        error!("{:12} - {}", "PRODUCER", err);
    }

    let summary = ScanSummary {
        total,
        checked: counters.checked.load(Ordering::SeqCst),
        vulnerable: counters.vulnerable.load(Ordering::SeqCst),
        skipped: counters.skipped.load(Ordering::SeqCst),
        cancelled: cancel.is_cancelled(),
    };
    info!(
        "{:12} - {} checked, {} vulnerable, {} skipped by triage{}",
        "DONE",
        summary.checked,
        summary.vulnerable,
        summary.skipped,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    summary
}

// endregion:     --- Scan main function

// region:        --- Worker

struct Worker {
    id: usize,
    queue: HostQueue,
    engine: Arc<Engine>,
    config: Arc<ScanConfig>,
    sink: Arc<dyn VerdictSink>,
    cancel: CancelToken,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(self) {
        debug!("{:12} - #{}", "WORKER UP", self.id);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let next = {
                let mut queue = self.queue.lock().await;
                tokio::select! {
                    host = queue.recv() => host,
                    _ = self.cancel.cancelled() => None,
                }
            };
            let Some(host) = next else {
                break;
            };

            let verdict = tokio::select! {
                verdict = self.check(&host) => verdict,
                _ = self.cancel.cancelled() => {
                    warn!("{:12} - {}", "ABANDONED", host);
                    break;
                }
            };

            if let Some(verdict) = verdict {
                if verdict.vulnerable {
                    self.counters.vulnerable.fetch_add(1, Ordering::SeqCst);
                }
                if verdict.vulnerable || self.config.verbose {
                    self.sink.report(verdict).await;
                }
            }
        }

        debug!("{:12} - #{}", "WORKER DOWN", self.id);
    }

    /// Triage then full verification. `None` when triage skipped the host and
    /// there is nothing to report.
    async fn check(&self, host: &str) -> Option<ScanVerdict> {
        if self.config.exhaustive {
            self.counters.checked.fetch_add(1, Ordering::SeqCst);
            return Some(self.engine.identify(host).await);
        }

        let cname = self.engine.resolve_cname(host).await;
        if !self.engine.triage(&cname) {
            debug!("{:12} - {} ({:?})", "TRIAGED OUT", host, cname);
            self.counters.skipped.fetch_add(1, Ordering::SeqCst);
            return self
                .config
                .verbose
                .then(|| ScanVerdict::not_vulnerable(host));
        }

        self.counters.checked.fetch_add(1, Ordering::SeqCst);
        Some(self.engine.identify_with_cname(host, &cname).await)
    }
}

// endregion:     --- Worker
