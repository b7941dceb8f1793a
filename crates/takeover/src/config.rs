use crate::dns::DEFAULT_RESOLVER;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_THREADS: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Everything a run needs to know, built once and shared read-only.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Number of workers pulling hosts from the queue.
    pub threads: usize,
    pub timeout: Duration,
    /// Fetch over `https://` instead of `http://`.
    pub force_https: bool,
    /// Run full verification on every host, skipping the CNAME triage.
    pub exhaustive: bool,
    /// Also report hosts that are not vulnerable.
    pub verbose: bool,
    /// Report NXDOMAIN hosts with a dangling CNAME for human triage.
    pub manual: bool,
    pub include_edge: bool,
    pub default_resolver: String,
    pub alternate_resolvers: Vec<String>,
    pub fingerprints: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            force_https: false,
            exhaustive: false,
            verbose: false,
            manual: false,
            include_edge: false,
            default_resolver: DEFAULT_RESOLVER.to_string(),
            alternate_resolvers: Vec::new(),
            fingerprints: None,
            output: None,
        }
    }
}

impl ScanConfig {
    /// Queue capacity in front of the workers.
    pub fn queue_capacity(&self) -> usize {
        self.threads.max(1) * 10
    }
}
