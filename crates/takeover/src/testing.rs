//! In-memory stand-ins for the network collaborators.

use crate::dns::NameResolver;
use crate::http::ContentFetcher;
use crate::oracle::RegistrationOracle;
use async_trait::async_trait;
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::{Query, ResponseCode};
use hickory_resolver::proto::rr::{Name, RecordType};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A server reply carrying no records, as hickory reports it.
pub fn no_records(response_code: ResponseCode) -> ResolveError {
    ResolveErrorKind::NoRecordsFound {
        query: Box::new(Query::query(Name::root(), RecordType::A)),
        soa: None,
        negative_ttl: None,
        response_code,
        trusted: true,
    }
    .into()
}

#[derive(Default)]
pub struct FakeResolver {
    cnames: HashMap<String, String>,
    nxdomain: HashSet<String>,
    pub delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeResolver {
    pub fn cname(&mut self, host: &str, cname: &str) {
        self.cnames.insert(host.to_string(), cname.to_string());
    }

    pub fn nxdomain(&mut self, host: &str) {
        self.nxdomain.insert(host.to_string());
    }

    /// Highest number of CNAME lookups seen running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NameResolver for FakeResolver {
    async fn resolve_cname(&self, host: &str) -> String {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.cnames.get(host).cloned().unwrap_or_default()
    }

    async fn host_is_unresolvable(&self, host: &str) -> bool {
        self.nxdomain.contains(host)
    }
}

#[derive(Default)]
pub struct FakeFetcher {
    http: HashMap<String, Vec<u8>>,
    https: HashMap<String, Vec<u8>>,
    http_calls: AtomicUsize,
    https_calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn http(&mut self, host: &str, body: &str) {
        self.http.insert(host.to_string(), body.as_bytes().to_vec());
    }

    pub fn https(&mut self, host: &str, body: &str) {
        self.https.insert(host.to_string(), body.as_bytes().to_vec());
    }

    pub fn https_calls(&self) -> usize {
        self.https_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.http_calls.load(Ordering::SeqCst) + self.https_calls()
    }
}

#[async_trait]
impl ContentFetcher for FakeFetcher {
    async fn fetch(&self, host: &str, force_https: bool, _timeout: Duration) -> Vec<u8> {
        let (bodies, calls) = if force_https {
            (&self.https, &self.https_calls)
        } else {
            (&self.http, &self.http_calls)
        };
        calls.fetch_add(1, Ordering::SeqCst);
        bodies.get(host).cloned().unwrap_or_default()
    }
}

#[derive(Default)]
pub struct FakeOracle {
    available: HashSet<String>,
}

impl FakeOracle {
    pub fn available(&mut self, domain: &str) {
        self.available.insert(domain.to_string());
    }
}

#[async_trait]
impl RegistrationOracle for FakeOracle {
    async fn is_available(&self, domain: &str) -> bool {
        self.available.contains(domain)
    }
}
