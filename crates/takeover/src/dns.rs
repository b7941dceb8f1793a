use crate::{Error, Result};
use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;
use rand::seq::SliceRandom;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::{debug, trace};

pub const DEFAULT_RESOLVER: &str = "8.8.8.8:53";
pub const RESOLVE_DNS_TIMEOUT_MS: u64 = 4000;
const DNS_PORT: u16 = 53;

/// CNAME and address lookups used by the verification engine.
///
/// DNS failures are data here, never errors: an unanswered query yields an
/// empty CNAME, and only a definite "no such host" answer counts as NXDOMAIN.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// CNAME target of `host`, lower-cased and fully qualified, or an empty
    /// string when there is none or the lookup failed.
    async fn resolve_cname(&self, host: &str) -> String;

    /// True only when the address lookup of `host` says the name does not exist.
    async fn host_is_unresolvable(&self, host: &str) -> bool;
}

// region:        --- Hickory resolver

pub struct DnsResolver {
    primary: TokioAsyncResolver,
    alternates: Vec<TokioAsyncResolver>,
}

impl DnsResolver {
    /// `default_server` answers address lookups and backs up the alternates.
    /// When `alternates` is not empty, CNAME queries pick one at random.
    pub fn new(default_server: &str, alternates: &[String]) -> Result<Self> {
        let primary = new_resolver(parse_server(default_server)?);
        let alternates = alternates
            .iter()
            .map(|server| parse_server(server).map(new_resolver))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "{:12} - default {} + {} alternates",
            "DNS RESOLVER",
            default_server,
            alternates.len()
        );
        Ok(Self {
            primary,
            alternates,
        })
    }

    fn pick(&self) -> Option<&TokioAsyncResolver> {
        self.alternates.choose(&mut rand::thread_rng())
    }
}

#[async_trait]
impl NameResolver for DnsResolver {
    async fn resolve_cname(&self, host: &str) -> String {
        cname_with_fallback(&self.primary, self.pick(), host).await
    }

    async fn host_is_unresolvable(&self, host: &str) -> bool {
        match self.primary.lookup_ip(host).await {
            Ok(lookup) => {
                trace!("{:12} - {} {:?}", "RESOLVED", host, lookup);
                false
            }
            Err(err) => {
                let nx = is_negative_answer(&err);
                debug!("{:12} - {} nxdomain={} ({})", "NOT RESOLVED", host, nx, err);
                nx
            }
        }
    }
}

/// One DNS server answering CNAME queries.
///
/// `Ok("")` means the server answered without a CNAME, `Err` means it did not
/// answer usefully.
#[async_trait]
pub(crate) trait CnameQuery: Send + Sync {
    async fn query_cname(&self, host: &str) -> core::result::Result<String, ResolveError>;
}

#[async_trait]
impl CnameQuery for TokioAsyncResolver {
    async fn query_cname(&self, host: &str) -> core::result::Result<String, ResolveError> {
        match self.lookup(host, RecordType::CNAME).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .filter_map(|record| record.as_cname())
                .map(|cname| cname.0.to_utf8().to_lowercase())
                .last()
                .unwrap_or_default()),
            Err(err) if is_negative_answer(&err) => Ok(String::new()),
            Err(err) => Err(err),
        }
    }
}

/// Asks `alternate` when there is one, else the default server. A failed
/// alternate query gets exactly one retry on the default server; an answer
/// without a CNAME is final.
pub(crate) async fn cname_with_fallback<Q: CnameQuery + ?Sized>(
    default: &Q,
    alternate: Option<&Q>,
    host: &str,
) -> String {
    let Some(alternate) = alternate else {
        return default.query_cname(host).await.unwrap_or_else(|err| {
            debug!("{:12} - {} ({})", "CNAME FAILED", host, err);
            String::new()
        });
    };

    match alternate.query_cname(host).await {
        Ok(cname) => cname,
        Err(err) => {
            debug!("{:12} - {} ({}), retrying default", "CNAME FAILED", host, err);
            default.query_cname(host).await.unwrap_or_default()
        }
    }
}

/// The server answered, but with NXDOMAIN or an empty NOERROR.
fn is_negative_answer(err: &ResolveError) -> bool {
    matches!(
        err.kind(),
        ResolveErrorKind::NoRecordsFound { response_code, .. }
            if *response_code == ResponseCode::NXDomain || *response_code == ResponseCode::NoError
    )
}

pub fn new_resolver(server: SocketAddr) -> TokioAsyncResolver {
    let mut opts = ResolverOpts::default();
    opts.timeout = Duration::from_millis(RESOLVE_DNS_TIMEOUT_MS);

    let group = NameServerConfigGroup::from_ips_clear(&[server.ip()], server.port(), true);
    let config = ResolverConfig::from_parts(None, vec![], group);

    TokioAsyncResolver::tokio(config, opts)
}

/// Accepts `ip` or `ip:port`, port defaulting to 53.
pub fn parse_server(server: &str) -> Result<SocketAddr> {
    let server = server.trim();
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    match server.parse::<IpAddr>() {
        Ok(ip) => Ok(SocketAddr::new(ip, DNS_PORT)),
        Err(_) => Err(Error::InvalidResolver(server.to_string())),
    }
}

// endregion:     --- Hickory resolver
