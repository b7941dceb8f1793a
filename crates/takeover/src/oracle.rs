use crate::dns::new_resolver;
use crate::Result;
use async_trait::async_trait;
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;
use tracing::debug;

/// Answers whether a domain can currently be registered.
///
/// Implementations swallow their own failures and answer `false`: an
/// unreachable oracle must never turn into a positive finding.
#[async_trait]
pub trait RegistrationOracle: Send + Sync {
    async fn is_available(&self, domain: &str) -> bool;
}

/// Second-level labels that registries sell under a two-letter ccTLD
/// (`example.co.uk`, `example.com.au`).
const CCTLD_SECOND_LEVELS: &[&str] = &["ac", "co", "com", "edu", "gov", "ne", "net", "or", "org"];

/// Reduces a host name to the part a registrar would sell.
pub fn registrable_domain(name: &str) -> Option<String> {
    let name = name.trim().trim_end_matches('.').to_lowercase();
    let labels: Vec<&str> = name.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return None;
    }

    let tld = labels[labels.len() - 1];
    let second = labels[labels.len() - 2];
    let keep = if labels.len() >= 3 && tld.len() == 2 && CCTLD_SECOND_LEVELS.contains(&second) {
        3
    } else {
        2
    };

    Some(labels[labels.len() - keep..].join("."))
}

// region:        --- DNS oracle

/// Treats a registrable domain whose NS query comes back NXDOMAIN as free.
pub struct DnsRegistrationOracle {
    resolver: TokioAsyncResolver,
}

impl DnsRegistrationOracle {
    pub fn new(server: &str) -> Result<Self> {
        let resolver = new_resolver(crate::dns::parse_server(server)?);
        Ok(Self { resolver })
    }
}

#[async_trait]
impl RegistrationOracle for DnsRegistrationOracle {
    async fn is_available(&self, domain: &str) -> bool {
        let Some(apex) = registrable_domain(domain) else {
            return false;
        };

        match self.resolver.lookup(apex.as_str(), RecordType::NS).await {
            Ok(_) => false,
            Err(err) => {
                let available = is_unregistered(&err);
                debug!("{:12} - {} available={} ({})", "ORACLE", apex, available, err);
                available
            }
        }
    }
}

/// Only an NXDOMAIN answer says the domain is free. Timeouts, SERVFAIL,
/// refusals and empty NOERROR answers all count as taken.
fn is_unregistered(err: &ResolveError) -> bool {
    matches!(
        err.kind(),
        ResolveErrorKind::NoRecordsFound { response_code, .. }
            if *response_code == ResponseCode::NXDomain
    )
}

// endregion:     --- DNS oracle
