use serde::{Deserialize, Serialize};
use std::fmt;

// region:        --- Models

/// Why a host was judged vulnerable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Evidence {
    /// A fingerprint matched, carries the service name.
    Service(String),
    /// The CNAME target can be registered by anyone.
    UnregisteredDomain(String),
    /// Manual mode: the host is NXDOMAIN but its CNAME still points somewhere.
    DeadDomain(String),
}

impl fmt::Display for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evidence::Service(service) => write!(f, "{}", service),
            Evidence::UnregisteredDomain(domain) => write!(f, "unregistered domain: {}", domain),
            Evidence::DeadDomain(cname) => write!(f, "dead domain: {}", cname),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanVerdict {
    pub hostname: String,
    pub vulnerable: bool,
    pub service: Option<String>,
    pub evidence: Option<Evidence>,
}

impl ScanVerdict {
    pub fn not_vulnerable(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            vulnerable: false,
            service: None,
            evidence: None,
        }
    }

    pub fn service(hostname: &str, service: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            vulnerable: true,
            service: Some(service.to_string()),
            evidence: Some(Evidence::Service(service.to_string())),
        }
    }

    pub fn unregistered_domain(hostname: &str, domain: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            vulnerable: true,
            service: None,
            evidence: Some(Evidence::UnregisteredDomain(domain.to_string())),
        }
    }

    pub fn dead_domain(hostname: &str, cname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            vulnerable: true,
            service: None,
            evidence: Some(Evidence::DeadDomain(cname.to_string())),
        }
    }

    /// Text shown between brackets in report lines.
    pub fn label(&self) -> String {
        match &self.evidence {
            Some(Evidence::Service(service)) => service.clone(),
            Some(Evidence::UnregisteredDomain(domain)) => format!("DOMAIN - {}", domain),
            Some(Evidence::DeadDomain(cname)) => format!("DEAD DOMAIN - {}", cname),
            None if self.vulnerable => self.service.clone().unwrap_or_default(),
            None => "Not Vulnerable".to_string(),
        }
    }

    pub fn to_line(&self) -> String {
        format!("[{}] {}\n", self.label(), self.hostname)
    }
}

/// One entry of the JSON output array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonResult {
    pub subdomain: String,
    pub vulnerable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(
        rename = "nonexist_domain",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub domain: Option<String>,
}

impl From<&ScanVerdict> for JsonResult {
    fn from(verdict: &ScanVerdict) -> Self {
        let subdomain = verdict.hostname.to_lowercase();
        match &verdict.evidence {
            Some(Evidence::UnregisteredDomain(domain)) => Self {
                subdomain,
                vulnerable: true,
                service: Some("unregistered domain".to_string()),
                domain: Some(domain.clone()),
            },
            Some(Evidence::DeadDomain(cname)) => Self {
                subdomain,
                vulnerable: true,
                service: Some("dead domain".to_string()),
                domain: Some(cname.clone()),
            },
            _ => Self {
                subdomain,
                vulnerable: verdict.vulnerable,
                service: verdict.service.as_ref().map(|s| s.to_lowercase()),
                domain: None,
            },
        }
    }
}

// endregion:     --- Models
