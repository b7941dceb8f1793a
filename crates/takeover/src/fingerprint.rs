use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const BUNDLED_FINGERPRINTS: &str = include_str!("../fingerprints.json");

// region:        --- Models

/// Takeover signature of one cloud/SaaS service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprint {
    pub service: String,

    #[serde(rename = "cname", default)]
    pub cname_markers: Vec<String>,

    #[serde(rename = "fingerprint", default)]
    pub body_markers: Vec<String>,

    /// Only evaluated when the host itself does not resolve.
    #[serde(rename = "nxdomain", default)]
    pub requires_nxdomain: bool,

    /// Experimental fingerprint with a higher false positive rate.
    #[serde(default)]
    pub edge: bool,

    #[serde(rename = "verify", default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<SecondaryCheck>,
}

/// Refinements applied after a positive body match. Any configured check that
/// fails vetoes the whole match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecondaryCheck {
    #[serde(rename = "body", default, skip_serializing_if = "Option::is_none")]
    pub must_contain_body: Option<String>,

    #[serde(rename = "ssl", default)]
    pub reverify_over_ssl: bool,

    #[serde(rename = "size", default, skip_serializing_if = "Option::is_none")]
    pub exact_body_size: Option<usize>,

    #[serde(rename = "cname", default)]
    pub require_cname_present: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname_contains: Option<String>,
}

impl Fingerprint {
    /// First CNAME marker found in `cname`. Empty markers never match.
    pub fn matching_cname_marker(&self, cname: &str) -> Option<&str> {
        self.cname_markers
            .iter()
            .map(String::as_str)
            .find(|marker| !marker.is_empty() && cname.contains(marker))
    }

    /// First body marker found in `body`.
    pub fn matching_body_marker(&self, body: &[u8]) -> Option<&str> {
        self.body_markers
            .iter()
            .map(String::as_str)
            .find(|marker| contains_bytes(body, marker.as_bytes()))
    }
}

pub fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

// endregion:     --- Models

// region:        --- Database

/// Ordered, read-only collection of fingerprints. Matching walks the entries in
/// declared order, so the first entry wins on ties.
#[derive(Debug, Clone, Default)]
pub struct FingerprintDb {
    fingerprints: Vec<Fingerprint>,
}

impl FingerprintDb {
    pub fn from_json(config: &[u8], include_edge: bool) -> Result<Self> {
        let parsed: Vec<Fingerprint> = serde_json::from_slice(config)?;
        let total = parsed.len();

        let mut fingerprints = Vec::with_capacity(total);
        for (i, mut fingerprint) in parsed.into_iter().enumerate() {
            let service = fingerprint.service.trim();
            if service.is_empty() {
                return Err(Error::Fingerprints(format!(
                    "entry #{} has an empty service name",
                    i
                )));
            }
            fingerprint.service = service.to_uppercase();

            if fingerprint.edge && !include_edge {
                debug!("{:12} - {}", "SKIP EDGE", fingerprint.service);
                continue;
            }
            fingerprints.push(fingerprint);
        }

        info!(
            "{:12} - {} loaded ({} edge skipped)",
            "FINGERPRINTS",
            fingerprints.len(),
            total - fingerprints.len()
        );
        Ok(Self { fingerprints })
    }

    pub fn load(path: &Path, include_edge: bool) -> Result<Self> {
        let config = fs::read(path)?;
        Self::from_json(&config, include_edge)
    }

    pub fn bundled(include_edge: bool) -> Result<Self> {
        Self::from_json(BUNDLED_FINGERPRINTS.as_bytes(), include_edge)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> {
        self.fingerprints.iter()
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// True when `cname` points at any known service family.
    pub fn matches_cname(&self, cname: &str) -> bool {
        self.fingerprints
            .iter()
            .any(|fingerprint| fingerprint.matching_cname_marker(cname).is_some())
    }

    /// Fingerprints that only apply to hosts in NXDOMAIN.
    pub fn nxdomain(&self) -> impl Iterator<Item = &Fingerprint> {
        self.fingerprints.iter().filter(|f| f.requires_nxdomain)
    }

    /// Fingerprints matched against the response body.
    pub fn resolving(&self) -> impl Iterator<Item = &Fingerprint> {
        self.fingerprints.iter().filter(|f| !f.requires_nxdomain)
    }

    pub fn display_all(&self) {
        println!("\nFingerprints ({})", self.len());
        for fingerprint in self.iter() {
            let mut flags = Vec::new();
            if fingerprint.requires_nxdomain {
                flags.push("nxdomain");
            }
            if fingerprint.edge {
                flags.push("edge");
            }
            if fingerprint.secondary.is_some() {
                flags.push("verify");
            }
            println!(
                "- {:20}{:40}{}",
                fingerprint.service,
                fingerprint.cname_markers.join(", "),
                flags.join(" ")
            );
        }
    }
}

// endregion:     --- Database
