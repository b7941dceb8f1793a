use crate::Result;
use async_trait::async_trait;
use reqwest::header::CONNECTION;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

/// Fetches the landing page of a host.
///
/// Every failure (DNS, connect, TLS, read, timeout) comes back as an empty
/// body, which the engine treats as a regular input.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, host: &str, force_https: bool, timeout: Duration) -> Vec<u8>;
}

pub fn site(host: &str, force_https: bool) -> String {
    if force_https {
        format!("https://{}", host)
    } else {
        format!("http://{}", host)
    }
}

// region:        --- Reqwest fetcher

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        // takeover candidates often serve broken certificates
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(Policy::none())
            .pool_max_idle_per_host(0)
            .build()?;
        debug!("HTTP Client created: {:?}", client);

        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    #[instrument(name = "fetch", level = "debug", skip_all, fields(host = host, https = force_https))]
    async fn fetch(&self, host: &str, force_https: bool, timeout: Duration) -> Vec<u8> {
        let url = site(host, force_https);
        debug!("{:12} - {:?}", "HTTP REQUEST", url);

        let res = match self
            .client
            .get(&url)
            .header(CONNECTION, "close")
            .timeout(timeout)
            .send()
            .await
        {
            Ok(res) => res,
            Err(err) => {
                debug!("{:12} - {}", "HTTP FAILED", err);
                return Vec::new();
            }
        };

        let status = res.status();
        match res.bytes().await {
            Ok(body) => {
                debug!("{:12} - {} ({} bytes)", "HTTP RESPONSE", status, body.len());
                body.to_vec()
            }
            Err(err) => {
                debug!("{:12} - {}", "BODY FAILED", err);
                Vec::new()
            }
        }
    }
}

// endregion:     --- Reqwest fetcher
