use crate::config::ScanConfig;
use crate::dns::NameResolver;
use crate::fingerprint::{contains_bytes, Fingerprint, FingerprintDb};
use crate::http::ContentFetcher;
use crate::model::ScanVerdict;
use crate::oracle::RegistrationOracle;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Resolver artifacts such as a lone root `.` are not real CNAMEs.
const MIN_CNAME_LEN: usize = 4;

/// Takeover decision procedure, shared by every worker of a run.
pub struct Engine {
    fingerprints: Arc<FingerprintDb>,
    resolver: Arc<dyn NameResolver>,
    fetcher: Arc<dyn ContentFetcher>,
    oracle: Arc<dyn RegistrationOracle>,
    config: Arc<ScanConfig>,
}

// region:        --- Constructors

impl Engine {
    pub fn new(
        fingerprints: Arc<FingerprintDb>,
        resolver: Arc<dyn NameResolver>,
        fetcher: Arc<dyn ContentFetcher>,
        oracle: Arc<dyn RegistrationOracle>,
        config: Arc<ScanConfig>,
    ) -> Self {
        Self {
            fingerprints,
            resolver,
            fetcher,
            oracle,
            config,
        }
    }
}

// endregion:     --- Constructors

// region:        --- Triage

impl Engine {
    /// Cheap pre-filter: does the CNAME of `host` point at a known service
    /// family? Never fetches the body.
    pub async fn verify_cname(&self, host: &str) -> bool {
        let cname = self.resolver.resolve_cname(host).await;
        self.triage(&cname)
    }

    pub fn triage(&self, cname: &str) -> bool {
        self.fingerprints.matches_cname(cname)
    }

    pub async fn resolve_cname(&self, host: &str) -> String {
        self.resolver.resolve_cname(host).await
    }
}

// endregion:     --- Triage

// region:        --- Identify

impl Engine {
    /// Full verification of one host.
    pub async fn identify(&self, host: &str) -> ScanVerdict {
        let (body, cname) = tokio::join!(
            self.fetcher
                .fetch(host, self.config.force_https, self.config.timeout),
            self.resolver.resolve_cname(host)
        );
        self.evaluate(host, &body, &cname).await
    }

    /// Full verification reusing a CNAME already resolved during triage.
    pub async fn identify_with_cname(&self, host: &str, cname: &str) -> ScanVerdict {
        let body = self
            .fetcher
            .fetch(host, self.config.force_https, self.config.timeout)
            .await;
        self.evaluate(host, &body, cname).await
    }

    #[instrument(name = "identify", level = "debug", skip(self, body), fields(size = body.len()))]
    async fn evaluate(&self, host: &str, body: &[u8], cname: &str) -> ScanVerdict {
        let cname = normalize_cname(cname);
        let nx = self.resolver.host_is_unresolvable(host).await;

        if nx {
            if let Some(verdict) = self.check_dangling(host, cname).await {
                return verdict;
            }
        }

        if let Some(fingerprint) = self.match_body(host, body, cname).await {
            info!("{:12} - {} [{}]", "VULNERABLE", host, fingerprint.service);
            return ScanVerdict::service(host, &fingerprint.service);
        }

        ScanVerdict::not_vulnerable(host)
    }

    /// NXDOMAIN branch, ahead of body matching: a registrable CNAME target,
    /// then a CNAME-only fingerprint, then (manual mode) the dead CNAME itself.
    async fn check_dangling(&self, host: &str, cname: &str) -> Option<ScanVerdict> {
        if cname.is_empty() {
            return None;
        }

        let domain = cname.trim_end_matches('.');
        if self.oracle.is_available(domain).await {
            info!("{:12} - {} -> {}", "UNREGISTERED", host, domain);
            return Some(ScanVerdict::unregistered_domain(host, domain));
        }

        if let Some(fingerprint) = self
            .fingerprints
            .nxdomain()
            .find(|fingerprint| fingerprint.matching_cname_marker(cname).is_some())
        {
            info!("{:12} - {} [{}]", "DANGLING", host, fingerprint.service);
            return Some(ScanVerdict::service(host, &fingerprint.service));
        }

        if self.config.manual {
            info!("{:12} - {} -> {}", "DEAD DOMAIN", host, cname);
            return Some(ScanVerdict::dead_domain(host, cname));
        }
        None
    }

    /// First fingerprint, in declared order, whose body marker matches and
    /// whose secondary checks all hold.
    async fn match_body(&self, host: &str, body: &[u8], cname: &str) -> Option<&Fingerprint> {
        for fingerprint in self.fingerprints.resolving() {
            let Some(marker) = fingerprint.matching_body_marker(body) else {
                continue;
            };

            if self.confirm(fingerprint, marker, host, body, cname).await {
                return Some(fingerprint);
            }
            debug!("{:12} - {} [{}]", "RULED OUT", host, fingerprint.service);
        }
        None
    }

    /// Secondary checks. The first configured check that fails vetoes.
    async fn confirm(
        &self,
        fingerprint: &Fingerprint,
        marker: &str,
        host: &str,
        body: &[u8],
        cname: &str,
    ) -> bool {
        let Some(check) = &fingerprint.secondary else {
            return true;
        };

        // no body at all: only the exact CNAME can identify the service
        if check.require_cname_present && body.is_empty() {
            return fingerprint
                .cname_markers
                .first()
                .is_some_and(|first| same_name(cname, first));
        }

        if let Some(needle) = &check.must_contain_body {
            if !contains_bytes(body, needle.as_bytes()) {
                return false;
            }
        }

        if check.reverify_over_ssl && !self.config.force_https {
            let needle = check.must_contain_body.as_deref().unwrap_or(marker);
            let ssl_body = self.fetcher.fetch(host, true, self.config.timeout).await;
            // an empty TLS answer is ambiguous and does not veto
            if !ssl_body.is_empty() && !contains_bytes(&ssl_body, needle.as_bytes()) {
                return false;
            }
        }

        if let Some(size) = check.exact_body_size {
            if body.len() != size {
                return false;
            }
        }

        if check.require_cname_present && cname.is_empty() {
            return false;
        }

        if let Some(suffix) = &check.cname_contains {
            if !cname.contains(suffix.as_str()) {
                return false;
            }
        }

        true
    }
}

// endregion:     --- Identify

fn normalize_cname(cname: &str) -> &str {
    if cname.len() < MIN_CNAME_LEN {
        ""
    } else {
        cname
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim_end_matches('.') == b.trim_end_matches('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFetcher, FakeOracle, FakeResolver};

    fn db(json: &str) -> Arc<FingerprintDb> {
        Arc::new(FingerprintDb::from_json(json.as_bytes(), false).unwrap())
    }

    fn fixtures() -> Arc<FingerprintDb> {
        db(r#"[
            { "service": "azure", "cname": [".azurewebsites.net"], "fingerprint": [], "nxdomain": true },
            { "service": "surge", "cname": ["surge.sh"], "fingerprint": ["project not found"], "nxdomain": false },
            { "service": "cloudfront", "cname": [".cloudfront.net"],
              "fingerprint": ["ERROR: The request could not be satisfied"], "nxdomain": false,
              "verify": { "body": "Bad request.", "ssl": true } },
            { "service": "activecampaign", "cname": ["activehosted.com"],
              "fingerprint": ["alt=\"LIGHTTPD - fly light.\""], "nxdomain": false,
              "verify": { "size": 844 } },
            { "service": "cargo", "cname": ["cargocollective.com"],
              "fingerprint": ["<title>404 &mdash; File not found</title>"], "nxdomain": false,
              "verify": { "body": "cargocollective.com" } }
        ]"#)
    }

    // matches any body, so it only makes sense on its own
    fn cname_only() -> Arc<FingerprintDb> {
        db(r#"[
            { "service": "mendix", "cname": ["cname.mendix.net"], "fingerprint": [""], "nxdomain": false,
              "verify": { "cname": true } }
        ]"#)
    }

    struct Setup {
        resolver: FakeResolver,
        fetcher: FakeFetcher,
        oracle: FakeOracle,
        config: ScanConfig,
        fingerprints: Arc<FingerprintDb>,
    }

    impl Setup {
        fn new() -> Self {
            Self {
                resolver: FakeResolver::default(),
                fetcher: FakeFetcher::default(),
                oracle: FakeOracle::default(),
                config: ScanConfig::default(),
                fingerprints: fixtures(),
            }
        }

        fn engine(self) -> (Engine, Arc<FakeFetcher>) {
            let fetcher = Arc::new(self.fetcher);
            let engine = Engine::new(
                self.fingerprints,
                Arc::new(self.resolver),
                fetcher.clone(),
                Arc::new(self.oracle),
                Arc::new(self.config),
            );
            (engine, fetcher)
        }
    }

    #[tokio::test]
    async fn surge_body_marker_is_vulnerable() {
        let mut setup = Setup::new();
        setup.resolver.cname("a.victim.com", "something.surge.sh.");
        setup.fetcher.http("a.victim.com", "<h1>project not found</h1>");
        let (engine, _) = setup.engine();

        let verdict = engine.identify("a.victim.com").await;
        assert!(verdict.vulnerable);
        assert_eq!(verdict.service.as_deref(), Some("SURGE"));
    }

    #[tokio::test]
    async fn unregistered_domain_short_circuits_fingerprints() {
        let mut setup = Setup::new();
        setup.resolver.cname("b.victim.com", "freename.example.com.");
        setup.resolver.nxdomain("b.victim.com");
        setup.oracle.available("freename.example.com");
        // a body match that would otherwise win
        setup.fetcher.http("b.victim.com", "project not found");
        let (engine, _) = setup.engine();

        let verdict = engine.identify("b.victim.com").await;
        assert!(verdict.vulnerable);
        assert_eq!(verdict.service, None);
        assert_eq!(
            verdict.evidence.unwrap().to_string(),
            "unregistered domain: freename.example.com"
        );
    }

    #[tokio::test]
    async fn nxdomain_fingerprint_matches_on_cname() {
        let mut setup = Setup::new();
        setup.resolver.cname("c.victim.com", "old-app.azurewebsites.net.");
        setup.resolver.nxdomain("c.victim.com");
        let (engine, _) = setup.engine();

        let verdict = engine.identify("c.victim.com").await;
        assert_eq!(verdict.service.as_deref(), Some("AZURE"));
    }

    #[tokio::test]
    async fn nxdomain_fingerprint_ignored_for_resolving_host() {
        let mut setup = Setup::new();
        setup.resolver.cname("c.victim.com", "live-app.azurewebsites.net.");
        let (engine, _) = setup.engine();

        let verdict = engine.identify("c.victim.com").await;
        assert!(!verdict.vulnerable);
    }

    #[tokio::test]
    async fn exact_size_mismatch_vetoes() {
        let mut setup = Setup::new();
        let mut body = String::from("alt=\"LIGHTTPD - fly light.\"");
        body.push_str(&"x".repeat(900 - body.len()));
        assert_eq!(body.len(), 900);
        setup.resolver.cname("d.victim.com", "d.activehosted.com.");
        setup.fetcher.http("d.victim.com", &body);
        let (engine, _) = setup.engine();

        assert!(!engine.identify("d.victim.com").await.vulnerable);
    }

    #[tokio::test]
    async fn exact_size_match_confirms() {
        let mut setup = Setup::new();
        let mut body = String::from("alt=\"LIGHTTPD - fly light.\"");
        body.push_str(&"x".repeat(844 - body.len()));
        setup.fetcher.http("d.victim.com", &body);
        let (engine, _) = setup.engine();

        let verdict = engine.identify("d.victim.com").await;
        assert_eq!(verdict.service.as_deref(), Some("ACTIVECAMPAIGN"));
    }

    #[tokio::test]
    async fn ssl_reverify_vetoes_when_marker_disappears() {
        let mut setup = Setup::new();
        let body = "ERROR: The request could not be satisfied Bad request.";
        setup.fetcher.http("e.victim.com", body);
        setup.fetcher.https("e.victim.com", "<html>welcome</html>");
        let (engine, fetcher) = setup.engine();

        assert!(!engine.identify("e.victim.com").await.vulnerable);
        assert_eq!(fetcher.https_calls(), 1);
    }

    #[tokio::test]
    async fn ssl_reverify_confirms_when_marker_stays() {
        let mut setup = Setup::new();
        let body = "ERROR: The request could not be satisfied Bad request.";
        setup.fetcher.http("e.victim.com", body);
        setup.fetcher.https("e.victim.com", body);
        let (engine, _) = setup.engine();

        let verdict = engine.identify("e.victim.com").await;
        assert_eq!(verdict.service.as_deref(), Some("CLOUDFRONT"));
    }

    #[tokio::test]
    async fn ssl_reverify_skipped_when_already_https() {
        let mut setup = Setup::new();
        setup.config.force_https = true;
        let body = "ERROR: The request could not be satisfied Bad request.";
        setup.fetcher.https("e.victim.com", body);
        let (engine, fetcher) = setup.engine();

        let verdict = engine.identify("e.victim.com").await;
        assert_eq!(verdict.service.as_deref(), Some("CLOUDFRONT"));
        // only the primary fetch went over TLS
        assert_eq!(fetcher.https_calls(), 1);
    }

    #[tokio::test]
    async fn must_contain_body_vetoes() {
        let mut setup = Setup::new();
        setup
            .fetcher
            .http("f.victim.com", "<title>404 &mdash; File not found</title>");
        let (engine, _) = setup.engine();
        assert!(!engine.identify("f.victim.com").await.vulnerable);

        let mut setup = Setup::new();
        setup.fetcher.http(
            "f.victim.com",
            "<title>404 &mdash; File not found</title> cargocollective.com",
        );
        let (engine, _) = setup.engine();
        assert_eq!(
            engine.identify("f.victim.com").await.service.as_deref(),
            Some("CARGO")
        );
    }

    #[tokio::test]
    async fn empty_body_decided_by_exact_cname() {
        let mut setup = Setup::new();
        setup.fingerprints = cname_only();
        setup.resolver.cname("g.victim.com", "cname.mendix.net.");
        let (engine, _) = setup.engine();
        assert_eq!(
            engine.identify("g.victim.com").await.service.as_deref(),
            Some("MENDIX")
        );

        let mut setup = Setup::new();
        setup.fingerprints = cname_only();
        setup.resolver.cname("g.victim.com", "tenant.cname.mendix.net.");
        let (engine, _) = setup.engine();
        assert!(!engine.identify("g.victim.com").await.vulnerable);
    }

    #[tokio::test]
    async fn cname_presence_required_with_body() {
        let mut setup = Setup::new();
        setup.fingerprints = cname_only();
        setup.fetcher.http("h.victim.com", "<html>anything</html>");
        let (engine, _) = setup.engine();
        assert!(!engine.identify("h.victim.com").await.vulnerable);

        let mut setup = Setup::new();
        setup.fingerprints = cname_only();
        setup.resolver.cname("h.victim.com", "h.cname.mendix.net.");
        setup.fetcher.http("h.victim.com", "<html>anything</html>");
        let (engine, _) = setup.engine();
        assert_eq!(
            engine.identify("h.victim.com").await.service.as_deref(),
            Some("MENDIX")
        );
    }

    #[tokio::test]
    async fn short_cname_is_treated_as_absent() {
        let mut setup = Setup::new();
        setup.resolver.cname("i.victim.com", ".");
        setup.resolver.nxdomain("i.victim.com");
        setup.oracle.available("");
        setup.config.manual = true;
        let (engine, _) = setup.engine();

        assert!(!engine.identify("i.victim.com").await.vulnerable);
    }

    #[tokio::test]
    async fn manual_mode_surfaces_dead_domains() {
        let mut setup = Setup::new();
        setup.resolver.cname("j.victim.com", "gone.vendor.example.");
        setup.resolver.nxdomain("j.victim.com");
        setup.config.manual = true;
        let (engine, _) = setup.engine();

        let verdict = engine.identify("j.victim.com").await;
        assert!(verdict.vulnerable);
        assert_eq!(verdict.label(), "DEAD DOMAIN - gone.vendor.example.");

        let mut setup = Setup::new();
        setup.resolver.cname("j.victim.com", "gone.vendor.example.");
        setup.resolver.nxdomain("j.victim.com");
        let (engine, _) = setup.engine();
        assert!(!engine.identify("j.victim.com").await.vulnerable);
    }

    #[tokio::test]
    async fn manual_dead_domain_precedes_body_matching() {
        let mut setup = Setup::new();
        setup.fingerprints = db(r#"[
            { "service": "catchall", "cname": [], "fingerprint": [""], "nxdomain": false }
        ]"#);
        setup.resolver.cname("p.victim.com", "gone.vendor.example.");
        setup.resolver.nxdomain("p.victim.com");
        setup.config.manual = true;
        let (engine, _) = setup.engine();

        let verdict = engine.identify("p.victim.com").await;
        assert_eq!(verdict, ScanVerdict::dead_domain("p.victim.com", "gone.vendor.example."));

        // without manual mode the empty body falls through to the fingerprint
        let mut setup = Setup::new();
        setup.fingerprints = db(r#"[
            { "service": "catchall", "cname": [], "fingerprint": [""], "nxdomain": false }
        ]"#);
        setup.resolver.cname("p.victim.com", "gone.vendor.example.");
        setup.resolver.nxdomain("p.victim.com");
        let (engine, _) = setup.engine();
        assert_eq!(
            engine.identify("p.victim.com").await.service.as_deref(),
            Some("CATCHALL")
        );
    }

    #[tokio::test]
    async fn no_match_is_not_vulnerable() {
        let mut setup = Setup::new();
        setup.resolver.cname("k.victim.com", "lb.hosting.example.");
        setup.fetcher.http("k.victim.com", "<html>hello</html>");
        let (engine, _) = setup.engine();

        let verdict = engine.identify("k.victim.com").await;
        assert_eq!(verdict, ScanVerdict::not_vulnerable("k.victim.com"));
        assert_eq!(verdict.label(), "Not Vulnerable");
    }

    #[tokio::test]
    async fn identify_is_idempotent() {
        let mut setup = Setup::new();
        setup.resolver.cname("a.victim.com", "something.surge.sh.");
        setup.fetcher.http("a.victim.com", "project not found");
        let (engine, _) = setup.engine();

        let first = engine.identify("a.victim.com").await;
        let second = engine.identify("a.victim.com").await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn declared_order_breaks_ties() {
        let mut setup = Setup::new();
        setup.fingerprints = db(r#"[
            { "service": "first", "cname": [], "fingerprint": ["shared marker"], "nxdomain": false },
            { "service": "second", "cname": [], "fingerprint": ["shared marker"], "nxdomain": false }
        ]"#);
        setup.fetcher.http("l.victim.com", "shared marker");
        let (engine, _) = setup.engine();

        assert_eq!(
            engine.identify("l.victim.com").await.service.as_deref(),
            Some("FIRST")
        );
    }

    #[tokio::test]
    async fn vetoed_fingerprint_falls_through_to_next() {
        let mut setup = Setup::new();
        setup.fingerprints = db(r#"[
            { "service": "strict", "cname": [], "fingerprint": ["page gone"], "nxdomain": false,
              "verify": { "body": "strict-vendor" } },
            { "service": "loose", "cname": [], "fingerprint": ["page gone"], "nxdomain": false }
        ]"#);
        setup.fetcher.http("m.victim.com", "page gone");
        let (engine, _) = setup.engine();

        assert_eq!(
            engine.identify("m.victim.com").await.service.as_deref(),
            Some("LOOSE")
        );
    }

    #[tokio::test]
    async fn triage_never_fetches() {
        let mut setup = Setup::new();
        setup.resolver.cname("n.victim.com", "n.surge.sh.");
        setup.resolver.cname("o.victim.com", "o.hosting.example.");
        let (engine, fetcher) = setup.engine();

        assert!(engine.verify_cname("n.victim.com").await);
        assert!(!engine.verify_cname("o.victim.com").await);
        assert!(!engine.verify_cname("unknown.victim.com").await);
        assert_eq!(fetcher.total_calls(), 0);
    }
}
