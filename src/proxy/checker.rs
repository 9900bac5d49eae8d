//! Proxy checker module: dispatches classifications with a concurrency ceiling

use crate::proxy::aggregator::{CheckReport, ResultAggregator};
use crate::proxy::classifier::{Classifier, DirectReferenceCache};
use crate::proxy::models::{Candidate, ClassificationResult};
use crate::proxy::prober::{Prober, TlsProber};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

/// Default timeout for a single probe in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default number of classifications in flight
pub const DEFAULT_CONCURRENCY: usize = 1000;

/// Default reference service echoing the caller's IP and geolocation
pub const DEFAULT_RESOLVER_HOST: &str = "myip.jeelsboobz.workers.dev";

pub const DEFAULT_RESOLVER_PATH: &str = "/";

pub const DEFAULT_RESOLVER_PORT: u16 = 443;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout for each probe
    pub timeout: Duration,
    /// Maximum number of classifications in flight
    pub concurrency: usize,
    /// Host of the reference service, also used as TLS server name
    pub resolver_host: String,
    /// Path requested from the reference service
    pub resolver_path: String,
    /// Port dialed when probing without a proxy
    pub resolver_port: u16,
    pub user_agent: String,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            concurrency: DEFAULT_CONCURRENCY,
            resolver_host: DEFAULT_RESOLVER_HOST.to_string(),
            resolver_path: DEFAULT_RESOLVER_PATH.to_string(),
            resolver_port: DEFAULT_RESOLVER_PORT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the ceiling; values below 1 are raised to 1
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_resolver_host(mut self, host: String) -> Self {
        self.resolver_host = host;
        self
    }

    pub fn with_resolver_path(mut self, path: String) -> Self {
        self.resolver_path = path;
        self
    }

    pub fn with_resolver_port(mut self, port: u16) -> Self {
        self.resolver_port = port;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Proxy checker: deduplicates candidates and classifies them concurrently
pub struct ProxyChecker<P: ?Sized> {
    config: CheckerConfig,
    classifier: Classifier<P>,
}

impl ProxyChecker<TlsProber> {
    /// Create a checker probing the configured reference service over TLS
    pub fn with_config(config: CheckerConfig) -> Result<Self> {
        let prober = TlsProber::with_config(&config)?;
        Ok(Self::with_prober(config, Arc::new(prober)))
    }
}

impl<P: Prober + ?Sized + 'static> ProxyChecker<P> {
    /// Create a checker around any prober
    pub fn with_prober(config: CheckerConfig, prober: Arc<P>) -> Self {
        let classifier = Classifier::with_cache(prober, Arc::new(DirectReferenceCache::new()));
        Self { config, classifier }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Check a single proxy
    pub async fn check_proxy(&self, candidate: &Candidate) -> ClassificationResult {
        self.classifier.classify(candidate).await
    }

    /// Classify every distinct candidate and collect the results.
    ///
    /// Admission stops while `concurrency` classifications are unresolved and
    /// resumes as each one finishes. Returns once every task has settled.
    pub async fn run(&self, candidates: Vec<Candidate>) -> CheckReport {
        let total = candidates.len();
        let aggregator = Arc::new(ResultAggregator::new());
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, candidate) in candidates.into_iter().enumerate() {
            let key = candidate.key();
            if !aggregator.admit(&key) {
                debug!(proxy = %key, "duplicate candidate skipped");
                continue;
            }

            // The semaphore is never closed, so acquire cannot fail here.
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let classifier = self.classifier.clone();
            let task_aggregator = Arc::clone(&aggregator);
            tasks.spawn(async move {
                let result = classifier.classify(&candidate).await;
                if let Some(saved) = task_aggregator.record(&result) {
                    info!("[{}/{}] Proxy saved: {} ({})", index, total, saved, key);
                }
                // released only once the result is recorded
                drop(permit);
            });

            while let Some(joined) = tasks.try_join_next() {
                Self::reap(joined, &aggregator);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            Self::reap(joined, &aggregator);
        }

        let report = aggregator.snapshot();
        info!(
            unique = report.stats.unique,
            duplicates = report.stats.duplicates,
            saved = report.stats.saved,
            dead = report.stats.dead,
            failed = report.stats.failed,
            "check finished"
        );
        report
    }

    fn reap(joined: std::result::Result<(), JoinError>, aggregator: &ResultAggregator) {
        if let Err(e) = joined {
            warn!(error = %e, "classification task ended abnormally");
            aggregator.record_lost();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::proxy::classifier::tests::ScriptedProber;
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;

    const DIRECT: &str = r#"{"ip":"1.1.1.1","country":"ID"}"#;

    fn candidates(keys: &[&str]) -> Vec<Candidate> {
        keys.iter()
            .map(|key| {
                let (address, port) = key.split_once(':').unwrap();
                Candidate::new(address, port.parse().unwrap())
            })
            .collect()
    }

    #[test]
    fn test_checker_config_default() {
        let config = CheckerConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.resolver_host, DEFAULT_RESOLVER_HOST);
        assert_eq!(config.resolver_path, "/");
        assert_eq!(config.resolver_port, 443);
    }

    #[test]
    fn test_checker_config_builder() {
        let config = CheckerConfig::new()
            .with_timeout(Duration::from_secs(30))
            .with_concurrency(20)
            .with_resolver_host("ip.example.com".to_string())
            .with_resolver_path("/json".to_string())
            .with_user_agent("curl/8".to_string());

        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.concurrency, 20);
        assert_eq!(config.resolver_host, "ip.example.com");
        assert_eq!(config.resolver_path, "/json");
        assert_eq!(config.user_agent, "curl/8");
    }

    #[test]
    fn test_zero_concurrency_is_raised() {
        let config = CheckerConfig::new().with_concurrency(0);
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn test_proxy_checker_with_config() {
        let config = CheckerConfig::new().with_concurrency(50);
        let checker = ProxyChecker::with_config(config).unwrap();
        assert_eq!(checker.config().concurrency, 50);
    }

    #[tokio::test]
    async fn test_duplicates_are_skipped() {
        let prober = Arc::new(ScriptedProber::new(DIRECT));
        prober.answer("1.2.3.4:443", Ok(r#"{"ip":"9.9.9.9","country":"US"}"#.to_string()));
        let checker = ProxyChecker::with_prober(CheckerConfig::new(), Arc::clone(&prober));

        let report = checker
            .run(candidates(&["1.2.3.4:443", "1.2.3.4:443", "5.6.7.8:8080"]))
            .await;

        assert_eq!(report.unique, vec!["1.2.3.4:443", "5.6.7.8:8080"]);
        assert_eq!(report.live, vec!["1.2.3.4:443"]);
        assert_eq!(report.stats.duplicates, 1);
        // one proxied probe per unique candidate, none for the duplicate
        assert_eq!(prober.proxied_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_forwarding_proxies_yield_no_live() {
        let prober = Arc::new(ScriptedProber::new(DIRECT).with_default(Ok(DIRECT.to_string())));
        let checker = ProxyChecker::with_prober(CheckerConfig::new(), prober);

        let report = checker
            .run(candidates(&["1.2.3.4:443", "5.6.7.8:8080", "9.8.7.6:80"]))
            .await;

        assert_eq!(report.unique.len(), 3);
        assert!(report.live.is_empty());
        assert_eq!(report.stats.dead, 3);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_run() {
        let prober = Arc::new(ScriptedProber::new(DIRECT));
        prober.answer("1.2.3.4:443", Err(ProbeError::RequestTimeout));
        prober.answer("5.6.7.8:8080", Ok("not json".to_string()));
        prober.answer("9.8.7.6:80", Ok(r#"{"ip":"7.7.7.7","country":"JP"}"#.to_string()));
        let checker = ProxyChecker::with_prober(CheckerConfig::new(), prober);

        let report = checker
            .run(candidates(&["1.2.3.4:443", "5.6.7.8:8080", "9.8.7.6:80", "4.4.4.4:3128"]))
            .await;

        assert_eq!(report.live, vec!["9.8.7.6:80"]);
        assert_eq!(report.stats.failed, 3);
        assert_eq!(report.stats.timeouts, 1);
        assert_eq!(report.live_details[0].country.as_deref(), Some("JP"));
    }

    #[tokio::test]
    async fn test_live_without_country_is_not_saved() {
        let prober = Arc::new(ScriptedProber::new(DIRECT));
        prober.answer("1.2.3.4:443", Ok(r#"{"ip":"9.9.9.9"}"#.to_string()));
        let checker = ProxyChecker::with_prober(CheckerConfig::new(), prober);

        let report = checker.run(candidates(&["1.2.3.4:443"])).await;
        assert!(report.live.is_empty());
        assert_eq!(report.stats.live_without_country, 1);
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_is_respected() {
        let prober = Arc::new(
            ScriptedProber::new(DIRECT)
                .with_default(Ok(r#"{"ip":"9.9.9.9","country":"US"}"#.to_string()))
                .with_delay(Duration::from_millis(20)),
        );
        let checker =
            ProxyChecker::with_prober(CheckerConfig::new().with_concurrency(4), Arc::clone(&prober));

        let keys: Vec<String> = (1..=40).map(|i| format!("10.0.0.{}:8080", i)).collect();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let report = checker.run(candidates(&keys)).await;

        let max = prober.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 4, "saw {} classifications in flight", max);
        assert!(max >= 2);
        assert_eq!(report.live.len(), 40);
        assert_eq!(prober.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_ceiling_on_worker_threads() {
        let prober = Arc::new(
            ScriptedProber::new(DIRECT)
                .with_default(Ok(r#"{"ip":"9.9.9.9","country":"US"}"#.to_string()))
                .with_delay(Duration::from_millis(5)),
        );
        let checker =
            ProxyChecker::with_prober(CheckerConfig::new().with_concurrency(3), Arc::clone(&prober));

        let keys: Vec<String> = (1..=60).map(|i| format!("10.0.1.{}:3128", i)).collect();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let report = checker.run(candidates(&keys)).await;

        assert!(prober.max_in_flight.load(Ordering::SeqCst) <= 3);
        // every admitted task recorded its result before run returned
        assert_eq!(report.live.len(), 60);
        assert_eq!(report.stats.saved, 60);
        assert_eq!(report.unique, keys);
    }

    #[tokio::test]
    async fn test_live_is_subset_of_unique() {
        let prober = Arc::new(ScriptedProber::new(DIRECT));
        prober.answer("1.2.3.4:443", Ok(r#"{"ip":"9.9.9.9","country":"US"}"#.to_string()));
        prober.answer("5.6.7.8:8080", Ok(r#"{"ip":"8.8.8.8","country":"NL"}"#.to_string()));
        let checker = ProxyChecker::with_prober(CheckerConfig::new().with_concurrency(2), prober);

        let report = checker
            .run(candidates(&[
                "5.6.7.8:8080",
                "1.2.3.4:443",
                "5.6.7.8:8080",
                "2.2.2.2:1080",
                "1.2.3.4:443",
            ]))
            .await;

        assert_eq!(report.unique, vec!["5.6.7.8:8080", "1.2.3.4:443", "2.2.2.2:1080"]);
        let unique: HashSet<_> = report.unique.iter().collect();
        assert_eq!(unique.len(), report.unique.len());
        assert!(report.live.iter().all(|key| unique.contains(key)));
        assert_eq!(report.live.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let prober = Arc::new(ScriptedProber::new(DIRECT));
        let checker = ProxyChecker::with_prober(CheckerConfig::new(), Arc::clone(&prober));

        let report = checker.run(Vec::new()).await;
        assert!(report.unique.is_empty());
        assert!(report.live.is_empty());
        assert_eq!(prober.direct_calls.load(Ordering::SeqCst), 0);
    }
}
