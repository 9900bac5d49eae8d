//! Dual-probe classifier
//!
//! A candidate is live when the reference service, reached through the proxy,
//! reports a non-empty IP that differs from the one it reports when reached
//! directly. A proxy that does not actually forward shows the tester's own IP.

use crate::error::ProbeError;
use crate::proxy::models::{Candidate, ClassificationResult, LiveDetails, ReferenceRecord};
use crate::proxy::prober::Prober;
use futures::future::join;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Shared cell for the record observed without a proxy.
///
/// Computation is not serialized: tasks that find the cell empty probe on
/// their own and the first successful writer wins. The reference service
/// answers with the same caller IP for the whole run, so a lost race only
/// costs a redundant request.
#[derive(Debug, Default)]
pub struct DirectReferenceCache {
    cell: OnceCell<ReferenceRecord>,
}

impl DirectReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&ReferenceRecord> {
        self.cell.get()
    }

    /// Store `record` unless another writer got there first; returns the cached value
    pub fn store(&self, record: ReferenceRecord) -> &ReferenceRecord {
        self.cell.get_or_init(|| record)
    }

    pub fn is_populated(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// Classifies candidates using a prober and a shared direct reference
pub struct Classifier<P: ?Sized> {
    prober: Arc<P>,
    direct: Arc<DirectReferenceCache>,
}

impl<P: ?Sized> Clone for Classifier<P> {
    fn clone(&self) -> Self {
        Self {
            prober: Arc::clone(&self.prober),
            direct: Arc::clone(&self.direct),
        }
    }
}

impl<P: Prober + ?Sized> Classifier<P> {
    pub fn new(prober: Arc<P>) -> Self {
        Self::with_cache(prober, Arc::new(DirectReferenceCache::new()))
    }

    pub fn with_cache(prober: Arc<P>, direct: Arc<DirectReferenceCache>) -> Self {
        Self { prober, direct }
    }

    pub fn cache(&self) -> &DirectReferenceCache {
        &self.direct
    }

    /// Classify one candidate. Never fails: probe errors become a failed verdict.
    pub async fn classify(&self, candidate: &Candidate) -> ClassificationResult {
        match self.classify_inner(candidate).await {
            Ok(result) => result,
            Err(e) => {
                debug!(proxy = %candidate, error = %e, "probe failed");
                ClassificationResult::failed(candidate.clone(), e)
            }
        }
    }

    async fn classify_inner(
        &self,
        candidate: &Candidate,
    ) -> Result<ClassificationResult, ProbeError> {
        let start = Instant::now();

        let (proxied, direct) = match self.direct.get() {
            Some(cached) => (self.prober.probe(Some(candidate)).await, cached),
            None => {
                let (proxied, direct) =
                    join(self.prober.probe(Some(candidate)), self.prober.probe(None)).await;
                // The direct record is stored even when the proxied probe failed.
                let direct = self.direct.store(ReferenceRecord::parse(&direct?)?);
                (proxied, direct)
            }
        };

        let delay_ms = start.elapsed().as_millis() as u64;

        let proxied = ReferenceRecord::parse(&proxied?)?;

        let Some(ip) = proxied.observed_ip() else {
            debug!(proxy = %candidate, "proxied response carried no ip");
            return Ok(ClassificationResult::dead(candidate.clone()));
        };
        if Some(ip) == direct.observed_ip() {
            debug!(proxy = %candidate, ip, "proxy did not change the observed ip");
            return Ok(ClassificationResult::dead(candidate.clone()));
        }

        let details = LiveDetails {
            proxy_address: candidate.address.clone(),
            proxy_port: candidate.port,
            is_live: true,
            ip: ip.to_string(),
            delay_ms,
            country: proxied.country,
            as_organization: proxied.as_organization,
            extra: proxied.extra,
        };
        Ok(ClassificationResult::live(candidate.clone(), details))
    }
}
