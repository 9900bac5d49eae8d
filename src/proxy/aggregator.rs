//! Result aggregation for a checker run

use crate::proxy::models::{ClassificationResult, LiveDetails, Verdict};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Counters for a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub unique: usize,
    pub duplicates: usize,
    /// Live with a non-empty country
    pub saved: usize,
    /// Live but without country data, not saved
    pub live_without_country: usize,
    pub dead: usize,
    pub failed: usize,
    pub timeouts: usize,
}

/// Terminal snapshot handed to the persistence layer
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    /// Every distinct ADDRESS:PORT, in first-seen order
    pub unique: Vec<String>,
    /// Saved proxies, in completion order
    pub live: Vec<String>,
    pub live_details: Vec<LiveDetails>,
    pub stats: RunStats,
}

#[derive(Debug, Default)]
struct Inner {
    seen: HashSet<String>,
    report: CheckReport,
}

/// Collects unique candidates and saved proxies across concurrent tasks
#[derive(Debug, Default)]
pub struct ResultAggregator {
    inner: Mutex<Inner>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a candidate key. Returns false if it was already seen this run.
    pub fn admit(&self, key: &str) -> bool {
        let mut inner = self.lock();
        if !inner.seen.insert(key.to_string()) {
            inner.report.stats.duplicates += 1;
            return false;
        }
        inner.report.unique.push(key.to_string());
        inner.report.stats.unique += 1;
        true
    }

    /// Record a finished classification. Returns the running saved count when
    /// the result was saved.
    pub fn record(&self, result: &ClassificationResult) -> Option<usize> {
        let mut guard = self.lock();
        let report = &mut guard.report;
        let stats = &mut report.stats;
        match &result.verdict {
            Verdict::Live(details) if details.has_country() => {
                stats.saved += 1;
                report.live.push(result.candidate.key());
                report.live_details.push(details.clone());
                return Some(stats.saved);
            }
            Verdict::Live(_) => stats.live_without_country += 1,
            Verdict::Dead => stats.dead += 1,
            Verdict::Failed(e) => {
                stats.failed += 1;
                if e.is_timeout() {
                    stats.timeouts += 1;
                }
            }
        }
        None
    }

    /// Count a classification task that ended without a result
    pub fn record_lost(&self) {
        self.lock().report.stats.failed += 1;
    }

    pub fn saved(&self) -> usize {
        self.lock().report.stats.saved
    }

    pub fn snapshot(&self) -> CheckReport {
        self.lock().report.clone()
    }
}
