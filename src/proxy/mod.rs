//! Proxy module for probing and classifying candidate proxies
//!
//! This module provides functionality for:
//! - Parsing candidate lists (IP:PORT, IP,PORT,COUNTRY,ORG, etc.)
//! - Probing a reference service over TLS, directly or through a proxy
//! - Classifying proxies by comparing the observed exit IP
//! - Dispatching checks concurrently and aggregating the results

pub mod aggregator;
pub mod checker;
pub mod classifier;
pub mod models;
pub mod parser;
pub mod prober;

pub use aggregator::{CheckReport, ResultAggregator, RunStats};
pub use checker::{CheckerConfig, ProxyChecker};
pub use classifier::{Classifier, DirectReferenceCache};
pub use models::{Candidate, ClassificationResult, LiveDetails, ReferenceRecord, Verdict};
pub use parser::ProxyParser;
pub use prober::{Prober, TlsProber};
