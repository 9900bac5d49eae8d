//! Proxy data models

use crate::error::ProbeError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A proxy endpoint awaiting classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub address: String,
    pub port: u16,
    /// Country hint from the source list, never used for classification
    pub country: Option<String>,
    /// Organization hint from the source list
    pub org: Option<String>,
}

impl Candidate {
    /// Create a new candidate without source hints
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            country: None,
            org: None,
        }
    }

    /// Attach the country/organization hints read from the source list
    pub fn with_hints(mut self, country: Option<String>, org: Option<String>) -> Self {
        self.country = country;
        self.org = org;
        self
    }

    /// Identity key in ADDRESS:PORT format
    pub fn key(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Body returned by the reference service
///
/// Only `ip` matters for classification; everything else is passed through.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReferenceRecord {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default, rename = "asOrganization")]
    pub as_organization: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReferenceRecord {
    /// Parse a response body
    pub fn parse(body: &str) -> Result<Self, ProbeError> {
        Ok(serde_json::from_str(body)?)
    }

    /// Observed IP, if present and non-empty
    pub fn observed_ip(&self) -> Option<&str> {
        self.ip.as_deref().filter(|ip| !ip.is_empty())
    }
}

/// Metadata for a proxy confirmed to forward traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveDetails {
    pub proxy_address: String,
    pub proxy_port: u16,
    pub is_live: bool,
    pub ip: String,
    pub delay_ms: u64,
    pub country: Option<String>,
    pub as_organization: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LiveDetails {
    /// True when the reference service reported a non-empty country
    pub fn has_country(&self) -> bool {
        self.country.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// Outcome of classifying one candidate
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Live(LiveDetails),
    /// Both probes succeeded but the proxied IP was missing or equal to the direct IP
    Dead,
    Failed(ProbeError),
}

/// Detailed result of a classification
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub candidate: Candidate,
    pub verdict: Verdict,
}

impl ClassificationResult {
    pub fn live(candidate: Candidate, details: LiveDetails) -> Self {
        Self {
            candidate,
            verdict: Verdict::Live(details),
        }
    }

    pub fn dead(candidate: Candidate) -> Self {
        Self {
            candidate,
            verdict: Verdict::Dead,
        }
    }

    pub fn failed(candidate: Candidate, error: ProbeError) -> Self {
        Self {
            candidate,
            verdict: Verdict::Failed(error),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.verdict, Verdict::Live(_))
    }

    /// Anything short of a live verdict counts as an error
    pub fn is_error(&self) -> bool {
        !self.is_live()
    }

    pub fn message(&self) -> Option<String> {
        match &self.verdict {
            Verdict::Live(_) => None,
            Verdict::Dead => Some("proxy did not change the observed IP".to_string()),
            Verdict::Failed(e) => Some(e.to_string()),
        }
    }

    pub fn details(&self) -> Option<&LiveDetails> {
        match &self.verdict {
            Verdict::Live(details) => Some(details),
            _ => None,
        }
    }

    /// Live with a non-empty country; only these are saved
    pub fn is_saveable(&self) -> bool {
        self.details().is_some_and(LiveDetails::has_country)
    }
}
