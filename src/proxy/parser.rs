//! Candidate list reader and line writer

use crate::proxy::models::Candidate;
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::warn;

/// scheme://HOST:PORT with an optional trailing slash
static URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?|socks[45])://([^:/@]+):(\d+)/?$").expect("Invalid proxy URL regex")
});

/// Parser for candidate proxy lists
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single candidate line
    ///
    /// Supports formats:
    /// - IP:PORT
    /// - IP,PORT
    /// - IP,PORT,COUNTRY,ORG
    /// - scheme://IP:PORT
    pub fn parse_line(line: &str) -> Option<Candidate> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        if line.contains(',') {
            return Self::parse_csv_format(line);
        }

        if let Some(candidate) = Self::parse_url_format(line) {
            return Some(candidate);
        }

        Self::parse_colon_format(line)
    }

    /// Parse IP,PORT[,COUNTRY[,ORG]] format
    fn parse_csv_format(line: &str) -> Option<Candidate> {
        let mut parts = line.split(',').map(str::trim);
        let address = parts.next().filter(|a| !a.is_empty())?;
        let port: u16 = parts.next()?.parse().ok()?;
        let country = parts.next().filter(|c| !c.is_empty()).map(String::from);
        let org = parts.next().filter(|o| !o.is_empty()).map(String::from);

        Some(Candidate::new(address, port).with_hints(country, org))
    }

    /// Parse URL format (e.g., https://ip:port)
    fn parse_url_format(line: &str) -> Option<Candidate> {
        let caps = URL_REGEX.captures(line)?;
        let port: u16 = caps[2].parse().ok()?;
        Some(Candidate::new(&caps[1], port))
    }

    /// Parse IP:PORT format
    fn parse_colon_format(line: &str) -> Option<Candidate> {
        let (address, port) = line.split_once(':')?;
        if address.is_empty() || port.contains(':') {
            return None;
        }
        let port: u16 = port.trim().parse().ok()?;
        Some(Candidate::new(address.trim(), port))
    }

    /// Parse candidates from a string (multiple lines), keeping input order
    pub fn parse_string(content: &str) -> Vec<Candidate> {
        content
            .lines()
            .filter_map(|line| {
                let candidate = Self::parse_line(line);
                let trimmed = line.trim();
                if candidate.is_none() && !trimmed.is_empty() && !trimmed.starts_with('#') {
                    warn!(line = trimmed, "skipping unparsable candidate line");
                }
                candidate
            })
            .collect()
    }

    /// Parse candidates from a file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<Candidate>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_string(&content))
    }

    /// Write entries one per line, without a trailing newline
    pub fn save_lines<P: AsRef<Path>>(lines: &[String], path: P) -> Result<()> {
        fs::write(path, lines.join("\n"))?;
        Ok(())
    }
}
