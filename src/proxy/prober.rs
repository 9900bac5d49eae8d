//! Endpoint prober: one HTTP/1.1 request over TLS to the reference service
//!
//! The socket is dialed either straight to the reference host or to a
//! candidate proxy, but the TLS server name is always the reference host, so a
//! proxy that blindly forwards bytes is transparent to the handshake.

use crate::error::ProbeError;
use crate::proxy::checker::CheckerConfig;
use crate::proxy::models::Candidate;
use crate::Result;
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

const MAX_HEADERS: usize = 64;

/// Something that can fetch the reference service body, directly or via a proxy
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, via: Option<&Candidate>) -> std::result::Result<String, ProbeError>;
}

/// Prober speaking raw HTTP/1.1 over a fresh TLS connection per call
#[derive(Clone)]
pub struct TlsProber {
    connector: TlsConnector,
    host: String,
    path: String,
    port: u16,
    user_agent: String,
    timeout: Duration,
}

impl TlsProber {
    /// Build a prober trusting Mozilla's root certificates
    pub fn with_config(config: &CheckerConfig) -> Result<Self> {
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(tls)),
            host: config.resolver_host.clone(),
            path: config.resolver_path.clone(),
            port: config.resolver_port,
            user_agent: config.user_agent.clone(),
            timeout: config.timeout,
        })
    }

    fn request(&self) -> String {
        format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nConnection: close\r\n\r\n",
            self.path, self.host, self.user_agent
        )
    }

    async fn fetch(&self, via: Option<&Candidate>) -> std::result::Result<String, ProbeError> {
        let tcp = match via {
            Some(proxy) => TcpStream::connect((proxy.address.as_str(), proxy.port)).await,
            None => TcpStream::connect((self.host.as_str(), self.port)).await,
        }
        .map_err(ProbeError::connection)?;

        let server_name =
            ServerName::try_from(self.host.clone()).map_err(ProbeError::connection)?;
        let mut tls = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(ProbeError::connection)?;

        tls.write_all(self.request().as_bytes())
            .await
            .map_err(ProbeError::connection)?;
        tls.flush().await.map_err(ProbeError::connection)?;

        let raw = read_until_close(&mut tls).await?;
        Ok(extract_body(&raw))
    }
}

#[async_trait]
impl Prober for TlsProber {
    async fn probe(&self, via: Option<&Candidate>) -> std::result::Result<String, ProbeError> {
        // Dropping the fetch future on timeout closes the socket.
        match tokio::time::timeout(self.timeout, self.fetch(via)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProbeError::RequestTimeout),
        }
    }
}

/// Read everything until the peer closes the stream.
///
/// Many servers drop the connection without a TLS close_notify; that surfaces
/// as `UnexpectedEof` and is treated as a normal end of stream.
async fn read_until_close<R>(reader: &mut R) -> std::result::Result<Vec<u8>, ProbeError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => raw.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(ProbeError::connection(e)),
        }
    }
    Ok(raw)
}

/// Body of a raw HTTP response, or an empty string if there is no header separator
pub fn extract_body(raw: &[u8]) -> String {
    let Some(pos) = find(raw, HEADER_SEPARATOR) else {
        return String::new();
    };
    let head_len = pos + HEADER_SEPARATOR.len();
    let body = &raw[head_len..];

    if is_chunked(&raw[..head_len]) {
        if let Some(decoded) = decode_chunked(body) {
            return String::from_utf8_lossy(&decoded).into_owned();
        }
    }
    String::from_utf8_lossy(body).into_owned()
}

fn is_chunked(head: &[u8]) -> bool {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    if response.parse(head).is_err() {
        return false;
    }

    response.headers.iter().any(|header| {
        header.name.eq_ignore_ascii_case("transfer-encoding")
            && String::from_utf8_lossy(header.value)
                .to_ascii_lowercase()
                .contains("chunked")
    })
}

/// Decode a chunked transfer-encoded body, keeping whatever arrived before the
/// stream ended. Returns None when the framing is malformed from the start.
fn decode_chunked(mut body: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    while !body.is_empty() {
        let (data_start, size) = match httparse::parse_chunk_size(body) {
            Ok(httparse::Status::Complete(parsed)) => parsed,
            Ok(httparse::Status::Partial) => break,
            Err(_) if out.is_empty() => return None,
            Err(_) => break,
        };
        if size == 0 {
            break;
        }

        let data = &body[data_start..];
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        if data.len() <= size {
            // truncated stream
            out.extend_from_slice(data);
            break;
        }
        out.extend_from_slice(&data[..size]);
        body = data.get(size + 2..).unwrap_or_default();
    }
    Some(out)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
