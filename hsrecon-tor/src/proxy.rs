//! Tor SOCKS5h proxy client
//!
//! Raw TCP dials for protocol probes and HTTP clients for the spider, both
//! routed through Tor so `.onion` names are resolved by the proxy.

use reqwest::{Client, Proxy};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use hsrecon_core::TorConfig;

/// Errors from Tor networking
#[derive(Debug, Error)]
pub enum TorError {
    #[error("Failed to build Tor client: {0}")]
    ClientBuild(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Max retries ({0}) exceeded")]
    MaxRetries(u32),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Proxy I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SOCKS5 error: {0}")]
    Socks(String),
}

/// User agents for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:128.0) Gecko/20100101 Firefox/128.0",
];

/// Get a random user agent
pub fn random_user_agent() -> &'static str {
    use rand::Rng;
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Create a Tor-enabled HTTP client
pub fn create_tor_client(config: &TorConfig) -> Result<Client, TorError> {
    let proxy = Proxy::all(config.proxy_url())
        .map_err(|e| TorError::ClientBuild(e.to_string()))?;

    Client::builder()
        .proxy(proxy)
        .timeout(config.timeout())
        .user_agent(random_user_agent())
        .danger_accept_invalid_certs(true) // Many .onion sites have self-signed certs
        .build()
        .map_err(|e| TorError::ClientBuild(e.to_string()))
}

/// Check if the Tor proxy accepts SOCKS5 handshakes
pub async fn check_tor_connection(config: &TorConfig) -> bool {
    match timeout(config.timeout(), probe_proxy(&config.socks_addr)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("Tor proxy check failed: {}", e);
            false
        }
        Err(_) => false,
    }
}

/// Open a TCP stream to `host:port` through the proxy.
///
/// The whole proxy connect and CONNECT exchange is bounded by the configured
/// timeout. Nothing cancels the dial early.
pub async fn dial(host: &str, port: u16, config: &TorConfig) -> Result<TcpStream, TorError> {
    match timeout(config.timeout(), socks5_connect(&config.socks_addr, host, port)).await {
        Ok(result) => result,
        Err(_) => Err(TorError::Timeout(config.timeout_secs)),
    }
}

async fn probe_proxy(proxy: &str) -> Result<(), TorError> {
    let mut stream = TcpStream::connect(proxy).await?;
    negotiate_no_auth(&mut stream).await
}

async fn negotiate_no_auth(stream: &mut TcpStream) -> Result<(), TorError> {
    // version 5, one method, no authentication
    stream.write_all(&[0x05, 0x01, 0x00]).await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;

    if reply[0] != 0x05 {
        return Err(TorError::Socks(format!("invalid version {}", reply[0])));
    }
    if reply[1] != 0x00 {
        return Err(TorError::Socks("no acceptable authentication method".to_string()));
    }
    Ok(())
}

async fn socks5_connect(proxy: &str, host: &str, port: u16) -> Result<TcpStream, TorError> {
    if host.is_empty() || host.len() > 255 {
        return Err(TorError::InvalidTarget(host.to_string()));
    }

    let mut stream = TcpStream::connect(proxy).await?;
    negotiate_no_auth(&mut stream).await?;

    // CONNECT with a domain name so Tor resolves it
    let mut request = vec![0x05, 0x01, 0x00, 0x03, host.len() as u8];
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != 0x05 {
        return Err(TorError::Socks(format!("invalid version {}", head[0])));
    }
    if head[1] != 0x00 {
        return Err(TorError::Socks(reply_message(head[1]).to_string()));
    }

    // Drain the bound address
    let addr_len = match head[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => return Err(TorError::Socks(format!("unknown address type {}", other))),
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;

    debug!("SOCKS5 tunnel open to {}:{}", host, port);
    Ok(stream)
}

fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown failure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProxy, Route};

    fn config_for(proxy: &MockProxy, timeout_secs: u64) -> TorConfig {
        TorConfig {
            socks_addr: proxy.addr(),
            timeout_secs,
            max_retries: 1,
        }
    }

    #[test]
    fn test_random_user_agent() {
        let ua = random_user_agent();
        assert!(ua.contains("Mozilla"));
    }

    #[test]
    fn test_reply_messages() {
        assert_eq!(reply_message(0x05), "connection refused");
        assert_eq!(reply_message(0x42), "unknown failure");
    }

    #[tokio::test]
    async fn test_dial_success_sends_domain_name() {
        let proxy = MockProxy::start(vec![(21, Route::Accept)]).await;
        let config = config_for(&proxy, 5);

        let stream = dial("abcdefghijklmnop.onion", 21, &config).await;
        assert!(stream.is_ok());
        assert_eq!(
            proxy.requests(),
            vec![("abcdefghijklmnop.onion".to_string(), 21)]
        );
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let proxy = MockProxy::start(vec![(80, Route::Refuse)]).await;
        let config = config_for(&proxy, 5);

        match dial("abcdefghijklmnop.onion", 80, &config).await {
            Err(TorError::Socks(msg)) => assert_eq!(msg, "connection refused"),
            other => panic!("expected refusal, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_dial_times_out() {
        let proxy = MockProxy::start(vec![(5900, Route::Hang)]).await;
        let config = config_for(&proxy, 1);

        let result = dial("abcdefghijklmnop.onion", 5900, &config).await;
        assert!(matches!(result, Err(TorError::Timeout(1))));
    }

    #[tokio::test]
    async fn test_dial_rejects_oversized_host() {
        let config = TorConfig::default();
        let host = "a".repeat(300);
        assert!(matches!(
            dial(&host, 80, &config).await,
            Err(TorError::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn test_check_tor_connection() {
        let proxy = MockProxy::start(vec![]).await;
        assert!(check_tor_connection(&config_for(&proxy, 5)).await);

        let unreachable = TorConfig {
            socks_addr: "127.0.0.1:1".to_string(),
            timeout_secs: 1,
            max_retries: 1,
        };
        assert!(!check_tor_connection(&unreachable).await);
    }
}
