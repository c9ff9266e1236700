//! VNC scanner (port 5900)
//!
//! Detection and identification are separate outcomes: a completed dial marks
//! the service detected, and the RFB handshake then either yields the desktop
//! name and framebuffer size or an error string in the result blob.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{error, info};

use hsrecon_core::{Protocol, ScanContext, ScanReport};
use hsrecon_tor::dial;

use crate::ProtocolScanner;

const SECURITY_NONE: u8 = 1;
const MAX_STRING_LEN: u32 = 64 * 1024;

/// Errors from the RFB client handshake
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid protocol version banner: {0:?}")]
    BadVersion(String),

    #[error("Unsupported protocol version {0}")]
    Unsupported(String),

    #[error("Server rejected connection: {0}")]
    Rejected(String),

    #[error("No supported security type (server offers {0:?})")]
    AuthRequired(Vec<u8>),

    #[error("Security handshake failed: {0}")]
    SecurityFailed(String),

    #[error("Server string too long ({0} bytes)")]
    TooLong(u32),

    #[error("Handshake timed out after {0} seconds")]
    Timeout(u64),
}

/// Result blob attached under ("vnc", 5900)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VncInfo {
    pub desktop_name: String,
    pub width: u16,
    pub height: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VncInfo {
    fn failed(err: &HandshakeError) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Default::default()
        }
    }
}

/// Fields read from the ServerInit message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    pub width: u16,
    pub height: u16,
    pub desktop_name: String,
}

async fn read_u32<S: AsyncRead + Unpin>(stream: &mut S) -> Result<u32, HandshakeError> {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await?;
    Ok(u32::from_be_bytes(buf))
}

async fn read_string<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, HandshakeError> {
    let len = read_u32(stream).await?;
    if len > MAX_STRING_LEN {
        return Err(HandshakeError::TooLong(len));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).to_string())
}

fn parse_version(banner: &[u8; 12]) -> Result<(u32, u32), HandshakeError> {
    let text = String::from_utf8_lossy(banner);
    let bad = || HandshakeError::BadVersion(text.to_string());

    let rest = text.strip_prefix("RFB ").ok_or_else(bad)?;
    let rest = rest.strip_suffix('\n').ok_or_else(bad)?;
    let (major, minor) = rest.split_once('.').ok_or_else(bad)?;
    let major = major.parse().map_err(|_| bad())?;
    let minor = minor.parse().map_err(|_| bad())?;
    Ok((major, minor))
}

/// Client side of the RFB handshake up to ServerInit, with no authentication
pub async fn rfb_handshake<S>(stream: &mut S) -> Result<ServerInit, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut banner = [0u8; 12];
    stream.read_exact(&mut banner).await?;
    let (major, minor) = parse_version(&banner)?;
    if major != 3 {
        return Err(HandshakeError::Unsupported(format!("{}.{}", major, minor)));
    }

    // 3.3 and 3.7 negotiate differently from 3.8; anything else falls back to 3.3
    let minor = match minor {
        m if m >= 8 => 8,
        7 => 7,
        _ => 3,
    };
    stream
        .write_all(format!("RFB 003.{:03}\n", minor).as_bytes())
        .await?;

    if minor == 3 {
        match read_u32(stream).await? {
            0 => return Err(HandshakeError::Rejected(read_string(stream).await?)),
            1 => {}
            other => {
                let offered = u8::try_from(other).unwrap_or(u8::MAX);
                return Err(HandshakeError::AuthRequired(vec![offered]));
            }
        }
    } else {
        let mut count = [0u8; 1];
        stream.read_exact(&mut count).await?;
        if count[0] == 0 {
            return Err(HandshakeError::Rejected(read_string(stream).await?));
        }

        let mut types = vec![0u8; count[0] as usize];
        stream.read_exact(&mut types).await?;
        if !types.contains(&SECURITY_NONE) {
            return Err(HandshakeError::AuthRequired(types));
        }
        stream.write_all(&[SECURITY_NONE]).await?;

        if minor == 8 && read_u32(stream).await? != 0 {
            return Err(HandshakeError::SecurityFailed(read_string(stream).await?));
        }
    }

    // ClientInit: request a shared session
    stream.write_all(&[1]).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    let mut pixel_format = [0u8; 16];
    stream.read_exact(&mut pixel_format).await?;
    let desktop_name = read_string(stream).await?;

    Ok(ServerInit {
        width: u16::from_be_bytes([head[0], head[1]]),
        height: u16::from_be_bytes([head[2], head[3]]),
        desktop_name,
    })
}

#[derive(Debug, Default, Clone)]
pub struct VncScanner;

#[async_trait]
impl ProtocolScanner for VncScanner {
    fn protocol(&self) -> Protocol {
        Protocol::Vnc
    }

    async fn scan_protocol(&self, hidden_service: &str, ctx: &ScanContext, report: &ScanReport) {
        let tor = &ctx.config.tor;
        info!("Checking {} {}", hidden_service, Protocol::Vnc);

        let mut stream = match dial(hidden_service, Protocol::Vnc.port(), tor).await {
            Ok(stream) => stream,
            Err(e) => {
                info!("Failed to connect to service on port {}: {}", Protocol::Vnc.port(), e);
                report.set_detected(Protocol::Vnc, false);
                return;
            }
        };

        info!("Detected possible VNC instance on {}", hidden_service);
        report.set_detected(Protocol::Vnc, true);

        let outcome = match timeout(tor.timeout(), rfb_handshake(&mut stream)).await {
            Ok(result) => result,
            Err(_) => Err(HandshakeError::Timeout(tor.timeout_secs)),
        };

        let vnc_info = match outcome {
            Ok(init) => {
                info!(
                    "VNC Desktop Detected: {} {} ({} x {})",
                    hidden_service, init.desktop_name, init.width, init.height
                );
                VncInfo {
                    desktop_name: init.desktop_name,
                    width: init.width,
                    height: init.height,
                    error: None,
                }
            }
            Err(e) => {
                error!("VNC handshake with {} failed: {}", hidden_service, e);
                VncInfo::failed(&e)
            }
        };

        report.add_protocol_info(Protocol::Vnc.name(), Protocol::Vnc.port(), &vnc_info);
        let _ = stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsrecon_core::{EvidenceStore, ScanConfig, TorConfig};
    use hsrecon_tor::mock::{MockProxy, Route};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::io::{duplex, DuplexStream};
    use tokio::net::TcpListener;

    fn server_init(width: u16, height: u16, name: &str) -> Vec<u8> {
        let mut msg = Vec::new();
        msg.extend_from_slice(&width.to_be_bytes());
        msg.extend_from_slice(&height.to_be_bytes());
        msg.extend_from_slice(&[0u8; 16]);
        msg.extend_from_slice(&(name.len() as u32).to_be_bytes());
        msg.extend_from_slice(name.as_bytes());
        msg
    }

    /// Plays an RFB 3.8 server offering the given security types
    async fn serve_rfb_38<S>(mut server: S, types: Vec<u8>, name: &'static str)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        server.write_all(b"RFB 003.008\n").await.unwrap();
        let mut version = [0u8; 12];
        server.read_exact(&mut version).await.unwrap();
        assert_eq!(&version, b"RFB 003.008\n");

        server.write_all(&[types.len() as u8]).await.unwrap();
        server.write_all(&types).await.unwrap();
        if !types.contains(&SECURITY_NONE) {
            return;
        }

        let mut chosen = [0u8; 1];
        server.read_exact(&mut chosen).await.unwrap();
        assert_eq!(chosen[0], SECURITY_NONE);
        server.write_all(&0u32.to_be_bytes()).await.unwrap();

        let mut shared = [0u8; 1];
        server.read_exact(&mut shared).await.unwrap();
        server.write_all(&server_init(1024, 768, name)).await.unwrap();
    }

    fn pair() -> (DuplexStream, DuplexStream) {
        duplex(1024)
    }

    #[tokio::test]
    async fn test_handshake_38() {
        let (mut client, server) = pair();
        tokio::spawn(serve_rfb_38(server, vec![2, 1], "ops-desktop"));

        let init = rfb_handshake(&mut client).await.unwrap();
        assert_eq!(
            init,
            ServerInit {
                width: 1024,
                height: 768,
                desktop_name: "ops-desktop".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_handshake_33() {
        let (mut client, mut server) = pair();
        tokio::spawn(async move {
            server.write_all(b"RFB 003.003\n").await.unwrap();
            let mut version = [0u8; 12];
            server.read_exact(&mut version).await.unwrap();
            assert_eq!(&version, b"RFB 003.003\n");
            server.write_all(&1u32.to_be_bytes()).await.unwrap();
            let mut shared = [0u8; 1];
            server.read_exact(&mut shared).await.unwrap();
            server.write_all(&server_init(640, 480, "old")).await.unwrap();
        });

        let init = rfb_handshake(&mut client).await.unwrap();
        assert_eq!(init.width, 640);
        assert_eq!(init.desktop_name, "old");
    }

    #[tokio::test]
    async fn test_handshake_requires_auth() {
        let (mut client, server) = pair();
        tokio::spawn(serve_rfb_38(server, vec![2], "locked"));

        match rfb_handshake(&mut client).await {
            Err(HandshakeError::AuthRequired(types)) => assert_eq!(types, vec![2]),
            other => panic!("expected AuthRequired, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handshake_33_wide_security_type_saturates() {
        let (mut client, mut server) = pair();
        tokio::spawn(async move {
            server.write_all(b"RFB 003.003\n").await.unwrap();
            let mut version = [0u8; 12];
            server.read_exact(&mut version).await.unwrap();
            server.write_all(&256u32.to_be_bytes()).await.unwrap();
        });

        match rfb_handshake(&mut client).await {
            Err(HandshakeError::AuthRequired(types)) => assert_eq!(types, vec![u8::MAX]),
            other => panic!("expected AuthRequired, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handshake_rejected_with_reason() {
        let (mut client, mut server) = pair();
        tokio::spawn(async move {
            server.write_all(b"RFB 003.008\n").await.unwrap();
            let mut version = [0u8; 12];
            server.read_exact(&mut version).await.unwrap();
            let reason = b"too many connections";
            server.write_all(&[0]).await.unwrap();
            server.write_all(&(reason.len() as u32).to_be_bytes()).await.unwrap();
            server.write_all(reason).await.unwrap();
        });

        match rfb_handshake(&mut client).await {
            Err(HandshakeError::Rejected(reason)) => assert_eq!(reason, "too many connections"),
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handshake_bad_banner() {
        let (mut client, mut server) = pair();
        tokio::spawn(async move {
            server.write_all(b"SSH-2.0-Open").await.unwrap();
        });

        assert!(matches!(
            rfb_handshake(&mut client).await,
            Err(HandshakeError::BadVersion(_))
        ));
    }

    async fn rfb_listener(types: Vec<u8>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                serve_rfb_38(stream, types, "ops-desktop").await;
            }
        });
        addr
    }

    fn context(proxy: &MockProxy) -> ScanContext {
        let config = ScanConfig {
            tor: TorConfig {
                socks_addr: proxy.addr(),
                timeout_secs: 1,
                max_retries: 1,
            },
            ..Default::default()
        };
        ScanContext::new(config, Arc::new(EvidenceStore::in_memory().unwrap()))
    }

    #[tokio::test]
    async fn test_scanner_records_desktop() {
        let target = rfb_listener(vec![1]).await;
        let proxy = MockProxy::start(vec![(5900, Route::Forward(target))]).await;
        let ctx = context(&proxy);
        let report = ScanReport::new("abcdefghijklmnop.onion");

        VncScanner.scan_protocol("abcdefghijklmnop.onion", &ctx, &report).await;

        assert!(report.is_detected(Protocol::Vnc));
        let blob = report.protocol_info("vnc").unwrap();
        assert_eq!(blob.port, 5900);
        let info: VncInfo = serde_json::from_value(blob.info).unwrap();
        assert_eq!(info.desktop_name, "ops-desktop");
        assert_eq!((info.width, info.height), (1024, 768));
        assert!(info.error.is_none());
    }

    #[tokio::test]
    async fn test_scanner_records_handshake_error() {
        let target = rfb_listener(vec![2]).await;
        let proxy = MockProxy::start(vec![(5900, Route::Forward(target))]).await;
        let ctx = context(&proxy);
        let report = ScanReport::new("abcdefghijklmnop.onion");

        VncScanner.scan_protocol("abcdefghijklmnop.onion", &ctx, &report).await;

        assert!(report.is_detected(Protocol::Vnc));
        let info: VncInfo =
            serde_json::from_value(report.protocol_info("vnc").unwrap().info).unwrap();
        assert!(info.error.unwrap().contains("security type"));
        assert_eq!(info.width, 0);
    }

    #[tokio::test]
    async fn test_scanner_silent_server_times_out_handshake() {
        let proxy = MockProxy::start(vec![(5900, Route::Accept)]).await;
        let ctx = context(&proxy);
        let report = ScanReport::new("abcdefghijklmnop.onion");

        VncScanner.scan_protocol("abcdefghijklmnop.onion", &ctx, &report).await;

        assert!(report.is_detected(Protocol::Vnc));
        let info: VncInfo =
            serde_json::from_value(report.protocol_info("vnc").unwrap().info).unwrap();
        assert!(info.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_scanner_connection_failure() {
        let proxy = MockProxy::start(vec![(5900, Route::Refuse)]).await;
        let ctx = context(&proxy);
        let report = ScanReport::new("abcdefghijklmnop.onion");

        VncScanner.scan_protocol("abcdefghijklmnop.onion", &ctx, &report).await;

        assert!(!report.is_detected(Protocol::Vnc));
        assert!(report.protocol_info("vnc").is_none());
    }
}
