//! Loopback SOCKS5 proxy for tests
//!
//! Each target port is given a `Route` deciding how the CONNECT is answered.
//! Ports without a route are refused.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How the proxy answers a CONNECT to a given port
#[derive(Debug, Clone)]
pub enum Route {
    /// Reply "connection refused"
    Refuse,
    /// Never reply
    Hang,
    /// Reply success and keep the tunnel open with nothing behind it
    Accept,
    /// Reply success and relay to a local listener
    Forward(SocketAddr),
}

pub struct MockProxy {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<(String, u16)>>>,
    handle: JoinHandle<()>,
}

impl MockProxy {
    pub async fn start(routes: Vec<(u16, Route)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Arc<HashMap<u16, Route>> = Arc::new(routes.into_iter().collect());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let log = requests.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = routes.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, &routes, &log).await;
                });
            }
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    /// host:port to use as `socks_addr`
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// CONNECT targets seen so far
    pub fn requests(&self) -> Vec<(String, u16)> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockProxy {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    routes: &HashMap<u16, Route>,
    log: &Mutex<Vec<(String, u16)>>,
) -> std::io::Result<()> {
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    let mut methods = vec![0u8; greeting[1] as usize];
    stream.read_exact(&mut methods).await?;
    stream.write_all(&[0x05, 0x00]).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    let host = match head[3] {
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).to_string()
        }
        _ => {
            let mut ip = [0u8; 4];
            stream.read_exact(&mut ip).await?;
            format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3])
        }
    };
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    let port = u16::from_be_bytes(port);
    log.lock().unwrap().push((host, port));

    const SUCCESS: [u8; 10] = [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];

    match routes.get(&port).cloned().unwrap_or(Route::Refuse) {
        Route::Refuse => {
            stream.write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).await?;
        }
        Route::Hang => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Route::Accept => {
            stream.write_all(&SUCCESS).await?;
            let mut sink = [0u8; 256];
            while stream.read(&mut sink).await? > 0 {}
        }
        Route::Forward(target) => {
            let mut upstream = TcpStream::connect(target).await?;
            stream.write_all(&SUCCESS).await?;
            tokio::io::copy_bidirectional(&mut stream, &mut upstream).await?;
        }
    }
    Ok(())
}
