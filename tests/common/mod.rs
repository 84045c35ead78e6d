//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use sieve_proxy::censor::Blocklist;
use sieve_proxy::config::ProxyConfig;
use sieve_proxy::lifecycle::Shutdown;
use sieve_proxy::net::listener::Listener;
use sieve_proxy::ProxyServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Requests an origin received, in arrival order.
pub type Received = Arc<Mutex<Vec<String>>>;

/// Start a mock origin on an ephemeral port. `respond` maps the raw request
/// to the raw response; the connection is closed after the response.
pub async fn start_origin<F>(respond: F) -> (SocketAddr, Received)
where
    F: Fn(&str) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let log = Arc::clone(&received);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let respond = Arc::clone(&respond);
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let request = read_head(&mut socket).await;
                log.lock().unwrap().push(request.clone());
                let _ = socket.write_all(&respond(&request)).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, received)
}

/// Start an origin that always sends `response`.
pub async fn start_fixed_origin(response: &'static [u8]) -> (SocketAddr, Received) {
    start_origin(move |_| response.to_vec()).await
}

/// Read until the end of the request header block (or EOF).
async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// A proxy running on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    shutdown: Shutdown,
    task: JoinHandle<()>,
}

impl TestProxy {
    pub async fn start(config: ProxyConfig, blocklist: Blocklist) -> Self {
        let mut config = config;
        config.listener.bind_address = "127.0.0.1:0".to_string();

        let listener = Listener::bind(&config.listener).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ProxyServer::from_config(config, Arc::new(blocklist)).await.unwrap();

        let shutdown = Shutdown::new();
        let shutdown_rx = shutdown.subscribe();
        let task = tokio::spawn(async move {
            server.run(listener, shutdown_rx).await.unwrap();
        });

        Self { addr, shutdown, task }
    }

    /// Send raw bytes and read until the proxy closes the connection.
    pub async fn send(&self, request: &[u8]) -> Vec<u8> {
        let mut client = TcpStream::connect(self.addr).await.unwrap();
        client.write_all(request).await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        response
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        self.task.await.unwrap();
    }
}

/// `GET http://<origin><path> HTTP/1.0` with a matching `Host` header.
pub fn get(origin: SocketAddr, path: &str) -> String {
    format!(
        "GET http://{origin}{path} HTTP/1.0\r\nHost: {origin}\r\nUser-Agent: sieve-test\r\n\r\n"
    )
}

pub fn text_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}
