//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use api_gateway::config::{GatewayConfig, UpstreamConfig};
use api_gateway::http::{AppState, HttpServer};
use api_gateway::lifecycle::Shutdown;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What the mock upstream does with one connection.
#[derive(Clone, Debug)]
pub enum Behavior {
    Respond {
        status: u16,
        body: String,
        headers: Vec<(String, String)>,
    },
    /// Read the request, then close without answering.
    HangUp,
    /// Read the request, then hold the connection open.
    Stall,
    /// Send a response head promising a body, then hold the connection open.
    StallBody,
}

impl Behavior {
    pub fn ok(body: &str) -> Self {
        Behavior::Respond {
            status: 200,
            body: body.to_string(),
            headers: Vec::new(),
        }
    }
}

/// A running raw-TCP mock upstream.
#[derive(Clone)]
pub struct MockUpstream {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockUpstream {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Raw text (head and body) of every request received.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a programmable mock upstream on an ephemeral port.
pub async fn start_mock_upstream<F>(f: F) -> MockUpstream
where
    F: Fn() -> Behavior + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mock = MockUpstream {
        addr,
        connections: Arc::new(AtomicUsize::new(0)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };

    let f = Arc::new(f);
    let state = mock.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    state.connections.fetch_add(1, Ordering::SeqCst);
                    let f = f.clone();
                    let requests = state.requests.clone();
                    tokio::spawn(async move {
                        let raw = read_request(&mut socket).await;
                        requests.lock().unwrap().push(raw);

                        match f() {
                            Behavior::Respond {
                                status,
                                body,
                                headers,
                            } => {
                                let mut response = format!(
                                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                                    status_line(status),
                                    body.len()
                                );
                                for (name, value) in headers {
                                    response.push_str(&format!("{}: {}\r\n", name, value));
                                }
                                response.push_str("\r\n");
                                response.push_str(&body);
                                let _ = socket.write_all(response.as_bytes()).await;
                                let _ = socket.shutdown().await;
                            }
                            Behavior::HangUp => {
                                let _ = socket.shutdown().await;
                            }
                            Behavior::Stall => {
                                tokio::time::sleep(Duration::from_secs(60)).await;
                            }
                            Behavior::StallBody => {
                                let _ = socket
                                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial")
                                    .await;
                                tokio::time::sleep(Duration::from_secs(60)).await;
                            }
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    mock
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return String::from_utf8_lossy(&buf).into_owned(),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        201 => "201 Created",
        404 => "404 Not Found",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// A gateway bound to an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: AppState,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let server = HttpServer::new(config);
    let state = server.state().clone();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestGateway {
        addr,
        state,
        shutdown,
    }
}

/// Default config with `upstreams` replacing the configured ones and only their rules kept.
pub fn gateway_config(upstreams: &[(&str, &MockUpstream)]) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.upstreams = upstreams
        .iter()
        .map(|(service, mock)| UpstreamConfig::new(*service, mock.url()))
        .collect();
    config
        .routing
        .rules
        .retain(|rule| upstreams.iter().any(|(service, _)| rule.service == *service));
    config
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
