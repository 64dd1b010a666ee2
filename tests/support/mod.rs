//! Test doubles for the forwarder's HTTP peers.
//!
//! `FakeInflux` speaks just enough of the InfluxDB 1.x HTTP API for the
//! sink client: `/ping`, `SHOW DATABASES` / `CREATE DATABASE` on `/query`,
//! and `/write`. It records write bodies in arrival order and can be
//! scripted to refuse writes or the whole API to simulate outages.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
struct Inner {
    writes: Vec<String>,
    created: Vec<String>,
    databases: Vec<String>,
    pings: usize,
    fail_writes: bool,
    fail_pings: bool,
    fail_all: bool,
}

pub struct FakeInflux {
    addr: SocketAddr,
    inner: Arc<Mutex<Inner>>,
}

impl FakeInflux {
    pub async fn start() -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let inner: Arc<Mutex<Inner>> = Arc::default();

        let state = inner.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let state = state.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state).await;
                });
            }
        });

        Self { addr, inner }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn writes(&self) -> Vec<String> {
        self.inner.lock().unwrap().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.inner.lock().unwrap().writes.len()
    }

    pub fn created_databases(&self) -> Vec<String> {
        self.inner.lock().unwrap().created.clone()
    }

    pub fn ping_count(&self) -> usize {
        self.inner.lock().unwrap().pings
    }

    /// Refuse `/write` requests with a 500 while leaving connect working.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }

    /// Refuse `/ping` requests with a 500 while leaving queries working.
    pub fn set_fail_pings(&self, fail: bool) {
        self.inner.lock().unwrap().fail_pings = fail;
    }

    /// Refuse every request with a 500, simulating an unreachable sink.
    pub fn set_fail_all(&self, fail: bool) {
        self.inner.lock().unwrap().fail_all = fail;
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    state: Arc<Mutex<Inner>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end;
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            header_end = pos + 4;
            break;
        }
        if buf.len() > 64 * 1024 {
            return Ok(());
        }
    }

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let request_line = head.lines().next().unwrap_or_default().to_string();
    let mut content_length = 0usize;
    for line in head.lines().skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&body).to_string();

    let mut parts = request_line.split_whitespace();
    let _method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };

    let fail_all = state.lock().unwrap().fail_all;
    let (status, response_body) = if fail_all {
        (
            "500 Internal Server Error",
            r#"{"error":"unavailable"}"#.to_string(),
        )
    } else {
        route(path, query, &body, &state)
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        response_body.len(),
        response_body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

fn route(
    path: &str,
    query: &str,
    body: &str,
    state: &Arc<Mutex<Inner>>,
) -> (&'static str, String) {
    match path {
        "/ping" => {
            let mut inner = state.lock().unwrap();
            inner.pings += 1;
            if inner.fail_pings {
                (
                    "500 Internal Server Error",
                    r#"{"error":"ping refused"}"#.to_string(),
                )
            } else {
                ("204 No Content", String::new())
            }
        }
        "/query" => {
            let q = query_param(query, body);
            if q.starts_with("SHOW DATABASES") {
                let databases = state.lock().unwrap().databases.clone();
                let values: Vec<String> =
                    databases.iter().map(|d| format!("[\"{}\"]", d)).collect();
                (
                    "200 OK",
                    format!(
                        r#"{{"results":[{{"statement_id":0,"series":[{{"name":"databases","columns":["name"],"values":[{}]}}]}}]}}"#,
                        values.join(",")
                    ),
                )
            } else if q.starts_with("CREATE DATABASE") {
                let name = q
                    .trim_start_matches("CREATE DATABASE")
                    .trim()
                    .trim_matches('"')
                    .to_string();
                let mut inner = state.lock().unwrap();
                inner.created.push(name.clone());
                if !inner.databases.contains(&name) {
                    inner.databases.push(name);
                }
                ("200 OK", r#"{"results":[{"statement_id":0}]}"#.to_string())
            } else {
                (
                    "400 Bad Request",
                    r#"{"error":"unsupported query"}"#.to_string(),
                )
            }
        }
        "/write" => {
            let mut inner = state.lock().unwrap();
            if inner.fail_writes {
                (
                    "500 Internal Server Error",
                    r#"{"error":"engine: write refused"}"#.to_string(),
                )
            } else {
                inner.writes.push(body.to_string());
                ("204 No Content", String::new())
            }
        }
        _ => ("404 Not Found", String::new()),
    }
}

/// Extract and url-decode the `q` parameter from the query string or a
/// form-encoded body. Decoding covers only what the sink client emits.
fn query_param(query: &str, body: &str) -> String {
    let find = |s: &str| {
        s.split('&')
            .find_map(|pair| pair.strip_prefix("q=").map(str::to_string))
    };
    let raw = find(query).or_else(|| find(body)).unwrap_or_default();
    raw.replace('+', " ").replace("%20", " ").replace("%22", "\"")
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Serve a fixed HTTP response to every connection, for probing error paths.
pub async fn spawn_http_responder(status: &'static str, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}
