//! Sink client for the InfluxDB 1.x HTTP API.
//!
//! A [`SinkConnection`] is an owned, lifecycle-scoped handle: `connect`
//! verifies the target database exists (creating it if absent) and pings
//! the server before handing the connection out. Reconnection is a fresh
//! `connect` call, never a repair of the old handle. The client makes no
//! retry decisions of its own; retry policy lives in the collector.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::point::Batch;

/// Errors surfaced by sink operations.
#[derive(Debug)]
pub enum SinkError {
    /// HTTP transport failure (connection refused, DNS, TLS)
    Request(reqwest::Error),

    /// Server answered with a non-success status
    Status { code: StatusCode, message: String },

    /// Request timed out
    Timeout,

    /// Server answered a query with a body the client cannot interpret
    Malformed(String),

    /// The HTTP client could not be built
    Setup(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Request(e) => write!(f, "sink request failed: {}", e),
            SinkError::Status { code, message } => {
                write!(f, "sink error ({}): {}", code, message)
            }
            SinkError::Timeout => write!(f, "sink request timed out"),
            SinkError::Malformed(msg) => write!(f, "unexpected sink response: {}", msg),
            SinkError::Setup(msg) => write!(f, "sink client setup failed: {}", msg),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SinkError::Timeout
        } else {
            SinkError::Request(err)
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    series: Vec<QuerySeries>,
}

#[derive(Debug, Deserialize)]
struct QuerySeries {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// An owned connection to the time-series sink.
///
/// Carries the target database name for its whole lifetime; on reconnect
/// the collector replaces the value wholesale with a new `connect` result.
pub struct SinkConnection {
    http: Client,
    base_url: String,
    database: String,
    auth: Option<(String, String)>,
}

impl SinkConnection {
    /// Establish a connection per the configured sink settings.
    ///
    /// Lists existing databases, creates the target database if absent
    /// (idempotent, safe to repeat on every reconnect), then performs a
    /// liveness ping. Any failure along the way fails the whole connect.
    pub async fn connect(config: &Config) -> Result<Self, SinkError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| SinkError::Setup(e.to_string()))?;

        let conn = Self {
            http,
            base_url: config.influx_url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            auth: config.influx_auth.clone(),
        };

        let existing = conn.list_databases().await?;
        if !existing.iter().any(|name| name == &conn.database) {
            info!(database = %conn.database, "target database absent, creating");
            conn.create_database().await?;
        }
        conn.ping().await?;

        debug!(url = %conn.base_url, database = %conn.database, "sink connection established");
        Ok(conn)
    }

    /// The target database this connection writes to.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Write a batch of points in a single request.
    ///
    /// Points are rendered as millisecond-precision line protocol. The call
    /// is single-shot: any failure is returned to the caller undecorated.
    pub async fn write(&self, batch: &Batch) -> Result<(), SinkError> {
        let body = line_protocol(batch);
        let request = self
            .http
            .post(format!("{}/write", self.base_url))
            .query(&[("db", self.database.as_str()), ("precision", "ms")]);

        let response = self.with_auth(request).body(body).send().await?;
        self.expect_success(response).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), SinkError> {
        let response = self
            .http
            .get(format!("{}/ping", self.base_url))
            .send()
            .await?;
        self.expect_success(response).await?;
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<String>, SinkError> {
        let request = self
            .http
            .get(format!("{}/query", self.base_url))
            .query(&[("q", "SHOW DATABASES")]);

        let response = self.with_auth(request).send().await?;
        let response = self.expect_success(response).await?;

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| SinkError::Malformed(e.to_string()))?;

        let names = body
            .results
            .into_iter()
            .flat_map(|r| r.series)
            .flat_map(|s| s.values)
            .filter_map(|row| row.into_iter().next())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        Ok(names)
    }

    async fn create_database(&self) -> Result<(), SinkError> {
        let query = format!("CREATE DATABASE \"{}\"", self.database);
        let request = self
            .http
            .post(format!("{}/query", self.base_url))
            .form(&[("q", query.as_str())]);

        let response = self.with_auth(request).send().await?;
        self.expect_success(response).await?;
        Ok(())
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some((user, password)) => {
                request.query(&[("u", user.as_str()), ("p", password.as_str())])
            }
            None => request,
        }
    }

    async fn expect_success(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, SinkError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unreadable error body".to_string());
            Err(SinkError::Status {
                code: status,
                message,
            })
        }
    }
}

/// Render a batch as InfluxDB line protocol with millisecond timestamps.
fn line_protocol(batch: &Batch) -> String {
    let mut out = String::new();
    for point in batch.points() {
        out.push_str(point.measurement.name());
        for (key, value) in &point.tags {
            out.push(',');
            push_escaped(&mut out, key);
            out.push('=');
            push_escaped(&mut out, value);
        }
        out.push_str(" value=");
        out.push_str(&point.fields.value.to_string());
        out.push(' ');
        out.push_str(&point.time.timestamp_millis().to_string());
        out.push('\n');
    }
    out
}

/// Escape the characters line protocol reserves in tag keys and values.
fn push_escaped(out: &mut String, raw: &str) {
    for ch in raw.chars() {
        if matches!(ch, ',' | '=' | ' ') {
            out.push('\\');
        }
        out.push(ch);
    }
}
