//! CM server discovery and latency-based selection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;

/// A host/port pair for one CM endpoint. Rebuilt on every registry refresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerEndpoint {
    /// Hostname or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl ServerEndpoint {
    /// `host:port`, as needed by `TcpStream::connect`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Deserialize)]
struct DirectoryResponse {
    response: DirectoryResponseInner,
}

#[derive(Deserialize)]
struct DirectoryResponseInner {
    serverlist: Vec<String>,
}

/// An ordered list of endpoints plus at most one cached fastest endpoint.
///
/// Invariant: the cached fastest endpoint, if present, appeared in the most
/// recent fetch; [`Registry::replace_endpoints`] clears the cache whenever
/// the new list no longer contains it.
#[derive(Default)]
pub struct Registry {
    endpoints: Vec<ServerEndpoint>,
    fastest: Option<(ServerEndpoint, Duration)>,
}

impl Registry {
    /// An empty registry with nothing fetched yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// GET `cm_list_url` and replace the endpoint list with
    /// `response.serverlist[]`, split on `:`. Network or parse failure
    /// yields an empty list; this is non-fatal, callers may retry.
    pub async fn fetch(&mut self, cm_list_url: &str) {
        match Self::fetch_endpoints(cm_list_url).await {
            Ok(endpoints) => self.replace_endpoints(endpoints),
            Err(e) => {
                tracing::warn!(error = %e, "CM list fetch failed, endpoint list left empty");
                self.replace_endpoints(Vec::new());
            }
        }
    }

    async fn fetch_endpoints(cm_list_url: &str) -> Result<Vec<ServerEndpoint>, reqwest::Error> {
        let body: DirectoryResponse = reqwest::get(cm_list_url).await?.json().await?;
        Ok(body
            .response
            .serverlist
            .into_iter()
            .filter_map(|entry| {
                let (host, port) = entry.rsplit_once(':')?;
                Some(ServerEndpoint { host: host.to_string(), port: port.parse().ok()? })
            })
            .collect())
    }

    /// Replace the endpoint list, clearing the cached fastest endpoint if
    /// it no longer appears in the new list.
    pub fn replace_endpoints(&mut self, endpoints: Vec<ServerEndpoint>) {
        if let Some((fastest, _)) = &self.fastest {
            if !endpoints.contains(fastest) {
                self.fastest = None;
            }
        }
        self.endpoints = endpoints;
    }

    /// The current endpoint list, in fetch order.
    pub fn endpoints(&self) -> &[ServerEndpoint] {
        &self.endpoints
    }

    /// The cached fastest endpoint, if one has been measured and still
    /// appears in the latest fetch.
    pub fn fastest(&self) -> Option<&ServerEndpoint> {
        self.fastest.as_ref().map(|(endpoint, _)| endpoint)
    }

    /// Probe every known endpoint concurrently (bounded by
    /// `max_connections` in-flight) and cache the one with the lowest
    /// latency. Endpoints that fail to connect within `timeout` are
    /// recorded as having infinite latency and never win.
    pub async fn find_fastest(&mut self, timeout: Duration, max_connections: usize) -> Option<ServerEndpoint> {
        let semaphore = Arc::new(Semaphore::new(max_connections.max(1)));
        let mut tasks = Vec::with_capacity(self.endpoints.len());

        for endpoint in self.endpoints.clone() {
            let semaphore = semaphore.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
                let latency = probe_latency(&endpoint, timeout).await;
                (endpoint, latency)
            }));
        }

        let mut best: Option<(ServerEndpoint, Duration)> = None;
        for task in tasks {
            if let Ok((endpoint, latency)) = task.await {
                let better = match &best {
                    Some((_, best_latency)) => latency < *best_latency,
                    None => true,
                };
                if better {
                    best = Some((endpoint, latency));
                }
            }
        }

        self.fastest = best.clone();
        best.map(|(endpoint, _)| endpoint)
    }

    /// Probe every endpoint in order and return the first one that
    /// responds within `timeout`.
    pub async fn first_reachable(&self, timeout: Duration) -> Option<ServerEndpoint> {
        for endpoint in &self.endpoints {
            if probe_latency(endpoint, timeout).await < Duration::MAX {
                return Some(endpoint.clone());
            }
        }
        None
    }
}

/// Open a TCP connection to `endpoint` with a bounded timeout; `Duration::MAX`
/// on any failure (timeout, refused, DNS).
async fn probe_latency(endpoint: &ServerEndpoint, timeout: Duration) -> Duration {
    let start = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect(endpoint.addr())).await {
        Ok(Ok(_stream)) => start.elapsed(),
        _ => Duration::MAX,
    }
}
