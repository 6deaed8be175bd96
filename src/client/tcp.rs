//! TCP reachability prober.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use url::Url;

use crate::client::{ProbeReport, Prober};
use crate::error::DispatchError;
use crate::registry::ReplicaNode;

/// Port for `url`, falling back to the well-known port of its database scheme.
pub fn database_port(url: &Url) -> Option<u16> {
    url.port_or_known_default().or(match url.scheme() {
        "postgres" | "postgresql" => Some(5432),
        "mysql" | "mariadb" => Some(3306),
        "sqlserver" | "mssql" => Some(1433),
        "mongodb" => Some(27017),
        "redis" => Some(6379),
        _ => None,
    })
}

/// Treats a node as alive when a TCP connection to it can be opened.
///
/// Reports no lag signal; lag-aware deployments plug in their own [`Prober`].
#[derive(Debug, Clone)]
pub struct TcpProber {
    connect_timeout: Duration,
}

impl TcpProber {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, node: &ReplicaNode) -> Result<ProbeReport, DispatchError> {
        let host = node
            .url
            .host_str()
            .ok_or_else(|| DispatchError::Connection(format!("{} has no host", node.url)))?;
        let port = database_port(&node.url)
            .ok_or_else(|| DispatchError::Connection(format!("{} has no port", node.url)))?;

        match tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => Ok(ProbeReport::default()),
            Ok(Err(e)) => Err(DispatchError::Connection(e.to_string())),
            Err(_) => Err(DispatchError::Connection(format!(
                "connect to {host}:{port} timed out after {:?}",
                self.connect_timeout
            ))),
        }
    }
}
