use std::time::Duration;

use futures::future::join_all;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use crate::model::testkeys::{
    TCP_TLS_EXPERIMENT_TAG, TcpConnectEntry, TcpConnectStatus, TlsHandshakeEntry,
};
use crate::model::{Endpoint, EndpointProtocol};
use crate::netx::{Failure, Netx, Operation};

pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct ConnectOutcome {
    pub tcp_connect: Vec<TcpConnectEntry>,
    pub tls_handshakes: Vec<TlsHandshakeEntry>,
    pub attempts: usize,
    /// Endpoints where the connect, and the handshake if any, succeeded.
    pub successes: usize,
}

struct EndpointResult {
    tcp: TcpConnectEntry,
    tls: Option<TlsHandshakeEntry>,
    success: bool,
}

/// Connects to every endpoint concurrently. One entry per endpoint is
/// always produced, in input order.
pub async fn connects(
    netx: &Netx,
    endpoints: &[Endpoint],
    server_name: &str,
    deadline: Instant,
) -> ConnectOutcome {
    let results =
        join_all(endpoints.iter().map(|endpoint| connect(netx, *endpoint, server_name, deadline)))
            .await;

    let mut outcome = ConnectOutcome {
        attempts: results.len(),
        ..Default::default()
    };
    for result in results {
        if result.success {
            outcome.successes += 1;
        }
        outcome.tcp_connect.push(result.tcp);
        outcome.tls_handshakes.extend(result.tls);
    }
    outcome
}

async fn connect(
    netx: &Netx,
    endpoint: Endpoint,
    server_name: &str,
    deadline: Instant,
) -> EndpointResult {
    let mut tcp = TcpConnectEntry {
        ip: endpoint.addr.ip().to_string(),
        port: endpoint.addr.port(),
        status: TcpConnectStatus::default(),
    };

    let tcp_deadline = deadline.min(Instant::now() + TCP_CONNECT_TIMEOUT);
    let conn = match timeout_at(tcp_deadline, netx.dialer.dial(endpoint.addr)).await {
        Ok(result) => result,
        Err(_) => Err(Failure::timeout(Operation::Connect)),
    };
    let conn = match conn {
        Ok(conn) => {
            tcp.status.success = true;
            conn
        }
        Err(failure) => {
            debug!(%endpoint, %failure, "connect failed");
            tcp.status.failure = Some(failure.into_string());
            return EndpointResult {
                tcp,
                tls: None,
                success: false,
            };
        }
    };

    if endpoint.protocol == EndpointProtocol::Tcp {
        return EndpointResult {
            tcp,
            tls: None,
            success: true,
        };
    }

    let mut tls = TlsHandshakeEntry {
        address: endpoint.to_string(),
        server_name: server_name.to_string(),
        tags: vec![TCP_TLS_EXPERIMENT_TAG.to_string()],
        ..Default::default()
    };
    let tls_deadline = deadline.min(Instant::now() + TLS_HANDSHAKE_TIMEOUT);
    let handshake = netx.tls_handshaker.handshake(conn, server_name);
    let handshake = match timeout_at(tls_deadline, handshake).await {
        Ok(result) => result,
        Err(_) => Err(Failure::timeout(Operation::TlsHandshake)),
    };
    let success = match handshake {
        Ok(established) => {
            tls.state = established.state;
            true
        }
        Err(failure) => {
            debug!(%endpoint, %failure, "TLS handshake failed");
            tls.failure = Some(failure.into_string());
            false
        }
    };

    EndpointResult {
        tcp,
        tls: Some(tls),
        success,
    }
}
