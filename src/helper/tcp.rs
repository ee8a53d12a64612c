use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::model::ControlTcpConnectResult;
use crate::model::control::{CONNECT_ERROR, CONNECTION_REFUSED_ERROR};
use crate::netx::Dialer;
use crate::netx::bogon::is_bogon;
use crate::netx::failure::{FAILURE_CONNECTION_REFUSED, FAILURE_GENERIC_TIMEOUT_ERROR};

/// Connects to `endpoint` ("ip:port"). Bogons and unparsable endpoints
/// are never dialed.
pub async fn tcp_check(
    dialer: &dyn Dialer,
    endpoint: &str,
    limit: Duration,
) -> ControlTcpConnectResult {
    let addr: SocketAddr = match endpoint.parse() {
        Ok(addr) => addr,
        Err(_) => {
            debug!(%endpoint, "not an ip:port endpoint");
            return failed(CONNECT_ERROR);
        }
    };
    if is_bogon(addr.ip()) {
        warn!(%endpoint, "refusing to connect to a bogon");
        return failed(CONNECT_ERROR);
    }

    let result = match timeout(limit, dialer.dial(addr)).await {
        Ok(result) => result.map(drop).map_err(|failure| failure.into_string()),
        Err(_) => Err(FAILURE_GENERIC_TIMEOUT_ERROR.to_string()),
    };
    match result {
        Ok(()) => ControlTcpConnectResult {
            status: true,
            failure: None,
        },
        Err(failure) => {
            debug!(%endpoint, %failure, "TCP check failed");
            failed(&map_tcp_failure(&failure))
        }
    }
}

fn failed(failure: &str) -> ControlTcpConnectResult {
    ControlTcpConnectResult {
        status: false,
        failure: Some(failure.to_string()),
    }
}

/// Translates a failure into the vocabulary of the legacy helper.
pub fn map_tcp_failure(failure: &str) -> String {
    match failure {
        FAILURE_GENERIC_TIMEOUT_ERROR => FAILURE_GENERIC_TIMEOUT_ERROR,
        FAILURE_CONNECTION_REFUSED => CONNECTION_REFUSED_ERROR,
        _ => CONNECT_ERROR,
    }
    .to_string()
}
