//! The control test helper: re-runs the probe's checks from a trusted
//! network and reports what it saw.

pub mod dns;
pub mod handler;
pub mod http;
pub mod measure;
pub mod tcp;

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::netx::Netx;
pub use handler::SERVER_NAME;

/// How long open connections get to finish after shutdown was requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(45);

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct HelperSettings {
    /// Largest accepted request body, also the cap on fetched bodies.
    pub max_body_size: usize,
    /// Bound on each DNS, TCP and HTTP check.
    pub stage_timeout: Duration,
    /// Requests measured at once before answering 503.
    pub max_in_flight: usize,
}

impl Default for HelperSettings {
    fn default() -> Self {
        Self {
            max_body_size: 1 << 24,
            stage_timeout: Duration::from_secs(15),
            max_in_flight: 50,
        }
    }
}

pub struct Helper {
    settings: HelperSettings,
    netx: Netx,
    in_flight: AtomicUsize,
}

impl Helper {
    pub fn new(settings: HelperSettings, netx: Netx) -> Self {
        Self {
            settings,
            netx,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn settings(&self) -> &HelperSettings {
        &self.settings
    }
}

/// Accepts connections on `listener` until `shutdown` resolves, then waits
/// for open connections to finish.
pub async fn serve(
    listener: TcpListener,
    helper: Arc<Helper>,
    shutdown: impl Future<Output = ()>,
) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "test helper listening");
    let graceful = GracefulShutdown::new();
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
            _ = &mut shutdown => break,
        };

        let helper = Arc::clone(&helper);
        let service = service_fn(move |request| {
            let helper = Arc::clone(&helper);
            async move { Ok::<_, Infallible>(helper.handle(request).await) }
        });
        let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
        let connection = graceful.watch(connection);
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(%peer, error = %err, "connection closed with error");
            }
        });
    }

    info!("shutting down test helper");
    tokio::select! {
        _ = graceful.shutdown() => debug!("all connections closed"),
        _ = tokio::time::sleep(SHUTDOWN_GRACE) => warn!("gave up waiting for open connections"),
    }
    Ok(())
}
