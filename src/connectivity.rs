//! Outbound network reachability probe

use crate::error::{PipelineError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;

/// Address probed when no other is configured (Cloudflare DNS)
pub const DEFAULT_PROBE_ADDR: &str = "1.1.1.1:53";

/// Probe timeout when no other is configured
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Open a TCP connection to `addr` within `timeout`
///
/// The socket is dropped immediately. Nothing is retried; the caller decides
/// what to do with a failure.
///
/// # Errors
/// `PipelineError::Connectivity` when the connection is refused, the address
/// cannot be resolved, or the timeout elapses.
pub async fn check_internet(addr: &str, timeout: Duration) -> Result<()> {
    tracing::info!(addr = %addr, "Checking internet connection...");
    await_connect(addr, timeout, TcpStream::connect(addr)).await
}

/// Await `connect` for at most `timeout`, mapping every failure to `Connectivity`
async fn await_connect<F, T>(addr: &str, timeout: Duration, connect: F) -> Result<()>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(_stream)) => {
            tracing::info!("Internet connection detected.");
            Ok(())
        },
        Ok(Err(e)) => Err(PipelineError::no_internet(e)),
        Err(_) => Err(PipelineError::no_internet(format!(
            "no answer from {addr} within {}ms",
            timeout.as_millis()
        ))),
    }
}
