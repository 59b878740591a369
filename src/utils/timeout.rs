//! Timeout constants and async wrappers shared across the clients.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default timeout waiting for a response after a successful send.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for TCP connection attempts.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default lifetime of a pending split-packet container.
pub const SPLIT_CONTAINER_TTL: Duration = Duration::from_secs(30);

/// Run a fallible future under a deadline, mapping expiry to
/// [`ProtocolError::Timeout`].
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| ProtocolError::Timeout)?
}
