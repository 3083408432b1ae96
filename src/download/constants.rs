//! Constants for the download module (timeouts, chunking, redirects).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout between body chunks (60 seconds).
pub const READ_TIMEOUT_SECS: u64 = 60;

/// Maximum redirect hops followed for one request, login chain included.
pub const MAX_REDIRECT_HOPS: usize = 10;

/// Progress events are emitted once this many new bytes have been written.
pub const PROGRESS_EVENT_BYTES: u64 = 256 * 1024;

/// Restarts from zero (stale partial file discarded) that do not use up an
/// attempt. Further restarts count as transient failures.
pub const MAX_FREE_RESTARTS: u32 = 2;

/// Maximum Retry-After header value honored (10 minutes).
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(600);

/// How long a cancelled pool waits for active transfers before aborting them.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
