//! Reactor configuration.
//!
//! No file-format parsing lives here, only plain constructor parameters. A
//! host that wants `toml`/`serde` driven configuration builds that on top of
//! this struct.
use std::time::Duration;

/// Tunables for a `Reactor`.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Idle timeout for a session's read registration.
    pub read_timeout: Duration,
    /// Idle timeout for a session's write registration.
    pub write_timeout: Duration,
    /// Admission control: maximum number of live sessions.
    pub max_connections: usize,
    /// Admission control: maximum outstanding submission-queue length.
    pub req_queue_size: usize,
    /// In-band message written (with a trailing CRLF) to a session refused
    /// on admission, before it is marked `Exit`.
    pub refused_msg: Vec<u8>,
    /// Number of worker threads in the pool driving handler invocations.
    pub worker_threads: usize,
    /// Capacity of the `mio::Events` buffer used per `poll` call.
    pub events_capacity: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(60),
            max_connections: 10_000,
            req_queue_size: 4_096,
            refused_msg: b"BUSY".to_vec(),
            worker_threads: 4,
            events_capacity: 1_024,
        }
    }
}
