//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

/// All server tunables. `Default` carries the production values; the
/// binary overlays CLI flags and environment variables on top.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
    /// Deadline for a single outbound write.
    pub write_timeout: Duration,
    /// A connection with no inbound frame (or pong) for this long is dead.
    pub read_timeout: Duration,
    /// Ping cadence; must stay below `read_timeout`.
    pub ping_interval: Duration,
    /// Process-wide connection cap.
    pub max_clients: usize,
    /// Outbound queue depth per participant; a full queue evicts.
    pub outbound_queue_depth: usize,
    /// How often the auto-save sweep runs.
    pub autosave_interval: Duration,
    /// Minimum age of `last_saved` before a dirty session is flushed.
    pub save_quiescence: Duration,
    /// Cursors idle longer than this are swept from presence.
    pub presence_timeout: Duration,
    /// Budget for the final flush on shutdown.
    pub shutdown_window: Duration,
    /// Document store directory; `None` runs memory-only.
    pub data_dir: Option<PathBuf>,
    /// Environment tag (dev, prod).
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_message_size: 512 * 1024,
            write_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(27),
            max_clients: 1000,
            outbound_queue_depth: 256,
            autosave_interval: Duration::from_secs(30),
            save_quiescence: Duration::from_secs(10),
            presence_timeout: Duration::from_secs(120),
            shutdown_window: Duration::from_secs(10),
            data_dir: None,
            environment: "dev".to_string(),
        }
    }
}
