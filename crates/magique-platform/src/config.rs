//! Platform configuration

use magique_proto::MAX_FRAME_SIZE;
use std::time::Duration;

/// Default listening port
pub const DEFAULT_PORT: u16 = 4444;

/// Platform configuration
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Host announced to peers and used in the platform name.
    ///
    /// `None` announces the bind address, or the machine's resolved
    /// address when binding every interface.
    pub host: Option<String>,
    /// Interface the accept loop binds to
    pub bind_address: String,
    /// Listening port; 0 picks an ephemeral port
    pub port: u16,
    /// Outbound connect timeout (`None` blocks indefinitely)
    pub connect_timeout: Option<Duration>,
    /// Idle timeout on inbound connections
    pub read_timeout: Option<Duration>,
    /// Per-frame write timeout on outbound connections
    pub write_timeout: Option<Duration>,
    /// Connection attempts per send before giving up
    pub send_attempts: u32,
    /// Delay before the second attempt, doubled for each further one
    pub retry_delay: Duration,
    /// How long `stop` waits for agents to acknowledge termination
    pub shutdown_grace: Duration,
    /// How long a closing writer may take to drain its queue
    pub close_timeout: Duration,
    /// Largest frame accepted or produced
    pub max_frame_size: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            host: None,
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            send_attempts: 3,
            retry_delay: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(2),
            close_timeout: Duration::from_secs(1),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl PlatformConfig {
    /// Configuration listening on `port`
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the announced host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the bind interface
    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    /// Set the outbound connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the inbound idle timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the outbound write timeout
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Set the retry policy for sends to unreachable platforms
    pub fn with_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.send_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    /// Set the termination grace period
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the writer drain timeout
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the largest frame size
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Backoff before attempt number `attempt` (0-based)
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.retry_delay.saturating_mul(1u32 << (attempt - 1).min(16))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PlatformConfig::default();

        assert_eq!(config.port, 4444);
        assert_eq!(config.host, None);
        assert_eq!(config.connect_timeout, None);
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.write_timeout, None);
        assert_eq!(config.send_attempts, 3);
    }

    #[test]
    fn test_config_builder() {
        let config = PlatformConfig::default()
            .with_port(5000)
            .with_host("10.0.0.7")
            .with_connect_timeout(Duration::from_secs(3))
            .with_retries(0, Duration::from_millis(10))
            .with_shutdown_grace(Duration::from_millis(250));

        assert_eq!(config.port, 5000);
        assert_eq!(config.host.as_deref(), Some("10.0.0.7"));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.send_attempts, 1);
        assert_eq!(config.shutdown_grace, Duration::from_millis(250));
    }

    #[test]
    fn test_backoff_doubles() {
        let config = PlatformConfig::default().with_retries(4, Duration::from_millis(50));

        assert_eq!(config.backoff(0), Duration::ZERO);
        assert_eq!(config.backoff(1), Duration::from_millis(50));
        assert_eq!(config.backoff(2), Duration::from_millis(100));
        assert_eq!(config.backoff(3), Duration::from_millis(200));
    }
}
