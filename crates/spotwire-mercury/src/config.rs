use std::time::Duration;

use spotwire_frame::FrameConfig;
use spotwire_transport::ConnectConfig;

use crate::dispatcher::ShutdownPolicy;
use crate::multiplexer::DEFAULT_PUSH_TIMEOUT;

/// Session-level settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// TCP connect behaviour used by [`connect`](crate::connect).
    pub connect: ConnectConfig,
    /// Frame size limit and socket timeouts.
    pub frame: FrameConfig,
    /// Deadline for requests issued without an explicit timeout.
    pub request_timeout: Duration,
    /// Deadline for the server's SUB/UNSUB acknowledgement.
    pub subscribe_timeout: Duration,
    /// How often expired requests are swept.
    pub sweep_interval: Duration,
    /// How long an incomplete multi-frame push waits for its next frame.
    pub push_timeout: Duration,
    /// What the outbound dispatcher does with queued writes on close.
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect: ConnectConfig::default(),
            frame: FrameConfig::default(),
            request_timeout: Duration::from_secs(10),
            subscribe_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_millis(100),
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            shutdown_policy: ShutdownPolicy::Drain,
        }
    }
}
