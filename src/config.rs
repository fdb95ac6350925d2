use tokio::time::Duration;

/// Default number of retransmissions after the original send. Together with
/// the doubling schedule this produces sends at 0, 100, 300, 700, 1500,
/// 3100, 4700, 6300 and 7900 ms and a timeout at 9500 ms.
pub const DEFAULT_MAX_RETRANSMISSIONS: u32 = 8;

/// Default delay before the first retransmission.
pub const DEFAULT_FIRST_RETRANS_AFTER: Duration = Duration::from_millis(100);

/// Cap on the doubling retransmission interval.
pub const DEFAULT_MAX_RETRANS_TIMER: Duration = Duration::from_millis(1600);

/// StackConfig carries the recognized stack options. Build one with the
/// `with_*` setters and hand it to [`StunStack::new`](crate::StunStack::new).
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Maximum client-transaction retransmissions after the original send.
    pub max_ctran_retransmissions: u32,
    /// Delay before the first client-transaction retransmission.
    pub first_ctran_retrans_after: Duration,
    /// Cap on the doubling retransmission interval, also the final wait
    /// before a timeout is declared.
    pub max_ctran_retrans_timer: Duration,
    /// When true, a client transaction stays registered after its first
    /// response so duplicate responses are delivered instead of dropped.
    pub keep_ctrans_after_a_response: bool,
    /// When true, retransmitted requests are delivered to request listeners
    /// even after the initial response was recorded.
    pub propagate_received_retransmissions: bool,
    /// When true, requests without MESSAGE-INTEGRITY are rejected with 401.
    pub require_message_integrity: bool,
    /// SO_REUSEADDR for the shared TCP listener.
    pub reuse_address: bool,
    /// SOFTWARE attribute stamped on generated error responses.
    pub software: Option<String>,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            max_ctran_retransmissions: DEFAULT_MAX_RETRANSMISSIONS,
            first_ctran_retrans_after: DEFAULT_FIRST_RETRANS_AFTER,
            max_ctran_retrans_timer: DEFAULT_MAX_RETRANS_TIMER,
            keep_ctrans_after_a_response: false,
            propagate_received_retransmissions: false,
            require_message_integrity: false,
            reuse_address: true,
            software: Some("icenet".to_owned()),
        }
    }
}

impl StackConfig {
    pub fn new() -> Self {
        StackConfig::default()
    }

    pub fn with_max_ctran_retransmissions(mut self, n: u32) -> Self {
        self.max_ctran_retransmissions = n;
        self
    }

    pub fn with_first_ctran_retrans_after(mut self, d: Duration) -> Self {
        self.first_ctran_retrans_after = d;
        self
    }

    pub fn with_max_ctran_retrans_timer(mut self, d: Duration) -> Self {
        self.max_ctran_retrans_timer = d;
        self
    }

    pub fn with_keep_ctrans_after_a_response(mut self, keep: bool) -> Self {
        self.keep_ctrans_after_a_response = keep;
        self
    }

    pub fn with_propagate_received_retransmissions(mut self, propagate: bool) -> Self {
        self.propagate_received_retransmissions = propagate;
        self
    }

    pub fn with_require_message_integrity(mut self, require: bool) -> Self {
        self.require_message_integrity = require;
        self
    }

    pub fn with_reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }

    pub fn with_software(mut self, software: Option<String>) -> Self {
        self.software = software;
        self
    }
}
