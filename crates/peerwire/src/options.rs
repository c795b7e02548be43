use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(120);
const DEFAULT_ALLOWED_FAST_SET_SIZE: usize = 10;
const DEFAULT_MAX_PENDING_REQUESTS_FAST: usize = 24;
const DEFAULT_MAX_PENDING_REQUESTS_MEDIUM: usize = 12;
const DEFAULT_MAX_PENDING_REQUESTS_SLOW: usize = 6;
const DEFAULT_FAST_LATENCY: Duration = Duration::from_millis(500);
const DEFAULT_MEDIUM_LATENCY: Duration = Duration::from_millis(1500);
const DEFAULT_FLOODING_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_INACTIVE_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_NOT_INTERESTED_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PEX_INTERVAL: Duration = Duration::from_secs(60);

/// Knobs of one peer session. Every field is optional; the accessors
/// resolve the defaults.
#[serde_as]
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct PeerSessionOptions {
    /// How long a request may stay unanswered before its block is given up.
    #[serde_as(as = "Option<serde_with::DurationSeconds>")]
    pub request_timeout: Option<Duration>,

    #[serde_as(as = "Option<serde_with::DurationSeconds>")]
    pub keep_alive_interval: Option<Duration>,

    /// Number of pieces we let a choked peer download (BEP6).
    pub allowed_fast_set_size: Option<usize>,

    pub ut_pex_enabled: Option<bool>,
    pub dht_enabled: Option<bool>,
    /// Sent in the Port message when both sides support DHT.
    pub dht_listen_port: Option<u16>,

    /// Advertised as `p` in the extended handshake.
    pub listen_port: Option<u16>,
    /// Advertised as `v` in the extended handshake.
    pub client_version: Option<String>,

    pub max_pending_requests_fast: Option<usize>,
    pub max_pending_requests_medium: Option<usize>,
    pub max_pending_requests_slow: Option<usize>,

    /// Peers answering faster than this get the deepest request pipeline.
    #[serde_as(as = "Option<serde_with::DurationMilliSeconds>")]
    pub fast_latency: Option<Duration>,
    #[serde_as(as = "Option<serde_with::DurationMilliSeconds>")]
    pub medium_latency: Option<Duration>,

    #[serde_as(as = "Option<serde_with::DurationSeconds>")]
    pub flooding_check_interval: Option<Duration>,
    #[serde_as(as = "Option<serde_with::DurationSeconds>")]
    pub inactive_timeout: Option<Duration>,
    #[serde_as(as = "Option<serde_with::DurationSeconds>")]
    pub not_interested_timeout: Option<Duration>,
    #[serde_as(as = "Option<serde_with::DurationSeconds>")]
    pub pex_interval: Option<Duration>,
}

impl PeerSessionOptions {
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        self.keep_alive_interval
            .unwrap_or(DEFAULT_KEEP_ALIVE_INTERVAL)
    }

    pub fn allowed_fast_set_size(&self) -> usize {
        self.allowed_fast_set_size
            .unwrap_or(DEFAULT_ALLOWED_FAST_SET_SIZE)
    }

    pub fn ut_pex_enabled(&self) -> bool {
        self.ut_pex_enabled.unwrap_or(false)
    }

    pub fn dht_enabled(&self) -> bool {
        self.dht_enabled.unwrap_or(false)
    }

    pub fn client_version(&self) -> String {
        self.client_version
            .clone()
            .unwrap_or_else(|| concat!("peerwire/", env!("CARGO_PKG_VERSION")).to_owned())
    }

    /// Request pipeline depth for a peer with the given answer latency.
    pub fn max_pending_requests(&self, latency: Duration) -> usize {
        if latency < self.fast_latency.unwrap_or(DEFAULT_FAST_LATENCY) {
            self.max_pending_requests_fast
                .unwrap_or(DEFAULT_MAX_PENDING_REQUESTS_FAST)
        } else if latency < self.medium_latency.unwrap_or(DEFAULT_MEDIUM_LATENCY) {
            self.max_pending_requests_medium
                .unwrap_or(DEFAULT_MAX_PENDING_REQUESTS_MEDIUM)
        } else {
            self.max_pending_requests_slow
                .unwrap_or(DEFAULT_MAX_PENDING_REQUESTS_SLOW)
        }
    }

    pub fn flooding_check_interval(&self) -> Duration {
        self.flooding_check_interval
            .unwrap_or(DEFAULT_FLOODING_CHECK_INTERVAL)
    }

    pub fn inactive_timeout(&self) -> Duration {
        self.inactive_timeout.unwrap_or(DEFAULT_INACTIVE_TIMEOUT)
    }

    pub fn not_interested_timeout(&self) -> Duration {
        self.not_interested_timeout
            .unwrap_or(DEFAULT_NOT_INTERESTED_TIMEOUT)
    }

    pub fn pex_interval(&self) -> Duration {
        self.pex_interval.unwrap_or(DEFAULT_PEX_INTERVAL)
    }
}
