//! Tunable knobs for a session orchestrator.

use std::time::Duration;

/// The canonical Steam web API endpoint listing CM servers.
pub const CM_LIST_URL: &str = "https://api.steampowered.com/ISteamDirectory/GetCMList/v1/?cellid=0&format=json";

/// Runtime configuration for [`crate::session::Session`].
///
/// `Default` mirrors the defaults: a 5 second connect/handshake timeout, up
/// to 100 concurrent latency probes, and the canonical directory URL.
#[derive(Clone, Debug)]
pub struct Config {
    /// Bound on TCP connect, handshake reads, and latency probes.
    pub connection_timeout: Duration,
    /// Max in-flight latency probes during [`crate::registry::Registry::find_fastest`].
    pub max_connections: usize,
    /// Where to fetch the CM server list from.
    pub cm_list_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(5),
            max_connections: 100,
            cm_list_url: CM_LIST_URL.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = Config::default();
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.cm_list_url, CM_LIST_URL);
    }
}
