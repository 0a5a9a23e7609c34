use std::time::Duration;

/// Tunables of the session engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Age after which a room is expired regardless of occupancy.
    pub room_ttl: Duration,
    /// Age after which a room with both seats empty is expired.
    pub empty_room_grace: Duration,
    /// Let spectators claim a seat that frees up while they watch.
    pub promote_spectators: bool,
    /// Compare-and-set attempts a remote transaction makes before giving up.
    pub max_transaction_attempts: u32,
    /// How long a remote request waits for its response.
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            room_ttl: Duration::from_millis(shared::ROOM_TTL_MS),
            empty_room_grace: Duration::from_secs(5 * 60),
            promote_spectators: false,
            max_transaction_attempts: 25,
            request_timeout: Duration::from_secs(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.room_ttl, Duration::from_secs(3600));
        assert!(config.empty_room_grace < config.room_ttl);
        assert!(!config.promote_spectators);
        assert_eq!(config.max_transaction_attempts, 25);
    }
}
