//! Tunables the core itself needs in order to stay deterministic.
//!
//! Timeout durations are deliberately absent: spec.md §1 makes choosing
//! timeout values a host responsibility, and §4.1 forbids the core from
//! reading a clock. `Config` holds only parameters that affect *decisions*
//! `step` makes given a fixed event sequence — nothing the host could vary
//! between two identical replays without changing the replay's outcome.

/// Core-owned tunables, analogous to `openraft::Config` but scoped to what
/// `step` actually consults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Minimum number of entries to retain past `snapshot_last_index`, even
    /// once every peer has caught up, to shorten recovery after a brief
    /// disconnect without a full snapshot transfer. Resolves the Open
    /// Question in spec.md §9 (SPEC_FULL.md §4.2).
    pub trailing_entries: u64,
    /// Maximum number of entries batched into one `AppendEntries` to a peer
    /// in `Pipeline` mode.
    pub max_append_entries: usize,
    /// Maximum bytes per `InstallSnapshot` chunk.
    pub snapshot_chunk_size: usize,
    /// Maximum outstanding (unacknowledged) `AppendEntries` batches to a
    /// single peer in `Pipeline` mode before further sends are withheld.
    pub max_inflight_per_peer: usize,
    /// Election timeout range, in milliseconds, the HOST should jitter
    /// within when rolling a fresh `Tick::election_timeout_ms`. The core
    /// never reads these directly; they exist only so a host has a single
    /// place to source them from alongside the rest of this struct.
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    /// Heartbeat interval, in milliseconds, the host should drive leader
    /// `Tick`s at. Same caveat: advisory to the host, not read by `step`.
    pub heartbeat_interval_ms: u64,
    /// How long, in milliseconds, a leadership transfer may run before it
    /// gives up and resumes accepting commands.
    pub transfer_timeout_ms: u64,
    /// Whether to run a non-durable pre-vote canvass before a real,
    /// term-bumping election (spec.md §4.1).
    pub enable_pre_vote: bool,
    /// How many entries may accumulate past `snapshot_last_index` before
    /// `step` asks the FSM to take a fresh one (a `TakeSnapshot` task),
    /// after `openraft::Config`'s `SnapshotPolicy::LogsSinceLast`. Checked
    /// on every node, not just the leader — compaction keeps every
    /// server's own memory bounded, independent of its role.
    pub snapshot_policy_logs_since_last: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            trailing_entries: 8192,
            max_append_entries: 256,
            snapshot_chunk_size: 4 * 1024 * 1024,
            max_inflight_per_peer: 8,
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            transfer_timeout_ms: 1_000,
            enable_pre_vote: true,
            snapshot_policy_logs_since_last: 5_000,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err("election_timeout_min_ms must be < election_timeout_max_ms".to_string());
        }
        if self.heartbeat_interval_ms * 2 > self.election_timeout_min_ms {
            return Err("heartbeat_interval_ms should be well under election_timeout_min_ms".to_string());
        }
        if self.max_append_entries == 0 {
            return Err("max_append_entries must be nonzero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_timeout_range() {
        let mut c = Config::default();
        c.election_timeout_min_ms = 500;
        c.election_timeout_max_ms = 100;
        assert!(c.validate().is_err());
    }
}
