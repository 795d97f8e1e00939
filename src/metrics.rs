//! A cheap, pull-based snapshot of consensus state for host observability,
//! after `openraft`'s `RaftMetrics`/`ReplicationMetrics`.

use std::collections::BTreeMap;

use crate::raft_types::Index;
use crate::raft_types::LogId;
use crate::raft_types::Term;
use crate::Role;
use crate::ServerId;

#[derive(Debug, Clone)]
pub struct ReplicationMetrics {
    pub matched: LogId,
}

#[derive(Debug, Clone)]
pub struct RaftMetrics {
    pub id: ServerId,
    pub current_term: Term,
    pub role: Role,
    pub leader_id: Option<ServerId>,
    pub commit_index: Index,
    pub last_applied: Index,
    pub last_log_index: Index,
    /// Populated only while `role == Leader`.
    pub replication: BTreeMap<ServerId, ReplicationMetrics>,
}
