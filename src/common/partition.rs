use std::fmt;

use serde::{Deserialize, Serialize};

use super::address::PeerAddr;

/// Election/term counter for one partition. Strictly monotonically
/// increasing; a higher ballot always takes precedence over a lower one.
pub type Ballot = i64;

/// Ballot of a partition that has never seen a leader.
pub const INVALID_BALLOT: Ballot = -1;

/// Identity of one logical partition: the owning app plus the partition
/// index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionId {
    pub app_id: u32,
    pub index: u32,
}

impl PartitionId {
    pub fn new(app_id: u32, index: u32) -> Self {
        Self { app_id, index }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_id, self.index)
    }
}

/// Group configuration for one partition: the ordered member list plus the
/// designated leader when known.
///
/// The leader's copy is authoritative; follower copies are replaced
/// wholesale on every accepted membership update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub leader: Option<PeerAddr>,
    pub members: Vec<PeerAddr>,
}

impl Membership {
    pub fn new(members: Vec<PeerAddr>) -> Self {
        Self {
            leader: None,
            members,
        }
    }

    pub fn with_leader(leader: PeerAddr, members: Vec<PeerAddr>) -> Self {
        Self {
            leader: Some(leader),
            members,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, addr: &PeerAddr) -> bool {
        self.members.contains(addr)
    }

    /// Members minus the given address, in membership order. Used to target
    /// RPC fanout from a replica to everyone else in the group.
    pub fn peers_excluding(&self, addr: &PeerAddr) -> Vec<PeerAddr> {
        self.members
            .iter()
            .filter(|member| *member != addr)
            .cloned()
            .collect()
    }

    /// Minimum number of distinct affirmative votes required to win an
    /// election in this group: floor(n/2) + 1.
    pub fn majority(&self) -> usize {
        self.members.len() / 2 + 1
    }
}
