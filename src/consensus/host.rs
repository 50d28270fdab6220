use crate::common::{Ballot, Membership, PeerAddr};

/// Capability interface of the owning replica, injected into the engine at
/// construction. The engine never outlives its host and never owns it.
pub trait Host: Send + Sync {
    /// Address this replica listens on; also its identity in vote sets.
    fn self_address(&self) -> PeerAddr;

    /// Authoritative group configuration from the replication layer.
    /// Snapshotted when this replica is promoted to leader, and used to seed
    /// the follower's local copy when the engine starts.
    fn authoritative_membership(&self) -> Membership;

    /// Ballot recorded in the replica's configuration, read once to seed the
    /// engine state when the partition opens.
    fn current_ballot(&self) -> Ballot;

    /// Called after this replica wins an election, before the membership
    /// fanout, so the outer layer can install the new primary designation.
    fn on_leader_promoted(&self, ballot: Ballot, membership: &Membership);
}
