use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use log::{debug, error};
use rand::Rng;

use crate::common::{Ballot, Membership, PeerAddr};
use crate::config::ConsensusConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follower => write!(f, "follower"),
            Role::Candidate => write!(f, "candidate"),
            Role::Leader => write!(f, "leader"),
        }
    }
}

/// Heartbeat arrival clock plus the partition's election timing parameters.
///
/// The arrival timestamp sits under its own lock: it is written on every
/// accepted leader message (a hot path shared with the replication layer)
/// and must not contend with role transitions. `None` means no heartbeat was
/// ever received, which counts as stale so a freshly opened partition with
/// no leader stands for election after the first monitor period.
pub struct HeartbeatClock {
    last_arrival: RwLock<Option<Instant>>,
    heartbeat_timeout: Duration,
    election_timeout_min_ms: u64,
    election_timeout_max_ms: u64,
}

impl HeartbeatClock {
    fn new(config: &ConsensusConfig) -> Self {
        Self {
            last_arrival: RwLock::new(None),
            heartbeat_timeout: config.heartbeat_timeout(),
            election_timeout_min_ms: config.election_timeout_min_ms,
            election_timeout_max_ms: config.election_timeout_max_ms,
        }
    }

    pub fn record(&self) {
        *self.last_arrival.write().unwrap() = Some(Instant::now());
    }

    pub fn expired(&self, now: Instant) -> bool {
        match *self.last_arrival.read().unwrap() {
            Some(at) => now.saturating_duration_since(at) > self.heartbeat_timeout,
            None => true,
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Draw a fresh randomized election timeout from [min, max].
    pub fn next_election_timeout(&self) -> Duration {
        let mut rng = rand::rng();
        let timeout_ms =
            rng.random_range(self.election_timeout_min_ms..=self.election_timeout_max_ms);
        Duration::from_millis(timeout_ms)
    }
}

/// Per-partition mutable consensus record: role, ballot, membership,
/// heartbeat clock and the in-progress vote set.
///
/// Every accessor is safe from any task context; each field keeps its own
/// lock so heartbeat recording never contends with role transitions.
/// Serializing *transitions* (read role, decide, write role) is the owning
/// engine's job.
pub struct ConsensusState {
    role: RwLock<Role>,
    ballot: AtomicI64,
    membership: RwLock<Membership>,
    vote_set: Mutex<HashSet<PeerAddr>>,
    clock: HeartbeatClock,
}

impl ConsensusState {
    pub fn new(config: &ConsensusConfig, initial_ballot: Ballot) -> Self {
        config.validate();
        Self {
            role: RwLock::new(Role::Follower),
            ballot: AtomicI64::new(initial_ballot),
            membership: RwLock::new(Membership::default()),
            vote_set: Mutex::new(HashSet::new()),
            clock: HeartbeatClock::new(config),
        }
    }

    pub fn role(&self) -> Role {
        *self.role.read().unwrap()
    }

    pub fn set_role(&self, role: Role) {
        *self.role.write().unwrap() = role;
    }

    pub fn ballot(&self) -> Ballot {
        self.ballot.load(Ordering::SeqCst)
    }

    /// Atomically bump and return the new ballot. Only used when initiating
    /// a candidacy.
    pub fn increment_and_get_ballot(&self) -> Ballot {
        self.ballot.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Adopt a ballot observed from a peer. The caller must have checked it
    /// is ahead of the local one; regression is a logic bug.
    pub fn update_ballot(&self, ballot: Ballot) {
        let current = self.ballot.load(Ordering::SeqCst);
        assert!(
            ballot > current,
            "ballot must not regress: {ballot} <= {current}"
        );
        self.ballot.store(ballot, Ordering::SeqCst);
    }

    pub fn membership(&self) -> Membership {
        self.membership.read().unwrap().clone()
    }

    /// Install the membership derived from the replica's own authoritative
    /// configuration upon becoming leader.
    pub fn reset_membership_as_leader(&self, membership: Membership) {
        debug!("installing leader membership of {} members", membership.len());
        *self.membership.write().unwrap() = membership;
    }

    /// Overwrite the local copy wholesale with a leader's update.
    pub fn reset_membership_as_follower(&self, membership: Membership) {
        debug!(
            "overwriting follower membership with {} members",
            membership.len()
        );
        *self.membership.write().unwrap() = membership;
    }

    pub fn peers_excluding(&self, addr: &PeerAddr) -> Vec<PeerAddr> {
        self.membership.read().unwrap().peers_excluding(addr)
    }

    /// floor(n/2) + 1 over the current membership, or 0 (with an error
    /// logged) if the membership is empty — an empty group cannot elect.
    pub fn majority_count(&self) -> usize {
        let membership = self.membership.read().unwrap();
        if membership.is_empty() {
            error!("majority is undefined for an empty membership");
            return 0;
        }
        membership.majority()
    }

    /// Note the arrival of a legitimate leader-originated message.
    pub fn record_heartbeat(&self) {
        self.clock.record();
    }

    pub fn heartbeat_expired(&self, now: Instant) -> bool {
        self.clock.expired(now)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.clock.heartbeat_timeout()
    }

    pub fn next_election_timeout(&self) -> Duration {
        self.clock.next_election_timeout()
    }

    /// Start a fresh vote collection: clear the set and record the implicit
    /// self-vote.
    pub fn reset_votes(&self, self_address: PeerAddr) {
        let mut votes = self.vote_set.lock().unwrap();
        votes.clear();
        votes.insert(self_address);
    }

    /// Record an affirmative vote and return the new tally.
    pub fn record_vote(&self, voter: PeerAddr) -> usize {
        let mut votes = self.vote_set.lock().unwrap();
        votes.insert(voter);
        votes.len()
    }

    pub fn vote_count(&self) -> usize {
        self.vote_set.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> PeerAddr {
        PeerAddr::new("127.0.0.1", port)
    }

    fn state() -> ConsensusState {
        ConsensusState::new(&ConsensusConfig::default(), crate::common::INVALID_BALLOT)
    }

    #[test]
    fn ballot_starts_invalid_and_increments() {
        let state = state();
        assert_eq!(state.ballot(), -1);
        assert_eq!(state.increment_and_get_ballot(), 0);
        assert_eq!(state.increment_and_get_ballot(), 1);
        state.update_ballot(7);
        assert_eq!(state.ballot(), 7);
    }

    #[test]
    #[should_panic(expected = "ballot must not regress")]
    fn ballot_regression_is_fatal() {
        let state = state();
        state.update_ballot(5);
        state.update_ballot(5);
    }

    #[test]
    fn majority_counts_for_group_sizes_one_through_seven() {
        let state = state();
        let expected = [1, 2, 2, 3, 3, 4, 4];
        for (size, want) in (1u16..=7).zip(expected) {
            let members = (0..size).map(addr).collect();
            state.reset_membership_as_leader(Membership::new(members));
            assert_eq!(state.majority_count(), want, "membership size {size}");
        }
    }

    #[test]
    fn majority_of_empty_membership_is_zero() {
        let state = state();
        assert_eq!(state.majority_count(), 0);
    }

    #[test]
    fn heartbeat_is_stale_until_recorded() {
        let state = state();
        let now = Instant::now();
        assert!(state.heartbeat_expired(now));

        state.record_heartbeat();
        assert!(!state.heartbeat_expired(Instant::now()));

        let later = Instant::now() + state.heartbeat_timeout() + Duration::from_millis(1);
        assert!(state.heartbeat_expired(later));
    }

    #[test]
    fn vote_set_counts_distinct_voters_from_self() {
        let state = state();
        state.reset_votes(addr(1));
        assert_eq!(state.vote_count(), 1);

        assert_eq!(state.record_vote(addr(2)), 2);
        // A duplicate grant does not inflate the tally.
        assert_eq!(state.record_vote(addr(2)), 2);
        assert_eq!(state.record_vote(addr(3)), 3);

        state.reset_votes(addr(1));
        assert_eq!(state.vote_count(), 1);
    }

    #[test]
    fn election_timeout_stays_within_the_configured_range() {
        let config = ConsensusConfig {
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            ..Default::default()
        };
        let state = ConsensusState::new(&config, -1);
        for _ in 0..200 {
            let timeout = state.next_election_timeout();
            assert!(timeout >= Duration::from_millis(150));
            assert!(timeout <= Duration::from_millis(300));
        }
    }

    #[test]
    fn role_defaults_to_follower() {
        let state = state();
        assert_eq!(state.role(), Role::Follower);
        state.set_role(Role::Candidate);
        assert_eq!(state.role(), Role::Candidate);
    }
}
