use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use crate::common::{Ballot, Membership, PartitionId, PeerAddr};
use crate::config::ConsensusConfig;
use crate::transport::{RequestHandler, Transport, TransportError};
use crate::wire::{
    ErrorCode, MembershipUpdateRequest, MembershipUpdateResponse, Request, Response, VoteRequest,
    VoteResponse,
};

use super::error::ConsensusError;
use super::host::Host;
use super::state::{ConsensusState, Role};
use super::timer::{schedule_once, schedule_periodic, TimerHandle};

/// Per-partition consensus engine: decides which replica leads the group,
/// manages the ballot, and propagates membership to followers.
///
/// Starts as Follower with a recurring heartbeat monitor. When the leader
/// falls silent the engine stands as Candidate and solicits votes under a
/// freshly incremented ballot, retrying on a randomized timeout until it
/// either collects a majority and becomes Leader or observes a higher ballot
/// and falls back to Follower. All role transitions for one partition are
/// serialized behind the transition lock; engines of different partitions
/// are fully independent.
pub struct ConsensusEngine {
    partition: PartitionId,
    state: Arc<ConsensusState>,
    host: Arc<dyn Host>,
    transport: Arc<dyn Transport>,
    rpc_timeout: Duration,
    transition: Mutex<()>,
    heartbeat_monitor: Mutex<Option<TimerHandle>>,
    election_timer: Mutex<Option<TimerHandle>>,
    closed: AtomicBool,
    self_ref: Weak<ConsensusEngine>,
}

impl ConsensusEngine {
    pub fn new(
        partition: PartitionId,
        config: &ConsensusConfig,
        host: Arc<dyn Host>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let state = Arc::new(ConsensusState::new(config, host.current_ballot()));
        Arc::new_cyclic(|self_ref| Self {
            partition,
            state,
            host,
            transport,
            rpc_timeout: config.rpc_timeout(),
            transition: Mutex::new(()),
            heartbeat_monitor: Mutex::new(None),
            election_timer: Mutex::new(None),
            closed: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn role(&self) -> Role {
        self.state.role()
    }

    pub fn ballot(&self) -> Ballot {
        self.state.ballot()
    }

    pub fn membership(&self) -> Membership {
        self.state.membership()
    }

    pub fn is_leader(&self) -> bool {
        self.state.role() == Role::Leader
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Begin participating: seed the local membership from the replica's
    /// configuration and arm the heartbeat monitor as Follower.
    pub async fn start(&self) -> Result<(), ConsensusError> {
        let _guard = self.transition.lock().await;
        if self.is_closed() {
            return Err(ConsensusError::EngineClosed(self.partition));
        }

        self.state
            .reset_membership_as_follower(self.host.authoritative_membership());
        self.state.set_role(Role::Follower);
        self.restart_heartbeat_monitor().await;
        info!("{}: consensus engine started as follower", self.partition);
        Ok(())
    }

    /// Leader-originated traffic from the replication layer (heartbeat,
    /// prepare, commit) counts against the staleness window.
    pub fn record_heartbeat(&self) {
        self.state.record_heartbeat();
    }

    /// Externally-triggered demotion, owned by the embedding replica.
    pub async fn step_down(&self) {
        let _guard = self.transition.lock().await;
        if self.is_closed() || self.state.role() != Role::Leader {
            return;
        }
        info!("{}: stepping down from leader", self.partition);
        self.become_follower_locked().await;
    }

    /// Cancel both timers and refuse further work. Idempotent; must complete
    /// before the owning replica tears the partition down.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _guard = self.transition.lock().await;
        self.cancel_heartbeat_monitor().await;
        self.cancel_election_timer().await;
        info!("{}: consensus engine shut down", self.partition);
    }

    // ---- inbound message handlers ----

    /// Grant a vote iff the candidate's ballot is strictly ahead of ours;
    /// granting adopts the ballot and demotes us to Follower.
    pub async fn handle_vote_request(&self, request: VoteRequest) -> VoteResponse {
        let _guard = self.transition.lock().await;
        let local = self.state.ballot();
        let decision = request.ballot > local;

        if decision {
            debug!(
                "{}: granting vote for ballot {} (was {})",
                self.partition, request.ballot, local
            );
            self.state.update_ballot(request.ballot);
            self.become_follower_locked().await;
        } else {
            debug!(
                "{}: refusing vote for ballot {} (local {})",
                self.partition, request.ballot, local
            );
        }

        VoteResponse {
            err: ErrorCode::Ok,
            responder: self.host.self_address(),
            ballot: self.state.ballot(),
            decision,
        }
    }

    /// Tally a vote reply. Stale replies are discarded, ahead replies demote
    /// us, and a majority for the current ballot promotes us.
    pub async fn handle_vote_reply(&self, reply: VoteResponse) {
        if !reply.err.is_ok() {
            warn!(
                "{}: vote reply from {} carried error {:?}",
                self.partition, reply.responder, reply.err
            );
            return;
        }

        let _guard = self.transition.lock().await;
        if self.is_closed() {
            return;
        }
        let local = self.state.ballot();

        if reply.ballot < local {
            debug!(
                "{}: discarding stale vote reply at ballot {} (local {})",
                self.partition, reply.ballot, local
            );
            return;
        }

        if reply.ballot > local {
            // A peer is ahead of us; adopt its ballot and fall back.
            self.state.update_ballot(reply.ballot);
            self.become_follower_locked().await;
            return;
        }

        if self.state.role() != Role::Candidate || !reply.decision {
            return;
        }

        let votes = self.state.record_vote(reply.responder.clone());
        let majority = self.state.majority_count();
        if majority > 0 && votes >= majority {
            info!(
                "{}: vote majority reached ({votes}/{majority}), assuming leadership of ballot {local}",
                self.partition
            );
            self.become_leader_locked().await;
        }
    }

    /// Accept a leader's membership snapshot when its ballot is at least as
    /// new as ours; redelivery at the same ballot is an idempotent `Ok`.
    pub async fn handle_membership_update(
        &self,
        request: MembershipUpdateRequest,
    ) -> MembershipUpdateResponse {
        let _guard = self.transition.lock().await;
        let local = self.state.ballot();

        if request.ballot < local {
            warn!(
                "{}: rejecting membership update at stale ballot {} (local {})",
                self.partition, request.ballot, local
            );
            return MembershipUpdateResponse {
                partition: request.partition,
                err: ErrorCode::InvalidBallot,
            };
        }

        if request.ballot > local {
            self.state.update_ballot(request.ballot);
            // The sender is a live leader of a newer ballot.
            if self.state.role() != Role::Follower {
                self.become_follower_locked().await;
            }
        }

        self.state
            .reset_membership_as_follower(request.membership.clone());
        self.state.record_heartbeat();
        debug!(
            "{}: installed membership of {} members at ballot {}",
            self.partition,
            request.membership.len(),
            request.ballot
        );

        MembershipUpdateResponse {
            partition: request.partition,
            err: ErrorCode::Ok,
        }
    }

    // ---- timer callbacks ----

    async fn on_heartbeat_tick(&self) {
        let _guard = self.transition.lock().await;
        // A cancelled monitor may still have one tick in flight.
        if self.is_closed() || self.state.role() != Role::Follower {
            return;
        }

        if self.state.heartbeat_expired(Instant::now()) {
            info!(
                "{}: no heartbeat within {:?}, standing for election",
                self.partition,
                self.state.heartbeat_timeout()
            );
            self.become_candidate_locked().await;
        }
    }

    fn on_election_timeout(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let _guard = self.transition.lock().await;
            if self.is_closed() || self.state.role() != Role::Candidate {
                return;
            }
            debug!(
                "{}: election timed out without a majority, retrying",
                self.partition
            );
            self.run_election_round_locked().await;
        })
    }

    // ---- role transitions (caller holds the transition lock) ----

    async fn become_candidate_locked(&self) {
        self.state.set_role(Role::Candidate);
        self.cancel_heartbeat_monitor().await;
        self.run_election_round_locked().await;
    }

    async fn become_follower_locked(&self) {
        self.state.set_role(Role::Follower);
        self.cancel_election_timer().await;
        self.restart_heartbeat_monitor().await;
        debug!(
            "{}: now follower at ballot {}",
            self.partition,
            self.state.ballot()
        );
    }

    async fn become_leader_locked(&self) {
        self.state.set_role(Role::Leader);
        self.cancel_heartbeat_monitor().await;
        self.cancel_election_timer().await;

        let ballot = self.state.ballot();
        let mut membership = self.host.authoritative_membership();
        membership.leader = Some(self.host.self_address());
        self.state.reset_membership_as_leader(membership.clone());

        info!(
            "{}: became leader of ballot {} with {} members",
            self.partition,
            ballot,
            membership.len()
        );
        self.host.on_leader_promoted(ballot, &membership);
        self.install_membership_on_peers(ballot, membership);
    }

    /// One election attempt: fresh randomized timeout, new ballot, implicit
    /// self-vote, vote-request fanout, and a one-shot retry that doubles as
    /// the periodic re-election until a decision is reached.
    async fn run_election_round_locked(&self) {
        let timeout = self.state.next_election_timeout();

        if self.state.majority_count() == 0 {
            error!(
                "{}: cannot elect with an empty membership, retrying in {timeout:?}",
                self.partition
            );
            self.arm_election_retry(timeout).await;
            return;
        }

        let ballot = self.state.increment_and_get_ballot();
        let me = self.host.self_address();
        self.state.reset_votes(me.clone());

        let peers = self.state.peers_excluding(&me);
        if peers.is_empty() {
            // Single-node group: the self-vote already is the majority.
            info!(
                "{}: no peers to solicit, winning ballot {} uncontested",
                self.partition, ballot
            );
            self.become_leader_locked().await;
            return;
        }

        info!(
            "{}: soliciting votes for ballot {} from {} peers",
            self.partition,
            ballot,
            peers.len()
        );
        for peer in peers {
            self.spawn_vote_request(peer, ballot);
        }

        self.arm_election_retry(timeout).await;
    }

    // ---- timer and fanout plumbing ----

    async fn restart_heartbeat_monitor(&self) {
        let mut slot = self.heartbeat_monitor.lock().await;
        if let Some(old) = slot.take() {
            old.cancel().await;
        }
        if self.is_closed() {
            return;
        }

        let engine = self.self_ref.clone();
        *slot = Some(schedule_periodic(
            self.state.heartbeat_timeout(),
            move || {
                let engine = engine.clone();
                async move {
                    if let Some(engine) = engine.upgrade() {
                        engine.on_heartbeat_tick().await;
                    }
                }
            },
        ));
    }

    async fn cancel_heartbeat_monitor(&self) {
        if let Some(timer) = self.heartbeat_monitor.lock().await.take() {
            timer.cancel().await;
        }
    }

    async fn arm_election_retry(&self, timeout: Duration) {
        let mut slot = self.election_timer.lock().await;
        if let Some(old) = slot.take() {
            old.cancel().await;
        }
        if self.is_closed() {
            return;
        }

        let engine = self.self_ref.clone();
        *slot = Some(schedule_once(timeout, move || async move {
            if let Some(engine) = engine.upgrade() {
                engine.on_election_timeout().await;
            }
        }));
    }

    async fn cancel_election_timer(&self) {
        if let Some(timer) = self.election_timer.lock().await.take() {
            timer.cancel().await;
        }
    }

    fn spawn_vote_request(&self, peer: PeerAddr, ballot: Ballot) {
        let Some(engine) = self.self_ref.upgrade() else {
            return;
        };
        let transport = Arc::clone(&self.transport);
        let timeout = self.rpc_timeout;
        let request = Request::Vote(VoteRequest {
            partition: self.partition,
            ballot,
        });

        tokio::spawn(async move {
            match transport.send(&peer, request, timeout).await {
                Ok(Response::Vote(reply)) => engine.handle_vote_reply(reply).await,
                Ok(other) => error!(
                    "{}: peer {} answered a vote request with {:?}",
                    engine.partition, peer, other
                ),
                // A dead or slow peer is simply a missing vote; the election
                // timer takes care of the retry.
                Err(e) => warn!(
                    "{}: vote request to {} failed: {}",
                    engine.partition, peer, e
                ),
            }
        });
    }

    fn install_membership_on_peers(&self, ballot: Ballot, membership: Membership) {
        let me = self.host.self_address();
        for peer in membership.peers_excluding(&me) {
            let Some(engine) = self.self_ref.upgrade() else {
                return;
            };
            let transport = Arc::clone(&self.transport);
            let timeout = self.rpc_timeout;
            let request = Request::MembershipUpdate(MembershipUpdateRequest {
                partition: self.partition,
                ballot,
                membership: membership.clone(),
            });

            tokio::spawn(async move {
                match transport.send(&peer, request, timeout).await {
                    Ok(Response::MembershipUpdate(reply)) => {
                        engine.note_membership_update_reply(&peer, reply);
                    }
                    Ok(other) => error!(
                        "{}: peer {} answered a membership update with {:?}",
                        engine.partition, peer, other
                    ),
                    Err(e) => warn!(
                        "{}: membership update to {} failed: {}",
                        engine.partition, peer, e
                    ),
                }
            });
        }
    }

    /// A rejection means the peer already moved to a newer ballot; the next
    /// election settles it. Deliberately no retry.
    fn note_membership_update_reply(&self, peer: &PeerAddr, reply: MembershipUpdateResponse) {
        if reply.err.is_ok() {
            debug!("{}: {} installed the membership", self.partition, peer);
        } else {
            warn!(
                "{}: {} rejected the membership update: {:?}",
                self.partition, peer, reply.err
            );
        }
    }
}

#[async_trait]
impl RequestHandler for ConsensusEngine {
    async fn handle(&self, request: Request) -> Result<Response, TransportError> {
        if self.is_closed() {
            return Err(TransportError::HandlerClosed);
        }
        if request.partition() != self.partition {
            return Err(TransportError::UnknownPartition(request.partition()));
        }

        Ok(match request {
            Request::Vote(req) => Response::Vote(self.handle_vote_request(req).await),
            Request::MembershipUpdate(req) => {
                Response::MembershipUpdate(self.handle_membership_update(req).await)
            }
        })
    }
}
