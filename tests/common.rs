#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use quorum::transport::memory::MemoryNetwork;
use quorum::{
    Ballot, ConsensusConfig, ConsensusEngine, Host, Membership, PartitionId, PeerAddr, Role,
    INVALID_BALLOT,
};

pub const PARTITION: PartitionId = PartitionId { app_id: 1, index: 0 };

pub fn test_config() -> ConsensusConfig {
    ConsensusConfig {
        heartbeat_timeout_ms: 50,
        election_timeout_min_ms: 75,
        election_timeout_max_ms: 150,
        rpc_timeout_ms: 50,
    }
}

pub fn addr(port: u16) -> PeerAddr {
    PeerAddr::new("127.0.0.1", port)
}

/// Host backed by a fixed group configuration; records promotions so tests
/// can assert on the election history.
pub struct TestHost {
    addr: PeerAddr,
    membership: Membership,
    pub promotions: Mutex<Vec<(Ballot, Membership)>>,
}

impl TestHost {
    pub fn new(addr: PeerAddr, members: Vec<PeerAddr>) -> Arc<Self> {
        Arc::new(Self {
            addr,
            membership: Membership::new(members),
            promotions: Mutex::new(Vec::new()),
        })
    }
}

impl Host for TestHost {
    fn self_address(&self) -> PeerAddr {
        self.addr.clone()
    }

    fn authoritative_membership(&self) -> Membership {
        self.membership.clone()
    }

    fn current_ballot(&self) -> Ballot {
        INVALID_BALLOT
    }

    fn on_leader_promoted(&self, ballot: Ballot, membership: &Membership) {
        self.promotions
            .lock()
            .unwrap()
            .push((ballot, membership.clone()));
    }
}

pub struct TestNode {
    pub addr: PeerAddr,
    pub host: Arc<TestHost>,
    pub engine: Arc<ConsensusEngine>,
}

/// A group of engines wired together over the in-memory network.
pub struct TestCluster {
    pub network: MemoryNetwork,
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    pub fn new(size: u16) -> Self {
        Self::with_config(size, test_config())
    }

    pub fn with_config(size: u16, config: ConsensusConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let network = MemoryNetwork::new();
        let members: Vec<PeerAddr> = (0..size).map(|i| addr(9000 + i)).collect();
        let nodes = members
            .iter()
            .map(|node_addr| {
                let host = TestHost::new(node_addr.clone(), members.clone());
                let engine = ConsensusEngine::new(
                    PARTITION,
                    &config,
                    host.clone(),
                    Arc::new(network.clone()),
                );
                network.register(node_addr.clone(), engine.clone());
                TestNode {
                    addr: node_addr.clone(),
                    host,
                    engine,
                }
            })
            .collect();

        Self { network, nodes }
    }

    pub async fn start(&self) {
        for node in &self.nodes {
            node.engine.start().await.expect("engine start");
        }
    }

    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.engine.shutdown().await;
        }
    }

    pub fn leaders(&self) -> Vec<&TestNode> {
        self.nodes
            .iter()
            .filter(|node| node.engine.role() == Role::Leader)
            .collect()
    }

    /// All promotions observed anywhere in the cluster, as (node index,
    /// ballot) pairs in no particular order.
    pub fn all_promotions(&self) -> Vec<(usize, Ballot)> {
        self.nodes
            .iter()
            .enumerate()
            .flat_map(|(idx, node)| {
                node.host
                    .promotions
                    .lock()
                    .unwrap()
                    .iter()
                    .map(move |(ballot, _)| (idx, *ballot))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Poll until a snapshot shows exactly one leader with every other node
    /// a follower at the leader's ballot. Panics past the deadline.
    pub async fn wait_for_settled_leader(&self, deadline: Duration) -> usize {
        let start = tokio::time::Instant::now();
        loop {
            if let Some(idx) = self.settled_leader() {
                return idx;
            }
            assert!(
                start.elapsed() < deadline,
                "cluster did not settle on a single leader within {deadline:?}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn settled_leader(&self) -> Option<usize> {
        let leaders: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.engine.role() == Role::Leader)
            .map(|(idx, _)| idx)
            .collect();
        if leaders.len() != 1 {
            return None;
        }

        let leader = leaders[0];
        let leader_ballot = self.nodes[leader].engine.ballot();
        let settled = self.nodes.iter().enumerate().all(|(idx, node)| {
            idx == leader
                || (node.engine.role() == Role::Follower
                    && node.engine.ballot() == leader_ballot)
        });
        settled.then_some(leader)
    }
}
