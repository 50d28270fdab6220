use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::debug;

use super::engine::ConsensusEngine;
use super::error::ConsensusError;
use crate::common::PartitionId;
use crate::transport::{RequestHandler, TransportError};
use crate::wire::{Request, Response};

/// Routes inbound consensus requests to the engine owning the target
/// partition. One registry per replica server process; partitions register
/// when they open and deregister when they close.
#[derive(Default)]
pub struct EngineRegistry {
    engines: RwLock<HashMap<PartitionId, Arc<ConsensusEngine>>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, engine: Arc<ConsensusEngine>) -> Result<(), ConsensusError> {
        let partition = engine.partition();
        let mut engines = self.engines.write().unwrap();
        match engines.entry(partition) {
            Entry::Occupied(_) => Err(ConsensusError::DuplicatePartition(partition)),
            Entry::Vacant(slot) => {
                debug!("registered consensus engine for partition {partition}");
                slot.insert(engine);
                Ok(())
            }
        }
    }

    pub fn deregister(&self, partition: PartitionId) -> Option<Arc<ConsensusEngine>> {
        self.engines.write().unwrap().remove(&partition)
    }

    pub fn get(&self, partition: PartitionId) -> Option<Arc<ConsensusEngine>> {
        self.engines.read().unwrap().get(&partition).cloned()
    }

    pub fn len(&self) -> usize {
        self.engines.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.read().unwrap().is_empty()
    }
}

#[async_trait]
impl RequestHandler for EngineRegistry {
    async fn handle(&self, request: Request) -> Result<Response, TransportError> {
        let partition = request.partition();
        let engine = self
            .get(partition)
            .ok_or(TransportError::UnknownPartition(partition))?;
        engine.handle(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Ballot, Membership, PeerAddr, INVALID_BALLOT};
    use crate::config::ConsensusConfig;
    use crate::consensus::Host;
    use crate::transport::memory::MemoryNetwork;
    use crate::wire::VoteRequest;

    struct NullHost {
        addr: PeerAddr,
    }

    impl Host for NullHost {
        fn self_address(&self) -> PeerAddr {
            self.addr.clone()
        }

        fn authoritative_membership(&self) -> Membership {
            Membership::new(vec![self.addr.clone()])
        }

        fn current_ballot(&self) -> Ballot {
            INVALID_BALLOT
        }

        fn on_leader_promoted(&self, _ballot: Ballot, _membership: &Membership) {}
    }

    fn engine(partition: PartitionId, port: u16) -> Arc<ConsensusEngine> {
        ConsensusEngine::new(
            partition,
            &ConsensusConfig::default(),
            Arc::new(NullHost {
                addr: PeerAddr::new("127.0.0.1", port),
            }),
            Arc::new(MemoryNetwork::new()),
        )
    }

    #[tokio::test]
    async fn registers_routes_and_deregisters() {
        let registry = EngineRegistry::new();
        let p1 = PartitionId::new(1, 0);
        let p2 = PartitionId::new(1, 1);
        registry.register(engine(p1, 6001)).expect("register p1");
        registry.register(engine(p2, 6002)).expect("register p2");
        assert_eq!(registry.len(), 2);

        let response = registry
            .handle(Request::Vote(VoteRequest {
                partition: p2,
                ballot: 1,
            }))
            .await
            .expect("routed");
        match response {
            Response::Vote(reply) => {
                assert_eq!(reply.responder, PeerAddr::new("127.0.0.1", 6002))
            }
            other => panic!("unexpected response {other:?}"),
        }

        assert!(registry.deregister(p1).is_some());
        let result = registry
            .handle(Request::Vote(VoteRequest {
                partition: p1,
                ballot: 1,
            }))
            .await;
        assert!(matches!(
            result,
            Err(TransportError::UnknownPartition(p)) if p == p1
        ));
    }

    #[tokio::test]
    async fn duplicate_partition_is_rejected() {
        let registry = EngineRegistry::new();
        let partition = PartitionId::new(2, 0);
        registry
            .register(engine(partition, 6003))
            .expect("first registration");

        let result = registry.register(engine(partition, 6004));
        assert!(matches!(
            result,
            Err(ConsensusError::DuplicatePartition(p)) if p == partition
        ));
    }
}
