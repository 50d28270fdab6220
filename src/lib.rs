// Core consensus modules
pub mod common;
pub mod config;
pub mod consensus;

// Wire format and peer communication
pub mod transport;
pub mod wire;

// Public exports
pub use common::{Ballot, Membership, PartitionId, PeerAddr, INVALID_BALLOT};
pub use config::ConsensusConfig;
pub use consensus::{ConsensusEngine, ConsensusError, EngineRegistry, Host, Role};
