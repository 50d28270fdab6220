mod engine;
mod error;
mod host;
mod registry;
mod state;
pub mod timer;

pub use self::engine::ConsensusEngine;
pub use self::error::ConsensusError;
pub use self::host::Host;
pub use self::registry::EngineRegistry;
pub use self::state::{ConsensusState, HeartbeatClock, Role};
