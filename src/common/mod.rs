pub mod address;
pub mod partition;

pub use address::{AddressParseError, PeerAddr};
pub use partition::{Ballot, Membership, PartitionId, INVALID_BALLOT};
