use thiserror::Error;

use crate::common::PartitionId;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("partition {0} is already registered")]
    DuplicatePartition(PartitionId),

    #[error("engine for partition {0} is shut down")]
    EngineClosed(PartitionId),
}
