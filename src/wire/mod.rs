pub mod codec;

use serde::{Deserialize, Serialize};

use crate::common::{Ballot, Membership, PartitionId, PeerAddr};

// Message types exchanged between consensus peers. Flat structures with a
// fixed field order; framing is handled by the codec module.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Ok,
    InvalidBallot,
}

impl ErrorCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, ErrorCode::Ok)
    }
}

/// Candidate's request for a vote on a self-proposed ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub partition: PartitionId,
    pub ballot: Ballot,
}

/// Reply to a vote request. On refusal the echoed ballot tells a stale
/// candidate how far behind it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub err: ErrorCode,
    pub responder: PeerAddr,
    pub ballot: Ballot,
    pub decision: bool,
}

/// Leader's membership snapshot pushed to every follower after promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipUpdateRequest {
    pub partition: PartitionId,
    pub ballot: Ballot,
    pub membership: Membership,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipUpdateResponse {
    pub partition: PartitionId,
    pub err: ErrorCode,
}

/// Envelope for inbound dispatch and transport framing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Vote(VoteRequest),
    MembershipUpdate(MembershipUpdateRequest),
}

impl Request {
    pub fn partition(&self) -> PartitionId {
        match self {
            Request::Vote(req) => req.partition,
            Request::MembershipUpdate(req) => req.partition,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Vote(VoteResponse),
    MembershipUpdate(MembershipUpdateResponse),
}
