//! Strata Peers -- peer records, connection state machine, admission and
//! selection.
//!
//! Pure state. The node crate owns sockets and tasks; everything here is
//! driven by explicit `Instant`s so it can be tested without a runtime.

pub mod admission;
pub mod book;
pub mod limiter;
pub mod peer;
pub mod select;

pub use admission::{AdmissionPolicy, ConnectionPolicy};
pub use book::PeerBook;
pub use limiter::SourceLimiter;
pub use peer::{PeerRecord, PeerState, PeerType, MAX_QUALITY, UNDIALABLE_PORT};
pub use select::{dial_candidates, pick_one, select_random, sort_by_quality};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    #[error("peer {0} has no dialable listen port")]
    NotDialable(String),
    #[error("peer {hash} is {state}, not online")]
    NotOnline { hash: String, state: &'static str },
    #[error("inbound limit reached ({limit})")]
    OutgoingLimit { limit: usize },
    #[error("incoming connection limit reached ({limit})")]
    IncomingLimit { limit: usize },
    #[error("refused by policy (refuse_incoming={refuse_incoming}, refuse_unknown={refuse_unknown})")]
    RefusedByPolicy {
        refuse_incoming: bool,
        refuse_unknown: bool,
    },
    #[error("address {0} connected too recently")]
    RateLimited(String),
    #[error("unknown peer {0}")]
    UnknownPeer(String),
    #[error("no online peers")]
    NoOnlinePeers,
    #[error("connection to {0} closed")]
    Disconnected(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
