//! Runtime peer: the bookkeeping record plus its live connection.
//!
//! A peer holds at most one connection; attaching a new one drops the old,
//! which stops its task.

use std::time::Instant;

use tokio::sync::mpsc;

use strata_blocks::Hash;
use strata_peers::book::Indexed;
use strata_peers::{PeerError, PeerRecord};
use strata_protocol::{InvVect, Parcel};

use crate::connection::{Connection, Outbound};
use crate::inventory::KnownInventory;

#[derive(Debug)]
pub struct Peer {
    pub record: PeerRecord,
    conn: Option<Connection>,
    known: KnownInventory,
    /// (begin, stop) of the last getdirblocks we sent this peer.
    last_get_dir_blocks: Option<(Hash, Hash)>,
    /// Last hash of a getdirblocks answer we truncated for this peer.
    continue_hash: Option<Hash>,
}

impl Indexed for Peer {
    fn hash(&self) -> &str {
        &self.record.hash
    }

    fn address(&self) -> &str {
        &self.record.address
    }
}

impl Peer {
    pub fn new(record: PeerRecord, known_cap: usize) -> Self {
        Self {
            record,
            conn: None,
            known: KnownInventory::new(known_cap),
            last_get_dir_blocks: None,
            continue_hash: None,
        }
    }

    pub fn connection_id(&self) -> Option<u64> {
        self.conn.as_ref().map(|c| c.id())
    }

    /// Begin an outbound dial, tearing down any existing link. Returns the
    /// address to dial.
    pub fn begin_dial(&mut self, now: Instant) -> Result<String, PeerError> {
        self.record.mark_connecting(now)?;
        self.conn = None;
        Ok(self.record.dial_address())
    }

    /// Take over a live connection, dial or accept.
    pub fn attach(&mut self, conn: Connection, now: Instant) {
        self.conn = Some(conn);
        self.record.mark_online(now);
        self.last_get_dir_blocks = None;
        self.continue_hash = None;
    }

    pub fn go_offline(&mut self) {
        self.conn = None;
        self.record.mark_offline();
    }

    pub fn stop(&mut self) {
        self.conn = None;
        self.record.mark_stopped();
    }

    /// Outbound queue of the live connection; only online peers accept sends.
    pub fn sender(&self) -> Result<mpsc::Sender<Outbound>, PeerError> {
        self.record.check_sendable()?;
        self.conn
            .as_ref()
            .map(|c| c.sender())
            .ok_or_else(|| PeerError::Disconnected(self.record.hash.clone()))
    }

    /// Fill in our identity on a parcel bound for this peer.
    pub fn stamp(parcel: &mut Parcel, node_id: u64, listen_port: &str) {
        parcel.header.node_id = node_id;
        parcel.header.peer_port = listen_port.to_string();
    }

    pub fn mark_known(&mut self, iv: InvVect) -> bool {
        self.known.insert(iv)
    }

    pub fn knows(&self, iv: &InvVect) -> bool {
        self.known.contains(iv)
    }

    /// Record an outgoing getdirblocks. False if it repeats the previous one.
    pub fn record_get_dir_blocks(&mut self, begin: Hash, stop: Hash) -> bool {
        if self.last_get_dir_blocks == Some((begin, stop)) {
            return false;
        }
        self.last_get_dir_blocks = Some((begin, stop));
        true
    }

    pub fn set_continue_hash(&mut self, hash: Option<Hash>) {
        self.continue_hash = hash;
    }

    /// Clear and report the continuation marker if `hash` is it.
    pub fn take_continue_hash(&mut self, hash: &Hash) -> bool {
        if self.continue_hash.as_ref() == Some(hash) {
            self.continue_hash = None;
            return true;
        }
        false
    }
}
