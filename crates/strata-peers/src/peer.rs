//! Peer records and the connection state machine.
//!
//! `Offline -> Connecting -> Online` for dials, `Offline -> Online` for
//! accepted connections, and back to `Offline` on error or stop.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use strata_protocol::{NetworkId, CURRENT_PARAMS};

use crate::PeerError;

/// Quality score bound in both directions.
pub const MAX_QUALITY: i32 = 2_147_483_000;

/// Listen port advertised by peers that cannot be dialled.
pub const UNDIALABLE_PORT: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    Offline,
    Connecting,
    Online,
}

impl PeerState {
    pub fn name(&self) -> &'static str {
        match self {
            PeerState::Offline => "offline",
            PeerState::Connecting => "connecting",
            PeerState::Online => "online",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerType {
    Regular,
    /// Listed in the config file.
    SpecialConfig,
    /// Given on the command line.
    SpecialCmdLine,
}

impl PeerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerType::Regular => "regular",
            PeerType::SpecialConfig => "special_config",
            PeerType::SpecialCmdLine => "special_cmdline",
        }
    }

    pub fn is_special(&self) -> bool {
        matches!(self, PeerType::SpecialConfig | PeerType::SpecialCmdLine)
    }
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// Locally generated id: `"address:port <random hex>"`.
    pub hash: String,
    pub address: String,
    /// Remote port of the connection (or the configured port for dials).
    pub port: String,
    /// Port the peer says it listens on.
    pub listen_port: String,
    pub node_id: u64,
    pub peer_type: PeerType,
    pub outgoing: bool,
    pub quality_score: i32,
    pub network: NetworkId,
    state: PeerState,
    pub connection_attempt: Option<Instant>,
    pub connection_attempts: u32,
    pub last_contact: Option<Instant>,
    /// When we last asked this peer for addresses.
    pub last_peer_request: Option<Instant>,
    /// When we last answered this peer's request for addresses.
    pub last_peer_send: Option<Instant>,
    awaiting_peer_response: bool,
}

impl PeerRecord {
    pub fn new(
        address: &str,
        port: &str,
        listen_port: &str,
        peer_type: PeerType,
        outgoing: bool,
        network: NetworkId,
    ) -> Self {
        let suffix: u64 = rand::thread_rng().gen();
        Self {
            hash: format!("{address}:{port} {suffix:016x}"),
            address: address.to_string(),
            port: port.to_string(),
            listen_port: listen_port.to_string(),
            node_id: 0,
            peer_type,
            outgoing,
            quality_score: 0,
            network,
            state: PeerState::Offline,
            connection_attempt: None,
            connection_attempts: 0,
            last_contact: None,
            last_peer_request: None,
            last_peer_send: None,
            awaiting_peer_response: false,
        }
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn is_online(&self) -> bool {
        self.state == PeerState::Online
    }

    pub fn is_offline(&self) -> bool {
        self.state == PeerState::Offline
    }

    pub fn can_dial(&self) -> bool {
        !self.listen_port.is_empty() && self.listen_port != UNDIALABLE_PORT
    }

    pub fn is_special(&self) -> bool {
        self.peer_type.is_special()
    }

    pub fn peer_type_string(&self) -> &'static str {
        self.peer_type.as_str()
    }

    /// `address:listen_port`, the address to dial.
    pub fn dial_address(&self) -> String {
        format!("{}:{}", self.address, self.listen_port)
    }

    /// Short form for log lines.
    pub fn ident(&self) -> String {
        let short: String = self.hash.chars().take(12).collect();
        format!("{short}-{}:{}", self.address, self.port)
    }

    /// Begin a dial. Counts the attempt.
    pub fn mark_connecting(&mut self, now: Instant) -> Result<(), PeerError> {
        if !self.can_dial() {
            return Err(PeerError::NotDialable(self.hash.clone()));
        }
        self.outgoing = true;
        self.state = PeerState::Connecting;
        self.connection_attempt = Some(now);
        self.connection_attempts += 1;
        Ok(())
    }

    /// Connection established, by dial or by accept.
    pub fn mark_online(&mut self, now: Instant) {
        self.state = PeerState::Online;
        self.connection_attempts = 0;
        self.last_contact = Some(now);
    }

    /// Connection lost or dial failed. The attempt count is kept for backoff.
    pub fn mark_offline(&mut self) {
        self.state = PeerState::Offline;
    }

    /// Explicit stop: offline with the attempt count cleared.
    pub fn mark_stopped(&mut self) {
        self.state = PeerState::Offline;
        self.connection_attempts = 0;
    }

    pub fn check_sendable(&self) -> Result<(), PeerError> {
        match self.state {
            PeerState::Online => Ok(()),
            other => Err(PeerError::NotOnline {
                hash: self.hash.clone(),
                state: other.name(),
            }),
        }
    }

    /// Apply the listen port and node id a parcel header advertises.
    /// Returns true if either changed.
    pub fn update_advertised(&mut self, listen_port: &str, node_id: u64, now: Instant) -> bool {
        self.last_contact = Some(now);
        let mut changed = false;
        if !listen_port.is_empty() && listen_port != self.listen_port {
            tracing::debug!(
                peer = %self.ident(),
                old = %self.listen_port,
                new = listen_port,
                "peer: listen port changed"
            );
            self.listen_port = listen_port.to_string();
            changed = true;
        }
        if node_id != self.node_id {
            tracing::debug!(
                peer = %self.ident(),
                old = self.node_id,
                new = node_id,
                "peer: node id changed"
            );
            self.node_id = node_id;
            changed = true;
        }
        changed
    }

    pub fn merit(&mut self) {
        if self.quality_score < MAX_QUALITY {
            self.quality_score += 1;
        }
    }

    /// Intentionally inert: repeated failures carry no lasting penalty.
    pub fn demerit(&mut self) {}

    pub fn adjust_quality(&mut self, delta: i32) {
        self.quality_score = self
            .quality_score
            .saturating_add(delta)
            .clamp(-MAX_QUALITY, MAX_QUALITY);
    }

    /// Delay before the next dial: min(2^attempts * base, max), zero before
    /// the first failure.
    pub fn dial_backoff(&self) -> Duration {
        dial_backoff(self.connection_attempts)
    }

    pub fn is_dial_due(&self, now: Instant) -> bool {
        match self.connection_attempt {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.dial_backoff(),
        }
    }

    /// Rate limit on the peer's requests for our addresses. Accepting stamps
    /// `last_peer_send`.
    pub fn accept_peer_request(&mut self, now: Instant, interval: Duration) -> bool {
        let allowed = self
            .last_peer_send
            .map_or(true, |t| now.saturating_duration_since(t) >= interval);
        if allowed {
            self.last_peer_send = Some(now);
        }
        allowed
    }

    /// Whether it is time to ask this peer for addresses again.
    pub fn peer_request_due(&self, now: Instant, interval: Duration) -> bool {
        self.last_peer_request
            .map_or(true, |t| now.saturating_duration_since(t) >= interval)
    }

    pub fn mark_peer_request_sent(&mut self, now: Instant) {
        self.last_peer_request = Some(now);
        self.awaiting_peer_response = true;
    }

    /// Accept one response per request sent; anything else is unsolicited.
    pub fn accept_peer_response(&mut self) -> bool {
        std::mem::replace(&mut self.awaiting_peer_response, false)
    }
}

pub fn dial_backoff(attempts: u32) -> Duration {
    if attempts == 0 {
        return Duration::ZERO;
    }
    let p = CURRENT_PARAMS;
    let secs = p
        .dial_backoff_base_secs
        .saturating_mul(1u64 << attempts.min(p.dial_backoff_saturation));
    Duration::from_secs(secs.min(p.dial_backoff_max_secs))
}
