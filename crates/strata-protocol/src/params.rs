//! Protocol parameters -- the timing and sizing constants peers agree on.
//!
//! Node-local choices (fanout, connection limits, listen address) live in the
//! node config, not here.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolParams {
    /// Parameter set identifier. Monotonically increasing.
    pub id: u16,

    // -- Catch-up --
    /// Maximum distance between the catch-up floor and ceiling.
    pub catchup_window: u32,
    /// Maximum heights per range request.
    pub catchup_ask_limit: u32,
    /// Seconds before an unanswered height may be requested again.
    pub catchup_timeout_secs: u64,
    /// Heights kept below the known tip so unfinished blocks are not asked for.
    pub catchup_margin: u32,
    /// Ceiling re-evaluation period in milliseconds.
    pub catchup_raise_interval_ms: u64,
    /// Batch send period in milliseconds.
    pub catchup_send_interval_ms: u64,
    /// Seconds between diagnostic dumps of the window.
    pub catchup_dump_interval_secs: u64,

    // -- Serving --
    /// Maximum directory block hashes answered per getdirblocks.
    pub max_blocks_per_msg: usize,
    /// Maximum inventory vectors per message.
    pub max_inv_per_msg: usize,
    /// Seconds to wait before prompting a continuation request.
    pub continue_delay_secs: u64,

    // -- Peers --
    /// Minimum seconds between accepted peer requests from one peer.
    pub peer_request_interval_secs: u64,
    /// Maximum addresses in one peer share.
    pub peer_share_max: usize,
    /// Base dial backoff in seconds: min(2^attempts * base, max).
    pub dial_backoff_base_secs: u64,
    /// Maximum dial backoff in seconds.
    pub dial_backoff_max_secs: u64,
    /// Attempt count beyond which the backoff exponent stops growing.
    pub dial_backoff_saturation: u32,
    /// Seconds an address must wait between accepted inbound connections.
    pub source_limit_secs: u64,

    // -- Transport --
    /// Maximum frame size in bytes.
    pub max_message_bytes: usize,
    /// Outbound parcels queued per peer before senders wait.
    pub outbound_queue_depth: usize,
    /// Hashes remembered per peer as already known to it.
    pub known_inventory_cap: usize,
}

pub const PARAMS_V1: ProtocolParams = ProtocolParams {
    id: 1,

    catchup_window: 2000,
    catchup_ask_limit: 10,
    catchup_timeout_secs: 30,
    catchup_margin: 2,
    catchup_raise_interval_ms: 1000,
    catchup_send_interval_ms: 1000,
    catchup_dump_interval_secs: 15,

    max_blocks_per_msg: 500,
    max_inv_per_msg: 50_000,
    continue_delay_secs: 5,

    peer_request_interval_secs: 180,
    peer_share_max: 32,
    dial_backoff_base_secs: 5,
    dial_backoff_max_secs: 600,
    dial_backoff_saturation: 7,
    source_limit_secs: 1,

    max_message_bytes: 16 * 1024 * 1024,
    outbound_queue_depth: 512,
    known_inventory_cap: 1000,
};

pub const CURRENT_PARAMS: &ProtocolParams = &PARAMS_V1;
