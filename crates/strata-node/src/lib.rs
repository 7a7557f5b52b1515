//! Strata Node -- library crate for block gossip and catch-up.
//!
//! Re-exports all internal modules so integration tests and main.rs can
//! reach the peer manager, request handlers, ingest and catch-up tasks.

pub mod catchup_task;
pub mod config;
pub mod connection;
pub mod ingest;
pub mod inventory;
pub mod node;
pub mod peer;
pub mod peer_manager;
pub mod serve;
pub mod sync;
pub mod tip_task;

pub use node::Node;

use std::path::PathBuf;

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs_or_home() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn dirs_or_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path.db"), PathBuf::from("/abs/path.db"));
        assert_eq!(expand_tilde("rel.db"), PathBuf::from("rel.db"));
        if let Some(home) = dirs_or_home() {
            assert_eq!(expand_tilde("~/x/y.toml"), home.join("x/y.toml"));
        }
    }
}
