//! Admission of inbound connections and the dial policy.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::PeerError;

/// Configured connection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionPolicy {
    /// Accept and dial anyone.
    #[default]
    Normal,
    /// Accept anyone, dial only special peers.
    Accept,
    /// Refuse all inbound, dial only special peers.
    Refuse,
}

#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    /// Outgoing connection target. Inbound connections are also refused once
    /// the outgoing count reaches it.
    pub max_outgoing: usize,
    pub max_incoming: usize,
    pub refuse_incoming: bool,
    pub refuse_unknown: bool,
    /// Dial special peers only.
    pub trusted_only: bool,
    /// Addresses of configured special peers; always admitted.
    pub special_addresses: HashSet<String>,
}

impl AdmissionPolicy {
    pub fn new(policy: ConnectionPolicy, max_outgoing: usize, max_incoming: usize) -> Self {
        let (refuse_incoming, trusted_only) = match policy {
            ConnectionPolicy::Normal => (false, false),
            ConnectionPolicy::Accept => (false, true),
            ConnectionPolicy::Refuse => (true, true),
        };
        Self {
            max_outgoing,
            max_incoming,
            refuse_incoming,
            refuse_unknown: false,
            trusted_only,
            special_addresses: HashSet::new(),
        }
    }

    pub fn is_special_address(&self, address: &str) -> bool {
        self.special_addresses.contains(address)
    }

    /// Decide whether to keep an inbound connection from `address` given the
    /// current online counts.
    ///
    /// `known` is whether the address is already in the peer book.
    pub fn check_incoming(
        &self,
        address: &str,
        known: bool,
        outgoing: usize,
        incoming: usize,
    ) -> Result<(), PeerError> {
        if self.is_special_address(address) {
            return Ok(());
        }
        if outgoing >= self.max_outgoing {
            return Err(PeerError::OutgoingLimit {
                limit: self.max_outgoing,
            });
        }
        if incoming >= self.max_incoming {
            return Err(PeerError::IncomingLimit {
                limit: self.max_incoming,
            });
        }
        if self.refuse_incoming || (self.refuse_unknown && !known) {
            return Err(PeerError::RefusedByPolicy {
                refuse_incoming: self.refuse_incoming,
                refuse_unknown: self.refuse_unknown,
            });
        }
        Ok(())
    }

    /// Whether a peer of this kind may be dialled under the policy.
    pub fn may_dial(&self, special: bool) -> bool {
        !self.trusted_only || special
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_flags() {
        let n = AdmissionPolicy::new(ConnectionPolicy::Normal, 8, 8);
        assert!(!n.refuse_incoming && !n.trusted_only);
        let a = AdmissionPolicy::new(ConnectionPolicy::Accept, 8, 8);
        assert!(!a.refuse_incoming && a.trusted_only);
        let r = AdmissionPolicy::new(ConnectionPolicy::Refuse, 8, 8);
        assert!(r.refuse_incoming && r.trusted_only);
    }

    #[test]
    fn test_outgoing_count_gates_inbound() {
        let p = AdmissionPolicy::new(ConnectionPolicy::Normal, 2, 10);
        p.check_incoming("10.0.0.1", false, 1, 0).unwrap();
        assert_eq!(
            p.check_incoming("10.0.0.1", false, 2, 0),
            Err(PeerError::OutgoingLimit { limit: 2 })
        );
    }

    #[test]
    fn test_incoming_cap() {
        let p = AdmissionPolicy::new(ConnectionPolicy::Normal, 8, 3);
        assert_eq!(
            p.check_incoming("10.0.0.1", false, 0, 3),
            Err(PeerError::IncomingLimit { limit: 3 })
        );
    }

    #[test]
    fn test_special_always_admitted() {
        let mut p = AdmissionPolicy::new(ConnectionPolicy::Refuse, 0, 0);
        p.special_addresses.insert("10.0.0.7".into());
        p.check_incoming("10.0.0.7", false, 5, 5).unwrap();
        assert!(p.check_incoming("10.0.0.8", false, 0, 0).is_err());
    }

    #[test]
    fn test_refuse_unknown() {
        let mut p = AdmissionPolicy::new(ConnectionPolicy::Normal, 8, 8);
        p.refuse_unknown = true;
        assert!(matches!(
            p.check_incoming("10.0.0.1", false, 0, 0),
            Err(PeerError::RefusedByPolicy { .. })
        ));
        p.check_incoming("10.0.0.1", true, 0, 0).unwrap();
    }

    #[test]
    fn test_may_dial() {
        let p = AdmissionPolicy::new(ConnectionPolicy::Accept, 8, 8);
        assert!(p.may_dial(true));
        assert!(!p.may_dial(false));
        assert!(AdmissionPolicy::new(ConnectionPolicy::Normal, 8, 8).may_dial(false));
    }

    #[test]
    fn test_policy_from_toml_name() {
        let p: ConnectionPolicy = serde_json::from_str("\"REFUSE\"").unwrap();
        assert_eq!(p, ConnectionPolicy::Refuse);
    }
}
