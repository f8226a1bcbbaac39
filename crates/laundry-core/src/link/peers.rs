//! Fixed table of peers the link may send to.

use heapless::Vec;

use super::{MacAddress, PeerDescriptor, PeerRejection};

/// Maximum number of peers the broadcast link can address (ESP-NOW limit).
pub const MAX_PEERS: usize = 20;

/// Fixed-capacity table of configured peers.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: Vec<PeerDescriptor, MAX_PEERS>,
}

impl PeerTable {
    pub const fn new() -> Self {
        Self { peers: Vec::new() }
    }

    /// Add a peer.
    ///
    /// Returns `Ok(false)` when the address is already registered; the stored
    /// descriptor is left untouched in that case.
    pub fn insert(&mut self, peer: PeerDescriptor) -> Result<bool, PeerRejection> {
        if !peer.address.is_valid_peer() {
            return Err(PeerRejection::InvalidAddress(peer.address));
        }

        if self.contains(&peer.address) {
            return Ok(false);
        }

        self.peers
            .push(peer)
            .map_err(|_| PeerRejection::TableFull)?;
        Ok(true)
    }

    pub fn remove(&mut self, address: &MacAddress) -> Option<PeerDescriptor> {
        let index = self.peers.iter().position(|p| &p.address == address)?;
        Some(self.peers.swap_remove(index))
    }

    pub fn contains(&self, address: &MacAddress) -> bool {
        self.get(address).is_some()
    }

    pub fn get(&self, address: &MacAddress) -> Option<&PeerDescriptor> {
        self.peers.iter().find(|p| &p.address == address)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.peers.is_full()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerDescriptor> {
        self.peers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(last: u8) -> PeerDescriptor {
        PeerDescriptor::new(MacAddress::new([0x94, 0xB9, 0x7E, 0xFA, 0x5A, last]), None)
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut table = PeerTable::new();

        assert_eq!(table.insert(peer(1)), Ok(true));
        assert_eq!(table.insert(peer(1)), Ok(false));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_rejects_invalid_addresses() {
        let mut table = PeerTable::new();

        let zero = PeerDescriptor::new(MacAddress::new([0; 6]), None);
        assert_eq!(
            table.insert(zero),
            Err(PeerRejection::InvalidAddress(MacAddress::new([0; 6])))
        );

        let multicast = MacAddress::new([0x01, 0x00, 0x5E, 0x00, 0x00, 0x01]);
        assert!(table.insert(PeerDescriptor::new(multicast, None)).is_err());

        assert_eq!(
            table.insert(PeerDescriptor::new(MacAddress::BROADCAST, None)),
            Ok(true)
        );
    }

    #[test]
    fn test_table_full() {
        let mut table = PeerTable::new();
        for i in 0..MAX_PEERS as u8 {
            table.insert(peer(i)).unwrap();
        }

        assert!(table.is_full());
        assert_eq!(table.insert(peer(0xEE)), Err(PeerRejection::TableFull));
        // Re-registering an existing peer still succeeds when full
        assert_eq!(table.insert(peer(3)), Ok(false));
    }

    #[test]
    fn test_remove() {
        let mut table = PeerTable::new();
        table.insert(peer(1)).unwrap();
        table.insert(peer(2)).unwrap();

        assert!(table.remove(&peer(1).address).is_some());
        assert!(!table.contains(&peer(1).address));
        assert!(table.contains(&peer(2).address));
    }
}
