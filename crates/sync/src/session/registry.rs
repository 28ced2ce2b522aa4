use std::collections::HashMap;
use std::net::SocketAddr;

use crate::error::{NetError, NetResult};
use crate::history::FrameHistory;
use crate::net::{EntityId, PeerId, Transform};

pub const FULL_HEALTH: f32 = 1.0;

/// Stable index of a client in the registry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u32);

impl SlotId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct ConnectedClient {
    pub id: EntityId,
    pub peer: PeerId,
    pub reliable_addr: SocketAddr,
    pub unreliable_addr: SocketAddr,
    pub last_known_frame: Option<u32>,
    /// Transform reported for `last_known_frame`, kept after that frame
    /// leaves the history window.
    pub last_transform: Option<Transform>,
    pub health: f32,
    pub history: FrameHistory,
}

impl ConnectedClient {
    /// Only ever moves forward. A repeat of the newest frame replaces its
    /// transform.
    pub fn observe(&mut self, frame: u32, transform: Transform) {
        if self.last_known_frame.is_none_or(|known| frame >= known) {
            self.last_known_frame = Some(frame);
            self.last_transform = Some(transform);
        }
    }

    /// Newest transform this client reported, however old its frame is.
    pub fn latest_transform(&self) -> Option<Transform> {
        self.last_transform
    }

    /// Transform at the newest validated frame no later than `frame`, or the
    /// last known one when the window holds nothing that old.
    pub fn transform_at_or_before(&self, frame: u32) -> Option<Transform> {
        self.history
            .last_valid_frame_at_or_before(frame)
            .and_then(|valid| self.history.transform_at(valid))
            .or(self.last_transform)
    }

    pub fn damage(&mut self, amount: f32) -> bool {
        self.health -= amount;
        self.health <= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    New(SlotId),
    Replaced { slot: SlotId, previous_peer: PeerId },
}

impl Registration {
    pub fn slot(&self) -> SlotId {
        match *self {
            Registration::New(slot) | Registration::Replaced { slot, .. } => slot,
        }
    }

    pub fn is_replacement(&self) -> bool {
        matches!(self, Registration::Replaced { .. })
    }
}

/// Registered clients in a dense slot arena, looked up by identifier or by
/// reliable peer.
#[derive(Debug)]
pub struct ClientRegistry {
    slots: Vec<Option<ConnectedClient>>,
    free: Vec<u32>,
    by_id: HashMap<EntityId, SlotId>,
    by_peer: HashMap<PeerId, SlotId>,
    history_window: u32,
}

impl ClientRegistry {
    pub fn new(history_window: u32) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_id: HashMap::new(),
            by_peer: HashMap::new(),
            history_window,
        }
    }

    /// Registers a client. A second registration with the same identifier
    /// overwrites the first and starts a fresh history.
    pub fn register(
        &mut self,
        id: EntityId,
        peer: PeerId,
        reliable_addr: SocketAddr,
        unreliable_addr: SocketAddr,
        current_frame: u32,
    ) -> Registration {
        let client = ConnectedClient {
            id,
            peer,
            reliable_addr,
            unreliable_addr,
            last_known_frame: None,
            last_transform: None,
            health: FULL_HEALTH,
            history: FrameHistory::new(self.history_window, current_frame),
        };

        if let Some(&slot) = self.by_id.get(&id) {
            let previous_peer = self.slots[slot.index()]
                .as_ref()
                .map_or(peer, |old| old.peer);
            self.by_peer.remove(&previous_peer);
            self.by_peer.insert(peer, slot);
            self.slots[slot.index()] = Some(client);
            return Registration::Replaced {
                slot,
                previous_peer,
            };
        }

        // A peer re-registering under a new identifier drops its old record.
        if let Some(old) = self.by_peer.get(&peer).copied() {
            self.release(old);
        }

        let slot = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(client);
                SlotId(index)
            }
            None => {
                self.slots.push(Some(client));
                SlotId(self.slots.len() as u32 - 1)
            }
        };

        self.by_id.insert(id, slot);
        self.by_peer.insert(peer, slot);
        Registration::New(slot)
    }

    fn release(&mut self, slot: SlotId) -> Option<ConnectedClient> {
        let client = self.slots.get_mut(slot.index())?.take()?;
        self.by_id.remove(&client.id);
        self.by_peer.remove(&client.peer);
        self.free.push(slot.0);
        Some(client)
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<ConnectedClient> {
        let slot = *self.by_id.get(id)?;
        self.release(slot)
    }

    pub fn remove_by_peer(&mut self, peer: PeerId) -> Option<ConnectedClient> {
        let slot = *self.by_peer.get(&peer)?;
        self.release(slot)
    }

    pub fn slot(&self, slot: SlotId) -> Option<&ConnectedClient> {
        self.slots.get(slot.index()).and_then(Option::as_ref)
    }

    pub fn get(&self, id: &EntityId) -> Option<&ConnectedClient> {
        self.by_id.get(id).and_then(|&slot| self.slot(slot))
    }

    pub fn get_mut(&mut self, id: &EntityId) -> Option<&mut ConnectedClient> {
        let slot = *self.by_id.get(id)?;
        self.slots.get_mut(slot.index()).and_then(Option::as_mut)
    }

    pub fn get_by_peer(&self, peer: PeerId) -> Option<&ConnectedClient> {
        self.by_peer.get(&peer).and_then(|&slot| self.slot(slot))
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Clients in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &ConnectedClient> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ConnectedClient> {
        self.slots.iter_mut().flatten()
    }

    pub fn unreliable_addrs(&self) -> Vec<SocketAddr> {
        self.iter().map(|client| client.unreliable_addr).collect()
    }

    /// Stores a transform reported by `id` from `from`. The newest one is
    /// always kept as the client's last known transform; the history window
    /// only takes frames inside its acceptance range.
    pub fn record_update(
        &mut self,
        id: &EntityId,
        from: SocketAddr,
        frame: u32,
        transform: Transform,
    ) -> NetResult<()> {
        let client = self
            .get_mut(id)
            .ok_or(NetError::UnaffiliatedUpdate(*id))?;
        if client.unreliable_addr != from {
            return Err(NetError::ForeignUpdate { id: *id, from });
        }

        client.observe(frame, transform);
        client.history.record_update(frame, transform)?;
        client.history.validate(frame)
    }

    pub fn advance(&mut self, frame: u32) {
        for client in self.iter_mut() {
            client.history.advance(frame);
        }
    }

    pub fn restore_health(&mut self) {
        for client in self.iter_mut() {
            client.health = FULL_HEALTH;
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn peer(raw: u32) -> PeerId {
        PeerId::from_raw(raw)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ClientRegistry::new(10);
        let id = EntityId::random();
        let p = peer(0);

        let registration = registry.register(id, p, addr(1000), addr(2000), 5);
        assert!(!registration.is_replacement());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&id).unwrap().unreliable_addr, addr(2000));
        assert_eq!(registry.get_by_peer(p).unwrap().id, id);
        assert_eq!(registry.get(&id).unwrap().history.current_frame(), 5);
    }

    #[test]
    fn test_duplicate_registration_overwrites() {
        let mut registry = ClientRegistry::new(10);
        let id = EntityId::random();
        let (first, second) = (peer(0), peer(1));

        registry.register(id, first, addr(1000), addr(2000), 0);
        registry
            .record_update(&id, addr(2000), 0, Transform::from_translation(Vec3::X))
            .unwrap();

        let registration = registry.register(id, second, addr(1001), addr(2001), 0);
        assert_eq!(
            registration,
            Registration::Replaced {
                slot: registration.slot(),
                previous_peer: first
            }
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.get_by_peer(first).is_none());

        let client = registry.get(&id).unwrap();
        assert_eq!(client.unreliable_addr, addr(2001));
        assert_eq!(client.latest_transform(), None);
        assert_eq!(client.last_known_frame, None);
    }

    #[test]
    fn test_slots_are_reused() {
        let mut registry = ClientRegistry::new(10);
        let (a, b, c) = (EntityId::random(), EntityId::random(), EntityId::random());

        let slot_a = registry.register(a, peer(0), addr(1), addr(2), 0).slot();
        registry.register(b, peer(1), addr(3), addr(4), 0);
        registry.remove(&a).unwrap();

        let slot_c = registry.register(c, peer(2), addr(5), addr(6), 0).slot();
        assert_eq!(slot_a, slot_c);
        assert_eq!(registry.iter().map(|client| client.id).collect::<Vec<_>>(), vec![c, b]);
    }

    #[test]
    fn test_unaffiliated_update() {
        let mut registry = ClientRegistry::new(10);
        let stranger = EntityId::random();
        assert!(matches!(
            registry.record_update(&stranger, addr(2), 0, Transform::IDENTITY),
            Err(NetError::UnaffiliatedUpdate(id)) if id == stranger
        ));
    }

    #[test]
    fn test_last_known_frame_only_moves_forward() {
        let mut registry = ClientRegistry::new(10);
        let id = EntityId::random();
        registry.register(id, peer(0), addr(1), addr(2), 20);

        registry.record_update(&id, addr(2), 18, Transform::IDENTITY).unwrap();
        registry.record_update(&id, addr(2), 15, Transform::IDENTITY).unwrap();
        assert_eq!(registry.get(&id).unwrap().last_known_frame, Some(18));

        assert!(matches!(
            registry.record_update(&id, addr(2), 9, Transform::IDENTITY),
            Err(NetError::StaleUpdate { .. })
        ));
        assert_eq!(registry.get(&id).unwrap().last_known_frame, Some(18));
    }

    #[test]
    fn test_silent_client_keeps_last_transform() {
        let mut registry = ClientRegistry::new(10);
        let id = EntityId::random();
        registry.register(id, peer(0), addr(1), addr(2), 100);

        let early = Transform::from_translation(Vec3::X);
        let late = Transform::from_translation(Vec3::Y);
        registry.record_update(&id, addr(2), 95, early).unwrap();
        registry.record_update(&id, addr(2), 100, late).unwrap();

        let client = registry.get(&id).unwrap();
        assert_eq!(client.transform_at_or_before(99), Some(early));
        assert_eq!(client.transform_at_or_before(100), Some(late));

        registry.advance(130);
        let client = registry.get(&id).unwrap();
        assert_eq!(client.history.last_valid_frame_at_or_before(130), None);
        assert_eq!(client.latest_transform(), Some(late));
        assert_eq!(client.transform_at_or_before(99), Some(late));
    }

    #[test]
    fn test_frame_behind_window_still_updates_latest() {
        let mut registry = ClientRegistry::new(10);
        let id = EntityId::random();
        registry.register(id, peer(0), addr(1), addr(2), 200);

        let behind = Transform::from_translation(Vec3::new(1.0, 2.0, 3.0));
        assert!(matches!(
            registry.record_update(&id, addr(2), 170, behind),
            Err(NetError::StaleUpdate { frame: 170, current: 200 })
        ));

        let client = registry.get(&id).unwrap();
        assert_eq!(client.latest_transform(), Some(behind));
        assert_eq!(client.last_known_frame, Some(170));
        assert_eq!(client.history.transform_at(190), None);
    }

    #[test]
    fn test_update_from_foreign_address_rejected() {
        let mut registry = ClientRegistry::new(10);
        let id = EntityId::random();
        registry.register(id, peer(0), addr(1), addr(2), 0);

        assert!(matches!(
            registry.record_update(&id, addr(3), 0, Transform::IDENTITY),
            Err(NetError::ForeignUpdate { from, .. }) if from == addr(3)
        ));
        let client = registry.get(&id).unwrap();
        assert_eq!(client.latest_transform(), None);
        assert_eq!(client.last_known_frame, None);
    }

    #[test]
    fn test_remove_by_peer() {
        let mut registry = ClientRegistry::new(10);
        let id = EntityId::random();
        let p = peer(0);
        registry.register(id, p, addr(1), addr(2), 0);

        assert_eq!(registry.remove_by_peer(p).unwrap().id, id);
        assert!(registry.is_empty());
        assert!(registry.remove_by_peer(p).is_none());
    }
}
