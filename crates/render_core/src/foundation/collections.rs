//! Generation-checked handle tables
//!
//! Every GPU-side resource the server hands out is addressed through an opaque
//! key stored in a [`HandleAllocator`]. Slots are reused after removal, but the
//! generation embedded in each key is bumped so a stale key never resolves to a
//! newer resource.

pub use slotmap::{Key, KeyData, SlotMap};

slotmap::new_key_type! {
    /// Handle to a mesh (a list of primitives)
    pub struct MeshId;
    /// Handle to a placed mesh instance
    pub struct MeshInstanceId;
    /// Handle to a point light
    pub struct PointLightId;
    /// Handle to a directional light
    pub struct DirectionalLightId;
    /// Handle to a sampled texture
    pub struct TextureId;
    /// Handle to a material descriptor set
    pub struct MaterialId;
}

/// Conversion between typed handles and the raw 64-bit form handed across
/// API boundaries. The raw value `0` is reserved for the null handle.
pub trait RawHandle: Key {
    /// Raw 64-bit value of this handle, `0` for null
    fn to_raw(self) -> u64 {
        if self.is_null() {
            0
        } else {
            self.data().as_ffi()
        }
    }

    /// Rebuild a handle from its raw value
    fn from_raw(raw: u64) -> Self {
        // from_ffi(0) would decode to slot 0 generation 1, a live key
        if raw == 0 {
            Self::null()
        } else {
            KeyData::from_ffi(raw).into()
        }
    }
}

impl<K: Key> RawHandle for K {}

/// Slot map keyed by one handle type
///
/// Insertion is O(1) amortized and never fails. Lookups on removed or null
/// keys return `None`.
#[derive(Debug, Clone)]
pub struct HandleAllocator<K: Key, V> {
    slots: SlotMap<K, V>,
}

impl<K: Key, V> HandleAllocator<K, V> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            slots: SlotMap::with_key(),
        }
    }

    /// Store a value and return its fresh handle
    pub fn insert(&mut self, value: V) -> K {
        self.slots.insert(value)
    }

    /// Whether `handle` refers to a live slot
    pub fn has(&self, handle: K) -> bool {
        self.slots.contains_key(handle)
    }

    /// Borrow the value behind `handle`
    pub fn get(&self, handle: K) -> Option<&V> {
        self.slots.get(handle)
    }

    /// Mutably borrow the value behind `handle`
    pub fn get_mut(&mut self, handle: K) -> Option<&mut V> {
        self.slots.get_mut(handle)
    }

    /// Release the slot and hand back its value
    pub fn remove(&mut self, handle: K) -> Option<V> {
        self.slots.remove(handle)
    }

    /// Iterate live entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.slots.iter()
    }

    /// Iterate live values in slot order
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.slots.values()
    }

    /// Collect every live handle
    pub fn keys(&self) -> Vec<K> {
        self.slots.keys().collect()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no entries are live
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<K: Key, V> Default for HandleAllocator<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_insert_produces_unique_handles() {
        let mut table: HandleAllocator<MeshId, u32> = HandleAllocator::new();
        let handles: Vec<MeshId> = (0..64).map(|i| table.insert(i)).collect();

        let unique: HashSet<MeshId> = handles.iter().copied().collect();
        assert_eq!(unique.len(), 64);
        assert_eq!(table.len(), 64);
        assert!(handles.iter().all(|h| table.has(*h)));
    }

    #[test]
    fn test_stale_handle_does_not_alias_reused_slot() {
        let mut table: HandleAllocator<TextureId, &str> = HandleAllocator::new();
        let old = table.insert("first");
        assert_eq!(table.remove(old), Some("first"));

        let new = table.insert("second");
        assert_ne!(old, new);
        assert!(!table.has(old));
        assert_eq!(table.get(old), None);
        assert_eq!(table.get(new), Some(&"second"));
    }

    #[test]
    fn test_double_remove_is_none() {
        let mut table: HandleAllocator<MaterialId, u8> = HandleAllocator::new();
        let handle = table.insert(7);
        assert_eq!(table.remove(handle), Some(7));
        assert_eq!(table.remove(handle), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_raw_round_trip_and_null() {
        let mut table: HandleAllocator<PointLightId, ()> = HandleAllocator::new();
        let handle = table.insert(());

        let raw = handle.to_raw();
        assert_ne!(raw, 0);
        assert_eq!(PointLightId::from_raw(raw), handle);

        assert_eq!(PointLightId::null().to_raw(), 0);
        let null = PointLightId::from_raw(0);
        assert!(null.is_null());
        assert!(!table.has(null));
    }

    #[test]
    fn test_get_mut_updates_value() {
        let mut table: HandleAllocator<MeshInstanceId, f32> = HandleAllocator::new();
        let handle = table.insert(1.0);
        if let Some(value) = table.get_mut(handle) {
            *value = 2.5;
        }
        assert_eq!(table.get(handle), Some(&2.5));
    }
}
