use slab::Slab;

/// Index plus generation. A handle whose slot has since been released and
/// reused no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle {
    index: usize,
    generation: u32,
}

impl SurfaceHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReleaseError {
    #[error("handle refers to a released slot")]
    Stale,
    #[error("slot is pinned by {0} holder(s)")]
    Pinned(u32),
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    pins: u32,
    value: T,
}

/// Slab storage with generation-checked handles and per-slot pins. A pinned
/// slot cannot be released.
#[derive(Debug)]
pub struct SurfaceArena<T> {
    slots: Slab<Slot<T>>,
    generations: Vec<u32>,
}

impl<T> Default for SurfaceArena<T> {
    fn default() -> Self {
        Self {
            slots: Slab::new(),
            generations: Vec::new(),
        }
    }
}

impl<T> SurfaceArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: T) -> SurfaceHandle {
        let index = self.slots.vacant_key();
        if index >= self.generations.len() {
            self.generations.resize(index + 1, 0);
        }
        let generation = self.generations[index];
        let inserted = self.slots.insert(Slot {
            generation,
            pins: 0,
            value,
        });
        debug_assert_eq!(inserted, index);
        SurfaceHandle { index, generation }
    }

    fn slot(&self, handle: SurfaceHandle) -> Option<&Slot<T>> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
    }

    fn slot_mut(&mut self, handle: SurfaceHandle) -> Option<&mut Slot<T>> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)
    }

    pub fn contains(&self, handle: SurfaceHandle) -> bool {
        self.slot(handle).is_some()
    }

    pub fn get(&self, handle: SurfaceHandle) -> Option<&T> {
        self.slot(handle).map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, handle: SurfaceHandle) -> Option<&mut T> {
        self.slot_mut(handle).map(|slot| &mut slot.value)
    }

    pub fn pin(&mut self, handle: SurfaceHandle) -> bool {
        match self.slot_mut(handle) {
            Some(slot) => {
                slot.pins += 1;
                true
            }
            None => false,
        }
    }

    pub fn unpin(&mut self, handle: SurfaceHandle) -> bool {
        match self.slot_mut(handle) {
            Some(slot) if slot.pins > 0 => {
                slot.pins -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn pins(&self, handle: SurfaceHandle) -> Option<u32> {
        self.slot(handle).map(|slot| slot.pins)
    }

    pub fn release(&mut self, handle: SurfaceHandle) -> Result<T, ReleaseError> {
        let pins = self.slot(handle).ok_or(ReleaseError::Stale)?.pins;
        if pins > 0 {
            return Err(ReleaseError::Pinned(pins));
        }
        let slot = self.slots.remove(handle.index);
        self.generations[handle.index] = slot.generation.wrapping_add(1);
        Ok(slot.value)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SurfaceHandle, &T)> {
        self.slots.iter().map(|(index, slot)| {
            (
                SurfaceHandle {
                    index,
                    generation: slot.generation,
                },
                &slot.value,
            )
        })
    }

    pub fn handles(&self) -> Vec<SurfaceHandle> {
        self.iter().map(|(handle, _)| handle).collect()
    }
}
