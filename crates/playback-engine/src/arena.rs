//! Generational arena for live pipelines.
//!
//! Slots are reused, identities are not: every free bumps the slot generation, so a stale
//! [`PipelineId`] never resolves to a newer pipeline living in the same slot.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId {
    index: u32,
    generation: u32,
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id, build the value for it, and store it.
    ///
    /// If `build` fails the slot is released (with a bumped generation) and nothing is stored.
    pub fn try_insert_with<E>(
        &mut self,
        build: impl FnOnce(PipelineId) -> Result<T, E>,
    ) -> Result<PipelineId, E> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let id = PipelineId {
            index,
            generation: self.slots[index as usize].generation,
        };
        match build(id) {
            Ok(value) => {
                self.slots[index as usize].value = Some(value);
                self.len += 1;
                Ok(id)
            }
            Err(e) => {
                self.release(index);
                Err(e)
            }
        }
    }

    pub fn get(&self, id: PipelineId) -> Option<&T> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: PipelineId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, id: PipelineId) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&mut self, id: PipelineId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        self.len -= 1;
        self.release(id.index);
        Some(value)
    }

    fn release(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Snapshot of live ids in slot order.
    ///
    /// Callers iterate the snapshot, so removing entries while walking it is safe.
    pub fn ids(&self) -> Vec<PipelineId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.value.is_some())
            .map(|(index, slot)| PipelineId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PipelineId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    PipelineId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }
}
