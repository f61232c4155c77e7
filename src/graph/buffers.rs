//! Arena of float buffers shared across the runtime graph.
//!
//! Every neuron, weight, bias and gradient buffer lives in one slot here;
//! nodes refer to slots by `BufferId`, so an "aliasing" field is just a
//! copy of the owner's id. Each slot carries its own mutex; executors take
//! at most one buffer lock at a time.

use std::sync::{Mutex, MutexGuard};

use crate::types::BufferId;

#[derive(Debug, Default)]
pub struct BufferArena {
    slots: Vec<Mutex<Box<[f32]>>>,
    lens: Vec<usize>,
}

impl BufferArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a zero-filled buffer and returns its id.
    pub fn alloc(&mut self, len: usize) -> BufferId {
        let id = BufferId(self.slots.len());
        self.slots.push(Mutex::new(vec![0.0; len].into_boxed_slice()));
        self.lens.push(len);
        id
    }

    pub fn len(&self, id: BufferId) -> usize {
        self.lens[id.0]
    }

    pub fn lock(&self, id: BufferId) -> MutexGuard<'_, Box<[f32]>> {
        self.slots[id.0].lock().expect("buffer lock poisoned")
    }

    /// Copies the buffer contents into `out`, resizing it as needed.
    pub fn read_into(&self, id: BufferId, out: &mut Vec<f32>) {
        let guard = self.lock(id);
        out.clear();
        out.extend_from_slice(&guard);
    }

    pub fn to_vec(&self, id: BufferId) -> Vec<f32> {
        self.lock(id).to_vec()
    }

    pub fn write(&self, id: BufferId, values: &[f32]) {
        let mut guard = self.lock(id);
        guard.copy_from_slice(values);
    }
}

#[cfg(test)]
mod tests {
    use super::BufferArena;

    #[test]
    fn alloc_zero_fills_and_tracks_len() {
        let mut arena = BufferArena::new();
        let id = arena.alloc(3);
        assert_eq!(arena.len(id), 3);
        assert_eq!(arena.to_vec(id), vec![0.0; 3]);
    }

    #[test]
    fn write_and_read_round_trip() {
        let mut arena = BufferArena::new();
        let id = arena.alloc(2);
        arena.write(id, &[1.5, -2.0]);
        let mut out = Vec::new();
        arena.read_into(id, &mut out);
        assert_eq!(out, vec![1.5, -2.0]);
    }
}
