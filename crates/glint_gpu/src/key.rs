//! Cache key machinery
//!
//! [`BytesKey`] is a deterministic byte-serialization used to key
//! recycled resources and compiled programs. [`UniqueId`] hands out
//! process-wide unique integers for clip identities and resource
//! identity keys.

use std::sync::atomic::{AtomicU32, Ordering};

/// A deterministic sequence of u32 words used as a cache key.
///
/// Two keys compare equal iff the same values were written in the same
/// order, so distinct pipeline or resource configurations never
/// collide as long as each writer serializes every distinguishing
/// field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BytesKey {
    words: Vec<u32>,
}

impl BytesKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(words: usize) -> Self {
        Self {
            words: Vec::with_capacity(words),
        }
    }

    pub fn write_u32(&mut self, value: u32) {
        self.words.push(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.words.push(value as u32);
    }

    /// Writes the bit pattern, so -0.0 and 0.0 produce distinct keys
    pub fn write_f32(&mut self, value: f32) {
        self.words.push(value.to_bits());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.words.push(value as u32);
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Process-wide monotonically increasing id source.
///
/// Backed by an atomic so ids stay unique across multiple GPU contexts
/// in one process. Wraparound after u32::MAX allocations is accepted
/// and not guarded against; realistic drawing volumes never get there.
pub struct UniqueId;

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

impl UniqueId {
    /// The next unique id; never returns 0, so 0 can mean "unset"
    pub fn next() -> u32 {
        loop {
            let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

/// Content-identity key for cached resources, distinct from the
/// shape-based recycle key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UniqueKey {
    domain: u32,
}

impl UniqueKey {
    /// A fresh key no existing resource is indexed under
    pub fn next() -> Self {
        Self {
            domain: UniqueId::next(),
        }
    }

    pub fn domain(&self) -> u32 {
        self.domain
    }
}
