//! Compiled-program cache
//!
//! Programs are keyed by a deterministic byte-serialization of the
//! pipeline configuration and bounded by entry count, not bytes:
//! programs are cheap relative to textures but expensive to recompile,
//! so memory-pressure purges never touch them.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::backend::{BackendError, GpuBackend, PipelineDescription, ProgramHandle};
use crate::key::BytesKey;

/// Fixed capacity; requesting one more distinct configuration evicts
/// the least-recently-used program
pub const MAX_PROGRAM_COUNT: usize = 128;

pub struct ProgramCache {
    // LruCache::get promotes to most-recently-used.
    programs: LruCache<BytesKey, ProgramHandle>,
}

impl Default for ProgramCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramCache {
    pub fn new() -> Self {
        Self {
            programs: LruCache::new(
                NonZeroUsize::new(MAX_PROGRAM_COUNT).expect("nonzero capacity"),
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Cached program for `desc`, compiling and inserting on miss.
    /// Compilation failure returns the error and caches nothing.
    pub fn get_program(
        &mut self,
        backend: &mut dyn GpuBackend,
        desc: &PipelineDescription,
    ) -> Result<ProgramHandle, BackendError> {
        let key = desc.compute_key();
        if let Some(program) = self.programs.get(&key) {
            return Ok(*program);
        }
        let program = backend.compile_program(desc)?;
        if let Some((_, evicted)) = self.programs.push(key, program) {
            if evicted != program {
                tracing::debug!(?evicted, "evicting least-recently-used program");
                backend.release_program(evicted);
            }
        }
        Ok(program)
    }

    /// Empties the cache. `release_gpu` is false during context
    /// teardown where GPU calls may already be invalid.
    pub fn release_all(&mut self, backend: &mut dyn GpuBackend, release_gpu: bool) {
        while let Some((_, program)) = self.programs.pop_lru() {
            if release_gpu {
                backend.release_program(program);
            }
        }
    }
}
