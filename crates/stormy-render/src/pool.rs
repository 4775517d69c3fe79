//! Render target pool keyed by size and format.
//!
//! Temporaries are handed out by [`TargetId`] and returned to a free list on
//! release so the next frame reuses them. A free target that sits unused for
//! more than [`MAX_IDLE_FRAMES`] frames is dropped, so targets for a resolution
//! no longer rendered do not stay resident. Host frames imported into the pool
//! are tracked separately and never counted as outstanding temporaries.

use std::collections::HashMap;

use stormy_core::{FrameSize, PixelFormat, StormyError, StormyResult, TargetId};

/// Frames a released target may stay unused before it is evicted.
pub const MAX_IDLE_FRAMES: u64 = 4;

/// Size and format of a render target request.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
pub struct TargetDesc {
    pub size: FrameSize,
    pub format: PixelFormat,
}

impl TargetDesc {
    pub fn new(size: FrameSize, format: PixelFormat) -> Self {
        Self { size, format }
    }

    /// Bytes the target occupies on the device.
    pub fn byte_size(&self) -> usize {
        self.size.pixel_count() * self.format.bytes_per_pixel()
    }
}

/// Counters for pool activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: u64,
    pub released: u64,
    /// Acquisitions that had to create a new target.
    pub created: u64,
    /// Acquisitions served from the free list.
    pub reused: u64,
    /// Free targets dropped by aging or trimming.
    pub evicted: u64,
}

struct Entry<T> {
    desc: TargetDesc,
    value: T,
    temporary: bool,
}

/// A released target and the frame it was released in.
struct Idle<T> {
    value: T,
    since: u64,
}

pub struct TexturePool<T> {
    free: HashMap<TargetDesc, Vec<Idle<T>>>,
    live: HashMap<TargetId, Entry<T>>,
    next_id: u32,
    frame: u64,
    stats: PoolStats,
}

impl<T> Default for TexturePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TexturePool<T> {
    pub fn new() -> Self {
        Self {
            free: HashMap::new(),
            live: HashMap::new(),
            next_id: 1,
            frame: 0,
            stats: PoolStats::default(),
        }
    }

    fn next_id(&mut self) -> TargetId {
        let id = TargetId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    /// Hand out a temporary matching `desc`, reusing a free one if possible.
    pub fn acquire(
        &mut self,
        desc: TargetDesc,
        create: impl FnOnce(&TargetDesc) -> StormyResult<T>,
    ) -> StormyResult<TargetId> {
        let value = match self.free.get_mut(&desc).and_then(|textures| textures.pop()) {
            Some(Idle { value, .. }) => {
                self.stats.reused += 1;
                value
            }
            None => {
                let value = create(&desc)?;
                self.stats.created += 1;
                value
            }
        };
        self.stats.acquired += 1;
        let id = self.next_id();
        self.live.insert(
            id,
            Entry {
                desc,
                value,
                temporary: true,
            },
        );
        Ok(id)
    }

    /// Track a host-owned value (a source or destination frame).
    pub fn insert(&mut self, desc: TargetDesc, value: T) -> TargetId {
        let id = self.next_id();
        self.live.insert(
            id,
            Entry {
                desc,
                value,
                temporary: false,
            },
        );
        id
    }

    /// Return a target. Temporaries go back to the free list; host values are
    /// dropped.
    pub fn release(&mut self, id: TargetId) -> StormyResult<()> {
        let entry = self.live.remove(&id).ok_or(StormyError::UnknownTarget(id.0))?;
        if entry.temporary {
            self.stats.released += 1;
            self.free.entry(entry.desc).or_default().push(Idle {
                value: entry.value,
                since: self.frame,
            });
        }
        Ok(())
    }

    /// Remove a live value without returning it to the free list.
    pub fn take(&mut self, id: TargetId) -> Option<T> {
        let entry = self.live.remove(&id)?;
        if entry.temporary {
            self.stats.released += 1;
        }
        Some(entry.value)
    }

    pub fn get(&self, id: TargetId) -> Option<&T> {
        self.live.get(&id).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, id: TargetId) -> Option<&mut T> {
        self.live.get_mut(&id).map(|e| &mut e.value)
    }

    pub fn desc(&self, id: TargetId) -> Option<TargetDesc> {
        self.live.get(&id).map(|e| e.desc)
    }

    /// Temporaries acquired and not yet released.
    pub fn outstanding(&self) -> usize {
        self.live.values().filter(|e| e.temporary).count()
    }

    pub fn free_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    /// Whether an acquisition of `desc` would be served without creating.
    pub fn has_free(&self, desc: &TargetDesc) -> bool {
        self.free.get(desc).is_some_and(|textures| !textures.is_empty())
    }

    /// Bytes held by live and free targets.
    pub fn resident_bytes(&self) -> usize {
        let live: usize = self.live.values().map(|e| e.desc.byte_size()).sum();
        let free: usize = self
            .free
            .iter()
            .map(|(desc, textures)| desc.byte_size() * textures.len())
            .sum();
        live + free
    }

    /// Drop every free target.
    pub fn trim(&mut self) {
        let dropped = self.free_count();
        self.free.clear();
        self.stats.evicted += dropped as u64;
    }

    /// Close the current frame and drop free targets that have not been
    /// reused for more than `max_idle` frames. Returns how many were dropped.
    pub fn end_frame(&mut self, max_idle: u64) -> usize {
        self.frame += 1;
        let frame = self.frame;
        let mut dropped = 0;
        self.free.retain(|_, textures| {
            let before = textures.len();
            textures.retain(|idle| frame - idle.since <= max_idle);
            dropped += before - textures.len();
            !textures.is_empty()
        });
        self.stats.evicted += dropped as u64;
        dropped
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}
