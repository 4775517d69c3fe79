//! The seam between the orchestrator and whatever runs the shader passes.

use stormy_core::{FrameSize, Pass, StormyResult, TargetId};

use crate::material::Material;
use crate::pool::TargetDesc;

/// A shader program resolved by an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderHandle {
    name: String,
    pass_count: u32,
}

impl ShaderHandle {
    pub fn new(name: impl Into<String>, pass_count: u32) -> Self {
        Self {
            name: name.into(),
            pass_count,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pass_count(&self) -> u32 {
        self.pass_count
    }

    /// Whether the program exposes every pass of the post-process contract.
    pub fn supports_all_passes(&self) -> bool {
        self.pass_count as usize >= Pass::ALL.len()
    }
}

/// Runs blits and owns the render target pool.
///
/// Calls are made from the rendering thread only and are not reentrant.
pub trait PassExecutor {
    /// Resolve a shader program by name, `None` if the host has no such program.
    fn find_shader(&mut self, name: &str) -> Option<ShaderHandle>;

    /// Borrow a temporary render target from the pool.
    fn acquire(&mut self, desc: TargetDesc) -> StormyResult<TargetId>;

    /// Return a target to the pool.
    fn release(&mut self, id: TargetId) -> StormyResult<()>;

    fn target_size(&self, id: TargetId) -> Option<FrameSize>;

    /// Plain resampling copy with no shader pass.
    fn copy(&mut self, source: TargetId, dest: TargetId) -> StormyResult<()>;

    /// Sample `source` through one pass of `material`'s shader into `dest`.
    fn blit(
        &mut self,
        source: TargetId,
        dest: TargetId,
        material: &Material,
        pass: Pass,
    ) -> StormyResult<()>;

    /// Called once after every frame the orchestrator processed. Pooling
    /// executors age out temporaries here.
    fn end_frame(&mut self) {}
}

/// Scoped target acquisition: every target acquired through the scope is
/// released when the scope drops, whichever way the frame exits.
pub struct TargetScope<'e, E: PassExecutor + ?Sized> {
    executor: &'e mut E,
    acquired: Vec<TargetId>,
}

impl<'e, E: PassExecutor + ?Sized> TargetScope<'e, E> {
    pub fn new(executor: &'e mut E) -> Self {
        Self {
            executor,
            acquired: Vec::new(),
        }
    }

    pub fn acquire(&mut self, desc: TargetDesc) -> StormyResult<TargetId> {
        let id = self.executor.acquire(desc)?;
        tracing::trace!("acquired {} ({} {:?})", id, desc.size, desc.format);
        self.acquired.push(id);
        Ok(id)
    }

    pub fn executor(&mut self) -> &mut E {
        self.executor
    }

    /// Number of targets acquired so far in this scope.
    pub fn acquired_count(&self) -> usize {
        self.acquired.len()
    }

    /// Release everything now, newest first.
    pub fn release_all(&mut self) {
        while let Some(id) = self.acquired.pop() {
            if let Err(e) = self.executor.release(id) {
                tracing::warn!("Failed to release render target {}: {}", id, e);
            }
        }
    }
}

impl<E: PassExecutor + ?Sized> Drop for TargetScope<'_, E> {
    fn drop(&mut self) {
        self.release_all();
    }
}
