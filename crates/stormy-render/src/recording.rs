//! Test double: an executor that runs nothing and records every call.
//!
//! Used by the orchestrator tests to check the pass graph, parameter values
//! and target bookkeeping without touching pixels. Like a real executor it
//! rejects blits whose sampled textures name targets that are not live. Not
//! meant for rendering.

use std::collections::HashMap;

use stormy_core::{
    FrameSize, Pass, PixelFormat, ShaderParameterSet, StormyError, StormyResult, TargetId,
    TextureBinding, DEFAULT_SHADER_NAME,
};

use crate::executor::{PassExecutor, ShaderHandle};
use crate::material::Material;
use crate::pool::TargetDesc;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    Acquire {
        id: TargetId,
        desc: TargetDesc,
    },
    Release {
        id: TargetId,
    },
    Copy {
        source: TargetId,
        dest: TargetId,
    },
    Blit {
        source: TargetId,
        dest: TargetId,
        pass: Pass,
        /// Material parameters as they were when the blit was issued.
        params: ShaderParameterSet,
    },
}

/// One recorded blit.
#[derive(Debug, Clone, Copy)]
pub struct BlitRecord<'a> {
    pub source: TargetId,
    pub dest: TargetId,
    pub pass: Pass,
    pub params: &'a ShaderParameterSet,
}

pub struct RecordingExecutor {
    events: Vec<ExecutorEvent>,
    targets: HashMap<TargetId, (TargetDesc, bool)>,
    shader: Option<ShaderHandle>,
    fail_after: Option<usize>,
    allocations: usize,
    frames_ended: usize,
    next_id: u32,
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingExecutor {
    /// Resolves the default post-process program with all passes.
    pub fn new() -> Self {
        Self::with_shader(ShaderHandle::new(DEFAULT_SHADER_NAME, Pass::ALL.len() as u32))
    }

    pub fn with_shader(shader: ShaderHandle) -> Self {
        Self {
            events: Vec::new(),
            targets: HashMap::new(),
            shader: Some(shader),
            fail_after: None,
            allocations: 0,
            frames_ended: 0,
            next_id: 1,
        }
    }

    /// Resolves no program at all.
    pub fn without_shader() -> Self {
        Self {
            shader: None,
            ..Self::new()
        }
    }

    /// Let the first `n` acquisitions succeed and fail every one after.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    fn next_id(&mut self) -> TargetId {
        let id = TargetId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Register a host frame (source or destination) of the given size.
    pub fn import_frame(&mut self, size: FrameSize) -> TargetId {
        let id = self.next_id();
        self.targets
            .insert(id, (TargetDesc::new(size, PixelFormat::RgbaFloat), false));
        id
    }

    pub fn events(&self) -> &[ExecutorEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn blits(&self) -> Vec<BlitRecord<'_>> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ExecutorEvent::Blit {
                    source,
                    dest,
                    pass,
                    params,
                } => Some(BlitRecord {
                    source: *source,
                    dest: *dest,
                    pass: *pass,
                    params,
                }),
                _ => None,
            })
            .collect()
    }

    /// Every acquisition in order.
    pub fn acquisitions(&self) -> Vec<(TargetId, TargetDesc)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ExecutorEvent::Acquire { id, desc } => Some((*id, *desc)),
                _ => None,
            })
            .collect()
    }

    pub fn release_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, ExecutorEvent::Release { .. }))
            .count()
    }

    /// How many times the orchestrator closed a frame.
    pub fn frames_ended(&self) -> usize {
        self.frames_ended
    }

    /// Temporaries acquired and not yet released.
    pub fn outstanding(&self) -> usize {
        self.targets.values().filter(|(_, temporary)| *temporary).count()
    }

    fn check_target(&self, id: TargetId) -> StormyResult<()> {
        if self.targets.contains_key(&id) {
            Ok(())
        } else {
            Err(StormyError::UnknownTarget(id.0))
        }
    }
}

impl PassExecutor for RecordingExecutor {
    fn find_shader(&mut self, name: &str) -> Option<ShaderHandle> {
        self.shader.clone().filter(|s| s.name() == name)
    }

    fn acquire(&mut self, desc: TargetDesc) -> StormyResult<TargetId> {
        if let Some(limit) = self.fail_after {
            if self.allocations >= limit {
                return Err(StormyError::allocation(
                    desc.size.width,
                    desc.size.height,
                    desc.format,
                    "allocation limit reached",
                ));
            }
        }
        self.allocations += 1;
        let id = self.next_id();
        self.targets.insert(id, (desc, true));
        self.events.push(ExecutorEvent::Acquire { id, desc });
        Ok(id)
    }

    fn release(&mut self, id: TargetId) -> StormyResult<()> {
        self.targets
            .remove(&id)
            .ok_or(StormyError::UnknownTarget(id.0))?;
        self.events.push(ExecutorEvent::Release { id });
        Ok(())
    }

    fn target_size(&self, id: TargetId) -> Option<FrameSize> {
        self.targets.get(&id).map(|(desc, _)| desc.size)
    }

    fn copy(&mut self, source: TargetId, dest: TargetId) -> StormyResult<()> {
        self.check_target(source)?;
        self.check_target(dest)?;
        self.events.push(ExecutorEvent::Copy { source, dest });
        Ok(())
    }

    fn blit(
        &mut self,
        source: TargetId,
        dest: TargetId,
        material: &Material,
        pass: Pass,
    ) -> StormyResult<()> {
        self.check_target(source)?;
        self.check_target(dest)?;
        for name in pass.sampled_textures() {
            if let Some(TextureBinding::Target(id)) = material.params().texture(name) {
                self.check_target(id)?;
            }
        }
        self.events.push(ExecutorEvent::Blit {
            source,
            dest,
            pass,
            params: material.params().clone(),
        });
        Ok(())
    }

    fn end_frame(&mut self) {
        self.frames_ended += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_after_limits_acquisitions() {
        let mut exec = RecordingExecutor::new().fail_after(1);
        let desc = TargetDesc::new(FrameSize::new(4, 4), PixelFormat::RgbaHalf);
        let id = exec.acquire(desc).unwrap();
        assert!(exec.acquire(desc).unwrap_err().is_allocation_failure());
        assert_eq!(exec.outstanding(), 1);
        exec.release(id).unwrap();
        assert_eq!(exec.outstanding(), 0);
        assert_eq!(exec.release_count(), 1);
    }

    #[test]
    fn test_blit_snapshots_parameters() {
        let mut exec = RecordingExecutor::new();
        let shader = exec.find_shader(DEFAULT_SHADER_NAME).unwrap();
        let mut material = Material::new(shader);
        let src = exec.import_frame(FrameSize::new(8, 8));
        let dst = exec.import_frame(FrameSize::new(8, 8));
        material.params_mut().set_float("_BlurSpread", 1.0);
        exec.blit(src, dst, &material, Pass::Blur).unwrap();
        material.params_mut().set_float("_BlurSpread", 6.0);
        exec.blit(src, dst, &material, Pass::Blur).unwrap();
        let blits = exec.blits();
        assert_eq!(blits[0].params.float("_BlurSpread"), Some(1.0));
        assert_eq!(blits[1].params.float("_BlurSpread"), Some(6.0));
    }

    #[test]
    fn test_sampled_bindings_must_be_live() {
        let mut exec = RecordingExecutor::new();
        let shader = exec.find_shader(DEFAULT_SHADER_NAME).unwrap();
        let mut material = Material::new(shader);
        let src = exec.import_frame(FrameSize::new(8, 8));
        let dst = exec.import_frame(FrameSize::new(8, 8));
        let desc = TargetDesc::new(FrameSize::new(4, 4), PixelFormat::RgbaHalf);
        let stale = exec.acquire(desc).unwrap();
        exec.release(stale).unwrap();
        material.params_mut().set_texture("_BloomTex", stale);

        // Passes that do not sample _BloomTex ignore the stale binding.
        exec.blit(src, dst, &material, Pass::Threshold).unwrap();
        assert!(matches!(
            exec.blit(src, dst, &material, Pass::Compose),
            Err(StormyError::UnknownTarget(id)) if id == stale.0
        ));
    }

    #[test]
    fn test_without_shader_resolves_nothing() {
        let mut exec = RecordingExecutor::without_shader();
        assert!(exec.find_shader(DEFAULT_SHADER_NAME).is_none());
    }
}
