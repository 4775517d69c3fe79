//! CPU pass executor.
//!
//! Runs the post-process passes over `f32` frame buffers. Useful for offline
//! processing, for tests, and as the reference the GPU path is compared to.

use glam::{Vec2, Vec3, Vec4};
use stormy_core::{
    FrameBuffer, FrameSize, Pass, PixelFormat, ShaderParameterSet, StormyError, StormyResult,
    TargetId, TextureBinding, DEFAULT_SHADER_NAME,
};

use crate::executor::{PassExecutor, ShaderHandle};
use crate::kernels;
use crate::material::Material;
use crate::pool::{PoolStats, TargetDesc, TexturePool, MAX_IDLE_FRAMES};

/// Per-pass blit counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlitStats {
    pub copies: u64,
    pub per_pass: [u64; 5],
}

impl BlitStats {
    pub fn count(&self, pass: Pass) -> u64 {
        self.per_pass[pass.index() as usize]
    }

    pub fn total(&self) -> u64 {
        self.copies + self.per_pass.iter().sum::<u64>()
    }
}

pub struct SoftwareExecutor {
    pool: TexturePool<FrameBuffer>,
    shaders: Vec<String>,
    memory_budget: Option<usize>,
    stats: BlitStats,
}

impl Default for SoftwareExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareExecutor {
    /// Executor with the built-in post-process program registered.
    pub fn new() -> Self {
        let mut executor = Self::without_shaders();
        executor.register_shader(DEFAULT_SHADER_NAME);
        executor
    }

    /// Executor that resolves no shader programs at all.
    pub fn without_shaders() -> Self {
        Self {
            pool: TexturePool::new(),
            shaders: Vec::new(),
            memory_budget: None,
            stats: BlitStats::default(),
        }
    }

    /// Make the built-in passes available under another name.
    pub fn register_shader(&mut self, name: &str) {
        if !self.shaders.iter().any(|s| s == name) {
            self.shaders.push(name.to_string());
        }
    }

    /// Cap the bytes the pool may hold. Idle temporaries are dropped to make
    /// room; acquisitions that still do not fit fail.
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Hand a host frame to the executor.
    pub fn import(&mut self, frame: FrameBuffer) -> TargetId {
        let desc = TargetDesc::new(frame.size(), frame.format);
        self.pool.insert(desc, frame)
    }

    /// Allocate a host-owned frame of the given size, e.g. a destination.
    pub fn create_frame(&mut self, size: FrameSize) -> TargetId {
        self.import(FrameBuffer::new(size.width, size.height, PixelFormat::RgbaFloat))
    }

    pub fn frame(&self, id: TargetId) -> Option<&FrameBuffer> {
        self.pool.get(id)
    }

    /// Remove a frame from the executor and return it.
    pub fn take(&mut self, id: TargetId) -> Option<FrameBuffer> {
        self.pool.take(id)
    }

    /// Temporaries currently borrowed from the pool.
    pub fn outstanding(&self) -> usize {
        self.pool.outstanding()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn blit_stats(&self) -> BlitStats {
        self.stats
    }

    /// Drop pooled temporaries that are not in use.
    pub fn trim(&mut self) {
        self.pool.trim();
    }

    fn frame_ref(&self, id: TargetId) -> StormyResult<&FrameBuffer> {
        self.pool.get(id).ok_or(StormyError::UnknownTarget(id.0))
    }

    fn texture(&self, params: &ShaderParameterSet, name: &str) -> StormyResult<Option<&FrameBuffer>> {
        match params.texture(name) {
            None | Some(TextureBinding::Black) => Ok(None),
            Some(TextureBinding::Target(id)) => self.frame_ref(id).map(Some),
        }
    }

    /// Run `render` with the destination's pixels detached from the pool so the
    /// sources can be borrowed at the same time.
    fn render_into<F>(&mut self, source: TargetId, dest: TargetId, render: F) -> StormyResult<()>
    where
        F: FnOnce(&Self, &FrameBuffer, &mut [f32], FrameSize) -> StormyResult<()>,
    {
        if source == dest {
            return Err(StormyError::InvalidArgument(format!(
                "cannot blit target {} onto itself",
                source
            )));
        }
        let (mut pixels, out_size) = {
            let out = self.pool.get_mut(dest).ok_or(StormyError::UnknownTarget(dest.0))?;
            (std::mem::take(&mut out.data), out.size())
        };
        let this: &Self = self;
        let result = this
            .frame_ref(source)
            .and_then(|src| render(this, src, &mut pixels, out_size));
        if let Some(out) = self.pool.get_mut(dest) {
            out.data = pixels;
        }
        result
    }

    fn run_pass(
        &self,
        pass: Pass,
        src: &FrameBuffer,
        params: &ShaderParameterSet,
        out: &mut [f32],
        out_size: FrameSize,
    ) -> StormyResult<()> {
        let float = |name: &str, default: f32| params.float(name).unwrap_or(default);
        let vec3 = |name: &str| params.vector(name).map(|v| v.truncate()).unwrap_or(Vec3::ZERO);
        match pass {
            Pass::Threshold => {
                let p = kernels::ThresholdParams {
                    threshold: float("_BloomThreshold", 1.0),
                    extra: float("_BloomExtra", 0.0),
                    sun_dir: vec3("_SunDir"),
                    corners: [
                        vec3("_ViewDirTL"),
                        vec3("_ViewDirTR"),
                        vec3("_ViewDirBL"),
                        vec3("_ViewDirBR"),
                    ],
                };
                kernels::threshold(src, &p, out, out_size);
            }
            Pass::Mip => kernels::mip(src, out, out_size),
            Pass::Blur => {
                let dir = params.vector("_BlurDir").unwrap_or(Vec4::X);
                kernels::blur(
                    src,
                    Vec2::new(dir.x, dir.y),
                    float("_BlurSpread", 1.0),
                    out,
                    out_size,
                );
            }
            Pass::ZoomBlur => {
                let p = kernels::ZoomBlurParams {
                    rays: self.texture(params, "_GodRayTex")?,
                    screen_pos: vec3("_GodRayScreenPos"),
                    steps: params.int("_GodRaySteps").unwrap_or(1).max(1) as u32,
                    length: float("_GodRayLength", 1.0),
                    falloff: float("_GodRayFalloff", 1.0),
                    glow: params.vector("_GodrayGlow").unwrap_or(Vec4::ZERO),
                };
                kernels::zoom_blur(&p, out, out_size);
            }
            Pass::Compose => {
                let p = kernels::ComposeParams {
                    bloom_wide: self.texture(params, "_BloomTex")?,
                    bloom_tight: self.texture(params, "_BloomTex2")?,
                    god_rays: self.texture(params, "_GodRayTex")?,
                    god_rays_previous: self.texture(params, "_GodRayTexAlt")?,
                    bloom_amount: float("_BloomAmount", 0.0),
                    god_ray_amount: float("_GodRayAmount", 0.0),
                };
                kernels::compose(src, &p, out, out_size);
            }
        }
        Ok(())
    }
}

impl PassExecutor for SoftwareExecutor {
    fn find_shader(&mut self, name: &str) -> Option<ShaderHandle> {
        self.shaders
            .iter()
            .any(|s| s == name)
            .then(|| ShaderHandle::new(name, Pass::ALL.len() as u32))
    }

    fn acquire(&mut self, desc: TargetDesc) -> StormyResult<TargetId> {
        let budget = self.memory_budget;
        if let Some(budget) = budget {
            let over = self.pool.resident_bytes() + desc.byte_size() > budget;
            if over && !self.pool.has_free(&desc) && self.pool.free_count() > 0 {
                tracing::debug!(
                    "memory budget reached, dropping {} idle targets",
                    self.pool.free_count()
                );
                self.pool.trim();
            }
        }
        let resident = self.pool.resident_bytes();
        self.pool.acquire(desc, |d| {
            if let Some(budget) = budget {
                if resident + d.byte_size() > budget {
                    return Err(StormyError::allocation(
                        d.size.width,
                        d.size.height,
                        d.format,
                        format!("memory budget of {} bytes exhausted", budget),
                    ));
                }
            }
            Ok(FrameBuffer::new(d.size.width, d.size.height, d.format))
        })
    }

    fn release(&mut self, id: TargetId) -> StormyResult<()> {
        self.pool.release(id)
    }

    fn end_frame(&mut self) {
        let evicted = self.pool.end_frame(MAX_IDLE_FRAMES);
        if evicted > 0 {
            tracing::debug!("evicted {} idle targets", evicted);
        }
    }

    fn target_size(&self, id: TargetId) -> Option<FrameSize> {
        self.pool.desc(id).map(|d| d.size)
    }

    fn copy(&mut self, source: TargetId, dest: TargetId) -> StormyResult<()> {
        self.render_into(source, dest, |_, src, out, out_size| {
            kernels::copy(src, out, out_size);
            Ok(())
        })?;
        self.stats.copies += 1;
        Ok(())
    }

    fn blit(
        &mut self,
        source: TargetId,
        dest: TargetId,
        material: &Material,
        pass: Pass,
    ) -> StormyResult<()> {
        if !self.shaders.iter().any(|s| s == material.shader().name()) {
            return Err(StormyError::missing_shader(material.shader().name()));
        }
        self.render_into(source, dest, |this, src, out, out_size| {
            this.run_pass(pass, src, material.params(), out, out_size)
        })?;
        self.stats.per_pass[pass.index() as usize] += 1;
        tracing::trace!("blit {} -> {} ({})", source, dest, pass);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stormy_core::Color;

    #[test]
    fn test_find_shader_only_registered_names() {
        let mut exec = SoftwareExecutor::new();
        let handle = exec.find_shader(DEFAULT_SHADER_NAME).unwrap();
        assert!(handle.supports_all_passes());
        assert!(exec.find_shader("Hidden/Other").is_none());
        assert!(SoftwareExecutor::without_shaders()
            .find_shader(DEFAULT_SHADER_NAME)
            .is_none());
    }

    #[test]
    fn test_copy_resamples_into_destination() {
        let mut exec = SoftwareExecutor::new();
        let src = exec.import(FrameBuffer::solid(16, 16, &Color::RED));
        let dst = exec
            .acquire(TargetDesc::new(FrameSize::new(4, 4), PixelFormat::RgbaHalf))
            .unwrap();
        exec.copy(src, dst).unwrap();
        assert_eq!(exec.frame(dst).unwrap().texel(2, 2), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(exec.blit_stats().copies, 1);
    }

    #[test]
    fn test_blit_onto_itself_is_rejected() {
        let mut exec = SoftwareExecutor::new();
        let src = exec.import(FrameBuffer::solid(4, 4, &Color::RED));
        assert!(matches!(
            exec.copy(src, src),
            Err(StormyError::InvalidArgument(_))
        ));
        assert_eq!(exec.frame(src).unwrap().texel(0, 0), [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unknown_texture_binding_is_an_error() {
        let mut exec = SoftwareExecutor::new();
        let handle = exec.find_shader(DEFAULT_SHADER_NAME).unwrap();
        let mut material = Material::new(handle);
        material.params_mut().set_texture("_BloomTex", TargetId(999));
        let src = exec.import(FrameBuffer::solid(4, 4, &Color::RED));
        let dst = exec.create_frame(FrameSize::new(4, 4));
        let err = exec.blit(src, dst, &material, Pass::Compose).unwrap_err();
        assert!(matches!(err, StormyError::UnknownTarget(999)));
        // destination pixels were reattached
        assert_eq!(exec.frame(dst).unwrap().data.len(), 4 * 4 * 4);
    }

    #[test]
    fn test_memory_budget_rejects_allocation() {
        let mut exec = SoftwareExecutor::new().with_memory_budget(1024);
        let small = TargetDesc::new(FrameSize::new(8, 8), PixelFormat::RgbaHalf);
        let id = exec.acquire(small).unwrap();
        let err = exec
            .acquire(TargetDesc::new(FrameSize::new(64, 64), PixelFormat::RgbaHalf))
            .unwrap_err();
        assert!(err.is_allocation_failure());
        exec.release(id).unwrap();
        assert_eq!(exec.outstanding(), 0);
    }

    #[test]
    fn test_memory_budget_drops_idle_targets_first() {
        let mut exec = SoftwareExecutor::new().with_memory_budget(1024);
        let small = TargetDesc::new(FrameSize::new(8, 8), PixelFormat::RgbaHalf);
        let other = TargetDesc::new(FrameSize::new(8, 7), PixelFormat::RgbaHalf);
        let id = exec.acquire(small).unwrap();
        exec.release(id).unwrap();

        // 512 idle + 448 fits; a second 8x8 would not, but reuses the idle one.
        let a = exec.acquire(other).unwrap();
        let b = exec.acquire(small).unwrap();
        exec.release(a).unwrap();
        exec.release(b).unwrap();
        assert_eq!(exec.pool_stats().evicted, 0);

        let big = TargetDesc::new(FrameSize::new(10, 10), PixelFormat::RgbaHalf);
        let id = exec.acquire(big).unwrap();
        assert_eq!(exec.pool_stats().evicted, 2);
        exec.release(id).unwrap();
    }
}
