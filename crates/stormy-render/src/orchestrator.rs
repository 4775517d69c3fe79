//! The bloom + god-ray frame graph.
//!
//! [`PostProcessOrchestrator`] owns the effect settings and the material, and
//! drives a [`PassExecutor`] through the fixed pass sequence once per frame.
//! All temporaries live in a [`TargetScope`], so they are returned to the pool
//! on every exit path.

use glam::{Vec2, Vec3, Vec4};
use serde::Serialize;

use stormy_core::{
    Camera, DepthTextureMode, DirectionalLight, EffectConfiguration, FrameSize, Pass, PixelFormat,
    PostProcessConfig, StormyError, StormyResult, TargetId, TextureBinding,
};

use crate::executor::{PassExecutor, TargetScope};
use crate::material::Material;
use crate::pool::TargetDesc;

/// How far along the light direction the god-ray origin is projected.
pub const GOD_RAY_DISTANCE: f32 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    /// Inside `process_frame`.
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameOutcome {
    /// The full pass graph ran and the destination holds the composite.
    Composited,
    /// The destination holds an unprocessed copy of the source.
    PassThrough,
    /// Nothing was written.
    Skipped,
}

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameReport {
    pub outcome: FrameOutcome,
    /// Shader blits issued, excluding plain copies.
    pub blits: u32,
    pub targets_acquired: usize,
    pub god_rays: bool,
}

impl FrameReport {
    fn new(outcome: FrameOutcome) -> Self {
        Self {
            outcome,
            blits: 0,
            targets_acquired: 0,
            god_rays: false,
        }
    }
}

pub struct PostProcessOrchestrator {
    effect: EffectConfiguration,
    sun: Option<DirectionalLight>,
    camera: Camera,
    shader_name: String,
    material: Option<Material>,
    state: LifecycleState,
    missing_shader_reported: bool,
}

impl PostProcessOrchestrator {
    pub fn new(config: &PostProcessConfig, camera: Camera) -> Self {
        Self {
            effect: config.effect.sanitize(),
            sun: config.sun,
            camera,
            shader_name: config.shader.name.clone(),
            material: None,
            state: LifecycleState::Uninitialized,
            missing_shader_reported: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.material.is_some()
    }

    pub fn effect(&self) -> &EffectConfiguration {
        &self.effect
    }

    /// Replace the tunables. Values are clamped into range.
    pub fn set_effect(&mut self, effect: EffectConfiguration) {
        self.effect = effect.sanitize();
    }

    pub fn sun(&self) -> Option<&DirectionalLight> {
        self.sun.as_ref()
    }

    pub fn set_sun(&mut self, sun: Option<DirectionalLight>) {
        self.sun = sun;
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn shader_name(&self) -> &str {
        &self.shader_name
    }

    pub fn material(&self) -> Option<&Material> {
        self.material.as_ref()
    }

    /// Resolve the shader and create a fresh material.
    ///
    /// On failure the orchestrator stays inert and later frames are skipped.
    /// The diagnostic is logged only the first time.
    pub fn initialize<E: PassExecutor + ?Sized>(&mut self, executor: &mut E) -> StormyResult<()> {
        if self.material.is_some() {
            return Ok(());
        }
        self.camera.depth_texture_mode = DepthTextureMode::Depth;

        let shader = match executor.find_shader(&self.shader_name) {
            Some(shader) if shader.supports_all_passes() => shader,
            found => {
                let err = match found {
                    Some(shader) => StormyError::Render(format!(
                        "shader {} exposes {} passes, {} required",
                        shader.name(),
                        shader.pass_count(),
                        Pass::ALL.len()
                    )),
                    None => StormyError::missing_shader(self.shader_name.as_str()),
                };
                if !self.missing_shader_reported {
                    tracing::error!("{}; post-process disabled", err);
                    self.missing_shader_reported = true;
                }
                return Err(err);
            }
        };

        tracing::info!("Post-process initialized with shader {}", shader.name());
        self.material = Some(Material::new(shader));
        self.state = LifecycleState::Initialized;
        Ok(())
    }

    /// Drop the material and return to the uninitialized state.
    pub fn teardown(&mut self) {
        if self.material.take().is_some() {
            tracing::info!("Post-process torn down");
        }
        self.state = LifecycleState::Uninitialized;
    }

    /// Run the pass graph from `source` into `dest`.
    ///
    /// An uninitialized orchestrator leaves `dest` untouched. If a temporary
    /// cannot be allocated the frame degrades to a plain copy of the source.
    pub fn process_frame<E: PassExecutor + ?Sized>(
        &mut self,
        executor: &mut E,
        source: TargetId,
        dest: TargetId,
    ) -> StormyResult<FrameReport> {
        let Some(material) = self.material.as_mut() else {
            tracing::trace!("post-process inactive, frame skipped");
            return Ok(FrameReport::new(FrameOutcome::Skipped));
        };
        let size = executor
            .target_size(source)
            .ok_or(StormyError::UnknownTarget(source.0))?;
        if executor.target_size(dest).is_none() {
            return Err(StormyError::UnknownTarget(dest.0));
        }
        if size.eighth().is_empty() {
            tracing::debug!("source {} too small for the bloom chain, copying", size);
            let copied = executor.copy(source, dest);
            executor.end_frame();
            return copied.map(|()| FrameReport::new(FrameOutcome::PassThrough));
        }

        self.state = LifecycleState::Processing;
        let graph = FrameGraph {
            effect: &self.effect,
            sun: self.sun.as_ref(),
            camera: &self.camera,
            source,
            dest,
            size,
        };
        let mut scope = TargetScope::new(executor);
        let mut blits = 0;
        let result = graph.run(&mut scope, material, &mut blits);
        let targets_acquired = scope.acquired_count();
        drop(scope);
        self.state = LifecycleState::Initialized;

        let report = match result {
            Ok(god_rays) => Ok(FrameReport {
                outcome: FrameOutcome::Composited,
                blits,
                targets_acquired,
                god_rays,
            }),
            Err(e) if e.is_allocation_failure() => {
                tracing::warn!("{}; passing frame through unprocessed", e);
                executor.copy(source, dest).map(|()| FrameReport {
                    outcome: FrameOutcome::PassThrough,
                    blits,
                    targets_acquired,
                    god_rays: false,
                })
            }
            Err(e) => Err(e),
        };
        executor.end_frame();
        report
    }
}

/// Per-frame inputs to the pass sequence.
struct FrameGraph<'a> {
    effect: &'a EffectConfiguration,
    sun: Option<&'a DirectionalLight>,
    camera: &'a Camera,
    source: TargetId,
    dest: TargetId,
    size: FrameSize,
}

impl FrameGraph<'_> {
    /// Returns whether god rays were rendered.
    fn run<E: PassExecutor + ?Sized>(
        &self,
        scope: &mut TargetScope<'_, E>,
        material: &mut Material,
        blits: &mut u32,
    ) -> StormyResult<bool> {
        let effect = self.effect;
        let half = self.size.half();
        let quarter = self.size.quarter();
        let eighth = self.size.eighth();

        // Threshold
        let params = material.params_mut();
        params.set_float("_BloomThreshold", effect.bloom_threshold);
        params.set_float("_BloomExtra", effect.bloom_extra);
        set_screen_size(material, half);
        let params = material.params_mut();
        params.set_vec3(
            "_SunDir",
            self.sun.map(DirectionalLight::forward).unwrap_or(Vec3::ZERO),
        );
        let [tl, tr, bl, br] = self.camera.corner_rays(self.size);
        params.set_vec3("_ViewDirTL", tl);
        params.set_vec3("_ViewDirTR", tr);
        params.set_vec3("_ViewDirBL", bl);
        params.set_vec3("_ViewDirBR", br);

        let threshold = scope.acquire(TargetDesc::new(half, PixelFormat::RgbaHalf))?;
        blit(scope, material, self.source, threshold, Pass::Threshold, blits)?;

        // Mip chain
        set_screen_size(material, quarter);
        let mip1 = scope.acquire(TargetDesc::new(quarter, PixelFormat::RgbaHalf))?;
        blit(scope, material, threshold, mip1, Pass::Mip, blits)?;

        set_screen_size(material, eighth);
        let mip2 = scope.acquire(TargetDesc::new(eighth, PixelFormat::RgbaHalf))?;
        blit(scope, material, mip1, mip2, Pass::Mip, blits)?;

        // Tight bloom, saved into mip2
        let blur_x = scope.acquire(TargetDesc::new(eighth, PixelFormat::RgbaFloat))?;
        let blur_y = scope.acquire(TargetDesc::new(eighth, PixelFormat::RgbaFloat))?;
        material.params_mut().set_float("_BlurSpread", 1.0);
        material.params_mut().set_vec2("_BlurDir", Vec2::X);
        blit(scope, material, mip2, blur_x, Pass::Blur, blits)?;
        material.params_mut().set_vec2("_BlurDir", Vec2::Y);
        blit(scope, material, blur_x, blur_y, Pass::Blur, blits)?;
        scope.executor().copy(blur_y, mip2)?;

        // Wide bloom
        material.params_mut().set_float("_BlurSpread", effect.bloom_spread);
        material.params_mut().set_vec2("_BlurDir", Vec2::X);
        blit(scope, material, blur_y, blur_x, Pass::Blur, blits)?;
        material.params_mut().set_vec2("_BlurDir", Vec2::Y);
        blit(scope, material, blur_x, blur_y, Pass::Blur, blits)?;

        let god_rays = match self.sun {
            Some(sun) => {
                let params = material.params_mut();
                params.set_matrix("_CameraVPMatrix", self.camera.view_projection(self.size));
                let origin = self.camera.position - sun.forward() * GOD_RAY_DISTANCE;
                let screen = self.camera.world_to_screen_point(origin, self.size);
                params.set_vec3(
                    "_GodRayScreenPos",
                    Vec3::new(
                        screen.x / self.size.width as f32,
                        screen.y / self.size.height as f32,
                        screen.z,
                    ),
                );

                let rays1 = scope.acquire(TargetDesc::new(quarter, PixelFormat::RgbaHalf))?;
                let rays2 = scope.acquire(TargetDesc::new(quarter, PixelFormat::RgbaHalf))?;
                let steps = effect.effective_steps();

                let params = material.params_mut();
                params.set_int("_GodRaySteps", steps);
                params.set_float("_GodRayLength", effect.god_ray_length);
                params.set_float("_GodRayFalloff", 1.0);
                let glow = sun.color.scaled(sun.intensity * effect.god_ray_glow);
                params.set_vector("_GodrayGlow", Vec4::from_array(glow.to_array()));
                params.set_texture("_GodRayTex", mip1);
                blit(scope, material, self.source, rays1, Pass::ZoomBlur, blits)?;

                let params = material.params_mut();
                params.set_float("_GodRayLength", effect.god_ray_length / steps as f32 * 3.0);
                params.set_float("_GodRayFalloff", 1.0 / steps as f32);
                params.set_vector("_GodrayGlow", Vec4::ZERO);
                params.set_texture("_GodRayTex", rays1);
                blit(scope, material, self.source, rays2, Pass::ZoomBlur, blits)?;

                let params = material.params_mut();
                params.set_texture("_GodRayTex", rays2);
                params.set_texture("_GodRayTexAlt", rays1);
                true
            }
            None => {
                let params = material.params_mut();
                params.set_texture("_GodRayTex", TextureBinding::Black);
                params.set_texture("_GodRayTexAlt", TextureBinding::Black);
                false
            }
        };

        // Compose
        let params = material.params_mut();
        params.set_texture("_BloomTex", blur_y);
        params.set_texture("_BloomTex2", mip2);
        params.set_float("_BloomAmount", effect.bloom_amount);
        params.set_float("_GodRayAmount", effect.god_ray_amount);
        blit(scope, material, self.source, self.dest, Pass::Compose, blits)?;

        Ok(god_rays)
    }
}

fn blit<E: PassExecutor + ?Sized>(
    scope: &mut TargetScope<'_, E>,
    material: &Material,
    source: TargetId,
    dest: TargetId,
    pass: Pass,
    blits: &mut u32,
) -> StormyResult<()> {
    tracing::debug!("{} pass {} -> {}", pass, source, dest);
    scope.executor().blit(source, dest, material, pass)?;
    *blits += 1;
    Ok(())
}

fn set_screen_size(material: &mut Material, size: FrameSize) {
    let params = material.params_mut();
    params.set_float("_ScreenX", size.width as f32);
    params.set_float("_ScreenY", size.height as f32);
    params.set_vec2(
        "_OneOverScreenSize",
        Vec2::new(1.0 / size.width as f32, 1.0 / size.height as f32),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingExecutor;
    use stormy_core::ShaderValue;

    fn orchestrator(sun: Option<DirectionalLight>) -> PostProcessOrchestrator {
        let config = PostProcessConfig {
            sun,
            ..PostProcessConfig::default()
        };
        PostProcessOrchestrator::new(&config, Camera::default())
    }

    #[test]
    fn test_initialize_sets_depth_mode() {
        let mut exec = RecordingExecutor::new();
        let mut post = orchestrator(None);
        assert_eq!(post.state(), LifecycleState::Uninitialized);
        post.initialize(&mut exec).unwrap();
        assert_eq!(post.state(), LifecycleState::Initialized);
        assert_eq!(post.camera().depth_texture_mode, DepthTextureMode::Depth);
    }

    #[test]
    fn test_missing_shader_keeps_orchestrator_inert() {
        let mut exec = RecordingExecutor::without_shader();
        let mut post = orchestrator(None);
        let err = post.initialize(&mut exec).unwrap_err();
        assert!(matches!(err, StormyError::MissingShaderResource { .. }));
        assert!(post.initialize(&mut exec).is_err());
        assert!(!post.is_initialized());

        let src = exec.import_frame(FrameSize::new(64, 64));
        let dst = exec.import_frame(FrameSize::new(64, 64));
        let report = post.process_frame(&mut exec, src, dst).unwrap();
        assert_eq!(report.outcome, FrameOutcome::Skipped);
        assert!(exec.events().is_empty());
    }

    #[test]
    fn test_shader_without_all_passes_is_rejected() {
        let handle = crate::executor::ShaderHandle::new(stormy_core::DEFAULT_SHADER_NAME, 3);
        let mut exec = RecordingExecutor::with_shader(handle);
        let mut post = orchestrator(None);
        assert!(matches!(
            post.initialize(&mut exec),
            Err(StormyError::Render(_))
        ));
    }

    #[test]
    fn test_pass_order_without_sun() {
        let mut exec = RecordingExecutor::new();
        let mut post = orchestrator(None);
        post.initialize(&mut exec).unwrap();
        let src = exec.import_frame(FrameSize::new(64, 48));
        let dst = exec.import_frame(FrameSize::new(64, 48));
        let report = post.process_frame(&mut exec, src, dst).unwrap();

        let passes: Vec<Pass> = exec.blits().iter().map(|b| b.pass).collect();
        assert_eq!(
            passes,
            vec![
                Pass::Threshold,
                Pass::Mip,
                Pass::Mip,
                Pass::Blur,
                Pass::Blur,
                Pass::Blur,
                Pass::Blur,
                Pass::Compose
            ]
        );
        assert_eq!(report.outcome, FrameOutcome::Composited);
        assert_eq!(report.blits, 8);
        assert_eq!(report.targets_acquired, 5);
        assert!(!report.god_rays);
    }

    #[test]
    fn test_pass_order_with_sun() {
        let mut exec = RecordingExecutor::new();
        let mut post = orchestrator(Some(DirectionalLight::new(Vec3::new(0.0, -0.3, 1.0))));
        post.initialize(&mut exec).unwrap();
        let src = exec.import_frame(FrameSize::new(64, 48));
        let dst = exec.import_frame(FrameSize::new(64, 48));
        let report = post.process_frame(&mut exec, src, dst).unwrap();

        let blits = exec.blits();
        let zoom: Vec<_> = blits.iter().filter(|b| b.pass == Pass::ZoomBlur).collect();
        assert_eq!(zoom.len(), 2);
        assert!(zoom.iter().all(|b| b.source == src));
        assert_eq!(report.targets_acquired, 7);
        assert!(report.god_rays);

        let compose = blits.last().unwrap();
        assert_eq!(compose.pass, Pass::Compose);
        assert_eq!(
            compose.params.texture("_GodRayTex"),
            Some(TextureBinding::Target(zoom[1].dest))
        );
        assert_eq!(
            compose.params.texture("_GodRayTexAlt"),
            Some(TextureBinding::Target(zoom[0].dest))
        );
    }

    #[test]
    fn test_second_zoom_pass_scales_by_steps() {
        let mut exec = RecordingExecutor::new();
        let mut post = orchestrator(Some(DirectionalLight::new(Vec3::NEG_Z)));
        post.initialize(&mut exec).unwrap();
        let src = exec.import_frame(FrameSize::new(32, 32));
        let dst = exec.import_frame(FrameSize::new(32, 32));
        post.process_frame(&mut exec, src, dst).unwrap();

        let blits = exec.blits();
        let zoom: Vec<_> = blits.iter().filter(|b| b.pass == Pass::ZoomBlur).collect();
        assert_eq!(zoom[0].params.float("_GodRayFalloff"), Some(1.0));
        assert_eq!(zoom[0].params.int("_GodRaySteps"), Some(10));
        let length = zoom[1].params.float("_GodRayLength").unwrap();
        assert!((length - 0.3).abs() < 1e-6);
        assert!((zoom[1].params.float("_GodRayFalloff").unwrap() - 0.1).abs() < 1e-6);
        assert_eq!(zoom[1].params.vector("_GodrayGlow"), Some(Vec4::ZERO));
        let glow = zoom[0].params.vector("_GodrayGlow").unwrap();
        assert!((glow.x - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_sun_dir_zero_without_light() {
        let mut exec = RecordingExecutor::new();
        let mut post = orchestrator(None);
        post.initialize(&mut exec).unwrap();
        let src = exec.import_frame(FrameSize::new(16, 16));
        let dst = exec.import_frame(FrameSize::new(16, 16));
        post.process_frame(&mut exec, src, dst).unwrap();
        let threshold = exec.blits()[0].params.get("_SunDir").cloned();
        assert_eq!(threshold, Some(ShaderValue::Vector(Vec4::ZERO)));
    }

    #[test]
    fn test_teardown_then_reinitialize() {
        let mut exec = RecordingExecutor::new();
        let mut post = orchestrator(None);
        post.initialize(&mut exec).unwrap();
        let src = exec.import_frame(FrameSize::new(16, 16));
        let dst = exec.import_frame(FrameSize::new(16, 16));
        post.process_frame(&mut exec, src, dst).unwrap();
        assert!(!post.material().unwrap().params().is_empty());

        post.teardown();
        assert_eq!(post.state(), LifecycleState::Uninitialized);
        assert!(post.material().is_none());
        assert_eq!(
            post.process_frame(&mut exec, src, dst).unwrap().outcome,
            FrameOutcome::Skipped
        );

        post.initialize(&mut exec).unwrap();
        assert!(post.material().unwrap().params().is_empty());
    }

    #[test]
    fn test_tiny_source_passes_through() {
        let mut exec = RecordingExecutor::new();
        let mut post = orchestrator(None);
        post.initialize(&mut exec).unwrap();
        let src = exec.import_frame(FrameSize::new(7, 100));
        let dst = exec.import_frame(FrameSize::new(7, 100));
        let report = post.process_frame(&mut exec, src, dst).unwrap();
        assert_eq!(report.outcome, FrameOutcome::PassThrough);
        assert!(exec.acquisitions().is_empty());
    }

    #[test]
    fn test_set_effect_clamps() {
        let mut post = orchestrator(None);
        post.set_effect(EffectConfiguration {
            bloom_spread: 20.0,
            ..EffectConfiguration::default()
        });
        assert_eq!(post.effect().bloom_spread, 8.0);
    }
}
