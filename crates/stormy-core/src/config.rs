use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::camera::DirectionalLight;
use crate::error::StormyResult;

/// Name the post-process shader is registered under.
pub const DEFAULT_SHADER_NAME: &str = "Hidden/PostProcess";

/// Upper bound on zoom-blur samples per pixel.
pub const MAX_GOD_RAY_STEPS: i32 = 256;

/// Per-frame tunables. Changed only between frames.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EffectConfiguration {
    /// Brightness above which pixels bloom, [0, 3].
    pub bloom_threshold: f32,
    /// Soft knee below the threshold, [0, 1].
    pub bloom_extra: f32,
    /// [0, 10]
    pub bloom_amount: f32,
    /// Spread of the wide blur, [1, 8].
    pub bloom_spread: f32,
    /// [0, 1]
    pub god_ray_glow: f32,
    /// [0, 5]
    pub god_ray_amount: f32,
    /// [0, 1]
    pub god_ray_length: f32,
    pub god_ray_steps: i32,
}

impl Default for EffectConfiguration {
    fn default() -> Self {
        Self {
            bloom_threshold: 1.0,
            bloom_extra: 0.1,
            bloom_amount: 4.0,
            bloom_spread: 6.0,
            god_ray_glow: 0.1,
            god_ray_amount: 1.0,
            god_ray_length: 1.0,
            god_ray_steps: 10,
        }
    }
}

impl EffectConfiguration {
    /// Clamp every tunable into its editor range. NaN falls back to the default.
    pub fn sanitize(&self) -> Self {
        let d = Self::default();
        let clamp = |v: f32, lo: f32, hi: f32, fallback: f32| {
            if v.is_nan() {
                fallback
            } else {
                v.clamp(lo, hi)
            }
        };
        Self {
            bloom_threshold: clamp(self.bloom_threshold, 0.0, 3.0, d.bloom_threshold),
            bloom_extra: clamp(self.bloom_extra, 0.0, 1.0, d.bloom_extra),
            bloom_amount: clamp(self.bloom_amount, 0.0, 10.0, d.bloom_amount),
            bloom_spread: clamp(self.bloom_spread, 1.0, 8.0, d.bloom_spread),
            god_ray_glow: clamp(self.god_ray_glow, 0.0, 1.0, d.god_ray_glow),
            god_ray_amount: clamp(self.god_ray_amount, 0.0, 5.0, d.god_ray_amount),
            god_ray_length: clamp(self.god_ray_length, 0.0, 1.0, d.god_ray_length),
            god_ray_steps: self.god_ray_steps,
        }
    }

    /// Step count handed to the zoom blur, in `1..=MAX_GOD_RAY_STEPS`.
    pub fn effective_steps(&self) -> i32 {
        self.god_ray_steps.clamp(1, MAX_GOD_RAY_STEPS)
    }
}

/// Where the post-process shader program is looked up.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub name: String,
    /// Directories searched for `<name>.wgsl` by file-backed executors.
    pub search_paths: Vec<PathBuf>,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SHADER_NAME.to_string(),
            search_paths: vec![PathBuf::from("shaders")],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct PostProcessConfig {
    #[serde(default)]
    pub effect: EffectConfiguration,
    #[serde(default)]
    pub sun: Option<DirectionalLight>,
    #[serde(default)]
    pub shader: ShaderConfig,
}

impl PostProcessConfig {
    pub fn from_toml_str(contents: &str) -> StormyResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn to_toml_string(&self) -> StormyResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn load_from_file(path: &Path) -> StormyResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        tracing::debug!("Loaded post-process config from {}", path.display());
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> StormyResult<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_defaults() {
        let cfg = EffectConfiguration::default();
        assert_eq!(cfg.bloom_threshold, 1.0);
        assert_eq!(cfg.bloom_extra, 0.1);
        assert_eq!(cfg.bloom_amount, 4.0);
        assert_eq!(cfg.bloom_spread, 6.0);
        assert_eq!(cfg.god_ray_steps, 10);
    }

    #[test]
    fn test_sanitize_clamps_ranges() {
        let cfg = EffectConfiguration {
            bloom_threshold: 9.0,
            bloom_spread: 0.0,
            god_ray_amount: -1.0,
            bloom_amount: f32::NAN,
            ..Default::default()
        }
        .sanitize();
        assert_eq!(cfg.bloom_threshold, 3.0);
        assert_eq!(cfg.bloom_spread, 1.0);
        assert_eq!(cfg.god_ray_amount, 0.0);
        assert_eq!(cfg.bloom_amount, 4.0);
    }

    #[test]
    fn test_effective_steps_never_zero() {
        let cfg = EffectConfiguration {
            god_ray_steps: 0,
            ..Default::default()
        };
        assert_eq!(cfg.effective_steps(), 1);
        assert_eq!(cfg.god_ray_steps, 0);
    }

    #[test]
    fn test_effective_steps_are_capped() {
        let cfg = EffectConfiguration {
            god_ray_steps: i32::MAX,
            ..Default::default()
        };
        assert_eq!(cfg.effective_steps(), MAX_GOD_RAY_STEPS);
        assert_eq!(cfg.sanitize().god_ray_steps, i32::MAX);
    }

    #[test]
    fn test_partial_toml_takes_defaults() {
        let cfg = PostProcessConfig::from_toml_str(
            r#"
[effect]
bloom_amount = 2.5

[sun]
direction = [0.0, -1.0, 0.5]
"#,
        )
        .unwrap();
        assert_eq!(cfg.effect.bloom_amount, 2.5);
        assert_eq!(cfg.effect.bloom_spread, 6.0);
        let sun = cfg.sun.unwrap();
        assert_eq!(sun.direction, Vec3::new(0.0, -1.0, 0.5));
        assert_eq!(sun.intensity, 1.0);
        assert_eq!(cfg.shader.name, DEFAULT_SHADER_NAME);
    }

    #[test]
    fn test_toml_round_trip_keeps_values() {
        let mut cfg = PostProcessConfig::default();
        cfg.effect.god_ray_steps = 24;
        cfg.sun = Some(DirectionalLight::new(Vec3::new(0.3, -0.8, 0.1)));
        let text = cfg.to_toml_string().unwrap();
        assert_eq!(PostProcessConfig::from_toml_str(&text).unwrap(), cfg);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = PostProcessConfig::from_toml_str("effect = 3").unwrap_err();
        assert!(matches!(err, crate::StormyError::Config(_)));
    }
}
