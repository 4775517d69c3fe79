//! Named shader parameters consumed by each blit.

use glam::{Mat4, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Handle to a render target owned by a pass executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub u32);

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a texture slot is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextureBinding {
    /// The constant all-zero texture.
    Black,
    Target(TargetId),
}

impl From<TargetId> for TextureBinding {
    fn from(id: TargetId) -> Self {
        TextureBinding::Target(id)
    }
}

/// A single parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ShaderValue {
    Float(f32),
    Int(i32),
    Vector(Vec4),
    Matrix(Mat4),
    Texture(TextureBinding),
}

/// Parameter name to value map. Setting a name again overwrites it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShaderParameterSet {
    values: BTreeMap<String, ShaderValue>,
}

impl ShaderParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: ShaderValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn set_float(&mut self, name: &str, value: f32) {
        self.set(name, ShaderValue::Float(value));
    }

    pub fn set_int(&mut self, name: &str, value: i32) {
        self.set(name, ShaderValue::Int(value));
    }

    pub fn set_vector(&mut self, name: &str, value: Vec4) {
        self.set(name, ShaderValue::Vector(value));
    }

    pub fn set_vec2(&mut self, name: &str, value: Vec2) {
        self.set_vector(name, value.extend(0.0).extend(0.0));
    }

    pub fn set_vec3(&mut self, name: &str, value: Vec3) {
        self.set_vector(name, value.extend(0.0));
    }

    pub fn set_matrix(&mut self, name: &str, value: Mat4) {
        self.set(name, ShaderValue::Matrix(value));
    }

    pub fn set_texture(&mut self, name: &str, binding: impl Into<TextureBinding>) {
        self.set(name, ShaderValue::Texture(binding.into()));
    }

    pub fn get(&self, name: &str) -> Option<&ShaderValue> {
        self.values.get(name)
    }

    /// Float value; ints are widened.
    pub fn float(&self, name: &str) -> Option<f32> {
        match self.values.get(name)? {
            ShaderValue::Float(v) => Some(*v),
            ShaderValue::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i32> {
        match self.values.get(name)? {
            ShaderValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn vector(&self, name: &str) -> Option<Vec4> {
        match self.values.get(name)? {
            ShaderValue::Vector(v) => Some(*v),
            _ => None,
        }
    }

    pub fn matrix(&self, name: &str) -> Option<Mat4> {
        match self.values.get(name)? {
            ShaderValue::Matrix(m) => Some(*m),
            _ => None,
        }
    }

    pub fn texture(&self, name: &str) -> Option<TextureBinding> {
        match self.values.get(name)? {
            ShaderValue::Texture(t) => Some(*t),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ShaderValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let mut params = ShaderParameterSet::new();
        params.set_float("_BlurSpread", 1.0);
        params.set_float("_BlurSpread", 6.0);
        assert_eq!(params.float("_BlurSpread"), Some(6.0));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_typed_getters_reject_other_kinds() {
        let mut params = ShaderParameterSet::new();
        params.set_int("_GodRaySteps", 10);
        params.set_texture("_GodRayTex", TextureBinding::Black);
        assert_eq!(params.int("_GodRaySteps"), Some(10));
        assert_eq!(params.float("_GodRaySteps"), Some(10.0));
        assert_eq!(params.vector("_GodRaySteps"), None);
        assert_eq!(params.texture("_GodRayTex"), Some(TextureBinding::Black));
        assert_eq!(params.float("_Missing"), None);
    }

    #[test]
    fn test_vec2_pads_with_zero() {
        let mut params = ShaderParameterSet::new();
        params.set_vec2("_BlurDir", Vec2::new(1.0, 0.0));
        assert_eq!(params.vector("_BlurDir"), Some(Vec4::new(1.0, 0.0, 0.0, 0.0)));
    }

    #[test]
    fn test_target_binding_from_id() {
        let mut params = ShaderParameterSet::new();
        params.set_texture("_BloomTex", TargetId(7));
        assert_eq!(
            params.texture("_BloomTex"),
            Some(TextureBinding::Target(TargetId(7)))
        );
    }
}
