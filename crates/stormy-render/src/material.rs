use stormy_core::ShaderParameterSet;

use crate::executor::ShaderHandle;

/// A shader program plus the parameters bound to it.
///
/// Parameters persist between blits and between frames; a pass reads whatever
/// was last written under each name.
#[derive(Debug, Clone)]
pub struct Material {
    shader: ShaderHandle,
    params: ShaderParameterSet,
}

impl Material {
    pub fn new(shader: ShaderHandle) -> Self {
        Self {
            shader,
            params: ShaderParameterSet::new(),
        }
    }

    pub fn shader(&self) -> &ShaderHandle {
        &self.shader
    }

    pub fn params(&self) -> &ShaderParameterSet {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ShaderParameterSet {
        &mut self.params
    }
}
