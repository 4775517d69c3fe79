//! # stormy-core
//!
//! Core types for the Stormy post-process compositor: frames, colors, the
//! camera and sun, shader parameters, pass ordinals, effect configuration and
//! error types.

pub mod camera;
pub mod color;
pub mod config;
pub mod error;
pub mod frame;
pub mod hash;
pub mod params;
pub mod pass;

pub use config::*;

pub use camera::{Camera, DepthTextureMode, DirectionalLight};
pub use color::Color;
pub use error::{StormyError, StormyResult};
pub use frame::{FrameBuffer, FrameSize, PixelFormat};
pub use params::{ShaderParameterSet, ShaderValue, TargetId, TextureBinding};
pub use pass::Pass;

pub use glam;
