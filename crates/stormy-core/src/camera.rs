//! Perspective camera and directional light.
//!
//! World space is right-handed with +Y up. A camera looks down its local -Z
//! axis. Screen coordinates are in pixels with the origin at the bottom-left
//! corner, matching the host's `OnRenderImage` convention.

use glam::{Mat4, Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::frame::FrameSize;
use crate::Color;

/// Whether the host renders a depth texture alongside the color frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DepthTextureMode {
    #[default]
    None,
    Depth,
}

/// A perspective camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub position: Vec3,
    pub rotation: Quat,
    /// Vertical field of view in degrees.
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub depth_texture_mode: DepthTextureMode,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            fov_y_degrees: 60.0,
            near: 0.3,
            far: 1000.0,
            depth_texture_mode: DepthTextureMode::None,
        }
    }
}

impl Camera {
    /// Camera at `position` looking toward `target`.
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        let view = Mat4::look_at_rh(position, target, Vec3::Y);
        let (_, rotation, _) = view.inverse().to_scale_rotation_translation();
        Self {
            position,
            rotation,
            ..Self::default()
        }
    }

    /// Unit vector the camera looks along.
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    /// World-to-camera matrix.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position).inverse()
    }

    /// Perspective projection with a 0..1 depth range.
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_degrees.to_radians(), aspect, self.near, self.far)
    }

    pub fn view_projection(&self, size: FrameSize) -> Mat4 {
        self.projection_matrix(aspect_of(size)) * self.view_matrix()
    }

    /// Direction of the ray leaving the camera through a screen pixel.
    pub fn screen_point_to_ray(&self, point: Vec2, size: FrameSize) -> Vec3 {
        let aspect = aspect_of(size);
        let tan_half = (self.fov_y_degrees.to_radians() * 0.5).tan();
        let ndc_x = if size.width == 0 { 0.0 } else { 2.0 * point.x / size.width as f32 - 1.0 };
        let ndc_y = if size.height == 0 { 0.0 } else { 2.0 * point.y / size.height as f32 - 1.0 };
        let local = Vec3::new(ndc_x * tan_half * aspect, ndc_y * tan_half, -1.0);
        (self.rotation * local).normalize()
    }

    /// Project a world point to screen pixels. `z` is the distance in front of
    /// the camera along its forward axis (negative when behind it).
    pub fn world_to_screen_point(&self, world: Vec3, size: FrameSize) -> Vec3 {
        let view_pos = self.view_matrix().transform_point3(world);
        let clip = self.projection_matrix(aspect_of(size)) * view_pos.extend(1.0);
        let w = if clip.w.abs() < f32::EPSILON { f32::EPSILON } else { clip.w };
        let ndc = clip.truncate() / w;
        Vec3::new(
            (ndc.x + 1.0) * 0.5 * size.width as f32,
            (ndc.y + 1.0) * 0.5 * size.height as f32,
            -view_pos.z,
        )
    }

    /// Ray directions through the top-left, top-right, bottom-left and
    /// bottom-right screen corners.
    pub fn corner_rays(&self, size: FrameSize) -> [Vec3; 4] {
        let w = size.width as f32;
        let h = size.height as f32;
        [
            self.screen_point_to_ray(Vec2::new(0.0, h), size),
            self.screen_point_to_ray(Vec2::new(w, h), size),
            self.screen_point_to_ray(Vec2::new(0.0, 0.0), size),
            self.screen_point_to_ray(Vec2::new(w, 0.0), size),
        ]
    }
}

fn aspect_of(size: FrameSize) -> f32 {
    if size.height == 0 {
        1.0
    } else {
        size.width as f32 / size.height as f32
    }
}

/// The scene's sun.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionalLight {
    /// Direction the light travels (its transform's forward axis).
    pub direction: Vec3,
    #[serde(default)]
    pub color: Color,
    #[serde(default = "default_intensity")]
    pub intensity: f32,
}

fn default_intensity() -> f32 {
    1.0
}

impl DirectionalLight {
    pub fn new(direction: Vec3) -> Self {
        Self {
            direction,
            color: Color::WHITE,
            intensity: 1.0,
        }
    }

    /// Normalized travel direction; zero if the configured vector is degenerate.
    pub fn forward(&self) -> Vec3 {
        self.direction.normalize_or_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: FrameSize = FrameSize { width: 1600, height: 900 };

    #[test]
    fn test_default_camera_looks_down_negative_z() {
        let cam = Camera::default();
        assert!((cam.forward() - Vec3::NEG_Z).length() < 1e-6);
    }

    #[test]
    fn test_center_ray_is_forward() {
        let cam = Camera::looking_at(Vec3::new(0.0, 2.0, 5.0), Vec3::new(0.0, 2.0, 0.0));
        let ray = cam.screen_point_to_ray(Vec2::new(800.0, 450.0), SIZE);
        assert!((ray - cam.forward()).length() < 1e-5);
    }

    #[test]
    fn test_corner_rays_are_symmetric() {
        let cam = Camera::default();
        let [tl, tr, bl, br] = cam.corner_rays(SIZE);
        assert!(tl.y > 0.0 && tr.y > 0.0);
        assert!(bl.y < 0.0 && br.y < 0.0);
        assert!(tl.x < 0.0 && tr.x > 0.0);
        assert!((tl.x + tr.x).abs() < 1e-6);
        assert!((tl.y + bl.y).abs() < 1e-6);
    }

    #[test]
    fn test_world_to_screen_center_and_depth() {
        let cam = Camera::default();
        let p = cam.world_to_screen_point(Vec3::new(0.0, 0.0, -10.0), SIZE);
        assert!((p.x - 800.0).abs() < 1e-3);
        assert!((p.y - 450.0).abs() < 1e-3);
        assert!((p.z - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_screen_ray_round_trips_through_projection() {
        let cam = Camera::looking_at(Vec3::new(3.0, 1.0, 4.0), Vec3::ZERO);
        let pixel = Vec2::new(400.0, 700.0);
        let dir = cam.screen_point_to_ray(pixel, SIZE);
        let projected = cam.world_to_screen_point(cam.position + dir * 25.0, SIZE);
        assert!((projected.x - pixel.x).abs() < 0.05);
        assert!((projected.y - pixel.y).abs() < 0.05);
    }

    #[test]
    fn test_light_forward_normalizes() {
        let light = DirectionalLight::new(Vec3::new(0.0, -3.0, 0.0));
        assert!((light.forward() - Vec3::NEG_Y).length() < 1e-6);
        assert_eq!(DirectionalLight::new(Vec3::ZERO).forward(), Vec3::ZERO);
    }
}
