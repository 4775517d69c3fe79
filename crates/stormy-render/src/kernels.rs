//! CPU renditions of the post-process passes.
//!
//! Every kernel fills an output RGBA `f32` slice of `out_size` pixels, one row
//! per rayon task. Texture coordinates have `v = 0` on the top row; screen
//! positions coming from the camera have their origin at the bottom-left and
//! are flipped here.

use glam::{Vec2, Vec3, Vec4};
use rayon::prelude::*;
use stormy_core::{FrameBuffer, FrameSize};

/// Sharpness of the sun disc added by the threshold pass.
const SUN_DISC_EXPONENT: i32 = 256;

/// 9-tap Gaussian, center weight first.
const GAUSSIAN_WEIGHTS: [f32; 5] = [0.227_027, 0.194_594_6, 0.121_621_6, 0.054_054, 0.016_216];

fn shade_rows<F>(out: &mut [f32], out_size: FrameSize, shade: F)
where
    F: Fn(u32, u32) -> [f32; 4] + Sync,
{
    let row_len = out_size.width as usize * 4;
    if row_len == 0 {
        return;
    }
    out.par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                px.copy_from_slice(&shade(x as u32, y as u32));
            }
        });
}

fn uv_of(x: u32, y: u32, size: FrameSize) -> Vec2 {
    Vec2::new(
        (x as f32 + 0.5) / size.width as f32,
        (y as f32 + 0.5) / size.height as f32,
    )
}

/// Fetch `tex` at the output pixel, exact when the sizes match.
fn fetch(tex: &FrameBuffer, x: u32, y: u32, out_size: FrameSize) -> [f32; 4] {
    if tex.width == out_size.width && tex.height == out_size.height {
        tex.texel(x, y)
    } else {
        let uv = uv_of(x, y, out_size);
        tex.sample(uv.x, uv.y)
    }
}

fn sample_or_black(tex: Option<&FrameBuffer>, uv: Vec2) -> Vec4 {
    tex.map(|t| Vec4::from_array(t.sample(uv.x, uv.y)))
        .unwrap_or(Vec4::ZERO)
}

/// Resampling copy.
pub fn copy(src: &FrameBuffer, out: &mut [f32], out_size: FrameSize) {
    shade_rows(out, out_size, |x, y| fetch(src, x, y, out_size));
}

pub struct ThresholdParams {
    pub threshold: f32,
    pub extra: f32,
    /// Direction the sun travels; zero disables the disc.
    pub sun_dir: Vec3,
    /// Top-left, top-right, bottom-left, bottom-right view rays.
    pub corners: [Vec3; 4],
}

/// Soft-knee bright pass plus a sun disc along the sun's view direction.
pub fn threshold(src: &FrameBuffer, params: &ThresholdParams, out: &mut [f32], out_size: FrameSize) {
    let knee = params.extra;
    let to_sun = -params.sun_dir;
    let [tl, tr, bl, br] = params.corners;
    shade_rows(out, out_size, |x, y| {
        let c = Vec4::from_array(fetch(src, x, y, out_size));
        let brightness = c.x.max(c.y).max(c.z);

        let soft = (brightness - params.threshold + knee).clamp(0.0, 2.0 * knee);
        let soft = soft * soft / (4.0 * knee + 1e-5);
        let contribution = soft.max(brightness - params.threshold) / brightness.max(1e-5);

        let sun = if to_sun == Vec3::ZERO {
            0.0
        } else {
            let uv = uv_of(x, y, out_size);
            let view = tl.lerp(tr, uv.x).lerp(bl.lerp(br, uv.x), uv.y).normalize_or_zero();
            view.dot(to_sun).max(0.0).powi(SUN_DISC_EXPONENT)
        };

        let rgb = c.truncate() * (contribution.max(0.0) + sun);
        [rgb.x, rgb.y, rgb.z, 1.0]
    });
}

/// Box downsample over each output pixel's footprint in the source.
pub fn mip(src: &FrameBuffer, out: &mut [f32], out_size: FrameSize) {
    let rx = src.width as f32 / out_size.width.max(1) as f32;
    let ry = src.height as f32 / out_size.height.max(1) as f32;
    shade_rows(out, out_size, |x, y| {
        let x0 = (x as f32 * rx) as u32;
        let y0 = (y as f32 * ry) as u32;
        let x1 = (((x + 1) as f32 * rx) as u32).max(x0 + 1);
        let y1 = (((y + 1) as f32 * ry) as u32).max(y0 + 1);
        let mut sum = Vec4::ZERO;
        for sy in y0..y1 {
            for sx in x0..x1 {
                sum += Vec4::from_array(src.texel(sx, sy));
            }
        }
        let n = ((x1 - x0) * (y1 - y0)) as f32;
        (sum / n).to_array()
    });
}

/// One direction of the separable Gaussian. `spread` scales the tap distance
/// in source texels.
pub fn blur(src: &FrameBuffer, direction: Vec2, spread: f32, out: &mut [f32], out_size: FrameSize) {
    let texel = Vec2::new(1.0 / src.width.max(1) as f32, 1.0 / src.height.max(1) as f32);
    let step = direction * texel * spread;
    shade_rows(out, out_size, |x, y| {
        let uv = uv_of(x, y, out_size);
        let mut sum = Vec4::from_array(src.sample(uv.x, uv.y)) * GAUSSIAN_WEIGHTS[0];
        for (i, weight) in GAUSSIAN_WEIGHTS.iter().enumerate().skip(1) {
            let offset = step * i as f32;
            let a = uv + offset;
            let b = uv - offset;
            sum += Vec4::from_array(src.sample(a.x, a.y)) * *weight;
            sum += Vec4::from_array(src.sample(b.x, b.y)) * *weight;
        }
        sum.to_array()
    });
}

pub struct ZoomBlurParams<'a> {
    /// Texture marched toward the light.
    pub rays: Option<&'a FrameBuffer>,
    /// Light position as screen fractions (bottom-left origin) and depth.
    pub screen_pos: Vec3,
    pub steps: u32,
    pub length: f32,
    pub falloff: f32,
    pub glow: Vec4,
}

/// Radial blur toward the light's screen position.
pub fn zoom_blur(params: &ZoomBlurParams<'_>, out: &mut [f32], out_size: FrameSize) {
    let steps = params.steps.max(1);
    let light_uv = Vec2::new(params.screen_pos.x, 1.0 - params.screen_pos.y);
    let visible = params.screen_pos.z > 0.0;
    shade_rows(out, out_size, |x, y| {
        if !visible {
            return [0.0, 0.0, 0.0, 1.0];
        }
        let uv = uv_of(x, y, out_size);
        let delta = (light_uv - uv) * params.length / steps as f32;
        let mut acc = Vec4::ZERO;
        for i in 0..steps {
            let weight = 1.0 - i as f32 / steps as f32;
            acc += sample_or_black(params.rays, uv + delta * i as f32) * weight;
        }
        let dist = (light_uv - uv).length();
        let halo = (1.0 - dist).max(0.0).powi(4);
        let rgb = acc.truncate() * params.falloff + params.glow.truncate() * halo;
        [rgb.x, rgb.y, rgb.z, 1.0]
    });
}

pub struct ComposeParams<'a> {
    pub bloom_wide: Option<&'a FrameBuffer>,
    pub bloom_tight: Option<&'a FrameBuffer>,
    pub god_rays: Option<&'a FrameBuffer>,
    pub god_rays_previous: Option<&'a FrameBuffer>,
    pub bloom_amount: f32,
    pub god_ray_amount: f32,
}

/// Additive composite. A term whose amount is zero is skipped entirely, so
/// zero amounts reproduce the source exactly.
pub fn compose(src: &FrameBuffer, params: &ComposeParams<'_>, out: &mut [f32], out_size: FrameSize) {
    shade_rows(out, out_size, |x, y| {
        let c = fetch(src, x, y, out_size);
        let mut rgb = Vec3::new(c[0], c[1], c[2]);
        let uv = uv_of(x, y, out_size);
        if params.bloom_amount > 0.0 {
            let bloom = (sample_or_black(params.bloom_wide, uv)
                + sample_or_black(params.bloom_tight, uv))
                * 0.5;
            rgb += bloom.truncate() * params.bloom_amount;
        }
        if params.god_ray_amount > 0.0 {
            let mut rays = sample_or_black(params.god_rays, uv);
            if params.god_rays_previous.is_some() {
                rays = (rays + sample_or_black(params.god_rays_previous, uv)) * 0.5;
            }
            rgb += rays.truncate() * params.god_ray_amount;
        }
        [rgb.x, rgb.y, rgb.z, c[3]]
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use stormy_core::{Color, PixelFormat};

    fn run(size: FrameSize, f: impl FnOnce(&mut [f32])) -> FrameBuffer {
        let mut fb = FrameBuffer::new(size.width, size.height, PixelFormat::RgbaFloat);
        f(&mut fb.data);
        fb
    }

    #[test]
    fn test_gaussian_weights_sum_to_one() {
        let total: f32 = GAUSSIAN_WEIGHTS[0] + 2.0 * GAUSSIAN_WEIGHTS[1..].iter().sum::<f32>();
        assert!((total - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_threshold_drops_dim_pixels() {
        let src = FrameBuffer::solid(8, 8, &Color::rgb(0.2, 0.2, 0.2));
        let params = ThresholdParams {
            threshold: 1.0,
            extra: 0.1,
            sun_dir: Vec3::ZERO,
            corners: [Vec3::NEG_Z; 4],
        };
        let size = FrameSize::new(4, 4);
        let out = run(size, |o| threshold(&src, &params, o, size));
        assert_eq!(out.texel(1, 1)[0], 0.0);
    }

    #[test]
    fn test_threshold_keeps_excess_of_bright_pixels() {
        let src = FrameBuffer::solid(8, 8, &Color::rgb(3.0, 3.0, 3.0));
        let params = ThresholdParams {
            threshold: 1.0,
            extra: 0.0,
            sun_dir: Vec3::ZERO,
            corners: [Vec3::NEG_Z; 4],
        };
        let size = FrameSize::new(4, 4);
        let out = run(size, |o| threshold(&src, &params, o, size));
        assert!((out.texel(2, 2)[0] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_threshold_adds_sun_disc_when_looking_at_sun() {
        let src = FrameBuffer::solid(8, 8, &Color::rgb(0.5, 0.5, 0.5));
        let params = ThresholdParams {
            threshold: 3.0,
            extra: 0.0,
            sun_dir: Vec3::Z,
            corners: [Vec3::NEG_Z; 4],
        };
        let size = FrameSize::new(4, 4);
        let out = run(size, |o| threshold(&src, &params, o, size));
        assert!((out.texel(0, 0)[0] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_mip_averages_footprint() {
        let mut src = FrameBuffer::new(4, 4, PixelFormat::RgbaFloat);
        src.set_pixel(0, 0, [4.0, 0.0, 0.0, 0.0]);
        let size = FrameSize::new(2, 2);
        let out = run(size, |o| mip(&src, o, size));
        assert_eq!(out.texel(0, 0)[0], 1.0);
        assert_eq!(out.texel(1, 1)[0], 0.0);
    }

    #[test]
    fn test_blur_preserves_flat_field() {
        let src = FrameBuffer::solid(16, 16, &Color::rgb(0.5, 0.25, 1.0));
        let size = src.size();
        let out = run(size, |o| blur(&src, Vec2::X, 6.0, o, size));
        let px = out.texel(7, 7);
        assert!((px[0] - 0.5).abs() < 1e-3);
        assert!((px[2] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_blur_spreads_along_direction_only() {
        let mut src = FrameBuffer::new(16, 16, PixelFormat::RgbaFloat);
        src.set_pixel(8, 8, [1.0, 1.0, 1.0, 1.0]);
        let size = src.size();
        let out = run(size, |o| blur(&src, Vec2::X, 1.0, o, size));
        assert!(out.texel(9, 8)[0] > 0.0);
        assert_eq!(out.texel(8, 9)[0], 0.0);
    }

    #[test]
    fn test_zoom_blur_is_black_when_light_is_behind() {
        let rays = FrameBuffer::solid(8, 8, &Color::WHITE);
        let params = ZoomBlurParams {
            rays: Some(&rays),
            screen_pos: Vec3::new(0.5, 0.5, -1.0),
            steps: 10,
            length: 1.0,
            falloff: 1.0,
            glow: Vec4::ONE,
        };
        let size = FrameSize::new(8, 8);
        let out = run(size, |o| zoom_blur(&params, o, size));
        assert_eq!(out.texel(4, 4)[0], 0.0);
    }

    #[test]
    fn test_zoom_blur_glows_near_light() {
        let params = ZoomBlurParams {
            rays: None,
            screen_pos: Vec3::new(0.5, 0.5, 100.0),
            steps: 4,
            length: 1.0,
            falloff: 1.0,
            glow: Vec4::new(1.0, 0.5, 0.0, 0.0),
        };
        let size = FrameSize::new(8, 8);
        let out = run(size, |o| zoom_blur(&params, o, size));
        let center = out.texel(4, 4)[0];
        let corner = out.texel(0, 0)[0];
        assert!(center > corner);
        assert!(center > 0.5);
    }

    #[test]
    fn test_compose_with_zero_amounts_is_identity() {
        let mut src = FrameBuffer::new(8, 8, PixelFormat::RgbaFloat);
        src.set_pixel(3, 5, [0.1, 0.2, 0.3, 0.4]);
        let bloom = FrameBuffer::solid(1, 1, &Color::rgb(f32::INFINITY, 1.0, 1.0));
        let params = ComposeParams {
            bloom_wide: Some(&bloom),
            bloom_tight: Some(&bloom),
            god_rays: Some(&bloom),
            god_rays_previous: None,
            bloom_amount: 0.0,
            god_ray_amount: 0.0,
        };
        let size = src.size();
        let out = run(size, |o| compose(&src, &params, o, size));
        assert_eq!(out.data, src.data);
    }
}
