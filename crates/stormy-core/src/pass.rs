use serde::{Deserialize, Serialize};
use std::fmt;

/// The sub-programs of the post-process shader, addressed by ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Pass {
    Compose = 0,
    Mip = 1,
    Threshold = 2,
    Blur = 3,
    ZoomBlur = 4,
}

impl Pass {
    /// Every pass in ordinal order.
    pub const ALL: [Pass; 5] = [
        Pass::Compose,
        Pass::Mip,
        Pass::Threshold,
        Pass::Blur,
        Pass::ZoomBlur,
    ];

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn from_index(index: u32) -> Option<Pass> {
        Pass::ALL.get(index as usize).copied()
    }

    /// Entry point name a shader program exposes for this pass.
    pub fn entry_point(self) -> &'static str {
        match self {
            Pass::Compose => "fs_compose",
            Pass::Mip => "fs_mip",
            Pass::Threshold => "fs_threshold",
            Pass::Blur => "fs_blur",
            Pass::ZoomBlur => "fs_zoom_blur",
        }
    }

    /// Texture parameters the pass samples besides its source.
    ///
    /// Bindings outside this list may name targets released in an earlier
    /// frame and must not be resolved.
    pub fn sampled_textures(self) -> &'static [&'static str] {
        match self {
            Pass::Compose => &["_BloomTex", "_BloomTex2", "_GodRayTex", "_GodRayTexAlt"],
            Pass::ZoomBlur => &["_GodRayTex"],
            Pass::Mip | Pass::Threshold | Pass::Blur => &[],
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Pass::Compose => "compose",
            Pass::Mip => "mip",
            Pass::Threshold => "threshold",
            Pass::Blur => "blur",
            Pass::ZoomBlur => "zoom-blur",
        };
        f.write_str(name)
    }
}
