//! # stormy-render
//!
//! The Stormy post-process engine. The orchestrator drives a fixed bloom and
//! god-ray pass graph through a [`PassExecutor`]; the software executor runs
//! the passes on the CPU, the GPU executor runs an external WGSL program.

pub mod executor;
pub mod frame_io;
pub mod gpu;
mod kernels;
pub mod material;
pub mod orchestrator;
pub mod pool;
pub mod recording;
pub mod software;

pub use executor::{PassExecutor, ShaderHandle, TargetScope};
pub use gpu::{GpuContext, GpuPassExecutor};
pub use material::Material;
pub use orchestrator::{FrameOutcome, FrameReport, LifecycleState, PostProcessOrchestrator};
pub use pool::{PoolStats, TargetDesc, TexturePool};
pub use recording::{ExecutorEvent, RecordingExecutor};
pub use software::{BlitStats, SoftwareExecutor};
