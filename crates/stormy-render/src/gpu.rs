use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wgpu::util::DeviceExt;
use wgpu::{Adapter, Device, Instance, Queue};

use stormy_core::{
    FrameBuffer, FrameSize, Pass, PixelFormat, ShaderParameterSet, StormyError, StormyResult,
    TargetId, TextureBinding,
};

use crate::executor::{PassExecutor, ShaderHandle};
use crate::material::Material;
use crate::pool::{TargetDesc, TexturePool, MAX_IDLE_FRAMES};

/// Every GPU target is stored as RGBA32F regardless of the requested format.
const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const BYTES_PER_TEXEL: u32 = 16;

/// A shared context for all GPU-accelerated operations.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
    /// Whether 32-bit float textures can be sampled with linear filtering.
    pub float_filterable: bool,
}

impl GpuContext {
    /// Initializes WGPU, selecting the best available backend (Metal, Vulkan, DX12, etc.)
    pub fn init() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None, // Headless rendering
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| anyhow::anyhow!("Failed to find suitable wgpu adapter"))?;

        let float_filterable = adapter
            .features()
            .contains(wgpu::Features::FLOAT32_FILTERABLE);
        let required_features = if float_filterable {
            wgpu::Features::FLOAT32_FILTERABLE
        } else {
            wgpu::Features::empty()
        };

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Stormy Headless GPU Device"),
                required_features,
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))?;

        tracing::info!(
            "GPU initialized: {} ({:?})",
            adapter.get_info().name,
            adapter.get_info().backend
        );

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            float_filterable,
        })
    }
}

/// Find `<dir>/<name>.wgsl` in the first search directory that has it.
pub fn locate_shader(search_paths: &[PathBuf], name: &str) -> Option<PathBuf> {
    search_paths
        .iter()
        .map(|dir| dir.join(format!("{}.wgsl", name)))
        .find(|path| path.is_file())
}

/// The parameter block as laid out in the program's uniform buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PassUniforms {
    pub view_dir_tl: [f32; 4],
    pub view_dir_tr: [f32; 4],
    pub view_dir_bl: [f32; 4],
    pub view_dir_br: [f32; 4],
    pub camera_vp: [[f32; 4]; 4],
    pub sun_dir: [f32; 4],
    pub god_ray_glow: [f32; 4],
    pub god_ray_screen_pos: [f32; 4],
    pub blur_dir: [f32; 4],
    pub one_over_screen_size: [f32; 4],
    pub bloom_threshold: f32,
    pub bloom_extra: f32,
    pub bloom_amount: f32,
    pub blur_spread: f32,
    pub god_ray_amount: f32,
    pub god_ray_length: f32,
    pub god_ray_falloff: f32,
    pub god_ray_steps: i32,
    pub screen_x: f32,
    pub screen_y: f32,
    pub has_god_ray_alt: f32,
    pub _pad: f32,
}

impl PassUniforms {
    /// Pack the named parameters. Unset names read as zero.
    pub fn from_params(params: &ShaderParameterSet) -> Self {
        let vector = |name: &str| params.vector(name).unwrap_or_default().to_array();
        let float = |name: &str| params.float(name).unwrap_or(0.0);
        Self {
            view_dir_tl: vector("_ViewDirTL"),
            view_dir_tr: vector("_ViewDirTR"),
            view_dir_bl: vector("_ViewDirBL"),
            view_dir_br: vector("_ViewDirBR"),
            camera_vp: params.matrix("_CameraVPMatrix").unwrap_or_default().to_cols_array_2d(),
            sun_dir: vector("_SunDir"),
            god_ray_glow: vector("_GodrayGlow"),
            god_ray_screen_pos: vector("_GodRayScreenPos"),
            blur_dir: vector("_BlurDir"),
            one_over_screen_size: vector("_OneOverScreenSize"),
            bloom_threshold: float("_BloomThreshold"),
            bloom_extra: float("_BloomExtra"),
            bloom_amount: float("_BloomAmount"),
            blur_spread: float("_BlurSpread"),
            god_ray_amount: float("_GodRayAmount"),
            god_ray_length: float("_GodRayLength"),
            god_ray_falloff: float("_GodRayFalloff"),
            god_ray_steps: params.int("_GodRaySteps").unwrap_or(1),
            screen_x: float("_ScreenX"),
            screen_y: float("_ScreenY"),
            has_god_ray_alt: match params.texture("_GodRayTexAlt") {
                Some(TextureBinding::Target(_)) => 1.0,
                _ => 0.0,
            },
            _pad: 0.0,
        }
    }
}

/// Texture slots after the source, sampler and uniforms.
const TEXTURE_SLOTS: [(u32, &str); 4] = [
    (3, "_BloomTex"),
    (4, "_BloomTex2"),
    (5, "_GodRayTex"),
    (6, "_GodRayTexAlt"),
];

/// A compiled post-process program: one pipeline per pass ordinal.
struct PassProgram {
    bind_group_layout: wgpu::BindGroupLayout,
    pipelines: Vec<wgpu::RenderPipeline>,
}

/// Runs the passes of an external WGSL program on the GPU.
pub struct GpuPassExecutor {
    gpu: Arc<GpuContext>,
    search_paths: Vec<PathBuf>,
    programs: HashMap<String, PassProgram>,
    pool: TexturePool<wgpu::Texture>,
    black: wgpu::Texture,
    sampler: wgpu::Sampler,
}

impl GpuPassExecutor {
    pub fn new(gpu: Arc<GpuContext>, search_paths: Vec<PathBuf>) -> Self {
        let filter = if gpu.float_filterable {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        };
        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("post_process_sampler"),
            mag_filter: filter,
            min_filter: filter,
            ..Default::default()
        });
        let black = create_texture(&gpu.device, Some("black"), FrameSize::new(1, 1));
        gpu.queue.write_texture(
            black.as_image_copy(),
            bytemuck::cast_slice(&[0.0f32; 4]),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(BYTES_PER_TEXEL),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        Self {
            gpu,
            search_paths,
            programs: HashMap::new(),
            pool: TexturePool::new(),
            black,
            sampler,
        }
    }

    /// Upload a host frame.
    pub fn import(&mut self, frame: &FrameBuffer) -> StormyResult<TargetId> {
        let size = frame.size();
        self.check_size(size, frame.format)?;
        let texture = create_texture(&self.gpu.device, Some("host_frame"), size);
        self.gpu.queue.write_texture(
            texture.as_image_copy(),
            bytemuck::cast_slice(&frame.data),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(size.width * BYTES_PER_TEXEL),
                rows_per_image: Some(size.height),
            },
            extent(size),
        );
        Ok(self.pool.insert(TargetDesc::new(size, frame.format), texture))
    }

    /// Allocate an empty host-owned frame, e.g. a destination.
    pub fn create_frame(&mut self, size: FrameSize) -> StormyResult<TargetId> {
        self.check_size(size, PixelFormat::RgbaFloat)?;
        let texture = create_texture(&self.gpu.device, Some("host_frame"), size);
        Ok(self
            .pool
            .insert(TargetDesc::new(size, PixelFormat::RgbaFloat), texture))
    }

    /// Copy a target back to the CPU.
    pub fn read_back(&self, id: TargetId) -> StormyResult<FrameBuffer> {
        let texture = self.texture(id)?;
        let desc = self.pool.desc(id).ok_or(StormyError::UnknownTarget(id.0))?;
        let size = desc.size;
        let row_bytes = size.width * BYTES_PER_TEXEL;
        let padded_bytes_per_row = (row_bytes + 255) & !255;

        let buffer = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("post_process_readback"),
            size: (padded_bytes_per_row * size.height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        encoder.copy_texture_to_buffer(
            texture.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(size.height),
                },
            },
            extent(size),
        );
        self.gpu.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = tx.send(v);
        });
        self.gpu.device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            _ => {
                return Err(StormyError::Render(
                    "Failed to map post-process readback buffer".into(),
                ))
            }
        }

        let mut frame = FrameBuffer::new(size.width, size.height, desc.format);
        {
            let data = slice.get_mapped_range();
            for (y, row) in frame
                .data
                .chunks_exact_mut(size.width as usize * 4)
                .enumerate()
            {
                let start = y * padded_bytes_per_row as usize;
                let bytes = &data[start..start + row_bytes as usize];
                row.copy_from_slice(bytemuck::cast_slice(bytes));
            }
        }
        buffer.unmap();
        Ok(frame)
    }

    /// Drop a host frame or temporary without returning it to the pool.
    pub fn discard(&mut self, id: TargetId) {
        self.pool.take(id);
    }

    pub fn outstanding(&self) -> usize {
        self.pool.outstanding()
    }

    fn check_size(&self, size: FrameSize, format: PixelFormat) -> StormyResult<()> {
        let max = self.gpu.device.limits().max_texture_dimension_2d;
        if size.is_empty() || size.width > max || size.height > max {
            return Err(StormyError::allocation(
                size.width,
                size.height,
                format,
                format!("texture dimensions must be within 1..={}", max),
            ));
        }
        Ok(())
    }

    fn texture(&self, id: TargetId) -> StormyResult<&wgpu::Texture> {
        self.pool.get(id).ok_or(StormyError::UnknownTarget(id.0))
    }

    /// Texture for slot `name` in `pass`. Slots the pass does not sample get
    /// black, since the material may still name targets from an earlier frame.
    fn binding(
        &self,
        params: &ShaderParameterSet,
        pass: Pass,
        name: &str,
    ) -> StormyResult<&wgpu::Texture> {
        if !pass.sampled_textures().contains(&name) {
            return Ok(&self.black);
        }
        match params.texture(name) {
            Some(TextureBinding::Target(id)) => self.texture(id),
            None | Some(TextureBinding::Black) => Ok(&self.black),
        }
    }

    fn compile(&self, name: &str, path: &Path) -> StormyResult<PassProgram> {
        let source = std::fs::read_to_string(path)?;
        let device = &self.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float {
                    filterable: self.gpu.float_filterable,
                },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let sampler_type = if self.gpu.float_filterable {
            wgpu::SamplerBindingType::Filtering
        } else {
            wgpu::SamplerBindingType::NonFiltering
        };
        let mut entries = vec![
            texture_entry(0),
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(sampler_type),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ];
        entries.extend(TEXTURE_SLOTS.iter().map(|(binding, _)| texture_entry(*binding)));

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("post_process_bind_group_layout"),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("post_process_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipelines = Pass::ALL
            .iter()
            .map(|pass| {
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(pass.entry_point()),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &module,
                        entry_point: "vs_main",
                        buffers: &[],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &module,
                        entry_point: pass.entry_point(),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: TEXTURE_FORMAT,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                })
            })
            .collect();

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(StormyError::Render(format!(
                "shader {} failed to compile: {}",
                name, err
            )));
        }
        Ok(PassProgram {
            bind_group_layout,
            pipelines,
        })
    }
}

fn extent(size: FrameSize) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: 1,
    }
}

fn create_texture(device: &Device, label: Option<&str>, size: FrameSize) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label,
        size: extent(size),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TEXTURE_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

impl PassExecutor for GpuPassExecutor {
    fn find_shader(&mut self, name: &str) -> Option<ShaderHandle> {
        if !self.programs.contains_key(name) {
            let path = locate_shader(&self.search_paths, name)?;
            match self.compile(name, &path) {
                Ok(program) => {
                    tracing::info!("Loaded shader {} from {}", name, path.display());
                    self.programs.insert(name.to_string(), program);
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    return None;
                }
            }
        }
        let program = self.programs.get(name)?;
        Some(ShaderHandle::new(name, program.pipelines.len() as u32))
    }

    fn acquire(&mut self, desc: TargetDesc) -> StormyResult<TargetId> {
        self.check_size(desc.size, desc.format)?;
        let device = &self.gpu.device;
        self.pool
            .acquire(desc, |d| Ok(create_texture(device, Some("post_process_temporary"), d.size)))
    }

    fn release(&mut self, id: TargetId) -> StormyResult<()> {
        self.pool.release(id)
    }

    fn end_frame(&mut self) {
        let evicted = self.pool.end_frame(MAX_IDLE_FRAMES);
        if evicted > 0 {
            tracing::debug!("dropped {} idle GPU textures", evicted);
        }
    }

    fn target_size(&self, id: TargetId) -> Option<FrameSize> {
        self.pool.desc(id).map(|d| d.size)
    }

    /// Texel copy; both targets must have the same size.
    fn copy(&mut self, source: TargetId, dest: TargetId) -> StormyResult<()> {
        let (src_size, dst_size) = (self.target_size(source), self.target_size(dest));
        let size = src_size.ok_or(StormyError::UnknownTarget(source.0))?;
        if dst_size != Some(size) {
            return Err(StormyError::InvalidArgument(format!(
                "copy {} -> {} needs matching sizes",
                source, dest
            )));
        }
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        encoder.copy_texture_to_texture(
            self.texture(source)?.as_image_copy(),
            self.texture(dest)?.as_image_copy(),
            extent(size),
        );
        self.gpu.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn blit(
        &mut self,
        source: TargetId,
        dest: TargetId,
        material: &Material,
        pass: Pass,
    ) -> StormyResult<()> {
        let program = self
            .programs
            .get(material.shader().name())
            .ok_or_else(|| StormyError::missing_shader(material.shader().name()))?;
        let pipeline = program
            .pipelines
            .get(pass.index() as usize)
            .ok_or_else(|| StormyError::Render(format!("program has no {} pass", pass)))?;
        let params = material.params();

        let uniforms = PassUniforms::from_params(params);
        let uniform_buffer = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("post_process_params"),
                contents: bytemuck::cast_slice(&[uniforms]),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let source_view = self
            .texture(source)?
            .create_view(&wgpu::TextureViewDescriptor::default());
        let slot_views = TEXTURE_SLOTS
            .iter()
            .map(|(binding, name)| {
                self.binding(params, pass, name)
                    .map(|t| (*binding, t.create_view(&wgpu::TextureViewDescriptor::default())))
            })
            .collect::<StormyResult<Vec<_>>>()?;
        let dest_view = self
            .texture(dest)?
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&source_view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: uniform_buffer.as_entire_binding(),
            },
        ];
        entries.extend(slot_views.iter().map(|(binding, view)| wgpu::BindGroupEntry {
            binding: *binding,
            resource: wgpu::BindingResource::TextureView(view),
        }));
        let bind_group = self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("post_process_bind_group"),
            layout: &program.bind_group_layout,
            entries: &entries,
        });

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(pass.entry_point()),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &dest_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rpass.set_pipeline(pipeline);
            rpass.set_bind_group(0, &bind_group, &[]);
            rpass.draw(0..3, 0..1);
        }
        self.gpu.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}
