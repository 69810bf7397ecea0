//! `GraphicsDevice` on top of wgpu.
//!
//! wgpu has no mutable program objects, so the device keeps its own stage and
//! program tables and maps the engine's model onto immutable pipelines:
//!
//! ```text
//!   compile_stage ──▶ normalize ──▶ naga parse + validate ──▶ ShaderModule + reflection
//!                                                                   │
//!   link_program ──▶ layouts from reflection ──▶ RenderPipeline ────┘
//!                    (inside a validation error scope; swapped in on success only)
//!
//!   set_uniform ──▶ CPU staging bytes ──┐
//!                                       ├──▶ draw: write_buffer, bind groups, quad
//!   Sampler(unit) ──▶ slot → unit map ──┘
//! ```
//!
//! Uniform locations index the linked program's slot table: block members
//! first, then samplers.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use hotreload::{
    GraphicsDevice, InfoLog, ProgramId, StageId, StageKind, UniformLocation, UniformValue,
    POSITION_ATTRIBUTE_NAME,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::debug;
use wgpu::naga::ShaderStage;
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;

use crate::compile::{normalize, parse_stage};

use super::context::GpuContext;
use super::reflect::{SamplerSlot, StageReflection, UniformKind};
use super::textures::{self, TextureUnit};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("unknown shader stage {0:?}")]
    UnknownStage(StageId),
    #[error("no program is in use")]
    NoProgram,
    #[error("program {0:?} has no linked executable")]
    NotLinked(ProgramId),
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct QuadVertex {
    position: [f32; 3],
}

/// Two triangles covering clip space.
const QUAD: [QuadVertex; 6] = [
    QuadVertex { position: [-1.0, -1.0, 0.0] },
    QuadVertex { position: [1.0, -1.0, 0.0] },
    QuadVertex { position: [1.0, 1.0, 0.0] },
    QuadVertex { position: [-1.0, -1.0, 0.0] },
    QuadVertex { position: [1.0, 1.0, 0.0] },
    QuadVertex { position: [-1.0, 1.0, 0.0] },
];

struct CompiledStage {
    module: wgpu::ShaderModule,
    reflection: StageReflection,
}

struct Stage {
    kind: StageKind,
    compiled: Option<CompiledStage>,
}

struct LinkedProgram {
    pipeline: wgpu::RenderPipeline,
    reflection: StageReflection,
    uniform_buffer: Option<wgpu::Buffer>,
    uniform_group: wgpu::BindGroup,
    texture_layout: wgpu::BindGroupLayout,
    texture_group: wgpu::BindGroup,
    staging: Vec<u8>,
    sampler_units: Vec<u32>,
    uniforms_dirty: bool,
    textures_dirty: bool,
}

struct Program {
    vertex: StageId,
    fragment: StageId,
    attributes: BTreeMap<u32, String>,
    linked: Option<LinkedProgram>,
}

/// Render-thread owner of the window surface and every GPU object.
pub struct WgpuDevice {
    gpu: GpuContext,
    quad: wgpu::Buffer,
    units: Vec<TextureUnit>,
    placeholder: TextureUnit,
    stages: Vec<Stage>,
    programs: Vec<Program>,
    current: Option<ProgramId>,
    clear_color: wgpu::Color,
}

impl WgpuDevice {
    /// Creates the device for `target` and uploads one texture unit per path.
    pub fn new<T>(
        target: &T,
        size: PhysicalSize<u32>,
        textures: &[PathBuf],
        clear_color: [f32; 3],
    ) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let gpu = GpuContext::new(target, size)?;
        let quad = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("quad vertices"),
                contents: bytemuck::cast_slice(&QUAD),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let units = textures::load_units(&gpu.device, &gpu.queue, textures);
        for (unit, texture) in units.iter().enumerate() {
            debug!(unit, width = texture.size.0, height = texture.size.1, "texture unit ready");
        }
        let placeholder = textures::placeholder(&gpu.device, &gpu.queue, "unbound texture unit");
        let [r, g, b] = clear_color;

        Ok(Self {
            gpu,
            quad,
            units,
            placeholder,
            stages: Vec::new(),
            programs: Vec::new(),
            current: None,
            clear_color: wgpu::Color {
                r: f64::from(r),
                g: f64::from(g),
                b: f64::from(b),
                a: 1.0,
            },
        })
    }

    pub fn resize(&mut self, size: PhysicalSize<u32>) {
        self.gpu.resize(size);
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.gpu.size
    }

    pub fn texture_units(&self) -> u32 {
        self.units.len() as u32
    }

    fn compile(&self, kind: StageKind, source: &str) -> Result<CompiledStage, InfoLog> {
        let normalized = normalize(kind, source);
        let module = parse_stage(kind, &normalized)?;
        let reflection = StageReflection::from_module(&module);

        let stage = match kind {
            StageKind::Vertex => ShaderStage::Vertex,
            StageKind::Fragment => ShaderStage::Fragment,
        };
        self.gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(match kind {
                    StageKind::Vertex => "fraglive vertex",
                    StageKind::Fragment => "fraglive fragment",
                }),
                source: wgpu::ShaderSource::Glsl {
                    shader: Cow::Owned(normalized.source),
                    stage,
                    defines: &[],
                },
            });
        if let Some(error) = pollster::block_on(self.gpu.device.pop_error_scope()) {
            return Err(InfoLog::new(error.to_string()));
        }

        Ok(CompiledStage { module, reflection })
    }

    fn compiled(&self, stage: StageId) -> Result<&CompiledStage, InfoLog> {
        let slot = self
            .stages
            .get(stage.0 as usize)
            .ok_or_else(|| InfoLog::new(format!("invalid stage {}", stage.0)))?;
        slot.compiled.as_ref().ok_or_else(|| {
            InfoLog::new(format!(
                "{} stage must compile successfully before linking",
                slot.kind
            ))
        })
    }

    fn link(&self, program: &Program) -> Result<LinkedProgram, InfoLog> {
        let vertex = self.compiled(program.vertex)?;
        let fragment = self.compiled(program.fragment)?;
        if !vertex.reflection.uniforms.is_empty() || !vertex.reflection.samplers.is_empty() {
            return Err(InfoLog::new(
                "uniforms declared in the vertex stage are not supported",
            ));
        }

        let position = position_location(program, &vertex.reflection)?;
        let reflection = &fragment.reflection;
        let device = &self.gpu.device;

        let mut uniform_entries = Vec::new();
        if reflection.block_span > 0 {
            uniform_entries.push(wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform layout"),
            entries: &uniform_entries,
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture layout"),
            entries: &texture_layout_entries(&reflection.samplers),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("fraglive pipeline layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let attributes = [wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x3,
            offset: 0,
            shader_location: position,
        }];

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("fraglive pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex.module,
                entry_point: Some("main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &attributes,
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &fragment.module,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.gpu.surface_format(),
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(InfoLog::new(error.to_string()));
        }

        let uniform_buffer = (reflection.block_span > 0).then(|| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("uniform block"),
                size: u64::from(reflection.block_span.next_multiple_of(16)),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        let uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform bind group"),
            layout: &uniform_layout,
            entries: &uniform_buffer
                .iter()
                .map(|buffer| wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                })
                .collect::<Vec<_>>(),
        });

        // Relinking resets every uniform, samplers included, to zero.
        let sampler_units = vec![0; reflection.samplers.len()];
        let texture_group = texture_bind_group(
            device,
            &texture_layout,
            &reflection.samplers,
            &sampler_units,
            &self.units,
            &self.placeholder,
        );

        Ok(LinkedProgram {
            pipeline,
            reflection: reflection.clone(),
            uniform_buffer,
            uniform_group,
            texture_layout,
            texture_group,
            staging: vec![0; reflection.block_span.next_multiple_of(16) as usize],
            sampler_units,
            uniforms_dirty: true,
            textures_dirty: false,
        })
    }

    fn current_link_mut(&mut self) -> Option<&mut LinkedProgram> {
        let current = self.current?;
        self.programs
            .get_mut(current.0 as usize)
            .and_then(|program| program.linked.as_mut())
    }
}

/// Location of the attribute bound to the quad position.
fn position_location(program: &Program, vertex: &StageReflection) -> Result<u32, InfoLog> {
    let (&location, name) = program
        .attributes
        .iter()
        .find(|(_, name)| name.as_str() == POSITION_ATTRIBUTE_NAME)
        .ok_or_else(|| InfoLog::new(format!("attribute {POSITION_ATTRIBUTE_NAME} is not bound")))?;
    let input = vertex
        .inputs
        .iter()
        .find(|(input_location, _)| *input_location == location)
        .ok_or_else(|| {
            InfoLog::new(format!(
                "vertex stage has no input at location {location} for {name}"
            ))
        })?;
    match &input.1 {
        Some(declared) if declared != name => Err(InfoLog::new(format!(
            "vertex input at location {location} is {declared}, expected {name}"
        ))),
        _ => Ok(location),
    }
}

fn texture_layout_entries(samplers: &[SamplerSlot]) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(samplers.len() * 2);
    for slot in samplers {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: slot.texture_binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: slot.texture_binding + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    entries
}

fn texture_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    samplers: &[SamplerSlot],
    sampler_units: &[u32],
    units: &[TextureUnit],
    placeholder: &TextureUnit,
) -> wgpu::BindGroup {
    let mut entries = Vec::with_capacity(samplers.len() * 2);
    for (slot, unit) in samplers.iter().zip(sampler_units) {
        let texture = units.get(*unit as usize).unwrap_or(placeholder);
        entries.push(wgpu::BindGroupEntry {
            binding: slot.texture_binding,
            resource: wgpu::BindingResource::TextureView(&texture.view),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: slot.texture_binding + 1,
            resource: wgpu::BindingResource::Sampler(&texture.sampler),
        });
    }
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("texture bind group"),
        layout,
        entries: &entries,
    })
}

impl GraphicsDevice for WgpuDevice {
    type Error = RenderError;

    fn create_stage(&mut self, kind: StageKind) -> Result<StageId, Self::Error> {
        self.stages.push(Stage {
            kind,
            compiled: None,
        });
        Ok(StageId(self.stages.len() as u32 - 1))
    }

    fn compile_stage(&mut self, stage: StageId, source: &str) -> Result<(), InfoLog> {
        let kind = self
            .stages
            .get(stage.0 as usize)
            .map(|slot| slot.kind)
            .ok_or_else(|| InfoLog::new(format!("invalid stage {}", stage.0)))?;
        let result = self.compile(kind, source);
        let slot = &mut self.stages[stage.0 as usize];
        match result {
            Ok(compiled) => {
                debug!(
                    %kind,
                    uniforms = compiled.reflection.uniforms.len(),
                    samplers = compiled.reflection.samplers.len(),
                    "compiled stage"
                );
                slot.compiled = Some(compiled);
                Ok(())
            }
            Err(log) => {
                slot.compiled = None;
                Err(log)
            }
        }
    }

    fn create_program(
        &mut self,
        vertex: StageId,
        fragment: StageId,
    ) -> Result<ProgramId, Self::Error> {
        for stage in [vertex, fragment] {
            if self.stages.get(stage.0 as usize).is_none() {
                return Err(RenderError::UnknownStage(stage));
            }
        }
        self.programs.push(Program {
            vertex,
            fragment,
            attributes: BTreeMap::new(),
            linked: None,
        });
        Ok(ProgramId(self.programs.len() as u32 - 1))
    }

    fn bind_attribute(&mut self, program: ProgramId, index: u32, name: &str) {
        if let Some(program) = self.programs.get_mut(program.0 as usize) {
            program.attributes.retain(|_, bound| bound != name);
            program.attributes.insert(index, name.to_owned());
        }
    }

    fn link_program(&mut self, program: ProgramId) -> Result<(), InfoLog> {
        let slot = self
            .programs
            .get(program.0 as usize)
            .ok_or_else(|| InfoLog::new(format!("invalid program {}", program.0)))?;
        let linked = self.link(slot)?;
        self.programs[program.0 as usize].linked = Some(linked);
        Ok(())
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let linked = self.programs.get(program.0 as usize)?.linked.as_ref()?;
        let reflection = &linked.reflection;
        let index = match reflection.uniform(name) {
            Some(index) => index,
            None => reflection.uniforms.len() + reflection.sampler(name)?,
        };
        Some(UniformLocation(index as u32))
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current = Some(program);
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        let Some(linked) = self.current_link_mut() else {
            return;
        };
        let index = location.0 as usize;
        if let Some(slot) = linked.reflection.uniforms.get(index) {
            let bytes: &[u8] = match (slot.kind, &value) {
                (UniformKind::Float, UniformValue::Float(v)) => bytemuck::bytes_of(v),
                (UniformKind::Vec2, UniformValue::Vec2(v)) => bytemuck::cast_slice(v),
                _ => {
                    debug!(uniform = %slot.name, ?value, "uniform type mismatch; write ignored");
                    return;
                }
            };
            let start = slot.offset as usize;
            if let Some(target) = linked.staging.get_mut(start..start + bytes.len()) {
                target.copy_from_slice(bytes);
                linked.uniforms_dirty = true;
            }
            return;
        }

        let sampler = index - linked.reflection.uniforms.len();
        match (linked.sampler_units.get_mut(sampler), value) {
            (Some(unit), UniformValue::Sampler(value)) => {
                if *unit != value {
                    *unit = value;
                    linked.textures_dirty = true;
                }
            }
            (Some(_), other) => {
                debug!(?other, "non-sampler value written to a sampler; ignored");
            }
            (None, _) => {}
        }
    }

    fn draw(&mut self) -> Result<(), Self::Error> {
        let current = self.current.ok_or(RenderError::NoProgram)?;
        let linked = self
            .programs
            .get_mut(current.0 as usize)
            .and_then(|program| program.linked.as_mut())
            .ok_or(RenderError::NotLinked(current))?;
        let device = &self.gpu.device;
        let queue = &self.gpu.queue;

        if linked.uniforms_dirty {
            if let Some(buffer) = &linked.uniform_buffer {
                queue.write_buffer(buffer, 0, &linked.staging);
            }
            linked.uniforms_dirty = false;
        }
        if linked.textures_dirty {
            linked.texture_group = texture_bind_group(
                device,
                &linked.texture_layout,
                &linked.reflection.samplers,
                &linked.sampler_units,
                &self.units,
                &self.placeholder,
            );
            linked.textures_dirty = false;
        }

        let frame = self.gpu.surface.get_current_texture()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("fraglive frame"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("fraglive pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&linked.pipeline);
            pass.set_bind_group(0, &linked.uniform_group, &[]);
            pass.set_bind_group(1, &linked.texture_group, &[]);
            pass.set_vertex_buffer(0, self.quad.slice(..));
            pass.draw(0..QUAD.len() as u32, 0..1);
        }
        queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }
}
