//! Fullscreen pass that maps field intensity to premultiplied theme colour.

use bytemuck::{Pod, Zeroable};
use myco_core::Compositor;

use crate::context::{texture_entry, uniform_entry};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct CompositeParams {
    pub color: [f32; 4],
    pub target_size: [f32; 2],
    pub mapping: u32,
    pub _pad: u32,
}

impl CompositeParams {
    #[must_use]
    pub fn new(compositor: &Compositor, target: (u32, u32)) -> Self {
        let uniform = compositor.uniform();
        Self {
            color: uniform.color,
            target_size: [target.0.max(1) as f32, target.1.max(1) as f32],
            mapping: uniform.mapping,
            _pad: 0,
        }
    }
}

pub struct CompositePass {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
    format: wgpu::TextureFormat,
}

impl CompositePass {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("composite.bg_layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::FRAGMENT),
                texture_entry(1, wgpu::ShaderStages::FRAGMENT),
            ],
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("composite.shader"),
            source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(COMPOSITE_WGSL)),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("composite.layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("composite.pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_fullscreen"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_composite"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("composite.params"),
            size: std::mem::size_of::<CompositeParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            pipeline,
            layout,
            params,
            format,
        }
    }

    #[must_use]
    pub const fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Draws `field` over the whole of `target`, clearing it first.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        field: &wgpu::TextureView,
        target: &wgpu::TextureView,
        target_size: (u32, u32),
        compositor: &Compositor,
    ) {
        let params = CompositeParams::new(compositor, target_size);
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(&params));
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("composite.bg"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(field),
                },
            ],
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("composite.pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    pub fn destroy(&self) {
        self.params.destroy();
    }
}

const COMPOSITE_WGSL: &str = r#"
struct Params {
    color: vec4<f32>,
    target_size: vec2<f32>,
    mapping: u32,
    _pad: u32,
};

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var field_tex: texture_2d<f32>;

@vertex
fn vs_fullscreen(@builtin(vertex_index) vid: u32) -> @builtin(position) vec4<f32> {
    let x = f32((vid << 1u) & 2u);
    let y = f32(vid & 2u);
    return vec4<f32>(x * 2.0 - 1.0, 1.0 - y * 2.0, 0.0, 1.0);
}

@fragment
fn fs_composite(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let dims = vec2<f32>(textureDimensions(field_tex));
    let scaled = floor(pos.xy * dims / params.target_size);
    let cell = vec2<i32>(clamp(scaled, vec2<f32>(0.0), dims - vec2<f32>(1.0)));
    let v = clamp(textureLoad(field_tex, cell, 0).r, 0.0, 1.0);
    // 0 = step (DLA), 1 = linear (Physarum).
    let alpha = select(v, select(0.0, 1.0, v > 0.0), params.mapping == 0u);
    return params.color * alpha;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use myco_core::{AlphaMapping, ThemeColor};

    #[test]
    fn params_fold_opacity_into_premultiplied_colour() {
        let compositor = Compositor::new(ThemeColor::rgb8(255, 0, 0), 0.5, AlphaMapping::Step);
        let params = CompositeParams::new(&compositor, (0, 40));
        assert_eq!(params.color, [0.5, 0.0, 0.0, 0.5]);
        assert_eq!(params.target_size, [1.0, 40.0]);
        assert_eq!(params.mapping, AlphaMapping::Step.shader_flag());
        assert_eq!(std::mem::size_of::<CompositeParams>(), 32);
    }

    #[test]
    fn shader_flag_convention_matches_kernel() {
        assert_eq!(AlphaMapping::Step.shader_flag(), 0);
        assert_eq!(AlphaMapping::Linear.shader_flag(), 1);
    }
}
