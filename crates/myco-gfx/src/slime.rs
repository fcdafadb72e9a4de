//! Physarum compute kernels.
//!
//! The trail map is a pair of `r32float` storage textures. Texture A is always
//! the presented one: a frame copies A into B, the agent pass senses A and
//! deposits into B, and the diffusion pass blurs and decays B back into A.

use bytemuck::{Pod, Zeroable};
use myco_core::{GridSpec, Settings, spawn_agents};
use wgpu::util::DeviceExt;

use crate::context::{
    GpuContext, compute_pipeline, storage_entry, storage_texture, storage_texture_entry,
    texture_entry, uniform_entry, with_workgroup,
};

pub const TRAIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
const DIFFUSE_TILE: u32 = 8;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct GpuAgent {
    pub pos: [f32; 2],
    pub heading: f32,
    pub rng: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq, Eq)]
pub struct SlimeInts {
    pub grid_w: u32,
    pub grid_h: u32,
    pub agents: u32,
    pub steps: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct SlimeFloats {
    pub sensor_angle: f32,
    pub sensor_distance: f32,
    pub turn_angle: f32,
    pub move_speed: f32,
    pub deposit: f32,
    pub decay: f32,
    pub diffuse: f32,
    pub _pad: f32,
}

pub struct GpuSlime {
    grid: GridSpec,
    agents: u32,
    workgroup: u32,
    ints: wgpu::Buffer,
    floats: wgpu::Buffer,
    agent_buf: wgpu::Buffer,
    agent_pipeline: wgpu::ComputePipeline,
    diffuse_pipeline: wgpu::ComputePipeline,
    agent_group: wgpu::BindGroup,
    diffuse_group: wgpu::BindGroup,
    textures: [wgpu::Texture; 2],
    view_a: wgpu::TextureView,
}

impl GpuSlime {
    pub fn new(ctx: &GpuContext, settings: &Settings, grid: GridSpec) -> Self {
        let device = &ctx.device;
        let mut rng = settings.seeded_rng();
        let agents: Vec<GpuAgent> = spawn_agents(settings, grid, &mut rng)
            .into_iter()
            .map(|agent| GpuAgent {
                pos: [agent.x, agent.y],
                heading: agent.heading,
                rng: agent.rng.state(),
            })
            .collect();
        // Zero-sized storage bindings are invalid.
        let count = agents.len() as u32;
        let contents = if agents.is_empty() {
            vec![GpuAgent::zeroed()]
        } else {
            agents
        };
        let agent_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("slime.agents"),
            contents: bytemuck::cast_slice(&contents),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let p = settings.slime.params();
        let floats = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("slime.floats"),
            contents: bytemuck::bytes_of(&SlimeFloats {
                sensor_angle: p.sensor_angle,
                sensor_distance: p.sensor_distance,
                turn_angle: p.turn_angle,
                move_speed: p.move_speed,
                deposit: p.deposit,
                decay: p.decay,
                diffuse: p.diffuse,
                _pad: 0.0,
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let ints = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("slime.ints"),
            size: std::mem::size_of::<SlimeInts>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let size = (grid.width(), grid.height());
        let (tex_a, view_a) = storage_texture(device, "slime.trail_a", TRAIL_FORMAT, size);
        let (tex_b, view_b) = storage_texture(device, "slime.trail_b", TRAIL_FORMAT, size);

        let agent_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("slime.agent_layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::COMPUTE),
                uniform_entry(1, wgpu::ShaderStages::COMPUTE),
                storage_entry(2),
                texture_entry(3, wgpu::ShaderStages::COMPUTE),
                storage_texture_entry(4, TRAIL_FORMAT),
            ],
        });
        let agent_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("slime.agent_group"),
            layout: &agent_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: ints.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: floats.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: agent_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&view_a),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(&view_b),
                },
            ],
        });

        let diffuse_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("slime.diffuse_layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::COMPUTE),
                uniform_entry(1, wgpu::ShaderStages::COMPUTE),
                texture_entry(2, wgpu::ShaderStages::COMPUTE),
                storage_texture_entry(3, TRAIL_FORMAT),
            ],
        });
        let diffuse_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("slime.diffuse_group"),
            layout: &diffuse_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: ints.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: floats.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&view_b),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&view_a),
                },
            ],
        });

        let workgroup = settings.workgroup_size;
        let agent_pipeline = compute_pipeline(
            device,
            "slime.agents",
            &agent_layout,
            &with_workgroup(SLIME_WGSL, workgroup),
            "slime_agents",
        );
        let diffuse_pipeline = compute_pipeline(
            device,
            "slime.diffuse",
            &diffuse_layout,
            DIFFUSE_WGSL,
            "slime_diffuse",
        );

        Self {
            grid,
            agents: count,
            workgroup,
            ints,
            floats,
            agent_buf,
            agent_pipeline,
            diffuse_pipeline,
            agent_group,
            diffuse_group,
            textures: [tex_a, tex_b],
            view_a,
        }
    }

    pub fn encode(&self, queue: &wgpu::Queue, encoder: &mut wgpu::CommandEncoder, steps: u32) {
        let ints = SlimeInts {
            grid_w: self.grid.width(),
            grid_h: self.grid.height(),
            agents: self.agents,
            steps,
        };
        queue.write_buffer(&self.ints, 0, bytemuck::bytes_of(&ints));

        encoder.copy_texture_to_texture(
            self.textures[0].as_image_copy(),
            self.textures[1].as_image_copy(),
            wgpu::Extent3d {
                width: self.grid.width(),
                height: self.grid.height(),
                depth_or_array_layers: 1,
            },
        );
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("slime.step"),
            timestamp_writes: None,
        });
        if self.agents > 0 {
            pass.set_pipeline(&self.agent_pipeline);
            pass.set_bind_group(0, &self.agent_group, &[]);
            pass.dispatch_workgroups(self.agents.div_ceil(self.workgroup.max(1)), 1, 1);
        }
        pass.set_pipeline(&self.diffuse_pipeline);
        pass.set_bind_group(0, &self.diffuse_group, &[]);
        pass.dispatch_workgroups(
            self.grid.width().div_ceil(DIFFUSE_TILE),
            self.grid.height().div_ceil(DIFFUSE_TILE),
            1,
        );
    }

    #[must_use]
    pub fn front_view(&self) -> &wgpu::TextureView {
        &self.view_a
    }

    pub fn destroy(&self) {
        for tex in &self.textures {
            tex.destroy();
        }
        self.agent_buf.destroy();
        self.ints.destroy();
        self.floats.destroy();
    }
}

const SLIME_WGSL: &str = r#"
struct Ints {
    grid_w: u32,
    grid_h: u32,
    agents: u32,
    steps: u32,
};

struct Floats {
    sensor_angle: f32,
    sensor_distance: f32,
    turn_angle: f32,
    move_speed: f32,
    deposit: f32,
    decay: f32,
    diffuse: f32,
    _pad: f32,
};

struct Agent {
    pos: vec2<f32>,
    heading: f32,
    rng: u32,
};

@group(0) @binding(0) var<uniform> ints: Ints;
@group(0) @binding(1) var<uniform> floats: Floats;
@group(0) @binding(2) var<storage, read_write> agents: array<Agent>;
@group(0) @binding(3) var trail_read: texture_2d<f32>;
@group(0) @binding(4) var trail_write: texture_storage_2d<r32float, write>;

const TAU: f32 = 6.283185307179586;

fn lcg_next(state: ptr<function, u32>) -> u32 {
    *state = *state * 1664525u + 1013904223u;
    return *state;
}

fn wrap_i(v: i32, size: i32) -> i32 {
    return ((v % size) + size) % size;
}

fn wrap_f(v: f32, extent: f32) -> f32 {
    let r = v - floor(v / extent) * extent;
    return select(r, 0.0, r >= extent);
}

fn trail_at(p: vec2<f32>, dims: vec2<i32>) -> f32 {
    let c = vec2<i32>(round(p));
    return textureLoad(trail_read, vec2<i32>(wrap_i(c.x, dims.x), wrap_i(c.y, dims.y)), 0).r;
}

fn sense(pos: vec2<f32>, angle: f32, dims: vec2<i32>) -> f32 {
    return trail_at(pos + floats.sensor_distance * vec2<f32>(cos(angle), sin(angle)), dims);
}

@compute @workgroup_size(WORKGROUP_SIZE)
fn slime_agents(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= ints.agents) {
        return;
    }
    let dims = vec2<i32>(i32(ints.grid_w), i32(ints.grid_h));
    let extent = vec2<f32>(dims);
    var agent = agents[i];
    var state = agent.rng;

    for (var s = 0u; s < ints.steps; s = s + 1u) {
        let forward = sense(agent.pos, agent.heading, dims);
        let left = sense(agent.pos, agent.heading - floats.sensor_angle, dims);
        let right = sense(agent.pos, agent.heading + floats.sensor_angle, dims);

        if (!(forward >= left && forward >= right)) {
            let coin = (lcg_next(&state) & 1u) == 1u;
            if (left > right) {
                agent.heading = agent.heading - floats.turn_angle;
            } else if (right > left || coin) {
                agent.heading = agent.heading + floats.turn_angle;
            } else {
                agent.heading = agent.heading - floats.turn_angle;
            }
        }
        agent.heading = wrap_f(agent.heading, TAU);

        let moved = agent.pos + floats.move_speed * vec2<f32>(cos(agent.heading), sin(agent.heading));
        agent.pos = vec2<f32>(wrap_f(moved.x, extent.x), wrap_f(moved.y, extent.y));

        let cell = vec2<i32>(
            wrap_i(i32(floor(agent.pos.x)), dims.x),
            wrap_i(i32(floor(agent.pos.y)), dims.y),
        );
        let current = textureLoad(trail_read, cell, 0).r;
        textureStore(trail_write, cell, vec4<f32>(min(1.0, current + floats.deposit), 0.0, 0.0, 1.0));
    }

    agent.rng = state;
    agents[i] = agent;
}
"#;

const DIFFUSE_WGSL: &str = r#"
struct Ints {
    grid_w: u32,
    grid_h: u32,
    agents: u32,
    steps: u32,
};

struct Floats {
    sensor_angle: f32,
    sensor_distance: f32,
    turn_angle: f32,
    move_speed: f32,
    deposit: f32,
    decay: f32,
    diffuse: f32,
    _pad: f32,
};

@group(0) @binding(0) var<uniform> ints: Ints;
@group(0) @binding(1) var<uniform> floats: Floats;
@group(0) @binding(2) var trail_src: texture_2d<f32>;
@group(0) @binding(3) var trail_dst: texture_storage_2d<r32float, write>;

fn wrap_i(v: i32, size: i32) -> i32 {
    return ((v % size) + size) % size;
}

@compute @workgroup_size(8, 8)
fn slime_diffuse(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= ints.grid_w || gid.y >= ints.grid_h) {
        return;
    }
    let dims = vec2<i32>(i32(ints.grid_w), i32(ints.grid_h));
    let p = vec2<i32>(gid.xy);
    var sum = 0.0;
    for (var dy = -1; dy <= 1; dy = dy + 1) {
        for (var dx = -1; dx <= 1; dx = dx + 1) {
            let q = vec2<i32>(wrap_i(p.x + dx, dims.x), wrap_i(p.y + dy, dims.y));
            sum = sum + textureLoad(trail_src, q, 0).r;
        }
    }
    let center = textureLoad(trail_src, p, 0).r;
    let mixed = center + (sum / 9.0 - center) * floats.diffuse;
    let value = clamp(mixed * (1.0 - floats.decay), 0.0, 1.0);
    textureStore(trail_dst, p, vec4<f32>(value, 0.0, 0.0, 1.0));
}
"#;
