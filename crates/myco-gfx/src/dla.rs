//! DLA compute kernel.
//!
//! Walkers live entirely on the device as packed `y << 16 | x` coordinates with
//! a private LCG each. Occupancy is the red channel of two `rgba8unorm`
//! storage textures used ping-pong: every frame copies the presented texture
//! into the other one, the kernel reads the presented texture and writes
//! sticks into the other, and the two swap.

use bytemuck::{Pod, Zeroable};
use myco_core::{Annulus, DlaSettings, FrontierRadius, GridSpec, Settings};
use rand::{Rng, rngs::SmallRng};
use std::f32::consts::TAU;
use wgpu::util::DeviceExt;

use crate::context::{
    GpuContext, compute_pipeline, storage_entry, storage_texture, storage_texture_entry,
    texture_entry, uniform_entry, with_workgroup,
};

pub const OCCUPANCY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq, Eq)]
pub struct DlaParams {
    pub grid_w: u32,
    pub grid_h: u32,
    pub walkers: u32,
    pub frame: u32,
    pub steps: u32,
    pub refresh_mask: u32,
    pub _pad: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct BandParams {
    pub outer_min_px: f32,
    pub outer_frac: f32,
    pub inner_min_px: f32,
    pub inner_frac: f32,
    pub margin_min_px: f32,
    pub margin_frac: f32,
    pub edge_pad_px: f32,
    pub _pad: f32,
}

/// Packs a cell into the 32-bit walker format.
#[must_use]
pub fn pack_walker(x: u32, y: u32) -> u32 {
    (y << 16) | (x & 0xFFFF)
}

#[must_use]
pub fn unpack_walker(packed: u32) -> (u32, u32) {
    (packed & 0xFFFF, packed >> 16)
}

/// Compute-tier DLA. Walkers live on an annulus around the atomic frontier
/// radius; `center_bias`, the spawn strategy, bloom and fade are CPU-tier
/// behaviours and are not applied here. The occupancy texture is binary.
pub struct GpuDla {
    grid: GridSpec,
    walkers: u32,
    workgroup: u32,
    refresh_mask: u32,
    pipeline: wgpu::ComputePipeline,
    /// `bind_groups[i]` reads `textures[i]` and writes the other one.
    bind_groups: [wgpu::BindGroup; 2],
    textures: [wgpu::Texture; 2],
    views: [wgpu::TextureView; 2],
    buffers: Vec<wgpu::Buffer>,
    params: wgpu::Buffer,
    front: usize,
}

impl GpuDla {
    pub fn new(ctx: &GpuContext, settings: &Settings, grid: GridSpec) -> Self {
        let device = &ctx.device;
        let dla = settings.dla;
        let size = (grid.width(), grid.height());
        let mut rng = settings.seeded_rng();

        let seed_r = dla.seed_radius;
        let (initial_r2, band) = initial_band(&dla, grid);
        let (packed, states) = spawn_walkers(&mut rng, grid, &band, settings.walkers);

        let walker_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("dla.walkers"),
            contents: bytemuck::cast_slice(&packed),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let rng_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("dla.rng"),
            contents: bytemuck::cast_slice(&states),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let radius_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("dla.radius_sqr"),
            contents: bytemuck::bytes_of(&initial_r2),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("dla.params"),
            size: std::mem::size_of::<DlaParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let a = dla.annulus;
        let band_params = BandParams {
            outer_min_px: a.outer_min_px,
            outer_frac: a.outer_frac,
            inner_min_px: a.inner_min_px,
            inner_frac: a.inner_frac,
            margin_min_px: a.respawn_margin_min_px,
            margin_frac: a.respawn_margin_frac,
            edge_pad_px: a.torus_edge_pad_px,
            _pad: 0.0,
        };
        let band_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("dla.band"),
            contents: bytemuck::bytes_of(&band_params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let (tex_a, view_a) = storage_texture(device, "dla.occ_a", OCCUPANCY_FORMAT, size);
        let (tex_b, view_b) = storage_texture(device, "dla.occ_b", OCCUPANCY_FORMAT, size);
        let seed = seed_image(grid, seed_r);
        for tex in [&tex_a, &tex_b] {
            ctx.queue.write_texture(
                tex.as_image_copy(),
                &seed,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(grid.width() * 4),
                    rows_per_image: Some(grid.height()),
                },
                wgpu::Extent3d {
                    width: grid.width(),
                    height: grid.height(),
                    depth_or_array_layers: 1,
                },
            );
        }

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("dla.bg_layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::COMPUTE),
                uniform_entry(1, wgpu::ShaderStages::COMPUTE),
                storage_entry(2),
                storage_entry(3),
                storage_entry(4),
                texture_entry(5, wgpu::ShaderStages::COMPUTE),
                storage_texture_entry(6, OCCUPANCY_FORMAT),
            ],
        });
        let bind = |read: &wgpu::TextureView, write: &wgpu::TextureView, label: &str| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: band_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: walker_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: rng_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: radius_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: wgpu::BindingResource::TextureView(read),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: wgpu::BindingResource::TextureView(write),
                    },
                ],
            })
        };
        let bind_groups = [
            bind(&view_a, &view_b, "dla.bg_a_to_b"),
            bind(&view_b, &view_a, "dla.bg_b_to_a"),
        ];
        let workgroup = settings.workgroup_size;
        let pipeline = compute_pipeline(
            device,
            "dla.step",
            &layout,
            &with_workgroup(DLA_WGSL, workgroup),
            "dla_step",
        );

        Self {
            grid,
            walkers: packed.len() as u32,
            workgroup,
            refresh_mask: dla.annulus.refresh_mask,
            pipeline,
            bind_groups,
            textures: [tex_a, tex_b],
            views: [view_a, view_b],
            buffers: vec![walker_buf, rng_buf, radius_buf, band_buf],
            params,
            front: 0,
        }
    }

    /// Encodes one frame of `steps` walker steps and swaps the textures.
    pub fn encode(
        &mut self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        frame: u32,
        steps: u32,
    ) {
        let params = DlaParams {
            grid_w: self.grid.width(),
            grid_h: self.grid.height(),
            walkers: self.walkers,
            frame,
            steps,
            refresh_mask: self.refresh_mask,
            _pad: [0; 2],
        };
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(&params));

        let back = 1 - self.front;
        encoder.copy_texture_to_texture(
            self.textures[self.front].as_image_copy(),
            self.textures[back].as_image_copy(),
            self.extent(),
        );
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("dla.step"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_groups[self.front], &[]);
            pass.dispatch_workgroups(self.walkers.div_ceil(self.workgroup.max(1)), 1, 1);
        }
        self.front = back;
    }

    #[must_use]
    pub fn front_view(&self) -> &wgpu::TextureView {
        &self.views[self.front]
    }

    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.grid.width(),
            height: self.grid.height(),
            depth_or_array_layers: 1,
        }
    }

    pub fn destroy(&self) {
        for tex in &self.textures {
            tex.destroy();
        }
        for buf in &self.buffers {
            buf.destroy();
        }
        self.params.destroy();
    }
}

/// Initial walkers on the inner band around the seed, with odd LCG states.
/// Frontier radius squared covering the seed block, and the band walkers
/// start on.
fn initial_band(dla: &DlaSettings, grid: GridSpec) -> (u32, Annulus) {
    let seed_r = dla.seed_radius;
    let initial_r2 = FrontierRadius::INITIAL.max(2 * seed_r * seed_r);
    let band = Annulus::from_frontier((initial_r2 as f32).sqrt(), grid, &dla.annulus);
    (initial_r2, band)
}

fn spawn_walkers(
    rng: &mut SmallRng,
    grid: GridSpec,
    band: &Annulus,
    count: u32,
) -> (Vec<u32>, Vec<u32>) {
    let (cx, cy) = grid.center();
    (0..count)
        .map(|_| {
            let angle = rng.random::<f32>() * TAU;
            let r = (band.radius + rng.random::<f32>() * band.inner_band).clamp(1.0, band.torus_max_r);
            let (x, y) = grid.wrap(
                (cx as f32 + r * angle.cos()).round() as i64,
                (cy as f32 + r * angle.sin()).round() as i64,
            );
            (pack_walker(x, y), rng.random::<u32>() | 1)
        })
        .unzip()
}

/// Tightly packed RGBA8 occupancy with the square seed block lit.
fn seed_image(grid: GridSpec, radius: u32) -> Vec<u8> {
    let mut data = vec![0u8; grid.cells() * 4];
    let (cx, cy) = grid.center();
    let r = i64::from(radius);
    for dy in -r..=r {
        for dx in -r..=r {
            let idx = grid.wrapped_index(i64::from(cx) + dx, i64::from(cy) + dy) * 4;
            data[idx..idx + 4].copy_from_slice(&[255, 255, 255, 255]);
        }
    }
    data
}

const DLA_WGSL: &str = r#"
struct Params {
    grid_w: u32,
    grid_h: u32,
    walkers: u32,
    frame: u32,
    steps: u32,
    refresh_mask: u32,
    _pad0: u32,
    _pad1: u32,
};

struct Band {
    outer_min_px: f32,
    outer_frac: f32,
    inner_min_px: f32,
    inner_frac: f32,
    margin_min_px: f32,
    margin_frac: f32,
    edge_pad_px: f32,
    _pad: f32,
};

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<uniform> band: Band;
@group(0) @binding(2) var<storage, read_write> walkers: array<u32>;
@group(0) @binding(3) var<storage, read_write> rngs: array<u32>;
@group(0) @binding(4) var<storage, read_write> radius_sqr: atomic<u32>;
@group(0) @binding(5) var occ_read: texture_2d<f32>;
@group(0) @binding(6) var occ_write: texture_storage_2d<rgba8unorm, write>;

const TAU: f32 = 6.283185307179586;

fn lcg_next(state: ptr<function, u32>) -> u32 {
    *state = *state * 1664525u + 1013904223u;
    return *state;
}

fn wrap_i(v: i32, size: i32) -> i32 {
    return ((v % size) + size) % size;
}

fn wrap_delta(d: i32, size: i32) -> i32 {
    var r = wrap_i(d, size);
    if (r > size / 2) {
        r = r - size;
    }
    return r;
}

fn wrap_p(p: vec2<i32>, dims: vec2<i32>) -> vec2<i32> {
    return vec2<i32>(wrap_i(p.x, dims.x), wrap_i(p.y, dims.y));
}

fn dist_sq(p: vec2<i32>, c: vec2<i32>, dims: vec2<i32>) -> u32 {
    let dx = wrap_delta(p.x - c.x, dims.x);
    let dy = wrap_delta(p.y - c.y, dims.y);
    return u32(dx * dx + dy * dy);
}

fn occupied(p: vec2<i32>, dims: vec2<i32>) -> bool {
    return textureLoad(occ_read, wrap_p(p, dims), 0).r > 0.0;
}

fn spawn_at(state: ptr<function, u32>, c: vec2<f32>, r: f32, dims: vec2<i32>) -> vec2<i32> {
    let a = f32((lcg_next(state) >> 8u) & 0xFFFFFFu) * (TAU / 16777216.0);
    let p = vec2<i32>(round(c + r * vec2<f32>(cos(a), sin(a))));
    return wrap_p(p, dims);
}

@compute @workgroup_size(WORKGROUP_SIZE)
fn dla_step(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= params.walkers) {
        return;
    }
    let dims = vec2<i32>(i32(params.grid_w), i32(params.grid_h));
    let center_i = dims / 2;
    let center = vec2<f32>(center_i);
    let min_dim = f32(min(params.grid_w, params.grid_h));
    let torus_max_r = max(1.0, 0.5 * length(vec2<f32>(dims)) - band.edge_pad_px);
    let ring_out = max(band.outer_min_px, band.outer_frac * min_dim);
    let ring_in = max(band.inner_min_px, band.inner_frac * min_dim);
    let margin = max(band.margin_min_px, band.margin_frac * min_dim);

    var state = rngs[i];
    let packed = walkers[i];
    var p = vec2<i32>(i32(packed & 0xFFFFu), i32(packed >> 16u));
    var base_r = sqrt(f32(atomicLoad(&radius_sqr)));
    var min_r = max(1.0, base_r - ring_in);
    var max_r = min(torus_max_r, base_r + ring_out);

    for (var s = 0u; s < params.steps; s = s + 1u) {
        if ((s & params.refresh_mask) == 0u) {
            base_r = sqrt(f32(atomicLoad(&radius_sqr)));
            min_r = max(1.0, base_r - ring_in);
            max_r = min(torus_max_r, base_r + ring_out);
        }

        let r2 = f32(dist_sq(p, center_i, dims));
        if (r2 < min_r * min_r || r2 > max_r * max_r) {
            let u = f32(lcg_next(&state) & 0xFFFFu) / 65536.0;
            p = spawn_at(&state, center, clamp(base_r + u * ring_in, 1.0, torus_max_r), dims);
            continue;
        }

        let dir = lcg_next(&state) & 3u;
        var delta = vec2<i32>(1, 0);
        if (dir == 1u) {
            delta = vec2<i32>(-1, 0);
        } else if (dir == 2u) {
            delta = vec2<i32>(0, 1);
        } else if (dir == 3u) {
            delta = vec2<i32>(0, -1);
        }
        let next = wrap_p(p + delta, dims);

        if (occupied(next, dims)) {
            let u = f32(lcg_next(&state) & 0xFFFFu) / 65536.0;
            p = spawn_at(&state, center, clamp(base_r + u * ring_in, 1.0, torus_max_r), dims);
            continue;
        }

        let touching = occupied(next + vec2<i32>(1, 0), dims)
            || occupied(next + vec2<i32>(-1, 0), dims)
            || occupied(next + vec2<i32>(0, 1), dims)
            || occupied(next + vec2<i32>(0, -1), dims);
        if (touching) {
            textureStore(occ_write, next, vec4<f32>(1.0, 1.0, 1.0, 1.0));
            atomicMax(&radius_sqr, dist_sq(next, center_i, dims));
            let now_r = sqrt(f32(atomicLoad(&radius_sqr)));
            let jitter = f32((lcg_next(&state) >> 4u) & 0xFFFFu) * (margin / 65536.0);
            p = spawn_at(&state, center, min(torus_max_r, now_r + margin + jitter), dims);
        } else {
            p = next;
        }
    }

    walkers[i] = (u32(p.y) << 16u) | (u32(p.x) & 0xFFFFu);
    rngs[i] = state;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use myco_core::SpawnStrategy;

    #[test]
    fn walker_packing_round_trips_extremes() {
        assert_eq!(unpack_walker(pack_walker(0, 0)), (0, 0));
        assert_eq!(unpack_walker(pack_walker(65_535, 65_535)), (65_535, 65_535));
        assert_eq!(pack_walker(3, 2), 0x0002_0003);
    }

    #[test]
    fn uniforms_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<DlaParams>(), 32);
        assert_eq!(std::mem::size_of::<BandParams>(), 32);
    }

    #[test]
    fn seed_image_lights_block() {
        let grid = GridSpec::new(16, 8).expect("grid");
        let image = seed_image(grid, 1);
        let lit = image.chunks_exact(4).filter(|px| px[0] == 255).count();
        assert_eq!(lit, 9);
        let centre = grid.index(8, 4) * 4;
        assert_eq!(image[centre], 255);
    }

    #[test]
    fn initial_walkers_sit_on_the_band() {
        let settings = Settings {
            rng_seed: Some(1),
            ..Settings::default()
        };
        let grid = GridSpec::new(256, 128).expect("grid");
        let band = Annulus::from_frontier(2.0, grid, &settings.dla.annulus);
        let mut rng = settings.seeded_rng();
        let (packed, states) = spawn_walkers(&mut rng, grid, &band, 64);
        assert_eq!(packed.len(), 64);
        assert!(states.iter().all(|s| s & 1 == 1));
        for p in packed {
            let (x, y) = unpack_walker(p);
            assert!(x < 256 && y < 128);
            let r = (grid.distance_sq_from_center(x, y) as f32).sqrt();
            assert!(r <= band.radius + band.inner_band + 1.0);
        }
    }

    #[test]
    fn spawn_ignores_cpu_only_knobs() {
        let grid = GridSpec::new(192, 160).expect("grid");
        let placements = [SpawnStrategy::Uniform, SpawnStrategy::Ring, SpawnStrategy::Annulus]
            .map(|spawn| {
                let settings = Settings {
                    rng_seed: Some(7),
                    dla: DlaSettings {
                        spawn,
                        center_bias: 0.4,
                        ..DlaSettings::default()
                    },
                    ..Settings::default()
                };
                let (r2, band) = initial_band(&settings.dla, grid);
                let mut rng = settings.seeded_rng();
                (r2, band, spawn_walkers(&mut rng, grid, &band, 32))
            });
        assert_eq!(placements[0], placements[1]);
        assert_eq!(placements[1], placements[2]);
        assert_eq!(placements[0].0, 8);
    }
}
