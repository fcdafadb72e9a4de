//! Offscreen composite target and the triple-buffered readback ring.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use myco_core::{GridSpec, PixelBuffer};

use crate::context::{GpuError, align_256};

pub const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Render target used when there is no surface, sized one pixel per cell.
pub struct OffscreenTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: (u32, u32),
}

impl OffscreenTarget {
    pub fn new(device: &wgpu::Device, grid: GridSpec) -> Self {
        let size = (grid.width().max(1), grid.height().max(1));
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("myco.offscreen"),
            size: wgpu::Extent3d {
                width: size.0,
                height: size.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            size,
        }
    }

    #[must_use]
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    #[must_use]
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    #[must_use]
    pub const fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn destroy(&self) {
        self.texture.destroy();
    }
}

struct ReadbackSlot {
    buf: wgpu::Buffer,
    mapped: Arc<AtomicBool>,
}

/// Three mappable buffers rotated across captures so a slow consumer never
/// stalls the next copy.
pub struct ReadbackRing {
    slots: [ReadbackSlot; 3],
    curr: usize,
    bytes_per_row: u32,
    extent: (u32, u32),
}

impl ReadbackRing {
    pub fn new(device: &wgpu::Device, extent: (u32, u32)) -> Self {
        let extent = (extent.0.max(1), extent.1.max(1));
        let bytes_per_row = align_256(extent.0 * 4);
        let size_bytes = u64::from(bytes_per_row) * u64::from(extent.1);
        let mk_slot = || ReadbackSlot {
            buf: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("myco.readback"),
                size: size_bytes,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            }),
            mapped: Arc::new(AtomicBool::new(false)),
        };
        Self {
            slots: [mk_slot(), mk_slot(), mk_slot()],
            curr: 0,
            bytes_per_row,
            extent,
        }
    }

    #[must_use]
    pub const fn bytes_per_row(&self) -> u32 {
        self.bytes_per_row
    }

    /// Copies `color` into the next slot, waits for the map and returns the
    /// straight-alpha pixels.
    pub fn capture(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        color: &wgpu::Texture,
        grid: GridSpec,
    ) -> Result<PixelBuffer, GpuError> {
        let slot = &self.slots[self.curr];
        if slot.mapped.swap(false, Ordering::AcqRel) {
            slot.buf.unmap();
        }
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("myco.readback.copy"),
        });
        encoder.copy_texture_to_buffer(
            color.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &slot.buf,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.bytes_per_row),
                    rows_per_image: Some(self.extent.1),
                },
            },
            wgpu::Extent3d {
                width: self.extent.0,
                height: self.extent.1,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(Some(encoder.finish()));

        let slice = slot.buf.slice(..);
        let mapped_flag = Arc::clone(&slot.mapped);
        slice.map_async(wgpu::MapMode::Read, move |res| {
            if res.is_ok() {
                mapped_flag.store(true, Ordering::Release);
            }
        });
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| GpuError::Readback(e.to_string()))?;
        self.curr = (self.curr + 1) % self.slots.len();

        if !slot.mapped.load(Ordering::Acquire) {
            return Err(GpuError::Readback("buffer map did not complete".into()));
        }
        let data = {
            let view = slice.get_mapped_range();
            unpad_rows(&view, self.bytes_per_row, self.extent)
        };
        slot.buf.unmap();
        slot.mapped.store(false, Ordering::Release);
        PixelBuffer::from_rgba8(grid, data).map_err(|e| GpuError::Readback(e.to_string()))
    }

    pub fn destroy(&self) {
        for slot in &self.slots {
            slot.buf.destroy();
        }
    }
}

/// Strips row padding and converts premultiplied RGBA8 back to straight alpha.
pub(crate) fn unpad_rows(padded: &[u8], bytes_per_row: u32, extent: (u32, u32)) -> Vec<u8> {
    let tight = extent.0 as usize * 4;
    let mut out = Vec::with_capacity(tight * extent.1 as usize);
    for row in padded
        .chunks(bytes_per_row as usize)
        .take(extent.1 as usize)
    {
        for px in row[..tight].chunks_exact(4) {
            out.extend_from_slice(&unpremultiply(px));
        }
    }
    out
}

fn unpremultiply(px: &[u8]) -> [u8; 4] {
    let a = px[3];
    if a == 0 {
        return [0, 0, 0, 0];
    }
    let scale = |c: u8| ((u32::from(c) * 255 + u32::from(a) / 2) / u32::from(a)).min(255) as u8;
    [scale(px[0]), scale(px[1]), scale(px[2]), a]
}
