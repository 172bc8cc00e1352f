//! WebGPU-backed slot textures, registered with egui so panels can draw them

use std::collections::HashMap;

use eframe::egui_wgpu::RenderState;
use thiserror::Error;
use tracing::{debug, info};
use wgpu::{
    AddressMode, Extent3d, FilterMode, ImageCopyTexture, ImageDataLayout, Limits, Origin3d,
    SamplerDescriptor, Texture, TextureAspect, TextureDescriptor, TextureDimension,
    TextureFormat, TextureUsages, TextureView, TextureViewDescriptor,
};

use super::backend::{Filter, SamplerPolicy, TextureBackend, TextureHandle, Wrap};
use super::convert::rgb_to_rgba;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("unknown texture {0}")]
    UnknownHandle(TextureHandle),

    #[error("{width}x{height} exceeds the device limit of {max} texels per side")]
    TooLarge { width: u32, height: u32, max: u32 },

    #[error("upload of {actual} bytes does not fill a {width}x{height} RGB texture")]
    SizeMismatch {
        width: u32,
        height: u32,
        actual: usize,
    },
}

struct GpuTexture {
    id: egui::TextureId,
    label: String,
    sampler: SamplerPolicy,
    texture: Texture,
    size: (u32, u32),
}

/// Slot textures living on the same device egui renders with
pub struct WgpuBackend {
    render_state: RenderState,
    textures: HashMap<TextureHandle, GpuTexture>,
    next_id: u64,
}

impl WgpuBackend {
    pub fn new(render_state: RenderState) -> Self {
        info!("GPU: {}", render_state.adapter.get_info().name);
        Self {
            render_state,
            textures: HashMap::new(),
            next_id: 0,
        }
    }

    /// The id egui draws `handle` with
    pub fn texture_id(&self, handle: TextureHandle) -> Option<egui::TextureId> {
        self.textures.get(&handle).map(|t| t.id)
    }

    fn create_texture(&self, label: &str, width: u32, height: u32) -> (Texture, TextureView) {
        let texture = self.render_state.device.create_texture(&TextureDescriptor {
            label: Some(label),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8UnormSrgb,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());
        (texture, view)
    }
}

/// Device request for eframe that lifts egui's 8192-texel cap to what the
/// adapter supports, so a virtual desktop spanning several monitors still fits.
pub fn device_descriptor(adapter: &wgpu::Adapter) -> wgpu::DeviceDescriptor<'static> {
    let base = if adapter.get_info().backend == wgpu::Backend::Gl {
        Limits::downlevel_webgl2_defaults()
    } else {
        Limits::default()
    };
    wgpu::DeviceDescriptor {
        label: Some("framedeck device"),
        required_features: wgpu::Features::default(),
        required_limits: frame_limits(base, &adapter.limits()),
        memory_hints: wgpu::MemoryHints::default(),
    }
}

fn frame_limits(base: Limits, adapter: &Limits) -> Limits {
    Limits {
        max_texture_dimension_2d: adapter
            .max_texture_dimension_2d
            .max(base.max_texture_dimension_2d),
        ..base
    }
}

fn filter_mode(filter: Filter) -> FilterMode {
    match filter {
        Filter::Nearest => FilterMode::Nearest,
        Filter::Linear => FilterMode::Linear,
    }
}

fn address_mode(wrap: Wrap) -> AddressMode {
    match wrap {
        Wrap::ClampToEdge => AddressMode::ClampToEdge,
    }
}

fn sampler_descriptor(policy: SamplerPolicy) -> SamplerDescriptor<'static> {
    SamplerDescriptor {
        label: Some("Frame Sampler"),
        address_mode_u: address_mode(policy.wrap_u),
        address_mode_v: address_mode(policy.wrap_v),
        address_mode_w: AddressMode::ClampToEdge,
        mag_filter: filter_mode(policy.mag_filter),
        min_filter: filter_mode(policy.min_filter),
        mipmap_filter: FilterMode::Nearest,
        ..Default::default()
    }
}

impl TextureBackend for WgpuBackend {
    type Error = GpuError;

    fn allocate(
        &mut self,
        label: &str,
        sampler: SamplerPolicy,
    ) -> Result<TextureHandle, Self::Error> {
        // Placeholder storage until the first upload tells us the real size
        let (texture, view) = self.create_texture(label, 1, 1);
        let id = self
            .render_state
            .renderer
            .write()
            .register_native_texture_with_sampler_options(
                &self.render_state.device,
                &view,
                sampler_descriptor(sampler),
            );

        self.next_id += 1;
        let handle = TextureHandle::from_raw(self.next_id);
        self.textures.insert(
            handle,
            GpuTexture {
                id,
                label: label.to_owned(),
                sampler,
                texture,
                size: (1, 1),
            },
        );
        Ok(handle)
    }

    fn upload(
        &mut self,
        handle: TextureHandle,
        width: u32,
        height: u32,
        rgb: &[u8],
    ) -> Result<(), Self::Error> {
        if rgb.len() != width as usize * height as usize * 3 {
            return Err(GpuError::SizeMismatch {
                width,
                height,
                actual: rgb.len(),
            });
        }
        let max = self.render_state.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(GpuError::TooLarge { width, height, max });
        }

        let current = self
            .textures
            .get(&handle)
            .ok_or(GpuError::UnknownHandle(handle))?;

        // wgpu textures have fixed extents: swap storage, keep the egui id
        if current.size != (width, height) {
            let (texture, view) = self.create_texture(&current.label, width, height);
            let (id, sampler) = (current.id, current.sampler);
            self.render_state
                .renderer
                .write()
                .update_egui_texture_from_wgpu_texture_with_sampler_options(
                    &self.render_state.device,
                    &view,
                    sampler_descriptor(sampler),
                    id,
                );
            debug!("Recreated {handle} storage at {width}x{height}");

            if let Some(entry) = self.textures.get_mut(&handle) {
                entry.texture.destroy();
                entry.texture = texture;
                entry.size = (width, height);
            }
        }

        let Some(entry) = self.textures.get(&handle) else {
            return Err(GpuError::UnknownHandle(handle));
        };

        // No 3-byte texel format on the GPU; widen on the way up
        let rgba = rgb_to_rgba(rgb);
        self.render_state.queue.write_texture(
            ImageCopyTexture {
                texture: &entry.texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            &rgba,
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        Ok(())
    }

    fn release(&mut self, handle: TextureHandle) {
        if let Some(entry) = self.textures.remove(&handle) {
            self.render_state.renderer.write().free_texture(&entry.id);
            entry.texture.destroy();
        }
    }
}
