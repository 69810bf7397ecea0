use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::flip_vertical_in_place;
use image::GenericImageView;
use wgpu::util::{DeviceExt, TextureDataOrder};

/// One texture unit: the image behind every `texN` sampler bound to unit N.
pub(crate) struct TextureUnit {
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub size: (u32, u32),
    _texture: wgpu::Texture,
}

/// Loads one unit per path, substituting a placeholder for unreadable images.
pub(crate) fn load_units<P: AsRef<Path>>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    paths: &[P],
) -> Vec<TextureUnit> {
    paths
        .iter()
        .enumerate()
        .map(|(unit, path)| {
            let path = path.as_ref();
            load_texture(device, queue, unit, path).unwrap_or_else(|error| {
                tracing::warn!(
                    unit,
                    path = %path.display(),
                    error = %error,
                    "failed to load texture; using placeholder"
                );
                placeholder(device, queue, &format!("placeholder texture #{unit}"))
            })
        })
        .collect()
}

fn load_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    unit: usize,
    path: &Path,
) -> Result<TextureUnit> {
    let image = image::open(path)
        .with_context(|| format!("failed to open texture {} for unit {unit}", path.display()))?;
    let (width, height) = image.dimensions();
    let mut rgba = image.to_rgba8();
    // Row 0 is the bottom of the image in GL texture space.
    flip_vertical_in_place(&mut rgba);

    let limit = device.limits().max_texture_dimension_2d;
    if width > limit || height > limit {
        anyhow::bail!("texture is {width}x{height}, device limit is {limit}");
    }

    let texture = device.create_texture_with_data(
        queue,
        &texture_descriptor(&format!("texture unit #{unit}"), width, height),
        TextureDataOrder::LayerMajor,
        &rgba,
    );
    tracing::debug!(unit, width, height, path = %path.display(), "loaded texture");
    Ok(finish(device, texture, (width, height)))
}

/// 1×1 opaque white texture bound wherever a unit is missing.
pub(crate) fn placeholder(device: &wgpu::Device, queue: &wgpu::Queue, label: &str) -> TextureUnit {
    let texture = device.create_texture_with_data(
        queue,
        &texture_descriptor(label, 1, 1),
        TextureDataOrder::LayerMajor,
        &[255u8, 255, 255, 255],
    );
    finish(device, texture, (1, 1))
}

fn texture_descriptor(label: &str, width: u32, height: u32) -> wgpu::TextureDescriptor<'_> {
    wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    }
}

fn finish(device: &wgpu::Device, texture: wgpu::Texture, size: (u32, u32)) -> TextureUnit {
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        address_mode_u: wgpu::AddressMode::Repeat,
        address_mode_v: wgpu::AddressMode::Repeat,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    });
    TextureUnit {
        view,
        sampler,
        size,
        _texture: texture,
    }
}
