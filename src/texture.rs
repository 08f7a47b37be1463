use wgpu::{
    Device, Extent3d, ImageCopyTexture, ImageDataLayout, Origin3d, Queue, Texture, TextureAspect,
    TextureDescriptor, TextureDimension, TextureFormat, TextureUsages, TextureView,
    TextureViewDescriptor,
};
use winit::dpi::PhysicalSize;

/// GPU-side image the traced frame is uploaded into. The view is handed to
/// egui as a native texture for display.
pub struct Image {
    pub gpu_texture: Texture,
    pub view: TextureView,
    pub name: String,
}

impl Image {
    pub fn new(device: &Device, width: u32, height: u32, label: &str) -> Image {
        let gpu_texture = device.create_texture(&TextureDescriptor {
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
            // Sampled by the UI pass, overwritten from the CPU every frame.
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let view = gpu_texture.create_view(&TextureViewDescriptor {
            label: Some(&format!("{} view", label)),
            ..Default::default()
        });

        Self {
            gpu_texture,
            view,
            name: label.to_string(),
        }
    }

    /// Uploads one packed RGBA pixel per texel. `pixels` must cover the whole
    /// texture.
    pub fn upload(&self, queue: &Queue, pixels: &[u32]) {
        let size = self.gpu_texture.size();
        assert_eq!(
            pixels.len(),
            (size.width * size.height) as usize,
            "pixel buffer does not match the texture extent"
        );

        queue.write_texture(
            ImageCopyTexture {
                texture: &self.gpu_texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            bytemuck::cast_slice(pixels),
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * size.width),
                rows_per_image: Some(size.height),
            },
            size,
        )
    }

    /// Recreates the texture when the extent changed. Returns whether a new
    /// allocation was made, in which case cached view handles are stale.
    pub fn resize(&mut self, device: &Device, new_size: PhysicalSize<u32>) -> bool {
        if self.gpu_texture.width() == new_size.width
            && self.gpu_texture.height() == new_size.height
        {
            return false;
        }

        let new = Self::new(device, new_size.width, new_size.height, &self.name);
        self.view = new.view;
        self.gpu_texture = new.gpu_texture;
        true
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        PhysicalSize::new(self.gpu_texture.width(), self.gpu_texture.height())
    }
}
