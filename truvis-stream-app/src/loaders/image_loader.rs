use crate::device::{DeviceTextureHandle, MockDevice};
use anyhow::Context;
use image::{DynamicImage, GenericImageView};
use std::path::Path;
use std::sync::Arc;
use truvis_asset_stream::{Asset, AssetLoader};

/// 解码后的图片数据 (CPU 端)，统一为 RGBA8
pub struct RawImageData {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RawImageData {
    fn from_image(img: DynamicImage) -> Self {
        let (width, height) = img.dimensions();
        // 强制转换为 RGBA8
        let pixels = img.into_rgba8().into_raw();
        Self { pixels, width, height }
    }
}

/// 图片在设备上的资源，drop 时销毁对应的设备纹理
pub struct UploadedTexture {
    device: Arc<MockDevice>,
    pub handle: DeviceTextureHandle,
    pub width: u32,
    pub height: u32,
}
impl Drop for UploadedTexture {
    fn drop(&mut self) {
        self.device.destroy_texture(self.handle);
    }
}

/// 使用 `image` 解码的图片 Loader
pub struct ImageLoader {
    device: Arc<MockDevice>,
}
impl ImageLoader {
    pub fn new(device: Arc<MockDevice>) -> Self {
        Self { device }
    }
}
impl AssetLoader for ImageLoader {
    fn name(&self) -> &str {
        "ImageLoader"
    }

    fn load_from_path(&self, asset: &Asset, path: &Path) -> anyhow::Result<()> {
        let _span = tracy_client::span!("ImageLoader::load_from_path");
        let img = image::open(path).with_context(|| format!("Failed to load texture {:?}", path))?;
        asset.store_cpu_data(RawImageData::from_image(img));
        Ok(())
    }

    fn load_from_memory(&self, asset: &Asset, data: &[u8]) -> anyhow::Result<()> {
        let _span = tracy_client::span!("ImageLoader::load_from_memory");
        let img = image::load_from_memory(data)
            .with_context(|| format!("Failed to decode texture '{}' from memory", asset.name()))?;
        asset.store_cpu_data(RawImageData::from_image(img));
        Ok(())
    }

    fn create_device_resource(&self, asset: &Asset) -> anyhow::Result<()> {
        let uploaded = asset
            .with_cpu_data(|raw: &RawImageData| {
                self.device.create_texture(raw.width, raw.height, &raw.pixels).map(|handle| UploadedTexture {
                    device: self.device.clone(),
                    handle,
                    width: raw.width,
                    height: raw.height,
                })
            })
            .with_context(|| format!("'{}' has no decoded image data", asset.name()))??;

        asset.set_device_resource(uploaded);
        Ok(())
    }
}
