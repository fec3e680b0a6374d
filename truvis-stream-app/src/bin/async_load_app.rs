use anyhow::Context;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use truvis_asset_stream::{Asset, AssetHandle, AssetKind, AssetLoader, AssetStreamManager, LoadStatus, StreamConfig};
use truvis_crate_tools::init_log::init_log;
use truvis_stream_app::device::MockDevice;
use truvis_stream_app::loaders::{ImageLoader, ObjMeshLoader, UploadedTexture};

const FRAME_TIME: Duration = Duration::from_millis(16);
const MAX_FRAMES: usize = 600;

const CUBE_OBJ: &str = "\
o cube
v -1 -1 -1
v 1 -1 -1
v 1 1 -1
v -1 1 -1
v -1 -1 1
v 1 -1 1
v 1 1 1
v -1 1 1
f 1 2 3 4
f 5 8 7 6
f 1 5 6 2
f 2 6 7 3
f 3 7 8 4
f 5 1 4 8
";

fn gradient_png(size: u32, seed: u8) -> anyhow::Result<Vec<u8>> {
    let img = RgbaImage::from_fn(size, size, |x, y| {
        Rgba([(x * 255 / size) as u8, (y * 255 / size) as u8, seed.wrapping_mul(37), 255])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("Failed to encode gradient png")?;
    Ok(bytes)
}

fn main() -> anyhow::Result<()> {
    init_log();

    let config = match std::env::args().nth(1) {
        Some(path) => StreamConfig::from_file(&path)?,
        None => StreamConfig::default(),
    };
    log::info!("Stream config: {:?}", config);

    // 主线程扮演渲染线程：设备在这里创建，设备资源也只在这里创建
    let device = Arc::new(MockDevice::new());
    let image_loader = Arc::new(ImageLoader::new(device.clone()));
    let mesh_loader = Arc::new(ObjMeshLoader::new(device.clone()));

    let manager = AssetStreamManager::new(config.clone());
    manager.register_loader(AssetKind::Image, image_loader.clone());
    manager.register_loader(AssetKind::Mesh, mesh_loader);

    // 占位纹理同步加载
    let fallback = Asset::new_handle("fallback-checker", AssetKind::Image);
    image_loader.load_from_memory(&fallback, &gradient_png(4, 0)?)?;
    image_loader.create_device_resource(&fallback)?;
    image_loader.release(&fallback);
    manager.register_placeholder(fallback.clone());

    let mut upload_stage = manager.start_with_upload_stage(config.worker_count)?;

    let mut assets: Vec<AssetHandle> = Vec::new();
    for i in 0..12u32 {
        let texture = Asset::new_handle(format!("gradient-{i}"), AssetKind::Image);
        texture.on_loaded(|asset| {
            if let Some((width, height)) = asset.with_device_resource(|tex: &UploadedTexture| (tex.width, tex.height)) {
                log::info!("'{}' ready: {}x{}", asset.name(), width, height);
            }
        });
        manager.submit_memory(gradient_png(64 << (i % 4), i as u8)?, AssetKind::Image, texture.clone());
        assets.push(texture);
    }

    let cube = Asset::new_handle("cube", AssetKind::Mesh);
    manager.submit_memory(CUBE_OBJ.as_bytes().to_vec(), AssetKind::Mesh, cube.clone());
    assets.push(cube);

    let missing = Asset::new_handle("missing-texture", AssetKind::Image);
    missing.on_error(|asset, e| log::warn!("'{}' failed: {:#}", asset.name(), e));
    manager.submit_path("resources/does-not-exist.png", AssetKind::Image, missing.clone());
    assets.push(missing);

    let begin = Instant::now();
    for frame in 0..MAX_FRAMES {
        let _span = tracy_client::span!("frame");
        upload_stage.pump();
        device.flush_pending_destroy()?;

        let fallbacks = assets
            .iter()
            .filter(|asset| asset.kind() == AssetKind::Image)
            .filter_map(|asset| manager.resolve(asset))
            .filter(|resolved| Arc::ptr_eq(resolved, &fallback))
            .count();
        if frame % 10 == 0 {
            log::info!("frame {}: {} textures drawn with fallback, {:?}", frame, fallbacks, manager.stats());
        }

        if assets.iter().all(|asset| asset.is_finished()) {
            log::info!("All assets finished after {} frames ({:?})", frame + 1, begin.elapsed());
            break;
        }
        std::thread::sleep(FRAME_TIME);
    }

    for asset in &assets {
        match asset.wait_until_loaded_timeout(Duration::ZERO) {
            Some(LoadStatus::Success) => log::info!("{:?}", asset),
            Some(status) => log::warn!("'{}' finished with {:?}: {:?}", asset.name(), status, asset.last_error()),
            None => log::warn!("'{}' is still in flight", asset.name()),
        }
    }

    log::info!("Pipeline stats: {:?}", manager.stats());
    manager.shutdown();
    upload_stage.pump();

    // 设备资源随 asset 一起释放
    drop(assets);
    drop(fallback);
    drop(manager);
    device.flush_pending_destroy()?;
    log::info!("Device holds {} textures, {} meshes", device.texture_count(), device.mesh_count());

    Ok(())
}
