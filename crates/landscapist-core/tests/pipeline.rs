//! End-to-end loads through ImageLoader

use std::io::{BufRead, BufReader, Cursor, Write};
use std::net::TcpListener;
use std::path::Path;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use landscapist_core::*;
use landscapist_image::{
    DecodeConfig, DecodeError, DecodedImage, GrayscaleTransformation, ImageDecoder, LruBitmapPool, RasterDecoder, Region,
    RegionDecoder,
};
use landscapist_net::FetchError;
use smol::stream::StreamExt;

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_fn(width, height, |x, y| image::Rgb([(x * 7 % 256) as u8, (y * 3 % 256) as u8, 200]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, png(width, height)).unwrap();
    path
}

/// Serve `body` as image/png to a single connection
fn serve_once(body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
            line.clear();
        }
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(head.as_bytes()).unwrap();
        stream.write_all(&body).unwrap();
    });
    format!("http://{addr}/image.png")
}

fn config() -> LandscapistConfig {
    let mut config = LandscapistConfig::default();
    config.network.use_system_proxy = false;
    config.network.connect_timeout = Duration::from_secs(2);
    config.network.read_timeout = Duration::from_secs(5);
    config
}

fn collect(load: ImageLoad) -> Vec<ImageResult> {
    smol::block_on(load.collect::<Vec<_>>())
}

/// Poll `condition` for up to two seconds
fn wait_until(condition: impl Fn() -> bool) -> bool {
    smol::block_on(async {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            smol::Timer::after(Duration::from_millis(10)).await;
        }
        condition()
    })
}

/// Parks each decode until the gate opens, then decodes normally
struct GatedDecoder {
    entered: mpsc::Sender<()>,
    gate: Mutex<mpsc::Receiver<()>>,
}

impl ImageDecoder for GatedDecoder {
    fn decode(
        &self,
        data: &[u8],
        mime_type: Option<&str>,
        target_width: Option<u32>,
        target_height: Option<u32>,
        config: &DecodeConfig,
    ) -> Result<DecodedImage, DecodeError> {
        let _ = self.entered.send(());
        let _ = self.gate.lock().unwrap().recv();
        RasterDecoder.decode(data, mime_type, target_width, target_height, config)
    }
}

// ============================================================================
// CACHE TIERS
// ============================================================================

#[test]
fn test_file_load_then_memory_hit() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "a.png", 40, 30);
    let loader = ImageLoader::new(config()).unwrap();

    let states = collect(loader.load(ImageRequest::new(path.clone())));
    assert_eq!(states.len(), 2);
    assert!(states[0].is_loading());
    match &states[1] {
        ImageResult::Success { bitmap, data_source, original_width, raw_data, is_intermediate, .. } => {
            assert_eq!((bitmap.width(), bitmap.height()), (40, 30));
            assert_eq!(*data_source, DataSource::Local);
            assert_eq!(*original_width, 40);
            assert!(raw_data.is_some());
            assert!(!is_intermediate);
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(loader.memory_cache().len(), 1);

    let load = loader.load(ImageRequest::new(path));
    assert!(load.disposable().is_disposed());
    let states = collect(load);
    assert_eq!(states.len(), 2);
    assert_eq!(states[1].data_source(), Some(DataSource::Memory));
}

#[test]
fn test_network_load_writes_disk_then_disk_hit() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.disk_cache_dir = Some(dir.path().join("cache"));
    let loader = ImageLoader::new(config).unwrap();
    let url = serve_once(png(16, 16));

    let result = smol::block_on(loader.execute(ImageRequest::new(url.as_str())));
    let disk_path = match result {
        ImageResult::Success { data_source, disk_cache_path, .. } => {
            assert_eq!(data_source, DataSource::Network);
            disk_cache_path.unwrap()
        }
        other => panic!("expected success, got {other:?}"),
    };
    assert!(disk_path.exists());

    // The server is gone; only the disk cache can answer now
    loader.clear_memory_cache();
    let result = smol::block_on(loader.execute(ImageRequest::new(url.as_str())));
    match result {
        ImageResult::Success { data_source, disk_cache_path, .. } => {
            assert_eq!(data_source, DataSource::Disk);
            assert_eq!(disk_cache_path, Some(disk_path));
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[test]
fn test_memory_hit_reports_source_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "wide.png", 200, 100);
    let loader = ImageLoader::new(config()).unwrap();
    let request = ImageRequest::builder(path).size(Some(50), None).progressive(false).build();

    let first = smol::block_on(loader.execute(request.clone()));
    assert_eq!(first.data_source(), Some(DataSource::Local));

    match smol::block_on(loader.execute(request)) {
        ImageResult::Success { bitmap, data_source, original_width, original_height, .. } => {
            assert_eq!(data_source, DataSource::Memory);
            assert_eq!((bitmap.width(), bitmap.height()), (50, 25));
            assert_eq!((original_width, original_height), (200, 100));
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[test]
fn test_memory_policy_disabled_skips_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "a.png", 8, 8);
    let loader = ImageLoader::new(config()).unwrap();
    let request = ImageRequest::builder(path).memory_cache_policy(CachePolicy::Disabled).build();

    let first = smol::block_on(loader.execute(request.clone()));
    let second = smol::block_on(loader.execute(request));
    assert_eq!(first.data_source(), Some(DataSource::Local));
    assert_eq!(second.data_source(), Some(DataSource::Local));
    assert!(loader.memory_cache().is_empty());
}

// ============================================================================
// DECODE OPTIONS
// ============================================================================

#[test]
fn test_target_size_and_transformation() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "a.png", 200, 100);
    let loader = ImageLoader::new(config()).unwrap();
    let request = ImageRequest::builder(path)
        .size(Some(50), None)
        .transformation(GrayscaleTransformation)
        .progressive(false)
        .build();
    let key = request.cache_key();

    let result = smol::block_on(loader.execute(request));
    let bitmap = result.bitmap().unwrap();
    assert_eq!((bitmap.width(), bitmap.height()), (50, 25));
    let [r, g, b, _] = bitmap.get_pixel(10, 10).unwrap();
    assert!(r == g && g == b);
    assert!(loader.memory_cache().contains(&key));
}

#[test]
fn test_interlaced_png_streams_intermediate_states() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("interlaced.png");
    std::fs::write(&path, include_bytes!("../../landscapist-image/tests/fixtures/interlaced_64x32.png")).unwrap();
    let loader = ImageLoader::new(config()).unwrap();

    let states = collect(loader.load(ImageRequest::new(path)));
    assert!(states[0].is_loading());
    let intermediate: Vec<(u32, f32)> = states
        .iter()
        .filter_map(|state| match state {
            ImageResult::Success { bitmap, is_intermediate: true, progress, original_width, .. } => {
                assert_eq!(*original_width, 64);
                Some((bitmap.width(), *progress))
            }
            _ => None,
        })
        .collect();
    assert_eq!(intermediate, vec![(8, 0.25), (16, 0.5), (32, 0.75)]);

    match states.last().unwrap() {
        ImageResult::Success { bitmap, is_intermediate, .. } => {
            assert!(!is_intermediate);
            assert_eq!(bitmap.width(), 64);
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(states.len(), 5);
    assert_eq!(loader.memory_cache().len(), 1);
}

#[test]
fn test_bitmap_model_passes_through() {
    let loader = ImageLoader::new(config()).unwrap();
    let bitmap = Arc::new(landscapist_image::Bitmap::from_rgba(vec![255; 4 * 4 * 4], 4, 4));

    let result = smol::block_on(loader.execute(ImageRequest::new(ImageModel::Bitmap(bitmap.clone()))));
    assert!(Arc::ptr_eq(result.bitmap().unwrap(), &bitmap));
}

// ============================================================================
// FAILURES AND CANCELLATION
// ============================================================================

#[test]
fn test_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let loader = ImageLoader::new(config()).unwrap();

    let states = collect(loader.load(ImageRequest::new(dir.path().join("missing.png"))));
    assert!(states[0].is_loading());
    match states.last().unwrap() {
        ImageResult::Failure { error, message } => {
            assert!(matches!(error.as_deref(), Some(LandscapistError::Fetch(FetchError::Io(_)))));
            assert!(message.is_some());
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn test_garbage_bytes_fail_to_decode() {
    let loader = ImageLoader::new(config()).unwrap();
    let result = smol::block_on(loader.execute(ImageRequest::new(b"not an image".to_vec())));
    match result {
        ImageResult::Failure { error, .. } => {
            assert!(matches!(error.as_deref(), Some(LandscapistError::Decode(_))));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn test_dispose_ends_stream_without_terminal_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "a.png", 8, 8);
    let scheduler = DecodeScheduler::new(1);
    let (release, rx) = smol::channel::bounded::<()>(1);
    let blocker = scheduler.schedule("blocker", DecodePriority::Immediate, None, async move {
        let _ = rx.recv().await;
    });
    let loader = ImageLoader::builder(config()).scheduler(scheduler.clone()).build().unwrap();

    let load = loader.load(ImageRequest::new(path));
    let disposable = load.disposable();
    disposable.dispose();
    smol::block_on(disposable.wait());

    let states = collect(load);
    assert!(states.iter().all(|s| !s.is_terminal()));
    assert_eq!(loader.request_manager().active_count(), 0);

    drop(release);
    smol::block_on(blocker).unwrap();
}

#[test]
fn test_scheduler_cancel_by_tag_ends_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "a.png", 8, 8);
    let scheduler = DecodeScheduler::new(1);
    let (release, rx) = smol::channel::bounded::<()>(1);
    let blocker = scheduler.schedule("blocker", DecodePriority::Immediate, None, async move {
        let _ = rx.recv().await;
    });
    let loader = ImageLoader::builder(config()).scheduler(scheduler.clone()).build().unwrap();

    let load = loader.load(ImageRequest::builder(path).tag("feed").build());
    smol::block_on(async {
        for _ in 0..200 {
            if scheduler.pending_count() == 1 {
                break;
            }
            smol::Timer::after(Duration::from_millis(10)).await;
        }
    });
    assert_eq!(scheduler.cancel_by_tag("feed"), 1);

    let states = collect(load);
    assert_eq!(states.len(), 1);
    assert!(states[0].is_loading());

    drop(release);
    smol::block_on(blocker).unwrap();
}

#[test]
fn test_cancelled_running_decode_delivers_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "a.png", 8, 8);
    let (entered, decoding) = mpsc::channel();
    let (open_gate, gate) = mpsc::channel();
    let scheduler = DecodeScheduler::new(1);
    let loader = ImageLoader::builder(config())
        .scheduler(scheduler.clone())
        .decoder(Arc::new(GatedDecoder { entered, gate: Mutex::new(gate) }))
        .build()
        .unwrap();

    let load = loader.load(ImageRequest::builder(path).tag("gallery").build());
    decoding.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(scheduler.active_count(), 1);
    assert_eq!(scheduler.cancel_by_tag("gallery"), 1);

    // Still decoding; the permit stays taken
    assert_eq!(scheduler.active_count(), 1);
    open_gate.send(()).unwrap();

    let states = collect(load);
    assert_eq!(states.len(), 1);
    assert!(states[0].is_loading());
    assert!(loader.memory_cache().is_empty());
    assert!(wait_until(|| scheduler.active_count() == 0));
}

#[test]
fn test_execute_after_cancel_all() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "a.png", 8, 8);
    let loader = ImageLoader::new(config()).unwrap();

    let result = smol::block_on(loader.execute(ImageRequest::new(path)));
    assert!(result.is_final());
    assert_eq!(loader.request_manager().cancel_all(), 0);
}

// ============================================================================
// REGION DECODE
// ============================================================================

#[test]
fn test_region_decoder_uses_loader_pool() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "big.png", 512, 512);
    let pool = Arc::new(LruBitmapPool::new(4, 4 * 1024 * 1024));
    let loader = ImageLoader::builder(config()).bitmap_pool(pool.clone()).build().unwrap();

    let decoder = smol::block_on(loader.region_decoder(&ImageRequest::new(path))).unwrap();
    assert_eq!((decoder.width(), decoder.height()), (512, 512));

    let tile = decoder.decode_region(Region::new(0, 0, 256, 256), 2).unwrap();
    assert_eq!((tile.bitmap.width(), tile.bitmap.height()), (128, 128));
    assert_eq!(pool.stats().misses, 1);
}
