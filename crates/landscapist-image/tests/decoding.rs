//! Decoding tests over real encoded images
//!
//! Images are generated with the image crate's encoders at test time.

use std::io::Cursor;
use std::sync::Arc;

use landscapist_image::*;

fn encode(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let image = image::RgbImage::from_fn(width, height, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).unwrap();
    out.into_inner()
}

/// Pool that hands out a buffer too small for any real region
struct UndersizedPool;

impl BitmapPool for UndersizedPool {
    fn get(&self, _width: u32, _height: u32) -> Option<Vec<u8>> {
        Some(Vec::with_capacity(4))
    }

    fn put(&self, _buffer: Vec<u8>) {}

    fn clear(&self) {}
}

// ============================================================================
// STANDARD DECODE
// ============================================================================

#[test]
fn test_decode_jpeg_baseline() {
    let data = encode(40, 20, image::ImageFormat::Jpeg);
    assert_eq!(ImageFormat::from_bytes(&data), ImageFormat::Jpeg);
    assert!(!format::is_progressive_jpeg(&data));
    assert_eq!(format::read_dimensions(&data), Some((40, 20)));

    let decoded = RasterDecoder.decode(&data, Some("image/jpeg"), None, None, &DecodeConfig::default()).unwrap();
    assert_eq!((decoded.width, decoded.height), (40, 20));
}

#[test]
fn test_decode_respects_max_bitmap_size() {
    let data = encode(300, 150, image::ImageFormat::Png);
    let config = DecodeConfig { max_bitmap_size: 100, ..Default::default() };

    let decoded = RasterDecoder.decode(&data, None, None, None, &config).unwrap();
    assert_eq!((decoded.width, decoded.height), (100, 50));
    assert_eq!((decoded.original_width, decoded.original_height), (300, 150));
}

#[test]
fn test_progressive_decode_of_baseline_png_is_single_frame() {
    let data = encode(32, 32, image::ImageFormat::Png);
    let frames: Vec<_> = RasterDecoder
        .decode_progressive(data, None, Some(16), Some(16), DecodeConfig::default())
        .collect();

    assert_eq!(frames.len(), 1);
    match &frames[0] {
        ProgressiveFrame::Complete { width, height, original_width, .. } => {
            assert_eq!((*width, *height, *original_width), (16, 16, 32));
        }
        other => panic!("expected Complete, got {other:?}"),
    }
}

#[test]
fn test_interlaced_png_streams_passes_before_complete() {
    let data = include_bytes!("fixtures/interlaced_64x32.png").to_vec();
    assert!(format::is_progressive(&data));

    let frames: Vec<_> = RasterDecoder
        .decode_progressive(data, Some("image/png".into()), None, None, DecodeConfig::default())
        .collect();

    assert_eq!(frames.len(), 4);
    assert!(frames[..3].iter().all(|f| !f.is_terminal()));
    assert!(matches!(frames[0], ProgressiveFrame::Intermediate { width: 8, height: 4, is_preview: true, .. }));
    match &frames[3] {
        ProgressiveFrame::Complete { bitmap, width, height, .. } => {
            assert_eq!((*width, *height), (64, 32));
            assert_eq!(bitmap.get_pixel(63, 31), Some([252, 124, 128, 255]));
        }
        other => panic!("expected Complete, got {other:?}"),
    }
}

#[test]
fn test_progressive_jpeg_streams_scan_prefixes() {
    let data = include_bytes!("fixtures/progressive_64x32.jpg").to_vec();
    assert!(format::is_progressive_jpeg(&data));

    let frames: Vec<_> = RasterDecoder
        .decode_progressive(data, None, Some(32), None, DecodeConfig::default())
        .collect();

    let progress: Vec<f32> = frames
        .iter()
        .filter_map(|f| match f {
            ProgressiveFrame::Intermediate { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![0.25, 0.5, 0.75]);
    assert!(matches!(
        frames.last(),
        Some(ProgressiveFrame::Complete { width: 32, height: 16, original_width: 64, .. })
    ));
}

// ============================================================================
// REGION DECODE
// ============================================================================

#[test]
fn test_region_decode_half_region_sample_two() {
    let data = encode(1000, 1000, image::ImageFormat::Png);
    let decoder = RasterRegionDecoder::new(data, Arc::new(NoopBitmapPool)).unwrap();
    assert_eq!((decoder.width(), decoder.height()), (1000, 1000));

    let result = decoder.decode_region(Region::new(0, 0, 500, 500), 2).unwrap();
    assert!(result.bitmap.width() <= 250);
    assert!(result.bitmap.height() <= 250);
    assert_eq!(result.sample_size, 2);
}

#[test]
fn test_region_decode_clamps_to_bounds() {
    let data = encode(100, 80, image::ImageFormat::Png);
    let decoder = RasterRegionDecoder::new(data, Arc::new(NoopBitmapPool)).unwrap();

    let result = decoder.decode_region(Region::new(50, 40, 400, 400), 1).unwrap();
    assert_eq!(result.region, Region::new(50, 40, 100, 80));
    assert_eq!((result.bitmap.width(), result.bitmap.height()), (50, 40));
    // Pixel (0,0) of the region is source pixel (50,40)
    assert_eq!(result.bitmap.get_pixel(0, 0), Some([50, 40, 128, 255]));
}

#[test]
fn test_region_outside_image_is_invalid() {
    let data = encode(100, 100, image::ImageFormat::Png);
    let decoder = RasterRegionDecoder::new(data, Arc::new(NoopBitmapPool)).unwrap();

    let err = decoder.decode_region(Region::new(200, 200, 300, 300), 1).unwrap_err();
    assert!(matches!(err, RegionDecodeError::InvalidRegion { .. }));
    assert_eq!(err.region(), Region::new(200, 200, 300, 300));
}

#[test]
fn test_region_decoder_after_close_is_recycled() {
    let data = encode(64, 64, image::ImageFormat::Png);
    let decoder = RasterRegionDecoder::new(data, Arc::new(NoopBitmapPool)).unwrap();
    decoder.close();

    assert!(decoder.is_closed());
    let err = decoder.decode_region(Region::new(0, 0, 10, 10), 1).unwrap_err();
    assert!(matches!(err, RegionDecodeError::Recycled { .. }));
}

#[test]
fn test_region_decode_retries_without_incompatible_buffer() {
    let data = encode(64, 64, image::ImageFormat::Png);
    let decoder = RasterRegionDecoder::new(data, Arc::new(UndersizedPool)).unwrap();

    let result = decoder.decode_region(Region::new(0, 0, 32, 32), 1).unwrap();
    assert_eq!(result.bitmap.byte_size(), 32 * 32 * 4);
}

#[test]
fn test_region_decode_reuses_pooled_buffer() {
    let pool = Arc::new(LruBitmapPool::new(4, 1024 * 1024));
    pool.put(Vec::with_capacity(16 * 16 * 4));
    let data = encode(64, 64, image::ImageFormat::Png);
    let decoder = RasterRegionDecoder::new(data, pool.clone()).unwrap();

    decoder.decode_region(Region::new(0, 0, 16, 16), 1).unwrap();
    assert_eq!(pool.stats().hits, 1);
}

#[test]
fn test_region_decoder_rejects_gif() {
    let gif = encode(8, 8, image::ImageFormat::Gif);
    assert!(matches!(
        RasterRegionDecoder::new(gif, Arc::new(NoopBitmapPool)),
        Err(DecodeError::UnsupportedFormat)
    ));
}

#[test]
fn test_tiles_cover_region_decode() {
    let data = encode(600, 400, image::ImageFormat::Png);
    let decoder = RasterRegionDecoder::new(data, Arc::new(NoopBitmapPool)).unwrap();
    let range = visible_tiles(Region::new(0, 0, 600, 400), 600, 400, 256, 1).unwrap();

    assert_eq!(range.tile_count(), 6);
    for tile in range.tiles() {
        let result = decoder.decode_region(tile.region, 1).unwrap();
        assert_eq!(result.region, tile.region);
    }
}
