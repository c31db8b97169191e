//! Progressive Image Decoding
//!
//! Emits low-resolution renderings of progressive JPEGs and interlaced PNGs
//! before the full-resolution frame, so a caller can show something while
//! the rest of the file is still being decoded.
//!
//! Interlaced PNGs are read one Adam7 pass row at a time; an intermediate
//! frame is cut from the partial canvas after passes 1, 3 and 5. Progressive
//! JPEGs are decoded from prefixes holding a quarter, half and three quarters
//! of their scans. Every other input gets a single full decode.

use std::collections::VecDeque;
use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};

use crate::bitmap::{Bitmap, bitmap_from_dynamic};
use crate::decoder::{DecodeConfig, RasterDecoder, compute_target_size};
use crate::error::DecodeError;
use crate::format::{self, ImageFormat};
use crate::png_rows::PngRows;

/// Downscale divisors for intermediate frames, coarsest first
const PASS_DIVISORS: [u32; 3] = [8, 4, 2];

/// Adam7 passes after which the canvas is complete on a grid of the
/// matching divisor
const PNG_MILESTONES: [usize; 3] = [1, 3, 5];

/// One step of a progressive decode
#[derive(Debug, Clone)]
pub enum ProgressiveFrame {
    /// A partial rendering; `progress` is in `(0, 1)`
    Intermediate {
        bitmap: Bitmap,
        width: u32,
        height: u32,
        progress: f32,
        is_preview: bool,
    },
    /// The final frame; always the last one emitted on success
    Complete {
        bitmap: Bitmap,
        width: u32,
        height: u32,
        original_width: u32,
        original_height: u32,
    },
    Error(DecodeError),
}

impl ProgressiveFrame {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Intermediate { .. })
    }
}

/// Lazy, finite sequence of [`ProgressiveFrame`]s
///
/// Nothing is decoded until the first call to `next`, and each call decodes
/// only as far as the frame it returns. The sequence ends after the first
/// `Complete` or `Error`.
pub struct ProgressiveFrames {
    state: State,
}

struct Request {
    data: Vec<u8>,
    mime_type: Option<String>,
    target: (Option<u32>, Option<u32>),
    config: DecodeConfig,
}

impl Request {
    fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        compute_target_size(width, height, self.target.0, self.target.1, self.config.max_bitmap_size)
    }

    fn full_decode(self) -> ProgressiveFrame {
        let image = match RasterDecoder::load(&self.data, self.mime_type.as_deref()) {
            Ok(image) => image,
            Err(err) => return ProgressiveFrame::Error(err),
        };
        complete(image, self.target, &self.config)
    }
}

/// Adam7 rows read so far, painted onto a full-size canvas
struct InterlacedPng {
    rows: PngRows<Cursor<Vec<u8>>>,
    canvas: RgbaImage,
    row: Vec<u8>,
    /// Last Adam7 pass an intermediate was cut after
    milestone: usize,
    emitted: usize,
    target: (Option<u32>, Option<u32>),
    config: DecodeConfig,
}

/// Scan prefixes still to decode, then the full file
struct ProgressiveJpeg {
    request: Request,
    /// `(prefix length, divisor, progress)`
    prefixes: VecDeque<(usize, u32, f32)>,
    emitted: usize,
}

enum State {
    Pending(Request),
    Interlaced(Box<InterlacedPng>),
    Jpeg(Box<ProgressiveJpeg>),
    Ready(ProgressiveFrame),
    Done,
}

impl ProgressiveFrames {
    /// A sequence holding exactly one terminal frame
    pub fn single(result: Result<crate::DecodedImage, DecodeError>) -> Self {
        let frame = match result {
            Ok(decoded) => ProgressiveFrame::Complete {
                width: decoded.width,
                height: decoded.height,
                original_width: decoded.original_width,
                original_height: decoded.original_height,
                bitmap: decoded.bitmap,
            },
            Err(err) => ProgressiveFrame::Error(err),
        };
        Self { state: State::Ready(frame) }
    }

    pub(crate) fn raster(
        data: Vec<u8>,
        mime_type: Option<String>,
        target_width: Option<u32>,
        target_height: Option<u32>,
        config: DecodeConfig,
    ) -> Self {
        Self {
            state: State::Pending(Request {
                data,
                mime_type,
                target: (target_width, target_height),
                config,
            }),
        }
    }

    /// Pick a strategy from the file's own structure
    fn start(request: Request) -> State {
        match format::detect_format(&request.data, request.mime_type.as_deref()) {
            ImageFormat::Png if format::is_interlaced_png(&request.data) => Self::start_interlaced(request),
            ImageFormat::Jpeg if format::is_progressive_jpeg(&request.data) => Self::start_jpeg(request),
            _ => State::Ready(request.full_decode()),
        }
    }

    fn start_interlaced(request: Request) -> State {
        let Request { data, target, config, .. } = request;
        let rows = match PngRows::open(Cursor::new(data)) {
            Ok(rows) => rows,
            Err(err) => return State::Ready(ProgressiveFrame::Error(err)),
        };
        tracing::debug!("Interlaced PNG decode {}x{}", rows.width(), rows.height());
        let canvas = RgbaImage::new(rows.width(), rows.height());
        State::Interlaced(Box::new(InterlacedPng {
            rows,
            canvas,
            row: Vec::new(),
            milestone: 0,
            emitted: 0,
            target,
            config,
        }))
    }

    fn start_jpeg(request: Request) -> State {
        let scans = format::jpeg_scan_offsets(&request.data);
        let count = scans.len();
        let mut prefixes: VecDeque<(usize, u32, f32)> = VecDeque::new();
        for (quarter, divisor) in (1..=3).zip(PASS_DIVISORS) {
            // Scan index `k` means the prefix holds scans `0..k`
            let k = count * quarter / 4;
            if k == 0 || k >= count || prefixes.iter().any(|&(end, ..)| end == scans[k]) {
                continue;
            }
            prefixes.push_back((scans[k], divisor, quarter as f32 / 4.0));
        }
        tracing::debug!("Progressive JPEG with {} scans, {} intermediate passes", count, prefixes.len());
        State::Jpeg(Box::new(ProgressiveJpeg { request, prefixes, emitted: 0 }))
    }
}

impl InterlacedPng {
    /// Read rows until the next frame is ready
    fn advance(&mut self) -> Result<Option<ProgressiveFrame>, DecodeError> {
        loop {
            let Some(position) = self.rows.next_row(&mut self.row)? else {
                let canvas = std::mem::take(&mut self.canvas);
                return Ok(Some(complete(DynamicImage::ImageRgba8(canvas), self.target, &self.config)));
            };

            for (i, px) in self.row.chunks_exact(4).enumerate() {
                let x = position.x0 + i as u32 * position.dx;
                self.canvas.put_pixel(x, position.y, image::Rgba([px[0], px[1], px[2], px[3]]));
            }

            // Passes before the next row's pass are now complete
            let next_pass = self.rows.peek().map_or(usize::MAX, |next| next.pass);
            if next_pass == position.pass {
                continue;
            }
            let finished = PNG_MILESTONES
                .iter()
                .zip(PASS_DIVISORS)
                .filter(|&(&pass, _)| pass > self.milestone && pass < next_pass)
                .last();
            let Some((&pass, divisor)) = finished else {
                continue;
            };
            self.milestone = pass;
            if next_pass == usize::MAX {
                // Nothing left to read; go straight to the full frame
                continue;
            }
            return Ok(Some(self.intermediate(pass, divisor)));
        }
    }

    fn intermediate(&mut self, pass: usize, divisor: u32) -> ProgressiveFrame {
        let (width, height) = self.canvas.dimensions();
        let sampled = RgbaImage::from_fn(width.div_ceil(divisor), height.div_ceil(divisor), |x, y| {
            *self.canvas.get_pixel(x * divisor, y * divisor)
        });

        let (out_w, out_h) =
            compute_target_size(width, height, self.target.0, self.target.1, self.config.max_bitmap_size);
        let frame = downscaled(DynamicImage::ImageRgba8(sampled), out_w, out_h, divisor);
        let is_preview = self.emitted == 0;
        self.emitted += 1;
        intermediate(frame, (pass + 1) as f32 / 8.0, is_preview, self.config.allow_rgb565)
    }
}

impl ProgressiveJpeg {
    fn next_intermediate(&mut self) -> Option<ProgressiveFrame> {
        while let Some((end, divisor, progress)) = self.prefixes.pop_front() {
            let mut prefix = Vec::with_capacity(end + 2);
            prefix.extend_from_slice(&self.request.data[..end]);
            prefix.extend_from_slice(&[0xFF, 0xD9]);

            let image = match RasterDecoder::load(&prefix, Some("image/jpeg")) {
                Ok(image) => image,
                Err(err) => {
                    tracing::debug!("Skipping JPEG pass at {} bytes: {}", end, err);
                    continue;
                }
            };
            let (out_w, out_h) = self.request.output_size(image.width(), image.height());
            let frame = downscaled(image, out_w, out_h, divisor);
            let is_preview = self.emitted == 0;
            self.emitted += 1;
            return Some(intermediate(frame, progress, is_preview, self.request.config.allow_rgb565));
        }
        None
    }
}

fn downscaled(image: DynamicImage, out_w: u32, out_h: u32, divisor: u32) -> DynamicImage {
    let width = (out_w / divisor).max(1);
    let height = (out_h / divisor).max(1);
    if (image.width(), image.height()) == (width, height) {
        image
    } else {
        image.resize_exact(width, height, FilterType::Triangle)
    }
}

fn intermediate(image: DynamicImage, progress: f32, is_preview: bool, allow_rgb565: bool) -> ProgressiveFrame {
    let (width, height) = (image.width(), image.height());
    ProgressiveFrame::Intermediate {
        bitmap: bitmap_from_dynamic(image, allow_rgb565),
        width,
        height,
        progress,
        is_preview,
    }
}

fn complete(image: DynamicImage, target: (Option<u32>, Option<u32>), config: &DecodeConfig) -> ProgressiveFrame {
    let original = (image.width(), image.height());
    let scaled = RasterDecoder::scale(image, target.0, target.1, config);
    let (width, height) = (scaled.width(), scaled.height());
    ProgressiveFrame::Complete {
        bitmap: bitmap_from_dynamic(scaled, config.allow_rgb565),
        width,
        height,
        original_width: original.0,
        original_height: original.1,
    }
}

impl Iterator for ProgressiveFrames {
    type Item = ProgressiveFrame;

    fn next(&mut self) -> Option<ProgressiveFrame> {
        loop {
            match std::mem::replace(&mut self.state, State::Done) {
                State::Pending(request) => self.state = Self::start(request),
                State::Interlaced(mut png) => match png.advance() {
                    Ok(Some(frame)) => {
                        if !frame.is_terminal() {
                            self.state = State::Interlaced(png);
                        }
                        return Some(frame);
                    }
                    Ok(None) => return None,
                    Err(err) => return Some(ProgressiveFrame::Error(err)),
                },
                State::Jpeg(mut jpeg) => match jpeg.next_intermediate() {
                    Some(frame) => {
                        self.state = State::Jpeg(jpeg);
                        return Some(frame);
                    }
                    None => return Some(jpeg.request.full_decode()),
                },
                State::Ready(frame) => return Some(frame),
                State::Done => return None,
            }
        }
    }
}
