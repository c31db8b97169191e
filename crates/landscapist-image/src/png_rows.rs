//! Row-at-a-time PNG reading
//!
//! Wraps the png crate's row reader, normalizes every color type to RGBA8 and
//! reports where each row lands in the full image. Interlaced files yield
//! their Adam7 pass rows in file order.

use std::io::{BufRead, Seek};

use png::{ColorType, Transformations};

use crate::error::DecodeError;

/// Adam7 passes as `(x0, y0, dx, dy)`
const ADAM7: [(u32, u32, u32, u32); 7] = [
    (0, 0, 8, 8),
    (4, 0, 8, 8),
    (0, 4, 4, 8),
    (2, 0, 4, 4),
    (0, 2, 2, 4),
    (1, 0, 2, 2),
    (0, 1, 1, 2),
];

const SEQUENTIAL: [(u32, u32, u32, u32); 1] = [(0, 0, 1, 1)];

/// Where a decoded row's pixels belong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RowPosition {
    /// 1-based Adam7 pass, or 0 for non-interlaced rows
    pub pass: usize,
    pub y: u32,
    pub x0: u32,
    pub dx: u32,
}

pub(crate) struct PngRows<R: BufRead + Seek> {
    reader: png::Reader<R>,
    color: ColorType,
    width: u32,
    height: u32,
    interlaced: bool,
    pass: usize,
    line: u32,
}

impl<R: BufRead + Seek> PngRows<R> {
    pub fn open(source: R) -> Result<Self, DecodeError> {
        let mut decoder = png::Decoder::new(source);
        decoder.set_transformations(Transformations::normalize_to_color8());
        let reader = decoder.read_info()?;

        let (color, _) = reader.output_color_type();
        if color == ColorType::Indexed {
            return Err(DecodeError::Decoder("palette was not expanded".to_string()));
        }
        let info = reader.info();
        let (width, height, interlaced) = (info.width, info.height, info.interlaced);

        Ok(Self {
            reader,
            color,
            width,
            height,
            interlaced,
            pass: 0,
            line: 0,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_interlaced(&self) -> bool {
        self.interlaced
    }

    fn passes(&self) -> &'static [(u32, u32, u32, u32)] {
        if self.interlaced { &ADAM7 } else { &SEQUENTIAL }
    }

    /// Position of the row the next read returns, skipping empty passes
    pub fn peek(&mut self) -> Option<RowPosition> {
        let passes = self.passes();
        while let Some(&(x0, y0, dx, dy)) = passes.get(self.pass) {
            let samples = self.width.saturating_sub(x0).div_ceil(dx);
            let lines = self.height.saturating_sub(y0).div_ceil(dy);
            if samples > 0 && self.line < lines {
                return Some(RowPosition {
                    pass: if self.interlaced { self.pass + 1 } else { 0 },
                    y: y0 + self.line * dy,
                    x0,
                    dx,
                });
            }
            self.pass += 1;
            self.line = 0;
        }
        None
    }

    /// Decode the next row into `rgba`, four bytes per sample
    pub fn next_row(&mut self, rgba: &mut Vec<u8>) -> Result<Option<RowPosition>, DecodeError> {
        let Some(position) = self.peek() else {
            return Ok(None);
        };
        let Some(row) = self.reader.next_row()? else {
            return Err(DecodeError::Malformed("PNG ended before its last row".to_string()));
        };
        expand_to_rgba(self.color, row.data(), rgba);
        self.line += 1;
        Ok(Some(position))
    }
}

fn expand_to_rgba(color: ColorType, src: &[u8], dst: &mut Vec<u8>) {
    dst.clear();
    match color {
        ColorType::Grayscale => {
            for &g in src {
                dst.extend_from_slice(&[g, g, g, 255]);
            }
        }
        ColorType::GrayscaleAlpha => {
            for px in src.chunks_exact(2) {
                dst.extend_from_slice(&[px[0], px[0], px[0], px[1]]);
            }
        }
        ColorType::Rgb => {
            for px in src.chunks_exact(3) {
                dst.extend_from_slice(&[px[0], px[1], px[2], 255]);
            }
        }
        ColorType::Rgba | ColorType::Indexed => dst.extend_from_slice(src),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn encode(width: u32, height: u32, color: ColorType, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(color);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.write_header().unwrap().write_image_data(data).unwrap();
        out
    }

    #[test]
    fn test_rows_in_order_as_rgba() {
        let data = encode(2, 3, ColorType::Grayscale, &[10, 20, 30, 40, 50, 60]);
        let mut rows = PngRows::open(Cursor::new(data.as_slice())).unwrap();
        assert!(!rows.is_interlaced());
        assert_eq!((rows.width(), rows.height()), (2, 3));

        let mut buf = Vec::new();
        let mut ys = Vec::new();
        while let Some(position) = rows.next_row(&mut buf).unwrap() {
            assert_eq!((position.pass, position.x0, position.dx), (0, 0, 1));
            assert_eq!(buf.len(), 8);
            ys.push((position.y, buf[0], buf[4]));
        }
        assert_eq!(ys, [(0, 10, 20), (1, 30, 40), (2, 50, 60)]);
    }

    #[test]
    fn test_gray_alpha_expands() {
        let mut buf = Vec::new();
        expand_to_rgba(ColorType::GrayscaleAlpha, &[7, 128], &mut buf);
        assert_eq!(buf, [7, 7, 7, 128]);
        expand_to_rgba(ColorType::Rgb, &[1, 2, 3], &mut buf);
        assert_eq!(buf, [1, 2, 3, 255]);
    }
}
