//! Format sniffing
//!
//! Magic-byte detection, progressive/interlace detection and animation
//! detection. Nothing here decodes pixels; these checks only decide which
//! decode path a byte stream is eligible for.

/// Encoded image formats recognized by their magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    WebP,
    Unknown,
}

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

impl ImageFormat {
    /// Detect format from magic bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        // PNG: 89 50 4E 47
        if data.starts_with(&PNG_SIGNATURE[..4]) {
            return Self::Png;
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Self::Jpeg;
        }

        // GIF: GIF87a or GIF89a
        if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            return Self::Gif;
        }

        // WebP: RIFF....WEBP
        if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Self::WebP;
        }

        Self::Unknown
    }

    /// Get format from file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "png" | "apng" => Self::Png,
            "jpg" | "jpeg" | "jfif" => Self::Jpeg,
            "gif" => Self::Gif,
            "webp" => Self::WebP,
            _ => Self::Unknown,
        }
    }

    /// Get format from a `Content-Type` value, ignoring parameters
    pub fn from_mime_type(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/png" | "image/apng" => Self::Png,
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Self::Jpeg,
            "image/gif" => Self::Gif,
            "image/webp" => Self::WebP,
            _ => Self::Unknown,
        }
    }

    pub fn mime_type(self) -> Option<&'static str> {
        match self {
            Self::Png => Some("image/png"),
            Self::Jpeg => Some("image/jpeg"),
            Self::Gif => Some("image/gif"),
            Self::WebP => Some("image/webp"),
            Self::Unknown => None,
        }
    }

    /// Formats a region decoder can crop without decoding animation frames
    pub fn supports_region_decode(self) -> bool {
        matches!(self, Self::Jpeg | Self::Png | Self::WebP)
    }

    pub(crate) fn to_image_format(self) -> Option<image::ImageFormat> {
        match self {
            Self::Png => Some(image::ImageFormat::Png),
            Self::Jpeg => Some(image::ImageFormat::Jpeg),
            Self::Gif => Some(image::ImageFormat::Gif),
            Self::WebP => Some(image::ImageFormat::WebP),
            Self::Unknown => None,
        }
    }
}

/// Resolve the format of `data`, preferring magic bytes over the declared mime type.
pub fn detect_format(data: &[u8], mime_type: Option<&str>) -> ImageFormat {
    match ImageFormat::from_bytes(data) {
        ImageFormat::Unknown => mime_type.map(ImageFormat::from_mime_type).unwrap_or(ImageFormat::Unknown),
        format => format,
    }
}

/// True when the JPEG stream declares a progressive frame (SOF2) before any
/// baseline frame (SOF0).
///
/// Walks marker segments from SOI using each segment's declared length.
/// Reaching SOS or EOI without seeing SOF2, or running off a malformed
/// stream, yields `false`.
pub fn is_progressive_jpeg(data: &[u8]) -> bool {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return false;
    }

    let mut i = 2;
    while i + 1 < data.len() {
        if data[i] != 0xFF {
            return false;
        }
        let marker = data[i + 1];
        match marker {
            // Fill bytes
            0xFF => {
                i += 1;
                continue;
            }
            0xC2 => return true,
            0xC0 => return false,
            // SOS / EOI: frame header would have appeared already
            0xDA | 0xD9 => return false,
            // Standalone markers carry no length
            0x01 | 0xD0..=0xD7 => {
                i += 2;
                continue;
            }
            _ => {}
        }

        if i + 3 >= data.len() {
            return false;
        }
        let length = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
        if length < 2 {
            return false;
        }
        i += 2 + length;
    }

    false
}

/// True when the PNG IHDR declares Adam7 interlacing (interlace byte == 1).
pub fn is_interlaced_png(data: &[u8]) -> bool {
    // signature(8) + length(4) + "IHDR"(4) + width(4) + height(4)
    // + depth(1) + color(1) + compression(1) + filter(1) + interlace(1)
    data.len() > 28
        && data.starts_with(&PNG_SIGNATURE)
        && &data[12..16] == b"IHDR"
        && data[28] == 1
}

/// True when a progressive decode can emit meaningful intermediate frames.
pub fn is_progressive(data: &[u8]) -> bool {
    match ImageFormat::from_bytes(data) {
        ImageFormat::Jpeg => is_progressive_jpeg(data),
        ImageFormat::Png => is_interlaced_png(data),
        _ => false,
    }
}

/// Walk PNG chunks and report whether an `acTL` chunk appears before the
/// first `IDAT`.
pub fn is_animated_png(data: &[u8]) -> bool {
    if !data.starts_with(&PNG_SIGNATURE) {
        return false;
    }

    let mut i = PNG_SIGNATURE.len();
    while i + 8 <= data.len() {
        let length = u32::from_be_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]) as usize;
        let kind = &data[i + 4..i + 8];
        if kind == b"acTL" {
            return true;
        }
        if kind == b"IDAT" || kind == b"IEND" {
            return false;
        }
        // length + type + data + crc
        i = match i.checked_add(12 + length) {
            Some(next) => next,
            None => return false,
        };
    }

    false
}

/// Count GIF image descriptors; more than one frame means animated.
pub fn is_animated_gif(data: &[u8]) -> bool {
    gif_frame_count(data) > 1
}

fn gif_frame_count(data: &[u8]) -> usize {
    if data.len() < 13 || !(data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a")) {
        return 0;
    }

    let mut i = 13;
    let flags = data[10];
    if flags & 0x80 != 0 {
        i += 3 * (1usize << ((flags & 0x07) + 1));
    }

    let mut frames = 0;
    while i < data.len() {
        match data[i] {
            // Extension: label byte, then sub-blocks
            0x21 => {
                i = match skip_sub_blocks(data, i + 2) {
                    Some(next) => next,
                    None => break,
                };
            }
            // Image descriptor
            0x2C => {
                frames += 1;
                if frames > 1 || i + 10 > data.len() {
                    break;
                }
                let local = data[i + 9];
                i += 10;
                if local & 0x80 != 0 {
                    i += 3 * (1usize << ((local & 0x07) + 1));
                }
                // LZW minimum code size
                i += 1;
                i = match skip_sub_blocks(data, i) {
                    Some(next) => next,
                    None => break,
                };
            }
            // Trailer
            0x3B => break,
            _ => break,
        }
    }

    frames
}

fn skip_sub_blocks(data: &[u8], mut i: usize) -> Option<usize> {
    loop {
        let size = *data.get(i)? as usize;
        i += 1;
        if size == 0 {
            return Some(i);
        }
        i += size;
    }
}

/// Animated WebP: VP8X chunk with the animation flag (0x02) set.
pub fn is_animated_webp(data: &[u8]) -> bool {
    data.len() >= 21
        && ImageFormat::from_bytes(data) == ImageFormat::WebP
        && &data[12..16] == b"VP8X"
        && data[20] & 0x02 != 0
}

/// Animation detection across all sniffed formats
pub fn is_animated(data: &[u8]) -> bool {
    match ImageFormat::from_bytes(data) {
        ImageFormat::Gif => is_animated_gif(data),
        ImageFormat::Png => is_animated_png(data),
        ImageFormat::WebP => is_animated_webp(data),
        _ => false,
    }
}

/// Byte offsets of every start-of-scan marker in a JPEG, in file order.
///
/// Truncating a progressive JPEG at one of these offsets (and appending an
/// EOI) leaves a valid file holding only the earlier scans.
pub fn jpeg_scan_offsets(data: &[u8]) -> Vec<usize> {
    let mut scans = Vec::new();
    if !data.starts_with(&[0xFF, 0xD8]) {
        return scans;
    }

    let mut i = 2;
    while i + 1 < data.len() {
        if data[i] != 0xFF {
            break;
        }
        let marker = data[i + 1];
        match marker {
            0xFF => {
                i += 1;
                continue;
            }
            0xD9 => break,
            0x01 | 0xD0..=0xD7 => {
                i += 2;
                continue;
            }
            _ => {}
        }

        if i + 3 >= data.len() {
            break;
        }
        let length = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
        if length < 2 {
            break;
        }
        if marker != 0xDA {
            i += 2 + length;
            continue;
        }

        scans.push(i);
        // Entropy-coded data runs to the next marker that is not a stuffed
        // zero, a restart or a fill byte
        let mut j = i + 2 + length;
        while j + 1 < data.len() {
            if data[j] == 0xFF && !matches!(data[j + 1], 0x00 | 0xD0..=0xD7 | 0xFF) {
                break;
            }
            j += 1;
        }
        i = j;
    }

    scans
}

/// Read image dimensions from the header without decoding pixels.
pub fn read_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    match ImageFormat::from_bytes(data) {
        ImageFormat::Png => {
            if data.len() < 24 || &data[12..16] != b"IHDR" {
                return None;
            }
            let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
            let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
            Some((width, height))
        }
        ImageFormat::Gif => {
            if data.len() < 10 {
                return None;
            }
            let width = u16::from_le_bytes([data[6], data[7]]) as u32;
            let height = u16::from_le_bytes([data[8], data[9]]) as u32;
            Some((width, height))
        }
        ImageFormat::Jpeg => jpeg_dimensions(data),
        ImageFormat::WebP => webp_dimensions(data),
        ImageFormat::Unknown => None,
    }
}

fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2;
    while i + 3 < data.len() {
        if data[i] != 0xFF {
            return None;
        }
        let marker = data[i + 1];
        if marker == 0xFF {
            i += 1;
            continue;
        }
        if matches!(marker, 0x01 | 0xD0..=0xD7) {
            i += 2;
            continue;
        }
        if marker == 0xD9 || marker == 0xDA {
            return None;
        }
        // SOF0..SOF15 except DHT(C4), JPG(C8), DAC(CC)
        if (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC) {
            if i + 8 >= data.len() {
                return None;
            }
            let height = u16::from_be_bytes([data[i + 5], data[i + 6]]) as u32;
            let width = u16::from_be_bytes([data[i + 7], data[i + 8]]) as u32;
            return Some((width, height));
        }
        let length = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
        if length < 2 {
            return None;
        }
        i += 2 + length;
    }
    None
}

fn webp_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 30 {
        return None;
    }
    match &data[12..16] {
        b"VP8X" => {
            let width = 1 + u32::from_le_bytes([data[24], data[25], data[26], 0]);
            let height = 1 + u32::from_le_bytes([data[27], data[28], data[29], 0]);
            Some((width, height))
        }
        b"VP8 " => {
            let width = (u16::from_le_bytes([data[26], data[27]]) & 0x3FFF) as u32;
            let height = (u16::from_le_bytes([data[28], data[29]]) & 0x3FFF) as u32;
            Some((width, height))
        }
        b"VP8L" => {
            let bits = u32::from_le_bytes([data[21], data[22], data[23], data[24]]);
            Some(((bits & 0x3FFF) + 1, ((bits >> 14) & 0x3FFF) + 1))
        }
        _ => None,
    }
}
