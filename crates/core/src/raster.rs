//! Uncompressed 24-bit BMP encoding and header inspection.
//!
//! The encoder is pure: same geometry and pixels in, byte-identical file
//! out. Layout is the classic `BITMAPFILEHEADER` (14 bytes) +
//! `BITMAPINFOHEADER` (40 bytes), followed by bottom-up rows of B,G,R
//! triples, each row zero-padded to a multiple of 4 bytes.

// ---------------------------------------------------------------------------
// Format constants
// ---------------------------------------------------------------------------

/// Size of the `BM` file header.
pub const FILE_HEADER_SIZE: u32 = 14;
/// Size of the `BITMAPINFOHEADER`.
pub const INFO_HEADER_SIZE: u32 = 40;
/// Offset of the first pixel byte; there is no color table.
pub const HEADER_SIZE: u32 = FILE_HEADER_SIZE + INFO_HEADER_SIZE;
/// Only 24-bit true color is produced or accepted.
pub const BITS_PER_PIXEL: u16 = 24;
/// Largest width or height the encoder accepts.
pub const MAX_DIMENSION: u32 = u16::MAX as u32;

const BYTES_PER_PIXEL: u64 = 3;
const MAGIC: &[u8; 2] = b"BM";
/// 72 DPI.
const PIXELS_PER_METER: u32 = 2835;
const COMPRESSION_NONE: u32 = 0;

// ---------------------------------------------------------------------------
// Pixels and errors
// ---------------------------------------------------------------------------

/// One 8-bit-per-channel pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl From<(u8, u8, u8)> for Rgb {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Self { r, g, b }
    }
}

/// Reasons [`encode`] refuses to produce a file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// A header-only file is never produced.
    #[error("Image dimensions must be non-zero, got {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },

    /// Width or height above [`MAX_DIMENSION`], or a file too large for the
    /// 32-bit size field.
    #[error("Image dimensions {width}x{height} exceed the supported maximum of {max}", max = MAX_DIMENSION)]
    DimensionTooLarge { width: u32, height: u32 },

    /// Supplied pixel count differs from `width * height`.
    #[error("Expected {expected} pixels for the declared geometry, got {actual}")]
    DimensionMismatch { expected: u64, actual: u64 },
}

/// Reasons a byte buffer is not a BMP this crate can handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("Buffer of {0} bytes is shorter than the {min}-byte header", min = HEADER_SIZE)]
    Truncated(usize),

    #[error("Missing 'BM' signature")]
    BadMagic,

    #[error("Header declares {declared} bytes but buffer holds {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("Unsupported info header size {0}")]
    UnsupportedInfoHeader(u32),

    #[error("Unsupported bit depth {0}, only 24-bit is handled")]
    UnsupportedBitDepth(u16),

    #[error("Compressed bitmaps are not supported (method {0})")]
    Compressed(u32),

    #[error("Invalid geometry {width}x{height}")]
    BadGeometry { width: i32, height: i32 },

    /// Pixel data would start inside the 54-byte header.
    #[error("Pixel data offset {0} lies inside the {min}-byte header", min = HEADER_SIZE)]
    PixelOffsetInHeader(u32),
}

// ---------------------------------------------------------------------------
// Geometry helpers
// ---------------------------------------------------------------------------

/// Zero bytes appended to each row so it ends on a 4-byte boundary.
pub fn row_padding(width: u32) -> u32 {
    let row_bytes = (u64::from(width) * BYTES_PER_PIXEL) % 4;
    ((4 - row_bytes) % 4) as u32
}

/// Bytes per stored row, padding included.
pub fn row_stride(width: u32) -> u64 {
    u64::from(width) * BYTES_PER_PIXEL + u64::from(row_padding(width))
}

/// Total file length for the given geometry:
/// `54 + height * (3 * width + padding(width))`.
pub fn encoded_len(width: u32, height: u32) -> u64 {
    u64::from(HEADER_SIZE) + u64::from(height) * row_stride(width)
}

/// Check that `width x height` can be encoded.
pub fn validate_geometry(width: u32, height: u32) -> Result<(), EncodeError> {
    if width == 0 || height == 0 {
        return Err(EncodeError::ZeroDimension { width, height });
    }
    if width > MAX_DIMENSION
        || height > MAX_DIMENSION
        || encoded_len(width, height) > u64::from(u32::MAX)
    {
        return Err(EncodeError::DimensionTooLarge { width, height });
    }
    Ok(())
}

/// Deterministic gradient used when no real pixel data exists.
///
/// Red ramps with `x`, green with `y` (counted from the top row), blue with
/// `x + y`, each scaled into `[0, 255]` with integer arithmetic.
pub fn placeholder_pixel(x: u32, y: u32, width: u32, height: u32) -> Rgb {
    let (x, y) = (u64::from(x), u64::from(y));
    let (w, h) = (u64::from(width), u64::from(height));
    Rgb {
        r: (x * 255 / w) as u8,
        g: (y * 255 / h) as u8,
        b: ((x + y) * 255 / (w + h)) as u8,
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a complete BMP file.
///
/// `pixels` are row-major, top row first. When `None`, the
/// [`placeholder_pixel`] gradient is synthesized instead.
pub fn encode(width: u32, height: u32, pixels: Option<Vec<Rgb>>) -> Result<Vec<u8>, EncodeError> {
    validate_geometry(width, height)?;

    match pixels {
        Some(pixels) => {
            let expected = u64::from(width) * u64::from(height);
            if pixels.len() as u64 != expected {
                return Err(EncodeError::DimensionMismatch {
                    expected,
                    actual: pixels.len() as u64,
                });
            }
            let w = width as usize;
            Ok(write_bitmap(width, height, |x, y| {
                pixels[y as usize * w + x as usize]
            }))
        }
        None => Ok(write_bitmap(width, height, |x, y| {
            placeholder_pixel(x, y, width, height)
        })),
    }
}

/// Encode a packed, top-down `R,G,B,R,G,B,...` byte buffer.
///
/// The buffer must hold exactly `width * height * 3` bytes.
pub fn encode_rgb_bytes(width: u32, height: u32, rgb: &[u8]) -> Result<Vec<u8>, EncodeError> {
    validate_geometry(width, height)?;

    let expected = u64::from(width) * u64::from(height);
    if rgb.len() as u64 != expected * BYTES_PER_PIXEL {
        return Err(EncodeError::DimensionMismatch {
            expected,
            actual: (rgb.len() as u64) / BYTES_PER_PIXEL,
        });
    }

    let pixels = rgb
        .chunks_exact(BYTES_PER_PIXEL as usize)
        .map(|c| Rgb::new(c[0], c[1], c[2]))
        .collect();
    encode(width, height, Some(pixels))
}

/// Write headers plus pixel rows. Geometry must already be validated.
fn write_bitmap(width: u32, height: u32, pixel_at: impl Fn(u32, u32) -> Rgb) -> Vec<u8> {
    let file_size = encoded_len(width, height) as u32;
    let image_size = file_size - HEADER_SIZE;
    let padding = row_padding(width) as usize;

    let mut out = Vec::with_capacity(file_size as usize);

    // File header.
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&file_size.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&HEADER_SIZE.to_le_bytes());

    // Info header.
    out.extend_from_slice(&INFO_HEADER_SIZE.to_le_bytes());
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&BITS_PER_PIXEL.to_le_bytes());
    out.extend_from_slice(&COMPRESSION_NONE.to_le_bytes());
    out.extend_from_slice(&image_size.to_le_bytes());
    out.extend_from_slice(&PIXELS_PER_METER.to_le_bytes());
    out.extend_from_slice(&PIXELS_PER_METER.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    // Rows bottom-to-top, channels B,G,R.
    for y in (0..height).rev() {
        for x in 0..width {
            let px = pixel_at(x, y);
            out.extend_from_slice(&[px.b, px.g, px.r]);
        }
        out.extend(std::iter::repeat(0u8).take(padding));
    }

    out
}

// ---------------------------------------------------------------------------
// Header inspection
// ---------------------------------------------------------------------------

/// The fields of a parsed BMP header that matter for validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterHeader {
    pub file_size: u32,
    pub pixel_offset: u32,
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u16,
}

impl RasterHeader {
    /// Parse and validate the header of a bottom-up, uncompressed 24-bit BMP.
    ///
    /// The declared file size must equal the buffer length and the pixel
    /// rows must fit inside it.
    pub fn parse(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < HEADER_SIZE as usize {
            return Err(HeaderError::Truncated(bytes.len()));
        }
        if &bytes[0..2] != MAGIC {
            return Err(HeaderError::BadMagic);
        }

        let file_size = read_u32(bytes, 2);
        if u64::from(file_size) != bytes.len() as u64 {
            return Err(HeaderError::SizeMismatch {
                declared: u64::from(file_size),
                actual: bytes.len() as u64,
            });
        }

        let pixel_offset = read_u32(bytes, 10);
        if pixel_offset < HEADER_SIZE {
            return Err(HeaderError::PixelOffsetInHeader(pixel_offset));
        }

        let info_size = read_u32(bytes, 14);
        if info_size != INFO_HEADER_SIZE {
            return Err(HeaderError::UnsupportedInfoHeader(info_size));
        }

        let width = read_i32(bytes, 18);
        let height = read_i32(bytes, 22);
        if width <= 0 || height <= 0 || width as u32 > MAX_DIMENSION || height as u32 > MAX_DIMENSION {
            return Err(HeaderError::BadGeometry { width, height });
        }

        let bits_per_pixel = read_u16(bytes, 28);
        if bits_per_pixel != BITS_PER_PIXEL {
            return Err(HeaderError::UnsupportedBitDepth(bits_per_pixel));
        }

        let compression = read_u32(bytes, 30);
        if compression != COMPRESSION_NONE {
            return Err(HeaderError::Compressed(compression));
        }

        let (width, height) = (width as u32, height as u32);
        let required = u64::from(pixel_offset) + u64::from(height) * row_stride(width);
        if required > bytes.len() as u64 {
            return Err(HeaderError::SizeMismatch {
                declared: required,
                actual: bytes.len() as u64,
            });
        }

        Ok(Self {
            file_size,
            pixel_offset,
            width,
            height,
            bits_per_pixel,
        })
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

// ---------------------------------------------------------------------------
// Image buffer
// ---------------------------------------------------------------------------

/// A complete image file held in memory together with its geometry.
///
/// Immutable once built; consumed with [`ImageBuffer::into_bytes`] when it
/// is handed to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    bits_per_pixel: u16,
}

impl ImageBuffer {
    /// Encode pixels (or the placeholder gradient) into a new buffer.
    pub fn encode(width: u32, height: u32, pixels: Option<Vec<Rgb>>) -> Result<Self, EncodeError> {
        let bytes = encode(width, height, pixels)?;
        Ok(Self {
            bytes,
            width,
            height,
            bits_per_pixel: BITS_PER_PIXEL,
        })
    }

    /// Encode a packed top-down RGB buffer.
    pub fn from_rgb(width: u32, height: u32, rgb: &[u8]) -> Result<Self, EncodeError> {
        let bytes = encode_rgb_bytes(width, height, rgb)?;
        Ok(Self {
            bytes,
            width,
            height,
            bits_per_pixel: BITS_PER_PIXEL,
        })
    }

    /// Adopt bytes that already form a valid BMP file.
    pub fn from_bmp(bytes: Vec<u8>) -> Result<Self, HeaderError> {
        let header = RasterHeader::parse(&bytes)?;
        Ok(Self {
            bytes,
            width: header.width,
            height: header.height,
            bits_per_pixel: header.bits_per_pixel,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bits_per_pixel(&self) -> u16 {
        self.bits_per_pixel
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    // -- padding / length ---------------------------------------------------

    #[test]
    fn padding_cycles_every_four_widths() {
        assert_eq!(row_padding(1), 1);
        assert_eq!(row_padding(2), 2);
        assert_eq!(row_padding(3), 3);
        assert_eq!(row_padding(4), 0);
        assert_eq!(row_padding(5), 1);
        assert_eq!(row_padding(64), 0);
    }

    #[test]
    fn encoded_len_of_64_square() {
        assert_eq!(encoded_len(64, 64), 12342);
    }

    // -- header layout ------------------------------------------------------

    #[test]
    fn header_fields_are_little_endian() {
        let bytes = encode(3, 2, None).unwrap();
        // stride = 9 + 3 padding = 12, two rows
        assert_eq!(bytes.len(), 54 + 24);
        assert_eq!(&bytes[0..2], b"BM");
        assert_eq!(read_u32(&bytes, 2), 78);
        assert_eq!(read_u32(&bytes, 6), 0);
        assert_eq!(read_u32(&bytes, 10), 54);
        assert_eq!(read_u32(&bytes, 14), 40);
        assert_eq!(read_u32(&bytes, 18), 3);
        assert_eq!(read_u32(&bytes, 22), 2);
        assert_eq!(read_u16(&bytes, 26), 1);
        assert_eq!(read_u16(&bytes, 28), 24);
        assert_eq!(read_u32(&bytes, 30), 0);
        assert_eq!(read_u32(&bytes, 34), 24);
        assert_eq!(read_u32(&bytes, 38), 2835);
        assert_eq!(read_u32(&bytes, 42), 2835);
        assert_eq!(read_u32(&bytes, 46), 0);
        assert_eq!(read_u32(&bytes, 50), 0);
    }

    #[test]
    fn placeholder_2x2_exact_bytes() {
        let bytes = encode(2, 2, None).unwrap();
        assert_eq!(bytes.len(), 70);
        // Bottom row (y = 1) first, then top row, B,G,R with 2 pad bytes each.
        assert_eq!(
            &bytes[54..],
            &[63, 127, 0, 127, 127, 127, 0, 0, 0, 0, 0, 63, 0, 127, 0, 0]
        );
    }

    #[test]
    fn supplied_pixels_written_bottom_up_in_bgr_order() {
        let pixels = vec![
            Rgb::new(1, 2, 3),
            Rgb::new(4, 5, 6),
            Rgb::new(7, 8, 9),
            Rgb::new(10, 11, 12),
        ];
        let bytes = encode(2, 2, Some(pixels)).unwrap();
        assert_eq!(
            &bytes[54..],
            &[9, 8, 7, 12, 11, 10, 0, 0, 3, 2, 1, 6, 5, 4, 0, 0]
        );
    }

    #[test]
    fn rgb_bytes_match_pixel_encoding() {
        let rgb = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let pixels = rgb.chunks(3).map(|c| Rgb::from((c[0], c[1], c[2]))).collect();
        assert_eq!(
            encode_rgb_bytes(2, 2, &rgb).unwrap(),
            encode(2, 2, Some(pixels)).unwrap()
        );
    }

    // -- errors -------------------------------------------------------------

    #[test]
    fn zero_dimensions_fail() {
        assert_matches!(encode(0, 4, None), Err(EncodeError::ZeroDimension { .. }));
        assert_matches!(encode(4, 0, None), Err(EncodeError::ZeroDimension { .. }));
    }

    #[test]
    fn oversized_dimensions_fail() {
        assert_matches!(
            encode(70_000, 1, None),
            Err(EncodeError::DimensionTooLarge { width: 70_000, height: 1 })
        );
        assert_matches!(
            encode(1, 65_536, None),
            Err(EncodeError::DimensionTooLarge { .. })
        );
    }

    #[test]
    fn file_size_field_overflow_fails() {
        // 65535 x 65535 x 3 bytes does not fit a 32-bit size field.
        assert_matches!(
            validate_geometry(MAX_DIMENSION, MAX_DIMENSION),
            Err(EncodeError::DimensionTooLarge { .. })
        );
    }

    #[test]
    fn pixel_count_mismatch_fails() {
        assert_matches!(
            encode(2, 2, Some(vec![Rgb::default(); 3])),
            Err(EncodeError::DimensionMismatch { expected: 4, actual: 3 })
        );
        assert_matches!(
            encode_rgb_bytes(2, 2, &[0; 11]),
            Err(EncodeError::DimensionMismatch { .. })
        );
    }

    // -- header parsing -----------------------------------------------------

    #[test]
    fn parse_accepts_encoder_output() {
        let bytes = encode(5, 3, None).unwrap();
        let header = RasterHeader::parse(&bytes).unwrap();
        assert_eq!(header.width, 5);
        assert_eq!(header.height, 3);
        assert_eq!(header.pixel_offset, 54);
        assert_eq!(header.bits_per_pixel, 24);
        assert_eq!(u64::from(header.file_size), encoded_len(5, 3));
    }

    #[test]
    fn parse_rejects_short_buffer() {
        assert_matches!(RasterHeader::parse(&[0; 10]), Err(HeaderError::Truncated(10)));
    }

    #[test]
    fn parse_rejects_missing_magic() {
        let mut bytes = encode(2, 2, None).unwrap();
        bytes[0] = b'X';
        assert_matches!(RasterHeader::parse(&bytes), Err(HeaderError::BadMagic));
    }

    #[test]
    fn parse_rejects_truncated_pixels() {
        let mut bytes = encode(4, 4, None).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert_matches!(RasterHeader::parse(&bytes), Err(HeaderError::SizeMismatch { .. }));
    }

    #[test]
    fn parse_rejects_other_bit_depths() {
        let mut bytes = encode(2, 2, None).unwrap();
        bytes[28..30].copy_from_slice(&32u16.to_le_bytes());
        assert_matches!(RasterHeader::parse(&bytes), Err(HeaderError::UnsupportedBitDepth(32)));
    }

    #[test]
    fn parse_rejects_compression() {
        let mut bytes = encode(2, 2, None).unwrap();
        bytes[30..34].copy_from_slice(&1u32.to_le_bytes());
        assert_matches!(RasterHeader::parse(&bytes), Err(HeaderError::Compressed(1)));
    }

    #[test]
    fn parse_rejects_pixel_offset_inside_header() {
        let mut bytes = encode(2, 2, None).unwrap();
        bytes[10..14].copy_from_slice(&0u32.to_le_bytes());
        assert_matches!(RasterHeader::parse(&bytes), Err(HeaderError::PixelOffsetInHeader(0)));

        bytes[10..14].copy_from_slice(&53u32.to_le_bytes());
        assert_matches!(RasterHeader::parse(&bytes), Err(HeaderError::PixelOffsetInHeader(53)));
    }

    #[test]
    fn parse_rejects_top_down_height() {
        let mut bytes = encode(2, 2, None).unwrap();
        bytes[22..26].copy_from_slice(&(-2i32).to_le_bytes());
        assert_matches!(RasterHeader::parse(&bytes), Err(HeaderError::BadGeometry { .. }));
    }

    // -- ImageBuffer --------------------------------------------------------

    #[test]
    fn image_buffer_from_bmp_reads_geometry() {
        let bytes = encode(7, 3, None).unwrap();
        let image = ImageBuffer::from_bmp(bytes.clone()).unwrap();
        assert_eq!(image.width(), 7);
        assert_eq!(image.height(), 3);
        assert_eq!(image.bits_per_pixel(), 24);
        assert_eq!(image.into_bytes(), bytes);
    }

    #[test]
    fn image_buffer_from_rgb_has_declared_geometry() {
        let image = ImageBuffer::from_rgb(2, 1, &[255, 0, 0, 0, 255, 0]).unwrap();
        assert_eq!((image.width(), image.height()), (2, 1));
        assert_eq!(image.len() as u64, encoded_len(2, 1));
        assert!(!image.is_empty());
    }
}
