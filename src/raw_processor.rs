use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use log::debug;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

const JPEG_QUALITY: u8 = 90;
const DISPLAY_GAMMA: f32 = 2.2;

#[derive(Error, Debug)]
pub enum RawError {
    #[error("Failed to decode RAW file: {0}")]
    DecodeError(String),
    #[error("Failed to encode developed image: {0}")]
    EncodeError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Sensor data after cropping, ready for development.
#[derive(Debug, Clone)]
pub struct SensorFrame {
    pub width: usize,
    pub height: usize,
    /// Components per pixel: 1 for Bayer mosaics, 3 for already demosaiced data.
    pub cpp: usize,
    pub data: Vec<u16>,
    /// Colour index (0 = R, 1 = G, 2 = B, 3 = second green) of each cell in a 2x2 tile.
    pub cfa: [[usize; 2]; 2],
    pub black_levels: [u16; 4],
    pub white_levels: [u16; 4],
    pub wb_coeffs: [f32; 4],
}

/// Decodes a RAW file and develops it into JPEG bytes. Never writes to disk.
pub fn develop(path: &Path) -> Result<Vec<u8>, RawError> {
    // Surface a missing or unreadable file as an IO error rather than a decode error
    File::open(path)?;

    debug!("Developing RAW file: {}", path.display());
    let raw_image =
        rawloader::decode_file(path).map_err(|e| RawError::DecodeError(format!("{:?}", e)))?;

    let frame = SensorFrame::from_raw_image(&raw_image)?;
    debug!(
        "RAW image decoded: {}x{}, cpp {}",
        frame.width, frame.height, frame.cpp
    );

    let rgb = develop_frame(&frame)?;
    encode_jpeg(rgb)
}

impl SensorFrame {
    fn from_raw_image(raw: &rawloader::RawImage) -> Result<Self, RawError> {
        let data: Vec<u16> = match &raw.data {
            rawloader::RawImageData::Integer(values) => values.clone(),
            rawloader::RawImageData::Float(values) => values
                .iter()
                .map(|&v| (v * 65535.0).clamp(0.0, 65535.0) as u16)
                .collect(),
        };

        let cpp = raw.cpp.max(1);
        if data.len() < raw.width * raw.height * cpp {
            return Err(RawError::DecodeError(format!(
                "Sensor data too short: {} values for {}x{}x{}",
                data.len(),
                raw.width,
                raw.height,
                cpp
            )));
        }

        // crops are [top, right, bottom, left]
        let [top, right, bottom, left] = raw.crops;
        let width = raw.width.saturating_sub(left + right);
        let height = raw.height.saturating_sub(top + bottom);
        if width < 2 || height < 2 {
            return Err(RawError::DecodeError(format!(
                "Invalid image dimensions after crop: {}x{}",
                width, height
            )));
        }

        let mut cropped = Vec::with_capacity(width * height * cpp);
        for row in top..top + height {
            let start = (row * raw.width + left) * cpp;
            cropped.extend_from_slice(&data[start..start + width * cpp]);
        }

        // Demosaiced images carry an empty pattern
        let mut cfa = [[0usize, 1], [1, 2]];
        if cpp == 1 && raw.cfa.width > 0 && raw.cfa.height > 0 {
            for (dy, cells) in cfa.iter_mut().enumerate() {
                for (dx, cell) in cells.iter_mut().enumerate() {
                    *cell = raw.cfa.color_at(top + dy, left + dx).min(3);
                }
            }
        }

        Ok(Self {
            width,
            height,
            cpp,
            data: cropped,
            cfa,
            black_levels: raw.blacklevels,
            white_levels: raw.whitelevels,
            wb_coeffs: raw.wb_coeffs,
        })
    }
}

/// As-shot white balance, normalized so green is 1.0. Missing coefficients are neutral.
fn white_balance(coeffs: &[f32; 4]) -> [f32; 4] {
    let valid = |v: f32| v.is_finite() && v > 0.0;
    let green = if valid(coeffs[1]) { coeffs[1] } else { 1.0 };
    let red = if valid(coeffs[0]) { coeffs[0] } else { green };
    let blue = if valid(coeffs[2]) { coeffs[2] } else { green };
    let green2 = if valid(coeffs[3]) { coeffs[3] } else { green };
    [red / green, 1.0, blue / green, green2 / green]
}

fn normalize(value: u16, black: u16, white: u16) -> f32 {
    let range = white.saturating_sub(black).max(1) as f32;
    value.saturating_sub(black) as f32 / range
}

fn to_display(linear: f32) -> u8 {
    (linear.clamp(0.0, 1.0).powf(1.0 / DISPLAY_GAMMA) * 255.0).round() as u8
}

/// Applies levels and white balance, demosaics 2x2 Bayer cells into one RGB pixel each
/// and applies display gamma.
pub fn develop_frame(frame: &SensorFrame) -> Result<RgbImage, RawError> {
    let wb = white_balance(&frame.wb_coeffs);

    if frame.cpp >= 3 {
        let mut img: RgbImage = ImageBuffer::new(frame.width as u32, frame.height as u32);
        for (i, pixel) in img.pixels_mut().enumerate() {
            let base = i * frame.cpp;
            let mut rgb = [0u8; 3];
            for (ch, out) in rgb.iter_mut().enumerate() {
                let v = normalize(
                    frame.data[base + ch],
                    frame.black_levels[ch],
                    frame.white_levels[ch],
                );
                *out = to_display(v * wb[ch]);
            }
            *pixel = Rgb(rgb);
        }
        return Ok(img);
    }

    let out_w = frame.width / 2;
    let out_h = frame.height / 2;
    let mut rgb_data = Vec::with_capacity(out_w * out_h * 3);

    for oy in 0..out_h {
        for ox in 0..out_w {
            let mut sums = [0f32; 3];
            let mut counts = [0u32; 3];

            for (dy, cells) in frame.cfa.iter().enumerate() {
                for (dx, &color) in cells.iter().enumerate() {
                    let y = oy * 2 + dy;
                    let x = ox * 2 + dx;
                    let raw = frame.data[y * frame.width + x];
                    let v = normalize(raw, frame.black_levels[color], frame.white_levels[color])
                        * wb[color];
                    let channel = if color == 3 { 1 } else { color };
                    sums[channel] += v;
                    counts[channel] += 1;
                }
            }

            for ch in 0..3 {
                let avg = if counts[ch] > 0 {
                    sums[ch] / counts[ch] as f32
                } else {
                    0.0
                };
                rgb_data.push(to_display(avg));
            }
        }
    }

    ImageBuffer::from_raw(out_w as u32, out_h as u32, rgb_data).ok_or_else(|| {
        RawError::DecodeError("Buffer conversion failed: invalid dimensions".to_string())
    })
}

pub fn encode_jpeg(img: RgbImage) -> Result<Vec<u8>, RawError> {
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
    DynamicImage::ImageRgb8(img)
        .write_with_encoder(encoder)
        .map_err(|e| RawError::EncodeError(e.to_string()))?;
    Ok(bytes)
}
