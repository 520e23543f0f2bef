use std::fs;
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::error::{Error, Result};
use crate::hashing;

/// Tuning constants kept together so a future change to the budget touches one place.
pub struct CompressionOptions {
    pub quality_start: u8,
    pub quality_min: u8,
    pub quality_step: u8,
    pub max_bytes: u64,
    pub tolerance: u64,
    pub resize_long_edge: u32,
    pub thumbnail_long_edge: u32,
    pub thumbnail_quality: u8,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            quality_start: 86,
            quality_min: 80,
            quality_step: 2,
            max_bytes: 800 * 1024,
            tolerance: 50 * 1024,
            resize_long_edge: 2048,
            thumbnail_long_edge: 400,
            thumbnail_quality: 80,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscodeResult {
    pub compressed_path: std::path::PathBuf,
    pub thumbnail_path: std::path::PathBuf,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
    pub source_hash: String,
}

fn decode_source(path: &Path) -> Result<DynamicImage> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if ext == "heic" || ext == "heif" {
        return decode_heif(path);
    }
    image::open(path).map_err(|err| Error::ScanError(format!("decode {}: {err}", path.display())))
}

#[cfg(feature = "heif")]
fn decode_heif(path: &Path) -> Result<DynamicImage> {
    use libheif_rs::{ColorSpace, HeifContext, RgbChroma};

    let ctx = HeifContext::read_from_file(path.to_str().ok_or_else(|| {
        Error::ScanError(format!("non-utf8 path: {}", path.display()))
    })?)
    .map_err(|err| Error::ScanError(format!("heif open {}: {err}", path.display())))?;
    let handle = ctx
        .primary_image_handle()
        .map_err(|err| Error::ScanError(format!("heif handle {}: {err}", path.display())))?;
    let heif_image = handle
        .decode(ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(|err| Error::ScanError(format!("heif decode {}: {err}", path.display())))?;
    let plane = heif_image
        .planes()
        .interleaved
        .ok_or_else(|| Error::ScanError(format!("heif no interleaved plane: {}", path.display())))?;
    let width = plane.width;
    let height = plane.height;
    let buf = image::RgbImage::from_raw(width, height, plane.data.to_vec())
        .ok_or_else(|| Error::ScanError(format!("heif raw buffer mismatch: {}", path.display())))?;
    Ok(DynamicImage::ImageRgb8(buf))
}

#[cfg(not(feature = "heif"))]
fn decode_heif(path: &Path) -> Result<DynamicImage> {
    Err(Error::ScanError(format!(
        "heif support not compiled in: {}",
        path.display()
    )))
}

/// EXIF orientation tag values 5-8 require a transpose (mirror+rotate); only rotation is
/// handled here, so mirror-only / mirror-plus-rotate values are logged and left unrotated.
fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        3 => image.rotate180(),
        6 => image.rotate90(),
        8 => image.rotate270(),
        1 => image,
        other => {
            if other != 0 {
                tracing::debug!(orientation = other, "unhandled EXIF orientation, leaving as-is");
            }
            image
        }
    }
}

fn read_orientation(path: &Path) -> u32 {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(_) => return 1,
    };
    let mut reader = std::io::BufReader::new(file);
    let exif_reader = exif::Reader::new();
    let exif = match exif_reader.read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(_) => return 1,
    };
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .unwrap_or(1)
}

fn resize_to_long_edge(image: DynamicImage, long_edge: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let current_long_edge = width.max(height);
    if current_long_edge <= long_edge {
        return image;
    }
    image.resize(long_edge, long_edge, FilterType::Lanczos3)
}

/// Adaptive quality search: step down from `quality_start` until the
/// encoded size fits the budget, accepting `quality_min`'s output if nothing else qualified.
fn encode_adaptive_webp(image: &DynamicImage, options: &CompressionOptions) -> Result<Vec<u8>> {
    let rgba = image.to_rgba8();
    let encoder = webp::Encoder::from_rgba(&rgba, rgba.width(), rgba.height());
    let budget = options.max_bytes + options.tolerance;

    let mut quality = options.quality_start;
    let mut last_encoded: Option<Vec<u8>> = None;
    loop {
        let encoded = encoder.encode(quality as f32).to_vec();
        if encoded.len() as u64 <= budget {
            return Ok(encoded);
        }
        last_encoded = Some(encoded);
        if quality <= options.quality_min {
            break;
        }
        quality = quality.saturating_sub(options.quality_step).max(options.quality_min);
    }
    last_encoded.ok_or_else(|| Error::ScanError("webp encoder produced no output".into()))
}

fn encode_thumbnail(image: &DynamicImage, options: &CompressionOptions) -> Vec<u8> {
    let thumb = resize_to_long_edge(image.clone(), options.thumbnail_long_edge);
    let rgba = thumb.to_rgba8();
    let encoder = webp::Encoder::from_rgba(&rgba, rgba.width(), rgba.height());
    encoder.encode(options.thumbnail_quality as f32).to_vec()
}

/// Full transcode of one source file: decode, auto-rotate, resize, adaptive-quality WebP encode,
/// plus a thumbnail. `hash` in the returned result is always of the *source* bytes,
/// not the compressed output, so the Catalog's `sourceFileHash` tracks what's on disk upstream.
pub fn transcode(
    source_path: &Path,
    compressed_output_path: &Path,
    thumbnail_output_path: &Path,
    options: &CompressionOptions,
) -> Result<TranscodeResult> {
    let source_hash = hashing::hash_file(source_path)?;
    let orientation = read_orientation(source_path);
    let image = decode_source(source_path)?;
    let image = apply_orientation(image, orientation);
    let image = resize_to_long_edge(image, options.resize_long_edge);
    let (width, height) = image.dimensions();

    let encoded = encode_adaptive_webp(&image, options)?;
    let thumbnail = encode_thumbnail(&image, options);

    if let Some(parent) = compressed_output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Some(parent) = thumbnail_output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(compressed_output_path, &encoded)?;
    fs::write(thumbnail_output_path, &thumbnail)?;

    Ok(TranscodeResult {
        compressed_path: compressed_output_path.to_path_buf(),
        thumbnail_path: thumbnail_output_path.to_path_buf(),
        width,
        height,
        file_size: encoded.len() as u64,
        source_hash,
    })
}
