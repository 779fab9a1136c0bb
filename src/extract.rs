//! PDF segment extraction: headings and embedded images.
//!
//! | Function | Output |
//! |----------|--------|
//! | [`extract_headings`] | Cleaned headings, via `pdf-extract` page text and [`HeadingRules`] |
//! | [`extract_images`] | Raster images of every image XObject, via `lopdf` + `image` |
//! | [`save_images`] | `<dir>/<doc>_image_<i>.png` artifacts |
//! | [`extract_document`] | All of the above, as [`DocumentSegments`] |
//!
//! A PDF that cannot be parsed is an error for that document; nothing is
//! recovered from it. Individual image streams that cannot be decoded are
//! skipped with a warning.

use image::{DynamicImage, GenericImageView, ImageBuffer, Luma, Rgb};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use guide_index_core::heading::{headings_from_pages, HeadingRules};
use guide_index_core::images::{ImagePolicy, ImageSize};
use guide_index_core::pipeline::DocumentSegments;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("image extraction failed: {0}")]
    Image(String),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExtractError + '_ {
    move |source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Document name used in descriptor metadata: the file stem.
pub fn document_name(path: &Path) -> Result<String, ExtractError> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ExtractError::Pdf(format!("no document name in {}", path.display())))
}

/// Plain text of every page, in page order.
pub fn page_texts(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Cleaned, filtered headings of a PDF in document order.
pub fn extract_headings(path: &Path, rules: &HeadingRules) -> Result<Vec<String>, ExtractError> {
    let bytes = std::fs::read(path).map_err(io_error(path))?;
    let pages = page_texts(&bytes)?;
    Ok(headings_from_pages(rules, &pages))
}

/// One decoded image XObject.
#[derive(Debug, Clone)]
pub struct ExtractedImage {
    /// 1-based page number the image was found on.
    pub page: u32,
    pub image: DynamicImage,
}

impl ExtractedImage {
    pub fn size(&self) -> ImageSize {
        let (width, height) = self.image.dimensions();
        ImageSize { width, height }
    }
}

/// Decode every image XObject, scanning pages in order.
pub fn extract_images(bytes: &[u8]) -> Result<Vec<ExtractedImage>, ExtractError> {
    let doc = Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;

    let mut out = Vec::new();
    for (page, page_id) in doc.get_pages() {
        for image in page_images(&doc, page_id)? {
            out.push(ExtractedImage { page, image });
        }
    }
    Ok(out)
}

fn page_images(doc: &Document, page_id: ObjectId) -> Result<Vec<DynamicImage>, ExtractError> {
    let (own, inherited) = doc
        .get_page_resources(page_id)
        .map_err(|e| ExtractError::Pdf(format!("page resources: {}", e)))?;

    let mut dicts: Vec<&Dictionary> = Vec::new();
    if let Some(dict) = own {
        dicts.push(dict);
    }
    let mut seen = HashSet::new();
    for id in inherited {
        if seen.insert(id) {
            if let Ok(dict) = doc.get_dictionary(id) {
                dicts.push(dict);
            }
        }
    }

    let mut images = Vec::new();
    for dict in dicts {
        let xobjects = match dict.get(b"XObject") {
            Ok(Object::Dictionary(d)) => d,
            Ok(Object::Reference(id)) => match doc.get_dictionary(*id) {
                Ok(d) => d,
                Err(_) => continue,
            },
            _ => continue,
        };
        for (name, obj) in xobjects.iter() {
            let id = match obj {
                Object::Reference(id) => *id,
                _ => continue,
            };
            let stream = match doc.get_object(id).and_then(Object::as_stream) {
                Ok(s) => s,
                Err(_) => continue,
            };
            let is_image = matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image");
            if !is_image {
                continue;
            }
            match decode_image(doc, stream) {
                Ok(img) => images.push(img),
                Err(e) => tracing::warn!(
                    xobject = %String::from_utf8_lossy(name),
                    error = %e,
                    "skipping undecodable image"
                ),
            }
        }
    }
    Ok(images)
}

/// Sample layout of an image XObject, as declared by its `/ColorSpace`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    /// One sample per pixel indexing `palette`, whose entries are in `base`.
    Indexed {
        base: Box<ColorSpace>,
        palette: Vec<u8>,
    },
}

impl ColorSpace {
    fn components(&self) -> usize {
        match self {
            ColorSpace::Gray | ColorSpace::Indexed { .. } => 1,
            ColorSpace::Rgb => 3,
            ColorSpace::Cmyk => 4,
        }
    }
}

fn unsupported(what: impl std::fmt::Display) -> ExtractError {
    ExtractError::Image(format!("unsupported color space: {}", what))
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Result<&'a Object, ExtractError> {
    match obj {
        Object::Reference(id) => doc
            .get_object(*id)
            .map_err(|e| ExtractError::Image(format!("dangling reference {:?}: {}", id, e))),
        other => Ok(other),
    }
}

fn device_space(name: &[u8]) -> Result<ColorSpace, ExtractError> {
    match name {
        b"DeviceGray" | b"G" | b"CalGray" => Ok(ColorSpace::Gray),
        b"DeviceRGB" | b"RGB" | b"CalRGB" => Ok(ColorSpace::Rgb),
        b"DeviceCMYK" | b"CMYK" => Ok(ColorSpace::Cmyk),
        other => Err(unsupported(String::from_utf8_lossy(other))),
    }
}

fn color_space(doc: &Document, obj: &Object) -> Result<ColorSpace, ExtractError> {
    let items = match resolve(doc, obj)? {
        Object::Name(name) => return device_space(name),
        Object::Array(items) => items,
        other => return Err(unsupported(format!("{:?}", other))),
    };
    let family = match items.first() {
        Some(first) => resolve(doc, first)?
            .as_name()
            .map_err(|_| unsupported("array without a family name"))?,
        None => return Err(unsupported("empty array")),
    };
    let operand = |i: usize| {
        let missing = || {
            let family = String::from_utf8_lossy(family);
            unsupported(format!("{} without operand {}", family, i))
        };
        items
            .get(i)
            .ok_or_else(missing)
            .and_then(|o| resolve(doc, o))
    };

    match family {
        b"ICCBased" => {
            let profile = operand(1)?
                .as_stream()
                .map_err(|_| unsupported("ICCBased profile is not a stream"))?;
            match profile.dict.get(b"N").and_then(Object::as_i64) {
                Ok(1) => Ok(ColorSpace::Gray),
                Ok(3) => Ok(ColorSpace::Rgb),
                Ok(4) => Ok(ColorSpace::Cmyk),
                Ok(n) => Err(unsupported(format!("ICCBased with {} components", n))),
                Err(_) => Err(unsupported("ICCBased without /N")),
            }
        }
        b"Indexed" | b"I" => {
            let base = color_space(doc, operand(1)?)?;
            if matches!(base, ColorSpace::Indexed { .. }) {
                return Err(unsupported("nested Indexed"));
            }
            let hival = operand(2)?
                .as_i64()
                .ok()
                .and_then(|v| usize::try_from(v).ok())
                .filter(|v| *v <= 255)
                .ok_or_else(|| unsupported("Indexed hival outside 0..=255"))?;
            let mut palette = match operand(3)? {
                Object::String(bytes, _) => bytes.clone(),
                Object::Stream(stream) => stream_bytes(stream)?,
                _ => return Err(unsupported("Indexed lookup is neither string nor stream")),
            };
            let needed = (hival + 1) * base.components();
            if palette.len() < needed {
                return Err(ExtractError::Image(format!(
                    "palette has {} bytes, {} needed",
                    palette.len(),
                    needed
                )));
            }
            palette.truncate(needed);
            Ok(ColorSpace::Indexed {
                base: Box::new(base),
                palette,
            })
        }
        other => device_space(other),
    }
}

/// Stream data with its filters applied; unfiltered streams are returned as is.
fn stream_bytes(stream: &lopdf::Stream) -> Result<Vec<u8>, ExtractError> {
    if stream.dict.get(b"Filter").is_err() {
        return Ok(stream.content.clone());
    }
    stream
        .decompressed_content()
        .map_err(|e| ExtractError::Image(format!("cannot decompress image stream: {}", e)))
}

/// Split packed rows of `bits`-wide samples into one byte per sample.
///
/// Rows start on a byte boundary.
fn unpack_samples(
    data: &[u8],
    width: usize,
    height: usize,
    bits: usize,
) -> Result<Vec<u8>, ExtractError> {
    let row_bytes = (width * bits).div_ceil(8);
    if data.len() < row_bytes * height {
        return Err(ExtractError::Image(format!(
            "expected {} bytes of pixel data, found {}",
            row_bytes * height,
            data.len()
        )));
    }
    let mask = ((1u16 << bits) - 1) as u8;
    let mut out = Vec::with_capacity(width * height);
    for row in data.chunks_exact(row_bytes).take(height) {
        for x in 0..width {
            let bit = x * bits;
            let shift = 8 - bits - bit % 8;
            out.push((row[bit / 8] >> shift) & mask);
        }
    }
    Ok(out)
}

fn cmyk_to_rgb(samples: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(samples.len() / 4 * 3);
    for px in samples.chunks_exact(4) {
        let k = 255 - u16::from(px[3]);
        for &c in &px[..3] {
            rgb.push(((255 - u16::from(c)) * k / 255) as u8);
        }
    }
    rgb
}

fn decode_image(doc: &Document, stream: &lopdf::Stream) -> Result<DynamicImage, ExtractError> {
    let dim = |key: &[u8]| {
        stream
            .dict
            .get(key)
            .ok()
            .and_then(|o| o.as_i64().ok())
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
    };
    let (width, height) = match (dim(b"Width"), dim(b"Height")) {
        (Some(w), Some(h)) => (w, h),
        _ => return Err(ExtractError::Image("missing Width/Height".to_string())),
    };

    let filters: Vec<Vec<u8>> = match stream.dict.get(b"Filter") {
        Ok(Object::Name(n)) => vec![n.clone()],
        Ok(Object::Array(arr)) => arr
            .iter()
            .filter_map(|o| o.as_name().ok().map(|n| n.to_vec()))
            .collect(),
        _ => Vec::new(),
    };

    if filters
        .iter()
        .any(|f| f == b"DCTDecode" || f == b"JPXDecode")
    {
        return image::load_from_memory(&stream.content)
            .map_err(|e| ExtractError::Image(e.to_string()));
    }

    let space = match stream.dict.get(b"ColorSpace") {
        Ok(obj) => color_space(doc, obj)?,
        Err(_) => return Err(unsupported("missing /ColorSpace")),
    };
    let bits = stream
        .dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);
    let data = stream_bytes(stream)?;
    let (w, h) = (width as usize, height as usize);

    let (space, samples) = match space {
        ColorSpace::Indexed { base, palette } => {
            let bits = match bits {
                1 | 2 | 4 | 8 => bits as usize,
                other => {
                    return Err(ExtractError::Image(format!(
                        "unsupported BitsPerComponent {} for Indexed",
                        other
                    )))
                }
            };
            let n = base.components();
            let last = palette.len() / n - 1;
            let mut samples = Vec::with_capacity(w * h * n);
            for index in unpack_samples(&data, w, h, bits)? {
                let i = usize::from(index).min(last);
                samples.extend_from_slice(&palette[i * n..(i + 1) * n]);
            }
            (*base, samples)
        }
        direct => {
            if bits != 8 {
                return Err(ExtractError::Image(format!(
                    "unsupported BitsPerComponent {}",
                    bits
                )));
            }
            let samples = unpack_samples(&data, w * direct.components(), h, 8)?;
            (direct, samples)
        }
    };

    let image = match space {
        ColorSpace::Gray => ImageBuffer::<Luma<u8>, _>::from_raw(width, height, samples)
            .map(DynamicImage::ImageLuma8),
        ColorSpace::Rgb => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, samples)
            .map(DynamicImage::ImageRgb8),
        ColorSpace::Cmyk => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, cmyk_to_rgb(&samples))
            .map(DynamicImage::ImageRgb8),
        ColorSpace::Indexed { .. } => return Err(unsupported("nested Indexed")),
    };
    image.ok_or_else(|| ExtractError::Image("pixel buffer size mismatch".to_string()))
}

/// Write images as `<dir>/<doc>_image_<i>.png`, `i` being the position in `images`.
pub fn save_images(
    dir: &Path,
    doc: &str,
    images: &[ExtractedImage],
) -> Result<Vec<PathBuf>, ExtractError> {
    std::fs::create_dir_all(dir).map_err(io_error(dir))?;
    let mut paths = Vec::with_capacity(images.len());
    for (i, extracted) in images.iter().enumerate() {
        let path = dir.join(format!("{}_image_{}.png", doc, i));
        extracted
            .image
            .save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| ExtractError::Image(format!("{}: {}", path.display(), e)))?;
        paths.push(path);
    }
    Ok(paths)
}

/// Extract everything one pipeline needs from a PDF.
///
/// Images are only extracted when `artifacts_dir` is given; they pass
/// through `policy`, are re-indexed from 0 and written to the directory.
pub fn extract_document(
    path: &Path,
    rules: &HeadingRules,
    policy: &ImagePolicy,
    artifacts_dir: Option<&Path>,
) -> Result<DocumentSegments, ExtractError> {
    let name = document_name(path)?;
    let bytes = std::fs::read(path).map_err(io_error(path))?;
    let headings = headings_from_pages(rules, &page_texts(&bytes)?);

    let images = match artifacts_dir {
        Some(dir) => {
            let found = extract_images(&bytes)?;
            let total = found.len();
            let kept = policy.apply(&name, found, ExtractedImage::size);
            tracing::debug!(doc = %name, total, kept = kept.len(), "image policy applied");
            save_images(dir, &name, &kept)?
        }
        None => Vec::new(),
    };

    Ok(DocumentSegments {
        name,
        headings,
        images,
    })
}
