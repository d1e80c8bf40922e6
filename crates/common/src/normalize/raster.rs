//! Raster images to PDF. Every frame becomes one page whose media box is the
//! frame's pixel size, with the image drawn over the whole page.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::ColorType;

use crate::error::VaultError;

/// PhotometricInterpretation value meaning 0 is white.
const WHITE_IS_ZERO: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channels {
    Gray,
    Rgb,
}

impl Channels {
    fn color_space(&self) -> &'static str {
        match self {
            Channels::Gray => "DeviceGray",
            Channels::Rgb => "DeviceRGB",
        }
    }

    fn per_pixel(&self) -> usize {
        match self {
            Channels::Gray => 1,
            Channels::Rgb => 3,
        }
    }
}

/// 8 bits per component, rows top to bottom.
struct Frame {
    width: u32,
    height: u32,
    channels: Channels,
    pixels: Vec<u8>,
}

/// Convert a single or multi-frame TIFF, one page per frame in order.
pub(crate) fn tiff_to_pdf(source: &Path, target: &Path, display_name: &str) -> Result<(), VaultError> {
    let malformed = |e: tiff::TiffError| VaultError::MalformedInput(format!("{}: {}", display_name, e));

    let reader = BufReader::new(File::open(source)?);
    let mut decoder = Decoder::new(reader).map_err(malformed)?;
    let mut builder = PageBuilder::new();

    loop {
        let frame = decode_tiff_frame(&mut decoder, display_name).map_err(|e| match e {
            FrameError::Tiff(e) => malformed(e),
            FrameError::Unsupported(m) => VaultError::MalformedInput(m),
        })?;
        builder.push(frame)?;

        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(malformed)?;
    }

    tracing::debug!(source = %display_name, pages = builder.len(), "converted TIFF frames");
    builder.finish(target)
}

/// Convert a JPEG into a single page.
pub(crate) fn jpeg_to_pdf(source: &Path, target: &Path, display_name: &str) -> Result<(), VaultError> {
    let malformed = |e: image::ImageError| VaultError::MalformedInput(format!("{}: {}", display_name, e));

    let decoded = image::ImageReader::open(source)?
        .with_guessed_format()?
        .decode()
        .map_err(malformed)?;
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut builder = PageBuilder::new();
    builder.push(Frame {
        width,
        height,
        channels: Channels::Rgb,
        pixels: rgb.into_raw(),
    })?;
    builder.finish(target)
}

enum FrameError {
    Tiff(tiff::TiffError),
    Unsupported(String),
}

impl From<tiff::TiffError> for FrameError {
    fn from(e: tiff::TiffError) -> Self {
        FrameError::Tiff(e)
    }
}

fn decode_tiff_frame<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    display_name: &str,
) -> Result<Frame, FrameError> {
    let (width, height) = decoder.dimensions()?;
    let color = decoder.colortype()?;
    let white_is_zero = decoder
        .get_tag_u32(Tag::PhotometricInterpretation)
        .map(|p| p == WHITE_IS_ZERO)
        .unwrap_or(false);
    let samples = width as usize * height as usize;

    let (channels, mut pixels) = match (color, decoder.read_image()?) {
        (ColorType::Gray(1), DecodingResult::U8(packed)) => {
            (Channels::Gray, unpack_bilevel(&packed, width, height))
        }
        (ColorType::Gray(8), DecodingResult::U8(gray)) => (Channels::Gray, gray),
        (ColorType::Gray(16), DecodingResult::U16(gray)) => (Channels::Gray, narrow(&gray)),
        (ColorType::RGB(8), DecodingResult::U8(rgb)) => (Channels::Rgb, rgb),
        (ColorType::RGB(16), DecodingResult::U16(rgb)) => (Channels::Rgb, narrow(&rgb)),
        (ColorType::RGBA(8), DecodingResult::U8(rgba)) => (Channels::Rgb, drop_alpha(&rgba)),
        (ColorType::RGBA(16), DecodingResult::U16(rgba)) => {
            (Channels::Rgb, drop_alpha(&narrow(&rgba)))
        }
        (other, _) => {
            return Err(FrameError::Unsupported(format!(
                "{}: unsupported TIFF color model {:?}",
                display_name, other
            )))
        }
    };

    if channels == Channels::Gray && white_is_zero {
        pixels.iter_mut().for_each(|p| *p = 255 - *p);
    }
    if pixels.len() != samples * channels.per_pixel() {
        return Err(FrameError::Unsupported(format!(
            "{}: frame data does not match its {}x{} dimensions",
            display_name, width, height
        )));
    }

    Ok(Frame {
        width,
        height,
        channels,
        pixels,
    })
}

/// Expand 1-bit rows (each padded to a whole byte) to one byte per pixel,
/// with a set bit meaning white.
fn unpack_bilevel(packed: &[u8], width: u32, height: u32) -> Vec<u8> {
    let width = width as usize;
    let height = height as usize;
    // some decoders already hand out one byte per pixel
    if packed.len() == width * height && width % 8 != 0 {
        return packed.iter().map(|&b| if b > 0 { 255 } else { 0 }).collect();
    }

    let row_bytes = width.div_ceil(8);
    let mut pixels = Vec::with_capacity(width * height);
    for y in 0..height {
        let row = &packed[(y * row_bytes).min(packed.len())..((y + 1) * row_bytes).min(packed.len())];
        for x in 0..width {
            let bit = row.get(x / 8).map(|b| (b >> (7 - x % 8)) & 1).unwrap_or(0);
            pixels.push(if bit == 1 { 255 } else { 0 });
        }
    }
    pixels
}

fn narrow(wide: &[u16]) -> Vec<u8> {
    wide.iter().map(|v| (v >> 8) as u8).collect()
}

fn drop_alpha(rgba: &[u8]) -> Vec<u8> {
    rgba.chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect()
}

/// Accumulates image pages into a fresh document.
struct PageBuilder {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl PageBuilder {
    fn new() -> Self {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.kids.len()
    }

    fn push(&mut self, frame: Frame) -> Result<(), VaultError> {
        let width = i64::from(frame.width);
        let height = i64::from(frame.height);

        let image_id = self.doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => frame.channels.color_space(),
                "BitsPerComponent" => 8,
            },
            frame.pixels,
        ));

        // scale the unit image square up to the full page
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Integer(width),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(height),
                        Object::Integer(0),
                        Object::Integer(0),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(width),
                Object::Integer(height),
            ],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
            "Contents" => content_id,
        });
        self.kids.push(Object::Reference(page_id));
        Ok(())
    }

    fn finish(mut self, target: &Path) -> Result<(), VaultError> {
        if self.kids.is_empty() {
            return Err(VaultError::MalformedInput("image has no frames".into()));
        }
        let count = self.kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.compress();
        self.doc.save(target)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::fixtures::{self, TiffFrame};

    fn media_widths(path: &Path) -> Vec<i64> {
        let doc = Document::load(path).unwrap();
        doc.get_pages()
            .values()
            .map(|id| {
                let page = doc.get_dictionary(*id).unwrap();
                let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
                media_box[2].as_i64().unwrap()
            })
            .collect()
    }

    #[test]
    fn test_multi_frame_tiff_keeps_frame_order() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scan.tiff");
        let target = dir.path().join("scan-as-pdf.pdf");
        fixtures::write_tiff(
            &source,
            &[
                TiffFrame::Gray8 { width: 10, height: 4 },
                TiffFrame::Rgb8 { width: 20, height: 4 },
                TiffFrame::Rgb16 { width: 30, height: 4 },
            ],
        )
        .unwrap();

        tiff_to_pdf(&source, &target, "scan.tiff").unwrap();
        assert_eq!(media_widths(&target), vec![10, 20, 30]);
    }

    #[test]
    fn test_jpeg_page_matches_pixel_size() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("photo.jpeg");
        let target = dir.path().join("photo-as-pdf.pdf");
        fixtures::write_jpeg(&source, 64, 48).unwrap();

        jpeg_to_pdf(&source, &target, "photo.jpeg").unwrap();
        assert_eq!(media_widths(&target), vec![64]);
    }

    #[test]
    fn test_unpack_bilevel_rows_are_byte_aligned() {
        // 10 pixels wide: two bytes per row
        let packed = [0b1000_0000, 0b0100_0000, 0b0000_0000, 0b1100_0000];
        let pixels = unpack_bilevel(&packed, 10, 2);
        assert_eq!(pixels.len(), 20);
        assert_eq!(pixels[0], 255);
        assert_eq!(pixels[9], 255);
        assert_eq!(pixels[1], 0);
        assert_eq!(pixels[18], 255);
        assert_eq!(pixels[19], 255);
    }

    #[test]
    fn test_drop_alpha_and_narrow() {
        assert_eq!(drop_alpha(&[1, 2, 3, 4, 5, 6, 7, 8]), vec![1, 2, 3, 5, 6, 7]);
        assert_eq!(narrow(&[0xffff, 0x0100, 0x00ff]), vec![0xff, 0x01, 0x00]);
    }
}
