//! Small documents generated on the fly.
//!
//! Every page written here carries a `/Label` string such as `doc0-page1`, so
//! tests can check page order after merging and sealing.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{anyhow, Result};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use tiff::encoder::{colortype, TiffEncoder};

/// One frame of a generated TIFF
#[derive(Debug, Clone, Copy)]
pub enum TiffFrame {
    Gray8 { width: u32, height: u32 },
    Rgb8 { width: u32, height: u32 },
    Rgb16 { width: u32, height: u32 },
}

/// A letter-sized document whose pages are labelled `<prefix>-page<n>`.
pub fn labeled_document(prefix: &str, pages: usize) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids: Vec<Object> = Vec::with_capacity(pages);
    for n in 0..pages {
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(612),
                Object::Integer(792),
            ],
            "Contents" => content_id,
            "Label" => Object::string_literal(format!("{}-page{}", prefix, n)),
        });
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

/// `labeled_document("doc0", pages)`
pub fn pdf_document(pages: usize) -> Document {
    labeled_document("doc0", pages)
}

pub fn write_pdf(path: &Path, pages: usize) -> Result<()> {
    create_parent(path)?;
    pdf_document(pages).save(path)?;
    Ok(())
}

/// A binder whose embedded files are PDFs with the given page counts, labelled
/// `doc0`, `doc1`, ... Each embedded file sits in its own leaf of the name
/// tree, under `/Kids`.
pub fn write_binder(path: &Path, page_counts: &[usize]) -> Result<()> {
    let mut binder = labeled_document("cover", 1);

    let mut leaves: Vec<Object> = Vec::new();
    for (i, pages) in page_counts.iter().enumerate() {
        let name = format!("doc{}.pdf", i);
        let mut bytes = Vec::new();
        labeled_document(&format!("doc{}", i), *pages).save_to(&mut bytes)?;

        let spec = embed(&mut binder, &name, "application/pdf", bytes);
        let leaf = binder.add_object(dictionary! {
            "Names" => vec![Object::string_literal(name), Object::Reference(spec)],
        });
        leaves.push(Object::Reference(leaf));
    }

    let tree = binder.add_object(dictionary! { "Kids" => leaves });
    attach_name_tree(&mut binder, tree)?;
    create_parent(path)?;
    binder.save(path)?;
    Ok(())
}

/// A binder whose only embedded file is plain text.
pub fn write_binder_with_text_attachment(path: &Path) -> Result<()> {
    let mut binder = labeled_document("cover", 1);
    let spec = embed(&mut binder, "notes.txt", "text/plain", b"not a pdf".to_vec());
    let tree = binder.add_object(dictionary! {
        "Names" => vec![Object::string_literal("notes.txt"), Object::Reference(spec)],
    });
    attach_name_tree(&mut binder, tree)?;
    create_parent(path)?;
    binder.save(path)?;
    Ok(())
}

fn embed(doc: &mut Document, name: &str, subtype: &str, bytes: Vec<u8>) -> ObjectId {
    let file = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "EmbeddedFile",
            "Subtype" => Object::Name(subtype.as_bytes().to_vec()),
        },
        bytes,
    ));
    doc.add_object(dictionary! {
        "Type" => "Filespec",
        "F" => Object::string_literal(name),
        "EF" => dictionary! { "F" => file },
    })
}

fn attach_name_tree(doc: &mut Document, tree: ObjectId) -> Result<()> {
    let names = doc.add_object(dictionary! { "EmbeddedFiles" => tree });
    let root = doc.trailer.get(b"Root")?.as_reference()?;
    doc.get_dictionary_mut(root)?.set("Names", names);
    Ok(())
}

pub fn write_tiff(path: &Path, frames: &[TiffFrame]) -> Result<()> {
    create_parent(path)?;
    let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
    for frame in frames {
        match *frame {
            TiffFrame::Gray8 { width, height } => {
                let data = ramp_u8(width * height);
                encoder.write_image::<colortype::Gray8>(width, height, &data)?;
            }
            TiffFrame::Rgb8 { width, height } => {
                let data = ramp_u8(width * height * 3);
                encoder.write_image::<colortype::RGB8>(width, height, &data)?;
            }
            TiffFrame::Rgb16 { width, height } => {
                let data: Vec<u16> = (0..width * height * 3).map(|i| (i * 257) as u16).collect();
                encoder.write_image::<colortype::RGB16>(width, height, &data)?;
            }
        }
    }
    Ok(())
}

fn ramp_u8(len: u32) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

pub fn write_jpeg(path: &Path, width: u32, height: u32) -> Result<()> {
    create_parent(path)?;
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    img.save_with_format(path, image::ImageFormat::Jpeg)?;
    Ok(())
}

fn open(path: &Path, password: &str) -> Result<Document> {
    let mut doc = Document::load(path)?;
    if doc.is_encrypted() {
        doc.decrypt(password)?;
    }
    Ok(doc)
}

pub fn page_count(path: &Path, password: &str) -> Result<usize> {
    Ok(open(path, password)?.get_pages().len())
}

/// Page labels in page order.
pub fn page_labels(path: &Path, password: &str) -> Result<Vec<String>> {
    let doc = open(path, password)?;
    doc.get_pages()
        .values()
        .map(|id| match doc.get_dictionary(*id)?.get(b"Label")? {
            Object::String(bytes, _) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            other => Err(anyhow!("unexpected page label {:?}", other)),
        })
        .collect()
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
