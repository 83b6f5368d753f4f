//! PDF page counting

use crate::error::ExtractorError;
use lopdf::{dictionary, Document, Object};

impl From<lopdf::Error> for ExtractorError {
    fn from(e: lopdf::Error) -> Self {
        ExtractorError::Pdf(e.to_string())
    }
}

/// Count the pages of a PDF held in memory
///
/// A document without pages is rejected: there is nothing to extract and a
/// zero page count would make every run complete immediately.
pub fn count_pages(bytes: &[u8]) -> Result<u32, ExtractorError> {
    let document = Document::load_mem(bytes)?;
    let pages = document.get_pages().len();
    if pages == 0 {
        return Err(ExtractorError::Pdf("document has no pages".to_string()));
    }
    u32::try_from(pages).map_err(|_| ExtractorError::Pdf(format!("{} pages", pages)))
}

/// Build a PDF of `pages` blank pages
///
/// Used to exercise the extraction loops without shipping real documents.
pub fn blank_pdf(pages: u32) -> Result<Vec<u8>, ExtractorError> {
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();

    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            document
                .add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(595),
                        Object::Integer(842),
                    ],
                })
                .into()
        })
        .collect();

    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    document
        .save_to(&mut buffer)
        .map_err(|e| ExtractorError::Pdf(e.to_string()))?;
    Ok(buffer)
}
