// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Client-side PDF preparation for dispatch.
//
// Chunk sends sometimes need the PDF reworked before it goes to the device:
// extracting the chunk's pages, pre-expanding copies when the device cannot
// collate natively, and converting to grayscale when the device cannot
// render monochrome itself.  All operations work on in-memory PDF bytes via
// the `lopdf` crate.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

use printgate_core::error::{GatewayError, Result};

/// Extract the given pages (1-indexed, in the given order) into a new PDF.
#[instrument(skip(pdf_bytes), fields(bytes_len = pdf_bytes.len(), pages = pages.len()))]
pub fn extract_pages(pdf_bytes: &[u8], pages: &[u32]) -> Result<Vec<u8>> {
    let source = load(pdf_bytes)?;
    let source_pages = source.get_pages();

    let mut target = empty_document();
    let mut importer = PageImporter::new(&source);
    for &page_num in pages {
        let page_id = *source_pages.get(&page_num).ok_or_else(|| {
            GatewayError::Pdf(format!(
                "page {} out of range (document has {} pages)",
                page_num,
                source_pages.len()
            ))
        })?;
        importer.append_page(&mut target, page_id)?;
    }

    debug!(extracted = pages.len(), "page extraction complete");
    save(target)
}

/// Pre-expand the document into the requested copy count and order, for
/// devices that cannot produce the requested collation natively.
///
/// Collated output repeats the whole document `copies` times; uncollated
/// output repeats each page `copies` times in place.  The protocol call for
/// the expanded PDF must present copy-count 1.
#[instrument(skip(pdf_bytes), fields(bytes_len = pdf_bytes.len(), copies, collate))]
pub fn expand_copies(pdf_bytes: &[u8], copies: u32, collate: bool) -> Result<Vec<u8>> {
    if copies <= 1 {
        return Ok(pdf_bytes.to_vec());
    }

    let source = load(pdf_bytes)?;
    let source_pages = source.get_pages();
    let mut page_numbers: Vec<u32> = source_pages.keys().copied().collect();
    page_numbers.sort_unstable();

    let mut target = empty_document();
    let mut importer = PageImporter::new(&source);
    if collate {
        for _ in 0..copies {
            for &page_num in &page_numbers {
                importer.append_page(&mut target, source_pages[&page_num])?;
            }
        }
    } else {
        for &page_num in &page_numbers {
            for _ in 0..copies {
                importer.append_page(&mut target, source_pages[&page_num])?;
            }
        }
    }

    debug!(
        output_pages = page_numbers.len() * copies as usize,
        "copy expansion complete"
    );
    save(target)
}

/// Convert page content to grayscale by rewriting RGB and CMYK colour
/// operators to their gray equivalents (ITU-R BT.601 luma weights).
///
/// This is the fallback path for devices without native monochrome
/// rendering; embedded images keep their colour spaces and are left to the
/// device driver.
#[instrument(skip(pdf_bytes), fields(bytes_len = pdf_bytes.len()))]
pub fn to_grayscale(pdf_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut doc = load(pdf_bytes)?;
    let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();

    for page_id in page_ids {
        let data = doc
            .get_page_content(page_id)
            .map_err(|e| GatewayError::Pdf(format!("cannot read page content: {e}")))?;
        let mut content = Content::decode(&data)
            .map_err(|e| GatewayError::Pdf(format!("cannot decode page content: {e}")))?;

        let mut changed = false;
        for op in &mut content.operations {
            if let Some(rewritten) = gray_equivalent(op) {
                *op = rewritten;
                changed = true;
            }
        }
        if changed {
            let encoded = content
                .encode()
                .map_err(|e| GatewayError::Pdf(format!("cannot encode page content: {e}")))?;
            doc.change_page_content(page_id, encoded)
                .map_err(|e| GatewayError::Pdf(format!("cannot replace page content: {e}")))?;
        }
    }

    save(doc)
}

/// Page count of an in-memory PDF.
pub fn page_count(pdf_bytes: &[u8]) -> Result<u32> {
    Ok(load(pdf_bytes)?.get_pages().len() as u32)
}

/// A temporary PDF deleted on every exit path unless explicitly preserved.
///
/// Chunk renders, banner sheets, and client-side rewrites live here; ticket
/// source PDFs call [`preserve`](Self::preserve) so they survive until
/// ticket completion.
pub struct ScopedPdf {
    file: NamedTempFile,
}

impl ScopedPdf {
    pub fn write(pdf_bytes: &[u8]) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("printgate-")
            .suffix(".pdf")
            .tempfile()?;
        file.write_all(pdf_bytes)?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Keep the file on disk and hand back its path.
    pub fn preserve(self) -> Result<PathBuf> {
        let (_handle, path) = self
            .file
            .keep()
            .map_err(|e| GatewayError::Io(e.error))?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// lopdf plumbing
// ---------------------------------------------------------------------------

fn load(pdf_bytes: &[u8]) -> Result<Document> {
    Document::load_mem(pdf_bytes)
        .map_err(|e| GatewayError::Pdf(format!("failed to load PDF from memory: {e}")))
}

fn save(mut doc: Document) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|e| GatewayError::Pdf(format!("failed to serialise PDF: {e}")))?;
    Ok(output)
}

/// A document with an empty page tree, ready to receive cloned pages.
fn empty_document() -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => Object::Array(Vec::new()),
            "Count" => 0,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));
    doc
}

/// Rewrite one colour operator to its gray equivalent, or `None` when the
/// operator is not colour-setting.
fn gray_equivalent(op: &Operation) -> Option<Operation> {
    let gray_operator = match op.operator.as_str() {
        "rg" | "k" => "g",
        "RG" | "K" => "G",
        _ => return None,
    };

    let gray = match op.operator.as_str() {
        "rg" | "RG" => {
            let [r, g, b] = component_values::<3>(&op.operands)?;
            0.299 * r + 0.587 * g + 0.114 * b
        }
        // CMYK: luma of the additive complement
        _ => {
            let [c, m, y, k] = component_values::<4>(&op.operands)?;
            let r = (1.0 - c) * (1.0 - k);
            let g = (1.0 - m) * (1.0 - k);
            let b = (1.0 - y) * (1.0 - k);
            0.299 * r + 0.587 * g + 0.114 * b
        }
    };

    Some(Operation::new(
        gray_operator,
        vec![Object::Real(gray.clamp(0.0, 1.0))],
    ))
}

fn component_values<const N: usize>(operands: &[Object]) -> Option<[f32; N]> {
    if operands.len() != N {
        warn!(count = operands.len(), expected = N, "colour operator with unexpected operand count");
        return None;
    }
    let mut values = [0.0f32; N];
    for (slot, operand) in values.iter_mut().zip(operands) {
        *slot = operand.as_float().ok()?;
    }
    Some(values)
}

/// Copies page object graphs from one document into another.
///
/// References are rewritten through a memo table, so resources several
/// pages share (fonts, content streams) land in the target exactly once —
/// copy expansion does not multiply them.  /Parent links point back into
/// the source page tree and are dropped; `append_page` re-establishes them
/// against the target's tree.
struct PageImporter<'a> {
    source: &'a Document,
    imported: HashMap<ObjectId, ObjectId>,
}

impl<'a> PageImporter<'a> {
    fn new(source: &'a Document) -> Self {
        Self {
            source,
            imported: HashMap::new(),
        }
    }

    /// Copy one page and register it as the target's last page.  The page
    /// object itself is always copied fresh (a page can legitimately appear
    /// several times in the output); only what it references is memoized.
    fn append_page(&mut self, target: &mut Document, page_id: ObjectId) -> Result<()> {
        let page = self
            .source
            .get_object(page_id)
            .map_err(|e| GatewayError::Pdf(format!("cannot read page object {page_id:?}: {e}")))?;
        let transplanted = self.transplant(target, page)?;
        let new_page_id = target.add_object(transplanted);

        let pages_id = page_tree_root(target)?;
        if let Ok(Object::Dictionary(pages)) = target.get_object_mut(pages_id) {
            if let Ok(Object::Array(kids)) = pages.get_mut(b"Kids") {
                kids.push(Object::Reference(new_page_id));
            }
            if let Ok(Object::Integer(count)) = pages.get_mut(b"Count") {
                *count += 1;
            }
        }
        if let Ok(Object::Dictionary(page)) = target.get_object_mut(new_page_id) {
            page.set("Parent", Object::Reference(pages_id));
        }
        Ok(())
    }

    fn transplant(&mut self, target: &mut Document, object: &Object) -> Result<Object> {
        Ok(match object {
            Object::Dictionary(dict) => Object::Dictionary(self.transplant_dict(target, dict)?),
            Object::Stream(stream) => Object::Stream(lopdf::Stream::new(
                self.transplant_dict(target, &stream.dict)?,
                stream.content.clone(),
            )),
            Object::Array(items) => {
                let mut transplanted = Vec::with_capacity(items.len());
                for item in items {
                    transplanted.push(self.transplant(target, item)?);
                }
                Object::Array(transplanted)
            }
            Object::Reference(id) => Object::Reference(self.import_referenced(target, *id)?),
            plain => plain.clone(),
        })
    }

    fn transplant_dict(
        &mut self,
        target: &mut Document,
        dict: &lopdf::Dictionary,
    ) -> Result<lopdf::Dictionary> {
        let mut out = lopdf::Dictionary::new();
        for (key, value) in dict.iter() {
            if key == b"Parent" {
                continue;
            }
            out.set(key.clone(), self.transplant(target, value)?);
        }
        Ok(out)
    }

    /// Import a referenced object once, reusing the copy for every later
    /// reference.  The target slot is reserved before descending, so a
    /// reference cycle terminates at the reserved id instead of recursing.
    fn import_referenced(&mut self, target: &mut Document, id: ObjectId) -> Result<ObjectId> {
        if let Some(&mapped) = self.imported.get(&id) {
            return Ok(mapped);
        }
        let object = match self.source.get_object(id) {
            Ok(object) => object,
            Err(err) => {
                warn!(?id, %err, "dangling reference imported as Null");
                let null_id = target.add_object(Object::Null);
                self.imported.insert(id, null_id);
                return Ok(null_id);
            }
        };
        let reserved = target.add_object(Object::Null);
        self.imported.insert(id, reserved);
        let transplanted = self.transplant(target, object)?;
        target.objects.insert(reserved, transplanted);
        Ok(reserved)
    }
}

fn page_tree_root(doc: &Document) -> Result<ObjectId> {
    let catalog = doc
        .catalog()
        .map_err(|e| GatewayError::Pdf(format!("no catalog: {e}")))?;
    match catalog.get(b"Pages") {
        Ok(Object::Reference(id)) => Ok(*id),
        Ok(_) => Err(GatewayError::Pdf("/Pages is not a reference".into())),
        Err(e) => Err(GatewayError::Pdf(format!("no /Pages: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lopdf::Stream;

    /// Build a minimal n-page PDF where page i paints in red RGB.
    fn sample_pdf(pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut kids = Vec::new();
        for _ in 0..pages {
            let content = Content {
                operations: vec![
                    Operation::new("rg", vec![Object::Real(1.0), Object::Real(0.0), Object::Real(0.0)]),
                    Operation::new("re", vec![
                        Object::Integer(10),
                        Object::Integer(10),
                        Object::Integer(100),
                        Object::Integer(100),
                    ]),
                    Operation::new("f", vec![]),
                ],
            };
            let content_id = doc.add_object(Object::Stream(Stream::new(
                dictionary! {},
                content.encode().unwrap(),
            )));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(pages_id),
                "Contents" => Object::Reference(content_id),
                "MediaBox" => Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ]),
            });
            kids.push(Object::Reference(page_id));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => Object::Array(kids),
                "Count" => pages as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn extract_pages_produces_requested_count() {
        let pdf = sample_pdf(5);
        let extracted = extract_pages(&pdf, &[2, 3, 5]).unwrap();
        assert_eq!(page_count(&extracted).unwrap(), 3);
    }

    #[test]
    fn extract_pages_rejects_out_of_range() {
        let pdf = sample_pdf(2);
        let err = extract_pages(&pdf, &[3]).unwrap_err();
        assert!(matches!(err, GatewayError::Pdf(_)));
    }

    #[test]
    fn expand_copies_multiplies_pages() {
        let pdf = sample_pdf(3);
        let collated = expand_copies(&pdf, 2, true).unwrap();
        assert_eq!(page_count(&collated).unwrap(), 6);

        let uncollated = expand_copies(&pdf, 3, false).unwrap();
        assert_eq!(page_count(&uncollated).unwrap(), 9);
    }

    #[test]
    fn expansion_imports_shared_content_once() {
        let pdf = sample_pdf(1);
        let expanded = expand_copies(&pdf, 3, true).unwrap();
        assert_eq!(page_count(&expanded).unwrap(), 3);

        // all three page copies reference one imported content stream
        let doc = Document::load_mem(&expanded).unwrap();
        let streams = doc
            .objects
            .values()
            .filter(|o| matches!(o, Object::Stream(_)))
            .count();
        assert_eq!(streams, 1);
    }

    #[test]
    fn expand_single_copy_is_passthrough() {
        let pdf = sample_pdf(2);
        let expanded = expand_copies(&pdf, 1, true).unwrap();
        assert_eq!(expanded, pdf);
    }

    #[test]
    fn grayscale_rewrites_rgb_operators() {
        let pdf = sample_pdf(1);
        let gray = to_grayscale(&pdf).unwrap();

        let doc = Document::load_mem(&gray).unwrap();
        let page_id = *doc.get_pages().get(&1).unwrap();
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();

        assert!(content.operations.iter().any(|op| op.operator == "g"));
        assert!(content.operations.iter().all(|op| op.operator != "rg"));
    }

    #[test]
    fn gray_equivalent_uses_luma_weights() {
        let red = Operation::new(
            "rg",
            vec![Object::Real(1.0), Object::Real(0.0), Object::Real(0.0)],
        );
        let gray = gray_equivalent(&red).unwrap();
        assert_eq!(gray.operator, "g");
        let value = gray.operands[0].as_float().unwrap();
        assert!((value - 0.299).abs() < 1e-4);
    }

    #[test]
    fn non_colour_operators_are_untouched() {
        let op = Operation::new("re", vec![Object::Integer(0)]);
        assert!(gray_equivalent(&op).is_none());
    }

    #[test]
    fn scoped_pdf_is_deleted_on_drop() {
        let pdf = sample_pdf(1);
        let path = {
            let scoped = ScopedPdf::write(&pdf).unwrap();
            assert!(scoped.path().exists());
            scoped.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn preserved_pdf_survives() {
        let pdf = sample_pdf(1);
        let scoped = ScopedPdf::write(&pdf).unwrap();
        let path = scoped.preserve().unwrap();
        assert!(path.exists());
        std::fs::remove_file(path).unwrap();
    }
}
