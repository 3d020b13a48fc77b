//! Embedded invoice XML retrieval from PDF/A-3 hybrids (ZUGFeRD / Factur-X).
//!
//! Walks the document catalogue's `Names/EmbeddedFiles` name tree and the
//! `/AF` arrays (catalogue and per-page), looking for a file specification
//! whose `/F` or `/UF` matches one of the standardised attachment names.
//! Traversal is bounded — reference-following stops at depth 8 and at most
//! 32 file specifications are examined — so a pathological PDF cannot run
//! away with the worker. Nothing beyond attachment metadata is interpreted
//! as PDF content.

use lopdf::{Dictionary, Document, Object};

use super::DeclaredFormat;
use crate::error::PipelineError;

const MAX_REF_DEPTH: usize = 8;
const MAX_FILESPECS: usize = 32;

/// Extract the embedded invoice XML, if any.
///
/// `Ok(None)` means a structurally valid PDF without a recognised invoice
/// attachment — an opaque PDF, not an error. A truncated byte stream is
/// transient (the blob may re-download completely); any other load failure
/// is permanent.
pub fn extract_invoice_xml(
    pdf: &[u8],
) -> Result<Option<(DeclaredFormat, Vec<u8>)>, PipelineError> {
    if !has_eof_marker(pdf) {
        return Err(PipelineError::Truncated(
            "PDF is missing its %%EOF trailer".into(),
        ));
    }

    let doc = Document::load_mem(pdf).map_err(|e| PipelineError::PdfMalformed(e.to_string()))?;

    let mut scan = Scan {
        doc: &doc,
        filespecs_seen: 0,
    };
    match scan.via_names() {
        Some(hit) => Ok(Some(hit)),
        None => Ok(scan.via_af_arrays()),
    }
}

/// The `%%EOF` marker must appear in the last KiB of a complete PDF.
fn has_eof_marker(pdf: &[u8]) -> bool {
    let tail = &pdf[pdf.len().saturating_sub(1024)..];
    tail.windows(5).any(|w| w == b"%%EOF")
}

struct Scan<'a> {
    doc: &'a Document,
    filespecs_seen: usize,
}

impl<'a> Scan<'a> {
    /// Catalogue → Names → EmbeddedFiles name tree (flat or with Kids).
    fn via_names(&mut self) -> Option<(DeclaredFormat, Vec<u8>)> {
        let catalog = self.doc.catalog().ok()?;
        let names = self.resolve_dict(catalog.get(b"Names").ok()?)?;
        let tree = self.resolve_dict(names.get(b"EmbeddedFiles").ok()?)?;
        self.walk_name_tree(tree, 0)
    }

    fn walk_name_tree(
        &mut self,
        node: &'a Dictionary,
        depth: usize,
    ) -> Option<(DeclaredFormat, Vec<u8>)> {
        if depth > MAX_REF_DEPTH {
            return None;
        }

        if let Ok(names) = node.get(b"Names").and_then(|o| o.as_array()) {
            // [name1, filespec1, name2, filespec2, ...]
            for chunk in names.chunks(2) {
                let [name_obj, spec_obj] = chunk else { continue };
                if self.budget_exhausted() {
                    return None;
                }
                let Some(name) = obj_to_string(name_obj) else {
                    continue;
                };
                if let Some(format) = DeclaredFormat::from_attachment_name(&name) {
                    let spec = self.resolve_dict(spec_obj)?;
                    if let Some(xml) = self.read_filespec_stream(spec) {
                        return Some((format, xml));
                    }
                }
            }
        }

        if let Ok(kids) = node.get(b"Kids").and_then(|o| o.as_array()) {
            for kid in kids {
                let Some(kid_dict) = self.resolve_dict(kid) else {
                    continue;
                };
                if let Some(hit) = self.walk_name_tree(kid_dict, depth + 1) {
                    return Some(hit);
                }
            }
        }

        None
    }

    /// Catalogue-level and per-page `/AF` associated-file arrays.
    fn via_af_arrays(&mut self) -> Option<(DeclaredFormat, Vec<u8>)> {
        let catalog = self.doc.catalog().ok()?;
        if let Ok(af) = catalog.get(b"AF") {
            if let Some(hit) = self.scan_af_array(af) {
                return Some(hit);
            }
        }

        for page_id in self.doc.get_pages().into_values() {
            let Ok(page) = self.doc.get_dictionary(page_id) else {
                continue;
            };
            if let Ok(af) = page.get(b"AF") {
                if let Some(hit) = self.scan_af_array(af) {
                    return Some(hit);
                }
            }
        }

        None
    }

    fn scan_af_array(&mut self, af: &'a Object) -> Option<(DeclaredFormat, Vec<u8>)> {
        let array = match af {
            Object::Reference(id) => self.doc.get_object(*id).ok()?.as_array().ok()?,
            other => other.as_array().ok()?,
        };

        for obj in array {
            if self.budget_exhausted() {
                return None;
            }
            let Some(spec) = self.resolve_dict(obj) else {
                continue;
            };
            let name = spec
                .get(b"UF")
                .or_else(|_| spec.get(b"F"))
                .ok()
                .and_then(obj_to_string)
                .unwrap_or_default();
            if let Some(format) = DeclaredFormat::from_attachment_name(&name) {
                if let Some(xml) = self.read_filespec_stream(spec) {
                    return Some((format, xml));
                }
            }
        }
        None
    }

    fn read_filespec_stream(&self, spec: &'a Dictionary) -> Option<Vec<u8>> {
        let ef = self.resolve_dict(spec.get(b"EF").ok()?)?;
        let stream_obj = match ef.get(b"F").or_else(|_| ef.get(b"UF")).ok()? {
            Object::Reference(id) => self.doc.get_object(*id).ok()?,
            other => other,
        };
        let stream = stream_obj.as_stream().ok()?;
        // decompressed_content() fails when there is no Filter (uncompressed
        // stream); fall back to the raw content in that case.
        Some(
            stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone()),
        )
    }

    fn resolve_dict(&self, obj: &'a Object) -> Option<&'a Dictionary> {
        match obj {
            Object::Reference(id) => self.doc.get_dictionary(*id).ok(),
            Object::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    fn budget_exhausted(&mut self) -> bool {
        self.filespecs_seen += 1;
        self.filespecs_seen > MAX_FILESPECS
    }
}

fn obj_to_string(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => String::from_utf8(bytes.clone()).ok(),
        _ => None,
    }
}
