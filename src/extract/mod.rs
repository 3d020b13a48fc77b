//! Format router: from a raw upload to normalised XML plus a format tag.
//!
//! Sniffs the carrier (`%PDF-` header vs. `<` after an optional BOM), pulls
//! the embedded CII document out of hybrid PDFs, and classifies the XML
//! syntax. An opaque PDF — structurally valid but without a recognised
//! invoice attachment — is routed, not rejected; the driver sends it to
//! manual review.

pub mod pdf;

use crate::error::PipelineError;
use crate::xml::{self, classify::XmlSyntax};

/// What the sender (or the attachment filename) claims the document to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredFormat {
    Ubl,
    Cii,
    Zugferd,
    Facturx,
    Xrechnung,
}

impl DeclaredFormat {
    /// Recognise a PDF attachment filename. `order-x.xml` (and everything
    /// else) is deliberately not an invoice attachment.
    pub fn from_attachment_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("factur-x.xml") {
            Some(DeclaredFormat::Facturx)
        } else if name.eq_ignore_ascii_case("zugferd-invoice.xml") {
            Some(DeclaredFormat::Zugferd)
        } else if name.eq_ignore_ascii_case("xrechnung.xml") {
            Some(DeclaredFormat::Xrechnung)
        } else {
            None
        }
    }

    /// Parse an upload MIME/format hint.
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.to_ascii_lowercase().as_str() {
            "ubl" | "application/vnd.ubl+xml" => Some(DeclaredFormat::Ubl),
            "cii" | "application/vnd.cii+xml" => Some(DeclaredFormat::Cii),
            "zugferd" => Some(DeclaredFormat::Zugferd),
            "facturx" | "factur-x" => Some(DeclaredFormat::Facturx),
            "xrechnung" => Some(DeclaredFormat::Xrechnung),
            _ => None,
        }
    }

    /// Whether the observed syntax is what this declaration promises.
    /// XRechnung ships in either syntax, so it never mismatches.
    pub fn matches(&self, syntax: XmlSyntax) -> bool {
        match self {
            DeclaredFormat::Ubl => {
                matches!(syntax, XmlSyntax::UblInvoice | XmlSyntax::UblCreditNote)
            }
            DeclaredFormat::Cii | DeclaredFormat::Zugferd | DeclaredFormat::Facturx => {
                syntax == XmlSyntax::Cii
            }
            DeclaredFormat::Xrechnung => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeclaredFormat::Ubl => "UBL",
            DeclaredFormat::Cii => "CII",
            DeclaredFormat::Zugferd => "ZUGFERD",
            DeclaredFormat::Facturx => "FACTURX",
            DeclaredFormat::Xrechnung => "XRECHNUNG",
        }
    }
}

impl std::fmt::Display for DeclaredFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the document arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carrier {
    Xml,
    Pdf,
}

/// Router output.
#[derive(Debug)]
pub enum RoutedDocument {
    /// PDF carrier without a recognisable embedded invoice.
    OpaquePdf,
    /// Normalised XML payload.
    Xml {
        carrier: Carrier,
        declared: Option<DeclaredFormat>,
        syntax: XmlSyntax,
        xml: Vec<u8>,
    },
}

/// Route a raw upload.
pub fn route(
    raw: &[u8],
    hint: Option<DeclaredFormat>,
) -> Result<RoutedDocument, PipelineError> {
    if raw.starts_with(b"%PDF-") {
        return match pdf::extract_invoice_xml(raw)? {
            None => Ok(RoutedDocument::OpaquePdf),
            Some((declared, xml_bytes)) => {
                let text = xml::decode(&xml_bytes)?;
                let doc = xml::parse(text)?;
                let syntax = xml::classify::classify(&doc)?;
                Ok(RoutedDocument::Xml {
                    carrier: Carrier::Pdf,
                    declared: Some(declared),
                    syntax,
                    xml: xml_bytes,
                })
            }
        };
    }

    if looks_like_xml(raw) {
        let text = xml::decode(raw)?;
        let doc = xml::parse(text)?;
        let syntax = xml::classify::classify(&doc)?;
        return Ok(RoutedDocument::Xml {
            carrier: Carrier::Xml,
            declared: hint,
            syntax,
            xml: raw.to_vec(),
        });
    }

    Err(PipelineError::UnsupportedCarrier(
        "payload is neither a PDF nor an XML document".into(),
    ))
}

/// `<` after an optional UTF-8 BOM and leading whitespace.
fn looks_like_xml(raw: &[u8]) -> bool {
    let raw = raw.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(raw);
    raw.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'<')
}
