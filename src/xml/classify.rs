//! Syntax classification by root element and namespace.

use roxmltree::Document;

use super::ns;
use crate::error::PipelineError;

/// The three XML syntaxes accepted under EN 16931.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlSyntax {
    UblInvoice,
    UblCreditNote,
    Cii,
}

impl XmlSyntax {
    pub fn as_str(&self) -> &'static str {
        match self {
            XmlSyntax::UblInvoice => "UBL-Invoice",
            XmlSyntax::UblCreditNote => "UBL-CreditNote",
            XmlSyntax::Cii => "CII",
        }
    }
}

impl std::fmt::Display for XmlSyntax {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a parsed document by its root element.
pub fn classify(doc: &Document<'_>) -> Result<XmlSyntax, PipelineError> {
    let root = doc.root_element();
    let local = root.tag_name().name();
    let namespace = root.tag_name().namespace().unwrap_or("");

    match (local, namespace) {
        ("Invoice", ns::UBL_INVOICE) => Ok(XmlSyntax::UblInvoice),
        ("CreditNote", ns::UBL_CREDIT_NOTE) => Ok(XmlSyntax::UblCreditNote),
        ("CrossIndustryInvoice", ns::RSM) => Ok(XmlSyntax::Cii),
        _ => Err(PipelineError::UnknownFormat(format!(
            "root element {{{namespace}}}{local} is not an EN 16931 invoice"
        ))),
    }
}
