//! XML plumbing: safe parsing, namespace tables, path queries, generation.
//!
//! All reading goes through [`parse`], which keeps DTD processing disabled —
//! external entities, external DTD subsets, and schema resolution are never
//! touched (XXE defence). Writing uses a thin wrapper over `quick-xml`.

pub mod classify;
pub mod write;
pub mod xpath;

use crate::error::PipelineError;

/// Namespace URIs of the three EN 16931 syntaxes, plus SVRL.
pub mod ns {
    /// UBL 2.1 Invoice document namespace.
    pub const UBL_INVOICE: &str = "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2";
    /// UBL 2.1 CreditNote document namespace.
    pub const UBL_CREDIT_NOTE: &str = "urn:oasis:names:specification:ubl:schema:xsd:CreditNote-2";
    pub const CAC: &str =
        "urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2";
    pub const CBC: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";

    /// CII root namespace.
    pub const RSM: &str = "urn:un:unece:uncefact:data:standard:CrossIndustryInvoice:100";
    pub const RAM: &str =
        "urn:un:unece:uncefact:data:standard:ReusableAggregateBusinessInformationEntity:100";
    pub const UDT: &str = "urn:un:unece:uncefact:data:standard:UnqualifiedDataType:100";

    /// Schematron Validation Report Language.
    pub const SVRL: &str = "http://purl.oclc.org/dsdl/svrl";
}

/// Decode an XML byte stream to text: strip a UTF-8 BOM, require valid UTF-8.
pub fn decode(bytes: &[u8]) -> Result<&str, PipelineError> {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    std::str::from_utf8(bytes).map_err(|e| PipelineError::Xml(format!("not valid UTF-8: {e}")))
}

/// Parse XML with entity expansion and DTD loading disabled.
pub fn parse(text: &str) -> Result<roxmltree::Document<'_>, PipelineError> {
    let mut options = roxmltree::ParsingOptions::default();
    options.allow_dtd = false;
    roxmltree::Document::parse_with_options(text, options)
        .map_err(|e| PipelineError::Xml(e.to_string()))
}
