//! Mapper orchestration: syntax dispatch, declared-vs-observed cross-check,
//! and translation of mapper faults into structured findings.
//!
//! Each mapper is a free-standing procedure over the parsed tree; there is no
//! shared base machinery beyond the XPath toolkit. The orchestrator is the
//! only place that turns a [`MappingError`] into a `FATAL` finding.

pub mod cii;
pub mod ubl;
pub mod ubl_write;

pub use cii::map_cii;
pub use ubl::map_ubl;
pub use ubl_write::to_ubl_xml;

use roxmltree::Document;

use crate::canonical::{CanonicalInvoice, DocumentType, iban, is_known_vat_prefix};
use crate::error::MappingKind;
use crate::extract::DeclaredFormat;
use crate::report::{Finding, codes};
use crate::xml::classify::XmlSyntax;

/// Orchestrator output: either a canonical record plus advisory findings, or
/// findings alone with at least one `FATAL` entry.
#[derive(Debug)]
pub struct MappedDocument {
    pub invoice: Option<CanonicalInvoice>,
    pub findings: Vec<Finding>,
}

/// Dispatch on the observed syntax and normalise the document.
///
/// When the declared format disagrees with the observed syntax, a WARNING is
/// emitted and mapping proceeds with the observed syntax.
pub fn map_document(
    doc: &Document<'_>,
    syntax: XmlSyntax,
    declared: Option<DeclaredFormat>,
) -> MappedDocument {
    let mut findings = Vec::new();

    if let Some(declared) = declared {
        if !declared.matches(syntax) {
            findings.push(Finding::warning(
                codes::MAP_SYNTAX_MISMATCH,
                format!(
                    "declared format {declared} does not match observed syntax {syntax}; \
                     proceeding with the observed syntax"
                ),
            ));
        }
    }

    let mapped = match syntax {
        XmlSyntax::Cii => map_cii(doc),
        XmlSyntax::UblInvoice => map_ubl(doc, DocumentType::Invoice),
        XmlSyntax::UblCreditNote => map_ubl(doc, DocumentType::CreditNote),
    };

    match mapped {
        Ok((invoice, mut warnings)) => {
            findings.append(&mut warnings);
            check_vat_prefixes(&invoice, &mut findings);
            check_ibans(&invoice, &mut findings);
            MappedDocument {
                invoice: Some(invoice),
                findings,
            }
        }
        Err(e) => {
            let code = match e.kind {
                MappingKind::MissingField => codes::MAP_FIELD_MISSING,
                MappingKind::InvalidValue => codes::MAP_INVALID_VALUE,
            };
            findings.push(
                Finding::fatal(code, e.message.clone()).with_location(e.field.clone()),
            );
            MappedDocument {
                invoice: None,
                findings,
            }
        }
    }
}

/// Unknown VAT-id country prefix is suspicious but not fatal.
fn check_vat_prefixes(invoice: &CanonicalInvoice, findings: &mut Vec<Finding>) {
    for (who, party) in [("seller", &invoice.seller), ("buyer", &invoice.buyer)] {
        let Some(vat_id) = &party.vat_id else { continue };
        let prefix_known = vat_id.get(..2).is_some_and(|prefix| {
            prefix.chars().all(|c| c.is_ascii_uppercase()) && is_known_vat_prefix(prefix)
        });
        if !prefix_known {
            findings.push(
                Finding::warning(
                    codes::MAP_INVALID_VALUE,
                    format!("{who} VAT id does not start with a known country prefix"),
                )
                .with_value(format!("{who}.vat_id"), vat_id.clone()),
            );
        }
    }
}

/// Checksum failures are errors; a valid checksum under an unknown country
/// prefix is a warning only.
fn check_ibans(invoice: &CanonicalInvoice, findings: &mut Vec<Finding>) {
    for details in &invoice.bank_details {
        match iban::check(&details.iban) {
            iban::IbanCheck::Valid => {}
            iban::IbanCheck::UnknownCountry => {
                findings.push(
                    Finding::warning(
                        codes::MAP_INVALID_VALUE,
                        "IBAN country prefix is not a known ISO 3166 code",
                    )
                    .with_value("payment.iban", details.iban.clone()),
                );
            }
            iban::IbanCheck::InvalidFormat | iban::IbanCheck::InvalidChecksum => {
                findings.push(
                    Finding::error(codes::MAP_INVALID_VALUE, "IBAN fails validation")
                        .with_value("payment.iban", details.iban.clone()),
                );
            }
        }
    }
}
