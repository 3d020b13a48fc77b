mod common;

use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

use common::{CiiFixture, UblFixture};
use eingang::canonical::DocumentType;
use eingang::error::MappingKind;
use eingang::extract::DeclaredFormat;
use eingang::mapper::{map_cii, map_document, map_ubl, to_ubl_xml};
use eingang::report::{Severity, codes};
use eingang::xml::{self, classify::XmlSyntax};

#[test]
fn cii_happy_path_maps_all_fields() {
    let text = CiiFixture::default().render();
    let doc = xml::parse(&text).unwrap();
    let (invoice, warnings) = map_cii(&doc).unwrap();

    assert!(warnings.is_empty(), "{warnings:?}");
    assert_eq!(invoice.number, "R-TEST-2025-001");
    assert_eq!(invoice.document_type, DocumentType::Invoice);
    assert_eq!(invoice.issue_date.to_string(), "2025-01-15");
    assert_eq!(invoice.currency, "EUR");
    assert_eq!(invoice.seller.name, "ACME GmbH");
    assert_eq!(invoice.seller.vat_id.as_deref(), Some("DE123456789"));
    assert_eq!(invoice.seller.address.country_code, "DE");
    assert_eq!(invoice.buyer.name, "Kunde AG");

    assert_eq!(invoice.lines.len(), 1);
    let line = &invoice.lines[0];
    assert_eq!(line.id, "1");
    assert_eq!(line.item_id.as_deref(), Some("4012345678901"));
    assert_eq!(line.quantity, dec!(1.0));
    assert_eq!(line.unit_price, dec!(100.00));
    assert_eq!(line.net_amount, dec!(100.00));
    assert_eq!(line.tax_rate, dec!(19.00));

    assert_eq!(invoice.totals.line_extension, dec!(100.00));
    assert_eq!(invoice.totals.tax_exclusive, dec!(100.00));
    assert_eq!(invoice.totals.tax_inclusive, dec!(119.00));
    assert_eq!(invoice.totals.payable, dec!(119.00));

    assert_eq!(invoice.tax_breakdown.len(), 1);
    assert_eq!(invoice.tax_breakdown[0].rate, dec!(19.00));
    assert_eq!(invoice.tax_breakdown[0].tax_amount, dec!(19.00));

    assert_eq!(invoice.bank_details.len(), 1);
    assert_eq!(invoice.bank_details[0].iban, "DE89370400440532013000");

    assert!(invoice.check_invariants(dec!(0.02)).is_empty());
}

#[test]
fn ubl_happy_path_maps_all_fields() {
    let text = UblFixture::default().render();
    let doc = xml::parse(&text).unwrap();
    let (invoice, warnings) = map_ubl(&doc, DocumentType::Invoice).unwrap();

    assert!(warnings.is_empty(), "{warnings:?}");
    assert_eq!(invoice.number, "R-TEST-2025-001");
    assert_eq!(invoice.seller.name, "ACME GmbH");
    assert_eq!(invoice.seller.vat_id.as_deref(), Some("DE123456789"));
    assert_eq!(invoice.buyer.address.country_code, "DE");
    assert_eq!(invoice.lines.len(), 1);
    assert_eq!(invoice.lines[0].unit_price, dec!(100.00));
    assert_eq!(invoice.totals.payable, dec!(119.00));
    assert_eq!(invoice.bank_details[0].iban, "DE89370400440532013000");
    assert!(invoice.check_invariants(dec!(0.02)).is_empty());
}

#[test]
fn missing_cii_issue_date_names_the_field() {
    let text = CiiFixture {
        with_issue_date: false,
        ..CiiFixture::default()
    }
    .render();
    let doc = xml::parse(&text).unwrap();
    let err = map_cii(&doc).unwrap_err();

    assert_eq!(err.kind, MappingKind::MissingField);
    assert_eq!(err.field, "ExchangedDocument/IssueDateTime/DateTimeString");
}

#[test]
fn zero_base_quantity_is_an_invalid_value() {
    let text = UblFixture::default().render().replace(
        "<cac:Price><cbc:PriceAmount currencyID=\"EUR\">100.00</cbc:PriceAmount></cac:Price>",
        "<cac:Price><cbc:PriceAmount currencyID=\"EUR\">100.00</cbc:PriceAmount><cbc:BaseQuantity>0</cbc:BaseQuantity></cac:Price>",
    );
    let doc = xml::parse(&text).unwrap();
    let err = map_ubl(&doc, DocumentType::Invoice).unwrap_err();

    assert_eq!(err.kind, MappingKind::InvalidValue);
    assert!(err.field.ends_with("Price/BaseQuantity"), "{}", err.field);
}

#[test]
fn base_quantity_divides_the_unit_price() {
    // 100.00 per 10 pieces → unit price 10.
    let text = UblFixture::default().render().replace(
        "<cac:Price><cbc:PriceAmount currencyID=\"EUR\">100.00</cbc:PriceAmount></cac:Price>",
        "<cac:Price><cbc:PriceAmount currencyID=\"EUR\">100.00</cbc:PriceAmount><cbc:BaseQuantity>10</cbc:BaseQuantity></cac:Price>",
    );
    let doc = xml::parse(&text).unwrap();
    let (invoice, _) = map_ubl(&doc, DocumentType::Invoice).unwrap();
    assert_eq!(invoice.lines[0].unit_price, dec!(10));
}

#[test]
fn empty_line_set_is_a_missing_field() {
    let fixture = UblFixture::default().render();
    let start = fixture.find("<cac:InvoiceLine>").unwrap();
    let end = fixture.find("</cac:InvoiceLine>").unwrap() + "</cac:InvoiceLine>".len();
    let text = format!("{}{}", &fixture[..start], &fixture[end..]);

    let doc = xml::parse(&text).unwrap();
    let err = map_ubl(&doc, DocumentType::Invoice).unwrap_err();
    assert_eq!(err.kind, MappingKind::MissingField);
    assert_eq!(err.field, "InvoiceLine");
}

#[test]
fn tax_indicated_but_no_subtotal_fails() {
    let fixture = UblFixture::default().render();
    let start = fixture.find("<cac:TaxTotal>").unwrap();
    let end = fixture.find("</cac:TaxTotal>").unwrap() + "</cac:TaxTotal>".len();
    let text = format!("{}{}", &fixture[..start], &fixture[end..]);

    let doc = xml::parse(&text).unwrap();
    let err = map_ubl(&doc, DocumentType::Invoice).unwrap_err();
    assert_eq!(err.kind, MappingKind::MissingField);
    assert_eq!(err.field, "TaxTotal/TaxSubtotal");
}

#[test]
fn credit_note_uses_credited_quantity() {
    let text = UblFixture::default()
        .render()
        .replace(
            &format!("<Invoice xmlns=\"{}\"", common::UBL_INVOICE_NS),
            "<CreditNote xmlns=\"urn:oasis:names:specification:ubl:schema:xsd:CreditNote-2\"",
        )
        .replace("</Invoice>", "</CreditNote>")
        .replace("cac:InvoiceLine", "cac:CreditNoteLine")
        .replace("cbc:InvoicedQuantity", "cbc:CreditedQuantity")
        .replace(
            "<cbc:InvoiceTypeCode>380</cbc:InvoiceTypeCode>",
            "<cbc:CreditNoteTypeCode>381</cbc:CreditNoteTypeCode>",
        );
    let doc = xml::parse(&text).unwrap();
    let (invoice, _) = map_ubl(&doc, DocumentType::CreditNote).unwrap();
    assert_eq!(invoice.document_type, DocumentType::CreditNote);
    assert_eq!(invoice.lines[0].quantity, dec!(1.0));
}

#[test]
fn orchestrator_turns_mapping_errors_into_fatal_findings() {
    let text = CiiFixture {
        with_issue_date: false,
        ..CiiFixture::default()
    }
    .render();
    let doc = xml::parse(&text).unwrap();
    let mapped = map_document(&doc, XmlSyntax::Cii, Some(DeclaredFormat::Facturx));

    assert!(mapped.invoice.is_none());
    let fatal: Vec<_> = mapped
        .findings
        .iter()
        .filter(|f| f.severity == Severity::Fatal)
        .collect();
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].code, codes::MAP_FIELD_MISSING);
    assert_eq!(
        fatal[0].location.as_deref(),
        Some("ExchangedDocument/IssueDateTime/DateTimeString")
    );
}

#[test]
fn declared_format_mismatch_is_a_warning_only() {
    let text = CiiFixture::default().render();
    let doc = xml::parse(&text).unwrap();
    let mapped = map_document(&doc, XmlSyntax::Cii, Some(DeclaredFormat::Ubl));

    assert!(mapped.invoice.is_some());
    assert!(
        mapped
            .findings
            .iter()
            .any(|f| f.code == codes::MAP_SYNTAX_MISMATCH && f.severity == Severity::Warning)
    );
}

#[test]
fn bad_iban_checksum_is_an_error_finding() {
    let text = UblFixture {
        iban: "DE88370400440532013000".into(), // one flipped check digit
        ..UblFixture::default()
    }
    .render();
    let doc = xml::parse(&text).unwrap();
    let mapped = map_document(&doc, XmlSyntax::UblInvoice, None);

    assert!(mapped.invoice.is_some());
    assert!(
        mapped
            .findings
            .iter()
            .any(|f| f.code == codes::MAP_INVALID_VALUE
                && f.severity == Severity::Error
                && f.value.as_deref() == Some("DE88370400440532013000"))
    );
}

#[test]
fn ubl_round_trip_preserves_mandatory_fields_and_totals() {
    let text = CiiFixture::default().render();
    let doc = xml::parse(&text).unwrap();
    let (original, _) = map_cii(&doc).unwrap();

    let serialised = to_ubl_xml(&original).unwrap();
    let doc = xml::parse(&serialised).unwrap();
    assert_eq!(
        eingang::xml::classify::classify(&doc).unwrap(),
        XmlSyntax::UblInvoice
    );
    let (round_tripped, warnings) = map_ubl(&doc, DocumentType::Invoice).unwrap();

    assert!(warnings.is_empty(), "{warnings:?}");
    assert_eq!(round_tripped.number, original.number);
    assert_eq!(round_tripped.issue_date, original.issue_date);
    assert_eq!(round_tripped.currency, original.currency);
    assert_eq!(round_tripped.seller.name, original.seller.name);
    assert_eq!(round_tripped.seller.vat_id, original.seller.vat_id);
    assert_eq!(round_tripped.buyer.name, original.buyer.name);
    assert_eq!(round_tripped.lines.len(), original.lines.len());
    assert_eq!(round_tripped.bank_details, original.bank_details);

    let tolerance = dec!(0.02);
    assert!(
        (round_tripped.totals.line_extension - original.totals.line_extension).abs() <= tolerance
    );
    assert!((round_tripped.totals.tax_exclusive - original.totals.tax_exclusive).abs() <= tolerance);
    assert!((round_tripped.totals.tax_inclusive - original.totals.tax_inclusive).abs() <= tolerance);
    assert!((round_tripped.totals.payable - original.totals.payable).abs() <= tolerance);
}
