//! Canonical model → normalised UBL 2.1 document.
//!
//! The inverse of [`map_ubl`](super::map_ubl) for the fields the canonical
//! model carries. Used to emit a normalised rendition of accepted invoices
//! and to exercise the mapping round-trip in tests.

use crate::canonical::{CanonicalInvoice, DocumentType};
use crate::error::PipelineError;
use crate::xml::ns;
use crate::xml::write::{XmlWriter, format_decimal};

/// Serialise a canonical invoice as UBL.
pub fn to_ubl_xml(invoice: &CanonicalInvoice) -> Result<String, PipelineError> {
    let (root, root_ns, type_code_el, line_el, qty_el) = match invoice.document_type {
        DocumentType::Invoice => (
            "Invoice",
            ns::UBL_INVOICE,
            "cbc:InvoiceTypeCode",
            "cac:InvoiceLine",
            "cbc:InvoicedQuantity",
        ),
        DocumentType::CreditNote => (
            "CreditNote",
            ns::UBL_CREDIT_NOTE,
            "cbc:CreditNoteTypeCode",
            "cac:CreditNoteLine",
            "cbc:CreditedQuantity",
        ),
    };
    let type_code = match invoice.document_type {
        DocumentType::Invoice => "380",
        DocumentType::CreditNote => "381",
    };
    let currency = invoice.currency.as_str();

    let mut w = XmlWriter::new()?;
    w.start_element_with_attrs(
        root,
        &[
            ("xmlns", root_ns),
            ("xmlns:cac", ns::CAC),
            ("xmlns:cbc", ns::CBC),
        ],
    )?;

    w.text_element("cbc:ID", &invoice.number)?;
    w.text_element("cbc:IssueDate", &invoice.issue_date.format("%Y-%m-%d").to_string())?;
    w.text_element(type_code_el, type_code)?;
    w.text_element("cbc:DocumentCurrencyCode", currency)?;

    if let Some(order_ref) = &invoice.order_reference {
        w.start_element("cac:OrderReference")?;
        w.text_element("cbc:ID", order_ref)?;
        w.end_element("cac:OrderReference")?;
    }

    write_party(&mut w, "cac:AccountingSupplierParty", &invoice.seller)?;
    write_party(&mut w, "cac:AccountingCustomerParty", &invoice.buyer)?;

    if let Some(delivery) = &invoice.delivery_date {
        w.start_element("cac:Delivery")?;
        w.text_element("cbc:ActualDeliveryDate", &delivery.format("%Y-%m-%d").to_string())?;
        w.end_element("cac:Delivery")?;
    }

    for details in &invoice.bank_details {
        w.start_element("cac:PaymentMeans")?;
        w.text_element("cbc:PaymentMeansCode", "30")?;
        w.start_element("cac:PayeeFinancialAccount")?;
        w.text_element("cbc:ID", &details.iban)?;
        if let Some(bic) = &details.bic {
            w.start_element("cac:FinancialInstitutionBranch")?;
            w.text_element("cbc:ID", bic)?;
            w.end_element("cac:FinancialInstitutionBranch")?;
        }
        w.end_element("cac:PayeeFinancialAccount")?;
        w.end_element("cac:PaymentMeans")?;
    }

    let tax_total: rust_decimal::Decimal =
        invoice.tax_breakdown.iter().map(|b| b.tax_amount).sum();
    w.start_element("cac:TaxTotal")?;
    w.amount_element("cbc:TaxAmount", tax_total, currency)?;
    for breakdown in &invoice.tax_breakdown {
        w.start_element("cac:TaxSubtotal")?;
        w.amount_element("cbc:TaxableAmount", breakdown.base, currency)?;
        w.amount_element("cbc:TaxAmount", breakdown.tax_amount, currency)?;
        w.start_element("cac:TaxCategory")?;
        w.text_element("cbc:ID", &breakdown.category)?;
        w.text_element("cbc:Percent", &format_decimal(breakdown.rate))?;
        w.start_element("cac:TaxScheme")?;
        w.text_element("cbc:ID", "VAT")?;
        w.end_element("cac:TaxScheme")?;
        w.end_element("cac:TaxCategory")?;
        w.end_element("cac:TaxSubtotal")?;
    }
    w.end_element("cac:TaxTotal")?;

    w.start_element("cac:LegalMonetaryTotal")?;
    w.amount_element("cbc:LineExtensionAmount", invoice.totals.line_extension, currency)?;
    w.amount_element("cbc:TaxExclusiveAmount", invoice.totals.tax_exclusive, currency)?;
    w.amount_element("cbc:TaxInclusiveAmount", invoice.totals.tax_inclusive, currency)?;
    if !invoice.totals.prepaid.is_zero() {
        w.amount_element("cbc:PrepaidAmount", invoice.totals.prepaid, currency)?;
    }
    w.amount_element("cbc:PayableAmount", invoice.totals.payable, currency)?;
    w.end_element("cac:LegalMonetaryTotal")?;

    for line in &invoice.lines {
        w.start_element(line_el)?;
        w.text_element("cbc:ID", &line.id)?;
        w.text_element_with_attrs(
            qty_el,
            &format_decimal(line.quantity),
            &[("unitCode", "C62")],
        )?;
        w.amount_element("cbc:LineExtensionAmount", line.net_amount, currency)?;
        w.start_element("cac:Item")?;
        w.text_element("cbc:Name", &line.item_name)?;
        if let Some(item_id) = &line.item_id {
            w.start_element("cac:StandardItemIdentification")?;
            w.text_element_with_attrs("cbc:ID", item_id, &[("schemeID", "0160")])?;
            w.end_element("cac:StandardItemIdentification")?;
        }
        w.start_element("cac:ClassifiedTaxCategory")?;
        w.text_element("cbc:ID", &line.tax_category)?;
        w.text_element("cbc:Percent", &format_decimal(line.tax_rate))?;
        w.start_element("cac:TaxScheme")?;
        w.text_element("cbc:ID", "VAT")?;
        w.end_element("cac:TaxScheme")?;
        w.end_element("cac:ClassifiedTaxCategory")?;
        w.end_element("cac:Item")?;
        w.start_element("cac:Price")?;
        w.amount_element("cbc:PriceAmount", line.unit_price, currency)?;
        w.end_element("cac:Price")?;
        w.end_element(line_el)?;
    }

    w.end_element(root)?;
    w.into_string()
}

fn write_party(
    w: &mut XmlWriter,
    element: &str,
    party: &crate::canonical::TradeParty,
) -> Result<(), PipelineError> {
    w.start_element(element)?;
    w.start_element("cac:Party")?;
    w.start_element("cac:PartyName")?;
    w.text_element("cbc:Name", &party.name)?;
    w.end_element("cac:PartyName")?;
    w.start_element("cac:PostalAddress")?;
    if let Some(street) = &party.address.street {
        w.text_element("cbc:StreetName", street)?;
    }
    if let Some(city) = &party.address.city {
        w.text_element("cbc:CityName", city)?;
    }
    if let Some(postal) = &party.address.postal_code {
        w.text_element("cbc:PostalZone", postal)?;
    }
    w.start_element("cac:Country")?;
    w.text_element("cbc:IdentificationCode", &party.address.country_code)?;
    w.end_element("cac:Country")?;
    w.end_element("cac:PostalAddress")?;
    if let Some(vat_id) = &party.vat_id {
        w.start_element("cac:PartyTaxScheme")?;
        w.text_element("cbc:CompanyID", vat_id)?;
        w.start_element("cac:TaxScheme")?;
        w.text_element("cbc:ID", "VAT")?;
        w.end_element("cac:TaxScheme")?;
        w.end_element("cac:PartyTaxScheme")?;
    }
    w.start_element("cac:PartyLegalEntity")?;
    w.text_element("cbc:RegistrationName", &party.name)?;
    w.end_element("cac:PartyLegalEntity")?;
    w.end_element("cac:Party")?;
    w.end_element(element)?;
    Ok(())
}
