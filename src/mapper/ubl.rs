//! UBL 2.1 Invoice / CreditNote → canonical model.
//!
//! The two UBL document kinds share almost everything; only the line element
//! and its quantity element differ (`InvoiceLine`/`InvoicedQuantity` vs.
//! `CreditNoteLine`/`CreditedQuantity`).

use roxmltree::{Document, Node};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::canonical::{
    BankDetails, CanonicalInvoice, DocumentType, InvoiceLine, MonetaryTotals, PostalAddress,
    TaxBreakdown, TradeParty, iban,
};
use crate::error::MappingError;
use crate::report::Finding;
use crate::xml::ns;
use crate::xml::xpath::{FieldReader, NsTable, field_path, find_all, require_node};

pub(crate) const UBL_NS: NsTable<'static> = &[("cbc", ns::CBC), ("cac", ns::CAC)];

/// Map a parsed UBL document of the given kind into the canonical record.
pub fn map_ubl(
    doc: &Document<'_>,
    document_type: DocumentType,
) -> Result<(CanonicalInvoice, Vec<Finding>), MappingError> {
    let (line_query, quantity_query) = match document_type {
        DocumentType::Invoice => ("cac:InvoiceLine", "cbc:InvoicedQuantity"),
        DocumentType::CreditNote => ("cac:CreditNoteLine", "cbc:CreditedQuantity"),
    };

    let mut r = FieldReader::new(UBL_NS);
    let root = doc.root_element();

    let number = r.require_text(root, "cbc:ID")?;
    let issue_date = r.require_date(root, "cbc:IssueDate")?;
    let currency = r.require_text(root, "cbc:DocumentCurrencyCode")?;
    let delivery_date = r.date(root, "cac:Delivery/cbc:ActualDeliveryDate");

    let seller = map_party(
        &mut r,
        require_node(root, "cac:AccountingSupplierParty/cac:Party", UBL_NS)?,
    )?;
    let buyer = map_party(
        &mut r,
        require_node(root, "cac:AccountingCustomerParty/cac:Party", UBL_NS)?,
    )?;

    let line_nodes = find_all(root, line_query, UBL_NS);
    if line_nodes.is_empty() {
        return Err(MappingError::missing(field_path(root, line_query)));
    }
    let mut lines = Vec::with_capacity(line_nodes.len());
    for node in line_nodes {
        lines.push(map_line(&mut r, node, quantity_query)?);
    }

    let monetary = require_node(root, "cac:LegalMonetaryTotal", UBL_NS)?;
    let totals = MonetaryTotals {
        line_extension: r.require_decimal(monetary, "cbc:LineExtensionAmount")?,
        tax_exclusive: r.require_decimal(monetary, "cbc:TaxExclusiveAmount")?,
        tax_inclusive: r.require_decimal(monetary, "cbc:TaxInclusiveAmount")?,
        payable: r.require_decimal(monetary, "cbc:PayableAmount")?,
        prepaid: r.decimal_or(monetary, "cbc:PrepaidAmount", Decimal::ZERO),
    };

    let mut tax_breakdown = Vec::new();
    for subtotal in find_all(root, "cac:TaxTotal/cac:TaxSubtotal", UBL_NS) {
        tax_breakdown.push(TaxBreakdown {
            category: r
                .text(subtotal, "cac:TaxCategory/cbc:ID")
                .unwrap_or_else(|| "S".into()),
            rate: r
                .decimal(subtotal, "cac:TaxCategory/cbc:Percent")
                .unwrap_or(Decimal::ZERO),
            base: r.require_decimal(subtotal, "cbc:TaxableAmount")?,
            tax_amount: r.require_decimal(subtotal, "cbc:TaxAmount")?,
        });
    }
    // The totals indicating tax without any TaxSubtotal is a defect, not an
    // empty breakdown.
    if tax_breakdown.is_empty()
        && (totals.tax_inclusive - totals.tax_exclusive).abs() > dec!(0.005)
    {
        return Err(MappingError::missing(field_path(
            root,
            "cac:TaxTotal/cac:TaxSubtotal",
        )));
    }

    let mut bank_details = Vec::new();
    for account in find_all(root, "cac:PaymentMeans/cac:PayeeFinancialAccount", UBL_NS) {
        if let Some(raw) = r.text(account, "cbc:ID") {
            bank_details.push(BankDetails {
                iban: iban::normalize(&raw),
                bic: r.text(account, "cac:FinancialInstitutionBranch/cbc:ID"),
            });
        }
    }

    let order_reference = r.text(root, "cac:OrderReference/cbc:ID");

    let invoice = CanonicalInvoice {
        number,
        document_type,
        issue_date,
        delivery_date,
        currency,
        seller,
        buyer,
        lines,
        totals,
        tax_breakdown,
        bank_details,
        order_reference,
    };
    Ok((invoice, r.into_warnings()))
}

fn map_party(r: &mut FieldReader<'_>, party: Node<'_, '_>) -> Result<TradeParty, MappingError> {
    // PartyName is preferred; the legal registration name is an accepted
    // fallback used by many Peppol senders.
    let name = r
        .text(party, "cac:PartyName/cbc:Name")
        .or_else(|| r.text(party, "cac:PartyLegalEntity/cbc:RegistrationName"))
        .ok_or_else(|| MappingError::missing(field_path(party, "cac:PartyName/cbc:Name")))?;

    let vat_id = find_all(party, "cac:PartyTaxScheme", UBL_NS)
        .into_iter()
        .find_map(|scheme| {
            let company_id = r.text(scheme, "cbc:CompanyID")?;
            match r.text(scheme, "cac:TaxScheme/cbc:ID").as_deref() {
                Some("VAT") | None => Some(company_id),
                Some(_) => None,
            }
        });

    let address = PostalAddress {
        street: r.text(party, "cac:PostalAddress/cbc:StreetName"),
        city: r.text(party, "cac:PostalAddress/cbc:CityName"),
        postal_code: r.text(party, "cac:PostalAddress/cbc:PostalZone"),
        country_code: r.require_text(
            party,
            "cac:PostalAddress/cac:Country/cbc:IdentificationCode",
        )?,
    };

    Ok(TradeParty {
        name,
        vat_id,
        address,
    })
}

fn map_line(
    r: &mut FieldReader<'_>,
    line: Node<'_, '_>,
    quantity_query: &str,
) -> Result<InvoiceLine, MappingError> {
    let id = r.require_text(line, "cbc:ID")?;
    let quantity = r.require_decimal(line, quantity_query)?;
    let net_amount = r.require_decimal(line, "cbc:LineExtensionAmount")?;
    let item_name = r.require_text(line, "cac:Item/cbc:Name")?;

    let item_id = r
        .text(line, "cac:Item/cac:StandardItemIdentification/cbc:ID")
        .or_else(|| r.text(line, "cac:Item/cac:SellersItemIdentification/cbc:ID"))
        .or_else(|| r.text(line, "cac:Item/cac:BuyersItemIdentification/cbc:ID"));

    let price = r.require_decimal(line, "cac:Price/cbc:PriceAmount")?;
    let base_query = "cac:Price/cbc:BaseQuantity";
    let base = r.decimal_or(line, base_query, Decimal::ONE);
    if base.is_zero() {
        return Err(MappingError::invalid(
            field_path(line, base_query),
            "price base quantity must not be zero",
        ));
    }
    let unit_price = price / base;

    let tax_category = r
        .text(line, "cac:Item/cac:ClassifiedTaxCategory/cbc:ID")
        .unwrap_or_else(|| "S".into());
    let tax_rate = r
        .decimal(line, "cac:Item/cac:ClassifiedTaxCategory/cbc:Percent")
        .unwrap_or(Decimal::ZERO);

    Ok(InvoiceLine {
        id,
        item_name,
        item_id,
        quantity,
        unit_price,
        net_amount,
        tax_category,
        tax_rate,
    })
}
