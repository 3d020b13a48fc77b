//! CII (UN/CEFACT Cross Industry Invoice) → canonical model.

use roxmltree::{Document, Node};
use rust_decimal::Decimal;

use crate::canonical::{
    BankDetails, CanonicalInvoice, DocumentType, InvoiceLine, MonetaryTotals, PostalAddress,
    TaxBreakdown, TradeParty, iban,
};
use crate::error::MappingError;
use crate::report::Finding;
use crate::xml::ns;
use crate::xml::xpath::{FieldReader, NsTable, field_path, find_all, require_node};

pub(crate) const CII_NS: NsTable<'static> =
    &[("rsm", ns::RSM), ("ram", ns::RAM), ("udt", ns::UDT)];

/// GlobalID scheme identifiers accepted as article identifiers (GTIN/EAN).
const ITEM_ID_SCHEMES: &[&str] = &["0160", "0088"];

/// Map a parsed CII document into the canonical invoice record.
///
/// Returns the record plus the WARNING findings produced while recovering
/// optional fields. Any mandatory-field failure aborts with a
/// [`MappingError`] carrying the element path.
pub fn map_cii(doc: &Document<'_>) -> Result<(CanonicalInvoice, Vec<Finding>), MappingError> {
    let mut r = FieldReader::new(CII_NS);
    let root = doc.root_element();

    let exchanged = require_node(root, "rsm:ExchangedDocument", CII_NS)?;
    let number = r.require_text(exchanged, "ram:ID")?;
    let type_code = r.require_text(exchanged, "ram:TypeCode")?;
    let document_type = match type_code.as_str() {
        // 384 (corrected invoice) is billed like an ordinary invoice.
        "380" | "384" => DocumentType::Invoice,
        "381" => DocumentType::CreditNote,
        other => {
            return Err(MappingError::invalid(
                field_path(exchanged, "ram:TypeCode"),
                format!("unsupported document type code '{other}'"),
            ));
        }
    };
    let issue_date = r.require_date(exchanged, "ram:IssueDateTime/udt:DateTimeString")?;

    let transaction = require_node(root, "rsm:SupplyChainTradeTransaction", CII_NS)?;
    let settlement = require_node(transaction, "ram:ApplicableHeaderTradeSettlement", CII_NS)?;
    let currency = r.require_text(settlement, "ram:InvoiceCurrencyCode")?;

    let delivery_date = r.date(
        transaction,
        "ram:ApplicableHeaderTradeDelivery/ram:ActualDeliverySupplyChainEvent/ram:OccurrenceDateTime/udt:DateTimeString",
    );

    let agreement = require_node(transaction, "ram:ApplicableHeaderTradeAgreement", CII_NS)?;
    let seller = map_party(&mut r, require_node(agreement, "ram:SellerTradeParty", CII_NS)?)?;
    let buyer = map_party(&mut r, require_node(agreement, "ram:BuyerTradeParty", CII_NS)?)?;

    let line_nodes = find_all(transaction, "ram:IncludedSupplyChainTradeLineItem", CII_NS);
    if line_nodes.is_empty() {
        return Err(MappingError::missing(field_path(
            transaction,
            "ram:IncludedSupplyChainTradeLineItem",
        )));
    }
    let mut lines = Vec::with_capacity(line_nodes.len());
    for node in line_nodes {
        lines.push(map_line(&mut r, node)?);
    }

    let mut tax_breakdown = Vec::new();
    for tax in find_all(settlement, "ram:ApplicableTradeTax", CII_NS) {
        if r.text(tax, "ram:TypeCode").as_deref() != Some("VAT") {
            continue;
        }
        // Older ZUGFeRD profiles write ApplicablePercent instead.
        let rate = r
            .decimal(tax, "ram:RateApplicablePercent")
            .or_else(|| r.decimal(tax, "ram:ApplicablePercent"))
            .unwrap_or(Decimal::ZERO);
        tax_breakdown.push(TaxBreakdown {
            category: r.text(tax, "ram:CategoryCode").unwrap_or_else(|| "S".into()),
            rate,
            base: r.require_decimal(tax, "ram:BasisAmount")?,
            tax_amount: r.require_decimal(tax, "ram:CalculatedAmount")?,
        });
    }
    if tax_breakdown.is_empty() {
        return Err(MappingError::missing(field_path(
            settlement,
            "ram:ApplicableTradeTax",
        )));
    }

    let summation = require_node(
        settlement,
        "ram:SpecifiedTradeSettlementHeaderMonetarySummation",
        CII_NS,
    )?;
    let totals = MonetaryTotals {
        line_extension: r.require_decimal(summation, "ram:LineTotalAmount")?,
        tax_exclusive: r.require_decimal(summation, "ram:TaxBasisTotalAmount")?,
        tax_inclusive: r.require_decimal(summation, "ram:GrandTotalAmount")?,
        payable: r.require_decimal(summation, "ram:DuePayableAmount")?,
        prepaid: r.decimal_or(summation, "ram:TotalPrepaidAmount", Decimal::ZERO),
    };

    let mut bank_details = Vec::new();
    for means in find_all(settlement, "ram:SpecifiedTradeSettlementPaymentMeans", CII_NS) {
        if let Some(raw) = r.text(means, "ram:PayeePartyCreditorFinancialAccount/ram:IBANID") {
            bank_details.push(BankDetails {
                iban: iban::normalize(&raw),
                bic: r.text(means, "ram:PayeeSpecifiedCreditorFinancialInstitution/ram:BICID"),
            });
        }
    }

    let order_reference = r.text(
        agreement,
        "ram:BuyerOrderReferencedDocument/ram:IssuerAssignedID",
    );

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
    let name = r.require_text(party, "ram:Name")?;

    // VAT id lives in SpecifiedTaxRegistration with schemeID="VA"; "FC"
    // carries the national tax number, which the canonical model drops.
    let vat_id = find_all(party, "ram:SpecifiedTaxRegistration/ram:ID", CII_NS)
        .into_iter()
        .find(|n| n.attribute("schemeID") == Some("VA"))
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let address = PostalAddress {
        street: r.text(party, "ram:PostalTradeAddress/ram:LineOne"),
        city: r.text(party, "ram:PostalTradeAddress/ram:CityName"),
        postal_code: r.text(party, "ram:PostalTradeAddress/ram:PostcodeCode"),
        country_code: r.require_text(party, "ram:PostalTradeAddress/ram:CountryID")?,
    };

    Ok(TradeParty {
        name,
        vat_id,
        address,
    })
}

fn map_line(r: &mut FieldReader<'_>, line: Node<'_, '_>) -> Result<InvoiceLine, MappingError> {
    let id = r.require_text(line, "ram:AssociatedDocumentLineDocument/ram:LineID")?;
    let item_name = r.require_text(line, "ram:SpecifiedTradeProduct/ram:Name")?;

    let item_id = find_all(line, "ram:SpecifiedTradeProduct/ram:GlobalID", CII_NS)
        .into_iter()
        .find(|n| n.attribute("schemeID").is_some_and(|s| ITEM_ID_SCHEMES.contains(&s)))
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| r.text(line, "ram:SpecifiedTradeProduct/ram:SellerAssignedID"))
        .or_else(|| r.text(line, "ram:SpecifiedTradeProduct/ram:BuyerAssignedID"));

    let quantity = r.require_decimal(line, "ram:SpecifiedLineTradeDelivery/ram:BilledQuantity")?;
    let net_amount = r.require_decimal(
        line,
        "ram:SpecifiedLineTradeSettlement/ram:SpecifiedTradeSettlementLineMonetarySummation/ram:LineTotalAmount",
    )?;

    let charge = r.require_decimal(
        line,
        "ram:SpecifiedLineTradeAgreement/ram:NetPriceProductTradePrice/ram:ChargeAmount",
    )?;
    let basis_query = "ram:SpecifiedLineTradeAgreement/ram:NetPriceProductTradePrice/ram:BasisQuantity";
    let basis = r.decimal_or(line, basis_query, Decimal::ONE);
    if basis.is_zero() {
        return Err(MappingError::invalid(
            field_path(line, basis_query),
            "price basis quantity must not be zero",
        ));
    }
    let unit_price = charge / basis;

    let tax_category = r
        .text(line, "ram:SpecifiedLineTradeSettlement/ram:ApplicableTradeTax/ram:CategoryCode")
        .unwrap_or_else(|| "S".into());
    let tax_rate = r
        .decimal(
            line,
            "ram:SpecifiedLineTradeSettlement/ram:ApplicableTradeTax/ram:RateApplicablePercent",
        )
        .or_else(|| {
            r.decimal(
                line,
                "ram:SpecifiedLineTradeSettlement/ram:ApplicableTradeTax/ram:ApplicablePercent",
            )
        })
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
