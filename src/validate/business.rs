//! Business validation: vendor lookup, duplicate check, bank verification,
//! and the three-way match against purchase-order data.
//!
//! All ERP access is read-only. Checks run in a fixed order; an unknown
//! vendor or a duplicate stops the stage early, a bank mismatch does not.
//! The terminal status falls out of the findings: any FATAL → INVALID, any
//! ERROR → MANUAL_REVIEW, warnings only → VALID.

use std::collections::HashSet;

use rust_decimal::Decimal;

use crate::canonical::CanonicalInvoice;
use crate::erp::{ErpAdapter, ErpError, ErpPurchaseOrder};
use crate::report::{Finding, Stage, ValidationStep, codes};
use crate::xml::write::format_decimal;

/// Run the business checks against the ERP store.
pub async fn validate_business(
    erp: &dyn ErpAdapter,
    invoice: &CanonicalInvoice,
    tolerance: Decimal,
) -> Result<ValidationStep, ErpError> {
    let mut findings = Vec::new();

    // 1. Vendor lookup by VAT id.
    let Some(vat_id) = invoice.seller.vat_id.as_deref() else {
        findings.push(Finding::error(
            codes::ERP_VENDOR_UNKNOWN,
            "invoice carries no seller VAT id; vendor cannot be resolved",
        ));
        return Ok(ValidationStep::from_findings(Stage::Business, findings));
    };
    let Some(vendor) = erp.find_vendor_by_vat_id(vat_id).await? else {
        findings.push(
            Finding::error(
                codes::ERP_VENDOR_UNKNOWN,
                "no vendor registered under the seller VAT id",
            )
            .with_value("seller.vat_id", vat_id),
        );
        return Ok(ValidationStep::from_findings(Stage::Business, findings));
    };
    if !vendor.active {
        findings.push(
            Finding::error(
                codes::ERP_VENDOR_UNKNOWN,
                format!("vendor {} is deactivated", vendor.vendor_id),
            )
            .with_value("vendor_id", vendor.vendor_id.clone()),
        );
        return Ok(ValidationStep::from_findings(Stage::Business, findings));
    }

    // 2. Duplicate check — exact, case-sensitive invoice number match.
    if erp
        .is_duplicate_invoice(&vendor.vendor_id, &invoice.number)
        .await?
    {
        findings.push(
            Finding::fatal(
                codes::ERP_DUPLICATE,
                format!(
                    "invoice number '{}' was already posted for vendor {}",
                    invoice.number, vendor.vendor_id
                ),
            )
            .with_value("invoice_number", invoice.number.clone()),
        );
        return Ok(ValidationStep::from_findings(Stage::Business, findings));
    }

    // 3. Bank verification: every IBAN on the invoice must be registered for
    // the vendor. A mismatch forces manual review but the PO check still runs.
    if !invoice.bank_details.is_empty() {
        let registered: HashSet<String> = erp
            .get_vendor_bank_details(&vendor.vendor_id)
            .await?
            .into_iter()
            .map(|b| b.iban)
            .collect();
        for details in &invoice.bank_details {
            if !registered.contains(&details.iban) {
                findings.push(
                    Finding::error(
                        codes::ERP_BANK_MISMATCH,
                        "payee IBAN is not registered for this vendor",
                    )
                    .with_value("payment.iban", details.iban.clone()),
                );
            }
        }
    }

    // 4./5. Purchase order retrieval and three-way match.
    match invoice.order_reference.as_deref() {
        None => {
            findings.push(Finding::info(
                codes::ERP_PO_NOT_REFERENCED,
                "no purchase order referenced; three-way match skipped",
            ));
        }
        Some(po_number) => {
            match erp.get_purchase_order(po_number, &vendor.vendor_id).await? {
                None => {
                    findings.push(
                        Finding::error(
                            codes::ERP_PO_UNKNOWN,
                            "referenced purchase order does not exist for this vendor",
                        )
                        .with_value("order_reference", po_number),
                    );
                }
                Some(po) if !po.open_for_invoicing => {
                    findings.push(
                        Finding::error(
                            codes::ERP_PO_CLOSED,
                            format!("purchase order {po_number} is closed for invoicing"),
                        )
                        .with_value("order_reference", po_number),
                    );
                }
                Some(po) => three_way_match(invoice, &po, tolerance, &mut findings),
            }
        }
    }

    Ok(ValidationStep::from_findings(Stage::Business, findings))
}

/// Header-amount and line-level agreement between invoice and PO.
fn three_way_match(
    invoice: &CanonicalInvoice,
    po: &ErpPurchaseOrder,
    tolerance: Decimal,
    findings: &mut Vec<Finding>,
) {
    let diff = invoice.totals.tax_exclusive - po.total_net;
    if diff > tolerance {
        findings.push(
            Finding::error(
                codes::ERP_PO_OVERBILL,
                format!(
                    "invoice net {} exceeds purchase order net {}",
                    format_decimal(invoice.totals.tax_exclusive),
                    format_decimal(po.total_net)
                ),
            )
            .with_value("tax_exclusive", format_decimal(invoice.totals.tax_exclusive)),
        );
    } else if diff < -tolerance {
        // Partial billing is permitted; flag it for the record.
        findings.push(
            Finding::warning(
                codes::ERP_PO_PARTIAL,
                format!(
                    "invoice net {} bills only part of purchase order net {}",
                    format_decimal(invoice.totals.tax_exclusive),
                    format_decimal(po.total_net)
                ),
            )
            .with_value("tax_exclusive", format_decimal(invoice.totals.tax_exclusive)),
        );
    }

    for line in &invoice.lines {
        let Some(item_id) = line.item_id.as_deref() else {
            findings.push(
                Finding::warning(
                    codes::ERP_LINE_UNIDENTIFIED,
                    "invoice line carries no article identifier; cannot be matched to the PO",
                )
                .with_location(format!("lines[id={}]", line.id)),
            );
            continue;
        };
        let Some(po_line) = po.lines.get(item_id) else {
            findings.push(
                Finding::error(
                    codes::ERP_LINE_UNKNOWN,
                    format!("article {item_id} does not appear on the purchase order"),
                )
                .with_location(format!("lines[id={}]", line.id))
                .with_value("item_id", item_id),
            );
            continue;
        };
        if line.quantity > po_line.quantity_open() {
            findings.push(
                Finding::error(
                    codes::ERP_QTY_EXCEEDED,
                    format!(
                        "invoiced quantity {} exceeds open quantity {} for article {item_id}",
                        format_decimal(line.quantity),
                        format_decimal(po_line.quantity_open())
                    ),
                )
                .with_location(format!("lines[id={}]", line.id))
                .with_value("quantity", format_decimal(line.quantity)),
            );
        }
    }
}
