//! Arithmetic validation: recompute the totals chain from the canonical
//! record and compare against the declared amounts.
//!
//! All comparisons use an absolute tolerance (0.02 currency units by
//! default). Tax recomputation uses banker's rounding; everything stays in
//! [`Decimal`] — floating point never touches the totals chain.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::canonical::{CanonicalInvoice, round_half_even};
use crate::report::{Finding, Stage, ValidationStep, codes};
use crate::xml::write::format_decimal;

/// Run the arithmetic checks.
pub fn validate_arithmetic(invoice: &CanonicalInvoice, tolerance: Decimal) -> ValidationStep {
    let mut findings = Vec::new();
    let totals = &invoice.totals;

    // 1. Line net sum vs. declared line extension total.
    let line_sum: Decimal = invoice.lines.iter().map(|l| l.net_amount).sum();
    if (totals.line_extension - line_sum).abs() > tolerance {
        findings.push(
            Finding::error(
                codes::CALC_TOTAL_MISMATCH,
                format!(
                    "declared line extension total {} does not match sum of line nets {}",
                    format_decimal(totals.line_extension),
                    format_decimal(line_sum)
                ),
            )
            .with_value("line_extension", format_decimal(totals.line_extension)),
        );
    }

    // 2. Per-breakdown tax recomputation.
    for (i, breakdown) in invoice.tax_breakdown.iter().enumerate() {
        let expected = round_half_even(breakdown.base * breakdown.rate / dec!(100), 2);
        if (breakdown.tax_amount - expected).abs() > tolerance {
            findings.push(
                Finding::error(
                    codes::CALC_TAX_MISMATCH,
                    format!(
                        "tax amount {} for category {} at {} % does not match recomputed {}",
                        format_decimal(breakdown.tax_amount),
                        breakdown.category,
                        format_decimal(breakdown.rate),
                        format_decimal(expected)
                    ),
                )
                .with_location(format!("tax_breakdown[{i}]"))
                .with_value("tax_amount", format_decimal(breakdown.tax_amount)),
            );
        }
    }

    // 3. Tax sum vs. inclusive/exclusive difference.
    let tax_sum: Decimal = invoice.tax_breakdown.iter().map(|b| b.tax_amount).sum();
    let declared_tax = totals.tax_inclusive - totals.tax_exclusive;
    if (declared_tax - tax_sum).abs() > tolerance {
        findings.push(
            Finding::error(
                codes::CALC_TAX_MISMATCH,
                format!(
                    "tax inclusive minus tax exclusive is {} but the tax breakdown sums to {}",
                    format_decimal(declared_tax),
                    format_decimal(tax_sum)
                ),
            )
            .with_value("tax_total", format_decimal(tax_sum)),
        );
    }

    // 4. Payable = inclusive − prepaid.
    let expected_payable = totals.tax_inclusive - totals.prepaid;
    if (totals.payable - expected_payable).abs() > tolerance {
        findings.push(
            Finding::error(
                codes::CALC_PAYABLE_MISMATCH,
                format!(
                    "payable {} does not match tax inclusive {} minus prepaid {}",
                    format_decimal(totals.payable),
                    format_decimal(totals.tax_inclusive),
                    format_decimal(totals.prepaid)
                ),
            )
            .with_value("payable", format_decimal(totals.payable)),
        );
    }

    ValidationStep::from_findings(Stage::Arithmetic, findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{
        DocumentType, InvoiceLine, MonetaryTotals, PostalAddress, TaxBreakdown, TradeParty,
    };
    use crate::report::StepOutcome;
    use chrono::NaiveDate;

    fn invoice(totals: MonetaryTotals, tax: Vec<TaxBreakdown>) -> CanonicalInvoice {
        CanonicalInvoice {
            number: "R-1".into(),
            document_type: DocumentType::Invoice,
            issue_date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            delivery_date: None,
            currency: "EUR".into(),
            seller: TradeParty {
                name: "S".into(),
                vat_id: None,
                address: PostalAddress {
                    country_code: "DE".into(),
                    ..Default::default()
                },
            },
            buyer: TradeParty {
                name: "B".into(),
                vat_id: None,
                address: PostalAddress {
                    country_code: "DE".into(),
                    ..Default::default()
                },
            },
            lines: vec![InvoiceLine {
                id: "1".into(),
                item_name: "Widget".into(),
                item_id: None,
                quantity: dec!(1),
                unit_price: dec!(100),
                net_amount: dec!(100.00),
                tax_category: "S".into(),
                tax_rate: dec!(19),
            }],
            totals,
            tax_breakdown: tax,
            bank_details: vec![],
            order_reference: None,
        }
    }

    fn standard_tax() -> Vec<TaxBreakdown> {
        vec![TaxBreakdown {
            category: "S".into(),
            rate: dec!(19),
            base: dec!(100.00),
            tax_amount: dec!(19.00),
        }]
    }

    #[test]
    fn consistent_invoice_passes() {
        let inv = invoice(
            MonetaryTotals {
                line_extension: dec!(100.00),
                tax_exclusive: dec!(100.00),
                tax_inclusive: dec!(119.00),
                payable: dec!(119.00),
                prepaid: Decimal::ZERO,
            },
            standard_tax(),
        );
        let step = validate_arithmetic(&inv, dec!(0.02));
        assert_eq!(step.outcome, StepOutcome::Success, "{:?}", step.findings);
    }

    #[test]
    fn one_cent_rounding_is_tolerated() {
        let inv = invoice(
            MonetaryTotals {
                line_extension: dec!(100.01),
                tax_exclusive: dec!(100.00),
                tax_inclusive: dec!(119.00),
                payable: dec!(119.00),
                prepaid: Decimal::ZERO,
            },
            standard_tax(),
        );
        let step = validate_arithmetic(&inv, dec!(0.02));
        assert_eq!(step.outcome, StepOutcome::Success);
    }

    #[test]
    fn inflated_inclusive_total_yields_tax_and_payable_mismatch() {
        // Declared inclusive 120.00 with payable 119.00: the breakdown no
        // longer explains the inclusive amount, and payable disagrees too.
        let inv = invoice(
            MonetaryTotals {
                line_extension: dec!(100.00),
                tax_exclusive: dec!(100.00),
                tax_inclusive: dec!(120.00),
                payable: dec!(119.00),
                prepaid: Decimal::ZERO,
            },
            standard_tax(),
        );
        let step = validate_arithmetic(&inv, dec!(0.02));
        assert_eq!(step.outcome, StepOutcome::Errors);
        let codes_seen: Vec<&str> = step.findings.iter().map(|f| f.code.as_str()).collect();
        assert!(codes_seen.contains(&codes::CALC_TAX_MISMATCH));
        assert!(codes_seen.contains(&codes::CALC_PAYABLE_MISMATCH));
    }

    #[test]
    fn wrong_breakdown_amount_is_flagged() {
        let inv = invoice(
            MonetaryTotals {
                line_extension: dec!(100.00),
                tax_exclusive: dec!(100.00),
                tax_inclusive: dec!(118.00),
                payable: dec!(118.00),
                prepaid: Decimal::ZERO,
            },
            vec![TaxBreakdown {
                category: "S".into(),
                rate: dec!(19),
                base: dec!(100.00),
                tax_amount: dec!(18.00),
            }],
        );
        let step = validate_arithmetic(&inv, dec!(0.02));
        assert!(
            step.findings
                .iter()
                .any(|f| f.code == codes::CALC_TAX_MISMATCH
                    && f.location.as_deref() == Some("tax_breakdown[0]"))
        );
    }

    #[test]
    fn prepaid_feeds_the_payable_check() {
        let inv = invoice(
            MonetaryTotals {
                line_extension: dec!(100.00),
                tax_exclusive: dec!(100.00),
                tax_inclusive: dec!(119.00),
                payable: dec!(100.00),
                prepaid: dec!(19.00),
            },
            standard_tax(),
        );
        let step = validate_arithmetic(&inv, dec!(0.02));
        assert_eq!(step.outcome, StepOutcome::Success, "{:?}", step.findings);
    }
}
