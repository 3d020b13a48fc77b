//! Canonical invoice model — the single normalised target of both mappers.
//!
//! Instances are ephemeral: they live for one processing run and feed the
//! arithmetic and business validators. All monetary amounts are
//! [`Decimal`]s with two fractional digits at rest; intermediate computation
//! may carry more precision.

mod codes;
pub mod iban;

pub use codes::{is_known_country_code, is_known_currency_code, is_known_vat_prefix};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// UNTDID 1001, reduced to the two document kinds the pipeline accepts.
/// Type code 384 (corrected invoice) maps onto `Invoice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    Invoice,
    CreditNote,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "Invoice",
            DocumentType::CreditNote => "CreditNote",
        }
    }
}

/// Seller or buyer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeParty {
    pub name: String,
    /// VAT identifier including the two-letter country prefix, e.g. "DE123456789".
    pub vat_id: Option<String>,
    pub address: PostalAddress,
}

/// Postal address; only the country code is mandatory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostalAddress {
    pub street: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    /// ISO 3166-1 alpha-2.
    pub country_code: String,
}

/// One invoice line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: String,
    pub item_name: String,
    /// Article identifier (HAN/EAN/GTIN) used to join against PO lines.
    pub item_id: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub net_amount: Decimal,
    /// UNTDID 5305 category code ("S", "Z", "AE", ...).
    pub tax_category: String,
    /// Percentage, e.g. 19 for 19 %.
    pub tax_rate: Decimal,
}

/// Document totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonetaryTotals {
    /// Sum of line net amounts.
    pub line_extension: Decimal,
    pub tax_exclusive: Decimal,
    pub tax_inclusive: Decimal,
    pub payable: Decimal,
    /// Prepaid amount; zero when the document carries none.
    pub prepaid: Decimal,
}

/// VAT breakdown per category/rate combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxBreakdown {
    pub category: String,
    pub rate: Decimal,
    pub base: Decimal,
    pub tax_amount: Decimal,
}

/// Payee bank account. The IBAN is normalised (uppercase, no spaces).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankDetails {
    pub iban: String,
    pub bic: Option<String>,
}

/// The normalised invoice record produced by the mappers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalInvoice {
    pub number: String,
    pub document_type: DocumentType,
    pub issue_date: NaiveDate,
    pub delivery_date: Option<NaiveDate>,
    /// ISO 4217.
    pub currency: String,
    pub seller: TradeParty,
    pub buyer: TradeParty,
    pub lines: Vec<InvoiceLine>,
    pub totals: MonetaryTotals,
    pub tax_breakdown: Vec<TaxBreakdown>,
    pub bank_details: Vec<BankDetails>,
    pub order_reference: Option<String>,
}

impl CanonicalInvoice {
    /// Check the model invariants that must hold in any accepted invoice.
    ///
    /// Returns a human-readable description per violation; empty means the
    /// record is internally consistent within `tolerance` currency units.
    pub fn check_invariants(&self, tolerance: Decimal) -> Vec<String> {
        let mut violations = Vec::new();

        if self.lines.is_empty() {
            violations.push("invoice has no lines".to_string());
        }

        let line_sum: Decimal = self.lines.iter().map(|l| l.net_amount).sum();
        if (self.totals.line_extension - line_sum).abs() > tolerance {
            violations.push(format!(
                "line extension total {} does not match sum of line nets {line_sum}",
                self.totals.line_extension
            ));
        }

        for bd in &self.tax_breakdown {
            let expected = round_half_even(bd.base * bd.rate / dec!(100), 2);
            if (bd.tax_amount - expected).abs() > tolerance {
                violations.push(format!(
                    "tax amount {} for category {} rate {} does not match {expected}",
                    bd.tax_amount, bd.category, bd.rate
                ));
            }
        }

        let tax_sum: Decimal = self.tax_breakdown.iter().map(|b| b.tax_amount).sum();
        if (self.totals.tax_inclusive - (self.totals.tax_exclusive + tax_sum)).abs() > tolerance {
            violations.push(format!(
                "tax inclusive {} does not match tax exclusive {} + tax {tax_sum}",
                self.totals.tax_inclusive, self.totals.tax_exclusive
            ));
        }

        let expected_payable = self.totals.tax_inclusive - self.totals.prepaid;
        if (self.totals.payable - expected_payable).abs() > tolerance {
            violations.push(format!(
                "payable {} does not match tax inclusive {} - prepaid {}",
                self.totals.payable, self.totals.tax_inclusive, self.totals.prepaid
            ));
        }

        for (who, party) in [("seller", &self.seller), ("buyer", &self.buyer)] {
            if let Some(vat_id) = &party.vat_id {
                let known = vat_id.get(..2).is_some_and(is_known_vat_prefix);
                if !known {
                    violations.push(format!("{who} VAT id '{vat_id}' has an unknown prefix"));
                }
            }
        }

        if !is_known_currency_code(&self.currency) {
            violations.push(format!("currency '{}' is not a known ISO 4217 code", self.currency));
        }

        violations
    }
}

/// Round to `dp` decimal places with banker's rounding (midpoint to even).
pub fn round_half_even(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, rust_decimal::RoundingStrategy::MidpointNearestEven)
}
