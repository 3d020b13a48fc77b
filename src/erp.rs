//! Read-only ERP adapter: vendor master, bank table, invoice journal, and
//! purchase orders.
//!
//! The trait is the contract; [`PgErpAdapter`] implements it over a
//! dedicated connection pool whose credentials carry no write privilege.
//! Every query uses bound parameters. A query returning no rows is never an
//! error; connectivity failures surface as [`ErpError`] and are retried by
//! the driver.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use thiserror::Error;

/// Transient ERP query failure (connectivity, timeout).
#[derive(Debug, Clone, Error)]
#[error("erp query failed: {0}")]
pub struct ErpError(pub String);

impl From<sqlx::Error> for ErpError {
    fn from(e: sqlx::Error) -> Self {
        Self(e.to_string())
    }
}

/// Vendor master snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErpVendor {
    pub vendor_id: String,
    pub vat_id: String,
    pub active: bool,
}

/// One registered vendor bank account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErpBankDetails {
    pub iban: String,
}

/// Purchase-order snapshot with lines keyed by article identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ErpPurchaseOrder {
    pub po_number: String,
    pub vendor_id: String,
    pub total_net: Decimal,
    pub open_for_invoicing: bool,
    pub lines: HashMap<String, ErpPurchaseOrderLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErpPurchaseOrderLine {
    pub item_id: String,
    pub quantity_ordered: Decimal,
    pub quantity_invoiced: Decimal,
}

impl ErpPurchaseOrderLine {
    pub fn quantity_open(&self) -> Decimal {
        self.quantity_ordered - self.quantity_invoiced
    }
}

/// Read-only ERP queries used by the business validator.
#[async_trait]
pub trait ErpAdapter: Send + Sync {
    /// Vendor lookup by VAT id; inactive vendors are returned with
    /// `active == false`.
    async fn find_vendor_by_vat_id(&self, vat_id: &str) -> Result<Option<ErpVendor>, ErpError>;

    /// Exact, case-sensitive match against the invoice journal.
    async fn is_duplicate_invoice(
        &self,
        vendor_id: &str,
        invoice_number: &str,
    ) -> Result<bool, ErpError>;

    /// All IBANs registered for the vendor.
    async fn get_vendor_bank_details(
        &self,
        vendor_id: &str,
    ) -> Result<Vec<ErpBankDetails>, ErpError>;

    /// PO retrieval, vendor-scoped: a PO belonging to a different vendor is
    /// reported as absent, not as an error.
    async fn get_purchase_order(
        &self,
        po_number: &str,
        vendor_id: &str,
    ) -> Result<Option<ErpPurchaseOrder>, ErpError>;
}

/// Postgres implementation over the read-only ERP pool.
pub struct PgErpAdapter {
    pool: PgPool,
}

impl PgErpAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ErpAdapter for PgErpAdapter {
    async fn find_vendor_by_vat_id(&self, vat_id: &str) -> Result<Option<ErpVendor>, ErpError> {
        let row = sqlx::query(
            "SELECT vendor_id, vat_id, active FROM erp_vendor WHERE vat_id = $1",
        )
        .bind(vat_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ErpVendor {
                vendor_id: row.try_get("vendor_id")?,
                vat_id: row.try_get("vat_id")?,
                active: row.try_get("active")?,
            })
        })
        .transpose()
        .map_err(|e: sqlx::Error| e.into())
    }

    async fn is_duplicate_invoice(
        &self,
        vendor_id: &str,
        invoice_number: &str,
    ) -> Result<bool, ErpError> {
        let row = sqlx::query(
            "SELECT EXISTS(
                 SELECT 1 FROM erp_invoice_journal
                 WHERE vendor_id = $1 AND external_invoice_number = $2
             ) AS known",
        )
        .bind(vendor_id)
        .bind(invoice_number)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<bool, _>("known").map_err(ErpError::from)?)
    }

    async fn get_vendor_bank_details(
        &self,
        vendor_id: &str,
    ) -> Result<Vec<ErpBankDetails>, ErpError> {
        let rows = sqlx::query("SELECT iban FROM erp_vendor_bank WHERE vendor_id = $1")
            .bind(vendor_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(ErpBankDetails {
                    iban: row.try_get("iban")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(ErpError::from)
    }

    async fn get_purchase_order(
        &self,
        po_number: &str,
        vendor_id: &str,
    ) -> Result<Option<ErpPurchaseOrder>, ErpError> {
        let Some(header) = sqlx::query(
            "SELECT po_number, vendor_id, total_net, open_for_invoicing
             FROM erp_purchase_order
             WHERE po_number = $1 AND vendor_id = $2",
        )
        .bind(po_number)
        .bind(vendor_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let line_rows = sqlx::query(
            "SELECT item_id, quantity_ordered, quantity_invoiced
             FROM erp_purchase_order_line
             WHERE po_number = $1",
        )
        .bind(po_number)
        .fetch_all(&self.pool)
        .await?;

        let mut lines = HashMap::with_capacity(line_rows.len());
        for row in line_rows {
            let line = ErpPurchaseOrderLine {
                item_id: row.try_get("item_id").map_err(ErpError::from)?,
                quantity_ordered: row.try_get("quantity_ordered").map_err(ErpError::from)?,
                quantity_invoiced: row.try_get("quantity_invoiced").map_err(ErpError::from)?,
            };
            lines.insert(line.item_id.clone(), line);
        }

        Ok(Some(ErpPurchaseOrder {
            po_number: header.try_get("po_number").map_err(ErpError::from)?,
            vendor_id: header.try_get("vendor_id").map_err(ErpError::from)?,
            total_net: header.try_get("total_net").map_err(ErpError::from)?,
            open_for_invoicing: header
                .try_get("open_for_invoicing")
                .map_err(ErpError::from)?,
            lines,
        }))
    }
}
