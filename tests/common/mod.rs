//! Shared fixtures: sample documents, a fake ERP adapter, a PDF builder,
//! and a pipeline harness over the in-memory stores.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use eingang::erp::{
    ErpAdapter, ErpBankDetails, ErpError, ErpPurchaseOrder, ErpPurchaseOrderLine, ErpVendor,
};
use eingang::pipeline::{Pipeline, PipelineOptions};
use eingang::store::{
    InvoiceTransaction, MemoryBlobStore, MemoryMetadataStore, MetadataStore, Source,
};

pub const UBL_INVOICE_NS: &str = "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2";
pub const CAC_NS: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2";
pub const CBC_NS: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";
pub const RSM_NS: &str = "urn:un:unece:uncefact:data:standard:CrossIndustryInvoice:100";
pub const RAM_NS: &str =
    "urn:un:unece:uncefact:data:standard:ReusableAggregateBusinessInformationEntity:100";
pub const UDT_NS: &str = "urn:un:unece:uncefact:data:standard:UnqualifiedDataType:100";

/// Tunable UBL invoice; defaults reproduce the happy path: one line,
/// quantity 1.0 at 100.00, 19 % VAT, payable 119.00.
pub struct UblFixture {
    pub number: String,
    pub iban: String,
    pub tax_inclusive: String,
    pub payable: String,
    pub order_reference: Option<String>,
    pub item_id: Option<String>,
    pub quantity: String,
}

impl Default for UblFixture {
    fn default() -> Self {
        Self {
            number: "R-TEST-2025-001".into(),
            iban: "DE89370400440532013000".into(),
            tax_inclusive: "119.00".into(),
            payable: "119.00".into(),
            order_reference: None,
            item_id: None,
            quantity: "1.0".into(),
        }
    }
}

impl UblFixture {
    pub fn render(&self) -> String {
        let order_reference = self
            .order_reference
            .as_deref()
            .map(|po| format!("<cac:OrderReference><cbc:ID>{po}</cbc:ID></cac:OrderReference>"))
            .unwrap_or_default();
        let item_id = self
            .item_id
            .as_deref()
            .map(|id| {
                format!(
                    "<cac:StandardItemIdentification><cbc:ID schemeID=\"0160\">{id}</cbc:ID></cac:StandardItemIdentification>"
                )
            })
            .unwrap_or_default();

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Invoice xmlns="{UBL_INVOICE_NS}" xmlns:cac="{CAC_NS}" xmlns:cbc="{CBC_NS}">
  <cbc:ID>{number}</cbc:ID>
  <cbc:IssueDate>2025-01-15</cbc:IssueDate>
  <cbc:InvoiceTypeCode>380</cbc:InvoiceTypeCode>
  <cbc:DocumentCurrencyCode>EUR</cbc:DocumentCurrencyCode>
  {order_reference}
  <cac:AccountingSupplierParty>
    <cac:Party>
      <cac:PartyName><cbc:Name>ACME GmbH</cbc:Name></cac:PartyName>
      <cac:PostalAddress>
        <cbc:StreetName>Friedrichstraße 123</cbc:StreetName>
        <cbc:CityName>Berlin</cbc:CityName>
        <cbc:PostalZone>10115</cbc:PostalZone>
        <cac:Country><cbc:IdentificationCode>DE</cbc:IdentificationCode></cac:Country>
      </cac:PostalAddress>
      <cac:PartyTaxScheme>
        <cbc:CompanyID>DE123456789</cbc:CompanyID>
        <cac:TaxScheme><cbc:ID>VAT</cbc:ID></cac:TaxScheme>
      </cac:PartyTaxScheme>
      <cac:PartyLegalEntity><cbc:RegistrationName>ACME GmbH</cbc:RegistrationName></cac:PartyLegalEntity>
    </cac:Party>
  </cac:AccountingSupplierParty>
  <cac:AccountingCustomerParty>
    <cac:Party>
      <cac:PartyName><cbc:Name>Kunde AG</cbc:Name></cac:PartyName>
      <cac:PostalAddress>
        <cbc:CityName>München</cbc:CityName>
        <cbc:PostalZone>80331</cbc:PostalZone>
        <cac:Country><cbc:IdentificationCode>DE</cbc:IdentificationCode></cac:Country>
      </cac:PostalAddress>
    </cac:Party>
  </cac:AccountingCustomerParty>
  <cac:PaymentMeans>
    <cbc:PaymentMeansCode>58</cbc:PaymentMeansCode>
    <cac:PayeeFinancialAccount><cbc:ID>{iban}</cbc:ID></cac:PayeeFinancialAccount>
  </cac:PaymentMeans>
  <cac:TaxTotal>
    <cbc:TaxAmount currencyID="EUR">19.00</cbc:TaxAmount>
    <cac:TaxSubtotal>
      <cbc:TaxableAmount currencyID="EUR">100.00</cbc:TaxableAmount>
      <cbc:TaxAmount currencyID="EUR">19.00</cbc:TaxAmount>
      <cac:TaxCategory>
        <cbc:ID>S</cbc:ID>
        <cbc:Percent>19.00</cbc:Percent>
        <cac:TaxScheme><cbc:ID>VAT</cbc:ID></cac:TaxScheme>
      </cac:TaxCategory>
    </cac:TaxSubtotal>
  </cac:TaxTotal>
  <cac:LegalMonetaryTotal>
    <cbc:LineExtensionAmount currencyID="EUR">100.00</cbc:LineExtensionAmount>
    <cbc:TaxExclusiveAmount currencyID="EUR">100.00</cbc:TaxExclusiveAmount>
    <cbc:TaxInclusiveAmount currencyID="EUR">{tax_inclusive}</cbc:TaxInclusiveAmount>
    <cbc:PayableAmount currencyID="EUR">{payable}</cbc:PayableAmount>
  </cac:LegalMonetaryTotal>
  <cac:InvoiceLine>
    <cbc:ID>1</cbc:ID>
    <cbc:InvoicedQuantity unitCode="C62">{quantity}</cbc:InvoicedQuantity>
    <cbc:LineExtensionAmount currencyID="EUR">100.00</cbc:LineExtensionAmount>
    <cac:Item>
      <cbc:Name>Beratung</cbc:Name>
      {item_id}
      <cac:ClassifiedTaxCategory>
        <cbc:ID>S</cbc:ID>
        <cbc:Percent>19.00</cbc:Percent>
        <cac:TaxScheme><cbc:ID>VAT</cbc:ID></cac:TaxScheme>
      </cac:ClassifiedTaxCategory>
    </cac:Item>
    <cac:Price><cbc:PriceAmount currencyID="EUR">100.00</cbc:PriceAmount></cac:Price>
  </cac:InvoiceLine>
</Invoice>"#,
            number = self.number,
            iban = self.iban,
            tax_inclusive = self.tax_inclusive,
            payable = self.payable,
            order_reference = order_reference,
            item_id = item_id,
            quantity = self.quantity,
        )
    }
}

/// CII rendition of the same invoice. `issue_date_element` lets tests drop
/// the issue date entirely.
pub struct CiiFixture {
    pub number: String,
    pub with_issue_date: bool,
    pub iban: String,
}

impl Default for CiiFixture {
    fn default() -> Self {
        Self {
            number: "R-TEST-2025-001".into(),
            with_issue_date: true,
            iban: "DE89370400440532013000".into(),
        }
    }
}

impl CiiFixture {
    pub fn render(&self) -> String {
        let issue_date = if self.with_issue_date {
            r#"<ram:IssueDateTime><udt:DateTimeString format="102">20250115</udt:DateTimeString></ram:IssueDateTime>"#
        } else {
            ""
        };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rsm:CrossIndustryInvoice xmlns:rsm="{RSM_NS}" xmlns:ram="{RAM_NS}" xmlns:udt="{UDT_NS}">
  <rsm:ExchangedDocumentContext>
    <ram:GuidelineSpecifiedDocumentContextParameter>
      <ram:ID>urn:cen.eu:en16931:2017</ram:ID>
    </ram:GuidelineSpecifiedDocumentContextParameter>
  </rsm:ExchangedDocumentContext>
  <rsm:ExchangedDocument>
    <ram:ID>{number}</ram:ID>
    <ram:TypeCode>380</ram:TypeCode>
    {issue_date}
  </rsm:ExchangedDocument>
  <rsm:SupplyChainTradeTransaction>
    <ram:IncludedSupplyChainTradeLineItem>
      <ram:AssociatedDocumentLineDocument><ram:LineID>1</ram:LineID></ram:AssociatedDocumentLineDocument>
      <ram:SpecifiedTradeProduct>
        <ram:GlobalID schemeID="0160">4012345678901</ram:GlobalID>
        <ram:Name>Beratung</ram:Name>
      </ram:SpecifiedTradeProduct>
      <ram:SpecifiedLineTradeAgreement>
        <ram:NetPriceProductTradePrice><ram:ChargeAmount>100.00</ram:ChargeAmount></ram:NetPriceProductTradePrice>
      </ram:SpecifiedLineTradeAgreement>
      <ram:SpecifiedLineTradeDelivery>
        <ram:BilledQuantity unitCode="C62">1.0</ram:BilledQuantity>
      </ram:SpecifiedLineTradeDelivery>
      <ram:SpecifiedLineTradeSettlement>
        <ram:ApplicableTradeTax>
          <ram:TypeCode>VAT</ram:TypeCode>
          <ram:CategoryCode>S</ram:CategoryCode>
          <ram:RateApplicablePercent>19.00</ram:RateApplicablePercent>
        </ram:ApplicableTradeTax>
        <ram:SpecifiedTradeSettlementLineMonetarySummation>
          <ram:LineTotalAmount>100.00</ram:LineTotalAmount>
        </ram:SpecifiedTradeSettlementLineMonetarySummation>
      </ram:SpecifiedLineTradeSettlement>
    </ram:IncludedSupplyChainTradeLineItem>
    <ram:ApplicableHeaderTradeAgreement>
      <ram:SellerTradeParty>
        <ram:Name>ACME GmbH</ram:Name>
        <ram:PostalTradeAddress>
          <ram:PostcodeCode>10115</ram:PostcodeCode>
          <ram:CityName>Berlin</ram:CityName>
          <ram:CountryID>DE</ram:CountryID>
        </ram:PostalTradeAddress>
        <ram:SpecifiedTaxRegistration><ram:ID schemeID="VA">DE123456789</ram:ID></ram:SpecifiedTaxRegistration>
      </ram:SellerTradeParty>
      <ram:BuyerTradeParty>
        <ram:Name>Kunde AG</ram:Name>
        <ram:PostalTradeAddress>
          <ram:PostcodeCode>80331</ram:PostcodeCode>
          <ram:CityName>München</ram:CityName>
          <ram:CountryID>DE</ram:CountryID>
        </ram:PostalTradeAddress>
      </ram:BuyerTradeParty>
    </ram:ApplicableHeaderTradeAgreement>
    <ram:ApplicableHeaderTradeDelivery/>
    <ram:ApplicableHeaderTradeSettlement>
      <ram:InvoiceCurrencyCode>EUR</ram:InvoiceCurrencyCode>
      <ram:SpecifiedTradeSettlementPaymentMeans>
        <ram:TypeCode>58</ram:TypeCode>
        <ram:PayeePartyCreditorFinancialAccount><ram:IBANID>{iban}</ram:IBANID></ram:PayeePartyCreditorFinancialAccount>
      </ram:SpecifiedTradeSettlementPaymentMeans>
      <ram:ApplicableTradeTax>
        <ram:CalculatedAmount>19.00</ram:CalculatedAmount>
        <ram:TypeCode>VAT</ram:TypeCode>
        <ram:BasisAmount>100.00</ram:BasisAmount>
        <ram:CategoryCode>S</ram:CategoryCode>
        <ram:RateApplicablePercent>19.00</ram:RateApplicablePercent>
      </ram:ApplicableTradeTax>
      <ram:SpecifiedTradeSettlementHeaderMonetarySummation>
        <ram:LineTotalAmount>100.00</ram:LineTotalAmount>
        <ram:TaxBasisTotalAmount>100.00</ram:TaxBasisTotalAmount>
        <ram:TaxTotalAmount currencyID="EUR">19.00</ram:TaxTotalAmount>
        <ram:GrandTotalAmount>119.00</ram:GrandTotalAmount>
        <ram:DuePayableAmount>119.00</ram:DuePayableAmount>
      </ram:SpecifiedTradeSettlementHeaderMonetarySummation>
    </ram:ApplicableHeaderTradeSettlement>
  </rsm:SupplyChainTradeTransaction>
</rsm:CrossIndustryInvoice>"#,
            number = self.number,
            issue_date = issue_date,
            iban = self.iban,
        )
    }
}

/// Minimal single-page PDF with `xml` attached under `filename`, registered
/// both in the EmbeddedFiles name tree and the catalogue /AF array.
pub fn pdf_with_attachment(xml: &[u8], filename: &str) -> Vec<u8> {
    use lopdf::{Document, Object, Stream, dictionary};

    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(dictionary! {}, b"BT ET".to_vec()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => Object::Reference(pages_id),
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        "Contents" => Object::Reference(content_id),
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );

    // Uncompressed so the attachment survives byte-for-byte.
    let ef_stream = Stream::new(
        dictionary! { "Type" => "EmbeddedFile" },
        xml.to_vec(),
    )
    .with_compression(false);
    let ef_id = doc.add_object(ef_stream);
    let filespec_id = doc.add_object(dictionary! {
        "Type" => "Filespec",
        "F" => Object::string_literal(filename),
        "UF" => Object::string_literal(filename),
        "EF" => dictionary! { "F" => Object::Reference(ef_id) },
    });
    let name_tree_id = doc.add_object(dictionary! {
        "Names" => Object::Array(vec![
            Object::string_literal(filename),
            Object::Reference(filespec_id),
        ]),
    });
    let names_id = doc.add_object(dictionary! {
        "EmbeddedFiles" => Object::Reference(name_tree_id),
    });
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
        "Names" => Object::Reference(names_id),
        "AF" => Object::Array(vec![Object::Reference(filespec_id)]),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("save test PDF");
    out
}

/// PDF without any attachment.
pub fn plain_pdf() -> Vec<u8> {
    use lopdf::{Document, Object, Stream, dictionary};

    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(dictionary! {}, b"BT ET".to_vec()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => Object::Reference(pages_id),
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        "Contents" => Object::Reference(content_id),
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("save test PDF");
    out
}

/// Configurable fake ERP adapter.
#[derive(Default)]
pub struct FakeErp {
    pub vendor: Option<ErpVendor>,
    pub duplicate: bool,
    pub ibans: Vec<String>,
    pub po: Option<ErpPurchaseOrder>,
    /// Every call fails transiently.
    pub unavailable: bool,
}

impl FakeErp {
    /// Matches the happy path: vendor V-100 active, the default fixture IBAN
    /// registered, no PO.
    pub fn happy() -> Self {
        Self {
            vendor: Some(ErpVendor {
                vendor_id: "V-100".into(),
                vat_id: "DE123456789".into(),
                active: true,
            }),
            duplicate: false,
            ibans: vec!["DE89370400440532013000".into()],
            po: None,
            unavailable: false,
        }
    }

    pub fn with_po(mut self, po: ErpPurchaseOrder) -> Self {
        self.po = Some(po);
        self
    }
}

#[async_trait]
impl ErpAdapter for FakeErp {
    async fn find_vendor_by_vat_id(&self, vat_id: &str) -> Result<Option<ErpVendor>, ErpError> {
        if self.unavailable {
            return Err(ErpError("connection refused".into()));
        }
        Ok(self
            .vendor
            .clone()
            .filter(|vendor| vendor.vat_id == vat_id))
    }

    async fn is_duplicate_invoice(
        &self,
        _vendor_id: &str,
        _invoice_number: &str,
    ) -> Result<bool, ErpError> {
        if self.unavailable {
            return Err(ErpError("connection refused".into()));
        }
        Ok(self.duplicate)
    }

    async fn get_vendor_bank_details(
        &self,
        _vendor_id: &str,
    ) -> Result<Vec<ErpBankDetails>, ErpError> {
        if self.unavailable {
            return Err(ErpError("connection refused".into()));
        }
        Ok(self
            .ibans
            .iter()
            .map(|iban| ErpBankDetails { iban: iban.clone() })
            .collect())
    }

    async fn get_purchase_order(
        &self,
        po_number: &str,
        vendor_id: &str,
    ) -> Result<Option<ErpPurchaseOrder>, ErpError> {
        if self.unavailable {
            return Err(ErpError("connection refused".into()));
        }
        Ok(self
            .po
            .clone()
            .filter(|po| po.po_number == po_number && po.vendor_id == vendor_id))
    }
}

/// A purchase order for vendor V-100 with one line.
pub fn sample_po(
    total_net: Decimal,
    open: bool,
    item_id: &str,
    ordered: Decimal,
    invoiced: Decimal,
) -> ErpPurchaseOrder {
    let line = ErpPurchaseOrderLine {
        item_id: item_id.to_string(),
        quantity_ordered: ordered,
        quantity_invoiced: invoiced,
    };
    ErpPurchaseOrder {
        po_number: "PO-7".into(),
        vendor_id: "V-100".into(),
        total_net,
        open_for_invoicing: open,
        lines: HashMap::from([(line.item_id.clone(), line)]),
    }
}

/// Pipeline over in-memory stores with one RECEIVED transaction.
pub struct Harness {
    pub store: Arc<MemoryMetadataStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub pipeline: Arc<Pipeline>,
    pub id: Uuid,
}

pub async fn harness(raw: &[u8], erp: FakeErp) -> Harness {
    harness_with_options(raw, erp, PipelineOptions::default()).await
}

pub async fn harness_with_options(raw: &[u8], erp: FakeErp, options: PipelineOptions) -> Harness {
    let store = Arc::new(MemoryMetadataStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let id = Uuid::new_v4();
    let raw_uri = format!("raw/{id}");
    blobs.insert(&raw_uri, raw.to_vec());
    store
        .insert_received(&InvoiceTransaction::received(id, Source::Api, raw_uri))
        .await
        .unwrap();

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        blobs.clone(),
        Arc::new(erp),
        None,
        options,
    ));
    Harness {
        store,
        blobs,
        pipeline,
        id,
    }
}

pub fn msg(id: Uuid) -> eingang::queue::TaskMessage {
    eingang::queue::TaskMessage {
        transaction_id: id,
        delivery_count: 1,
    }
}

pub fn default_tolerance() -> Decimal {
    dec!(0.02)
}
