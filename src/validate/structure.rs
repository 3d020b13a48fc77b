//! Structural validation against the EN 16931 element model.
//!
//! The rule tables below encode the schema-level constraints the pipeline
//! depends on: required elements, minimum cardinality, and the lexical form
//! of dates and amounts. Tables are compiled once per process and shared
//! read-only across workers.

use std::sync::OnceLock;

use roxmltree::Document;
use rust_decimal::Decimal;

use crate::report::{Finding, Severity, Stage, ValidationStep, codes};
use crate::xml::classify::XmlSyntax;
use crate::xml::ns;
use crate::xml::xpath::{NsTable, find_all, find_first, parse_date};

const UBL_NS: NsTable<'static> = &[("cbc", ns::CBC), ("cac", ns::CAC)];
const CII_NS: NsTable<'static> = &[("rsm", ns::RSM), ("ram", ns::RAM), ("udt", ns::UDT)];

/// Lexical domain of a leaf element's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Any,
    Date,
    Amount,
}

struct Rule {
    /// Child-step query from the document root.
    path: &'static str,
    /// Severity when the element is missing. `Fatal` rules guard the
    /// containers the rest of the pipeline cannot work without.
    missing: Severity,
    kind: ValueKind,
}

const fn required(path: &'static str) -> Rule {
    Rule {
        path,
        missing: Severity::Error,
        kind: ValueKind::Any,
    }
}

const fn fatal(path: &'static str) -> Rule {
    Rule {
        path,
        missing: Severity::Fatal,
        kind: ValueKind::Any,
    }
}

const fn date(path: &'static str) -> Rule {
    Rule {
        path,
        missing: Severity::Error,
        kind: ValueKind::Date,
    }
}

const fn amount(path: &'static str) -> Rule {
    Rule {
        path,
        missing: Severity::Error,
        kind: ValueKind::Amount,
    }
}

static UBL_INVOICE_RULES: &[Rule] = &[
    required("cbc:ID"),
    date("cbc:IssueDate"),
    required("cbc:DocumentCurrencyCode"),
    fatal("cac:AccountingSupplierParty/cac:Party"),
    fatal("cac:AccountingCustomerParty/cac:Party"),
    required("cac:AccountingSupplierParty/cac:Party/cac:PostalAddress/cac:Country/cbc:IdentificationCode"),
    required("cac:AccountingCustomerParty/cac:Party/cac:PostalAddress/cac:Country/cbc:IdentificationCode"),
    fatal("cac:LegalMonetaryTotal"),
    amount("cac:LegalMonetaryTotal/cbc:LineExtensionAmount"),
    amount("cac:LegalMonetaryTotal/cbc:TaxExclusiveAmount"),
    amount("cac:LegalMonetaryTotal/cbc:TaxInclusiveAmount"),
    amount("cac:LegalMonetaryTotal/cbc:PayableAmount"),
    required("cac:InvoiceLine"),
];

static UBL_CREDITNOTE_RULES: &[Rule] = &[
    required("cbc:ID"),
    date("cbc:IssueDate"),
    required("cbc:DocumentCurrencyCode"),
    fatal("cac:AccountingSupplierParty/cac:Party"),
    fatal("cac:AccountingCustomerParty/cac:Party"),
    fatal("cac:LegalMonetaryTotal"),
    amount("cac:LegalMonetaryTotal/cbc:LineExtensionAmount"),
    amount("cac:LegalMonetaryTotal/cbc:TaxExclusiveAmount"),
    amount("cac:LegalMonetaryTotal/cbc:TaxInclusiveAmount"),
    amount("cac:LegalMonetaryTotal/cbc:PayableAmount"),
    required("cac:CreditNoteLine"),
];

static CII_RULES: &[Rule] = &[
    required("rsm:ExchangedDocumentContext"),
    fatal("rsm:ExchangedDocument"),
    required("rsm:ExchangedDocument/ram:ID"),
    required("rsm:ExchangedDocument/ram:TypeCode"),
    date("rsm:ExchangedDocument/ram:IssueDateTime/udt:DateTimeString"),
    fatal("rsm:SupplyChainTradeTransaction"),
    fatal("rsm:SupplyChainTradeTransaction/ram:ApplicableHeaderTradeAgreement/ram:SellerTradeParty"),
    fatal("rsm:SupplyChainTradeTransaction/ram:ApplicableHeaderTradeAgreement/ram:BuyerTradeParty"),
    required("rsm:SupplyChainTradeTransaction/ram:ApplicableHeaderTradeSettlement/ram:InvoiceCurrencyCode"),
    fatal("rsm:SupplyChainTradeTransaction/ram:ApplicableHeaderTradeSettlement/ram:SpecifiedTradeSettlementHeaderMonetarySummation"),
    amount("rsm:SupplyChainTradeTransaction/ram:ApplicableHeaderTradeSettlement/ram:SpecifiedTradeSettlementHeaderMonetarySummation/ram:LineTotalAmount"),
    amount("rsm:SupplyChainTradeTransaction/ram:ApplicableHeaderTradeSettlement/ram:SpecifiedTradeSettlementHeaderMonetarySummation/ram:GrandTotalAmount"),
    amount("rsm:SupplyChainTradeTransaction/ram:ApplicableHeaderTradeSettlement/ram:SpecifiedTradeSettlementHeaderMonetarySummation/ram:DuePayableAmount"),
    required("rsm:SupplyChainTradeTransaction/ram:IncludedSupplyChainTradeLineItem"),
];

/// A rule with its reporting location precomputed. Built once per process
/// per syntax and shared read-only across workers.
struct CompiledRule {
    path: &'static str,
    location: String,
    missing: Severity,
    kind: ValueKind,
}

struct RuleSet {
    rules: Vec<CompiledRule>,
    ns: NsTable<'static>,
}

fn compile(rules: &'static [Rule], ns: NsTable<'static>) -> RuleSet {
    let rules = rules
        .iter()
        .map(|rule| CompiledRule {
            path: rule.path,
            location: strip_prefixes(rule.path),
            missing: rule.missing,
            kind: rule.kind,
        })
        .collect();
    RuleSet { rules, ns }
}

fn rule_set(syntax: XmlSyntax) -> &'static RuleSet {
    static UBL_I: OnceLock<RuleSet> = OnceLock::new();
    static UBL_CN: OnceLock<RuleSet> = OnceLock::new();
    static CII: OnceLock<RuleSet> = OnceLock::new();
    match syntax {
        XmlSyntax::UblInvoice => UBL_I.get_or_init(|| compile(UBL_INVOICE_RULES, UBL_NS)),
        XmlSyntax::UblCreditNote => UBL_CN.get_or_init(|| compile(UBL_CREDITNOTE_RULES, UBL_NS)),
        XmlSyntax::Cii => CII.get_or_init(|| compile(CII_RULES, CII_NS)),
    }
}

/// Validate the parsed document against the rule table for its syntax.
pub fn validate_structure(doc: &Document<'_>, syntax: XmlSyntax) -> ValidationStep {
    let set = rule_set(syntax);
    let root = doc.root_element();
    let mut findings = Vec::new();

    for rule in &set.rules {
        let location = rule.location.clone();
        let Some(node) = find_first(root, rule.path, set.ns) else {
            findings.push(
                Finding::new(
                    rule.missing,
                    codes::XSD_VIOLATION,
                    "required element is missing",
                )
                .with_location(location),
            );
            continue;
        };

        let text = node.text().map(str::trim).unwrap_or("");
        match rule.kind {
            ValueKind::Any => {}
            ValueKind::Date => {
                if parse_date(text).is_none() {
                    findings.push(
                        Finding::error(codes::XSD_VIOLATION, "element is not a valid date")
                            .with_location(location)
                            .with_value("date", text),
                    );
                }
            }
            ValueKind::Amount => {
                if text.parse::<Decimal>().is_err() {
                    findings.push(
                        Finding::error(codes::XSD_VIOLATION, "element is not a valid amount")
                            .with_location(location)
                            .with_value("amount", text),
                    );
                }
            }
        }
    }

    // Amount elements everywhere must be numeric; scan the common amount
    // leaves of each syntax's line items.
    let line_amount_query = match syntax {
        XmlSyntax::UblInvoice => Some("cac:InvoiceLine/cbc:LineExtensionAmount"),
        XmlSyntax::UblCreditNote => Some("cac:CreditNoteLine/cbc:LineExtensionAmount"),
        XmlSyntax::Cii => None,
    };
    if let Some(query) = line_amount_query {
        for node in find_all(root, query, set.ns) {
            let text = node.text().map(str::trim).unwrap_or("");
            if text.parse::<Decimal>().is_err() {
                findings.push(
                    Finding::error(codes::XSD_VIOLATION, "line amount is not a valid amount")
                        .with_location(strip_prefixes(query))
                        .with_value("amount", text),
                );
            }
        }
    }

    ValidationStep::from_findings(Stage::Structure, findings)
}

fn strip_prefixes(query: &str) -> String {
    query
        .split('/')
        .map(|s| s.split_once(':').map_or(s, |(_, local)| local))
        .collect::<Vec<_>>()
        .join("/")
}
