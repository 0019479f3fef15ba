//! Validation gate
//!
//! Checks run over the normalized-over-raw merged view of an item, in this
//! order:
//! 1. Required fields
//! 2. Date and amount formats
//! 3. Totals reconciliation (invoices)
//! 4. Currency shape (when enabled)
//! 5. Category policy (expenses)
//! 6. Country rules (tax ids, invoice numbers, rates)
//!
//! The gate never fails; problems are returned as an ordered error list.

use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::country::CountryValidator;
use super::{RecordValidator, ValidationRules};
use crate::mapping::normalize::{is_blank, value_text};
use crate::mapping::values::{parse_amount, parse_date};
use crate::models::{ErrorPhase, ItemError, SourceType};

pub const REQUIRED: &str = "REQUIRED";
pub const INVALID_DATE: &str = "INVALID_DATE";
pub const INVALID_AMOUNT: &str = "INVALID_AMOUNT";
pub const TOTALS_MISMATCH: &str = "TOTALS_MISMATCH";
pub const INVALID_CURRENCY: &str = "INVALID_CURRENCY";
pub const CATEGORY_REQUIRED: &str = "CATEGORY_REQUIRED";

pub fn required_fields(source_type: SourceType) -> &'static [&'static str] {
    match source_type {
        SourceType::Invoices => &["invoice_number", "invoice_date", "total"],
        SourceType::Bank => &["date", "amount"],
        SourceType::Expenses => &["date", "amount"],
        SourceType::Products => &["name"],
        SourceType::Recipes => &["name"],
        SourceType::Generic => &[],
    }
}

pub fn date_fields(source_type: SourceType) -> &'static [&'static str] {
    match source_type {
        SourceType::Invoices => &["invoice_date", "due_date"],
        SourceType::Bank => &["date", "value_date"],
        SourceType::Expenses => &["date"],
        _ => &[],
    }
}

pub fn amount_fields(source_type: SourceType) -> &'static [&'static str] {
    match source_type {
        SourceType::Invoices => &["net", "tax", "total"],
        SourceType::Bank => &["amount", "debit", "credit", "balance"],
        SourceType::Expenses => &["amount", "tax"],
        SourceType::Products => &["price", "cost", "stock", "tax_rate"],
        SourceType::Recipes => &["quantity", "yield"],
        SourceType::Generic => &[],
    }
}

const TAX_ID_FIELDS: &[&str] = &["issuer_tax_id", "customer_tax_id", "vendor_tax_id"];

pub struct ValidationGate {
    rules: ValidationRules,
    country: Arc<dyn CountryValidator>,
}

impl ValidationGate {
    pub fn new(rules: ValidationRules, country: Arc<dyn CountryValidator>) -> Self {
        Self { rules, country }
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    fn present<'a>(record: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
        record.get(field).filter(|v| !is_blank(v))
    }

    fn check_required(&self, source_type: SourceType, record: &Map<String, Value>, errors: &mut Vec<ItemError>) {
        for field in required_fields(source_type) {
            if Self::present(record, field).is_none() {
                errors.push(ItemError::field(
                    ErrorPhase::Validation,
                    field,
                    REQUIRED,
                    format!("{} is required", field),
                ));
            }
        }
    }

    fn check_formats(&self, source_type: SourceType, record: &Map<String, Value>, errors: &mut Vec<ItemError>) {
        for field in date_fields(source_type) {
            if let Some(value) = Self::present(record, field) {
                if parse_date(value).is_none() {
                    errors.push(ItemError::field(
                        ErrorPhase::Validation,
                        field,
                        INVALID_DATE,
                        format!("'{}' is not a recognizable date", value_text(value)),
                    ));
                }
            }
        }
        for field in amount_fields(source_type) {
            if let Some(value) = Self::present(record, field) {
                if parse_amount(value).is_none() {
                    errors.push(ItemError::field(
                        ErrorPhase::Validation,
                        field,
                        INVALID_AMOUNT,
                        format!("'{}' is not a valid amount", value_text(value)),
                    ));
                }
            }
        }
    }

    fn check_totals(&self, record: &Map<String, Value>, errors: &mut Vec<ItemError>) {
        let amount = |f: &str| Self::present(record, f).and_then(parse_amount);
        let (Some(net), Some(tax), Some(total)) = (amount("net"), amount("tax"), amount("total")) else {
            return;
        };
        let diff = (net + tax - total).round_dp(2);
        if !diff.is_zero() {
            errors.push(
                ItemError::field(
                    ErrorPhase::Validation,
                    "total",
                    TOTALS_MISMATCH,
                    format!("net {} + tax {} does not equal total {} (diff {})", net, tax, total, diff.abs()),
                )
                .with_detail(json!({ "diff": diff.abs().to_string() })),
            );
        }
    }

    fn check_currency(&self, record: &Map<String, Value>, errors: &mut Vec<ItemError>) {
        if !self.rules.require_currency {
            return;
        }
        match Self::present(record, "currency") {
            Some(value) => {
                let code = value_text(value);
                if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                    errors.push(ItemError::field(
                        ErrorPhase::Validation,
                        "currency",
                        INVALID_CURRENCY,
                        format!("'{}' is not a 3-letter currency code", code),
                    ));
                }
            }
            None if self.rules.default_currency.is_some() => {}
            None => errors.push(ItemError::field(
                ErrorPhase::Validation,
                "currency",
                REQUIRED,
                "currency is required",
            )),
        }
    }

    fn check_country(&self, source_type: SourceType, record: &Map<String, Value>, errors: &mut Vec<ItemError>) {
        let country = Self::present(record, "country")
            .map(value_text)
            .or_else(|| self.rules.default_country.clone());
        let Some(country) = country else {
            return;
        };

        let mut merge = |field: &str, issues: Vec<super::CountryIssue>| {
            for issue in issues {
                errors.push(ItemError::field(ErrorPhase::Validation, field, &issue.code, issue.message));
            }
        };

        for field in TAX_ID_FIELDS {
            if let Some(value) = Self::present(record, field) {
                merge(*field, self.country.validate_tax_id(&country, &value_text(value)));
            }
        }
        if source_type == SourceType::Invoices {
            if let Some(value) = Self::present(record, "invoice_number") {
                merge(
                    "invoice_number",
                    self.country.validate_invoice_number(&country, &value_text(value)),
                );
            }
        }
        if source_type == SourceType::Products {
            let rates: Vec<Decimal> = Self::present(record, "tax_rate").and_then(parse_amount).into_iter().collect();
            if !rates.is_empty() {
                merge("tax_rate", self.country.validate_rates(&country, &rates));
            }
        }
    }
}

impl RecordValidator for ValidationGate {
    fn validate(&self, source_type: SourceType, record: &Map<String, Value>) -> Vec<ItemError> {
        let mut errors = Vec::new();
        self.check_required(source_type, record, &mut errors);
        self.check_formats(source_type, record, &mut errors);
        if source_type == SourceType::Invoices {
            self.check_totals(record, &mut errors);
        }
        if source_type != SourceType::Generic {
            self.check_currency(record, &mut errors);
        }
        if source_type == SourceType::Expenses
            && self.rules.require_category
            && Self::present(record, "category").is_none()
        {
            errors.push(ItemError::field(
                ErrorPhase::Validation,
                "category",
                CATEGORY_REQUIRED,
                "category is required for expenses",
            ));
        }
        self.check_country(source_type, record, &mut errors);
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::FormatCountryValidator;

    fn gate(rules: ValidationRules) -> ValidationGate {
        ValidationGate::new(rules, Arc::new(FormatCountryValidator))
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    fn invoice(total: &str) -> Map<String, Value> {
        obj(json!({
            "invoice_number": "001-002-000123",
            "invoice_date": "2024-03-15",
            "net": "100.00",
            "tax": "12.00",
            "total": total,
        }))
    }

    #[test]
    fn test_balanced_invoice_passes() {
        let errors = gate(ValidationRules::default()).validate(SourceType::Invoices, &invoice("112.00"));
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn test_totals_mismatch_reports_diff() {
        let errors = gate(ValidationRules::default()).validate(SourceType::Invoices, &invoice("112.01"));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code.as_deref(), Some(TOTALS_MISMATCH));
        assert_eq!(errors[0].detail, Some(json!({"diff": "0.01"})));
    }

    #[test]
    fn test_locale_amounts_reconcile() {
        let record = obj(json!({
            "invoice_number": "F-1",
            "invoice_date": "15 de marzo de 2024",
            "net": "1.000,00",
            "tax": "120,00",
            "total": "1.120,00",
        }));
        assert!(gate(ValidationRules::default()).validate(SourceType::Invoices, &record).is_empty());
    }

    #[test]
    fn test_required_and_format_errors_in_order() {
        let record = obj(json!({"date": "someday", "amount": "abc"}));
        let errors = gate(ValidationRules::default()).validate(SourceType::Bank, &record);
        let fields: Vec<_> = errors.iter().map(|e| (e.field.as_deref(), e.code.as_deref())).collect();
        assert_eq!(
            fields,
            vec![(Some("date"), Some(INVALID_DATE)), (Some("amount"), Some(INVALID_AMOUNT))]
        );

        let errors = gate(ValidationRules::default()).validate(SourceType::Bank, &obj(json!({"date": "2024-01-01"})));
        assert_eq!(errors[0].field.as_deref(), Some("amount"));
        assert_eq!(errors[0].code.as_deref(), Some(REQUIRED));
    }

    #[test]
    fn test_currency_toggle() {
        let mut record = invoice("112.00");
        record.insert("currency".into(), json!("US"));
        assert!(gate(ValidationRules::default()).validate(SourceType::Invoices, &record).is_empty());

        let rules = ValidationRules {
            require_currency: true,
            ..Default::default()
        };
        let errors = gate(rules.clone()).validate(SourceType::Invoices, &record);
        assert_eq!(errors[0].code.as_deref(), Some(INVALID_CURRENCY));

        record.remove("currency");
        let errors = gate(rules).validate(SourceType::Invoices, &record);
        assert_eq!(errors[0].code.as_deref(), Some(REQUIRED));
    }

    #[test]
    fn test_category_policy_only_for_expenses() {
        let record = obj(json!({"date": "2024-01-01", "amount": "3.50"}));
        let rules = ValidationRules::default();
        let errors = gate(rules.clone()).validate(SourceType::Expenses, &record);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code.as_deref(), Some(CATEGORY_REQUIRED));
        assert!(gate(rules).validate(SourceType::Bank, &record).is_empty());

        let relaxed = ValidationRules {
            require_category: false,
            ..Default::default()
        };
        assert!(gate(relaxed).validate(SourceType::Expenses, &record).is_empty());
    }

    #[test]
    fn test_country_errors_merged_verbatim() {
        let mut record = invoice("112.00");
        record.insert("issuer_tax_id".into(), json!("12"));
        assert!(gate(ValidationRules::default()).validate(SourceType::Invoices, &record).is_empty());

        record.insert("country".into(), json!("EC"));
        let errors = gate(ValidationRules::default()).validate(SourceType::Invoices, &record);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field.as_deref(), Some("issuer_tax_id"));
        assert_eq!(errors[0].code.as_deref(), Some("INVALID_TAX_ID"));
    }
}
