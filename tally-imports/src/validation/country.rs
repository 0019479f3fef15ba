//! Per-country tax rule collaborator
//!
//! Checksum algorithms per jurisdiction live outside this service. The
//! gate only needs the contract below; [`FormatCountryValidator`] is the
//! built-in fallback that checks shape, not checksums.

use rust_decimal::Decimal;

/// One problem reported by a country validator, merged verbatim into the
/// item's error list
#[derive(Debug, Clone, PartialEq)]
pub struct CountryIssue {
    pub code: String,
    pub message: String,
}

impl CountryIssue {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

pub trait CountryValidator: Send + Sync {
    fn validate_tax_id(&self, country: &str, tax_id: &str) -> Vec<CountryIssue>;

    fn validate_invoice_number(&self, country: &str, invoice_number: &str) -> Vec<CountryIssue>;

    /// Tax rates in percent (12 = 12%)
    fn validate_rates(&self, country: &str, rates: &[Decimal]) -> Vec<CountryIssue>;
}

/// Shape-only checks valid for any country
#[derive(Debug, Default, Clone, Copy)]
pub struct FormatCountryValidator;

const TAX_ID_LEN: std::ops::RangeInclusive<usize> = 5..=20;

impl CountryValidator for FormatCountryValidator {
    fn validate_tax_id(&self, country: &str, tax_id: &str) -> Vec<CountryIssue> {
        let compact: String = tax_id
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '.' | '/'))
            .collect();
        if !compact.chars().all(|c| c.is_ascii_alphanumeric()) {
            return vec![CountryIssue::new(
                "INVALID_TAX_ID",
                format!("Tax id '{}' contains unexpected characters", tax_id),
            )];
        }
        if !TAX_ID_LEN.contains(&compact.len()) {
            return vec![CountryIssue::new(
                "INVALID_TAX_ID",
                format!(
                    "Tax id '{}' has {} characters; {} expects {}-{}",
                    tax_id,
                    compact.len(),
                    country,
                    TAX_ID_LEN.start(),
                    TAX_ID_LEN.end()
                ),
            )];
        }
        Vec::new()
    }

    fn validate_invoice_number(&self, _country: &str, invoice_number: &str) -> Vec<CountryIssue> {
        if invoice_number.chars().any(|c| c.is_control()) {
            return vec![CountryIssue::new(
                "INVALID_INVOICE_NUMBER",
                "Invoice number contains control characters",
            )];
        }
        Vec::new()
    }

    fn validate_rates(&self, _country: &str, rates: &[Decimal]) -> Vec<CountryIssue> {
        rates
            .iter()
            .filter(|r| r.is_sign_negative() || **r > Decimal::ONE_HUNDRED)
            .map(|r| CountryIssue::new("INVALID_TAX_RATE", format!("Tax rate {} is outside 0-100", r)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tax_id_shape() {
        let v = FormatCountryValidator;
        assert!(v.validate_tax_id("EC", "1790012345001").is_empty());
        assert!(v.validate_tax_id("ES", "B-1234567-8").is_empty());
        assert_eq!(v.validate_tax_id("EC", "123")[0].code, "INVALID_TAX_ID");
        assert_eq!(v.validate_tax_id("EC", "12#45678").len(), 1);
    }

    #[test]
    fn test_rates_range() {
        let v = FormatCountryValidator;
        assert!(v.validate_rates("EC", &[Decimal::new(12, 0)]).is_empty());
        assert_eq!(v.validate_rates("EC", &[Decimal::new(-1, 0), Decimal::new(150, 0)]).len(), 2);
    }
}
