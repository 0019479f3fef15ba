//! Canonical field mapper
//!
//! Resolution order for each raw field name (after folding):
//! 1. Mapping template aliases (and the template's canonical names)
//! 2. Built-in alias table for the document type
//! 3. Jaro-Winkler match against every known alias, at or above
//!    [`FUZZY_THRESHOLD`]; reported as a warning
//!
//! Values of date and amount fields are normalized to ISO dates and plain
//! decimals when they parse; otherwise they are kept verbatim for the
//! validator to report. The raw record is never modified.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::aliases::{canonical_fields, default_aliases, resolve_alias};
use super::normalize::{fold_key, is_blank, value_text};
use super::values::{parse_amount, parse_date};
use crate::models::{merge_views, ErrorPhase, ItemError, Mapping, SourceType, Transform};
use crate::validation::gate::{amount_fields, date_fields};
use crate::validation::RecordValidator;

pub const FUZZY_THRESHOLD: f64 = 0.93;

/// Folded names shorter than this are never fuzzy matched
const FUZZY_MIN_LEN: usize = 4;

pub const TRANSFORM_FAILED: &str = "TRANSFORM_FAILED";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappingResult {
    pub normalized: Map<String, Value>,
    /// raw field name → canonical field
    pub mapped_fields: BTreeMap<String, String>,
    pub unmapped_fields: Vec<String>,
    pub validation_errors: Vec<ItemError>,
    pub warnings: Vec<String>,
}

impl MappingResult {
    pub fn is_valid(&self) -> bool {
        self.validation_errors.is_empty()
    }
}

#[derive(Default)]
pub struct CanonicalMapper {
    /// folded alias → canonical field
    template_aliases: HashMap<String, String>,
    transforms: BTreeMap<String, Vec<Transform>>,
    defaults: Map<String, Value>,
    validator: Option<Arc<dyn RecordValidator>>,
}

impl CanonicalMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, template: Option<&Mapping>) -> Self {
        if let Some(template) = template {
            for (canonical, aliases) in &template.fields {
                self.template_aliases.insert(fold_key(canonical), canonical.clone());
                for alias in aliases {
                    let folded = fold_key(alias);
                    if !folded.is_empty() {
                        self.template_aliases.insert(folded, canonical.clone());
                    }
                }
            }
            self.transforms = template.transforms.clone();
            self.defaults = template.defaults.clone();
        }
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn RecordValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    fn resolve(&self, folded: &str, doc_type: SourceType) -> Option<(String, Option<f64>)> {
        if let Some(canonical) = self.template_aliases.get(folded) {
            return Some((canonical.clone(), None));
        }
        if let Some(canonical) = resolve_alias(doc_type, folded) {
            return Some((canonical.to_string(), None));
        }
        if canonical_fields(doc_type).contains(&folded) {
            return Some((folded.to_string(), None));
        }
        if folded.len() < FUZZY_MIN_LEN {
            return None;
        }

        let mut best: Option<(&str, f64)> = None;
        let known = self
            .template_aliases
            .iter()
            .map(|(a, c)| (a.as_str(), c.as_str()))
            .chain(
                default_aliases(doc_type)
                    .iter()
                    .flat_map(|(field, aliases)| aliases.iter().map(move |a| (*a, *field))),
            );
        for (alias, canonical) in known {
            let score = strsim::jaro_winkler(folded, alias);
            if score >= FUZZY_THRESHOLD && best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((canonical, score));
            }
        }
        best.map(|(canonical, score)| (canonical.to_string(), Some(score)))
    }

    /// Map one raw record onto the canonical fields of `doc_type`
    pub fn map_fields(&self, raw: &Map<String, Value>, doc_type: SourceType) -> MappingResult {
        self.map_with_overrides(raw, &Map::new(), doc_type)
    }

    /// Like [`map_fields`](Self::map_fields), with user corrections laid over
    /// the mapped fields before derivation, defaults, transforms and
    /// validation. Override keys may be canonical names or raw aliases.
    pub fn map_with_overrides(
        &self,
        raw: &Map<String, Value>,
        overrides: &Map<String, Value>,
        doc_type: SourceType,
    ) -> MappingResult {
        let mut result = MappingResult::default();
        let mut sources: HashMap<String, String> = HashMap::new();
        let identity = doc_type == SourceType::Generic && self.template_aliases.is_empty();

        for (name, value) in raw {
            let folded = fold_key(name);
            let resolved = if identity {
                (!folded.is_empty()).then(|| (folded.clone(), None))
            } else {
                self.resolve(&folded, doc_type)
            };

            let Some((canonical, fuzzy)) = resolved else {
                result.unmapped_fields.push(name.clone());
                continue;
            };
            if let Some(score) = fuzzy {
                result.warnings.push(format!(
                    "'{}' fuzzy-matched to '{}' (similarity {:.2})",
                    name, canonical, score
                ));
            }

            let occupied = result
                .normalized
                .get(&canonical)
                .map(|v| !is_blank(v))
                .unwrap_or(false);
            if occupied {
                if !is_blank(value) {
                    result.warnings.push(format!(
                        "'{}' also maps to '{}'; kept value from '{}'",
                        name,
                        canonical,
                        sources.get(&canonical).map(String::as_str).unwrap_or("?")
                    ));
                }
                result.mapped_fields.insert(name.clone(), canonical);
                continue;
            }

            result.normalized.insert(canonical.clone(), normalize_value(doc_type, &canonical, value));
            sources.insert(canonical.clone(), name.clone());
            result.mapped_fields.insert(name.clone(), canonical);
        }

        for (name, value) in overrides {
            let folded = fold_key(name);
            if folded.is_empty() {
                continue;
            }
            let canonical = if doc_type == SourceType::Generic && self.template_aliases.is_empty() {
                folded
            } else {
                self.resolve(&folded, doc_type).map(|(c, _)| c).unwrap_or(folded)
            };
            result.normalized.insert(canonical.clone(), normalize_value(doc_type, &canonical, value));
        }

        if doc_type == SourceType::Bank {
            derive_bank_amount(&mut result);
        }

        for (field, default) in &self.defaults {
            let missing = result.normalized.get(field).map(is_blank).unwrap_or(true);
            if missing {
                result.normalized.insert(field.clone(), default.clone());
            }
        }

        for (field, transforms) in &self.transforms {
            let Some(value) = result.normalized.get(field).cloned() else {
                continue;
            };
            match apply_transforms(&value, transforms) {
                Ok(transformed) => {
                    result.normalized.insert(field.clone(), transformed);
                }
                Err(message) => result.validation_errors.push(ItemError::field(
                    ErrorPhase::Mapping,
                    field,
                    TRANSFORM_FAILED,
                    message,
                )),
            }
        }

        if let Some(validator) = &self.validator {
            let merged = merge_views(raw, &result.normalized);
            for error in validator.validate(doc_type, &merged) {
                let already = result
                    .validation_errors
                    .iter()
                    .any(|e| e.field.is_some() && e.field == error.field);
                if !already {
                    result.validation_errors.push(error);
                }
            }
        }

        result
    }
}

/// Built-in value normalization by field kind
fn normalize_value(doc_type: SourceType, canonical: &str, value: &Value) -> Value {
    if date_fields(doc_type).contains(&canonical) {
        if let Some(date) = parse_date(value) {
            return Value::String(date.format("%Y-%m-%d").to_string());
        }
    } else if amount_fields(doc_type).contains(&canonical) {
        if let Some(amount) = parse_amount(value) {
            return Value::String(amount.to_string());
        }
    } else if canonical == "currency" && !is_blank(value) {
        return Value::String(value_text(value).to_uppercase());
    }
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other.clone(),
    }
}

/// Signed amount from separate debit/credit columns when no amount column exists
fn derive_bank_amount(result: &mut MappingResult) {
    let has_amount = result.normalized.get("amount").map(|v| !is_blank(v)).unwrap_or(false);
    if has_amount {
        return;
    }
    let side = |field: &str| match result.normalized.get(field) {
        Some(v) if !is_blank(v) => Some(parse_amount(v)),
        _ => None,
    };
    let amount = match (side("credit"), side("debit")) {
        (None, None) => return,
        (Some(Some(credit)), None) => credit.abs(),
        (None, Some(Some(debit))) => -debit.abs(),
        (Some(Some(credit)), Some(Some(debit))) => credit.abs() - debit.abs(),
        // An unparseable side is left for the validator
        _ => return,
    };
    result.normalized.insert("amount".into(), Value::String(amount.to_string()));
    result.warnings.push("amount derived from credit/debit columns".into());
}

fn apply_transforms(value: &Value, transforms: &[Transform]) -> Result<Value, String> {
    let mut current = value.clone();
    for transform in transforms {
        let text = value_text(&current);
        current = match transform {
            Transform::Trim => Value::String(text),
            Transform::Upper => Value::String(text.to_uppercase()),
            Transform::Lower => Value::String(text.to_lowercase()),
            Transform::Digits => Value::String(text.chars().filter(|c| c.is_ascii_digit()).collect()),
            Transform::Number => match parse_amount(&current) {
                Some(amount) => Value::String(amount.to_string()),
                None => return Err(format!("'{}' cannot be read as a number", text)),
            },
            Transform::Date => match parse_date(&current) {
                Some(date) => Value::String(date.format("%Y-%m-%d").to_string()),
                None => return Err(format!("'{}' cannot be read as a date", text)),
            },
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MappingInput;
    use crate::validation::{FormatCountryValidator, ValidationGate, ValidationRules};
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    fn gate() -> Arc<dyn RecordValidator> {
        Arc::new(ValidationGate::new(ValidationRules::default(), Arc::new(FormatCountryValidator)))
    }

    #[test]
    fn test_spanish_invoice_headers() {
        let raw = obj(json!({
            "Nº Factura": "001-002-000123",
            "Fecha Emisión": "15/03/2024",
            "Subtotal": "100,00",
            "IVA": "12,00",
            "Total": "112,00",
            "Vendedor interno": "Ana",
        }));
        let result = CanonicalMapper::new().with_validator(gate()).map_fields(&raw, SourceType::Invoices);
        assert_eq!(result.normalized["invoice_number"], json!("001-002-000123"));
        assert_eq!(result.normalized["invoice_date"], json!("2024-03-15"));
        assert_eq!(result.normalized["total"], json!("112.00"));
        assert_eq!(result.unmapped_fields, vec!["Vendedor interno"]);
        assert!(result.is_valid(), "{:?}", result.validation_errors);
    }

    #[test]
    fn test_overrides_replace_mapped_value() {
        let raw = obj(json!({"Fecha": "2024-01-05", "Monto": "abc", "Detalle": "x"}));
        let overrides = obj(json!({"amount": "1.234,50"}));
        let result = CanonicalMapper::new()
            .with_validator(gate())
            .map_with_overrides(&raw, &overrides, SourceType::Bank);
        assert_eq!(result.normalized["amount"], json!("1234.50"));
        assert!(result.is_valid(), "{:?}", result.validation_errors);

        let plain = CanonicalMapper::new().with_validator(gate()).map_fields(&raw, SourceType::Bank);
        assert_eq!(plain.validation_errors[0].field.as_deref(), Some("amount"));
    }

    #[test]
    fn test_template_overrides_defaults() {
        let mapping = Mapping::from_input(
            "t1",
            MappingInput {
                name: "acme".into(),
                source_type: Some(SourceType::Bank),
                fields: BTreeMap::from([("description".to_string(), vec!["Glosa".to_string()])]),
                transforms: BTreeMap::from([("description".to_string(), vec![Transform::Upper])]),
                defaults: obj(json!({"currency": "USD"})),
                dedupe_keys: vec![],
            },
        );
        let raw = obj(json!({"Glosa": "pago luz", "Fecha": "2024-01-05", "Importe": "-40"}));
        let result = CanonicalMapper::new().with_template(Some(&mapping)).map_fields(&raw, SourceType::Bank);
        assert_eq!(result.normalized["description"], json!("PAGO LUZ"));
        assert_eq!(result.normalized["currency"], json!("USD"));
        assert_eq!(result.normalized["amount"], json!("-40"));
        assert_eq!(result.mapped_fields["Glosa"], "description");
    }

    #[test]
    fn test_fuzzy_match_warns() {
        let raw = obj(json!({"Descripcon": "typo header", "date": "2024-01-01", "amount": "1"}));
        let result = CanonicalMapper::new().map_fields(&raw, SourceType::Bank);
        assert_eq!(result.mapped_fields["Descripcon"], "description");
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("fuzzy"));
    }

    #[test]
    fn test_bank_amount_from_debit_credit() {
        let raw = obj(json!({"Fecha": "01/02/2024", "Debe": "25,50", "Haber": ""}));
        let result = CanonicalMapper::new().with_validator(gate()).map_fields(&raw, SourceType::Bank);
        assert_eq!(result.normalized["amount"], json!("-25.50"));
        assert!(result.is_valid(), "{:?}", result.validation_errors);
    }

    #[test]
    fn test_malformed_amount_reported_on_field() {
        let raw = obj(json!({"Fecha": "01/02/2024", "Importe": "12x4", "Concepto": "x"}));
        let result = CanonicalMapper::new().with_validator(gate()).map_fields(&raw, SourceType::Bank);
        assert_eq!(result.normalized["amount"], json!("12x4"));
        assert_eq!(result.validation_errors.len(), 1);
        assert_eq!(result.validation_errors[0].field.as_deref(), Some("amount"));
    }

    #[test]
    fn test_generic_keeps_every_field() {
        let raw = obj(json!({"Some Col": 1, "Other": "x"}));
        let result = CanonicalMapper::new().map_fields(&raw, SourceType::Generic);
        assert_eq!(result.normalized, obj(json!({"some_col": 1, "other": "x"})));
        assert!(result.unmapped_fields.is_empty());
    }

    #[test]
    fn test_transform_failure_is_mapping_error() {
        let mapping = Mapping::from_input(
            "t1",
            MappingInput {
                name: "m".into(),
                source_type: Some(SourceType::Products),
                transforms: BTreeMap::from([("name".to_string(), vec![Transform::Number])]),
                ..Default::default()
            },
        );
        let raw = obj(json!({"Producto": "Jabón"}));
        let result = CanonicalMapper::new().with_template(Some(&mapping)).map_fields(&raw, SourceType::Products);
        assert_eq!(result.validation_errors[0].phase, ErrorPhase::Mapping);
        assert_eq!(result.validation_errors[0].code.as_deref(), Some(TRANSFORM_FAILED));
    }
}
