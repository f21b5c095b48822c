// src/normalize.rs

use crate::catalog::{FieldAlias, FieldKind};
use crate::decoder::FieldMap;
use crate::error::{NormalizationWarning, PipelineError};
use regex::Regex;
use time::Date;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tracing::warn;

/// Accepted statement-date layouts, tried in order.
const DATE_FORMATS: &[(&str, &[BorrowedFormatItem<'static>])] = &[
    (
        "Month D,YYYY",
        format_description!("[month repr:long case_sensitive:false] [day padding:none],[year]"),
    ),
    (
        "Month D, YYYY",
        format_description!("[month repr:long case_sensitive:false] [day padding:none], [year]"),
    ),
    (
        "Mon D,YYYY",
        format_description!("[month repr:short case_sensitive:false] [day padding:none],[year]"),
    ),
    (
        "Mon D, YYYY",
        format_description!("[month repr:short case_sensitive:false] [day padding:none], [year]"),
    ),
    (
        "MM/DD/YYYY",
        format_description!("[month padding:none]/[day padding:none]/[year]"),
    ),
    ("YYYY-MM-DD", format_description!("[year]-[month]-[day]")),
];

const ISO_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Parse a statement date using the first layout that fits.
pub fn parse_bill_date(raw: &str) -> Option<Date> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|(_, format)| Date::parse(raw, format).ok())
}

/// `"March 4, 2023"` -> `"2023-03-04"`.
pub fn normalize_date(raw: &str) -> Option<String> {
    parse_bill_date(raw).and_then(|d| d.format(ISO_DATE).ok())
}

/// Pull a 5-digit postal code (with optional 4-digit extension) out of an
/// address. The last match wins since street numbers come first.
pub fn extract_postal_code(text: &str) -> Option<String> {
    let re = Regex::new(r"\b(\d{5})(?:-(\d{4}))?\b").ok()?;
    re.captures_iter(text)
        .last()
        .and_then(|c| c.get(0))
        .map(|m| m.as_str().to_string())
}

/// A decoded bill after per-field clean-up.
#[derive(Debug, Clone)]
pub struct NormalizedBill {
    pub fields: FieldMap,
    pub postal_code: String,
    pub warnings: Vec<NormalizationWarning>,
}

pub struct FieldNormalizer;

impl FieldNormalizer {
    /// Rewrite date fields in place and extract the postal code.
    ///
    /// An unrecognised date is kept verbatim and reported as a warning. A
    /// missing or code-less customer address fails the bill, because the
    /// region lookup needs it.
    pub fn normalize(mut fields: FieldMap) -> Result<NormalizedBill, PipelineError> {
        let mut warnings = Vec::new();
        let mut postal_code = None;

        for alias in FieldAlias::ALL {
            match alias.kind() {
                FieldKind::Date => {
                    let Some(raw) = fields.get(alias).map(str::to_string) else {
                        continue;
                    };
                    match normalize_date(&raw) {
                        Some(iso) => {
                            fields.insert(alias, iso);
                        }
                        None => {
                            let warning = NormalizationWarning {
                                field: alias,
                                raw,
                                message: format!(
                                    "no accepted date format matched (tried {})",
                                    DATE_FORMATS.len()
                                ),
                            };
                            warn!(field = %alias, raw = %warning.raw, "Unrecognised date, keeping raw text");
                            warnings.push(warning);
                        }
                    }
                }
                FieldKind::Address => {
                    let raw = fields.get(alias).ok_or_else(|| {
                        PipelineError::FieldExtractionFailure {
                            field: alias,
                            reason: "not present in analysis result".to_string(),
                        }
                    })?;
                    let code = extract_postal_code(raw).ok_or_else(|| {
                        PipelineError::FieldExtractionFailure {
                            field: alias,
                            reason: format!("no postal code in {raw:?}"),
                        }
                    })?;
                    postal_code = Some(code);
                }
                FieldKind::Text => {}
            }
        }

        let postal_code = postal_code.ok_or_else(|| PipelineError::FieldExtractionFailure {
            field: FieldAlias::CustomerAddress,
            reason: "no address field to extract a postal code from".to_string(),
        })?;

        Ok(NormalizedBill {
            fields,
            postal_code,
            warnings,
        })
    }
}
