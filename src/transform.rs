// src/transform.rs

use crate::analysis::DocumentRef;
use crate::catalog::FieldAlias;
use crate::config::EnrichmentSection;
use crate::error::{BoxError, PipelineError};
use crate::normalize::NormalizedBill;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use urlencoding::encode;

/// Purchased electricity is reported under scope 2.
pub const ELECTRICITY_SCOPE: u8 = 2;

pub const ELECTRICITY_UNITS: &str = "kwh";

/// Emission-factor family the record is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    #[default]
    GridRegionLocationBased,
    GridRegionMarketBased,
}

/// Grid region a postal code belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionClassification {
    /// Short region code, e.g. `SRMW`.
    pub region: String,
    /// Human-readable region name, used as the record's activity.
    pub name: String,
}

#[async_trait]
pub trait RegionClassifier: Send + Sync {
    async fn classify(
        &self,
        country: &str,
        postal_code: &str,
    ) -> Result<RegionClassification, BoxError>;
}

/// Region lookup over HTTP: `GET {base_url}/classify?country=..&postal_code=..`.
pub struct HttpRegionClassifier {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRegionClassifier {
    pub fn new(section: &EnrichmentSection) -> Self {
        info!(url = %section.base_url, "Using region enrichment service");
        Self {
            client: Client::new(),
            base_url: section.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(section.timeout_secs),
        }
    }
}

#[async_trait]
impl RegionClassifier for HttpRegionClassifier {
    async fn classify(
        &self,
        country: &str,
        postal_code: &str,
    ) -> Result<RegionClassification, BoxError> {
        let url = format!(
            "{}/classify?country={}&postal_code={}",
            self.base_url,
            encode(country),
            encode(postal_code)
        );

        let response = self.client.get(&url).timeout(self.timeout).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("region lookup {status}: {body}").into());
        }

        Ok(response.json().await?)
    }
}

/// One utility bill in the canonical activity schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub activity_event_id: String,
    pub supplier: String,
    pub scope: u8,
    pub category: Category,
    pub activity: String,
    pub raw_data: String,
    pub units: String,
    pub asset_id: String,
    pub origin_measurement_timestamp: String,
    pub postal_code: String,
    pub source: String,
}

/// Deduplication key for a bill. Same inputs, same id, on every run.
pub fn activity_event_id(supplier: &str, meter_id: &str, bill_date: &str) -> String {
    format!("{}|{}|{}", supplier.trim(), meter_id.trim(), bill_date.trim())
}

pub struct RecordTransformer {
    classifier: Arc<dyn RegionClassifier>,
    country: String,
    category: Category,
}

impl RecordTransformer {
    pub fn new(classifier: Arc<dyn RegionClassifier>, country: String, category: Category) -> Self {
        Self {
            classifier,
            country,
            category,
        }
    }

    pub async fn transform(
        &self,
        bill: &NormalizedBill,
        source: &DocumentRef,
    ) -> Result<ActivityRecord, PipelineError> {
        let supplier = required(bill, FieldAlias::UtilityProviderName)?;
        let meter_id = required(bill, FieldAlias::MeterId)?;
        let bill_date = required(bill, FieldAlias::BillDate)?;
        let usage = required(bill, FieldAlias::KwhUsage)?;

        let event_id = activity_event_id(supplier, meter_id, bill_date);

        let region = self
            .classifier
            .classify(&self.country, &bill.postal_code)
            .await
            .map_err(|e| PipelineError::EnrichmentFailure(e.to_string()))?;
        debug!(postal_code = %bill.postal_code, region = %region.region, "Region classified");

        Ok(ActivityRecord {
            activity_event_id: event_id,
            supplier: supplier.to_string(),
            scope: ELECTRICITY_SCOPE,
            category: self.category,
            activity: region.name,
            raw_data: usage.to_string(),
            units: ELECTRICITY_UNITS.to_string(),
            asset_id: meter_id.to_string(),
            origin_measurement_timestamp: bill_date.to_string(),
            postal_code: bill.postal_code.clone(),
            source: source.to_string(),
        })
    }
}

fn required(bill: &NormalizedBill, alias: FieldAlias) -> Result<&str, PipelineError> {
    bill.fields
        .get(alias)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PipelineError::FieldExtractionFailure {
            field: alias,
            reason: "missing or empty in analysis result".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::FieldMap;
    use crate::testing::FakeRegions;

    fn bill(date: &str) -> NormalizedBill {
        let fields: FieldMap = [
            (FieldAlias::UtilityProviderName, " Ameren Illinois "),
            (FieldAlias::MeterId, "ES-100"),
            (FieldAlias::BillDate, date),
            (FieldAlias::KwhUsage, "1,204"),
            (FieldAlias::CustomerAddress, "1 Elm St, Springfield, IL 62704"),
        ]
        .into_iter()
        .map(|(a, v)| (a, v.to_string()))
        .collect();
        NormalizedBill {
            fields,
            postal_code: "62704".to_string(),
            warnings: Vec::new(),
        }
    }

    fn transformer(regions: FakeRegions) -> RecordTransformer {
        RecordTransformer::new(
            Arc::new(regions),
            "US".to_string(),
            Category::GridRegionLocationBased,
        )
    }

    #[test]
    fn test_event_id_is_deterministic() {
        let a = activity_event_id("Ameren Illinois", "ES-100", "2023-03-04");
        let b = activity_event_id("Ameren Illinois ", " ES-100", "2023-03-04");
        assert_eq!(a, "Ameren Illinois|ES-100|2023-03-04");
        assert_eq!(a, b);
        assert_ne!(a, activity_event_id("Ameren Illinois", "ES-101", "2023-03-04"));
    }

    #[tokio::test]
    async fn test_record_assembled_from_fields_and_region() {
        let t = transformer(FakeRegions::new().with("62704", "SRMW", "SERC Midwest"));
        let source = DocumentRef::new("bills", "incoming/march.pdf");

        let record = t.transform(&bill("2023-03-04"), &source).await.unwrap();
        assert_eq!(record.activity_event_id, "Ameren Illinois|ES-100|2023-03-04");
        assert_eq!(record.supplier, "Ameren Illinois");
        assert_eq!(record.scope, 2);
        assert_eq!(record.activity, "SERC Midwest");
        assert_eq!(record.raw_data, "1,204");
        assert_eq!(record.units, "kwh");
        assert_eq!(record.source, "bills/incoming/march.pdf");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["category"], "grid-region-location-based");
    }

    #[tokio::test]
    async fn test_repeated_transform_gives_same_record() {
        let t = transformer(FakeRegions::new().with("62704", "SRMW", "SERC Midwest"));
        let source = DocumentRef::new("bills", "incoming/march.pdf");
        let first = t.transform(&bill("2023-03-04"), &source).await.unwrap();
        let second = t.transform(&bill("2023-03-04"), &source).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_enrichment_failure_blocks_record() {
        let regions = FakeRegions::new();
        let t = transformer(regions);
        let err = t
            .transform(&bill("2023-03-04"), &DocumentRef::new("b", "k"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::EnrichmentFailure(_)));
    }

    #[tokio::test]
    async fn test_missing_meter_id_is_extraction_failure() {
        let t = transformer(FakeRegions::new().with("62704", "SRMW", "SERC Midwest"));
        let mut b = bill("2023-03-04");
        b.fields.insert(FieldAlias::MeterId, "   ".to_string());
        let err = t.transform(&b, &DocumentRef::new("b", "k")).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::FieldExtractionFailure {
                field: FieldAlias::MeterId,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_country_and_postal_code_passed_to_lookup() {
        let regions = Arc::new(FakeRegions::new().with("62704", "SRMW", "SERC Midwest"));
        let t = RecordTransformer::new(
            regions.clone(),
            "US".to_string(),
            Category::GridRegionMarketBased,
        );
        let record = t
            .transform(&bill("2023-03-04"), &DocumentRef::new("b", "k"))
            .await
            .unwrap();
        assert_eq!(record.category, Category::GridRegionMarketBased);
        assert_eq!(regions.calls(), vec![("US".to_string(), "62704".to_string())]);
    }
}
