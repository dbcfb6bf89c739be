use serde::Serialize;
use serde_with::skip_serializing_none;

use crate::{guardrail::VerificationResult, weather::MetarRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Metar,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailStatus {
    Passed,
    Failed,
    Skipped,
}

/// The structured METAR block of a response. Nulls are kept: a missing wind
/// is data, not an absent section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetarPayload {
    pub station: String,
    pub time: String,
    pub raw: String,
    pub wind_direction: Option<u16>,
    pub wind_speed: Option<u16>,
    pub wind_gust: Option<u16>,
    pub temperature_c: Option<f64>,
    pub dewpoint_c: Option<f64>,
    pub flight_category: crate::weather::FlightCategory,
    pub source: crate::weather::MetarSource,
}

impl From<&MetarRecord> for MetarPayload {
    fn from(record: &MetarRecord) -> Self {
        Self {
            station: record.station.clone(),
            time: record.time.clone(),
            raw: record.raw.clone(),
            wind_direction: record.wind_direction,
            wind_speed: record.wind_speed,
            wind_gust: record.wind_gust,
            temperature_c: record.temperature_c,
            dewpoint_c: record.dewpoint_c,
            flight_category: record.flight_category,
            source: record.source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LandingPayload {
    pub runway_number: String,
    pub runway_heading: u16,
    pub crosswind_kt: f64,
    pub headwind_kt: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseDetails {
    pub verification: VerificationResult,
    pub loops: u32,
    pub tool_calls: Vec<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalResponse {
    pub response_type: ResponseType,
    pub metar: Option<MetarPayload>,
    pub landing: Option<LandingPayload>,
    pub text_response: Option<String>,
    pub guardrail_status: GuardrailStatus,
    pub is_fallback: bool,
    pub details: Option<ResponseDetails>,
}

impl FinalResponse {
    /// A plain text response carrying no METAR or landing block.
    pub fn text(
        text: impl Into<String>,
        status: GuardrailStatus,
        is_fallback: bool,
        details: Option<ResponseDetails>,
    ) -> Self {
        Self {
            response_type: ResponseType::Text,
            metar: None,
            landing: None,
            text_response: Some(text.into()),
            guardrail_status: status,
            is_fallback,
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_sections_are_omitted() {
        let response = FinalResponse::text("hello", GuardrailStatus::Skipped, false, None);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["response_type"], "text");
        assert_eq!(json["guardrail_status"], "skipped");
        assert!(json.get("metar").is_none());
        assert!(json.get("landing").is_none());
        assert!(json.get("details").is_none());
    }
}
