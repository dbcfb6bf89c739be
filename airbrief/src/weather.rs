use std::{sync::Arc, time::Instant};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::warn;
use tracing_unwrap::ResultExt;

use crate::{
    audit::{AuditCategory, AuditEventEntry, AuditSink},
    error::{ApplicationError, ApplicationResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlightCategory {
    Vfr,
    Mvfr,
    Ifr,
    Lifr,
    Unknown,
}

impl FlightCategory {
    fn from_code(code: &str) -> Self {
        match code {
            "VFR" => Self::Vfr,
            "MVFR" => Self::Mvfr,
            "IFR" => Self::Ifr,
            "LIFR" => Self::Lifr,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for FlightCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            Self::Vfr => "VFR",
            Self::Mvfr => "MVFR",
            Self::Ifr => "IFR",
            Self::Lifr => "LIFR",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetarSource {
    Live,
    Fallback,
}

/// One normalized weather observation for a station. Created fresh per
/// request; never shared across requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetarRecord {
    pub station: String,
    pub time: String,
    pub raw: String,
    pub wind_direction: Option<u16>,
    pub wind_speed: Option<u16>,
    pub wind_gust: Option<u16>,
    pub temperature_c: Option<f64>,
    pub dewpoint_c: Option<f64>,
    pub visibility_sm: Option<f64>,
    pub altimeter: Option<String>,
    pub flight_category: FlightCategory,
    pub source: MetarSource,
}

const FETCH_RETRIES: usize = 2;

/// Contract-bound wrapper over the aviationweather.gov METAR data API.
/// Upstream failure never surfaces as an error; it degrades to a
/// deterministic `source=fallback` record for the station.
#[derive(Debug)]
pub struct WeatherService {
    client: Option<reqwest::Client>,
    audit: Arc<AuditSink>,
}

impl WeatherService {
    pub fn new(audit: Arc<AuditSink>) -> Self {
        let client = reqwest::ClientBuilder::new()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap_or_log();
        Self {
            client: Some(client),
            audit,
        }
    }

    /// A service that never touches the network; every station resolves to
    /// its fallback record. Used in tests and `--offline` runs.
    pub fn offline(audit: Arc<AuditSink>) -> Self {
        Self {
            client: None,
            audit,
        }
    }

    pub async fn fetch_metar(&self, icao: &str) -> ApplicationResult<MetarRecord> {
        let station = normalize_icao(icao)?;
        let started = Instant::now();
        let outcome = match &self.client {
            Some(client) => self.fetch_live(client, &station).await,
            None => Err(ApplicationError::UpstreamWeatherUnavailable {
                station: station.clone(),
                message: "offline mode".to_string(),
            }),
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(record) => {
                self.write_fetch_trace(&station, true, latency_ms, MetarSource::Live);
                Ok(record)
            }
            Err(e) => {
                warn!("METAR fetch for {} degraded to fallback: {}", station, e);
                self.write_fetch_trace(&station, false, latency_ms, MetarSource::Fallback);
                Ok(fallback_record(&station))
            }
        }
    }

    #[tracing::instrument(skip(self, client))]
    async fn fetch_live(
        &self,
        client: &reqwest::Client,
        station: &str,
    ) -> ApplicationResult<MetarRecord> {
        let url = format!(
            "https://aviationweather.gov/api/data/metar?ids={}&format=json",
            station
        );
        let mut first_error: Option<ApplicationError> = None;
        for _attempt in 0..FETCH_RETRIES {
            match self.request_once(client, &url).await {
                Ok(items) => {
                    return items
                        .first()
                        .map(|item| record_from_upstream(station, item))
                        .ok_or_else(|| ApplicationError::UpstreamWeatherUnavailable {
                            station: station.to_string(),
                            message: "no observation returned".to_string(),
                        });
                }
                Err(e) => {
                    warn!("Failed to get METAR from {}: {}", url, e);
                    first_error.get_or_insert(e.into());
                }
            }
        }
        Err(first_error.expect("retry loop ran at least once"))
    }

    async fn request_once(
        &self,
        client: &reqwest::Client,
        url: &str,
    ) -> reqwest::Result<Vec<Value>> {
        client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    fn write_fetch_trace(&self, station: &str, ok: bool, latency_ms: u64, source: MetarSource) {
        self.audit.record(
            AuditCategory::Fetch,
            json!({ "station": station }),
            vec![AuditEventEntry::new(
                "fetch",
                json!({ "ok": ok, "latency_ms": latency_ms, "source": source }),
            )],
        );
    }
}

fn normalize_icao(icao: &str) -> ApplicationResult<String> {
    let station = icao.trim().to_ascii_uppercase();
    if station.len() == 4 && station.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(station)
    } else {
        Err(ApplicationError::InvalidStation(icao.to_string()))
    }
}

fn record_from_upstream(station: &str, item: &Value) -> MetarRecord {
    MetarRecord {
        station: station.to_string(),
        time: upstream_time(item),
        raw: item["rawOb"].as_str().unwrap_or_default().to_string(),
        wind_direction: upstream_wind_direction(&item["wdir"]),
        wind_speed: upstream_knots(&item["wspd"]),
        wind_gust: upstream_knots(&item["wgst"]),
        temperature_c: item["temp"].as_f64(),
        dewpoint_c: item["dewp"].as_f64(),
        visibility_sm: upstream_visibility(&item["visib"]),
        altimeter: item["altim"].as_f64().map(|hpa| format!("{hpa:.1} hPa")),
        flight_category: item["fltCat"]
            .as_str()
            .map(FlightCategory::from_code)
            .unwrap_or(FlightCategory::Unknown),
        source: MetarSource::Live,
    }
}

fn upstream_time(item: &Value) -> String {
    if let Some(report_time) = item["reportTime"].as_str() {
        return report_time.to_string();
    }
    match item["obsTime"].as_i64() {
        Some(epoch) => epoch.to_string(),
        None => "unknown".to_string(),
    }
}

/// `wdir` is an integer in degrees, or the string `"VRB"` for variable wind.
fn upstream_wind_direction(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .filter(|d| (0.0..=360.0).contains(d))
            .map(|d| d as u16),
        _ => None,
    }
}

fn upstream_knots(value: &Value) -> Option<u16> {
    value.as_f64().filter(|v| *v >= 0.0).map(|v| v.round() as u16)
}

/// `visib` is a number of statute miles, or a string like `"10+"`.
fn upstream_visibility(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim_end_matches('+').parse().ok(),
        _ => None,
    }
}

/// Deterministic per-station records used when upstream is unreachable.
/// Stations outside this set degrade to a minimal all-null record.
pub fn fallback_record(station: &str) -> MetarRecord {
    let (raw, wind_direction, wind_speed, wind_gust, temperature_c, dewpoint_c, category) =
        match station {
            "KMCO" => (
                "KMCO 011553Z 09008KT 10SM FEW035 31/22 A3008",
                Some(90),
                Some(8),
                None,
                Some(31.0),
                Some(22.0),
                FlightCategory::Vfr,
            ),
            "KDEN" => (
                "KDEN 011553Z 22010KT 10SM SCT080 24/08 A3021",
                Some(220),
                Some(10),
                None,
                Some(24.0),
                Some(8.0),
                FlightCategory::Vfr,
            ),
            "KSFO" => (
                "KSFO 011556Z 28012KT 8SM BKN012 17/12 A3015",
                Some(280),
                Some(12),
                None,
                Some(17.0),
                Some(12.0),
                FlightCategory::Mvfr,
            ),
            "KBOS" => (
                "KBOS 011554Z 04015G22KT 6SM -RA BKN018 14/11 A2990",
                Some(40),
                Some(15),
                Some(22),
                Some(14.0),
                Some(11.0),
                FlightCategory::Mvfr,
            ),
            "RPLL" => (
                "RPLL 011600Z 27011KT 9999 SCT020 29/24 Q1009",
                Some(270),
                Some(11),
                None,
                Some(29.0),
                Some(24.0),
                FlightCategory::Vfr,
            ),
            "ENGM" => (
                "ENGM 011550Z 19006KT 9999 FEW030 12/07 Q1018",
                Some(190),
                Some(6),
                None,
                Some(12.0),
                Some(7.0),
                FlightCategory::Vfr,
            ),
            _ => {
                return MetarRecord {
                    station: station.to_string(),
                    time: "unavailable".to_string(),
                    raw: String::new(),
                    wind_direction: None,
                    wind_speed: None,
                    wind_gust: None,
                    temperature_c: None,
                    dewpoint_c: None,
                    visibility_sm: None,
                    altimeter: None,
                    flight_category: FlightCategory::Unknown,
                    source: MetarSource::Fallback,
                };
            }
        };
    MetarRecord {
        station: station.to_string(),
        time: "011553Z".to_string(),
        raw: raw.to_string(),
        wind_direction,
        wind_speed,
        wind_gust,
        temperature_c,
        dewpoint_c,
        visibility_sm: Some(10.0),
        altimeter: None,
        flight_category: category,
        source: MetarSource::Fallback,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;

    use super::*;

    pub(crate) fn test_sink() -> (Arc<AuditSink>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(AuditSink::new(dir.path().join("audit.jsonl")));
        (sink, dir)
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_offline_fetch_uses_fallback() {
        let (sink, _dir) = test_sink();
        let service = WeatherService::offline(sink);
        let record = service.fetch_metar("kden").await.unwrap();
        assert!(logs_contain("degraded to fallback"));
        assert_eq!(record.station, "KDEN");
        assert_eq!(record.wind_direction, Some(220));
        assert_eq!(record.wind_speed, Some(10));
        assert_eq!(record.source, MetarSource::Fallback);

        let again = service.fetch_metar("KDEN").await.unwrap();
        assert_eq!(record, again);
    }

    #[tokio::test]
    async fn test_unknown_station_fallback_is_minimal() {
        let (sink, _dir) = test_sink();
        let service = WeatherService::offline(sink);
        let record = service.fetch_metar("ZZZZ").await.unwrap();
        assert_eq!(record.wind_direction, None);
        assert_eq!(record.flight_category, FlightCategory::Unknown);
        assert_eq!(record.source, MetarSource::Fallback);
    }

    #[tokio::test]
    async fn test_invalid_station_is_a_client_error() {
        let (sink, _dir) = test_sink();
        let service = WeatherService::offline(sink);
        assert!(matches!(
            service.fetch_metar("KD3N").await,
            Err(ApplicationError::InvalidStation(_))
        ));
        assert!(matches!(
            service.fetch_metar("KDENVER").await,
            Err(ApplicationError::InvalidStation(_))
        ));
    }

    #[test]
    fn test_upstream_record_parsing() {
        let item = json!({
            "rawOb": "KDEN 011553Z 22010KT 10SM SCT080 24/08 A3021",
            "reportTime": "2026-08-01 15:53:00",
            "wdir": 220,
            "wspd": 10,
            "wgst": null,
            "temp": 24.0,
            "dewp": 8.0,
            "visib": "10+",
            "altim": 1023.1,
            "fltCat": "VFR"
        });
        let record = record_from_upstream("KDEN", &item);
        assert_eq!(record.wind_direction, Some(220));
        assert_eq!(record.wind_speed, Some(10));
        assert_eq!(record.wind_gust, None);
        assert_eq!(record.visibility_sm, Some(10.0));
        assert_eq!(record.altimeter.as_deref(), Some("1023.1 hPa"));
        assert_eq!(record.flight_category, FlightCategory::Vfr);
        assert_eq!(record.source, MetarSource::Live);
    }

    #[test]
    fn test_variable_wind_direction_is_null() {
        let item = json!({ "wdir": "VRB", "wspd": 4, "fltCat": "VFR" });
        let record = record_from_upstream("KMCO", &item);
        assert_eq!(record.wind_direction, None);
        assert_eq!(record.wind_speed, Some(4));
    }
}
