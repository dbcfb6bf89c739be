use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;
use windcalc::WindString;

use crate::{
    aircraft,
    airports::{self, RunwaySelection},
    audit::{AuditCategory, AuditSink},
    error::ApplicationError,
    settings::Settings,
    weather::{MetarRecord, WeatherService},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Number,
}

#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
    pub range: Option<(f64, f64)>,
}

const fn required_string(name: &'static str) -> ArgSpec {
    ArgSpec {
        name,
        kind: ArgKind::String,
        required: true,
        range: None,
    }
}

const fn optional_string(name: &'static str) -> ArgSpec {
    ArgSpec {
        name,
        kind: ArgKind::String,
        required: false,
        range: None,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub args: &'static [ArgSpec],
}

/// The tool table the loop and the LLM catalog share.
pub static TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "fetch_metar",
        description: "Fetch the current METAR for an airport by 4 letter ICAO code.",
        args: &[required_string("icao")],
    },
    ToolSpec {
        name: "select_best_runway",
        description: "Pick the runway with the least crosswind for an airport, \
                      given the wind as 'DDD @ SS G GG'. A preferred runway \
                      number overrides the search.",
        args: &[
            required_string("icao"),
            optional_string("wind"),
            optional_string("preferred_runway"),
        ],
    },
    ToolSpec {
        name: "fetch_aircraft_specs",
        description: "Look up book performance numbers for an aircraft type code.",
        args: &[required_string("aircraft_type")],
    },
    ToolSpec {
        name: "calculate_fuel_burn",
        description: "Compute fuel burned and reserves for a flight of the given length in hours.",
        args: &[
            required_string("aircraft_type"),
            ArgSpec {
                name: "hours",
                kind: ArgKind::Number,
                required: true,
                range: Some((0.1, 24.0)),
            },
        ],
    },
    ToolSpec {
        name: "query_manual",
        description: "Search the operating handbook notes for a topic.",
        args: &[required_string("topic")],
    },
    ToolSpec {
        name: "log_flight_event",
        description: "Record a pilot-reported flight event in the audit log.",
        args: &[required_string("note")],
    },
];

static TOOL_TABLE: LazyLock<IndexMap<&'static str, &'static ToolSpec>> =
    LazyLock::new(|| TOOLS.iter().map(|tool| (tool.name, tool)).collect());

pub fn spec(name: &str) -> Option<&'static ToolSpec> {
    TOOL_TABLE.get(name).copied()
}

/// Sum-typed tool result. `Metar` and `Runway` are the shapes the loop
/// tracks; everything else flows through as data or a recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOutcome {
    Metar { record: MetarRecord },
    Runway { selection: RunwaySelection },
    Data { value: Value },
    Failed { tool: String, message: String },
}

impl ToolOutcome {
    fn failed(tool: &str, message: impl Into<String>) -> Self {
        Self::Failed {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

/// Dispatches named tool calls. Argument validation and every failure mode
/// end in a [`ToolOutcome`]; the loop is never panicked from here.
#[derive(Debug)]
pub struct ToolRegistry {
    weather: WeatherService,
    audit: Arc<AuditSink>,
    apply_variation: bool,
}

impl ToolRegistry {
    pub fn new(weather: WeatherService, audit: Arc<AuditSink>, settings: &Settings) -> Self {
        Self {
            weather,
            audit,
            apply_variation: settings.magnetic_correction_enabled,
        }
    }

    pub async fn dispatch(&self, name: &str, args: &Value) -> ToolOutcome {
        let Some(tool) = spec(name) else {
            return ToolOutcome::failed(name, format!("unknown tool {name:?}"));
        };
        if let Err(message) = validate_args(tool, args) {
            return ToolOutcome::failed(name, message);
        }
        debug!("Dispatching tool {} with {}", name, args);
        match name {
            "fetch_metar" => match self.weather.fetch_metar(str_arg(args, "icao")).await {
                Ok(record) => ToolOutcome::Metar { record },
                Err(e) => ToolOutcome::failed(name, e.to_string()),
            },
            "select_best_runway" => {
                let wind = match args["wind"].as_str().unwrap_or("").parse::<WindString>() {
                    Ok(wind) => wind,
                    Err(e) => {
                        return ToolOutcome::failed(name, ApplicationError::from(e).to_string());
                    }
                };
                let selection = airports::select_runway(
                    &str_arg(args, "icao").to_ascii_uppercase(),
                    &wind,
                    args["preferred_runway"].as_str(),
                    self.apply_variation,
                );
                ToolOutcome::Runway { selection }
            }
            "fetch_aircraft_specs" => match aircraft::specs(str_arg(args, "aircraft_type")) {
                Some(specs) => ToolOutcome::Data {
                    value: serde_json::to_value(specs).unwrap_or(Value::Null),
                },
                None => ToolOutcome::failed(
                    name,
                    format!("no specs for aircraft type {:?}", str_arg(args, "aircraft_type")),
                ),
            },
            "calculate_fuel_burn" => {
                let hours = args["hours"].as_f64().unwrap_or_default();
                match aircraft::fuel_burn(str_arg(args, "aircraft_type"), hours) {
                    Some(burn) => ToolOutcome::Data {
                        value: serde_json::to_value(burn).unwrap_or(Value::Null),
                    },
                    None => ToolOutcome::failed(
                        name,
                        format!("no specs for aircraft type {:?}", str_arg(args, "aircraft_type")),
                    ),
                }
            }
            "query_manual" => match aircraft::query_manual(str_arg(args, "topic")) {
                Some(note) => ToolOutcome::Data {
                    value: json!({ "topic": note.topic, "body": note.body }),
                },
                None => ToolOutcome::failed(name, "no manual note matches that topic"),
            },
            "log_flight_event" => {
                let trace_id = self.audit.record(
                    AuditCategory::FlightLog,
                    json!({ "note": str_arg(args, "note") }),
                    vec![],
                );
                ToolOutcome::Data {
                    value: json!({ "logged": true, "trace_id": trace_id }),
                }
            }
            _ => ToolOutcome::failed(name, "tool is declared but not wired"),
        }
    }
}

fn str_arg<'a>(args: &'a Value, name: &str) -> &'a str {
    args[name].as_str().unwrap_or_default()
}

fn validate_args(tool: &ToolSpec, args: &Value) -> Result<(), String> {
    if !args.is_object() {
        return Err("tool arguments must be a JSON object".to_string());
    }
    for arg in tool.args {
        let value = match args.get(arg.name) {
            None | Some(Value::Null) => {
                if arg.required {
                    return Err(format!("missing required argument {:?}", arg.name));
                }
                continue;
            }
            Some(value) => value,
        };
        match arg.kind {
            ArgKind::String => {
                if !value.is_string() {
                    return Err(format!("argument {:?} must be a string", arg.name));
                }
            }
            ArgKind::Number => {
                let Some(number) = value.as_f64() else {
                    return Err(format!("argument {:?} must be a number", arg.name));
                };
                if let Some((low, high)) = arg.range
                    && !(low..=high).contains(&number)
                {
                    return Err(format!(
                        "argument {:?} must be between {low} and {high}",
                        arg.name
                    ));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weather::tests::test_sink;

    fn registry() -> (ToolRegistry, tempfile::TempDir) {
        let (audit, dir) = test_sink();
        let registry = ToolRegistry::new(
            WeatherService::offline(audit.clone()),
            audit,
            &Settings::default(),
        );
        (registry, dir)
    }

    #[tokio::test]
    async fn test_fetch_metar_dispatch() {
        let (registry, _dir) = registry();
        let outcome = registry
            .dispatch("fetch_metar", &json!({ "icao": "KDEN" }))
            .await;
        match outcome {
            ToolOutcome::Metar { record } => assert_eq!(record.station, "KDEN"),
            other => panic!("expected a METAR, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_runway_dispatch_with_wind_string() {
        let (registry, _dir) = registry();
        let outcome = registry
            .dispatch(
                "select_best_runway",
                &json!({ "icao": "RPLL", "wind": "270 @ 11" }),
            )
            .await;
        match outcome {
            ToolOutcome::Runway { selection } => assert_eq!(selection.runway, "24"),
            other => panic!("expected a runway, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_validation_failures_are_outcomes() {
        let (registry, _dir) = registry();

        let missing = registry.dispatch("fetch_metar", &json!({})).await;
        assert!(matches!(missing, ToolOutcome::Failed { .. }));

        let wrong_type = registry
            .dispatch(
                "calculate_fuel_burn",
                &json!({ "aircraft_type": "C172", "hours": "three" }),
            )
            .await;
        assert!(matches!(wrong_type, ToolOutcome::Failed { .. }));

        let out_of_range = registry
            .dispatch(
                "calculate_fuel_burn",
                &json!({ "aircraft_type": "C172", "hours": 40.0 }),
            )
            .await;
        assert!(matches!(out_of_range, ToolOutcome::Failed { .. }));

        let unknown = registry.dispatch("warp_drive", &json!({})).await;
        assert!(matches!(unknown, ToolOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_malformed_wind_is_an_outcome() {
        let (registry, _dir) = registry();
        let outcome = registry
            .dispatch(
                "select_best_runway",
                &json!({ "icao": "RPLL", "wind": "27O @ 11" }),
            )
            .await;
        assert!(matches!(outcome, ToolOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_flight_event_logging() {
        let (registry, _dir) = registry();
        let outcome = registry
            .dispatch("log_flight_event", &json!({ "note": "left the pattern" }))
            .await;
        match outcome {
            ToolOutcome::Data { value } => {
                assert_eq!(value["logged"], json!(true));
                assert!(value["trace_id"].as_str().is_some());
            }
            other => panic!("expected data, got {other:?}"),
        }
    }
}
