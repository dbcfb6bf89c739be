use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use tracing::warn;
use tracing_unwrap::ResultExt;
use windcalc::WindString;

use crate::{
    agent::AgentState,
    guardrail::{self, GuardrailConfig},
    settings::Settings,
    tools::{self, ArgKind, ToolOutcome},
    weather::MetarRecord,
};

/// What the adapter wants the loop to do next. Parsing quirks of any backend
/// stay behind this boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Tool {
        thought: String,
        name: String,
        args: Value,
    },
    Final {
        text: String,
    },
    Abort {
        reason: String,
    },
}

#[async_trait]
pub trait Decider: Send + Sync {
    async fn decide(&self, state: &AgentState) -> Decision;

    /// Produce a replacement answer for a failed verification.
    async fn revise(&self, reflection_prompt: &str, state: &AgentState) -> String;

    /// Best-effort answer when the loop budget runs out.
    async fn summarize(&self, state: &AgentState) -> String;
}

pub fn backend_from_settings(settings: &Settings) -> Box<dyn Decider> {
    let pattern = PatternDecider::new(settings.guardrail());
    if settings.llm_backend == "pattern" {
        Box::new(pattern)
    } else {
        Box::new(ChatBackend::new(
            settings.llm_endpoint.clone(),
            settings.llm_backend.clone(),
            settings.llm_timeout_ms,
            pattern,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryClass {
    Manual,
    Landing,
    Fuel,
    Weather,
    Generic,
}

static ICAO_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b([A-Z]{4})\b").unwrap_or_log());
static ICAO_PREP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:at|for)\s+([A-Za-z]{4})\b").unwrap_or_log());
static RUNWAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\brunway\s+([0-9]{1,3}[LRC]?)\b").unwrap_or_log());
static AIRCRAFT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(C-?172|C-?182|PA-?28|SR-?22|DA-?40|BE-?36)\b").unwrap_or_log()
});
static HOURS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b([0-9]+(?:\.[0-9]+)?)\s*(?:hours?|hrs?)\b").unwrap_or_log());
static TRUTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"correct crosswind of ([0-9]+(?:\.[0-9]+)?) kt").unwrap_or_log());

/// Plain English words that also look like ICAO codes.
const ICAO_STOPWORDS: &[&str] = &[
    "CALM", "FROM", "GUST", "HAVE", "INTO", "LAND", "LIFR", "MVFR", "NEED", "OVER", "THAT",
    "THIS", "WHAT", "WILL", "WIND", "WITH",
];

fn classify(query: &str) -> QueryClass {
    let lowered = query.to_lowercase();
    let contains_any = |words: &[&str]| words.iter().any(|word| lowered.contains(word));
    if contains_any(&["technique", "manual", "minimum", "procedure", "how do"]) {
        QueryClass::Manual
    } else if contains_any(&["crosswind", "cross wind", "cross-wind", "x-wind", "landing", "land ", "runway"]) {
        QueryClass::Landing
    } else if contains_any(&["fuel", "reserve", "endurance"]) {
        QueryClass::Fuel
    } else if contains_any(&["metar", "weather", "wind", "conditions", "ceiling", "visibility"]) {
        QueryClass::Weather
    } else {
        QueryClass::Generic
    }
}

fn extract_icao(query: &str) -> Option<String> {
    for found in ICAO_RE.find_iter(query) {
        if !ICAO_STOPWORDS.contains(&found.as_str()) {
            return Some(found.as_str().to_string());
        }
    }
    ICAO_PREP_RE
        .captures(query)
        .map(|captures| captures[1].to_ascii_uppercase())
        .filter(|candidate| !ICAO_STOPWORDS.contains(&candidate.as_str()))
}

fn extract_runway(query: &str) -> Option<String> {
    RUNWAY_RE
        .captures(query)
        .map(|captures| captures[1].to_ascii_uppercase())
}

fn extract_aircraft(query: &str) -> Option<String> {
    AIRCRAFT_RE
        .captures(query)
        .map(|captures| captures[1].replace('-', "").to_ascii_uppercase())
}

fn extract_hours(query: &str) -> Option<f64> {
    HOURS_RE
        .captures(query)
        .and_then(|captures| captures[1].parse().ok())
}

/// Deterministic decider used for tests and when no LLM is configured. Same
/// decision shapes as the chat backend, driven by query classification and
/// the tool results observed so far.
#[derive(Debug, Clone)]
pub struct PatternDecider {
    guardrail: GuardrailConfig,
}

impl PatternDecider {
    pub fn new(guardrail: GuardrailConfig) -> Self {
        Self { guardrail }
    }

    fn decide_landing(&self, state: &AgentState) -> Decision {
        let Some(icao) = extract_icao(&state.query) else {
            return Decision::Final {
                text: "I can work landing numbers once you give me a 4 letter ICAO code, \
                       for example \"crosswind at KDEN runway 26\"."
                    .to_string(),
            };
        };
        let Some(metar) = &state.tracked_metar else {
            if state.attempted("fetch_metar") {
                return Decision::Final {
                    text: format!(
                        "I could not retrieve usable weather for {icao}, so I cannot \
                         compute landing numbers."
                    ),
                };
            }
            return Decision::Tool {
                thought: format!(
                    "I need the current wind at {icao} before working the landing geometry."
                ),
                name: "fetch_metar".to_string(),
                args: json!({ "icao": icao }),
            };
        };
        if state.tracked_runway.is_none() {
            if state.attempted("select_best_runway") {
                return Decision::Final {
                    text: format!("I could not settle on a runway at {icao}."),
                };
            }
            let wind = WindString {
                direction: metar.wind_direction,
                speed: metar.wind_speed,
                gust: metar.wind_gust,
            };
            let mut args = json!({ "icao": icao, "wind": wind.to_string() });
            if let Some(runway) = extract_runway(&state.query) {
                args["preferred_runway"] = json!(runway);
            }
            return Decision::Tool {
                thought: "With the wind known, pick the runway to plan for.".to_string(),
                name: "select_best_runway".to_string(),
                args,
            };
        }
        if let Some(code) = extract_aircraft(&state.query)
            && !state.attempted("fetch_aircraft_specs")
        {
            return Decision::Tool {
                thought: format!("Checking the {code} crosswind limits."),
                name: "fetch_aircraft_specs".to_string(),
                args: json!({ "aircraft_type": code }),
            };
        }
        Decision::Final {
            text: self.landing_answer(state),
        }
    }

    fn landing_answer(&self, state: &AgentState) -> String {
        let (Some(metar), Some(runway)) = (&state.tracked_metar, &state.tracked_runway) else {
            return "I do not have enough observed data to give landing numbers.".to_string();
        };
        let Some(geometry) = guardrail::landing_geometry(metar, runway.heading, &self.guardrail)
        else {
            return format!(
                "The wind at {} is variable or calm right now, so no meaningful crosswind \
                 figure applies; any runway is workable.",
                metar.station
            );
        };
        let gust_text = metar
            .wind_gust
            .map(|gust| format!(" gusting {gust} kt"))
            .unwrap_or_default();
        let head_word = if geometry.headwind_kt >= 0.0 {
            "headwind"
        } else {
            "tailwind"
        };
        let mut text = format!(
            "At {station} the wind is {direction:03}° at {speed} kt{gust_text}. On runway \
             {runway} the crosswind is {cross:.1} kt with a {head:.1} kt {head_word}.",
            station = metar.station,
            direction = metar.wind_direction.unwrap_or_default(),
            speed = metar.wind_speed.unwrap_or_default(),
            runway = runway.runway,
            cross = geometry.crosswind_kt,
            head = geometry.headwind_kt.abs(),
        );
        if geometry.headwind_kt < 0.0 {
            text.push_str(" Consider the reciprocal runway to avoid the tailwind.");
        }
        if let Some((code, limit)) = observed_crosswind_limit(state) {
            if geometry.crosswind_kt > limit {
                text.push_str(&format!(
                    " That exceeds the {code} maximum demonstrated crosswind of {limit:.0} kt."
                ));
            } else {
                text.push_str(&format!(
                    " That is within the {code} maximum demonstrated crosswind of {limit:.0} kt."
                ));
            }
        }
        text
    }

    fn decide_weather(&self, state: &AgentState) -> Decision {
        let Some(icao) = extract_icao(&state.query) else {
            return Decision::Final {
                text: "Which airport? Give me the 4 letter ICAO code.".to_string(),
            };
        };
        match &state.tracked_metar {
            Some(metar) => Decision::Final {
                text: weather_answer(metar),
            },
            None if state.attempted("fetch_metar") => Decision::Final {
                text: format!("I could not retrieve the METAR for {icao}."),
            },
            None => Decision::Tool {
                thought: format!("Fetching the current METAR for {icao}."),
                name: "fetch_metar".to_string(),
                args: json!({ "icao": icao }),
            },
        }
    }

    fn decide_fuel(&self, state: &AgentState) -> Decision {
        let (Some(code), Some(hours)) = (extract_aircraft(&state.query), extract_hours(&state.query))
        else {
            return Decision::Final {
                text: "Tell me the aircraft type and flight time, for example \
                       \"fuel burn for a C172 for 3 hours\"."
                    .to_string(),
            };
        };
        match state.last_outcome_for("calculate_fuel_burn") {
            Some((_, ToolOutcome::Data { value })) => Decision::Final {
                text: fuel_answer(&code, hours, value),
            },
            Some(_) => Decision::Final {
                text: format!("I could not work out fuel figures for a {code}."),
            },
            None => Decision::Tool {
                thought: format!("Running the {code} fuel numbers for {hours} hours."),
                name: "calculate_fuel_burn".to_string(),
                args: json!({ "aircraft_type": code, "hours": hours }),
            },
        }
    }

    fn decide_manual(&self, state: &AgentState) -> Decision {
        match state.last_outcome_for("query_manual") {
            Some((_, ToolOutcome::Data { value })) => Decision::Final {
                text: format!(
                    "{}: {}",
                    value["topic"].as_str().unwrap_or("From the handbook"),
                    value["body"].as_str().unwrap_or_default()
                ),
            },
            Some(_) => Decision::Final {
                text: "I do not have handbook guidance on that topic.".to_string(),
            },
            None => Decision::Tool {
                thought: "Looking that up in the handbook notes.".to_string(),
                name: "query_manual".to_string(),
                args: json!({ "topic": state.query }),
            },
        }
    }
}

fn weather_answer(metar: &MetarRecord) -> String {
    let wind = match (metar.wind_direction, metar.wind_speed) {
        (Some(direction), Some(speed)) => {
            let gust = metar
                .wind_gust
                .map(|gust| format!(" gusting {gust} kt"))
                .unwrap_or_default();
            format!("wind {direction:03}° at {speed} kt{gust}")
        }
        (None, Some(speed)) => format!("wind variable at {speed} kt"),
        _ => "wind not reported".to_string(),
    };
    let temperature = metar
        .temperature_c
        .map(|t| format!(", temperature {t:.0} °C"))
        .unwrap_or_default();
    let raw = if metar.raw.is_empty() {
        String::new()
    } else {
        format!(" Raw: {}", metar.raw)
    };
    format!(
        "{station} at {time}: {wind}{temperature}, flight category {category}.{raw}",
        station = metar.station,
        time = metar.time,
        category = metar.flight_category,
    )
}

fn fuel_answer(code: &str, hours: f64, value: &Value) -> String {
    format!(
        "A {code} flying {hours} hours burns about {gallons:.1} gal. With a 45 minute \
         reserve you need {total:.1} gal against {capacity}.",
        gallons = value["gallons"].as_f64().unwrap_or_default(),
        total = value["total_required_gallons"].as_f64().unwrap_or_default(),
        capacity = if value["within_capacity"].as_bool().unwrap_or(false) {
            "usable fuel, which fits"
        } else {
            "usable fuel, which does not fit without a stop"
        },
    )
}

fn observed_crosswind_limit(state: &AgentState) -> Option<(String, f64)> {
    state
        .transcript
        .iter()
        .rev()
        .filter_map(|step| match &step.observation {
            Some(ToolOutcome::Data { value }) => Some(value),
            _ => None,
        })
        .find_map(|value| {
            let code = value["type_code"].as_str()?;
            let limit = value["max_demo_crosswind_kt"].as_f64()?;
            Some((code.to_string(), limit))
        })
}

#[async_trait]
impl Decider for PatternDecider {
    async fn decide(&self, state: &AgentState) -> Decision {
        match classify(&state.query) {
            QueryClass::Manual => self.decide_manual(state),
            QueryClass::Landing => self.decide_landing(state),
            QueryClass::Fuel => self.decide_fuel(state),
            QueryClass::Weather => self.decide_weather(state),
            QueryClass::Generic => Decision::Final {
                text: "Hello! I can brief you on airport weather (\"metar KMCO\"), landing \
                       crosswinds (\"crosswind at KDEN runway 26\"), fuel planning and \
                       handbook technique. What do you need?"
                    .to_string(),
            },
        }
    }

    async fn revise(&self, reflection_prompt: &str, state: &AgentState) -> String {
        if let Some(captures) = TRUTH_RE.captures(reflection_prompt)
            && let Ok(truth) = captures[1].parse::<f64>()
        {
            let station = state
                .tracked_metar
                .as_ref()
                .map(|m| m.station.clone())
                .unwrap_or_else(|| "the field".to_string());
            let runway = state
                .tracked_runway
                .as_ref()
                .map(|r| r.runway.clone())
                .unwrap_or_else(|| "in use".to_string());
            return format!(
                "After rechecking the numbers: the crosswind on runway {runway} at \
                 {station} is {truth:.2} kt."
            );
        }
        self.landing_answer(state)
    }

    async fn summarize(&self, state: &AgentState) -> String {
        match &state.tracked_metar {
            Some(_) if state.tracked_runway.is_some() => self.landing_answer(state),
            Some(metar) => weather_answer(metar),
            None => "I ran out of reasoning budget before completing that request. Please \
                     retry with a specific 4 letter ICAO code."
                .to_string(),
        }
    }
}

const SYSTEM_PROMPT: &str = "You are an aviation weather and landing assistant for pilots. \
Use the provided tools to fetch real data before answering; never invent weather. Report \
crosswind and headwind components in knots to one decimal place. Answer in plain language.";

const SUMMARIZE_PROMPT: &str = "Stop calling tools and summarize the best answer you can \
give from the observations so far.";

/// Chat-contract backend. Malformed or failed replies are retried once, then
/// the call downgrades to the pattern decider.
pub struct ChatBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    fallback: PatternDecider,
}

impl ChatBackend {
    pub fn new(endpoint: String, model: String, timeout_ms: u64, fallback: PatternDecider) -> Self {
        let client = reqwest::ClientBuilder::new()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_log();
        Self {
            client,
            endpoint,
            model,
            fallback,
        }
    }

    fn messages(state: &AgentState, extra_user: Option<&str>) -> Vec<Value> {
        let mut messages = vec![
            json!({ "role": "system", "content": SYSTEM_PROMPT }),
            json!({ "role": "user", "content": state.query }),
        ];
        for step in &state.transcript {
            let action = step
                .action
                .as_ref()
                .map(|call| format!("{}({})", call.name, call.args))
                .unwrap_or_default();
            messages.push(json!({
                "role": "assistant",
                "content": format!("Thought: {}\nAction: {}", step.thought, action),
            }));
            if let Some(observation) = &step.observation {
                let rendered = serde_json::to_string(observation).unwrap_or_default();
                messages.push(json!({
                    "role": "user",
                    "content": format!("Observation: {rendered}"),
                }));
            }
        }
        if let Some(extra) = extra_user {
            messages.push(json!({ "role": "user", "content": extra }));
        }
        messages
    }

    fn tool_catalog() -> Value {
        Value::Array(
            tools::TOOLS
                .iter()
                .map(|tool| {
                    let mut properties = serde_json::Map::new();
                    let mut required = Vec::new();
                    for arg in tool.args {
                        let kind = match arg.kind {
                            ArgKind::String => "string",
                            ArgKind::Number => "number",
                        };
                        properties.insert(arg.name.to_string(), json!({ "type": kind }));
                        if arg.required {
                            required.push(arg.name);
                        }
                    }
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": {
                                "type": "object",
                                "properties": properties,
                                "required": required,
                            },
                        },
                    })
                })
                .collect(),
        )
    }

    async fn chat(&self, messages: Vec<Value>) -> reqwest::Result<Value> {
        self.client
            .post(&self.endpoint)
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "tools": Self::tool_catalog(),
                "temperature": 0.2,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    fn parse_decision(reply: &Value) -> Option<Decision> {
        let message = &reply["choices"][0]["message"];
        if let Some(refusal) = message["refusal"].as_str() {
            return Some(Decision::Abort {
                reason: refusal.to_string(),
            });
        }
        if let Some(call) = message["tool_calls"].as_array().and_then(|calls| calls.first()) {
            let name = call["function"]["name"].as_str()?.to_string();
            let args =
                serde_json::from_str(call["function"]["arguments"].as_str().unwrap_or("{}"))
                    .ok()?;
            let thought = message["content"].as_str().unwrap_or_default().to_string();
            return Some(Decision::Tool {
                thought,
                name,
                args,
            });
        }
        message["content"].as_str().map(|content| Decision::Final {
            text: content.to_string(),
        })
    }

    async fn text_reply(&self, messages: Vec<Value>) -> Option<String> {
        for attempt in 0..2 {
            match self.chat(messages.clone()).await {
                Ok(reply) => {
                    if let Some(content) = reply["choices"][0]["message"]["content"].as_str() {
                        return Some(content.to_string());
                    }
                    warn!("LLM reply had no text content on attempt {attempt}");
                }
                Err(e) => warn!("LLM call failed on attempt {attempt}: {e}"),
            }
        }
        None
    }
}

#[async_trait]
impl Decider for ChatBackend {
    async fn decide(&self, state: &AgentState) -> Decision {
        for attempt in 0..2 {
            match self.chat(Self::messages(state, None)).await {
                Ok(reply) => match Self::parse_decision(&reply) {
                    Some(decision) => return decision,
                    None => warn!("LLM reply was malformed on attempt {attempt}"),
                },
                Err(e) => warn!("LLM call failed on attempt {attempt}: {e}"),
            }
        }
        self.fallback.decide(state).await
    }

    async fn revise(&self, reflection_prompt: &str, state: &AgentState) -> String {
        match self
            .text_reply(Self::messages(state, Some(reflection_prompt)))
            .await
        {
            Some(text) => text,
            None => self.fallback.revise(reflection_prompt, state).await,
        }
    }

    async fn summarize(&self, state: &AgentState) -> String {
        match self
            .text_reply(Self::messages(state, Some(SUMMARIZE_PROMPT)))
            .await
        {
            Some(text) => text,
            None => self.fallback.summarize(state).await,
        }
    }
}
