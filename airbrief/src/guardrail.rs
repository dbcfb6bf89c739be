use serde::Serialize;
use serde_json::json;
use serde_with::skip_serializing_none;
use windcalc::{WindGeometry, extract_claim, magnetic_correction};

use crate::{
    agent::{AgentState, StreamEvent},
    airports::{self, RunwaySelection},
    audit::{AuditCategory, AuditEventEntry, AuditSink},
    llm::Decider,
    response::GuardrailStatus,
    weather::MetarRecord,
};

/// Verification policy, fixed at construction from [`crate::settings::Settings`].
#[derive(Debug, Clone, Copy)]
pub struct GuardrailConfig {
    pub threshold_kt: f64,
    pub use_gust: bool,
    pub magnetic_correction: bool,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub status: GuardrailStatus,
    pub agent_claim: Option<f64>,
    pub mathematical_truth: Option<f64>,
    pub discrepancy: Option<f64>,
    pub reason: String,
    pub reflection_prompt: Option<String>,
}

impl VerificationResult {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: GuardrailStatus::Skipped,
            agent_claim: None,
            mathematical_truth: None,
            discrepancy: None,
            reason: reason.into(),
            reflection_prompt: None,
        }
    }
}

/// Resolves the wind geometry the verifier and the answer templates share:
/// gust substitution per policy, station variation applied to the runway
/// heading when enabled and known.
pub fn landing_geometry(
    metar: &MetarRecord,
    runway_heading: u16,
    cfg: &GuardrailConfig,
) -> Option<WindGeometry> {
    let direction = metar.wind_direction?;
    let speed = metar.wind_speed?;
    let variation = if cfg.magnetic_correction {
        airports::variation(&metar.station)
    } else {
        None
    };
    let heading = magnetic_correction(f64::from(runway_heading), variation);
    Some(WindGeometry::resolve(
        direction,
        speed,
        metar.wind_gust,
        cfg.use_gust,
        heading,
    ))
}

/// Re-derives the crosswind claimed in `answer` from the tracked data and
/// compares within the configured tolerance (boundary passes).
pub fn verify(
    answer: &str,
    metar: Option<&MetarRecord>,
    runway: Option<&RunwaySelection>,
    cfg: &GuardrailConfig,
) -> VerificationResult {
    let Some(metar) = metar else {
        return VerificationResult::skipped("no METAR was observed during this request");
    };
    let Some(runway) = runway else {
        return VerificationResult::skipped("no runway was observed during this request");
    };
    if metar.wind_direction.is_none() {
        return VerificationResult::skipped("wind direction is variable or unreported");
    }
    if metar.wind_speed.is_none() {
        return VerificationResult::skipped("wind speed is unreported");
    }
    let Some(claim) = extract_claim(answer) else {
        return VerificationResult::skipped("the answer makes no crosswind claim");
    };

    let geometry = landing_geometry(metar, runway.heading, cfg)
        .expect("wind direction and speed were checked above");
    let truth = geometry.crosswind_kt;
    let discrepancy = (claim - truth).abs();
    if discrepancy <= cfg.threshold_kt {
        VerificationResult {
            status: GuardrailStatus::Passed,
            agent_claim: Some(claim),
            mathematical_truth: Some(truth),
            discrepancy: Some(discrepancy),
            reason: format!(
                "claimed crosswind {claim:.2} kt is within {:.1} kt of the computed {truth:.2} kt",
                cfg.threshold_kt
            ),
            reflection_prompt: None,
        }
    } else {
        VerificationResult {
            status: GuardrailStatus::Failed,
            agent_claim: Some(claim),
            mathematical_truth: Some(truth),
            discrepancy: Some(discrepancy),
            reason: format!(
                "claimed crosswind {claim:.2} kt is {discrepancy:.2} kt away from the computed {truth:.2} kt"
            ),
            reflection_prompt: Some(reflection_prompt(metar, runway, &geometry, claim)),
        }
    }
}

fn reflection_prompt(
    metar: &MetarRecord,
    runway: &RunwaySelection,
    geometry: &WindGeometry,
    claim: f64,
) -> String {
    let corrected = if (geometry.runway_heading - f64::from(runway.heading)).abs() > 1e-9 {
        format!(" ({:.1}° after magnetic variation)", geometry.runway_heading)
    } else {
        String::new()
    };
    format!(
        "Your answer claimed a crosswind of {claim:.1} kt, which does not match the data. \
         The reported wind at {station} is {direction:03}° at {speed:.0} kt, and runway \
         {runway} has a heading of {heading}°{corrected}. The wind angle is {angle:.1}°, \
         so the crosswind is |{speed:.0} × sin({angle:.1}°)| = {truth:.2} kt. Rewrite the \
         answer using the correct crosswind of {truth:.2} kt.",
        station = metar.station,
        direction = geometry.wind_direction,
        speed = geometry.wind_speed,
        runway = runway.runway,
        heading = runway.heading,
        angle = geometry.angle,
        truth = geometry.crosswind_kt,
    )
}

/// The conservative replacement answer. Always produced, whatever state the
/// request is in; embeds the audit trace id for later lookup.
pub fn safe_fail_text(
    state: &AgentState,
    verification: &VerificationResult,
    trace_id: &str,
) -> String {
    let station = state
        .tracked_metar
        .as_ref()
        .map(|m| m.station.clone())
        .unwrap_or_else(|| "the airport".to_string());
    let wind = state
        .tracked_metar
        .as_ref()
        .and_then(describe_wind)
        .unwrap_or_else(|| "not reliably reported".to_string());
    let runway = state
        .tracked_runway
        .as_ref()
        .map(|r| r.runway.clone())
        .unwrap_or_else(|| "in use".to_string());
    match verification.mathematical_truth {
        Some(truth) => format!(
            "I could not produce a crosswind figure that passes verification, so here is the \
             conservative briefing. At {station} the reported wind is {wind}. The \
             mathematically verified crosswind for runway {runway} is {truth:.2} kt. Verify \
             these numbers independently against the current ATIS before flying the \
             approach. Audit trace {trace_id}."
        ),
        None => format!(
            "I could not verify the landing numbers for {station} from the available data. \
             Obtain the current wind and runway assignment from ATIS or tower and verify \
             the crosswind independently. Audit trace {trace_id}."
        ),
    }
}

fn describe_wind(metar: &MetarRecord) -> Option<String> {
    let direction = metar.wind_direction?;
    let speed = metar.wind_speed?;
    let gust = metar
        .wind_gust
        .map(|g| format!(" gusting {g} kt"))
        .unwrap_or_default();
    Some(format!("{direction:03}° at {speed} kt{gust}"))
}

/// Terminal state of the guardrail pipeline for one draft answer.
#[derive(Debug)]
pub struct Finalized {
    pub text: String,
    pub status: GuardrailStatus,
    pub is_fallback: bool,
    pub verification: VerificationResult,
    pub events: Vec<StreamEvent>,
}

/// Runs verify → reflect → safe-fail over a draft and writes the audit
/// records: exactly one `guardrail_pass`/`guardrail_fail` record per call,
/// plus a `reflection` record when a reflection was attempted and a
/// `safe_fail` record when the fallback fires.
pub async fn finalize(
    draft: String,
    state: &AgentState,
    decider: &dyn Decider,
    audit: &AuditSink,
    cfg: &GuardrailConfig,
) -> Finalized {
    let metar = state.tracked_metar.as_ref();
    let runway = state.tracked_runway.as_ref();

    let first = verify(&draft, metar, runway, cfg);
    let mut events = vec![StreamEvent::guardrail(first.clone())];

    if first.status != GuardrailStatus::Failed {
        audit.record(
            AuditCategory::GuardrailPass,
            guardrail_context(state, &first, false),
            vec![AuditEventEntry::new("verify", verification_payload(&first))],
        );
        return Finalized {
            text: draft,
            status: first.status,
            is_fallback: false,
            verification: first,
            events,
        };
    }

    let prompt = first.reflection_prompt.clone().unwrap_or_default();
    audit.record(
        AuditCategory::Reflection,
        guardrail_context(state, &first, false),
        vec![AuditEventEntry::new(
            "reflection",
            json!({ "prompt": prompt }),
        )],
    );
    let revised = decider.revise(&prompt, state).await;
    events.push(StreamEvent::reflection(revised.clone()));

    let second = verify(&revised, metar, runway, cfg);
    events.push(StreamEvent::guardrail(second.clone()));

    if second.status == GuardrailStatus::Passed {
        audit.record(
            AuditCategory::GuardrailPass,
            guardrail_context(state, &second, true),
            vec![
                AuditEventEntry::new("verify", verification_payload(&first)),
                AuditEventEntry::new("verify_after_reflection", verification_payload(&second)),
            ],
        );
        return Finalized {
            text: revised,
            status: GuardrailStatus::Passed,
            is_fallback: false,
            verification: second,
            events,
        };
    }

    audit.record(
        AuditCategory::GuardrailFail,
        guardrail_context(state, &second, true),
        vec![
            AuditEventEntry::new("verify", verification_payload(&first)),
            AuditEventEntry::new("verify_after_reflection", verification_payload(&second)),
        ],
    );
    let trace_id = audit.next_trace_id();
    let text = safe_fail_text(state, &first, &trace_id);
    audit.record_with_id(
        &trace_id,
        AuditCategory::SafeFail,
        guardrail_context(state, &second, true),
        vec![AuditEventEntry::new(
            "safe_fail",
            json!({ "replacement": text }),
        )],
    );
    events.push(StreamEvent::safe_fail(trace_id));
    Finalized {
        text,
        status: GuardrailStatus::Failed,
        is_fallback: true,
        verification: second,
        events,
    }
}

fn guardrail_context(state: &AgentState, verification: &VerificationResult, reflected: bool) -> serde_json::Value {
    json!({
        "query": state.query,
        "station": state.tracked_metar.as_ref().map(|m| m.station.clone()),
        "runway": state.tracked_runway.as_ref().map(|r| r.runway.clone()),
        "status": verification.status,
        "reflected": reflected,
    })
}

fn verification_payload(verification: &VerificationResult) -> serde_json::Value {
    json!({
        "status": verification.status,
        "agent_claim": verification.agent_claim,
        "mathematical_truth": verification.mathematical_truth,
        "discrepancy": verification.discrepancy,
        "reason": verification.reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weather::fallback_record;

    fn config() -> GuardrailConfig {
        GuardrailConfig {
            threshold_kt: 3.0,
            use_gust: false,
            magnetic_correction: true,
        }
    }

    fn kden_runway_26() -> RunwaySelection {
        RunwaySelection {
            airport: "KDEN".to_string(),
            runway: "26".to_string(),
            heading: 260,
            rationale: "Runway 26 was requested explicitly.".to_string(),
        }
    }

    #[test]
    fn test_kden_truth_uses_variation() {
        let metar = fallback_record("KDEN");
        let geometry = landing_geometry(&metar, 260, &config()).unwrap();
        // 220@10 against 267.5° true: 47.5° angle, 7.37 kt crosswind.
        assert!((geometry.angle - 47.5).abs() < 1e-9);
        assert!((geometry.crosswind_kt - 7.3728).abs() < 1e-3);
    }

    #[test]
    fn test_verify_passes_close_claims_and_fails_far_ones() {
        let metar = fallback_record("KDEN");
        let runway = kden_runway_26();

        let close = verify(
            "The crosswind is 7.4 kt on runway 26.",
            Some(&metar),
            Some(&runway),
            &config(),
        );
        assert_eq!(close.status, GuardrailStatus::Passed);

        let far = verify(
            "The crosswind is 20 knots.",
            Some(&metar),
            Some(&runway),
            &config(),
        );
        assert_eq!(far.status, GuardrailStatus::Failed);
        assert!(far.discrepancy.unwrap() > 12.0);
        let prompt = far.reflection_prompt.unwrap();
        assert!(prompt.contains("220"), "{prompt}");
        assert!(prompt.contains("sin"), "{prompt}");
        assert!(prompt.contains("7.37"), "{prompt}");
    }

    #[test]
    fn test_verify_is_monotone_in_discrepancy() {
        let metar = fallback_record("KDEN");
        let runway = kden_runway_26();
        let truth = landing_geometry(&metar, 260, &config())
            .unwrap()
            .crosswind_kt;

        for step in 0..24 {
            let claim = truth + f64::from(step) * 0.25;
            let answer = format!("The crosswind is {claim:.4} kt.");
            let result = verify(&answer, Some(&metar), Some(&runway), &config());
            let discrepancy = result.discrepancy.unwrap();
            assert_eq!(
                result.status == GuardrailStatus::Passed,
                discrepancy <= 3.0,
                "status must be exactly the threshold comparison at discrepancy {discrepancy}"
            );
        }

        let below = verify(
            &format!("The crosswind is {:.4} kt.", truth + 1.0),
            Some(&metar),
            Some(&runway),
            &config(),
        );
        let above = verify(
            &format!("The crosswind is {:.4} kt.", truth + 4.0),
            Some(&metar),
            Some(&runway),
            &config(),
        );
        assert_eq!(below.status, GuardrailStatus::Passed);
        assert_eq!(above.status, GuardrailStatus::Failed);
    }

    #[test]
    fn test_threshold_boundary_passes() {
        let metar = fallback_record("KDEN");
        let runway = kden_runway_26();
        let truth = landing_geometry(&metar, 260, &config())
            .unwrap()
            .crosswind_kt;

        let boundary = format!("The crosswind is {:.4} kt.", truth + 2.9999);
        let result = verify(&boundary, Some(&metar), Some(&runway), &config());
        assert_eq!(result.status, GuardrailStatus::Passed);

        let beyond = format!("The crosswind is {:.4} kt.", truth + 3.2);
        let result = verify(&beyond, Some(&metar), Some(&runway), &config());
        assert_eq!(result.status, GuardrailStatus::Failed);
    }

    #[test]
    fn test_skip_stability() {
        let metar = fallback_record("KDEN");
        let runway = kden_runway_26();
        let answer = "The crosswind is 7.4 kt.";

        let no_metar = verify(answer, None, Some(&runway), &config());
        assert_eq!(no_metar.status, GuardrailStatus::Skipped);

        let no_runway = verify(answer, Some(&metar), None, &config());
        assert_eq!(no_runway.status, GuardrailStatus::Skipped);

        let mut variable = metar.clone();
        variable.wind_direction = None;
        let no_direction = verify(answer, Some(&variable), Some(&runway), &config());
        assert_eq!(no_direction.status, GuardrailStatus::Skipped);

        let mut no_speed_metar = metar.clone();
        no_speed_metar.wind_speed = None;
        let no_speed = verify(answer, Some(&no_speed_metar), Some(&runway), &config());
        assert_eq!(no_speed.status, GuardrailStatus::Skipped);

        let no_claim = verify(
            "Winds favor runway 26 today.",
            Some(&metar),
            Some(&runway),
            &config(),
        );
        assert_eq!(no_claim.status, GuardrailStatus::Skipped);
    }

    #[test]
    fn test_gust_policy_changes_truth() {
        let metar = fallback_record("KBOS");
        let runway = RunwaySelection {
            airport: "KBOS".to_string(),
            runway: "04R".to_string(),
            heading: 40,
            rationale: String::new(),
        };
        let sustained = landing_geometry(&metar, runway.heading, &config()).unwrap();
        let gusting = landing_geometry(
            &metar,
            runway.heading,
            &GuardrailConfig {
                use_gust: true,
                ..config()
            },
        )
        .unwrap();
        assert!(gusting.crosswind_kt > sustained.crosswind_kt);
        assert!((gusting.wind_speed - 22.0).abs() < 1e-9);
    }

    #[test]
    fn test_rpll_runway_06_truth_without_variation() {
        let metar = fallback_record("RPLL");
        let geometry = landing_geometry(&metar, 60, &config()).unwrap();
        assert!((geometry.angle - 150.0).abs() < 1e-9);
        assert!((geometry.crosswind_kt - 5.5).abs() < 1e-9);
        assert!(geometry.headwind_kt < 0.0, "runway 06 has a tailwind here");
    }

    #[test]
    fn test_safe_fail_text_without_data() {
        let state = AgentState::new("land where?");
        let verification = VerificationResult::skipped("nothing tracked");
        let text = safe_fail_text(&state, &verification, "123-abcd");
        assert!(text.contains("123-abcd"));
        assert!(text.contains("independently"));
    }
}
