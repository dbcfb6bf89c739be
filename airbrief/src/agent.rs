use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    airports::RunwaySelection,
    audit::{AuditSink, now_ms},
    guardrail::{self, Finalized, VerificationResult},
    llm::{Decider, Decision},
    response::{
        FinalResponse, GuardrailStatus, LandingPayload, MetarPayload, ResponseDetails,
        ResponseType,
    },
    settings::Settings,
    tools::{ToolOutcome, ToolRegistry},
    weather::MetarRecord,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptStep {
    pub thought: String,
    pub action: Option<ToolCall>,
    pub observation: Option<ToolOutcome>,
}

/// Per-request loop state. Lives only inside one `run` call; the tracked
/// METAR and runway are the only inputs the guardrail may read.
#[derive(Debug)]
pub struct AgentState {
    pub query: String,
    pub transcript: Vec<TranscriptStep>,
    pub tracked_metar: Option<MetarRecord>,
    pub tracked_runway: Option<RunwaySelection>,
    pub loop_index: u32,
    pub done: bool,
}

impl AgentState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            transcript: Vec::new(),
            tracked_metar: None,
            tracked_runway: None,
            loop_index: 0,
            done: false,
        }
    }

    /// Latest observation wins for both tracked shapes.
    pub(crate) fn track(&mut self, outcome: &ToolOutcome) {
        match outcome {
            ToolOutcome::Metar { record } => self.tracked_metar = Some(record.clone()),
            ToolOutcome::Runway { selection } => self.tracked_runway = Some(selection.clone()),
            ToolOutcome::Data { .. } | ToolOutcome::Failed { .. } => {}
        }
    }

    pub fn attempted(&self, tool: &str) -> bool {
        self.transcript
            .iter()
            .any(|step| step.action.as_ref().is_some_and(|call| call.name == tool))
    }

    pub fn last_outcome_for(&self, tool: &str) -> Option<(&ToolCall, &ToolOutcome)> {
        self.transcript.iter().rev().find_map(|step| {
            let call = step.action.as_ref()?;
            (call.name == tool).then_some(())?;
            Some((call, step.observation.as_ref()?))
        })
    }
}

/// Line-delimited events for the streaming variant. Emitted in strict causal
/// order; `final` is always last.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Thought { ts: i64, text: String },
    ToolCall { ts: i64, name: String, args: Value },
    ToolResult { ts: i64, name: String, outcome: ToolOutcome },
    Draft { ts: i64, text: String },
    Guardrail { ts: i64, verification: VerificationResult },
    Reflection { ts: i64, text: String },
    SafeFail { ts: i64, trace_id: String },
    Final { ts: i64, canceled: bool, response: FinalResponse },
}

impl StreamEvent {
    pub(crate) fn guardrail(verification: VerificationResult) -> Self {
        Self::Guardrail {
            ts: now_ms(),
            verification,
        }
    }

    pub(crate) fn reflection(text: String) -> Self {
        Self::Reflection { ts: now_ms(), text }
    }

    pub(crate) fn safe_fail(trace_id: String) -> Self {
        Self::SafeFail {
            ts: now_ms(),
            trace_id,
        }
    }
}

async fn emit(sender: Option<&mpsc::Sender<StreamEvent>>, event: StreamEvent) {
    if let Some(sender) = sender {
        // A dropped receiver only means nobody is listening anymore.
        let _ = sender.send(event).await;
    }
}

/// Drives Think → Act → Observe → Decide and hands the draft to the
/// guardrail pipeline.
pub struct Agent {
    settings: Settings,
    registry: ToolRegistry,
    decider: Box<dyn Decider>,
    audit: Arc<AuditSink>,
}

impl Agent {
    pub fn new(
        settings: Settings,
        registry: ToolRegistry,
        decider: Box<dyn Decider>,
        audit: Arc<AuditSink>,
    ) -> Self {
        Self {
            settings,
            registry,
            decider,
            audit,
        }
    }

    pub async fn run(&self, query: &str) -> FinalResponse {
        self.run_cancellable(query, &CancellationToken::new()).await
    }

    pub async fn run_cancellable(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> FinalResponse {
        self.drive(query, cancel, None).await
    }

    /// Streaming variant; events arrive over a bounded channel, one JSON
    /// object per event when serialized by the caller.
    pub fn run_stream(
        self: Arc<Self>,
        query: impl Into<String>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(64);
        let query = query.into();
        tokio::spawn(async move {
            self.drive(&query, &cancel, Some(&tx)).await;
        });
        rx
    }

    async fn drive(
        &self,
        query: &str,
        cancel: &CancellationToken,
        sender: Option<&mpsc::Sender<StreamEvent>>,
    ) -> FinalResponse {
        let started = Instant::now();
        let deadline = Duration::from_millis(self.settings.request_deadline_ms);
        let mut state = AgentState::new(query);
        info!("Handling query {:?}", query);

        let draft = loop {
            if cancel.is_cancelled() {
                return self.canceled(sender).await;
            }
            if state.loop_index >= self.settings.max_loops || started.elapsed() >= deadline {
                state.done = true;
                break self.decider.summarize(&state).await;
            }
            match self.decider.decide(&state).await {
                Decision::Tool {
                    thought,
                    name,
                    args,
                } => {
                    emit(
                        sender,
                        StreamEvent::Thought {
                            ts: now_ms(),
                            text: thought.clone(),
                        },
                    )
                    .await;
                    emit(
                        sender,
                        StreamEvent::ToolCall {
                            ts: now_ms(),
                            name: name.clone(),
                            args: args.clone(),
                        },
                    )
                    .await;
                    let outcome = self.registry.dispatch(&name, &args).await;
                    emit(
                        sender,
                        StreamEvent::ToolResult {
                            ts: now_ms(),
                            name: name.clone(),
                            outcome: outcome.clone(),
                        },
                    )
                    .await;
                    state.track(&outcome);
                    state.transcript.push(TranscriptStep {
                        thought,
                        action: Some(ToolCall { name, args }),
                        observation: Some(outcome),
                    });
                    state.loop_index += 1;
                }
                Decision::Final { text } => {
                    state.loop_index += 1;
                    state.done = true;
                    break text;
                }
                Decision::Abort { reason } => {
                    state.loop_index += 1;
                    state.done = true;
                    break format!("I had to stop: {reason}");
                }
            }
        };

        debug_assert!(state.done, "the loop exits only through a terminal decision");
        if cancel.is_cancelled() {
            return self.canceled(sender).await;
        }
        emit(
            sender,
            StreamEvent::Draft {
                ts: now_ms(),
                text: draft.clone(),
            },
        )
        .await;

        let Finalized {
            text,
            status,
            is_fallback,
            verification,
            events,
        } = guardrail::finalize(
            draft,
            &state,
            self.decider.as_ref(),
            &self.audit,
            &self.settings.guardrail(),
        )
        .await;
        for event in events {
            emit(sender, event).await;
        }

        let response = self.build_response(&state, text, status, is_fallback, verification);
        emit(
            sender,
            StreamEvent::Final {
                ts: now_ms(),
                canceled: false,
                response: response.clone(),
            },
        )
        .await;
        response
    }

    async fn canceled(&self, sender: Option<&mpsc::Sender<StreamEvent>>) -> FinalResponse {
        let response = FinalResponse::text(
            "The request was canceled before completion.",
            GuardrailStatus::Skipped,
            false,
            None,
        );
        emit(
            sender,
            StreamEvent::Final {
                ts: now_ms(),
                canceled: true,
                response: response.clone(),
            },
        )
        .await;
        response
    }

    fn build_response(
        &self,
        state: &AgentState,
        text: String,
        status: GuardrailStatus,
        is_fallback: bool,
        verification: VerificationResult,
    ) -> FinalResponse {
        let details = ResponseDetails {
            verification,
            loops: state.loop_index,
            tool_calls: state
                .transcript
                .iter()
                .filter_map(|step| step.action.as_ref().map(|call| call.name.clone()))
                .collect(),
        };
        let Some(metar) = &state.tracked_metar else {
            return FinalResponse::text(text, status, is_fallback, Some(details));
        };
        let landing = state.tracked_runway.as_ref().and_then(|runway| {
            guardrail::landing_geometry(metar, runway.heading, &self.settings.guardrail()).map(
                |geometry| LandingPayload {
                    runway_number: runway.runway.clone(),
                    runway_heading: runway.heading,
                    crosswind_kt: round2(geometry.crosswind_kt),
                    headwind_kt: round2(geometry.headwind_kt),
                },
            )
        });
        FinalResponse {
            response_type: ResponseType::Metar,
            metar: Some(MetarPayload::from(metar)),
            landing,
            text_response: Some(text),
            guardrail_status: status,
            is_fallback,
            details: Some(details),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
