//! The bounded investigation loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use postmortem_common::truncate_middle;
use postmortem_report::{Confidence, CrashReport};

use crate::tools::{execute_tool, tool_definitions, ToolBackends};
use crate::transport::{
    ChatMessage, ChatRequest, ChatTransport, ContentBlock, Role, SamplingError,
};

/// The system prompt framing the investigation.
const SYSTEM_PROMPT: &str = "\
You are a crash-dump investigator. You are given a structured crash \
analysis report produced from a post-mortem dump, plus tools to run \
debugger commands, inspect managed objects, and fetch thread stacks. \
Investigate the crash iteratively and call analysis_complete exactly \
once when you have a conclusion. Be precise and cite addresses and \
thread ids from the report.";

/// External cancellation; the loop re-raises it without appending a
/// partial result.
#[derive(Clone, Copy, Debug, Error)]
#[error("investigation cancelled")]
pub struct Cancelled;

/// Tunables of the investigation loop.
#[derive(Clone, Debug)]
pub struct InvestigationOptions {
    /// Maximum loop iterations.
    pub max_iterations: usize,
    /// Token budget per sampling request.
    pub max_tokens_per_request: u32,
    /// Global tool-call budget.
    pub max_tool_calls: usize,
    /// Character cap on the initial report message.
    pub initial_prompt_truncation_chars: usize,
    /// Character cap on each tool output.
    pub tool_output_truncation_chars: usize,
    /// Cooperative cancellation flag checked before every blocking
    /// step.
    pub cancellation: Option<Arc<AtomicBool>>,
}

impl Default for InvestigationOptions {
    fn default() -> Self {
        InvestigationOptions {
            max_iterations: 100,
            max_tokens_per_request: 4096,
            max_tool_calls: 50,
            initial_prompt_truncation_chars: 200_000,
            tool_output_truncation_chars: 50_000,
            cancellation: None,
        }
    }
}

/// One executed tool call, recorded for the final result.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedCommand {
    /// Tool name.
    pub tool: String,
    /// The tool input object.
    pub input: Value,
    /// Tool output after truncation.
    pub output: String,
    /// Iteration the call happened in, 1-based.
    pub iteration: usize,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// The structured conclusion of an investigation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationResult {
    /// The model's root-cause statement, or a diagnostic message.
    pub root_cause: String,
    /// Confidence in the conclusion.
    pub confidence: Confidence,
    /// The model's reasoning, or why the loop terminated early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Suggested remediations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
    /// Additional observations made along the way.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_findings: Vec<String>,
    /// Iterations consumed.
    pub iterations: usize,
    /// Every executed tool call in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands_executed: Vec<ExecutedCommand>,
}

/// Fields accepted from an `analysis_complete` call.
#[derive(Debug, Deserialize)]
struct CompletionInput {
    root_cause: Option<String>,
    confidence: Option<String>,
    reasoning: Option<String>,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    additional_findings: Vec<String>,
}

fn parse_confidence(text: Option<&str>) -> Confidence {
    match text.map(str::to_ascii_lowercase).as_deref() {
        Some("high") => Confidence::High,
        Some("medium") => Confidence::Medium,
        Some("low") => Confidence::Low,
        _ => Confidence::Unknown,
    }
}

fn low_confidence_result(
    root_cause: &str,
    reasoning: String,
    iterations: usize,
    commands: Vec<ExecutedCommand>,
) -> InvestigationResult {
    InvestigationResult {
        root_cause: root_cause.to_owned(),
        confidence: Confidence::Low,
        reasoning: Some(reasoning),
        recommendations: Vec::new(),
        additional_findings: Vec::new(),
        iterations,
        commands_executed: commands,
    }
}

fn check_cancelled(options: &InvestigationOptions) -> Result<(), Cancelled> {
    match options.cancellation.as_ref() {
        Some(flag) if flag.load(Ordering::Relaxed) => Err(Cancelled),
        _ => Ok(()),
    }
}

/// Runs the investigation loop over a finalized report.
///
/// Returns a structured result for every outcome except external
/// cancellation, which is re-raised.
pub fn investigate(
    transport: &mut dyn ChatTransport,
    backends: &ToolBackends<'_>,
    report: &CrashReport,
    options: &InvestigationOptions,
) -> Result<InvestigationResult, Cancelled> {
    if !transport.is_sampling_supported() || !transport.is_tool_use_supported() {
        return Ok(low_confidence_result(
            "AI analysis unavailable.",
            "The connected client does not support sampling with tool use.".to_owned(),
            0,
            Vec::new(),
        ));
    }

    let report_json = report.to_json().unwrap_or_else(|_| "{}".to_owned());
    let initial = format!(
        "Analyze this crash report and investigate further with the available tools.\n\n{}",
        truncate_middle(&report_json, options.initial_prompt_truncation_chars)
    );

    let mut messages = vec![ChatMessage::user_text(initial)];
    let tools = tool_definitions();
    let mut commands: Vec<ExecutedCommand> = Vec::new();
    let mut last_had_text_only = false;

    for iteration in 1..=options.max_iterations {
        check_cancelled(options)?;

        let request = ChatRequest {
            system_prompt: SYSTEM_PROMPT.to_owned(),
            messages: messages.clone(),
            max_tokens: options.max_tokens_per_request,
            tools: tools.clone(),
            tool_choice: "auto".to_owned(),
        };

        let response = match transport.submit(&request) {
            Ok(response) => response,
            Err(SamplingError { message }) => {
                return Ok(low_confidence_result(
                    "AI analysis failed: sampling request error.",
                    message,
                    iteration - 1,
                    commands,
                ));
            }
        };
        debug!(iteration, model = response.model.as_deref(), "sampled");

        messages.push(ChatMessage {
            role: Role::Assistant,
            content: response.content.clone(),
        });

        let mut tool_results = Vec::new();
        let mut had_tool_use = false;
        let mut had_text = false;

        for block in &response.content {
            match block {
                ContentBlock::Text { .. } => had_text = true,
                ContentBlock::ToolUse { id, name, input } => {
                    had_tool_use = true;

                    if name == "analysis_complete" {
                        let parsed: CompletionInput =
                            serde_json::from_value(input.clone()).unwrap_or(CompletionInput {
                                root_cause: None,
                                confidence: None,
                                reasoning: None,
                                recommendations: Vec::new(),
                                additional_findings: Vec::new(),
                            });
                        commands.push(ExecutedCommand {
                            tool: name.clone(),
                            input: input.clone(),
                            output: "analysis complete".to_owned(),
                            iteration,
                            duration_ms: 0,
                        });
                        return Ok(InvestigationResult {
                            root_cause: parsed
                                .root_cause
                                .unwrap_or_else(|| "No root cause given.".to_owned()),
                            confidence: parse_confidence(parsed.confidence.as_deref()),
                            reasoning: parsed.reasoning,
                            recommendations: parsed.recommendations,
                            additional_findings: parsed.additional_findings,
                            iterations: iteration,
                            commands_executed: commands,
                        });
                    }

                    if id.is_empty() {
                        // no id to correlate a result with; ask for a retry
                        tool_results.push(ContentBlock::Text {
                            text: format!(
                                "The `{name}` tool call was missing a valid id; retry the \
                                 call with a proper tool use id."
                            ),
                        });
                        continue;
                    }

                    if commands.len() >= options.max_tool_calls {
                        return Ok(low_confidence_result(
                            "AI analysis stopped: tool call budget exhausted.",
                            format!(
                                "The investigation hit the limit of {} tool calls before \
                                 reaching a conclusion.",
                                options.max_tool_calls
                            ),
                            iteration,
                            commands,
                        ));
                    }

                    check_cancelled(options)?;
                    let started = Instant::now();
                    let outcome = execute_tool(backends, name, input);
                    let duration_ms = started.elapsed().as_millis() as u64;

                    let (is_error, text) = match outcome {
                        Ok(output) => (
                            false,
                            truncate_middle(&output, options.tool_output_truncation_chars),
                        ),
                        Err(message) => (true, message),
                    };

                    commands.push(ExecutedCommand {
                        tool: name.clone(),
                        input: input.clone(),
                        output: text.clone(),
                        iteration,
                        duration_ms,
                    });
                    tool_results.push(ContentBlock::ToolResult {
                        tool_use_id: id.clone(),
                        is_error,
                        content: text,
                    });
                }
                ContentBlock::ToolResult { .. } => {}
            }
        }

        last_had_text_only = had_text && !had_tool_use;

        if !tool_results.is_empty() {
            messages.push(ChatMessage {
                role: Role::User,
                content: tool_results,
            });
        } else if !had_tool_use {
            // keep the conversation alternating and nudge toward a
            // conclusion
            messages.push(ChatMessage::user_text(
                "Continue the investigation with the available tools, or call \
                 analysis_complete with your conclusion.",
            ));
        }
    }

    let reasoning = if last_had_text_only {
        "AI analysis returned an answer but did not call analysis_complete.".to_owned()
    } else {
        format!(
            "The investigation hit the limit of {} iterations before reaching a conclusion.",
            options.max_iterations
        )
    };
    Ok(low_confidence_result(
        "AI analysis stopped: iteration budget exhausted.",
        reasoning,
        options.max_iterations,
        commands,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChatResponse;
    use postmortem_common::Dialect;
    use postmortem_debugger::{Debugger, ReplayTransport};
    use serde_json::json;
    use std::path::Path;

    struct ScriptedTransport {
        responses: Vec<ChatResponse>,
        requests_seen: usize,
        sampling: bool,
        tool_use: bool,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<ChatResponse>) -> Self {
            ScriptedTransport {
                responses,
                requests_seen: 0,
                sampling: true,
                tool_use: true,
            }
        }
    }

    impl ChatTransport for ScriptedTransport {
        fn is_sampling_supported(&self) -> bool {
            self.sampling
        }

        fn is_tool_use_supported(&self) -> bool {
            self.tool_use
        }

        fn submit(&mut self, _request: &ChatRequest) -> Result<ChatResponse, SamplingError> {
            if self.requests_seen >= self.responses.len() {
                return Err(SamplingError::new("script exhausted"));
            }
            let response = self.responses[self.requests_seen].clone();
            self.requests_seen += 1;
            Ok(response)
        }
    }

    fn exec_block(id: &str) -> ContentBlock {
        ContentBlock::ToolUse {
            id: id.to_owned(),
            name: "exec".to_owned(),
            input: json!({"command": "thread list"}),
        }
    }

    fn complete_block() -> ContentBlock {
        ContentBlock::ToolUse {
            id: "toolu_done".to_owned(),
            name: "analysis_complete".to_owned(),
            input: json!({
                "root_cause": "Null dereference in handler.",
                "confidence": "high",
                "recommendations": ["Add a null check."],
            }),
        }
    }

    fn fixture() -> (Debugger, CrashReport) {
        let transport =
            ReplayTransport::from_pairs(Dialect::Lldb, &[("thread list", "one thread")]);
        let debugger = Debugger::new(Box::new(transport));
        debugger.open(Path::new("test.dmp")).unwrap();
        (debugger, CrashReport::new(Dialect::Lldb))
    }

    #[test]
    fn test_analysis_complete_terminates() {
        let (debugger, report) = fixture();
        let backends = ToolBackends {
            debugger: &debugger,
            heap: None,
            report: &report,
        };
        let mut transport = ScriptedTransport::new(vec![
            ChatResponse {
                content: vec![exec_block("toolu_1")],
                model: Some("test-model".to_owned()),
            },
            ChatResponse {
                content: vec![complete_block()],
                model: None,
            },
        ]);

        let result = investigate(
            &mut transport,
            &backends,
            &report,
            &InvestigationOptions::default(),
        )
        .unwrap();

        assert_eq!(result.root_cause, "Null dereference in handler.");
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.recommendations, vec!["Add a null check."]);
        // the exec call and the completion are both recorded
        assert_eq!(result.commands_executed.len(), 2);
        assert_eq!(result.commands_executed[0].tool, "exec");
        assert_eq!(result.commands_executed[0].output, "one thread");
    }

    #[test]
    fn test_tool_call_budget() {
        let (debugger, report) = fixture();
        let backends = ToolBackends {
            debugger: &debugger,
            heap: None,
            report: &report,
        };
        // three exec calls in one response against a budget of two
        let mut transport = ScriptedTransport::new(vec![ChatResponse {
            content: vec![
                exec_block("toolu_1"),
                exec_block("toolu_2"),
                exec_block("toolu_3"),
            ],
            model: None,
        }]);

        let options = InvestigationOptions {
            max_tool_calls: 2,
            ..Default::default()
        };
        let result = investigate(&mut transport, &backends, &report, &options).unwrap();

        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.commands_executed.len(), 2);
        assert_eq!(result.iterations, 1);
        assert!(result.reasoning.as_deref().unwrap().contains("2 tool calls"));
    }

    #[test]
    fn test_missing_tool_id_injects_retry() {
        let (debugger, report) = fixture();
        let backends = ToolBackends {
            debugger: &debugger,
            heap: None,
            report: &report,
        };
        let mut transport = ScriptedTransport::new(vec![
            ChatResponse {
                content: vec![exec_block("")],
                model: None,
            },
            ChatResponse {
                content: vec![complete_block()],
                model: None,
            },
        ]);

        let result = investigate(
            &mut transport,
            &backends,
            &report,
            &InvestigationOptions::default(),
        )
        .unwrap();

        // the malformed call executed nothing
        assert_eq!(result.commands_executed.len(), 1);
        assert_eq!(result.commands_executed[0].tool, "analysis_complete");
    }

    #[test]
    fn test_sampling_error_is_low_confidence() {
        let (debugger, report) = fixture();
        let backends = ToolBackends {
            debugger: &debugger,
            heap: None,
            report: &report,
        };
        let mut transport = ScriptedTransport::new(vec![]);

        let result = investigate(
            &mut transport,
            &backends,
            &report,
            &InvestigationOptions::default(),
        )
        .unwrap();

        assert_eq!(
            result.root_cause,
            "AI analysis failed: sampling request error."
        );
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.reasoning.as_deref(), Some("script exhausted"));
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn test_capability_probe_gates_activation() {
        let (debugger, report) = fixture();
        let backends = ToolBackends {
            debugger: &debugger,
            heap: None,
            report: &report,
        };
        let mut transport = ScriptedTransport::new(vec![]);
        transport.tool_use = false;

        let result = investigate(
            &mut transport,
            &backends,
            &report,
            &InvestigationOptions::default(),
        )
        .unwrap();

        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.iterations, 0);
        assert!(result
            .reasoning
            .as_deref()
            .unwrap()
            .contains("does not support sampling"));
    }

    #[test]
    fn test_iteration_budget_with_text_only_answer() {
        let (debugger, report) = fixture();
        let backends = ToolBackends {
            debugger: &debugger,
            heap: None,
            report: &report,
        };
        let text_response = ChatResponse {
            content: vec![ContentBlock::Text {
                text: "It looks like a null dereference.".to_owned(),
            }],
            model: None,
        };
        let mut transport =
            ScriptedTransport::new(vec![text_response.clone(), text_response.clone()]);

        let options = InvestigationOptions {
            max_iterations: 2,
            ..Default::default()
        };
        let result = investigate(&mut transport, &backends, &report, &options).unwrap();

        assert_eq!(result.confidence, Confidence::Low);
        assert!(result
            .reasoning
            .as_deref()
            .unwrap()
            .contains("did not call analysis_complete"));
    }

    #[test]
    fn test_cancellation_reraises() {
        let (debugger, report) = fixture();
        let backends = ToolBackends {
            debugger: &debugger,
            heap: None,
            report: &report,
        };
        let mut transport = ScriptedTransport::new(vec![ChatResponse {
            content: vec![exec_block("toolu_1")],
            model: None,
        }]);

        let flag = Arc::new(AtomicBool::new(true));
        let options = InvestigationOptions {
            cancellation: Some(flag),
            ..Default::default()
        };

        assert!(investigate(&mut transport, &backends, &report, &options).is_err());
    }

    #[test]
    fn test_unsafe_command_surfaces_error_result() {
        let (debugger, report) = fixture();
        let backends = ToolBackends {
            debugger: &debugger,
            heap: None,
            report: &report,
        };
        let mut transport = ScriptedTransport::new(vec![
            ChatResponse {
                content: vec![ContentBlock::ToolUse {
                    id: "toolu_1".to_owned(),
                    name: "exec".to_owned(),
                    input: json!({"command": ".shell whoami"}),
                }],
                model: None,
            },
            ChatResponse {
                content: vec![complete_block()],
                model: None,
            },
        ]);

        let result = investigate(
            &mut transport,
            &backends,
            &report,
            &InvestigationOptions::default(),
        )
        .unwrap();

        // the blocked command is recorded with its error message
        assert!(result.commands_executed[0]
            .output
            .contains("blocked unsafe command"));
    }
}
