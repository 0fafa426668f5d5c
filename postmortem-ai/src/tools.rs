//! The fixed tool set exposed to the model.

use serde_json::{json, Value};

use postmortem_debugger::Debugger;
use postmortem_report::CrashReport;
use postmortem_runtime::{inspect_object, HeapReader};

use crate::transport::ToolDefinition;

/// Default reference depth for `inspect`.
const DEFAULT_INSPECT_DEPTH: usize = 3;

/// The backends tool calls execute against.
pub struct ToolBackends<'a> {
    /// The debugger facade, subject to the unsafe-command filter.
    pub debugger: &'a Debugger,
    /// The managed heap, when the runtime reader located one.
    pub heap: Option<&'a dyn HeapReader>,
    /// The finalized report, used to resolve thread stacks.
    pub report: &'a CrashReport,
}

/// Builds the fixed tool definitions submitted with every request.
pub(crate) fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "exec".to_owned(),
            description: "Execute a debugger command against the open dump and return its raw \
                          output. Shell escapes and script commands are blocked."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The debugger command." }
                },
                "required": ["command"]
            }),
        },
        ToolDefinition {
            name: "inspect".to_owned(),
            description: "Inspect a managed object at the given address, following references \
                          up to max_depth levels."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "address": { "type": "string", "description": "Object address as hex." },
                    "max_depth": { "type": "integer", "minimum": 1, "maximum": 5 }
                },
                "required": ["address"]
            }),
        },
        ToolDefinition {
            name: "get_thread_stack".to_owned(),
            description: "Return the recorded call stack of a thread, resolved by display id, \
                          OS thread id (hex or decimal), or managed thread id."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "thread_id": { "type": "string" }
                },
                "required": ["thread_id"]
            }),
        },
        ToolDefinition {
            name: "analysis_complete".to_owned(),
            description: "Finish the investigation with a structured conclusion.".to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "root_cause": { "type": "string" },
                    "confidence": { "type": "string", "enum": ["high", "medium", "low", "unknown"] },
                    "reasoning": { "type": "string" },
                    "recommendations": { "type": "array", "items": { "type": "string" } },
                    "additional_findings": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["root_cause", "confidence"]
            }),
        },
    ]
}

fn exec(backends: &ToolBackends<'_>, input: &Value) -> Result<String, String> {
    let command = input
        .get("command")
        .and_then(Value::as_str)
        .ok_or_else(|| "exec requires a `command` string".to_owned())?;
    backends
        .debugger
        .execute(command)
        .map_err(|error| error.full_message())
}

fn inspect(backends: &ToolBackends<'_>, input: &Value) -> Result<String, String> {
    let address_text = input
        .get("address")
        .and_then(Value::as_str)
        .ok_or_else(|| "inspect requires an `address` hex string".to_owned())?;
    let address = postmortem_common::parse_hex_addr(address_text)
        .ok_or_else(|| format!("`{address_text}` is not a valid hex address"))?;
    let max_depth = input
        .get("max_depth")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_INSPECT_DEPTH as u64) as usize;

    let Some(heap) = backends.heap else {
        // no managed runtime reader; steer the model toward SOS
        let hint = json!({
            "hint": "The managed runtime reader is unavailable for this dump. Use the exec \
                     tool with SOS commands instead, e.g. `sos DumpObj <address>`.",
            "address": postmortem_common::format_hex_addr(address),
        });
        return Ok(hint.to_string());
    };

    Ok(inspect_object(heap, address, max_depth).to_string())
}

/// Resolves a thread by display id, hex or decimal OS thread id, or
/// managed thread id.
fn resolve_thread<'r>(
    report: &'r CrashReport,
    requested: &str,
) -> Option<&'r postmortem_report::ThreadInfo> {
    let requested = requested.trim();
    let threads = &report.threads.threads;

    if let Some(thread) = threads.iter().find(|t| t.thread_id == requested) {
        return Some(thread);
    }

    if let Some(value) = postmortem_common::parse_hex_addr(requested) {
        let normalized = postmortem_common::format_hex_addr(value);
        if let Some(thread) = threads
            .iter()
            .find(|t| t.os_thread_id.as_deref() == Some(normalized.as_str()))
        {
            return Some(thread);
        }
    }

    if let Ok(managed) = requested.parse::<i32>() {
        if let Some(thread) = threads
            .iter()
            .find(|t| t.managed_thread_id == Some(managed))
        {
            return Some(thread);
        }
    }

    if let Ok(decimal) = requested.parse::<u64>() {
        let normalized = postmortem_common::format_hex_addr(decimal);
        if let Some(thread) = threads
            .iter()
            .find(|t| t.os_thread_id.as_deref() == Some(normalized.as_str()))
        {
            return Some(thread);
        }
    }

    threads
        .iter()
        .find(|t| t.thread_id.starts_with(&format!("{requested} (")))
}

fn get_thread_stack(backends: &ToolBackends<'_>, input: &Value) -> Result<String, String> {
    let requested = input
        .get("thread_id")
        .and_then(Value::as_str)
        .ok_or_else(|| "get_thread_stack requires a `thread_id` string".to_owned())?;

    let Some(thread) = resolve_thread(backends.report, requested) else {
        return Err(format!("no thread matches `{requested}`"));
    };

    serde_json::to_string(&json!({
        "threadId": thread.thread_id,
        "osThreadId": thread.os_thread_id,
        "managedThreadId": thread.managed_thread_id,
        "isFaulting": thread.is_faulting,
        "callStack": thread.call_stack,
    }))
    .map_err(|error| error.to_string())
}

/// Dispatches one tool call. `Err` carries the message surfaced as an
/// error tool result.
pub(crate) fn execute_tool(
    backends: &ToolBackends<'_>,
    name: &str,
    input: &Value,
) -> Result<String, String> {
    match name {
        "exec" => exec(backends, input),
        "inspect" => inspect(backends, input),
        "get_thread_stack" => get_thread_stack(backends, input),
        other => Err(format!("unknown tool `{other}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmortem_common::Dialect;
    use postmortem_debugger::ReplayTransport;
    use postmortem_report::{StackFrame, ThreadInfo};
    use std::path::Path;

    fn fixture() -> (Debugger, CrashReport) {
        let transport =
            ReplayTransport::from_pairs(Dialect::Lldb, &[("thread list", "one thread")]);
        let debugger = Debugger::new(Box::new(transport));
        debugger.open(Path::new("test.dmp")).unwrap();

        let mut report = CrashReport::new(Dialect::Lldb);
        report.threads.threads.push(ThreadInfo {
            thread_id: "1 (tid: 0x2f03)".to_owned(),
            os_thread_id: Some("0x2f03".to_owned()),
            managed_thread_id: Some(4),
            call_stack: vec![StackFrame {
                function: "main".to_owned(),
                ..Default::default()
            }],
            ..Default::default()
        });
        (debugger, report)
    }

    #[test]
    fn test_exec_tool() {
        let (debugger, report) = fixture();
        let backends = ToolBackends {
            debugger: &debugger,
            heap: None,
            report: &report,
        };

        let output =
            execute_tool(&backends, "exec", &json!({"command": "thread list"})).unwrap();
        assert_eq!(output, "one thread");
    }

    #[test]
    fn test_exec_blocks_unsafe_command() {
        let (debugger, report) = fixture();
        let backends = ToolBackends {
            debugger: &debugger,
            heap: None,
            report: &report,
        };

        let error =
            execute_tool(&backends, "exec", &json!({"command": ".shell whoami"})).unwrap_err();
        assert!(error.contains("blocked unsafe command"));
    }

    #[test]
    fn test_inspect_without_heap_hints_sos() {
        let (debugger, report) = fixture();
        let backends = ToolBackends {
            debugger: &debugger,
            heap: None,
            report: &report,
        };

        let output = execute_tool(&backends, "inspect", &json!({"address": "0x1234"})).unwrap();
        assert!(output.contains("DumpObj"));
    }

    #[test]
    fn test_thread_resolution_variants() {
        let (debugger, report) = fixture();
        let backends = ToolBackends {
            debugger: &debugger,
            heap: None,
            report: &report,
        };

        // by display id, hex tid, decimal tid, managed id, bare index
        for requested in ["1 (tid: 0x2f03)", "0x2f03", "12035", "4", "1"] {
            let output = execute_tool(
                &backends,
                "get_thread_stack",
                &json!({"thread_id": requested}),
            )
            .unwrap();
            assert!(output.contains("\"main\""), "{requested}");
        }

        let error = execute_tool(
            &backends,
            "get_thread_stack",
            &json!({"thread_id": "nope"}),
        )
        .unwrap_err();
        assert!(error.contains("no thread matches"));
    }
}
