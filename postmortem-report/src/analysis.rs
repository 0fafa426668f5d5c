//! Derived artifacts computed by finalization.
//!
//! Everything in this module lives under the report's `analysis` key, so
//! evidence pointers into it start with `/analysis`.

use serde::{Deserialize, Serialize};

use crate::report::Severity;

/// Container for all finalizer output.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSection {
    /// Per-thread meaningful-top-frame selection.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack_selection: Vec<StackSelection>,
    /// Deduplication signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    /// Native and managed symbol health.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols: Option<SymbolHealth>,
    /// Snapshot timeline with wait classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline: Option<Timeline>,
    /// Deterministic findings with stable ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
    /// Root-cause hypotheses ordered by confidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<RootCause>,
}

/// Reasons a frame was skipped during top-frame selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// The frame has an empty function name.
    EmptyFunction,
    /// The frame is `[Runtime]` glue.
    RuntimeGlue,
    /// The frame is the `[ManagedMethod]` placeholder.
    ManagedPlaceholder,
    /// The frame is a `[JIT Code @ …]` placeholder.
    PlaceholderJitCode,
    /// The frame was skipped for an unrecognized reason.
    Unknown,
}

/// One skipped frame and why.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFrame {
    /// Frame index within the call stack.
    pub index: usize,
    /// Why the frame was not selected.
    pub reason: SkipReason,
}

/// Meaningful-top-frame selection for one thread.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackSelection {
    /// Display id of the thread.
    pub thread_id: String,
    /// Index of the selected frame.
    pub selected_index: usize,
    /// Normalized `module!function` display of the selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_function: Option<String>,
    /// Frames skipped before the selection, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_frames: Vec<SkippedFrame>,
}

/// Classification of what the dump captured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureKind {
    /// A signal or exception terminated the process.
    Crash,
    /// The process was stopped without a fault (e.g. SIGSTOP snapshot).
    Hang,
    /// An out-of-memory condition.
    Oom,
    /// Nothing conclusive.
    #[default]
    Unknown,
}

impl SignatureKind {
    /// Returns the lowercase payload spelling of this kind.
    pub fn name(self) -> &'static str {
        match self {
            SignatureKind::Crash => "crash",
            SignatureKind::Hang => "hang",
            SignatureKind::Oom => "oom",
            SignatureKind::Unknown => "unknown",
        }
    }
}

/// The components the signature hash covers, kept for inspection.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureParts {
    /// Exception type, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    /// Signal name, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    /// Managed runtime version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    /// Operating system name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// Up to three normalized top frames in selection order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_frames: Vec<String>,
}

/// Stable deduplication signature of the report.
///
/// The hash covers a fixed LF-delimited payload, so identical inputs
/// produce a byte-identical hash on every platform.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    /// Payload format version, currently 1.
    pub version: u32,
    /// Crash classification.
    pub kind: SignatureKind,
    /// `sha256:` followed by lowercase hex.
    pub hash: String,
    /// The hashed components.
    pub parts: SignatureParts,
}

/// Native symbol health counters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeSymbolHealth {
    /// Distinct modules without symbols, placeholders excluded.
    pub missing_count: usize,
    /// Names of the modules missing symbols, sorted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_modules: Vec<String>,
}

/// Managed symbol and Source Link health counters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedSymbolHealth {
    /// Managed frames with file and line but no Source Link URL.
    pub pdb_missing_count: usize,
    /// Managed frames whose Source Link URL resolved.
    pub source_link_resolved: usize,
    /// Managed frames with source info but no resolvable URL.
    pub source_link_unresolved: usize,
}

/// Symbol health of the whole report.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolHealth {
    /// Native module symbol state.
    pub native: NativeSymbolHealth,
    /// Managed frame symbol state.
    pub managed: ManagedSymbolHealth,
}

/// Thread activity classification in the snapshot timeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadActivity {
    /// Blocked in a wait primitive.
    Waiting,
    /// Executing ordinary code.
    Running,
    /// Could not be classified.
    #[default]
    Unknown,
}

/// Wait classification of a waiting thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitKind {
    /// `Monitor.Wait`.
    Monitor,
    /// `WaitHandle` / reset events.
    Event,
    /// `Thread.Sleep`.
    Sleep,
    /// Thread join.
    Join,
    /// Native wait syscalls such as `futex` or `WaitForSingleObject`.
    NativeSyscall,
    /// Other managed waits.
    Wait,
}

/// One thread entry in the snapshot timeline.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineThread {
    /// Display id of the thread.
    pub thread_id: String,
    /// Activity classification.
    pub activity: ThreadActivity,
    /// Wait classification for waiting threads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_kind: Option<WaitKind>,
    /// The selected frame's function the classification is based on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

/// A chain of threads blocked on one another.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedChain {
    /// Thread ids from blocked to owner, length at least two.
    pub thread_ids: Vec<String>,
}

/// A detected deadlock cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadlockCycle {
    /// Detection kind, `waitgraph-cycle` or `monitor-cycle`.
    pub kind: String,
    /// Participating thread ids.
    pub thread_ids: Vec<String>,
    /// Detection confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Snapshot timeline of thread activity at capture time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    /// Format version, currently 1.
    pub version: u32,
    /// Always `snapshot`.
    pub kind: String,
    /// Why the dump was captured, derived from exception/signal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_reason: Option<String>,
    /// Up to 200 threads; the faulting thread is always included.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub threads: Vec<TimelineThread>,
    /// Ownership chains of length two or more.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_chains: Option<Vec<BlockedChain>>,
    /// Detected deadlock cycles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadlocks: Option<Vec<DeadlockCycle>>,
}

/// Confidence scale for findings, hypotheses and AI conclusions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Could not be assessed.
    #[default]
    Unknown,
    /// Weak evidence.
    Low,
    /// Moderate evidence.
    Medium,
    /// Strong evidence.
    High,
}

/// A deterministic finding with a stable id.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Stable id, e.g. `symbols.native.missing`.
    pub id: String,
    /// Short title.
    pub title: String,
    /// Category, e.g. `symbols` or `threads`.
    pub category: String,
    /// Severity classification.
    pub severity: Severity,
    /// Confidence in the finding.
    pub confidence: Confidence,
    /// One-paragraph summary.
    pub summary: String,
    /// JSON pointers into the report tree.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
    /// Suggested follow-up debugger commands or actions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_actions: Vec<String>,
}

/// A single root-cause hypothesis.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootCauseHypothesis {
    /// Short label, e.g. `native-signal`.
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Explanation of the hypothesis.
    pub description: String,
    /// JSON pointer to the primary evidence node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// Root-cause hypotheses ordered by confidence descending, label
/// ascending.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootCause {
    /// Hypotheses in ranked order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hypotheses: Vec<RootCauseHypothesis>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_reason_serialization() {
        let cases = [
            (SkipReason::EmptyFunction, "\"empty-function\""),
            (SkipReason::RuntimeGlue, "\"runtime-glue\""),
            (SkipReason::ManagedPlaceholder, "\"managed-placeholder\""),
            (SkipReason::PlaceholderJitCode, "\"placeholder-jit-code\""),
            (SkipReason::Unknown, "\"unknown\""),
        ];

        for (reason, expected) in cases {
            assert_eq!(serde_json::to_string(&reason).unwrap(), expected);
        }
    }

    #[test]
    fn test_signature_kind_names() {
        assert_eq!(SignatureKind::Crash.name(), "crash");
        assert_eq!(SignatureKind::Unknown.name(), "unknown");
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Low > Confidence::Unknown);
    }
}
