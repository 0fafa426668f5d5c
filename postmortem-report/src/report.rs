//! The crash report tree populated by parsers and the runtime reader.

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use postmortem_common::{Arch, Dialect};

use crate::analysis::AnalysisSection;
use crate::heap::{CombinedHeapAnalysis, GcSummary};

/// Root aggregate of a crash-dump analysis.
///
/// The report exclusively owns all sub-entities; evidence references are
/// JSON-pointer strings into this tree, never object references.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashReport {
    /// When the analysis run started.
    #[serde(with = "timestamp_millis")]
    pub timestamp: DateTime<Utc>,
    /// Dialect of the debugger that produced the raw output.
    pub dialect: Dialect,
    /// High-level counts and the one-line description.
    pub summary: Summary,
    /// Operating system and runtime environment of the dump.
    pub environment: Environment,
    /// All threads found in the dump with their call stacks.
    pub threads: ThreadsInfo,
    /// Loaded modules in list order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<ModuleInfo>,
    /// The faulting exception, when one was recorded in the dump.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,
    /// Heap consumption heuristics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryAnalysis>,
    /// Stack-integrity and vulnerability heuristics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityAnalysis>,
    /// Lock and wait-graph heuristics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronization: Option<SynchronizationAnalysis>,
    /// Task, timer and state-machine data from the managed heap.
    #[serde(rename = "async", default, skip_serializing_if = "Option::is_none")]
    pub async_info: Option<AsyncAnalysis>,
    /// Process arguments and environment extracted from dump memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessInfo>,
    /// Managed-heap segment summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gc: Option<GcSummary>,
    /// Single-pass combined heap statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heap: Option<CombinedHeapAnalysis>,
    /// Verbatim output of every pipeline command, keyed by command string.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub raw_commands: IndexMap<String, String>,
    /// Derived artifacts computed by finalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisSection>,
}

impl CrashReport {
    /// Creates an empty report for a freshly opened dump.
    pub fn new(dialect: Dialect) -> Self {
        CrashReport {
            timestamp: Utc::now(),
            dialect,
            summary: Summary::default(),
            environment: Environment::default(),
            threads: ThreadsInfo::default(),
            modules: Vec::new(),
            exception: None,
            memory: None,
            security: None,
            synchronization: None,
            async_info: None,
            process: None,
            gc: None,
            heap: None,
            raw_commands: IndexMap::new(),
            analysis: None,
        }
    }

    /// Serializes the report to compact JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Serializes the report to human-readable JSON.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Returns the faulting thread, if one has been marked.
    pub fn faulting_thread(&self) -> Option<&ThreadInfo> {
        self.threads.threads.iter().find(|t| t.is_faulting)
    }

    /// Records the verbatim output of a pipeline command.
    pub fn record_command(&mut self, command: &str, output: &str) {
        self.raw_commands
            .insert(command.to_owned(), output.to_owned());
    }
}

mod timestamp_millis {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// High-level counts and the one-line report description.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// One-line description of the analysis outcome.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Number of OS threads in the dump.
    pub os_thread_count: usize,
    /// Total number of stack frames across all threads.
    pub total_frame_count: usize,
    /// Number of loaded modules.
    pub module_count: usize,
    /// Signal that stopped the faulting thread, e.g. `SIGSEGV`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

/// Operating system and managed-runtime environment of the dump.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    /// Platform the dump was captured on.
    pub platform: Platform,
    /// Version string of the managed runtime, when one was located.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
}

/// Platform identification derived from the module list.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    /// Operating system name, e.g. `Linux`, `macOS`, `Windows`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os: String,
    /// Processor architecture.
    pub architecture: Arch,
    /// Pointer width in bits (32 or 64).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer_size: Option<u32>,
    /// C library flavor, e.g. `glibc` or `musl`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub libc_type: Option<String>,
    /// Linux distribution, when recognizable from module paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<String>,
}

/// The thread table of the report.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadsInfo {
    /// Number of threads.
    pub count: usize,
    /// All threads in dump order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub threads: Vec<ThreadInfo>,
}

/// A single thread with its call stack.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadInfo {
    /// Display identifier, e.g. `1 (tid: 0x2f03)`.
    pub thread_id: String,
    /// OS thread id as lowercase hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_thread_id: Option<String>,
    /// Managed thread id, when the runtime reader resolved one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_thread_id: Option<i32>,
    /// Scheduler state text as printed by the debugger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Stop reason, e.g. `signal SIGSEGV`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    /// Thread name, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Dispatch queue name (macOS).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Whether this thread raised the fault. At most one thread carries
    /// this flag after finalization.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_faulting: bool,
    /// Normalized display of the meaningful top frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_function: Option<String>,
    /// Stack frames, renumbered `0..n-1` by finalization.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub call_stack: Vec<StackFrame>,
}

/// One stack frame of a thread.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    /// Index within the owning call stack.
    pub frame_number: usize,
    /// Instruction pointer as lowercase hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction_pointer: Option<String>,
    /// Module the frame resolves into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Function display name, possibly a placeholder such as
    /// `[ManagedMethod]` or `[JIT Code @ 0x…]`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub function: String,
    /// Source file, when symbols resolved one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    /// Line number within `source_file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    /// Source Link URL for the frame, when resolvable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Whether the frame executes managed code.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_managed: bool,
}

impl StackFrame {
    /// Returns `true` when the function name is a managed or JIT
    /// placeholder, which forces `is_managed` during finalization.
    pub fn is_placeholder(&self) -> bool {
        let function = self.function.trim();
        function.eq_ignore_ascii_case("[ManagedMethod]") || function.starts_with("[JIT Code @")
    }

    /// Returns the `module!function` display used for top-frame output.
    pub fn display_name(&self) -> String {
        match self.module.as_deref().filter(|m| !m.is_empty()) {
            Some(module) => format!("{}!{}", module, self.function),
            None => self.function.clone(),
        }
    }
}

/// A loaded module, optionally enriched with assembly metadata.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    /// Short module name.
    pub name: String,
    /// Load address as lowercase hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_address: Option<String>,
    /// Full path on the capturing machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Module version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Whether debug symbols were located for this module.
    pub has_symbols: bool,
    /// Assembly version from ECMA-335 metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly_version: Option<String>,
    /// Decoded assembly-level custom attributes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<AssemblyAttribute>,
}

/// A decoded assembly-level custom attribute.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyAttribute {
    /// Fully qualified attribute type name.
    #[serde(rename = "type")]
    pub attribute_type: String,
    /// Decoded positional value, or `<binary>` for undecodable blobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Key of key/value attributes such as `AssemblyMetadataAttribute`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// The faulting exception recorded in the dump.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo {
    /// Canonical exception name, e.g. `EXCEPTION_ACCESS_VIOLATION`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
    /// Numeric exception code as lowercase hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable message accompanying the code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Faulting address, when recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Memory-pressure classification for the heap heuristics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressure {
    /// Consumption within expected bounds.
    #[default]
    Normal,
    /// More than 500 MiB of heap.
    Elevated,
    /// More than 2 GiB of heap.
    High,
}

/// Heap consumption heuristics.
///
/// High consumption is reported as a severity plus a recommendation; it
/// is a signal of pressure, not a confirmed leak.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryAnalysis {
    /// Total heap bytes summed over all heaps or regions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_heap_bytes: Option<u64>,
    /// Pressure classification.
    pub severity: MemoryPressure,
    /// Recommendation emitted for elevated or high pressure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    /// Whether the dump carries an out-of-memory marker.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub oom_detected: bool,
}

/// Stack-integrity and vulnerability heuristics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAnalysis {
    /// Detected vulnerability indicators, ordered by severity.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vulnerabilities: Vec<Vulnerability>,
    /// Stack canary / SEH state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_integrity: Option<StackIntegrity>,
}

/// Severity scale shared by vulnerabilities and findings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Info,
    /// Low severity.
    Low,
    /// Medium severity.
    Medium,
    /// High severity.
    High,
    /// Critical severity.
    Critical,
}

/// A single vulnerability indicator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    /// Short title.
    pub title: String,
    /// Severity classification.
    pub severity: Severity,
    /// CWE identifier, e.g. `CWE-121`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwe: Option<String>,
    /// Longer description of the indicator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Stack canary and exception-handler integrity flags.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackIntegrity {
    /// Whether a stack canary corruption was reported.
    pub canary_corrupted: bool,
    /// SafeSEH state. Only meaningful on 32-bit architectures and
    /// omitted entirely on 64-bit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_seh: Option<bool>,
}

/// Lock and wait-graph heuristics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizationAnalysis {
    /// Whether a potential deadlock was detected.
    pub detected: bool,
    /// Classification, e.g. `Potential Deadlock`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Threads observed waiting on lock primitives.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waiting_threads: Vec<String>,
    /// Advisory text for single-waiter situations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    /// Typed wait graph over threads and resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_graph: Option<WaitGraph>,
    /// Monitor-lock cycles reported by the debugger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub potential_deadlocks: Option<Vec<PotentialDeadlock>>,
}

/// A directed graph of `waits` / `owned by` edges between threads and
/// synchronization resources, all identified by opaque strings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitGraph {
    /// Edges in discovery order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<WaitEdge>,
}

/// One edge of the wait graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitEdge {
    /// Source node id (a thread or a resource).
    pub from: String,
    /// Edge label, `waits` or `owned by`.
    pub label: String,
    /// Target node id.
    pub to: String,
}

/// A monitor-lock cycle reported by the debugger.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PotentialDeadlock {
    /// Threads participating in the cycle.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thread_ids: Vec<String>,
    /// The contended resource, when identified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Free-form description from the debugger output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Task, timer and state-machine data from the managed heap.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncAnalysis {
    /// Number of active timers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_count: Option<usize>,
}

/// Process arguments and environment extracted from dump memory.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    /// Argument count from the entry frame, when found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argc: Option<u32>,
    /// Address of the argv array as lowercase hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argv_address: Option<String>,
    /// Command-line arguments in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    /// `KEY=VALUE` environment entries, sorted by code point, with
    /// sensitive values redacted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_variables: Vec<String>,
    /// Set when at least one environment value was redacted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sensitive_data_filtered: bool,
}
