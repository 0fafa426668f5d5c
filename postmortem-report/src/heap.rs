//! Managed-heap statistics sections of the report.

use serde::{Deserialize, Serialize};

/// Heap segment kinds after classification.
///
/// Frozen segments merge into [`SegmentKind::Gen2`] for summary purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SegmentKind {
    /// Generation 0 (ephemeral).
    Gen0,
    /// Generation 1 (ephemeral).
    Gen1,
    /// Generation 2.
    Gen2,
    /// Large Object Heap (objects of 85,000 bytes and up).
    Loh,
    /// Pinned Object Heap.
    Poh,
}

/// Per-generation byte totals.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSizes {
    /// Generation 0 bytes.
    pub gen0: u64,
    /// Generation 1 bytes.
    pub gen1: u64,
    /// Generation 2 bytes (frozen segments included).
    pub gen2: u64,
    /// Large Object Heap bytes.
    pub loh: u64,
    /// Pinned Object Heap bytes.
    pub poh: u64,
}

impl GenerationSizes {
    /// Sum over all generations.
    pub fn total(&self) -> u64 {
        self.gen0 + self.gen1 + self.gen2 + self.loh + self.poh
    }
}

/// An `(address, size, kind)` sample of one heap segment.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSample {
    /// Segment start address as lowercase hex.
    pub address: String,
    /// Segment size in bytes.
    pub size: u64,
    /// Classified kind.
    pub kind: SegmentKind,
}

/// Managed-heap segment summary.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcSummary {
    /// Byte totals per generation.
    pub generations: GenerationSizes,
    /// Segment samples in enumeration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<SegmentSample>,
    /// Number of objects on the finalizer queue, best effort.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalizable_object_count: Option<u64>,
    /// Total managed heap bytes.
    pub total_heap_bytes: u64,
}

/// Per-type statistics from the combined heap pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeStat {
    /// Fully qualified type name.
    pub type_name: String,
    /// Instance count.
    pub count: u64,
    /// Sum of instance sizes in bytes.
    pub total_size: u64,
    /// Mean instance size in bytes.
    pub average_size: u64,
    /// Size of the largest instance in bytes.
    pub largest_instance: u64,
    /// Share of the total traversed heap, in percent.
    pub percentage_of_total: f64,
}

/// A sampled large object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LargeObject {
    /// Fully qualified type name.
    pub type_name: String,
    /// Object address as lowercase hex.
    pub address: String,
    /// Object size in bytes.
    pub size: u64,
    /// Generation or segment kind the object lives in.
    pub generation: SegmentKind,
}

/// Task status counts derived from task state flags.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatistics {
    /// Tasks that ran to completion.
    pub ran_to_completion: u64,
    /// Faulted tasks.
    pub faulted: u64,
    /// Canceled tasks.
    pub canceled: u64,
    /// Tasks still pending.
    pub pending: u64,
    /// Up to 50 faulted task samples with exception details.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faulted_samples: Vec<FaultedTask>,
}

/// A sampled faulted task.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultedTask {
    /// Task object address as lowercase hex.
    pub address: String,
    /// Exception type reached through the task's contingent properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
    /// Exception message, when readable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_message: Option<String>,
}

/// An async state-machine candidate found on the heap.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMachineInfo {
    /// Compiler-generated type name containing `+<` and `>d__`.
    pub type_name: String,
    /// Object address as lowercase hex.
    pub address: String,
    /// Value of the `<>1__state` field, when readable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<i32>,
}

/// String instance length histogram.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StringHistogram {
    /// Empty strings.
    pub empty: u64,
    /// Strings of 10 characters or fewer.
    pub tiny: u64,
    /// Strings of 100 characters or fewer.
    pub small: u64,
    /// Strings of 1000 characters or fewer.
    pub medium: u64,
    /// Everything longer.
    pub large: u64,
}

/// One duplicated string value, ranked by wasted bytes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StringDuplicate {
    /// Display value with control characters escaped.
    pub value: String,
    /// Number of instances with this content.
    pub count: u64,
    /// Size of one instance in bytes.
    pub size_per_instance: u64,
    /// Bytes that deduplication would reclaim.
    pub wasted_bytes: u64,
    /// Remediation suggestion for this duplicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// String statistics from the combined heap pass.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StringStatistics {
    /// Number of string instances traversed.
    pub instance_count: u64,
    /// Total bytes held by string instances.
    pub total_bytes: u64,
    /// Length histogram.
    pub histogram: StringHistogram,
    /// Top duplicates ranked by wasted bytes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_duplicates: Vec<StringDuplicate>,
}

/// Results of the single-pass combined heap traversal.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedHeapAnalysis {
    /// Top types ranked by total size.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_types_by_size: Vec<TypeStat>,
    /// Top types ranked by instance count.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_types_by_count: Vec<TypeStat>,
    /// Up to 50 large object samples.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub large_objects: Vec<LargeObject>,
    /// Task status statistics, when tasks were found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_stats: Option<TaskStatistics>,
    /// Up to 100 async state-machine candidates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state_machines: Vec<StateMachineInfo>,
    /// String statistics, when strings were found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_stats: Option<StringStatistics>,
    /// Number of timer objects on the heap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_count: Option<u64>,
    /// Bytes in live objects.
    pub used_bytes: u64,
    /// Bytes in free blocks.
    pub free_bytes: u64,
    /// `free / (used + free)`, zero for an empty heap.
    pub fragmentation_ratio: f64,
    /// Set when the time budget expired and results are partial.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub was_aborted: bool,
}
