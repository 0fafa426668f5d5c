//! Managed-heap summaries and the single-pass combined analysis.
//!
//! The combined pass shards the segment list across a worker pool (one
//! rayon task per segment). Each worker owns private accumulator maps;
//! the only shared state is the monotonic abort flag raised when the
//! time budget expires. All merges happen on the coordinator after
//! join, iterating keys in ascending order so the output is
//! byte-deterministic for identical input.

mod strings;
mod tasks;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;

use postmortem_common::format_hex_addr;
use postmortem_report::{
    CombinedHeapAnalysis, FaultedTask, GcSummary, GenerationSizes, LargeObject, SegmentKind,
    SegmentSample, StateMachineInfo, StringDuplicate, StringHistogram, StringStatistics,
    TaskStatistics, TypeStat,
};

use crate::reader::{HeapReader, HeapSegment, RawSegmentKind};

/// Objects at or above this size live on the large object heap.
const LOH_THRESHOLD: u64 = 85_000;

/// Tuning knobs of the combined heap pass.
#[derive(Clone, Debug)]
pub struct HeapAnalysisOptions {
    /// Wall-clock budget; expiry aborts the traversal with partial
    /// results.
    pub time_budget_ms: u64,
    /// Number of entries in each top-types and top-duplicates list.
    pub top_n: usize,
    /// String contents sampled for duplicate detection, per segment.
    pub max_string_samples: usize,
    /// Large-object samples kept.
    pub max_large_objects: usize,
    /// Faulted-task samples kept.
    pub max_faulted_tasks: usize,
    /// State-machine samples kept.
    pub max_state_machines: usize,
}

impl Default for HeapAnalysisOptions {
    fn default() -> Self {
        HeapAnalysisOptions {
            time_budget_ms: 30_000,
            top_n: 20,
            max_string_samples: 200,
            max_large_objects: 50,
            max_faulted_tasks: 50,
            max_state_machines: 100,
        }
    }
}

/// Maps runtime segment kinds onto report generations. Frozen segments
/// merge into generation 2.
fn classify_segment(kind: RawSegmentKind) -> SegmentKind {
    match kind {
        RawSegmentKind::Gen0 => SegmentKind::Gen0,
        RawSegmentKind::Gen1 => SegmentKind::Gen1,
        RawSegmentKind::Gen2 | RawSegmentKind::Frozen => SegmentKind::Gen2,
        RawSegmentKind::Large => SegmentKind::Loh,
        RawSegmentKind::Pinned => SegmentKind::Poh,
    }
}

/// Builds the per-segment heap summary.
pub fn summarize_heap(heap: &dyn HeapReader) -> GcSummary {
    let mut generations = GenerationSizes::default();
    let mut segments = Vec::new();

    for segment in heap.segments() {
        let kind = classify_segment(segment.kind);
        match kind {
            SegmentKind::Gen0 => generations.gen0 += segment.size,
            SegmentKind::Gen1 => generations.gen1 += segment.size,
            SegmentKind::Gen2 => generations.gen2 += segment.size,
            SegmentKind::Loh => generations.loh += segment.size,
            SegmentKind::Poh => generations.poh += segment.size,
        }
        segments.push(SegmentSample {
            address: format_hex_addr(segment.address),
            size: segment.size,
            kind,
        });
    }

    GcSummary {
        total_heap_bytes: generations.total(),
        generations,
        segments,
        finalizable_object_count: heap.finalizable_count(),
    }
}

#[derive(Clone, Copy, Default)]
struct TypeAccum {
    count: u64,
    total_size: u64,
    largest: u64,
}

#[derive(Clone, Copy, Default)]
struct StringAccum {
    count: u64,
    size_per_instance: u64,
}

#[derive(Default)]
struct WorkerState {
    types: HashMap<String, TypeAccum>,
    string_contents: HashMap<String, StringAccum>,
    histogram: StringHistogram,
    string_count: u64,
    string_bytes: u64,
    large_objects: Vec<LargeObject>,
    ran_to_completion: u64,
    faulted: u64,
    canceled: u64,
    pending: u64,
    faulted_samples: Vec<FaultedTask>,
    state_machines: Vec<StateMachineInfo>,
    timer_count: u64,
    used_bytes: u64,
    free_bytes: u64,
    sampled_strings: usize,
    aborted: bool,
}

fn walk_segment(
    heap: &dyn HeapReader,
    segment: &HeapSegment,
    options: &HeapAnalysisOptions,
    started: Instant,
    abort: &AtomicBool,
) -> WorkerState {
    let mut state = WorkerState::default();
    let generation = classify_segment(segment.kind);

    for (index, object) in heap.objects(segment).enumerate() {
        if abort.load(Ordering::Relaxed) {
            state.aborted = true;
            break;
        }
        if index & 0x3F == 0 && started.elapsed().as_millis() as u64 >= options.time_budget_ms {
            abort.store(true, Ordering::Relaxed);
            state.aborted = true;
            break;
        }

        if object.is_free {
            state.free_bytes += object.size;
            continue;
        }
        state.used_bytes += object.size;

        let accum = state.types.entry(object.type_name.clone()).or_default();
        accum.count += 1;
        accum.total_size += object.size;
        accum.largest = accum.largest.max(object.size);

        if object.size >= LOH_THRESHOLD && state.large_objects.len() < options.max_large_objects {
            state.large_objects.push(LargeObject {
                type_name: object.type_name.clone(),
                address: format_hex_addr(object.address),
                size: object.size,
                generation,
            });
        }

        if object.type_name == "System.String" {
            state.string_count += 1;
            state.string_bytes += object.size;
            if let Some(length) = heap.string_length(&object) {
                strings::classify_length(&mut state.histogram, length);
            }
            if state.sampled_strings < options.max_string_samples {
                if let Some(content) = heap.string_value(&object) {
                    state.sampled_strings += 1;
                    let accum = state.string_contents.entry(content).or_default();
                    accum.count += 1;
                    accum.size_per_instance = object.size;
                }
            }
        } else if tasks::is_task_type(&object.type_name) {
            let flags = heap.read_i32_field(object.address, "m_stateFlags").unwrap_or(0);
            match tasks::task_status(flags) {
                tasks::TaskStatus::RanToCompletion => state.ran_to_completion += 1,
                tasks::TaskStatus::Faulted => {
                    state.faulted += 1;
                    if state.faulted_samples.len() < options.max_faulted_tasks {
                        state
                            .faulted_samples
                            .push(tasks::faulted_task_details(heap, object.address));
                    }
                }
                tasks::TaskStatus::Canceled => state.canceled += 1,
                tasks::TaskStatus::Pending => state.pending += 1,
            }
        } else if tasks::is_timer_type(&object.type_name) {
            state.timer_count += 1;
        } else if tasks::is_state_machine_type(&object.type_name)
            && state.state_machines.len() < options.max_state_machines
        {
            state.state_machines.push(StateMachineInfo {
                type_name: object.type_name.clone(),
                address: format_hex_addr(object.address),
                state: heap.read_i32_field(object.address, "<>1__state"),
            });
        }
    }

    state
}

/// Runs the combined heap pass.
///
/// Segments are processed in parallel when the runtime uses multiple
/// subheaps; with a single subheap the traversal is sequential. Partial
/// results are returned with `was_aborted` set when the time budget
/// expires.
pub fn analyze_heap(heap: &dyn HeapReader, options: &HeapAnalysisOptions) -> CombinedHeapAnalysis {
    let segments = heap.segments();
    let started = Instant::now();
    let abort = AtomicBool::new(false);

    let workers: Vec<WorkerState> = if heap.heap_count() > 1 {
        segments
            .par_iter()
            .map(|segment| walk_segment(heap, segment, options, started, &abort))
            .collect()
    } else {
        segments
            .iter()
            .map(|segment| walk_segment(heap, segment, options, started, &abort))
            .collect()
    };

    merge_workers(workers, options)
}

fn merge_workers(workers: Vec<WorkerState>, options: &HeapAnalysisOptions) -> CombinedHeapAnalysis {
    // sorted maps give a deterministic merge order
    let mut types: BTreeMap<String, TypeAccum> = BTreeMap::new();
    let mut string_contents: BTreeMap<String, StringAccum> = BTreeMap::new();
    let mut histogram = StringHistogram::default();
    let mut task_stats = TaskStatistics::default();
    let mut large_objects = Vec::new();
    let mut state_machines = Vec::new();
    let mut string_count = 0u64;
    let mut string_bytes = 0u64;
    let mut timer_count = 0u64;
    let mut used_bytes = 0u64;
    let mut free_bytes = 0u64;
    let mut was_aborted = false;

    for worker in workers {
        for (name, accum) in worker.types {
            let entry = types.entry(name).or_default();
            entry.count += accum.count;
            entry.total_size += accum.total_size;
            entry.largest = entry.largest.max(accum.largest);
        }
        for (content, accum) in worker.string_contents {
            let entry = string_contents.entry(content).or_default();
            entry.count += accum.count;
            entry.size_per_instance = entry.size_per_instance.max(accum.size_per_instance);
        }
        histogram.empty += worker.histogram.empty;
        histogram.tiny += worker.histogram.tiny;
        histogram.small += worker.histogram.small;
        histogram.medium += worker.histogram.medium;
        histogram.large += worker.histogram.large;

        task_stats.ran_to_completion += worker.ran_to_completion;
        task_stats.faulted += worker.faulted;
        task_stats.canceled += worker.canceled;
        task_stats.pending += worker.pending;
        task_stats.faulted_samples.extend(worker.faulted_samples);

        large_objects.extend(worker.large_objects);
        state_machines.extend(worker.state_machines);
        string_count += worker.string_count;
        string_bytes += worker.string_bytes;
        timer_count += worker.timer_count;
        used_bytes += worker.used_bytes;
        free_bytes += worker.free_bytes;
        was_aborted |= worker.aborted;
    }

    let total = used_bytes;
    let make_stat = |name: &String, accum: &TypeAccum| TypeStat {
        type_name: name.clone(),
        count: accum.count,
        total_size: accum.total_size,
        average_size: accum.total_size / accum.count.max(1),
        largest_instance: accum.largest,
        percentage_of_total: if total == 0 {
            0.0
        } else {
            accum.total_size as f64 * 100.0 / total as f64
        },
    };

    let mut by_size: Vec<TypeStat> = types.iter().map(|(n, a)| make_stat(n, a)).collect();
    by_size.sort_by(|a, b| {
        b.total_size
            .cmp(&a.total_size)
            .then_with(|| a.type_name.cmp(&b.type_name))
    });
    by_size.truncate(options.top_n);

    let mut by_count: Vec<TypeStat> = types.iter().map(|(n, a)| make_stat(n, a)).collect();
    by_count.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.type_name.cmp(&b.type_name))
    });
    by_count.truncate(options.top_n);

    large_objects.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.address.cmp(&b.address)));
    large_objects.truncate(options.max_large_objects);

    task_stats.faulted_samples.truncate(options.max_faulted_tasks);
    state_machines.truncate(options.max_state_machines);

    let mut top_duplicates: Vec<StringDuplicate> = string_contents
        .iter()
        .filter(|(_, accum)| accum.count > 1)
        .map(|(content, accum)| StringDuplicate {
            value: strings::display_value(content),
            count: accum.count,
            size_per_instance: accum.size_per_instance,
            wasted_bytes: (accum.count - 1) * accum.size_per_instance,
            suggestion: Some(strings::suggestion_for(content)),
        })
        .collect();
    top_duplicates.sort_by(|a, b| {
        b.wasted_bytes
            .cmp(&a.wasted_bytes)
            .then_with(|| a.value.cmp(&b.value))
    });
    top_duplicates.truncate(options.top_n);

    let string_stats = (string_count > 0).then_some(StringStatistics {
        instance_count: string_count,
        total_bytes: string_bytes,
        histogram,
        top_duplicates,
    });

    let has_tasks = task_stats.ran_to_completion
        + task_stats.faulted
        + task_stats.canceled
        + task_stats.pending
        > 0;

    CombinedHeapAnalysis {
        top_types_by_size: by_size,
        top_types_by_count: by_count,
        large_objects,
        task_stats: has_tasks.then_some(task_stats),
        state_machines,
        string_stats,
        timer_count: (timer_count > 0).then_some(timer_count),
        used_bytes,
        free_bytes,
        fragmentation_ratio: if used_bytes + free_bytes == 0 {
            0.0
        } else {
            free_bytes as f64 / (used_bytes + free_bytes) as f64
        },
        was_aborted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockHeap;

    #[test]
    fn test_summarize_heap_classification() {
        let mut heap = MockHeap::new(1);
        heap.add_segment(0x1000, 100, RawSegmentKind::Gen0);
        heap.add_segment(0x2000, 200, RawSegmentKind::Gen2);
        heap.add_segment(0x3000, 300, RawSegmentKind::Frozen);
        heap.add_segment(0x4000, 400, RawSegmentKind::Large);
        heap.add_segment(0x5000, 500, RawSegmentKind::Pinned);
        heap.set_finalizable(7);

        let summary = summarize_heap(&heap);
        assert_eq!(summary.generations.gen0, 100);
        // frozen merges into gen2
        assert_eq!(summary.generations.gen2, 500);
        assert_eq!(summary.generations.loh, 400);
        assert_eq!(summary.generations.poh, 500);
        assert_eq!(summary.total_heap_bytes, 1500);
        assert_eq!(summary.segments.len(), 5);
        assert_eq!(summary.segments[0].address, "0x1000");
        assert_eq!(summary.finalizable_object_count, Some(7));
    }

    #[test]
    fn test_combined_pass_type_stats() {
        let mut heap = MockHeap::new(1);
        let seg = heap.add_segment(0x1000, 0x10000, RawSegmentKind::Gen0);
        heap.add_object(seg, 0x1000, 64, "MyApp.Order");
        heap.add_object(seg, 0x1040, 64, "MyApp.Order");
        heap.add_object(seg, 0x1080, 256, "MyApp.Cache");
        heap.add_free(seg, 0x1180, 128);

        let analysis = analyze_heap(&heap, &HeapAnalysisOptions::default());

        assert_eq!(analysis.used_bytes, 384);
        assert_eq!(analysis.free_bytes, 128);
        assert!((analysis.fragmentation_ratio - 128.0 / 512.0).abs() < 1e-9);

        let top = &analysis.top_types_by_size[0];
        assert_eq!(top.type_name, "MyApp.Cache");
        assert_eq!(top.total_size, 256);

        let top_count = &analysis.top_types_by_count[0];
        assert_eq!(top_count.type_name, "MyApp.Order");
        assert_eq!(top_count.count, 2);
        assert!(!analysis.was_aborted);
    }

    #[test]
    fn test_string_duplicates() {
        let mut heap = MockHeap::new(1);
        let seg = heap.add_segment(0x1000, 0x10000, RawSegmentKind::Gen0);
        for i in 0..3u64 {
            let addr = 0x2000 + i * 0x40;
            heap.add_string(seg, addr, 30, "hello");
        }
        heap.add_string(seg, 0x3000, 40, "unique value");

        let analysis = analyze_heap(&heap, &HeapAnalysisOptions::default());
        let strings = analysis.string_stats.as_ref().unwrap();

        assert_eq!(strings.instance_count, 4);
        assert_eq!(strings.histogram.tiny, 3);
        assert_eq!(strings.histogram.small, 1);

        assert_eq!(strings.top_duplicates.len(), 1);
        let dup = &strings.top_duplicates[0];
        assert_eq!(dup.value, "hello");
        assert_eq!(dup.count, 3);
        assert_eq!(dup.size_per_instance, 30);
        assert_eq!(dup.wasted_bytes, 60);
        assert!(dup.suggestion.as_ref().unwrap().contains("interning"));
    }

    #[test]
    fn test_task_and_state_machine_stats() {
        let mut heap = MockHeap::new(1);
        let seg = heap.add_segment(0x1000, 0x10000, RawSegmentKind::Gen0);

        heap.add_task(seg, 0x2000, 0x0100_0000);
        heap.add_task(seg, 0x2100, 0x0020_0000);
        heap.add_task(seg, 0x2200, 0);
        heap.set_faulted_exception(0x2100, "System.InvalidOperationException", "boom");

        heap.add_object(seg, 0x3000, 64, "MyApp.Worker+<RunAsync>d__3");
        heap.set_i32_field(0x3000, "<>1__state", -1);

        let analysis = analyze_heap(&heap, &HeapAnalysisOptions::default());
        let task_stats = analysis.task_stats.as_ref().unwrap();

        assert_eq!(task_stats.ran_to_completion, 1);
        assert_eq!(task_stats.faulted, 1);
        assert_eq!(task_stats.pending, 1);

        let sample = &task_stats.faulted_samples[0];
        assert_eq!(
            sample.exception_type.as_deref(),
            Some("System.InvalidOperationException")
        );
        assert_eq!(sample.exception_message.as_deref(), Some("boom"));

        assert_eq!(analysis.state_machines.len(), 1);
        assert_eq!(analysis.state_machines[0].state, Some(-1));
    }

    #[test]
    fn test_large_object_sampling() {
        let mut heap = MockHeap::new(1);
        let seg = heap.add_segment(0x10000, 0x1000000, RawSegmentKind::Large);
        heap.add_object(seg, 0x10000, 100_000, "System.Byte[]");
        heap.add_object(seg, 0x30000, 90_000, "System.Byte[]");
        heap.add_object(seg, 0x50000, 100, "System.Object");

        let analysis = analyze_heap(&heap, &HeapAnalysisOptions::default());

        assert_eq!(analysis.large_objects.len(), 2);
        assert_eq!(analysis.large_objects[0].size, 100_000);
        assert_eq!(analysis.large_objects[0].generation, SegmentKind::Loh);
    }

    #[test]
    fn test_time_budget_aborts() {
        let mut heap = MockHeap::new(1);
        let seg = heap.add_segment(0x1000, 0x100000, RawSegmentKind::Gen0);
        for i in 0..1000u64 {
            heap.add_object(seg, 0x1000 + i * 0x20, 32, "MyApp.Item");
        }

        let options = HeapAnalysisOptions {
            time_budget_ms: 0,
            ..Default::default()
        };
        let analysis = analyze_heap(&heap, &options);
        assert!(analysis.was_aborted);
    }

    #[test]
    fn test_parallel_merge_is_deterministic() {
        let mut heap = MockHeap::new(4);
        for h in 0..4u64 {
            let seg = heap.add_segment(0x10_0000 * (h + 1), 0x10000, RawSegmentKind::Gen1);
            for i in 0..8u64 {
                let addr = 0x10_0000 * (h + 1) + i * 0x40;
                heap.add_object(seg, addr, 64, &format!("MyApp.Type{}", i % 3));
            }
        }

        let first = analyze_heap(&heap, &HeapAnalysisOptions::default());
        let second = analyze_heap(&heap, &HeapAnalysisOptions::default());

        let first_json = serde_json::to_string(&first).unwrap();
        let second_json = serde_json::to_string(&second).unwrap();
        assert_eq!(first_json, second_json);
    }
}
