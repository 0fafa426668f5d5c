//! Heap-consumption and deadlock heuristics.
//!
//! These are signals, not verdicts: high heap consumption is reported
//! as a severity plus a recommendation, and blocked threads are
//! reported as a potential deadlock for the finalizer to corroborate.

use lazy_static::lazy_static;
use regex::Regex;

use postmortem_common::parse_hex_addr;
use postmortem_report::{
    CrashReport, MemoryAnalysis, MemoryPressure, PotentialDeadlock, SynchronizationAnalysis,
};

/// Heap bytes above which pressure is `High`.
const HIGH_WATERMARK: u64 = 2 * 1024 * 1024 * 1024;

/// Heap bytes above which pressure is `Elevated`.
const ELEVATED_WATERMARK: u64 = 500 * 1024 * 1024;

/// Native and managed wait primitives scanned for in backtraces.
static WAIT_PRIMITIVES: &[&str] = &[
    "pthread_mutex",
    "psynch_mutex",
    "semaphore_wait",
    "os_unfair_lock",
    "futex",
    "pthread_cond_wait",
    "__lll_lock_wait",
    "RtlEnterCriticalSection",
    "NtWaitForSingleObject",
    "WaitForMultipleObjects",
    "Monitor.Enter",
];

lazy_static! {
    /// `[0x00007f0000000000-0x00007f0000800000) rw-`
    static ref REGION_RE: Regex =
        Regex::new(r"\[(0x[0-9a-fA-F]+)-(0x[0-9a-fA-F]+)\)\s+(\S+)").unwrap();

    /// `!heap -s` summary rows; the third numeric column is committed KB.
    static ref HEAP_SUMMARY_RE: Regex =
        Regex::new(r"(?m)^\s*[0-9a-f]{8,16}\s+\d+\s+(\d+)\s+(\d+)").unwrap();

    /// `OwningThread` lines inside `!locks` critical-section blocks.
    static ref OWNING_THREAD_RE: Regex =
        Regex::new(r"OwningThread\s+([0-9a-fA-F]+)").unwrap();
    static ref CRITSEC_RE: Regex =
        Regex::new(r"CritSec\s+(\S+)").unwrap();
}

fn classify_pressure(total: u64) -> (MemoryPressure, Option<String>) {
    if total > HIGH_WATERMARK {
        (
            MemoryPressure::High,
            Some(
                "Heap consumption exceeds 2 GiB. Capture a second dump after some minutes and \
                 compare the top heap types to confirm growth."
                    .to_owned(),
            ),
        )
    } else if total > ELEVATED_WATERMARK {
        (
            MemoryPressure::Elevated,
            Some(
                "Heap consumption exceeds 500 MiB. Review the largest heap types for \
                 unexpected retention."
                    .to_owned(),
            ),
        )
    } else {
        (MemoryPressure::Normal, None)
    }
}

/// Estimates heap consumption from `memory region --all` output by
/// summing writable, non-executable regions.
pub(crate) fn analyze_memory_regions(output: &str, report: &mut CrashReport) {
    let mut total = 0u64;
    for caps in REGION_RE.captures_iter(output) {
        let perms = &caps[3];
        if !perms.contains("rw") || perms.contains('x') {
            continue;
        }
        let (Some(start), Some(end)) = (parse_hex_addr(&caps[1]), parse_hex_addr(&caps[2]))
        else {
            continue;
        };
        total += end.saturating_sub(start);
    }

    let (severity, recommendation) = classify_pressure(total);
    report.memory = Some(MemoryAnalysis {
        total_heap_bytes: Some(total),
        severity,
        recommendation,
        oom_detected: false,
    });
}

/// Estimates heap consumption from `!heap -s` output by summing the
/// committed-KB column.
pub(crate) fn analyze_windows_heaps(output: &str, report: &mut CrashReport) {
    let mut total = 0u64;
    for caps in HEAP_SUMMARY_RE.captures_iter(output) {
        if let Ok(commit_kb) = caps[2].parse::<u64>() {
            total += commit_kb * 1024;
        }
    }

    let (severity, recommendation) = classify_pressure(total);
    report.memory = Some(MemoryAnalysis {
        total_heap_bytes: Some(total),
        severity,
        recommendation,
        oom_detected: output.contains("STATUS_NO_MEMORY")
            || output.contains("OutOfMemoryException"),
    });
}

/// Scans per-thread backtraces for wait primitives and fills the
/// synchronization section.
///
/// Two or more waiting threads count as a potential deadlock; a single
/// waiter only produces an advisory recommendation.
pub(crate) fn detect_deadlocks(report: &mut CrashReport) {
    let mut waiting = Vec::new();
    for thread in &report.threads.threads {
        let waits = thread.call_stack.iter().any(|frame| {
            WAIT_PRIMITIVES
                .iter()
                .any(|primitive| frame.function.contains(primitive))
        });
        if waits {
            waiting.push(thread.thread_id.clone());
        }
    }

    let analysis = match waiting.len() {
        0 => return,
        1 => SynchronizationAnalysis {
            detected: false,
            waiting_threads: waiting,
            recommendation: Some(
                "One thread is blocked on a lock primitive; inspect the owner of that lock."
                    .to_owned(),
            ),
            ..Default::default()
        },
        _ => SynchronizationAnalysis {
            detected: true,
            kind: Some("Potential Deadlock".to_owned()),
            waiting_threads: waiting,
            ..Default::default()
        },
    };
    report.synchronization = Some(analysis);
}

/// Parses `!locks` output into held critical sections.
pub(crate) fn parse_locks(output: &str, report: &mut CrashReport) {
    let mut entries = Vec::new();
    for block in output.split("CritSec").skip(1) {
        let resource = block
            .split_whitespace()
            .next()
            .map(|name| name.trim_end_matches(',').to_owned());
        let Some(caps) = OWNING_THREAD_RE.captures(block) else {
            continue;
        };
        let owner = format!("0x{}", caps[1].to_ascii_lowercase());
        entries.push(PotentialDeadlock {
            thread_ids: vec![owner],
            resource,
            description: None,
        });
    }

    if entries.is_empty() {
        return;
    }
    report
        .synchronization
        .get_or_insert_with(Default::default)
        .potential_deadlocks = Some(entries);
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmortem_common::Dialect;
    use postmortem_report::{StackFrame, ThreadInfo};

    #[test]
    fn test_memory_pressure_thresholds() {
        let gib = 1024 * 1024 * 1024;
        assert_eq!(classify_pressure(3 * gib).0, MemoryPressure::High);
        assert_eq!(classify_pressure(600 * 1024 * 1024).0, MemoryPressure::Elevated);
        assert_eq!(classify_pressure(100 * 1024 * 1024).0, MemoryPressure::Normal);
    }

    #[test]
    fn test_analyze_memory_regions() {
        let mut report = CrashReport::new(Dialect::Lldb);
        let output = "\
[0x0000aaaa00000000-0x0000aaaa00100000) r-x
[0x0000ffff00000000-0x0000ffff40000000) rw-
[0x0000ffff50000000-0x0000ffff50010000) rw-
";
        analyze_memory_regions(output, &mut report);

        let memory = report.memory.as_ref().unwrap();
        assert_eq!(
            memory.total_heap_bytes,
            Some(0x4000_0000 + 0x1_0000)
        );
        assert_eq!(memory.severity, MemoryPressure::Elevated);
        assert!(memory.recommendation.is_some());
    }

    #[test]
    fn test_detect_deadlocks_two_waiters() {
        let mut report = CrashReport::new(Dialect::Lldb);
        for (id, function) in [
            ("1", "__lll_lock_wait"),
            ("2", "pthread_mutex_lock"),
            ("3", "poll"),
        ] {
            report.threads.threads.push(ThreadInfo {
                thread_id: id.to_owned(),
                call_stack: vec![StackFrame {
                    function: function.to_owned(),
                    ..Default::default()
                }],
                ..Default::default()
            });
        }

        detect_deadlocks(&mut report);

        let sync = report.synchronization.as_ref().unwrap();
        assert!(sync.detected);
        assert_eq!(sync.kind.as_deref(), Some("Potential Deadlock"));
        assert_eq!(sync.waiting_threads, vec!["1", "2"]);
    }

    #[test]
    fn test_detect_deadlocks_single_waiter_advisory() {
        let mut report = CrashReport::new(Dialect::Lldb);
        report.threads.threads.push(ThreadInfo {
            thread_id: "1".to_owned(),
            call_stack: vec![StackFrame {
                function: "semaphore_wait_trap".to_owned(),
                ..Default::default()
            }],
            ..Default::default()
        });

        detect_deadlocks(&mut report);

        let sync = report.synchronization.as_ref().unwrap();
        assert!(!sync.detected);
        assert!(sync.recommendation.is_some());
    }

    #[test]
    fn test_parse_locks() {
        let mut report = CrashReport::new(Dialect::WinDbg);
        let output = "\
CritSec ntdll!LdrpLoaderLock+0 at 00007ff8`1234abcd
LockCount          3
OwningThread       3c4f
";
        parse_locks(output, &mut report);

        let deadlocks = report
            .synchronization
            .as_ref()
            .unwrap()
            .potential_deadlocks
            .as_ref()
            .unwrap();
        assert_eq!(deadlocks.len(), 1);
        assert_eq!(deadlocks[0].thread_ids, vec!["0x3c4f"]);
        assert_eq!(
            deadlocks[0].resource.as_deref(),
            Some("ntdll!LdrpLoaderLock+0")
        );
    }
}
