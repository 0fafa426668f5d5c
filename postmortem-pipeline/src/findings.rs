//! Deterministic findings and root-cause hypotheses.

use postmortem_report::{
    pointer, Confidence, CrashReport, Finding, RootCause, RootCauseHypothesis, Severity,
    SignatureKind, Timeline,
};

/// Timer count above which the high-timer finding fires.
const TIMER_FINDING_THRESHOLD: u64 = 50;

/// LOH share of the managed heap above which the pressure finding
/// fires.
const LOH_PRESSURE_RATIO: f64 = 0.30;

/// Native frames cited as evidence for missing symbols.
const MISSING_SYMBOL_EVIDENCE: usize = 5;

/// Emits the findings in their fixed order, then sorts by confidence
/// descending with the stable id as tie-break.
pub(crate) fn collect(
    report: &CrashReport,
    timeline: &Timeline,
    signature_kind: SignatureKind,
    native_missing: &[String],
) -> Vec<Finding> {
    let mut findings = Vec::new();

    if signature_kind == SignatureKind::Hang {
        findings.push(Finding {
            id: "capture.sigstop.snapshot".to_owned(),
            title: "Dump captured via stop signal".to_owned(),
            category: "capture".to_owned(),
            severity: Severity::Info,
            confidence: Confidence::High,
            summary: "The process was stopped with SIGSTOP and no fault is present; this dump \
                      is a snapshot rather than a crash."
                .to_owned(),
            evidence: report
                .threads
                .threads
                .iter()
                .position(|t| t.is_faulting)
                .map(pointer::thread)
                .into_iter()
                .collect(),
            next_actions: vec!["Inspect thread activity in the timeline.".to_owned()],
        });
    }

    if !native_missing.is_empty() {
        findings.push(Finding {
            id: "symbols.native.missing".to_owned(),
            title: "Native symbols missing".to_owned(),
            category: "symbols".to_owned(),
            severity: Severity::Medium,
            confidence: Confidence::High,
            summary: format!(
                "{} native modules have no symbols; frames in them cannot be resolved to \
                 source locations.",
                native_missing.len()
            ),
            evidence: missing_symbol_evidence(report, native_missing),
            next_actions: vec![
                "Provide matching symbol files for the listed modules.".to_owned()
            ],
        });
    }

    let deadlock_detected = report
        .synchronization
        .as_ref()
        .is_some_and(|sync| sync.detected)
        || timeline
            .deadlocks
            .as_ref()
            .is_some_and(|cycles| !cycles.is_empty());
    if deadlock_detected {
        let mut evidence = vec![pointer::synchronization()];
        if let Some(cycles) = timeline.deadlocks.as_ref() {
            evidence.extend((0..cycles.len()).map(pointer::deadlock));
        }
        findings.push(Finding {
            id: "threads.deadlock.detected".to_owned(),
            title: "Potential deadlock".to_owned(),
            category: "threads".to_owned(),
            severity: Severity::High,
            confidence: Confidence::Medium,
            summary: "Multiple threads are blocked on lock primitives in a pattern \
                      consistent with a deadlock."
                .to_owned(),
            evidence,
            next_actions: vec![
                "Inspect the blocked chains and the owning threads' stacks.".to_owned()
            ],
        });
    }

    let timer_count = report
        .heap
        .as_ref()
        .and_then(|heap| heap.timer_count)
        .unwrap_or(0);
    if timer_count > TIMER_FINDING_THRESHOLD {
        findings.push(Finding {
            id: "timers.high.count".to_owned(),
            title: "High timer count".to_owned(),
            category: "timers".to_owned(),
            severity: Severity::Medium,
            confidence: Confidence::Medium,
            summary: format!(
                "{timer_count} timers are live on the heap; timer leaks keep callbacks and \
                 their closures reachable."
            ),
            evidence: vec!["/heap/timerCount".to_owned()],
            next_actions: vec!["Review timer creation sites for missing disposal.".to_owned()],
        });
    }

    if let Some(gc) = report.gc.as_ref() {
        let total = gc.total_heap_bytes;
        if total > 0 && gc.generations.loh as f64 / total as f64 >= LOH_PRESSURE_RATIO {
            findings.push(Finding {
                id: "memory.loh.pressure".to_owned(),
                title: "Large object heap pressure".to_owned(),
                category: "memory".to_owned(),
                severity: Severity::Medium,
                confidence: Confidence::Medium,
                summary: format!(
                    "The large object heap holds {} of {} managed heap bytes; large \
                     allocations fragment the heap and resist compaction.",
                    gc.generations.loh, total
                ),
                evidence: vec!["/gc/generations/loh".to_owned()],
                next_actions: vec![
                    "Inspect the largest objects and their allocation sites.".to_owned()
                ],
            });
        }
    }

    findings.sort_by(|a, b| b.confidence.cmp(&a.confidence).then_with(|| a.id.cmp(&b.id)));
    findings
}

/// Up to five native frames inside symbol-less modules that also lack
/// any source information.
fn missing_symbol_evidence(report: &CrashReport, missing: &[String]) -> Vec<String> {
    let mut evidence = Vec::new();
    'outer: for (thread_index, thread) in report.threads.threads.iter().enumerate() {
        for (frame_index, frame) in thread.call_stack.iter().enumerate() {
            if frame.is_managed || frame.source_file.is_some() {
                continue;
            }
            let in_missing = frame
                .module
                .as_deref()
                .is_some_and(|module| missing.iter().any(|m| m == module));
            if !in_missing {
                continue;
            }
            evidence.push(pointer::frame(thread_index, frame_index));
            if evidence.len() == MISSING_SYMBOL_EVIDENCE {
                break 'outer;
            }
        }
    }
    evidence
}

/// Produces the root-cause hypotheses, ordered by confidence
/// descending and label ascending.
pub(crate) fn root_cause(
    report: &CrashReport,
    timeline: &Timeline,
    signature_kind: SignatureKind,
) -> Option<RootCause> {
    let mut hypotheses = Vec::new();

    if let Some(exception) = report.exception.as_ref() {
        let name = exception
            .exception_type
            .as_deref()
            .or(exception.code.as_deref())
            .unwrap_or("unknown exception");
        hypotheses.push(RootCauseHypothesis {
            label: "managed-exception".to_owned(),
            confidence: 0.8,
            description: format!("The process faulted with {name}."),
            evidence: Some(pointer::exception()),
        });
    }

    if let Some(signal) = report.summary.signal.as_deref() {
        let evidence = report
            .threads
            .threads
            .iter()
            .position(|t| t.is_faulting)
            .map(pointer::thread);
        hypotheses.push(RootCauseHypothesis {
            label: "native-signal".to_owned(),
            confidence: 0.75,
            description: format!("The faulting thread was stopped by {signal}."),
            evidence,
        });
    }

    if signature_kind == SignatureKind::Hang {
        let evidence = report
            .threads
            .threads
            .iter()
            .position(|t| t.is_faulting)
            .map(pointer::thread);
        hypotheses.push(RootCauseHypothesis {
            label: "sigstop-snapshot".to_owned(),
            confidence: 0.5,
            description: "The dump is a SIGSTOP snapshot; there may be no fault at all."
                .to_owned(),
            evidence,
        });
    }

    let deadlocked = timeline
        .deadlocks
        .as_ref()
        .is_some_and(|cycles| !cycles.is_empty())
        || report
            .synchronization
            .as_ref()
            .is_some_and(|sync| sync.detected);
    if deadlocked {
        hypotheses.push(RootCauseHypothesis {
            label: "potential-deadlock".to_owned(),
            confidence: 0.6,
            description: "Blocked threads form a wait pattern consistent with a deadlock."
                .to_owned(),
            evidence: Some(pointer::synchronization()),
        });
    }

    if hypotheses.is_empty() {
        return None;
    }

    hypotheses.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.label.cmp(&b.label))
    });
    Some(RootCause { hypotheses })
}
