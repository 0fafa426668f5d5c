//! The finalization pass.
//!
//! Runs exactly once after parsing and enrichment. Enforces the report
//! invariants and derives all secondary artifacts. After this pass the
//! report is treated as immutable.

use lazy_static::lazy_static;
use regex::Regex;

use postmortem_report::{
    AnalysisSection, CrashReport, ManagedSymbolHealth, NativeSymbolHealth, SkipReason,
    SkippedFrame, StackSelection, SymbolHealth,
};

use crate::{findings, signature, timeline};

lazy_static! {
    static ref DESCRIPTION_RE: Regex = Regex::new(
        r"Found \d+ threads \(\d+ total frames, \d+ in faulting thread\), \d+ modules\."
    )
    .unwrap();
}

/// Finalizes a populated report in place.
pub fn finalize(report: &mut CrashReport) {
    normalize_frames(report);
    let selection = select_top_frames(report);
    enforce_single_faulting(report);
    recompute_totals(report);

    let signature = signature::compute(report);
    let symbols = symbol_health(report);
    let timeline = timeline::build(report, &selection);
    let findings = findings::collect(
        report,
        &timeline,
        signature.kind,
        &symbols.native.missing_modules,
    );
    let root_cause = findings::root_cause(report, &timeline, signature.kind);

    report.analysis = Some(AnalysisSection {
        stack_selection: selection,
        signature: Some(signature),
        symbols: Some(symbols),
        timeline: Some(timeline),
        findings,
        root_cause,
    });
}

/// Forces `is_managed` on placeholder frames and renumbers every stack
/// to `0..n-1`.
fn normalize_frames(report: &mut CrashReport) {
    for thread in &mut report.threads.threads {
        for (index, frame) in thread.call_stack.iter_mut().enumerate() {
            if frame.is_placeholder() {
                frame.is_managed = true;
            }
            frame.frame_number = index;
        }
    }
}

/// Why a frame cannot be the meaningful top frame, if it cannot.
fn skip_reason(function: &str) -> Option<SkipReason> {
    let trimmed = function.trim();
    if trimmed.is_empty() {
        return Some(SkipReason::EmptyFunction);
    }
    if trimmed.eq_ignore_ascii_case("[Runtime]") {
        return Some(SkipReason::RuntimeGlue);
    }
    if trimmed.eq_ignore_ascii_case("[ManagedMethod]") {
        return Some(SkipReason::ManagedPlaceholder);
    }
    if trimmed.starts_with("[JIT Code @") {
        return Some(SkipReason::PlaceholderJitCode);
    }
    if trimmed.starts_with("[Native Code @") {
        return Some(SkipReason::Unknown);
    }
    None
}

/// Selects each thread's meaningful top frame: the first frame that is
/// neither empty nor a placeholder, index 0 when none qualifies. Also
/// sets `top_function`.
fn select_top_frames(report: &mut CrashReport) -> Vec<StackSelection> {
    let mut selections = Vec::with_capacity(report.threads.threads.len());

    for thread in &mut report.threads.threads {
        let mut skipped = Vec::new();
        let mut selected = None;

        for (index, frame) in thread.call_stack.iter().enumerate() {
            match skip_reason(&frame.function) {
                Some(reason) => skipped.push(SkippedFrame { index, reason }),
                None => {
                    selected = Some(index);
                    break;
                }
            }
        }

        let selected_index = selected.unwrap_or(0);
        if selected.is_none() {
            skipped.clear();
        }

        let top_function = thread
            .call_stack
            .get(selected_index)
            .map(|frame| frame.display_name());
        thread.top_function = top_function.clone();

        selections.push(StackSelection {
            thread_id: thread.thread_id.clone(),
            selected_index,
            top_function,
            skipped_frames: skipped,
        });
    }

    selections
}

/// Keeps only the first faulting thread marked.
fn enforce_single_faulting(report: &mut CrashReport) {
    let mut seen = false;
    for thread in &mut report.threads.threads {
        if thread.is_faulting {
            if seen {
                thread.is_faulting = false;
            }
            seen = true;
        }
    }
}

/// Recomputes thread totals and rewrites the description clause.
fn recompute_totals(report: &mut CrashReport) {
    let thread_count = report.threads.threads.len();
    let total_frames: usize = report
        .threads
        .threads
        .iter()
        .map(|t| t.call_stack.len())
        .sum();
    let faulting_frames = report
        .faulting_thread()
        .map(|t| t.call_stack.len())
        .unwrap_or(0);
    let module_count = report.modules.len();

    report.threads.count = thread_count;
    report.summary.os_thread_count = thread_count;
    report.summary.total_frame_count = total_frames;
    report.summary.module_count = module_count;

    let clause = format!(
        "Found {thread_count} threads ({total_frames} total frames, {faulting_frames} in \
         faulting thread), {module_count} modules."
    );

    let description = &report.summary.description;
    report.summary.description = if DESCRIPTION_RE.is_match(description) {
        DESCRIPTION_RE.replace(description, clause.as_str()).into_owned()
    } else if description.is_empty() {
        clause
    } else {
        format!("{description} {clause}")
    };
}

/// Computes native and managed symbol health.
fn symbol_health(report: &CrashReport) -> SymbolHealth {
    let mut missing_modules: Vec<String> = report
        .modules
        .iter()
        .filter(|module| !module.has_symbols && !module.name.starts_with('['))
        .map(|module| module.name.clone())
        .collect();
    missing_modules.sort_unstable();
    missing_modules.dedup();

    let mut pdb_missing = 0usize;
    let mut resolved = 0usize;
    let mut unresolved = 0usize;
    for thread in &report.threads.threads {
        for frame in &thread.call_stack {
            if !frame.is_managed {
                continue;
            }
            let has_source = frame.source_file.is_some() && frame.line_number.unwrap_or(0) > 0;
            match (has_source, frame.source_url.is_some()) {
                (true, true) => resolved += 1,
                (true, false) => {
                    pdb_missing += 1;
                    unresolved += 1;
                }
                _ => {}
            }
        }
    }

    SymbolHealth {
        native: NativeSymbolHealth {
            missing_count: missing_modules.len(),
            missing_modules,
        },
        managed: ManagedSymbolHealth {
            pdb_missing_count: pdb_missing,
            source_link_resolved: resolved,
            source_link_unresolved: unresolved,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmortem_common::Dialect;
    use postmortem_report::{ModuleInfo, SkipReason, StackFrame, ThreadInfo};

    fn frame(function: &str) -> StackFrame {
        StackFrame {
            function: function.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_frame_renumbering_and_placeholders() {
        let mut report = CrashReport::new(Dialect::Lldb);
        report.threads.threads.push(ThreadInfo {
            thread_id: "1".to_owned(),
            call_stack: vec![
                StackFrame {
                    frame_number: 7,
                    function: "[ManagedMethod]".to_owned(),
                    ..Default::default()
                },
                StackFrame {
                    frame_number: 3,
                    function: "main".to_owned(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        });

        finalize(&mut report);

        let stack = &report.threads.threads[0].call_stack;
        assert_eq!(stack[0].frame_number, 0);
        assert_eq!(stack[1].frame_number, 1);
        assert!(stack[0].is_managed);
        assert!(!stack[1].is_managed);
    }

    #[test]
    fn test_meaningful_top_frame_selection() {
        let mut report = CrashReport::new(Dialect::Lldb);
        let mut worker = StackFrame {
            function: "Worker.Run".to_owned(),
            ..Default::default()
        };
        worker.module = Some("MyApp".to_owned());
        report.threads.threads.push(ThreadInfo {
            thread_id: "1".to_owned(),
            is_faulting: true,
            call_stack: vec![frame("[JIT Code @ 0x1]"), frame("[Runtime]"), worker],
            ..Default::default()
        });

        finalize(&mut report);

        let thread = &report.threads.threads[0];
        assert_eq!(thread.top_function.as_deref(), Some("MyApp!Worker.Run"));

        let selection = &report.analysis.as_ref().unwrap().stack_selection[0];
        assert_eq!(selection.selected_index, 2);
        assert_eq!(selection.skipped_frames.len(), 2);
        assert_eq!(selection.skipped_frames[0].index, 0);
        assert_eq!(
            selection.skipped_frames[0].reason,
            SkipReason::PlaceholderJitCode
        );
        assert_eq!(selection.skipped_frames[1].reason, SkipReason::RuntimeGlue);
    }

    #[test]
    fn test_no_candidate_selects_index_zero() {
        let mut report = CrashReport::new(Dialect::Lldb);
        report.threads.threads.push(ThreadInfo {
            thread_id: "1".to_owned(),
            call_stack: vec![frame("[Runtime]"), frame("[ManagedMethod]")],
            ..Default::default()
        });

        finalize(&mut report);

        let selection = &report.analysis.as_ref().unwrap().stack_selection[0];
        assert_eq!(selection.selected_index, 0);
        assert!(selection.skipped_frames.is_empty());
        assert_eq!(
            report.threads.threads[0].top_function.as_deref(),
            Some("[Runtime]")
        );
    }

    #[test]
    fn test_single_faulting_enforced() {
        let mut report = CrashReport::new(Dialect::WinDbg);
        for i in 0..3 {
            report.threads.threads.push(ThreadInfo {
                thread_id: format!("{i}"),
                is_faulting: true,
                ..Default::default()
            });
        }

        finalize(&mut report);

        let faulting: Vec<_> = report
            .threads
            .threads
            .iter()
            .filter(|t| t.is_faulting)
            .collect();
        assert_eq!(faulting.len(), 1);
        assert_eq!(faulting[0].thread_id, "0");
    }

    #[test]
    fn test_description_clause_replaced_in_place() {
        let mut report = CrashReport::new(Dialect::Lldb);
        report.summary.description =
            "Crash analysis. Found 9 threads (9 total frames, 9 in faulting thread), 9 modules."
                .to_owned();
        report.threads.threads.push(ThreadInfo {
            thread_id: "1".to_owned(),
            is_faulting: true,
            call_stack: vec![frame("main")],
            ..Default::default()
        });
        report.modules.push(ModuleInfo {
            name: "app".to_owned(),
            has_symbols: true,
            ..Default::default()
        });

        finalize(&mut report);

        assert_eq!(
            report.summary.description,
            "Crash analysis. Found 1 threads (1 total frames, 1 in faulting thread), 1 modules."
        );
    }

    #[test]
    fn test_symbol_health() {
        let mut report = CrashReport::new(Dialect::Lldb);
        report.modules.push(ModuleInfo {
            name: "libfoo.so".to_owned(),
            has_symbols: false,
            ..Default::default()
        });
        report.modules.push(ModuleInfo {
            name: "libbar.so".to_owned(),
            has_symbols: true,
            ..Default::default()
        });
        report.modules.push(ModuleInfo {
            name: "[vdso]".to_owned(),
            has_symbols: false,
            ..Default::default()
        });

        let mut managed_frame = frame("Worker.Run");
        managed_frame.is_managed = true;
        managed_frame.source_file = Some("Worker.cs".to_owned());
        managed_frame.line_number = Some(10);
        report.threads.threads.push(ThreadInfo {
            thread_id: "1".to_owned(),
            call_stack: vec![managed_frame],
            ..Default::default()
        });

        finalize(&mut report);

        let symbols = report.analysis.as_ref().unwrap().symbols.as_ref().unwrap();
        assert_eq!(symbols.native.missing_count, 1);
        assert_eq!(symbols.native.missing_modules, vec!["libfoo.so"]);
        assert_eq!(symbols.managed.pdb_missing_count, 1);
        assert_eq!(symbols.managed.source_link_unresolved, 1);
        assert_eq!(symbols.managed.source_link_resolved, 0);
    }

    #[test]
    fn test_finalize_twice_is_byte_identical() {
        let build = || {
            let mut report = CrashReport::new(Dialect::Lldb);
            report.summary.signal = Some("SIGSEGV".to_owned());
            report.environment.platform.os = "Linux".to_owned();
            report.threads.threads.push(ThreadInfo {
                thread_id: "1 (tid: 0x2f03)".to_owned(),
                is_faulting: true,
                call_stack: vec![frame("handler"), frame("main")],
                ..Default::default()
            });
            report
        };

        let mut first = build();
        let mut second = build();
        finalize(&mut first);
        finalize(&mut second);

        let first_sig = first.analysis.as_ref().unwrap().signature.as_ref().unwrap();
        let second_sig = second.analysis.as_ref().unwrap().signature.as_ref().unwrap();
        assert_eq!(first_sig.hash, second_sig.hash);
        assert_eq!(
            signature::signature_payload(&first),
            signature::signature_payload(&second)
        );
    }
}
