//! The per-dialect command programs.

use tracing::debug;

use postmortem_common::Dialect;
use postmortem_debugger::{lldb, procinfo, windbg, Debugger};
use postmortem_report::{redaction, AsyncAnalysis, CrashReport};
use postmortem_runtime::{analyze_heap, enrich_report, summarize_heap, HeapAnalysisOptions, RuntimeReader};

use crate::finalize::finalize;
use crate::heuristics;

/// Tunables of a pipeline run.
#[derive(Clone, Debug, Default)]
pub struct PipelineOptions {
    /// Options forwarded to the combined heap pass.
    pub heap: HeapAnalysisOptions,
}

/// Records a command's output in the report, applying the quoted
/// `KEY=VALUE` redaction rule, and returns the (unredacted) text for
/// parsing.
fn run_command(debugger: &Debugger, report: &mut CrashReport, command: &str) -> String {
    let output = match debugger.execute(command) {
        Ok(output) => output,
        Err(error) => {
            debug!(command, %error, "pipeline command failed");
            String::new()
        }
    };

    let (captured, filtered) = redaction::redact_command_output(&output);
    if filtered {
        report
            .process
            .get_or_insert_with(Default::default)
            .sensitive_data_filtered = true;
    }
    report.record_command(command, &captured);
    output
}

fn run_lldb(debugger: &Debugger, report: &mut CrashReport) {
    let thread_list = run_command(debugger, report, "thread list");
    lldb::parse_thread_list(&thread_list, report);

    let backtraces = run_command(debugger, report, "bt all");
    lldb::parse_backtraces(&backtraces, report);

    let image_list = run_command(debugger, report, "image list");
    lldb::parse_image_list(&image_list, report);
    lldb::parse_platform(&image_list, report);

    procinfo::extract_process_info(debugger, &backtraces, report);

    let regions = run_command(debugger, report, "memory region --all");
    heuristics::analyze_memory_regions(&regions, report);

    heuristics::detect_deadlocks(report);
}

fn run_windbg(debugger: &Debugger, report: &mut CrashReport) {
    let analyze = run_command(debugger, report, "!analyze -v");
    windbg::parse_analyze(&analyze, report);

    let threads = run_command(debugger, report, "~");
    windbg::parse_thread_list(&threads, report);

    let stacks = run_command(debugger, report, "~*k");
    windbg::parse_stacks(&stacks, report);

    let modules = run_command(debugger, report, "lm");
    windbg::parse_module_list(&modules, report);
    report.environment.platform = lldb::detect_platform(&modules);

    let heaps = run_command(debugger, report, "!heap -s");
    run_command(debugger, report, "!heap -stat -h 0");
    heuristics::analyze_windows_heaps(&heaps, report);

    let locks = run_command(debugger, report, "!locks");
    run_command(debugger, report, "!runaway");
    heuristics::parse_locks(&locks, report);
    heuristics::detect_deadlocks(report);
}

/// Runs the full crash analysis: the dialect's command program, the
/// managed-runtime enrichment, and finalization.
///
/// A closed facade yields a report whose description says so rather
/// than an error; the report always serializes.
pub fn run_analysis(
    debugger: &Debugger,
    runtime: Option<&dyn RuntimeReader>,
    options: &PipelineOptions,
) -> CrashReport {
    let mut report = CrashReport::new(debugger.dialect());

    if !debugger.is_open() {
        report.summary.description = "No dump is open; analysis was skipped.".to_owned();
        finalize(&mut report);
        return report;
    }

    match debugger.dialect() {
        Dialect::Lldb => run_lldb(debugger, &mut report),
        Dialect::WinDbg => run_windbg(debugger, &mut report),
    }

    if let Some(runtime) = runtime {
        enrich_report(runtime, &mut report);
        if let Some(heap) = runtime.heap() {
            report.gc = Some(summarize_heap(heap));
            let analysis = analyze_heap(heap, &options.heap);
            if let Some(timer_count) = analysis.timer_count {
                report
                    .async_info
                    .get_or_insert_with(AsyncAnalysis::default)
                    .timer_count = Some(timer_count as usize);
            }
            report.heap = Some(analysis);
        }
    }

    finalize(&mut report);
    report
}
