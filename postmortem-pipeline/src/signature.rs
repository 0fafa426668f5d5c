//! The deduplication signature.
//!
//! The signature hash covers a fixed, newline-delimited payload using
//! literal `\n` separators regardless of platform, so identical inputs
//! hash identically everywhere.

use sha2::{Digest, Sha256};

use postmortem_report::{CrashReport, Signature, SignatureKind, SignatureParts};

/// Classifies what the dump captured.
fn classify(report: &CrashReport) -> SignatureKind {
    if report
        .memory
        .as_ref()
        .is_some_and(|memory| memory.oom_detected)
    {
        return SignatureKind::Oom;
    }

    let has_signal = report.summary.signal.is_some();
    let has_exception = report.exception.is_some();

    let stopped = report.faulting_thread().is_some_and(|thread| {
        thread
            .state
            .as_deref()
            .unwrap_or_default()
            .contains("SIGSTOP")
            || thread
                .stop_reason
                .as_deref()
                .unwrap_or_default()
                .contains("SIGSTOP")
    });
    if stopped && !has_signal && !has_exception {
        return SignatureKind::Hang;
    }

    if has_signal || has_exception {
        return SignatureKind::Crash;
    }
    SignatureKind::Unknown
}

/// Collects up to three normalized top frames of the faulting thread,
/// deduplicated, in stack order.
fn top_frames(report: &CrashReport) -> Vec<String> {
    let thread = report
        .faulting_thread()
        .or_else(|| report.threads.threads.first());
    let Some(thread) = thread else {
        return Vec::new();
    };

    let mut frames = Vec::new();
    for frame in &thread.call_stack {
        let function = frame.function.trim();
        if function.is_empty() || function.starts_with('[') {
            continue;
        }
        let display = match frame.module.as_deref().filter(|m| !m.is_empty()) {
            Some(module) => format!("{module}: {function}"),
            None => function.to_owned(),
        };
        if !frames.contains(&display) {
            frames.push(display);
        }
        if frames.len() == 3 {
            break;
        }
    }
    frames
}

/// Builds the LF-delimited signature payload for a report.
pub fn signature_payload(report: &CrashReport) -> String {
    let kind = classify(report);
    let parts = collect_parts(report);

    let mut payload = String::new();
    payload.push_str("v=1\n");
    payload.push_str(&format!("kind={}\n", kind.name()));
    payload.push_str(&format!(
        "exception={}\n",
        parts.exception.as_deref().unwrap_or_default()
    ));
    payload.push_str(&format!(
        "signal={}\n",
        parts.signal.as_deref().unwrap_or_default()
    ));
    payload.push_str(&format!(
        "runtime={}\n",
        parts.runtime.as_deref().unwrap_or_default()
    ));
    payload.push_str(&format!(
        "os={}\n",
        parts.os.as_deref().unwrap_or_default()
    ));
    for frame in &parts.top_frames {
        payload.push_str(&format!("frame={frame}\n"));
    }
    payload
}

fn collect_parts(report: &CrashReport) -> SignatureParts {
    SignatureParts {
        exception: report
            .exception
            .as_ref()
            .and_then(|e| e.exception_type.clone()),
        signal: report.summary.signal.clone(),
        runtime: report.environment.runtime_version.clone(),
        os: (!report.environment.platform.os.is_empty())
            .then(|| report.environment.platform.os.clone()),
        top_frames: top_frames(report),
    }
}

/// Computes the full signature for a finalized report.
pub fn compute(report: &CrashReport) -> Signature {
    let payload = signature_payload(report);
    let digest = Sha256::digest(payload.as_bytes());
    let mut hash = String::with_capacity(7 + 64);
    hash.push_str("sha256:");
    for byte in digest {
        hash.push_str(&format!("{byte:02x}"));
    }

    Signature {
        version: 1,
        kind: classify(report),
        hash,
        parts: collect_parts(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmortem_common::Dialect;
    use postmortem_report::{ExceptionInfo, MemoryAnalysis, StackFrame, ThreadInfo};

    fn report_with_signal() -> CrashReport {
        let mut report = CrashReport::new(Dialect::Lldb);
        report.summary.signal = Some("SIGSEGV".to_owned());
        report.environment.platform.os = "Linux".to_owned();
        report.threads.threads.push(ThreadInfo {
            thread_id: "1 (tid: 0x2f03)".to_owned(),
            is_faulting: true,
            call_stack: vec![
                StackFrame {
                    function: "[JIT Code @ 0x1]".to_owned(),
                    ..Default::default()
                },
                StackFrame {
                    module: Some("libfoo.so".to_owned()),
                    function: "handler".to_owned(),
                    ..Default::default()
                },
                StackFrame {
                    module: Some("libfoo.so".to_owned()),
                    function: "handler".to_owned(),
                    ..Default::default()
                },
                StackFrame {
                    module: Some("libc.so.6".to_owned()),
                    function: "start_thread".to_owned(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        });
        report
    }

    #[test]
    fn test_payload_shape() {
        let report = report_with_signal();
        let payload = signature_payload(&report);

        let expected = "\
v=1
kind=crash
exception=
signal=SIGSEGV
runtime=
os=Linux
frame=libfoo.so: handler
frame=libc.so.6: start_thread
";
        assert_eq!(payload, expected);
        assert!(!payload.contains('\r'));
    }

    #[test]
    fn test_signature_deterministic() {
        let report = report_with_signal();
        let first = compute(&report);
        let second = compute(&report);

        assert_eq!(first.hash, second.hash);
        assert!(first.hash.starts_with("sha256:"));
        assert_eq!(first.hash.len(), 7 + 64);
        assert_eq!(first.kind, SignatureKind::Crash);
    }

    #[test]
    fn test_classify_oom_wins() {
        let mut report = report_with_signal();
        report.memory = Some(MemoryAnalysis {
            oom_detected: true,
            ..Default::default()
        });
        assert_eq!(classify(&report), SignatureKind::Oom);
    }

    #[test]
    fn test_classify_hang() {
        let mut report = CrashReport::new(Dialect::Lldb);
        report.threads.threads.push(ThreadInfo {
            thread_id: "1".to_owned(),
            is_faulting: true,
            stop_reason: Some("signal SIGSTOP".to_owned()),
            ..Default::default()
        });
        assert_eq!(classify(&report), SignatureKind::Hang);
    }

    #[test]
    fn test_classify_exception() {
        let mut report = CrashReport::new(Dialect::WinDbg);
        report.exception = Some(ExceptionInfo {
            exception_type: Some("EXCEPTION_ACCESS_VIOLATION".to_owned()),
            ..Default::default()
        });
        assert_eq!(classify(&report), SignatureKind::Crash);
    }

    #[test]
    fn test_classify_unknown() {
        let report = CrashReport::new(Dialect::Lldb);
        assert_eq!(classify(&report), SignatureKind::Unknown);
    }
}
