//! Parsers for LLDB command output.
//!
//! Each parser takes the raw text of one command and appends typed data
//! to the report. Lines that do not match are skipped silently; parsing
//! never fails the report.

use lazy_static::lazy_static;
use regex::Regex;

use postmortem_common::{parse_hex_addr, Arch};
use postmortem_report::{CrashReport, ModuleInfo, Platform, StackFrame, ThreadInfo};

lazy_static! {
    /// `* thread #1: tid = 0x2f03, 0x00007fff6e0d2e22 libsystem_kernel.dylib`__pthread_kill + 10, name = 'main', queue = 'com.apple.main-thread', stop reason = signal SIGABRT`
    static ref THREAD_RE: Regex = Regex::new(
        r"^(\*)?\s*thread #(\d+):\s*tid\s*=\s*(0x[0-9a-fA-F]+|\d+)\s*(?:,\s*(.*))?$"
    )
    .unwrap();
    static ref THREAD_NAME_RE: Regex = Regex::new(r"name = '([^']*)'").unwrap();
    static ref THREAD_QUEUE_RE: Regex = Regex::new(r"queue = '([^']*)'").unwrap();
    static ref STOP_REASON_RE: Regex = Regex::new(r"stop reason = (.+?)\s*$").unwrap();
    static ref FAULT_SIGNAL_RE: Regex =
        Regex::new(r"SIG(ABRT|SEGV|BUS|FPE|ILL|TRAP|KILL)").unwrap();
    static ref SIGNAL_NAME_RE: Regex = Regex::new(r"signal (SIG[A-Z0-9]+)").unwrap();

    /// `frame #0: 0x00007fff6e0d2e22 libfoo.so`handler + 10 at /src/foo.c:42`
    static ref FRAME_RE: Regex = Regex::new(
        "^\\s*[*\\s]*frame\\s+#(\\d+):\\s+(0x[0-9a-fA-F]+)\\s+(\\S+?)`(.+?)(?:\\s+\\+\\s+\\d+)?(?:\\s+at\\s+(\\S+))?\\s*$"
    )
    .unwrap();
    /// `frame #3: 0x00007f8a91b2c300 libc.so.6 + 292`
    static ref BARE_FRAME_RE: Regex = Regex::new(
        r"^\s*[*\s]*frame\s+#(\d+):\s+(0x[0-9a-fA-F]+)\s+(\S+)\s+\+\s+\d+\s*$"
    )
    .unwrap();
    /// Anything else that still looks like a frame, e.g. SOS placeholders.
    static ref FALLBACK_FRAME_RE: Regex =
        Regex::new(r"^\s*[*\s]*frame\s+#(\d+):\s+(0x[0-9a-fA-F]+)\s+(.+?)\s*$").unwrap();
    static ref BT_THREAD_HEADER_RE: Regex =
        Regex::new(r"^\*?\s*thread #(\d+)(?::\s*tid\s*=\s*(0x[0-9a-fA-F]+|\d+))?").unwrap();
    static ref SOURCE_LOCATION_RE: Regex = Regex::new(r"^(.*?):(\d+)(?::\d+)?$").unwrap();

    /// `[  0] 4C4C4444-5555-3333-A2AA-112233445566 0x0000aaaab54e0000 /usr/bin/app`
    static ref IMAGE_RE: Regex = Regex::new(
        r"^\[\s*(\d+)\]\s+([0-9A-Fa-f-]{8,})\s+(0x[0-9a-fA-F]+)\s+(\S.*?)\s*$"
    )
    .unwrap();

    static ref ARCH_TOKEN_RE: Regex =
        Regex::new(r"(aarch64|arm64|x86_64|amd64|i686|armhf)").unwrap();
    static ref HEX_ADDR_RE: Regex = Regex::new(r"0x([0-9a-fA-F]+)").unwrap();
}

/// Returns `true` when a stop reason indicates a fault.
///
/// `signal 0` is the "no signal" sentinel and never faults.
pub fn stop_reason_is_faulting(reason: &str) -> bool {
    let reason = reason.trim();
    if reason == "signal 0" {
        return false;
    }
    FAULT_SIGNAL_RE.is_match(reason)
        || reason.to_ascii_lowercase().contains("exception")
        || reason.starts_with("EXC_")
}

fn normalize_tid(raw: &str) -> String {
    match parse_hex_addr(raw) {
        Some(value) if raw.starts_with("0x") || raw.starts_with("0X") => format!("{value:#x}"),
        _ => match raw.parse::<u64>() {
            Ok(value) => format!("{value:#x}"),
            Err(_) => raw.to_ascii_lowercase(),
        },
    }
}

/// Parses `thread list` output into the report's thread table.
pub fn parse_thread_list(output: &str, report: &mut CrashReport) {
    for line in output.lines() {
        let Some(caps) = THREAD_RE.captures(line) else {
            continue;
        };

        let marked = caps.get(1).is_some();
        let index = &caps[2];
        let tid = normalize_tid(&caps[3]);
        let rest = caps.get(4).map(|m| m.as_str()).unwrap_or_default();

        let stop_reason = STOP_REASON_RE
            .captures(rest)
            .map(|c| c[1].trim().to_owned());
        let is_faulting = marked
            || stop_reason
                .as_deref()
                .map(stop_reason_is_faulting)
                .unwrap_or(false);

        if let Some(reason) = stop_reason.as_deref() {
            if report.summary.signal.is_none() && stop_reason_is_faulting(reason) {
                if let Some(signal) = SIGNAL_NAME_RE.captures(reason) {
                    report.summary.signal = Some(signal[1].to_owned());
                }
            }
        }

        report.threads.threads.push(ThreadInfo {
            thread_id: format!("{index} (tid: {tid})"),
            os_thread_id: Some(tid),
            name: THREAD_NAME_RE.captures(rest).map(|c| c[1].to_owned()),
            queue: THREAD_QUEUE_RE.captures(rest).map(|c| c[1].to_owned()),
            stop_reason,
            is_faulting,
            ..Default::default()
        });
    }

    report.threads.count = report.threads.threads.len();
}

/// Resolves a backtrace section header to a thread index in the report.
///
/// Matching order: exact thread number, hex tid, then position.
fn resolve_thread(
    report: &CrashReport,
    thread_number: &str,
    tid: Option<&str>,
    position: usize,
) -> Option<usize> {
    let prefix = format!("{thread_number} (");
    if let Some(idx) = report
        .threads
        .threads
        .iter()
        .position(|t| t.thread_id.starts_with(&prefix))
    {
        return Some(idx);
    }

    if let Some(tid) = tid {
        let tid = normalize_tid(tid);
        if let Some(idx) = report
            .threads
            .threads
            .iter()
            .position(|t| t.os_thread_id.as_deref() == Some(tid.as_str()))
        {
            return Some(idx);
        }
    }

    if position < report.threads.threads.len() {
        return Some(position);
    }
    None
}

fn parse_source_location(text: &str) -> (Option<String>, Option<u32>) {
    match SOURCE_LOCATION_RE.captures(text) {
        Some(caps) => {
            let file = caps[1].to_owned();
            let line = caps[2].parse().ok();
            (Some(file), line)
        }
        None => (Some(text.to_owned()), None),
    }
}

fn parse_frame_line(line: &str) -> Option<StackFrame> {
    if let Some(caps) = FRAME_RE.captures(line) {
        let (source_file, line_number) = match caps.get(5) {
            Some(loc) => parse_source_location(loc.as_str()),
            None => (None, None),
        };
        let function = caps[4].trim().to_owned();
        let mut frame = StackFrame {
            frame_number: caps[1].parse().unwrap_or(0),
            instruction_pointer: Some(caps[2].to_ascii_lowercase()),
            module: Some(caps[3].to_owned()),
            function,
            source_file,
            line_number,
            ..Default::default()
        };
        frame.is_managed = frame.is_placeholder();
        return Some(frame);
    }

    if let Some(caps) = BARE_FRAME_RE.captures(line) {
        let ip = caps[2].to_ascii_lowercase();
        return Some(StackFrame {
            frame_number: caps[1].parse().unwrap_or(0),
            function: format!("[Native Code @ {ip}]"),
            instruction_pointer: Some(ip),
            module: Some(caps[3].to_owned()),
            ..Default::default()
        });
    }

    if let Some(caps) = FALLBACK_FRAME_RE.captures(line) {
        let mut frame = StackFrame {
            frame_number: caps[1].parse().unwrap_or(0),
            instruction_pointer: Some(caps[2].to_ascii_lowercase()),
            function: caps[3].trim().to_owned(),
            ..Default::default()
        };
        frame.is_managed = frame.is_placeholder();
        return Some(frame);
    }

    None
}

/// Parses `bt all` output and attaches frames to their owning threads.
pub fn parse_backtraces(output: &str, report: &mut CrashReport) {
    let mut current: Option<usize> = None;
    let mut section = 0usize;

    for line in output.lines() {
        if let Some(caps) = BT_THREAD_HEADER_RE.captures(line) {
            let tid = caps.get(2).map(|m| m.as_str());
            current = resolve_thread(report, &caps[1], tid, section);
            section += 1;
            continue;
        }

        let Some(frame) = parse_frame_line(line) else {
            continue;
        };
        if let Some(idx) = current {
            report.threads.threads[idx].call_stack.push(frame);
        }
    }
}

fn module_name_from_path(path: &str) -> String {
    path.rsplit(['/', '\\'])
        .next()
        .unwrap_or(path)
        .to_owned()
}

/// Returns `true` when a line following an image entry names a separate
/// debug-info file.
fn is_debug_info_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty()
        && !trimmed.starts_with('[')
        && (trimmed.contains(".debug") || trimmed.contains(".dbg") || trimmed.contains("/debug/"))
}

/// Parses `image list` output into the report's module table.
pub fn parse_image_list(output: &str, report: &mut CrashReport) {
    let lines: Vec<&str> = output.lines().collect();

    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = IMAGE_RE.captures(line) else {
            continue;
        };

        let path = caps[4].trim().to_owned();
        let has_symbols = path.contains(".dSYM")
            || lines
                .get(i + 1)
                .map(|next| is_debug_info_line(next))
                .unwrap_or(false);

        report.modules.push(ModuleInfo {
            name: module_name_from_path(&path),
            base_address: Some(caps[3].to_ascii_lowercase()),
            path: Some(path),
            has_symbols,
            ..Default::default()
        });
    }

    report.summary.module_count = report.modules.len();
}

fn distribution_from_paths(text: &str) -> Option<String> {
    let lowered = text.to_ascii_lowercase();
    for (token, name) in [
        ("alpine", "Alpine"),
        ("ubuntu", "Ubuntu"),
        ("debian", "Debian"),
        ("fedora", "Fedora"),
        ("centos", "CentOS"),
        ("rhel", "RHEL"),
    ] {
        if lowered.contains(token) {
            return Some(name.to_owned());
        }
    }
    None
}

/// Detects OS, libc and architecture from `image list` (or `lm`) text.
pub fn detect_platform(text: &str) -> Platform {
    let mut platform = Platform::default();

    if text.contains("ld-musl-") {
        platform.os = "Linux".to_owned();
        platform.libc_type = Some("musl".to_owned());
        platform.distribution = distribution_from_paths(text).or(Some("Alpine".to_owned()));
    } else if text.contains("ld-linux-") || text.contains("libc.so") {
        platform.os = "Linux".to_owned();
        platform.libc_type = Some("glibc".to_owned());
        platform.distribution = distribution_from_paths(text);
    } else if text.contains("dyld") || text.contains(".dylib") {
        platform.os = "macOS".to_owned();
    } else if text.contains("ntdll") || text.contains("kernel32") {
        platform.os = "Windows".to_owned();
    }

    if let Some(caps) = ARCH_TOKEN_RE.captures(&text.to_ascii_lowercase()) {
        platform.architecture = Arch::from_token(&caps[1]);
    }

    platform.pointer_size = platform.architecture.pointer_bits().or_else(|| {
        // fall back to the width of the first address in the text
        HEX_ADDR_RE
            .captures(text)
            .map(|caps| if caps[1].len() > 8 { 64 } else { 32 })
    });

    platform
}

/// Runs platform detection over `image list` output and stores the
/// result in the report.
pub fn parse_platform(image_list: &str, report: &mut CrashReport) {
    report.environment.platform = detect_platform(image_list);
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmortem_common::Dialect;

    const THREAD_LIST: &str = "\
Process 1948 stopped
* thread #1: tid = 0x2f03, 0x0000ffff9e8c1234 libfoo.so`handler + 16, name = 'worker', stop reason = signal SIGSEGV
  thread #2: tid = 0x2f04, 0x0000ffff9e8d5678 libc.so.6`__futex_wait + 8, name = 'pool-1', stop reason = signal 0
";

    #[test]
    fn test_parse_thread_list() {
        let mut report = CrashReport::new(Dialect::Lldb);
        parse_thread_list(THREAD_LIST, &mut report);

        assert_eq!(report.threads.count, 2);
        let first = &report.threads.threads[0];
        assert_eq!(first.thread_id, "1 (tid: 0x2f03)");
        assert_eq!(first.os_thread_id.as_deref(), Some("0x2f03"));
        assert_eq!(first.name.as_deref(), Some("worker"));
        assert!(first.is_faulting);

        let second = &report.threads.threads[1];
        assert_eq!(second.stop_reason.as_deref(), Some("signal 0"));
        assert!(!second.is_faulting);

        assert_eq!(report.summary.signal.as_deref(), Some("SIGSEGV"));
    }

    #[test]
    fn test_signal_zero_not_faulting() {
        assert!(!stop_reason_is_faulting("signal 0"));
        assert!(stop_reason_is_faulting("signal SIGSEGV"));
        assert!(stop_reason_is_faulting("EXC_BAD_ACCESS (code=1, address=0x0)"));
        assert!(stop_reason_is_faulting("hit program exception"));
        assert!(!stop_reason_is_faulting("breakpoint 1.1"));
    }

    #[test]
    fn test_parse_backtraces_assigns_frames() {
        let mut report = CrashReport::new(Dialect::Lldb);
        parse_thread_list(THREAD_LIST, &mut report);

        let bt = "\
* thread #1: tid = 0x2f03, 0x0000ffff9e8c1234 libfoo.so`handler + 16
  * frame #0: 0x0000ffff9e8c1234 libfoo.so`handler + 16 at /src/handler.c:42
    frame #1: 0x0000ffff9e8c2000 libfoo.so`dispatch + 64
    frame #2: 0x0000ffff9e7a1000 libc.so.6 + 292
  thread #2: tid = 0x2f04
    frame #0: 0x0000ffff9e8d5678 libc.so.6`__futex_wait + 8
";
        parse_backtraces(bt, &mut report);

        let first = &report.threads.threads[0].call_stack;
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].function, "handler");
        assert_eq!(first[0].module.as_deref(), Some("libfoo.so"));
        assert_eq!(first[0].source_file.as_deref(), Some("/src/handler.c"));
        assert_eq!(first[0].line_number, Some(42));
        assert_eq!(first[2].function, "[Native Code @ 0x0000ffff9e7a1000]");

        let second = &report.threads.threads[1].call_stack;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].function, "__futex_wait");
    }

    #[test]
    fn test_parse_backtraces_placeholder_frames() {
        let mut report = CrashReport::new(Dialect::Lldb);
        parse_thread_list("* thread #1: tid = 0x10, 0x0 app`main", &mut report);

        let bt = "\
thread #1: tid = 0x10
    frame #0: 0x00007f0012340000 [JIT Code @ 0x7f0012340000]
    frame #1: 0x00007f0012345678 [ManagedMethod]
";
        parse_backtraces(bt, &mut report);

        let stack = &report.threads.threads[0].call_stack;
        assert_eq!(stack.len(), 2);
        assert!(stack[0].is_managed);
        assert!(stack[1].is_managed);
        assert_eq!(stack[1].function, "[ManagedMethod]");
    }

    #[test]
    fn test_parse_image_list() {
        let mut report = CrashReport::new(Dialect::Lldb);
        let output = "\
[  0] 01234567-89AB-CDEF-0123-456789ABCDEF 0x0000aaaab54e0000 /usr/bin/myapp
      /usr/lib/debug/usr/bin/myapp.debug
[  1] 89ABCDEF-0123-4567-89AB-CDEF01234567 0x0000ffff9e780000 /lib/ld-musl-aarch64.so.1
[  2] 00112233-4455-6677-8899-AABBCCDDEEFF 0x000000010a000000 /System/Library/Frameworks/Foo.framework/Foo.dSYM/Contents/Foo
";
        parse_image_list(output, &mut report);

        assert_eq!(report.modules.len(), 3);
        assert_eq!(report.modules[0].name, "myapp");
        assert!(report.modules[0].has_symbols);
        assert_eq!(report.modules[1].name, "ld-musl-aarch64.so.1");
        assert!(!report.modules[1].has_symbols);
        assert!(report.modules[2].has_symbols);
        assert_eq!(report.summary.module_count, 3);
    }

    #[test]
    fn test_detect_platform_musl_arm64() {
        let text = "[  0] ... 0x0000ffff9e780000 /lib/ld-musl-aarch64.so.1";
        let platform = detect_platform(text);

        assert_eq!(platform.os, "Linux");
        assert_eq!(platform.libc_type.as_deref(), Some("musl"));
        assert_eq!(platform.architecture, Arch::Arm64);
        assert_eq!(platform.pointer_size, Some(64));
        assert_eq!(platform.distribution.as_deref(), Some("Alpine"));
    }

    #[test]
    fn test_detect_platform_glibc_distro() {
        let text = "[  0] ... 0x00007f1234560000 /usr/lib/x86_64-linux-gnu/libc.so.6 (ubuntu)";
        let platform = detect_platform(text);

        assert_eq!(platform.os, "Linux");
        assert_eq!(platform.libc_type.as_deref(), Some("glibc"));
        assert_eq!(platform.architecture, Arch::Amd64);
        assert_eq!(platform.distribution.as_deref(), Some("Ubuntu"));
    }

    #[test]
    fn test_detect_platform_pointer_fallback() {
        let platform = detect_platform("dyld at 0x000000010a000000");
        assert_eq!(platform.os, "macOS");
        assert_eq!(platform.architecture, Arch::Unknown);
        assert_eq!(platform.pointer_size, Some(64));
    }
}
