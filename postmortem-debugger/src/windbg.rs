//! Parsers for WinDbg / cdb command output.

use lazy_static::lazy_static;
use regex::Regex;

use postmortem_common::Arch;
use postmortem_report::{
    CrashReport, ExceptionInfo, ModuleInfo, SecurityAnalysis, Severity, StackFrame,
    StackIntegrity, ThreadInfo, Vulnerability,
};

lazy_static! {
    /// `.  0  Id: 1a2b.3c4d Suspend: 1 Teb: 000000a1`b2c30000 Unfrozen "MainThread"`
    static ref THREAD_RE: Regex = Regex::new(
        "^\\s*([.#*])?\\s*(\\d+)\\s+Id:\\s*([0-9a-fA-F]+)\\.([0-9a-fA-F]+)\\s+Suspend:\\s*(-?\\d+)\\s+Teb:\\s*([0-9a-fA-F`]+)\\s+(\\S+)(?:\\s+\"([^\"]*)\")?"
    )
    .unwrap();

    /// `00 000000d0`23abcd00 00007ff8`12345678 ntdll!NtWaitForSingleObject+0x14 [C:\src\foo.c @ 42]`
    static ref FRAME_RE: Regex = Regex::new(
        "^\\s*([0-9a-f]{2,3})\\s+([0-9a-f`]+)\\s+([0-9a-f`]+)\\s+(.+?)\\s*$"
    )
    .unwrap();
    static ref CALL_SITE_RE: Regex = Regex::new(
        r"^([^!\s]+)!(\S+?)(?:\+0x[0-9a-fA-F]+)?(?:\s+\[(.+?)\s+@\s+(\d+)\])?$"
    )
    .unwrap();
    static ref FRAME_COLUMN_HEADER_RE: Regex =
        Regex::new(r"^\s*#?\s*Child-?SP\s+RetAddr\s+Call Site").unwrap();

    /// `00007ff8`10000000 00007ff8`101f0000   ntdll      (pdb symbols)   C:\sym\ntdll.pdb`
    static ref MODULE_RE: Regex = Regex::new(
        "^([0-9a-fA-F`]+)\\s+([0-9a-fA-F`]+)\\s+(\\S+)\\s+\\(([^)]*)\\)\\s*(.*)$"
    )
    .unwrap();

    static ref EXCEPTION_CODE_RE: Regex = Regex::new(
        r"EXCEPTION_CODE:\s*(?:\([^)]*\)\s*)?(?:0x)?([0-9a-fA-F]{8})(?:\s*-\s*(.+))?"
    )
    .unwrap();
    static ref EXCEPTION_NAME_RE: Regex =
        Regex::new(r"\b(EXCEPTION_[A-Z_]+|STATUS_[A-Z_0-9]+)\b").unwrap();
    static ref EXCEPTION_RECORD_RE: Regex =
        Regex::new("EXCEPTION_RECORD:\\s*([0-9a-fA-F`]+)").unwrap();
    static ref FAULTING_IP_RE: Regex =
        Regex::new("(?m)^FAULTING_IP:\\s*\r?\n.*\r?\n([0-9a-fA-F`]+)").unwrap();
    static ref SAFESEH_RE: Regex = Regex::new(r"(?i)SafeSEH\s*:?\s*(ON|OFF|Yes|No)").unwrap();
}

fn strip_backtick(addr: &str) -> String {
    let cleaned = addr.replace('`', "");
    match u64::from_str_radix(&cleaned, 16) {
        Ok(value) => format!("{value:#x}"),
        Err(_) => format!("0x{}", cleaned.to_ascii_lowercase()),
    }
}

/// Parses `~` output into the report's thread table.
///
/// `#` marks the faulting thread; the `.` (current) thread only counts
/// as faulting when no `#` marker exists in the listing.
pub fn parse_thread_list(output: &str, report: &mut CrashReport) {
    let has_fault_marker = output.lines().any(|line| {
        THREAD_RE
            .captures(line)
            .and_then(|c| c.get(1))
            .is_some_and(|m| m.as_str() == "#")
    });

    for line in output.lines() {
        let Some(caps) = THREAD_RE.captures(line) else {
            continue;
        };

        let marker = caps.get(1).map(|m| m.as_str());
        let index = &caps[2];
        let tid = caps[4].to_ascii_lowercase();
        let is_faulting = match marker {
            Some("#") => true,
            Some(_) => !has_fault_marker,
            None => false,
        };

        report.threads.threads.push(ThreadInfo {
            thread_id: format!("{index} (tid: 0x{tid})"),
            os_thread_id: Some(format!("0x{tid}")),
            state: Some(caps[7].to_owned()),
            name: caps.get(8).map(|m| m.as_str().to_owned()),
            is_faulting,
            ..Default::default()
        });
    }

    report.threads.count = report.threads.threads.len();
}

fn parse_call_site(ip: String, call_site: &str) -> StackFrame {
    if let Some(caps) = CALL_SITE_RE.captures(call_site) {
        let mut frame = StackFrame {
            instruction_pointer: Some(ip),
            module: Some(caps[1].to_owned()),
            function: caps[2].to_owned(),
            source_file: caps.get(3).map(|m| m.as_str().to_owned()),
            line_number: caps.get(4).and_then(|m| m.as_str().parse().ok()),
            ..Default::default()
        };
        frame.is_managed = frame.is_placeholder();
        return frame;
    }

    let trimmed = call_site.trim();
    if trimmed.eq_ignore_ascii_case("[ManagedMethod]") || trimmed.starts_with("[JIT Code @") {
        return StackFrame {
            function: trimmed.to_owned(),
            instruction_pointer: Some(ip),
            is_managed: true,
            ..Default::default()
        };
    }

    StackFrame {
        function: format!("[Native Code @ {ip}]"),
        instruction_pointer: Some(ip),
        ..Default::default()
    }
}

/// Parses `~*k` output and attaches frames to their owning threads.
pub fn parse_stacks(output: &str, report: &mut CrashReport) {
    let mut current: Option<usize> = None;
    let mut section = 0usize;

    for line in output.lines() {
        if let Some(caps) = THREAD_RE.captures(line) {
            let index = &caps[2];
            let tid = caps[4].to_ascii_lowercase();
            let prefix = format!("{index} (");
            current = report
                .threads
                .threads
                .iter()
                .position(|t| t.thread_id.starts_with(&prefix))
                .or_else(|| {
                    report
                        .threads
                        .threads
                        .iter()
                        .position(|t| t.os_thread_id.as_deref() == Some(&format!("0x{tid}")))
                })
                .or((section < report.threads.threads.len()).then_some(section));
            section += 1;
            continue;
        }

        if FRAME_COLUMN_HEADER_RE.is_match(line) {
            continue;
        }

        let Some(caps) = FRAME_RE.captures(line) else {
            continue;
        };
        let Some(idx) = current else {
            continue;
        };

        let frame_number = usize::from_str_radix(&caps[1], 16).unwrap_or(0);
        let ip = strip_backtick(&caps[3]);
        let mut frame = parse_call_site(ip, &caps[4]);
        frame.frame_number = frame_number;
        report.threads.threads[idx].call_stack.push(frame);
    }
}

/// Parses `lm` output into the report's module table.
pub fn parse_module_list(output: &str, report: &mut CrashReport) {
    for line in output.lines() {
        let Some(caps) = MODULE_RE.captures(line) else {
            continue;
        };

        let status = caps[4].to_ascii_lowercase();
        let has_symbols = !status.contains("no symbols")
            && (status.contains("pdb") || status.contains("symbols") || status.contains("private"));
        let path = caps.get(5).map(|m| m.as_str().trim()).unwrap_or_default();

        report.modules.push(ModuleInfo {
            name: caps[3].to_owned(),
            base_address: Some(strip_backtick(&caps[1])),
            path: (!path.is_empty()).then(|| path.to_owned()),
            has_symbols,
            ..Default::default()
        });
    }

    report.summary.module_count = report.modules.len();
}

/// Well-known NT status codes mapped to canonical exception names.
fn canonical_name_for_code(code: u32) -> Option<&'static str> {
    match code {
        0xc0000005 => Some("EXCEPTION_ACCESS_VIOLATION"),
        0xc00000fd => Some("EXCEPTION_STACK_OVERFLOW"),
        0xc0000409 => Some("STATUS_STACK_BUFFER_OVERRUN"),
        0xc0000094 => Some("EXCEPTION_INT_DIVIDE_BY_ZERO"),
        0xc000001d => Some("EXCEPTION_ILLEGAL_INSTRUCTION"),
        0x80000003 => Some("EXCEPTION_BREAKPOINT"),
        0xe0434352 => Some("CLR_EXCEPTION"),
        _ => None,
    }
}

/// Parses `!analyze -v` output into the exception and security sections.
pub fn parse_analyze(output: &str, report: &mut CrashReport) {
    let mut exception = ExceptionInfo::default();

    if let Some(caps) = EXCEPTION_CODE_RE.captures(output) {
        let code = caps[1].to_ascii_lowercase();
        if let Ok(value) = u32::from_str_radix(&code, 16) {
            exception.exception_type = canonical_name_for_code(value).map(str::to_owned);
        }
        exception.code = Some(format!("0x{code}"));
        exception.message = caps.get(2).map(|m| m.as_str().trim().to_owned());
    }

    if exception.exception_type.is_none() {
        if let Some(caps) = EXCEPTION_NAME_RE.captures(output) {
            exception.exception_type = Some(caps[1].to_owned());
        } else if output.contains("Access violation") {
            exception.exception_type = Some("EXCEPTION_ACCESS_VIOLATION".to_owned());
        }
    }

    exception.address = FAULTING_IP_RE
        .captures(output)
        .map(|caps| strip_backtick(&caps[1]))
        .or_else(|| {
            EXCEPTION_RECORD_RE
                .captures(output)
                .map(|caps| strip_backtick(&caps[1]))
        });

    if exception.exception_type.is_some() || exception.code.is_some() {
        report.exception = Some(exception);
    }

    parse_security(output, report);
}

/// Derives the stack-integrity section from `!analyze -v` output.
///
/// SafeSEH is a 32-bit concept; the field stays empty on 64-bit.
fn parse_security(output: &str, report: &mut CrashReport) {
    let stack_overrun = output.contains("STATUS_STACK_BUFFER_OVERRUN")
        || output.contains("GS_FAILURE")
        || output.contains("/GS failure");

    let is_32bit = matches!(
        report.environment.platform.architecture,
        Arch::X86 | Arch::Arm
    );
    let safe_seh = if is_32bit {
        SAFESEH_RE
            .captures(output)
            .map(|caps| matches!(&caps[1].to_ascii_lowercase()[..], "on" | "yes"))
    } else {
        None
    };

    if !stack_overrun && safe_seh.is_none() {
        return;
    }

    let mut security = SecurityAnalysis {
        stack_integrity: Some(StackIntegrity {
            canary_corrupted: stack_overrun,
            safe_seh,
        }),
        ..Default::default()
    };

    if stack_overrun {
        security.vulnerabilities.push(Vulnerability {
            title: "Stack buffer overrun".to_owned(),
            severity: Severity::Critical,
            cwe: Some("CWE-121".to_owned()),
            description: Some(
                "The process reported a stack buffer overrun (failfast); a stack canary \
                 was corrupted before the dump was written."
                    .to_owned(),
            ),
        });
    }

    report.security = Some(security);
}
