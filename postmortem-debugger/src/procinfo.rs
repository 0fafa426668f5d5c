//! Process argument and environment extraction from dump memory.
//!
//! The primary path locates the entry frame in `bt all` output and walks
//! the `argv` pointer array through debugger memory reads. When no entry
//! frame is visible (stripped hosts, unusual entry points), a stack
//! region scan decodes environment-shaped strings from the top of the
//! main thread stack instead.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use postmortem_common::{format_hex_addr, parse_hex_addr};
use postmortem_report::{redaction, CrashReport, ProcessInfo};

use crate::facade::Debugger;

/// Longest C string the extractor will dereference.
const MAX_CSTRING_LEN: usize = 32768;

/// Pointers read at `argv` in one block; argv and envp both live inside.
const POINTER_BLOCK: usize = 256;

/// Lowest address accepted as a string pointer.
const MIN_POINTER: u64 = 0x1000;

/// Stack-region fallback bounds.
const MIN_STACK_REGION: u64 = 64 * 1024;
const MAX_STACK_REGION: u64 = 16 * 1024 * 1024;
const STACK_TAIL_BYTES: u64 = 8 * 1024;

lazy_static! {
    /// Entry-frame argument pattern in `bt all` output.
    static ref ENTRY_FRAME_RE: Regex = Regex::new(
        "(?:dotnet`main|`main|corehost_main|hostfxr_main|exe_start|`_main)\\(argc=(\\d+),\\s*argv=(0x[0-9a-fA-F]+)\\)"
    )
    .unwrap();
    static ref HEX_WORD_RE: Regex = Regex::new(r"0x[0-9a-fA-F]+").unwrap();
    static ref QUOTED_RE: Regex = Regex::new(r#""((?:\\.|[^"\\])*)""#).unwrap();
    /// `[0x00007ffc00000000-0x00007ffc00800000) rw-`
    static ref REGION_RE: Regex = Regex::new(
        r"\[(0x[0-9a-fA-F]+)-(0x[0-9a-fA-F]+)\)\s+(\S+)"
    )
    .unwrap();
    static ref ENV_KEY_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").unwrap();
}

fn user_space_ceiling(pointer_size: usize) -> u64 {
    if pointer_size == 8 {
        0x0000_ffff_ffff_ffff
    } else {
        0xbfff_ffff
    }
}

fn pointer_is_plausible(pointer: u64, pointer_size: usize) -> bool {
    pointer >= MIN_POINTER && pointer <= user_space_ceiling(pointer_size)
}

/// Reads `count` pointers at `address` through the debugger.
fn read_pointers(
    debugger: &Debugger,
    address: u64,
    count: usize,
    pointer_size: usize,
) -> Vec<u64> {
    let command = format!(
        "memory read --format x --size {pointer_size} --count {count} {}",
        format_hex_addr(address)
    );
    let Ok(output) = debugger.execute(&command) else {
        return Vec::new();
    };

    let mut pointers = Vec::new();
    for line in output.lines() {
        // the part before `:` is the address of the row itself
        let words = match line.split_once(':') {
            Some((_, rest)) => rest,
            None => continue,
        };
        for m in HEX_WORD_RE.find_iter(words) {
            if let Some(value) = parse_hex_addr(m.as_str()) {
                pointers.push(value);
            }
        }
    }
    pointers.truncate(count);
    pointers
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => break,
            Some(other) => out.push(other),
            None => break,
        }
    }
    out
}

/// Dereferences a NUL-terminated string at `address`.
fn read_cstring(debugger: &Debugger, address: u64) -> Option<String> {
    let command = format!("memory read --format s {}", format_hex_addr(address));
    let output = debugger.execute(&command).ok()?;
    let caps = QUOTED_RE.captures(&output)?;
    let mut value = unescape(&caps[1]);
    if value.chars().count() > MAX_CSTRING_LEN {
        value = value.chars().take(MAX_CSTRING_LEN).collect();
    }
    Some(value)
}

/// Returns `true` when a candidate `argv[0]` plausibly names an
/// executable: a path, or an identifier that is mostly alphanumeric.
fn looks_like_executable(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    if value.starts_with('/') || value.starts_with("./") || value.contains('/') {
        return true;
    }
    let first = value.chars().next().unwrap();
    if !first.is_ascii_alphabetic() {
        return false;
    }
    let alnum = value.chars().filter(|c| c.is_ascii_alphanumeric()).count();
    alnum * 10 >= value.chars().count() * 6
}

/// Extracts argv and envp via the entry frame, or falls back to a stack
/// region scan. The result is stored on the report.
pub fn extract_process_info(debugger: &Debugger, bt_all: &str, report: &mut CrashReport) {
    let pointer_size = report
        .environment
        .platform
        .pointer_size
        .map(|bits| bits as usize / 8)
        .unwrap_or(8);

    let mut info = match ENTRY_FRAME_RE.captures(bt_all) {
        Some(caps) => {
            let argc: u32 = caps[1].parse().unwrap_or(0);
            let argv_address = parse_hex_addr(&caps[2]);
            match argv_address {
                Some(address) => {
                    extract_from_argv(debugger, argc, address, pointer_size)
                }
                None => None,
            }
        }
        None => None,
    };

    if info.is_none() {
        debug!("entry frame not found, falling back to stack region scan");
        info = extract_from_stack_scan(debugger, pointer_size);
    }

    let Some(mut info) = info else {
        return;
    };

    // raw-command redaction may already have tripped the flag
    let previously_filtered = report
        .process
        .as_ref()
        .map(|existing| existing.sensitive_data_filtered)
        .unwrap_or(false);
    info.sensitive_data_filtered =
        redaction::redact_env_entries(&mut info.environment_variables) || previously_filtered;
    report.process = Some(info);
}

fn extract_from_argv(
    debugger: &Debugger,
    argc: u32,
    argv_address: u64,
    pointer_size: usize,
) -> Option<ProcessInfo> {
    let pointers = read_pointers(debugger, argv_address, POINTER_BLOCK, pointer_size);
    if pointers.is_empty() {
        return None;
    }

    // argv runs to the first NULL, envp from there to the second
    let mut arguments = Vec::new();
    let mut environment = Vec::new();
    let mut nulls_seen = 0usize;

    for pointer in pointers {
        if pointer == 0 {
            nulls_seen += 1;
            if nulls_seen == 2 {
                break;
            }
            continue;
        }
        if !pointer_is_plausible(pointer, pointer_size) {
            continue;
        }
        let Some(value) = read_cstring(debugger, pointer) else {
            continue;
        };
        if nulls_seen == 0 {
            arguments.push(value);
        } else {
            environment.push(value);
        }
    }

    if let Some(first) = arguments.first() {
        if !looks_like_executable(first) {
            arguments.clear();
        }
    }
    if arguments.is_empty() && environment.is_empty() {
        return None;
    }

    Some(ProcessInfo {
        argc: Some(argc),
        argv_address: Some(format_hex_addr(argv_address)),
        arguments,
        environment_variables: environment,
        sensitive_data_filtered: false,
    })
}

/// Reads `count` raw bytes at `address` through the debugger.
fn read_bytes(debugger: &Debugger, address: u64, count: u64) -> Vec<u8> {
    let command = format!(
        "memory read --format x --size 1 --count {count} {}",
        format_hex_addr(address)
    );
    let Ok(output) = debugger.execute(&command) else {
        return Vec::new();
    };

    let mut bytes = Vec::new();
    for line in output.lines() {
        let words = match line.split_once(':') {
            Some((_, rest)) => rest,
            None => continue,
        };
        for m in HEX_WORD_RE.find_iter(words) {
            if let Some(value) = parse_hex_addr(m.as_str()) {
                if value <= 0xff {
                    bytes.push(value as u8);
                }
            }
        }
    }
    bytes
}

fn printable_ratio(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }
    let printable = bytes
        .iter()
        .filter(|b| b.is_ascii_graphic() || **b == b' ')
        .count();
    printable as f64 / bytes.len() as f64
}

/// Scans the top of the highest plausible stack region for
/// environment-shaped strings.
fn extract_from_stack_scan(debugger: &Debugger, pointer_size: usize) -> Option<ProcessInfo> {
    let regions = debugger.execute("memory region --all").ok()?;

    let mut best: Option<(u64, u64)> = None;
    for caps in REGION_RE.captures_iter(&regions) {
        let start = parse_hex_addr(&caps[1])?;
        let end = parse_hex_addr(&caps[2])?;
        let perms = &caps[3];
        if !perms.contains("rw") || perms.contains('x') {
            continue;
        }
        let size = end.saturating_sub(start);
        if !(MIN_STACK_REGION..=MAX_STACK_REGION).contains(&size) {
            continue;
        }
        if best.map(|(s, _)| start > s).unwrap_or(true) {
            best = Some((start, end));
        }
    }

    let (start, end) = best?;
    let tail = STACK_TAIL_BYTES.min(end - start);
    let bytes = read_bytes(debugger, end - tail, tail);
    if bytes.is_empty() {
        return None;
    }

    let mut arguments = Vec::new();
    let mut environment = Vec::new();

    for run in bytes.split(|b| *b == 0) {
        if run.len() < 3 || printable_ratio(run) < 0.8 {
            continue;
        }
        let Ok(text) = std::str::from_utf8(run) else {
            continue;
        };
        if ENV_KEY_RE.is_match(text) {
            environment.push(text.to_owned());
        } else if arguments.is_empty() && looks_like_executable(text) {
            arguments.push(text.to_owned());
        }
    }

    if arguments.is_empty() && environment.is_empty() {
        return None;
    }

    Some(ProcessInfo {
        argc: None,
        argv_address: None,
        arguments,
        environment_variables: environment,
        sensitive_data_filtered: false,
    })
}
