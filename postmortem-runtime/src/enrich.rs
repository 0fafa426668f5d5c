//! Report enrichment with managed-runtime data.

use tracing::debug;

use postmortem_report::{CrashReport, ModuleInfo};

use crate::metadata::MetadataImage;
use crate::reader::RuntimeReader;

/// Metadata larger than this is skipped entirely.
pub const MAX_METADATA_BYTES: u64 = 50 * 1024 * 1024;

/// Enriches an existing report with runtime version, managed thread
/// ids, assembly versions and assembly-level attributes.
///
/// Modules whose metadata is missing, oversized or malformed are kept
/// without attributes; per-module failures never fail the enrichment.
pub fn enrich_report(reader: &dyn RuntimeReader, report: &mut CrashReport) {
    if report.environment.runtime_version.is_none() {
        report.environment.runtime_version = reader.runtime_version();
    }

    for (os_thread_id, managed_id) in reader.managed_thread_ids() {
        if let Some(thread) = report
            .threads
            .threads
            .iter_mut()
            .find(|t| t.os_thread_id.as_deref() == Some(os_thread_id.as_str()))
        {
            thread.managed_thread_id = Some(managed_id);
        }
    }

    for module in reader.modules() {
        if !module.is_pe_file || module.is_dynamic || module.metadata_length == 0 {
            continue;
        }
        if module.metadata_length > MAX_METADATA_BYTES {
            debug!(
                module = module.name.as_str(),
                length = module.metadata_length,
                "skipping oversized metadata"
            );
            continue;
        }

        let Some(bytes) = reader.metadata_bytes(&module) else {
            debug!(module = module.name.as_str(), "metadata is unreadable");
            continue;
        };

        let entry = find_or_insert_module(report, &module.name, module.base_address, &module.path);
        match MetadataImage::parse(&bytes) {
            Ok(image) => {
                entry.assembly_version = image.assembly_version();
                entry.attributes = image.assembly_attributes();
            }
            Err(error) => {
                debug!(
                    module = module.name.as_str(),
                    %error,
                    "failed to parse module metadata"
                );
            }
        }
    }

    report.summary.module_count = report.modules.len();
}

fn find_or_insert_module<'r>(
    report: &'r mut CrashReport,
    name: &str,
    base_address: u64,
    path: &Option<String>,
) -> &'r mut ModuleInfo {
    let position = report
        .modules
        .iter()
        .position(|m| m.name.eq_ignore_ascii_case(name));

    match position {
        Some(index) => &mut report.modules[index],
        None => {
            report.modules.push(ModuleInfo {
                name: name.to_owned(),
                base_address: Some(postmortem_common::format_hex_addr(base_address)),
                path: path.clone(),
                has_symbols: false,
                ..Default::default()
            });
            report.modules.last_mut().unwrap()
        }
    }
}
