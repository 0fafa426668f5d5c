//! Decoding of assembly-level custom attribute blobs.
//!
//! A custom attribute blob (ECMA-335 II.23.3) starts with the prolog
//! `0x0001`, followed by the constructor's positional arguments, a
//! `u16` count of named arguments, and the named arguments themselves.
//! Constructor signatures are not resolved here; instead the well-known
//! assembly attributes get dedicated decoders and everything else falls
//! back to an optimistic string decode.

use tracing::debug;

use postmortem_common::has_binary_controls;
use postmortem_report::AssemblyAttribute;

use super::blob::decode_ser_string;
use super::tables::{
    decode_coded_index, TableType, CUSTOM_ATTRIBUTE_TYPE_TABLES, HAS_CUSTOM_ATTRIBUTE_TABLES,
    MEMBER_REF_PARENT_TABLES,
};
use super::MetadataImage;

/// Placeholder for values that did not decode to clean text.
const BINARY_VALUE: &str = "<binary>";

/// Named flags of `DebuggableAttribute`'s `DebuggingModes`.
const DEBUGGING_MODES: &[(i32, &str)] = &[
    (1, "Default"),
    (2, "IgnoreSymbolStoreSequencePoints"),
    (4, "EnableEditAndContinue"),
    (256, "DisableOptimizations"),
];

/// Attributes whose constructor takes a single string.
const STRING_ATTRIBUTES: &[&str] = &[
    "AssemblyTitleAttribute",
    "AssemblyDescriptionAttribute",
    "AssemblyConfigurationAttribute",
    "AssemblyCompanyAttribute",
    "AssemblyProductAttribute",
    "AssemblyCopyrightAttribute",
    "AssemblyTrademarkAttribute",
    "AssemblyCultureAttribute",
    "AssemblyVersionAttribute",
    "AssemblyFileVersionAttribute",
    "AssemblyInformationalVersionAttribute",
    "AssemblyKeyFileAttribute",
    "AssemblyKeyNameAttribute",
    "AssemblyDefaultAliasAttribute",
    "AssemblySignatureKeyAttribute",
    "InternalsVisibleToAttribute",
    "GuidAttribute",
];

/// Attributes whose constructor takes a single bool.
const BOOL_ATTRIBUTES: &[&str] = &[
    "CLSCompliantAttribute",
    "ComVisibleAttribute",
    "AssemblyDelaySignAttribute",
];

struct BlobReader<'data> {
    data: &'data [u8],
}

impl<'data> BlobReader<'data> {
    fn new(data: &'data [u8]) -> Self {
        BlobReader { data }
    }

    fn read_u8(&mut self) -> Option<u8> {
        let (first, rest) = self.data.split_first()?;
        self.data = rest;
        Some(*first)
    }

    fn read_u16(&mut self) -> Option<u16> {
        let bytes = self.data.get(..2)?;
        self.data = &self.data[2..];
        Some(u16::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Option<i32> {
        let bytes = self.data.get(..4)?;
        self.data = &self.data[4..];
        Some(i32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_bool(&mut self) -> Option<bool> {
        self.read_u8().map(|b| b != 0)
    }

    fn read_string(&mut self) -> Option<Option<&'data str>> {
        let (value, rest) = decode_ser_string(self.data).ok()?;
        self.data = rest;
        Some(value)
    }

    /// Checks and consumes the `0x0001` prolog.
    fn read_prolog(&mut self) -> Option<()> {
        (self.read_u16()? == 0x0001).then_some(())
    }
}

/// One named argument of a custom attribute.
struct NamedArg<'data> {
    name: &'data str,
    value: String,
}

/// Reads the trailing named arguments `(kind, elem_type, name, value)`.
fn read_named_args<'data>(reader: &mut BlobReader<'data>) -> Vec<NamedArg<'data>> {
    const FIELD: u8 = 0x53;
    const PROPERTY: u8 = 0x54;
    const ELEM_BOOL: u8 = 0x02;
    const ELEM_I4: u8 = 0x08;
    const ELEM_STRING: u8 = 0x0E;

    let mut args = Vec::new();
    let Some(count) = reader.read_u16() else {
        return args;
    };

    for _ in 0..count {
        let Some(kind) = reader.read_u8() else { break };
        if kind != FIELD && kind != PROPERTY {
            break;
        }
        let Some(elem_type) = reader.read_u8() else {
            break;
        };
        let Some(Some(name)) = reader.read_string() else {
            break;
        };
        let value = match elem_type {
            ELEM_BOOL => match reader.read_bool() {
                Some(v) => v.to_string(),
                None => break,
            },
            ELEM_I4 => match reader.read_i32() {
                Some(v) => v.to_string(),
                None => break,
            },
            ELEM_STRING => match reader.read_string() {
                Some(Some(v)) => v.to_owned(),
                Some(None) => String::new(),
                None => break,
            },
            _ => break,
        };
        args.push(NamedArg { name, value });
    }
    args
}

fn debugging_modes_display(flags: i32) -> String {
    let mut names = Vec::new();
    let mut remaining = flags;
    for (bit, name) in DEBUGGING_MODES {
        if flags & bit != 0 {
            names.push(*name);
            remaining &= !bit;
        }
    }
    if names.is_empty() {
        return flags.to_string();
    }
    let mut display = names.join(", ");
    if remaining != 0 {
        display.push_str(&format!(", {remaining}"));
    }
    display
}

fn sanitize(value: String) -> String {
    if has_binary_controls(&value) {
        BINARY_VALUE.to_owned()
    } else {
        value
    }
}

/// Decodes one attribute blob given the attribute's simple type name.
fn decode_blob(simple_name: &str, blob: &[u8]) -> (Option<String>, Option<String>) {
    let mut reader = BlobReader::new(blob);
    if reader.read_prolog().is_none() {
        return (Some(BINARY_VALUE.to_owned()), None);
    }

    if simple_name == "AssemblyMetadataAttribute" {
        let key = reader.read_string().flatten().map(str::to_owned);
        let value = reader.read_string().flatten().map(str::to_owned);
        return (value.map(sanitize), key.map(sanitize));
    }

    if simple_name == "DebuggableAttribute" {
        // (DebuggingModes) constructor; the legacy (bool, bool) form has
        // a two-byte payload
        if blob.len().saturating_sub(4) >= 4 {
            if let Some(flags) = reader.read_i32() {
                return (Some(debugging_modes_display(flags)), None);
            }
        }
        let jit_tracking = reader.read_bool();
        let jit_opt = reader.read_bool();
        if let (Some(tracking), Some(disable_opt)) = (jit_tracking, jit_opt) {
            return (
                Some(format!(
                    "JITTrackingEnabled={tracking}, IsJITOptimizerDisabled={disable_opt}"
                )),
                None,
            );
        }
        return (Some(BINARY_VALUE.to_owned()), None);
    }

    if simple_name == "CompilationRelaxationsAttribute" {
        return match reader.read_i32() {
            Some(8) => (Some("NoStringInterning".to_owned()), None),
            Some(other) => (Some(other.to_string()), None),
            None => (Some(BINARY_VALUE.to_owned()), None),
        };
    }

    if simple_name == "RuntimeCompatibilityAttribute" {
        let args = read_named_args(&mut reader);
        if args.is_empty() {
            return (None, None);
        }
        let display = args
            .iter()
            .map(|arg| format!("{}={}", arg.name, arg.value))
            .collect::<Vec<_>>()
            .join(", ");
        return (Some(sanitize(display)), None);
    }

    if simple_name == "TargetFrameworkAttribute" {
        let framework = reader.read_string().flatten().map(str::to_owned);
        let display_name = read_named_args(&mut reader)
            .into_iter()
            .find(|arg| arg.name == "FrameworkDisplayName")
            .map(|arg| arg.value)
            .filter(|v| !v.is_empty());
        let value = match (framework, display_name) {
            (Some(framework), Some(display)) => Some(format!("{framework} ({display})")),
            (Some(framework), None) => Some(framework),
            (None, _) => None,
        };
        return (value.map(sanitize), None);
    }

    if BOOL_ATTRIBUTES.contains(&simple_name) {
        return match reader.read_bool() {
            Some(value) => (Some(value.to_string()), None),
            None => (Some(BINARY_VALUE.to_owned()), None),
        };
    }

    if STRING_ATTRIBUTES.contains(&simple_name) {
        return match reader.read_string() {
            Some(Some(value)) => (Some(sanitize(value.to_owned())), None),
            Some(None) => (None, None),
            None => (Some(BINARY_VALUE.to_owned()), None),
        };
    }

    // unknown attribute: optimistic string decode
    match reader.read_string() {
        Some(Some(value)) if !value.is_empty() => (Some(sanitize(value.to_owned())), None),
        Some(_) => (None, None),
        None => (Some(BINARY_VALUE.to_owned()), None),
    }
}

/// Resolves the attribute constructor's declaring type to a fully
/// qualified name.
fn resolve_attribute_type(image: &MetadataImage<'_>, type_index: u32) -> Option<String> {
    let tables = image.tables().ok()?;
    let (table, row) = decode_coded_index(type_index, &CUSTOM_ATTRIBUTE_TYPE_TABLES)?;

    let (name_offset, namespace_offset) = match table {
        TableType::MemberRef => {
            let class = tables.get_cell_u32(TableType::MemberRef, row, 1).ok()?;
            let (parent_table, parent_row) = decode_coded_index(class, &MEMBER_REF_PARENT_TABLES)?;
            match parent_table {
                TableType::TypeRef => (
                    tables.get_cell_u32(TableType::TypeRef, parent_row, 2).ok()?,
                    tables.get_cell_u32(TableType::TypeRef, parent_row, 3).ok()?,
                ),
                TableType::TypeDef => (
                    tables.get_cell_u32(TableType::TypeDef, parent_row, 2).ok()?,
                    tables.get_cell_u32(TableType::TypeDef, parent_row, 3).ok()?,
                ),
                _ => return None,
            }
        }
        TableType::MethodDef => {
            // find the TypeDef whose method list contains this method
            let type_def_rows = tables[TableType::TypeDef].rows;
            let mut owner = None;
            for candidate in 1..=type_def_rows {
                let method_list =
                    tables.get_cell_u32(TableType::TypeDef, candidate, 6).ok()? as usize;
                if method_list <= row {
                    owner = Some(candidate);
                } else {
                    break;
                }
            }
            let owner = owner?;
            (
                tables.get_cell_u32(TableType::TypeDef, owner, 2).ok()?,
                tables.get_cell_u32(TableType::TypeDef, owner, 3).ok()?,
            )
        }
        _ => return None,
    };

    let name = image.get_string(name_offset).ok()?;
    let namespace = image.get_string(namespace_offset).ok()?;
    if namespace.is_empty() {
        Some(name.to_owned())
    } else {
        Some(format!("{namespace}.{name}"))
    }
}

/// Decodes all custom attributes attached to the Assembly row.
pub(crate) fn decode_assembly_attributes(image: &MetadataImage<'_>) -> Vec<AssemblyAttribute> {
    let Ok(tables) = image.tables() else {
        return Vec::new();
    };

    let mut attributes = Vec::new();
    for row in 1..=tables[TableType::CustomAttribute].rows {
        let Ok(parent) = tables.get_cell_u32(TableType::CustomAttribute, row, 1) else {
            continue;
        };
        match decode_coded_index(parent, &HAS_CUSTOM_ATTRIBUTE_TABLES) {
            Some((TableType::Assembly, 1)) => {}
            _ => continue,
        }

        let Ok(type_index) = tables.get_cell_u32(TableType::CustomAttribute, row, 2) else {
            continue;
        };
        let Some(type_name) = resolve_attribute_type(image, type_index) else {
            debug!(row, "skipping custom attribute with unresolvable type");
            continue;
        };

        let Ok(value_offset) = tables.get_cell_u32(TableType::CustomAttribute, row, 3) else {
            continue;
        };
        let (value, key) = match image.get_blob(value_offset) {
            Ok(blob) => {
                let simple_name = type_name.rsplit('.').next().unwrap_or(&type_name);
                decode_blob(simple_name, blob)
            }
            Err(_) => (Some(BINARY_VALUE.to_owned()), None),
        };

        attributes.push(AssemblyAttribute {
            attribute_type: type_name,
            value,
            key,
        });
    }
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_with_prolog(payload: &[u8]) -> Vec<u8> {
        let mut blob = vec![0x01, 0x00];
        blob.extend_from_slice(payload);
        blob
    }

    #[test]
    fn test_decode_metadata_attribute() {
        // two SerStrings: "Commit", "abc123"
        let mut payload = Vec::new();
        payload.push(6);
        payload.extend_from_slice(b"Commit");
        payload.push(6);
        payload.extend_from_slice(b"abc123");
        payload.extend_from_slice(&[0x00, 0x00]);

        let blob = blob_with_prolog(&payload);
        let (value, key) = decode_blob("AssemblyMetadataAttribute", &blob);
        assert_eq!(key.as_deref(), Some("Commit"));
        assert_eq!(value.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_decode_debuggable_flags() {
        let blob = blob_with_prolog(&[0x07, 0x01, 0x00, 0x00, 0x00, 0x00]);
        let (value, _) = decode_blob("DebuggableAttribute", &blob);
        assert_eq!(
            value.as_deref(),
            Some("Default, IgnoreSymbolStoreSequencePoints, EnableEditAndContinue, DisableOptimizations")
        );
    }

    #[test]
    fn test_decode_compilation_relaxations() {
        let blob = blob_with_prolog(&[0x08, 0x00, 0x00, 0x00, 0x00, 0x00]);
        let (value, _) = decode_blob("CompilationRelaxationsAttribute", &blob);
        assert_eq!(value.as_deref(), Some("NoStringInterning"));
    }

    #[test]
    fn test_decode_runtime_compatibility_named_arg() {
        // numNamed=1, property, bool, "WrapNonExceptionThrows", true
        let mut payload = vec![0x01, 0x00, 0x54, 0x02];
        payload.push(22);
        payload.extend_from_slice(b"WrapNonExceptionThrows");
        payload.push(0x01);

        let blob = blob_with_prolog(&payload);
        let (value, _) = decode_blob("RuntimeCompatibilityAttribute", &blob);
        assert_eq!(value.as_deref(), Some("WrapNonExceptionThrows=true"));
    }

    #[test]
    fn test_decode_target_framework() {
        let moniker = ".NETCoreApp,Version=v8.0";
        let display = ".NET 8.0";
        let mut payload = Vec::new();
        payload.push(moniker.len() as u8);
        payload.extend_from_slice(moniker.as_bytes());
        // one named string property FrameworkDisplayName
        payload.extend_from_slice(&[0x01, 0x00, 0x54, 0x0E]);
        payload.push(20);
        payload.extend_from_slice(b"FrameworkDisplayName");
        payload.push(display.len() as u8);
        payload.extend_from_slice(display.as_bytes());

        let blob = blob_with_prolog(&payload);
        let (value, _) = decode_blob("TargetFrameworkAttribute", &blob);
        assert_eq!(
            value.as_deref(),
            Some(".NETCoreApp,Version=v8.0 (.NET 8.0)")
        );
    }

    #[test]
    fn test_decode_bool_attribute() {
        let blob = blob_with_prolog(&[0x01, 0x00, 0x00]);
        let (value, _) = decode_blob("ComVisibleAttribute", &blob);
        assert_eq!(value.as_deref(), Some("true"));
    }

    #[test]
    fn test_unknown_attribute_binary_fallback() {
        let blob = blob_with_prolog(&[0x02, 0x00, 0x01]);
        let (value, _) = decode_blob("SomeVendorAttribute", &blob);
        assert_eq!(value.as_deref(), Some(BINARY_VALUE));
    }

    #[test]
    fn test_missing_prolog_is_binary() {
        let (value, _) = decode_blob("AssemblyTitleAttribute", &[0x00]);
        assert_eq!(value.as_deref(), Some(BINARY_VALUE));
    }
}
