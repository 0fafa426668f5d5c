//! Managed object inspection for interactive investigation.

use serde_json::{json, Map, Value};

use postmortem_common::format_hex_addr;

use crate::reader::{FieldValue, HeapReader};

/// Dereferences the object at `address` into a JSON tree.
///
/// Reference fields are followed up to `max_depth` levels (clamped to
/// `1..=5`); deeper references are rendered as `{"$ref": "0x…"}`.
/// Unreadable objects produce an error object instead of failing.
pub fn inspect_object(heap: &dyn HeapReader, address: u64, max_depth: usize) -> Value {
    inspect_inner(heap, address, max_depth.clamp(1, 5))
}

fn inspect_inner(heap: &dyn HeapReader, address: u64, depth: usize) -> Value {
    let hex_address = format_hex_addr(address);
    let Some(type_name) = heap.type_name(address) else {
        return json!({
            "error": format!("no managed object at {hex_address}"),
            "address": hex_address,
        });
    };

    let mut fields = Map::new();
    for field in heap.fields(address) {
        let value = match field.value {
            FieldValue::Primitive(text) => Value::String(text),
            FieldValue::Null => Value::Null,
            FieldValue::Object(target) => {
                if depth > 1 {
                    inspect_inner(heap, target, depth - 1)
                } else {
                    json!({ "$ref": format_hex_addr(target) })
                }
            }
        };
        fields.insert(field.name, value);
    }

    json!({
        "type": type_name,
        "address": hex_address,
        "fields": Value::Object(fields),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::RawSegmentKind;
    use crate::testutil::MockHeap;

    #[test]
    fn test_inspect_object_with_reference() {
        let mut heap = MockHeap::new(1);
        let seg = heap.add_segment(0x1000, 0x10000, RawSegmentKind::Gen0);
        heap.add_task(seg, 0x2000, 0x0020_0000);
        heap.set_faulted_exception(0x2000, "System.InvalidOperationException", "boom");

        let value = inspect_object(&heap, 0x2000, 3);
        assert_eq!(value["type"], "System.Threading.Tasks.Task");
        assert_eq!(value["address"], "0x2000");
        assert_eq!(value["fields"]["m_stateFlags"], "2097152");

        // the contingent properties chain resolves through references
        let contingent = &value["fields"]["m_contingentProperties"];
        assert_eq!(contingent["address"], "0x102000");
    }

    #[test]
    fn test_inspect_depth_clamp() {
        let mut heap = MockHeap::new(1);
        let seg = heap.add_segment(0x1000, 0x10000, RawSegmentKind::Gen0);
        heap.add_task(seg, 0x2000, 0);
        heap.set_faulted_exception(0x2000, "System.Exception", "x");

        // depth 0 clamps to 1: references are not followed
        let value = inspect_object(&heap, 0x2000, 0);
        let contingent = &value["fields"]["m_contingentProperties"];
        assert_eq!(contingent["$ref"], "0x102000");
    }

    #[test]
    fn test_inspect_missing_object() {
        let heap = MockHeap::new(1);
        let value = inspect_object(&heap, 0xdead, 3);
        assert!(value["error"]
            .as_str()
            .unwrap()
            .contains("no managed object at 0xdead"));
    }
}
