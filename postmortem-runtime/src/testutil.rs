//! In-memory heap fixture used by unit tests.

use std::collections::HashMap;

use crate::reader::{
    FieldValue, HeapObject, HeapReader, HeapSegment, ObjectField, RawSegmentKind,
};

/// A scriptable [`HeapReader`] built up object by object.
#[derive(Default)]
pub(crate) struct MockHeap {
    heap_count: usize,
    segments: Vec<HeapSegment>,
    objects: Vec<Vec<HeapObject>>,
    strings: HashMap<u64, String>,
    i32_fields: HashMap<(u64, String), i32>,
    string_fields: HashMap<(u64, String), String>,
    object_fields: HashMap<(u64, String), u64>,
    type_names: HashMap<u64, String>,
    finalizable: Option<u64>,
}

impl MockHeap {
    pub fn new(heap_count: usize) -> Self {
        MockHeap {
            heap_count,
            ..Default::default()
        }
    }

    pub fn add_segment(&mut self, address: u64, size: u64, kind: RawSegmentKind) -> usize {
        let index = self.segments.len();
        self.segments.push(HeapSegment {
            address,
            size,
            kind,
            heap_index: index % self.heap_count.max(1),
        });
        self.objects.push(Vec::new());
        index
    }

    pub fn add_object(&mut self, segment: usize, address: u64, size: u64, type_name: &str) {
        self.objects[segment].push(HeapObject {
            address,
            size,
            type_name: type_name.to_owned(),
            is_free: false,
        });
        self.type_names.insert(address, type_name.to_owned());
    }

    pub fn add_free(&mut self, segment: usize, address: u64, size: u64) {
        self.objects[segment].push(HeapObject {
            address,
            size,
            type_name: "Free".to_owned(),
            is_free: true,
        });
    }

    pub fn add_string(&mut self, segment: usize, address: u64, size: u64, content: &str) {
        self.add_object(segment, address, size, "System.String");
        self.strings.insert(address, content.to_owned());
    }

    pub fn add_task(&mut self, segment: usize, address: u64, state_flags: i32) {
        self.add_object(segment, address, 64, "System.Threading.Tasks.Task");
        self.set_i32_field(address, "m_stateFlags", state_flags);
    }

    pub fn set_i32_field(&mut self, address: u64, field: &str, value: i32) {
        self.i32_fields.insert((address, field.to_owned()), value);
    }

    /// Wires the `m_contingentProperties → m_exceptionsHolder →
    /// m_faultException` chain for a faulted task, using synthetic
    /// addresses derived from the task address.
    pub fn set_faulted_exception(&mut self, task: u64, exception_type: &str, message: &str) {
        let contingent = task + 0x10_0000;
        let holder = task + 0x20_0000;
        let exception = task + 0x30_0000;

        self.object_fields
            .insert((task, "m_contingentProperties".to_owned()), contingent);
        self.object_fields
            .insert((contingent, "m_exceptionsHolder".to_owned()), holder);
        self.object_fields
            .insert((holder, "m_faultException".to_owned()), exception);
        self.type_names.insert(exception, exception_type.to_owned());
        self.string_fields
            .insert((exception, "_message".to_owned()), message.to_owned());
    }

    pub fn set_finalizable(&mut self, count: u64) {
        self.finalizable = Some(count);
    }
}

impl HeapReader for MockHeap {
    fn segments(&self) -> Vec<HeapSegment> {
        self.segments.clone()
    }

    fn heap_count(&self) -> usize {
        self.heap_count
    }

    fn objects(&self, segment: &HeapSegment) -> Box<dyn Iterator<Item = HeapObject> + '_> {
        let index = self
            .segments
            .iter()
            .position(|s| s.address == segment.address)
            .unwrap_or(0);
        Box::new(self.objects[index].iter().cloned())
    }

    fn string_length(&self, object: &HeapObject) -> Option<u64> {
        self.strings
            .get(&object.address)
            .map(|s| s.chars().count() as u64)
    }

    fn string_value(&self, object: &HeapObject) -> Option<String> {
        self.strings.get(&object.address).cloned()
    }

    fn read_i32_field(&self, address: u64, field: &str) -> Option<i32> {
        self.i32_fields.get(&(address, field.to_owned())).copied()
    }

    fn read_string_field(&self, address: u64, field: &str) -> Option<String> {
        self.string_fields.get(&(address, field.to_owned())).cloned()
    }

    fn read_object_field(&self, address: u64, field: &str) -> Option<u64> {
        self.object_fields.get(&(address, field.to_owned())).copied()
    }

    fn type_name(&self, address: u64) -> Option<String> {
        self.type_names.get(&address).cloned()
    }

    fn fields(&self, address: u64) -> Vec<ObjectField> {
        let mut fields = Vec::new();
        for ((addr, name), value) in &self.i32_fields {
            if *addr == address {
                fields.push(ObjectField {
                    name: name.clone(),
                    type_name: "System.Int32".to_owned(),
                    value: FieldValue::Primitive(value.to_string()),
                });
            }
        }
        for ((addr, name), value) in &self.string_fields {
            if *addr == address {
                fields.push(ObjectField {
                    name: name.clone(),
                    type_name: "System.String".to_owned(),
                    value: FieldValue::Primitive(value.clone()),
                });
            }
        }
        for ((addr, name), target) in &self.object_fields {
            if *addr == address {
                fields.push(ObjectField {
                    name: name.clone(),
                    type_name: self
                        .type_names
                        .get(target)
                        .cloned()
                        .unwrap_or_else(|| "System.Object".to_owned()),
                    value: if *target == 0 {
                        FieldValue::Null
                    } else {
                        FieldValue::Object(*target)
                    },
                });
            }
        }
        fields.sort_by(|a, b| a.name.cmp(&b.name));
        fields
    }

    fn finalizable_count(&self) -> Option<u64> {
        self.finalizable
    }
}
