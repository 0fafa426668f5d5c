//! Traits modeling read access to the managed side of an opened dump.
//!
//! The concrete implementation sits on top of the dump transport and
//! the runtime's debugging data access layer; both are external
//! collaborators. Implementations must tolerate partially corrupt
//! dumps: every accessor is fallible and per-object failures surface as
//! `None`, never as panics.

/// A module loaded into the managed runtime.
#[derive(Clone, Debug)]
pub struct ManagedModule {
    /// Short module name, e.g. `MyApp.dll`.
    pub name: String,
    /// Full path on the capturing machine.
    pub path: Option<String>,
    /// Image base address.
    pub base_address: u64,
    /// Image size in bytes.
    pub size: u64,
    /// Whether the module was emitted at runtime.
    pub is_dynamic: bool,
    /// Whether the module is a PE file with a metadata directory.
    pub is_pe_file: bool,
    /// Address of the metadata root within the dump.
    pub metadata_address: u64,
    /// Length of the metadata in bytes.
    pub metadata_length: u64,
}

/// Heap segment kinds as reported by the runtime, before summary
/// classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawSegmentKind {
    /// Generation 0.
    Gen0,
    /// Generation 1.
    Gen1,
    /// Generation 2.
    Gen2,
    /// Large object segment.
    Large,
    /// Pinned object segment.
    Pinned,
    /// Frozen segment (merged into generation 2 for summaries).
    Frozen,
}

/// One heap segment.
#[derive(Clone, Debug)]
pub struct HeapSegment {
    /// Segment start address.
    pub address: u64,
    /// Committed size in bytes.
    pub size: u64,
    /// Segment kind.
    pub kind: RawSegmentKind,
    /// Index of the owning subheap (server GC has several).
    pub heap_index: usize,
}

/// One object encountered during heap traversal.
#[derive(Clone, Debug)]
pub struct HeapObject {
    /// Object address.
    pub address: u64,
    /// Object size in bytes.
    pub size: u64,
    /// Fully qualified runtime type name.
    pub type_name: String,
    /// Whether this is a free block rather than a live object.
    pub is_free: bool,
}

/// One field of an inspected object.
#[derive(Clone, Debug)]
pub struct ObjectField {
    /// Field name.
    pub name: String,
    /// Declared field type name.
    pub type_name: String,
    /// Field value.
    pub value: FieldValue,
}

/// The value of an object field.
#[derive(Clone, Debug)]
pub enum FieldValue {
    /// A primitive rendered as text (numbers, bools, enums, strings).
    Primitive(String),
    /// A reference to another heap object.
    Object(u64),
    /// A null reference.
    Null,
}

/// Read access to the managed heap of an opened dump.
///
/// Implementations are shared across worker threads during the combined
/// heap pass and must therefore be `Sync`.
pub trait HeapReader: Sync {
    /// All heap segments.
    fn segments(&self) -> Vec<HeapSegment>;

    /// Number of subheaps (1 for workstation GC).
    fn heap_count(&self) -> usize;

    /// Iterates the objects of one segment in address order.
    fn objects(&self, segment: &HeapSegment) -> Box<dyn Iterator<Item = HeapObject> + '_>;

    /// Character length of a string object, read from its length field.
    fn string_length(&self, object: &HeapObject) -> Option<u64>;

    /// Content of a string object.
    fn string_value(&self, object: &HeapObject) -> Option<String>;

    /// Reads an `i32` field of the object at `address`.
    fn read_i32_field(&self, address: u64, field: &str) -> Option<i32>;

    /// Reads a string-typed field of the object at `address`.
    fn read_string_field(&self, address: u64, field: &str) -> Option<String>;

    /// Follows a reference field of the object at `address`.
    fn read_object_field(&self, address: u64, field: &str) -> Option<u64>;

    /// Runtime type name of the object at `address`.
    fn type_name(&self, address: u64) -> Option<String>;

    /// Enumerates the fields of the object at `address`.
    fn fields(&self, address: u64) -> Vec<ObjectField>;

    /// Number of objects on the finalizer queue, best effort.
    fn finalizable_count(&self) -> Option<u64>;
}

/// Read access to the managed runtime located inside an opened dump.
pub trait RuntimeReader: Sync {
    /// Version string of the located runtime.
    fn runtime_version(&self) -> Option<String>;

    /// All modules loaded into the runtime.
    fn modules(&self) -> Vec<ManagedModule>;

    /// Raw metadata bytes of a module, when readable.
    fn metadata_bytes(&self, module: &ManagedModule) -> Option<Vec<u8>>;

    /// The managed heap, when the runtime exposes one.
    fn heap(&self) -> Option<&dyn HeapReader>;

    /// Pairs of `(os thread id as lowercase hex, managed thread id)`.
    fn managed_thread_ids(&self) -> Vec<(String, i32)>;
}
