#![cfg_attr(not(test), no_std)]

// Binary trace record layout shared between the in-process tracer (writer)
// and the offline parsers (reader). The byte layout below is the single
// compatibility contract for the trace file: fixed 256-byte records, all
// integers little-endian, no file header or trailer.
//
// Byte map:
//
//   0   u64  timestamp_ns        nanoseconds since tracer init
//   8   u32  token_id            0-based token ordinal
//   12  u16  layer_id            transformer block, or LAYER_NONE
//   14  u16  thread_id           short id, stable within a run
//   16  u8   phase               PHASE_PROMPT | PHASE_GENERATE
//   17  u8   operation_type      engine op enum value, verbatim
//   18  u8   num_sources         0..=4 populated source slots
//   19  u8   num_experts         0..=8 populated expert ids
//   20  [20] dst_name            NUL-terminated, right-truncated
//   40  [52] source slot 0       see SourceSlot
//   92  [52] source slot 1
//   144 [52] source slot 2
//   196 [52] source slot 3
//   248 [8]  expert_ids          u8 per expert, routing-rank order
//
// Source slot layout (relative offsets):
//
//   0   [20] name                NUL-terminated, right-truncated
//   20  u64  ptr                 raw data pointer value
//   28  u32  size_bytes
//   32  u16  src_layer           transformer block, or LAYER_NONE
//   34  u8   memory_source       MEM_DISK | MEM_BUFFER
//   35  u8   padding (zero)
//   36  u64  offset_or_buffer_id file offset (DISK) or buffer id (BUFFER)
//   44  u64  reserved (zero)
//
// Unused source slots are fully zeroed. Fields are packed by explicit
// offset; struct layout of the types below is never written to disk.

/// Total size of one encoded record.
pub const RECORD_SIZE: usize = 256;

/// Width of a name field, including the terminating NUL. Stored names carry
/// at most `NAME_LEN - 1` bytes of content.
pub const NAME_LEN: usize = 20;

/// Maximum populated source slots per record.
pub const MAX_SOURCES: usize = 4;

/// Maximum recorded expert ids per record.
pub const MAX_EXPERTS: usize = 8;

/// Phase values.
pub const PHASE_PROMPT: u8 = 0;
pub const PHASE_GENERATE: u8 = 1;

/// Memory-source classes.
pub const MEM_DISK: u8 = 0;
pub const MEM_BUFFER: u8 = 1;

/// `layer_id` sentinel for tensors that do not belong to a transformer block.
pub const LAYER_NONE: u16 = 0xFFFF;

/// Buffer id reserved for "no alloc event known for this pointer".
pub const BUFFER_ID_UNKNOWN: u64 = 0;

const SLOT_SIZE: usize = 52;
const OFF_DST_NAME: usize = 20;
const OFF_SLOTS: usize = 40;
const OFF_EXPERTS: usize = 248;

// The expert array must land exactly at the end of the record.
const _: () = assert!(OFF_SLOTS + MAX_SOURCES * SLOT_SIZE == OFF_EXPERTS);
const _: () = assert!(OFF_EXPERTS + MAX_EXPERTS == RECORD_SIZE);

/// One populated source-tensor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSlot {
    pub name: [u8; NAME_LEN],
    pub ptr: u64,
    pub size_bytes: u32,
    pub src_layer: u16,
    pub memory_source: u8,
    pub offset_or_buffer_id: u64,
}

impl Default for SourceSlot {
    fn default() -> Self {
        Self {
            name: [0; NAME_LEN],
            ptr: 0,
            size_bytes: 0,
            src_layer: 0,
            memory_source: 0,
            offset_or_buffer_id: 0,
        }
    }
}

/// Decoded form of one trace record.
///
/// The in-process hook builds this on the stack and encodes it into a
/// caller-provided byte buffer; the offline parser decodes it back. Both
/// directions go through [`TraceRecord::encode`] / [`TraceRecord::decode`]
/// so there is exactly one place that knows the byte map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    pub timestamp_ns: u64,
    pub token_id: u32,
    pub layer_id: u16,
    pub thread_id: u16,
    pub phase: u8,
    pub operation_type: u8,
    pub num_sources: u8,
    pub num_experts: u8,
    pub dst_name: [u8; NAME_LEN],
    pub sources: [SourceSlot; MAX_SOURCES],
    pub expert_ids: [u8; MAX_EXPERTS],
}

impl Default for TraceRecord {
    fn default() -> Self {
        Self {
            timestamp_ns: 0,
            token_id: 0,
            layer_id: LAYER_NONE,
            thread_id: 0,
            phase: PHASE_PROMPT,
            operation_type: 0,
            num_sources: 0,
            num_experts: 0,
            dst_name: [0; NAME_LEN],
            sources: [SourceSlot::default(); MAX_SOURCES],
            expert_ids: [0; MAX_EXPERTS],
        }
    }
}

impl TraceRecord {
    /// Encode into a 256-byte buffer. Unused source slots come out fully
    /// zeroed regardless of what the struct holds for them.
    pub fn encode(&self, out: &mut [u8; RECORD_SIZE]) {
        *out = [0; RECORD_SIZE];
        put_u64(out, 0, self.timestamp_ns);
        put_u32(out, 8, self.token_id);
        put_u16(out, 12, self.layer_id);
        put_u16(out, 14, self.thread_id);
        out[16] = self.phase;
        out[17] = self.operation_type;
        out[18] = self.num_sources;
        out[19] = self.num_experts;
        out[OFF_DST_NAME..OFF_DST_NAME + NAME_LEN].copy_from_slice(&self.dst_name);

        for (i, slot) in self.sources.iter().enumerate().take(self.num_sources as usize) {
            let base = OFF_SLOTS + i * SLOT_SIZE;
            out[base..base + NAME_LEN].copy_from_slice(&slot.name);
            put_u64(out, base + 20, slot.ptr);
            put_u32(out, base + 28, slot.size_bytes);
            put_u16(out, base + 32, slot.src_layer);
            out[base + 34] = slot.memory_source;
            // base + 35 is padding, base + 44 is reserved; both stay zero
            put_u64(out, base + 36, slot.offset_or_buffer_id);
        }

        out[OFF_EXPERTS..OFF_EXPERTS + MAX_EXPERTS].copy_from_slice(&self.expert_ids);
    }

    /// Decode from a 256-byte buffer.
    #[must_use]
    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Self {
        let mut rec = Self {
            timestamp_ns: get_u64(buf, 0),
            token_id: get_u32(buf, 8),
            layer_id: get_u16(buf, 12),
            thread_id: get_u16(buf, 14),
            phase: buf[16],
            operation_type: buf[17],
            num_sources: buf[18].min(MAX_SOURCES as u8),
            num_experts: buf[19].min(MAX_EXPERTS as u8),
            dst_name: [0; NAME_LEN],
            sources: [SourceSlot::default(); MAX_SOURCES],
            expert_ids: [0; MAX_EXPERTS],
        };
        rec.dst_name.copy_from_slice(&buf[OFF_DST_NAME..OFF_DST_NAME + NAME_LEN]);

        for i in 0..rec.num_sources as usize {
            let base = OFF_SLOTS + i * SLOT_SIZE;
            let mut name = [0u8; NAME_LEN];
            name.copy_from_slice(&buf[base..base + NAME_LEN]);
            rec.sources[i] = SourceSlot {
                name,
                ptr: get_u64(buf, base + 20),
                size_bytes: get_u32(buf, base + 28),
                src_layer: get_u16(buf, base + 32),
                memory_source: buf[base + 34],
                offset_or_buffer_id: get_u64(buf, base + 36),
            };
        }

        rec.expert_ids.copy_from_slice(&buf[OFF_EXPERTS..OFF_EXPERTS + MAX_EXPERTS]);
        rec
    }
}

/// Copy `full` into a NUL-terminated fixed name field, right-truncating to
/// `NAME_LEN - 1` bytes. Truncation is expected; the offline pipeline
/// reconstructs full names against the model layout.
#[must_use]
pub fn truncate_name(full: &str) -> [u8; NAME_LEN] {
    let mut out = [0u8; NAME_LEN];
    let bytes = full.as_bytes();
    let n = bytes.len().min(NAME_LEN - 1);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// Read a NUL-terminated name field back as a string slice. Returns an
/// empty string if the bytes are not valid UTF-8.
#[must_use]
pub fn name_str(field: &[u8; NAME_LEN]) -> &str {
    let len = field.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    core::str::from_utf8(&field[..len]).unwrap_or("")
}

fn put_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn get_u64(buf: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn get_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}
