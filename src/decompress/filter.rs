//! Post-processing filters and the pending-filter queue.
//!
//! RAR5 replaces the RAR4 filter VM with four fixed transforms: DELTA
//! (per-channel reverse prefix sum), E8 / E8E9 (x86 near CALL/JMP address
//! unbiasing with 24-bit wrap) and ARM (BL branch rewriting). A filter
//! descriptor enters the stream through main symbol 256 and applies to a
//! contiguous range of the output, addressed in LZ coordinates.

use std::collections::VecDeque;
use std::io::Read;

use super::bit_reader::BitReader;

/// Hard cap on the size of one filtered range.
pub const FILTER_BLOCK_SIZE_MAX: usize = 1 << 22;
/// Hard cap on pending filters before the stream counts as unsupported.
pub const MAX_UNPACK_FILTERS: usize = 8192;
/// Slack appended to the staging buffer.
pub const FILTER_AFTERPAD_SIZE: usize = 64;

/// Known filter transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    /// Interleaved-channel reverse prefix sum (audio, images)
    Delta,
    /// x86 CALL address unbiasing
    E8,
    /// x86 CALL and JMP address unbiasing
    E8E9,
    /// ARM BL branch rewriting
    Arm,
}

impl FilterType {
    /// Map the 3-bit wire value; anything else is an unknown filter.
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(Self::Delta),
            1 => Some(Self::E8),
            2 => Some(Self::E8E9),
            3 => Some(Self::Arm),
            _ => None,
        }
    }
}

/// One pending filter.
#[derive(Debug, Clone)]
pub struct UnpackFilter {
    /// First affected byte, as an LZ coordinate.
    pub start_pos: u64,
    /// Length of the affected range in bytes.
    pub size: usize,
    /// `None` for an unknown wire type; the range is zeroed on apply.
    pub filter_type: Option<FilterType>,
    /// Interleaved channel count, DELTA only (1..=32).
    pub channels: usize,
}

/// Read a 1..4-byte little-endian unsigned integer: a 2-bit byte-count
/// selector followed by that many bytes.
fn read_vuint32<R: Read>(br: &mut BitReader<R>) -> u32 {
    let num_bits = (br.read_bits9_fix(2) * 8) + 8;
    let mut v = 0u32;
    let mut i = 0;
    loop {
        v += br.read_bits9_fix(8) << i;
        i += 8;
        if i == num_bits {
            return v;
        }
    }
}

/// Ordered queue of pending filters plus the staging buffers the output
/// stager fills from the window.
pub struct FilterPipeline {
    queue: VecDeque<UnpackFilter>,
    /// End of the most recently registered filter; new filters may not
    /// start before it.
    filter_end: u64,
    /// An unknown type, overlap, oversize or saturation was seen; the file
    /// fails once decoding completes.
    pub unsupported: bool,
    /// Window bytes staged for the front filter.
    source_buf: Vec<u8>,
    /// DELTA writes de-interleaved output here.
    dest_buf: Vec<u8>,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            filter_end: 0,
            unsupported: false,
            source_buf: Vec::new(),
            dest_buf: Vec::new(),
        }
    }

    /// Drop all pending filters and reset the overlap fence. Keeps the
    /// unsupported flag: that is a per-file verdict.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.filter_end = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_saturated(&self) -> bool {
        self.queue.len() >= MAX_UNPACK_FILTERS
    }

    pub fn front(&self) -> Option<&UnpackFilter> {
        self.queue.front()
    }

    pub fn pop_front(&mut self) -> Option<UnpackFilter> {
        self.queue.pop_front()
    }

    /// Parse one filter descriptor from the bit stream and enqueue it.
    /// `cur_lz_pos` is the LZ coordinate of the current window position.
    ///
    /// Oversized, overlapping and zero-size filters are dropped here; the
    /// first two also mark the stream unsupported.
    pub fn register<R: Read>(&mut self, br: &mut BitReader<R>, cur_lz_pos: u64) {
        br.prepare();

        let start_delta = u64::from(read_vuint32(br));
        let mut size = read_vuint32(br) as usize;
        if size > FILTER_BLOCK_SIZE_MAX {
            self.unsupported = true;
            size = 0;
        }

        let type_bits = br.read_bits9_fix(3);
        let filter_type = FilterType::from_bits(type_bits);
        let channels = if filter_type == Some(FilterType::Delta) {
            br.read_bits9_fix(5) as usize + 1
        } else {
            0
        };

        let start_pos = cur_lz_pos + start_delta;
        if start_pos < self.filter_end {
            self.unsupported = true;
            return;
        }

        self.filter_end = start_pos + size as u64;
        if size != 0 && self.queue.len() < MAX_UNPACK_FILTERS {
            self.queue.push_back(UnpackFilter {
                start_pos,
                size,
                filter_type,
                channels,
            });
        }
    }

    #[cfg(test)]
    pub(crate) fn push_for_test(&mut self, filter: UnpackFilter) {
        self.filter_end = filter.start_pos + filter.size as u64;
        self.queue.push_back(filter);
    }

    /// Grow the staging buffer for a filter of `size` bytes and return it.
    pub fn staging_buffer(&mut self, size: usize) -> &mut [u8] {
        let need = size + FILTER_AFTERPAD_SIZE;
        if self.source_buf.len() < need {
            self.source_buf.resize(need, 0);
        }
        &mut self.source_buf
    }

    /// Run `filter` over its staged bytes and return the transformed slice.
    /// `file_offset` is the filter's start relative to the file's first
    /// output byte.
    pub fn apply(&mut self, filter: &UnpackFilter, file_offset: u64) -> &[u8] {
        let size = filter.size;

        match filter.filter_type {
            Some(FilterType::Delta) => {
                if self.dest_buf.len() < size {
                    self.dest_buf.resize(size, 0);
                }
                delta_decode(
                    &self.source_buf[..size],
                    filter.channels,
                    &mut self.dest_buf[..size],
                );
                &self.dest_buf[..size]
            }
            Some(FilterType::E8) => {
                e8_decode(&mut self.source_buf[..size], file_offset as u32, false);
                &self.source_buf[..size]
            }
            Some(FilterType::E8E9) => {
                e8_decode(&mut self.source_buf[..size], file_offset as u32, true);
                &self.source_buf[..size]
            }
            Some(FilterType::Arm) => {
                arm_decode(&mut self.source_buf[..size], file_offset as u32);
                &self.source_buf[..size]
            }
            None => {
                self.unsupported = true;
                self.source_buf[..size].fill(0);
                &self.source_buf[..size]
            }
        }
    }
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconstruct `channels` interleaved streams by reverse prefix sum.
fn delta_decode(src: &[u8], channels: usize, dest: &mut [u8]) {
    let size = src.len();
    let mut src_idx = 0;

    for channel in 0..channels {
        let mut prev = 0u8;
        let mut dest_idx = channel;
        while dest_idx < size {
            prev = prev.wrapping_sub(src[src_idx]);
            src_idx += 1;
            dest[dest_idx] = prev;
            dest_idx += channels;
        }
    }
}

/// Undo the x86 CALL (and, for E8E9, JMP) address bias with 24-bit wrap.
fn e8_decode(data: &mut [u8], file_offset: u32, include_e9: bool) {
    const FILE_SIZE: u32 = 1 << 24;

    if data.len() <= 4 {
        return;
    }

    let end = data.len() - 4;
    let mut i = 0;
    while i < end {
        let opcode = data[i];
        i += 1;
        if opcode != 0xE8 && (!include_e9 || opcode != 0xE9) {
            continue;
        }

        let offset = (i as u32).wrapping_add(file_offset) & (FILE_SIZE - 1);
        let mut addr = u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);

        if addr < FILE_SIZE {
            addr = addr.wrapping_sub(offset);
        } else if addr >= offset.wrapping_neg() {
            addr = addr.wrapping_add(FILE_SIZE);
        } else {
            i += 4;
            continue;
        }

        data[i..i + 4].copy_from_slice(&addr.to_le_bytes());
        i += 4;
    }
}

/// Rewrite ARM BL instructions from absolute back to relative targets.
/// Operates on whole words; a trailing partial word is left untouched.
fn arm_decode(data: &mut [u8], pc: u32) {
    let size = data.len() & !3;
    let mut i = 0;
    while i < size {
        if data[i + 3] == 0xEB {
            let instr = u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
            let offset = pc.wrapping_add(i as u32) >> 2;
            let instr = (instr & 0xFF00_0000) | (instr.wrapping_sub(offset) & 0x00FF_FFFF);
            data[i..i + 4].copy_from_slice(&instr.to_le_bytes());
        }
        i += 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_types() {
        assert_eq!(FilterType::from_bits(0), Some(FilterType::Delta));
        assert_eq!(FilterType::from_bits(1), Some(FilterType::E8));
        assert_eq!(FilterType::from_bits(2), Some(FilterType::E8E9));
        assert_eq!(FilterType::from_bits(3), Some(FilterType::Arm));
        assert_eq!(FilterType::from_bits(4), None);
    }

    #[test]
    fn delta_single_channel() {
        let src = [5u8, 3, 2, 1];
        let mut dest = [0u8; 4];
        delta_decode(&src, 1, &mut dest);
        // Running prev - src[i], wrapping: 251, 248, 246, 245.
        assert_eq!(dest, [251, 248, 246, 245]);
    }

    #[test]
    fn delta_two_channels_interleave() {
        // Channel 0 deltas then channel 1 deltas, grouped in the source.
        let src = [1u8, 1, 1, 2, 2, 2];
        let mut dest = [0u8; 6];
        delta_decode(&src, 2, &mut dest);
        // Channel 0 -> positions 0,2,4: 255, 254, 253.
        // Channel 1 -> positions 1,3,5: 254, 252, 250.
        assert_eq!(dest, [255, 254, 254, 252, 253, 250]);
    }

    #[test]
    fn e8_small_address_unbiased() {
        // CALL with stored address 5 at file offset 0: the instruction
        // byte sits at 0, its operand at 1, so 5 becomes 5 - 1 = 4.
        let mut data = [
            0xE8, 0x05, 0x00, 0x00, 0x00, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90,
            0x90, 0x90,
        ];
        e8_decode(&mut data, 0, false);
        assert_eq!(&data[..5], &[0xE8, 0x04, 0x00, 0x00, 0x00]);
        assert!(data[5..].iter().all(|&b| b == 0x90));
    }

    #[test]
    fn e8_ignores_e9_unless_enabled() {
        let jmp = [0xE9, 0x05, 0x00, 0x00, 0x00, 0x90, 0x90, 0x90];

        let mut data = jmp;
        e8_decode(&mut data, 0, false);
        assert_eq!(data, jmp);

        let mut data = jmp;
        e8_decode(&mut data, 0, true);
        assert_eq!(&data[..5], &[0xE9, 0x04, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn e8_mid_range_address_untouched() {
        // An address neither below 2^24 nor above -offset stays as-is.
        let mut data = [0xE8, 0x00, 0x00, 0x00, 0x80, 0x90, 0x90, 0x90];
        let before = data;
        e8_decode(&mut data, 0, false);
        assert_eq!(data, before);
    }

    #[test]
    fn arm_rewrites_bl_words() {
        // BL with absolute word offset 0x000100 at pc 0, word 1 (byte 4):
        // relative = 0x100 - (0 + 4)/2^2 = 0x100 - 1 = 0xFF.
        let mut data = [
            0x00, 0x00, 0x00, 0x00, // not BL
            0x00, 0x01, 0x00, 0xEB, // BL 0x000100
        ];
        arm_decode(&mut data, 0);
        assert_eq!(&data[4..], &[0xFF, 0x00, 0x00, 0xEB]);
        assert_eq!(&data[..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn queue_rejects_overlap_and_oversize() {
        // Descriptor bits: delta=0 (sel 0 + 1 byte), size (sel 0 + 1 byte),
        // type E8.
        fn descriptor(start: u8, size: u8, ty: u8) -> Vec<u8> {
            let mut bits = Vec::new();
            let mut push = |value: u32, n: u32| {
                for k in (0..n).rev() {
                    bits.push((value >> k) & 1);
                }
            };
            push(0, 2);
            push(start as u32, 8);
            push(0, 2);
            push(size as u32, 8);
            push(ty as u32, 3);
            let mut bytes = vec![0u8; bits.len().div_ceil(8)];
            for (i, b) in bits.iter().enumerate() {
                bytes[i / 8] |= (*b as u8) << (7 - i % 8);
            }
            bytes
        }

        let mut pipeline = FilterPipeline::new();

        let data = descriptor(0, 16, 1);
        let mut br = BitReader::new(&data[..]);
        br.block_end = u64::MAX;
        pipeline.register(&mut br, 0);
        assert_eq!(pipeline.queue.len(), 1);
        assert!(!pipeline.unsupported);
        assert_eq!(pipeline.front().unwrap().start_pos, 0);
        assert_eq!(pipeline.front().unwrap().size, 16);

        // Second filter starting inside the first is an overlap.
        let data = descriptor(4, 8, 1);
        let mut br = BitReader::new(&data[..]);
        br.block_end = u64::MAX;
        pipeline.register(&mut br, 0);
        assert_eq!(pipeline.queue.len(), 1);
        assert!(pipeline.unsupported);
    }

    #[test]
    fn zero_size_filter_dropped_silently() {
        // start=0 (sel 0, byte 0), size=0, type delta, channels=0.
        let data = [0u8; 4];
        let mut br = BitReader::new(&data[..]);
        br.block_end = u64::MAX;

        let mut pipeline = FilterPipeline::new();
        pipeline.register(&mut br, 0);
        assert!(pipeline.is_empty());
        assert!(!pipeline.unsupported);
    }
}
