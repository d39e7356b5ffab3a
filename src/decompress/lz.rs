//! The LZ77 engine over the sliding dictionary.
//!
//! A file is a sequence of Huffman blocks. Each block starts with a
//! byte-aligned header giving its exact bit length and whether a fresh set
//! of code tables follows. Symbols from the main alphabet then emit
//! literals, reuse one of four most-recent match distances, start a new
//! match, or request a filter descriptor. Matches copy earlier window
//! bytes forward; a distance smaller than the length extends run-length
//! style.
//!
//! The window persists across files of a solid chain: decoding file `k+1`
//! continues with the dictionary file `k` left behind, provided the chain
//! is unbroken (see [`Rar5Decoder::decode`]).

use std::io::{Read, Write};

use super::bit_reader::BitReader;
use super::filter::FilterPipeline;
use super::huffman::{BuildMode, HuffmanDecoder};
use super::stager::OutputStager;
use super::DecodeError;

/// Window bytes produced between output flushes.
const WRITE_STEP: usize = 1 << 18;
/// Minimum dictionary size.
const WIN_SIZE_MIN: u64 = 1 << 18;
/// Window allocation granularity.
const WIN_ALIGN_SIZE: usize = 1 << 18;
/// A solid continuation may lag the declared end of the prior file by at
/// most this much before the dictionary is considered unusable.
const SOLID_RECOVER_LIMIT: u64 = 1 << 20;
/// Largest expressible dictionary, used to clamp the LZ position counter.
const DICT_SIZE_BITS_MAX: usize = 40;
const DICT_SIZE_MAX: u64 = 1 << DICT_SIZE_BITS_MAX;
/// Longest match a single symbol can produce.
const MAX_MATCH_LEN: usize = 0x1004;

/// First repeat-distance symbol in the main alphabet.
const SYMBOL_REP: u32 = 258;
/// Number of repeat-distance registers.
const NUM_REPS: usize = 4;
const REP_SENTINEL: u64 = 0xFFFF_FFFF;

/// Alphabet sizes. The main alphabet is 256 literals, the filter symbol,
/// the repeat-length symbol, four repeat-distance symbols and one symbol
/// per length slot.
const LEN_TABLE_SIZE: usize = 11 * 4;
const MAIN_TABLE_SIZE: usize = 256 + 1 + 1 + NUM_REPS + LEN_TABLE_SIZE;
const EXTRA_DIST_SYMBOLS_V7: usize = 16;
const DIST_TABLE_SIZE_V6: usize = 64;
const DIST_TABLE_SIZE_MAX: usize = DIST_TABLE_SIZE_V6 + EXTRA_DIST_SYMBOLS_V7;
const NUM_ALIGN_BITS: u32 = 4;
const ALIGN_TABLE_SIZE: usize = 1 << NUM_ALIGN_BITS;
const TABLES_SIZES_SUM_MAX: usize =
    MAIN_TABLE_SIZE + DIST_TABLE_SIZE_MAX + ALIGN_TABLE_SIZE + LEN_TABLE_SIZE;

const LEVEL_TABLE_SIZE: usize = 20;

/// Fast-lookup bits per decoder.
const TABLE_BITS_MAIN: u32 = 10;
const TABLE_BITS_DIST: u32 = 7;
const TABLE_BITS_LEN: u32 = 7;
const TABLE_BITS_ALIGN: u32 = 6;
const TABLE_BITS_LEVEL: u32 = 6;

/// Addend applied to the match length when the distance needs more bits
/// than the align range, indexed by the distance bit width.
const LEN_PLUS_TABLE: [u8; DICT_SIZE_BITS_MAX] = [
    0, 0, 0, 0, 0, 0, 0, 1, 1, 1, //
    1, 1, 2, 2, 2, 2, 2, 3, 3, 3, //
    3, 3, 3, 3, 3, 3, 3, 3, 3, 3, //
    3, 3, 3, 3, 3, 3, 3, 3, 3, 3,
];

/// Why the symbol loop returned to the block loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolRun {
    /// Write-step limit, block boundary, file end or input end reached;
    /// the block loop re-evaluates.
    Paused,
    /// Symbol 256: a filter descriptor follows in the stream.
    FilterRequested,
}

/// RAR5 LZ + Huffman decoder with a reusable sliding dictionary.
pub struct Rar5Decoder {
    solid: bool,
    v7: bool,
    initialized: bool,
    dictionary_size: u64,

    window: Vec<u8>,
    window_size: usize,
    window_pos: usize,
    dict_size_for_check: u64,

    /// Output bytes retired by prior window wrap-arounds.
    lz_size: u64,
    /// Declared end of the current file in LZ coordinates.
    lz_end: u64,
    /// LZ coordinate of the current file's first byte.
    lz_file_start: u64,

    rep_dists: [u64; NUM_REPS],
    last_len: usize,

    main_dec: HuffmanDecoder,
    dist_dec: HuffmanDecoder,
    len_dec: HuffmanDecoder,
    align_dec: HuffmanDecoder,
    table_filled: bool,
    use_align_bits: bool,
    is_last_block: bool,

    filters: FilterPipeline,
    cur_limit: usize,
    unpacked_size: Option<u64>,
}

impl Rar5Decoder {
    pub fn new() -> Self {
        Self {
            solid: false,
            v7: false,
            initialized: false,
            dictionary_size: WIN_SIZE_MIN,
            window: Vec::new(),
            window_size: 0,
            window_pos: 0,
            dict_size_for_check: 0,
            lz_size: 0,
            lz_end: 0,
            lz_file_start: 0,
            rep_dists: [REP_SENTINEL; NUM_REPS],
            last_len: 0,
            main_dec: HuffmanDecoder::new(MAIN_TABLE_SIZE, TABLE_BITS_MAIN),
            dist_dec: HuffmanDecoder::new(DIST_TABLE_SIZE_MAX, TABLE_BITS_DIST),
            len_dec: HuffmanDecoder::new(LEN_TABLE_SIZE, TABLE_BITS_LEN),
            align_dec: HuffmanDecoder::new(ALIGN_TABLE_SIZE, TABLE_BITS_ALIGN),
            table_filled: false,
            use_align_bits: false,
            is_last_block: false,
            filters: FilterPipeline::new(),
            cur_limit: 0,
            unpacked_size: None,
        }
    }

    /// Configure from the 2-byte property block:
    /// `[pow, (frac << 3) | (v7 << 1) | solid]`.
    /// The window size is `(frac + 32) << (pow + 12)`; anything past
    /// 2^31 is rejected.
    pub fn set_properties(&mut self, props: [u8; 2]) -> Result<(), DecodeError> {
        let pow = u32::from(props[0]);
        let b1 = u32::from(props[1]);
        let frac = b1 >> 3;

        if pow + ((frac + 31) >> 5) > 31 - 17 {
            return Err(DecodeError::Unsupported("dictionary larger than 4 GiB"));
        }

        self.dictionary_size = u64::from(frac + 32) << (pow + 12);
        self.solid = b1 & 1 != 0;
        self.v7 = b1 & 2 != 0;
        Ok(())
    }

    /// Discard all dictionary and table state.
    ///
    /// Call before a new archive or after a failed file; never between
    /// files of an intact solid chain.
    pub fn reset(&mut self) {
        self.window_pos = 0;
        self.lz_size = 0;
        self.lz_end = 0;
        self.rep_dists = [REP_SENTINEL; NUM_REPS];
        self.last_len = 0;
        self.table_filled = false;
        self.initialized = false;
    }

    /// Decompress one file from `input` into `output`.
    ///
    /// When `unpacked_size` is known the output is clamped to it and the
    /// final size is verified. State carried from the previous file is kept
    /// when the properties say solid and the continuity check passes;
    /// otherwise the dictionary restarts empty.
    pub fn decode<R: Read, W: Write>(
        &mut self,
        input: R,
        output: &mut W,
        unpacked_size: Option<u64>,
    ) -> Result<(), DecodeError> {
        self.begin_file(unpacked_size)?;

        self.filters.clear();
        self.filters.unsupported = false;
        self.is_last_block = false;
        self.reset_tables();

        let start_lz = self.lz_size + self.window_pos as u64;
        self.lz_file_start = start_lz;

        let mut br = BitReader::new(input);
        let mut stager = OutputStager::new(output, self.unpacked_size, start_lz);

        self.process_blocks(&mut br, &mut stager)?;

        if let Some(e) = br.take_io_error() {
            return Err(DecodeError::Io(e));
        }

        if !stager.write_error {
            stager.drain(
                &self.window,
                self.window_size,
                self.window_pos,
                self.lz_size,
                self.lz_file_start,
                &mut self.filters,
            )?;
        }

        if let Some(total) = self.unpacked_size {
            if stager.written_file_size != total {
                return Err(DecodeError::CorruptedData("unpacked size mismatch"));
            }
        }
        if self.filters.unsupported {
            return Err(DecodeError::UnsupportedFilter);
        }
        Ok(())
    }

    /// Apply the solid-continuity rule and size the window for one file.
    fn begin_file(&mut self, unpacked_size: Option<u64>) -> Result<(), DecodeError> {
        let cur_lz = self.lz_size + self.window_pos as u64;
        let broken_chain =
            cur_lz < self.lz_end && cur_lz + SOLID_RECOVER_LIMIT < self.lz_end;

        if self.window.is_empty() || !self.solid || !self.initialized || broken_chain {
            self.lz_size = 0;
            self.window_pos = 0;
            self.rep_dists = [REP_SENTINEL; NUM_REPS];
            self.last_len = 0;
            self.table_filled = false;
            self.initialized = true;
        } else {
            let ws = self.window_size;
            if self.window_pos >= ws {
                self.window_pos -= ws;
                self.lz_size += ws as u64;
                self.window.copy_within(ws..ws + self.window_pos, 0);
            }

            if cur_lz < self.lz_end {
                // The previous file ended short of its declared size;
                // zero-fill the gap so dictionary references stay defined.
                let mut rem = self.lz_end - cur_lz;
                if rem >= ws as u64 {
                    self.window[..ws].fill(0);
                    self.lz_size = ws as u64;
                    self.window_pos = 0;
                } else {
                    let to_end = ws - self.window_pos;
                    if to_end as u64 <= rem {
                        rem -= to_end as u64;
                        self.window[self.window_pos..ws].fill(0);
                        self.lz_size = ws as u64;
                        self.window_pos = 0;
                    }
                    let rem = rem as usize;
                    self.window[self.window_pos..self.window_pos + rem].fill(0);
                    self.window_pos += rem;
                }
            }
        }

        if self.lz_size >= DICT_SIZE_MAX {
            self.lz_size = DICT_SIZE_MAX;
        }
        self.lz_end = self.lz_size + self.window_pos as u64;

        let new_size = self.dictionary_size.max(WIN_SIZE_MIN);

        self.unpacked_size = unpacked_size;
        self.lz_end += unpacked_size.unwrap_or(0);

        if self.solid && !self.window.is_empty() {
            if new_size > self.dict_size_for_check {
                return Err(DecodeError::OutOfMemory(
                    "solid file needs a larger dictionary than allocated",
                ));
            }
        } else {
            self.dict_size_for_check = new_size;
            let size = new_size as usize;
            let aligned = (size + (1 << 7) + WIN_ALIGN_SIZE) & !(WIN_ALIGN_SIZE - 1);
            let alloc = aligned + MAX_MATCH_LEN + 64;
            if self.window.len() < alloc {
                self.window = vec![0u8; alloc];
            }
            self.window_size = size;
        }

        Ok(())
    }

    fn reset_tables(&mut self) {
        self.main_dec.reset();
        self.dist_dec.reset();
        self.len_dec.reset();
        self.align_dec.reset();
        self.table_filled = false;
        self.use_align_bits = false;
    }

    fn drain_to<W: Write>(&mut self, stager: &mut OutputStager<'_, W>) -> Result<(), DecodeError> {
        stager.drain(
            &self.window,
            self.window_size,
            self.window_pos,
            self.lz_size,
            self.lz_file_start,
            &mut self.filters,
        )?;
        Ok(())
    }

    /// Outer loop: alternates write-step flushes, block header handling and
    /// symbol runs until the file's last block or declared size.
    fn process_blocks<R: Read, W: Write>(
        &mut self,
        br: &mut BitReader<R>,
        stager: &mut OutputStager<'_, W>,
    ) -> Result<(), DecodeError> {
        let mut limit = {
            let rem = (self.window_size - self.window_pos).min(WRITE_STEP);
            self.window_pos + rem
        };

        loop {
            if self.window_pos >= limit {
                self.drain_to(stager)?;

                if let Some(total) = self.unpacked_size {
                    if stager.written_file_size >= total {
                        break;
                    }
                }

                if self.window_pos >= self.window_size {
                    // Wrap: retire one window's worth of output and pull the
                    // overrun tail back to the start.
                    let tail = self.window_pos - self.window_size;
                    self.lz_size += self.window_size as u64;
                    self.window
                        .copy_within(self.window_size..self.window_size + tail, 0);
                    self.window_pos = tail;
                }

                let rem = (self.window_size - self.window_pos).min(WRITE_STEP);
                limit = self.window_pos + rem;
                continue;
            }

            if br.buf_pos >= br.buf_check_block_pos {
                if br.input_eof_error() {
                    break;
                }
                br.prepare();

                let processed = br.processed_round();
                if processed >= br.block_end {
                    if processed > br.block_end {
                        break;
                    }
                    let bits7 = br.processed_bits7();
                    if bits7 >= br.block_end_bits7 {
                        if bits7 > br.block_end_bits7 {
                            br.minor_error = true;
                        }
                        br.align_to_byte();

                        if self.is_last_block {
                            break;
                        }
                        self.read_tables(br)?;
                        continue;
                    }
                }

                if !self.table_filled {
                    break;
                }
            }

            self.cur_limit = limit;
            let run = self.process_symbols(br)?;
            if run == SymbolRun::FilterRequested {
                self.register_filter(br, stager)?;
            }

            if let Some(total) = self.unpacked_size {
                if self.lz_size + self.window_pos as u64 - self.lz_file_start >= total {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Read one block header and, when present, the four code tables.
    fn read_tables<R: Read>(&mut self, br: &mut BitReader<R>) -> Result<(), DecodeError> {
        br.prepare();

        let flags = u32::from(br.read_byte_aligned());
        let mut checksum = u32::from(br.read_byte_aligned()) ^ flags;

        let num_size_bytes = (flags >> 3) & 3;
        if num_size_bytes >= 3 {
            return Err(DecodeError::CorruptedData("invalid block header flags"));
        }

        let mut block_size = u64::from(br.read_byte_aligned());
        checksum ^= block_size as u32;
        if num_size_bytes != 0 {
            let b = u64::from(br.read_byte_aligned());
            checksum ^= b as u32;
            block_size += b << 8;
            if num_size_bytes > 1 {
                let b = u64::from(br.read_byte_aligned());
                checksum ^= b as u32;
                block_size += b << 16;
            }
        }
        if checksum != 0x5A {
            return Err(DecodeError::CorruptedData("block header checksum mismatch"));
        }

        let mut bits7 = (flags & 7) + 1;
        block_size += u64::from(bits7 >> 3);
        if block_size == 0 {
            // An empty block would never advance; force one byte.
            br.minor_error = true;
            bits7 = 0;
            block_size = 1;
        }
        block_size -= 1;
        bits7 &= 7;

        br.block_end_bits7 = bits7;
        br.block_end = br.processed_round() + block_size;
        br.set_check_for_block();
        self.is_last_block = flags & 0x40 != 0;

        if flags & 0x80 == 0 {
            // No tables in this block: the previous set must exist.
            if !self.table_filled && (block_size != 0 || bits7 != 0) {
                return Err(DecodeError::CorruptedData("block reuses absent tables"));
            }
            return Ok(());
        }

        self.table_filled = false;

        // Level alphabet: 20 raw 4-bit lengths, value 15 + nonzero n
        // encoding a run of n+2 zeros.
        let mut level_lens = [0u8; LEVEL_TABLE_SIZE];
        let mut i = 0;
        while i < LEVEL_TABLE_SIZE {
            if br.buf_pos >= br.buf_check_block_pos {
                br.prepare();
                if br.is_block_over_read() {
                    return Err(DecodeError::CorruptedData("level table past block end"));
                }
            }
            let len = br.read_bits9_fix(4);
            if len == 15 {
                let num_zeros = br.read_bits9_fix(4) as usize;
                if num_zeros != 0 {
                    let end = (i + num_zeros + 2).min(LEVEL_TABLE_SIZE);
                    while i < end {
                        level_lens[i] = 0;
                        i += 1;
                    }
                    continue;
                }
            }
            level_lens[i] = len as u8;
            i += 1;
        }
        if br.is_block_over_read() {
            return Err(DecodeError::CorruptedData("level table past block end"));
        }

        let mut level_dec = HuffmanDecoder::new(LEVEL_TABLE_SIZE, TABLE_BITS_LEVEL);
        if !level_dec.build(&level_lens, BuildMode::FullOrEmpty) {
            return Err(DecodeError::CorruptedData("invalid level code lengths"));
        }

        // Code lengths for main ‖ dist ‖ align ‖ len, with run-length
        // symbols 16..19 repeating the previous length or zero.
        let mut lens = [0u8; TABLES_SIZES_SUM_MAX];
        let table_size = if self.v7 {
            TABLES_SIZES_SUM_MAX
        } else {
            TABLES_SIZES_SUM_MAX - EXTRA_DIST_SYMBOLS_V7
        };

        let mut i = 0;
        while i < table_size {
            if br.buf_pos >= br.buf_check_block_pos {
                br.prepare();
                if br.is_block_over_read() {
                    return Err(DecodeError::CorruptedData("code table past block end"));
                }
            }

            let sym = level_dec.decode(br);
            if sym < 16 {
                lens[i] = sym as u8;
                i += 1;
                continue;
            }

            let base = ((sym as usize - 16) & 1) * 4;
            let mut run_end = base + base + 3 + br.read_bits9(base as u32 + 3) as usize;
            run_end += i;
            if run_end > table_size {
                run_end = table_size;
            }

            let value = if sym < 18 {
                if i == 0 {
                    return Err(DecodeError::CorruptedData("repeat at table start"));
                }
                lens[i - 1]
            } else {
                0
            };
            while i < run_end {
                lens[i] = value;
                i += 1;
            }
        }
        if br.is_block_over_read() {
            return Err(DecodeError::CorruptedData("code table past block end"));
        }
        if br.input_eof_error() {
            return Err(DecodeError::CorruptedData("input ended inside code tables"));
        }

        if !self.main_dec.build(&lens, BuildMode::FullOrEmpty) {
            return Err(DecodeError::CorruptedData("invalid main code lengths"));
        }

        if !self.v7 {
            // Shift align+len up to the v7 layout and blank the extra
            // distance symbols.
            let v6_end = MAIN_TABLE_SIZE + DIST_TABLE_SIZE_V6;
            lens.copy_within(
                v6_end..v6_end + ALIGN_TABLE_SIZE + LEN_TABLE_SIZE,
                v6_end + EXTRA_DIST_SYMBOLS_V7,
            );
            lens[v6_end..v6_end + EXTRA_DIST_SYMBOLS_V7].fill(0);
        }

        if !self
            .dist_dec
            .build(&lens[MAIN_TABLE_SIZE..], BuildMode::FullOrEmpty)
        {
            return Err(DecodeError::CorruptedData("invalid distance code lengths"));
        }
        if !self.len_dec.build(
            &lens[MAIN_TABLE_SIZE + DIST_TABLE_SIZE_MAX + ALIGN_TABLE_SIZE..],
            BuildMode::FullOrEmpty,
        ) {
            return Err(DecodeError::CorruptedData("invalid length code lengths"));
        }

        self.use_align_bits = false;
        let align_start = MAIN_TABLE_SIZE + DIST_TABLE_SIZE_MAX;
        for k in 0..ALIGN_TABLE_SIZE {
            if lens[align_start + k] != NUM_ALIGN_BITS as u8 {
                if !self
                    .align_dec
                    .build(&lens[align_start..], BuildMode::FullOrEmpty)
                {
                    return Err(DecodeError::CorruptedData("invalid align code lengths"));
                }
                self.use_align_bits = true;
                break;
            }
        }

        self.table_filled = true;
        Ok(())
    }

    /// The hot loop: decode symbols until the write-step limit, the block
    /// boundary, the declared file size or a filter symbol.
    fn process_symbols<R: Read>(
        &mut self,
        br: &mut BitReader<R>,
    ) -> Result<SymbolRun, DecodeError> {
        let limit = self.cur_limit;
        let mut win_pos = self.window_pos;
        let mut rep0 = self.rep_dists[0];
        let mut run = SymbolRun::Paused;

        loop {
            if let Some(total) = self.unpacked_size {
                let produced = self.lz_size + win_pos as u64 - self.lz_file_start;
                if produced >= total {
                    break;
                }
            }
            if win_pos >= limit {
                break;
            }

            if br.buf_pos >= br.buf_check_block_pos {
                if br.input_eof_error() {
                    break;
                }
                if br.needs_refill() && !br.was_finished {
                    break;
                }
                let processed = br.processed_round();
                if processed >= br.block_end
                    && (processed > br.block_end || br.processed_bits7() >= br.block_end_bits7)
                {
                    break;
                }
                if !self.table_filled {
                    return Err(DecodeError::CorruptedData("symbols before any code table"));
                }
            }

            let sym = self.main_dec.decode(br);

            if sym < 256 {
                self.window[win_pos] = sym as u8;
                win_pos += 1;
                continue;
            }
            if sym == 256 {
                run = SymbolRun::FilterRequested;
                break;
            }

            let mut len;
            if sym < SYMBOL_REP + NUM_REPS as u32 {
                if sym >= SYMBOL_REP {
                    // Reuse a recent distance, move-to-front.
                    if sym != SYMBOL_REP {
                        let dist = self.rep_dists[1];
                        self.rep_dists[1] = rep0;
                        rep0 = dist;
                        if sym >= SYMBOL_REP + 2 {
                            let idx = (sym - SYMBOL_REP) as usize;
                            rep0 = self.rep_dists[idx];
                            self.rep_dists[idx] = self.rep_dists[2];
                            self.rep_dists[2] = dist;
                        }
                    }

                    let mut slot = self.len_dec.decode(br) as usize;
                    if slot >= 8 {
                        slot = slot_to_len(br, slot);
                    }
                    len = slot + 2;
                } else {
                    // Symbol 257: repeat the last length at the last
                    // distance; nothing yet to repeat is a no-op.
                    len = self.last_len;
                    if len == 0 {
                        continue;
                    }
                }
            } else {
                // New match: rotate the distance registers and read a
                // fresh distance.
                self.rep_dists[3] = self.rep_dists[2];
                self.rep_dists[2] = self.rep_dists[1];
                self.rep_dists[1] = rep0;

                let mut slot = (sym - (SYMBOL_REP + NUM_REPS as u32)) as usize;
                if slot >= 8 {
                    slot = slot_to_len(br, slot);
                }
                len = slot + 2;

                let dist_slot = self.dist_dec.decode(br);
                let mut dist = u64::from(dist_slot);
                if dist_slot >= 4 {
                    let num_bits = (dist_slot - 2) >> 1;
                    dist = u64::from(2 | (dist_slot & 1)) << num_bits;

                    if num_bits < NUM_ALIGN_BITS {
                        let snapshot = br.get_value_high32();
                        dist += u64::from(br.read_bits_big25(num_bits, snapshot));
                    } else {
                        len += usize::from(LEN_PLUS_TABLE[num_bits as usize]);

                        if self.use_align_bits {
                            let snapshot = br.get_value_high32();
                            let high = br.read_bits_big(num_bits - NUM_ALIGN_BITS, snapshot);
                            let align = self.align_dec.decode(br);
                            dist += u64::from(high) << NUM_ALIGN_BITS;
                            dist += u64::from(align);
                        } else {
                            let snapshot = br.get_value_high32();
                            dist += u64::from(br.read_bits_big(num_bits, snapshot));
                        }

                        if num_bits >= 30 {
                            dist = 0xFFFF_FFFF - 1;
                        }
                    }
                }
                rep0 = dist + 1;
            }

            self.last_len = len;

            if rep0 > self.dict_size_for_check {
                self.rep_dists[0] = rep0;
                self.window_pos = win_pos;
                return Err(DecodeError::CorruptedData("match distance beyond dictionary"));
            }

            let dest = win_pos;
            win_pos += len;

            if rep0 > dest as u64 {
                if self.lz_size == 0 {
                    self.rep_dists[0] = rep0;
                    self.window_pos = win_pos;
                    return Err(DecodeError::CorruptedData(
                        "match distance before start of stream",
                    ));
                }

                // Source lies before the wrap point.
                let rep = rep0 as usize;
                let back = rep - dest;
                let src = dest + self.window_size - rep;
                if back < len {
                    self.window.copy_within(src..src + back, dest);
                    copy_match(&mut self.window, 0, dest + back, len - back);
                    continue;
                }
                copy_match(&mut self.window, src, dest, len);
            } else {
                let src = dest - rep0 as usize;
                copy_match(&mut self.window, src, dest, len);
            }
        }

        self.rep_dists[0] = rep0;
        self.window_pos = win_pos;
        Ok(run)
    }

    /// Handle symbol 256: make room in the queue if needed, then parse and
    /// register the descriptor.
    fn register_filter<R: Read, W: Write>(
        &mut self,
        br: &mut BitReader<R>,
        stager: &mut OutputStager<'_, W>,
    ) -> Result<(), DecodeError> {
        if self.filters.is_saturated() {
            self.drain_to(stager)?;
            if self.filters.is_saturated() {
                // Still no room: give up on filters for this file.
                self.filters.unsupported = true;
                self.filters.clear();
                self.reset_tables();
            }
        }

        self.filters
            .register(br, self.lz_size + self.window_pos as u64);
        Ok(())
    }
}

impl Default for Rar5Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a length slot of 8 or more into its value.
fn slot_to_len<R: Read>(br: &mut BitReader<R>, slot: usize) -> usize {
    let num_bits = (slot as u32 >> 2) - 1;
    ((4 | (slot & 3)) << num_bits) + br.read_bits9(num_bits) as usize
}

/// Forward copy that preserves run-length extension when the ranges
/// overlap with `src` behind `dest`.
fn copy_match(window: &mut [u8], src: usize, dest: usize, len: usize) {
    if src >= dest || dest - src >= len {
        window.copy_within(src..src + len, dest);
    } else {
        for i in 0..len {
            window[dest + i] = window[src + i];
        }
    }
}
