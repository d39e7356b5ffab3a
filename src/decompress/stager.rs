//! Output staging: routes finished window bytes to the sink, running any
//! pending filter over its range first.
//!
//! The stager tracks two counters. `lz_written` is how far (in LZ
//! coordinates) bytes have left the window, either straight to the sink or
//! into a filter's staging buffer. `written_file_size` is how many bytes the
//! current file has logically produced; the sink receives at most the
//! declared unpacked size, but the counter advances by the full amount so
//! post-filter bytes beyond the declared size are consumed without being
//! emitted.

use std::io::{self, Write};

use super::filter::FilterPipeline;

pub struct OutputStager<'a, W> {
    sink: &'a mut W,
    /// Declared unpacked size of the current file, when known.
    unpacked_size: Option<u64>,
    /// Bytes logically produced for the current file.
    pub written_file_size: u64,
    /// LZ coordinate up to which window bytes have been consumed.
    pub lz_written: u64,
    /// A sink write failed; suppresses the final flush.
    pub write_error: bool,
}

impl<'a, W: Write> OutputStager<'a, W> {
    /// `start_lz` is the LZ coordinate where the file begins.
    pub fn new(sink: &'a mut W, unpacked_size: Option<u64>, start_lz: u64) -> Self {
        Self {
            sink,
            unpacked_size,
            written_file_size: 0,
            lz_written: start_lz,
            write_error: false,
        }
    }

    /// Push bytes to the sink, clamped to the declared unpacked size.
    fn write_out(&mut self, data: &[u8]) -> io::Result<()> {
        let emit = match self.unpacked_size {
            None => data.len(),
            Some(total) if self.written_file_size < total => {
                data.len().min((total - self.written_file_size) as usize)
            }
            Some(_) => 0,
        };
        if emit > 0 {
            if let Err(e) = self.sink.write_all(&data[..emit]) {
                self.write_error = true;
                return Err(e);
            }
        }
        self.written_file_size += data.len() as u64;
        Ok(())
    }

    /// Flush everything consumable from the window.
    ///
    /// Bytes ahead of the front filter go straight out; bytes inside its
    /// range are staged until the range is complete, then transformed and
    /// written. With an empty queue the window drains up to the wrap
    /// boundary, plus any match-overrun tail past `window_size`.
    pub fn drain(
        &mut self,
        window: &[u8],
        window_size: usize,
        window_pos: usize,
        lz_size: u64,
        lz_file_start: u64,
        filters: &mut FilterPipeline,
    ) -> io::Result<()> {
        let cur_lz_size = lz_size + window_pos as u64;
        let overflow = window_pos.saturating_sub(window_size);

        while let Some(front) = filters.front() {
            let lz_avail = cur_lz_size - self.lz_written;
            if lz_avail == 0 {
                break;
            }

            let block_start = front.start_pos;
            if block_start > self.lz_written {
                // Straight bytes before the filter range.
                let size = lz_avail.min(block_start - self.lz_written) as usize;
                let src = window_pos - lz_avail as usize;
                self.write_out(&window[src..src + size])?;
                self.lz_written += size as u64;
                continue;
            }

            let block_size = front.size;
            let offset = (self.lz_written - block_start) as usize;
            let size = (lz_avail as usize).min(block_size - offset);
            let src = window_pos - lz_avail as usize;

            let staging = filters.staging_buffer(block_size);
            staging[offset..offset + size].copy_from_slice(&window[src..src + size]);
            self.lz_written += size as u64;

            if offset + size != block_size {
                // Range not fully produced yet.
                return Ok(());
            }

            let filter = filters.pop_front().expect("front filter exists");
            let file_offset = filter.start_pos - lz_file_start;
            let data = filters.apply(&filter, file_offset);
            self.write_out(data)?;
        }

        if !filters.is_empty() {
            return Ok(());
        }

        let writable_end = cur_lz_size.min(lz_size + window_size as u64);
        if writable_end > self.lz_written {
            let avail = (writable_end - self.lz_written) as usize;
            let ws = window_size as i64;
            let src = (((self.lz_written as i64 - lz_size as i64) % ws + ws) % ws) as usize;
            self.write_out(&window[src..src + avail])?;
            self.lz_written += avail as u64;
        }

        if overflow > 0 && self.lz_written < cur_lz_size {
            self.write_out(&window[window_size..window_size + overflow])?;
            self.lz_written += overflow as u64;
        }

        Ok(())
    }
}
