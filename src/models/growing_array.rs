//! Chunked, append-biased 2-D storage.
//!
//! A `GrowingArray` looks like a `length x width` matrix but is physically a list
//! of equally sized chunks, each holding `chunk_size` rows. Writes past the end
//! allocate whole chunks on demand; nothing is ever freed while the series grows,
//! so readers never see a moved row. Length only moves forward.

use crate::error::{Result, SeriesError};

/// Warn below this many rows per chunk; growth would allocate constantly.
const COMFORTABLE_CHUNK_ROWS: usize = 60;

#[derive(Debug, Clone)]
pub struct GrowingArray<T: Copy> {
    chunks: Vec<Vec<T>>,
    chunk_size: usize,
    width: usize,
    length: usize,
    fill: T,
}

impl<T: Copy> GrowingArray<T> {
    /// Create an empty array of `width` columns, growing `chunk_size` rows at a
    /// time. Unwritten cells read back as `fill`.
    pub fn new(chunk_size: usize, width: usize, fill: T) -> Result<Self> {
        if chunk_size < 4 {
            return Err(SeriesError::InvalidArgument(format!(
                "chunk size must be at least 4 rows, got {}",
                chunk_size
            )));
        }
        if width < 1 {
            return Err(SeriesError::InvalidArgument(
                "width must be at least 1 column".to_string(),
            ));
        }
        if chunk_size < COMFORTABLE_CHUNK_ROWS {
            log::warn!(
                "chunk size {} is small; a busy series will allocate chunks constantly",
                chunk_size
            );
        }
        Ok(GrowingArray { chunks: Vec::new(), chunk_size, width, length: 0, fill })
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Borrow row `index`. Rows never straddle chunks, so this is one slice.
    pub fn row(&self, index: usize) -> Result<&[T]> {
        if index >= self.length {
            return Err(SeriesError::OutOfRange { index, length: self.length });
        }
        let chunk = index / self.chunk_size;
        let pos = index % self.chunk_size;
        Ok(&self.chunks[chunk][pos * self.width..(pos + 1) * self.width])
    }

    /// Copy of row `index`.
    pub fn get(&self, index: usize) -> Result<Vec<T>> {
        self.row(index).map(|row| row.to_vec())
    }

    /// Row-major copy of rows `[start, stop)`.
    pub fn get_slice(&self, start: usize, stop: usize) -> Result<Vec<T>> {
        if start > stop {
            return Err(SeriesError::InvalidSlice { start, stop });
        }
        if stop > self.length {
            return Err(SeriesError::OutOfRange { index: stop, length: self.length });
        }
        let mut data = vec![self.fill; (stop - start) * self.width];
        if start == stop {
            return Ok(data);
        }
        self.for_each_span(start, stop, |chunk, chunk_lo, chunk_hi, data_lo| {
            let rows = chunk_hi - chunk_lo;
            data[data_lo * self.width..(data_lo + rows) * self.width]
                .copy_from_slice(&self.chunks[chunk][chunk_lo * self.width..chunk_hi * self.width]);
        });
        Ok(data)
    }

    /// Write row `index`, allocating chunks and extending the length as needed.
    pub fn set(&mut self, index: usize, row: &[T]) -> Result<()> {
        if row.len() != self.width {
            return Err(SeriesError::InvalidInput(format!(
                "row has {} values, the array holds {} columns",
                row.len(),
                self.width
            )));
        }
        self.allocate(index + 1);
        let chunk = index / self.chunk_size;
        let pos = index % self.chunk_size;
        self.chunks[chunk][pos * self.width..(pos + 1) * self.width].copy_from_slice(row);
        Ok(())
    }

    /// Write rows `[start, stop)` from a row-major buffer, allocating chunks and
    /// extending the length as needed.
    pub fn set_slice(&mut self, start: usize, stop: usize, data: &[T]) -> Result<()> {
        if start > stop {
            return Err(SeriesError::InvalidSlice { start, stop });
        }
        if data.len() != (stop - start) * self.width {
            return Err(SeriesError::InvalidInput(format!(
                "expected {} values for rows [{}, {}) of width {}, got {}",
                (stop - start) * self.width,
                start,
                stop,
                self.width,
                data.len()
            )));
        }
        if start == stop {
            return Ok(());
        }
        self.allocate(stop);
        let width = self.width;
        let chunk_size = self.chunk_size;
        let first_chunk = start / chunk_size;
        let last_chunk = (stop - 1) / chunk_size;
        for chunk in first_chunk..=last_chunk {
            let chunk_base = chunk * chunk_size;
            let chunk_lo = start.saturating_sub(chunk_base).min(chunk_size);
            let chunk_hi = (stop - chunk_base).min(chunk_size);
            let data_lo = chunk_base + chunk_lo - start;
            let rows = chunk_hi - chunk_lo;
            self.chunks[chunk][chunk_lo * width..chunk_hi * width]
                .copy_from_slice(&data[data_lo * width..(data_lo + rows) * width]);
        }
        Ok(())
    }

    /// Drop every chunk. Only indicator disposal goes through here; a live series
    /// never shrinks.
    pub(crate) fn release(&mut self) {
        self.chunks.clear();
        self.length = 0;
    }

    /// Visit the per-chunk spans covering rows `[start, stop)`, in order. The
    /// callback gets the chunk index, the row range inside that chunk, and the
    /// row offset inside the caller's buffer.
    fn for_each_span(
        &self,
        start: usize,
        stop: usize,
        mut visit: impl FnMut(usize, usize, usize, usize),
    ) {
        let chunk_size = self.chunk_size;
        let first_chunk = start / chunk_size;
        let last_chunk = (stop - 1) / chunk_size;
        for chunk in first_chunk..=last_chunk {
            let chunk_base = chunk * chunk_size;
            let chunk_lo = start.saturating_sub(chunk_base).min(chunk_size);
            let chunk_hi = (stop - chunk_base).min(chunk_size);
            let data_lo = chunk_base + chunk_lo - start;
            visit(chunk, chunk_lo, chunk_hi, data_lo);
        }
    }

    fn allocate(&mut self, stop: usize) {
        while self.chunks.len() * self.chunk_size < stop {
            self.chunks.push(vec![self.fill; self.chunk_size * self.width]);
        }
        self.length = self.length.max(stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> GrowingArray<u64> {
        // Four-row chunks so every test crosses chunk boundaries quickly.
        GrowingArray::new(4, 1, 0).unwrap()
    }

    #[test]
    fn rejects_degenerate_layouts() {
        assert!(GrowingArray::<u64>::new(3, 1, 0).is_err());
        assert!(GrowingArray::<u64>::new(8, 0, 0).is_err());
    }

    #[test]
    fn writes_extend_length_monotonically() {
        let mut array = tiny();
        assert_eq!(array.len(), 0);
        array.set(0, &[10]).unwrap();
        assert_eq!(array.len(), 1);
        array.set(9, &[90]).unwrap();
        assert_eq!(array.len(), 10);
        // Rewriting an old row never shrinks the array.
        array.set(1, &[11]).unwrap();
        assert_eq!(array.len(), 10);
    }

    #[test]
    fn gap_rows_read_back_as_fill() {
        let mut array = tiny();
        array.set(6, &[60]).unwrap();
        for index in 0..6 {
            assert_eq!(array.get(index).unwrap(), vec![0], "row {} should be fill", index);
        }
        assert_eq!(array.get(6).unwrap(), vec![60]);
    }

    #[test]
    fn slices_cross_chunk_boundaries() {
        let mut array = tiny();
        let values: Vec<u64> = (0..11).map(|v| v * 10).collect();
        array.set_slice(0, 11, &values).unwrap();
        assert_eq!(array.len(), 11);
        // [2, 9) spans three chunks of four rows.
        assert_eq!(
            array.get_slice(2, 9).unwrap(),
            vec![20, 30, 40, 50, 60, 70, 80]
        );
        assert_eq!(array.get_slice(0, 11).unwrap(), values);
    }

    #[test]
    fn writes_cross_chunk_boundaries() {
        let mut array = tiny();
        array.set_slice(3, 6, &[33, 44, 55]).unwrap();
        assert_eq!(array.get(3).unwrap(), vec![33]);
        assert_eq!(array.get(4).unwrap(), vec![44]);
        assert_eq!(array.get(5).unwrap(), vec![55]);
        assert_eq!(array.get(0).unwrap(), vec![0]);
    }

    #[test]
    fn reads_are_bounds_checked() {
        let mut array = tiny();
        array.set_slice(0, 3, &[1, 2, 3]).unwrap();
        assert!(matches!(
            array.get(3),
            Err(SeriesError::OutOfRange { index: 3, length: 3 })
        ));
        assert!(matches!(array.get_slice(1, 4), Err(SeriesError::OutOfRange { .. })));
        assert!(matches!(array.get_slice(2, 1), Err(SeriesError::InvalidSlice { .. })));
        // Empty slices are fine anywhere inside the length.
        assert_eq!(array.get_slice(2, 2).unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn shape_mismatches_are_rejected() {
        let mut wide = GrowingArray::<f64>::new(8, 2, f64::NAN).unwrap();
        assert!(matches!(wide.set(0, &[1.0]), Err(SeriesError::InvalidInput(_))));
        assert!(matches!(
            wide.set_slice(0, 2, &[1.0, 2.0, 3.0]),
            Err(SeriesError::InvalidInput(_))
        ));
        wide.set(0, &[1.0, 2.0]).unwrap();
        assert_eq!(wide.get(0).unwrap(), vec![1.0, 2.0]);
        assert!(wide.get(1).is_err());
    }

    #[test]
    fn float_fill_is_nan() {
        let mut array = GrowingArray::<f64>::new(4, 1, f64::NAN).unwrap();
        array.set(2, &[7.5]).unwrap();
        assert!(array.get(0).unwrap()[0].is_nan());
        assert!(array.get(1).unwrap()[0].is_nan());
        assert_eq!(array.get(2).unwrap(), vec![7.5]);
    }

    #[test]
    fn release_empties_the_array() {
        let mut array = tiny();
        array.set_slice(0, 5, &[1, 2, 3, 4, 5]).unwrap();
        array.release();
        assert_eq!(array.len(), 0);
        assert!(array.get(0).is_err());
    }
}
