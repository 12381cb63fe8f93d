//! The bit-packed two-dimensional mask field.

use spm_common::{CommonError, FieldPart, Masking};

use crate::bits::{make_mask, stride_for, BitReader, MaskIter, WordRun, WORD_BITS};
use crate::error::MaskResult;
use crate::grains::GrainData;

/// A two-dimensional bitmap with rows packed into 32-bit words.
///
/// Column `c` of row `r` is bit `c % 32` (from the least significant end) of
/// word `stride * r + c / 32`. Padding bits past `xres` in the last word of a
/// row are undefined; kernels may freely read and write them and every
/// consumer masks them off.
///
/// Derived grain and distance data are cached lazily and dropped together on
/// any mutation.
#[derive(Debug, Clone)]
pub struct MaskField {
    xres: usize,
    yres: usize,
    stride: usize,
    data: Vec<u32>,
    pub(crate) grains: Option<GrainData>,
    pub(crate) distances: Option<Vec<u32>>,
}

impl MaskField {
    /// Create an all-clear mask field.
    pub fn new(xres: usize, yres: usize) -> MaskResult<Self> {
        if xres == 0 || yres == 0 {
            return Err(CommonError::invalid("mask field dimensions must be positive").into());
        }
        let stride = stride_for(xres);
        Ok(Self {
            xres,
            yres,
            stride,
            data: vec![0u32; stride * yres],
            grains: None,
            distances: None,
        })
    }

    /// Create a mask field with every bit set to `value`.
    pub fn new_filled(xres: usize, yres: usize, value: bool) -> MaskResult<Self> {
        let mut field = Self::new(xres, yres)?;
        if value {
            field.data.fill(u32::MAX);
        }
        Ok(field)
    }

    /// Number of columns.
    pub fn xres(&self) -> usize {
        self.xres
    }

    /// Number of rows.
    pub fn yres(&self) -> usize {
        self.yres
    }

    /// Words per row.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// The packed words, `stride * yres` of them.
    pub fn words(&self) -> &[u32] {
        &self.data
    }

    /// Mutable access to the packed words; drops all cached derived data.
    pub fn words_mut(&mut self) -> &mut [u32] {
        self.invalidate();
        &mut self.data
    }

    /// The packed words of row `row`.
    #[inline]
    pub fn row(&self, row: usize) -> &[u32] {
        &self.data[row * self.stride..(row + 1) * self.stride]
    }

    #[inline]
    pub(crate) fn row_mut_raw(&mut self, row: usize) -> &mut [u32] {
        let stride = self.stride;
        &mut self.data[row * stride..(row + 1) * stride]
    }

    /// A bit cursor over row `row` starting at `col`.
    pub fn iter_row(&self, col: usize, row: usize) -> MaskIter<'_> {
        MaskIter::new(self.row(row), col)
    }

    /// Read a single bit.
    #[inline]
    pub fn get(&self, col: usize, row: usize) -> bool {
        debug_assert!(col < self.xres && row < self.yres);
        let w = row * self.stride + col / WORD_BITS;
        self.data[w] & (1u32 << (col % WORD_BITS)) != 0
    }

    /// Write a single bit; drops all cached derived data.
    #[inline]
    pub fn set(&mut self, col: usize, row: usize, value: bool) {
        debug_assert!(col < self.xres && row < self.yres);
        self.invalidate();
        self.set_raw(col, row, value);
    }

    /// Bit write without cache invalidation, for kernels that manage the
    /// cache themselves.
    #[inline]
    pub(crate) fn set_raw(&mut self, col: usize, row: usize, value: bool) {
        let w = row * self.stride + col / WORD_BITS;
        let bit = 1u32 << (col % WORD_BITS);
        if value {
            self.data[w] |= bit;
        } else {
            self.data[w] &= !bit;
        }
    }

    /// Drop all cached derived data (grain labelling, distance transform).
    pub fn invalidate(&mut self) {
        self.grains = None;
        self.distances = None;
    }

    /// Fill a part (the entire field for `None`) with a constant bit.
    pub fn fill(&mut self, part: Option<FieldPart>, value: bool) -> MaskResult<()> {
        let part = FieldPart::resolve(part, self.xres, self.yres)?;
        self.invalidate();
        if part.width == self.xres {
            // Whole rows, padding included.
            let fill = if value { u32::MAX } else { 0 };
            let start = part.row * self.stride;
            let end = (part.row + part.height) * self.stride;
            self.data[start..end].fill(fill);
            return Ok(());
        }
        self.fill_rows_raw(part.col, part.row, part.width, part.height, value);
        Ok(())
    }

    pub(crate) fn fill_rows_raw(
        &mut self,
        col: usize,
        row: usize,
        width: usize,
        height: usize,
        value: bool,
    ) {
        if width == 0 || height == 0 {
            return;
        }
        let run = WordRun::new(col, width);
        let stride = self.stride;
        for i in 0..height {
            let base = (row + i) * stride + run.start_word;
            if run.single_word() {
                let m = run.single_mask();
                if value {
                    self.data[base] |= m;
                } else {
                    self.data[base] &= !m;
                }
                continue;
            }
            let mut w = base;
            let mut remaining = width;
            apply_fill(&mut self.data[w], run.head_mask(), value);
            remaining -= WORD_BITS - run.off;
            w += 1;
            while remaining >= WORD_BITS {
                self.data[w] = if value { u32::MAX } else { 0 };
                remaining -= WORD_BITS;
                w += 1;
            }
            if remaining > 0 {
                apply_fill(&mut self.data[w], make_mask(0, remaining), value);
            }
        }
    }

    /// Invert a part (the entire field for `None`).
    pub fn invert(&mut self, part: Option<FieldPart>) -> MaskResult<()> {
        let part = FieldPart::resolve(part, self.xres, self.yres)?;
        self.invalidate();
        let run = WordRun::new(part.col, part.width);
        let stride = self.stride;
        for i in 0..part.height {
            let base = (part.row + i) * stride + run.start_word;
            if run.single_word() {
                self.data[base] ^= run.single_mask();
                continue;
            }
            let mut w = base;
            let mut remaining = part.width;
            self.data[w] ^= run.head_mask();
            remaining -= WORD_BITS - run.off;
            w += 1;
            while remaining >= WORD_BITS {
                self.data[w] = !self.data[w];
                remaining -= WORD_BITS;
                w += 1;
            }
            if remaining > 0 {
                self.data[w] ^= make_mask(0, remaining);
            }
        }
        Ok(())
    }

    /// Fill an elliptical area bound by `part`.
    ///
    /// With `entire_rectangle` every pixel of the part is written: the
    /// ellipse interior receives `value` and the exterior its complement.
    /// Otherwise only interior pixels are modified.
    ///
    /// One floating-point evaluation per row computes the interior margin
    /// `xlen = round(rx * (1 - sqrt(eta * (2 - eta))))` with
    /// `eta = (i + 0.5) / ry`.
    pub fn fill_ellipse(
        &mut self,
        part: Option<FieldPart>,
        entire_rectangle: bool,
        value: bool,
    ) -> MaskResult<()> {
        let part = FieldPart::resolve(part, self.xres, self.yres)?;
        self.invalidate();
        let rx = 0.5 * part.width as f64;
        let ry = 0.5 * part.height as f64;
        for i in 0..part.height {
            let eta = (i as f64 + 0.5) / ry;
            let xlen = (rx * (1.0 - (eta * (2.0 - eta).max(0.0)).sqrt())).round() as usize;
            debug_assert!(2 * xlen <= part.width);
            let row = part.row + i;
            if entire_rectangle && xlen > 0 {
                self.fill_rows_raw(part.col, row, xlen, 1, !value);
                self.fill_rows_raw(part.col + part.width - xlen, row, xlen, 1, !value);
            }
            self.fill_rows_raw(part.col + xlen, row, part.width - 2 * xlen, 1, value);
        }
        Ok(())
    }

    /// Copy a part of `self` into `dest` with its origin at
    /// `(destcol, destrow)`.
    ///
    /// The transferred rectangle is clipped to both fields; copying nothing
    /// is not an error. Rows aligned across the full width of both fields
    /// take a word-copy fast path.
    pub fn copy_to(
        &self,
        srcpart: Option<FieldPart>,
        dest: &mut MaskField,
        destcol: usize,
        destrow: usize,
    ) {
        let Some((col, row, width, height)) =
            clip_transfer(self, srcpart, dest, destcol, destrow)
        else {
            return;
        };
        dest.invalidate();
        if width == self.xres && width == dest.xres {
            debug_assert!(col == 0 && destcol == 0);
            let src_start = row * self.stride;
            let dst_start = destrow * dest.stride;
            dest.data[dst_start..dst_start + height * dest.stride]
                .copy_from_slice(&self.data[src_start..src_start + height * self.stride]);
            return;
        }
        for i in 0..height {
            let srow = self.row(row + i);
            let mut reader = BitReader::new(srow, col);
            let drow = dest.row_mut_raw(destrow + i);
            write_row_bits(drow, destcol, width, |n| reader.read(n));
        }
    }

    /// Count bits equal to `value`, optionally restricted to set bits of a
    /// congruent `mask`.
    pub fn count(&self, mask: Option<&MaskField>, value: bool) -> MaskResult<usize> {
        if let Some(mask) = mask {
            if mask.xres != self.xres || mask.yres != self.yres {
                return Err(
                    CommonError::DimensionMismatch(self.xres, self.yres, mask.xres, mask.yres)
                        .into(),
                );
            }
        }
        let end = self.xres % WORD_BITS;
        let tail = if end == 0 { u32::MAX } else { make_mask(0, end) };
        let mut total = 0usize;
        for i in 0..self.yres {
            let row = self.row(i);
            let mrow = mask.map(|m| m.row(i));
            for (w, &v) in row.iter().enumerate() {
                let v = if value { v } else { !v };
                let mut bits = v;
                if let Some(mrow) = mrow {
                    bits &= mrow[w];
                }
                if w + 1 == self.stride {
                    bits &= tail;
                }
                total += bits.count_ones() as usize;
            }
        }
        Ok(total)
    }

    /// Count bits equal to `value` inside a part.
    pub fn count_part(&self, part: Option<FieldPart>, value: bool) -> MaskResult<usize> {
        let part = FieldPart::resolve(part, self.xres, self.yres)?;
        let mut total = 0usize;
        for i in 0..part.height {
            total += self.count_row_raw(part.col, part.row + i, part.width, value);
        }
        Ok(total)
    }

    /// Count bits equal to `value` in each row of a part.
    pub fn count_rows(&self, part: Option<FieldPart>, value: bool) -> MaskResult<Vec<usize>> {
        let part = FieldPart::resolve(part, self.xres, self.yres)?;
        let mut counts = Vec::with_capacity(part.height);
        for i in 0..part.height {
            counts.push(self.count_row_raw(part.col, part.row + i, part.width, value));
        }
        Ok(counts)
    }

    fn count_row_raw(&self, col: usize, row: usize, width: usize, value: bool) -> usize {
        let run = WordRun::new(col, width);
        let words = self.row(row);
        let pick = |v: u32| if value { v } else { !v };
        if run.single_word() {
            return (pick(words[run.start_word]) & run.single_mask()).count_ones() as usize;
        }
        let mut total = (pick(words[run.start_word]) & run.head_mask()).count_ones() as usize;
        let mut remaining = width - (WORD_BITS - run.off);
        let mut w = run.start_word + 1;
        while remaining >= WORD_BITS {
            total += pick(words[w]).count_ones() as usize;
            remaining -= WORD_BITS;
            w += 1;
        }
        if remaining > 0 {
            total += (pick(words[w]) & make_mask(0, remaining)).count_ones() as usize;
        }
        total
    }

    /// Number of pixels of a part a consumer would process under `masking`.
    ///
    /// The mask consulted is `self`; `Ignore` does not consult it at all.
    pub fn part_count_masking(
        &self,
        part: Option<FieldPart>,
        masking: Masking,
    ) -> MaskResult<usize> {
        let resolved = FieldPart::resolve(part, self.xres, self.yres)?;
        match masking {
            Masking::Ignore => Ok(resolved.len()),
            Masking::Include => self.count_part(Some(resolved), true),
            Masking::Exclude => self.count_part(Some(resolved), false),
        }
    }
}

#[inline]
fn apply_fill(word: &mut u32, mask: u32, value: bool) {
    if value {
        *word |= mask;
    } else {
        *word &= !mask;
    }
}

/// Write `width` bits produced by `next_bits` into a packed row starting at
/// `destcol`, masking at the boundary words.
pub(crate) fn write_row_bits<F: FnMut(usize) -> u32>(
    drow: &mut [u32],
    destcol: usize,
    width: usize,
    mut next_bits: F,
) {
    merge_row_bits(drow, destcol, width, |_, bits| bits, &mut next_bits);
}

/// Combine `width` source bits with a packed destination row starting at
/// `destcol` via `op(dest_bits, src_bits)`, masking at the boundary words.
pub(crate) fn merge_row_bits<Op, F>(
    drow: &mut [u32],
    destcol: usize,
    width: usize,
    op: Op,
    next_bits: &mut F,
) where
    Op: Fn(u32, u32) -> u32,
    F: FnMut(usize) -> u32,
{
    let run = WordRun::new(destcol, width);
    let mut w = run.start_word;
    if run.single_word() {
        let m = run.single_mask();
        let vp = next_bits(width) << run.off;
        drow[w] = (drow[w] & !m) | (op(drow[w], vp) & m);
        return;
    }
    let head = WORD_BITS - run.off;
    let m0 = run.head_mask();
    let vp = next_bits(head) << run.off;
    drow[w] = (drow[w] & !m0) | (op(drow[w], vp) & m0);
    let mut remaining = width - head;
    w += 1;
    while remaining >= WORD_BITS {
        let vp = next_bits(WORD_BITS);
        drow[w] = op(drow[w], vp);
        remaining -= WORD_BITS;
        w += 1;
    }
    if remaining > 0 {
        let m1 = make_mask(0, remaining);
        let vp = next_bits(remaining);
        drow[w] = (drow[w] & !m1) | (op(drow[w], vp) & m1);
    }
}

/// Clip a source part and destination origin to what both fields can hold.
pub(crate) fn clip_transfer(
    src: &MaskField,
    srcpart: Option<FieldPart>,
    dest: &MaskField,
    destcol: usize,
    destrow: usize,
) -> Option<(usize, usize, usize, usize)> {
    let (col, row, mut width, mut height) = match srcpart {
        Some(p) => (p.col, p.row, p.width, p.height),
        None => (0, 0, src.xres, src.yres),
    };
    if col >= src.xres || row >= src.yres {
        return None;
    }
    width = width.min(src.xres - col);
    height = height.min(src.yres - row);
    if destcol >= dest.xres || destrow >= dest.yres {
        return None;
    }
    width = width.min(dest.xres - destcol);
    height = height.min(dest.yres - destrow);
    if width == 0 || height == 0 {
        return None;
    }
    Some((col, row, width, height))
}
