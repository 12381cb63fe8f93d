//! Morphological shrink and grow of mask grains.

use crate::bits::make_mask;
use crate::mask::MaskField;

/// Word-parallel erosion of one row.
///
/// `u` and `d` are the original rows above and below, `p` the original row
/// itself, `q` the output. The last word (index `last`) holds `end` valid
/// bits and is masked with `m0`.
#[allow(clippy::too_many_arguments)]
fn shrink_row(
    u: &[u32],
    p: &[u32],
    d: &[u32],
    m0: u32,
    last: usize,
    end: usize,
    from_borders: bool,
    q: &mut [u32],
) {
    if last == 0 {
        let v = p[0] & m0;
        let mut vl = v << 1;
        let mut vr = v >> 1;
        if !from_borders {
            vl |= v & 1;
            vr |= v & (1 << (end - 1));
        }
        q[0] = v & vl & vr & u[0] & d[0];
        return;
    }

    let v = p[0];
    let mut vl = v << 1;
    if !from_borders {
        vl |= v & 1;
    }
    let vr = (v >> 1) | (p[1] << 31);
    q[0] = v & vl & vr & u[0] & d[0];

    for w in 1..last {
        let v = p[w];
        let vl = (v << 1) | (p[w - 1] >> 31);
        let vr = (v >> 1) | (p[w + 1] << 31);
        q[w] = v & vl & vr & u[w] & d[w];
    }

    let v = p[last] & m0;
    let vl = (v << 1) | (p[last - 1] >> 31);
    let mut vr = v >> 1;
    if !from_borders {
        vr |= v & (1 << (end - 1));
    }
    q[last] = v & vl & vr & u[last] & d[last];
}

/// Word-parallel dilation of one row; the field border never contributes.
fn grow_row(u: &[u32], p: &[u32], d: &[u32], m0: u32, last: usize, q: &mut [u32]) {
    if last == 0 {
        let v = p[0] & m0;
        q[0] = v | (v << 1) | (v >> 1) | u[0] | d[0];
        return;
    }

    let v = p[0];
    let vr = (v >> 1) | (p[1] << 31);
    q[0] = v | (v << 1) | vr | u[0] | d[0];

    for w in 1..last {
        let v = p[w];
        let vl = (v << 1) | (p[w - 1] >> 31);
        let vr = (v >> 1) | (p[w + 1] << 31);
        q[w] = v | vl | vr | u[w] | d[w];
    }

    let v = p[last] & m0;
    let vl = (v << 1) | (p[last - 1] >> 31);
    q[last] = v | vl | (v >> 1) | u[last] | d[last];
}

impl MaskField {
    /// Shrink grains by one pixel from all four directions.
    ///
    /// A pixel stays set iff it and its four 4-neighbours are set. With
    /// `from_borders` the field edges count as clear, otherwise an edge
    /// neighbour repeats the pixel's own value.
    pub fn shrink(&mut self, from_borders: bool) {
        let xres = self.xres();
        let yres = self.yres();
        let stride = self.stride();

        if from_borders && yres <= 2 {
            self.fill(None, false).expect("entire field is a valid part");
            return;
        }
        self.invalidate();

        let end = if xres % 32 != 0 { xres % 32 } else { 32 };
        let m0 = make_mask(0, end);
        let last = stride - 1;

        if yres == 1 {
            let row = self.row(0).to_vec();
            shrink_row(
                &row,
                &row,
                &row,
                m0,
                last,
                end,
                from_borders,
                self.row_mut_raw(0),
            );
            return;
        }

        let mut prev = self.row(0).to_vec();
        let mut cur = vec![0u32; stride];

        if from_borders {
            self.row_mut_raw(0).fill(0);
        } else {
            let next = self.row(1).to_vec();
            let p = prev.clone();
            shrink_row(&p, &p, &next, m0, last, end, from_borders, self.row_mut_raw(0));
        }

        for i in 1..yres - 1 {
            cur.copy_from_slice(self.row(i));
            let next = self.row(i + 1).to_vec();
            shrink_row(
                &prev,
                &cur,
                &next,
                m0,
                last,
                end,
                from_borders,
                self.row_mut_raw(i),
            );
            std::mem::swap(&mut prev, &mut cur);
        }

        if from_borders {
            self.row_mut_raw(yres - 1).fill(0);
        } else {
            cur.copy_from_slice(self.row(yres - 1));
            shrink_row(
                &prev,
                &cur,
                &cur,
                m0,
                last,
                end,
                from_borders,
                self.row_mut_raw(yres - 1),
            );
        }
    }

    fn grow_field(&mut self) {
        let xres = self.xres();
        let yres = self.yres();
        let stride = self.stride();
        let end = if xres % 32 != 0 { xres % 32 } else { 32 };
        let m0 = make_mask(0, end);
        let last = stride - 1;

        if yres == 1 {
            let row = self.row(0).to_vec();
            grow_row(&row, &row, &row, m0, last, self.row_mut_raw(0));
            return;
        }

        let mut prev = self.row(0).to_vec();
        let mut cur = vec![0u32; stride];

        {
            let next = self.row(1).to_vec();
            let p = prev.clone();
            grow_row(&p, &p, &next, m0, last, self.row_mut_raw(0));
        }

        for i in 1..yres - 1 {
            cur.copy_from_slice(self.row(i));
            let next = self.row(i + 1).to_vec();
            grow_row(&prev, &cur, &next, m0, last, self.row_mut_raw(i));
            std::mem::swap(&mut prev, &mut cur);
        }

        cur.copy_from_slice(self.row(yres - 1));
        grow_row(&prev, &cur, &cur, m0, last, self.row_mut_raw(yres - 1));
    }

    /// Grow grains by one pixel from all four directions.
    ///
    /// With `separate_grains` the growth of a grain stops where it would
    /// touch another grain: grains are labelled beforehand and any newly
    /// set pixel whose 4-neighbours carry two or more different labels is
    /// cleared again. The grain labelling survives the operation.
    pub fn grow(&mut self, separate_grains: bool) {
        if !separate_grains {
            self.invalidate();
            self.grow_field();
            return;
        }

        self.grain_numbers();
        let mut grains = self.grains.take().expect("grain numbers just computed");
        self.invalidate();
        self.grow_field();
        self.prevent_grain_merging(&mut grains.map);

        // Sizes and bounding boxes are stale after growth, the label map
        // itself was kept consistent by the merge prevention pass.
        grains.sizes = None;
        grains.bboxes = None;
        grains.positions = None;
        self.grains = Some(grains);
    }

    /// Resolve grown pixels against the pre-growth label map: propagate the
    /// unique neighbour label, or clear the pixel where labels conflict.
    fn prevent_grain_merging(&mut self, grains: &mut [u32]) {
        let xres = self.xres();
        let yres = self.yres();
        for i in 0..yres {
            for j in 0..xres {
                let k = i * xres + j;
                if grains[k] == 0 && self.get(j, i) {
                    let g1 = if i > 0 { grains[k - xres] } else { 0 };
                    let g2 = if j > 0 { grains[k - 1] } else { 0 };
                    let g3 = if j + 1 < xres { grains[k + 1] } else { 0 };
                    let g4 = if i + 1 < yres { grains[k + xres] } else { 0 };
                    // If all nonzero labels are equal they equal the OR too.
                    let gno = g1 | g2 | g3 | g4;
                    if (g1 == 0 || g1 == gno)
                        && (g2 == 0 || g2 == gno)
                        && (g3 == 0 || g3 == gno)
                        && (g4 == 0 || g4 == gno)
                    {
                        grains[k] = gno;
                    } else {
                        self.set_raw(j, i, false);
                    }
                }
            }
        }
    }
}
