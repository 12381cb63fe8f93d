//! Grain labelling: connected components of set bits under 4-connectivity.

use spm_common::{CommonError, FieldPart};
use tracing::debug;

use crate::error::MaskResult;
use crate::mask::MaskField;

/// Cached grain data of a mask field, dropped as a whole on mutation.
///
/// Labels run `1..=ngrains` in first-touch row-major order; 0 is the empty
/// space between grains. Per-grain arrays have `ngrains + 1` entries with
/// index 0 describing the empty space.
#[derive(Debug, Clone)]
pub struct GrainData {
    pub(crate) map: Vec<u32>,
    pub(crate) ngrains: usize,
    pub(crate) sizes: Option<Vec<u32>>,
    pub(crate) bboxes: Option<Vec<FieldPart>>,
    pub(crate) positions: Option<Vec<(f64, f64)>>,
}

/// Merge equivalence classes of labels `i` and `j`, path-compressing both
/// chains to the smaller representative.
fn resolve_grain_map(m: &mut [u32], i: u32, j: u32) {
    let mut ii = i;
    while m[ii as usize] != ii {
        ii = m[ii as usize];
    }
    let mut jj = j;
    while m[jj as usize] != jj {
        jj = m[jj as usize];
    }
    let k = ii.min(jj);

    let mut i = i;
    let mut ii = m[i as usize];
    while m[ii as usize] != ii {
        m[i as usize] = k;
        i = ii;
        ii = m[ii as usize];
    }
    m[ii as usize] = k;

    let mut j = j;
    let mut jj = m[j as usize];
    while m[jj as usize] != jj {
        m[j as usize] = k;
        j = jj;
        jj = m[jj as usize];
    }
    m[jj as usize] = k;
}

impl MaskField {
    fn number_grains(&mut self) {
        let xres = self.xres();
        let yres = self.yres();
        let mut map: Vec<u32> = vec![0; xres * yres];
        let mut m: Vec<u32> = vec![0];
        let mut max_id: u32 = 0;

        // First pass: propagate labels from top and left neighbours,
        // recording joins in the equivalence map.
        for i in 0..yres {
            let mut iter = self.iter_row(0, i);
            let mut grain_id: u32 = 0;
            for j in 0..xres {
                let k = i * xres + j;
                if iter.get() {
                    if i > 0 {
                        let id = map[k - xres];
                        if id != 0 {
                            if grain_id == 0 {
                                grain_id = id;
                            } else if id != grain_id {
                                resolve_grain_map(&mut m, id, grain_id);
                                grain_id = m[id as usize];
                            }
                        }
                    }
                    if grain_id == 0 {
                        max_id += 1;
                        grain_id = max_id;
                        m.push(grain_id);
                    }
                } else {
                    grain_id = 0;
                }
                map[k] = grain_id;
                iter.next();
            }
        }

        // Full resolution works downwards from the lowest label.
        for i in 1..=max_id as usize {
            m[i] = m[m[i] as usize];
        }

        // Compact labels into 1..=ngrains preserving first-touch order.
        let mut mm: Vec<u32> = vec![0; max_id as usize + 1];
        let mut id: u32 = 0;
        for i in 1..=max_id as usize {
            let rep = m[i] as usize;
            if mm[rep] == 0 {
                id += 1;
                mm[rep] = id;
            }
            m[i] = mm[rep];
        }

        for g in map.iter_mut() {
            *g = m[*g as usize];
        }

        debug!(ngrains = id, "labelled mask grains");
        self.grains = Some(GrainData {
            map,
            ngrains: id as usize,
            sizes: None,
            bboxes: None,
            positions: None,
        });
    }

    /// The grain label map, computing it if necessary.
    pub fn grain_numbers(&mut self) -> &[u32] {
        if self.grains.is_none() {
            self.number_grains();
        }
        &self.grains.as_ref().expect("grains just computed").map
    }

    /// Number of grains.
    pub fn n_grains(&mut self) -> usize {
        self.grain_numbers();
        self.grains.as_ref().expect("grains computed").ngrains
    }

    fn calculate_grain_properties(&mut self) {
        self.grain_numbers();
        let xres = self.xres();
        let yres = self.yres();
        let grains = self.grains.as_mut().expect("grains computed");
        let ngrains = grains.ngrains;

        let mut sizes = vec![0u32; ngrains + 1];
        let mut min_col = vec![usize::MAX; ngrains + 1];
        let mut min_row = vec![usize::MAX; ngrains + 1];
        let mut max_col = vec![0usize; ngrains + 1];
        let mut max_row = vec![0usize; ngrains + 1];

        for i in 0..yres {
            for j in 0..xres {
                let g = grains.map[i * xres + j] as usize;
                sizes[g] += 1;
                min_col[g] = min_col[g].min(j);
                max_col[g] = max_col[g].max(j);
                min_row[g] = min_row[g].min(i);
                max_row[g] = max_row[g].max(i);
            }
        }

        let bboxes = (0..=ngrains)
            .map(|g| {
                if min_col[g] == usize::MAX {
                    // The empty space can be empty when the field is full.
                    FieldPart::new(0, 0, 0, 0)
                } else {
                    FieldPart::new(
                        min_col[g],
                        min_row[g],
                        max_col[g] + 1 - min_col[g],
                        max_row[g] + 1 - min_row[g],
                    )
                }
            })
            .collect();

        grains.sizes = Some(sizes);
        grains.bboxes = Some(bboxes);
    }

    /// Pixel counts of each grain; item 0 is the empty space.
    pub fn grain_sizes(&mut self) -> &[u32] {
        if self.grains.as_ref().map_or(true, |g| g.sizes.is_none()) {
            self.calculate_grain_properties();
        }
        self.grains
            .as_ref()
            .and_then(|g| g.sizes.as_deref())
            .expect("sizes computed")
    }

    /// Bounding box of each grain; item 0 is the empty space and may be
    /// empty when the field is fully set.
    pub fn grain_bounding_boxes(&mut self) -> &[FieldPart] {
        if self.grains.as_ref().map_or(true, |g| g.bboxes.is_none()) {
            self.calculate_grain_properties();
        }
        self.grains
            .as_ref()
            .and_then(|g| g.bboxes.as_deref())
            .expect("bboxes computed")
    }

    /// Install representative positions (pixel coordinates), one per grain
    /// plus the unused zeroth entry. The metrology layer computes these as
    /// maximum-inscribed-disc centres.
    pub fn set_grain_positions(&mut self, positions: Vec<(f64, f64)>) -> MaskResult<()> {
        self.grain_numbers();
        let grains = self.grains.as_mut().expect("grains computed");
        if positions.len() != grains.ngrains + 1 {
            return Err(CommonError::IndexOutOfRange {
                index: positions.len(),
                len: grains.ngrains + 1,
            }
            .into());
        }
        grains.positions = Some(positions);
        Ok(())
    }

    /// Previously installed representative positions, if any.
    pub fn grain_positions(&self) -> Option<&[(f64, f64)]> {
        self.grains.as_ref().and_then(|g| g.positions.as_deref())
    }

    /// Remove one grain, renumbering the remaining grains downward and
    /// keeping cached sizes and bounding boxes usable.
    pub fn remove_grain(&mut self, grain_id: usize) -> MaskResult<()> {
        if grain_id == 0 {
            return Err(CommonError::invalid("grain 0 is the empty space").into());
        }
        self.grain_numbers();
        let xres = self.xres();
        let yres = self.yres();
        let ngrains = self.grains.as_ref().expect("grains computed").ngrains;
        if grain_id > ngrains {
            return Err(CommonError::IndexOutOfRange {
                index: grain_id,
                len: ngrains + 1,
            }
            .into());
        }

        if ngrains == 1 {
            // Keep the cache usable instead of a full invalidating fill.
            let stride = self.stride();
            for i in 0..yres {
                self.row_mut_raw(i)[..stride].fill(0);
            }
            let grains = self.grains.as_mut().expect("grains computed");
            grains.map.fill(0);
            grains.ngrains = 0;
            if let Some(sizes) = grains.sizes.as_mut() {
                *sizes = vec![(xres * yres) as u32];
            }
            if let Some(bboxes) = grains.bboxes.as_mut() {
                *bboxes = vec![FieldPart::entire(xres, yres)];
            }
            grains.positions = None;
            return Ok(());
        }

        let mut grains = self.grains.take().expect("grains computed");
        let bbox = grains
            .bboxes
            .as_ref()
            .map(|b| b[grain_id])
            .unwrap_or_else(|| FieldPart::entire(xres, yres));

        // Clear the grain's bits inside its bounding box.
        for i in bbox.row..bbox.row + bbox.height {
            for j in bbox.col..bbox.col + bbox.width {
                if grains.map[i * xres + j] as usize == grain_id {
                    self.set_raw(j, i, false);
                }
            }
        }

        // Renumber the label map.
        for g in grains.map.iter_mut() {
            if *g as usize == grain_id {
                *g = 0;
            } else if *g as usize > grain_id {
                *g -= 1;
            }
        }

        if let Some(bboxes) = grains.bboxes.as_mut() {
            // Freed pixels join the empty space.
            bboxes[0] = union_parts(bboxes[0], bbox);
            bboxes.remove(grain_id);
        }
        if let Some(sizes) = grains.sizes.as_mut() {
            sizes[0] += sizes[grain_id];
            sizes.remove(grain_id);
        }
        grains.positions = None;
        grains.ngrains -= 1;
        debug!(grain_id, ngrains = grains.ngrains, "removed grain");
        self.grains = Some(grains);
        Ok(())
    }

    /// Extract a single grain into `target`, resizing it to the grain's
    /// bounding box plus `border_width` clear pixels on each side. Passing
    /// grain 0 extracts the entire unmasked area.
    pub fn extract_grain(
        &mut self,
        target: &mut MaskField,
        grain_id: usize,
        border_width: usize,
    ) -> MaskResult<()> {
        self.grain_bounding_boxes();
        let xres = self.xres();
        let grains = self.grains.as_ref().expect("grains computed");
        let ngrains = grains.ngrains;
        if grain_id > ngrains {
            return Err(CommonError::IndexOutOfRange {
                index: grain_id,
                len: ngrains + 1,
            }
            .into());
        }
        let bbox = grains.bboxes.as_ref().expect("bboxes computed")[grain_id];

        *target = MaskField::new(
            bbox.width + 2 * border_width,
            bbox.height + 2 * border_width,
        )?;
        for i in 0..bbox.height {
            for j in 0..bbox.width {
                let g = grains.map[(bbox.row + i) * xres + bbox.col + j] as usize;
                if g == grain_id {
                    target.set_raw(border_width + j, border_width + i, true);
                }
            }
        }
        Ok(())
    }
}

fn union_parts(a: FieldPart, b: FieldPart) -> FieldPart {
    if a.is_empty() {
        return b;
    }
    if b.is_empty() {
        return a;
    }
    let col = a.col.min(b.col);
    let row = a.row.min(b.row);
    let right = (a.col + a.width).max(b.col + b.width);
    let bottom = (a.row + a.height).max(b.row + b.height);
    FieldPart::new(col, row, right - col, bottom - row)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from_rows(rows: &[&str]) -> MaskField {
        let yres = rows.len();
        let xres = rows[0].len();
        let mut m = MaskField::new(xres, yres).unwrap();
        for (i, r) in rows.iter().enumerate() {
            for (j, ch) in r.chars().enumerate() {
                if ch == '#' {
                    m.set(j, i, true);
                }
            }
        }
        m
    }

    #[test]
    fn test_two_grains() {
        let mut m = mask_from_rows(&[
            "##..#",
            "##..#",
            ".....",
        ]);
        assert_eq!(m.n_grains(), 2);
        let map = m.grain_numbers().to_vec();
        assert_eq!(map[0], 1);
        assert_eq!(map[4], 2);
        assert_eq!(map[5], 1);
        assert_eq!(map[10], 0);
    }

    #[test]
    fn test_first_touch_order() {
        // The grain containing the lexicographically first pixel gets label 1
        // even when a later-started grain merges across rows.
        let mut m = mask_from_rows(&[
            "#.#",
            "###",
        ]);
        assert_eq!(m.n_grains(), 1);
        let map = m.grain_numbers();
        assert!(map.iter().all(|&g| g == 0 || g == 1));
    }

    #[test]
    fn test_u_shape_merge() {
        let mut m = mask_from_rows(&[
            "#.#",
            "#.#",
            "###",
        ]);
        assert_eq!(m.n_grains(), 1);
    }

    #[test]
    fn test_diagonal_not_connected() {
        let mut m = mask_from_rows(&[
            "#.",
            ".#",
        ]);
        assert_eq!(m.n_grains(), 2);
    }

    #[test]
    fn test_sizes_and_bboxes() {
        let mut m = mask_from_rows(&[
            "##...",
            "##...",
            "....#",
        ]);
        let sizes = m.grain_sizes().to_vec();
        assert_eq!(sizes, vec![10, 4, 1]);
        let bboxes = m.grain_bounding_boxes().to_vec();
        assert_eq!(bboxes[1], FieldPart::new(0, 0, 2, 2));
        assert_eq!(bboxes[2], FieldPart::new(4, 2, 1, 1));
        assert_eq!(bboxes[0], FieldPart::new(0, 0, 5, 3));
    }

    #[test]
    fn test_full_field_single_grain() {
        let mut m = MaskField::new_filled(8, 4, true).unwrap();
        assert_eq!(m.n_grains(), 1);
        let bboxes = m.grain_bounding_boxes();
        assert_eq!(bboxes[1], FieldPart::new(0, 0, 8, 4));
        assert!(bboxes[0].is_empty());
    }

    #[test]
    fn test_remove_grain_renumbers() {
        let mut m = mask_from_rows(&[
            "#..#..#",
            ".......",
        ]);
        assert_eq!(m.n_grains(), 3);
        let sizes_before = m.grain_sizes().to_vec();
        assert_eq!(sizes_before[0], 11);
        m.remove_grain(2).unwrap();
        assert_eq!(m.grains.as_ref().unwrap().ngrains, 2);
        assert!(!m.get(3, 0));
        assert!(m.get(0, 0) && m.get(6, 0));
        let sizes = m.grain_sizes().to_vec();
        assert_eq!(sizes, vec![12, 1, 1]);
        // Labels must still match a fresh computation.
        let map = m.grain_numbers().to_vec();
        let mut fresh = m.clone();
        fresh.invalidate();
        assert_eq!(fresh.grain_numbers(), &map[..]);
    }

    #[test]
    fn test_remove_last_grain() {
        let mut m = MaskField::new_filled(4, 2, true).unwrap();
        assert_eq!(m.n_grains(), 1);
        m.remove_grain(1).unwrap();
        assert_eq!(m.count(None, true).unwrap(), 0);
        assert_eq!(m.grain_sizes()[0], 8);
    }

    #[test]
    fn test_extract_grain_with_border() {
        let mut m = mask_from_rows(&[
            ".....",
            ".##..",
            ".#...",
            ".....",
        ]);
        let mut target = MaskField::new(1, 1).unwrap();
        m.extract_grain(&mut target, 1, 1).unwrap();
        assert_eq!(target.xres(), 4);
        assert_eq!(target.yres(), 4);
        assert_eq!(target.count(None, true).unwrap(), 3);
        assert!(target.get(1, 1) && target.get(2, 1) && target.get(1, 2));
    }

    #[test]
    fn test_labels_positive_and_connected() {
        // Invariant: every set bit gets a label in 1..=ngrains, clear bits 0.
        let mut m = mask_from_rows(&[
            "##.#.###",
            "#..#...#",
            "####.#.#",
        ]);
        let n = m.n_grains();
        let map = m.grain_numbers().to_vec();
        for i in 0..3 {
            for j in 0..8 {
                let g = map[i * 8 + j] as usize;
                if m.get(j, i) {
                    assert!(g >= 1 && g <= n);
                } else {
                    assert_eq!(g, 0);
                }
            }
        }
    }
}
