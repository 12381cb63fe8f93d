//! The sixteen two-operand logical operations on mask fields.

use spm_common::{CommonError, FieldPart};

use crate::error::MaskResult;
use crate::bits::BitReader;
use crate::mask::{merge_row_bits, MaskField};

/// A two-input Boolean operator `f(A, B)` where `A` is the destination bit
/// and `B` the operand bit.
///
/// The discriminant is the operator's truth table: bit `2 * A + B` of the
/// discriminant is the output for inputs `(A, B)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogicalOp {
    /// Always zero; mask clearing.
    Zero = 0,
    /// Conjunction `A ∧ B`; mask intersection.
    And = 1,
    /// Negated implication `A ∧ ¬B`; mask subtraction.
    NImpl = 2,
    /// First operand; no change.
    A = 3,
    /// Negated converse implication `¬A ∧ B`.
    NCImpl = 4,
    /// Second operand; mask copying.
    B = 5,
    /// Exclusive disjunction `A ⊻ B`; symmetric subtraction.
    Xor = 6,
    /// Disjunction `A ∨ B`; mask union.
    Or = 7,
    /// Negated disjunction.
    Nor = 8,
    /// Negated exclusive disjunction.
    NXor = 9,
    /// Negated second operand.
    NB = 10,
    /// Converse implication `A ∨ ¬B`.
    CImpl = 11,
    /// Negated first operand; mask inversion.
    NA = 12,
    /// Implication `¬A ∨ B`.
    Impl = 13,
    /// Negated conjunction.
    Nand = 14,
    /// Always one; mask filling.
    One = 15,
}

impl LogicalOp {
    /// Whether the result ignores the second operand.
    pub fn ignores_operand(self) -> bool {
        matches!(self, LogicalOp::Zero | LogicalOp::A | LogicalOp::NA | LogicalOp::One)
    }

    /// Whether the result ignores the first operand.
    pub fn ignores_dest(self) -> bool {
        matches!(self, LogicalOp::Zero | LogicalOp::B | LogicalOp::NB | LogicalOp::One)
    }

    /// Apply the operator to words of destination and operand bits.
    #[inline]
    pub fn apply_word(self, a: u32, b: u32) -> u32 {
        let tt = self as u8;
        let mut v = 0;
        if tt & 0b0001 != 0 {
            v |= !a & !b;
        }
        if tt & 0b0010 != 0 {
            v |= !a & b;
        }
        if tt & 0b0100 != 0 {
            v |= a & !b;
        }
        if tt & 0b1000 != 0 {
            v |= a & b;
        }
        v
    }
}

impl MaskField {
    /// Combine this field with a congruent operand, `self = op(self, operand)`.
    ///
    /// `operand` may be omitted for the degenerate operators that do not
    /// depend on it. An optional `write_mask` restricts the written bits;
    /// bits with a clear mask bit are left untouched. Degenerate operators
    /// under a write mask are rewritten to an equivalent two-operand form on
    /// the mask itself (for example `Zero` with mask `M` becomes
    /// `self ∧ ¬M`), so no separate masked kernels are needed.
    pub fn logical(
        &mut self,
        operand: Option<&MaskField>,
        write_mask: Option<&MaskField>,
        op: LogicalOp,
    ) -> MaskResult<()> {
        if op == LogicalOp::A {
            return Ok(());
        }
        for other in [operand, write_mask].into_iter().flatten() {
            if other.xres() != self.xres() || other.yres() != self.yres() {
                return Err(CommonError::DimensionMismatch(
                    self.xres(),
                    self.yres(),
                    other.xres(),
                    other.yres(),
                )
                .into());
            }
        }
        // Rewrite degenerate masked operations to unmasked two-operand ones.
        let (op, operand, write_mask) = match (op, write_mask) {
            (LogicalOp::Zero, Some(m)) => (LogicalOp::NImpl, Some(m), None),
            (LogicalOp::One, Some(m)) => (LogicalOp::Or, Some(m), None),
            (LogicalOp::NA, Some(m)) => (LogicalOp::Xor, Some(m), None),
            _ => (op, operand, write_mask),
        };
        if !op.ignores_operand() && operand.is_none() {
            return Err(CommonError::invalid("logical operation requires an operand").into());
        }

        match op {
            LogicalOp::Zero => return self.fill(None, false),
            LogicalOp::One => return self.fill(None, true),
            LogicalOp::NA => return self.invert(None),
            _ => {}
        }

        let n = self.stride() * self.yres();
        let q = self.words_mut();
        let p = operand.map(|o| o.words());
        let m = write_mask.map(|o| o.words());
        for i in 0..n {
            let b = p.map_or(0, |p| p[i]);
            let v = op.apply_word(q[i], b);
            q[i] = match m {
                None => v,
                Some(m) => (q[i] & !m[i]) | (v & m[i]),
            };
        }
        Ok(())
    }

    /// Combine a part of this field with operand bits taken from
    /// `(opcol, oprow)` of `operand`, allowing arbitrary bit misalignment.
    ///
    /// The processed rectangle is clipped to both fields; clipping everything
    /// away is not an error. Operators that ignore the destination dispatch
    /// to [`MaskField::fill`], [`MaskField::copy_to`] or
    /// [`MaskField::invert`].
    pub fn logical_part(
        &mut self,
        part: Option<FieldPart>,
        operand: &MaskField,
        opcol: usize,
        oprow: usize,
        op: LogicalOp,
    ) -> MaskResult<()> {
        if op == LogicalOp::A {
            return Ok(());
        }
        let (col, row, mut width, mut height) = match part {
            Some(p) => (p.col, p.row, p.width, p.height),
            None => (0, 0, self.xres(), self.yres()),
        };
        if col >= self.xres() || row >= self.yres() {
            return Ok(());
        }
        width = width.min(self.xres() - col);
        height = height.min(self.yres() - row);
        if opcol >= operand.xres() || oprow >= operand.yres() {
            return Ok(());
        }
        width = width.min(operand.xres() - opcol);
        height = height.min(operand.yres() - oprow);
        if width == 0 || height == 0 {
            return Ok(());
        }

        let rect = FieldPart::new(col, row, width, height);
        match op {
            LogicalOp::Zero => return self.fill(Some(rect), false),
            LogicalOp::One => return self.fill(Some(rect), true),
            LogicalOp::NA => return self.invert(Some(rect)),
            LogicalOp::B => {
                let oprect = FieldPart::new(opcol, oprow, width, height);
                operand.copy_to(Some(oprect), self, col, row);
                return Ok(());
            }
            _ => {}
        }

        self.invalidate();
        for i in 0..height {
            let srow = operand.row(oprow + i);
            let mut reader = BitReader::new(srow, opcol);
            let drow = self.row_mut_raw(row + i);
            merge_row_bits(drow, col, width, |a, b| op.apply_word(a, b), &mut |n| {
                reader.read(n)
            });
        }
        Ok(())
    }
}
