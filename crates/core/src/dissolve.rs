//! Full-period pseudo-random traversal of a grid using a Galois LFSR.
//!
//! A `Dissolve` visits every cell of a `width x height` grid exactly once per
//! cycle in a scrambled order, with constant state and no shuffle buffer. The
//! register is `bitlength(width * height - 1)` bits wide (at least 2), so its
//! raw output covers `[0, 2^bits)`; [`Dissolve::next_position`] discards the
//! values past the grid.

use crate::error::FlowError;

/// Maximal-length feedback masks indexed by register width.
const FEEDBACK_MASKS: [u32; 20] = [
    0, 0, 0x03, 0x06, 0x0c, 0x14, 0x30, 0x60, 0xb8, 0x0110, 0x0240, 0x0500, 0x0ca0, 0x1b00,
    0x3500, 0x6000, 0xb400, 0x0001_2000, 0x0002_0400, 0x0007_2000,
];

/// Widest register with a known mask.
pub const MAX_REGISTER_BITS: u32 = 19;

fn bit_length(n: usize) -> u32 {
    usize::BITS - n.leading_zeros()
}

/// LFSR walk over a `width x height` grid.
#[derive(Debug, Clone)]
pub struct Dissolve {
    width: usize,
    height: usize,
    bits: u32,
    mask: u32,
    seq: u32,
    initial: u32,
}

impl Dissolve {
    /// Creates a traversal of `width * height` cells.
    ///
    /// Returns `FlowError::InvalidDimensions` for an empty grid and
    /// `FlowError::InvalidParameter` for grids wider than the mask table.
    pub fn new(width: usize, height: usize) -> Result<Self, FlowError> {
        if width == 0 || height == 0 {
            return Err(FlowError::InvalidDimensions);
        }
        let cells = width
            .checked_mul(height)
            .ok_or(FlowError::InvalidDimensions)?;
        let bits = bit_length(cells - 1).max(2);
        if bits > MAX_REGISTER_BITS {
            return Err(FlowError::invalid(
                "dissolve",
                format!("{cells} cells need a {bits}-bit register (max {MAX_REGISTER_BITS})"),
            ));
        }
        Ok(Self {
            width,
            height,
            bits,
            mask: FEEDBACK_MASKS[bits as usize],
            seq: 0,
            initial: 1,
        })
    }

    /// Register width in bits; one cycle yields `2^bits` values.
    pub fn register_bits(&self) -> u32 {
        self.bits
    }

    /// Number of raw values in one full cycle.
    pub fn period(&self) -> usize {
        1usize << self.bits
    }

    /// Next raw register value in `[0, 2^bits)`.
    ///
    /// Zero is not on the LFSR cycle, so it is emitted once at the start of
    /// each cycle and the register then restarts from the initial value.
    pub fn next_value(&mut self) -> usize {
        if self.seq == 0 {
            self.seq = self.initial;
            return 0;
        }
        let current = self.seq;
        self.seq = if self.seq & 1 == 1 {
            (self.seq >> 1) ^ self.mask
        } else {
            self.seq >> 1
        };
        if self.seq == self.initial {
            self.seq = 0;
        }
        current as usize
    }

    /// Next grid cell `(column, row)`, skipping register values past the grid.
    pub fn next_position(&mut self) -> (usize, usize) {
        loop {
            let value = self.next_value();
            let row = value / self.width;
            if row < self.height {
                return (value % self.width, row);
            }
        }
    }

    /// Moves the cycle's starting point (0 maps to 1) and restarts at the
    /// zero sentinel.
    pub fn set_initial_value(&mut self, value: usize) {
        let limit = (1usize << self.bits) - 1;
        let v = (value % (limit + 1)) as u32;
        self.initial = if v == 0 { 1 } else { v };
        self.seq = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn bits_for(n: usize) -> u32 {
        bit_length(n - 1).max(2)
    }

    // -- full coverage --

    #[test]
    fn full_cycle_covers_each_index_once() {
        for n in [2usize, 3, 5, 16, 17, 100] {
            let mut d = Dissolve::new(n, 1).unwrap();
            let period = 1usize << bits_for(n);
            assert_eq!(d.period(), period);
            let seen: Vec<usize> = (0..period).map(|_| d.next_value()).filter(|&v| v < n).collect();
            let unique: HashSet<usize> = seen.iter().copied().collect();
            assert_eq!(seen.len(), n, "n = {n}: {seen:?}");
            assert_eq!(unique.len(), n, "n = {n} repeated a value");
        }
    }

    #[test]
    fn raw_cycle_is_a_permutation_for_every_mask() {
        for bits in 2..=MAX_REGISTER_BITS.min(14) {
            let cells = 1usize << bits;
            let mut d = Dissolve::new(cells, 1).unwrap();
            assert_eq!(d.register_bits(), bits);
            let mut seen = vec![false; cells];
            for _ in 0..cells {
                let v = d.next_value();
                assert!(!seen[v], "{bits}-bit register repeated {v}");
                seen[v] = true;
            }
        }
    }

    #[test]
    fn second_cycle_repeats_the_first() {
        let mut d = Dissolve::new(7, 3).unwrap();
        let p = d.period();
        let first: Vec<usize> = (0..p).map(|_| d.next_value()).collect();
        let second: Vec<usize> = (0..p).map(|_| d.next_value()).collect();
        assert_eq!(first, second);
        assert_eq!(first[0], 0);
    }

    #[test]
    fn positions_cover_grid() {
        let (w, h) = (9, 5);
        let mut d = Dissolve::new(w, h).unwrap();
        let cells: HashSet<(usize, usize)> = (0..w * h).map(|_| d.next_position()).collect();
        assert_eq!(cells.len(), w * h);
        assert!(cells.iter().all(|&(x, y)| x < w && y < h));
    }

    // -- reseeding --

    #[test]
    fn reseed_changes_order_not_coverage() {
        let mut a = Dissolve::new(20, 1).unwrap();
        let mut b = Dissolve::new(20, 1).unwrap();
        b.set_initial_value(13);
        let p = a.period();
        let va: Vec<usize> = (0..p).map(|_| a.next_value()).collect();
        let vb: Vec<usize> = (0..p).map(|_| b.next_value()).collect();
        assert_ne!(va, vb);
        let sa: HashSet<_> = va.into_iter().collect();
        let sb: HashSet<_> = vb.into_iter().collect();
        assert_eq!(sa, sb);
    }

    #[test]
    fn zero_initial_value_maps_to_one() {
        let mut a = Dissolve::new(10, 1).unwrap();
        let mut b = Dissolve::new(10, 1).unwrap();
        b.set_initial_value(0);
        for _ in 0..40 {
            assert_eq!(a.next_value(), b.next_value());
        }
    }

    // -- construction --

    #[test]
    fn empty_grid_rejected() {
        assert!(matches!(Dissolve::new(0, 3), Err(FlowError::InvalidDimensions)));
    }

    #[test]
    fn oversized_grid_rejected() {
        assert!(matches!(
            Dissolve::new(1024, 1024),
            Err(FlowError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn single_cell_uses_two_bit_register() {
        let mut d = Dissolve::new(1, 1).unwrap();
        assert_eq!(d.register_bits(), 2);
        for _ in 0..10 {
            assert_eq!(d.next_position(), (0, 0));
        }
    }
}
