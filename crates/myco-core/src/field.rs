//! Double-buffered intensity fields.

use crate::error::InvariantViolation;
use crate::grid::GridSpec;

/// Single-channel intensities in `[0, 1]` laid out row-major over a torus.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    grid: GridSpec,
    cells: Vec<f32>,
}

impl Field {
    #[must_use]
    pub fn new(grid: GridSpec) -> Self {
        Self {
            grid,
            cells: vec![0.0; grid.cells()],
        }
    }

    #[must_use]
    pub const fn grid(&self) -> GridSpec {
        self.grid
    }

    #[must_use]
    pub fn cells(&self) -> &[f32] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [f32] {
        &mut self.cells
    }

    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.grid.width() || y >= self.grid.height() {
            return None;
        }
        self.cells.get(self.grid.index(x, y)).copied()
    }

    /// Reads a cell after wrapping the coordinates.
    #[must_use]
    pub fn sample(&self, x: i64, y: i64) -> f32 {
        self.cells[self.grid.wrapped_index(x, y)]
    }

    /// Writes a cell after wrapping the coordinates; values are clamped to
    /// `[0, 1]`.
    pub fn put(&mut self, x: i64, y: i64, value: f32) {
        let idx = self.grid.wrapped_index(x, y);
        self.cells[idx] = value.clamp(0.0, 1.0);
    }

    pub fn fill(&mut self, value: f32) {
        self.cells.fill(value.clamp(0.0, 1.0));
    }

    pub fn clear(&mut self) {
        self.cells.fill(0.0);
    }

    /// Writes `value` into the wrapped square of half-width `radius`.
    pub fn seed_block(&mut self, cx: u32, cy: u32, radius: u32, value: f32) {
        let r = i64::from(radius);
        for dy in -r..=r {
            for dx in -r..=r {
                self.put(i64::from(cx) + dx, i64::from(cy) + dy, value);
            }
        }
    }

    pub fn copy_from(&mut self, other: &Self) -> Result<(), InvariantViolation> {
        if other.cells.len() != self.cells.len() {
            return Err(self.mismatch(other.cells.len()));
        }
        self.cells.copy_from_slice(&other.cells);
        Ok(())
    }

    #[must_use]
    pub fn nonzero_count(&self) -> usize {
        self.cells.iter().filter(|v| **v > 0.0).count()
    }

    #[must_use]
    pub fn max_value(&self) -> f32 {
        self.cells.iter().copied().fold(0.0, f32::max)
    }

    /// Confirms the storage still matches the grid it was sized for.
    pub fn check_len(&self) -> Result<(), InvariantViolation> {
        if self.cells.len() == self.grid.cells() {
            Ok(())
        } else {
            Err(self.mismatch(self.cells.len()))
        }
    }

    fn mismatch(&self, actual: usize) -> InvariantViolation {
        InvariantViolation::BufferSizeMismatch {
            width: self.grid.width(),
            height: self.grid.height(),
            expected: self.grid.cells(),
            actual,
        }
    }
}

/// Front/back pair. Readers see `front`; writers fill `back`; `swap` publishes.
#[derive(Debug, Clone)]
pub struct FieldPair {
    front: Field,
    back: Field,
}

impl FieldPair {
    #[must_use]
    pub fn new(grid: GridSpec) -> Self {
        Self {
            front: Field::new(grid),
            back: Field::new(grid),
        }
    }

    #[must_use]
    pub const fn grid(&self) -> GridSpec {
        self.front.grid()
    }

    #[must_use]
    pub fn front(&self) -> &Field {
        &self.front
    }

    #[must_use]
    pub fn back(&self) -> &Field {
        &self.back
    }

    pub fn back_mut(&mut self) -> &mut Field {
        &mut self.back
    }

    /// Simultaneous read access to `front` and write access to `back`.
    pub fn split(&mut self) -> (&Field, &mut Field) {
        (&self.front, &mut self.back)
    }

    /// Simultaneous read access to `back` and write access to `front`, for
    /// passes that resolve the back buffer into the presented one.
    pub fn split_resolve(&mut self) -> (&Field, &mut Field) {
        (&self.back, &mut self.front)
    }

    pub fn swap(&mut self) {
        std::mem::swap(&mut self.front, &mut self.back);
    }

    /// Copies `front` into `back` so a partial write pass keeps the rest.
    pub fn sync_back(&mut self) -> Result<(), InvariantViolation> {
        self.back.copy_from(&self.front)
    }

    pub fn clear(&mut self) {
        self.front.clear();
        self.back.clear();
    }

    pub fn seed_block(&mut self, cx: u32, cy: u32, radius: u32, value: f32) {
        self.front.seed_block(cx, cy, radius, value);
        self.back.seed_block(cx, cy, radius, value);
    }

    pub fn check_len(&self) -> Result<(), InvariantViolation> {
        self.front.check_len()?;
        self.back.check_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(w: u32, h: u32) -> GridSpec {
        GridSpec::new(w, h).expect("grid")
    }

    #[test]
    fn seed_block_wraps_across_edges() {
        let mut field = Field::new(grid(8, 8));
        field.seed_block(0, 0, 1, 1.0);
        assert_eq!(field.nonzero_count(), 9);
        assert_eq!(field.get(7, 7), Some(1.0));
        assert_eq!(field.get(1, 1), Some(1.0));
        assert_eq!(field.get(2, 2), Some(0.0));
    }

    #[test]
    fn swap_publishes_back_buffer() {
        let mut pair = FieldPair::new(grid(4, 4));
        pair.back_mut().put(1, 2, 0.5);
        assert_eq!(pair.front().get(1, 2), Some(0.0));
        pair.swap();
        assert_eq!(pair.front().get(1, 2), Some(0.5));
        assert_eq!(pair.back().get(1, 2), Some(0.0));
        pair.sync_back().expect("same size");
        assert_eq!(pair.back().get(1, 2), Some(0.5));
    }

    #[test]
    fn copy_between_mismatched_fields_is_rejected() {
        let mut a = Field::new(grid(4, 4));
        let b = Field::new(grid(5, 4));
        assert!(matches!(
            a.copy_from(&b),
            Err(InvariantViolation::BufferSizeMismatch {
                expected: 16,
                actual: 20,
                ..
            })
        ));
    }

    #[test]
    fn writes_are_clamped() {
        let mut field = Field::new(grid(2, 2));
        field.put(0, 0, 3.0);
        field.put(1, 0, -1.0);
        assert_eq!(field.get(0, 0), Some(1.0));
        assert_eq!(field.get(1, 0), Some(0.0));
        assert_eq!(field.get(2, 0), None);
    }
}
