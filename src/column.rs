//! Contiguous component storage shared with job bodies.
//!
//! A [`Column`] is a fixed-length run of values that several threads touch
//! at once, each through the index range the executor handed it. Ranges
//! from one dispatch never overlap, which is what makes
//! [`Column::slice_mut`] sound to call from a job body.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::Range;

pub struct Column<T> {
    cells: Box<[UnsafeCell<T>]>,
}

// Elements are only reached through `slice`/`slice_mut`, whose contracts
// rule out aliasing, or through `&mut self`.
unsafe impl<T: Send> Send for Column<T> {}
unsafe impl<T: Send + Sync> Sync for Column<T> {}

impl<T> Column<T> {
    pub fn from_fn(len: usize, mut init: impl FnMut(usize) -> T) -> Self {
        Column {
            cells: (0..len).map(|i| UnsafeCell::new(init(i))).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Mutable view of `range`.
    ///
    /// # Safety
    /// No other reference to any element of `range` may exist while the
    /// returned slice is alive. Ranges handed out by one job dispatch
    /// satisfy this as long as no other job touching the column runs in
    /// the same phase, which the job's write mask guarantees.
    ///
    /// # Panics
    /// If `range` is out of bounds.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self, range: Range<usize>) -> &mut [T] {
        let cells = &self.cells[range];
        // UnsafeCell<T> has the same layout as T.
        unsafe { std::slice::from_raw_parts_mut(UnsafeCell::raw_get(cells.as_ptr()), cells.len()) }
    }

    /// Shared view of `range`.
    ///
    /// # Safety
    /// No mutable view of any element of `range` may be alive, i.e. no job
    /// writing this column runs in the same phase as the caller.
    pub unsafe fn slice(&self, range: Range<usize>) -> &[T] {
        let cells = &self.cells[range];
        unsafe { std::slice::from_raw_parts(UnsafeCell::raw_get(cells.as_ptr()), cells.len()) }
    }

    /// The whole column, outside of any frame.
    ///
    /// There is deliberately no safe `&self` counterpart: a shared view
    /// handed out through `&self` could outlive a call to [`slice_mut`]
    /// on another clone of the same `Arc`, and its contract could no
    /// longer be met by the caller. Shared reads during a frame go through
    /// [`slice`].
    ///
    /// [`slice_mut`]: Column::slice_mut
    /// [`slice`]: Column::slice
    pub fn get_mut(&mut self) -> &mut [T] {
        let len = self.cells.len();
        // Exclusive borrow: no job can be holding a view.
        unsafe { self.slice_mut(0..len) }
    }
}

impl<T: Clone> Column<T> {
    pub fn filled(len: usize, value: T) -> Self {
        Column::from_fn(len, |_| value.clone())
    }
}

impl<T> fmt::Debug for Column<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_from_fn_and_views() {
        let mut column = Column::from_fn(5, |i| i * 10);
        assert_eq!(column.get_mut(), &[0, 10, 20, 30, 40]);
        column.get_mut()[2] = 7;
        assert_eq!(unsafe { column.slice(1..3) }, &[10, 7]);
    }

    #[test]
    fn test_get_mut_after_shared_use() {
        let column = Arc::new(Column::filled(8, 1u64));
        let worker = {
            let column = Arc::clone(&column);
            thread::spawn(move || {
                for v in unsafe { column.slice_mut(4..8) } {
                    *v = 2;
                }
            })
        };
        worker.join().unwrap();

        // Exclusive access again once every other handle is gone.
        let mut column = Arc::into_inner(column).unwrap();
        let all = column.get_mut();
        all[0] = 0;
        assert_eq!(all, &[0, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn test_disjoint_writers() {
        let column = Arc::new(Column::filled(1000, 0u32));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let column = Arc::clone(&column);
                thread::spawn(move || {
                    let range = t * 250..(t + 1) * 250;
                    let chunk = unsafe { column.slice_mut(range.clone()) };
                    for (v, i) in chunk.iter_mut().zip(range) {
                        *v = i as u32 + 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut column = Arc::try_unwrap(column).unwrap();
        assert!(column.get_mut().iter().enumerate().all(|(i, &v)| v == i as u32 + 1));
    }

    #[test]
    #[should_panic]
    fn test_out_of_bounds_range_panics() {
        let column = Column::filled(4, 0u8);
        let _ = unsafe { column.slice_mut(2..5) };
    }
}
