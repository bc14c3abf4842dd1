//! Solution history of the multistep time integrator
use std::ops::{Index, IndexMut};

/// Number of stored time levels (n, n-1, n-2)
pub const HISTORY_LEN: usize = 3;

/// Values at the time levels n, n-1 and n-2, index 0 is the newest.
///
/// Advancing in time rotates the slots, the stored values are moved,
/// never copied.
#[derive(Debug, Clone)]
pub struct TimeHistory<T> {
    slots: [T; HISTORY_LEN],
}

impl<T> TimeHistory<T> {
    /// History from explicit slots
    pub fn new(slots: [T; HISTORY_LEN]) -> Self {
        Self { slots }
    }

    /// Shift n -> n-1 -> n-2 and store *newest* at level n. Returns the
    /// value dropped from level n-2, so its storage can be reused.
    pub fn push(&mut self, mut newest: T) -> T {
        self.slots.rotate_right(1);
        std::mem::swap(&mut self.slots[0], &mut newest);
        newest
    }

    /// Iterate from newest to oldest
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.slots.iter()
    }

    /// Iterate mutably from newest to oldest
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.slots.iter_mut()
    }
}

impl<T: Clone> TimeHistory<T> {
    /// All levels hold *value*
    pub fn filled(value: &T) -> Self {
        Self::new([value.clone(), value.clone(), value.clone()])
    }
}

impl<T> Index<usize> for TimeHistory<T> {
    type Output = T;
    fn index(&self, level: usize) -> &T {
        &self.slots[level]
    }
}

impl<T> IndexMut<usize> for TimeHistory<T> {
    fn index_mut(&mut self, level: usize) -> &mut T {
        &mut self.slots[level]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_rotates_content() {
        let mut history = TimeHistory::new([vec![0.], vec![-1.], vec![-2.]]);
        let dropped = history.push(vec![1.]);
        assert_eq!(dropped, vec![-2.]);
        assert_eq!(history[0], vec![1.]);
        assert_eq!(history[1], vec![0.]);
        assert_eq!(history[2], vec![-1.]);
    }
}
