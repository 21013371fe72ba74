use std::collections::VecDeque;

/// A fixed-length FIFO of the most recent samples, oldest first.
///
/// The window always holds exactly `capacity` slots. Slots that have not been
/// written since the last [`RollingWindow::clear`] hold `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingWindow {
    slots: VecDeque<Option<f32>>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let mut slots = VecDeque::with_capacity(capacity);
        slots.resize(capacity, None);
        Self { slots, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Evicts the oldest slot and appends `value` as the newest.
    pub fn push(&mut self, value: Option<f32>) {
        if self.capacity == 0 {
            return;
        }
        self.slots.pop_front();
        self.slots.push_back(value);
    }

    pub fn newest(&self) -> Option<f32> {
        self.slots.back().copied().flatten()
    }

    /// Mean of the non-empty slots among the newest `count`.
    /// `None` when all of them are empty.
    pub fn tail_mean(&self, count: usize) -> Option<f32> {
        let (sum, n) = self
            .slots
            .iter()
            .rev()
            .take(count)
            .flatten()
            .fold((0.0f64, 0usize), |(sum, n), v| (sum + f64::from(*v), n + 1));
        if n == 0 {
            None
        } else {
            Some((sum / n as f64) as f32)
        }
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<f32>> + '_ {
        self.slots.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<Option<f32>> {
        self.iter().collect()
    }
}
