use rand::Rng;

/// Uniform random index source for nomination draws.
///
/// The game loop owns one picker for its whole lifetime, so implementations
/// may keep state between draws.
pub trait Picker: Send {
    /// Returns an index in `0..bound`. Callers guarantee `bound > 0`.
    fn pick(&mut self, bound: usize) -> usize;
}

/// Draws from the thread-local generator on every call.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRngPicker;

impl Picker for ThreadRngPicker {
    fn pick(&mut self, bound: usize) -> usize {
        rand::thread_rng().gen_range(0..bound)
    }
}

/// Replays a fixed sequence of indices, clamping each to the requested bound.
/// Once the sequence is exhausted every draw yields zero.
#[derive(Clone, Debug, Default)]
pub struct SequencePicker {
    indices: Vec<usize>,
    cursor: usize,
}

impl SequencePicker {
    pub fn new(indices: Vec<usize>) -> Self {
        Self { indices, cursor: 0 }
    }
}

impl Picker for SequencePicker {
    fn pick(&mut self, bound: usize) -> usize {
        let index = self.indices.get(self.cursor).copied().unwrap_or(0);
        self.cursor += 1;
        index.min(bound.saturating_sub(1))
    }
}
