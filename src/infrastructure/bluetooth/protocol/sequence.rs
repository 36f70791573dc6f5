/// Per-command-family message id. Wraps `0xFF -> 0x00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceCounter {
    value: u8,
}

impl SequenceCounter {
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    pub const fn starting_at(value: u8) -> Self {
        Self { value }
    }

    pub fn current(&self) -> u8 {
        self.value
    }

    /// Return the current id and advance.
    pub fn next(&mut self) -> u8 {
        let value = self.value;
        self.value = self.value.wrapping_add(1);
        value
    }

    /// Advance, then return the new id.
    pub fn advance(&mut self) -> u8 {
        self.value = self.value.wrapping_add(1);
        self.value
    }

    pub fn reset_to(&mut self, value: u8) {
        self.value = value;
    }
}
