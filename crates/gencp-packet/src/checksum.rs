//! The GenCP 16-bit checksum.
//!
//! Big-endian 16-bit words are summed into a 32-bit accumulator, an odd
//! trailing byte counts as the high byte of a zero-padded word, carries are
//! folded back into the low half, and the result is complemented. Word
//! order is explicit, so the result does not depend on host endianness.

/// Inputs must stay strictly below this many bytes.
pub const MAX_CHECKSUM_LEN: usize = 65_535;

/// Incremental checksum accumulator.
///
/// Feeding a buffer in any number of pieces produces the same result as
/// [`checksum16`] over the concatenation.
#[derive(Debug, Clone, Default)]
pub struct Checksum16 {
    sum: u32,
    odd: Option<u8>,
    len: usize,
}

impl Checksum16 {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add bytes to the running sum.
    ///
    /// # Panics
    ///
    /// Panics if the total input reaches [`MAX_CHECKSUM_LEN`] bytes; the
    /// 32-bit accumulator is only guaranteed not to overflow below that.
    pub fn update(&mut self, mut bytes: &[u8]) {
        self.len += bytes.len();
        assert!(
            self.len < MAX_CHECKSUM_LEN,
            "checksum input of {} bytes exceeds the {} byte limit",
            self.len,
            MAX_CHECKSUM_LEN - 1
        );

        if let Some(high) = self.odd.take() {
            match bytes.split_first() {
                Some((&low, rest)) => {
                    self.sum += u32::from(u16::from_be_bytes([high, low]));
                    bytes = rest;
                }
                None => {
                    self.odd = Some(high);
                    return;
                }
            }
        }

        let mut words = bytes.chunks_exact(2);
        for word in &mut words {
            self.sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
        }
        if let [last] = words.remainder() {
            self.odd = Some(*last);
        }
    }

    /// Number of bytes fed so far.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing has been fed yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The checksum of everything fed so far.
    ///
    /// Does not consume the accumulator, so a prefix checksum can be taken
    /// and the sum continued.
    pub fn finish(&self) -> u16 {
        let mut sum = self.sum;
        if let Some(high) = self.odd {
            sum += u32::from(high) << 8;
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        !(sum as u16)
    }
}

/// One-shot checksum over `bytes`.
///
/// # Panics
///
/// Panics if `bytes.len() >= 65535`.
pub fn checksum16(bytes: &[u8]) -> u16 {
    let mut acc = Checksum16::new();
    acc.update(bytes);
    acc.finish()
}
