use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

pub type Challenge = [u8; 32];

/// Base58 text form of a miner's public key, as the pool's HTTP API expects it.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerKey(pub String);

impl MinerKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_bytes(pubkey: &[u8; 32]) -> Self {
        MinerKey(bs58::encode(pubkey).into_string())
    }
}

impl Display for MinerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Half-open nonce interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceRange {
    pub start: u64,
    pub end: u64,
}

impl NonceRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn is_exhausted(&self) -> bool {
        self.start >= self.end
    }

    /// Cut `count` consecutive slices of `size` nonces off the front.
    pub fn take_front(&mut self, count: usize, size: u64) -> Vec<NonceRange> {
        let mut slices = Vec::with_capacity(count);
        for _ in 0..count {
            let start = self.start;
            let end = start.saturating_add(size);
            slices.push(NonceRange { start, end });
            self.start = end;
        }
        slices
    }
}

impl Display for NonceRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_front_is_contiguous() {
        let mut range = NonceRange::new(500, 1_000_000);
        let slices = range.take_front(4, 10_000);

        assert_eq!(slices.len(), 4);
        assert_eq!(slices[0], NonceRange::new(500, 10_500));
        for pair in slices.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(range.start, 40_500);
        assert_eq!(range.end, 1_000_000);
    }

    #[test]
    fn take_front_saturates_at_max() {
        let mut range = NonceRange::new(u64::MAX - 5, u64::MAX);
        let slices = range.take_front(2, 10);
        assert_eq!(slices[0], NonceRange::new(u64::MAX - 5, u64::MAX));
        assert_eq!(slices[1], NonceRange::new(u64::MAX, u64::MAX));
        assert!(range.is_exhausted());
    }

    #[test]
    fn miner_key_is_base58() {
        let key = MinerKey::from_bytes(&[0u8; 32]);
        assert_eq!(key.as_str(), "11111111111111111111111111111111");
    }
}
