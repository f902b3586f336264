// Seedable pseudo-random number generator for the Party Dice coordinator.
//
// Implements xoshiro256++ (Blackman & Vigna, 2019) with SplitMix64 seeding.
// Every random decision the coordinator makes draws from one `DiceRng`:
// account and lobby codes, dice rolls, turn-order shuffles, and breaking
// ties between equally voted maps.
//
// The generator is seedable so a whole session can be replayed in tests
// (`DiceRng::new(seed)`), while production servers seed from OS entropy
// (`DiceRng::from_entropy()`). All sampling helpers use rejection sampling so
// small ranges such as a six-sided die stay exactly uniform.

use serde::{Deserialize, Serialize};

/// Xoshiro256++ state. Cheap to clone; clones continue the same stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiceRng {
    s: [u64; 4],
}

impl DiceRng {
    /// Create a generator from a `u64` seed. Equal seeds give equal streams.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Create a generator seeded from the operating system's entropy source.
    ///
    /// Falls back to the wall clock if the OS source is unavailable, which
    /// only happens on exotic targets.
    pub fn from_entropy() -> Self {
        let seed = getrandom::u64().unwrap_or_else(|_| clock_seed());
        Self::new(seed)
    }

    /// Next raw `u64` from the stream.
    pub fn next_u64(&mut self) -> u64 {
        let result = self.s[0]
            .wrapping_add(self.s[3])
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Uniform integer in `[0, bound)`. Panics if `bound == 0`.
    pub fn below(&mut self, bound: u64) -> u64 {
        assert!(bound > 0, "below: bound must be positive");
        if bound.is_power_of_two() {
            return self.next_u64() & (bound - 1);
        }
        // Reject the short tail of the u64 range so every residue is equally
        // likely: threshold = 2^64 mod bound.
        let threshold = bound.wrapping_neg() % bound;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return r % bound;
            }
        }
    }

    /// Uniform index into a collection of length `len`. Panics if `len == 0`.
    pub fn index(&mut self, len: usize) -> usize {
        self.below(len as u64) as usize
    }

    /// Uniform value in the inclusive range `[low, high]`.
    pub fn roll_between(&mut self, low: u8, high: u8) -> u8 {
        assert!(low <= high, "roll_between: low must be <= high");
        let span = u64::from(high - low) + 1;
        low + self.below(span) as u8
    }

    /// Uniformly pick one element, or `None` for an empty slice.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let i = self.index(items.len());
        items.get(i)
    }

    /// Shuffle in place (Fisher-Yates). Every permutation is equally likely.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.index(i + 1);
            items.swap(i, j);
        }
    }

    /// Build a random string of `len` characters drawn from `alphabet`.
    pub fn code(&mut self, alphabet: &[u8], len: usize) -> String {
        (0..len)
            .map(|_| char::from(alphabet[self.index(alphabet.len())]))
            .collect()
    }
}

/// SplitMix64 step, used only to expand a seed into xoshiro state.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn clock_seed() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed)
}
