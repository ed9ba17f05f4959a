// Where keys land.
//
// The table is a sequence of layers: layer `i` holds the raw hashes in
// `[P[i-1], P[i])`, where `P` is the prime table below. Growing the table
// appends the next such range as a brand new layer, so slots that already
// exist are never rehashed or relocated.
//
// The primes are chosen against the neighboring powers of two so that a raw
// hash can be mapped to its layer with a single log2:
//
//   NP[i] < P[i+1] < NP[i+1]
//   NP[i+1] = 2 * NP[i] + 1      (consecutive power-of-two masks)
//   P[i+1] > P[i] + NP[i]
//   P[i] - NP[i] < P[0]

/// The number of layers the table can grow to.
#[cfg(target_pointer_width = "64")]
pub const MAX_LAYERS: usize = 42;

#[cfg(not(target_pointer_width = "64"))]
pub const MAX_LAYERS: usize = 23;

// The layer boundary primes, with a leading zero so that `P[layer - 1]`
// never needs a branch.
#[cfg(target_pointer_width = "64")]
const PRIMES: [usize; MAX_LAYERS + 1] = [
    0,
    2633,
    6733,
    14929,
    31321,
    64091,
    129643,
    260723,
    522883,
    1047173,
    2095759,
    4192919,
    8387231,
    16775849,
    33553103,
    67107569,
    134216461,
    268434193,
    536869651,
    1073740571,
    2147482417,
    4294966099,
    8589933397,
    17179867997,
    34359737227,
    68719475599,
    137438952341,
    274877905823,
    549755812831,
    1099511626727,
    2199023254517,
    4398046510073,
    8796093021181,
    17592186043451,
    35184372087881,
    70368744176729,
    140737488354413,
    281474976709757,
    562949953420457,
    1125899906841811,
    2251799813684467,
    4503599627369863,
    9007199254740397,
];

#[cfg(not(target_pointer_width = "64"))]
const PRIMES: [usize; MAX_LAYERS + 1] = [
    0, 757, 1783, 3833, 7937, 16141, 32537, 65327, 130873, 261977, 524123, 1048433, 2097013,
    4194167, 8388473, 16777121, 33554341, 67108777, 134217649, 268435399, 536870869, 1073741789,
    2147483629, 4294967291,
];

// `log2(NP[0] + 1) - 1`.
#[cfg(target_pointer_width = "64")]
const LOWEST_EXPONENT: usize = 11;

#[cfg(not(target_pointer_width = "64"))]
const LOWEST_EXPONENT: usize = 9;

// `2^LOWEST_EXPONENT`, the bump that keeps the log2 of a low raw hash at
// `LOWEST_EXPONENT` exactly.
const LOWEST_NEXT_POWER: usize = 1 << LOWEST_EXPONENT;

/// The slot address of a raw hash: a layer and an offset within it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Address {
    pub layer: usize,
    pub slot: usize,
}

/// Returns the upper boundary prime of the given layer.
#[inline]
pub fn prime(layer: usize) -> usize {
    PRIMES[layer + 1]
}

/// Returns the number of slots in the given layer.
#[inline]
pub fn layer_len(layer: usize) -> usize {
    PRIMES[layer + 1] - PRIMES[layer]
}

/// Returns the raw hash of `hash` for a table whose highest layer is `last`.
#[inline]
pub fn raw_hash(hash: usize, last: usize) -> usize {
    (hash & mask(last)) % prime(last)
}

/// Maps a raw hash to its slot address.
///
/// The raw hash must be below `prime(last)` for the `last` it was derived
/// with.
#[inline]
pub fn locate(raw: usize) -> Address {
    // A raw hash below the first boundary must still log2 to exactly
    // `LOWEST_EXPONENT`, i.e. layer zero, so bump it into
    // `[LOWEST_NEXT_POWER, 2 * LOWEST_NEXT_POWER)` first.
    let bumped = if raw < LOWEST_NEXT_POWER {
        raw + LOWEST_NEXT_POWER
    } else {
        raw
    };

    // The log2 estimate can undershoot by one layer because the boundary
    // primes sit below their power of two.
    let mut layer = log2(bumped) - LOWEST_EXPONENT;
    if raw >= prime(layer) {
        layer += 1;
    }

    Address {
        layer,
        slot: raw - PRIMES[layer],
    }
}

// The power-of-two mask adjacent to the given layer's boundary prime,
// `2^(LOWEST_EXPONENT + 1 + layer) - 1`.
#[inline]
fn mask(layer: usize) -> usize {
    usize::MAX >> (usize::BITS as usize - (LOWEST_EXPONENT + 1 + layer))
}

// Fast integer log2 of a non-zero value.
#[inline]
fn log2(x: usize) -> usize {
    (usize::BITS - 1 - x.leading_zeros()) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prime_invariants() {
        for layer in 0..MAX_LAYERS - 1 {
            // NP[i] < P[i+1] < NP[i+1]
            assert!(mask(layer) < prime(layer + 1));
            assert!(prime(layer + 1) < mask(layer + 1));
            // NP[i+1] = 2 * NP[i] + 1
            assert_eq!(mask(layer + 1), 2 * mask(layer) + 1);
            // P[i+1] > P[i] + NP[i]
            assert!(prime(layer + 1) > prime(layer) + mask(layer));
        }

        for layer in 0..MAX_LAYERS {
            // P[i] - NP[i] < P[0]
            assert!(prime(layer).saturating_sub(mask(layer)) < prime(0));
        }

        // Strictly increasing, with the sentinel zero first.
        assert_eq!(PRIMES[0], 0);
        for pair in PRIMES.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn locate_boundaries() {
        for layer in 0..MAX_LAYERS {
            // The first and last raw hash of every layer.
            let first = PRIMES[layer];
            let last = prime(layer) - 1;

            assert_eq!(locate(first), Address { layer, slot: 0 });
            assert_eq!(
                locate(last),
                Address {
                    layer,
                    slot: layer_len(layer) - 1
                }
            );
        }
    }

    #[test]
    fn locate_law() {
        // P[layer - 1] <= raw < P[layer] and slot < P[layer] - P[layer - 1],
        // for raw hashes swept across every layer.
        for layer in 0..MAX_LAYERS {
            let (lo, hi) = (PRIMES[layer], prime(layer));
            let step = ((hi - lo) / 1024).max(1);

            for raw in (lo..hi).step_by(step) {
                let address = locate(raw);
                assert_eq!(address.layer, layer, "raw = {raw}");
                assert_eq!(address.slot, raw - lo);
                assert!(address.slot < layer_len(layer));
            }
        }
    }

    #[test]
    fn locate_exhaustive_low_layers() {
        for raw in 0..prime(2) {
            let address = locate(raw);
            assert!(PRIMES[address.layer] <= raw);
            assert!(raw < prime(address.layer));
            assert_eq!(address.slot, raw - PRIMES[address.layer]);
        }
    }

    #[test]
    fn raw_hash_in_range() {
        for last in 0..MAX_LAYERS {
            for hash in [0, 1, prime(last) - 1, prime(last), usize::MAX] {
                assert!(raw_hash(hash, last) < prime(last));
            }
        }
    }
}
