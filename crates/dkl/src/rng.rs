//! Explicit, splittable random keys.
//!
//! Every stochastic operation of the crate consumes a [`RngKey`] instead of
//! relying on a global generator. A key is a plain 64 bits seed: it is
//! never advanced in place, callers [`split`](RngKey::split) it to get
//! independent keys for independent draws.

use rand_xoshiro::rand_core::{RngCore, SeedableRng};
use rand_xoshiro::{SplitMix64, Xoshiro256Plus};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque random key
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct RngKey(u64);

impl RngKey {
    /// Key constructor from a seed
    pub fn new(seed: u64) -> RngKey {
        RngKey(seed)
    }

    /// Split the key in two new independent keys
    pub fn split(self) -> (RngKey, RngKey) {
        let mut sm = SplitMix64::seed_from_u64(self.0);
        (RngKey(sm.next_u64()), RngKey(sm.next_u64()))
    }

    /// Split the key in `n` new independent keys
    pub fn split_n(self, n: usize) -> Vec<RngKey> {
        let mut sm = SplitMix64::seed_from_u64(self.0);
        (0..n).map(|_| RngKey(sm.next_u64())).collect()
    }

    /// Derive a new key from this key and some integer data (ex: a step index)
    pub fn fold_in(self, data: u64) -> RngKey {
        let mut sm = SplitMix64::seed_from_u64(self.0);
        let salt = sm.next_u64();
        let mut sm = SplitMix64::seed_from_u64(salt ^ data.rotate_left(32));
        RngKey(sm.next_u64())
    }

    /// Random generator seeded with this key
    pub fn rng(self) -> Xoshiro256Plus {
        Xoshiro256Plus::seed_from_u64(self.0)
    }
}

impl fmt::Display for RngKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RngKey({:#018x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;
    use std::collections::HashSet;

    #[test]
    fn test_split_is_deterministic() {
        let key = RngKey::new(42);
        assert_eq!(key.split(), key.split());
        assert_eq!(key.split_n(5), key.split_n(5));
    }

    #[test]
    fn test_split_gives_distinct_keys() {
        let key = RngKey::new(0);
        let (k1, k2) = key.split();
        assert_ne!(k1, k2);
        assert_ne!(k1, key);
        let keys: HashSet<_> = key.split_n(1000).into_iter().collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn test_fold_in() {
        let key = RngKey::new(7);
        assert_eq!(key.fold_in(3), key.fold_in(3));
        assert_ne!(key.fold_in(3), key.fold_in(4));
    }

    #[test]
    fn test_same_key_same_draws() {
        let normal = Normal::new(0., 1.).unwrap();
        let a = Array1::random_using(10, normal, &mut RngKey::new(1).rng());
        let b = Array1::random_using(10, normal, &mut RngKey::new(1).rng());
        let c = Array1::random_using(10, normal, &mut RngKey::new(2).rng());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
