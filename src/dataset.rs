use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

/// Frame indices assigned to each side of the dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Split {
    pub train: BTreeSet<u32>,
    pub val: BTreeSet<u32>,
}

impl Split {
    pub fn is_val(&self, frame: u32) -> bool {
        self.val.contains(&frame)
    }
}

/// Number of validation frames for `len` frames: `len * val_ratio` rounded
/// half up.
pub fn val_count(len: usize, val_ratio: f64) -> usize {
    let ratio = val_ratio.clamp(0.0, 1.0);
    ((len as f64 * ratio).round() as usize).min(len)
}

/// Randomly partition `indices` into train and validation sets.
///
/// Exactly `val_count(indices.len(), val_ratio)` frames land in validation;
/// the two sides are disjoint and together hold every input index.
pub fn partition<R: Rng + ?Sized>(
    indices: &BTreeSet<u32>,
    val_ratio: f64,
    rng: &mut R,
) -> Split {
    let mut shuffled: Vec<u32> = indices.iter().copied().collect();
    shuffled.shuffle(rng);

    let val_size = val_count(shuffled.len(), val_ratio);
    let train = shuffled.split_off(val_size);

    Split {
        train: train.into_iter().collect(),
        val: shuffled.into_iter().collect(),
    }
}

/// Split rng: reproducible when a seed is given, fresh entropy otherwise.
pub fn split_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
