use crate::constants::{WHEEL_DEGREES, WHEEL_OFFSET_MAX, WHEEL_OFFSET_MIN};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// Draw helpers for the penalty wheels. Only the initiating client calls these; everything a
// replaying observer needs ends up in the pick (index + stop angle).

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct WheelPick {
    pub index: usize,
    pub angle: f64,
}

pub fn pick_uniform<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    Some(rng.gen_range(0..len))
}

/// Linear-scan weighted draw. Non-positive and non-finite weights never win; returns `None`
/// when nothing carries weight.
pub fn pick_weighted<R: Rng + ?Sized>(rng: &mut R, weights: &[f64]) -> Option<usize> {
    let usable = |w: f64| w > 0.0 && w.is_finite();
    let total: f64 = weights.iter().copied().filter(|w| usable(*w)).sum();
    if total <= 0.0 {
        return None;
    }
    let threshold = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    let mut last = None;
    for (index, weight) in weights.iter().copied().enumerate() {
        if !usable(weight) {
            continue;
        }
        cumulative += weight;
        last = Some(index);
        if cumulative > threshold {
            return Some(index);
        }
    }
    // Float accumulation can leave the threshold a hair above the final sum.
    last
}

/// Stop angle inside segment `index` of an `len`-segment wheel, kept away from both edges.
pub fn stop_angle<R: Rng + ?Sized>(rng: &mut R, index: usize, len: usize) -> f64 {
    let width = segment_width(len);
    let offset = rng.gen_range(WHEEL_OFFSET_MIN..=WHEEL_OFFSET_MAX);
    width * index as f64 + width * offset
}

pub fn spin<R: Rng + ?Sized>(rng: &mut R, index: usize, len: usize) -> WheelPick {
    WheelPick {
        index,
        angle: stop_angle(rng, index, len),
    }
}

/// Segment a replayed angle lands in. Angles outside [0, 360) are normalized first.
pub fn segment_at_angle(angle: f64, len: usize) -> Option<usize> {
    if len == 0 || !angle.is_finite() {
        return None;
    }
    let normalized = angle.rem_euclid(WHEEL_DEGREES);
    let index = (normalized / segment_width(len)).floor() as usize;
    Some(index.min(len - 1))
}

fn segment_width(len: usize) -> f64 {
    WHEEL_DEGREES / len.max(1) as f64
}

pub fn derive_seed(base: u64, label: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(base.to_le_bytes());
    hasher.update(label.as_bytes());
    let hash = hasher.finalize();
    let mut seed_bytes = [0u8; 8];
    seed_bytes.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(seed_bytes)
}

pub fn pcg_from_seed(seed: u64) -> Pcg64Mcg {
    // Expand the u64 into 16 bytes to seed the PCG generator deterministically.
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    let digest = hasher.finalize();
    let mut seed_bytes = [0u8; 16];
    seed_bytes.copy_from_slice(&digest[..16]);
    Pcg64Mcg::from_seed(seed_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_draw_matches_configured_frequencies() {
        let mut rng = pcg_from_seed(derive_seed(7, "fairness"));
        let weights = [0.5, 0.3, 0.2];
        let draws = 100_000;
        let mut hits = [0usize; 3];
        for _ in 0..draws {
            hits[pick_weighted(&mut rng, &weights).unwrap()] += 1;
        }
        for (hit, weight) in hits.iter().zip(weights.iter()) {
            let observed = *hit as f64 / draws as f64;
            assert!(
                (observed - weight).abs() < 0.02,
                "observed {} for weight {}",
                observed,
                weight
            );
        }
    }

    #[test]
    fn zero_weights_never_win() {
        let mut rng = pcg_from_seed(1);
        for _ in 0..1000 {
            let pick = pick_weighted(&mut rng, &[0.0, 1.0, -2.0, f64::NAN]).unwrap();
            assert_eq!(pick, 1);
        }
        assert_eq!(pick_weighted(&mut rng, &[0.0, 0.0]), None);
        assert_eq!(pick_weighted(&mut rng, &[]), None);
    }

    #[test]
    fn stop_angle_stays_inside_its_segment() {
        let mut rng = pcg_from_seed(3);
        for len in 1..12 {
            for index in 0..len {
                let angle = stop_angle(&mut rng, index, len);
                let width = WHEEL_DEGREES / len as f64;
                assert!(angle >= width * index as f64 + width * WHEEL_OFFSET_MIN - 1e-9);
                assert!(angle <= width * index as f64 + width * WHEEL_OFFSET_MAX + 1e-9);
                assert_eq!(segment_at_angle(angle, len), Some(index));
            }
        }
    }

    #[test]
    fn segment_lookup_normalizes_angles() {
        assert_eq!(segment_at_angle(370.0, 4), Some(0));
        assert_eq!(segment_at_angle(-10.0, 4), Some(3));
        assert_eq!(segment_at_angle(210.5, 1), Some(0));
        assert_eq!(segment_at_angle(10.0, 0), None);
    }

    #[test]
    fn same_seed_gives_same_stream() {
        let mut a = pcg_from_seed(derive_seed(42, "penalty"));
        let mut b = pcg_from_seed(derive_seed(42, "penalty"));
        let picks_a: Vec<_> = (0..16).map(|_| pick_uniform(&mut a, 5)).collect();
        let picks_b: Vec<_> = (0..16).map(|_| pick_uniform(&mut b, 5)).collect();
        assert_eq!(picks_a, picks_b);
    }
}
