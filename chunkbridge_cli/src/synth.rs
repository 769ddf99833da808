//! Deterministic test arrays for exercising the bridge without external data.

use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SynthKind {
    /// Short repeating period; compresses very well.
    Cyclic,
    /// Long runs of equal values.
    Easy,
    /// Element index, truncated to the item width.
    Ramp,
    /// Pseudo-random bytes from a fixed-seed LCG.
    Noise,
}

impl SynthKind {
    pub const ALL: [SynthKind; 4] = [
        SynthKind::Cyclic,
        SynthKind::Easy,
        SynthKind::Ramp,
        SynthKind::Noise,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SynthKind::Cyclic => "cyclic",
            SynthKind::Easy => "easy",
            SynthKind::Ramp => "ramp",
            SynthKind::Noise => "noise",
        }
    }
}

/// Generate `nelems` elements of `itemsize` bytes each, little-endian.
///
/// Items wider than 8 bytes carry the value in their low 8 bytes and zeros above.
pub fn generate(kind: SynthKind, nelems: u64, itemsize: usize, seed: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(nelems as usize * itemsize);
    let mut rng = seed;
    for i in 0..nelems {
        let value = match kind {
            SynthKind::Cyclic => i % 97,
            SynthKind::Easy => i / 512,
            SynthKind::Ramp => i,
            SynthKind::Noise => {
                rng = rng
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                rng >> 11
            }
        };
        let bytes = value.to_le_bytes();
        let n = itemsize.min(bytes.len());
        out.extend_from_slice(&bytes[..n]);
        out.resize(out.len() + (itemsize - n), 0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_and_determinism() {
        for kind in SynthKind::ALL {
            for itemsize in [1, 4, 8, 12] {
                let a = generate(kind, 100, itemsize, 42);
                assert_eq!(a.len(), 100 * itemsize);
                assert_eq!(a, generate(kind, 100, itemsize, 42));
            }
        }
    }

    #[test]
    fn ramp_counts_up() {
        let data = generate(SynthKind::Ramp, 4, 2, 0);
        assert_eq!(data, vec![0, 0, 1, 0, 2, 0, 3, 0]);
    }

    #[test]
    fn noise_depends_on_seed() {
        assert_ne!(
            generate(SynthKind::Noise, 16, 4, 1),
            generate(SynthKind::Noise, 16, 4, 2)
        );
    }
}
