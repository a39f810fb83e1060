//! Audio level measurement over linear PCM.
//!
//! Levels follow the "-dBov" convention used by RTP audio level extensions:
//! 0 is the overload point (loudest possible signal) and 127 is the silence
//! floor, so a louder signal yields a *smaller* number.

/// The level of the loudest possible signal (0 dBov).
pub const MAX_LEVEL: u8 = 0;

/// The level reported for silence (-127 dBov).
pub const MIN_LEVEL: u8 = 127;

/// Computes the audio level of a block of mono, 16-bit linear PCM samples.
///
/// The samples are normalized to `[-1, 1]`, their RMS is taken, and the
/// result is expressed as `-20 * log10(rms)` clamped to
/// `[MAX_LEVEL, MIN_LEVEL]`. An empty block, or one whose RMS is zero,
/// reports [`MIN_LEVEL`].
///
/// Pure and lock-free; safe to call from any thread, including audio
/// callbacks.
pub fn calculate_level(samples: &[i16]) -> u8 {
    if samples.is_empty() {
        return MIN_LEVEL;
    }

    let mut sum_of_squares = 0.0f64;
    for &sample in samples {
        let normalized = f64::from(sample) / 32767.0;
        sum_of_squares += normalized * normalized;
    }

    let rms = (sum_of_squares / samples.len() as f64).sqrt();
    if rms > 0.0 {
        let db = -20.0 * rms.log10();
        db.clamp(f64::from(MAX_LEVEL), f64::from(MIN_LEVEL)) as u8
    } else {
        MIN_LEVEL
    }
}
