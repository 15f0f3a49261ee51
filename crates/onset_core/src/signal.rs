//! Fundamental-mode estimation for sampled periodic signals.
//!
//! Reference waveforms for the amplitude-error functionals are usually cut
//! from the tail of a transient simulation. The helpers here estimate the
//! fundamental frequency and complex amplitude of such a signal from its
//! dominant DFT bin and segment the final period.

use anyhow::{bail, Result};
use num_complex::Complex;
use rustfft::FftPlanner;

/// Estimates the fundamental mode of a sampled signal.
///
/// Returns the frequency in cycles per sample and the complex amplitude of
/// the dominant non-DC bin (2/N convention, so a pure cosine of amplitude `A`
/// and phase `φ` yields `A·e^{iφ}`).
pub fn estimate_fundamental_mode(signal: &[f64]) -> Result<(f64, Complex<f64>)> {
    let n = signal.len();
    if n < 4 {
        bail!("Signal has {} samples; at least 4 are required.", n);
    }

    let mut spectrum: Vec<Complex<f64>> =
        signal.iter().map(|&value| Complex::new(value, 0.0)).collect();
    FftPlanner::new().plan_fft_forward(n).process(&mut spectrum);

    let mut peak_bin = 1usize;
    let mut peak_power = 0.0;
    for (bin, value) in spectrum.iter().enumerate().take(n / 2 + 1).skip(1) {
        let power = value.norm_sqr();
        if power > peak_power {
            peak_power = power;
            peak_bin = bin;
        }
    }
    if peak_power <= 0.0 {
        bail!("Signal has no oscillatory content.");
    }

    let frequency = peak_bin as f64 / n as f64;
    let amplitude = spectrum[peak_bin] * (2.0 / n as f64);
    Ok((frequency, amplitude))
}

/// Returns the suffix of `signal` spanning one fundamental period.
pub fn segment_last_period(signal: &[f64]) -> Result<&[f64]> {
    let (frequency, _) = estimate_fundamental_mode(signal)?;
    let period = (1.0 / frequency).round() as usize;
    if period == 0 || period > signal.len() {
        bail!(
            "Fundamental period of {} samples does not fit the signal length {}.",
            period,
            signal.len()
        );
    }
    Ok(&signal[signal.len() - period..])
}
