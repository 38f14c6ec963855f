use log::debug;
use serde::{Deserialize, Serialize};

use super::FrequencyBands;
use crate::error::{ChoreoError, Result};

/// Tuning for the offline frequency analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyConfig {
    /// Transform size in samples, must be a power of two
    pub fft_size: usize,
    /// Analysis ticks per second
    pub frame_rate: f32,
    /// Width of each downsampled spectrogram row
    pub spectrogram_bins: usize,
    /// Ticks processed between progress callbacks
    pub progress_interval: usize,
    /// Band edges in Hz: bass starts at [0], bass/mid split at [1],
    /// mid/high split at [2], high ends at [3]
    pub band_edges_hz: [f32; 4],
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            frame_rate: 60.0,
            spectrogram_bins: 128,
            progress_interval: 100,
            band_edges_hz: [20.0, 200.0, 2000.0, 8000.0],
        }
    }
}

/// In-place radix-2 decimation-in-time FFT over parallel real/imaginary arrays.
///
/// Downstream thresholds are tuned against this transform's output scale, so
/// the butterfly order and the `1/N` magnitude scaling must stay as they are.
pub struct Radix2Fft {
    size: usize,
    bit_reverse: Vec<usize>,
    // Twiddles for the full-size stage; stage `s` reads every (N/s)-th entry
    cos_table: Vec<f32>,
    sin_table: Vec<f32>,
}

impl Radix2Fft {
    pub fn new(size: usize) -> Result<Self> {
        if size < 2 || !size.is_power_of_two() {
            return Err(ChoreoError::InvalidTransformSize(size));
        }

        let levels = size.trailing_zeros();
        let bit_reverse = (0..size).map(|i| reverse_bits(i, levels)).collect();

        let (cos_table, sin_table) = (0..size / 2)
            .map(|k| {
                let angle = -2.0 * std::f64::consts::PI * k as f64 / size as f64;
                (angle.cos() as f32, angle.sin() as f32)
            })
            .unzip();

        Ok(Self {
            size,
            bit_reverse,
            cos_table,
            sin_table,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Transform `real`/`imag` in place. Both slices must be exactly `size` long.
    pub fn process(&self, real: &mut [f32], imag: &mut [f32]) {
        let n = self.size;
        assert_eq!(real.len(), n, "real buffer must match FFT size");
        assert_eq!(imag.len(), n, "imaginary buffer must match FFT size");

        // Bit-reversal permutation
        for i in 0..n {
            let j = self.bit_reverse[i];
            if j > i {
                real.swap(i, j);
                imag.swap(i, j);
            }
        }

        // Iterative butterflies, doubling the span each stage
        let mut span = 2;
        while span <= n {
            let half = span / 2;
            let stride = n / span;

            for start in (0..n).step_by(span) {
                for j in 0..half {
                    let cos = self.cos_table[j * stride];
                    let sin = self.sin_table[j * stride];

                    let even = start + j;
                    let odd = even + half;

                    let t_re = cos * real[odd] - sin * imag[odd];
                    let t_im = sin * real[odd] + cos * imag[odd];

                    real[odd] = real[even] - t_re;
                    imag[odd] = imag[even] - t_im;
                    real[even] += t_re;
                    imag[even] += t_im;
                }
            }

            span *= 2;
        }
    }

    /// Magnitudes `sqrt(re^2 + im^2) / N` of the first `N/2` bins
    pub fn magnitudes(&self, real: &[f32], imag: &[f32], out: &mut Vec<f32>) {
        let scale = self.size as f32;
        out.clear();
        out.extend(
            real.iter()
                .zip(imag.iter())
                .take(self.size / 2)
                .map(|(&re, &im)| (re * re + im * im).sqrt() / scale),
        );
    }
}

fn reverse_bits(mut x: usize, bits: u32) -> usize {
    let mut result = 0;
    for _ in 0..bits {
        result = (result << 1) | (x & 1);
        x >>= 1;
    }
    result
}

/// Bin boundaries of the three analysis bands.
///
/// Bass covers `bass_start..bass_end`, mid `bass_end..mid_end`, high
/// `mid_end..high_end`; every end is clamped to the `N/2` usable bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandRanges {
    pub bass_start: usize,
    pub bass_end: usize,
    pub mid_end: usize,
    pub high_end: usize,
}

impl BandRanges {
    pub fn new(sample_rate: u32, fft_size: usize, edges_hz: [f32; 4]) -> Self {
        let bin_width = sample_rate as f32 / fft_size as f32;
        let nyquist_bins = fft_size / 2;
        let to_bin = |hz: f32| ((hz / bin_width).floor().max(0.0) as usize).min(nyquist_bins);

        let bass_start = to_bin(edges_hz[0]);
        let bass_end = to_bin(edges_hz[1]).max(bass_start);
        let mid_end = to_bin(edges_hz[2]).max(bass_end);
        let high_end = to_bin(edges_hz[3]).max(mid_end);

        Self {
            bass_start,
            bass_end,
            mid_end,
            high_end,
        }
    }
}

/// Offline whole-track frequency analyzer producing banded energy curves.
pub struct FrequencyAnalyzer {
    config: FrequencyConfig,
    fft: Radix2Fft,
    window: Vec<f32>,
}

impl FrequencyAnalyzer {
    pub fn new(config: FrequencyConfig) -> Result<Self> {
        let fft = Radix2Fft::new(config.fft_size)?;

        if config.frame_rate.is_nan() || config.frame_rate <= 0.0 {
            return Err(ChoreoError::InvalidConfig(format!(
                "frame rate must be positive, got {}",
                config.frame_rate
            )));
        }
        let edges = config.band_edges_hz;
        if edges.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(ChoreoError::InvalidConfig(format!(
                "band edges must be ascending, got {:?}",
                edges
            )));
        }

        let window = Self::hann_window(config.fft_size);

        Ok(Self {
            config,
            fft,
            window,
        })
    }

    pub fn config(&self) -> &FrequencyConfig {
        &self.config
    }

    fn hann_window(size: usize) -> Vec<f32> {
        (0..size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect()
    }

    pub fn band_ranges(&self, sample_rate: u32) -> BandRanges {
        BandRanges::new(sample_rate, self.config.fft_size, self.config.band_edges_hz)
    }

    pub fn analyze(&self, samples: &[f32], sample_rate: u32) -> Result<FrequencyBands> {
        self.analyze_with_progress(samples, sample_rate, |_| {})
    }

    /// Analyze the whole buffer, calling `on_progress` with the completed
    /// fraction after every `progress_interval` ticks.
    pub fn analyze_with_progress<F>(
        &self,
        samples: &[f32],
        sample_rate: u32,
        mut on_progress: F,
    ) -> Result<FrequencyBands>
    where
        F: FnMut(f32),
    {
        let samples_per_frame = (sample_rate as f32 / self.config.frame_rate).floor() as usize;
        if sample_rate == 0 || samples_per_frame == 0 {
            return Err(ChoreoError::InvalidSampleRate(sample_rate));
        }

        let n = self.config.fft_size;
        let total_frames = samples.len().div_ceil(samples_per_frame);
        let ranges = self.band_ranges(sample_rate);
        let spectrogram_bins = self.config.spectrogram_bins.clamp(1, n / 2);
        let chunk = self.config.progress_interval.max(1);

        let mut bass = vec![0.0; total_frames];
        let mut mid = vec![0.0; total_frames];
        let mut high = vec![0.0; total_frames];
        let mut spectrogram = Vec::with_capacity(total_frames);

        let mut real = vec![0.0f32; n];
        let mut imag = vec![0.0f32; n];
        let mut magnitudes = Vec::with_capacity(n / 2);

        for chunk_start in (0..total_frames).step_by(chunk) {
            let chunk_end = (chunk_start + chunk).min(total_frames);

            for frame in chunk_start..chunk_end {
                let start = frame * samples_per_frame;
                self.load_windowed(samples, start, &mut real, &mut imag);
                self.fft.process(&mut real, &mut imag);
                self.fft.magnitudes(&real, &imag, &mut magnitudes);

                spectrogram.push(downsample_spectrum(&magnitudes, spectrogram_bins));

                bass[frame] = band_energy(&magnitudes, ranges.bass_start, ranges.bass_end);
                mid[frame] = band_energy(&magnitudes, ranges.bass_end, ranges.mid_end);
                high[frame] = band_energy(&magnitudes, ranges.mid_end, ranges.high_end);
            }

            on_progress(chunk_end as f32 / total_frames as f32);
        }

        normalize_peak(&mut bass);
        normalize_peak(&mut mid);
        normalize_peak(&mut high);

        debug!(
            "Frequency analysis: {} frames at {} fps, bins bass {}..{} mid ..{} high ..{}",
            total_frames,
            self.config.frame_rate,
            ranges.bass_start,
            ranges.bass_end,
            ranges.mid_end,
            ranges.high_end
        );

        Ok(FrequencyBands {
            bass,
            mid,
            high,
            spectrogram,
            spectrogram_bins,
            sample_rate,
            duration: samples.len() as f32 / sample_rate as f32,
            frame_rate: self.config.frame_rate,
        })
    }

    // Zero-pads past the end of the buffer
    fn load_windowed(&self, samples: &[f32], start: usize, real: &mut [f32], imag: &mut [f32]) {
        let available = samples.len().saturating_sub(start).min(real.len());

        for i in 0..real.len() {
            real[i] = if i < available {
                samples[start + i] * self.window[i]
            } else {
                0.0
            };
        }
        imag.fill(0.0);
    }

    pub fn bin_to_frequency(bin: usize, sample_rate: u32, fft_size: usize) -> f32 {
        bin as f32 * sample_rate as f32 / fft_size as f32
    }

    pub fn frequency_to_bin(frequency: f32, sample_rate: u32, fft_size: usize) -> usize {
        (frequency * fft_size as f32 / sample_rate as f32).round().max(0.0) as usize
    }
}

/// RMS of the magnitudes in `start..end`
fn band_energy(magnitudes: &[f32], start: usize, end: usize) -> f32 {
    let end = end.min(magnitudes.len());
    if start >= end {
        return 0.0;
    }

    let sum: f32 = magnitudes[start..end].iter().map(|m| m * m).sum();
    (sum / (end - start) as f32).sqrt()
}

/// Block-average `magnitudes` down to `target` values
fn downsample_spectrum(magnitudes: &[f32], target: usize) -> Vec<f32> {
    let ratio = magnitudes.len() as f32 / target as f32;

    (0..target)
        .map(|i| {
            let start = (i as f32 * ratio).floor() as usize;
            let end = (((i + 1) as f32 * ratio).floor() as usize).min(magnitudes.len());
            if end <= start {
                return 0.0;
            }
            magnitudes[start..end].iter().sum::<f32>() / (end - start) as f32
        })
        .collect()
}

/// Scale so the track-wide peak becomes 1.0; all-zero input is left untouched
fn normalize_peak(values: &mut [f32]) {
    let max = values.iter().fold(0.0f32, |a, &b| a.max(b));
    if max > 0.0 {
        for v in values.iter_mut() {
            *v /= max;
        }
    }
}
