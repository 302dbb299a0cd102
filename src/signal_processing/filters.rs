//! FIR Filter Design and Application
//!
//! Linear-phase FIR filters designed with the windowed-sinc method. A designed
//! [`FirFilter`] is immutable and can be applied to any number of signals,
//! either causally (delay of `order / 2` samples) or forward-backward for zero
//! phase distortion.

use crate::error::{Result, SsrError};
use crate::record::Record;
use ndarray::{aview1, Array2};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::f64::consts::PI;

// Per-thread planner so rayon workers reuse cached plans
thread_local! {
    static FFT_PLANNER: RefCell<FftPlanner<f64>> = RefCell::new(FftPlanner::new());
}

/// Ratio of transition width to cutoff frequency used for default orders
const TRANSITION_WIDTH_RATIO: f64 = 0.25;
/// Transition width floor in Hz
const MIN_TRANSITION_WIDTH: f64 = 2.0;
/// Filter length factor for Hamming windows (length = factor / normalized transition width)
const HAMMING_LENGTH_FACTOR: f64 = 3.3;
/// Tap count from which causal filtering switches to FFT convolution
const FFT_MIN_TAPS: usize = 64;

/// Desired frequency response. Frequencies are in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseType {
    Lowpass { cutoff: f64 },
    Highpass { cutoff: f64 },
    Bandpass { low: f64, high: f64 },
    Bandstop { low: f64, high: f64 },
}

impl ResponseType {
    /// Check the cutoffs against the Nyquist frequency of `sample_rate`.
    pub fn validate(&self, sample_rate: f64) -> Result<()> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(SsrError::InvalidParameter(format!(
                "Sampling rate must be positive, got {} Hz",
                sample_rate
            )));
        }
        let nyquist = sample_rate / 2.0;
        let in_range = |f: f64| f.is_finite() && f > 0.0 && f < nyquist;

        match *self {
            ResponseType::Lowpass { cutoff } | ResponseType::Highpass { cutoff } => {
                if !in_range(cutoff) {
                    return Err(SsrError::InvalidParameter(format!(
                        "Cutoff frequency ({} Hz) must lie between 0 and Nyquist ({} Hz)",
                        cutoff, nyquist
                    )));
                }
            }
            ResponseType::Bandpass { low, high } | ResponseType::Bandstop { low, high } => {
                if !in_range(low) || !in_range(high) {
                    return Err(SsrError::InvalidParameter(format!(
                        "Band edges ({} Hz, {} Hz) must lie between 0 and Nyquist ({} Hz)",
                        low, high, nyquist
                    )));
                }
                if low >= high {
                    return Err(SsrError::InvalidParameter(
                        "Low cutoff must be less than high cutoff".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Narrowest transition band in Hz: a quarter of the edge frequency, at
    /// least 2 Hz, but never wider than the room left below (high-pass edge)
    /// or above (low-pass edge) the cutoff.
    fn transition_width(&self, sample_rate: f64) -> f64 {
        let nyquist = sample_rate / 2.0;
        let width = |f: f64, room: f64| (f * TRANSITION_WIDTH_RATIO).max(MIN_TRANSITION_WIDTH).min(room);

        match *self {
            ResponseType::Highpass { cutoff } => width(cutoff, cutoff),
            ResponseType::Lowpass { cutoff } => width(cutoff, nyquist - cutoff),
            ResponseType::Bandpass { low, high } | ResponseType::Bandstop { low, high } => {
                width(low, low).min(width(high, nyquist - high))
            }
        }
    }

    /// Pass/stop bands as (left, right) pairs normalized to Nyquist.
    fn pass_bands(&self, sample_rate: f64) -> Vec<(f64, f64)> {
        let nyquist = sample_rate / 2.0;
        match *self {
            ResponseType::Lowpass { cutoff } => vec![(0.0, cutoff / nyquist)],
            ResponseType::Highpass { cutoff } => vec![(cutoff / nyquist, 1.0)],
            ResponseType::Bandpass { low, high } => vec![(low / nyquist, high / nyquist)],
            ResponseType::Bandstop { low, high } => {
                vec![(0.0, low / nyquist), (high / nyquist, 1.0)]
            }
        }
    }
}

/// Window applied to the ideal impulse response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    #[default]
    Hamming,
    Hann,
    Blackman,
    Rectangular,
}

impl Window {
    /// Symmetric window of `len` points
    pub fn coefficients(&self, len: usize) -> Vec<f64> {
        if len < 2 {
            return vec![1.0; len];
        }
        let denom = (len - 1) as f64;
        (0..len)
            .map(|n| {
                let x = 2.0 * PI * n as f64 / denom;
                match self {
                    Window::Hamming => 0.54 - 0.46 * x.cos(),
                    Window::Hann => 0.5 - 0.5 * x.cos(),
                    Window::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
                    Window::Rectangular => 1.0,
                }
            })
            .collect()
    }
}

/// Default FIR order for a response at `sample_rate`.
///
/// The length follows the Hamming window rule `3.3 / (transition / fs)`,
/// rounded up to the next even order so that the filter has an odd number of
/// taps and an integer group delay.
pub fn default_filter_order(response: &ResponseType, sample_rate: f64) -> Result<usize> {
    response.validate(sample_rate)?;

    let transition = response.transition_width(sample_rate);
    let order = (HAMMING_LENGTH_FACTOR / (transition / sample_rate)).ceil() as usize;
    let order = order + order % 2;

    log::debug!(
        "Default order for {:?} at {} Hz: {} (transition width {:.3} Hz)",
        response,
        sample_rate,
        order,
        transition
    );
    Ok(order)
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Designed linear-phase FIR filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirFilter {
    response: ResponseType,
    sample_rate: f64,
    window: Window,
    taps: Vec<f64>,
}

impl FirFilter {
    /// Design a windowed-sinc filter with `order + 1` taps.
    ///
    /// The order must be even: high-pass and band-stop responses need a
    /// symmetric filter of odd length.
    pub fn design(response: ResponseType, order: usize, sample_rate: f64, window: Window) -> Result<Self> {
        response.validate(sample_rate)?;
        if order == 0 || order % 2 != 0 {
            return Err(SsrError::InvalidParameter(format!(
                "FIR order must be a positive even number, got {}",
                order
            )));
        }

        let num_taps = order + 1;
        let alpha = order as f64 / 2.0;
        let bands = response.pass_bands(sample_rate);
        let win = window.coefficients(num_taps);

        let mut taps: Vec<f64> = (0..num_taps)
            .map(|n| {
                let m = n as f64 - alpha;
                let ideal: f64 = bands
                    .iter()
                    .map(|&(left, right)| right * sinc(right * m) - left * sinc(left * m))
                    .sum();
                ideal * win[n]
            })
            .collect();

        // Unity gain at DC, at Nyquist, or at the centre of the pass band
        let (left, right) = bands[0];
        let scale_frequency = if left == 0.0 {
            0.0
        } else if right == 1.0 {
            1.0
        } else {
            (left + right) / 2.0
        };
        let scale: f64 = taps
            .iter()
            .enumerate()
            .map(|(n, h)| h * (PI * (n as f64 - alpha) * scale_frequency).cos())
            .sum();
        for h in &mut taps {
            *h /= scale;
        }

        log::debug!(
            "Designed {:?} FIR filter: {} taps, {:?} window, fs={} Hz",
            response,
            num_taps,
            window,
            sample_rate
        );

        Ok(Self {
            response,
            sample_rate,
            window,
            taps,
        })
    }

    /// Design with [`default_filter_order`] and a Hamming window.
    pub fn with_default_order(response: ResponseType, sample_rate: f64) -> Result<Self> {
        let order = default_filter_order(&response, sample_rate)?;
        Self::design(response, order, sample_rate, Window::Hamming)
    }

    pub fn taps(&self) -> &[f64] {
        &self.taps
    }

    pub fn order(&self) -> usize {
        self.taps.len() - 1
    }

    pub fn response(&self) -> ResponseType {
        self.response
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Delay introduced by a causal pass, in samples
    pub fn group_delay(&self) -> usize {
        self.order() / 2
    }

    /// Magnitude of the frequency response at `freq` Hz
    pub fn magnitude_at(&self, freq: f64) -> f64 {
        let omega = 2.0 * PI * freq / self.sample_rate;
        let (re, im) = self
            .taps
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(re, im), (n, h)| {
                let phase = omega * n as f64;
                (re + h * phase.cos(), im - h * phase.sin())
            });
        (re * re + im * im).sqrt()
    }

    /// Single causal pass, starting from a zero state.
    pub fn filter(&self, signal: &[f64]) -> Vec<f64> {
        if self.taps.len() < FFT_MIN_TAPS {
            self.convolve_direct(signal)
        } else {
            self.convolve_fft(signal)
        }
    }

    fn convolve_direct(&self, signal: &[f64]) -> Vec<f64> {
        let last_tap = self.taps.len() - 1;
        (0..signal.len())
            .map(|i| {
                self.taps[..=last_tap.min(i)]
                    .iter()
                    .enumerate()
                    .map(|(k, h)| h * signal[i - k])
                    .sum::<f64>()
            })
            .collect()
    }

    /// Overlap-add: each block is convolved in the frequency domain and its
    /// tail added into the next block's output.
    fn convolve_fft(&self, signal: &[f64]) -> Vec<f64> {
        if signal.is_empty() {
            return Vec::new();
        }

        let num_taps = self.taps.len();
        let n_fft = (2 * num_taps).next_power_of_two();
        let block_len = n_fft - num_taps + 1;
        let zero = Complex::new(0.0, 0.0);

        let (forward, inverse) = FFT_PLANNER.with(|planner| {
            let mut planner = planner.borrow_mut();
            (planner.plan_fft_forward(n_fft), planner.plan_fft_inverse(n_fft))
        });

        let mut kernel: Vec<Complex<f64>> = self.taps.iter().map(|&h| Complex::new(h, 0.0)).collect();
        kernel.resize(n_fft, zero);
        forward.process(&mut kernel);

        let scale = 1.0 / n_fft as f64;
        let mut output = vec![0.0; signal.len()];
        let mut buffer = vec![zero; n_fft];

        for (block, chunk) in signal.chunks(block_len).enumerate() {
            let offset = block * block_len;
            buffer.fill(zero);
            for (dst, &x) in buffer.iter_mut().zip(chunk) {
                *dst = Complex::new(x, 0.0);
            }

            forward.process(&mut buffer);
            for (x, &h) in buffer.iter_mut().zip(&kernel) {
                *x = *x * h;
            }
            inverse.process(&mut buffer);

            let end = (offset + chunk.len() + num_taps - 1).min(signal.len());
            for (out, y) in output[offset..end].iter_mut().zip(&buffer) {
                *out += y.re * scale;
            }
        }
        output
    }

    /// Zero-phase forward-backward pass.
    ///
    /// The signal is extended at both ends by point reflection about its end
    /// samples so the start-up transients fall outside the returned range.
    pub fn filtfilt(&self, signal: &[f64]) -> Vec<f64> {
        if signal.is_empty() {
            return Vec::new();
        }

        let wanted = 3 * (self.taps.len() - 1);
        let padlen = wanted.min(signal.len() - 1);
        if padlen < wanted {
            log::debug!(
                "Signal of {} samples is shorter than the {} sample padding, edges will show transients",
                signal.len(),
                wanted
            );
        }

        let extended = odd_extension(signal, padlen);
        let mut forward = self.filter(&extended);
        forward.reverse();
        let mut backward = self.filter(&forward);
        backward.reverse();

        backward[padlen..padlen + signal.len()].to_vec()
    }

    pub fn apply(&self, signal: &[f64], zero_phase: bool) -> Vec<f64> {
        if zero_phase {
            self.filtfilt(signal)
        } else {
            self.filter(signal)
        }
    }
}

fn odd_extension(signal: &[f64], padlen: usize) -> Vec<f64> {
    let n = signal.len();
    let first = signal[0];
    let last = signal[n - 1];

    let mut extended = Vec::with_capacity(n + 2 * padlen);
    extended.extend((1..=padlen).rev().map(|i| 2.0 * first - signal[i]));
    extended.extend_from_slice(signal);
    extended.extend((1..=padlen).map(|i| 2.0 * last - signal[n - 1 - i]));
    extended
}

/// Filter a single signal.
pub fn filter_signal(signal: &[f64], filter: &FirFilter, zero_phase: bool) -> Vec<f64> {
    filter.apply(signal, zero_phase)
}

/// Filter every column of a `samples × channels` matrix independently.
pub fn filter_matrix(signals: &mut Array2<f64>, filter: &FirFilter, zero_phase: bool) {
    let mut columns: Vec<Vec<f64>> = signals.columns().into_iter().map(|c| c.to_vec()).collect();

    columns
        .par_iter_mut()
        .for_each(|column| *column = filter.apply(column.as_slice(), zero_phase));

    for (mut dst, src) in signals.columns_mut().into_iter().zip(&columns) {
        dst.assign(&aview1(src));
    }
}

/// Record of a filter applied to a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedFilter {
    pub response: ResponseType,
    pub order: usize,
    pub window: Window,
    pub zero_phase: bool,
}

/// Configuration for a filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub response: ResponseType,
    /// Filter order, derived from the response when absent
    #[serde(default)]
    pub order: Option<usize>,
    #[serde(default)]
    pub window: Window,
    /// Sampling rate in Hz
    pub sample_rate: f64,
}

/// Create a filter from configuration
pub fn create_filter(config: &FilterConfig) -> Result<FirFilter> {
    let order = match config.order {
        Some(order) => order,
        None => default_filter_order(&config.response, config.sample_rate)?,
    };
    FirFilter::design(config.response, order, config.sample_rate, config.window)
}

impl Record {
    /// Filter every channel and log the filter in `processing.filters`.
    ///
    /// Only `data` changes; names, events and rates are untouched.
    pub fn filter(&mut self, filter: &FirFilter, zero_phase: bool) -> Result<()> {
        if (filter.sample_rate() - self.samplingrate).abs() > f64::EPSILON * self.samplingrate {
            return Err(SsrError::InvalidParameter(format!(
                "Filter designed for {} Hz cannot be applied to a {} Hz recording",
                filter.sample_rate(),
                self.samplingrate
            )));
        }

        let start = std::time::Instant::now();
        filter_matrix(&mut self.data, filter, zero_phase);
        log::debug!(
            "Filtered {} channels x {} samples in {:.2}ms",
            self.num_channels(),
            self.num_samples(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        self.processing.filters.push(AppliedFilter {
            response: filter.response(),
            order: filter.order(),
            window: filter.window(),
            zero_phase,
        });
        Ok(())
    }

    fn design_and_filter(&mut self, response: ResponseType, order: Option<usize>) -> Result<()> {
        let config = FilterConfig {
            response,
            order,
            window: Window::Hamming,
            sample_rate: self.samplingrate,
        };
        let filter = create_filter(&config)?;
        self.filter(&filter, true)
    }

    /// Zero-phase high-pass filter
    pub fn highpass_filter(&mut self, cutoff: f64, order: Option<usize>) -> Result<()> {
        self.design_and_filter(ResponseType::Highpass { cutoff }, order)
    }

    /// Zero-phase low-pass filter
    pub fn lowpass_filter(&mut self, cutoff: f64, order: Option<usize>) -> Result<()> {
        self.design_and_filter(ResponseType::Lowpass { cutoff }, order)
    }

    /// Zero-phase band-pass filter
    pub fn bandpass_filter(&mut self, low: f64, high: f64, order: Option<usize>) -> Result<()> {
        self.design_and_filter(ResponseType::Bandpass { low, high }, order)
    }
}
