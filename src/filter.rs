// VoltWatch — Signal Conditioning
//
// Two stages, run once per raw sample:
//   1. Despike — 5-tap median over a circular window. Removes single-sample
//      outliers (motor commutation noise) while keeping step edges.
//   2. Smooth  — first-order recursive low-pass.
//
// State is created once at boot and persists for the whole stream. `reset()`
// exists for cold restarts only.

use crate::config::{FilterConfig, DESPIKE_WINDOW};

/// Fixed-window median filter.
#[derive(Debug, Clone)]
pub struct Despike {
    window: [f32; DESPIKE_WINDOW],
    index: usize,
}

impl Despike {
    pub fn new() -> Self {
        Self {
            window: [0.0; DESPIKE_WINDOW],
            index: 0,
        }
    }

    /// Insert `raw` and return the median of the window.
    pub fn process(&mut self, raw: u16) -> f32 {
        self.window[self.index] = f32::from(raw);
        self.index = (self.index + 1) % DESPIKE_WINDOW;

        let mut sorted = self.window;
        insertion_sort(&mut sorted);
        sorted[DESPIKE_WINDOW / 2]
    }

    pub fn reset(&mut self) {
        self.window = [0.0; DESPIKE_WINDOW];
        self.index = 0;
    }
}

impl Default for Despike {
    fn default() -> Self {
        Self::new()
    }
}

// Cheaper than a general sort for five elements, and allocation-free.
fn insertion_sort(values: &mut [f32]) {
    for i in 1..values.len() {
        let key = values[i];
        let mut j = i;
        while j > 0 && values[j - 1] > key {
            values[j] = values[j - 1];
            j -= 1;
        }
        values[j] = key;
    }
}

/// First-order IIR low-pass: `y = a0·x + a1·x[n-1] − b1·y[n-1]`.
#[derive(Debug, Clone)]
pub struct Smoother {
    coeffs: FilterConfig,
    x_prev: f32,
    y_prev: f32,
}

impl Smoother {
    pub fn new(coeffs: FilterConfig) -> Self {
        Self {
            coeffs,
            x_prev: 0.0,
            y_prev: 0.0,
        }
    }

    pub fn process(&mut self, input: f32) -> f32 {
        let FilterConfig { a0, a1, b1 } = self.coeffs;
        let output = a0 * input + a1 * self.x_prev - b1 * self.y_prev;
        self.x_prev = input;
        self.y_prev = output;
        output
    }

    pub fn coefficients(&self) -> FilterConfig {
        self.coeffs
    }

    pub fn reset(&mut self) {
        self.x_prev = 0.0;
        self.y_prev = 0.0;
    }
}

/// Despike → smooth, one output per raw input.
#[derive(Debug, Clone)]
pub struct SignalPipeline {
    despike: Despike,
    smoother: Smoother,
}

impl SignalPipeline {
    pub fn new(coeffs: FilterConfig) -> Self {
        Self {
            despike: Despike::new(),
            smoother: Smoother::new(coeffs),
        }
    }

    pub fn process(&mut self, raw: u16) -> f32 {
        let despiked = self.despike.process(raw);
        self.smoother.process(despiked)
    }

    /// Cold-restart only. Never call between buffers of a running stream.
    pub fn reset(&mut self) {
        self.despike.reset();
        self.smoother.reset();
    }
}

impl Default for SignalPipeline {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LPF_CUTOFF_HZ, SAMPLE_RATE_HZ};

    #[test]
    fn despike_rejects_single_outlier() {
        let mut f = Despike::new();
        let mut out = Vec::new();
        for i in 0..20 {
            let raw = if i == 10 { 4000 } else { 2000 };
            out.push(f.process(raw));
        }
        // Window is saturated with the constant before the spike arrives and
        // the spike is never the middle value.
        for (i, v) in out.iter().enumerate().skip(DESPIKE_WINDOW) {
            assert_eq!(*v, 2000.0, "sample {i}");
        }
    }

    #[test]
    fn despike_preserves_step_edge() {
        let mut f = Despike::new();
        for _ in 0..DESPIKE_WINDOW {
            f.process(100);
        }
        let mut out = Vec::new();
        for _ in 0..DESPIKE_WINDOW {
            out.push(f.process(900));
        }
        // A median of 5 follows a step after 3 samples.
        assert_eq!(out, vec![100.0, 100.0, 900.0, 900.0, 900.0]);
    }

    #[test]
    fn despike_warms_up_from_zero() {
        let mut f = Despike::new();
        assert_eq!(f.process(50), 0.0);
        assert_eq!(f.process(50), 0.0);
        assert_eq!(f.process(50), 50.0);
    }

    #[test]
    fn smoother_step_response_within_analytic_bound() {
        let coeffs = FilterConfig::default();
        let mut s = Smoother::new(coeffs);
        let pole = coeffs.pole();
        let mut bound = 1.0 - coeffs.a0;
        for n in 0..200 {
            let y = s.process(1.0);
            let err = (1.0 - y).abs();
            assert!(err <= bound + 1e-5, "n={n} err={err} bound={bound}");
            bound *= pole;
        }
    }

    #[test]
    fn smoother_settles_to_constant() {
        let mut s = Smoother::new(FilterConfig::default());
        let mut y = 0.0;
        for _ in 0..500 {
            y = s.process(2048.0);
        }
        assert!((y - 2048.0).abs() < 0.01, "settled at {y}");
        // Once settled, a constant reproduces itself.
        let next = s.process(2048.0);
        assert!((next - y).abs() < 1e-3);
    }

    #[test]
    fn smoother_honours_feedback_sign() {
        let coeffs = FilterConfig { a0: 0.5, a1: 0.0, b1: -0.5 };
        let mut s = Smoother::new(coeffs);
        assert_eq!(s.process(1.0), 0.5);
        // 0.5·0 + 0·1 − (−0.5)·0.5 = 0.25
        assert_eq!(s.process(0.0), 0.25);
    }

    #[test]
    fn butterworth_step_reaches_63_percent_near_time_constant() {
        let rate = SAMPLE_RATE_HZ as f32;
        let coeffs = FilterConfig::butterworth(LPF_CUTOFF_HZ, rate);
        let mut s = Smoother::new(coeffs);
        let tau_samples = (rate / (2.0 * core::f32::consts::PI * LPF_CUTOFF_HZ)).round() as usize;
        let mut y = 0.0;
        for _ in 0..tau_samples {
            y = s.process(1.0);
        }
        assert!((0.55..0.72).contains(&y), "y(tau)={y}");
    }

    #[test]
    fn pipeline_reset_clears_memory() {
        let mut p = SignalPipeline::default();
        for _ in 0..100 {
            p.process(3000);
        }
        p.reset();
        assert_eq!(p.process(0), 0.0);
    }
}
