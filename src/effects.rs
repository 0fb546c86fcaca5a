//! A small, fixed effects chain, one instance per source.
//!
//! There is no dynamic plugin graph — every source applies exactly the
//! effects named here, in order, with no ability to reorder or swap them at
//! runtime. That keeps the chain itself bounded and allocation-free on the
//! RT path while still giving each source a gain stage and a limiter, the
//! two effects almost every engine in this space ships with even before any
//! content-aware processing is on the table.

/// An in-place effect applied to an interleaved block of `f32` samples.
pub trait Effect: Send {
    fn process(&mut self, samples: &mut [f32]);

    fn name(&self) -> &'static str;
}

/// Flat gain multiplier.
pub struct Gain {
    amount: f32,
}

impl Gain {
    pub fn new(amount: f32) -> Self {
        Self { amount }
    }

    pub fn set_amount(&mut self, amount: f32) {
        self.amount = amount;
    }
}

impl Effect for Gain {
    fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            *s *= self.amount;
        }
    }

    fn name(&self) -> &'static str {
        "gain"
    }
}

/// Soft-knee limiter: samples below `threshold` pass untouched, samples
/// above it are compressed with a `tanh` knee rather than hard-clamped,
/// so a momentary overshoot rounds off instead of crackling.
pub struct Limiter {
    threshold: f32,
}

impl Limiter {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    fn knee(&self, sample: f32) -> f32 {
        let sign = sample.signum();
        let magnitude = sample.abs();
        if magnitude <= self.threshold {
            return sample;
        }
        let over = magnitude - self.threshold;
        let headroom = 1.0 - self.threshold;
        let compressed = self.threshold + headroom * (over / headroom).tanh();
        sign * compressed
    }
}

impl Effect for Limiter {
    fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            *s = self.knee(*s);
        }
    }

    fn name(&self) -> &'static str {
        "limiter"
    }
}

/// The fixed per-source chain: gain followed by a limiter.
pub struct EffectChain {
    effects: Vec<Box<dyn Effect>>,
}

impl EffectChain {
    pub fn default_chain() -> Self {
        Self {
            effects: vec![Box::new(Gain::new(1.0)), Box::new(Limiter::new(0.9))],
        }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for effect in self.effects.iter_mut() {
            effect.process(samples);
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.effects.iter().map(|e| e.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_scales_every_sample() {
        let mut gain = Gain::new(0.5);
        let mut samples = [1.0, -1.0, 0.5];
        gain.process(&mut samples);
        assert_eq!(samples, [0.5, -0.5, 0.25]);
    }

    #[test]
    fn limiter_passes_samples_under_threshold_untouched() {
        let mut limiter = Limiter::new(0.9);
        let mut samples = [0.5, -0.3];
        limiter.process(&mut samples);
        assert_eq!(samples, [0.5, -0.3]);
    }

    #[test]
    fn limiter_compresses_samples_over_threshold_without_hard_clipping() {
        let mut limiter = Limiter::new(0.9);
        let mut samples = [1.5, -1.5];
        limiter.process(&mut samples);
        assert!(samples[0] > 0.9 && samples[0] < 1.0);
        assert!(samples[1] < -0.9 && samples[1] > -1.0);
    }

    #[test]
    fn default_chain_runs_gain_then_limiter() {
        let mut chain = EffectChain::default_chain();
        assert_eq!(chain.names(), vec!["gain", "limiter"]);
        let mut samples = [2.0];
        chain.process(&mut samples);
        assert!(samples[0] < 1.0);
    }
}
