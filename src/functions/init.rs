//! Weight and bias initializers, plus the process-wide RNG handle behind
//! the public `seed` call.

use std::sync::{Mutex, OnceLock};

use ndarray_rand::rand_distr::{Distribution, Normal, StandardNormal, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightInit {
    Xavier,
    He,
    Lecun,
    Uniform,
    Normal,
    Orthogonal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiasInit {
    Zero,
    ConstFlat,
    ConstUneven,
}

impl WeightInit {
    /// Number of numeric header parameters the initializer expects.
    pub fn arity(&self) -> usize {
        match self {
            WeightInit::Uniform | WeightInit::Normal => 2,
            _ => 0,
        }
    }

    /// Fills a row-major `fan_out x fan_in` weight buffer.
    pub fn fill(
        &self,
        buffer: &mut [f32],
        fan_in: usize,
        fan_out: usize,
        a: f32,
        b: f32,
        rng: &mut StdRng,
    ) {
        debug_assert_eq!(buffer.len(), fan_in * fan_out);
        match self {
            WeightInit::Xavier => {
                let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
                sample_uniform(buffer, -limit, limit, rng);
            }
            WeightInit::He => {
                let limit = (6.0 / fan_in as f32).sqrt();
                sample_uniform(buffer, -limit, limit, rng);
            }
            WeightInit::Lecun => {
                let std = (1.0 / fan_in as f32).sqrt();
                sample_normal(buffer, 0.0, std, rng);
            }
            WeightInit::Uniform => sample_uniform(buffer, a, b, rng),
            WeightInit::Normal => sample_normal(buffer, a, b, rng),
            WeightInit::Orthogonal => fill_orthogonal(buffer, fan_in, fan_out, rng),
        }
    }
}

impl BiasInit {
    pub fn arity(&self) -> usize {
        match self {
            BiasInit::Zero => 0,
            BiasInit::ConstFlat => 1,
            BiasInit::ConstUneven => 2,
        }
    }

    pub fn fill(&self, buffer: &mut [f32], a: f32, b: f32, rng: &mut StdRng) {
        match self {
            BiasInit::Zero => buffer.fill(0.0),
            BiasInit::ConstFlat => buffer.fill(a),
            BiasInit::ConstUneven => sample_normal(buffer, a, b, rng),
        }
    }
}

fn sample_uniform(buffer: &mut [f32], low: f32, high: f32, rng: &mut StdRng) {
    if low == high {
        buffer.fill(low);
        return;
    }
    let dist = Uniform::new(low.min(high), low.max(high));
    for x in buffer.iter_mut() {
        *x = dist.sample(rng);
    }
}

fn sample_normal(buffer: &mut [f32], mean: f32, std: f32, rng: &mut StdRng) {
    if std == 0.0 {
        buffer.fill(mean);
        return;
    }
    let dist = Normal::new(mean, std.abs()).expect("finite normal parameters");
    for x in buffer.iter_mut() {
        *x = dist.sample(rng);
    }
}

/// Orthogonal rows via modified Gram-Schmidt over a standard-normal draw.
/// When fan_out exceeds fan_in the surplus rows are only normalized after
/// projecting out the first fan_in directions.
fn fill_orthogonal(buffer: &mut [f32], fan_in: usize, fan_out: usize, rng: &mut StdRng) {
    for x in buffer.iter_mut() {
        *x = StandardNormal.sample(rng);
    }
    for i in 0..fan_out {
        for j in 0..i.min(fan_in) {
            let dot: f32 = (0..fan_in)
                .map(|k| buffer[i * fan_in + k] * buffer[j * fan_in + k])
                .sum();
            for k in 0..fan_in {
                buffer[i * fan_in + k] -= dot * buffer[j * fan_in + k];
            }
        }
        let norm: f32 = (0..fan_in)
            .map(|k| buffer[i * fan_in + k] * buffer[i * fan_in + k])
            .sum::<f32>()
            .sqrt();
        if norm > 1e-12 {
            for k in 0..fan_in {
                buffer[i * fan_in + k] /= norm;
            }
        }
    }
}

static RNG: OnceLock<Mutex<StdRng>> = OnceLock::new();

fn handle() -> &'static Mutex<StdRng> {
    RNG.get_or_init(|| Mutex::new(StdRng::from_entropy()))
}

/// Seeds the process-wide RNG used by `Model::build` for parameter
/// initialization.
pub fn seed(value: u64) {
    *handle().lock().expect("rng lock") = StdRng::seed_from_u64(value);
}

/// Runs `f` with exclusive access to the process-wide RNG.
pub fn with_rng<T>(f: impl FnOnce(&mut StdRng) -> T) -> T {
    f(&mut handle().lock().expect("rng lock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_draws_are_reproducible() {
        let mut a = [0.0_f32; 8];
        let mut b = [0.0_f32; 8];
        let mut rng = StdRng::seed_from_u64(7);
        WeightInit::Xavier.fill(&mut a, 4, 2, 0.0, 0.0, &mut rng);
        let mut rng = StdRng::seed_from_u64(7);
        WeightInit::Xavier.fill(&mut b, 4, 2, 0.0, 0.0, &mut rng);
        assert_eq!(a, b);
    }

    #[test]
    fn zero_bias_is_exactly_zero() {
        let mut buf = [1.0_f32; 4];
        let mut rng = StdRng::seed_from_u64(0);
        BiasInit::Zero.fill(&mut buf, 0.0, 0.0, &mut rng);
        assert_eq!(buf, [0.0; 4]);
    }

    #[test]
    fn uniform_respects_bounds() {
        let mut buf = [0.0_f32; 64];
        let mut rng = StdRng::seed_from_u64(3);
        WeightInit::Uniform.fill(&mut buf, 8, 8, -0.25, 0.25, &mut rng);
        assert!(buf.iter().all(|v| (-0.25..0.25).contains(v)));
    }

    #[test]
    fn orthogonal_rows_are_orthonormal() {
        let (fan_in, fan_out) = (6, 4);
        let mut buf = vec![0.0_f32; fan_in * fan_out];
        let mut rng = StdRng::seed_from_u64(11);
        WeightInit::Orthogonal.fill(&mut buf, fan_in, fan_out, 0.0, 0.0, &mut rng);
        for i in 0..fan_out {
            for j in 0..=i {
                let dot: f32 = (0..fan_in)
                    .map(|k| buf[i * fan_in + k] * buf[j * fan_in + k])
                    .sum();
                let want = if i == j { 1.0 } else { 0.0 };
                assert!((dot - want).abs() < 1e-4, "rows {i},{j}: dot {dot}");
            }
        }
    }
}
