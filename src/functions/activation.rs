//! Elementwise activation kernels and their derivatives.
//!
//! Every activation takes one scalar parameter; most ignore it. Derivatives
//! are evaluated from the pre-activation values recorded in the backlog,
//! which is why `derive` receives the whole raw slice (softmax needs the
//! full vector to reconstruct its outputs).

const GELU_C: f32 = 0.044_715;
const SELU_ALPHA: f32 = 1.673_263_2;
const SELU_LAMBDA: f32 = 1.050_701;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Sigmoid,
    Relu,
    ReluLeaky,
    ReluParametric,
    Tanh,
    Softmax,
    Elu,
    Gelu,
    Swish,
    Selu,
    Linear,
    BinaryStep,
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[inline]
fn gelu_inner(x: f32) -> f32 {
    let s2p = (2.0_f32 / std::f32::consts::PI).sqrt();
    s2p * (x + GELU_C * x * x * x)
}

impl Activation {
    /// Applies the activation in place.
    pub fn apply(&self, buffer: &mut [f32], parameter: f32) {
        match self {
            Activation::Sigmoid => {
                for x in buffer.iter_mut() {
                    *x = sigmoid(*x);
                }
            }
            Activation::Relu => {
                for x in buffer.iter_mut() {
                    *x = x.max(0.0);
                }
            }
            Activation::ReluLeaky => {
                for x in buffer.iter_mut() {
                    *x = x.max(0.1 * *x);
                }
            }
            Activation::ReluParametric => {
                for x in buffer.iter_mut() {
                    *x = x.max(parameter * *x);
                }
            }
            Activation::Tanh => {
                for x in buffer.iter_mut() {
                    *x = x.tanh();
                }
            }
            Activation::Softmax => {
                let max = buffer.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                let mut denom = 0.0;
                for x in buffer.iter_mut() {
                    *x = (*x - max).exp();
                    denom += *x;
                }
                for x in buffer.iter_mut() {
                    *x /= denom;
                }
            }
            Activation::Elu => {
                for x in buffer.iter_mut() {
                    if *x < 0.0 {
                        *x = parameter * (x.exp() - 1.0);
                    }
                }
            }
            Activation::Gelu => {
                for x in buffer.iter_mut() {
                    *x = 0.5 * *x * (1.0 + gelu_inner(*x).tanh());
                }
            }
            Activation::Swish => {
                for x in buffer.iter_mut() {
                    *x *= sigmoid(*x);
                }
            }
            Activation::Selu => {
                for x in buffer.iter_mut() {
                    *x = if *x > 0.0 {
                        SELU_LAMBDA * *x
                    } else {
                        SELU_LAMBDA * SELU_ALPHA * (x.exp() - 1.0)
                    };
                }
            }
            Activation::Linear => {}
            Activation::BinaryStep => {
                for x in buffer.iter_mut() {
                    *x = if *x >= 0.0 { 1.0 } else { 0.0 };
                }
            }
        }
    }

    /// Writes the derivative with respect to the pre-activation into `out`.
    pub fn derive(&self, raw: &[f32], out: &mut [f32], parameter: f32) {
        debug_assert_eq!(raw.len(), out.len());
        match self {
            Activation::Sigmoid => {
                for (o, &x) in out.iter_mut().zip(raw) {
                    let s = sigmoid(x);
                    *o = s * (1.0 - s);
                }
            }
            Activation::Relu => {
                for (o, &x) in out.iter_mut().zip(raw) {
                    *o = if x > 0.0 { 1.0 } else { 0.0 };
                }
            }
            Activation::ReluLeaky => {
                for (o, &x) in out.iter_mut().zip(raw) {
                    *o = if x > 0.0 { 1.0 } else { 0.1 };
                }
            }
            Activation::ReluParametric => {
                for (o, &x) in out.iter_mut().zip(raw) {
                    *o = if x > 0.0 { 1.0 } else { parameter };
                }
            }
            Activation::Tanh => {
                for (o, &x) in out.iter_mut().zip(raw) {
                    let t = x.tanh();
                    *o = 1.0 - t * t;
                }
            }
            Activation::Softmax => {
                // Diagonal of the Jacobian, consistent with treating the
                // primitive set as elementwise.
                out.copy_from_slice(raw);
                self.apply(out, parameter);
                for o in out.iter_mut() {
                    *o *= 1.0 - *o;
                }
            }
            Activation::Elu => {
                for (o, &x) in out.iter_mut().zip(raw) {
                    *o = if x >= 0.0 { 1.0 } else { parameter * x.exp() };
                }
            }
            Activation::Gelu => {
                let s2p = (2.0_f32 / std::f32::consts::PI).sqrt();
                for (o, &x) in out.iter_mut().zip(raw) {
                    let u = gelu_inner(x);
                    let t = u.tanh();
                    let du = s2p * (1.0 + 3.0 * GELU_C * x * x);
                    *o = 0.5 * (1.0 + t) + 0.5 * x * (1.0 - t * t) * du;
                }
            }
            Activation::Swish => {
                for (o, &x) in out.iter_mut().zip(raw) {
                    let s = sigmoid(x);
                    *o = s + x * s * (1.0 - s);
                }
            }
            Activation::Selu => {
                for (o, &x) in out.iter_mut().zip(raw) {
                    *o = if x > 0.0 {
                        SELU_LAMBDA
                    } else {
                        SELU_LAMBDA * SELU_ALPHA * x.exp()
                    };
                }
            }
            Activation::Linear => {
                out.fill(1.0);
            }
            Activation::BinaryStep => {
                out.fill(0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Activation;

    fn finite_diff(act: Activation, x: f32, parameter: f32) -> f32 {
        let eps = 1e-3;
        let mut hi = [x + eps];
        let mut lo = [x - eps];
        act.apply(&mut hi, parameter);
        act.apply(&mut lo, parameter);
        (hi[0] - lo[0]) / (2.0 * eps)
    }

    #[test]
    fn sigmoid_midpoint() {
        let mut buf = [0.0_f32];
        Activation::Sigmoid.apply(&mut buf, 0.0);
        assert!((buf[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn relu_clamps_negatives() {
        let mut buf = [-2.0, 0.5];
        Activation::Relu.apply(&mut buf, 0.0);
        assert_eq!(buf, [0.0, 0.5]);
    }

    #[test]
    fn softmax_sums_to_one() {
        let mut buf = [1.0, 2.0, 3.0];
        Activation::Softmax.apply(&mut buf, 0.0);
        let sum: f32 = buf.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(buf[2] > buf[1] && buf[1] > buf[0]);
    }

    #[test]
    fn smooth_derivatives_match_finite_differences() {
        let smooth = [
            Activation::Sigmoid,
            Activation::Tanh,
            Activation::Gelu,
            Activation::Swish,
            Activation::Elu,
        ];
        for act in smooth {
            for &x in &[-1.3_f32, -0.2, 0.4, 1.7] {
                let raw = [x];
                let mut out = [0.0];
                act.derive(&raw, &mut out, 1.0);
                let numeric = finite_diff(act, x, 1.0);
                assert!(
                    (out[0] - numeric).abs() < 1e-2,
                    "{act:?} at {x}: analytic {} vs numeric {numeric}",
                    out[0]
                );
            }
        }
    }

    #[test]
    fn linear_is_identity_with_unit_slope() {
        let mut buf = [3.5, -1.25];
        Activation::Linear.apply(&mut buf, 0.0);
        assert_eq!(buf, [3.5, -1.25]);
        let mut d = [0.0, 0.0];
        Activation::Linear.derive(&buf, &mut d, 0.0);
        assert_eq!(d, [1.0, 1.0]);
    }
}
