//! Loss reductions and their derivatives with respect to the prediction.
//!
//! Reduction conventions: mse, mae and mape are averaged over the output
//! width; huber, modified huber, hinge and cross-entropy are summed. The
//! derivatives are consistent with those conventions so that parameter
//! updates match finite differences of the reported loss.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
    Mse,
    Mae,
    Mape,
    Huber,
    HuberModified,
    Hinge,
    CrossEntropy,
}

impl Loss {
    /// Reduces the prediction/target pair to a scalar loss.
    pub fn evaluate(&self, result: &[f32], expected: &[f32], parameter: f32) -> f32 {
        debug_assert_eq!(result.len(), expected.len());
        let n = result.len() as f32;
        match self {
            Loss::Mse => {
                let sum: f32 = result
                    .iter()
                    .zip(expected)
                    .map(|(&r, &e)| (e - r) * (e - r))
                    .sum();
                sum / n
            }
            Loss::Mae => {
                let sum: f32 = result
                    .iter()
                    .zip(expected)
                    .map(|(&r, &e)| (e - r).abs())
                    .sum();
                sum / n
            }
            Loss::Mape => {
                let sum: f32 = result
                    .iter()
                    .zip(expected)
                    .map(|(&r, &e)| ((e - r) / e).abs())
                    .sum();
                sum / n
            }
            Loss::Huber => {
                let delta = parameter;
                result
                    .iter()
                    .zip(expected)
                    .map(|(&r, &e)| {
                        let x = e - r;
                        if x.abs() <= delta {
                            0.5 * x * x
                        } else {
                            delta * x.abs() - 0.5 * delta * delta
                        }
                    })
                    .sum()
            }
            Loss::HuberModified => result
                .iter()
                .zip(expected)
                .map(|(&r, &e)| {
                    let p = e * r;
                    if p > -1.0 {
                        (1.0 - p).max(0.0).powi(2)
                    } else {
                        -4.0 * p
                    }
                })
                .sum(),
            Loss::Hinge => result
                .iter()
                .zip(expected)
                .map(|(&r, &e)| (1.0 - e * r).max(0.0))
                .sum(),
            Loss::CrossEntropy => {
                let sum: f32 = result
                    .iter()
                    .zip(expected)
                    .map(|(&r, &e)| e * r.ln())
                    .sum();
                -sum
            }
        }
    }

    /// Writes dL/dresult into `out`.
    pub fn derive(&self, result: &[f32], expected: &[f32], out: &mut [f32], parameter: f32) {
        debug_assert_eq!(result.len(), expected.len());
        debug_assert_eq!(result.len(), out.len());
        let n = result.len() as f32;
        match self {
            Loss::Mse => {
                for ((o, &r), &e) in out.iter_mut().zip(result).zip(expected) {
                    *o = 2.0 * (r - e) / n;
                }
            }
            Loss::Mae => {
                for ((o, &r), &e) in out.iter_mut().zip(result).zip(expected) {
                    *o = (r - e).signum() / n;
                }
            }
            Loss::Mape => {
                for ((o, &r), &e) in out.iter_mut().zip(result).zip(expected) {
                    *o = (r - e).signum() / (e.abs() * n);
                }
            }
            Loss::Huber => {
                let delta = parameter;
                for ((o, &r), &e) in out.iter_mut().zip(result).zip(expected) {
                    let x = e - r;
                    *o = if x.abs() <= delta {
                        -x
                    } else {
                        delta * (r - e).signum()
                    };
                }
            }
            Loss::HuberModified => {
                for ((o, &r), &e) in out.iter_mut().zip(result).zip(expected) {
                    let p = e * r;
                    *o = if p > -1.0 {
                        -2.0 * e * (1.0 - p).max(0.0)
                    } else {
                        -4.0 * e
                    };
                }
            }
            Loss::Hinge => {
                for ((o, &r), &e) in out.iter_mut().zip(result).zip(expected) {
                    *o = if 1.0 - e * r > 0.0 { -e } else { 0.0 };
                }
            }
            Loss::CrossEntropy => {
                for ((o, &r), &e) in out.iter_mut().zip(result).zip(expected) {
                    *o = -e / r;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Loss;

    #[test]
    fn mse_of_exact_prediction_is_zero() {
        let r = [0.25, -1.5];
        assert_eq!(Loss::Mse.evaluate(&r, &r, 0.0), 0.0);
    }

    #[test]
    fn mse_known_value() {
        let loss = Loss::Mse.evaluate(&[1.0, 1.0], &[0.0, 3.0], 0.0);
        // ((0-1)^2 + (3-1)^2) / 2
        assert!((loss - 2.5).abs() < 1e-6);
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let expected = [0.8, 0.3];
        let result = [0.6, 0.5];
        let cases = [
            (Loss::Mse, 0.0),
            (Loss::Mae, 0.0),
            (Loss::Huber, 1.0),
            (Loss::Hinge, 0.0),
            (Loss::CrossEntropy, 0.0),
        ];
        let eps = 1e-3;
        for (loss, p) in cases {
            let mut grad = [0.0, 0.0];
            loss.derive(&result, &expected, &mut grad, p);
            for i in 0..result.len() {
                let mut hi = result;
                let mut lo = result;
                hi[i] += eps;
                lo[i] -= eps;
                let numeric =
                    (loss.evaluate(&hi, &expected, p) - loss.evaluate(&lo, &expected, p))
                        / (2.0 * eps);
                assert!(
                    (grad[i] - numeric).abs() < 1e-2,
                    "{loss:?} [{i}]: analytic {} vs numeric {numeric}",
                    grad[i]
                );
            }
        }
    }

    #[test]
    fn hinge_penalizes_margin_violations_only() {
        assert_eq!(Loss::Hinge.evaluate(&[2.0], &[1.0], 0.0), 0.0);
        assert!(Loss::Hinge.evaluate(&[-0.5], &[1.0], 0.0) > 1.0);
    }
}
