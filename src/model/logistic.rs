//! L2-regularised logistic regression fit by damped Newton iterations

use super::{Classifier, LOGISTIC_REGRESSION};
use crate::{Error, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Logistic regression hyperparameters.
///
/// `c` is the inverse regularisation strength: the objective is
/// `sum(log_loss) + ||w||^2 / (2c)`; the intercept is not penalised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticRegressionParams {
    /// Inverse regularisation strength (> 0)
    pub c: f64,
    /// Newton iteration budget (> 0)
    pub max_iter: usize,
    /// Convergence threshold on the largest parameter update
    pub tol: f64,
}

impl Default for LogisticRegressionParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 1000,
            tol: 1e-6,
        }
    }
}

impl LogisticRegressionParams {
    pub(super) fn to_param_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("c".to_string(), self.c.to_string()),
            ("max_iter".to_string(), self.max_iter.to_string()),
            ("tol".to_string(), self.tol.to_string()),
        ])
    }

    fn validate(&self) -> Result<()> {
        if !(self.c.is_finite() && self.c > 0.0) {
            return Err(Error::training(LOGISTIC_REGRESSION, format!("c must be > 0, got {}", self.c)));
        }
        if self.max_iter == 0 {
            return Err(Error::training(LOGISTIC_REGRESSION, "max_iter must be > 0"));
        }
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return Err(Error::training(LOGISTIC_REGRESSION, format!("tol must be > 0, got {}", self.tol)));
        }
        Ok(())
    }

    pub(super) fn fit(&self, x: &[Vec<f64>], y: &[u8]) -> Result<LogisticRegressionModel> {
        self.validate()?;
        let d = x[0].len();
        let design = design_matrix(x);
        let labels = DVector::from_iterator(y.len(), y.iter().map(|&l| f64::from(l)));
        // intercept is the last parameter and stays unpenalised
        let penalty = DVector::from_fn(d + 1, |i, _| if i < d { 1.0 / self.c } else { 0.0 });
        let mut theta = DVector::zeros(d + 1);
        let mut loss = objective(&theta, &design, &labels, &penalty);

        for iteration in 1..=self.max_iter {
            let (grad, hess) = gradient_hessian(&theta, &design, &labels, &penalty);
            let step = newton_step(hess, &grad).ok_or_else(|| {
                Error::training(LOGISTIC_REGRESSION, "singular Hessian during Newton step")
            })?;

            // backtracking keeps the objective monotone on near-separable data
            let mut scale = 1.0;
            let mut accepted = None;
            for _ in 0..30 {
                let candidate = &theta - &step * scale;
                let next = objective(&candidate, &design, &labels, &penalty);
                if next.is_finite() && next <= loss + 1e-12 {
                    loss = next;
                    accepted = Some(candidate);
                    break;
                }
                scale *= 0.5;
            }
            let Some(candidate) = accepted else {
                return Err(Error::training(
                    LOGISTIC_REGRESSION,
                    format!("line search failed at iteration {iteration}"),
                ));
            };

            let max_update = step.amax() * scale;
            theta = candidate;
            if max_update < self.tol {
                tracing::debug!(iteration, loss, "logistic regression converged");
                return Ok(LogisticRegressionModel {
                    coefficients: theta.rows(0, d).iter().copied().collect(),
                    intercept: theta[d],
                });
            }
        }

        Err(Error::training(
            LOGISTIC_REGRESSION,
            format!("did not converge within {} iterations", self.max_iter),
        ))
    }
}

/// Fitted logistic regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegressionModel {
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LogisticRegressionModel {
    /// Create a model from explicit parameters.
    #[must_use]
    pub fn new(coefficients: Vec<f64>, intercept: f64) -> Self {
        Self {
            coefficients,
            intercept,
        }
    }

    /// Feature weights.
    #[must_use]
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Bias term.
    #[must_use]
    pub const fn intercept(&self) -> f64 {
        self.intercept
    }

    fn decision(&self, row: &[f64]) -> f64 {
        linear(&self.coefficients, self.intercept, row)
    }
}

impl Classifier for LogisticRegressionModel {
    fn predict_proba(&self, row: &[f64]) -> f64 {
        sigmoid(self.decision(row))
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        Some(self.coefficients.iter().map(|c| c.abs()).collect())
    }
}

fn linear(w: &[f64], b: f64, row: &[f64]) -> f64 {
    w.iter().zip(row).map(|(w, x)| w * x).sum::<f64>() + b
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `log(1 + e^z)` without overflow
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

/// Rows of `x` with a trailing constant column for the intercept.
fn design_matrix(x: &[Vec<f64>]) -> DMatrix<f64> {
    let d = x[0].len();
    DMatrix::from_fn(x.len(), d + 1, |i, j| if j < d { x[i][j] } else { 1.0 })
}

fn objective(
    theta: &DVector<f64>,
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    penalty: &DVector<f64>,
) -> f64 {
    let z = x * theta;
    let data: f64 = z.iter().zip(y.iter()).map(|(z, y)| softplus(*z) - y * z).sum();
    data + 0.5 * penalty.dot(&theta.component_mul(theta))
}

fn gradient_hessian(
    theta: &DVector<f64>,
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    penalty: &DVector<f64>,
) -> (DVector<f64>, DMatrix<f64>) {
    let p = (x * theta).map(sigmoid);
    let grad = x.tr_mul(&(&p - y)) + penalty.component_mul(theta);

    let mut weighted = x.clone();
    for (mut row, pi) in weighted.row_iter_mut().zip(p.iter()) {
        row *= pi * (1.0 - pi);
    }
    let hess = x.tr_mul(&weighted) + DMatrix::from_diagonal(penalty);
    (grad, hess)
}

/// Solve `hess * step = grad`; Cholesky first, LU when the Hessian is not
/// numerically positive definite.
fn newton_step(hess: DMatrix<f64>, grad: &DVector<f64>) -> Option<DVector<f64>> {
    let step = match hess.clone().cholesky() {
        Some(chol) => chol.solve(grad),
        None => hess.lu().solve(grad)?,
    };
    step.iter().all(|v| v.is_finite()).then_some(step)
}
