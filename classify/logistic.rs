//! # Elastic-Net Logistic Regression
//!
//! Minimizes
//!
//! ```text
//! deviance(β₀, β) / (2n) + α · ( ρ‖β‖₁ + (1 − ρ)/2 · ‖β‖₂² )
//! ```
//!
//! with an outer iteratively-reweighted least-squares loop and an inner cyclic
//! coordinate descent on the weighted quadratic approximation. The intercept is
//! never penalized. Each IRLS step is accepted only if it does not increase the
//! penalized objective; otherwise it is halved until it does.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MIN_WEIGHT: f64 = 1e-6;
const PROB_EPS: f64 = 1e-8;
const MAX_STEP_HALVINGS: usize = 30;

/// The status of the IRLS convergence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStatus {
    /// The relative change of the penalized objective fell below tolerance.
    Converged,
    /// Reached the iteration limit; the last accepted iterate is returned.
    MaxIterationsReached,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("Cannot fit a model to zero samples.")]
    EmptyInput,
    #[error("Design matrix has {rows} rows but the response has {len} entries.")]
    DimensionMismatch { rows: usize, len: usize },
    #[error("The response must be coded 0/1; found {0}.")]
    NonBinaryResponse(f64),
    #[error("The design matrix contains non-finite values.")]
    NonFiniteInput,
    #[error("Warm start has {found} coefficients, expected {expected}.")]
    WarmStartMismatch { found: usize, expected: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Penalty {
    pub alpha: f64,
    pub l1_ratio: f64,
}

impl Penalty {
    fn l1(&self) -> f64 {
        self.alpha * self.l1_ratio
    }

    fn l2(&self) -> f64 {
        self.alpha * (1.0 - self.l1_ratio)
    }

    fn value(&self, beta: &Array1<f64>) -> f64 {
        let abs_sum: f64 = beta.iter().map(|b| b.abs()).sum();
        let sq_sum: f64 = beta.dot(beta);
        self.l1() * abs_sum + 0.5 * self.l2() * sq_sum
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SolverOptions {
    pub max_iterations: usize,
    pub max_sweeps: usize,
    pub tolerance: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            max_sweeps: 1000,
            tolerance: 1e-6,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogisticFit {
    pub intercept: f64,
    pub coefficients: Array1<f64>,
    pub penalty: Penalty,
    pub status: FitStatus,
    pub iterations: usize,
    pub deviance: f64,
}

impl LogisticFit {
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        predict_proba(x, self.intercept, self.coefficients.view())
    }

    pub fn n_nonzero(&self) -> usize {
        self.coefficients.iter().filter(|b| **b != 0.0).count()
    }
}

pub fn predict_proba(x: ArrayView2<f64>, intercept: f64, coefficients: ArrayView1<f64>) -> Array1<f64> {
    (x.dot(&coefficients) + intercept).mapv(sigmoid)
}

fn sigmoid(eta: f64) -> f64 {
    let e = eta.clamp(-700.0, 700.0);
    1.0 / (1.0 + (-e).exp())
}

pub(crate) fn soft_threshold(x: f64, threshold: f64) -> f64 {
    if x > threshold {
        x - threshold
    } else if x < -threshold {
        x + threshold
    } else {
        0.0
    }
}

/// Working quantities of one IRLS step for the logit link: fitted
/// probabilities, working weights and the working response.
fn update_glm_vectors(y: ArrayView1<f64>, eta: &Array1<f64>) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
    let eta_clamped = eta.mapv(|e| e.clamp(-700.0, 700.0));
    let mut mu = eta_clamped.mapv(|e| 1.0 / (1.0 + (-e).exp()));
    mu.mapv_inplace(|v| v.clamp(PROB_EPS, 1.0 - PROB_EPS));
    let weights = (&mu * (1.0 - &mu)).mapv(|v| v.max(MIN_WEIGHT));
    let residual = &y - &mu;
    let z = &eta_clamped + &(&residual / &weights);
    (mu, weights, z)
}

fn calculate_deviance(y: ArrayView1<f64>, eta: &Array1<f64>) -> f64 {
    let total = Zip::from(y).and(eta).fold(0.0, |acc, &yi, &ei| {
        let mu = sigmoid(ei).clamp(PROB_EPS, 1.0 - PROB_EPS);
        // y is exactly 0 or 1, so only one log term survives.
        acc - if yi > 0.5 { mu.ln() } else { (1.0 - mu).ln() }
    });
    2.0 * total
}

struct DescentState {
    intercept: f64,
    beta: Array1<f64>,
    residual: Array1<f64>,
}

/// A logistic design bound to one training set. Reuse it across penalties to
/// fit a regularization path with warm starts.
pub struct ElasticNetLogistic {
    /// Transposed design (features × samples) so each feature is a contiguous row.
    xt: Array2<f64>,
    y: Array1<f64>,
    options: SolverOptions,
}

impl ElasticNetLogistic {
    pub fn new(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        options: SolverOptions,
    ) -> Result<Self, FitError> {
        if x.nrows() == 0 {
            return Err(FitError::EmptyInput);
        }
        if x.nrows() != y.len() {
            return Err(FitError::DimensionMismatch {
                rows: x.nrows(),
                len: y.len(),
            });
        }
        if let Some(&bad) = y.iter().find(|v| **v != 0.0 && **v != 1.0) {
            return Err(FitError::NonBinaryResponse(bad));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFiniteInput);
        }
        Ok(Self {
            xt: x.t().as_standard_layout().into_owned(),
            y: y.to_owned(),
            options,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.y.len()
    }

    pub fn n_features(&self) -> usize {
        self.xt.nrows()
    }

    fn linear_predictor(&self, intercept: f64, beta: &Array1<f64>) -> Array1<f64> {
        self.xt.t().dot(beta) + intercept
    }

    fn objective(&self, eta: &Array1<f64>, beta: &Array1<f64>, penalty: Penalty) -> f64 {
        calculate_deviance(self.y.view(), eta) / (2.0 * self.n_samples() as f64)
            + penalty.value(beta)
    }

    /// Fits one penalty, optionally starting from a previous solution.
    pub fn fit(&self, penalty: Penalty, warm: Option<&LogisticFit>) -> Result<LogisticFit, FitError> {
        let p = self.n_features();
        let (mut intercept, mut beta) = match warm {
            Some(prev) if prev.coefficients.len() != p => {
                return Err(FitError::WarmStartMismatch {
                    found: prev.coefficients.len(),
                    expected: p,
                });
            }
            Some(prev) => (prev.intercept, prev.coefficients.clone()),
            None => {
                let mean = self.y.mean().unwrap_or(0.5).clamp(PROB_EPS, 1.0 - PROB_EPS);
                ((mean / (1.0 - mean)).ln(), Array1::zeros(p))
            }
        };

        let mut eta = self.linear_predictor(intercept, &beta);
        let mut objective = self.objective(&eta, &beta, penalty);
        let mut status = FitStatus::MaxIterationsReached;
        let mut iterations = 0;

        for iter in 1..=self.options.max_iterations {
            iterations = iter;
            let (_, weights, z) = update_glm_vectors(self.y.view(), &eta);
            let (target_intercept, target_beta) =
                self.coordinate_descent(&weights, &z, intercept, &beta, penalty);

            // Step-halving: only accept a step that does not increase the objective.
            let mut step = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_STEP_HALVINGS {
                let cand_intercept = intercept + step * (target_intercept - intercept);
                let cand_beta = &beta + &((&target_beta - &beta) * step);
                let cand_eta = self.linear_predictor(cand_intercept, &cand_beta);
                let cand_objective = self.objective(&cand_eta, &cand_beta, penalty);
                if cand_objective.is_finite()
                    && cand_objective <= objective + 1e-12 * objective.abs().max(1.0)
                {
                    accepted = Some((cand_intercept, cand_beta, cand_eta, cand_objective));
                    break;
                }
                step *= 0.5;
            }

            let Some((new_intercept, new_beta, new_eta, new_objective)) = accepted else {
                log::debug!(
                    "IRLS iteration {}: no step decreased the objective; treating as converged",
                    iter
                );
                status = FitStatus::Converged;
                break;
            };

            let change = (objective - new_objective).abs() / (new_objective.abs() + 0.1);
            intercept = new_intercept;
            beta = new_beta;
            eta = new_eta;
            objective = new_objective;
            log::trace!(
                "IRLS iteration {}: objective {:.8}, step {}, relative change {:.3e}",
                iter,
                objective,
                step,
                change
            );
            if change < self.options.tolerance {
                status = FitStatus::Converged;
                break;
            }
        }

        if status == FitStatus::MaxIterationsReached {
            log::debug!(
                "Elastic-net fit (alpha={}, l1_ratio={}) stopped after {} iterations without converging",
                penalty.alpha,
                penalty.l1_ratio,
                iterations
            );
        }

        Ok(LogisticFit {
            intercept,
            deviance: calculate_deviance(self.y.view(), &eta),
            coefficients: beta,
            penalty,
            status,
            iterations,
        })
    }

    /// Fits `alphas` in the order given, warm-starting each fit from the
    /// previous one. Ordering them from strongest to weakest is fastest.
    pub fn fit_path(&self, alphas: &[f64], l1_ratio: f64) -> Result<Vec<LogisticFit>, FitError> {
        let mut fits: Vec<LogisticFit> = Vec::with_capacity(alphas.len());
        for &alpha in alphas {
            let penalty = Penalty { alpha, l1_ratio };
            let fit = self.fit(penalty, fits.last())?;
            fits.push(fit);
        }
        Ok(fits)
    }

    /// Minimizes the weighted least-squares approximation around the current
    /// iterate. Cycles over every coordinate, then over the active set until it
    /// stabilizes, and repeats until a full pass changes nothing.
    fn coordinate_descent(
        &self,
        weights: &Array1<f64>,
        z: &Array1<f64>,
        intercept: f64,
        beta: &Array1<f64>,
        penalty: Penalty,
    ) -> (f64, Array1<f64>) {
        let n = self.n_samples() as f64;
        let p = self.n_features();
        let xw2: Array1<f64> = Array1::from_iter(self.xt.rows().into_iter().map(|row| {
            Zip::from(&row)
                .and(weights)
                .fold(0.0, |acc, &x, &w| acc + w * x * x)
                / n
        }));

        let mut state = DescentState {
            intercept,
            beta: beta.clone(),
            residual: z - &self.linear_predictor(intercept, beta),
        };

        let tolerance = self.options.tolerance;
        let mut sweeps = 0;
        while sweeps < self.options.max_sweeps {
            let change = self.descent_pass(&mut state, weights, &xw2, 0..p, penalty);
            sweeps += 1;
            if change < tolerance {
                break;
            }
            let active: Vec<usize> = (0..p).filter(|&j| state.beta[j] != 0.0).collect();
            while sweeps < self.options.max_sweeps {
                let change =
                    self.descent_pass(&mut state, weights, &xw2, active.iter().copied(), penalty);
                sweeps += 1;
                if change < tolerance {
                    break;
                }
            }
        }

        (state.intercept, state.beta)
    }

    /// One pass over `indices` plus the intercept. Returns the largest weighted
    /// squared coefficient change.
    fn descent_pass(
        &self,
        state: &mut DescentState,
        weights: &Array1<f64>,
        xw2: &Array1<f64>,
        indices: impl Iterator<Item = usize>,
        penalty: Penalty,
    ) -> f64 {
        let n = self.n_samples() as f64;
        let (l1, l2) = (penalty.l1(), penalty.l2());
        let mut max_change: f64 = 0.0;

        for j in indices {
            let xj = self.xt.row(j);
            let old = state.beta[j];
            let grad = Zip::from(&xj)
                .and(weights)
                .and(&state.residual)
                .fold(0.0, |acc, &x, &w, &r| acc + w * x * r)
                / n
                + xw2[j] * old;
            let denom = xw2[j] + l2;
            let new = if denom > 0.0 {
                soft_threshold(grad, l1) / denom
            } else {
                0.0
            };
            let delta = new - old;
            if delta != 0.0 {
                state.residual.scaled_add(-delta, &xj);
                state.beta[j] = new;
                max_change = max_change.max(xw2[j] * delta * delta);
            }
        }

        let weight_sum = weights.sum();
        let delta = weights.dot(&state.residual) / weight_sum;
        if delta != 0.0 {
            state.intercept += delta;
            state.residual -= delta;
            max_change = max_change.max(weight_sum / n * delta * delta);
        }
        max_change
    }
}
