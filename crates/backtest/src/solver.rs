// crates/backtest/src/solver.rs
//! Projected-gradient minimizer over the capped probability simplex
//! `{ x : sum(x) = 1, lower <= x_i <= upper }`.

use common::{Error, Result};

/// Feasible region for a weight vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CappedSimplex {
    pub lower: f64,
    pub upper: f64,
}

impl CappedSimplex {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// The region is non-empty only while `n * lower <= 1 <= n * upper`.
    pub fn check_feasible(&self, n: usize) -> Result<()> {
        const SLACK: f64 = 1e-12;
        let n_f = n as f64;
        if n == 0 || self.lower > self.upper || n_f * self.lower > 1.0 + SLACK || n_f * self.upper < 1.0 - SLACK {
            return Err(Error::InvalidData(format!(
                "no weight vector of length {} sums to 1 within [{}, {}]",
                n, self.lower, self.upper
            )));
        }
        Ok(())
    }

    pub fn contains(&self, x: &[f64], tol: f64) -> bool {
        let sum: f64 = x.iter().sum();
        (sum - 1.0).abs() <= tol && x.iter().all(|v| *v >= self.lower - tol && *v <= self.upper + tol)
    }

    /// Euclidean projection: `x_i = clamp(v_i - tau, lower, upper)` with `tau`
    /// found by bisection so the result sums to one.
    pub fn project(&self, v: &[f64]) -> Vec<f64> {
        let mass = |tau: f64| -> f64 { v.iter().map(|x| (x - tau).clamp(self.lower, self.upper)).sum() };

        let max_v = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min_v = v.iter().copied().fold(f64::INFINITY, f64::min);
        // mass(lo) = n * upper >= 1, mass(hi) = n * lower <= 1
        let mut lo = min_v - self.upper;
        let mut hi = max_v - self.lower;
        for _ in 0..200 {
            let mid = 0.5 * (lo + hi);
            if mass(mid) > 1.0 {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi - lo <= f64::EPSILON * (1.0 + mid.abs()) {
                break;
            }
        }
        let tau = 0.5 * (lo + hi);
        v.iter().map(|x| (x - tau).clamp(self.lower, self.upper)).collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SolverOptions {
    pub max_iterations: usize,
    /// Stop once an accepted step improves the objective by less than this (relative)
    pub tolerance: f64,
    pub initial_step: f64,
    pub fd_step: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-8,
            initial_step: 1.0,
            fd_step: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutcome {
    pub x: Vec<f64>,
    pub fun: f64,
    pub iterations: usize,
    pub converged: bool,
    pub message: String,
}

/// Minimize `objective` over `region` starting from `x0`.
///
/// Gradients are central finite differences; each step is projected back
/// onto the region and accepted under an Armijo sufficient-decrease test.
/// A non-finite objective or gradient is an error.
pub fn minimize<F>(mut objective: F, x0: &[f64], region: CappedSimplex, options: SolverOptions) -> Result<SolverOutcome>
where
    F: FnMut(&[f64]) -> f64,
{
    const ARMIJO: f64 = 1e-4;
    const MAX_BACKTRACKS: usize = 50;
    const STEP_TOL: f64 = 1e-12;

    region.check_feasible(x0.len())?;

    let mut x = region.project(x0);
    let mut fx = objective(&x);
    if !fx.is_finite() {
        return Err(Error::Solver(format!("objective is not finite at the start point: {}", fx)));
    }

    let mut step = options.initial_step;
    for iteration in 1..=options.max_iterations {
        let grad = gradient(&mut objective, &x, options.fd_step);
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(Error::Solver(format!("non-finite gradient at iteration {}", iteration)));
        }

        let mut alpha = step;
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let candidate: Vec<f64> = region.project(
                &x.iter().zip(&grad).map(|(xi, gi)| xi - alpha * gi).collect::<Vec<_>>(),
            );
            let moved: f64 = x.iter().zip(&candidate).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max);
            if moved < STEP_TOL {
                break;
            }
            let f_candidate = objective(&candidate);
            let predicted: f64 = grad.iter().zip(x.iter().zip(&candidate)).map(|(g, (a, b))| g * (a - b)).sum();
            if f_candidate.is_finite() && f_candidate <= fx - ARMIJO * predicted {
                accepted = Some((candidate, f_candidate));
                break;
            }
            alpha *= 0.5;
        }

        let Some((candidate, f_candidate)) = accepted else {
            return Ok(SolverOutcome {
                x,
                fun: fx,
                iterations: iteration,
                converged: true,
                message: "Optimization terminated successfully: no descent direction".to_string(),
            });
        };

        let improvement = fx - f_candidate;
        x = candidate;
        fx = f_candidate;
        step = (alpha * 2.0).min(options.initial_step * 1e3);

        if improvement <= options.tolerance * (1.0 + fx.abs()) {
            return Ok(SolverOutcome {
                x,
                fun: fx,
                iterations: iteration,
                converged: true,
                message: "Optimization terminated successfully".to_string(),
            });
        }
    }

    Ok(SolverOutcome {
        x,
        fun: fx,
        iterations: options.max_iterations,
        converged: false,
        message: "Iteration limit reached".to_string(),
    })
}

fn gradient<F>(objective: &mut F, x: &[f64], h: f64) -> Vec<f64>
where
    F: FnMut(&[f64]) -> f64,
{
    let mut probe = x.to_vec();
    (0..x.len())
        .map(|i| {
            probe[i] = x[i] + h;
            let up = objective(&probe);
            probe[i] = x[i] - h;
            let down = objective(&probe);
            probe[i] = x[i];
            (up - down) / (2.0 * h)
        })
        .collect()
}
