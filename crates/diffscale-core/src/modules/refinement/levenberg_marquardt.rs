//! Damped Gauss-Newton minimisation of Σ w R².

use super::RefinementOutcome;
use crate::common::RefinementOptions;
use crate::domain::{ScalingError, ScalingResult};
use crate::modules::target::TargetEvaluation;
use crate::modules::traits::{LeastSquaresProblem, LeastSquaresSolver};
use faer::linalg::solvers::Solve;
use faer::{Mat, Side};
use tracing::debug;

/// Damping attempts per iteration before the iteration is abandoned.
const MAX_DAMPING_ATTEMPTS: usize = 12;
const MIN_DAMPING: f64 = 1.0e-12;
/// Lower bound on a damped diagonal entry, relative to the largest one.
const RELATIVE_DIAGONAL_FLOOR: f64 = 1.0e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevenbergMarquardt {
    options: RefinementOptions,
}

impl LevenbergMarquardt {
    pub fn new(options: RefinementOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RefinementOptions {
        &self.options
    }
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::new(RefinementOptions::default())
    }
}

enum StepResult {
    Accepted(Vec<f64>, TargetEvaluation),
    /// No damping produced a lower cost at a feasible point; the problem was
    /// left at a rejected trial.
    Rejected,
}

impl LevenbergMarquardt {
    fn damped_step(
        &self,
        normal: &Mat<f64>,
        gradient: &[f64],
        damping: f64,
    ) -> Option<Vec<f64>> {
        let n = gradient.len();
        let max_diagonal = (0..n).map(|i| normal[(i, i)]).fold(0.0_f64, f64::max);
        let floor = (max_diagonal * RELATIVE_DIAGONAL_FLOOR).max(f64::MIN_POSITIVE);

        let mut damped = normal.clone();
        for i in 0..n {
            damped[(i, i)] += damping * normal[(i, i)].max(floor);
        }
        let llt = damped.as_ref().llt(Side::Lower).ok()?;
        let rhs = Mat::<f64>::from_fn(n, 1, |row, _| -gradient[row]);
        let step = llt.solve(rhs.as_ref());
        let step: Vec<f64> = (0..n).map(|row| step[(row, 0)]).collect();
        step.iter().all(|value| value.is_finite()).then_some(step)
    }

    fn try_step(
        &self,
        problem: &mut dyn LeastSquaresProblem,
        x: &[f64],
        current: &TargetEvaluation,
        damping: &mut f64,
    ) -> ScalingResult<StepResult> {
        let (normal, gradient) = current
            .jacobian
            .weighted_normal_equations(&current.weights, &current.residuals);

        let mut factorised = false;
        for _ in 0..MAX_DAMPING_ATTEMPTS {
            let Some(step) = self.damped_step(&normal, &gradient, *damping) else {
                *damping *= 10.0;
                continue;
            };
            factorised = true;
            let trial: Vec<f64> = x.iter().zip(&step).map(|(x, dx)| x + dx).collect();
            let evaluation = problem.evaluate(&trial)?;
            if evaluation.cost.is_finite()
                && evaluation.cost < current.cost
                && problem.is_feasible()
            {
                *damping = (*damping / 10.0).max(MIN_DAMPING);
                return Ok(StepResult::Accepted(trial, evaluation));
            }
            *damping *= 10.0;
        }
        if !factorised {
            return Err(ScalingError::computation(
                "NUMERIC.SINGULAR_NORMAL_EQUATIONS",
                "normal equations could not be factorised at any damping",
            ));
        }
        Ok(StepResult::Rejected)
    }
}

impl LeastSquaresSolver for LevenbergMarquardt {
    fn minimise(&self, problem: &mut dyn LeastSquaresProblem) -> ScalingResult<RefinementOutcome> {
        let mut x = problem.parameters();
        if x.is_empty() {
            return Err(ScalingError::configuration(
                "REFINEMENT.NO_PARAMETERS",
                "no parameters are active for refinement",
            ));
        }
        let mut current = problem.evaluate(&x)?;
        let initial_rmsd = current.rmsd();
        let mut damping = self.options.initial_damping;
        let mut iterations = 0;
        let mut converged = current.degenerate;
        let mut at_rejected_trial = false;

        while !converged && iterations < self.options.max_iterations {
            iterations += 1;
            let gradient_norm = current
                .gradients
                .iter()
                .fold(0.0_f64, |max, value| max.max(value.abs()));
            if gradient_norm < self.options.gradient_tolerance {
                converged = true;
                break;
            }

            match self.try_step(problem, &x, &current, &mut damping)? {
                StepResult::Accepted(trial, evaluation) => {
                    let reduction = (current.cost - evaluation.cost) / current.cost;
                    debug!(
                        iteration = iterations,
                        cost = evaluation.cost,
                        rmsd = evaluation.rmsd(),
                        damping,
                        "accepted step"
                    );
                    x = trial;
                    current = evaluation;
                    at_rejected_trial = false;
                    converged = current.degenerate || reduction < self.options.cost_tolerance;
                }
                StepResult::Rejected => {
                    debug!(iteration = iterations, cost = current.cost, "no improving step");
                    at_rejected_trial = true;
                    converged = true;
                }
            }
        }

        if at_rejected_trial {
            current = problem.evaluate(&x)?;
        }
        Ok(RefinementOutcome {
            iterations,
            converged,
            initial_rmsd,
            final_rmsd: current.rmsd(),
            cost: current.cost,
            parameters: x,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::LevenbergMarquardt;
    use crate::common::RefinementOptions;
    use crate::domain::ScalingResult;
    use crate::modules::target::{TargetEvaluation, is_degenerate, weighted_cost};
    use crate::modules::traits::{LeastSquaresProblem, LeastSquaresSolver};
    use crate::numerics::DerivativeMatrix;
    use faer::sparse::Triplet;

    /// Exponential decay y = a·exp(−b·t) observed without noise.
    struct DecayFit {
        t: Vec<f64>,
        y: Vec<f64>,
        x: Vec<f64>,
    }

    impl LeastSquaresProblem for DecayFit {
        fn parameters(&self) -> Vec<f64> {
            self.x.clone()
        }

        fn evaluate(&mut self, x: &[f64]) -> ScalingResult<TargetEvaluation> {
            self.x = x.to_vec();
            let (a, b) = (x[0], x[1]);
            let mut residuals = Vec::new();
            let mut triplets = Vec::new();
            for (row, (t, y)) in self.t.iter().zip(&self.y).enumerate() {
                let model = a * (-b * t).exp();
                residuals.push(y - model);
                triplets.push(Triplet::new(row, 0, -(-b * t).exp()));
                triplets.push(Triplet::new(row, 1, a * t * (-b * t).exp()));
            }
            let jacobian = DerivativeMatrix::from_triplets(self.t.len(), 2, &triplets)?;
            let weights = vec![1.0; self.t.len()];
            let (_, half_gradient) = jacobian.weighted_normal_equations(&weights, &residuals);
            let cost = weighted_cost(&residuals, &weights);
            Ok(TargetEvaluation {
                degenerate: is_degenerate(&residuals),
                gradients: half_gradient.iter().map(|g| 2.0 * g).collect(),
                residuals,
                weights,
                jacobian,
                cost,
            })
        }
    }

    #[test]
    fn recovers_exponential_decay_parameters() {
        let t: Vec<f64> = (0..12).map(|i| i as f64 * 0.5).collect();
        let y = t.iter().map(|t| 3.0 * (-0.4 * t).exp()).collect();
        let mut problem = DecayFit {
            t,
            y,
            x: vec![1.0, 0.1],
        };
        let solver = LevenbergMarquardt::new(RefinementOptions {
            max_iterations: 100,
            cost_tolerance: 1.0e-14,
            ..RefinementOptions::default()
        });
        let outcome = solver.minimise(&mut problem).expect("converged");

        assert!((outcome.parameters[0] - 3.0).abs() < 1.0e-5);
        assert!((outcome.parameters[1] - 0.4).abs() < 1.0e-5);
        assert!(outcome.final_rmsd < outcome.initial_rmsd);
        assert_eq!(problem.x, outcome.parameters);
    }

    /// y = a·t fitted to data with a negative slope, restricted to a > 0.
    struct PositiveSlopeFit {
        t: Vec<f64>,
        y: Vec<f64>,
        x: Vec<f64>,
    }

    impl LeastSquaresProblem for PositiveSlopeFit {
        fn parameters(&self) -> Vec<f64> {
            self.x.clone()
        }

        fn evaluate(&mut self, x: &[f64]) -> ScalingResult<TargetEvaluation> {
            self.x = x.to_vec();
            let residuals: Vec<f64> = self.t.iter().zip(&self.y).map(|(t, y)| y - x[0] * t).collect();
            let triplets: Vec<_> = self
                .t
                .iter()
                .enumerate()
                .map(|(row, t)| Triplet::new(row, 0, -t))
                .collect();
            let jacobian = DerivativeMatrix::from_triplets(self.t.len(), 1, &triplets)?;
            let weights = vec![1.0; self.t.len()];
            let (_, half_gradient) = jacobian.weighted_normal_equations(&weights, &residuals);
            let cost = weighted_cost(&residuals, &weights);
            Ok(TargetEvaluation {
                degenerate: is_degenerate(&residuals),
                gradients: half_gradient.iter().map(|g| 2.0 * g).collect(),
                residuals,
                weights,
                jacobian,
                cost,
            })
        }

        fn is_feasible(&self) -> bool {
            self.x[0] > 0.0
        }
    }

    #[test]
    fn infeasible_trials_are_never_accepted() {
        let t: Vec<f64> = (1..8).map(f64::from).collect();
        let y = t.iter().map(|t| -2.0 * t).collect();
        let mut problem = PositiveSlopeFit {
            t,
            y,
            x: vec![1.0],
        };
        let solver = LevenbergMarquardt::new(RefinementOptions {
            max_iterations: 20,
            ..RefinementOptions::default()
        });
        let outcome = solver.minimise(&mut problem).expect("minimised");

        assert!(outcome.parameters[0] > 0.0, "{:?}", outcome.parameters);
        assert!(outcome.parameters[0] < 1.0);
        assert!(outcome.final_rmsd < outcome.initial_rmsd);
        assert_eq!(problem.x, outcome.parameters);
    }

    #[test]
    fn iteration_limit_is_enforced() {
        let t: Vec<f64> = (0..12).map(|i| i as f64 * 0.5).collect();
        let y = t.iter().map(|t| 3.0 * (-0.4 * t).exp()).collect();
        let mut problem = DecayFit {
            t,
            y,
            x: vec![1.0, 0.1],
        };
        let solver = LevenbergMarquardt::new(RefinementOptions {
            max_iterations: 1,
            ..RefinementOptions::default()
        });
        let outcome = solver.minimise(&mut problem).expect("one iteration");
        assert_eq!(outcome.iterations, 1);
    }
}
