//! Local minimizer for smooth problems with box bounds and equality constraints.
//!
//! The outer loop is an augmented-Lagrangian method: equality constraints are
//! folded into the objective with multiplier estimates and a quadratic penalty,
//! and the multipliers are refreshed after every subproblem. Each subproblem is
//! handed to `argmin`'s L-BFGS with a More-Thuente line search. L-BFGS is
//! unconstrained, so bounded coordinates are substituted (`x = lo + y^2`,
//! `x = hi - y^2`, or `x = lo + (hi - lo) sin^2 y`) and the bounds hold exactly
//! at every evaluated point.
//!
//! Convergence is local: the result is a stationary point near the starting
//! point, not necessarily the global minimum.

use argmin::core::{CostFunction, Error as ArgminError, Executor, Gradient, State, TerminationReason};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use finitediff::FiniteDiff;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use std::time::{Duration, Instant};

/// History length for L-BFGS.
pub const LBFGS_MEMORY: usize = 7;

/// Subproblem variables in the substituted coordinates.
type Point = Vec<f64>;
type SubproblemSolver = LBFGS<MoreThuenteLineSearch<Point, Point, f64>, Point, Point, f64>;
const MAX_MULTIPLIER: f64 = 1.0e15;
/// Feasibility must shrink by at least this factor per outer iteration, or the
/// penalty grows.
const SUFFICIENT_DECREASE: f64 = 0.5;
/// Smallest substituted coordinate a subproblem starts from. At `y = 0` the
/// substitution has a zero derivative and L-BFGS could never leave the bound.
const MIN_LIFT: f64 = 1.0e-4;

/// A smooth minimization problem over `dimension()` variables.
pub trait NonlinearProgram {
    fn dimension(&self) -> usize;

    fn objective(&self, x: &[f64]) -> f64;

    fn objective_gradient(&self, x: &[f64]) -> Vec<f64> {
        finite_difference_gradient(|p| self.objective(p), x)
    }

    /// Residuals of the equality constraints; feasible points return zeros.
    fn equality_constraints(&self, x: &[f64]) -> Vec<f64>;

    /// One gradient row per equality constraint.
    fn constraint_jacobian(&self, x: &[f64]) -> Vec<Vec<f64>> {
        let count = self.equality_constraints(x).len();
        (0..count)
            .map(|j| finite_difference_gradient(|p| self.equality_constraints(p)[j], x))
            .collect()
    }

    fn lower_bounds(&self) -> Vec<f64> {
        vec![f64::NEG_INFINITY; self.dimension()]
    }

    fn upper_bounds(&self) -> Vec<f64> {
        vec![f64::INFINITY; self.dimension()]
    }
}

/// Central-difference gradient of `f` at `x`.
pub fn finite_difference_gradient(f: impl Fn(&[f64]) -> f64, x: &[f64]) -> Vec<f64> {
    x.to_vec().central_diff(&|p: &Vec<f64>| f(p))
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverSettings {
    pub max_outer_iterations: usize,
    /// L-BFGS iteration limit per subproblem.
    pub max_inner_iterations: usize,
    /// Largest accepted absolute constraint residual.
    pub constraint_tolerance: f64,
    /// Gradient tolerance handed to L-BFGS and the largest accepted
    /// projected-gradient component.
    pub optimality_tolerance: f64,
    pub initial_penalty: f64,
    pub penalty_growth: f64,
    pub max_penalty: f64,
    /// Checked between outer iterations.
    pub time_limit: Option<Duration>,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_outer_iterations: 50,
            max_inner_iterations: 1000,
            constraint_tolerance: 1.0e-6,
            optimality_tolerance: 1.0e-8,
            initial_penalty: 10.0,
            penalty_growth: 10.0,
            max_penalty: 1.0e12,
            time_limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    /// Feasible and stationary within tolerance.
    Converged,
    /// Ran out of outer iterations.
    IterationLimit,
    /// Ran out of wall-clock time.
    TimeLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutcome {
    pub x: Vec<f64>,
    pub objective: f64,
    /// Largest absolute constraint residual at `x`.
    pub constraint_violation: f64,
    pub multipliers: Vec<f64>,
    pub outer_iterations: usize,
    pub inner_iterations: usize,
    pub status: SolverStatus,
}

/// Snapshot handed to the observer after each outer iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OuterIterate {
    pub iteration: usize,
    pub objective: f64,
    pub constraint_violation: f64,
    pub stationarity: f64,
    pub penalty: f64,
    pub inner_iterations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Substitution {
    Free,
    Lower(f64),
    Upper(f64),
    Interval(f64, f64),
}

impl Substitution {
    fn new(lower: f64, upper: f64) -> Self {
        match (lower.is_finite(), upper.is_finite()) {
            (false, false) => Self::Free,
            (true, false) => Self::Lower(lower),
            (false, true) => Self::Upper(upper),
            (true, true) => Self::Interval(lower, upper),
        }
    }

    fn to_x(self, y: f64) -> f64 {
        match self {
            Self::Free => y,
            Self::Lower(lo) => lo + y * y,
            Self::Upper(hi) => hi - y * y,
            Self::Interval(lo, hi) => lo + (hi - lo) * y.sin().powi(2),
        }
    }

    /// Inverse of [`Substitution::to_x`], kept off the zero-derivative points.
    fn to_y(self, x: f64) -> f64 {
        match self {
            Self::Free => x,
            Self::Lower(lo) => (x - lo).max(0.0).sqrt().max(MIN_LIFT),
            Self::Upper(hi) => (hi - x).max(0.0).sqrt().max(MIN_LIFT),
            Self::Interval(lo, hi) if hi > lo => ((x - lo) / (hi - lo))
                .clamp(0.0, 1.0)
                .sqrt()
                .asin()
                .clamp(MIN_LIFT, FRAC_PI_2 - MIN_LIFT),
            Self::Interval(..) => 0.0,
        }
    }

    fn dx_dy(self, y: f64) -> f64 {
        match self {
            Self::Free => 1.0,
            Self::Lower(_) => 2.0 * y,
            Self::Upper(_) => -2.0 * y,
            Self::Interval(lo, hi) => (hi - lo) * (2.0 * y).sin(),
        }
    }
}

struct BoxSubstitution {
    coordinates: Vec<Substitution>,
}

impl BoxSubstitution {
    fn new(lower: &[f64], upper: &[f64]) -> Self {
        Self {
            coordinates: lower.iter().zip(upper).map(|(lo, hi)| Substitution::new(*lo, *hi)).collect(),
        }
    }

    fn to_x(&self, y: &[f64]) -> Vec<f64> {
        self.coordinates.iter().zip(y).map(|(s, v)| s.to_x(*v)).collect()
    }

    fn to_y(&self, x: &[f64]) -> Vec<f64> {
        self.coordinates.iter().zip(x).map(|(s, v)| s.to_y(*v)).collect()
    }

    /// Chain rule from a gradient in `x` to one in `y`.
    fn pull_back(&self, y: &[f64], gradient_x: &[f64]) -> Vec<f64> {
        self.coordinates
            .iter()
            .zip(y)
            .zip(gradient_x)
            .map(|((s, v), g)| g * s.dx_dy(*v))
            .collect()
    }
}

struct AugmentedLagrangian<'a, P: NonlinearProgram + ?Sized> {
    program: &'a P,
    substitution: &'a BoxSubstitution,
    multipliers: &'a [f64],
    penalty: f64,
}

impl<P: NonlinearProgram + ?Sized> AugmentedLagrangian<'_, P> {
    fn value(&self, x: &[f64]) -> f64 {
        let constraints = self.program.equality_constraints(x);
        let coupling: f64 = constraints
            .iter()
            .zip(self.multipliers)
            .map(|(c, lambda)| lambda * c + 0.5 * self.penalty * c * c)
            .sum();
        self.program.objective(x) + coupling
    }

    fn gradient_x(&self, x: &[f64]) -> Vec<f64> {
        let mut gradient = self.program.objective_gradient(x);
        let constraints = self.program.equality_constraints(x);
        let jacobian = self.program.constraint_jacobian(x);
        for ((c, lambda), row) in constraints.iter().zip(self.multipliers).zip(&jacobian) {
            let weight = lambda + self.penalty * c;
            for (g, dc) in gradient.iter_mut().zip(row) {
                *g += weight * dc;
            }
        }
        gradient
    }
}

impl<P: NonlinearProgram + ?Sized> CostFunction for AugmentedLagrangian<'_, P> {
    type Param = Point;
    type Output = f64;

    fn cost(&self, y: &Self::Param) -> Result<Self::Output, ArgminError> {
        Ok(self.value(&self.substitution.to_x(y)))
    }
}

impl<P: NonlinearProgram + ?Sized> Gradient for AugmentedLagrangian<'_, P> {
    type Param = Point;
    type Gradient = Point;

    fn gradient(&self, y: &Self::Param) -> Result<Self::Gradient, ArgminError> {
        let x = self.substitution.to_x(y);
        Ok(self.substitution.pull_back(y, &self.gradient_x(&x)))
    }
}

struct InnerResult {
    x: Vec<f64>,
    stationarity: f64,
    iterations: usize,
    converged: bool,
}

fn project(x: &[f64], lower: &[f64], upper: &[f64]) -> Vec<f64> {
    x.iter()
        .zip(lower.iter().zip(upper))
        .map(|(v, (lo, hi))| v.max(*lo).min(*hi))
        .collect()
}

fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}

/// Largest component of `P(x - g) - x`; zero exactly at stationary points of
/// the bound-constrained problem.
fn projected_gradient_norm(x: &[f64], gradient: &[f64], lower: &[f64], upper: &[f64]) -> f64 {
    x.iter()
        .zip(gradient)
        .zip(lower.iter().zip(upper))
        .map(|((v, g), (lo, hi))| ((v - g).max(*lo).min(*hi) - v).abs())
        .fold(0.0, f64::max)
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Runs L-BFGS on one augmented-Lagrangian subproblem.
///
/// A failed run (typically a line search that cannot make progress at the
/// precision limit) leaves `start` in place; the outer loop then tightens the
/// penalty or refreshes the multipliers and tries again.
fn solve_subproblem<P: NonlinearProgram + ?Sized>(
    subproblem: AugmentedLagrangian<'_, P>,
    start: &[f64],
    lower: &[f64],
    upper: &[f64],
    settings: &SolverSettings,
) -> InnerResult {
    let y0 = subproblem.substitution.to_y(start);
    let run = SubproblemSolver::new(MoreThuenteLineSearch::new(), LBFGS_MEMORY)
        .with_tolerance_grad(settings.optimality_tolerance)
        .and_then(|solver| {
            Executor::new(AugmentedLagrangian { ..subproblem }, solver)
                .configure(|state| state.param(y0).max_iters(settings.max_inner_iterations as u64))
                .run()
        });

    let (x, iterations, converged) = match run {
        Ok(result) => {
            let state = result.state();
            let x = match state.get_best_param() {
                Some(y) => subproblem.substitution.to_x(y),
                None => start.to_vec(),
            };
            let converged = state.get_termination_reason() == Some(&TerminationReason::SolverConverged);
            (x, state.get_iter() as usize, converged)
        }
        Err(_) => (start.to_vec(), 0, false),
    };

    let stationarity = projected_gradient_norm(&x, &subproblem.gradient_x(&x), lower, upper);
    InnerResult {
        x,
        stationarity,
        iterations,
        converged,
    }
}

/// Minimizes `program` starting from `x0`.
///
/// `observer` is called once per outer iteration. The returned point always
/// satisfies the bounds; whether it satisfies the equality constraints is
/// reported in [`SolverOutcome::constraint_violation`] and left to the caller
/// to judge.
pub fn minimize<P: NonlinearProgram + ?Sized>(
    program: &P,
    x0: &[f64],
    settings: &SolverSettings,
    mut observer: impl FnMut(&OuterIterate),
) -> SolverOutcome {
    let deadline = settings.time_limit.map(|limit| Instant::now() + limit);
    let lower = program.lower_bounds();
    let upper = program.upper_bounds();
    let substitution = BoxSubstitution::new(&lower, &upper);

    let mut x = project(x0, &lower, &upper);
    let mut constraints = program.equality_constraints(&x);
    let mut violation = max_abs(&constraints);
    let mut multipliers = vec![0.0; constraints.len()];
    let mut penalty = settings.initial_penalty;
    let mut outer_iterations = 0;
    let mut inner_iterations = 0;
    let mut status = SolverStatus::IterationLimit;

    while outer_iterations < settings.max_outer_iterations {
        if deadline_passed(deadline) {
            status = SolverStatus::TimeLimit;
            break;
        }
        outer_iterations += 1;

        let subproblem = AugmentedLagrangian {
            program,
            substitution: &substitution,
            multipliers: &multipliers,
            penalty,
        };
        let inner = solve_subproblem(subproblem, &x, &lower, &upper, settings);
        x = inner.x;
        inner_iterations += inner.iterations;

        constraints = program.equality_constraints(&x);
        let previous_violation = violation;
        violation = max_abs(&constraints);

        observer(&OuterIterate {
            iteration: outer_iterations,
            objective: program.objective(&x),
            constraint_violation: violation,
            stationarity: inner.stationarity,
            penalty,
            inner_iterations: inner.iterations,
        });

        if violation <= settings.constraint_tolerance
            && (inner.converged || inner.stationarity <= settings.optimality_tolerance)
        {
            status = SolverStatus::Converged;
            break;
        }

        for (lambda, c) in multipliers.iter_mut().zip(&constraints) {
            *lambda = (*lambda + penalty * c).clamp(-MAX_MULTIPLIER, MAX_MULTIPLIER);
        }
        if violation > settings.constraint_tolerance
            && violation > SUFFICIENT_DECREASE * previous_violation
        {
            penalty = (penalty * settings.penalty_growth).min(settings.max_penalty);
        }
    }

    if status == SolverStatus::IterationLimit && deadline_passed(deadline) {
        status = SolverStatus::TimeLimit;
    }

    SolverOutcome {
        objective: program.objective(&x),
        x,
        constraint_violation: violation,
        multipliers,
        outer_iterations,
        inner_iterations,
        status,
    }
}
