// Forward and inverse kinematics for the xArm 4-link chain
//
// Joint order is (top, middle, bottom, base). Angles are radians here;
// callers get degrees from `InverseSolution::degrees`.
//
// The inverse solve is a bounded Levenberg-Marquardt over the residual
//   [w_x*(x_fk - x), w_y*(y_fk - y), w_z*(z_fk - z), |theta_fk| - PI]
// The last term keeps the gripper pointing straight down. It is a soft
// constraint: the solver returns its best minimum, never an error.

use nalgebra::{Matrix4, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, warn};

use super::joint::Joint;
use crate::error::{ArmError, Result};

/// Link lengths and base height, all in the same length unit (cm)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmGeometry {
    /// Height of the bottom-link pivot above the work surface
    pub base_height: f64,
    /// L1
    pub shoulder_to_elbow: f64,
    /// L2
    pub elbow_to_wrist: f64,
    /// L3
    pub wrist_to_gripper: f64,
    /// Sideways offset of the gripper axis from the wrist link (0 if colinear)
    #[serde(default)]
    pub wrist_offset: f64,
}

impl ArmGeometry {
    pub fn validate(&self) -> Result<()> {
        let links = [
            ("shoulder_to_elbow", self.shoulder_to_elbow),
            ("elbow_to_wrist", self.elbow_to_wrist),
            ("wrist_to_gripper", self.wrist_to_gripper),
        ];
        for (name, length) in links {
            if !length.is_finite() || length <= 0.0 {
                return Err(ArmError::config(format!(
                    "link length {} must be positive, got {}",
                    name, length
                )));
            }
        }
        if !self.base_height.is_finite() || !self.wrist_offset.is_finite() {
            return Err(ArmError::config("base_height and wrist_offset must be finite"));
        }
        Ok(())
    }

    /// Upper bound on horizontal/vertical distance from the bottom pivot
    pub fn max_reach(&self) -> f64 {
        self.shoulder_to_elbow
            + self.elbow_to_wrist
            + self.wrist_to_gripper.hypot(self.wrist_offset)
    }
}

/// Safe angular travel of one kinematic joint, radians
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointBounds {
    pub min: f64,
    pub max: f64,
}

impl JointBounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64, tolerance: f64) -> bool {
        value >= self.min - tolerance && value <= self.max + tolerance
    }
}

/// Bounds for the four chain joints
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChainBounds {
    pub top: JointBounds,
    pub middle: JointBounds,
    pub bottom: JointBounds,
    pub base: JointBounds,
}

impl ChainBounds {
    pub fn as_array(&self) -> [JointBounds; 4] {
        [self.top, self.middle, self.bottom, self.base]
    }

    pub fn for_joint(&self, joint: Joint) -> Option<JointBounds> {
        match joint {
            Joint::LinkTop => Some(self.top),
            Joint::LinkMiddle => Some(self.middle),
            Joint::LinkBottom => Some(self.bottom),
            Joint::BaseRotate => Some(self.base),
            Joint::GripperClose | Joint::GripperRotate => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (joint, b) in Joint::CHAIN.iter().zip(self.as_array()) {
            if !(b.min.is_finite() && b.max.is_finite()) || b.min > b.max {
                return Err(ArmError::config(format!(
                    "{} bounds [{}, {}] are not a valid interval",
                    joint, b.min, b.max
                )));
            }
        }
        Ok(())
    }

    fn midpoint(&self) -> Vector4<f64> {
        Vector4::new(
            self.top.midpoint(),
            self.middle.midpoint(),
            self.bottom.midpoint(),
            self.base.midpoint(),
        )
    }

    fn project(&self, q: &Vector4<f64>) -> Vector4<f64> {
        let b = self.as_array();
        Vector4::from_fn(|i, _| b[i].clamp(q[i]))
    }
}

/// Angles of the four chain joints
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChainAngles {
    pub top: f64,
    pub middle: f64,
    pub bottom: f64,
    pub base: f64,
}

impl ChainAngles {
    pub const fn new(top: f64, middle: f64, bottom: f64, base: f64) -> Self {
        Self {
            top,
            middle,
            bottom,
            base,
        }
    }

    pub fn from_degrees(top: f64, middle: f64, bottom: f64, base: f64) -> Self {
        Self::new(
            top.to_radians(),
            middle.to_radians(),
            bottom.to_radians(),
            base.to_radians(),
        )
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.top, self.middle, self.bottom, self.base]
    }

    fn from_vector(q: &Vector4<f64>) -> Self {
        Self::new(q[0], q[1], q[2], q[3])
    }
}

/// End-effector position plus pitch relative to vertical
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub theta: f64,
}

impl Pose {
    pub fn distance_to(&self, x: f64, y: f64, z: f64) -> f64 {
        (Vector3::new(self.x, self.y, self.z) - Vector3::new(x, y, z)).norm()
    }
}

/// Tuning for the inverse solve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Weights on the x, y, z residuals. Balances centimetres of position
    /// error against radians of orientation error.
    pub position_weights: [f64; 3],
    pub max_iterations: usize,
    /// Stop when a step lowers the cost by less than this fraction
    pub function_tolerance: f64,
    /// Stop when the projected gradient is below this
    pub gradient_tolerance: f64,
    /// Positional error under which a solution counts as converged
    pub position_tolerance: f64,
    /// Slack allowed when callers check solved angles against bounds
    pub bounds_tolerance_deg: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            position_weights: [10.0, 10.0, 10.0],
            max_iterations: 200,
            function_tolerance: 1e-12,
            gradient_tolerance: 1e-10,
            position_tolerance: 0.1,
            bounds_tolerance_deg: 1.0,
        }
    }
}

/// Best-effort result of an inverse solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InverseSolution {
    /// Solved angles, radians
    pub angles: ChainAngles,
    /// Pose the solved angles actually reach
    pub achieved: Pose,
    /// Euclidean distance between target and achieved position
    pub position_error: f64,
    /// | |theta| - PI |, radians
    pub orientation_error: f64,
    pub cost: f64,
    pub iterations: usize,
    /// Position error is within the configured tolerance
    pub converged: bool,
}

impl InverseSolution {
    /// Solved angles in degrees, (top, middle, bottom, base)
    pub fn degrees(&self) -> [f64; 4] {
        self.angles.as_array().map(f64::to_degrees)
    }

    pub fn joint_degrees(&self) -> [(Joint, f64); 4] {
        let d = self.degrees();
        [
            (Joint::CHAIN[0], d[0]),
            (Joint::CHAIN[1], d[1]),
            (Joint::CHAIN[2], d[2]),
            (Joint::CHAIN[3], d[3]),
        ]
    }
}

/// Outcome of one damped descent from a single seed
struct Descent {
    q: Vector4<f64>,
    cost: f64,
    iterations: usize,
}

const LAMBDA_INITIAL: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e12;

/// Where restart seeds sit inside each pitch joint's travel
const RESTART_FRACTIONS: [f64; 3] = [1.0 / 6.0, 0.5, 5.0 / 6.0];

#[derive(Debug, Clone)]
pub struct KinematicsSolver {
    geometry: ArmGeometry,
    bounds: ChainBounds,
    config: SolverConfig,
}

impl KinematicsSolver {
    pub fn new(geometry: ArmGeometry, bounds: ChainBounds, config: SolverConfig) -> Result<Self> {
        geometry.validate()?;
        bounds.validate()?;
        Ok(Self {
            geometry,
            bounds,
            config,
        })
    }

    pub fn geometry(&self) -> &ArmGeometry {
        &self.geometry
    }

    pub fn bounds(&self) -> &ChainBounds {
        &self.bounds
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Forward kinematics
    pub fn forward(&self, angles: &ChainAngles) -> Pose {
        let g = &self.geometry;
        let a = angles.bottom;
        let b = angles.middle + angles.bottom;
        let c = angles.top + angles.middle + angles.bottom;

        let reach = a.sin() * g.shoulder_to_elbow + b.sin() * g.elbow_to_wrist
            + c.sin() * g.wrist_to_gripper
            - c.cos() * g.wrist_offset;
        let height = g.base_height
            + a.cos() * g.shoulder_to_elbow
            + b.cos() * g.elbow_to_wrist
            + c.cos() * g.wrist_to_gripper
            + c.sin() * g.wrist_offset;

        Pose {
            x: angles.base.cos() * reach,
            y: angles.base.sin() * reach,
            z: height,
            theta: c,
        }
    }

    /// Inverse kinematics for a Cartesian target
    ///
    /// Always returns a solution inside the bounds. Unreachable targets give
    /// the closest feasible approximation; check `position_error` or
    /// `converged` before trusting it.
    pub fn solve(&self, x: f64, y: f64, z: f64) -> InverseSolution {
        let target = Vector3::new(x, y, z);

        let mut best = self.descend(self.bounds.midpoint(), &target);
        if self.position_error(&best.q, &target) > self.config.position_tolerance {
            debug!(
                "Midpoint seed missed ({:.3}, {:.3}, {:.3}), restarting from a seed grid",
                x, y, z
            );
            for seed in self.restart_seeds(&target) {
                let candidate = self.descend(seed, &target);
                if candidate.cost < best.cost {
                    best = candidate;
                }
            }
        }

        let angles = ChainAngles::from_vector(&best.q);
        let achieved = self.forward(&angles);
        let position_error = achieved.distance_to(x, y, z);
        let converged = position_error <= self.config.position_tolerance;
        if !converged {
            warn!(
                "Target ({:.2}, {:.2}, {:.2}) not reached, closest is {:.3} away",
                x, y, z, position_error
            );
        }

        InverseSolution {
            angles,
            achieved,
            position_error,
            orientation_error: (achieved.theta.abs() - PI).abs(),
            cost: best.cost,
            iterations: best.iterations,
            converged,
        }
    }

    /// Restart seeds: a coarse grid over the three pitch joints, with the
    /// base aimed at the target both reaching forward and reaching back
    fn restart_seeds(&self, target: &Vector3<f64>) -> Vec<Vector4<f64>> {
        let forward = target.y.atan2(target.x);
        let backward = (-target.y).atan2(-target.x);
        let [top, middle, bottom, base_bounds] = self.bounds.as_array();
        let at = |b: JointBounds, fraction: f64| b.min + (b.max - b.min) * fraction;

        let mut seeds = Vec::with_capacity(2 * RESTART_FRACTIONS.len().pow(3));
        for base in [forward, backward] {
            for t in RESTART_FRACTIONS {
                for m in RESTART_FRACTIONS {
                    for b in RESTART_FRACTIONS {
                        seeds.push(Vector4::new(
                            at(top, t),
                            at(middle, m),
                            at(bottom, b),
                            base_bounds.clamp(base),
                        ));
                    }
                }
            }
        }
        seeds
    }

    fn position_error(&self, q: &Vector4<f64>, target: &Vector3<f64>) -> f64 {
        self.forward(&ChainAngles::from_vector(q))
            .distance_to(target.x, target.y, target.z)
    }

    fn residuals(&self, q: &Vector4<f64>, target: &Vector3<f64>) -> Vector4<f64> {
        let pose = self.forward(&ChainAngles::from_vector(q));
        let [wx, wy, wz] = self.config.position_weights;
        Vector4::new(
            wx * (pose.x - target.x),
            wy * (pose.y - target.y),
            wz * (pose.z - target.z),
            pose.theta.abs() - PI,
        )
    }

    /// Analytic Jacobian of `residuals`
    fn jacobian(&self, q: &Vector4<f64>) -> Matrix4<f64> {
        let g = &self.geometry;
        let [wx, wy, wz] = self.config.position_weights;
        let (base, a) = (q[3], q[2]);
        let b = q[1] + q[2];
        let c = q[0] + q[1] + q[2];

        let reach = a.sin() * g.shoulder_to_elbow + b.sin() * g.elbow_to_wrist
            + c.sin() * g.wrist_to_gripper
            - c.cos() * g.wrist_offset;

        // d(reach)/d(top, middle, bottom)
        let rc = c.cos() * g.wrist_to_gripper + c.sin() * g.wrist_offset;
        let rb = b.cos() * g.elbow_to_wrist + rc;
        let ra = a.cos() * g.shoulder_to_elbow + rb;
        // d(height)/d(top, middle, bottom)
        let zc = -c.sin() * g.wrist_to_gripper + c.cos() * g.wrist_offset;
        let zb = -b.sin() * g.elbow_to_wrist + zc;
        let za = -a.sin() * g.shoulder_to_elbow + zb;

        let sign = if c >= 0.0 { 1.0 } else { -1.0 };
        let (cos_b, sin_b) = (base.cos(), base.sin());

        #[rustfmt::skip]
        let jac = Matrix4::new(
            wx * cos_b * rc, wx * cos_b * rb, wx * cos_b * ra, -wx * sin_b * reach,
            wy * sin_b * rc, wy * sin_b * rb, wy * sin_b * ra,  wy * cos_b * reach,
            wz * zc,         wz * zb,         wz * za,          0.0,
            sign,            sign,            sign,             0.0,
        );
        jac
    }

    /// Projected Levenberg-Marquardt from one seed
    ///
    /// Variables sitting on a bound whose gradient pushes them outward are
    /// frozen for that step; every trial point is projected into the box.
    fn descend(&self, seed: Vector4<f64>, target: &Vector3<f64>) -> Descent {
        let bounds = self.bounds.as_array();
        let mut q = self.bounds.project(&seed);
        let mut r = self.residuals(&q, target);
        let mut cost = 0.5 * r.norm_squared();
        let mut lambda = LAMBDA_INITIAL;
        let mut iterations = 0;

        while iterations < self.config.max_iterations {
            let jac = self.jacobian(&q);
            let gradient = jac.transpose() * r;

            let free: [bool; 4] = std::array::from_fn(|i| {
                let pinned_low = q[i] <= bounds[i].min && gradient[i] > 0.0;
                let pinned_high = q[i] >= bounds[i].max && gradient[i] < 0.0;
                !(pinned_low || pinned_high)
            });
            let projected_gradient = (0..4)
                .filter(|&i| free[i])
                .map(|i| gradient[i].abs())
                .fold(0.0, f64::max);
            if projected_gradient < self.config.gradient_tolerance {
                break;
            }

            let jtj = jac.transpose() * jac;
            let mut accepted = None;
            while lambda < LAMBDA_MAX {
                let mut lhs = Matrix4::<f64>::zeros();
                let mut rhs = Vector4::<f64>::zeros();
                for i in 0..4 {
                    if !free[i] {
                        lhs[(i, i)] = 1.0;
                        continue;
                    }
                    for j in 0..4 {
                        if free[j] {
                            lhs[(i, j)] = jtj[(i, j)];
                        }
                    }
                    lhs[(i, i)] += lambda * jtj[(i, i)].max(1e-9);
                    rhs[i] = -gradient[i];
                }

                let Some(step) = lhs.lu().solve(&rhs) else {
                    lambda *= 4.0;
                    continue;
                };
                let trial = self.bounds.project(&(q + step));
                let trial_r = self.residuals(&trial, target);
                let trial_cost = 0.5 * trial_r.norm_squared();
                if trial_cost < cost {
                    accepted = Some((trial, trial_r, trial_cost));
                    lambda = (lambda / 3.0).max(LAMBDA_MIN);
                    break;
                }
                lambda *= 4.0;
            }

            let Some((next_q, next_r, next_cost)) = accepted else {
                break;
            };
            iterations += 1;
            let decrease = cost - next_cost;
            let previous = cost;
            q = next_q;
            r = next_r;
            cost = next_cost;
            if decrease <= self.config.function_tolerance * previous {
                break;
            }
        }

        Descent {
            q,
            cost,
            iterations,
        }
    }

    /// Check solved angles against bounds plus the configured slack
    pub fn check_bounds(&self, angles: &ChainAngles) -> Result<()> {
        let tolerance = self.config.bounds_tolerance_deg.to_radians();
        for ((joint, bounds), value) in Joint::CHAIN
            .iter()
            .zip(self.bounds.as_array())
            .zip(angles.as_array())
        {
            if !bounds.contains(value, tolerance) {
                return Err(ArmError::OutOfBounds {
                    joint: *joint,
                    value: value.to_degrees(),
                    min: bounds.min.to_degrees(),
                    max: bounds.max.to_degrees(),
                    unit: "deg",
                });
            }
        }
        Ok(())
    }
}
