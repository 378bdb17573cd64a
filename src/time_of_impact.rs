//! Time of impact via conservative advancement.
//!
//! The separating axis from the last GJK query defines a separation
//! function over the sweep interval. A secant/bisection root finder brings
//! the separation down to a target slightly inside the skin radius, and the
//! axis is refreshed until the bodies touch, separate for good or the
//! iteration caps are hit.

use glam::Vec2;
use tracing::debug;

use crate::distance::{DistanceInput, DistanceProxy, SimplexCache, distance};
use crate::math::{Sweep, Transform, cross_vs};
use crate::types::{MAX_POLYGON_VERTICES, Settings};

const MAX_ITERATIONS: u32 = 20;
const MAX_ROOT_ITERATIONS: u32 = 50;

#[derive(Copy, Clone, Debug)]
pub struct ToiInput {
    pub proxy_a: DistanceProxy,
    pub proxy_b: DistanceProxy,
    pub sweep_a: Sweep,
    pub sweep_b: Sweep,
    /// Sweep interval is `[0, t_max]`.
    pub t_max: f32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ToiState {
    #[default]
    Unknown,
    Failed,
    Overlapped,
    Touching,
    Separated,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ToiOutput {
    pub state: ToiState,
    pub t: f32,
}

/// Iteration counters accumulated across calls. Owned by the caller.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ToiStats {
    pub toi_calls: u32,
    pub toi_iters: u32,
    pub toi_max_iters: u32,
    pub toi_root_iters: u32,
    pub toi_max_root_iters: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeparationKind {
    Points,
    FaceA,
    FaceB,
}

/// Separation of two sweeping proxies along an axis taken from a GJK
/// simplex cache.
#[derive(Copy, Clone, Debug)]
pub struct SeparationFunction<'a> {
    proxy_a: &'a DistanceProxy,
    proxy_b: &'a DistanceProxy,
    sweep_a: Sweep,
    sweep_b: Sweep,
    kind: SeparationKind,
    local_point: Vec2,
    axis: Vec2,
}

impl<'a> SeparationFunction<'a> {
    /// Build from a cache holding one or two vertices. Also returns the
    /// separation at `t1`.
    pub fn new(
        cache: &SimplexCache,
        proxy_a: &'a DistanceProxy,
        sweep_a: &Sweep,
        proxy_b: &'a DistanceProxy,
        sweep_b: &Sweep,
        t1: f32,
    ) -> (Self, f32) {
        let count = cache.count;
        debug_assert!(0 < count && count < 3);

        let xf_a = sweep_a.get_transform(t1);
        let xf_b = sweep_b.get_transform(t1);

        let mut fcn = Self {
            proxy_a,
            proxy_b,
            sweep_a: *sweep_a,
            sweep_b: *sweep_b,
            kind: SeparationKind::Points,
            local_point: Vec2::ZERO,
            axis: Vec2::ZERO,
        };

        if count == 1 {
            let local_point_a = proxy_a.vertex(cache.index_a[0]);
            let local_point_b = proxy_b.vertex(cache.index_b[0]);
            let point_a = xf_a.apply(local_point_a);
            let point_b = xf_b.apply(local_point_b);
            let d = point_b - point_a;
            fcn.axis = d.normalize_or_zero();
            return (fcn, d.length());
        }

        if cache.index_a[0] == cache.index_a[1] {
            // Two points on B and one on A.
            fcn.kind = SeparationKind::FaceB;
            let local_point_b1 = proxy_b.vertex(cache.index_b[0]);
            let local_point_b2 = proxy_b.vertex(cache.index_b[1]);

            fcn.axis = cross_vs(local_point_b2 - local_point_b1, 1.0).normalize_or_zero();
            let normal = xf_b.q.apply(fcn.axis);

            fcn.local_point = 0.5 * (local_point_b1 + local_point_b2);
            let point_b = xf_b.apply(fcn.local_point);

            let local_point_a = proxy_a.vertex(cache.index_a[0]);
            let point_a = xf_a.apply(local_point_a);

            let mut s = (point_a - point_b).dot(normal);
            if s < 0.0 {
                fcn.axis = -fcn.axis;
                s = -s;
            }
            (fcn, s)
        } else {
            // Two points on A and one or two points on B.
            fcn.kind = SeparationKind::FaceA;
            let local_point_a1 = proxy_a.vertex(cache.index_a[0]);
            let local_point_a2 = proxy_a.vertex(cache.index_a[1]);

            fcn.axis = cross_vs(local_point_a2 - local_point_a1, 1.0).normalize_or_zero();
            let normal = xf_a.q.apply(fcn.axis);

            fcn.local_point = 0.5 * (local_point_a1 + local_point_a2);
            let point_a = xf_a.apply(fcn.local_point);

            let local_point_b = proxy_b.vertex(cache.index_b[0]);
            let point_b = xf_b.apply(local_point_b);

            let mut s = (point_b - point_a).dot(normal);
            if s < 0.0 {
                fcn.axis = -fcn.axis;
                s = -s;
            }
            (fcn, s)
        }
    }

    pub fn kind(&self) -> SeparationKind {
        self.kind
    }

    /// Deepest points along the axis at `t`. Returns the separation and the
    /// support indices on A and B; the index on the face side is 0.
    pub fn find_min_separation(&self, t: f32) -> (f32, usize, usize) {
        let xf_a = self.sweep_a.get_transform(t);
        let xf_b = self.sweep_b.get_transform(t);

        match self.kind {
            SeparationKind::Points => {
                let axis_a = xf_a.q.apply_inv(self.axis);
                let axis_b = xf_b.q.apply_inv(-self.axis);

                let index_a = self.proxy_a.support(axis_a);
                let index_b = self.proxy_b.support(axis_b);

                let point_a = xf_a.apply(self.proxy_a.vertex(index_a));
                let point_b = xf_b.apply(self.proxy_b.vertex(index_b));

                ((point_b - point_a).dot(self.axis), index_a, index_b)
            }
            SeparationKind::FaceA => {
                let normal = xf_a.q.apply(self.axis);
                let point_a = xf_a.apply(self.local_point);

                let axis_b = xf_b.q.apply_inv(-normal);
                let index_b = self.proxy_b.support(axis_b);

                let point_b = xf_b.apply(self.proxy_b.vertex(index_b));

                ((point_b - point_a).dot(normal), 0, index_b)
            }
            SeparationKind::FaceB => {
                let normal = xf_b.q.apply(self.axis);
                let point_b = xf_b.apply(self.local_point);

                let axis_a = xf_a.q.apply_inv(-normal);
                let index_a = self.proxy_a.support(axis_a);

                let point_a = xf_a.apply(self.proxy_a.vertex(index_a));

                ((point_a - point_b).dot(normal), index_a, 0)
            }
        }
    }

    /// Separation of the given support points at `t`.
    pub fn evaluate(&self, index_a: usize, index_b: usize, t: f32) -> f32 {
        let xf_a = self.sweep_a.get_transform(t);
        let xf_b = self.sweep_b.get_transform(t);

        match self.kind {
            SeparationKind::Points => {
                let point_a = xf_a.apply(self.proxy_a.vertex(index_a));
                let point_b = xf_b.apply(self.proxy_b.vertex(index_b));
                (point_b - point_a).dot(self.axis)
            }
            SeparationKind::FaceA => {
                let normal = xf_a.q.apply(self.axis);
                let point_a = xf_a.apply(self.local_point);
                let point_b = xf_b.apply(self.proxy_b.vertex(index_b));
                (point_b - point_a).dot(normal)
            }
            SeparationKind::FaceB => {
                let normal = xf_b.q.apply(self.axis);
                let point_b = xf_b.apply(self.local_point);
                let point_a = xf_a.apply(self.proxy_a.vertex(index_a));
                (point_a - point_b).dot(normal)
            }
        }
    }
}

/// Upper bound on the time of impact between two sweeping proxies.
///
/// The result is conservative: the proxies are separated by roughly
/// `linear_slop` inside their combined skin at `t`, so the bodies never
/// tunnel but may stop slightly short of touching. Rotation can make the
/// root finder fail on very thin shapes; the state reports it.
pub fn time_of_impact(input: &ToiInput, settings: &Settings, stats: &mut ToiStats) -> ToiOutput {
    stats.toi_calls += 1;

    let mut output = ToiOutput {
        state: ToiState::Unknown,
        t: input.t_max,
    };

    let proxy_a = &input.proxy_a;
    let proxy_b = &input.proxy_b;

    let mut sweep_a = input.sweep_a;
    let mut sweep_b = input.sweep_b;

    // Large rotations can make the root finder fail, so normalize the
    // sweep angles.
    sweep_a.normalize();
    sweep_b.normalize();

    let t_max = input.t_max;

    let total_radius = proxy_a.radius + proxy_b.radius;
    let target = settings.linear_slop.max(total_radius - 3.0 * settings.linear_slop);
    let tolerance = 0.25 * settings.linear_slop;
    debug_assert!(target > tolerance);

    let mut t1 = 0.0;
    let mut iter = 0;

    // Prepare input for distance query.
    let mut cache = SimplexCache::default();
    let mut distance_input = DistanceInput {
        proxy_a: *proxy_a,
        proxy_b: *proxy_b,
        transform_a: Transform::IDENTITY,
        transform_b: Transform::IDENTITY,
        use_radii: false,
    };

    // The outer loop progressively attempts to compute new separating axes.
    // This loop terminates when an axis is repeated (no progress is made).
    loop {
        distance_input.transform_a = sweep_a.get_transform(t1);
        distance_input.transform_b = sweep_b.get_transform(t1);

        // Get the distance between shapes. We can also use the results to
        // get a separating axis.
        let distance_output = distance(&mut cache, &distance_input);

        // If the shapes are overlapped, we give up on continuous collision.
        if distance_output.distance <= 0.0 {
            output.state = ToiState::Overlapped;
            output.t = 0.0;
            break;
        }

        if distance_output.distance < target + tolerance {
            // Victory!
            output.state = ToiState::Touching;
            output.t = t1;
            break;
        }

        // Initialize the separating axis.
        let (fcn, _) = SeparationFunction::new(&cache, proxy_a, &sweep_a, proxy_b, &sweep_b, t1);

        // Compute the TOI on the separating axis. We do this by successively
        // resolving the deepest point. This loop is bounded by the number of
        // vertices.
        let mut done = false;
        let mut t2 = t_max;
        let mut push_back_iter = 0;
        loop {
            // Find the deepest point at t2. Store the witness point indices.
            let (mut s2, index_a, index_b) = fcn.find_min_separation(t2);

            // Is the final configuration separated?
            if s2 > target + tolerance {
                // Victory!
                output.state = ToiState::Separated;
                output.t = t_max;
                done = true;
                break;
            }

            // Has the separation reached tolerance?
            if s2 > target - tolerance {
                // Advance the sweeps
                t1 = t2;
                break;
            }

            // Compute the initial separation of the witness points.
            let mut s1 = fcn.evaluate(index_a, index_b, t1);

            // Check for initial overlap. This might happen if the root finder
            // runs out of iterations.
            if s1 < target - tolerance {
                output.state = ToiState::Failed;
                output.t = t1;
                done = true;
                break;
            }

            // Check for touching
            if s1 <= target + tolerance {
                // Victory! t1 should hold the TOI (could be 0.0).
                output.state = ToiState::Touching;
                output.t = t1;
                done = true;
                break;
            }

            // Compute 1D root of: f(x) - target = 0
            let mut root_iter_count = 0;
            let (mut a1, mut a2) = (t1, t2);
            loop {
                // Use a mix of the secant rule and bisection.
                let t = if root_iter_count & 1 == 1 {
                    // Secant rule to improve convergence.
                    a1 + (target - s1) * (a2 - a1) / (s2 - s1)
                } else {
                    // Bisection to guarantee progress.
                    0.5 * (a1 + a2)
                };

                root_iter_count += 1;
                stats.toi_root_iters += 1;

                let s = fcn.evaluate(index_a, index_b, t);

                if (s - target).abs() < tolerance {
                    // t2 holds a tentative value for t1
                    t2 = t;
                    break;
                }

                // Ensure we continue to bracket the root.
                if s > target {
                    a1 = t;
                    s1 = s;
                } else {
                    a2 = t;
                    s2 = s;
                }

                if root_iter_count == MAX_ROOT_ITERATIONS {
                    break;
                }
            }

            stats.toi_max_root_iters = stats.toi_max_root_iters.max(root_iter_count);

            push_back_iter += 1;

            if push_back_iter == MAX_POLYGON_VERTICES {
                break;
            }
        }

        iter += 1;
        stats.toi_iters += 1;

        if done {
            break;
        }

        if iter == MAX_ITERATIONS {
            // Root finder got stuck. Semi-victory.
            output.state = ToiState::Failed;
            output.t = t1;
            break;
        }
    }

    stats.toi_max_iters = stats.toi_max_iters.max(iter);

    if output.state == ToiState::Failed {
        debug!(t = output.t, iterations = iter, "time of impact failed");
    }

    output
}
