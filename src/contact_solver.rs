//! Sequential-impulse contact solver.
//!
//! Per step the caller runs: [`ContactSolver::new`] →
//! [`initialize_velocity_constraints`](ContactSolver::initialize_velocity_constraints)
//! → [`warm_start`](ContactSolver::warm_start) →
//! [`solve_velocity_constraints`](ContactSolver::solve_velocity_constraints) ×N →
//! integrate positions → [`solve_position_constraints`](ContactSolver::solve_position_constraints)
//! ×M → [`store_impulses`](ContactSolver::store_impulses).
//!
//! Bodies are addressed by their index into the caller's position and
//! velocity buffers.

use glam::{Mat2, Vec2};
use tracing::trace;

use crate::collision::{Manifold, ManifoldType, WorldManifold};
use crate::math::{Rot, Transform, cross, cross_sv, cross_vs, inverse22};
use crate::types::{MAX_MANIFOLD_POINTS, Position, Settings, TimeStep, Velocity};

/// Guards the block solver against an ill-conditioned effective mass.
const MAX_CONDITION_NUMBER: f32 = 1000.0;

/// Mass properties of a body as seen by the solver.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SolverBody {
    pub inv_mass: f32,
    pub inv_i: f32,
    pub local_center: Vec2,
}

/// One touching contact handed to the solver. Impulses are written back
/// into `manifold` by [`ContactSolver::store_impulses`].
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SolverContact {
    pub manifold: Manifold,
    pub index_a: usize,
    pub index_b: usize,
    pub radius_a: f32,
    pub radius_b: f32,
    pub friction: f32,
    pub restitution: f32,
    /// Conveyor-belt speed along the tangent.
    pub tangent_speed: f32,
}

#[derive(Copy, Clone, Debug, Default)]
struct VelocityConstraintPoint {
    r_a: Vec2,
    r_b: Vec2,
    normal_impulse: f32,
    tangent_impulse: f32,
    normal_mass: f32,
    tangent_mass: f32,
    velocity_bias: f32,
    /// Slot of this point in the source manifold.
    manifold_index: usize,
}

#[derive(Copy, Clone, Debug, Default)]
struct ContactVelocityConstraint {
    points: [VelocityConstraintPoint; MAX_MANIFOLD_POINTS],
    normal: Vec2,
    normal_mass: Mat2,
    k: Mat2,
    index_a: usize,
    index_b: usize,
    inv_mass_a: f32,
    inv_mass_b: f32,
    inv_i_a: f32,
    inv_i_b: f32,
    friction: f32,
    restitution: f32,
    tangent_speed: f32,
    point_count: usize,
    contact_index: usize,
}

#[derive(Copy, Clone, Debug, Default)]
struct ContactPositionConstraint {
    local_points: [Vec2; MAX_MANIFOLD_POINTS],
    local_normal: Vec2,
    local_point: Vec2,
    index_a: usize,
    index_b: usize,
    inv_mass_a: f32,
    inv_mass_b: f32,
    local_center_a: Vec2,
    local_center_b: Vec2,
    inv_i_a: f32,
    inv_i_b: f32,
    kind: ManifoldType,
    radius_a: f32,
    radius_b: f32,
    point_count: usize,
}

/// Contact point re-evaluated from the current transforms.
struct PositionSolverManifold {
    normal: Vec2,
    point: Vec2,
    separation: f32,
}

impl PositionSolverManifold {
    fn new(pc: &ContactPositionConstraint, xf_a: &Transform, xf_b: &Transform, index: usize) -> Self {
        debug_assert!(pc.point_count > 0);

        match pc.kind {
            ManifoldType::Circles => {
                let point_a = xf_a.apply(pc.local_point);
                let point_b = xf_b.apply(pc.local_points[0]);
                let normal = (point_b - point_a).normalize_or_zero();
                Self {
                    normal,
                    point: 0.5 * (point_a + point_b),
                    separation: (point_b - point_a).dot(normal) - pc.radius_a - pc.radius_b,
                }
            }
            ManifoldType::FaceA => {
                let normal = xf_a.q.apply(pc.local_normal);
                let plane_point = xf_a.apply(pc.local_point);
                let clip_point = xf_b.apply(pc.local_points[index]);
                Self {
                    normal,
                    point: clip_point,
                    separation: (clip_point - plane_point).dot(normal) - pc.radius_a - pc.radius_b,
                }
            }
            ManifoldType::FaceB => {
                let normal = xf_b.q.apply(pc.local_normal);
                let plane_point = xf_b.apply(pc.local_point);
                let clip_point = xf_a.apply(pc.local_points[index]);
                Self {
                    // Ensure normal points from A to B
                    normal: -normal,
                    point: clip_point,
                    separation: (clip_point - plane_point).dot(normal) - pc.radius_a - pc.radius_b,
                }
            }
        }
    }
}

fn body_transform(c: Vec2, a: f32, local_center: Vec2) -> Transform {
    let q = Rot::new(a);
    Transform {
        p: c - q.apply(local_center),
        q,
    }
}

/// Velocity and position constraints for one island of contacts.
pub struct ContactSolver {
    settings: Settings,
    contacts: Vec<SolverContact>,
    position_constraints: Vec<ContactPositionConstraint>,
    velocity_constraints: Vec<ContactVelocityConstraint>,
}

impl ContactSolver {
    /// Build constraints for `contacts`. Every contact must have at least
    /// one manifold point.
    pub fn new(
        step: TimeStep,
        settings: &Settings,
        contacts: Vec<SolverContact>,
        bodies: &[SolverBody],
    ) -> Self {
        let mut position_constraints = Vec::with_capacity(contacts.len());
        let mut velocity_constraints = Vec::with_capacity(contacts.len());

        for (i, contact) in contacts.iter().enumerate() {
            let manifold = &contact.manifold;
            let point_count = manifold.point_count;
            debug_assert!(point_count > 0);

            let body_a = &bodies[contact.index_a];
            let body_b = &bodies[contact.index_b];

            let mut vc = ContactVelocityConstraint {
                friction: contact.friction,
                restitution: contact.restitution,
                tangent_speed: contact.tangent_speed,
                index_a: contact.index_a,
                index_b: contact.index_b,
                inv_mass_a: body_a.inv_mass,
                inv_mass_b: body_b.inv_mass,
                inv_i_a: body_a.inv_i,
                inv_i_b: body_b.inv_i,
                contact_index: i,
                point_count,
                ..Default::default()
            };

            let mut pc = ContactPositionConstraint {
                index_a: contact.index_a,
                index_b: contact.index_b,
                inv_mass_a: body_a.inv_mass,
                inv_mass_b: body_b.inv_mass,
                local_center_a: body_a.local_center,
                local_center_b: body_b.local_center,
                inv_i_a: body_a.inv_i,
                inv_i_b: body_b.inv_i,
                local_normal: manifold.local_normal,
                local_point: manifold.local_point,
                point_count,
                radius_a: contact.radius_a,
                radius_b: contact.radius_b,
                kind: manifold.kind,
                ..Default::default()
            };

            for (j, cp) in manifold.points().iter().enumerate() {
                let vcp = &mut vc.points[j];
                if step.warm_starting {
                    vcp.normal_impulse = step.dt_ratio * cp.normal_impulse;
                    vcp.tangent_impulse = step.dt_ratio * cp.tangent_impulse;
                }
                vcp.manifold_index = j;
                pc.local_points[j] = cp.local_point;
            }

            position_constraints.push(pc);
            velocity_constraints.push(vc);
        }

        Self {
            settings: settings.clone(),
            contacts,
            position_constraints,
            velocity_constraints,
        }
    }

    /// Contacts with the impulses written by the last `store_impulses`.
    pub fn contacts(&self) -> &[SolverContact] {
        &self.contacts
    }

    /// Anchors, effective masses, restitution bias and the 2x2 block
    /// system. Depends on the positions at the start of the step.
    pub fn initialize_velocity_constraints(&mut self, positions: &[Position], velocities: &[Velocity]) {
        for (vc, pc) in self
            .velocity_constraints
            .iter_mut()
            .zip(self.position_constraints.iter())
        {
            let contact = &self.contacts[vc.contact_index];
            let manifold = &contact.manifold;

            let (m_a, m_b) = (vc.inv_mass_a, vc.inv_mass_b);
            let (i_a, i_b) = (vc.inv_i_a, vc.inv_i_b);

            let (c_a, a_a) = (positions[vc.index_a].c, positions[vc.index_a].a);
            let (v_a, w_a) = (velocities[vc.index_a].v, velocities[vc.index_a].w);
            let (c_b, a_b) = (positions[vc.index_b].c, positions[vc.index_b].a);
            let (v_b, w_b) = (velocities[vc.index_b].v, velocities[vc.index_b].w);

            debug_assert!(manifold.point_count > 0);

            let xf_a = body_transform(c_a, a_a, pc.local_center_a);
            let xf_b = body_transform(c_b, a_b, pc.local_center_b);

            let world_manifold = WorldManifold::new(manifold, &xf_a, pc.radius_a, &xf_b, pc.radius_b);

            vc.normal = world_manifold.normal;
            let tangent = cross_vs(vc.normal, 1.0);

            for j in 0..vc.point_count {
                let vcp = &mut vc.points[j];

                vcp.r_a = world_manifold.points[j] - c_a;
                vcp.r_b = world_manifold.points[j] - c_b;

                let rn_a = cross(vcp.r_a, vc.normal);
                let rn_b = cross(vcp.r_b, vc.normal);

                let k_normal = m_a + m_b + i_a * rn_a * rn_a + i_b * rn_b * rn_b;
                vcp.normal_mass = if k_normal > 0.0 { 1.0 / k_normal } else { 0.0 };

                let rt_a = cross(vcp.r_a, tangent);
                let rt_b = cross(vcp.r_b, tangent);

                let k_tangent = m_a + m_b + i_a * rt_a * rt_a + i_b * rt_b * rt_b;
                vcp.tangent_mass = if k_tangent > 0.0 { 1.0 / k_tangent } else { 0.0 };

                // Setup a velocity bias for restitution.
                vcp.velocity_bias = 0.0;
                let v_rel = vc
                    .normal
                    .dot(v_b + cross_sv(w_b, vcp.r_b) - v_a - cross_sv(w_a, vcp.r_a));
                if v_rel < -self.settings.velocity_threshold {
                    vcp.velocity_bias = -vc.restitution * v_rel;
                }
            }

            // If we have two points, then prepare the block solver.
            if vc.point_count == 2 && self.settings.block_solve {
                let vcp1 = &vc.points[0];
                let vcp2 = &vc.points[1];

                let rn1_a = cross(vcp1.r_a, vc.normal);
                let rn1_b = cross(vcp1.r_b, vc.normal);
                let rn2_a = cross(vcp2.r_a, vc.normal);
                let rn2_b = cross(vcp2.r_b, vc.normal);

                let k11 = m_a + m_b + i_a * rn1_a * rn1_a + i_b * rn1_b * rn1_b;
                let k22 = m_a + m_b + i_a * rn2_a * rn2_a + i_b * rn2_b * rn2_b;
                let k12 = m_a + m_b + i_a * rn1_a * rn2_a + i_b * rn1_b * rn2_b;

                if k11 * k11 < MAX_CONDITION_NUMBER * (k11 * k22 - k12 * k12) {
                    // K is safe to invert.
                    vc.k = Mat2::from_cols(Vec2::new(k11, k12), Vec2::new(k12, k22));
                    vc.normal_mass = inverse22(vc.k);
                } else {
                    // The constraints are redundant, just use one. Keep the
                    // deeper point.
                    if world_manifold.separations[1] < world_manifold.separations[0] {
                        vc.points.swap(0, 1);
                    }
                    vc.point_count = 1;
                    trace!(
                        contact = vc.contact_index,
                        "ill-conditioned two-point manifold, solving one point"
                    );
                }
            }
        }
    }

    /// Apply the impulses carried over from the previous step.
    pub fn warm_start(&mut self, velocities: &mut [Velocity]) {
        for vc in &self.velocity_constraints {
            let (m_a, i_a) = (vc.inv_mass_a, vc.inv_i_a);
            let (m_b, i_b) = (vc.inv_mass_b, vc.inv_i_b);

            let mut v_a = velocities[vc.index_a].v;
            let mut w_a = velocities[vc.index_a].w;
            let mut v_b = velocities[vc.index_b].v;
            let mut w_b = velocities[vc.index_b].w;

            let normal = vc.normal;
            let tangent = cross_vs(normal, 1.0);

            for vcp in &vc.points[..vc.point_count] {
                let p = vcp.normal_impulse * normal + vcp.tangent_impulse * tangent;
                w_a -= i_a * cross(vcp.r_a, p);
                v_a -= m_a * p;
                w_b += i_b * cross(vcp.r_b, p);
                v_b += m_b * p;
            }

            velocities[vc.index_a] = Velocity { v: v_a, w: w_a };
            velocities[vc.index_b] = Velocity { v: v_b, w: w_b };
        }
    }

    /// One Gauss-Seidel sweep over all contacts: friction, then the normal
    /// constraint (block solved for two-point manifolds).
    pub fn solve_velocity_constraints(&mut self, velocities: &mut [Velocity]) {
        let block_solve = self.settings.block_solve;

        for vc in &mut self.velocity_constraints {
            let (m_a, i_a) = (vc.inv_mass_a, vc.inv_i_a);
            let (m_b, i_b) = (vc.inv_mass_b, vc.inv_i_b);
            let point_count = vc.point_count;

            let mut v_a = velocities[vc.index_a].v;
            let mut w_a = velocities[vc.index_a].w;
            let mut v_b = velocities[vc.index_b].v;
            let mut w_b = velocities[vc.index_b].w;

            let normal = vc.normal;
            let tangent = cross_vs(normal, 1.0);
            let friction = vc.friction;

            debug_assert!(point_count == 1 || point_count == 2);

            // Solve tangent constraints first because non-penetration is more
            // important than friction.
            for vcp in &mut vc.points[..point_count] {
                // Relative velocity at contact
                let dv = v_b + cross_sv(w_b, vcp.r_b) - v_a - cross_sv(w_a, vcp.r_a);

                // Compute tangent force
                let vt = dv.dot(tangent) - vc.tangent_speed;
                let mut lambda = vcp.tangent_mass * (-vt);

                // Clamp the accumulated force
                let max_friction = friction * vcp.normal_impulse;
                let new_impulse = (vcp.tangent_impulse + lambda).clamp(-max_friction, max_friction);
                lambda = new_impulse - vcp.tangent_impulse;
                vcp.tangent_impulse = new_impulse;

                // Apply contact impulse
                let p = lambda * tangent;

                v_a -= m_a * p;
                w_a -= i_a * cross(vcp.r_a, p);

                v_b += m_b * p;
                w_b += i_b * cross(vcp.r_b, p);
            }

            if point_count == 1 || !block_solve {
                for vcp in &mut vc.points[..point_count] {
                    // Relative velocity at contact
                    let dv = v_b + cross_sv(w_b, vcp.r_b) - v_a - cross_sv(w_a, vcp.r_a);

                    // Compute normal impulse
                    let vn = dv.dot(normal);
                    let mut lambda = -vcp.normal_mass * (vn - vcp.velocity_bias);

                    // Clamp the accumulated impulse
                    let new_impulse = (vcp.normal_impulse + lambda).max(0.0);
                    lambda = new_impulse - vcp.normal_impulse;
                    vcp.normal_impulse = new_impulse;

                    // Apply contact impulse
                    let p = lambda * normal;
                    v_a -= m_a * p;
                    w_a -= i_a * cross(vcp.r_a, p);

                    v_b += m_b * p;
                    w_b += i_b * cross(vcp.r_b, p);
                }
            } else {
                // Block solver developed in collaboration with Dirk Gregorius.
                //
                // The mixed linear complementarity problem
                //   vn = A * x + b, vn >= 0, x >= 0, vn_i * x_i = 0
                // is solved in accumulated form: x = a + d, where `a` is the
                // old total impulse and `d` the incremental one, giving
                //   vn = A * d + b' with b' = vn0 - v_bias - A * a.
                // The four cases are tried in order and the first valid one
                // is applied.
                let [cp1, cp2] = &mut vc.points;

                let a = Vec2::new(cp1.normal_impulse, cp2.normal_impulse);
                debug_assert!(a.x >= 0.0 && a.y >= 0.0);

                // Relative velocity at contact
                let dv1 = v_b + cross_sv(w_b, cp1.r_b) - v_a - cross_sv(w_a, cp1.r_a);
                let dv2 = v_b + cross_sv(w_b, cp2.r_b) - v_a - cross_sv(w_a, cp2.r_a);

                // Compute normal velocity
                let vn1 = dv1.dot(normal);
                let vn2 = dv2.dot(normal);

                let mut b = Vec2::new(vn1 - cp1.velocity_bias, vn2 - cp2.velocity_bias);

                // Compute b'
                b -= vc.k * a;

                let x = block_solve_lcp(vc.k, vc.normal_mass, cp1.normal_mass, cp2.normal_mass, b);

                if let Some(x) = x {
                    // Get the incremental impulse
                    let d = x - a;

                    // Apply incremental impulse
                    let p1 = d.x * normal;
                    let p2 = d.y * normal;
                    v_a -= m_a * (p1 + p2);
                    w_a -= i_a * (cross(cp1.r_a, p1) + cross(cp2.r_a, p2));

                    v_b += m_b * (p1 + p2);
                    w_b += i_b * (cross(cp1.r_b, p1) + cross(cp2.r_b, p2));

                    // Accumulate
                    cp1.normal_impulse = x.x;
                    cp2.normal_impulse = x.y;
                }
            }

            velocities[vc.index_a] = Velocity { v: v_a, w: w_a };
            velocities[vc.index_b] = Velocity { v: v_b, w: w_b };
        }
    }

    /// Write accumulated impulses back into the manifolds for warm starting.
    pub fn store_impulses(&mut self) {
        for vc in &self.velocity_constraints {
            let manifold = &mut self.contacts[vc.contact_index].manifold;
            for vcp in &vc.points[..vc.point_count] {
                let mp = &mut manifold.points[vcp.manifold_index];
                mp.normal_impulse = vcp.normal_impulse;
                mp.tangent_impulse = vcp.tangent_impulse;
            }
        }
    }

    /// Sequential non-linear Gauss-Seidel pass over the position
    /// constraints. Returns `true` once every contact is within
    /// `3 * linear_slop` of touching.
    pub fn solve_position_constraints(&self, positions: &mut [Position]) -> bool {
        let baumgarte = self.settings.baumgarte;
        let min_separation = self.position_pass(positions, baumgarte, |pc| {
            (pc.inv_mass_a, pc.inv_i_a, pc.inv_mass_b, pc.inv_i_b)
        });

        // We can't expect min_separation >= -linear_slop because we don't
        // push the separation above -linear_slop.
        min_separation >= -3.0 * self.settings.linear_slop
    }

    /// Position pass used by time-of-impact sub-stepping. Only the two TOI
    /// bodies move; every other body is treated as static.
    pub fn solve_toi_position_constraints(
        &self,
        positions: &mut [Position],
        toi_index_a: usize,
        toi_index_b: usize,
    ) -> bool {
        let baumgarte = self.settings.toi_baumgarte;
        let min_separation = self.position_pass(positions, baumgarte, |pc| {
            let is_toi = |index: usize| index == toi_index_a || index == toi_index_b;
            let (m_a, i_a) = if is_toi(pc.index_a) {
                (pc.inv_mass_a, pc.inv_i_a)
            } else {
                (0.0, 0.0)
            };
            let (m_b, i_b) = if is_toi(pc.index_b) {
                (pc.inv_mass_b, pc.inv_i_b)
            } else {
                (0.0, 0.0)
            };
            (m_a, i_a, m_b, i_b)
        });

        // We can't expect min_separation >= -linear_slop because we don't
        // push the separation above -linear_slop.
        min_separation >= -1.5 * self.settings.linear_slop
    }

    fn position_pass<F>(&self, positions: &mut [Position], baumgarte: f32, masses: F) -> f32
    where
        F: Fn(&ContactPositionConstraint) -> (f32, f32, f32, f32),
    {
        let linear_slop = self.settings.linear_slop;
        let max_correction = self.settings.max_linear_correction;
        let mut min_separation = 0.0_f32;

        for pc in &self.position_constraints {
            let (m_a, i_a, m_b, i_b) = masses(pc);

            let mut c_a = positions[pc.index_a].c;
            let mut a_a = positions[pc.index_a].a;
            let mut c_b = positions[pc.index_b].c;
            let mut a_b = positions[pc.index_b].a;

            // Solve normal constraints
            for j in 0..pc.point_count {
                let xf_a = body_transform(c_a, a_a, pc.local_center_a);
                let xf_b = body_transform(c_b, a_b, pc.local_center_b);

                let psm = PositionSolverManifold::new(pc, &xf_a, &xf_b, j);
                let normal = psm.normal;
                let point = psm.point;
                let separation = psm.separation;

                let r_a = point - c_a;
                let r_b = point - c_b;

                // Track max constraint error.
                min_separation = min_separation.min(separation);

                // Prevent large corrections and allow slop.
                let c = (baumgarte * (separation + linear_slop)).clamp(-max_correction, 0.0);

                // Compute the effective mass.
                let rn_a = cross(r_a, normal);
                let rn_b = cross(r_b, normal);
                let k = m_a + m_b + i_a * rn_a * rn_a + i_b * rn_b * rn_b;

                // Compute normal impulse
                let impulse = if k > 0.0 { -c / k } else { 0.0 };

                let p = impulse * normal;

                c_a -= m_a * p;
                a_a -= i_a * cross(r_a, p);

                c_b += m_b * p;
                a_b += i_b * cross(r_b, p);
            }

            positions[pc.index_a] = Position { c: c_a, a: a_a };
            positions[pc.index_b] = Position { c: c_b, a: a_b };
        }

        min_separation
    }
}

// Exhaustive case analysis of the 2x2 LCP. Returns the new total impulse
// or `None` when no case applies (the impulses are left unchanged).
fn block_solve_lcp(k: Mat2, normal_mass: Mat2, normal_mass1: f32, normal_mass2: f32, b: Vec2) -> Option<Vec2> {
    // Case 1: vn = 0
    //   0 = A * x + b'
    //   x = -inv(A) * b'
    let x = -(normal_mass * b);
    if x.x >= 0.0 && x.y >= 0.0 {
        return Some(x);
    }

    // Case 2: vn1 = 0 and x2 = 0
    //   0 = a11 * x1 + a12 * 0 + b1'
    // vn2 = a21 * x1 + a22 * 0 + b2'
    let x = Vec2::new(-normal_mass1 * b.x, 0.0);
    let vn2 = k.x_axis.y * x.x + b.y;
    if x.x >= 0.0 && vn2 >= 0.0 {
        return Some(x);
    }

    // Case 3: vn2 = 0 and x1 = 0
    // vn1 = a11 * 0 + a12 * x2 + b1'
    //   0 = a21 * 0 + a22 * x2 + b2'
    let x = Vec2::new(0.0, -normal_mass2 * b.y);
    let vn1 = k.y_axis.x * x.y + b.x;
    if x.y >= 0.0 && vn1 >= 0.0 {
        return Some(x);
    }

    // Case 4: x1 = 0 and x2 = 0
    // vn1 = b1
    // vn2 = b2
    if b.x >= 0.0 && b.y >= 0.0 {
        return Some(Vec2::ZERO);
    }

    // No solution, give up. This is hit sometimes, but it doesn't seem to
    // matter.
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrowphase::collide_polygons;
    use crate::shapes::PolygonShape;

    const DT: f32 = 1.0 / 60.0;

    fn time_step(warm_starting: bool) -> TimeStep {
        TimeStep {
            dt: DT,
            inv_dt: 1.0 / DT,
            dt_ratio: 1.0,
            velocity_iterations: 8,
            position_iterations: 3,
            warm_starting,
        }
    }

    // Static ground (index 0) and a unit box (index 1) resting on it.
    fn resting_box(box_y: f32, angle: f32) -> (Vec<SolverBody>, Vec<Position>, SolverContact) {
        let ground = PolygonShape::new_box(5.0, 0.5);
        let bx = PolygonShape::new_box(0.5, 0.5);
        let xf_a = Transform::IDENTITY;
        let xf_b = Transform::new(Vec2::new(0.0, box_y), angle);
        let manifold = collide_polygons(&ground, &xf_a, &bx, &xf_b);
        assert!(manifold.point_count > 0);

        let bodies = vec![
            SolverBody::default(),
            SolverBody {
                inv_mass: 1.0,
                inv_i: 6.0,
                local_center: Vec2::ZERO,
            },
        ];
        let positions = vec![
            Position { c: Vec2::ZERO, a: 0.0 },
            Position {
                c: Vec2::new(0.0, box_y),
                a: angle,
            },
        ];
        let contact = SolverContact {
            manifold,
            index_a: 0,
            index_b: 1,
            radius_a: ground.radius,
            radius_b: bx.radius,
            friction: 0.6,
            ..Default::default()
        };
        (bodies, positions, contact)
    }

    fn falling(vy: f32) -> Vec<Velocity> {
        vec![
            Velocity::default(),
            Velocity {
                v: Vec2::new(0.0, vy),
                w: 0.0,
            },
        ]
    }

    #[test]
    fn test_resting_box_stops() {
        let (bodies, positions, contact) = resting_box(0.99, 0.0);
        let mut velocities = falling(-10.0 * DT);
        let mut solver = ContactSolver::new(time_step(true), &Settings::default(), vec![contact], &bodies);
        solver.initialize_velocity_constraints(&positions, &velocities);
        solver.warm_start(&mut velocities);
        for _ in 0..10 {
            solver.solve_velocity_constraints(&mut velocities);
        }
        solver.store_impulses();

        assert!(velocities[1].v.length() < 1e-4);
        assert!(velocities[1].w.abs() < 1e-4);
        let m = &solver.contacts()[0].manifold;
        let total: f32 = m.points().iter().map(|p| p.normal_impulse).sum();
        assert!((total - 10.0 * DT).abs() < 1e-4);
        // Static ground is untouched
        assert_eq!(velocities[0], Velocity::default());
    }

    #[test]
    fn test_warm_start_is_idempotent_at_rest() {
        let (bodies, positions, contact) = resting_box(0.99, 0.0);
        let settings = Settings::default();

        // Converge once
        let mut velocities = falling(-10.0 * DT);
        let mut solver = ContactSolver::new(time_step(true), &settings, vec![contact], &bodies);
        solver.initialize_velocity_constraints(&positions, &velocities);
        solver.warm_start(&mut velocities);
        for _ in 0..20 {
            solver.solve_velocity_constraints(&mut velocities);
        }
        solver.store_impulses();
        let converged = solver.contacts()[0];

        // Next step: same gravity, warm started from the stored impulses
        let mut velocities = falling(-10.0 * DT);
        let mut solver = ContactSolver::new(time_step(true), &settings, vec![converged], &bodies);
        solver.initialize_velocity_constraints(&positions, &velocities);
        solver.warm_start(&mut velocities);
        assert!(velocities[1].v.length() < 1e-4);
        solver.solve_velocity_constraints(&mut velocities);
        solver.store_impulses();

        let after = solver.contacts()[0].manifold;
        for (p0, p1) in converged.manifold.points().iter().zip(after.points()) {
            assert!((p0.normal_impulse - p1.normal_impulse).abs() < 1e-5);
            assert!((p0.tangent_impulse - p1.tangent_impulse).abs() < 1e-5);
        }
    }

    #[test]
    fn test_block_solver_releases_separating_point() {
        let (bodies, positions, mut contact) = resting_box(0.99, 0.0);
        contact.friction = 0.0;
        // Spin CCW: the left corner approaches, the right corner separates
        let mut velocities = vec![
            Velocity::default(),
            Velocity {
                v: Vec2::ZERO,
                w: 1.0,
            },
        ];
        let mut solver = ContactSolver::new(time_step(false), &Settings::default(), vec![contact], &bodies);
        solver.initialize_velocity_constraints(&positions, &velocities);
        solver.solve_velocity_constraints(&mut velocities);
        solver.store_impulses();

        let m = solver.contacts()[0].manifold;
        assert_eq!(m.point_count, 2);
        let xf_b = Transform::new(positions[1].c, positions[1].a);
        for p in m.points() {
            let world = xf_b.apply(p.local_point);
            if world.x < 0.0 {
                assert!(p.normal_impulse > 0.0);
                // Active point ends at zero normal velocity
                let r = world - positions[1].c;
                let vn = (velocities[1].v + cross_sv(velocities[1].w, r)).y;
                assert!(vn.abs() < 1e-4, "vn = {vn}");
            } else {
                assert_eq!(p.normal_impulse, 0.0);
            }
        }
    }

    #[test]
    fn test_near_coincident_points_fall_back_to_deeper_one() {
        for deeper in [0, 1] {
            let (bodies, positions, mut contact) = resting_box(0.99, 0.0);
            assert_eq!(contact.manifold.point_count, 2);
            // Local points live on the box, so lower means deeper.
            assert_eq!(contact.manifold.kind, ManifoldType::FaceA);

            // Pull the points together so the 2x2 mass is nearly singular,
            // and sink one of them a little further.
            let other = 1 - deeper;
            let base = contact.manifold.points[0].local_point;
            contact.manifold.points[other].local_point = base + Vec2::new(1e-4, 0.0);
            contact.manifold.points[deeper].local_point = base + Vec2::new(0.0, -0.002);

            let mut velocities = falling(-10.0 * DT);
            let mut solver = ContactSolver::new(time_step(false), &Settings::default(), vec![contact], &bodies);
            solver.initialize_velocity_constraints(&positions, &velocities);

            let vc = &solver.velocity_constraints[0];
            assert_eq!(vc.point_count, 1);
            assert_eq!(vc.points[0].manifold_index, deeper);

            for _ in 0..10 {
                solver.solve_velocity_constraints(&mut velocities);
            }
            solver.store_impulses();

            assert!(velocities.iter().all(|v| v.v.is_finite() && v.w.is_finite()));
            let m = &solver.contacts()[0].manifold;
            assert!(m.points().iter().all(|p| p.normal_impulse.is_finite() && p.tangent_impulse.is_finite()));
            assert!(m.points[deeper].normal_impulse > 0.0);
            assert_eq!(m.points[other].normal_impulse, 0.0);
            assert_eq!(m.points[other].tangent_impulse, 0.0);
        }
    }

    #[test]
    fn test_lcp_cases() {
        let k = Mat2::from_cols(Vec2::new(2.0, 1.0), Vec2::new(1.0, 2.0));
        let m = inverse22(k);
        // Both approaching equally: both impulses positive
        let x = block_solve_lcp(k, m, 0.5, 0.5, Vec2::new(-1.0, -1.0)).unwrap();
        assert!(x.x > 0.0 && x.y > 0.0);
        // Only the first approaches
        let x = block_solve_lcp(k, m, 0.5, 0.5, Vec2::new(-1.0, 2.0)).unwrap();
        assert!(x.x > 0.0);
        assert_eq!(x.y, 0.0);
        // Only the second approaches
        let x = block_solve_lcp(k, m, 0.5, 0.5, Vec2::new(2.0, -1.0)).unwrap();
        assert_eq!(x.x, 0.0);
        assert!(x.y > 0.0);
        // Both separating
        assert_eq!(block_solve_lcp(k, m, 0.5, 0.5, Vec2::new(1.0, 1.0)), Some(Vec2::ZERO));
    }

    #[test]
    fn test_position_solver_pushes_apart() {
        let (bodies, mut positions, contact) = resting_box(0.9, 0.0);
        let velocities = falling(0.0);
        let mut solver = ContactSolver::new(time_step(false), &Settings::default(), vec![contact], &bodies);
        solver.initialize_velocity_constraints(&positions, &velocities);

        let mut solved = false;
        for _ in 0..50 {
            if solver.solve_position_constraints(&mut positions) {
                solved = true;
                break;
            }
        }
        assert!(solved);
        assert!(positions[1].c.y > 0.97);
        assert_eq!(positions[0].c, Vec2::ZERO);
    }

    #[test]
    fn test_toi_position_solver_holds_other_bodies() {
        let (bodies, mut positions, contact) = resting_box(0.9, 0.0);
        let solver = ContactSolver::new(time_step(false), &Settings::default(), vec![contact], &bodies);
        // Body 1 is not a TOI body: nothing moves
        let before = positions.clone();
        solver.solve_toi_position_constraints(&mut positions, 0, 0);
        assert_eq!(positions, before);
        // Body 1 is a TOI body: it is pushed out
        solver.solve_toi_position_constraints(&mut positions, 0, 1);
        assert!(positions[1].c.y > 0.9);
    }
}
