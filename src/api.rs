use glam::Vec2;

use crate::collision::Manifold;
use crate::distance::DistanceProxy;
use crate::math::Transform;
use crate::types::*;
use crate::world::{ContactImpulse, ContactView, FixtureView};

/// Capability set shared by every convex primitive.
///
/// Chains are collections of edges, so most queries take a child index;
/// single-piece shapes ignore it.
pub trait ShapeApi {
    /// Number of convex children (edges for a chain, otherwise 1).
    fn child_count(&self) -> usize;

    /// Is the world point inside the shape. Always false for edges/chains.
    fn test_point(&self, xf: &Transform, p: Vec2) -> bool;

    /// Signed distance from a world point to the child, with the outward
    /// direction of that distance.
    fn compute_distance(&self, xf: &Transform, p: Vec2, child: usize) -> (f32, Vec2);

    /// Cast a ray against the child.
    fn ray_cast(
        &self,
        input: &RayCastInput,
        xf: &Transform,
        child: usize,
    ) -> Option<RayCastOutput>;

    /// World bounds of the child.
    fn compute_aabb(&self, xf: &Transform, child: usize) -> Aabb;

    /// Mass properties for the given density (kg/m^2).
    fn compute_mass(&self, density: f32) -> MassData;

    /// GJK view of the child.
    fn distance_proxy(&self, child: usize) -> DistanceProxy;
}

/// Decides whether two fixtures may collide. Called once when the
/// broad-phase first reports a pair.
pub trait ContactFilter {
    fn should_collide(&mut self, a: &FixtureView<'_>, b: &FixtureView<'_>) -> bool;
}

/// Contact event callbacks fired by the world during a step.
///
/// The world is borrowed mutably for the whole step, so implementations
/// only see read-only views and cannot create or destroy anything.
pub trait ContactListener {
    /// Two fixtures started touching.
    fn begin_contact(&mut self, _contact: &ContactView<'_>) {}

    /// Two fixtures stopped touching.
    fn end_contact(&mut self, _contact: &ContactView<'_>) {}

    /// Called after narrow-phase for touching contacts, before solving.
    /// Return `false` to disable the contact for this step only.
    fn pre_solve(&mut self, _contact: &ContactView<'_>, _old_manifold: &Manifold) -> bool {
        true
    }

    /// Final impulses applied to a touching contact.
    fn post_solve(&mut self, _contact: &ContactView<'_>, _impulse: &ContactImpulse) {}
}

/// Default filter: pair fixtures whose layer masks accept each other.
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultContactFilter;

impl ContactFilter for DefaultContactFilter {
    fn should_collide(&mut self, a: &FixtureView<'_>, b: &FixtureView<'_>) -> bool {
        a.filter.mutual(b.filter)
    }
}

/// Listener that ignores everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopListener;

impl ContactListener for NoopListener {}
