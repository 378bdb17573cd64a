//! clank2d: 2D rigid-body contact pipeline (GJK distance, contact manifolds,
//! dynamic AABB tree broad-phase, sequential-impulse solver, time of impact)

pub mod types;
pub mod math;
pub mod error;
pub mod api;
pub mod shapes;
pub mod collision;
pub mod distance;
pub mod narrowphase;
pub mod dynamic_tree;
pub mod broad_phase;
pub mod contact_solver;
pub mod time_of_impact;
pub mod world;

pub use crate::types::*;
pub use crate::api::*;
pub use crate::error::{Error, Result};
pub use crate::math::{Rot, Sweep, Transform};
pub use crate::shapes::{ChainShape, CircleShape, EdgeShape, PolygonShape, Shape, ShapeType};
pub use crate::collision::{Manifold, ManifoldPoint, ManifoldType, WorldManifold};
pub use crate::world::{
    Body, BodyDef, BodyHandle, BodyType, ContactImpulse, ContactView, Fixture, FixtureDef,
    FixtureHandle, FixtureView, World, WorldConfig,
};
