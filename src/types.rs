use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum number of contact points between two convex shapes.
pub const MAX_MANIFOLD_POINTS: usize = 2;

/// Maximum number of vertices on a convex polygon.
pub const MAX_POLYGON_VERTICES: usize = 8;

/// Default collision tolerance; also the weld distance for polygon hulls.
pub const DEFAULT_LINEAR_SLOP: f32 = 0.005;

/// Default skin radius for polygons, edges and chains.
pub const DEFAULT_POLYGON_RADIUS: f32 = 2.0 * DEFAULT_LINEAR_SLOP;

/// Collision category bits of a fixture.
///
/// Fixtures pair only when each side accepts the other: see
/// [`LayerMask::mutual`]. The default fixture sits in category 1 and
/// accepts every category.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerMask {
    /// Categories this fixture belongs to.
    pub layer: u32,
    /// Categories this fixture accepts contacts from.
    pub collides_with: u32,
    /// Categories rejected even when `collides_with` accepts them.
    pub exclude: u32,
}

impl Default for LayerMask {
    fn default() -> Self {
        Self {
            layer: 1,
            collides_with: u32::MAX,
            exclude: 0,
        }
    }
}

impl LayerMask {
    pub fn simple(layer: u32, collides_with: u32) -> Self {
        Self {
            layer,
            collides_with,
            exclude: 0,
        }
    }

    /// Put the fixture in its own categories but reject `categories`.
    pub fn excluding(self, categories: u32) -> Self {
        Self {
            exclude: self.exclude | categories,
            ..self
        }
    }

    /// One-way test: does this fixture accept contacts from `other`.
    pub fn allows(self, other: LayerMask) -> bool {
        let hit = (self.collides_with & other.layer) != 0;
        let blocked = (self.exclude & other.layer) != 0;
        hit && !blocked
    }

    /// Two-way test used by the default contact filter. Symmetric in its
    /// arguments, so pair order from the broad-phase never matters.
    pub fn mutual(self, other: LayerMask) -> bool {
        self.allows(other) && other.allows(self)
    }
}

/// Axis-aligned bounding box.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Lower vertex.
    pub lower: Vec2,
    /// Upper vertex.
    pub upper: Vec2,
}

impl Aabb {
    pub fn new(lower: Vec2, upper: Vec2) -> Self {
        Self { lower, upper }
    }

    /// Box centered at `center` with the given half extents.
    pub fn from_center(center: Vec2, half_extents: Vec2) -> Self {
        Self {
            lower: center - half_extents,
            upper: center + half_extents,
        }
    }

    /// Bounds are sorted and finite.
    pub fn is_valid(&self) -> bool {
        let d = self.upper - self.lower;
        d.x >= 0.0 && d.y >= 0.0 && self.lower.is_finite() && self.upper.is_finite()
    }

    pub fn center(&self) -> Vec2 {
        0.5 * (self.lower + self.upper)
    }

    /// Half widths.
    pub fn extents(&self) -> Vec2 {
        0.5 * (self.upper - self.lower)
    }

    /// Perimeter, used as the surface-area cost in the dynamic tree.
    pub fn perimeter(&self) -> f32 {
        let w = self.upper.x - self.lower.x;
        let h = self.upper.y - self.lower.y;
        2.0 * (w + h)
    }

    /// Smallest box holding both inputs.
    pub fn combine(a: &Aabb, b: &Aabb) -> Aabb {
        Aabb {
            lower: a.lower.min(b.lower),
            upper: a.upper.max(b.upper),
        }
    }

    /// Does this box fully contain `other`.
    pub fn contains(&self, other: &Aabb) -> bool {
        self.lower.x <= other.lower.x
            && self.lower.y <= other.lower.y
            && other.upper.x <= self.upper.x
            && other.upper.y <= self.upper.y
    }

    /// Inclusive overlap test (touching boxes overlap).
    pub fn overlaps(&self, other: &Aabb) -> bool {
        let d1 = other.lower - self.upper;
        let d2 = self.lower - other.upper;
        !(d1.x > 0.0 || d1.y > 0.0 || d2.x > 0.0 || d2.y > 0.0)
    }

    /// Grow by `margin` on every side.
    pub fn expanded(&self, margin: f32) -> Aabb {
        let r = Vec2::splat(margin);
        Aabb {
            lower: self.lower - r,
            upper: self.upper + r,
        }
    }

    /// Slab-method ray cast. Reports the entering face normal.
    pub fn ray_cast(&self, input: &RayCastInput) -> Option<RayCastOutput> {
        let mut tmin = -f32::MAX;
        let mut tmax = f32::MAX;
        let mut normal = Vec2::ZERO;

        let p = input.p1;
        let d = input.p2 - input.p1;

        for axis in 0..2 {
            let (pi, di) = (p[axis], d[axis]);
            let (lo, hi) = (self.lower[axis], self.upper[axis]);
            if di.abs() < f32::EPSILON {
                // Parallel: origin must be inside the slab
                if pi < lo || hi < pi {
                    return None;
                }
            } else {
                let inv_d = 1.0 / di;
                let mut t1 = (lo - pi) * inv_d;
                let mut t2 = (hi - pi) * inv_d;
                let mut s = -1.0;
                if t1 > t2 {
                    core::mem::swap(&mut t1, &mut t2);
                    s = 1.0;
                }
                if t1 > tmin {
                    normal = Vec2::ZERO;
                    normal[axis] = s;
                    tmin = t1;
                }
                tmax = tmax.min(t2);
                if tmin > tmax {
                    return None;
                }
            }
        }

        // Starting inside the box or beyond the ray's reach is a miss
        if tmin < 0.0 || input.max_fraction < tmin {
            return None;
        }
        Some(RayCastOutput {
            normal,
            fraction: tmin,
        })
    }
}

/// Ray from `p1` towards `p2`, clipped at `p1 + max_fraction * (p2 - p1)`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RayCastInput {
    pub p1: Vec2,
    pub p2: Vec2,
    pub max_fraction: f32,
}

/// Hit at `p1 + fraction * (p2 - p1)`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RayCastOutput {
    pub normal: Vec2,
    pub fraction: f32,
}

/// Mass properties of a shape.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct MassData {
    pub mass: f32,
    /// Centroid relative to the shape origin.
    pub center: Vec2,
    /// Rotational inertia about the shape origin.
    pub inertia: f32,
}

/// Center-of-mass position of a solver body.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Position {
    pub c: Vec2,
    pub a: f32,
}

/// Linear and angular velocity of a solver body.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Velocity {
    pub v: Vec2,
    pub w: f32,
}

/// Numeric tunables for the contact pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Collision and constraint tolerance (meters). Keep small but above
    /// numerical noise.
    pub linear_slop: f32,
    /// Skin radius around polygons. Keeps polygons from resting exactly
    /// on each other, which stabilizes continuous collision.
    pub polygon_radius: f32,
    /// Fixed margin added around tree proxies.
    pub aabb_extension: f32,
    /// Predictive fattening along the displacement direction.
    pub aabb_multiplier: f32,
    /// Largest position correction applied per iteration.
    pub max_linear_correction: f32,
    /// Largest translation of a body per step.
    pub max_translation: f32,
    /// Largest rotation of a body per step.
    pub max_rotation: f32,
    /// Fraction of overlap resolved per position iteration.
    pub baumgarte: f32,
    pub toi_baumgarte: f32,
    /// Approach speed above which collisions become elastic.
    pub velocity_threshold: f32,
    pub velocity_iterations: u32,
    pub position_iterations: u32,
    /// Time-of-impact sub-steps per body per step.
    pub max_sub_steps: u32,
    /// Contacts considered per time-of-impact event.
    pub max_toi_contacts: usize,
    pub warm_starting: bool,
    pub continuous_physics: bool,
    /// Solve two-point manifolds as a 2x2 LCP.
    pub block_solve: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            linear_slop: DEFAULT_LINEAR_SLOP,
            polygon_radius: DEFAULT_POLYGON_RADIUS,
            aabb_extension: 0.1,
            aabb_multiplier: 4.0,
            max_linear_correction: 0.2,
            max_translation: 2.0,
            max_rotation: 0.5 * std::f32::consts::PI,
            baumgarte: 0.2,
            toi_baumgarte: 0.75,
            velocity_threshold: 1.0,
            velocity_iterations: 8,
            position_iterations: 3,
            max_sub_steps: 8,
            max_toi_contacts: 32,
            warm_starting: true,
            continuous_physics: true,
            block_solve: true,
        }
    }
}

impl Settings {
    /// Check that every tunable is in range.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &'static str, v: f32) -> Result<()> {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(Error::InvalidSettings {
                    name,
                    reason: format!("expected a positive finite value, got {v}"),
                })
            }
        }
        fn unit(name: &'static str, v: f32) -> Result<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(Error::InvalidSettings {
                    name,
                    reason: format!("expected a value in [0, 1], got {v}"),
                })
            }
        }

        positive("linear_slop", self.linear_slop)?;
        positive("aabb_extension", self.aabb_extension)?;
        positive("max_linear_correction", self.max_linear_correction)?;
        positive("max_translation", self.max_translation)?;
        positive("max_rotation", self.max_rotation)?;
        unit("baumgarte", self.baumgarte)?;
        unit("toi_baumgarte", self.toi_baumgarte)?;
        if !(self.polygon_radius >= 0.0 && self.polygon_radius.is_finite()) {
            return Err(Error::InvalidSettings {
                name: "polygon_radius",
                reason: format!("expected a non-negative value, got {}", self.polygon_radius),
            });
        }
        if !(self.aabb_multiplier >= 0.0) {
            return Err(Error::InvalidSettings {
                name: "aabb_multiplier",
                reason: format!("expected a non-negative value, got {}", self.aabb_multiplier),
            });
        }
        if !(self.velocity_threshold >= 0.0) {
            return Err(Error::InvalidSettings {
                name: "velocity_threshold",
                reason: format!("expected a non-negative value, got {}", self.velocity_threshold),
            });
        }
        if self.velocity_iterations == 0 {
            return Err(Error::InvalidSettings {
                name: "velocity_iterations",
                reason: "at least one iteration is required".into(),
            });
        }
        if self.max_toi_contacts == 0 {
            return Err(Error::InvalidSettings {
                name: "max_toi_contacts",
                reason: "at least one contact is required".into(),
            });
        }
        Ok(())
    }
}

/// Per-step timing and iteration counts handed to the solvers.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TimeStep {
    pub dt: f32,
    pub inv_dt: f32,
    /// `dt * inv_dt0`: scales warm-start impulses when the step size varies.
    pub dt_ratio: f32,
    pub velocity_iterations: u32,
    pub position_iterations: u32,
    pub warm_starting: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_overlap_is_inclusive() {
        let a = Aabb::new(Vec2::ZERO, Vec2::ONE);
        let b = Aabb::new(Vec2::new(1.0, 0.0), Vec2::new(2.0, 1.0));
        let c = Aabb::new(Vec2::new(1.01, 0.0), Vec2::new(2.0, 1.0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_aabb_combine_contains_both() {
        let a = Aabb::new(Vec2::new(-1.0, 0.0), Vec2::new(0.0, 1.0));
        let b = Aabb::new(Vec2::new(2.0, -3.0), Vec2::new(4.0, -2.0));
        let u = Aabb::combine(&a, &b);
        assert!(u.contains(&a) && u.contains(&b));
        assert!((u.perimeter() - 18.0).abs() < 1e-5);
    }

    #[test]
    fn test_aabb_ray_cast_hit() {
        let aabb = Aabb::new(Vec2::splat(-1.0), Vec2::splat(1.0));
        let input = RayCastInput {
            p1: Vec2::new(-5.0, 0.0),
            p2: Vec2::new(5.0, 0.0),
            max_fraction: 1.0,
        };
        let out = aabb.ray_cast(&input).unwrap();
        assert!((out.fraction - 0.4).abs() < 1e-5);
        assert_eq!(out.normal, Vec2::new(-1.0, 0.0));
    }

    #[test]
    fn test_aabb_ray_cast_parallel_miss_and_inside() {
        let aabb = Aabb::new(Vec2::splat(-1.0), Vec2::splat(1.0));
        let miss = RayCastInput {
            p1: Vec2::new(-5.0, 2.0),
            p2: Vec2::new(5.0, 2.0),
            max_fraction: 1.0,
        };
        assert!(aabb.ray_cast(&miss).is_none());
        let inside = RayCastInput {
            p1: Vec2::ZERO,
            p2: Vec2::new(5.0, 0.0),
            max_fraction: 1.0,
        };
        assert!(aabb.ray_cast(&inside).is_none());
    }

    #[test]
    fn test_layer_mask_exclude_wins() {
        let a = LayerMask {
            layer: 1,
            collides_with: 0b110,
            exclude: 0b100,
        };
        assert!(a.allows(LayerMask::simple(0b010, 1)));
        assert!(!a.allows(LayerMask::simple(0b100, 1)));
        assert!(!a.allows(LayerMask::simple(0b001, 1)));
    }

    #[test]
    fn test_layer_mask_mutual_needs_both_sides() {
        let player = LayerMask::simple(0b01, 0b10);
        let wall = LayerMask::simple(0b10, 0b01);
        let ghost = LayerMask::simple(0b10, 0b00);

        assert!(player.mutual(wall) && wall.mutual(player));
        // Player accepts the ghost, the ghost accepts nothing.
        assert!(player.allows(ghost));
        assert!(!player.mutual(ghost) && !ghost.mutual(player));

        let picky = LayerMask::default().excluding(0b10);
        assert!(!picky.mutual(wall));
        assert!(picky.mutual(LayerMask::default()));
    }

    #[test]
    fn test_settings_default_is_valid() {
        assert!(Settings::default().validate().is_ok());
        let bad = Settings {
            baumgarte: 1.5,
            ..Settings::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(Error::InvalidSettings { name: "baumgarte", .. })
        ));
    }

    #[test]
    fn test_settings_deserialize_partial() {
        let s: Settings = serde_json::from_str(r#"{ "velocity_iterations": 12 }"#).unwrap();
        assert_eq!(s.velocity_iterations, 12);
        assert_eq!(s.position_iterations, 3);
    }
}
