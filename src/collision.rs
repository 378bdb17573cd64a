//! Contact manifold data shared by narrow-phase and the solver.

use glam::Vec2;

use crate::math::Transform;
use crate::types::MAX_MANIFOLD_POINTS;

/// Which kind of feature a contact point came from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FeatureType {
    #[default]
    Vertex = 0,
    Face = 1,
}

/// Features that intersect to form a contact point.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ContactFeature {
    /// Feature index on shape A.
    pub index_a: u8,
    /// Feature index on shape B.
    pub index_b: u8,
    pub type_a: FeatureType,
    pub type_b: FeatureType,
}

impl ContactFeature {
    /// Exchange the A and B roles.
    pub fn swapped(self) -> Self {
        Self {
            index_a: self.index_b,
            index_b: self.index_a,
            type_a: self.type_b,
            type_b: self.type_a,
        }
    }
}

/// Persistent identity of a contact point, used to match points between
/// steps for warm starting. Not a spatial quantity.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ContactId {
    pub cf: ContactFeature,
}

impl ContactId {
    pub const ZERO: ContactId = ContactId {
        cf: ContactFeature {
            index_a: 0,
            index_b: 0,
            type_a: FeatureType::Vertex,
            type_b: FeatureType::Vertex,
        },
    };

    pub fn new(cf: ContactFeature) -> Self {
        Self { cf }
    }

    /// Packed feature bytes for fast comparison.
    pub fn key(&self) -> u32 {
        u32::from_le_bytes([
            self.cf.index_a,
            self.cf.index_b,
            self.cf.type_a as u8,
            self.cf.type_b as u8,
        ])
    }
}

/// A contact point in the reference frame that suits the manifold type:
/// * `Circles`: local center of circle B
/// * `FaceA`: local center of circle B or clip point of polygon B
/// * `FaceB`: clip point of polygon A
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ManifoldPoint {
    pub local_point: Vec2,
    /// Non-penetration impulse.
    pub normal_impulse: f32,
    /// Friction impulse.
    pub tangent_impulse: f32,
    pub id: ContactId,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ManifoldType {
    #[default]
    Circles,
    FaceA,
    FaceB,
}

/// Contact points for one shape pair, stored in local coordinates so they
/// survive small motions and can be re-evaluated by the position solver.
///
/// * `Circles`: `local_point` is the center of circle A, `local_normal` unused
/// * `FaceA`: `local_point`/`local_normal` lie on the reference face of A
/// * `FaceB`: `local_point`/`local_normal` lie on the reference face of B
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Manifold {
    pub points: [ManifoldPoint; MAX_MANIFOLD_POINTS],
    pub local_normal: Vec2,
    pub local_point: Vec2,
    pub kind: ManifoldType,
    pub point_count: usize,
}

impl Manifold {
    pub fn points(&self) -> &[ManifoldPoint] {
        &self.points[..self.point_count]
    }
}

/// World-space view of a manifold.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct WorldManifold {
    /// Points from A to B.
    pub normal: Vec2,
    /// Midpoints between the two surfaces.
    pub points: [Vec2; MAX_MANIFOLD_POINTS],
    /// Negative means overlap.
    pub separations: [f32; MAX_MANIFOLD_POINTS],
}

impl WorldManifold {
    /// Evaluate the manifold with the given transforms and skin radii.
    pub fn new(
        manifold: &Manifold,
        xf_a: &Transform,
        radius_a: f32,
        xf_b: &Transform,
        radius_b: f32,
    ) -> Self {
        let mut wm = WorldManifold::default();
        if manifold.point_count == 0 {
            return wm;
        }

        match manifold.kind {
            ManifoldType::Circles => {
                let mut normal = Vec2::new(1.0, 0.0);
                let point_a = xf_a.apply(manifold.local_point);
                let point_b = xf_b.apply(manifold.points[0].local_point);
                if point_a.distance_squared(point_b) > f32::EPSILON * f32::EPSILON {
                    normal = (point_b - point_a).normalize();
                }

                let c_a = point_a + radius_a * normal;
                let c_b = point_b - radius_b * normal;
                wm.normal = normal;
                wm.points[0] = 0.5 * (c_a + c_b);
                wm.separations[0] = (c_b - c_a).dot(normal);
            }
            ManifoldType::FaceA => {
                let normal = xf_a.q.apply(manifold.local_normal);
                let plane_point = xf_a.apply(manifold.local_point);

                for i in 0..manifold.point_count {
                    let clip_point = xf_b.apply(manifold.points[i].local_point);
                    let c_a = clip_point
                        + (radius_a - (clip_point - plane_point).dot(normal)) * normal;
                    let c_b = clip_point - radius_b * normal;
                    wm.points[i] = 0.5 * (c_a + c_b);
                    wm.separations[i] = (c_b - c_a).dot(normal);
                }
                wm.normal = normal;
            }
            ManifoldType::FaceB => {
                let normal = xf_b.q.apply(manifold.local_normal);
                let plane_point = xf_b.apply(manifold.local_point);

                for i in 0..manifold.point_count {
                    let clip_point = xf_a.apply(manifold.points[i].local_point);
                    let c_b = clip_point
                        + (radius_b - (clip_point - plane_point).dot(normal)) * normal;
                    let c_a = clip_point - radius_a * normal;
                    wm.points[i] = 0.5 * (c_a + c_b);
                    wm.separations[i] = (c_a - c_b).dot(normal);
                }

                // Ensure normal points from A to B
                wm.normal = -normal;
            }
        }
        wm
    }
}

/// Lifecycle of a manifold point between two updates.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PointState {
    /// Point does not exist.
    #[default]
    Null,
    /// Point was added in the update.
    Add,
    /// Point persisted across the update.
    Persist,
    /// Point was removed in the update.
    Remove,
}

/// Classify points of `manifold1` (old) and `manifold2` (new) by matching
/// contact ids.
pub fn get_point_states(
    manifold1: &Manifold,
    manifold2: &Manifold,
) -> ([PointState; MAX_MANIFOLD_POINTS], [PointState; MAX_MANIFOLD_POINTS]) {
    let mut state1 = [PointState::Null; MAX_MANIFOLD_POINTS];
    let mut state2 = [PointState::Null; MAX_MANIFOLD_POINTS];

    // Detect persists and removes
    for (i, p1) in manifold1.points().iter().enumerate() {
        let key = p1.id.key();
        state1[i] = if manifold2.points().iter().any(|p2| p2.id.key() == key) {
            PointState::Persist
        } else {
            PointState::Remove
        };
    }

    // Detect persists and adds
    for (i, p2) in manifold2.points().iter().enumerate() {
        let key = p2.id.key();
        state2[i] = if manifold1.points().iter().any(|p1| p1.id.key() == key) {
            PointState::Persist
        } else {
            PointState::Add
        };
    }

    (state1, state2)
}

/// Vertex used during polygon clipping.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ClipVertex {
    pub v: Vec2,
    pub id: ContactId,
}

/// Sutherland-Hodgman clipping of a segment against the half-space
/// `dot(normal, x) - offset <= 0`. Returns the clipped vertices and their
/// count (a count below 2 means the segment fell outside).
pub fn clip_segment_to_line(
    v_in: &[ClipVertex; 2],
    normal: Vec2,
    offset: f32,
    vertex_index_a: u8,
) -> ([ClipVertex; 2], usize) {
    let mut v_out = [ClipVertex::default(); 2];
    let mut count = 0;

    // Distance of end points to the line
    let distance0 = normal.dot(v_in[0].v) - offset;
    let distance1 = normal.dot(v_in[1].v) - offset;

    // Points behind the plane are kept
    if distance0 <= 0.0 {
        v_out[count] = v_in[0];
        count += 1;
    }
    if distance1 <= 0.0 {
        v_out[count] = v_in[1];
        count += 1;
    }

    // Points on different sides of the plane
    if distance0 * distance1 < 0.0 {
        let interp = distance0 / (distance0 - distance1);
        v_out[count].v = v_in[0].v + interp * (v_in[1].v - v_in[0].v);

        // VertexA is hitting edgeB
        v_out[count].id = ContactId::new(ContactFeature {
            index_a: vertex_index_a,
            index_b: v_in[0].id.cf.index_b,
            type_a: FeatureType::Vertex,
            type_b: FeatureType::Face,
        });
        count += 1;

        debug_assert_eq!(count, 2);
    }

    (v_out, count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_with_key(index_a: u8, index_b: u8) -> ManifoldPoint {
        ManifoldPoint {
            id: ContactId::new(ContactFeature {
                index_a,
                index_b,
                type_a: FeatureType::Vertex,
                type_b: FeatureType::Face,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_contact_id_key_packs_all_bytes() {
        let id = ContactId::new(ContactFeature {
            index_a: 1,
            index_b: 2,
            type_a: FeatureType::Face,
            type_b: FeatureType::Vertex,
        });
        assert_eq!(id.key(), 0x0001_0201);
        assert_eq!(ContactId::ZERO.key(), 0);
        assert_ne!(id.key(), ContactId::new(id.cf.swapped()).key());
    }

    #[test]
    fn test_clip_segment_keeps_inside_and_interpolates() {
        let v_in = [
            ClipVertex {
                v: Vec2::new(-1.0, 0.0),
                id: ContactId::ZERO,
            },
            ClipVertex {
                v: Vec2::new(3.0, 0.0),
                id: ContactId::ZERO,
            },
        ];
        let (out, count) = clip_segment_to_line(&v_in, Vec2::new(1.0, 0.0), 1.0, 7);
        assert_eq!(count, 2);
        assert_eq!(out[0].v, Vec2::new(-1.0, 0.0));
        assert!((out[1].v - Vec2::new(1.0, 0.0)).length() < 1e-6);
        assert_eq!(out[1].id.cf.index_a, 7);
        assert_eq!(out[1].id.cf.type_b, FeatureType::Face);
    }

    #[test]
    fn test_clip_segment_fully_outside() {
        let v_in = [
            ClipVertex {
                v: Vec2::new(2.0, 0.0),
                id: ContactId::ZERO,
            },
            ClipVertex {
                v: Vec2::new(3.0, 0.0),
                id: ContactId::ZERO,
            },
        ];
        let (_, count) = clip_segment_to_line(&v_in, Vec2::new(1.0, 0.0), 1.0, 0);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_point_states() {
        let mut m1 = Manifold {
            point_count: 2,
            ..Default::default()
        };
        m1.points[0] = point_with_key(0, 1);
        m1.points[1] = point_with_key(1, 1);
        let mut m2 = Manifold {
            point_count: 2,
            ..Default::default()
        };
        m2.points[0] = point_with_key(1, 1);
        m2.points[1] = point_with_key(2, 1);

        let (s1, s2) = get_point_states(&m1, &m2);
        assert_eq!(s1, [PointState::Remove, PointState::Persist]);
        assert_eq!(s2, [PointState::Persist, PointState::Add]);
    }

    #[test]
    fn test_world_manifold_circles() {
        let mut m = Manifold {
            kind: ManifoldType::Circles,
            point_count: 1,
            ..Default::default()
        };
        m.points[0].local_point = Vec2::ZERO;
        let xf_a = Transform::IDENTITY;
        let xf_b = Transform::new(Vec2::new(1.5, 0.0), 0.0);
        let wm = WorldManifold::new(&m, &xf_a, 1.0, &xf_b, 1.0);
        assert!((wm.normal - Vec2::new(1.0, 0.0)).length() < 1e-6);
        assert!((wm.separations[0] + 0.5).abs() < 1e-6);
        assert!((wm.points[0] - Vec2::new(0.75, 0.0)).length() < 1e-6);
    }
}
