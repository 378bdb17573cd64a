//! Narrow-phase manifold generators.
//!
//! Every generator is pure: it reads two shapes and their transforms and
//! returns a manifold with `point_count == 0` when the shapes are apart.
//! Contact ids record the features that produced each point so the solver
//! can match points across steps.

use glam::Vec2;

use crate::collision::*;
use crate::math::{Transform, cross, cross_vs};
use crate::shapes::{ChainShape, CircleShape, EdgeShape, PolygonShape, Shape, ShapeType};
use crate::types::{MAX_MANIFOLD_POINTS, MAX_POLYGON_VERTICES};

/// Relative tolerance for picking the reference face. Keeps the normal from
/// flapping between nearly equal separations.
const RELATIVE_TOL: f32 = 0.98;
/// Absolute tolerance for picking the reference face.
const ABSOLUTE_TOL: f32 = 0.001;

/// Is there a manifold generator for this shape-type pair, and does it
/// expect the shapes in swapped order. `None` means the pair never collides.
pub fn contact_order(a: ShapeType, b: ShapeType) -> Option<bool> {
    use ShapeType::*;
    match (a, b) {
        (Circle, Circle)
        | (Edge, Circle)
        | (Polygon, Circle)
        | (Polygon, Polygon)
        | (Edge, Polygon)
        | (Chain, Circle)
        | (Chain, Polygon) => Some(false),
        (Circle, Edge)
        | (Circle, Polygon)
        | (Polygon, Edge)
        | (Circle, Chain)
        | (Polygon, Chain) => Some(true),
        (Edge, Edge) | (Edge, Chain) | (Chain, Edge) | (Chain, Chain) => None,
    }
}

/// Evaluate the manifold for two shape children already in generator order
/// (see [`contact_order`]).
pub fn collide(
    shape_a: &Shape,
    child_a: usize,
    xf_a: &Transform,
    shape_b: &Shape,
    _child_b: usize,
    xf_b: &Transform,
) -> Manifold {
    debug_assert_eq!(
        contact_order(shape_a.shape_type(), shape_b.shape_type()),
        Some(false)
    );
    match (shape_a, shape_b) {
        (Shape::Circle(a), Shape::Circle(b)) => collide_circles(a, xf_a, b, xf_b),
        (Shape::Polygon(a), Shape::Circle(b)) => collide_polygon_and_circle(a, xf_a, b, xf_b),
        (Shape::Polygon(a), Shape::Polygon(b)) => collide_polygons(a, xf_a, b, xf_b),
        (Shape::Edge(a), Shape::Circle(b)) => collide_edge_and_circle(a, xf_a, b, xf_b),
        (Shape::Edge(a), Shape::Polygon(b)) => collide_edge_and_polygon(a, xf_a, b, xf_b),
        (Shape::Chain(a), Shape::Circle(b)) => collide_chain_and_circle(a, child_a, xf_a, b, xf_b),
        (Shape::Chain(a), Shape::Polygon(b)) => {
            collide_chain_and_polygon(a, child_a, xf_a, b, xf_b)
        }
        _ => Manifold::default(),
    }
}

/// Circle vs circle. Touching circles count as contact.
pub fn collide_circles(
    circle_a: &CircleShape,
    xf_a: &Transform,
    circle_b: &CircleShape,
    xf_b: &Transform,
) -> Manifold {
    let mut manifold = Manifold::default();

    let p_a = xf_a.apply(circle_a.p);
    let p_b = xf_b.apply(circle_b.p);

    let d = p_b - p_a;
    let dist_sqr = d.dot(d);
    let radius = circle_a.radius + circle_b.radius;
    if dist_sqr > radius * radius {
        return manifold;
    }

    manifold.kind = ManifoldType::Circles;
    manifold.local_point = circle_a.p;
    manifold.local_normal = Vec2::ZERO;
    manifold.point_count = 1;

    manifold.points[0].local_point = circle_b.p;
    manifold.points[0].id = ContactId::ZERO;
    manifold
}

/// Polygon vs circle, computed in the polygon's frame.
pub fn collide_polygon_and_circle(
    polygon_a: &PolygonShape,
    xf_a: &Transform,
    circle_b: &CircleShape,
    xf_b: &Transform,
) -> Manifold {
    let mut manifold = Manifold::default();

    // Circle position in the frame of the polygon
    let c = xf_b.apply(circle_b.p);
    let c_local = xf_a.apply_inv(c);

    // Find the min separating edge
    let mut normal_index = 0;
    let mut separation = -f32::MAX;
    let radius = polygon_a.radius + circle_b.radius;
    let vertices = polygon_a.vertices();
    let normals = polygon_a.normals();

    for i in 0..vertices.len() {
        let s = normals[i].dot(c_local - vertices[i]);
        if s > radius {
            // Early out
            return manifold;
        }
        if s > separation {
            separation = s;
            normal_index = i;
        }
    }

    // Vertices that subtend the incident face
    let vert_index1 = normal_index;
    let vert_index2 = if vert_index1 + 1 < vertices.len() {
        vert_index1 + 1
    } else {
        0
    };
    let v1 = vertices[vert_index1];
    let v2 = vertices[vert_index2];

    // Center is inside the polygon
    if separation < f32::EPSILON {
        manifold.point_count = 1;
        manifold.kind = ManifoldType::FaceA;
        manifold.local_normal = normals[normal_index];
        manifold.local_point = 0.5 * (v1 + v2);
        manifold.points[0].local_point = circle_b.p;
        manifold.points[0].id = ContactId::ZERO;
        return manifold;
    }

    // Barycentric coordinates
    let u1 = (c_local - v1).dot(v2 - v1);
    let u2 = (c_local - v2).dot(v1 - v2);
    if u1 <= 0.0 {
        if c_local.distance_squared(v1) > radius * radius {
            return manifold;
        }
        manifold.point_count = 1;
        manifold.kind = ManifoldType::FaceA;
        manifold.local_normal = (c_local - v1).normalize_or_zero();
        manifold.local_point = v1;
    } else if u2 <= 0.0 {
        if c_local.distance_squared(v2) > radius * radius {
            return manifold;
        }
        manifold.point_count = 1;
        manifold.kind = ManifoldType::FaceA;
        manifold.local_normal = (c_local - v2).normalize_or_zero();
        manifold.local_point = v2;
    } else {
        let face_center = 0.5 * (v1 + v2);
        let s = (c_local - face_center).dot(normals[vert_index1]);
        if s > radius {
            return manifold;
        }
        manifold.point_count = 1;
        manifold.kind = ManifoldType::FaceA;
        manifold.local_normal = normals[vert_index1];
        manifold.local_point = face_center;
    }
    manifold.points[0].local_point = circle_b.p;
    manifold.points[0].id = ContactId::ZERO;
    manifold
}

// Separation of `poly2` along the normal of `edge1` on `poly1`, measured
// from the deepest vertex of `poly2`.
fn edge_separation(
    poly1: &PolygonShape,
    xf1: &Transform,
    edge1: usize,
    poly2: &PolygonShape,
    xf2: &Transform,
) -> f32 {
    let vertices1 = poly1.vertices();
    let normals1 = poly1.normals();
    let vertices2 = poly2.vertices();

    // Convert normal from poly1's frame into poly2's frame
    let normal1_world = xf1.q.apply(normals1[edge1]);
    let normal1 = xf2.q.apply_inv(normal1_world);

    // Find support vertex on poly2 for -normal
    let mut index = 0;
    let mut min_dot = f32::MAX;
    for (i, v) in vertices2.iter().enumerate() {
        let dot = v.dot(normal1);
        if dot < min_dot {
            min_dot = dot;
            index = i;
        }
    }

    let v1 = xf1.apply(vertices1[edge1]);
    let v2 = xf2.apply(vertices2[index]);
    (v2 - v1).dot(normal1_world)
}

// Max separation between poly1 and poly2 using edge normals from poly1.
// Starts at the edge facing poly2's centroid and hill-climbs to neighbours.
fn find_max_separation(
    poly1: &PolygonShape,
    xf1: &Transform,
    poly2: &PolygonShape,
    xf2: &Transform,
) -> (usize, f32) {
    let count1 = poly1.count();
    let normals1 = poly1.normals();

    // Vector pointing from the centroid of poly1 to the centroid of poly2
    let d = xf2.apply(poly2.centroid) - xf1.apply(poly1.centroid);
    let d_local1 = xf1.q.apply_inv(d);

    // Edge normal on poly1 with the largest projection onto d
    let mut edge = 0;
    let mut max_dot = -f32::MAX;
    for (i, n) in normals1.iter().enumerate() {
        let dot = n.dot(d_local1);
        if dot > max_dot {
            max_dot = dot;
            edge = i;
        }
    }

    let s = edge_separation(poly1, xf1, edge, poly2, xf2);

    let prev_edge = if edge > 0 { edge - 1 } else { count1 - 1 };
    let s_prev = edge_separation(poly1, xf1, prev_edge, poly2, xf2);

    let next_edge = if edge + 1 < count1 { edge + 1 } else { 0 };
    let s_next = edge_separation(poly1, xf1, next_edge, poly2, xf2);

    // Find the best edge and the search direction
    let (forward, mut best_edge, mut best_separation) = if s_prev > s && s_prev > s_next {
        (false, prev_edge, s_prev)
    } else if s_next > s {
        (true, next_edge, s_next)
    } else {
        return (edge, s);
    };

    // Local search; separation is unimodal around a convex polygon
    for _ in 0..count1 {
        let edge = if forward {
            if best_edge + 1 < count1 { best_edge + 1 } else { 0 }
        } else if best_edge > 0 {
            best_edge - 1
        } else {
            count1 - 1
        };

        let s = edge_separation(poly1, xf1, edge, poly2, xf2);
        if s > best_separation {
            best_edge = edge;
            best_separation = s;
        } else {
            break;
        }
    }

    (best_edge, best_separation)
}

// The incident edge on poly2 is the one most anti-parallel to the
// reference normal.
fn find_incident_edge(
    poly1: &PolygonShape,
    xf1: &Transform,
    edge1: usize,
    poly2: &PolygonShape,
    xf2: &Transform,
) -> [ClipVertex; 2] {
    let normals1 = poly1.normals();
    let vertices2 = poly2.vertices();
    let normals2 = poly2.normals();
    let count2 = poly2.count();

    debug_assert!(edge1 < poly1.count());

    // Reference edge normal in poly2's frame
    let normal1 = xf2.q.apply_inv(xf1.q.apply(normals1[edge1]));

    let mut index = 0;
    let mut min_dot = f32::MAX;
    for (i, n) in normals2.iter().enumerate() {
        let dot = normal1.dot(*n);
        if dot < min_dot {
            min_dot = dot;
            index = i;
        }
    }

    let i1 = index;
    let i2 = if i1 + 1 < count2 { i1 + 1 } else { 0 };

    let clip = |i: usize| ClipVertex {
        v: xf2.apply(vertices2[i]),
        id: ContactId::new(ContactFeature {
            index_a: edge1 as u8,
            index_b: i as u8,
            type_a: FeatureType::Face,
            type_b: FeatureType::Vertex,
        }),
    };
    [clip(i1), clip(i2)]
}

/// Polygon vs polygon via the separating axis test, then clipping.
///
/// * Find the edge normal of max separation on A; exit if separating.
/// * Find the edge normal of max separation on B; exit if separating.
/// * Pick the reference face with a hysteresis rule.
/// * Clip the incident edge against the reference face side planes.
/// * Keep points within the combined skin radius of the reference face.
pub fn collide_polygons(
    poly_a: &PolygonShape,
    xf_a: &Transform,
    poly_b: &PolygonShape,
    xf_b: &Transform,
) -> Manifold {
    let mut manifold = Manifold::default();
    let total_radius = poly_a.radius + poly_b.radius;

    let (edge_a, separation_a) = find_max_separation(poly_a, xf_a, poly_b, xf_b);
    if separation_a > total_radius {
        return manifold;
    }

    let (edge_b, separation_b) = find_max_separation(poly_b, xf_b, poly_a, xf_a);
    if separation_b > total_radius {
        return manifold;
    }

    let (poly1, poly2, xf1, xf2, edge1, flip) =
        if separation_b > RELATIVE_TOL * separation_a + ABSOLUTE_TOL {
            manifold.kind = ManifoldType::FaceB;
            (poly_b, poly_a, xf_b, xf_a, edge_b, true)
        } else {
            manifold.kind = ManifoldType::FaceA;
            (poly_a, poly_b, xf_a, xf_b, edge_a, false)
        };

    let incident_edge = find_incident_edge(poly1, xf1, edge1, poly2, xf2);

    let count1 = poly1.count();
    let vertices1 = poly1.vertices();

    let iv1 = edge1;
    let iv2 = if edge1 + 1 < count1 { edge1 + 1 } else { 0 };

    let mut v11 = vertices1[iv1];
    let mut v12 = vertices1[iv2];

    let local_tangent = (v12 - v11).normalize();
    let local_normal = cross_vs(local_tangent, 1.0);
    let plane_point = 0.5 * (v11 + v12);

    let tangent = xf1.q.apply(local_tangent);
    let normal = cross_vs(tangent, 1.0);

    v11 = xf1.apply(v11);
    v12 = xf1.apply(v12);

    // Face offset
    let front_offset = normal.dot(v11);

    // Side offsets, extended by the skin so points just outside still count
    let side_offset1 = -tangent.dot(v11) + total_radius;
    let side_offset2 = tangent.dot(v12) + total_radius;

    // Clip incident edge against extruded edge1 side edges
    let (clip_points1, np) = clip_segment_to_line(&incident_edge, -tangent, side_offset1, iv1 as u8);
    if np < 2 {
        return manifold;
    }

    let (clip_points2, np) = clip_segment_to_line(&clip_points1, tangent, side_offset2, iv2 as u8);
    if np < 2 {
        return manifold;
    }

    manifold.local_normal = local_normal;
    manifold.local_point = plane_point;

    let mut point_count = 0;
    for cv in clip_points2.iter().take(MAX_MANIFOLD_POINTS) {
        let separation = normal.dot(cv.v) - front_offset;
        if separation <= total_radius {
            let cp = &mut manifold.points[point_count];
            cp.local_point = xf2.apply_inv(cv.v);
            cp.id = if flip {
                ContactId::new(cv.id.cf.swapped())
            } else {
                cv.id
            };
            point_count += 1;
        }
    }

    manifold.point_count = point_count;
    manifold
}

/// Edge vs circle. One-sided edges reject the back side and the vertex
/// regions owned by their neighbours.
pub fn collide_edge_and_circle(
    edge_a: &EdgeShape,
    xf_a: &Transform,
    circle_b: &CircleShape,
    xf_b: &Transform,
) -> Manifold {
    let mut manifold = Manifold::default();

    // Circle in frame of edge
    let q = xf_a.apply_inv(xf_b.apply(circle_b.p));

    let a = edge_a.v1;
    let b = edge_a.v2;
    let e = b - a;

    // Normal points to the right for a CCW winding
    let mut n = Vec2::new(e.y, -e.x);
    let offset = n.dot(q - a);

    if edge_a.one_sided && offset < 0.0 {
        return manifold;
    }

    // Barycentric coordinates
    let u = e.dot(b - q);
    let v = e.dot(q - a);

    let radius = edge_a.radius + circle_b.radius;

    let mut cf = ContactFeature {
        index_b: 0,
        type_b: FeatureType::Vertex,
        ..Default::default()
    };

    // Region A
    if v <= 0.0 {
        let p = a;
        let d = q - p;
        if d.dot(d) > radius * radius {
            return manifold;
        }

        // Is there an edge connected to A?
        if edge_a.one_sided {
            let a1 = edge_a.v0;
            let b1 = a;
            let e1 = b1 - a1;
            let u1 = e1.dot(b1 - q);

            // Is the circle in Region AB of the previous edge?
            if u1 > 0.0 {
                return manifold;
            }
        }

        cf.index_a = 0;
        cf.type_a = FeatureType::Vertex;
        manifold.point_count = 1;
        manifold.kind = ManifoldType::Circles;
        manifold.local_normal = Vec2::ZERO;
        manifold.local_point = p;
        manifold.points[0].id = ContactId::new(cf);
        manifold.points[0].local_point = circle_b.p;
        return manifold;
    }

    // Region B
    if u <= 0.0 {
        let p = b;
        let d = q - p;
        if d.dot(d) > radius * radius {
            return manifold;
        }

        // Is there an edge connected to B?
        if edge_a.one_sided {
            let b2 = edge_a.v3;
            let a2 = b;
            let e2 = b2 - a2;
            let v2 = e2.dot(q - a2);

            // Is the circle in Region AB of the next edge?
            if v2 > 0.0 {
                return manifold;
            }
        }

        cf.index_a = 1;
        cf.type_a = FeatureType::Vertex;
        manifold.point_count = 1;
        manifold.kind = ManifoldType::Circles;
        manifold.local_normal = Vec2::ZERO;
        manifold.local_point = p;
        manifold.points[0].id = ContactId::new(cf);
        manifold.points[0].local_point = circle_b.p;
        return manifold;
    }

    // Region AB
    let den = e.dot(e);
    debug_assert!(den > 0.0);
    let p = (1.0 / den) * (u * a + v * b);
    let d = q - p;
    if d.dot(d) > radius * radius {
        return manifold;
    }

    if offset < 0.0 {
        n = -n;
    }
    n = n.normalize();

    cf.index_a = 0;
    cf.type_a = FeatureType::Face;
    manifold.point_count = 1;
    manifold.kind = ManifoldType::FaceA;
    manifold.local_normal = n;
    manifold.local_point = a;
    manifold.points[0].id = ContactId::new(cf);
    manifold.points[0].local_point = circle_b.p;
    manifold
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum AxisKind {
    Unknown,
    EdgeA,
    EdgeB,
}

#[derive(Copy, Clone, Debug)]
struct EpAxis {
    normal: Vec2,
    kind: AxisKind,
    index: usize,
    separation: f32,
}

// Polygon B expressed in the frame of edge A.
struct TempPolygon {
    vertices: [Vec2; MAX_POLYGON_VERTICES],
    normals: [Vec2; MAX_POLYGON_VERTICES],
    count: usize,
}

struct ReferenceFace {
    i1: usize,
    i2: usize,
    v1: Vec2,
    v2: Vec2,
    normal: Vec2,
    side_normal1: Vec2,
    side_offset1: f32,
    side_normal2: Vec2,
    side_offset2: f32,
}

fn compute_edge_separation(polygon_b: &TempPolygon, v1: Vec2, normal1: Vec2) -> EpAxis {
    let mut axis = EpAxis {
        normal: Vec2::ZERO,
        kind: AxisKind::EdgeA,
        index: 0,
        separation: -f32::MAX,
    };

    let axes = [normal1, -normal1];

    // Axis with least overlap (min-max problem)
    for (j, ax) in axes.iter().enumerate() {
        let mut sj = f32::MAX;

        // Deepest polygon vertex along axis j
        for v in &polygon_b.vertices[..polygon_b.count] {
            let si = ax.dot(*v - v1);
            if si < sj {
                sj = si;
            }
        }

        if sj > axis.separation {
            axis.index = j;
            axis.separation = sj;
            axis.normal = *ax;
        }
    }
    axis
}

fn compute_polygon_separation(polygon_b: &TempPolygon, v1: Vec2, v2: Vec2) -> EpAxis {
    let mut axis = EpAxis {
        normal: Vec2::ZERO,
        kind: AxisKind::Unknown,
        index: 0,
        separation: -f32::MAX,
    };

    for i in 0..polygon_b.count {
        let n = -polygon_b.normals[i];

        let s1 = n.dot(polygon_b.vertices[i] - v1);
        let s2 = n.dot(polygon_b.vertices[i] - v2);
        let s = s1.min(s2);

        if s > axis.separation {
            axis.kind = AxisKind::EdgeB;
            axis.index = i;
            axis.separation = s;
            axis.normal = n;
        }
    }
    axis
}

/// Edge vs polygon with one-sided smooth collision. Ghost vertices decide
/// whether a normal on a shared joint belongs to this edge or a neighbour,
/// which removes ghost collisions at internal vertices of a chain.
pub fn collide_edge_and_polygon(
    edge_a: &EdgeShape,
    xf_a: &Transform,
    polygon_b: &PolygonShape,
    xf_b: &Transform,
) -> Manifold {
    let mut manifold = Manifold::default();

    let xf = xf_a.mul_t(xf_b);

    let centroid_b = xf.apply(polygon_b.centroid);

    let v1 = edge_a.v1;
    let v2 = edge_a.v2;

    let edge1 = (v2 - v1).normalize_or_zero();

    // Normal points to the right for a CCW winding
    let normal1 = Vec2::new(edge1.y, -edge1.x);
    let offset1 = normal1.dot(centroid_b - v1);

    let one_sided = edge_a.one_sided;
    if one_sided && offset1 < 0.0 {
        return manifold;
    }

    // Polygon B in frame A
    let mut temp = TempPolygon {
        vertices: [Vec2::ZERO; MAX_POLYGON_VERTICES],
        normals: [Vec2::ZERO; MAX_POLYGON_VERTICES],
        count: polygon_b.count(),
    };
    for i in 0..temp.count {
        temp.vertices[i] = xf.apply(polygon_b.vertices()[i]);
        temp.normals[i] = xf.q.apply(polygon_b.normals()[i]);
    }

    let radius = polygon_b.radius + edge_a.radius;

    let edge_axis = compute_edge_separation(&temp, v1, normal1);
    if edge_axis.separation > radius {
        return manifold;
    }

    let polygon_axis = compute_polygon_separation(&temp, v1, v2);
    if polygon_axis.separation > radius {
        return manifold;
    }

    // Hysteresis for jitter reduction
    let mut primary_axis = if polygon_axis.separation - radius
        > RELATIVE_TOL * (edge_axis.separation - radius) + ABSOLUTE_TOL
    {
        polygon_axis
    } else {
        edge_axis
    };

    if one_sided {
        // Smooth collision against the Gauss map of the edge and its neighbours
        let edge0 = (v1 - edge_a.v0).normalize_or_zero();
        let normal0 = Vec2::new(edge0.y, -edge0.x);
        let convex1 = cross(edge0, edge1) >= 0.0;

        let edge2 = (edge_a.v3 - v2).normalize_or_zero();
        let normal2 = Vec2::new(edge2.y, -edge2.x);
        let convex2 = cross(edge1, edge2) >= 0.0;

        const SIN_TOL: f32 = 0.1;
        let side1 = primary_axis.normal.dot(edge1) <= 0.0;

        if side1 {
            if convex1 {
                if cross(primary_axis.normal, normal0) > SIN_TOL {
                    // Skip region
                    return manifold;
                }
                // Admit region
            } else {
                // Snap region
                primary_axis = edge_axis;
            }
        } else if convex2 {
            if cross(normal2, primary_axis.normal) > SIN_TOL {
                // Skip region
                return manifold;
            }
            // Admit region
        } else {
            // Snap region
            primary_axis = edge_axis;
        }
    }

    let mut clip_points = [ClipVertex::default(); 2];
    let mut rf;
    if primary_axis.kind == AxisKind::EdgeA {
        manifold.kind = ManifoldType::FaceA;

        // Polygon normal most anti-parallel to the edge normal
        let mut best_index = 0;
        let mut best_value = primary_axis.normal.dot(temp.normals[0]);
        for i in 1..temp.count {
            let value = primary_axis.normal.dot(temp.normals[i]);
            if value < best_value {
                best_value = value;
                best_index = i;
            }
        }

        let i1 = best_index;
        let i2 = if i1 + 1 < temp.count { i1 + 1 } else { 0 };

        clip_points[0] = ClipVertex {
            v: temp.vertices[i1],
            id: ContactId::new(ContactFeature {
                index_a: 0,
                index_b: i1 as u8,
                type_a: FeatureType::Face,
                type_b: FeatureType::Vertex,
            }),
        };
        clip_points[1] = ClipVertex {
            v: temp.vertices[i2],
            id: ContactId::new(ContactFeature {
                index_a: 0,
                index_b: i2 as u8,
                type_a: FeatureType::Face,
                type_b: FeatureType::Vertex,
            }),
        };

        rf = ReferenceFace {
            i1: 0,
            i2: 1,
            v1,
            v2,
            normal: primary_axis.normal,
            side_normal1: -edge1,
            side_offset1: 0.0,
            side_normal2: edge1,
            side_offset2: 0.0,
        };
    } else {
        manifold.kind = ManifoldType::FaceB;

        clip_points[0] = ClipVertex {
            v: v2,
            id: ContactId::new(ContactFeature {
                index_a: 1,
                index_b: primary_axis.index as u8,
                type_a: FeatureType::Vertex,
                type_b: FeatureType::Face,
            }),
        };
        clip_points[1] = ClipVertex {
            v: v1,
            id: ContactId::new(ContactFeature {
                index_a: 0,
                index_b: primary_axis.index as u8,
                type_a: FeatureType::Vertex,
                type_b: FeatureType::Face,
            }),
        };

        let i1 = primary_axis.index;
        let i2 = if i1 + 1 < temp.count { i1 + 1 } else { 0 };
        let normal = temp.normals[i1];

        // CCW winding
        let side_normal1 = Vec2::new(normal.y, -normal.x);
        rf = ReferenceFace {
            i1,
            i2,
            v1: temp.vertices[i1],
            v2: temp.vertices[i2],
            normal,
            side_normal1,
            side_offset1: 0.0,
            side_normal2: -side_normal1,
            side_offset2: 0.0,
        };
    }

    rf.side_offset1 = rf.side_normal1.dot(rf.v1);
    rf.side_offset2 = rf.side_normal2.dot(rf.v2);

    // Clip incident edge against reference face side planes
    let (clip_points1, np) =
        clip_segment_to_line(&clip_points, rf.side_normal1, rf.side_offset1, rf.i1 as u8);
    if np < MAX_MANIFOLD_POINTS {
        return manifold;
    }

    let (clip_points2, np) =
        clip_segment_to_line(&clip_points1, rf.side_normal2, rf.side_offset2, rf.i2 as u8);
    if np < MAX_MANIFOLD_POINTS {
        return manifold;
    }

    if primary_axis.kind == AxisKind::EdgeA {
        manifold.local_normal = rf.normal;
        manifold.local_point = rf.v1;
    } else {
        manifold.local_normal = polygon_b.normals()[rf.i1];
        manifold.local_point = polygon_b.vertices()[rf.i1];
    }

    let mut point_count = 0;
    for cv in &clip_points2 {
        let separation = rf.normal.dot(cv.v - rf.v1);
        if separation <= radius {
            let cp = &mut manifold.points[point_count];
            if primary_axis.kind == AxisKind::EdgeA {
                cp.local_point = xf.apply_inv(cv.v);
                cp.id = cv.id;
            } else {
                cp.local_point = cv.v;
                cp.id = ContactId::new(cv.id.cf.swapped());
            }
            point_count += 1;
        }
    }

    manifold.point_count = point_count;
    manifold
}

/// Chain child edge vs circle.
pub fn collide_chain_and_circle(
    chain_a: &ChainShape,
    child_a: usize,
    xf_a: &Transform,
    circle_b: &CircleShape,
    xf_b: &Transform,
) -> Manifold {
    let edge = chain_a.child_edge(child_a);
    collide_edge_and_circle(&edge, xf_a, circle_b, xf_b)
}

/// Chain child edge vs polygon.
pub fn collide_chain_and_polygon(
    chain_a: &ChainShape,
    child_a: usize,
    xf_a: &Transform,
    polygon_b: &PolygonShape,
    xf_b: &Transform,
) -> Manifold {
    let edge = chain_a.child_edge(child_a);
    collide_edge_and_polygon(&edge, xf_a, polygon_b, xf_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_manifold(
        m: &Manifold,
        xf_a: &Transform,
        ra: f32,
        xf_b: &Transform,
        rb: f32,
    ) -> WorldManifold {
        WorldManifold::new(m, xf_a, ra, xf_b, rb)
    }

    #[test]
    fn test_circles_touch_iff_within_radii() {
        let a = CircleShape::new(Vec2::ZERO, 0.5);
        let b = CircleShape::new(Vec2::new(0.25, -0.1), 0.75);
        let xf_a = Transform::IDENTITY;
        for d in [0.5, 1.0, 1.24, 1.25, 1.26, 3.0] {
            // Place B so its center is exactly `d` away from A's center
            let xf_b = Transform::new(Vec2::new(d, 0.0) - b.p, 0.0);
            let m = collide_circles(&a, &xf_a, &b, &xf_b);
            let expected = if d <= 1.25 { 1 } else { 0 };
            assert_eq!(m.point_count, expected, "d = {d}");
            if m.point_count == 1 {
                assert_eq!(m.points[0].local_point, b.p);
                assert_eq!(m.local_point, a.p);
                assert_eq!(m.points[0].id.key(), 0);
            }
        }
    }

    #[test]
    fn test_polygon_circle_face_contact() {
        let poly = PolygonShape::new_box(1.0, 1.0);
        let circle = CircleShape::new(Vec2::ZERO, 0.5);
        let m = collide_polygon_and_circle(
            &poly,
            &Transform::IDENTITY,
            &circle,
            &Transform::new(Vec2::new(0.0, 1.4), 0.0),
        );
        assert_eq!(m.point_count, 1);
        assert_eq!(m.kind, ManifoldType::FaceA);
        assert_eq!(m.local_normal, Vec2::new(0.0, 1.0));
    }

    #[test]
    fn test_polygon_circle_vertex_region() {
        let poly = PolygonShape::new_box(1.0, 1.0);
        let circle = CircleShape::new(Vec2::ZERO, 0.5);
        let m = collide_polygon_and_circle(
            &poly,
            &Transform::IDENTITY,
            &circle,
            &Transform::new(Vec2::new(1.3, 1.3), 0.0),
        );
        assert_eq!(m.point_count, 1);
        assert_eq!(m.local_point, Vec2::new(1.0, 1.0));
        let expected = Vec2::new(1.0, 1.0).normalize();
        assert!((m.local_normal - expected).length() < 1e-5);

        let far = collide_polygon_and_circle(
            &poly,
            &Transform::IDENTITY,
            &circle,
            &Transform::new(Vec2::new(1.5, 1.5), 0.0),
        );
        assert_eq!(far.point_count, 0);
    }

    #[test]
    fn test_polygon_circle_center_inside() {
        let poly = PolygonShape::new_box(1.0, 1.0);
        let circle = CircleShape::new(Vec2::ZERO, 0.25);
        let m = collide_polygon_and_circle(
            &poly,
            &Transform::IDENTITY,
            &circle,
            &Transform::new(Vec2::new(0.8, 0.0), 0.0),
        );
        assert_eq!(m.point_count, 1);
        assert_eq!(m.local_normal, Vec2::new(1.0, 0.0));
        assert_eq!(m.local_point, Vec2::new(1.0, 0.0));
    }

    #[test]
    fn test_box_resting_on_box_has_two_points() {
        let ground = PolygonShape::new_box(5.0, 0.5);
        let bx = PolygonShape::new_box(0.5, 0.5);
        let xf_a = Transform::IDENTITY;
        let xf_b = Transform::new(Vec2::new(0.0, 0.99), 0.0);
        let m = collide_polygons(&ground, &xf_a, &bx, &xf_b);
        assert_eq!(m.point_count, 2);
        assert_eq!(m.kind, ManifoldType::FaceA);
        let wm = world_manifold(&m, &xf_a, ground.radius, &xf_b, bx.radius);
        assert!((wm.normal - Vec2::new(0.0, 1.0)).length() < 1e-5);
        for s in &wm.separations[..2] {
            assert!((s - (-0.01 - 0.02)).abs() < 1e-4);
        }
    }

    #[test]
    fn test_separated_boxes_produce_nothing() {
        let a = PolygonShape::new_box(0.5, 0.5);
        let m = collide_polygons(
            &a,
            &Transform::IDENTITY,
            &a,
            &Transform::new(Vec2::new(1.1, 0.0), 0.3),
        );
        assert_eq!(m.point_count, 0);
    }

    #[test]
    fn test_sat_tie_break_is_deterministic() {
        // Equal squares exactly touching edge to edge: separations are equal,
        // the tolerance rule must keep A as the reference every time.
        let a = PolygonShape::new_box(0.5, 0.5);
        let xf_a = Transform::IDENTITY;
        let xf_b = Transform::new(Vec2::new(1.0, 0.0), 0.0);
        let first = collide_polygons(&a, &xf_a, &a, &xf_b);
        assert_eq!(first.kind, ManifoldType::FaceA);
        assert_eq!(first.point_count, 2);
        for _ in 0..10 {
            let again = collide_polygons(&a, &xf_a, &a, &xf_b);
            assert_eq!(again.kind, first.kind);
            assert_eq!(again.local_normal, first.local_normal);
            assert_eq!(again.local_point, first.local_point);
        }
    }

    #[test]
    fn test_reference_face_flips_to_b_when_clearly_better() {
        // A rotated box pokes a corner into an axis-aligned B; B's face
        // separates much better, so B becomes the reference.
        let a = PolygonShape::new_box(0.5, 0.5);
        let b = PolygonShape::new_box(2.0, 0.5);
        let xf_a = Transform::new(Vec2::new(0.0, 1.2), std::f32::consts::FRAC_PI_4);
        let xf_b = Transform::IDENTITY;
        let m = collide_polygons(&a, &xf_a, &b, &xf_b);
        assert!(m.point_count >= 1);
        assert_eq!(m.kind, ManifoldType::FaceB);
        // Feature ids are reported from A's point of view
        let id = m.points[0].id.cf;
        assert_eq!(id.type_b, FeatureType::Face);
    }

    #[test]
    fn test_contact_ids_stable_for_unmoving_pair() {
        let a = PolygonShape::new_box(0.5, 0.5);
        let b = PolygonShape::new_box(0.5, 0.5);
        let xf_a = Transform::new(Vec2::new(0.1, 0.0), 0.05);
        let xf_b = Transform::new(Vec2::new(0.3, 0.95), -0.02);
        let m1 = collide_polygons(&a, &xf_a, &b, &xf_b);
        let m2 = collide_polygons(&a, &xf_a, &b, &xf_b);
        assert_eq!(m1.point_count, m2.point_count);
        assert!(m1.point_count > 0);
        for i in 0..m1.point_count {
            assert_eq!(m1.points[i].id.key(), m2.points[i].id.key());
        }
    }

    #[test]
    fn test_edge_circle_regions() {
        let edge = EdgeShape::two_sided(Vec2::new(-1.0, 0.0), Vec2::new(1.0, 0.0));
        let circle = CircleShape::new(Vec2::ZERO, 0.5);
        let xf = Transform::IDENTITY;

        let face = collide_edge_and_circle(&edge, &xf, &circle, &Transform::new(Vec2::new(0.0, 0.4), 0.0));
        assert_eq!(face.point_count, 1);
        assert_eq!(face.kind, ManifoldType::FaceA);
        assert!((face.local_normal - Vec2::new(0.0, 1.0)).length() < 1e-5);

        let vertex = collide_edge_and_circle(&edge, &xf, &circle, &Transform::new(Vec2::new(1.3, 0.0), 0.0));
        assert_eq!(vertex.point_count, 1);
        assert_eq!(vertex.kind, ManifoldType::Circles);
        assert_eq!(vertex.local_point, Vec2::new(1.0, 0.0));
        assert_eq!(vertex.points[0].id.cf.index_a, 1);
    }

    #[test]
    fn test_one_sided_edge_circle_ignores_back_and_neighbour_region() {
        // Right side of v1 -> v2 is -y
        let edge = EdgeShape::one_sided(
            Vec2::new(-2.0, 0.0),
            Vec2::new(-1.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(2.0, 0.0),
        );
        let circle = CircleShape::new(Vec2::ZERO, 0.5);
        let xf = Transform::IDENTITY;
        let back = collide_edge_and_circle(&edge, &xf, &circle, &Transform::new(Vec2::new(0.0, 0.4), 0.0));
        assert_eq!(back.point_count, 0);
        let front = collide_edge_and_circle(&edge, &xf, &circle, &Transform::new(Vec2::new(0.0, -0.4), 0.0));
        assert_eq!(front.point_count, 1);
        // Past v2 the next edge owns the contact
        let beyond = collide_edge_and_circle(&edge, &xf, &circle, &Transform::new(Vec2::new(1.2, -0.3), 0.0));
        assert_eq!(beyond.point_count, 0);
    }

    #[test]
    fn test_box_on_two_sided_edge() {
        let edge = EdgeShape::two_sided(Vec2::new(-5.0, 0.0), Vec2::new(5.0, 0.0));
        let bx = PolygonShape::new_box(0.5, 0.5);
        let xf_a = Transform::IDENTITY;
        let xf_b = Transform::new(Vec2::new(0.0, 0.5), 0.0);
        let m = collide_edge_and_polygon(&edge, &xf_a, &bx, &xf_b);
        assert_eq!(m.point_count, 2);
        assert_eq!(m.kind, ManifoldType::FaceA);
        let wm = WorldManifold::new(&m, &xf_a, edge.radius, &xf_b, bx.radius);
        assert!((wm.normal - Vec2::new(0.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn test_box_on_chain_floor() {
        // Floor chain wound so its right-hand normal points up (+y)
        let chain = ChainShape::new_chain(
            &[Vec2::new(5.0, 0.0), Vec2::new(0.0, 0.0), Vec2::new(-5.0, 0.0)],
            Vec2::new(10.0, 0.0),
            Vec2::new(-10.0, 0.0),
        )
        .unwrap();
        let bx = PolygonShape::new_box(0.5, 0.5);
        let xf_b = Transform::new(Vec2::new(0.0, 0.5), 0.0);
        // Box straddles the internal vertex: both children report contact
        // with the same upward normal, no ghost collision on the joint.
        for child in 0..2 {
            let m = collide_chain_and_polygon(&chain, child, &Transform::IDENTITY, &bx, &xf_b);
            assert_eq!(m.point_count, 2, "child {child}");
            let wm = WorldManifold::new(&m, &Transform::IDENTITY, chain.radius, &xf_b, bx.radius);
            assert!((wm.normal - Vec2::new(0.0, 1.0)).length() < 1e-4);
        }
    }

    #[test]
    fn test_contact_order_table() {
        assert_eq!(contact_order(ShapeType::Polygon, ShapeType::Circle), Some(false));
        assert_eq!(contact_order(ShapeType::Circle, ShapeType::Polygon), Some(true));
        assert_eq!(contact_order(ShapeType::Polygon, ShapeType::Edge), Some(true));
        assert_eq!(contact_order(ShapeType::Edge, ShapeType::Chain), None);
    }
}
