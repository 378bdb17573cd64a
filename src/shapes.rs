use glam::Vec2;

use crate::api::ShapeApi;
use crate::distance::DistanceProxy;
use crate::error::{Error, Result};
use crate::math::{Rot, Transform, cross, cross_vs};
use crate::types::*;

/// Shape discriminant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShapeType {
    Circle = 0,
    Edge = 1,
    Polygon = 2,
    Chain = 3,
}

/// Supported convex primitives.
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    Circle(CircleShape),
    Edge(EdgeShape),
    Polygon(PolygonShape),
    Chain(ChainShape),
}

impl Shape {
    pub fn shape_type(&self) -> ShapeType {
        match self {
            Shape::Circle(_) => ShapeType::Circle,
            Shape::Edge(_) => ShapeType::Edge,
            Shape::Polygon(_) => ShapeType::Polygon,
            Shape::Chain(_) => ShapeType::Chain,
        }
    }

    /// Skin radius used by narrow-phase and the solver.
    pub fn radius(&self) -> f32 {
        match self {
            Shape::Circle(s) => s.radius,
            Shape::Edge(s) => s.radius,
            Shape::Polygon(s) => s.radius,
            Shape::Chain(s) => s.radius,
        }
    }

    fn as_api(&self) -> &dyn ShapeApi {
        match self {
            Shape::Circle(s) => s,
            Shape::Edge(s) => s,
            Shape::Polygon(s) => s,
            Shape::Chain(s) => s,
        }
    }
}

impl ShapeApi for Shape {
    fn child_count(&self) -> usize {
        self.as_api().child_count()
    }

    fn test_point(&self, xf: &Transform, p: Vec2) -> bool {
        self.as_api().test_point(xf, p)
    }

    fn compute_distance(&self, xf: &Transform, p: Vec2, child: usize) -> (f32, Vec2) {
        self.as_api().compute_distance(xf, p, child)
    }

    fn ray_cast(
        &self,
        input: &RayCastInput,
        xf: &Transform,
        child: usize,
    ) -> Option<RayCastOutput> {
        self.as_api().ray_cast(input, xf, child)
    }

    fn compute_aabb(&self, xf: &Transform, child: usize) -> Aabb {
        self.as_api().compute_aabb(xf, child)
    }

    fn compute_mass(&self, density: f32) -> MassData {
        self.as_api().compute_mass(density)
    }

    fn distance_proxy(&self, child: usize) -> DistanceProxy {
        self.as_api().distance_proxy(child)
    }
}

impl From<CircleShape> for Shape {
    fn from(s: CircleShape) -> Self {
        Shape::Circle(s)
    }
}

impl From<EdgeShape> for Shape {
    fn from(s: EdgeShape) -> Self {
        Shape::Edge(s)
    }
}

impl From<PolygonShape> for Shape {
    fn from(s: PolygonShape) -> Self {
        Shape::Polygon(s)
    }
}

impl From<ChainShape> for Shape {
    fn from(s: ChainShape) -> Self {
        Shape::Chain(s)
    }
}

// --- Circle ----------------------------------------------------------------

/// Solid circle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CircleShape {
    /// Center in body space.
    pub p: Vec2,
    pub radius: f32,
}

impl CircleShape {
    pub fn new(p: Vec2, radius: f32) -> Self {
        Self { p, radius }
    }
}

impl ShapeApi for CircleShape {
    fn child_count(&self) -> usize {
        1
    }

    fn test_point(&self, xf: &Transform, p: Vec2) -> bool {
        let center = xf.apply(self.p);
        let d = p - center;
        d.dot(d) <= self.radius * self.radius
    }

    fn compute_distance(&self, xf: &Transform, p: Vec2, _child: usize) -> (f32, Vec2) {
        let center = xf.apply(self.p);
        let d = p - center;
        let len = d.length();
        let normal = if len > 0.0 { d / len } else { Vec2::ZERO };
        (len - self.radius, normal)
    }

    // Collision detection in games, Gino van den Bergen, p.118:
    // x = s + a * r, norm(x) = radius
    fn ray_cast(
        &self,
        input: &RayCastInput,
        xf: &Transform,
        _child: usize,
    ) -> Option<RayCastOutput> {
        let position = xf.apply(self.p);
        let s = input.p1 - position;
        let b = s.dot(s) - self.radius * self.radius;

        // Solve quadratic equation
        let r = input.p2 - input.p1;
        let c = s.dot(r);
        let rr = r.dot(r);
        let sigma = c * c - rr * b;

        // Negative discriminant or zero-length segment
        if sigma < 0.0 || rr < f32::EPSILON {
            return None;
        }

        // Find the point of intersection of the line with the circle
        let mut a = -(c + sigma.sqrt());

        // Is the intersection point on the segment?
        if 0.0 <= a && a <= input.max_fraction * rr {
            a /= rr;
            return Some(RayCastOutput {
                fraction: a,
                normal: (s + a * r).normalize_or_zero(),
            });
        }
        None
    }

    fn compute_aabb(&self, xf: &Transform, _child: usize) -> Aabb {
        let p = xf.apply(self.p);
        Aabb::from_center(p, Vec2::splat(self.radius))
    }

    fn compute_mass(&self, density: f32) -> MassData {
        let mass = density * std::f32::consts::PI * self.radius * self.radius;
        // Inertia about the local origin
        let inertia = mass * (0.5 * self.radius * self.radius + self.p.dot(self.p));
        MassData {
            mass,
            center: self.p,
            inertia,
        }
    }

    fn distance_proxy(&self, _child: usize) -> DistanceProxy {
        DistanceProxy::new(&[self.p], self.radius)
    }
}

// --- Edge ------------------------------------------------------------------

/// Line segment. One-sided edges carry ghost vertices `v0`/`v3` from their
/// neighbours and only collide on the right side (normal = `cross(v2 - v1, 1)`).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EdgeShape {
    pub v0: Vec2,
    pub v1: Vec2,
    pub v2: Vec2,
    pub v3: Vec2,
    pub one_sided: bool,
    pub radius: f32,
}

impl EdgeShape {
    /// Collides on both sides, no adjacency.
    pub fn two_sided(v1: Vec2, v2: Vec2) -> Self {
        Self {
            v0: Vec2::ZERO,
            v1,
            v2,
            v3: Vec2::ZERO,
            one_sided: false,
            radius: DEFAULT_POLYGON_RADIUS,
        }
    }

    /// One-sided edge with ghost vertices for smooth collision across joints.
    pub fn one_sided(v0: Vec2, v1: Vec2, v2: Vec2, v3: Vec2) -> Self {
        Self {
            v0,
            v1,
            v2,
            v3,
            one_sided: true,
            radius: DEFAULT_POLYGON_RADIUS,
        }
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }
}

impl ShapeApi for EdgeShape {
    fn child_count(&self) -> usize {
        1
    }

    fn test_point(&self, _xf: &Transform, _p: Vec2) -> bool {
        false
    }

    fn compute_distance(&self, xf: &Transform, p: Vec2, _child: usize) -> (f32, Vec2) {
        let v1 = xf.apply(self.v1);
        let v2 = xf.apply(self.v2);

        let mut d = p - v1;
        let s = v2 - v1;
        let ds = d.dot(s);
        if ds > 0.0 {
            let s2 = s.dot(s);
            if ds > s2 {
                d = p - v2;
            } else {
                d -= ds / s2 * s;
            }
        }

        let len = d.length();
        let normal = if len > 0.0 { d / len } else { Vec2::ZERO };
        (len, normal)
    }

    // p = p1 + t * d
    // v = v1 + s * e
    // p1 + t * d = v1 + s * e
    // s * e - t * d = p1 - v1
    fn ray_cast(
        &self,
        input: &RayCastInput,
        xf: &Transform,
        _child: usize,
    ) -> Option<RayCastOutput> {
        // Put the ray into the edge's frame of reference
        let p1 = xf.q.apply_inv(input.p1 - xf.p);
        let p2 = xf.q.apply_inv(input.p2 - xf.p);
        let d = p2 - p1;

        let v1 = self.v1;
        let v2 = self.v2;
        let e = v2 - v1;

        // Normal points to the right, looking from v1 at v2
        let normal = Vec2::new(e.y, -e.x).normalize_or_zero();

        // q = p1 + t * d
        // dot(normal, q - v1) = 0
        // dot(normal, p1 - v1) + t * dot(normal, d) = 0
        let numerator = normal.dot(v1 - p1);
        if self.one_sided && numerator > 0.0 {
            return None;
        }

        let denominator = normal.dot(d);
        if denominator == 0.0 {
            return None;
        }

        let t = numerator / denominator;
        if t < 0.0 || input.max_fraction < t {
            return None;
        }

        let q = p1 + t * d;

        // q = v1 + s * r
        // s = dot(q - v1, r) / dot(r, r)
        let r = v2 - v1;
        let rr = r.dot(r);
        if rr == 0.0 {
            return None;
        }

        let s = (q - v1).dot(r) / rr;
        if !(0.0..=1.0).contains(&s) {
            return None;
        }

        let n = if numerator > 0.0 {
            -xf.q.apply(normal)
        } else {
            xf.q.apply(normal)
        };
        Some(RayCastOutput {
            fraction: t,
            normal: n,
        })
    }

    fn compute_aabb(&self, xf: &Transform, _child: usize) -> Aabb {
        let v1 = xf.apply(self.v1);
        let v2 = xf.apply(self.v2);
        Aabb::new(v1.min(v2), v1.max(v2)).expanded(self.radius)
    }

    fn compute_mass(&self, _density: f32) -> MassData {
        MassData {
            mass: 0.0,
            center: 0.5 * (self.v1 + self.v2),
            inertia: 0.0,
        }
    }

    fn distance_proxy(&self, _child: usize) -> DistanceProxy {
        DistanceProxy::new(&[self.v1, self.v2], self.radius)
    }
}

// --- Polygon ---------------------------------------------------------------

/// Solid convex polygon with counter-clockwise winding.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PolygonShape {
    pub centroid: Vec2,
    vertices: [Vec2; MAX_POLYGON_VERTICES],
    normals: [Vec2; MAX_POLYGON_VERTICES],
    count: usize,
    pub radius: f32,
}

impl PolygonShape {
    /// Axis-aligned box centered on the origin.
    pub fn new_box(hx: f32, hy: f32) -> Self {
        Self::new_oriented_box(hx, hy, Vec2::ZERO, 0.0)
    }

    /// Box with the given half widths, center and rotation in body space.
    pub fn new_oriented_box(hx: f32, hy: f32, center: Vec2, angle: f32) -> Self {
        let mut vertices = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        let mut normals = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        vertices[0] = Vec2::new(-hx, -hy);
        vertices[1] = Vec2::new(hx, -hy);
        vertices[2] = Vec2::new(hx, hy);
        vertices[3] = Vec2::new(-hx, hy);
        normals[0] = Vec2::new(0.0, -1.0);
        normals[1] = Vec2::new(1.0, 0.0);
        normals[2] = Vec2::new(0.0, 1.0);
        normals[3] = Vec2::new(-1.0, 0.0);

        let xf = Transform {
            p: center,
            q: Rot::new(angle),
        };
        for i in 0..4 {
            vertices[i] = xf.apply(vertices[i]);
            normals[i] = xf.q.apply(normals[i]);
        }

        Self {
            centroid: center,
            vertices,
            normals,
            count: 4,
            radius: DEFAULT_POLYGON_RADIUS,
        }
    }

    /// Convex hull of the given points with the default slop and skin.
    pub fn from_points(points: &[Vec2]) -> Result<Self> {
        Self::from_points_with(points, &Settings::default())
    }

    /// Convex hull of the given points. Points closer than half the linear
    /// slop are welded; collinear input is rejected.
    pub fn from_points_with(points: &[Vec2], settings: &Settings) -> Result<Self> {
        if points.len() < 3 {
            return Err(Error::InvalidPolygon(format!(
                "need at least 3 points, got {}",
                points.len()
            )));
        }
        let n = points.len().min(MAX_POLYGON_VERTICES);

        // Perform welding and copy vertices into local buffer
        let weld = 0.5 * settings.linear_slop;
        let mut ps = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        let mut temp_count = 0;
        for &v in &points[..n] {
            let unique = ps[..temp_count]
                .iter()
                .all(|p| v.distance_squared(*p) >= weld * weld);
            if unique {
                ps[temp_count] = v;
                temp_count += 1;
            }
        }

        let n = temp_count;
        if n < 3 {
            return Err(Error::InvalidPolygon("points weld to fewer than 3".into()));
        }

        // Gift wrapping: start at the right most point, lowest y on ties
        let mut i0 = 0;
        let mut x0 = ps[0].x;
        for i in 1..n {
            let x = ps[i].x;
            if x > x0 || (x == x0 && ps[i].y < ps[i0].y) {
                i0 = i;
                x0 = x;
            }
        }

        let mut hull = [0usize; MAX_POLYGON_VERTICES];
        let mut m = 0;
        let mut ih = i0;

        loop {
            if m >= MAX_POLYGON_VERTICES {
                return Err(Error::InvalidPolygon("hull did not close".into()));
            }
            hull[m] = ih;

            let mut ie = 0;
            for j in 1..n {
                if ie == ih {
                    ie = j;
                    continue;
                }

                let r = ps[ie] - ps[hull[m]];
                let v = ps[j] - ps[hull[m]];
                let c = cross(r, v);
                if c < 0.0 {
                    ie = j;
                }

                // Collinearity check
                if c == 0.0 && v.length_squared() > r.length_squared() {
                    ie = j;
                }
            }

            m += 1;
            ih = ie;

            if ie == i0 {
                break;
            }
        }

        if m < 3 {
            return Err(Error::InvalidPolygon("points are collinear".into()));
        }

        let mut vertices = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        let mut normals = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        for i in 0..m {
            vertices[i] = ps[hull[i]];
        }

        for i in 0..m {
            let i2 = if i + 1 < m { i + 1 } else { 0 };
            let edge = vertices[i2] - vertices[i];
            if edge.length_squared() <= f32::EPSILON * f32::EPSILON {
                return Err(Error::InvalidPolygon("zero length edge".into()));
            }
            normals[i] = cross_vs(edge, 1.0).normalize();
        }

        let centroid = compute_centroid(&vertices[..m])?;

        Ok(Self {
            centroid,
            vertices,
            normals,
            count: m,
            radius: settings.polygon_radius,
        })
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    pub fn vertices(&self) -> &[Vec2] {
        &self.vertices[..self.count]
    }

    pub fn normals(&self) -> &[Vec2] {
        &self.normals[..self.count]
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Convexity check: every vertex lies on the inner side of every edge.
    pub fn validate(&self) -> bool {
        for i in 0..self.count {
            let i1 = i;
            let i2 = if i + 1 < self.count { i + 1 } else { 0 };
            let p = self.vertices[i1];
            let e = self.vertices[i2] - p;
            for j in 0..self.count {
                if j == i1 || j == i2 {
                    continue;
                }
                let v = self.vertices[j] - p;
                if cross(e, v) < 0.0 {
                    return false;
                }
            }
        }
        true
    }
}

fn compute_centroid(vs: &[Vec2]) -> Result<Vec2> {
    let mut c = Vec2::ZERO;
    let mut area = 0.0;

    // Reference point inside the polygon keeps the triangles well formed
    let s = vs[0];
    let inv3 = 1.0 / 3.0;

    for i in 0..vs.len() {
        let p1 = vs[0] - s;
        let p2 = vs[i] - s;
        let p3 = if i + 1 < vs.len() { vs[i + 1] } else { vs[0] } - s;

        let e1 = p2 - p1;
        let e2 = p3 - p1;
        let d = cross(e1, e2);

        let triangle_area = 0.5 * d;
        area += triangle_area;

        // Area weighted centroid
        c += triangle_area * inv3 * (p1 + p2 + p3);
    }

    if area <= f32::EPSILON {
        return Err(Error::InvalidPolygon("polygon has no area".into()));
    }
    Ok(c / area + s)
}

impl ShapeApi for PolygonShape {
    fn child_count(&self) -> usize {
        1
    }

    fn test_point(&self, xf: &Transform, p: Vec2) -> bool {
        let p_local = xf.q.apply_inv(p - xf.p);
        (0..self.count).all(|i| self.normals[i].dot(p_local - self.vertices[i]) <= 0.0)
    }

    fn compute_distance(&self, xf: &Transform, p: Vec2, _child: usize) -> (f32, Vec2) {
        let p_local = xf.apply_inv(p);
        let mut max_distance = -f32::MAX;
        let mut normal_for_max = p_local;

        for i in 0..self.count {
            let dot = self.normals[i].dot(p_local - self.vertices[i]);
            if dot > max_distance {
                max_distance = dot;
                normal_for_max = self.normals[i];
            }
        }

        if max_distance > 0.0 {
            // Outside: the nearest feature may be a vertex
            let mut min_distance = normal_for_max;
            let mut min_distance2 = max_distance * max_distance;
            for i in 0..self.count {
                let d = p_local - self.vertices[i];
                let d2 = d.length_squared();
                if min_distance2 > d2 {
                    min_distance = d;
                    min_distance2 = d2;
                }
            }
            (
                min_distance2.sqrt(),
                xf.q.apply(min_distance).normalize_or_zero(),
            )
        } else {
            (max_distance, xf.q.apply(normal_for_max))
        }
    }

    fn ray_cast(
        &self,
        input: &RayCastInput,
        xf: &Transform,
        _child: usize,
    ) -> Option<RayCastOutput> {
        // Put the ray into the polygon's frame of reference
        let p1 = xf.q.apply_inv(input.p1 - xf.p);
        let p2 = xf.q.apply_inv(input.p2 - xf.p);
        let d = p2 - p1;

        let mut lower = 0.0;
        let mut upper = input.max_fraction;
        let mut index = None;

        for i in 0..self.count {
            // p = p1 + a * d
            // dot(normal, p - v) = 0
            // dot(normal, p1 - v) + a * dot(normal, d) = 0
            let numerator = self.normals[i].dot(self.vertices[i] - p1);
            let denominator = self.normals[i].dot(d);

            if denominator == 0.0 {
                if numerator < 0.0 {
                    return None;
                }
            } else if denominator < 0.0 && numerator < lower * denominator {
                // The segment enters this half-space
                lower = numerator / denominator;
                index = Some(i);
            } else if denominator > 0.0 && numerator < upper * denominator {
                // The segment exits this half-space
                upper = numerator / denominator;
            }

            if upper < lower {
                return None;
            }
        }

        index.map(|i| RayCastOutput {
            fraction: lower,
            normal: xf.q.apply(self.normals[i]),
        })
    }

    fn compute_aabb(&self, xf: &Transform, _child: usize) -> Aabb {
        let mut lower = xf.apply(self.vertices[0]);
        let mut upper = lower;
        for v in &self.vertices[1..self.count] {
            let v = xf.apply(*v);
            lower = lower.min(v);
            upper = upper.max(v);
        }
        Aabb::new(lower, upper).expanded(self.radius)
    }

    // Polygon mass, centroid and inertia via triangle fans. Inertia of a
    // triangle about the reference point s:
    //   I = density * D/12 * (intx2 + inty2)
    // with D the doubled area and intx2 = e1x^2 + e2x*e1x + e2x^2.
    fn compute_mass(&self, density: f32) -> MassData {
        let mut center = Vec2::ZERO;
        let mut area = 0.0;
        let mut inertia = 0.0;

        let s = self.vertices[0];
        let inv3 = 1.0 / 3.0;

        for i in 0..self.count {
            let e1 = self.vertices[i] - s;
            let e2 = if i + 1 < self.count {
                self.vertices[i + 1] - s
            } else {
                self.vertices[0] - s
            };

            let d = cross(e1, e2);
            let triangle_area = 0.5 * d;
            area += triangle_area;
            center += triangle_area * inv3 * (e1 + e2);

            let (ex1, ey1) = (e1.x, e1.y);
            let (ex2, ey2) = (e2.x, e2.y);
            let intx2 = ex1 * ex1 + ex2 * ex1 + ex2 * ex2;
            let inty2 = ey1 * ey1 + ey2 * ey1 + ey2 * ey2;
            inertia += (0.25 * inv3 * d) * (intx2 + inty2);
        }

        let mass = density * area;
        if area <= f32::EPSILON {
            return MassData::default();
        }
        center /= area;
        let mass_center = center + s;

        // Inertia relative to the reference point, then shifted to the origin
        let mut i = density * inertia;
        i += mass * (mass_center.dot(mass_center) - center.dot(center));

        MassData {
            mass,
            center: mass_center,
            inertia: i,
        }
    }

    fn distance_proxy(&self, _child: usize) -> DistanceProxy {
        DistanceProxy::new(self.vertices(), self.radius)
    }
}

// --- Chain -----------------------------------------------------------------

/// Free-form sequence of one-sided edges, open or closed. Each child edge
/// borrows its neighbours as ghost vertices.
#[derive(Clone, Debug, PartialEq)]
pub struct ChainShape {
    vertices: Vec<Vec2>,
    pub prev_vertex: Vec2,
    pub next_vertex: Vec2,
    pub radius: f32,
}

impl ChainShape {
    /// Closed loop. The first vertex is repeated at the end internally.
    pub fn new_loop(vertices: &[Vec2]) -> Result<Self> {
        if vertices.len() < 3 {
            return Err(Error::InvalidChain(format!(
                "a loop needs at least 3 vertices, got {}",
                vertices.len()
            )));
        }
        check_spacing(vertices)?;
        let mut vs = vertices.to_vec();
        vs.push(vertices[0]);
        let prev_vertex = vs[vs.len() - 2];
        let next_vertex = vs[1];
        Ok(Self {
            vertices: vs,
            prev_vertex,
            next_vertex,
            radius: DEFAULT_POLYGON_RADIUS,
        })
    }

    /// Open chain. `prev`/`next` are the ghost vertices past each end.
    pub fn new_chain(vertices: &[Vec2], prev: Vec2, next: Vec2) -> Result<Self> {
        if vertices.len() < 2 {
            return Err(Error::InvalidChain(format!(
                "a chain needs at least 2 vertices, got {}",
                vertices.len()
            )));
        }
        check_spacing(vertices)?;
        Ok(Self {
            vertices: vertices.to_vec(),
            prev_vertex: prev,
            next_vertex: next,
            radius: DEFAULT_POLYGON_RADIUS,
        })
    }

    pub fn vertices(&self) -> &[Vec2] {
        &self.vertices
    }

    /// Child edge `index` with ghost vertices from its neighbours.
    pub fn child_edge(&self, index: usize) -> EdgeShape {
        let count = self.vertices.len();
        debug_assert!(index + 1 < count);
        let v0 = if index > 0 {
            self.vertices[index - 1]
        } else {
            self.prev_vertex
        };
        let v3 = if index + 2 < count {
            self.vertices[index + 2]
        } else {
            self.next_vertex
        };
        EdgeShape::one_sided(v0, self.vertices[index], self.vertices[index + 1], v3)
            .with_radius(self.radius)
    }
}

fn check_spacing(vertices: &[Vec2]) -> Result<()> {
    for (i, w) in vertices.windows(2).enumerate() {
        if w[0].distance_squared(w[1]) <= DEFAULT_LINEAR_SLOP * DEFAULT_LINEAR_SLOP {
            return Err(Error::InvalidChain(format!(
                "vertices {} and {} are too close",
                i,
                i + 1
            )));
        }
    }
    Ok(())
}

impl ShapeApi for ChainShape {
    fn child_count(&self) -> usize {
        self.vertices.len() - 1
    }

    fn test_point(&self, _xf: &Transform, _p: Vec2) -> bool {
        false
    }

    fn compute_distance(&self, xf: &Transform, p: Vec2, child: usize) -> (f32, Vec2) {
        self.child_edge(child).compute_distance(xf, p, 0)
    }

    fn ray_cast(
        &self,
        input: &RayCastInput,
        xf: &Transform,
        child: usize,
    ) -> Option<RayCastOutput> {
        self.child_edge(child).ray_cast(input, xf, 0)
    }

    fn compute_aabb(&self, xf: &Transform, child: usize) -> Aabb {
        debug_assert!(child + 1 < self.vertices.len());
        let v1 = xf.apply(self.vertices[child]);
        let v2 = xf.apply(self.vertices[child + 1]);
        Aabb::new(v1.min(v2), v1.max(v2)).expanded(self.radius)
    }

    fn compute_mass(&self, _density: f32) -> MassData {
        MassData::default()
    }

    fn distance_proxy(&self, child: usize) -> DistanceProxy {
        debug_assert!(child + 1 < self.vertices.len());
        DistanceProxy::new(
            &[self.vertices[child], self.vertices[child + 1]],
            self.radius,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hull_discards_interior_and_orders_ccw() {
        let poly = PolygonShape::from_points(&[
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(0.0, 2.0),
        ])
        .unwrap();
        assert_eq!(poly.count(), 4);
        assert!(poly.validate());
        assert!((poly.centroid - Vec2::new(1.0, 1.0)).length() < 1e-5);
        for n in poly.normals() {
            assert!((n.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_hull_rejects_collinear_and_welded() {
        let collinear = [Vec2::ZERO, Vec2::new(1.0, 0.0), Vec2::new(2.0, 0.0)];
        assert!(matches!(
            PolygonShape::from_points(&collinear),
            Err(Error::InvalidPolygon(_))
        ));
        let welded = [Vec2::ZERO, Vec2::new(0.001, 0.0), Vec2::new(0.0, 0.001)];
        assert!(PolygonShape::from_points(&welded).is_err());
    }

    #[test]
    fn test_box_mass() {
        let poly = PolygonShape::new_box(1.0, 0.5);
        let md = poly.compute_mass(2.0);
        assert!((md.mass - 4.0).abs() < 1e-5);
        assert!(md.center.length() < 1e-5);
        // I = m * (w^2 + h^2) / 12 with w = 2, h = 1
        assert!((md.inertia - 4.0 * 5.0 / 12.0).abs() < 1e-4);
    }

    #[test]
    fn test_offset_circle_mass() {
        let circle = CircleShape::new(Vec2::new(1.0, 0.0), 0.5);
        let md = circle.compute_mass(1.0);
        let m = std::f32::consts::PI * 0.25;
        assert!((md.mass - m).abs() < 1e-5);
        assert!((md.inertia - m * (0.125 + 1.0)).abs() < 1e-5);
    }

    #[test]
    fn test_polygon_point_and_distance() {
        let poly = PolygonShape::new_box(1.0, 1.0);
        let xf = Transform::new(Vec2::new(2.0, 0.0), 0.0);
        assert!(poly.test_point(&xf, Vec2::new(2.5, 0.5)));
        assert!(!poly.test_point(&xf, Vec2::new(3.5, 0.5)));
        let (d, n) = poly.compute_distance(&xf, Vec2::new(5.0, 0.0), 0);
        assert!((d - 2.0).abs() < 1e-5);
        assert!((n - Vec2::new(1.0, 0.0)).length() < 1e-5);
        let (d, _) = poly.compute_distance(&xf, Vec2::new(2.0, 0.5), 0);
        assert!((d + 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_polygon_ray_cast() {
        let poly = PolygonShape::new_box(1.0, 1.0);
        let input = RayCastInput {
            p1: Vec2::new(-4.0, 0.0),
            p2: Vec2::new(4.0, 0.0),
            max_fraction: 1.0,
        };
        let out = poly.ray_cast(&input, &Transform::IDENTITY, 0).unwrap();
        assert!((out.fraction - 3.0 / 8.0).abs() < 1e-5);
        assert!((out.normal - Vec2::new(-1.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_circle_ray_cast() {
        let circle = CircleShape::new(Vec2::ZERO, 1.0);
        let input = RayCastInput {
            p1: Vec2::new(-3.0, 0.0),
            p2: Vec2::new(3.0, 0.0),
            max_fraction: 1.0,
        };
        let out = circle.ray_cast(&input, &Transform::IDENTITY, 0).unwrap();
        assert!((out.fraction - 1.0 / 3.0).abs() < 1e-5);
        assert!((out.normal.x + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_one_sided_edge_ray_cast_ignores_back() {
        // Normal of v1 -> v2 along +x points to -y
        let edge = EdgeShape::one_sided(
            Vec2::new(-2.0, 0.0),
            Vec2::new(-1.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(2.0, 0.0),
        );
        let from_below = RayCastInput {
            p1: Vec2::new(0.0, -1.0),
            p2: Vec2::new(0.0, 1.0),
            max_fraction: 1.0,
        };
        let hit = edge.ray_cast(&from_below, &Transform::IDENTITY, 0).unwrap();
        assert!((hit.fraction - 0.5).abs() < 1e-5);
        assert!((hit.normal - Vec2::new(0.0, -1.0)).length() < 1e-5);

        let from_above = RayCastInput {
            p1: Vec2::new(0.0, 1.0),
            p2: Vec2::new(0.0, -1.0),
            max_fraction: 1.0,
        };
        assert!(edge.ray_cast(&from_above, &Transform::IDENTITY, 0).is_none());
        let two_sided = EdgeShape::two_sided(edge.v1, edge.v2);
        let hit = two_sided
            .ray_cast(&from_above, &Transform::IDENTITY, 0)
            .unwrap();
        assert!((hit.normal - Vec2::new(0.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn test_chain_loop_children_and_ghosts() {
        let chain = ChainShape::new_loop(&[
            Vec2::new(0.0, 0.0),
            Vec2::new(4.0, 0.0),
            Vec2::new(4.0, 4.0),
            Vec2::new(0.0, 4.0),
        ])
        .unwrap();
        assert_eq!(chain.child_count(), 4);
        let first = chain.child_edge(0);
        assert_eq!(first.v0, Vec2::new(0.0, 4.0));
        assert_eq!(first.v3, Vec2::new(4.0, 4.0));
        let last = chain.child_edge(3);
        assert_eq!(last.v2, Vec2::new(0.0, 0.0));
        assert_eq!(last.v3, Vec2::new(4.0, 0.0));
        let aabb = chain.compute_aabb(&Transform::IDENTITY, 1);
        assert!(aabb.contains(&Aabb::new(Vec2::new(4.0, 0.0), Vec2::new(4.0, 4.0))));
    }

    #[test]
    fn test_chain_rejects_close_vertices() {
        let r = ChainShape::new_chain(
            &[Vec2::ZERO, Vec2::new(0.001, 0.0)],
            Vec2::ZERO,
            Vec2::ZERO,
        );
        assert!(matches!(r, Err(Error::InvalidChain(_))));
    }

    #[test]
    fn test_shape_enum_dispatch() {
        let shape: Shape = CircleShape::new(Vec2::ZERO, 2.0).into();
        assert_eq!(shape.shape_type(), ShapeType::Circle);
        assert_eq!(shape.child_count(), 1);
        let aabb = shape.compute_aabb(&Transform::new(Vec2::new(1.0, 1.0), 0.0), 0);
        assert_eq!(aabb, Aabb::new(Vec2::new(-1.0, -1.0), Vec2::new(3.0, 3.0)));
    }
}
