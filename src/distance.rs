//! GJK closest-distance query and shape cast.
//!
//! The simplex is kept in Minkowski-difference space (`w = wB - wA`).
//! Region tests in `solve2`/`solve3` use inclusive boundaries; tightening
//! them to strict comparisons lets degenerate triangles cycle forever.

use glam::Vec2;

use crate::api::ShapeApi;
use crate::math::{Transform, cross, cross_sv, cross_vs};
use crate::shapes::Shape;
use crate::types::{MAX_POLYGON_VERTICES, Settings};

/// GJK iteration cap.
const MAX_ITERS: usize = 20;

/// Vertex list plus skin radius. Built from a shape child, never mutated.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DistanceProxy {
    vertices: [Vec2; MAX_POLYGON_VERTICES],
    count: usize,
    pub radius: f32,
}

impl DistanceProxy {
    /// Build from up to `MAX_POLYGON_VERTICES` points.
    pub fn new(points: &[Vec2], radius: f32) -> Self {
        debug_assert!(!points.is_empty() && points.len() <= MAX_POLYGON_VERTICES);
        let count = points.len().min(MAX_POLYGON_VERTICES);
        let mut vertices = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        vertices[..count].copy_from_slice(&points[..count]);
        Self {
            vertices,
            count,
            radius,
        }
    }

    pub fn vertices(&self) -> &[Vec2] {
        &self.vertices[..self.count]
    }

    pub fn vertex_count(&self) -> usize {
        self.count
    }

    pub fn vertex(&self, index: usize) -> Vec2 {
        debug_assert!(index < self.count);
        self.vertices[index]
    }

    /// Index of the vertex furthest along `d`. Ties keep the lowest index.
    pub fn support(&self, d: Vec2) -> usize {
        let mut best_index = 0;
        let mut best_value = self.vertices[0].dot(d);
        for i in 1..self.count {
            let value = self.vertices[i].dot(d);
            if value > best_value {
                best_index = i;
                best_value = value;
            }
        }
        best_index
    }
}

/// Warm-start state carried between distance queries on the same pair.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SimplexCache {
    /// Length or area of the cached simplex.
    pub metric: f32,
    pub count: usize,
    pub index_a: [usize; 3],
    pub index_b: [usize; 3],
}

#[derive(Copy, Clone, Debug)]
pub struct DistanceInput {
    pub proxy_a: DistanceProxy,
    pub proxy_b: DistanceProxy,
    pub transform_a: Transform,
    pub transform_b: Transform,
    pub use_radii: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DistanceOutput {
    /// Closest point on A.
    pub point_a: Vec2,
    /// Closest point on B.
    pub point_b: Vec2,
    pub distance: f32,
    /// GJK iterations used.
    pub iterations: usize,
}

#[derive(Copy, Clone, Debug)]
pub struct ShapeCastInput {
    pub proxy_a: DistanceProxy,
    pub proxy_b: DistanceProxy,
    pub transform_a: Transform,
    pub transform_b: Transform,
    /// Translation of B over the cast.
    pub translation_b: Vec2,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ShapeCastOutput {
    pub point: Vec2,
    pub normal: Vec2,
    /// Fraction of `translation_b` travelled before contact.
    pub lambda: f32,
    pub iterations: usize,
}

#[derive(Copy, Clone, Debug, Default)]
struct SimplexVertex {
    /// Support point in proxy A.
    wa: Vec2,
    /// Support point in proxy B.
    wb: Vec2,
    /// `wb - wa`
    w: Vec2,
    /// Barycentric coordinate for the closest point.
    a: f32,
    index_a: usize,
    index_b: usize,
}

#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Simplex {
    v: [SimplexVertex; 3],
    count: usize,
}

impl Simplex {
    fn read_cache(
        cache: &SimplexCache,
        proxy_a: &DistanceProxy,
        xf_a: &Transform,
        proxy_b: &DistanceProxy,
        xf_b: &Transform,
    ) -> Self {
        debug_assert!(cache.count <= 3);
        let mut s = Simplex::default();

        s.count = cache.count;
        for i in 0..s.count {
            let v = &mut s.v[i];
            v.index_a = cache.index_a[i];
            v.index_b = cache.index_b[i];
            v.wa = xf_a.apply(proxy_a.vertex(v.index_a));
            v.wb = xf_b.apply(proxy_b.vertex(v.index_b));
            v.w = v.wb - v.wa;
            v.a = 0.0;
        }

        // Flush the cache if the metric changed a lot; the simplex is stale
        if s.count > 1 {
            let metric1 = cache.metric;
            let metric2 = s.metric();
            if metric2 < 0.5 * metric1 || 2.0 * metric1 < metric2 || metric2 < f32::EPSILON {
                s.count = 0;
            }
        }

        if s.count == 0 {
            let v = &mut s.v[0];
            v.index_a = 0;
            v.index_b = 0;
            v.wa = xf_a.apply(proxy_a.vertex(0));
            v.wb = xf_b.apply(proxy_b.vertex(0));
            v.w = v.wb - v.wa;
            v.a = 1.0;
            s.count = 1;
        }
        s
    }

    fn write_cache(&self, cache: &mut SimplexCache) {
        cache.metric = self.metric();
        cache.count = self.count;
        for i in 0..self.count {
            cache.index_a[i] = self.v[i].index_a;
            cache.index_b[i] = self.v[i].index_b;
        }
    }

    fn search_direction(&self) -> Vec2 {
        match self.count {
            1 => -self.v[0].w,
            2 => {
                let e12 = self.v[1].w - self.v[0].w;
                let sgn = cross(e12, -self.v[0].w);
                if sgn > 0.0 {
                    // Origin is left of e12
                    cross_sv(1.0, e12)
                } else {
                    cross_vs(e12, 1.0)
                }
            }
            _ => {
                debug_assert!(false, "invalid simplex count {}", self.count);
                Vec2::ZERO
            }
        }
    }

    fn closest_point(&self) -> Vec2 {
        match self.count {
            1 => self.v[0].w,
            2 => self.v[0].a * self.v[0].w + self.v[1].a * self.v[1].w,
            3 => Vec2::ZERO,
            _ => {
                debug_assert!(false, "invalid simplex count {}", self.count);
                Vec2::ZERO
            }
        }
    }

    fn witness_points(&self) -> (Vec2, Vec2) {
        let v = &self.v;
        match self.count {
            1 => (v[0].wa, v[0].wb),
            2 => (
                v[0].a * v[0].wa + v[1].a * v[1].wa,
                v[0].a * v[0].wb + v[1].a * v[1].wb,
            ),
            3 => {
                let p = v[0].a * v[0].wa + v[1].a * v[1].wa + v[2].a * v[2].wa;
                (p, p)
            }
            _ => {
                debug_assert!(false, "invalid simplex count {}", self.count);
                (Vec2::ZERO, Vec2::ZERO)
            }
        }
    }

    fn metric(&self) -> f32 {
        match self.count {
            1 => 0.0,
            2 => self.v[0].w.distance(self.v[1].w),
            3 => cross(self.v[1].w - self.v[0].w, self.v[2].w - self.v[0].w),
            _ => {
                debug_assert!(false, "invalid simplex count {}", self.count);
                0.0
            }
        }
    }

    // Closest point on a segment via barycentric coordinates.
    //
    // Regions:
    //   w1 region: d12_2 <= 0
    //   w2 region: d12_1 <= 0
    //   e12:       otherwise
    fn solve2(&mut self) {
        let w1 = self.v[0].w;
        let w2 = self.v[1].w;
        let e12 = w2 - w1;

        let d12_2 = -w1.dot(e12);
        if d12_2 <= 0.0 {
            self.v[0].a = 1.0;
            self.count = 1;
            return;
        }

        let d12_1 = w2.dot(e12);
        if d12_1 <= 0.0 {
            self.v[1].a = 1.0;
            self.count = 1;
            self.v[0] = self.v[1];
            return;
        }

        let inv_d12 = 1.0 / (d12_1 + d12_2);
        self.v[0].a = d12_1 * inv_d12;
        self.v[1].a = d12_2 * inv_d12;
        self.count = 2;
    }

    // Closest feature of a triangle: vertex, edge, or interior.
    fn solve3(&mut self) {
        let w1 = self.v[0].w;
        let w2 = self.v[1].w;
        let w3 = self.v[2].w;

        let e12 = w2 - w1;
        let d12_1 = w2.dot(e12);
        let d12_2 = -w1.dot(e12);

        let e13 = w3 - w1;
        let d13_1 = w3.dot(e13);
        let d13_2 = -w1.dot(e13);

        let e23 = w3 - w2;
        let d23_1 = w3.dot(e23);
        let d23_2 = -w2.dot(e23);

        let n123 = cross(e12, e13);
        let d123_1 = n123 * cross(w2, w3);
        let d123_2 = n123 * cross(w3, w1);
        let d123_3 = n123 * cross(w1, w2);

        // w1 region
        if d12_2 <= 0.0 && d13_2 <= 0.0 {
            self.v[0].a = 1.0;
            self.count = 1;
            return;
        }

        // e12
        if d12_1 > 0.0 && d12_2 > 0.0 && d123_3 <= 0.0 {
            let inv_d12 = 1.0 / (d12_1 + d12_2);
            self.v[0].a = d12_1 * inv_d12;
            self.v[1].a = d12_2 * inv_d12;
            self.count = 2;
            return;
        }

        // e13
        if d13_1 > 0.0 && d13_2 > 0.0 && d123_2 <= 0.0 {
            let inv_d13 = 1.0 / (d13_1 + d13_2);
            self.v[0].a = d13_1 * inv_d13;
            self.v[2].a = d13_2 * inv_d13;
            self.count = 2;
            self.v[1] = self.v[2];
            return;
        }

        // w2 region
        if d12_1 <= 0.0 && d23_2 <= 0.0 {
            self.v[1].a = 1.0;
            self.count = 1;
            self.v[0] = self.v[1];
            return;
        }

        // w3 region
        if d13_1 <= 0.0 && d23_1 <= 0.0 {
            self.v[2].a = 1.0;
            self.count = 1;
            self.v[0] = self.v[2];
            return;
        }

        // e23
        if d23_1 > 0.0 && d23_2 > 0.0 && d123_1 <= 0.0 {
            let inv_d23 = 1.0 / (d23_1 + d23_2);
            self.v[1].a = d23_1 * inv_d23;
            self.v[2].a = d23_2 * inv_d23;
            self.count = 2;
            self.v[0] = self.v[2];
            return;
        }

        // Must be in triangle123
        let inv_d123 = 1.0 / (d123_1 + d123_2 + d123_3);
        self.v[0].a = d123_1 * inv_d123;
        self.v[1].a = d123_2 * inv_d123;
        self.v[2].a = d123_3 * inv_d123;
        self.count = 3;
    }
}

/// Closest points between two proxies. Warm-started from and written back
/// to `cache`. Never fails: overlapping or degenerate input reports zero.
pub fn distance(cache: &mut SimplexCache, input: &DistanceInput) -> DistanceOutput {
    let proxy_a = &input.proxy_a;
    let proxy_b = &input.proxy_b;
    let xf_a = &input.transform_a;
    let xf_b = &input.transform_b;

    let mut simplex = Simplex::read_cache(cache, proxy_a, xf_a, proxy_b, xf_b);

    // Vertex indices from the previous iteration, for duplicate detection
    let mut save_a = [0usize; 3];
    let mut save_b = [0usize; 3];

    let mut iter = 0;
    while iter < MAX_ITERS {
        let save_count = simplex.count;
        for i in 0..save_count {
            save_a[i] = simplex.v[i].index_a;
            save_b[i] = simplex.v[i].index_b;
        }

        match simplex.count {
            1 => {}
            2 => simplex.solve2(),
            3 => simplex.solve3(),
            _ => debug_assert!(false, "invalid simplex count {}", simplex.count),
        }

        // Origin inside the triangle: overlap
        if simplex.count == 3 {
            break;
        }

        let d = simplex.search_direction();

        // Origin is probably on the simplex; further progress is noise
        if d.length_squared() < f32::EPSILON * f32::EPSILON {
            break;
        }

        let vertex = &mut simplex.v[simplex.count];
        vertex.index_a = proxy_a.support(xf_a.q.apply_inv(-d));
        vertex.wa = xf_a.apply(proxy_a.vertex(vertex.index_a));
        vertex.index_b = proxy_b.support(xf_b.q.apply_inv(d));
        vertex.wb = xf_b.apply(proxy_b.vertex(vertex.index_b));
        vertex.w = vertex.wb - vertex.wa;

        iter += 1;

        // A repeated support point means no more progress
        let (new_a, new_b) = (vertex.index_a, vertex.index_b);
        let duplicate = (0..save_count).any(|i| new_a == save_a[i] && new_b == save_b[i]);
        if duplicate {
            break;
        }

        simplex.count += 1;
    }

    let (mut point_a, mut point_b) = simplex.witness_points();
    let mut dist = point_a.distance(point_b);
    simplex.write_cache(cache);

    if input.use_radii {
        if dist < f32::EPSILON {
            // Too close to compute a normal safely
            let p = 0.5 * (point_a + point_b);
            point_a = p;
            point_b = p;
            dist = 0.0;
        } else {
            // Stay on the perimeter even when overlapped so points move smoothly
            let ra = proxy_a.radius;
            let rb = proxy_b.radius;
            dist = (dist - ra - rb).max(0.0);
            let normal = (point_b - point_a).normalize_or_zero();
            point_a += ra * normal;
            point_b -= rb * normal;
        }
    }

    DistanceOutput {
        point_a,
        point_b,
        distance: dist,
        iterations: iter,
    }
}

/// Do two shape children overlap (radii included).
pub fn test_overlap(
    shape_a: &Shape,
    index_a: usize,
    shape_b: &Shape,
    index_b: usize,
    xf_a: &Transform,
    xf_b: &Transform,
) -> bool {
    let input = DistanceInput {
        proxy_a: shape_a.distance_proxy(index_a),
        proxy_b: shape_b.distance_proxy(index_b),
        transform_a: *xf_a,
        transform_b: *xf_b,
        use_radii: true,
    };
    let mut cache = SimplexCache::default();
    let output = distance(&mut cache, &input);
    output.distance < 10.0 * f32::EPSILON
}

/// Cast B along `translation_b` against a static A using GJK
/// conservative advancement. `None` on a miss or an initial overlap.
pub fn shape_cast(input: &ShapeCastInput, settings: &Settings) -> Option<ShapeCastOutput> {
    let proxy_a = &input.proxy_a;
    let proxy_b = &input.proxy_b;

    let radius_a = proxy_a.radius.max(settings.polygon_radius);
    let radius_b = proxy_b.radius.max(settings.polygon_radius);
    let radius = radius_a + radius_b;

    let xf_a = &input.transform_a;
    let xf_b = &input.transform_b;

    let r = input.translation_b;
    let mut n = Vec2::ZERO;
    let mut lambda = 0.0;

    let mut simplex = Simplex::default();

    // Initial support point
    let index_a = proxy_a.support(xf_a.q.apply_inv(-r));
    let wa = xf_a.apply(proxy_a.vertex(index_a));
    let index_b = proxy_b.support(xf_b.q.apply_inv(r));
    let wb = xf_b.apply(proxy_b.vertex(index_b));
    let mut v = wa - wb;

    // Sigma is the target distance between polygons
    let sigma = settings.polygon_radius.max(radius - settings.polygon_radius);
    let tolerance = 0.5 * settings.linear_slop;

    let mut iter = 0;
    while iter < MAX_ITERS && v.length() - sigma > tolerance {
        let index_a = proxy_a.support(xf_a.q.apply_inv(-v));
        let wa = xf_a.apply(proxy_a.vertex(index_a));
        let index_b = proxy_b.support(xf_b.q.apply_inv(v));
        let wb = xf_b.apply(proxy_b.vertex(index_b));
        let p = wa - wb;

        v = v.normalize_or_zero();

        // Intersect ray with plane
        let vp = v.dot(p);
        let vr = v.dot(r);
        if vp - sigma > lambda * vr {
            if vr <= 0.0 {
                return None;
            }
            lambda = (vp - sigma) / vr;
            if lambda > 1.0 {
                return None;
            }
            n = -v;
            simplex.count = 0;
        }

        // Reverse the simplex since it works with B - A; shift by lambda * r
        // because we want the closest point on the current configuration.
        let vertex = &mut simplex.v[simplex.count];
        vertex.index_a = index_b;
        vertex.wa = wb + lambda * r;
        vertex.index_b = index_a;
        vertex.wb = wa;
        vertex.w = vertex.wb - vertex.wa;
        vertex.a = 1.0;
        simplex.count += 1;

        match simplex.count {
            1 => {}
            2 => simplex.solve2(),
            3 => simplex.solve3(),
            _ => debug_assert!(false, "invalid simplex count {}", simplex.count),
        }

        // Overlap
        if simplex.count == 3 {
            return None;
        }

        v = simplex.closest_point();
        iter += 1;
    }

    if iter == 0 {
        // Initial overlap
        return None;
    }

    // Prepare output; witness roles are reversed
    let (_point_b, point_a) = simplex.witness_points();
    if v.length_squared() > 0.0 {
        n = (-v).normalize();
    }

    Some(ShapeCastOutput {
        point: point_a + radius_a * n,
        normal: n,
        lambda,
        iterations: iter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{CircleShape, PolygonShape};

    fn box_proxy(hx: f32, hy: f32) -> DistanceProxy {
        PolygonShape::new_box(hx, hy).distance_proxy(0)
    }

    #[test]
    fn test_distance_between_separated_boxes() {
        let input = DistanceInput {
            proxy_a: box_proxy(1.0, 1.0),
            proxy_b: box_proxy(1.0, 1.0),
            transform_a: Transform::IDENTITY,
            transform_b: Transform::new(Vec2::new(5.0, 0.0), 0.0),
            use_radii: false,
        };
        let mut cache = SimplexCache::default();
        let out = distance(&mut cache, &input);
        assert!((out.distance - 3.0).abs() < 1e-5);
        assert!((out.point_a.x - 1.0).abs() < 1e-5);
        assert!((out.point_b.x - 4.0).abs() < 1e-5);
        assert!(cache.count >= 1 && cache.count <= 2);
    }

    #[test]
    fn test_distance_overlap_reports_zero() {
        let input = DistanceInput {
            proxy_a: box_proxy(1.0, 1.0),
            proxy_b: box_proxy(1.0, 1.0),
            transform_a: Transform::IDENTITY,
            transform_b: Transform::new(Vec2::new(0.5, 0.3), 0.4),
            use_radii: false,
        };
        let mut cache = SimplexCache::default();
        let out = distance(&mut cache, &input);
        assert!(out.distance.abs() < 1e-5);
    }

    #[test]
    fn test_distance_with_radii_shrinks_to_surface() {
        let circle = CircleShape::new(Vec2::ZERO, 0.5);
        let input = DistanceInput {
            proxy_a: circle.distance_proxy(0),
            proxy_b: circle.distance_proxy(0),
            transform_a: Transform::IDENTITY,
            transform_b: Transform::new(Vec2::new(3.0, 4.0), 0.0),
            use_radii: true,
        };
        let mut cache = SimplexCache::default();
        let out = distance(&mut cache, &input);
        assert!((out.distance - 4.0).abs() < 1e-5);
        assert!((out.point_a - Vec2::new(0.3, 0.4)).length() < 1e-5);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = PolygonShape::from_points(&[
            Vec2::new(-1.0, -0.5),
            Vec2::new(1.5, -0.2),
            Vec2::new(0.4, 1.3),
        ])
        .unwrap();
        let b = box_proxy(0.7, 0.3);
        let xf_a = Transform::new(Vec2::new(0.2, -0.1), 0.3);
        let xf_b = Transform::new(Vec2::new(3.1, 1.7), -0.8);
        let mut cache = SimplexCache::default();
        let ab = distance(
            &mut cache,
            &DistanceInput {
                proxy_a: a.distance_proxy(0),
                proxy_b: b,
                transform_a: xf_a,
                transform_b: xf_b,
                use_radii: false,
            },
        );
        let mut cache = SimplexCache::default();
        let ba = distance(
            &mut cache,
            &DistanceInput {
                proxy_a: b,
                proxy_b: a.distance_proxy(0),
                transform_a: xf_b,
                transform_b: xf_a,
                use_radii: false,
            },
        );
        assert!((ab.distance - ba.distance).abs() < 1e-4);
    }

    #[test]
    fn test_warm_started_cache_is_reused() {
        let input = DistanceInput {
            proxy_a: box_proxy(1.0, 1.0),
            proxy_b: box_proxy(0.5, 0.5),
            transform_a: Transform::IDENTITY,
            transform_b: Transform::new(Vec2::new(4.0, 0.2), 0.1),
            use_radii: false,
        };
        let mut cache = SimplexCache::default();
        let first = distance(&mut cache, &input);
        let second = distance(&mut cache, &input);
        assert!((first.distance - second.distance).abs() < 1e-6);
        assert!(second.iterations <= first.iterations);
    }

    #[test]
    fn test_stale_cache_is_discarded() {
        let input = DistanceInput {
            proxy_a: box_proxy(1.0, 1.0),
            proxy_b: box_proxy(1.0, 1.0),
            transform_a: Transform::IDENTITY,
            transform_b: Transform::new(Vec2::new(5.0, 0.0), 0.0),
            use_radii: false,
        };
        let mut cache = SimplexCache {
            metric: 1000.0,
            count: 2,
            index_a: [0, 1, 0],
            index_b: [2, 3, 0],
        };
        let out = distance(&mut cache, &input);
        assert!((out.distance - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_test_overlap_shapes() {
        let a = Shape::Polygon(PolygonShape::new_box(1.0, 1.0));
        let b = Shape::Circle(CircleShape::new(Vec2::ZERO, 0.5));
        let near = Transform::new(Vec2::new(1.4, 0.0), 0.0);
        let far = Transform::new(Vec2::new(1.6, 0.0), 0.0);
        assert!(test_overlap(&a, 0, &b, 0, &Transform::IDENTITY, &near));
        assert!(!test_overlap(&a, 0, &b, 0, &Transform::IDENTITY, &far));
    }

    #[test]
    fn test_shape_cast_hits_box() {
        let settings = Settings::default();
        let input = ShapeCastInput {
            proxy_a: box_proxy(1.0, 1.0),
            proxy_b: CircleShape::new(Vec2::ZERO, 0.5).distance_proxy(0),
            transform_a: Transform::IDENTITY,
            transform_b: Transform::new(Vec2::new(-5.0, 0.0), 0.0),
            translation_b: Vec2::new(10.0, 0.0),
        };
        let out = shape_cast(&input, &settings).unwrap();
        // B travels 3.5 units before touching, minus the polygon skin
        assert!(out.lambda > 0.33 && out.lambda < 0.36);
        assert!((out.normal - Vec2::new(-1.0, 0.0)).length() < 1e-3);
    }

    #[test]
    fn test_shape_cast_miss() {
        let settings = Settings::default();
        let input = ShapeCastInput {
            proxy_a: box_proxy(1.0, 1.0),
            proxy_b: CircleShape::new(Vec2::ZERO, 0.5).distance_proxy(0),
            transform_a: Transform::IDENTITY,
            transform_b: Transform::new(Vec2::new(-5.0, 3.0), 0.0),
            translation_b: Vec2::new(10.0, 0.0),
        };
        assert!(shape_cast(&input, &settings).is_none());
    }
}
