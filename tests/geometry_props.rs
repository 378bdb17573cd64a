use clank2d::distance::{DistanceInput, SimplexCache, distance, test_overlap};
use clank2d::narrowphase::collide;
use clank2d::*;
use glam::Vec2;
use proptest::prelude::*;

fn point() -> impl Strategy<Value = Vec2> {
    (-1.0f32..1.0, -1.0f32..1.0).prop_map(|(x, y)| Vec2::new(x, y))
}

fn polygon() -> impl Strategy<Value = Vec<Vec2>> {
    prop::collection::vec(point(), 3..8)
}

fn transform() -> impl Strategy<Value = Transform> {
    (-3.0f32..3.0, -3.0f32..3.0, -3.14f32..3.14).prop_map(|(x, y, a)| Transform::new(Vec2::new(x, y), a))
}

fn query(a: &Shape, xf_a: &Transform, b: &Shape, xf_b: &Transform) -> f32 {
    let mut cache = SimplexCache::default();
    let input = DistanceInput {
        proxy_a: a.distance_proxy(0),
        proxy_b: b.distance_proxy(0),
        transform_a: *xf_a,
        transform_b: *xf_b,
        use_radii: false,
    };
    distance(&mut cache, &input).distance
}

proptest! {
    #[test]
    fn distance_is_symmetric(pa in polygon(), pb in polygon(), xa in transform(), xb in transform()) {
        let (Ok(a), Ok(b)) = (PolygonShape::from_points(&pa), PolygonShape::from_points(&pb)) else {
            return Ok(());
        };
        let (a, b) = (Shape::from(a), Shape::from(b));

        let ab = query(&a, &xa, &b, &xb);
        let ba = query(&b, &xb, &a, &xa);
        prop_assert!(ab >= 0.0);
        prop_assert!((ab - ba).abs() <= 1e-3 * (1.0 + ab), "ab={} ba={}", ab, ba);
    }

    #[test]
    fn separated_polygons_have_no_manifold(pa in polygon(), pb in polygon(), xa in transform(), xb in transform()) {
        let (Ok(a), Ok(b)) = (PolygonShape::from_points(&pa), PolygonShape::from_points(&pb)) else {
            return Ok(());
        };
        let (a, b) = (Shape::from(a), Shape::from(b));

        // Well clear of the skin radii: no contact points.
        let gap = query(&a, &xa, &b, &xb);
        prop_assume!(gap > 0.1);
        let manifold = collide(&a, 0, &xa, &b, 0, &xb);
        prop_assert_eq!(manifold.point_count, 0);
        prop_assert!(!test_overlap(&a, 0, &b, 0, &xa, &xb));
    }

    #[test]
    fn circle_manifold_matches_radii(
        ca in point(), cb in point(), ra in 0.05f32..1.0, rb in 0.05f32..1.0
    ) {
        let a = Shape::from(CircleShape::new(Vec2::ZERO, ra));
        let b = Shape::from(CircleShape::new(Vec2::ZERO, rb));
        let xa = Transform::new(ca * 2.0, 0.0);
        let xb = Transform::new(cb * 2.0, 0.0);

        let d = (xb.p - xa.p).length();
        prop_assume!((d - (ra + rb)).abs() > 1e-4);

        let manifold = collide(&a, 0, &xa, &b, 0, &xb);
        prop_assert_eq!(manifold.point_count == 1, d <= ra + rb);
        if manifold.point_count == 1 {
            prop_assert_eq!(manifold.points[0].local_point, Vec2::ZERO);
        }
    }
}

#[test]
fn test_settings_and_world_config_from_json() {
    let settings: Settings = serde_json::from_str(r#"{ "linear_slop": 0.01, "block_solve": false }"#).unwrap();
    assert_eq!(settings.linear_slop, 0.01);
    assert!(!settings.block_solve);
    assert_eq!(settings.velocity_iterations, Settings::default().velocity_iterations);

    let cfg: WorldConfig = serde_json::from_str(r#"{ "gravity": [0.0, -9.8] }"#).unwrap();
    assert_eq!(cfg.gravity, Vec2::new(0.0, -9.8));
    assert!(World::new(cfg).is_ok());
}
