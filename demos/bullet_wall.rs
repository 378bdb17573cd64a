use clank2d::*;
use glam::Vec2;

/// Prints every impact the bullet makes.
struct ImpactLog;

impl ContactListener for ImpactLog {
    fn begin_contact(&mut self, contact: &ContactView<'_>) {
        let n = contact.world_manifold.normal;
        println!(
            "begin: {:?} vs {:?} n=({:.2},{:.2})",
            contact.fixture_a.handle, contact.fixture_b.handle, n.x, n.y
        );
    }

    fn post_solve(&mut self, _contact: &ContactView<'_>, impulse: &ContactImpulse) {
        if impulse.count > 0 && impulse.normal_impulses[0] > 1.0 {
            println!("impact: normal impulse={:.3}", impulse.normal_impulses[0]);
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut world = World::new(WorldConfig { gravity: Vec2::ZERO, ..Default::default() })
        .expect("default settings are valid");

    let wall = world.create_body(&BodyDef::fixed(Vec2::new(5.0, 0.0)));
    world
        .create_fixture(wall, &FixtureDef::new(PolygonShape::new_box(0.05, 2.0), 0.0))
        .expect("wall exists");

    let bullet = world.create_body(&BodyDef {
        body_type: BodyType::Dynamic,
        linear_velocity: Vec2::new(300.0, 0.0),
        bullet: true,
        ..Default::default()
    });
    world
        .create_fixture(bullet, &FixtureDef::new(CircleShape::new(Vec2::ZERO, 0.05), 1.0))
        .expect("bullet exists");

    let mut log = ImpactLog;
    for _ in 0..30 {
        world.step(1.0 / 60.0, &mut log);
    }

    let b = world.body(bullet).expect("bullet exists");
    let stats = world.toi_stats();
    println!(
        "bullet at x={:.3} (wall face at 4.95) toi calls={} max iters={} max root iters={}",
        b.position().x,
        stats.toi_calls,
        stats.toi_max_iters,
        stats.toi_max_root_iters
    );
}
