use clank2d::*;
use glam::Vec2;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut world = World::new(WorldConfig { enable_timing: true, ..Default::default() })
        .expect("default settings are valid");

    let ground = world.create_body(&BodyDef::fixed(Vec2::ZERO));
    let floor = EdgeShape::two_sided(Vec2::new(-20.0, 0.0), Vec2::new(20.0, 0.0));
    world.create_fixture(ground, &FixtureDef::new(floor, 0.0)).expect("ground exists");

    let mut boxes = Vec::new();
    for i in 0..8 {
        let body = world.create_body(&BodyDef::dynamic(Vec2::new(0.0, 0.5 + 1.1 * i as f32)));
        let mut def = FixtureDef::new(PolygonShape::new_box(0.5, 0.5), 1.0);
        def.friction = 0.6;
        world.create_fixture(body, &def).expect("body exists");
        boxes.push(body);
    }

    for frame in 0..240 {
        world.step(1.0 / 60.0, &mut NoopListener);
        if frame % 60 == 59 {
            let top = world.body(boxes[7]).expect("body exists");
            println!(
                "t={:.1}s top=({:.3},{:.3}) v={:.4} contacts={}",
                (frame + 1) as f32 / 60.0,
                top.position().x,
                top.position().y,
                top.linear_velocity().length(),
                world.contact_count()
            );
            if let Some(t) = world.last_timing() {
                println!(
                    "timing: step={:.3}ms collide={:.3}ms solve={:.3}ms toi={:.3}ms",
                    t.step_ms, t.collide_ms, t.solve_ms, t.solve_toi_ms
                );
            }
        }
    }
}
