//! Minimal contact world: bodies, fixtures and the contact graph.
//!
//! Bodies and fixtures live in slotmap arenas and are addressed by
//! generational handles; a destroyed handle reports [`Error::StaleHandle`]
//! instead of aliasing a newer object. Contacts are created from broad-phase
//! pairs, updated by the narrow-phase every step and destroyed once their
//! fat AABBs stop overlapping.
//!
//! All awake non-static bodies are solved as a single island. There is no
//! sleeping and there are no joints.

use std::collections::HashMap;
use std::time::Instant;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use tracing::{debug, instrument, trace};

use crate::api::{ContactFilter, ContactListener, DefaultContactFilter, ShapeApi};
use crate::broad_phase::BroadPhase;
use crate::collision::{Manifold, WorldManifold};
use crate::contact_solver::{ContactSolver, SolverBody, SolverContact};
use crate::distance::test_overlap;
use crate::dynamic_tree::ProxyId;
use crate::error::{Error, Result};
use crate::math::{Rot, Sweep, Transform, cross, cross_sv};
use crate::narrowphase::{collide, contact_order};
use crate::shapes::Shape;
use crate::time_of_impact::{ToiInput, ToiState, ToiStats, time_of_impact};
use crate::types::*;

slotmap::new_key_type! {
    /// Handle to a body in a [`World`].
    pub struct BodyHandle;
    /// Handle to a fixture in a [`World`].
    pub struct FixtureHandle;
    /// Handle to a contact in a [`World`].
    pub struct ContactKey;
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyType {
    /// Zero mass, zero velocity, moved only by the user.
    #[default]
    Static,
    /// Zero mass, user-set velocity, not pushed by contacts.
    Kinematic,
    /// Positive mass, moved by gravity, forces and contacts.
    Dynamic,
}

/// Body construction parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyDef {
    pub body_type: BodyType,
    /// World position of the body origin.
    pub position: Vec2,
    pub angle: f32,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub gravity_scale: f32,
    /// Bullets get continuous collision against dynamic bodies too.
    pub bullet: bool,
    pub fixed_rotation: bool,
    pub user_data: u64,
}

impl Default for BodyDef {
    fn default() -> Self {
        Self {
            body_type: BodyType::Static,
            position: Vec2::ZERO,
            angle: 0.0,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            gravity_scale: 1.0,
            bullet: false,
            fixed_rotation: false,
            user_data: 0,
        }
    }
}

impl BodyDef {
    pub fn dynamic(position: Vec2) -> Self {
        Self { body_type: BodyType::Dynamic, position, ..Default::default() }
    }

    pub fn fixed(position: Vec2) -> Self {
        Self { position, ..Default::default() }
    }
}

/// Fixture construction parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct FixtureDef {
    pub shape: Shape,
    /// Mass per unit area. Zero density fixtures do not contribute mass.
    pub density: f32,
    pub friction: f32,
    pub restitution: f32,
    /// Sensors report begin/end but never generate a response.
    pub is_sensor: bool,
    pub filter: LayerMask,
    pub user_data: u64,
}

impl FixtureDef {
    pub fn new(shape: impl Into<Shape>, density: f32) -> Self {
        Self {
            shape: shape.into(),
            density,
            friction: 0.2,
            restitution: 0.0,
            is_sensor: false,
            filter: LayerMask::default(),
            user_data: 0,
        }
    }
}

/// World construction parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub gravity: Vec2,
    pub settings: Settings,
    /// Record per-phase wall-clock timings of each step.
    pub enable_timing: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self { gravity: Vec2::new(0.0, -10.0), settings: Settings::default(), enable_timing: false }
    }
}

/// Wall-clock timings of the last step, in milliseconds.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct WorldTiming {
    pub step_ms: f64,
    pub collide_ms: f64,
    pub solve_ms: f64,
    pub solve_toi_ms: f64,
    pub broadphase_ms: f64,
}

/// Broad-phase user data: one child of one fixture.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixtureProxyRef {
    pub fixture: FixtureHandle,
    pub child: usize,
}

#[derive(Copy, Clone, Debug)]
struct FixtureProxy {
    aabb: Aabb,
    proxy_id: ProxyId,
}

/// A rigid body.
#[derive(Clone, Debug)]
pub struct Body {
    body_type: BodyType,
    xf: Transform,
    sweep: Sweep,
    linear_velocity: Vec2,
    angular_velocity: f32,
    force: Vec2,
    torque: f32,
    mass: f32,
    inv_mass: f32,
    /// Rotational inertia about the center of mass.
    inertia: f32,
    inv_i: f32,
    linear_damping: f32,
    angular_damping: f32,
    gravity_scale: f32,
    bullet: bool,
    fixed_rotation: bool,
    fixtures: Vec<FixtureHandle>,
    /// Contact edges: every contact this body takes part in.
    contacts: Vec<ContactKey>,
    island_index: usize,
    island_flag: bool,
    pub user_data: u64,
}

impl Body {
    fn new(def: &BodyDef) -> Self {
        let xf = Transform::new(def.position, def.angle);
        let sweep = Sweep {
            local_center: Vec2::ZERO,
            c0: def.position,
            c: def.position,
            a0: def.angle,
            a: def.angle,
            alpha0: 0.0,
        };
        let (mass, inv_mass) = if def.body_type == BodyType::Dynamic { (1.0, 1.0) } else { (0.0, 0.0) };
        let moving = def.body_type != BodyType::Static;

        Self {
            body_type: def.body_type,
            xf,
            sweep,
            linear_velocity: if moving { def.linear_velocity } else { Vec2::ZERO },
            angular_velocity: if moving { def.angular_velocity } else { 0.0 },
            force: Vec2::ZERO,
            torque: 0.0,
            mass,
            inv_mass,
            inertia: 0.0,
            inv_i: 0.0,
            linear_damping: def.linear_damping,
            angular_damping: def.angular_damping,
            gravity_scale: def.gravity_scale,
            bullet: def.bullet,
            fixed_rotation: def.fixed_rotation,
            fixtures: Vec::new(),
            contacts: Vec::new(),
            island_index: 0,
            island_flag: false,
            user_data: def.user_data,
        }
    }

    pub fn body_type(&self) -> BodyType {
        self.body_type
    }

    pub fn transform(&self) -> Transform {
        self.xf
    }

    /// World position of the body origin.
    pub fn position(&self) -> Vec2 {
        self.xf.p
    }

    pub fn angle(&self) -> f32 {
        self.sweep.a
    }

    pub fn world_center(&self) -> Vec2 {
        self.sweep.c
    }

    pub fn local_center(&self) -> Vec2 {
        self.sweep.local_center
    }

    pub fn linear_velocity(&self) -> Vec2 {
        self.linear_velocity
    }

    pub fn angular_velocity(&self) -> f32 {
        self.angular_velocity
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    /// Rotational inertia about the body origin.
    pub fn inertia(&self) -> f32 {
        self.inertia + self.mass * self.sweep.local_center.length_squared()
    }

    pub fn is_bullet(&self) -> bool {
        self.bullet
    }

    pub fn fixtures(&self) -> &[FixtureHandle] {
        &self.fixtures
    }

    fn synchronize_transform(&mut self) {
        self.xf.q = Rot::new(self.sweep.a);
        self.xf.p = self.sweep.c - self.xf.q.apply(self.sweep.local_center);
    }

    /// Move the sweep start to `alpha` and put the body there.
    fn advance(&mut self, alpha: f32) {
        self.sweep.advance(alpha);
        self.sweep.c = self.sweep.c0;
        self.sweep.a = self.sweep.a0;
        self.synchronize_transform();
    }

    fn solver_body(&self) -> SolverBody {
        SolverBody { inv_mass: self.inv_mass, inv_i: self.inv_i, local_center: self.sweep.local_center }
    }
}

/// Only dynamic bodies respond to contacts.
fn bodies_should_collide(a: &Body, b: &Body) -> bool {
    a.body_type == BodyType::Dynamic || b.body_type == BodyType::Dynamic
}

/// A shape attached to a body.
#[derive(Clone, Debug)]
pub struct Fixture {
    body: BodyHandle,
    shape: Shape,
    density: f32,
    pub friction: f32,
    pub restitution: f32,
    is_sensor: bool,
    filter: LayerMask,
    proxies: Vec<FixtureProxy>,
    pub user_data: u64,
}

impl Fixture {
    pub fn body(&self) -> BodyHandle {
        self.body
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn density(&self) -> f32 {
        self.density
    }

    pub fn is_sensor(&self) -> bool {
        self.is_sensor
    }

    pub fn filter(&self) -> LayerMask {
        self.filter
    }

    /// Fat AABB of one child as stored in the broad-phase.
    pub fn aabb(&self, child: usize) -> Option<Aabb> {
        self.proxies.get(child).map(|p| p.aabb)
    }
}

/// Read-only fixture data handed to filters and listeners.
#[derive(Copy, Clone, Debug)]
pub struct FixtureView<'a> {
    pub handle: FixtureHandle,
    pub body: BodyHandle,
    pub shape: &'a Shape,
    pub filter: LayerMask,
    pub is_sensor: bool,
    pub user_data: u64,
}

/// Read-only contact data handed to listeners.
#[derive(Copy, Clone, Debug)]
pub struct ContactView<'a> {
    pub key: ContactKey,
    pub fixture_a: FixtureView<'a>,
    pub child_a: usize,
    pub fixture_b: FixtureView<'a>,
    pub child_b: usize,
    pub manifold: &'a Manifold,
    pub world_manifold: WorldManifold,
    pub touching: bool,
    pub enabled: bool,
}

/// Impulses applied by the solver to one contact, per manifold point.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ContactImpulse {
    pub normal_impulses: [f32; MAX_MANIFOLD_POINTS],
    pub tangent_impulses: [f32; MAX_MANIFOLD_POINTS],
    pub count: usize,
}

impl ContactImpulse {
    fn from_manifold(manifold: &Manifold) -> Self {
        let mut impulse = ContactImpulse { count: manifold.point_count, ..Default::default() };
        for (i, mp) in manifold.points().iter().enumerate() {
            impulse.normal_impulses[i] = mp.normal_impulse;
            impulse.tangent_impulses[i] = mp.tangent_impulse;
        }
        impulse
    }
}

/// Friction mixing: either fixture can drive friction to zero.
fn mix_friction(a: f32, b: f32) -> f32 {
    (a * b).sqrt()
}

/// Restitution mixing: anything bounces off a bouncy surface.
fn mix_restitution(a: f32, b: f32) -> f32 {
    a.max(b)
}

#[derive(Clone, Debug)]
struct Contact {
    fixture_a: FixtureHandle,
    child_a: usize,
    fixture_b: FixtureHandle,
    child_b: usize,
    manifold: Manifold,
    friction: f32,
    restitution: f32,
    tangent_speed: f32,
    touching: bool,
    enabled: bool,
    /// Re-run the filter on the next collide pass.
    filter_flag: bool,
    island_flag: bool,
    /// `toi` holds a valid time of impact.
    toi_flag: bool,
    toi: f32,
    toi_count: u32,
}

fn pair_key(a: FixtureProxyRef, b: FixtureProxyRef) -> (FixtureProxyRef, FixtureProxyRef) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn fixture_view(fixtures: &SlotMap<FixtureHandle, Fixture>, handle: FixtureHandle) -> FixtureView<'_> {
    let f = &fixtures[handle];
    FixtureView {
        handle,
        body: f.body,
        shape: &f.shape,
        filter: f.filter,
        is_sensor: f.is_sensor,
        user_data: f.user_data,
    }
}

fn contact_view<'a>(
    bodies: &SlotMap<BodyHandle, Body>,
    fixtures: &'a SlotMap<FixtureHandle, Fixture>,
    contacts: &'a SlotMap<ContactKey, Contact>,
    key: ContactKey,
) -> ContactView<'a> {
    let c = &contacts[key];
    let fixture_a = fixture_view(fixtures, c.fixture_a);
    let fixture_b = fixture_view(fixtures, c.fixture_b);
    let world_manifold = WorldManifold::new(
        &c.manifold,
        &bodies[fixture_a.body].xf,
        fixture_a.shape.radius(),
        &bodies[fixture_b.body].xf,
        fixture_b.shape.radius(),
    );
    ContactView {
        key,
        fixture_a,
        child_a: c.child_a,
        fixture_b,
        child_b: c.child_b,
        manifold: &c.manifold,
        world_manifold,
        touching: c.touching,
        enabled: c.enabled,
    }
}

fn elapsed_ms(t: Option<Instant>) -> f64 {
    t.map(|t| t.elapsed().as_secs_f64() * 1000.0).unwrap_or(0.0)
}

/// The contact world.
pub struct World {
    pub cfg: WorldConfig,
    bodies: SlotMap<BodyHandle, Body>,
    fixtures: SlotMap<FixtureHandle, Fixture>,
    contacts: SlotMap<ContactKey, Contact>,
    pair_index: HashMap<(FixtureProxyRef, FixtureProxyRef), ContactKey>,
    broad_phase: BroadPhase<FixtureProxyRef>,
    filter: Box<dyn ContactFilter>,
    new_contacts: bool,
    inv_dt0: f32,
    toi_stats: ToiStats,
    last_timing: Option<WorldTiming>,
}

impl World {
    pub fn new(cfg: WorldConfig) -> Result<Self> {
        cfg.settings.validate()?;
        Ok(Self {
            broad_phase: BroadPhase::new(&cfg.settings),
            cfg,
            bodies: SlotMap::with_key(),
            fixtures: SlotMap::with_key(),
            contacts: SlotMap::with_key(),
            pair_index: HashMap::new(),
            filter: Box::new(DefaultContactFilter),
            new_contacts: false,
            inv_dt0: 0.0,
            toi_stats: ToiStats::default(),
            last_timing: None,
        })
    }

    pub fn set_contact_filter(&mut self, filter: Box<dyn ContactFilter>) {
        self.filter = filter;
    }

    pub fn settings(&self) -> &Settings {
        &self.cfg.settings
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    pub fn proxy_count(&self) -> usize {
        self.broad_phase.proxy_count()
    }

    pub fn tree_height(&self) -> i32 {
        self.broad_phase.tree_height()
    }

    pub fn toi_stats(&self) -> ToiStats {
        self.toi_stats
    }

    pub fn last_timing(&self) -> Option<WorldTiming> {
        self.last_timing
    }

    // ---- Bodies ----

    pub fn create_body(&mut self, def: &BodyDef) -> BodyHandle {
        self.bodies.insert(Body::new(def))
    }

    /// Destroy a body with its fixtures and contacts. No end-contact events
    /// are reported for contacts removed this way.
    pub fn destroy_body(&mut self, handle: BodyHandle) -> Result<()> {
        let fixtures = self.body(handle)?.fixtures.clone();
        for fixture in fixtures {
            self.remove_fixture(fixture);
        }
        self.bodies.remove(handle);
        Ok(())
    }

    pub fn body(&self, handle: BodyHandle) -> Result<&Body> {
        self.bodies.get(handle).ok_or(Error::StaleHandle("body"))
    }

    fn body_mut(&mut self, handle: BodyHandle) -> Result<&mut Body> {
        self.bodies.get_mut(handle).ok_or(Error::StaleHandle("body"))
    }

    pub fn bodies(&self) -> impl Iterator<Item = (BodyHandle, &Body)> {
        self.bodies.iter()
    }

    pub fn set_linear_velocity(&mut self, handle: BodyHandle, v: Vec2) -> Result<()> {
        let body = self.body_mut(handle)?;
        if body.body_type != BodyType::Static {
            body.linear_velocity = v;
        }
        Ok(())
    }

    pub fn set_angular_velocity(&mut self, handle: BodyHandle, w: f32) -> Result<()> {
        let body = self.body_mut(handle)?;
        if body.body_type != BodyType::Static {
            body.angular_velocity = w;
        }
        Ok(())
    }

    /// Apply a force at a world point. Cleared after every step.
    pub fn apply_force(&mut self, handle: BodyHandle, force: Vec2, point: Vec2) -> Result<()> {
        let body = self.body_mut(handle)?;
        if body.body_type == BodyType::Dynamic {
            body.force += force;
            body.torque += cross(point - body.sweep.c, force);
        }
        Ok(())
    }

    /// Apply an impulse at a world point. Changes velocity immediately.
    pub fn apply_linear_impulse(&mut self, handle: BodyHandle, impulse: Vec2, point: Vec2) -> Result<()> {
        let body = self.body_mut(handle)?;
        if body.body_type == BodyType::Dynamic {
            body.linear_velocity += body.inv_mass * impulse;
            body.angular_velocity += body.inv_i * cross(point - body.sweep.c, impulse);
        }
        Ok(())
    }

    pub fn set_bullet(&mut self, handle: BodyHandle, bullet: bool) -> Result<()> {
        self.body_mut(handle)?.bullet = bullet;
        Ok(())
    }

    /// Teleport a body. Contacts are re-evaluated on the next step.
    pub fn set_transform(&mut self, handle: BodyHandle, position: Vec2, angle: f32) -> Result<()> {
        let body = self.body_mut(handle)?;
        body.xf = Transform::new(position, angle);
        body.sweep.c = body.xf.apply(body.sweep.local_center);
        body.sweep.a = angle;
        body.sweep.c0 = body.sweep.c;
        body.sweep.a0 = angle;

        self.synchronize_fixtures(handle);
        self.new_contacts = true;
        Ok(())
    }

    /// Recompute mass, center of mass and inertia from the fixtures.
    fn reset_mass_data(&mut self, handle: BodyHandle) {
        let Some(body) = self.bodies.get_mut(handle) else { return };
        body.mass = 0.0;
        body.inv_mass = 0.0;
        body.inertia = 0.0;
        body.inv_i = 0.0;
        body.sweep.local_center = Vec2::ZERO;

        if body.body_type != BodyType::Dynamic {
            body.sweep.c0 = body.xf.p;
            body.sweep.c = body.xf.p;
            body.sweep.a0 = body.sweep.a;
            return;
        }

        let mut local_center = Vec2::ZERO;
        let mut inertia = 0.0;
        for fixture in body.fixtures.iter().filter_map(|f| self.fixtures.get(*f)) {
            if fixture.density == 0.0 {
                continue;
            }
            let md = fixture.shape.compute_mass(fixture.density);
            body.mass += md.mass;
            local_center += md.mass * md.center;
            inertia += md.inertia;
        }

        if body.mass > 0.0 {
            body.inv_mass = 1.0 / body.mass;
            local_center *= body.inv_mass;
        } else {
            // Dynamic bodies always have positive mass.
            body.mass = 1.0;
            body.inv_mass = 1.0;
        }

        if inertia > 0.0 && !body.fixed_rotation {
            // Center the inertia about the center of mass.
            body.inertia = inertia - body.mass * local_center.length_squared();
            debug_assert!(body.inertia > 0.0);
            body.inv_i = 1.0 / body.inertia;
        } else {
            body.inertia = 0.0;
            body.inv_i = 0.0;
        }

        let old_center = body.sweep.c;
        body.sweep.local_center = local_center;
        body.sweep.c = body.xf.apply(local_center);
        body.sweep.c0 = body.sweep.c;

        // Keep the velocity of the body origin.
        body.linear_velocity += cross_sv(body.angular_velocity, body.sweep.c - old_center);
    }

    // ---- Fixtures ----

    pub fn create_fixture(&mut self, body: BodyHandle, def: &FixtureDef) -> Result<FixtureHandle> {
        let xf = self.body(body)?.xf;
        let handle = self.fixtures.insert(Fixture {
            body,
            shape: def.shape.clone(),
            density: def.density,
            friction: def.friction,
            restitution: def.restitution,
            is_sensor: def.is_sensor,
            filter: def.filter,
            proxies: Vec::new(),
            user_data: def.user_data,
        });

        let fixture = &mut self.fixtures[handle];
        for child in 0..fixture.shape.child_count() {
            let aabb = fixture.shape.compute_aabb(&xf, child);
            let proxy_id = self.broad_phase.create_proxy(&aabb, FixtureProxyRef { fixture: handle, child });
            fixture.proxies.push(FixtureProxy { aabb, proxy_id });
        }

        self.bodies[body].fixtures.push(handle);
        if def.density > 0.0 {
            self.reset_mass_data(body);
        }
        self.new_contacts = true;
        Ok(handle)
    }

    pub fn destroy_fixture(&mut self, handle: FixtureHandle) -> Result<()> {
        let body = self.fixture(handle)?.body;
        self.remove_fixture(handle);
        self.reset_mass_data(body);
        Ok(())
    }

    fn remove_fixture(&mut self, handle: FixtureHandle) {
        let Some(body) = self.fixtures.get(handle).map(|f| f.body) else { return };
        let doomed: Vec<ContactKey> = self.bodies[body]
            .contacts
            .iter()
            .copied()
            .filter(|k| {
                let c = &self.contacts[*k];
                c.fixture_a == handle || c.fixture_b == handle
            })
            .collect();
        for key in doomed {
            self.destroy_contact(key, None);
        }

        let Some(fixture) = self.fixtures.remove(handle) else { return };
        for proxy in &fixture.proxies {
            self.broad_phase.destroy_proxy(proxy.proxy_id);
        }
        if let Some(body) = self.bodies.get_mut(fixture.body) {
            body.fixtures.retain(|f| *f != handle);
        }
    }

    pub fn fixture(&self, handle: FixtureHandle) -> Result<&Fixture> {
        self.fixtures.get(handle).ok_or(Error::StaleHandle("fixture"))
    }

    /// Change a fixture's filter. Existing contacts are re-filtered on the
    /// next step and new pairs are looked for.
    pub fn set_filter(&mut self, handle: FixtureHandle, filter: LayerMask) -> Result<()> {
        let fixture = self.fixtures.get_mut(handle).ok_or(Error::StaleHandle("fixture"))?;
        fixture.filter = filter;

        for contact in self.contacts.values_mut() {
            if contact.fixture_a == handle || contact.fixture_b == handle {
                contact.filter_flag = true;
            }
        }
        for proxy in &self.fixtures[handle].proxies {
            self.broad_phase.touch_proxy(proxy.proxy_id);
        }
        self.new_contacts = true;
        Ok(())
    }

    /// Push the swept AABBs of every fixture on a body into the broad-phase.
    fn synchronize_fixtures(&mut self, handle: BodyHandle) {
        let body = &self.bodies[handle];
        let q1 = Rot::new(body.sweep.a0);
        let xf1 = Transform { p: body.sweep.c0 - q1.apply(body.sweep.local_center), q: q1 };
        let xf2 = body.xf;

        for fh in &body.fixtures {
            let fixture = &mut self.fixtures[*fh];
            let shape = &fixture.shape;
            for (child, proxy) in fixture.proxies.iter_mut().enumerate() {
                let aabb1 = shape.compute_aabb(&xf1, child);
                let aabb2 = shape.compute_aabb(&xf2, child);
                proxy.aabb = Aabb::combine(&aabb1, &aabb2);
                let displacement = aabb2.center() - aabb1.center();
                self.broad_phase.move_proxy(proxy.proxy_id, &proxy.aabb, displacement);
            }
        }
    }

    // ---- Contacts ----

    pub fn contacts(&self) -> impl Iterator<Item = ContactView<'_>> {
        self.contacts
            .keys()
            .map(move |key| contact_view(&self.bodies, &self.fixtures, &self.contacts, key))
    }

    fn find_new_contacts(&mut self) {
        let mut pairs = Vec::new();
        self.broad_phase.update_pairs(|a, b| pairs.push((a, b)));
        for (a, b) in pairs {
            self.add_pair(a, b);
        }
    }

    fn add_pair(&mut self, proxy_a: FixtureProxyRef, proxy_b: FixtureProxyRef) {
        let fixture_a = &self.fixtures[proxy_a.fixture];
        let fixture_b = &self.fixtures[proxy_b.fixture];

        // Fixtures on the same body never collide.
        if fixture_a.body == fixture_b.body {
            return;
        }
        if self.pair_index.contains_key(&pair_key(proxy_a, proxy_b)) {
            return;
        }
        if !bodies_should_collide(&self.bodies[fixture_a.body], &self.bodies[fixture_b.body]) {
            return;
        }

        let view_a = fixture_view(&self.fixtures, proxy_a.fixture);
        let view_b = fixture_view(&self.fixtures, proxy_b.fixture);
        if !self.filter.should_collide(&view_a, &view_b) {
            return;
        }

        let Some(swap) = contact_order(fixture_a.shape.shape_type(), fixture_b.shape.shape_type()) else {
            return;
        };
        let (first, second) = if swap { (proxy_b, proxy_a) } else { (proxy_a, proxy_b) };
        let (fa, fb) = (&self.fixtures[first.fixture], &self.fixtures[second.fixture]);

        let contact = Contact {
            fixture_a: first.fixture,
            child_a: first.child,
            fixture_b: second.fixture,
            child_b: second.child,
            manifold: Manifold::default(),
            friction: mix_friction(fa.friction, fb.friction),
            restitution: mix_restitution(fa.restitution, fb.restitution),
            tangent_speed: 0.0,
            touching: false,
            enabled: true,
            filter_flag: false,
            island_flag: false,
            toi_flag: false,
            toi: 1.0,
            toi_count: 0,
        };
        let (body_a, body_b) = (fa.body, fb.body);
        let key = self.contacts.insert(contact);
        self.pair_index.insert(pair_key(first, second), key);
        self.bodies[body_a].contacts.push(key);
        self.bodies[body_b].contacts.push(key);
        trace!(?key, "contact created");
    }

    fn destroy_contact(&mut self, key: ContactKey, listener: Option<&mut dyn ContactListener>) {
        let Some(contact) = self.contacts.get(key) else { return };
        if let Some(listener) = listener {
            if contact.touching {
                let view = contact_view(&self.bodies, &self.fixtures, &self.contacts, key);
                listener.end_contact(&view);
            }
        }

        if let Some(c) = self.contacts.remove(key) {
            let a = FixtureProxyRef { fixture: c.fixture_a, child: c.child_a };
            let b = FixtureProxyRef { fixture: c.fixture_b, child: c.child_b };
            self.pair_index.remove(&pair_key(a, b));

            for fixture in [c.fixture_a, c.fixture_b] {
                let body = self.fixtures.get(fixture).and_then(|f| self.bodies.get_mut(f.body));
                if let Some(body) = body {
                    body.contacts.retain(|k| *k != key);
                }
            }
        }
    }

    /// Refresh the manifold of one contact and fire begin/end/pre-solve.
    fn update_contact(&mut self, key: ContactKey, listener: &mut dyn ContactListener) {
        let contact = &self.contacts[key];
        let fa = &self.fixtures[contact.fixture_a];
        let fb = &self.fixtures[contact.fixture_b];
        let xf_a = self.bodies[fa.body].xf;
        let xf_b = self.bodies[fb.body].xf;

        let old_manifold = contact.manifold;
        let was_touching = contact.touching;
        let sensor = fa.is_sensor || fb.is_sensor;

        let (manifold, touching) = if sensor {
            let overlap = test_overlap(&fa.shape, contact.child_a, &fb.shape, contact.child_b, &xf_a, &xf_b);
            (Manifold::default(), overlap)
        } else {
            let mut manifold = collide(&fa.shape, contact.child_a, &xf_a, &fb.shape, contact.child_b, &xf_b);

            // Carry impulses over to points with a matching feature id.
            for mp2 in manifold.points[..manifold.point_count].iter_mut() {
                mp2.normal_impulse = 0.0;
                mp2.tangent_impulse = 0.0;
                if let Some(mp1) = old_manifold.points().iter().find(|mp1| mp1.id.key() == mp2.id.key()) {
                    mp2.normal_impulse = mp1.normal_impulse;
                    mp2.tangent_impulse = mp1.tangent_impulse;
                }
            }
            let touching = manifold.point_count > 0;
            (manifold, touching)
        };

        let contact = &mut self.contacts[key];
        contact.manifold = manifold;
        contact.touching = touching;
        contact.enabled = true;

        if !was_touching && !touching {
            return;
        }

        let view = contact_view(&self.bodies, &self.fixtures, &self.contacts, key);
        if !was_touching && touching {
            listener.begin_contact(&view);
        }
        if was_touching && !touching {
            listener.end_contact(&view);
        }
        let enabled = if !sensor && touching { listener.pre_solve(&view, &old_manifold) } else { true };
        self.contacts[key].enabled = enabled;
    }

    /// Narrow-phase pass over every contact.
    fn collide(&mut self, listener: &mut dyn ContactListener) {
        let keys: Vec<ContactKey> = self.contacts.keys().collect();
        for key in keys {
            let contact = &self.contacts[key];
            let (fixture_a, fixture_b) = (contact.fixture_a, contact.fixture_b);
            let fa = &self.fixtures[fixture_a];
            let fb = &self.fixtures[fixture_b];
            let body_a = &self.bodies[fa.body];
            let body_b = &self.bodies[fb.body];

            if contact.filter_flag {
                let keep = bodies_should_collide(body_a, body_b) && {
                    let view_a = fixture_view(&self.fixtures, fixture_a);
                    let view_b = fixture_view(&self.fixtures, fixture_b);
                    self.filter.should_collide(&view_a, &view_b)
                };
                if !keep {
                    self.destroy_contact(key, Some(&mut *listener));
                    continue;
                }
                self.contacts[key].filter_flag = false;
            }

            let contact = &self.contacts[key];
            let fa = &self.fixtures[fixture_a];
            let fb = &self.fixtures[fixture_b];
            let active_a = self.bodies[fa.body].body_type != BodyType::Static;
            let active_b = self.bodies[fb.body].body_type != BodyType::Static;
            if !active_a && !active_b {
                continue;
            }

            let proxy_a = fa.proxies[contact.child_a].proxy_id;
            let proxy_b = fb.proxies[contact.child_b].proxy_id;

            // Fat AABBs apart: the contact is over.
            if !self.broad_phase.test_overlap(proxy_a, proxy_b) {
                self.destroy_contact(key, Some(&mut *listener));
                continue;
            }

            self.update_contact(key, listener);
        }
    }

    // ---- Stepping ----

    /// Advance the world by `dt` seconds.
    #[instrument(level = "debug", skip(self, listener))]
    pub fn step(&mut self, dt: f32, listener: &mut dyn ContactListener) {
        let timing = self.cfg.enable_timing;
        let t_all = if timing { Some(Instant::now()) } else { None };
        let mut report = WorldTiming::default();

        // Pick up fixtures created since the last step.
        if self.new_contacts {
            let t = if timing { Some(Instant::now()) } else { None };
            self.find_new_contacts();
            self.new_contacts = false;
            report.broadphase_ms += elapsed_ms(t);
        }

        let settings = &self.cfg.settings;
        let step = TimeStep {
            dt,
            inv_dt: if dt > 0.0 { 1.0 / dt } else { 0.0 },
            dt_ratio: self.inv_dt0 * dt,
            velocity_iterations: settings.velocity_iterations,
            position_iterations: settings.position_iterations,
            warm_starting: settings.warm_starting,
        };
        let continuous = settings.continuous_physics;

        let t = if timing { Some(Instant::now()) } else { None };
        self.collide(listener);
        report.collide_ms = elapsed_ms(t);

        if step.dt > 0.0 {
            let t = if timing { Some(Instant::now()) } else { None };
            self.solve(&step, listener);
            report.solve_ms = elapsed_ms(t);
        }

        if continuous && step.dt > 0.0 {
            let t = if timing { Some(Instant::now()) } else { None };
            self.solve_toi(&step, listener);
            report.solve_toi_ms = elapsed_ms(t);
        }

        if step.dt > 0.0 {
            self.inv_dt0 = step.inv_dt;
        }

        for body in self.bodies.values_mut() {
            body.force = Vec2::ZERO;
            body.torque = 0.0;
        }

        if let Some(t_all) = t_all {
            report.step_ms = elapsed_ms(Some(t_all));
            self.last_timing = Some(report);
        }

        debug!(
            bodies = self.bodies.len(),
            contacts = self.contacts.len(),
            touching = self.contacts.values().filter(|c| c.touching).count(),
            "step complete"
        );
    }

    /// Integrate every body, solve all touching contacts and update the
    /// broad-phase.
    fn solve(&mut self, step: &TimeStep, listener: &mut dyn ContactListener) {
        let settings = self.cfg.settings.clone();
        let gravity = self.cfg.gravity;
        let h = step.dt;

        let handles: Vec<BodyHandle> = self.bodies.keys().collect();
        let mut positions = Vec::with_capacity(handles.len());
        let mut velocities = Vec::with_capacity(handles.len());
        let mut solver_bodies = Vec::with_capacity(handles.len());

        for (i, handle) in handles.iter().enumerate() {
            let body = &mut self.bodies[*handle];
            body.island_index = i;

            // Store positions for continuous collision.
            body.sweep.c0 = body.sweep.c;
            body.sweep.a0 = body.sweep.a;

            let mut v = body.linear_velocity;
            let mut w = body.angular_velocity;
            if body.body_type == BodyType::Dynamic {
                v += h * body.inv_mass * (body.gravity_scale * body.mass * gravity + body.force);
                w += h * body.inv_i * body.torque;

                // Pade approximation of exponential damping.
                v *= 1.0 / (1.0 + h * body.linear_damping);
                w *= 1.0 / (1.0 + h * body.angular_damping);
            }

            positions.push(Position { c: body.sweep.c, a: body.sweep.a });
            velocities.push(Velocity { v, w });
            solver_bodies.push(body.solver_body());
        }

        let mut solved_keys = Vec::new();
        let mut solver_contacts = Vec::new();
        for (key, contact) in &self.contacts {
            if !contact.enabled || !contact.touching {
                continue;
            }
            let fa = &self.fixtures[contact.fixture_a];
            let fb = &self.fixtures[contact.fixture_b];
            if fa.is_sensor || fb.is_sensor {
                continue;
            }
            solved_keys.push(key);
            solver_contacts.push(SolverContact {
                manifold: contact.manifold,
                index_a: self.bodies[fa.body].island_index,
                index_b: self.bodies[fb.body].island_index,
                radius_a: fa.shape.radius(),
                radius_b: fb.shape.radius(),
                friction: contact.friction,
                restitution: contact.restitution,
                tangent_speed: contact.tangent_speed,
            });
        }

        let mut solver = ContactSolver::new(*step, &settings, solver_contacts, &solver_bodies);
        solver.initialize_velocity_constraints(&positions, &velocities);
        if step.warm_starting {
            solver.warm_start(&mut velocities);
        }
        for _ in 0..step.velocity_iterations {
            solver.solve_velocity_constraints(&mut velocities);
        }
        solver.store_impulses();

        integrate_positions(&settings, h, &mut positions, &mut velocities);

        let mut position_solved = false;
        for _ in 0..step.position_iterations {
            if solver.solve_position_constraints(&mut positions) {
                position_solved = true;
                break;
            }
        }

        for (i, handle) in handles.iter().enumerate() {
            let body = &mut self.bodies[*handle];
            body.sweep.c = positions[i].c;
            body.sweep.a = positions[i].a;
            body.linear_velocity = velocities[i].v;
            body.angular_velocity = velocities[i].w;
            body.synchronize_transform();
        }

        for (i, key) in solved_keys.iter().enumerate() {
            let manifold = solver.contacts()[i].manifold;
            self.contacts[*key].manifold = manifold;
            let impulse = ContactImpulse::from_manifold(&manifold);
            let view = contact_view(&self.bodies, &self.fixtures, &self.contacts, *key);
            listener.post_solve(&view, &impulse);
        }

        trace!(contacts = solved_keys.len(), position_solved, "island solved");

        for handle in &handles {
            if self.bodies[*handle].body_type != BodyType::Static {
                self.synchronize_fixtures(*handle);
            }
        }
        self.find_new_contacts();
    }

    /// Compute the time of impact of one contact over the current step,
    /// as a fraction of the step.
    fn contact_toi(&mut self, key: ContactKey) -> Option<f32> {
        let contact = &self.contacts[key];
        let fa = &self.fixtures[contact.fixture_a];
        let fb = &self.fixtures[contact.fixture_b];
        if fa.is_sensor || fb.is_sensor {
            return None;
        }

        let (ha, hb) = (fa.body, fb.body);
        let body_a = &self.bodies[ha];
        let body_b = &self.bodies[hb];
        let active_a = body_a.body_type != BodyType::Static;
        let active_b = body_b.body_type != BodyType::Static;
        if !active_a && !active_b {
            return None;
        }

        // Two non-bullet dynamic bodies are left to the discrete solver.
        let collide_a = body_a.bullet || body_a.body_type != BodyType::Dynamic;
        let collide_b = body_b.bullet || body_b.body_type != BodyType::Dynamic;
        if !collide_a && !collide_b {
            return None;
        }

        let proxy_a = fa.shape.distance_proxy(contact.child_a);
        let proxy_b = fb.shape.distance_proxy(contact.child_b);

        // Put the sweeps onto the same time interval.
        let mut alpha0 = body_a.sweep.alpha0;
        if body_a.sweep.alpha0 < body_b.sweep.alpha0 {
            alpha0 = body_b.sweep.alpha0;
            self.bodies[ha].sweep.advance(alpha0);
        } else if body_b.sweep.alpha0 < body_a.sweep.alpha0 {
            alpha0 = body_a.sweep.alpha0;
            self.bodies[hb].sweep.advance(alpha0);
        }
        debug_assert!(alpha0 < 1.0);

        let input = ToiInput {
            proxy_a,
            proxy_b,
            sweep_a: self.bodies[ha].sweep,
            sweep_b: self.bodies[hb].sweep,
            t_max: 1.0,
        };
        let output = time_of_impact(&input, &self.cfg.settings, &mut self.toi_stats);

        // Beta is the fraction of the remaining portion of the step.
        let alpha = if output.state == ToiState::Touching {
            (alpha0 + (1.0 - alpha0) * output.t).min(1.0)
        } else {
            1.0
        };
        Some(alpha)
    }

    /// Contacts touching a body.
    fn body_contacts(&self, handle: BodyHandle) -> Vec<ContactKey> {
        self.bodies[handle].contacts.clone()
    }

    fn other_body(&self, key: ContactKey, handle: BodyHandle) -> BodyHandle {
        let c = &self.contacts[key];
        let body_a = self.fixtures[c.fixture_a].body;
        if body_a == handle {
            self.fixtures[c.fixture_b].body
        } else {
            body_a
        }
    }

    /// Continuous collision: repeatedly find the earliest time of impact,
    /// move the pair back to it and resolve a small island there.
    fn solve_toi(&mut self, step: &TimeStep, listener: &mut dyn ContactListener) {
        for body in self.bodies.values_mut() {
            body.island_flag = false;
            body.sweep.alpha0 = 0.0;
        }
        for contact in self.contacts.values_mut() {
            contact.toi_flag = false;
            contact.island_flag = false;
            contact.toi_count = 0;
            contact.toi = 1.0;
        }

        let max_sub_steps = self.cfg.settings.max_sub_steps;

        loop {
            // Find the first time of impact.
            let mut min_contact = None;
            let mut min_alpha = 1.0f32;

            let keys: Vec<ContactKey> = self.contacts.keys().collect();
            for key in keys {
                let contact = &self.contacts[key];
                if !contact.enabled || contact.toi_count > max_sub_steps {
                    continue;
                }

                let alpha = if contact.toi_flag {
                    contact.toi
                } else {
                    let Some(alpha) = self.contact_toi(key) else { continue };
                    let contact = &mut self.contacts[key];
                    contact.toi = alpha;
                    contact.toi_flag = true;
                    alpha
                };

                if alpha < min_alpha {
                    min_contact = Some(key);
                    min_alpha = alpha;
                }
            }

            let Some(min_key) = min_contact else { break };
            if 1.0 - 10.0 * f32::EPSILON < min_alpha {
                break;
            }

            // Advance the bodies to the time of impact.
            let body_a = self.fixtures[self.contacts[min_key].fixture_a].body;
            let body_b = self.fixtures[self.contacts[min_key].fixture_b].body;
            let backup_a = self.bodies[body_a].sweep;
            let backup_b = self.bodies[body_b].sweep;
            self.bodies[body_a].advance(min_alpha);
            self.bodies[body_b].advance(min_alpha);

            // The contact likely has new points.
            self.update_contact(min_key, listener);
            let contact = &mut self.contacts[min_key];
            contact.toi_flag = false;
            contact.toi_count += 1;

            if !contact.enabled || !contact.touching {
                // Restore the sweeps.
                contact.enabled = false;
                for (handle, backup) in [(body_a, backup_a), (body_b, backup_b)] {
                    let body = &mut self.bodies[handle];
                    body.sweep = backup;
                    body.synchronize_transform();
                }
                continue;
            }

            // Build the island: the two bodies first, then whatever they touch.
            let mut island_bodies = vec![body_a, body_b];
            let mut island_contacts = vec![min_key];
            self.bodies[body_a].island_flag = true;
            self.bodies[body_b].island_flag = true;
            self.contacts[min_key].island_flag = true;

            for handle in [body_a, body_b] {
                let body = &self.bodies[handle];
                if body.body_type != BodyType::Dynamic {
                    continue;
                }
                let bullet = body.bullet;

                for key in self.body_contacts(handle) {
                    if island_contacts.len() == self.cfg.settings.max_toi_contacts {
                        break;
                    }
                    let contact = &self.contacts[key];
                    if contact.island_flag {
                        continue;
                    }

                    // Only add static, kinematic or bullet bodies.
                    let other = self.other_body(key, handle);
                    let other_body = &self.bodies[other];
                    if other_body.body_type == BodyType::Dynamic && !bullet && !other_body.bullet {
                        continue;
                    }
                    if self.fixtures[contact.fixture_a].is_sensor || self.fixtures[contact.fixture_b].is_sensor {
                        continue;
                    }

                    // Tentatively advance the body to the time of impact.
                    let backup = other_body.sweep;
                    if !other_body.island_flag {
                        self.bodies[other].advance(min_alpha);
                    }

                    self.update_contact(key, listener);
                    let contact = &self.contacts[key];
                    if !contact.enabled || !contact.touching {
                        let other_body = &mut self.bodies[other];
                        other_body.sweep = backup;
                        other_body.synchronize_transform();
                        continue;
                    }

                    self.contacts[key].island_flag = true;
                    island_contacts.push(key);

                    let other_body = &mut self.bodies[other];
                    if other_body.island_flag {
                        continue;
                    }
                    other_body.island_flag = true;
                    island_bodies.push(other);
                }
            }

            let sub_step = TimeStep {
                dt: (1.0 - min_alpha) * step.dt,
                inv_dt: 1.0 / ((1.0 - min_alpha) * step.dt),
                dt_ratio: 1.0,
                velocity_iterations: step.velocity_iterations,
                position_iterations: 20,
                warm_starting: false,
            };
            self.solve_toi_island(&sub_step, &island_bodies, &island_contacts, listener);

            // Reset island flags and synchronize broad-phase proxies.
            for handle in &island_bodies {
                let body = &mut self.bodies[*handle];
                body.island_flag = false;
                if body.body_type != BodyType::Dynamic {
                    continue;
                }
                self.synchronize_fixtures(*handle);

                // The body moved: its cached times of impact are stale.
                for key in self.body_contacts(*handle) {
                    let contact = &mut self.contacts[key];
                    contact.toi_flag = false;
                    contact.island_flag = false;
                }
            }
            for key in &island_contacts {
                if let Some(contact) = self.contacts.get_mut(*key) {
                    contact.island_flag = false;
                }
            }

            // New contacts found here are picked up by the next iteration.
            self.find_new_contacts();
        }
    }

    /// Resolve the overlap of the impact pair (island indices 0 and 1)
    /// without disturbing the rest, then finish the step from there.
    fn solve_toi_island(
        &mut self,
        sub_step: &TimeStep,
        island_bodies: &[BodyHandle],
        island_contacts: &[ContactKey],
        listener: &mut dyn ContactListener,
    ) {
        let settings = self.cfg.settings.clone();

        let mut positions = Vec::with_capacity(island_bodies.len());
        let mut velocities = Vec::with_capacity(island_bodies.len());
        let mut solver_bodies = Vec::with_capacity(island_bodies.len());
        for (i, handle) in island_bodies.iter().enumerate() {
            let body = &mut self.bodies[*handle];
            body.island_index = i;
            positions.push(Position { c: body.sweep.c, a: body.sweep.a });
            velocities.push(Velocity { v: body.linear_velocity, w: body.angular_velocity });
            solver_bodies.push(body.solver_body());
        }

        let solver_contacts = island_contacts
            .iter()
            .map(|key| {
                let contact = &self.contacts[*key];
                let fa = &self.fixtures[contact.fixture_a];
                let fb = &self.fixtures[contact.fixture_b];
                SolverContact {
                    manifold: contact.manifold,
                    index_a: self.bodies[fa.body].island_index,
                    index_b: self.bodies[fb.body].island_index,
                    radius_a: fa.shape.radius(),
                    radius_b: fb.shape.radius(),
                    friction: contact.friction,
                    restitution: contact.restitution,
                    tangent_speed: contact.tangent_speed,
                }
            })
            .collect();

        let mut solver = ContactSolver::new(*sub_step, &settings, solver_contacts, &solver_bodies);

        for _ in 0..sub_step.position_iterations {
            if solver.solve_toi_position_constraints(&mut positions, 0, 1) {
                break;
            }
        }

        // Leap of faith to the new safe state.
        for i in 0..2 {
            let body = &mut self.bodies[island_bodies[i]];
            body.sweep.c0 = positions[i].c;
            body.sweep.a0 = positions[i].a;
        }

        // Warm starting already happened in the discrete solve.
        solver.initialize_velocity_constraints(&positions, &velocities);
        for _ in 0..sub_step.velocity_iterations {
            solver.solve_velocity_constraints(&mut velocities);
        }

        integrate_positions(&settings, sub_step.dt, &mut positions, &mut velocities);

        for (i, handle) in island_bodies.iter().enumerate() {
            let body = &mut self.bodies[*handle];
            body.sweep.c = positions[i].c;
            body.sweep.a = positions[i].a;
            body.linear_velocity = velocities[i].v;
            body.angular_velocity = velocities[i].w;
            body.synchronize_transform();
        }

        // Report without storing: these impulses can be large and would
        // spoil warm starting.
        solver.store_impulses();
        for (i, key) in island_contacts.iter().enumerate() {
            let impulse = ContactImpulse::from_manifold(&solver.contacts()[i].manifold);
            let view = contact_view(&self.bodies, &self.fixtures, &self.contacts, *key);
            listener.post_solve(&view, &impulse);
        }
    }

    // ---- Queries ----

    /// Fixtures whose fat AABB overlaps `aabb`. Return `false` from the
    /// callback to stop.
    pub fn query_aabb<F: FnMut(FixtureHandle) -> bool>(&self, aabb: &Aabb, mut callback: F) {
        let broad_phase = &self.broad_phase;
        broad_phase.query(aabb, |proxy_id| callback(broad_phase.get_user_data(proxy_id).fixture));
    }

    /// Cast a ray against every fixture. The callback receives the fixture,
    /// hit point, normal and fraction and returns the new clip fraction:
    /// `0` stops, the hit fraction clips to the closest, `1` continues.
    pub fn ray_cast<F>(&self, p1: Vec2, p2: Vec2, mut callback: F)
    where
        F: FnMut(FixtureHandle, Vec2, Vec2, f32) -> f32,
    {
        let input = RayCastInput { p1, p2, max_fraction: 1.0 };
        let broad_phase = &self.broad_phase;
        broad_phase.ray_cast(&input, |sub_input, proxy_id| {
            let proxy = broad_phase.get_user_data(proxy_id);
            let fixture = &self.fixtures[proxy.fixture];
            let xf = self.bodies[fixture.body].xf;
            match fixture.shape.ray_cast(sub_input, &xf, proxy.child) {
                Some(output) => {
                    let fraction = output.fraction;
                    let point = (1.0 - fraction) * sub_input.p1 + fraction * sub_input.p2;
                    callback(proxy.fixture, point, output.normal, fraction)
                }
                None => sub_input.max_fraction,
            }
        });
    }

    /// Move the world origin. Useful for large worlds.
    pub fn shift_origin(&mut self, new_origin: Vec2) {
        for body in self.bodies.values_mut() {
            body.xf.p -= new_origin;
            body.sweep.c0 -= new_origin;
            body.sweep.c -= new_origin;
        }
        self.broad_phase.shift_origin(new_origin);
    }
}

/// Integrate positions, clamping large motions.
fn integrate_positions(settings: &Settings, h: f32, positions: &mut [Position], velocities: &mut [Velocity]) {
    for (pos, vel) in positions.iter_mut().zip(velocities.iter_mut()) {
        let translation = h * vel.v;
        if translation.length_squared() > settings.max_translation * settings.max_translation {
            vel.v *= settings.max_translation / translation.length();
        }

        let rotation = h * vel.w;
        if rotation * rotation > settings.max_rotation * settings.max_rotation {
            vel.w *= settings.max_rotation / rotation.abs();
        }

        pos.c += h * vel.v;
        pos.a += h * vel.w;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::NoopListener;
    use crate::shapes::{CircleShape, EdgeShape, PolygonShape};

    const DT: f32 = 1.0 / 60.0;

    fn world() -> World {
        World::new(WorldConfig::default()).unwrap()
    }

    fn ground(world: &mut World) -> BodyHandle {
        let body = world.create_body(&BodyDef::fixed(Vec2::ZERO));
        let edge = EdgeShape::two_sided(Vec2::new(-40.0, 0.0), Vec2::new(40.0, 0.0));
        world.create_fixture(body, &FixtureDef::new(edge, 0.0)).unwrap();
        body
    }

    fn dynamic_box(world: &mut World, position: Vec2) -> BodyHandle {
        let body = world.create_body(&BodyDef::dynamic(position));
        let mut def = FixtureDef::new(PolygonShape::new_box(0.5, 0.5), 1.0);
        def.friction = 0.6;
        world.create_fixture(body, &def).unwrap();
        body
    }

    #[derive(Default)]
    struct Recorder {
        begins: usize,
        ends: usize,
        post_solves: usize,
        max_normal_impulse: f32,
    }

    impl ContactListener for Recorder {
        fn begin_contact(&mut self, _contact: &ContactView<'_>) {
            self.begins += 1;
        }

        fn end_contact(&mut self, _contact: &ContactView<'_>) {
            self.ends += 1;
        }

        fn post_solve(&mut self, _contact: &ContactView<'_>, impulse: &ContactImpulse) {
            self.post_solves += 1;
            for i in 0..impulse.count {
                self.max_normal_impulse = self.max_normal_impulse.max(impulse.normal_impulses[i]);
            }
        }
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut cfg = WorldConfig::default();
        cfg.settings.linear_slop = -1.0;
        assert!(matches!(World::new(cfg), Err(Error::InvalidSettings { .. })));
    }

    #[test]
    fn test_box_mass_and_center() {
        let mut world = world();
        let body = world.create_body(&BodyDef::dynamic(Vec2::new(1.0, 2.0)));
        let shape = PolygonShape::new_oriented_box(0.5, 0.5, Vec2::new(1.0, 0.0), 0.0);
        world.create_fixture(body, &FixtureDef::new(shape, 2.0)).unwrap();

        let b = world.body(body).unwrap();
        assert!((b.mass() - 2.0).abs() < 1e-5);
        assert!((b.local_center() - Vec2::new(1.0, 0.0)).length() < 1e-5);
        assert!((b.world_center() - Vec2::new(2.0, 2.0)).length() < 1e-5);
    }

    #[test]
    fn test_box_falls_and_rests_on_ground() {
        let mut world = world();
        ground(&mut world);
        let body = dynamic_box(&mut world, Vec2::new(0.0, 4.0));

        for _ in 0..180 {
            world.step(DT, &mut NoopListener);
        }

        let b = world.body(body).unwrap();
        // Resting height is half extent plus the skin, minus slop.
        assert!((b.position().y - 0.5).abs() < 0.05, "y = {}", b.position().y);
        assert!(b.linear_velocity().length() < 0.05);
        assert!(b.angle().abs() < 0.01);
        assert_eq!(world.contact_count(), 1);
    }

    #[test]
    fn test_stack_settles() {
        let mut world = world();
        ground(&mut world);
        let boxes: Vec<BodyHandle> =
            (0..4).map(|i| dynamic_box(&mut world, Vec2::new(0.0, 0.5 + 1.05 * i as f32))).collect();

        for _ in 0..300 {
            world.step(DT, &mut NoopListener);
        }

        for (i, handle) in boxes.iter().enumerate() {
            let b = world.body(*handle).unwrap();
            assert!(b.position().x.abs() < 0.1, "box {i} drifted to {}", b.position().x);
            assert!(b.linear_velocity().length() < 0.1, "box {i} still moving");
        }
        let top = world.body(boxes[3]).unwrap().position().y;
        assert!((3.0..4.0).contains(&top), "top = {top}");
    }

    #[test]
    fn test_listener_sees_begin_post_solve_and_end() {
        let mut world = world();
        ground(&mut world);
        let body = dynamic_box(&mut world, Vec2::new(0.0, 1.0));
        let mut recorder = Recorder::default();

        for _ in 0..60 {
            world.step(DT, &mut recorder);
        }
        assert_eq!(recorder.begins, 1);
        assert_eq!(recorder.ends, 0);
        assert!(recorder.post_solves > 0);
        assert!(recorder.max_normal_impulse > 0.0);

        // Teleport away: the contact ends.
        world.set_transform(body, Vec2::new(0.0, 10.0), 0.0).unwrap();
        world.step(DT, &mut recorder);
        world.step(DT, &mut recorder);
        assert_eq!(recorder.ends, 1);
    }

    #[test]
    fn test_pre_solve_can_disable_contact() {
        struct PassThrough;
        impl ContactListener for PassThrough {
            fn pre_solve(&mut self, _contact: &ContactView<'_>, _old: &Manifold) -> bool {
                false
            }
        }

        let mut world = world();
        ground(&mut world);
        let body = dynamic_box(&mut world, Vec2::new(0.0, 0.6));
        for _ in 0..30 {
            world.step(DT, &mut PassThrough);
        }
        assert!(world.body(body).unwrap().position().y < 0.0);
    }

    #[test]
    fn test_filter_prevents_contact() {
        let mut world = world();
        let ground_body = world.create_body(&BodyDef::fixed(Vec2::ZERO));
        let mut def = FixtureDef::new(PolygonShape::new_box(10.0, 0.5), 0.0);
        def.filter = LayerMask::simple(0b01, 0b01);
        world.create_fixture(ground_body, &def).unwrap();

        let body = world.create_body(&BodyDef::dynamic(Vec2::new(0.0, 1.5)));
        let mut def = FixtureDef::new(PolygonShape::new_box(0.5, 0.5), 1.0);
        def.filter = LayerMask::simple(0b10, 0b10);
        world.create_fixture(body, &def).unwrap();

        for _ in 0..60 {
            world.step(DT, &mut NoopListener);
        }
        assert_eq!(world.contact_count(), 0);
        assert!(world.body(body).unwrap().position().y < 0.0);
    }

    #[test]
    fn test_set_filter_destroys_existing_contact() {
        let mut world = world();
        ground(&mut world);
        let body = dynamic_box(&mut world, Vec2::new(0.0, 0.5));
        world.step(DT, &mut NoopListener);
        assert_eq!(world.contact_count(), 1);

        let fixture = world.body(body).unwrap().fixtures()[0];
        world.set_filter(fixture, LayerMask::simple(0b10, 0b10)).unwrap();
        world.step(DT, &mut NoopListener);
        assert_eq!(world.contact_count(), 0);
    }

    #[test]
    fn test_sensor_reports_without_response() {
        let mut world = world();
        let sensor_body = world.create_body(&BodyDef::fixed(Vec2::new(0.0, 2.0)));
        let mut def = FixtureDef::new(PolygonShape::new_box(2.0, 0.5), 0.0);
        def.is_sensor = true;
        world.create_fixture(sensor_body, &def).unwrap();

        let ball = world.create_body(&BodyDef::dynamic(Vec2::new(0.0, 4.0)));
        world.create_fixture(ball, &FixtureDef::new(CircleShape::new(Vec2::ZERO, 0.25), 1.0)).unwrap();

        let mut recorder = Recorder::default();
        for _ in 0..90 {
            world.step(DT, &mut recorder);
        }
        assert_eq!(recorder.begins, 1);
        assert_eq!(recorder.ends, 1);
        assert_eq!(recorder.post_solves, 0);
        assert!(world.body(ball).unwrap().position().y < 1.0);
    }

    #[test]
    fn test_bullet_does_not_tunnel_through_thin_wall() {
        let mut cfg = WorldConfig::default();
        cfg.gravity = Vec2::ZERO;
        let mut world = World::new(cfg).unwrap();

        let wall = world.create_body(&BodyDef::fixed(Vec2::new(5.0, 0.0)));
        world.create_fixture(wall, &FixtureDef::new(PolygonShape::new_box(0.05, 5.0), 0.0)).unwrap();

        let mut def = BodyDef::dynamic(Vec2::ZERO);
        def.linear_velocity = Vec2::new(120.0, 0.0);
        def.bullet = true;
        let bullet = world.create_body(&def);
        world.create_fixture(bullet, &FixtureDef::new(CircleShape::new(Vec2::ZERO, 0.1), 1.0)).unwrap();

        for _ in 0..10 {
            world.step(DT, &mut NoopListener);
        }
        assert!(world.body(bullet).unwrap().position().x < 5.0);
        assert!(world.toi_stats().toi_calls > 0);
    }

    #[test]
    fn test_without_continuous_physics_fast_body_tunnels() {
        let mut cfg = WorldConfig::default();
        cfg.gravity = Vec2::ZERO;
        cfg.settings.continuous_physics = false;
        let mut world = World::new(cfg).unwrap();

        let wall = world.create_body(&BodyDef::fixed(Vec2::new(5.0, 0.0)));
        world.create_fixture(wall, &FixtureDef::new(PolygonShape::new_box(0.05, 5.0), 0.0)).unwrap();

        let mut def = BodyDef::dynamic(Vec2::ZERO);
        def.linear_velocity = Vec2::new(120.0, 0.0);
        let body = world.create_body(&def);
        world.create_fixture(body, &FixtureDef::new(CircleShape::new(Vec2::ZERO, 0.1), 1.0)).unwrap();

        for _ in 0..10 {
            world.step(DT, &mut NoopListener);
        }
        assert!(world.body(body).unwrap().position().x > 5.0);
    }

    #[test]
    fn test_stale_handles() {
        let mut world = world();
        let body = dynamic_box(&mut world, Vec2::ZERO);
        let fixture = world.body(body).unwrap().fixtures()[0];
        world.destroy_body(body).unwrap();

        assert_eq!(world.body(body).err(), Some(Error::StaleHandle("body")));
        assert_eq!(world.fixture(fixture).err(), Some(Error::StaleHandle("fixture")));
        assert!(world.destroy_body(body).is_err());
        assert!(world.set_linear_velocity(body, Vec2::X).is_err());
        assert_eq!(world.proxy_count(), 0);

        // A new body does not alias the old handle.
        let other = dynamic_box(&mut world, Vec2::ZERO);
        assert_ne!(other, body);
        assert!(world.body(body).is_err());
    }

    #[test]
    fn test_destroy_body_removes_contacts() {
        let mut world = world();
        ground(&mut world);
        let body = dynamic_box(&mut world, Vec2::new(0.0, 0.5));
        world.step(DT, &mut NoopListener);
        assert_eq!(world.contact_count(), 1);

        world.destroy_body(body).unwrap();
        assert_eq!(world.contact_count(), 0);
        world.step(DT, &mut NoopListener);
    }

    #[test]
    fn test_contact_edges_track_creation_and_destruction() {
        let mut world = world();
        let ground_body = ground(&mut world);
        let a = dynamic_box(&mut world, Vec2::new(-2.0, 0.5));
        let b = dynamic_box(&mut world, Vec2::new(2.0, 0.5));
        world.step(DT, &mut NoopListener);

        assert_eq!(world.contact_count(), 2);
        assert_eq!(world.body_contacts(ground_body).len(), 2);
        assert_eq!(world.body_contacts(a).len(), 1);
        let key = world.body_contacts(b)[0];
        assert_eq!(world.other_body(key, b), ground_body);

        // Removing the fixture drops its edge from both bodies.
        let fixture = world.body(a).unwrap().fixtures()[0];
        world.destroy_fixture(fixture).unwrap();
        assert_eq!(world.body_contacts(ground_body), vec![key]);
        assert!(world.body_contacts(a).is_empty());

        world.destroy_body(b).unwrap();
        assert!(world.body_contacts(ground_body).is_empty());
        assert_eq!(world.contact_count(), 0);
    }

    #[test]
    fn test_query_aabb_and_ray_cast() {
        let mut world = world();
        let a = dynamic_box(&mut world, Vec2::new(0.0, 0.0));
        let b = dynamic_box(&mut world, Vec2::new(5.0, 0.0));
        let fa = world.body(a).unwrap().fixtures()[0];
        let fb = world.body(b).unwrap().fixtures()[0];

        let mut found = Vec::new();
        world.query_aabb(&Aabb::from_center(Vec2::new(5.0, 0.0), Vec2::splat(0.1)), |f| {
            found.push(f);
            true
        });
        assert_eq!(found, vec![fb]);

        // Closest hit along +x is the box at the origin.
        let mut closest = None;
        world.ray_cast(Vec2::new(-5.0, 0.0), Vec2::new(10.0, 0.0), |f, point, normal, fraction| {
            closest = Some((f, point, normal));
            fraction
        });
        let (f, point, normal) = closest.unwrap();
        assert_eq!(f, fa);
        assert!((point.x + 0.5).abs() < 1e-3);
        assert!((normal - Vec2::new(-1.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn test_kinematic_body_moves_and_pushes() {
        let mut cfg = WorldConfig::default();
        cfg.gravity = Vec2::ZERO;
        let mut world = World::new(cfg).unwrap();

        let mut def = BodyDef::dynamic(Vec2::ZERO);
        def.body_type = BodyType::Kinematic;
        def.linear_velocity = Vec2::new(2.0, 0.0);
        let pusher = world.create_body(&def);
        world.create_fixture(pusher, &FixtureDef::new(PolygonShape::new_box(0.5, 0.5), 1.0)).unwrap();

        let target = dynamic_box(&mut world, Vec2::new(1.5, 0.0));
        for _ in 0..60 {
            world.step(DT, &mut NoopListener);
        }

        let p = world.body(pusher).unwrap();
        assert_eq!(p.mass(), 0.0);
        assert!((p.position().x - 2.0).abs() < 1e-3);
        assert!(world.body(target).unwrap().position().x > 2.4);
    }

    #[test]
    fn test_timing_recorded_when_enabled() {
        let mut cfg = WorldConfig::default();
        cfg.enable_timing = true;
        let mut world = World::new(cfg).unwrap();
        ground(&mut world);
        dynamic_box(&mut world, Vec2::new(0.0, 2.0));
        assert!(world.last_timing().is_none());
        world.step(DT, &mut NoopListener);
        let timing = world.last_timing().unwrap();
        assert!(timing.step_ms >= timing.collide_ms);
    }

    #[test]
    fn test_shift_origin_moves_bodies_and_queries() {
        let mut world = world();
        let body = dynamic_box(&mut world, Vec2::new(10.0, 0.0));
        world.shift_origin(Vec2::new(10.0, 0.0));
        assert!(world.body(body).unwrap().position().length() < 1e-5);

        let mut hits = 0;
        world.query_aabb(&Aabb::from_center(Vec2::ZERO, Vec2::splat(0.1)), |_| {
            hits += 1;
            true
        });
        assert_eq!(hits, 1);
    }
}
