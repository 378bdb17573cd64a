//! Broad-phase: a dynamic tree plus a move buffer.
//!
//! Proxies that moved since the last [`BroadPhase::update_pairs`] are
//! buffered; pair generation only queries the tree with those proxies, so a
//! world at rest costs nothing.

use glam::Vec2;
use tracing::trace;

use crate::dynamic_tree::{DynamicTree, NULL_NODE, ProxyId};
use crate::types::{Aabb, RayCastInput, Settings};

/// Pair finder over a [`DynamicTree`].
#[derive(Clone, Debug)]
pub struct BroadPhase<T> {
    tree: DynamicTree<T>,
    proxy_count: usize,
    move_buffer: Vec<ProxyId>,
    pair_buffer: Vec<(ProxyId, ProxyId)>,
}

impl<T: Copy + Default> Default for BroadPhase<T> {
    fn default() -> Self {
        Self::new(&Settings::default())
    }
}

impl<T: Copy + Default> BroadPhase<T> {
    pub fn new(settings: &Settings) -> Self {
        Self {
            tree: DynamicTree::new(settings),
            proxy_count: 0,
            move_buffer: Vec::with_capacity(16),
            pair_buffer: Vec::with_capacity(16),
        }
    }

    /// Create a proxy with an initial AABB. Pairs are not reported until
    /// [`update_pairs`](Self::update_pairs) is called.
    pub fn create_proxy(&mut self, aabb: &Aabb, user_data: T) -> ProxyId {
        let proxy_id = self.tree.create_proxy(aabb, user_data);
        self.proxy_count += 1;
        self.buffer_move(proxy_id);
        proxy_id
    }

    /// Destroy a proxy. Any pairs it had are the caller's to remove.
    pub fn destroy_proxy(&mut self, proxy_id: ProxyId) {
        self.unbuffer_move(proxy_id);
        self.proxy_count -= 1;
        self.tree.destroy_proxy(proxy_id);
    }

    /// Move a proxy as many times as needed; pairs are only reported once
    /// per `update_pairs`.
    pub fn move_proxy(&mut self, proxy_id: ProxyId, aabb: &Aabb, displacement: Vec2) {
        if self.tree.move_proxy(proxy_id, aabb, displacement) {
            self.buffer_move(proxy_id);
        }
    }

    /// Queue a proxy for pair finding without moving it, e.g. after its
    /// filter changed.
    pub fn touch_proxy(&mut self, proxy_id: ProxyId) {
        self.buffer_move(proxy_id);
    }

    pub fn get_fat_aabb(&self, proxy_id: ProxyId) -> Aabb {
        self.tree.get_fat_aabb(proxy_id)
    }

    pub fn get_user_data(&self, proxy_id: ProxyId) -> T {
        self.tree.get_user_data(proxy_id)
    }

    /// Do the fat AABBs of two proxies overlap.
    pub fn test_overlap(&self, proxy_a: ProxyId, proxy_b: ProxyId) -> bool {
        self.tree
            .get_fat_aabb(proxy_a)
            .overlaps(&self.tree.get_fat_aabb(proxy_b))
    }

    pub fn proxy_count(&self) -> usize {
        self.proxy_count
    }

    pub fn tree_height(&self) -> i32 {
        self.tree.get_height()
    }

    pub fn tree_balance(&self) -> i32 {
        self.tree.get_max_balance()
    }

    pub fn tree_quality(&self) -> f32 {
        self.tree.get_area_ratio()
    }

    pub fn shift_origin(&mut self, new_origin: Vec2) {
        self.tree.shift_origin(new_origin);
    }

    /// Proxies whose fat AABB overlaps `aabb`.
    pub fn query<F: FnMut(ProxyId) -> bool>(&self, aabb: &Aabb, callback: F) {
        self.tree.query(aabb, callback);
    }

    pub fn ray_cast<F: FnMut(&RayCastInput, ProxyId) -> f32>(&self, input: &RayCastInput, callback: F) {
        self.tree.ray_cast(input, callback);
    }

    fn buffer_move(&mut self, proxy_id: ProxyId) {
        self.move_buffer.push(proxy_id);
    }

    fn unbuffer_move(&mut self, proxy_id: ProxyId) {
        for slot in self.move_buffer.iter_mut().filter(|p| **p == proxy_id) {
            *slot = NULL_NODE;
        }
    }

    /// Report every new overlapping pair to `callback(user_a, user_b)`
    /// exactly once, ordered by proxy id.
    pub fn update_pairs<F: FnMut(T, T)>(&mut self, mut callback: F) {
        self.pair_buffer.clear();

        // Perform tree queries for all moving proxies.
        for &query_proxy in &self.move_buffer {
            if query_proxy == NULL_NODE {
                continue;
            }

            let tree = &self.tree;
            let pairs = &mut self.pair_buffer;

            // We have to query the tree with the fat AABB so that we don't
            // fail to create a pair that may touch later.
            let fat_aabb = tree.get_fat_aabb(query_proxy);
            tree.query(&fat_aabb, |proxy_id| {
                // A proxy cannot form a pair with itself.
                if proxy_id == query_proxy {
                    return true;
                }

                // Both proxies are moving: only the lower id reports.
                if tree.was_moved(proxy_id) && proxy_id < query_proxy {
                    return true;
                }

                pairs.push((proxy_id.min(query_proxy), proxy_id.max(query_proxy)));
                true
            });
        }

        // Touched proxies without the moved flag can report twice.
        self.pair_buffer.sort_unstable();
        self.pair_buffer.dedup();

        trace!(
            moved = self.move_buffer.len(),
            pairs = self.pair_buffer.len(),
            "broad-phase pairs updated"
        );

        for &(proxy_a, proxy_b) in &self.pair_buffer {
            let user_a = self.tree.get_user_data(proxy_a);
            let user_b = self.tree.get_user_data(proxy_b);
            callback(user_a, user_b);
        }

        // Clear move flags
        for &proxy_id in &self.move_buffer {
            if proxy_id != NULL_NODE {
                self.tree.clear_moved(proxy_id);
            }
        }

        // Reset move buffer
        self.move_buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(x: f32, y: f32) -> Aabb {
        Aabb::from_center(Vec2::new(x, y), Vec2::splat(0.5))
    }

    fn collect(bp: &mut BroadPhase<u32>) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        bp.update_pairs(|a, b| out.push((a, b)));
        out
    }

    #[test]
    fn test_pairs_reported_once_and_canonical() {
        let mut bp = BroadPhase::default();
        bp.create_proxy(&unit_box(0.0, 0.0), 10u32);
        bp.create_proxy(&unit_box(0.8, 0.0), 11);
        bp.create_proxy(&unit_box(1.6, 0.0), 12);
        bp.create_proxy(&unit_box(9.0, 0.0), 13);

        let pairs = collect(&mut bp);
        assert_eq!(pairs, vec![(10, 11), (11, 12)]);

        // Nothing moved, nothing reported
        assert!(collect(&mut bp).is_empty());
    }

    #[test]
    fn test_only_moved_proxies_generate_pairs() {
        let mut bp = BroadPhase::default();
        let a = bp.create_proxy(&unit_box(0.0, 0.0), 0u32);
        bp.create_proxy(&unit_box(5.0, 0.0), 1);
        collect(&mut bp);

        // Move a next to b
        bp.move_proxy(a, &unit_box(4.2, 0.0), Vec2::new(4.2, 0.0));
        assert_eq!(collect(&mut bp), vec![(0, 1)]);
    }

    #[test]
    fn test_touch_proxy_requeues_existing_pair() {
        let mut bp = BroadPhase::default();
        let a = bp.create_proxy(&unit_box(0.0, 0.0), 0u32);
        let b = bp.create_proxy(&unit_box(0.5, 0.0), 1);
        assert_eq!(collect(&mut bp), vec![(0, 1)]);

        bp.touch_proxy(a);
        bp.touch_proxy(b);
        assert_eq!(collect(&mut bp), vec![(0, 1)]);
    }

    #[test]
    fn test_destroyed_proxy_leaves_move_buffer() {
        let mut bp = BroadPhase::default();
        bp.create_proxy(&unit_box(0.0, 0.0), 0u32);
        let b = bp.create_proxy(&unit_box(0.5, 0.0), 1);
        bp.destroy_proxy(b);
        assert!(collect(&mut bp).is_empty());
        assert_eq!(bp.proxy_count(), 1);
    }

    #[test]
    fn test_fat_overlap_and_stats() {
        let mut bp: BroadPhase<u32> = BroadPhase::default();
        let a = bp.create_proxy(&unit_box(0.0, 0.0), 0);
        let b = bp.create_proxy(&unit_box(1.1, 0.0), 1);
        let c = bp.create_proxy(&unit_box(3.0, 0.0), 2);
        // Tight boxes are 0.1 apart; the fat margins overlap
        assert!(bp.test_overlap(a, b));
        assert!(!bp.test_overlap(a, c));
        assert_eq!(bp.proxy_count(), 3);
        assert!(bp.tree_height() >= 1);
        assert!(bp.tree_quality() >= 1.0);
    }
}
