//! Dynamic AABB tree.
//!
//! A binary bounding-volume hierarchy over fat AABBs. Leaves are proxies
//! owned by the caller; internal nodes hold the union of their children.
//! Proxies are fattened so small motions do not touch the tree, and the
//! tree is kept balanced with AVL-style rotations on the way back up from
//! every insertion and removal.

use glam::Vec2;

use crate::math::cross_sv;
use crate::types::{Aabb, RayCastInput, Settings};

/// Null node sentinel.
pub const NULL_NODE: u32 = u32::MAX;

/// Proxy handle. Stable for the lifetime of the proxy.
pub type ProxyId = u32;

#[derive(Clone, Debug)]
struct TreeNode<T> {
    /// Fat AABB for leaves, union of children for internal nodes.
    aabb: Aabb,
    user_data: T,
    parent: u32,
    child1: u32,
    child2: u32,
    /// Leaf = 0, free node = -1.
    height: i32,
    /// Set when the leaf was (re)inserted; cleared by the broad-phase.
    moved: bool,
}

impl<T: Default> TreeNode<T> {
    fn new() -> Self {
        Self {
            aabb: Aabb::default(),
            user_data: T::default(),
            parent: NULL_NODE,
            child1: NULL_NODE,
            child2: NULL_NODE,
            height: 0,
            moved: false,
        }
    }
}

impl<T> TreeNode<T> {
    #[inline]
    fn is_leaf(&self) -> bool {
        self.child1 == NULL_NODE
    }
}

/// Balanced AABB tree with a node pool and free list.
#[derive(Clone, Debug)]
pub struct DynamicTree<T> {
    nodes: Vec<TreeNode<T>>,
    free_list: Vec<u32>,
    root: u32,
    insertion_count: u32,
    /// Fixed fat margin on every side.
    margin: f32,
    /// Predictive extension along the displacement.
    multiplier: f32,
}

impl<T: Copy + Default> Default for DynamicTree<T> {
    fn default() -> Self {
        Self::new(&Settings::default())
    }
}

impl<T: Copy + Default> DynamicTree<T> {
    pub fn new(settings: &Settings) -> Self {
        Self {
            nodes: Vec::with_capacity(16),
            free_list: Vec::new(),
            root: NULL_NODE,
            insertion_count: 0,
            margin: settings.aabb_extension,
            multiplier: settings.aabb_multiplier,
        }
    }

    fn allocate_node(&mut self) -> u32 {
        if let Some(id) = self.free_list.pop() {
            self.nodes[id as usize] = TreeNode::new();
            return id;
        }
        self.nodes.push(TreeNode::new());
        (self.nodes.len() - 1) as u32
    }

    fn free_node(&mut self, id: u32) {
        let node = &mut self.nodes[id as usize];
        node.height = -1;
        node.parent = NULL_NODE;
        node.child1 = NULL_NODE;
        node.child2 = NULL_NODE;
        self.free_list.push(id);
    }

    /// Create a leaf for `aabb` fattened by the margin.
    pub fn create_proxy(&mut self, aabb: &Aabb, user_data: T) -> ProxyId {
        let id = self.allocate_node();
        {
            let node = &mut self.nodes[id as usize];
            node.aabb = aabb.expanded(self.margin);
            node.user_data = user_data;
            node.height = 0;
            node.moved = true;
        }
        self.insert_leaf(id);
        id
    }

    pub fn destroy_proxy(&mut self, proxy_id: ProxyId) {
        debug_assert!((proxy_id as usize) < self.nodes.len());
        debug_assert!(self.nodes[proxy_id as usize].is_leaf());
        self.remove_leaf(proxy_id);
        self.free_node(proxy_id);
    }

    /// Move a proxy with a swept AABB. If the proxy has moved outside of its
    /// fat AABB, or the fat AABB has become far too large, it is removed and
    /// re-inserted. Returns `true` when re-inserted.
    pub fn move_proxy(&mut self, proxy_id: ProxyId, aabb: &Aabb, displacement: Vec2) -> bool {
        debug_assert!((proxy_id as usize) < self.nodes.len());
        debug_assert!(self.nodes[proxy_id as usize].is_leaf());

        // Extend AABB
        let mut fat = aabb.expanded(self.margin);

        // Predict AABB movement
        let d = self.multiplier * displacement;
        if d.x < 0.0 {
            fat.lower.x += d.x;
        } else {
            fat.upper.x += d.x;
        }
        if d.y < 0.0 {
            fat.lower.y += d.y;
        } else {
            fat.upper.y += d.y;
        }

        let tree_aabb = self.nodes[proxy_id as usize].aabb;
        if tree_aabb.contains(aabb) {
            // The tree AABB still contains the object, but it might be too
            // large. Perhaps the object was moving fast but has since gone
            // to sleep.
            let huge = fat.expanded(4.0 * self.margin);
            if huge.contains(&tree_aabb) {
                return false;
            }
        }

        self.remove_leaf(proxy_id);
        self.nodes[proxy_id as usize].aabb = fat;
        self.insert_leaf(proxy_id);
        self.nodes[proxy_id as usize].moved = true;
        true
    }

    #[inline]
    pub fn get_user_data(&self, proxy_id: ProxyId) -> T {
        self.nodes[proxy_id as usize].user_data
    }

    #[inline]
    pub fn get_fat_aabb(&self, proxy_id: ProxyId) -> Aabb {
        self.nodes[proxy_id as usize].aabb
    }

    #[inline]
    pub fn was_moved(&self, proxy_id: ProxyId) -> bool {
        self.nodes[proxy_id as usize].moved
    }

    #[inline]
    pub fn clear_moved(&mut self, proxy_id: ProxyId) {
        self.nodes[proxy_id as usize].moved = false;
    }

    /// Number of leaf insertions, including re-insertions by `move_proxy`.
    pub fn insertion_count(&self) -> u32 {
        self.insertion_count
    }

    /// Visit every proxy whose fat AABB overlaps `aabb`. The callback
    /// returns `false` to stop the query.
    pub fn query<F: FnMut(ProxyId) -> bool>(&self, aabb: &Aabb, mut callback: F) {
        let mut stack: Vec<u32> = Vec::with_capacity(256);
        stack.push(self.root);

        while let Some(node_id) = stack.pop() {
            if node_id == NULL_NODE {
                continue;
            }

            let node = &self.nodes[node_id as usize];
            if !node.aabb.overlaps(aabb) {
                continue;
            }

            if node.is_leaf() {
                if !callback(node_id) {
                    return;
                }
            } else {
                stack.push(node.child1);
                stack.push(node.child2);
            }
        }
    }

    /// Cast a segment against the proxies. The callback performs the exact
    /// shape test and returns the new max fraction: `0` terminates, a
    /// negative value ignores the proxy, anything else clips the ray.
    pub fn ray_cast<F: FnMut(&RayCastInput, ProxyId) -> f32>(
        &self,
        input: &RayCastInput,
        mut callback: F,
    ) {
        let p1 = input.p1;
        let p2 = input.p2;
        let r = (p2 - p1).normalize_or_zero();
        debug_assert!(r.length_squared() > 0.0);

        // v is perpendicular to the segment
        let v = cross_sv(1.0, r);
        let abs_v = v.abs();

        // Separating axis for segment (Gino, p80): |dot(v, p1 - c)| > dot(|v|, h)
        let mut max_fraction = input.max_fraction;

        let segment_aabb = |max_fraction: f32| {
            let t = p1 + max_fraction * (p2 - p1);
            Aabb::new(p1.min(t), p1.max(t))
        };
        let mut segment = segment_aabb(max_fraction);

        let mut stack: Vec<u32> = Vec::with_capacity(256);
        stack.push(self.root);

        while let Some(node_id) = stack.pop() {
            if node_id == NULL_NODE {
                continue;
            }

            let node = &self.nodes[node_id as usize];
            if !node.aabb.overlaps(&segment) {
                continue;
            }

            let c = node.aabb.center();
            let h = node.aabb.extents();
            let separation = v.dot(p1 - c).abs() - abs_v.dot(h);
            if separation > 0.0 {
                continue;
            }

            if node.is_leaf() {
                let sub_input = RayCastInput {
                    p1,
                    p2,
                    max_fraction,
                };

                let value = callback(&sub_input, node_id);
                if value == 0.0 {
                    // The client has terminated the ray cast.
                    return;
                }

                if value > 0.0 {
                    // Update segment bounding box.
                    max_fraction = value;
                    segment = segment_aabb(max_fraction);
                }
            } else {
                stack.push(node.child1);
                stack.push(node.child2);
            }
        }
    }

    fn insert_leaf(&mut self, leaf: u32) {
        self.insertion_count += 1;

        if self.root == NULL_NODE {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NULL_NODE;
            return;
        }

        // Find the best sibling for this node
        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut index = self.root;
        while !self.nodes[index as usize].is_leaf() {
            let node = &self.nodes[index as usize];
            let child1 = node.child1;
            let child2 = node.child2;

            let area = node.aabb.perimeter();

            let combined_area = Aabb::combine(&node.aabb, &leaf_aabb).perimeter();

            // Cost of creating a new parent for this node and the new leaf
            let cost = 2.0 * combined_area;

            // Minimum cost of pushing the leaf further down the tree
            let inheritance_cost = 2.0 * (combined_area - area);

            let cost1 = self.descend_cost(child1, &leaf_aabb) + inheritance_cost;
            let cost2 = self.descend_cost(child2, &leaf_aabb) + inheritance_cost;

            // Descend according to the minimum cost.
            if cost < cost1 && cost < cost2 {
                break;
            }

            index = if cost1 < cost2 { child1 } else { child2 };
        }

        let sibling = index;

        // Create a new parent.
        let old_parent = self.nodes[sibling as usize].parent;
        let new_parent = self.allocate_node();
        {
            let sibling_aabb = self.nodes[sibling as usize].aabb;
            let sibling_height = self.nodes[sibling as usize].height;
            let node = &mut self.nodes[new_parent as usize];
            node.parent = old_parent;
            node.aabb = Aabb::combine(&leaf_aabb, &sibling_aabb);
            node.height = sibling_height + 1;
            node.child1 = sibling;
            node.child2 = leaf;
        }

        if old_parent != NULL_NODE {
            // The sibling was not the root.
            self.replace_child(old_parent, sibling, new_parent);
        } else {
            // The sibling was the root.
            self.root = new_parent;
        }
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;

        // Walk back up the tree fixing heights and AABBs
        self.refit_from(self.nodes[leaf as usize].parent);
    }

    fn descend_cost(&self, child: u32, leaf_aabb: &Aabb) -> f32 {
        let node = &self.nodes[child as usize];
        let combined = Aabb::combine(leaf_aabb, &node.aabb).perimeter();
        if node.is_leaf() {
            combined
        } else {
            combined - node.aabb.perimeter()
        }
    }

    fn replace_child(&mut self, parent: u32, old_child: u32, new_child: u32) {
        let node = &mut self.nodes[parent as usize];
        if node.child1 == old_child {
            node.child1 = new_child;
        } else {
            debug_assert_eq!(node.child2, old_child);
            node.child2 = new_child;
        }
    }

    fn refit_from(&mut self, start: u32) {
        let mut index = start;
        while index != NULL_NODE {
            index = self.balance(index);

            let child1 = self.nodes[index as usize].child1;
            let child2 = self.nodes[index as usize].child2;

            debug_assert!(child1 != NULL_NODE);
            debug_assert!(child2 != NULL_NODE);

            let (h1, a1) = (self.nodes[child1 as usize].height, self.nodes[child1 as usize].aabb);
            let (h2, a2) = (self.nodes[child2 as usize].height, self.nodes[child2 as usize].aabb);

            let node = &mut self.nodes[index as usize];
            node.height = 1 + h1.max(h2);
            node.aabb = Aabb::combine(&a1, &a2);

            index = node.parent;
        }
    }

    fn remove_leaf(&mut self, leaf: u32) {
        if leaf == self.root {
            self.root = NULL_NODE;
            return;
        }

        let parent = self.nodes[leaf as usize].parent;
        let grand_parent = self.nodes[parent as usize].parent;
        let sibling = if self.nodes[parent as usize].child1 == leaf {
            self.nodes[parent as usize].child2
        } else {
            self.nodes[parent as usize].child1
        };

        if grand_parent != NULL_NODE {
            // Destroy parent and connect sibling to grandparent.
            self.replace_child(grand_parent, parent, sibling);
            self.nodes[sibling as usize].parent = grand_parent;
            self.free_node(parent);

            // Adjust ancestor bounds.
            self.refit_from(grand_parent);
        } else {
            self.root = sibling;
            self.nodes[sibling as usize].parent = NULL_NODE;
            self.free_node(parent);
        }
    }

    // Perform a left or right rotation if node A is imbalanced.
    // Returns the new root index of the rotated subtree.
    fn balance(&mut self, i_a: u32) -> u32 {
        debug_assert!(i_a != NULL_NODE);

        let a = i_a as usize;
        if self.nodes[a].is_leaf() || self.nodes[a].height < 2 {
            return i_a;
        }

        let i_b = self.nodes[a].child1;
        let i_c = self.nodes[a].child2;
        let (b, c) = (i_b as usize, i_c as usize);

        let balance = self.nodes[c].height - self.nodes[b].height;

        // Rotate C up
        if balance > 1 {
            let i_f = self.nodes[c].child1;
            let i_g = self.nodes[c].child2;
            let (f, g) = (i_f as usize, i_g as usize);

            // Swap A and C
            self.nodes[c].child1 = i_a;
            self.nodes[c].parent = self.nodes[a].parent;
            self.nodes[a].parent = i_c;

            // A's old parent should point to C
            let c_parent = self.nodes[c].parent;
            if c_parent != NULL_NODE {
                self.replace_child(c_parent, i_a, i_c);
            } else {
                self.root = i_c;
            }

            // Rotate
            let (keep, give, i_give) = if self.nodes[f].height > self.nodes[g].height {
                (f, g, i_g)
            } else {
                (g, f, i_f)
            };
            self.nodes[c].child2 = keep as u32;
            self.nodes[a].child2 = i_give;
            self.nodes[give].parent = i_a;
            self.nodes[a].aabb = Aabb::combine(&self.nodes[b].aabb, &self.nodes[give].aabb);
            self.nodes[c].aabb = Aabb::combine(&self.nodes[a].aabb, &self.nodes[keep].aabb);

            self.nodes[a].height = 1 + self.nodes[b].height.max(self.nodes[give].height);
            self.nodes[c].height = 1 + self.nodes[a].height.max(self.nodes[keep].height);

            return i_c;
        }

        // Rotate B up
        if balance < -1 {
            let i_d = self.nodes[b].child1;
            let i_e = self.nodes[b].child2;
            let (d, e) = (i_d as usize, i_e as usize);

            // Swap A and B
            self.nodes[b].child1 = i_a;
            self.nodes[b].parent = self.nodes[a].parent;
            self.nodes[a].parent = i_b;

            // A's old parent should point to B
            let b_parent = self.nodes[b].parent;
            if b_parent != NULL_NODE {
                self.replace_child(b_parent, i_a, i_b);
            } else {
                self.root = i_b;
            }

            // Rotate
            let (keep, give, i_give) = if self.nodes[d].height > self.nodes[e].height {
                (d, e, i_e)
            } else {
                (e, d, i_d)
            };
            self.nodes[b].child2 = keep as u32;
            self.nodes[a].child1 = i_give;
            self.nodes[give].parent = i_a;
            self.nodes[a].aabb = Aabb::combine(&self.nodes[c].aabb, &self.nodes[give].aabb);
            self.nodes[b].aabb = Aabb::combine(&self.nodes[a].aabb, &self.nodes[keep].aabb);

            self.nodes[a].height = 1 + self.nodes[c].height.max(self.nodes[give].height);
            self.nodes[b].height = 1 + self.nodes[a].height.max(self.nodes[keep].height);

            return i_b;
        }

        i_a
    }

    /// Height of the tree; a single leaf has height 0.
    pub fn get_height(&self) -> i32 {
        if self.root == NULL_NODE {
            0
        } else {
            self.nodes[self.root as usize].height
        }
    }

    /// Maximum height difference between the children of any node.
    pub fn get_max_balance(&self) -> i32 {
        self.nodes
            .iter()
            .filter(|n| n.height > 1)
            .map(|n| {
                let h1 = self.nodes[n.child1 as usize].height;
                let h2 = self.nodes[n.child2 as usize].height;
                (h2 - h1).abs()
            })
            .max()
            .unwrap_or(0)
    }

    /// Sum of node perimeters over the root perimeter. Lower is better.
    pub fn get_area_ratio(&self) -> f32 {
        if self.root == NULL_NODE {
            return 0.0;
        }

        let root_area = self.nodes[self.root as usize].aabb.perimeter();
        let total_area: f32 = self
            .nodes
            .iter()
            .filter(|n| n.height >= 0)
            .map(|n| n.aabb.perimeter())
            .sum();

        total_area / root_area
    }

    /// Rebuild an optimal tree bottom up. Quadratic in the proxy count, so
    /// meant for tooling and tests rather than per-step use.
    pub fn rebuild_bottom_up(&mut self) {
        let mut leaves: Vec<u32> = Vec::with_capacity(self.nodes.len());

        // Build array of leaves. Free the rest.
        for i in 0..self.nodes.len() as u32 {
            let node = &self.nodes[i as usize];
            if node.height < 0 {
                // free node in pool
                continue;
            }
            if node.is_leaf() {
                self.nodes[i as usize].parent = NULL_NODE;
                leaves.push(i);
            } else {
                self.free_node(i);
            }
        }

        while leaves.len() > 1 {
            let mut min_cost = f32::MAX;
            let (mut i_min, mut j_min) = (0, 1);
            for i in 0..leaves.len() {
                let aabb_i = self.nodes[leaves[i] as usize].aabb;
                for j in (i + 1)..leaves.len() {
                    let aabb_j = self.nodes[leaves[j] as usize].aabb;
                    let cost = Aabb::combine(&aabb_i, &aabb_j).perimeter();
                    if cost < min_cost {
                        i_min = i;
                        j_min = j;
                        min_cost = cost;
                    }
                }
            }

            let index1 = leaves[i_min];
            let index2 = leaves[j_min];

            let parent = self.allocate_node();
            {
                let (a1, h1) = (self.nodes[index1 as usize].aabb, self.nodes[index1 as usize].height);
                let (a2, h2) = (self.nodes[index2 as usize].aabb, self.nodes[index2 as usize].height);
                let node = &mut self.nodes[parent as usize];
                node.child1 = index1;
                node.child2 = index2;
                node.height = 1 + h1.max(h2);
                node.aabb = Aabb::combine(&a1, &a2);
                node.parent = NULL_NODE;
            }
            self.nodes[index1 as usize].parent = parent;
            self.nodes[index2 as usize].parent = parent;

            leaves[j_min] = leaves[leaves.len() - 1];
            leaves[i_min] = parent;
            leaves.pop();
        }

        self.root = leaves.first().copied().unwrap_or(NULL_NODE);
        debug_assert!(self.validate());
    }

    /// Shift the world origin. Useful for large worlds.
    pub fn shift_origin(&mut self, new_origin: Vec2) {
        for node in self.nodes.iter_mut().filter(|n| n.height >= 0) {
            node.aabb.lower -= new_origin;
            node.aabb.upper -= new_origin;
        }
    }

    fn compute_height(&self, node_id: u32) -> i32 {
        let node = &self.nodes[node_id as usize];
        if node.is_leaf() {
            return 0;
        }
        1 + self
            .compute_height(node.child1)
            .max(self.compute_height(node.child2))
    }

    fn validate_structure(&self, index: u32) -> bool {
        if index == NULL_NODE {
            return true;
        }
        let node = &self.nodes[index as usize];

        if index == self.root && node.parent != NULL_NODE {
            return false;
        }

        if node.is_leaf() {
            return node.child2 == NULL_NODE && node.height == 0;
        }

        let (child1, child2) = (node.child1, node.child2);
        if child1 as usize >= self.nodes.len() || child2 as usize >= self.nodes.len() {
            return false;
        }
        if self.nodes[child1 as usize].parent != index || self.nodes[child2 as usize].parent != index {
            return false;
        }

        self.validate_structure(child1) && self.validate_structure(child2)
    }

    fn validate_metrics(&self, index: u32) -> bool {
        if index == NULL_NODE {
            return true;
        }
        let node = &self.nodes[index as usize];
        if node.is_leaf() {
            return node.aabb.is_valid();
        }

        let (c1, c2) = (&self.nodes[node.child1 as usize], &self.nodes[node.child2 as usize]);
        let height = 1 + c1.height.max(c2.height);
        if node.height != height {
            return false;
        }

        let aabb = Aabb::combine(&c1.aabb, &c2.aabb);
        if aabb.lower != node.aabb.lower || aabb.upper != node.aabb.upper {
            return false;
        }

        self.validate_metrics(node.child1) && self.validate_metrics(node.child2)
    }

    /// Check structural links, cached heights, cached AABBs and the free
    /// list against the node pool.
    pub fn validate(&self) -> bool {
        if !self.validate_structure(self.root) || !self.validate_metrics(self.root) {
            return false;
        }

        let free_count = self.nodes.iter().filter(|n| n.height < 0).count();
        if free_count != self.free_list.len() {
            return false;
        }

        let height = if self.root == NULL_NODE {
            0
        } else {
            self.compute_height(self.root)
        };
        height == self.get_height()
    }
}
