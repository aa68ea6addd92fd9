//! Worker-level bounding volume hierarchy.
//!
//! After every worker reports the bounds of its local geometry, the
//! coordinator builds one BVH whose leaves are workers and broadcasts it.
//! Workers use it to route escaped rays to the peer owning the space the
//! ray enters; the coordinator itself never traverses it.

use bincode::{Decode, Encode};
use glam::Vec3;

use crate::math::bounds::Bounds;
use crate::WorkerId;

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum WbvhNode {
    Branch {
        bounds: Bounds,
        left: u32,
        right: u32,
    },
    Leaf {
        bounds: Bounds,
        worker: WorkerId,
    },
}

impl WbvhNode {
    pub fn bounds(&self) -> Bounds {
        match self {
            WbvhNode::Branch { bounds, .. } | WbvhNode::Leaf { bounds, .. } => *bounds,
        }
    }
}

/// Flat node array; children precede their parent, the root is the last
/// node.
#[derive(Debug, Clone, Encode, Decode)]
pub struct Wbvh {
    nodes: Vec<WbvhNode>,
}

impl Wbvh {
    /// Top-down median split over the longest axis, the same construction
    /// workers use for their local BVHs.
    pub fn build(leaves: &[(WorkerId, Bounds)]) -> Self {
        assert!(!leaves.is_empty(), "can't build a WBVH over zero workers");
        let mut wbvh = Self { nodes: Vec::new() };
        wbvh.build_node(leaves.to_vec());
        wbvh
    }

    fn build_node(&mut self, mut items: Vec<(WorkerId, Bounds)>) -> u32 {
        let bounds = items
            .iter()
            .fold(Bounds::EMPTY, |acc, (_, b)| acc.union(*b));

        if let [(worker, bounds)] = items.as_slice() {
            self.nodes.push(WbvhNode::Leaf {
                bounds: *bounds,
                worker: *worker,
            });
            return self.nodes.len() as u32 - 1;
        }

        let Vec3 { x, y, z } = bounds.extent();
        let axis = if x >= y && x >= z {
            0
        } else if y >= z {
            1
        } else {
            2
        };
        items.sort_by(|(_, a), (_, b)| {
            a.centroid()[axis].total_cmp(&b.centroid()[axis])
        });

        let right_half = items.split_off(items.len() / 2);
        let left = self.build_node(items);
        let right = self.build_node(right_half);
        self.nodes.push(WbvhNode::Branch {
            bounds,
            left,
            right,
        });
        self.nodes.len() as u32 - 1
    }

    pub fn root(&self) -> &WbvhNode {
        self.nodes.last().expect("a WBVH is never empty")
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.nodes.len() * std::mem::size_of::<WbvhNode>()
    }

    pub fn leaves(&self) -> impl Iterator<Item = (WorkerId, Bounds)> + '_ {
        self.nodes.iter().filter_map(|n| match n {
            WbvhNode::Leaf { worker, bounds } => Some((*worker, *bounds)),
            WbvhNode::Branch { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box_at(x: f32) -> Bounds {
        Bounds::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0))
    }

    #[test]
    fn single_worker_is_a_lone_leaf() {
        let wbvh = Wbvh::build(&[(1, unit_box_at(0.0))]);
        assert_eq!(wbvh.node_count(), 1);
        assert!(matches!(wbvh.root(), WbvhNode::Leaf { worker: 1, .. }));
    }

    #[test]
    fn four_workers_build_a_full_tree() {
        let leaves: Vec<_> = (0..4)
            .map(|i| (i as WorkerId + 1, unit_box_at(i as f32 * 2.0)))
            .collect();
        let wbvh = Wbvh::build(&leaves);

        // 4 leaves, 3 branches.
        assert_eq!(wbvh.node_count(), 7);

        // Every worker appears exactly once.
        let mut workers: Vec<_> = wbvh.leaves().map(|(w, _)| w).collect();
        workers.sort();
        assert_eq!(workers, [1, 2, 3, 4]);

        // The root covers everything.
        let root = wbvh.root().bounds();
        assert_eq!(root.min(), Vec3::ZERO);
        assert_eq!(root.max(), Vec3::new(7.0, 1.0, 1.0));
    }
}
