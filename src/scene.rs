//! Scene resource table.
//!
//! The scene is the sole owner of its nodes. Everything else (the frame
//! orchestrator in particular) holds `NodeHandle`s, which are plain indices
//! and keep nothing alive. A stale or mistyped handle is an error.

use std::f32::consts::TAU;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::compositor::{DrawStats, MaskCompositor, RenderTarget};
use crate::depth::WorldAnchor;

/// Non-owning reference into a `Scene`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeHandle(usize);

/// Rotation axis for a highlighter ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// One torus ring of the highlighter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RingSpec {
    pub ring_radius: f32,
    pub pipe_radius: f32,
    pub spin_axis: Axis,
    /// Seconds per full turn.
    pub spin_period_secs: f32,
}

/// Two counter-spinning metallic rings marking the tracked object's anchor.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HighlighterNode {
    pub position: [f32; 3],
    pub hidden: bool,
    pub rings: [RingSpec; 2],
}

impl HighlighterNode {
    pub fn new() -> Self {
        Self {
            position: [0.0; 3],
            hidden: true,
            rings: [
                RingSpec {
                    ring_radius: 0.125,
                    pipe_radius: 0.005,
                    spin_axis: Axis::X,
                    spin_period_secs: 6.0,
                },
                RingSpec {
                    ring_radius: 0.115,
                    pipe_radius: 0.0045,
                    spin_axis: Axis::Z,
                    spin_period_secs: 4.0,
                },
            ],
        }
    }

    /// Move to `anchor` and show the node.
    pub fn place(&mut self, anchor: &WorldAnchor) {
        self.position = anchor.position;
        self.hidden = false;
    }

    /// Rotation of each ring about its spin axis at `elapsed_secs`, in
    /// radians within `[0, 2π)`.
    pub fn ring_angles(&self, elapsed_secs: f32) -> [f32; 2] {
        self.rings.map(|ring| {
            if ring.spin_period_secs <= 0.0 {
                return 0.0;
            }
            (elapsed_secs / ring.spin_period_secs * TAU).rem_euclid(TAU)
        })
    }
}

impl Default for HighlighterNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub enum SceneNode {
    MaskQuad(MaskCompositor),
    Highlighter(HighlighterNode),
}

impl SceneNode {
    fn kind(&self) -> &'static str {
        match self {
            Self::MaskQuad(_) => "mask quad",
            Self::Highlighter(_) => "highlighter",
        }
    }
}

#[derive(Debug, Default)]
pub struct Scene {
    nodes: Vec<Option<SceneNode>>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: SceneNode) -> NodeHandle {
        self.nodes.push(Some(node));
        NodeHandle(self.nodes.len() - 1)
    }

    pub fn remove(&mut self, handle: NodeHandle) -> Option<SceneNode> {
        self.nodes.get_mut(handle.0).and_then(Option::take)
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn node_mut(&mut self, handle: NodeHandle) -> Result<&mut SceneNode> {
        self.nodes
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| anyhow!("scene node {:?} does not exist", handle))
    }

    fn node(&self, handle: NodeHandle) -> Result<&SceneNode> {
        self.nodes
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| anyhow!("scene node {:?} does not exist", handle))
    }

    pub fn compositor(&self, handle: NodeHandle) -> Result<&MaskCompositor> {
        match self.node(handle)? {
            SceneNode::MaskQuad(compositor) => Ok(compositor),
            other => Err(anyhow!("scene node {:?} is a {}", handle, other.kind())),
        }
    }

    pub fn compositor_mut(&mut self, handle: NodeHandle) -> Result<&mut MaskCompositor> {
        match self.node_mut(handle)? {
            SceneNode::MaskQuad(compositor) => Ok(compositor),
            other => Err(anyhow!("scene node {:?} is a {}", handle, other.kind())),
        }
    }

    pub fn highlighter(&self, handle: NodeHandle) -> Result<&HighlighterNode> {
        match self.node(handle)? {
            SceneNode::Highlighter(node) => Ok(node),
            other => Err(anyhow!("scene node {:?} is a {}", handle, other.kind())),
        }
    }

    pub fn highlighter_mut(&mut self, handle: NodeHandle) -> Result<&mut HighlighterNode> {
        match self.node_mut(handle)? {
            SceneNode::Highlighter(node) => Ok(node),
            other => Err(anyhow!("scene node {:?} is a {}", handle, other.kind())),
        }
    }

    /// Run every node's custom draw against `target`, in insertion order.
    /// Only mask quads draw into the software target; highlighter geometry
    /// belongs to the host renderer.
    pub fn render(&self, target: &mut RenderTarget) -> Vec<DrawStats> {
        self.nodes
            .iter()
            .flatten()
            .filter_map(|node| match node {
                SceneNode::MaskQuad(compositor) => Some(compositor.render(target)),
                SceneNode::Highlighter(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::CompositorConfig;

    #[test]
    fn handles_resolve_by_kind() {
        let mut scene = Scene::new();
        let quad = scene.add(SceneNode::MaskQuad(MaskCompositor::new(
            CompositorConfig::mask_only(),
            7,
        )));
        let ring = scene.add(SceneNode::Highlighter(HighlighterNode::new()));

        assert_eq!(scene.compositor(quad).unwrap().class_index(), 7);
        assert!(scene.highlighter(ring).unwrap().hidden);
        assert!(scene.compositor(ring).is_err());
        assert!(scene.highlighter_mut(quad).is_err());
    }

    #[test]
    fn removed_node_handle_is_stale() {
        let mut scene = Scene::new();
        let ring = scene.add(SceneNode::Highlighter(HighlighterNode::new()));
        assert!(scene.remove(ring).is_some());
        assert!(scene.highlighter(ring).is_err());
        assert!(scene.is_empty());
    }

    #[test]
    fn placing_shows_highlighter_at_anchor() {
        let mut node = HighlighterNode::new();
        node.place(&WorldAnchor {
            position: [0.5, -0.2, -1.0],
            distance: 1.14,
        });
        assert!(!node.hidden);
        assert_eq!(node.position, [0.5, -0.2, -1.0]);
    }

    #[test]
    fn rings_spin_at_their_own_rates() {
        let node = HighlighterNode::new();
        let [outer, inner] = node.ring_angles(3.0);
        assert!((outer - std::f32::consts::PI).abs() < 1e-5);
        assert!((inner - 1.5 * std::f32::consts::PI).abs() < 1e-5);
        let [outer, _] = node.ring_angles(6.0);
        assert!(outer.abs() < 1e-4 || (outer - TAU).abs() < 1e-4);
    }
}
