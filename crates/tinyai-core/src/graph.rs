use tracing::debug;

use crate::config::GraphConfig;
use crate::error::{Error, Result};
use crate::op::Op;
use crate::tensor::Tensor;

// Graph: Arena of autodiff nodes
//
// A node holds a value, an optional accumulated gradient and, unless it is a
// leaf, the Op that produced it plus the handles of that Op's inputs:
//
//   a = graph.variable(..)        node 0   leaf,   generation 0
//   b = graph.variable(..)        node 1   leaf,   generation 0
//   c = graph.mul(a, b)?          node 2   Mul(0, 1), generation 1
//   d = graph.add(c, a)?          node 3   Add(2, 0), generation 2
//
// Edges point from a node to its inputs by INDEX, never by owning pointer,
// so the arena has no reference cycles. Dropping the Graph frees the whole
// computation at once; `unchain_backward` drops the creator edges of one
// subgraph early; `reset` empties the arena for the next forward pass.
//
// HANDLES:
//
//   `Var` is a Copy handle (index + epoch). Every `reset` bumps the epoch, so
//   a handle from a previous forward pass is rejected with a StaleHandle
//   error instead of silently aliasing whatever node now sits at its index.
//
// GENERATION:
//
//   Leaves have generation 0. A recorded node has 1 + max(input
//   generations), so every node outranks all of its inputs and a
//   highest-generation-first walk is a valid reverse topological order.

/// Handle to a node of a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var {
    pub(crate) index: usize,
    pub(crate) epoch: u32,
}

impl Var {
    /// Position of the node in its graph's arena.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// The op that produced a node, and the nodes it read.
#[derive(Debug, Clone)]
pub(crate) struct Creator {
    pub(crate) op: Op,
    pub(crate) inputs: Vec<Var>,
    /// How many backward passes have run this op.
    pub(crate) consumed: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) value: Tensor,
    pub(crate) grad: Option<Tensor>,
    pub(crate) creator: Option<Creator>,
    pub(crate) generation: usize,
    pub(crate) requires_grad: bool,
    pub(crate) name: Option<String>,
    /// Creator edge was dropped by a non-retaining backward or by unchaining.
    pub(crate) released: bool,
    /// Inputs of the dropped creator edge, kept so gradient clearing can
    /// still reach the leaves.
    pub(crate) detached: Vec<Var>,
}

impl Node {
    fn leaf(value: Tensor, requires_grad: bool) -> Self {
        Node {
            value,
            grad: None,
            creator: None,
            generation: 0,
            requires_grad,
            name: None,
            released: false,
            detached: Vec::new(),
        }
    }
}

/// Arena-backed computation graph.
#[derive(Debug, Default)]
pub struct Graph {
    pub(crate) nodes: Vec<Node>,
    pub(crate) config: GraphConfig,
    epoch: u32,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Graph {
            nodes: Vec::new(),
            config,
            epoch: 0,
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop every node and invalidate all outstanding handles.
    pub fn reset(&mut self) {
        debug!(nodes = self.nodes.len(), epoch = self.epoch, "graph reset");
        self.nodes.clear();
        self.epoch = self.epoch.wrapping_add(1);
    }

    // Leaves

    fn push(&mut self, node: Node) -> Var {
        self.nodes.push(node);
        Var {
            index: self.nodes.len() - 1,
            epoch: self.epoch,
        }
    }

    /// A trainable leaf (parameter or input that needs a gradient).
    pub fn variable(&mut self, value: Tensor) -> Var {
        self.push(Node::leaf(value, true))
    }

    /// A named trainable leaf.
    pub fn named_variable(&mut self, value: Tensor, name: impl Into<String>) -> Var {
        let mut node = Node::leaf(value, true);
        node.name = Some(name.into());
        self.push(node)
    }

    /// A leaf that never receives a gradient (data, labels).
    pub fn constant(&mut self, value: Tensor) -> Var {
        self.push(Node::leaf(value, false))
    }

    // Node access

    pub(crate) fn check(&self, var: Var) -> Result<()> {
        if var.epoch != self.epoch || var.index >= self.nodes.len() {
            return Err(Error::StaleHandle {
                node: var.index,
                epoch: var.epoch,
                current: self.epoch,
            });
        }
        Ok(())
    }

    pub(crate) fn node(&self, var: Var) -> Result<&Node> {
        self.check(var)?;
        Ok(&self.nodes[var.index])
    }

    pub(crate) fn node_mut(&mut self, var: Var) -> Result<&mut Node> {
        self.check(var)?;
        Ok(&mut self.nodes[var.index])
    }

    pub fn value(&self, var: Var) -> Result<&Tensor> {
        Ok(&self.node(var)?.value)
    }

    /// Accumulated gradient, or `None` if no backward pass has reached it.
    pub fn grad(&self, var: Var) -> Result<Option<&Tensor>> {
        Ok(self.node(var)?.grad.as_ref())
    }

    /// Overwrite (or clear) a node's gradient. A new gradient must have the
    /// node's shape.
    pub fn set_grad(&mut self, var: Var, grad: Option<Tensor>) -> Result<()> {
        let node = self.node_mut(var)?;
        if let Some(g) = &grad {
            if g.shape() != node.value.shape() {
                return Err(Error::ShapeMismatch {
                    op: "set_grad",
                    expected: node.value.shape().clone(),
                    got: g.shape().clone(),
                });
            }
        }
        node.grad = grad;
        Ok(())
    }

    pub fn name(&self, var: Var) -> Result<Option<&str>> {
        Ok(self.node(var)?.name.as_deref())
    }

    pub fn set_name(&mut self, var: Var, name: impl Into<String>) -> Result<()> {
        self.node_mut(var)?.name = Some(name.into());
        Ok(())
    }

    pub fn requires_grad(&self, var: Var) -> Result<bool> {
        Ok(self.node(var)?.requires_grad)
    }

    /// True for graph inputs and parameters: nodes no op produced.
    pub fn is_leaf(&self, var: Var) -> Result<bool> {
        let node = self.node(var)?;
        Ok(node.creator.is_none() && !node.released)
    }

    pub fn generation(&self, var: Var) -> Result<usize> {
        Ok(self.node(var)?.generation)
    }

    /// The op that produced `var`, if any.
    pub fn creator_op(&self, var: Var) -> Result<Option<&Op>> {
        Ok(self.node(var)?.creator.as_ref().map(|c| &c.op))
    }

    /// Handles of the nodes `var` was computed from.
    pub fn inputs(&self, var: Var) -> Result<Vec<Var>> {
        Ok(self
            .node(var)?
            .creator
            .as_ref()
            .map(|c| c.inputs.clone())
            .unwrap_or_default())
    }

    /// Number of backward passes that have run the op producing `var`.
    pub fn times_consumed(&self, var: Var) -> Result<usize> {
        Ok(self.node(var)?.creator.as_ref().map_or(0, |c| c.consumed))
    }

    /// Every leaf that requires a gradient, in creation order.
    pub fn parameters(&self) -> Vec<Var> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.requires_grad && n.creator.is_none() && !n.released)
            .map(|(index, _)| Var {
                index,
                epoch: self.epoch,
            })
            .collect()
    }

    // Grad mode

    pub fn is_grad_enabled(&self) -> bool {
        self.config.grad_enabled
    }

    /// Switch recording on or off; returns the previous mode.
    pub fn set_grad_enabled(&mut self, enabled: bool) -> bool {
        std::mem::replace(&mut self.config.grad_enabled, enabled)
    }

    /// Run `f` with recording disabled, then restore the previous mode.
    /// Nodes created inside are leaves that require no gradient.
    pub fn no_grad<T>(&mut self, f: impl FnOnce(&mut Graph) -> T) -> T {
        let prev = self.set_grad_enabled(false);
        let out = f(self);
        self.config.grad_enabled = prev;
        out
    }

    // Op application

    /// Run `op` forward on the values of `inputs` and append the result.
    ///
    /// The new node records its creator only when grad mode is on and at
    /// least one input requires a gradient; otherwise it is a constant leaf.
    pub fn apply(&mut self, op: Op, inputs: &[Var]) -> Result<Var> {
        for &v in inputs {
            self.check(v)?;
        }
        let values: Vec<&Tensor> = inputs.iter().map(|v| &self.nodes[v.index].value).collect();
        let value = op.forward(&values)?;

        let requires_grad = self.config.grad_enabled
            && inputs.iter().any(|v| self.nodes[v.index].requires_grad);
        if !requires_grad {
            return Ok(self.push(Node::leaf(value, false)));
        }

        let generation = 1 + inputs
            .iter()
            .map(|v| self.nodes[v.index].generation)
            .max()
            .unwrap_or(0);
        let node = Node {
            value,
            grad: None,
            creator: Some(Creator {
                op,
                inputs: inputs.to_vec(),
                consumed: 0,
            }),
            generation,
            requires_grad: true,
            name: None,
            released: false,
            detached: Vec::new(),
        };
        Ok(self.push(node))
    }
}
