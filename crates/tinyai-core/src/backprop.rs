// Backpropagation: Reverse-mode traversal of a Graph
//
// backward(root):
//
//   1. Walk everything reachable from root and fail with GraphReleased if
//      any node on the way lost its creator edge. Nothing is written yet.
//   2. Keep a worklist ordered by (generation, index), highest first. Pop a
//      node, run its op's backward with the gradient this pass gathered for
//      it, and ADD each returned gradient into the matching input's slot.
//   3. An input enters the worklist the first time it receives a
//      contribution and never again. Every consumer of a node has a strictly
//      greater generation, so all of them are popped before the node is,
//      and by then its pass gradient holds the sum over every path.
//   4. Only after the whole traversal succeeded are the gathered gradients
//      (and the root's seed) added onto the stored ones, and the creators
//      of a non-retaining pass released. A failing pass leaves every
//      gradient as it was.
//
//   Diamond:   a ──► b ──► d        a is popped only after b and c have
//              └──► c ──┘           both added their share into a.grad
//
// REPEATED PASSES:
//
//   Each pass propagates only its own seed; what it computes is then added
//   onto the gradients nodes already hold. With `retain_graph` (the default)
//   creator edges survive, and a second identical pass exactly doubles every
//   gradient; call `clear_grads` between passes. Without it, every op that
//   ran is released, and reaching a released node again is a GraphReleased
//   error.
//
// Gradients are only accumulated into nodes that require them, so data and
// label constants never allocate a gradient buffer.

use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::{debug, debug_span, trace};

use crate::error::{Error, Result};
use crate::graph::{Graph, Node, Var};
use crate::tensor::Tensor;

impl Graph {
    /// Backpropagate from `root`. The root's stored gradient is the seed;
    /// if it has none, it is seeded with ones of its shape.
    pub fn backward(&mut self, root: Var) -> Result<()> {
        let node = self.node(root)?;
        if node.released {
            return Err(Error::GraphReleased { node: root.index });
        }
        let (seed, root_grad) = match node.grad.clone() {
            Some(g) => (g, None),
            None => {
                if self.config.strict_scalar_backward && node.value.size() != 1 {
                    return Err(Error::NonScalarBackward {
                        shape: node.value.shape().clone(),
                    });
                }
                let ones = node.value.ones_like();
                (ones.clone(), Some(ones))
            }
        };
        self.run_backward(root, seed, root_grad)
    }

    /// Backpropagate from `root` with an explicit seed gradient. The seed
    /// replaces any gradient already stored on the root.
    pub fn backward_with(&mut self, root: Var, seed: Tensor) -> Result<()> {
        let node = self.node(root)?;
        if node.released {
            return Err(Error::GraphReleased { node: root.index });
        }
        if seed.shape() != node.value.shape() {
            return Err(Error::ShapeMismatch {
                op: "backward_with",
                expected: node.value.shape().clone(),
                got: seed.shape().clone(),
            });
        }
        self.run_backward(root, seed.clone(), Some(seed))
    }

    fn run_backward(&mut self, root: Var, seed: Tensor, root_grad: Option<Tensor>) -> Result<()> {
        let span = debug_span!("backward", root = root.index, nodes = self.nodes.len());
        let _enter = span.enter();

        if let Some(index) = self
            .reachable(root)?
            .into_iter()
            .find(|&i| self.nodes[i].released)
        {
            return Err(Error::GraphReleased { node: index });
        }

        let mut queue: BinaryHeap<(usize, usize)> = BinaryHeap::new();
        let mut seen: HashSet<usize> = HashSet::new();
        // Gradients flowing in this pass, consumed as nodes are popped.
        let mut pending: HashMap<usize, Tensor> = HashMap::new();
        // Everything this pass adds onto stored gradients.
        let mut gathered: HashMap<usize, Tensor> = HashMap::new();
        let mut ran: Vec<usize> = Vec::new();
        queue.push((self.nodes[root.index].generation, root.index));
        seen.insert(root.index);
        pending.insert(root.index, seed);

        while let Some((generation, index)) = queue.pop() {
            let grad = match pending.remove(&index) {
                Some(g) => g,
                None => continue,
            };
            let node = &self.nodes[index];
            let creator = match &node.creator {
                Some(c) => c,
                None => continue,
            };

            let inputs: Vec<&Tensor> = creator
                .inputs
                .iter()
                .map(|v| &self.nodes[v.index].value)
                .collect();
            let input_grads = creator.op.backward(&grad, &inputs, &node.value)?;
            trace!(
                node = index,
                op = creator.op.name(),
                generation,
                "backward step"
            );

            for (input, g) in creator.inputs.iter().zip(input_grads) {
                let target = &self.nodes[input.index];
                if !target.requires_grad {
                    continue;
                }
                match gathered.get_mut(&input.index) {
                    Some(acc) => acc.add_assign_tensor(&g)?,
                    None => {
                        gathered.insert(input.index, g.clone());
                    }
                }
                if target.creator.is_none() {
                    continue;
                }
                match pending.get_mut(&input.index) {
                    Some(acc) => acc.add_assign_tensor(&g)?,
                    None => {
                        pending.insert(input.index, g);
                    }
                }
                if seen.insert(input.index) {
                    queue.push((target.generation, input.index));
                }
            }
            ran.push(index);
        }

        // Merge before writing so a failed merge leaves the graph untouched.
        let mut updates: Vec<(usize, Tensor)> = Vec::with_capacity(gathered.len() + 1);
        for (index, g) in gathered {
            let merged = match &self.nodes[index].grad {
                Some(stored) => {
                    let mut acc = stored.clone();
                    acc.add_assign_tensor(&g)?;
                    acc
                }
                None => g,
            };
            updates.push((index, merged));
        }
        if let Some(g) = root_grad {
            updates.push((root.index, g));
        }
        for (index, g) in updates {
            self.nodes[index].grad = Some(g);
        }

        let retain = self.config.retain_graph;
        for &index in &ran {
            let node = &mut self.nodes[index];
            if let Some(creator) = node.creator.as_mut() {
                creator.consumed += 1;
            }
            if !retain {
                release(node);
            }
        }
        debug!(processed = ran.len(), retain, "backward done");
        Ok(())
    }

    /// Nodes reachable from `root` through creator edges, root included.
    /// Edges of released nodes are followed too.
    fn reachable(&self, root: Var) -> Result<Vec<usize>> {
        self.check(root)?;
        let mut stack = vec![root.index];
        let mut seen = HashSet::new();
        seen.insert(root.index);
        let mut order = Vec::new();
        while let Some(index) = stack.pop() {
            order.push(index);
            let node = &self.nodes[index];
            let inputs = node
                .creator
                .as_ref()
                .map_or(node.detached.as_slice(), |c| c.inputs.as_slice());
            for input in inputs {
                if seen.insert(input.index) {
                    stack.push(input.index);
                }
            }
        }
        Ok(order)
    }

    /// Unset the gradient of every node reachable from `root`, including
    /// the inputs of ops a non-retaining backward already released. Creator
    /// edges are left intact, so a retained graph can be backpropagated
    /// again.
    pub fn clear_grads(&mut self, root: Var) -> Result<()> {
        let nodes = self.reachable(root)?;
        for &index in &nodes {
            self.nodes[index].grad = None;
        }
        debug!(root = root.index, cleared = nodes.len(), "clear_grads");
        Ok(())
    }

    /// Unset every gradient in the arena.
    pub fn clear_all_grads(&mut self) {
        for node in &mut self.nodes {
            node.grad = None;
        }
        debug!(nodes = self.nodes.len(), "clear_all_grads");
    }

    /// Drop the creator edge of every node reachable from `root`. Values and
    /// gradients stay readable; a later backward through these nodes fails
    /// with GraphReleased.
    pub fn unchain_backward(&mut self, root: Var) -> Result<()> {
        let nodes = self.reachable(root)?;
        let mut released = 0usize;
        for &index in &nodes {
            if release(&mut self.nodes[index]) {
                released += 1;
            }
        }
        debug!(root = root.index, released, "unchain_backward");
        Ok(())
    }
}

/// Drop a node's creator edge, remembering its inputs. False for leaves and
/// nodes already released.
fn release(node: &mut Node) -> bool {
    match node.creator.take() {
        Some(creator) => {
            node.detached = creator.inputs;
            node.released = true;
            true
        }
        None => false,
    }
}
