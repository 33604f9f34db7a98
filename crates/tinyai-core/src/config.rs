// Graph configuration
//
// Built with Default plus consuming `with_*` setters:
//
//   let config = GraphConfig::default()
//       .with_retain_graph(false)
//       .with_strict_scalar_backward(true);
//   let mut graph = Graph::with_config(config);

/// Behavior switches of a [`Graph`](crate::graph::Graph).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Keep creator edges after `backward` (default: true). When false, a
    /// backward pass releases every op it ran and a second pass through the
    /// same nodes is a graph-usage error.
    pub retain_graph: bool,
    /// Reject `backward` on a non-scalar root that has no seed gradient
    /// (default: false, which seeds with ones of the root's shape).
    pub strict_scalar_backward: bool,
    /// Record creator edges for new nodes (default: true). Cleared inside
    /// `Graph::no_grad`.
    pub grad_enabled: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            retain_graph: true,
            strict_scalar_backward: false,
            grad_enabled: true,
        }
    }
}

impl GraphConfig {
    pub fn with_retain_graph(mut self, retain: bool) -> Self {
        self.retain_graph = retain;
        self
    }

    pub fn with_strict_scalar_backward(mut self, strict: bool) -> Self {
        self.strict_scalar_backward = strict;
        self
    }

    pub fn with_grad_enabled(mut self, enabled: bool) -> Self {
        self.grad_enabled = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_builders() {
        let c = GraphConfig::default();
        assert!(c.retain_graph);
        assert!(!c.strict_scalar_backward);
        assert!(c.grad_enabled);

        let c = c.with_retain_graph(false).with_strict_scalar_backward(true);
        assert!(!c.retain_graph);
        assert!(c.strict_scalar_backward);
    }
}
