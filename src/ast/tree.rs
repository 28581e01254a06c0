/// Index of a node inside an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Node<T> {
    pub value: T,
    /// Non-owning back reference, kept for diagnostics.
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// A flat, index-based tree. Node `0` is the synthetic root; every other
/// node is owned by exactly one parent's `children` list.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    nodes: Vec<Node<T>>,
}

impl<T> Arena<T> {
    pub fn with_root(value: T) -> Self {
        Self {
            nodes: vec![Node {
                value,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn push_child(&mut self, parent: NodeId, value: T) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            value,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn get(&self, id: NodeId) -> &Node<T> {
        &self.nodes[id.0]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Transform every node's value while keeping the tree shape. The
    /// closure also sees the node's id and children.
    pub fn try_map<U, E>(
        self,
        mut f: impl FnMut(NodeId, T, &[NodeId]) -> Result<U, E>,
    ) -> Result<Arena<U>, E> {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.into_iter().enumerate() {
            let Node {
                value,
                parent,
                children,
            } = node;
            let value = f(NodeId(index), value, &children)?;
            nodes.push(Node {
                value,
                parent,
                children,
            });
        }
        Ok(Arena { nodes })
    }
}
