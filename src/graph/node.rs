use std::time::SystemTime;

use super::rule::Command;
use crate::error::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Unvisited,
    InProgress,
    UpToDate,
    Rebuilt,
    Failed,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::UpToDate | NodeStatus::Rebuilt | NodeStatus::Failed
        )
    }
}

/// A rule bound to a concrete target, its prerequisites resolved to nodes.
#[derive(Debug, Clone)]
pub struct BoundRule {
    pub prerequisites: Vec<usize>,
    pub order_only: Vec<usize>,
    pub commands: Vec<Command>,
    /// Value of `$*`.
    pub stem: String,
    pub loc: Location,
}

/// A target's state during one build invocation.
#[derive(Debug, Clone)]
pub struct Node {
    pub target: String,
    /// Where the file was found, through VPATH if need be.
    pub path: String,
    pub mtime: Option<SystemTime>,
    pub phony: bool,
    pub double_colon: bool,
    pub rules: Vec<BoundRule>,
    /// Every prerequisite, normal and order-only, without repeats.
    pub dependencies: Vec<usize>,
    pub dependents: Vec<usize>,
    /// The target whose variables this one inherits.
    pub parent: Option<usize>,
    /// Post-order position in the resolution walk; serial builds run nodes
    /// in this order.
    pub order: usize,
    pub state: NodeStatus,
}

impl Node {
    pub fn new(target: String) -> Node {
        Self {
            path: target.clone(),
            target,
            mtime: None,
            phony: false,
            double_colon: false,
            rules: Vec::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            parent: None,
            order: 0,
            state: NodeStatus::Unvisited,
        }
    }

    pub fn has_commands(&self) -> bool {
        self.rules.iter().any(|r| !r.commands.is_empty())
    }
}
