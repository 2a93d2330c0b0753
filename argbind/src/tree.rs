//! Matched command chain produced by a tokenizer and consumed by the binder.

use std::sync::Arc;

use crate::model::{CommandId, CommandInfo};
use crate::parameter::CommandParameter;

/// A parameter matched on the command line, with its raw value. Flags and
/// options with an omitted value carry `None`.
#[derive(Debug, Clone)]
pub struct MappedParameter {
    pub parameter: Arc<CommandParameter>,
    pub value: Option<String>,
}

/// One matched command level. Levels form a singly linked chain from the
/// root command to the leaf.
#[derive(Debug, Clone)]
pub struct CommandTree {
    pub command: CommandId,
    pub mapped: Vec<MappedParameter>,
    pub unmapped: Vec<Arc<CommandParameter>>,
    pub next: Option<Box<CommandTree>>,
}

impl CommandTree {
    /// A level for `command` with every parameter unmapped.
    pub fn new(command: &CommandInfo) -> Self {
        Self {
            command: command.id(),
            mapped: Vec::new(),
            unmapped: command.parameters().to_vec(),
            next: None,
        }
    }

    /// Records a matched value and removes the parameter from `unmapped`.
    pub fn map(&mut self, parameter: &Arc<CommandParameter>, value: Option<String>) {
        self.unmapped.retain(|p| p.id() != parameter.id());
        self.mapped.push(MappedParameter {
            parameter: Arc::clone(parameter),
            value,
        });
    }

    pub fn with_next(mut self, next: CommandTree) -> Self {
        self.next = Some(Box::new(next));
        self
    }

    /// Levels from this node to the leaf.
    pub fn levels(&self) -> impl Iterator<Item = &CommandTree> + '_ {
        std::iter::successors(Some(self), |t| t.next.as_deref())
    }

    pub fn leaf(&self) -> &CommandTree {
        let mut node = self;
        while let Some(next) = node.next.as_deref() {
            node = next;
        }
        node
    }

    pub fn is_mapped(&self, parameter: &CommandParameter) -> bool {
        self.mapped.iter().any(|m| m.parameter.id() == parameter.id())
    }
}
