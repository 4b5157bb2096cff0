//! Deferred mutations of service results, and the completion of the merged result.

mod nodes;
mod nulls;

use serde::Serialize;

pub use self::nodes::JsonNode;
pub use self::nodes::JsonNodes;
pub(crate) use self::nulls::complete;
pub(crate) use self::nulls::Completion;
use crate::graphql;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;

/// A mutation of a service result, computed once the result is known and applied later.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ResultInstruction {
    Set { path: Path, value: Value },
    Copy { from: Path, to: Path },
    Remove { path: Path },
}

impl ResultInstruction {
    /// The path written by this instruction.
    pub fn target(&self) -> &Path {
        match self {
            ResultInstruction::Set { path, .. } | ResultInstruction::Remove { path } => path,
            ResultInstruction::Copy { to, .. } => to,
        }
    }
}

/// What a transform contributes to a service result.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultInstructions {
    pub instructions: Vec<ResultInstruction>,
    pub errors: Vec<graphql::Error>,
}

impl ResultInstructions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: Path, value: Value) {
        self.instructions.push(ResultInstruction::Set { path, value });
    }

    pub fn copy(&mut self, from: Path, to: Path) {
        self.instructions.push(ResultInstruction::Copy { from, to });
    }

    pub fn remove(&mut self, path: Path) {
        self.instructions.push(ResultInstruction::Remove { path });
    }

    pub fn error(&mut self, error: graphql::Error) {
        self.errors.push(error);
    }

    pub fn extend(&mut self, other: ResultInstructions) {
        self.instructions.extend(other.instructions);
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty() && self.errors.is_empty()
    }
}

/// Applies `instructions` to `data` in list order.
///
/// An instruction writing below a path removed by any instruction of the list is skipped. Two
/// instructions writing the same path resolve to the later one.
pub fn apply(data: &mut Value, instructions: Vec<ResultInstruction>) {
    let removed: Vec<Path> = instructions
        .iter()
        .filter_map(|instruction| match instruction {
            ResultInstruction::Remove { path } => Some(path.clone()),
            _ => None,
        })
        .collect();

    for instruction in instructions {
        if removed
            .iter()
            .any(|removed| removed.is_ancestor_of(instruction.target()))
        {
            tracing::trace!(path = %instruction.target(), "skipping instruction below a removed path");
            continue;
        }
        match instruction {
            ResultInstruction::Set { path, value } => {
                if !data.set_path(&path, value) {
                    tracing::trace!(%path, "no parent to set a value in");
                }
            }
            ResultInstruction::Copy { from, to } => {
                let value = data.get_path(&from).cloned().unwrap_or_default();
                if !data.set_path(&to, value) {
                    tracing::trace!(%from, %to, "no parent to copy a value to");
                }
            }
            ResultInstruction::Remove { path } => {
                data.remove_path(&path);
            }
        }
    }
}
