//! Control-flow graphs for the per-function dataflow analysis
//!
//! Basic blocks hold the statements of [`crate::ast::expr`] in execution
//! order and end in a terminator. Every CFG has a distinguished entry
//! block and a distinguished, empty exit block; `Return` terminators flow
//! into the exit block, which is where the fixed point of the analysis is
//! read off.

use std::collections::HashSet;
use std::fmt;

use crate::ast::expr::{Expr, Stmt};
use crate::ast::ids::collections::{IdMap, IdSet};
use crate::ast::ids::BlockId;
use crate::ast::SourceLocation;

/// How control leaves a basic block
#[derive(Debug, Clone)]
pub enum Terminator {
    /// Unconditional jump
    Jump { target: BlockId },
    /// Two-way branch; the condition is evaluated but carries no
    /// pointer flow of its own
    Branch {
        condition: Expr,
        then_target: BlockId,
        else_target: BlockId,
    },
    /// Function return; flows into the exit block
    Return { value: Option<Expr> },
    /// Never reached (also the terminator of the exit block itself)
    Unreachable,
}

/// A maximal straight-line sequence of statements
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub statements: Vec<Stmt>,
    pub terminator: Terminator,
    pub predecessors: IdSet<BlockId>,
    pub loc: SourceLocation,
}

impl BasicBlock {
    pub fn new(id: BlockId, loc: SourceLocation) -> Self {
        Self {
            id,
            statements: Vec::new(),
            predecessors: IdSet::default(),
            terminator: Terminator::Unreachable,
            loc,
        }
    }

    pub fn push(&mut self, statement: Stmt) {
        self.statements.push(statement);
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// A function body as a graph of basic blocks
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub blocks: IdMap<BlockId, BasicBlock>,
    pub entry: BlockId,
    /// Synthetic empty block every `Return` flows into
    pub exit: BlockId,
}

impl ControlFlowGraph {
    /// Create a CFG containing only an entry and the synthetic exit
    pub fn new(entry: BlockId, exit: BlockId, loc: SourceLocation) -> Self {
        let mut blocks = IdMap::default();
        blocks.insert(entry, BasicBlock::new(entry, loc));
        blocks.insert(exit, BasicBlock::new(exit, loc));
        Self {
            blocks,
            entry,
            exit,
        }
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(&id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(&id)
    }

    pub fn add_block(&mut self, block: BasicBlock) -> BlockId {
        let id = block.id;
        self.blocks.insert(id, block);
        id
    }

    /// Successor blocks implied by a block's terminator
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        let Some(block) = self.blocks.get(&id) else {
            return Vec::new();
        };
        match &block.terminator {
            Terminator::Jump { target } => vec![*target],
            Terminator::Branch {
                then_target,
                else_target,
                ..
            } => vec![*then_target, *else_target],
            Terminator::Return { .. } => vec![self.exit],
            Terminator::Unreachable => Vec::new(),
        }
    }

    /// Set a block's terminator, keeping predecessor sets consistent
    pub fn set_terminator(&mut self, id: BlockId, terminator: Terminator) {
        for old_successor in self.successors(id) {
            if let Some(block) = self.blocks.get_mut(&old_successor) {
                block.predecessors.remove(&id);
            }
        }
        if let Some(block) = self.blocks.get_mut(&id) {
            block.terminator = terminator;
        }
        for new_successor in self.successors(id) {
            if let Some(block) = self.blocks.get_mut(&new_successor) {
                block.predecessors.insert(id);
            }
        }
    }

    /// Blocks in reverse post-order from the entry; the worklist
    /// iteration order of the analyzer
    pub fn reverse_post_order(&self) -> Vec<BlockId> {
        let mut visited = HashSet::new();
        let mut post_order = Vec::new();
        // Iterative DFS with an explicit phase marker per frame.
        let mut stack = vec![(self.entry, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                post_order.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            let mut successors = self.successors(id);
            successors.reverse();
            for successor in successors {
                if !visited.contains(&successor) {
                    stack.push((successor, false));
                }
            }
        }
        post_order.reverse();
        post_order
    }

    /// Blocks with no path from the entry
    pub fn unreachable_blocks(&self) -> Vec<BlockId> {
        let reachable: HashSet<_> = self.reverse_post_order().into_iter().collect();
        let mut unreachable: Vec<_> = self
            .blocks
            .keys()
            .filter(|id| !reachable.contains(id))
            .copied()
            .collect();
        unreachable.sort();
        unreachable
    }

    /// Structural consistency check
    pub fn validate(&self) -> Result<(), CfgValidationError> {
        if !self.blocks.contains_key(&self.entry) {
            return Err(CfgValidationError::MissingEntryBlock);
        }
        if !self.blocks.contains_key(&self.exit) {
            return Err(CfgValidationError::MissingExitBlock);
        }
        if let Some(exit) = self.blocks.get(&self.exit) {
            if !exit.statements.is_empty() {
                return Err(CfgValidationError::NonEmptyExitBlock);
            }
        }
        for &id in self.blocks.keys() {
            for successor in self.successors(id) {
                match self.blocks.get(&successor) {
                    None => {
                        return Err(CfgValidationError::InvalidSuccessor {
                            block: id,
                            successor,
                        })
                    }
                    Some(block) if !block.predecessors.contains(&id) => {
                        return Err(CfgValidationError::InconsistentEdge {
                            from: id,
                            to: successor,
                        })
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

/// Errors from [`ControlFlowGraph::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfgValidationError {
    MissingEntryBlock,
    MissingExitBlock,
    NonEmptyExitBlock,
    InvalidSuccessor { block: BlockId, successor: BlockId },
    InconsistentEdge { from: BlockId, to: BlockId },
}

impl fmt::Display for CfgValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfgValidationError::MissingEntryBlock => write!(f, "CFG has no entry block"),
            CfgValidationError::MissingExitBlock => write!(f, "CFG has no exit block"),
            CfgValidationError::NonEmptyExitBlock => {
                write!(f, "CFG exit block must be empty")
            }
            CfgValidationError::InvalidSuccessor { block, successor } => {
                write!(
                    f,
                    "block {} references missing successor {}",
                    block, successor
                )
            }
            CfgValidationError::InconsistentEdge { from, to } => {
                write!(f, "edge {} -> {} not reflected in predecessor set", from, to)
            }
        }
    }
}

impl std::error::Error for CfgValidationError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ids::BlockId;

    fn two_block_cfg() -> ControlFlowGraph {
        let entry = BlockId::from_raw(0);
        let exit = BlockId::from_raw(1);
        let mut cfg = ControlFlowGraph::new(entry, exit, SourceLocation::unknown());
        cfg.set_terminator(entry, Terminator::Return { value: None });
        cfg
    }

    #[test]
    fn return_flows_to_exit() {
        let cfg = two_block_cfg();
        assert_eq!(cfg.successors(cfg.entry), vec![cfg.exit]);
        assert!(cfg
            .block(cfg.exit)
            .unwrap()
            .predecessors
            .contains(&cfg.entry));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn reverse_post_order_starts_at_entry() {
        let entry = BlockId::from_raw(0);
        let exit = BlockId::from_raw(1);
        let middle = BlockId::from_raw(2);
        let mut cfg = ControlFlowGraph::new(entry, exit, SourceLocation::unknown());
        cfg.add_block(BasicBlock::new(middle, SourceLocation::unknown()));
        cfg.set_terminator(entry, Terminator::Jump { target: middle });
        cfg.set_terminator(middle, Terminator::Return { value: None });

        let order = cfg.reverse_post_order();
        assert_eq!(order, vec![entry, middle, exit]);
        assert!(cfg.unreachable_blocks().is_empty());
    }

    #[test]
    fn retargeting_updates_predecessors() {
        let entry = BlockId::from_raw(0);
        let exit = BlockId::from_raw(1);
        let a = BlockId::from_raw(2);
        let b = BlockId::from_raw(3);
        let mut cfg = ControlFlowGraph::new(entry, exit, SourceLocation::unknown());
        cfg.add_block(BasicBlock::new(a, SourceLocation::unknown()));
        cfg.add_block(BasicBlock::new(b, SourceLocation::unknown()));

        cfg.set_terminator(entry, Terminator::Jump { target: a });
        assert!(cfg.block(a).unwrap().predecessors.contains(&entry));

        cfg.set_terminator(entry, Terminator::Jump { target: b });
        assert!(!cfg.block(a).unwrap().predecessors.contains(&entry));
        assert!(cfg.block(b).unwrap().predecessors.contains(&entry));
    }

    #[test]
    fn validate_rejects_dangling_successor() {
        let entry = BlockId::from_raw(0);
        let exit = BlockId::from_raw(1);
        let mut cfg = ControlFlowGraph::new(entry, exit, SourceLocation::unknown());
        // Bypass set_terminator to simulate a malformed graph.
        cfg.block_mut(entry).unwrap().terminator = Terminator::Jump {
            target: BlockId::from_raw(9),
        };
        assert!(matches!(
            cfg.validate(),
            Err(CfgValidationError::InvalidSuccessor { .. })
        ));
    }
}
