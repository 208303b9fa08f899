//! Constant folding and algebraic-identity elimination to a fixpoint.
//!
//! Ported from `Block.constant_elimination` in the original implementation:
//! each block is scanned repeatedly until a pass removes nothing. Opcodes
//! `add|sub|mul|div|adda` are folded to a single `Immediate` when both
//! operands are immediates (division truncates toward zero — Rust's native
//! `/` on `i64` already does this, matching spec.md's explicit clause);
//! otherwise a matching left/right identity operand (`0` for `add`/`adda`,
//! `1` for `mul`, `0` for `sub`, `1` for `div` on the right) removes the
//! instruction entirely. Every deletion rewrites references via
//! [`crate::middle::tir::Function::rename_op`], which walks every block
//! reachable from the defining one exactly once.

use crate::middle::tir::{Arg, BlockId, Function, Immediate, Opcode, Operand, Program};

/// Runs constant folding on every block of every function, to a fixpoint,
/// unless disabled (the `--no-ce` flag).
pub fn optimize(program: &mut Program, enabled: bool) {
    if !enabled {
        return;
    }
    for function in &mut program.functions {
        let block_ids: Vec<BlockId> = (0..function.blocks.len() as u32).map(BlockId).collect();
        for id in block_ids {
            fold_block(function, id);
        }
    }
}

enum Fold {
    Constant { index: usize, value: i64 },
    Identity { index: usize, replacement: Operand },
}

fn fold_block(function: &mut Function, id: BlockId) {
    loop {
        let Some(fold) = find_foldable(function.block(id)) else {
            break;
        };
        match fold {
            Fold::Constant { index, value } => {
                let instr = function.block_mut(id).instrs.remove(index);
                let old = Operand::Instr(instr.i);
                let new = Operand::Imm(Immediate::new(value));
                function.rename_op(id, &old, &new);
            }
            Fold::Identity { index, replacement } => {
                let instr = function.block_mut(id).instrs.remove(index);
                let old = Operand::Instr(instr.i);
                function.rename_op(id, &old, &replacement);
            }
        }
    }
}

fn find_foldable(block: &crate::middle::tir::Block) -> Option<Fold> {
    for (index, instr) in block.instrs.iter().enumerate() {
        if instr.is_empty {
            continue;
        }
        if !matches!(
            instr.opcode,
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Adda
        ) {
            continue;
        }
        debug_assert_eq!(instr.args.len(), 2);
        let (Arg::Operand(left), Arg::Operand(right)) = (&instr.args[0], &instr.args[1]) else {
            continue;
        };

        if let (Operand::Imm(l), Operand::Imm(r)) = (left, right) {
            if l.uninit_name.is_some() || r.uninit_name.is_some() {
                continue;
            }
            let value = match instr.opcode {
                Opcode::Add | Opcode::Adda => l.value + r.value,
                Opcode::Sub => l.value - r.value,
                Opcode::Mul => l.value * r.value,
                Opcode::Div => l.value / r.value,
                _ => unreachable!(),
            };
            return Some(Fold::Constant { index, value });
        }

        if matches!(instr.opcode, Opcode::Add | Opcode::Adda) && is_imm(left, 0) {
            return Some(Fold::Identity { index, replacement: right.clone() });
        }
        if matches!(instr.opcode, Opcode::Mul) && is_imm(left, 1) {
            return Some(Fold::Identity { index, replacement: right.clone() });
        }

        if matches!(instr.opcode, Opcode::Add | Opcode::Adda | Opcode::Sub) && is_imm(right, 0) {
            return Some(Fold::Identity { index, replacement: left.clone() });
        }
        if matches!(instr.opcode, Opcode::Mul) && is_imm(right, 1) {
            return Some(Fold::Identity { index, replacement: left.clone() });
        }
        if matches!(instr.opcode, Opcode::Div) && is_imm(right, 1) {
            return Some(Fold::Identity { index, replacement: left.clone() });
        }
    }
    None
}

fn is_imm(op: &Operand, value: i64) -> bool {
    matches!(op, Operand::Imm(imm) if imm.value == value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use internment::Intern;

    fn lit(v: i64) -> Arg {
        Arg::Operand(Operand::Imm(Immediate::new(v)))
    }

    #[test]
    fn folds_constant_arithmetic() {
        let mut f = Function::new(Intern::new("main".to_string()), vec![], false);
        let root = f.alloc_block(1);
        f.entry = root;
        let block = f.block_mut(root);
        block.emit(1, Opcode::Add, vec![lit(1), lit(2)], true, false);
        block.emit(2, Opcode::End, vec![], false, false);
        optimize_single(&mut f, root);
        assert_eq!(f.block(root).instrs.len(), 1);
        assert_eq!(f.block(root).instrs[0].opcode, Opcode::End);
    }

    #[test]
    fn removes_right_identity_add() {
        let mut f = Function::new(Intern::new("main".to_string()), vec![], false);
        let root = f.alloc_block(1);
        f.entry = root;
        let name: Intern<String> = Intern::new("x".to_string());
        {
            let block = f.block_mut(root);
            block.declare_local(name, None).unwrap();
            let (read_op, _) = block.emit(1, Opcode::Read, vec![], false, false);
            block.set_local(name, read_op.clone()).unwrap();
            let (sum_op, _) = block.emit(
                2,
                Opcode::Add,
                vec![Arg::Operand(read_op), lit(0)],
                true,
                false,
            );
            block.set_local(name, sum_op).unwrap();
        }
        optimize_single(&mut f, root);
        assert!(f
            .block(root)
            .instrs
            .iter()
            .all(|i| i.opcode != Opcode::Add));
    }

    #[test]
    fn fixpoint_is_idempotent() {
        let mut f = Function::new(Intern::new("main".to_string()), vec![], false);
        let root = f.alloc_block(1);
        f.entry = root;
        let block = f.block_mut(root);
        block.emit(1, Opcode::Add, vec![lit(1), lit(2)], true, false);
        optimize_single(&mut f, root);
        let before = f.block(root).instrs.len();
        optimize_single(&mut f, root);
        assert_eq!(before, f.block(root).instrs.len());
    }

    fn optimize_single(function: &mut Function, id: BlockId) {
        fold_block(function, id);
    }
}
