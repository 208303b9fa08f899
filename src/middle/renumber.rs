//! Renumbering: assigns dense, human-readable instruction and block numbers
//! after folding (spec.md §4.4).
//!
//! Block labels are reassigned to dense `1..=N` in the order produced by
//! sorting the function's reachable blocks by their original label — this
//! half (`DotGraph.fix_block_labels_order` in the original) runs
//! unconditionally, matching `smplIR.py`. Instruction numbers are reassigned
//! in that same block order, skipping `<empty>` placeholders, but only when
//! `renumber_instrs` is set: the original only rebuilds its instruction
//! reorder table (`build_instr_reorder_table`/`instr_reorder`) when
//! `constant_elimination` is on (`smplIR.py:94-108`, wired from `--no-ce` via
//! `main.py`), since the renumbering there exists to give folded/deleted
//! instructions dense successor numbers — with folding off, the raw
//! `instr.i` values (including any non-monotonic gaps left by the two-pass
//! `while` builder's counter rollback) are printed as-is. Unlike the
//! original implementation, which rewrites instruction numbers in place
//! guarded by a `has_reordered` bit (needed because the old and new
//! numbering ranges can overlap), this builds a pure `old -> new` map and
//! leaves every `Instruction` untouched — `back::dot` consults the map at
//! render time, falling back to the raw number when it's absent. See
//! REDESIGN FLAGS §5 in DESIGN.md for why this sidesteps the idempotence
//! hazard without changing the observable renumbering.

use crate::common::Map;
use crate::middle::tir::{BlockId, Function};

pub struct Renumbering {
    /// Original block label -> dense display label, `1..=N`.
    pub block_labels: Map<u32, u32>,
    /// Original instruction number -> dense display number, `1..=M`.
    pub instr_numbers: Map<u32, u32>,
}

impl Renumbering {
    pub fn block_label(&self, orig: u32) -> u32 {
        *self.block_labels.get(&orig).unwrap_or(&orig)
    }

    pub fn instr_number(&self, orig: u32) -> u32 {
        *self.instr_numbers.get(&orig).unwrap_or(&orig)
    }
}

/// Computes the renumbering for `order` (the serializer's DFS-reachable
/// block set for this function, in any order — this function re-sorts by
/// original label per spec.md §4.4). Block labels are always densified;
/// instruction numbers are densified only when `renumber_instrs` is true
/// (the `--no-ce` flag disables it, leaving raw instruction numbers in
/// place — see this module's doc comment).
pub fn renumber(function: &Function, order: &[BlockId], renumber_instrs: bool) -> Renumbering {
    let mut by_label: Vec<(u32, BlockId)> =
        order.iter().map(|&id| (function.block(id).label, id)).collect();
    by_label.sort_unstable_by_key(|(label, _)| *label);

    let mut block_labels = Map::new();
    for (new_label, (orig_label, _)) in by_label.iter().enumerate() {
        block_labels.insert(*orig_label, new_label as u32 + 1);
    }

    let mut instr_numbers = Map::new();
    if renumber_instrs {
        let mut next = 1u32;
        for (_, id) in &by_label {
            for instr in &function.block(*id).instrs {
                if instr.is_empty {
                    continue;
                }
                instr_numbers.insert(instr.i, next);
                next += 1;
            }
        }
    }

    Renumbering { block_labels, instr_numbers }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::tir::Opcode;
    use internment::Intern;

    #[test]
    fn dense_renumbering_skips_empty_blocks() {
        let mut f = Function::new(Intern::new("main".to_string()), vec![], false);
        let b1 = f.alloc_block(1);
        let b2 = f.alloc_block(3);
        f.entry = b1;
        f.block_mut(b1).emit(5, Opcode::End, vec![], false, false);
        f.block_mut(b2).emit(8, Opcode::End, vec![], false, false);

        let order = vec![b2, b1];
        let renumbering = renumber(&f, &order, true);
        assert_eq!(renumbering.block_label(1), 1);
        assert_eq!(renumbering.block_label(3), 2);
        assert_eq!(renumbering.instr_number(5), 1);
        assert_eq!(renumbering.instr_number(8), 2);
    }

    #[test]
    fn block_labels_stay_dense_even_when_instr_renumbering_is_off() {
        let mut f = Function::new(Intern::new("main".to_string()), vec![], false);
        let b1 = f.alloc_block(1);
        let b2 = f.alloc_block(3);
        f.entry = b1;
        f.block_mut(b1).emit(5, Opcode::End, vec![], false, false);
        f.block_mut(b2).emit(8, Opcode::End, vec![], false, false);

        let order = vec![b2, b1];
        let renumbering = renumber(&f, &order, false);
        assert_eq!(renumbering.block_label(1), 1);
        assert_eq!(renumbering.block_label(3), 2);
        // No instr_numbers entries: raw `i` values fall through unchanged.
        assert_eq!(renumbering.instr_number(5), 5);
        assert_eq!(renumbering.instr_number(8), 8);
    }
}
