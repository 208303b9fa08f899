//! The typed intermediate representation: a per-function control-flow graph
//! of basic blocks holding SSA-form instructions.
//!
//! Grounded directly in the original implementation's `smplSSA.py`
//! (`Instruction`/`InstructionOp`/`ImmediateOp`/`ArgumentOp`) and
//! `smplSSABlock.py` (`Block`, including its `emit` method, which is the
//! on-the-fly CSE and memory-kill-set engine). Blocks live in a per-function
//! arena (`Function::blocks`) addressed by `BlockId` so that `while`
//! back-edges can form cycles without reference-counted cells.

use std::fmt;

use derive_more::Display;

use crate::common::{Id, Map, Set};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

#[derive(Debug)]
pub struct Program {
    pub functions: Vec<Function>,
}

/// One function's CFG. `main` is always `functions[0]`.
#[derive(Debug)]
pub struct Function {
    pub name: Id,
    pub params: Vec<Id>,
    pub is_void: bool,
    pub entry: BlockId,
    pub blocks: Vec<Block>,
}

/// `children`/`dominates` edge-role tags (spec roles `then|else|join|head|body|exit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum EdgeRole {
    Then,
    Else,
    Join,
    Head,
    Body,
    Exit,
}

#[derive(Debug)]
pub struct Block {
    pub label: u32,
    pub instrs: Vec<Instruction>,
    pub children: Map<EdgeRole, Set<BlockId>>,
    pub dominates: Vec<BlockId>,
    /// `None` means declared but never assigned (invariant 2).
    pub locals: Map<Id, Option<Operand>>,
    /// `None` means this name is a scalar, not an array (invariant 5).
    pub strides: Map<Id, Option<Vec<i64>>>,
    pub search_list: Map<Opcode, Vec<Instruction>>,
    pub join_block_killed: Vec<Instruction>,
    pub possibly_killed_load: Vec<Instruction>,
}

#[derive(Display)]
pub enum SemanticError {
    #[display("[ERROR] Attempted to redeclare variable '{_0}'")]
    Redeclared(Id),
    #[display("[ERROR] Accessing an undeclared variable '{_0}'")]
    Undeclared(Id),
}

impl fmt::Debug for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Opcode mnemonics, one variant per row of the enumerated opcode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum Opcode {
    #[display("add")]
    Add,
    #[display("sub")]
    Sub,
    #[display("mul")]
    Mul,
    #[display("div")]
    Div,
    #[display("cmp")]
    Cmp,
    #[display("bra")]
    Bra,
    #[display("beq")]
    Beq,
    #[display("bne")]
    Bne,
    #[display("blt")]
    Blt,
    #[display("bge")]
    Bge,
    #[display("ble")]
    Ble,
    #[display("bgt")]
    Bgt,
    #[display("alloca")]
    Alloca,
    #[display("adda")]
    Adda,
    #[display("load")]
    Load,
    #[display("store")]
    Store,
    #[display("phi")]
    Phi,
    #[display("call")]
    Call,
    #[display("read")]
    Read,
    #[display("write")]
    Write,
    #[display("writeNL")]
    WriteNl,
    #[display("return")]
    Return,
    #[display("end")]
    End,
}

/// A fully emitted instruction, or the `<empty>` placeholder sentinel.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    pub args: Vec<Arg>,
    /// Meaningless when `is_empty`; otherwise a positive, function-local number.
    pub i: u32,
    pub is_empty: bool,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty {
            return write!(f, "<empty>");
        }
        let args = self
            .args
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        if args.is_empty() {
            write!(f, "{}: {}", self.i, self.opcode)
        } else {
            write!(f, "{}: {} {}", self.i, self.opcode, args)
        }
    }
}

/// Instruction payload: either a true operand, a branch target, or a callee
/// name. The latter two carry no CSE/equality semantics (spec.md never
/// assigns any to a branch target or a call name), so they are kept out of
/// [`Operand`] rather than overloading its three-shape sum type.
#[derive(Debug, Clone)]
pub enum Arg {
    Operand(Operand),
    /// The destination block's label **at the moment the branch was
    /// emitted**. Deliberately never rewritten by renumbering — see
    /// DESIGN.md's note on branch-target fidelity.
    Target(u32),
    Name(Id),
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Operand(op) => write!(f, "{op}"),
            Arg::Target(label) => write!(f, "(BB{label})"),
            Arg::Name(name) => write!(f, "{name}"),
        }
    }
}

impl PartialEq for Arg {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Arg::Operand(a), Arg::Operand(b)) => a == b,
            (Arg::Target(a), Arg::Target(b)) => a == b,
            (Arg::Name(a), Arg::Name(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Arg {}

/// The three-shape operand sum type (spec.md §3/§9).
#[derive(Debug, Clone)]
pub enum Operand {
    /// References a producing instruction by its numbering.
    Instr(u32),
    Imm(Immediate),
    /// A formal parameter, identified by name.
    Arg(Id),
}

#[derive(Debug, Clone)]
pub struct Immediate {
    pub value: i64,
    /// Set when this immediate stands in for an uninitialized read; carried
    /// only for the diagnostic warning, ignored by equality.
    pub uninit_name: Option<Id>,
}

impl Immediate {
    pub fn new(value: i64) -> Self {
        Immediate { value, uninit_name: None }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Instr(i) => write!(f, "({i})"),
            Operand::Imm(imm) => write!(f, "#{}", imm.value),
            Operand::Arg(name) => write!(f, "@{name}"),
        }
    }
}

/// Structural equality: instruction refs by numbering, immediates by value
/// (ignoring the diagnostic name), arguments by name. Hand-written rather
/// than derived, matching `InstructionOp`/`ImmediateOp`'s `__eq__` in the
/// original.
impl PartialEq for Operand {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Operand::Instr(a), Operand::Instr(b)) => a == b,
            (Operand::Imm(a), Operand::Imm(b)) => a.value == b.value,
            (Operand::Arg(a), Operand::Arg(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Operand {}

impl Program {
    pub fn new() -> Self {
        Program { functions: Vec::new() }
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Function {
    pub fn new(name: Id, params: Vec<Id>, is_void: bool) -> Self {
        Function { name, params, is_void, entry: BlockId(0), blocks: Vec::new() }
    }

    /// Allocates a fresh block in this function's arena and returns its id.
    pub fn alloc_block(&mut self, label: u32) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(label));
        id
    }

    /// Allocates a same-context child, shallow-copying the parent's
    /// `locals`/`strides`/`search_list` (spec.md §9).
    pub fn alloc_same_context_block(&mut self, parent: BlockId, label: u32) -> BlockId {
        let child = self.block(parent).same_context_child(label);
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(child);
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    /// Rewrites every occurrence of `old` to `new` across the CFG reachable
    /// from `at`, following every child role, visiting each block at most
    /// once. Used both by folding (spec.md §4.3) and by CSE dedup returns.
    pub fn rename_op(&mut self, at: BlockId, old: &Operand, new: &Operand) {
        let mut visited = Set::new();
        self.rename_op_visit(at, old, new, &mut visited);
    }

    fn rename_op_visit(
        &mut self,
        id: BlockId,
        old: &Operand,
        new: &Operand,
        visited: &mut Set<BlockId>,
    ) {
        if visited.contains(&id) {
            return;
        }
        visited.insert(id);

        for instr in &mut self.block_mut(id).instrs {
            for arg in &mut instr.args {
                if let Arg::Operand(op) = arg {
                    if op == old {
                        *arg = Arg::Operand(new.clone());
                    }
                }
            }
        }

        let children: Vec<BlockId> = self
            .block(id)
            .children
            .values()
            .flat_map(|set| set.iter().copied())
            .collect();
        for child in children {
            self.rename_op_visit(child, old, new, visited);
        }
    }
}

impl Block {
    pub fn new(label: u32) -> Self {
        Block {
            label,
            instrs: Vec::new(),
            children: Map::new(),
            dominates: Vec::new(),
            locals: Map::new(),
            strides: Map::new(),
            search_list: Map::new(),
            join_block_killed: Vec::new(),
            possibly_killed_load: Vec::new(),
        }
    }

    fn same_context_child(&self, label: u32) -> Self {
        Block {
            label,
            instrs: Vec::new(),
            children: Map::new(),
            dominates: Vec::new(),
            locals: self.locals.clone(),
            strides: self.strides.clone(),
            search_list: self.search_list.clone(),
            join_block_killed: Vec::new(),
            possibly_killed_load: Vec::new(),
        }
    }

    pub fn add_child(&mut self, role: EdgeRole, child: BlockId) {
        self.children.entry(role).or_default().insert(child);
    }

    pub fn declare_local(
        &mut self,
        name: Id,
        strides: Option<Vec<i64>>,
    ) -> Result<(), SemanticError> {
        if self.locals.contains_key(&name) {
            return Err(SemanticError::Redeclared(name));
        }
        self.locals.insert(name, None);
        self.strides.insert(name, strides);
        Ok(())
    }

    /// Reads a variable's current SSA value and, if it is an array, its
    /// strides. An uninitialized read yields a diagnostic-tagged `#0`
    /// (spec.md §4.1/§7), not an error.
    pub fn local(&self, name: Id) -> Result<(Operand, Option<Vec<i64>>), SemanticError> {
        let val = self
            .locals
            .get(&name)
            .ok_or(SemanticError::Undeclared(name))?;
        let strides = self.strides.get(&name).cloned().flatten();
        match val {
            Some(op) => Ok((op.clone(), strides)),
            None => Ok((
                Operand::Imm(Immediate { value: 0, uninit_name: Some(name) }),
                strides,
            )),
        }
    }

    pub fn set_local(&mut self, name: Id, val: Operand) -> Result<(), SemanticError> {
        if !self.locals.contains_key(&name) {
            return Err(SemanticError::Undeclared(name));
        }
        self.locals.insert(name, Some(val));
        Ok(())
    }

    /// Emits an instruction with on-the-fly CSE and memory kill-set
    /// tracking (spec.md §4.2). Returns the operand referencing the result
    /// and the instruction-counter delta the caller should apply (0 for a
    /// plain emit, -1 for a CSE hit or an `<empty>` placeholder, -2 when an
    /// `adda`/`load` pair collapses). Ported line-for-line from
    /// `Block.emit` in the original implementation.
    pub fn emit(
        &mut self,
        instr_index: u32,
        opcode: Opcode,
        args: Vec<Arg>,
        check_dup: bool,
        is_empty: bool,
    ) -> (Operand, i32) {
        let mut instr_change: i32 = 0;

        if self.instrs.len() == 1 && self.instrs[0].is_empty {
            self.instrs.remove(0);
        }

        let search_key = if opcode == Opcode::Adda { Opcode::Load } else { opcode };
        let mut instr = Instruction { opcode, args, i: 0, is_empty: false };

        if !is_empty {
            if check_dup {
                let dom_list = self.search_list.get(&search_key).cloned().unwrap_or_default();
                if let Some(identical) = dom_list.iter().find(|c| c.args == instr.args) {
                    return (Operand::Instr(identical.i), instr_change - 1);
                }

                if opcode == Opcode::Load {
                    if let Some(last) = self.instrs.last().cloned() {
                        let loads_last_adda = last.opcode == Opcode::Adda
                            && matches!(
                                instr.args.first(),
                                Some(Arg::Operand(Operand::Instr(n))) if *n == last.i
                            );
                        if loads_last_adda {
                            let adda_before_load = last;
                            let orig_args = instr.args.clone();
                            let mut start_check_dup = true;
                            if self
                                .possibly_killed_load
                                .iter()
                                .any(|k| k.args == adda_before_load.args)
                            {
                                start_check_dup = false;
                                self.search_list.insert(
                                    Opcode::Load,
                                    vec![adda_before_load.clone(), instr.clone()],
                                );
                                self.possibly_killed_load.clear();
                            }
                            if start_check_dup {
                                if let Some(prev_adda) =
                                    dom_list.iter().find(|c| c.args == adda_before_load.args)
                                {
                                    instr.args = vec![Arg::Operand(Operand::Instr(prev_adda.i))];
                                    if let Some(identical) =
                                        dom_list.iter().find(|c| c.args == instr.args)
                                    {
                                        self.instrs.pop();
                                        return (Operand::Instr(identical.i), instr_change - 2);
                                    } else {
                                        instr.args = orig_args;
                                    }
                                }
                            }
                        }
                    }
                }
            }

            instr.i = instr_index;

            let store_after_adda = opcode == Opcode::Store
                && matches!(self.instrs.last(), Some(last) if last.opcode == Opcode::Adda);

            if store_after_adda {
                let last = self.instrs.last().unwrap().clone();
                self.join_block_killed.push(last);
                self.search_list.insert(Opcode::Load, Vec::new());
            } else if opcode == Opcode::Adda {
                self.search_list.entry(Opcode::Load).or_default().push(instr.clone());
            } else {
                self.search_list.entry(opcode).or_default().push(instr.clone());
            }
        } else {
            instr.is_empty = true;
            instr_change -= 1;
        }

        self.instrs.push(instr.clone());
        (Operand::Instr(instr.i), instr_change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use internment::Intern;

    fn imm(v: i64) -> Arg {
        Arg::Operand(Operand::Imm(Immediate::new(v)))
    }

    /// Property 2 (CSE idempotence): emitting the same arithmetic op twice
    /// back to back yields a single instruction and the same operand both
    /// times.
    #[test]
    fn repeated_add_is_deduped_to_one_instruction() {
        let mut block = Block::new(1);
        let (a, _) = block.emit(1, Opcode::Add, vec![imm(1), imm(2)], true, false);
        let (b, _) = block.emit(2, Opcode::Add, vec![imm(1), imm(2)], true, false);
        assert_eq!(a, b);
        assert_eq!(block.instrs.iter().filter(|i| i.opcode == Opcode::Add).count(), 1);
    }

    /// Property 4 (kill correctness): a `store` through an `adda` clears the
    /// block's load search list, so a later `load` through a matching `adda`
    /// re-materializes a fresh `adda`/`load` pair instead of reusing the one
    /// from before the store.
    #[test]
    fn store_forces_a_fresh_load_after_it() {
        let base = internment::Intern::new("a".to_string());
        let mut block = Block::new(1);
        block.declare_local(base, Some(vec![1])).unwrap();
        let base_op = Operand::Imm(Immediate::new(100));
        block.set_local(base, base_op.clone()).unwrap();

        let (adda1, _) =
            block.emit(1, Opcode::Adda, vec![imm(4), Arg::Operand(base_op.clone())], false, false);
        let (load1, _) = block.emit(2, Opcode::Load, vec![Arg::Operand(adda1)], true, false);

        let (adda2, _) =
            block.emit(3, Opcode::Adda, vec![imm(4), Arg::Operand(base_op.clone())], false, false);
        block.emit(4, Opcode::Store, vec![imm(9), Arg::Operand(adda2)], false, false);

        let (adda3, _) =
            block.emit(5, Opcode::Adda, vec![imm(4), Arg::Operand(base_op)], false, false);
        let (load2, _) = block.emit(6, Opcode::Load, vec![Arg::Operand(adda3)], true, false);

        assert_ne!(load1, load2, "load after a store must not reuse the pre-store value");
        let load_count = block.instrs.iter().filter(|i| i.opcode == Opcode::Load).count();
        assert_eq!(load_count, 2, "both the original and post-store load must be materialized");
    }

    /// Same-context children shallow-clone `locals`/`strides`/`search_list`;
    /// mutating the child must never retroactively change the parent.
    #[test]
    fn same_context_child_does_not_alias_parent_locals() {
        let mut function = Function::new(Intern::new("main".to_string()), vec![], false);
        let parent = function.alloc_block(1);
        let x = internment::Intern::new("x".to_string());
        function.block_mut(parent).declare_local(x, None).unwrap();
        function.block_mut(parent).set_local(x, Operand::Imm(Immediate::new(1))).unwrap();

        let child = function.alloc_same_context_block(parent, 2);
        function.block_mut(child).set_local(x, Operand::Imm(Immediate::new(2))).unwrap();

        let (parent_val, _) = function.block(parent).local(x).unwrap();
        assert_eq!(parent_val, Operand::Imm(Immediate::new(1)));
    }
}
