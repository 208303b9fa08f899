//! Lowers an [`ast::Program`] into SSA form (a [`tir::Program`]).
//!
//! Grounded in `smplAST.py`'s `.compile(SSAGraph)` methods and
//! `smplSSAGraph.py`'s `SubGraph`, but reshaped into free functions over a
//! [`Builder`] rather than one `compile` method per AST node — the AST here
//! carries no `middle` dependency (see `front::ast`'s module docs), so the
//! walk has to live on this side of the boundary.
//!
//! The two-pass `while` lowering and the three-block `if` lowering are the
//! trickiest parts of this module; both are ported instruction-counter
//! bookkeeping and all, since the counter's exact highs and lows are what
//! keep operand references pointing at the right instructions once blocks
//! stop being emitted in program order. See DESIGN.md for the walkthrough.

use crate::common::{Error, Id, INTEGER_SIZE};
use crate::front::ast;
use crate::middle::tir::{self, Arg, BlockId, Function, Immediate, Opcode, Operand, Program};

/// Lowers a whole program. `main`'s [`Function`] is always `functions[0]`,
/// followed by user-declared functions in source order (matching the order
/// `Computation.compile` appends to `GlobalGraph.graphs`).
pub fn lower(program: &ast::Program) -> Result<Program, Error> {
    let mut functions = Vec::with_capacity(program.func_decls.len());
    for fdecl in &program.func_decls {
        functions.push(lower_func_decl(fdecl)?);
    }

    let mut main = Builder::new(internment::Intern::new("main".to_string()), Vec::new(), false)?;
    for vdecl in &program.var_decls {
        main.declare_var(vdecl)?;
    }
    for stmt in &program.stats {
        main.lower_stmt(stmt)?;
    }
    main.emit(Opcode::End, Vec::new(), false, false);

    let mut all = Vec::with_capacity(functions.len() + 1);
    all.push(main.finish());
    all.append(&mut functions);
    Ok(Program { functions: all })
}

fn lower_func_decl(fdecl: &ast::FuncDecl) -> Result<Function, Error> {
    let mut builder = Builder::new(fdecl.name, fdecl.params.clone(), fdecl.is_void)?;
    for vdecl in &fdecl.var_decls {
        builder.declare_var(vdecl)?;
    }
    for stmt in &fdecl.stats {
        builder.lower_stmt(stmt)?;
    }
    Ok(builder.finish())
}

/// One function's in-progress lowering state: the `Function` arena being
/// filled in, the block currently being emitted into, and the two counters
/// (`block_counter`/`instr_counter`) that `smplSSAGraph.SubGraph` keeps
/// alongside it.
struct Builder {
    function: Function,
    current: BlockId,
    block_counter: u32,
    instr_counter: u32,
}

impl Builder {
    fn new(name: Id, params: Vec<Id>, is_void: bool) -> Result<Self, Error> {
        let mut function = Function::new(name, params.clone(), is_void);
        let root = function.alloc_block(1);
        function.entry = root;
        for param in &params {
            function.block_mut(root).declare_local(*param, None)?;
            function.block_mut(root).set_local(*param, Operand::Arg(*param))?;
        }
        Ok(Builder { function, current: root, block_counter: 1, instr_counter: 1 })
    }

    fn finish(self) -> Function {
        self.function
    }

    fn set_current(&mut self, id: BlockId) {
        self.current = id;
    }

    fn label_of(&self, id: BlockId) -> u32 {
        self.function.block(id).label
    }

    /// A fresh same-context child of `self.current`, counted toward the
    /// function's dense block numbering.
    fn new_same_context_block(&mut self) -> BlockId {
        self.block_counter += 1;
        self.function.alloc_same_context_block(self.current, self.block_counter)
    }

    /// A same-context child that reuses the current block-counter value
    /// instead of advancing it — for the `while` speculative body pass,
    /// which is thrown away and must not consume a real block label.
    fn new_speculative_block(&mut self) -> BlockId {
        self.function.alloc_same_context_block(self.current, self.block_counter)
    }

    /// Mirrors `SubGraph.emit`: wraps `Block::emit` and advances the
    /// instruction counter by `1 + delta`, where `delta` accounts for CSE
    /// hits and `<empty>` placeholders contributing nothing to the count.
    fn emit(&mut self, opcode: Opcode, args: Vec<Arg>, check_dup: bool, is_empty: bool) -> Operand {
        let index = self.instr_counter;
        let (operand, delta) =
            self.function.block_mut(self.current).emit(index, opcode, args, check_dup, is_empty);
        self.instr_counter = (self.instr_counter as i64 + 1 + delta as i64) as u32;
        operand
    }

    fn emit_empty(&mut self) {
        self.emit(Opcode::End, Vec::new(), false, true);
    }

    fn declare_var(&mut self, vdecl: &ast::VarDecl) -> Result<(), Error> {
        if vdecl.is_array() {
            let strides: Vec<i64> = (0..vdecl.dims.len())
                .map(|i| vdecl.dims[i + 1..].iter().product())
                .collect();
            self.function.block_mut(self.current).declare_local(vdecl.name, Some(strides))?;
            let size: i64 = vdecl.dims.iter().product();
            let base = self.emit(
                Opcode::Alloca,
                vec![Arg::Operand(Operand::Imm(Immediate::new(size * INTEGER_SIZE)))],
                false,
                false,
            );
            self.function.block_mut(self.current).set_local(vdecl.name, base)?;
        } else {
            self.function.block_mut(self.current).declare_local(vdecl.name, None)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &ast::Stmt) -> Result<(), Error> {
        match stmt {
            ast::Stmt::Assign { name, value } => {
                let val = self.lower_expr(value)?;
                self.function.block_mut(self.current).set_local(*name, val)?;
            }
            ast::Stmt::ArrayAssign { name, indices, value } => {
                let val = self.lower_expr(value)?;
                let addr = self.lower_array_addr(*name, indices)?;
                self.emit(Opcode::Store, vec![Arg::Operand(val), Arg::Operand(addr)], false, false);
            }
            ast::Stmt::Call(call) => {
                self.lower_call(call)?;
            }
            ast::Stmt::If { relation, then_branch, else_branch } => {
                self.lower_if(relation, then_branch, else_branch)?;
            }
            ast::Stmt::While { relation, body } => {
                self.lower_while(relation, body)?;
            }
            ast::Stmt::Return(value) => match value {
                Some(expr) => {
                    let val = self.lower_expr(expr)?;
                    self.emit(Opcode::Return, vec![Arg::Operand(val)], false, false);
                }
                None => {
                    self.emit(Opcode::Return, Vec::new(), false, false);
                }
            },
        }
        Ok(())
    }

    fn lower_expr(&mut self, expr: &ast::Expr) -> Result<Operand, Error> {
        match expr {
            ast::Expr::Var(name) => {
                let (val, _) = self.function.block(self.current).local(*name)?;
                Ok(val)
            }
            ast::Expr::ArrayRead { name, indices } => {
                let addr = self.lower_array_addr(*name, indices)?;
                Ok(self.emit(Opcode::Load, vec![Arg::Operand(addr)], true, false))
            }
            ast::Expr::Const(value) => Ok(Operand::Imm(Immediate::new(*value))),
            ast::Expr::BinOp { op, lhs, rhs } => {
                let left = self.lower_expr(lhs)?;
                let right = self.lower_expr(rhs)?;
                let opcode = arith_opcode(*op);
                Ok(self.emit(
                    opcode,
                    vec![Arg::Operand(left), Arg::Operand(right)],
                    true,
                    false,
                ))
            }
            ast::Expr::Call(call) => self.lower_call(call),
        }
    }

    /// The array-indexing address computation shared by reads, writes, and
    /// `ArrayAssign`: `adda base (sum(index_i * stride_i) * INTEGER_SIZE)`,
    /// built up with CSE enabled on every arithmetic step and disabled on
    /// the final `adda` (ported from `Array.compile_addr`).
    fn lower_array_addr(&mut self, name: Id, indices: &[ast::Expr]) -> Result<Operand, Error> {
        let (base, strides) = self.function.block(self.current).local(name)?;
        let strides = strides.unwrap_or_default();

        let mut offset = Operand::Imm(Immediate::new(0));
        for (i, index_expr) in indices.iter().enumerate() {
            let index = self.lower_expr(index_expr)?;
            let stride = strides.get(i).copied().unwrap_or(1);
            let scaled = self.emit(
                Opcode::Mul,
                vec![Arg::Operand(index), Arg::Operand(Operand::Imm(Immediate::new(stride)))],
                true,
                false,
            );
            offset = self.emit(
                Opcode::Add,
                vec![Arg::Operand(offset), Arg::Operand(scaled)],
                true,
                false,
            );
        }
        let byte_offset = self.emit(
            Opcode::Mul,
            vec![Arg::Operand(offset), Arg::Operand(Operand::Imm(Immediate::new(INTEGER_SIZE)))],
            true,
            false,
        );
        Ok(self.emit(
            Opcode::Adda,
            vec![Arg::Operand(byte_offset), Arg::Operand(base)],
            false,
            false,
        ))
    }

    fn lower_call(&mut self, call: &ast::FuncCall) -> Result<Operand, Error> {
        let mut params = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            params.push(Arg::Operand(self.lower_expr(arg)?));
        }
        if let Some(opcode) = builtin_opcode(call.name) {
            Ok(self.emit(opcode, params, false, false))
        } else {
            let mut args = Vec::with_capacity(params.len() + 1);
            args.push(Arg::Name(call.name));
            args.extend(params);
            Ok(self.emit(Opcode::Call, args, false, false))
        }
    }

    fn lower_relation_value(&mut self, relation: &ast::Relation) -> Result<Operand, Error> {
        let left = self.lower_expr(&relation.lhs)?;
        let right = self.lower_expr(&relation.rhs)?;
        Ok(self.emit(Opcode::Cmp, vec![Arg::Operand(left), Arg::Operand(right)], true, false))
    }

    /// Emits the *inverse* of `relation`'s comparison, branching to
    /// `target_label` when the relation is false (so the fall-through path
    /// is the one where the relation holds).
    fn lower_conditional_jump(
        &mut self,
        relation: &ast::Relation,
        target_label: u32,
    ) -> Result<(), Error> {
        let cond = self.lower_relation_value(relation)?;
        let opcode = inverse_branch_opcode(relation.op);
        self.emit(opcode, vec![Arg::Operand(cond), Arg::Target(target_label)], false, false);
        Ok(())
    }

    /// The three-block `if`: `then`/`else`/`join`, all same-context
    /// children of the block the `if` was reached in. Ported from
    /// `IfStatement.compile`.
    fn lower_if(
        &mut self,
        relation: &ast::Relation,
        then_branch: &[ast::Stmt],
        else_branch: &[ast::Stmt],
    ) -> Result<(), Error> {
        let then_block = self.new_same_context_block();
        let else_block = self.new_same_context_block();
        let join_block = self.new_same_context_block();
        let join_label = self.label_of(join_block);
        let else_label = self.label_of(else_block);

        self.function.block_mut(self.current).add_child(tir::EdgeRole::Then, then_block);
        self.function.block_mut(self.current).add_child(tir::EdgeRole::Else, else_block);
        self.function.block_mut(self.current).dominates.extend([then_block, else_block, join_block]);
        self.lower_conditional_jump(relation, else_label)?;

        self.set_current(then_block);
        for stmt in then_branch {
            self.lower_stmt(stmt)?;
        }
        if self.function.block(then_block).instrs.is_empty() {
            self.emit_empty();
        }
        self.emit(Opcode::Bra, vec![Arg::Target(join_label)], false, false);
        self.function.block_mut(self.current).add_child(tir::EdgeRole::Join, join_block);
        let then_killed = self.function.block(self.current).join_block_killed.clone();
        let then_tail = self.current;

        self.set_current(else_block);
        for stmt in else_branch {
            self.lower_stmt(stmt)?;
        }
        if self.function.block(else_block).instrs.is_empty() {
            self.emit_empty();
        }
        self.function.block_mut(self.current).add_child(tir::EdgeRole::Join, join_block);
        let else_killed = self.function.block(self.current).join_block_killed.clone();
        let else_tail = self.current;

        self.set_current(join_block);
        let mut possibly_killed = then_killed;
        possibly_killed.extend(else_killed);
        self.function.block_mut(join_block).possibly_killed_load = possibly_killed;

        let names: Vec<Id> = self.function.block(join_block).locals.keys().copied().collect();
        for name in names {
            let (val_a, _) = self.function.block(then_tail).local(name)?;
            let (val_b, _) = self.function.block(else_tail).local(name)?;
            if val_a == val_b {
                continue;
            }
            let phi = self.emit(Opcode::Phi, vec![Arg::Operand(val_a), Arg::Operand(val_b)], false, false);
            self.function.block_mut(join_block).set_local(name, phi)?;
        }
        Ok(())
    }

    /// The two-pass `while`: a speculative, uncounted pass over the body
    /// discovers which locals it rewrites, so the head block can carry a
    /// phi for each before the body is lowered for real against the
    /// phi-bound values. Ported from `WhileStatement.compile`; see
    /// DESIGN.md for why the instruction counter is rolled back and then
    /// fast-forwarded rather than simply left alone.
    fn lower_while(&mut self, relation: &ast::Relation, body: &[ast::Stmt]) -> Result<(), Error> {
        let head = self.new_same_context_block();
        self.function.block_mut(self.current).dominates.push(head);
        self.function.block_mut(self.current).add_child(tir::EdgeRole::Head, head);

        let saved_counter = self.instr_counter;
        let tmp_body = self.new_speculative_block();
        self.set_current(tmp_body);
        for stmt in body {
            self.lower_stmt(stmt)?;
        }
        let tmp_body_tail = self.current;

        self.set_current(head);
        let names: Vec<Id> = self.function.block(head).locals.keys().copied().collect();
        for name in names {
            let (val_a, _) = self.function.block(head).local(name)?;
            let (val_b, _) = self.function.block(tmp_body_tail).local(name)?;
            if val_a == val_b {
                continue;
            }
            let phi = self.emit(Opcode::Phi, vec![Arg::Operand(val_a), Arg::Operand(val_b)], false, false);
            self.function.block_mut(head).set_local(name, phi)?;
        }

        let exit_block = self.new_same_context_block();
        let exit_label = self.label_of(exit_block);
        self.lower_conditional_jump(relation, exit_label)?;

        let post_head_counter = self.instr_counter;
        let body_block = self.new_same_context_block();
        self.instr_counter = saved_counter;
        self.set_current(body_block);
        for stmt in body {
            self.lower_stmt(stmt)?;
        }
        let body_killed = self.function.block(self.current).join_block_killed.clone();
        self.instr_counter = post_head_counter;
        let head_label = self.label_of(head);
        self.emit(Opcode::Bra, vec![Arg::Target(head_label)], false, false);
        let body_tail = self.current;

        self.function.block_mut(head).add_child(tir::EdgeRole::Body, body_block);
        self.function.block_mut(body_tail).add_child(tir::EdgeRole::Head, head);
        self.function.block_mut(head).add_child(tir::EdgeRole::Exit, exit_block);
        self.function.block_mut(head).dominates.push(body_block);
        self.function.block_mut(head).dominates.push(exit_block);

        self.set_current(exit_block);
        self.function.block_mut(exit_block).possibly_killed_load = body_killed;
        if self.function.block(body_block).instrs.is_empty() {
            self.emit_empty();
        }
        Ok(())
    }
}

fn arith_opcode(op: ast::ArithOp) -> Opcode {
    match op {
        ast::ArithOp::Add => Opcode::Add,
        ast::ArithOp::Sub => Opcode::Sub,
        ast::ArithOp::Mul => Opcode::Mul,
        ast::ArithOp::Div => Opcode::Div,
    }
}

/// The branch that fires when `op` does *not* hold, for the fall-through-on
/// condition-true shape every conditional jump in this language uses.
fn inverse_branch_opcode(op: ast::RelOp) -> Opcode {
    match op {
        ast::RelOp::Eq => Opcode::Bne,
        ast::RelOp::Ne => Opcode::Beq,
        ast::RelOp::Lt => Opcode::Bge,
        ast::RelOp::Le => Opcode::Bgt,
        ast::RelOp::Gt => Opcode::Ble,
        ast::RelOp::Ge => Opcode::Blt,
    }
}

/// Both casings of each built-in name are recognized, matching the
/// original's `config.BUILTIN_FUNCS` table exactly rather than folding case
/// generically.
fn builtin_opcode(name: Id) -> Option<Opcode> {
    match name.as_str() {
        "InputNum" | "inputNum" => Some(Opcode::Read),
        "OutputNum" | "outputNum" => Some(Opcode::Write),
        "OutputNewLine" | "outputNewLine" => Some(Opcode::WriteNl),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::parse;

    fn lower_source(src: &str) -> Program {
        let ast = parse::parse(src).expect("parses");
        lower(&ast).expect("lowers")
    }

    #[test]
    fn assigns_fold_constant_arithmetic_into_one_instruction() {
        let program = lower_source("main var x; { let x <- 1 + 2 }.");
        let main = &program.functions[0];
        let root = main.block(main.entry);
        assert!(root.instrs.iter().any(|i| i.opcode == Opcode::Add));
    }

    #[test]
    fn repeated_array_index_expression_is_cse_deduped() {
        let program =
            lower_source("main array a[10]; var i; var x; var y; { let x <- a[i]; let y <- a[i] }.");
        let main = &program.functions[0];
        let root = main.block(main.entry);
        let load_count = root.instrs.iter().filter(|i| i.opcode == Opcode::Load).count();
        assert_eq!(load_count, 1);
    }

    #[test]
    fn if_without_else_still_creates_a_join_phi() {
        let program = lower_source("main var x; { let x <- 1; if x > 0 then let x <- 2 fi }.");
        let main = &program.functions[0];
        let has_phi = main.blocks.iter().any(|b| b.instrs.iter().any(|i| i.opcode == Opcode::Phi));
        assert!(has_phi);
    }

    #[test]
    fn while_loop_carries_a_head_phi_for_the_mutated_variable() {
        let program =
            lower_source("main var i; { let i <- 0; while i < 10 do let i <- i + 1 od }.");
        let main = &program.functions[0];
        let has_phi = main.blocks.iter().any(|b| b.instrs.iter().any(|i| i.opcode == Opcode::Phi));
        assert!(has_phi);
    }

    /// Collects blocks reachable from `function.entry` via any child role —
    /// the `while` builder's discarded speculative-body block (spec.md §9)
    /// is deliberately left orphaned in the arena and must be excluded here,
    /// exactly as `back::dot`'s own DFS excludes it from renumbering.
    fn reachable(function: &Function) -> Vec<BlockId> {
        let mut seen = std::collections::BTreeSet::new();
        let mut stack = vec![function.entry];
        let mut order = Vec::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            for children in function.block(id).children.values() {
                stack.extend(children.iter().copied());
            }
        }
        order
    }

    /// Property 1 (SSA uniqueness): every non-`<empty>` instruction reachable
    /// in a function has a unique `i`, and every instruction-reference
    /// operand points at an `i` that actually exists in the function.
    #[test]
    fn every_instruction_number_is_unique_and_every_reference_resolves() {
        let program = lower_source(
            "main array[3] a; var i,j,s; { \
             let s <- 0; \
             let i <- 0; \
             while i < 3 do let s <- s + a[i]; let i <- i + 1 od; \
             if s > 0 then let j <- 1 else let j <- 2 fi \
             }.",
        );
        for function in &program.functions {
            let blocks = reachable(function);
            let mut seen = std::collections::BTreeSet::new();
            let mut numbers = std::collections::BTreeSet::new();
            for &id in &blocks {
                for instr in &function.block(id).instrs {
                    if instr.is_empty {
                        continue;
                    }
                    assert!(seen.insert(instr.i), "duplicate instruction number {}", instr.i);
                    numbers.insert(instr.i);
                }
            }
            for &id in &blocks {
                for instr in &function.block(id).instrs {
                    for arg in &instr.args {
                        if let Arg::Operand(Operand::Instr(n)) = arg {
                            assert!(
                                numbers.contains(n),
                                "reference to non-existent instruction {n}"
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn function_call_lowers_without_an_implicit_end() {
        let ast = parse::parse(
            "main function f(); var y; { let y <- 1; return y }; { call f() }.",
        )
        .expect("parses");
        let program = lower(&ast).expect("lowers");
        assert_eq!(program.functions.len(), 2);
        let f = &program.functions[1];
        let has_end = f.blocks.iter().any(|b| b.instrs.iter().any(|i| i.opcode == Opcode::End));
        assert!(!has_end);
    }
}
