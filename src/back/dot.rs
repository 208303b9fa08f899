//! CFG serialization: renders a [`Program`] as a Graphviz `digraph`
//! description (spec.md §4.5/§6.4).
//!
//! Grounded in `smplIR.py`'s `DotGraph`/`Output`: a DFS from each function's
//! entry block discovers the reachable set (padding any zero-instruction
//! block with an `<empty>` placeholder so the renderer never sees a bare
//! record), then blocks are emitted in order of their *original* label,
//! each as a `record`-shaped node with `branch`/`fall-through`/`dom` edges
//! derived from its children. One `subgraph cluster_<id>` is emitted per
//! function, offset so block ids stay unique across the whole graph.
//!
//! Block-label densifying runs unconditionally; instruction-number
//! densifying is gated behind the `renumber_instrs` flag (threaded in from
//! `--no-ce`) exactly as the original couples its instruction reorder table
//! to `constant_elimination` — see [`crate::middle::renumber`]'s doc
//! comment.
//!
//! This crate's node-id scheme differs from the original in one respect:
//! the original keys a block's Graphviz node id off its *original* label
//! plus a running offset while keying the human-readable `BB<n>` text off
//! the dense renumbering — two different numbering schemes for the same
//! block. Here both the node id and the `BB<n>` text use the dense
//! renumbering (offset accumulates over dense per-function block counts),
//! which is simpler and observably equivalent (Graphviz node ids are
//! opaque tokens; only uniqueness and the edges between them matter). See
//! DESIGN.md. The one numbering quirk this crate *does* preserve
//! deliberately is that a branch's baked `(BB<label>)` target text is never
//! rewritten by renumbering — see [`crate::middle::tir::Arg::Target`].

use crate::common::Set;
use crate::middle::renumber::{self, Renumbering};
use crate::middle::tir::{Arg, Block, BlockId, EdgeRole, Function, Instruction, Opcode, Operand, Program};

/// Renders the whole program as one `digraph G { ... }` description.
/// Mutates `program` to pad any zero-instruction block with `<empty>`,
/// matching the original's behavior of doing so at serialization time
/// rather than during lowering.
///
/// `renumber_instrs` mirrors `--no-ce`/`constant_elimination` in the
/// original (`smplIR.py:94-108`): block labels are always densified
/// (`fix_block_labels_order` runs unconditionally there), but instruction
/// numbers are only densified when this is true — with it false, the raw
/// `instr.i` values are printed, including any non-monotonic gaps left by
/// the two-pass `while` builder's counter rollback.
pub fn render(program: &mut Program, renumber_instrs: bool) -> String {
    let mut clusters = Vec::with_capacity(program.functions.len());
    let mut offset = 0u32;
    for (id, function) in program.functions.iter_mut().enumerate() {
        let is_main = id == 0;
        let label = signature(function, is_main);
        let graph_name = if is_main { "main".to_string() } else { function.name.to_string() };
        let (code, block_count) =
            render_function(function, id, offset, &label, &graph_name, renumber_instrs);
        offset += block_count;
        clusters.push(code);
    }
    format!("digraph G {{\n{}\n}}", clusters.join("\n"))
}

fn signature(function: &Function, is_main: bool) -> String {
    if is_main {
        return "main".to_string();
    }
    let params = function
        .params
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    if function.is_void {
        format!("void {} ({params})", function.name)
    } else {
        format!("{} ({params})", function.name)
    }
}

/// DFS from `function.entry` via every child role, visiting each block at
/// most once. Order of the returned ids is unspecified — callers re-sort
/// by original label, per spec.md §4.4.
fn reachable_blocks(function: &Function) -> Vec<BlockId> {
    let mut seen = Set::new();
    let mut stack = vec![function.entry];
    let mut order = Vec::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        order.push(id);
        for children in function.block(id).children.values() {
            for &child in children {
                if !seen.contains(&child) {
                    stack.push(child);
                }
            }
        }
    }
    order
}

fn render_function(
    function: &mut Function,
    id: usize,
    offset: u32,
    graph_label: &str,
    graph_name: &str,
    renumber_instrs: bool,
) -> (String, u32) {
    let mut ids = reachable_blocks(function);
    for &block_id in &ids {
        if function.block(block_id).instrs.is_empty() {
            function.block_mut(block_id).instrs.push(Instruction {
                opcode: Opcode::End,
                args: Vec::new(),
                i: 0,
                is_empty: true,
            });
        }
    }
    ids.sort_unstable_by_key(|&block_id| function.block(block_id).label);

    let renumbering = renumber::renumber(function, &ids, renumber_instrs);

    let mut defines = Vec::with_capacity(ids.len());
    let mut connections = Vec::new();
    let mut uninit_vars: Set<crate::common::Id> = Set::new();

    for &block_id in &ids {
        let block = function.block(block_id);
        let dense = renumbering.block_label(block.label);
        let node = dense + offset;

        for instr in &block.instrs {
            for arg in &instr.args {
                if let Arg::Operand(Operand::Imm(imm)) = arg {
                    if let Some(name) = imm.uninit_name {
                        uninit_vars.insert(name);
                    }
                }
            }
        }

        let links = block_links(block);
        for (role, target) in links {
            let target_node = renumbering.block_label(function.block(target).label) + offset;
            connections.push(format!(
                "\t\tbb{node} -> bb{target_node} [label=\"{role}\"];"
            ));
        }
        for &dominated in &block.dominates {
            let target = renumbering.block_label(function.block(dominated).label) + offset;
            connections.push(format!(
                "\t\tbb{node} -> bb{target} [label=\"dom\", color=\"blue\", style=\"dotted\"];"
            ));
        }

        let instrs = block
            .instrs
            .iter()
            .map(|instr| render_instr(instr, &renumbering))
            .collect::<Vec<_>>()
            .join("|");
        defines.push(format!(
            "\t\tbb{node} [shape=record, label=\"<b>BB{dense}| {{{instrs}}}\"];"
        ));
    }

    for name in &uninit_vars {
        log::warn!("[{graph_name}] Accessing an uninitialized variable '{name}'");
    }

    let code = format!(
        "\tsubgraph cluster_{id} {{\n{}\n{}\n\t\tlabel=\"{graph_label}\"\n\t}}",
        defines.join("\n"),
        connections.join("\n"),
    );
    (code, ids.len() as u32)
}

/// Derives `branch`/`fall-through` edges from a block's children, per the
/// table in spec.md §4.5 (the `then`/`else` and `head`/`body`/`exit` checks
/// are mutually exclusive in practice — a block is never both an `if` and
/// a `while` source). `dom` edges are handled separately by the caller
/// since they come from `dominates`, not `children`.
fn block_links(block: &Block) -> Vec<(&'static str, BlockId)> {
    let mut links = Vec::new();
    if block.children.contains_key(&EdgeRole::Then) || block.children.contains_key(&EdgeRole::Else)
    {
        if let (Some(then), Some(els)) =
            (block.children.get(&EdgeRole::Then), block.children.get(&EdgeRole::Else))
        {
            for &c in then {
                links.push(("fall-through", c));
            }
            for &c in els {
                links.push(("branch", c));
            }
        }
    } else if block.children.contains_key(&EdgeRole::Join) {
        for &c in block.children.get(&EdgeRole::Join).unwrap() {
            links.push(("fall-through", c));
        }
    }

    if block.children.contains_key(&EdgeRole::Head) {
        for &c in block.children.get(&EdgeRole::Head).unwrap() {
            links.push(("fall-through", c));
        }
    } else if block.children.contains_key(&EdgeRole::Body) && block.children.contains_key(&EdgeRole::Exit) {
        for &c in block.children.get(&EdgeRole::Body).unwrap() {
            links.push(("fall-through", c));
        }
        for &c in block.children.get(&EdgeRole::Exit).unwrap() {
            links.push(("branch", c));
        }
    }

    links
}

fn render_arg(arg: &Arg, renumbering: &Renumbering) -> String {
    match arg {
        Arg::Operand(Operand::Instr(n)) => format!("({})", renumbering.instr_number(*n)),
        Arg::Operand(Operand::Imm(imm)) => format!("#{}", imm.value),
        Arg::Operand(Operand::Arg(name)) => format!("@{name}"),
        Arg::Target(label) => format!("(BB{label})"),
        Arg::Name(name) => name.to_string(),
    }
}

fn render_instr(instr: &Instruction, renumbering: &Renumbering) -> String {
    if instr.is_empty {
        return "<empty>".to_string();
    }
    let number = renumbering.instr_number(instr.i);
    let args = instr
        .args
        .iter()
        .map(|a| render_arg(a, renumbering))
        .collect::<Vec<_>>()
        .join(" ");
    if args.is_empty() {
        format!("{number}: {}", instr.opcode)
    } else {
        format!("{number}: {} {args}", instr.opcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::{lower, parse};
    use crate::middle::fold;

    fn render_source(src: &str) -> String {
        let ast = parse::parse(src).expect("parses");
        let mut program = lower::lower(&ast).expect("lowers");
        fold::optimize(&mut program, true);
        render(&mut program, true)
    }

    #[test]
    fn empty_block_gets_a_placeholder() {
        let out = render_source("main var x; { if 1 < 2 then let x <- 1 fi }.");
        assert!(out.contains("<empty>"));
    }

    #[test]
    fn if_join_renders_a_phi_and_both_edge_labels() {
        let out = render_source(
            "main var x; { if 1 < 2 then let x <- 1 else let x <- 2 fi }.",
        );
        assert!(out.contains("phi"));
        assert!(out.contains("\"branch\""));
        assert!(out.contains("\"fall-through\""));
    }

    #[test]
    fn two_functions_get_distinct_non_overlapping_node_ids() {
        let out = render_source(
            "main function f(); { return 1 }; { call f() }.",
        );
        assert_eq!(out.matches("cluster_").count(), 2);
    }

    #[test]
    fn branch_target_survives_renumbering_as_the_original_label() {
        let out = render_source("main var i; { let i <- 0; while i < 10 do let i <- i + 1 od }.");
        assert!(out.contains("bra"));
    }

    #[test]
    fn no_ce_disables_instr_renumbering_but_not_block_labels() {
        let src = "main var i; { let i <- 0; while i < 10 do let i <- i + 1 od }.";

        let ast = parse::parse(src).expect("parses");
        let mut dense_program = lower::lower(&ast).expect("lowers");
        fold::optimize(&mut dense_program, false);
        let dense = render(&mut dense_program, true);

        let ast = parse::parse(src).expect("parses");
        let mut raw_program = lower::lower(&ast).expect("lowers");
        fold::optimize(&mut raw_program, false);
        let raw = render(&mut raw_program, false);

        // Both still densify block labels the same way.
        assert!(dense.contains("BB1") && raw.contains("BB1"));
        assert!(dense.contains("BB2") && raw.contains("BB2"));
        // But the two-pass `while` builder's counter rollback leaves gaps in
        // the raw instruction numbers that only dense renumbering removes,
        // so the two renderings must differ.
        assert_ne!(dense, raw, "disabling renumber_instrs must change the instruction numbering");
    }
}
