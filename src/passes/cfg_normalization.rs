//! CFG normalization: split every edge from a multi-successor predecessor
//! into a multi-predecessor block, so that no block has both several
//! predecessors and a branching predecessor. The stack-layout scheduler
//! downstream requires this shape.
//!
//! The synthetic block is named `{pred}_split_{target}` — the naming is
//! observable in tests and in the data segment, which is patched when a
//! referenced block is split. Phi operands referencing the predecessor are
//! rerouted through the split block, with a forwarding assignment when the
//! incoming value is itself a phi of the predecessor (or defined above
//! it).

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::{CompilerPanic, PanicResult};
use crate::fx::FxHashMap;
use crate::ir::{Block, Context, Function, Label, Opcode, Operand, Var};

pub fn run(func: &mut Function, cache: &mut AnalysesCache, ctx: &mut Context) -> PanicResult {
    let bound = 2 * func.num_basic_blocks();
    for _ in 0..=bound {
        if run_once(func, cache, ctx)? == 0 {
            return Ok(());
        }
    }
    Err(CompilerPanic::new("normalization pass did not converge"))
}

fn run_once(func: &mut Function, cache: &mut AnalysesCache, ctx: &mut Context) -> PanicResult<usize> {
    let mut changes = 0;
    let splits: Vec<(Block, Block)> = {
        let cfg = cache.request_cfg(func)?;
        let mut splits = Vec::new();
        for block in func.basic_blocks() {
            if cfg.cfg_in(block).len() <= 1 {
                continue;
            }
            // Split the first branching predecessor; the outer loop
            // re-runs until none remain.
            for &pred in cfg.cfg_in(block) {
                if cfg.cfg_out(pred).len() > 1 {
                    splits.push((block, pred));
                    break;
                }
            }
        }
        splits
    };

    for (block, pred) in splits {
        insert_split_block(func, ctx, block, pred)?;
        changes += 1;
    }
    if changes > 0 {
        cache.invalidate(AnalysisKind::Cfg);
        cache.invalidate(AnalysisKind::Dfg);
    }
    Ok(changes)
}

fn insert_split_block(
    func: &mut Function,
    ctx: &mut Context,
    block: Block,
    pred: Block,
) -> PanicResult {
    let block_label = func.label_of(block).clone();
    let pred_label = func.label_of(pred).clone();
    let split_label = Label::new(format!(
        "{}_split_{}",
        pred_label.as_str(),
        block_label.as_str()
    ));

    let term = func.terminator(pred).ok_or_else(|| {
        CompilerPanic::new(format!("predecessor {pred_label} is not terminated"))
    })?;
    let mapping: FxHashMap<Label, Label> =
        FxHashMap::from_iter([(block_label.clone(), split_label.clone())]);
    func.inst_mut(term).replace_label_operands(&mapping);

    let split_block = func.append_basic_block(split_label.clone());

    // Phi inputs flowing in from the predecessor may be defined by one of
    // its phis, or above it; those need a forwarding assignment in the
    // split block to stay distinct per edge.
    let mut var_replacements: FxHashMap<Var, Var> = FxHashMap::default();
    for inst in func.block_insts(block) {
        if func.inst(inst).opcode != Opcode::Phi {
            break;
        }
        let pairs: Vec<(Label, Var)> = func
            .inst(inst)
            .phi_operands()
            .map(|(l, v)| (l.clone(), v))
            .collect();
        for (label, var) in pairs {
            if label != pred_label || var_replacements.contains_key(&var) {
                continue;
            }
            if needs_forwarding_assign(func, var, pred) {
                let forwarded = func.new_variable();
                func.append_inst_with(
                    split_block,
                    Opcode::Assign,
                    [Operand::Var(var)],
                    Some(forwarded),
                );
                var_replacements.insert(var, forwarded);
            }
        }
    }

    func.append_inst(split_block, Opcode::Jmp, [Operand::Label(block_label.clone())]);

    // Reroute the phis through the split block.
    for inst in func.block_insts(block) {
        if func.inst(inst).opcode != Opcode::Phi {
            break;
        }
        let operands = func.inst(inst).operands.clone();
        let mut updated = operands.clone();
        for i in (0..operands.len()).step_by(2) {
            if operands[i].as_label() != Some(&pred_label) {
                continue;
            }
            updated[i] = Operand::Label(split_label.clone());
            if let Some(var) = operands[i + 1].as_var() {
                if let Some(&forwarded) = var_replacements.get(&var) {
                    updated[i + 1] = Operand::Var(forwarded);
                }
            }
        }
        func.inst_mut(inst).operands = updated;
    }

    ctx.rename_data_label(&block_label, &split_label);
    Ok(())
}

/// A value defined by a phi of the predecessor, or not defined in the
/// predecessor at all, needs a fresh copy in the split block.
fn needs_forwarding_assign(func: &Function, var: Var, pred: Block) -> bool {
    for &inst in func.block(pred).insts() {
        if func.inst(inst).output == Some(var) {
            return func.inst(inst).opcode == Opcode::Phi;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CfgAnalysis;

    fn label(s: &str) -> Operand {
        Operand::Label(Label::new(s))
    }

    /// The two-branching-predecessor fan-in from the scheduler contract:
    /// `global` and `block_1` both conditionally enter `finish`, `target`
    /// enters it unconditionally.
    fn fan_in() -> (Context, Function) {
        let mut ctx = Context::new();
        let name = ctx.create_function("global");
        let mut func = ctx.take_function(&name).unwrap();
        let global = func.entry();
        let block_1 = func.append_basic_block(Label::new("block_1"));
        let target = func.append_basic_block(Label::new("target"));
        let finish = func.append_basic_block(Label::new("finish"));

        let (_, acc) = func.append_inst(global, Opcode::Callvalue, []);
        let acc = acc.unwrap();
        func.append_inst(
            global,
            Opcode::Jnz,
            [Operand::Var(acc), label("finish"), label("block_1")],
        );
        func.append_inst(
            block_1,
            Opcode::Jnz,
            [Operand::Var(acc), label("finish"), label("target")],
        );
        func.append_inst(target, Opcode::Jmp, [label("finish")]);
        func.append_inst(finish, Opcode::Stop, []);
        (ctx, func)
    }

    #[test]
    fn fan_in_splits_conditional_edges() {
        let (mut ctx, mut func) = fan_in();
        let mut cache = AnalysesCache::new();
        run(&mut func, &mut cache, &mut ctx).unwrap();

        let cfg = CfgAnalysis::compute(&func).unwrap();
        assert!(cfg.is_normalized());

        let finish = func.get_basic_block(&Label::new("finish")).unwrap();
        let preds: Vec<String> = cfg
            .cfg_in(finish)
            .iter()
            .map(|&b| func.label_of(b).as_str().to_string())
            .collect();
        assert_eq!(
            preds,
            vec![
                "target".to_string(),
                "global_split_finish".to_string(),
                "block_1_split_finish".to_string(),
            ]
        );
    }

    #[test]
    fn normalization_post_condition_holds() {
        let (mut ctx, mut func) = fan_in();
        run(&mut func, &mut AnalysesCache::new(), &mut ctx).unwrap();
        let cfg = CfgAnalysis::compute(&func).unwrap();
        for block in func.basic_blocks() {
            if cfg.cfg_in(block).len() > 1 {
                for &pred in cfg.cfg_in(block) {
                    assert_eq!(cfg.cfg_out(pred).len(), 1);
                }
            }
        }
    }

    #[test]
    fn data_segment_references_follow_the_split() {
        let (mut ctx, mut func) = fan_in();
        ctx.data_segment.push(crate::ir::DataSection {
            label: Label::new("jumptable"),
            items: vec![crate::ir::DataItem::Label(Label::new("finish"))],
        });
        run(&mut func, &mut AnalysesCache::new(), &mut ctx).unwrap();
        // The first split of `finish` repointed the data item.
        match &ctx.data_segment[0].items[0] {
            crate::ir::DataItem::Label(l) => {
                assert!(l.as_str().ends_with("_split_finish"));
            }
            other => panic!("unexpected data item {other:?}"),
        }
    }

    #[test]
    fn phi_values_forward_through_the_split() {
        // A conditional predecessor whose phi contribution is defined
        // above it (not in the predecessor itself) gets a copy in the
        // split block.
        let mut ctx = Context::new();
        let name = ctx.create_function("entry");
        let mut func = ctx.take_function(&name).unwrap();
        let entry = func.entry();
        let mid = func.append_basic_block(Label::new("mid"));
        let side = func.append_basic_block(Label::new("side"));
        let join = func.append_basic_block(Label::new("join"));

        let (_, x) = func.append_inst(entry, Opcode::Callvalue, []);
        let x = x.unwrap();
        func.append_inst(entry, Opcode::Jmp, [label("mid")]);
        func.append_inst(
            mid,
            Opcode::Jnz,
            [Operand::Var(x), label("join"), label("side")],
        );
        let (_, y) = func.append_inst(side, Opcode::Calldatasize, []);
        func.append_inst(side, Opcode::Jmp, [label("join")]);

        let out = func.new_variable();
        let phi = func.append_inst_with(
            join,
            Opcode::Phi,
            [
                label("mid"),
                Operand::Var(x),
                label("side"),
                Operand::Var(y.unwrap()),
            ],
            Some(out),
        );
        func.append_inst(join, Opcode::Mstore, [Operand::Var(out), Operand::lit(0u64)]);
        func.append_inst(join, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new(), &mut ctx).unwrap();

        let split = func
            .get_basic_block(&Label::new("mid_split_join"))
            .expect("split block exists");
        let insts = func.block_insts(split);
        assert_eq!(func.inst(insts[0]).opcode, Opcode::Assign);
        assert_eq!(func.inst(insts[0]).operands[0], Operand::Var(x));
        let forwarded = func.inst(insts[0]).output.unwrap();
        // And the phi now reads the forwarded copy from the split label.
        let pairs: Vec<(Label, Var)> = func
            .inst(phi)
            .phi_operands()
            .map(|(l, v)| (l.clone(), v))
            .collect();
        assert!(pairs.contains(&(Label::new("mid_split_join"), forwarded)));
    }
}
