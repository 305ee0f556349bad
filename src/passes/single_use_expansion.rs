//! Single-use expansion: give every operand its own forwarding
//! assignment so the DFT pass (and the stack emitter behind it) sees each
//! variable consumed at most once by a non-assignment instruction, and no
//! literal operands outside assignments.
//!
//! Literals and multiply-used variables are extracted into
//! `%tmp = assign <op>` right before the consumer; phi inputs are
//! extracted at the tail of the corresponding predecessor block. The
//! inverse of assignment elimination.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::{CompilerPanic, PanicResult};
use crate::fx::FxHashMap;
use crate::ir::{Function, Inst, Opcode, Operand};
use crate::passes::InstUpdater;

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    let dfg = cache.take_dfg(func);
    let mut updater = InstUpdater::new(func, dfg);

    for block in updater.func.block_ids() {
        // The block's instruction list grows as we go; re-reading it per
        // instruction keeps the indices honest.
        let mut i = 0;
        while i < updater.func.block(block).len() {
            let inst = updater.func.block(block).insts()[i];
            let opcode = updater.func.inst(inst).opcode;
            if matches!(opcode, Opcode::Assign | Opcode::Offset | Opcode::Param) {
                i += 1;
                continue;
            }
            if opcode == Opcode::Phi {
                process_phi(&mut updater, inst)?;
                i += 1;
                continue;
            }

            for j in 0..updater.func.inst(inst).operands.len() {
                // The first operand of log is the topic count, not a
                // value.
                if opcode == Opcode::Log && j == 0 {
                    continue;
                }
                let op = updater.func.inst(inst).operands[j].clone();
                match &op {
                    Operand::Var(v) => {
                        let uses = updater.dfg().get_uses(*v);
                        let within = updater
                            .func
                            .inst(inst)
                            .operands
                            .iter()
                            .filter(|o| **o == op)
                            .count();
                        if uses.len() == 1 && within == 1 {
                            continue;
                        }
                    }
                    Operand::Lit(_) => {}
                    // Labels are special in jumps; leave them.
                    Operand::Label(_) => continue,
                }
                let tmp = updater
                    .add_before(inst, Opcode::Assign, [op])
                    .expect("assign has an output");
                updater.set_operand(inst, j, Operand::Var(tmp));
                i += 1;
            }
            i += 1;
        }
    }

    let dfg = updater.finish();
    cache.put_dfg(dfg);
    cache.invalidate(AnalysisKind::Dfg);
    cache.invalidate(AnalysisKind::Liveness);
    Ok(())
}

/// Phi inputs are forwarded at the end of each predecessor block, so the
/// phi still satisfies the one-use rule without a mid-block insertion
/// point.
fn process_phi(updater: &mut InstUpdater, phi: Inst) -> PanicResult {
    let pairs: Vec<(crate::ir::Label, crate::ir::Var)> = updater
        .func
        .inst(phi)
        .phi_operands()
        .map(|(label, var)| (label.clone(), var))
        .collect();

    let mut replacements: FxHashMap<Operand, Operand> = FxHashMap::default();
    for (label, var) in pairs {
        if replacements.contains_key(&Operand::Var(var)) {
            continue;
        }
        let pred = updater.func.get_basic_block(&label).ok_or_else(|| {
            CompilerPanic::new(format!("phi references unknown block {label}"))
        })?;
        let term = updater.func.terminator(pred).ok_or_else(|| {
            CompilerPanic::new(format!("phi predecessor {label} is not terminated"))
        })?;
        let forwarded = updater
            .add_before(term, Opcode::Assign, [Operand::Var(var)])
            .expect("assign has an output");
        replacements.insert(Operand::Var(var), Operand::Var(forwarded));
    }
    updater.replace_operands(phi, &replacements);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::DfgAnalysis;
    use crate::ir::Label;

    #[test]
    fn double_use_gets_a_forwarding_assign() {
        // %r = add %x, %x expands so the add reads two distinct names.
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let (_, x) = func.append_inst(entry, Opcode::Callvalue, []);
        let x = x.unwrap();
        let (add, _) = func.append_inst(entry, Opcode::Add, [Operand::Var(x), Operand::Var(x)]);
        func.append_inst(entry, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();

        let dfg = DfgAnalysis::compute(&func);
        let add_ops = func.inst(add).operands.clone();
        assert_ne!(add_ops[0], add_ops[1]);
        // Each operand now has exactly one non-assign consumer.
        for op in &add_ops {
            let var = op.as_var().unwrap();
            let non_assign_uses = dfg
                .get_uses(var)
                .iter()
                .filter(|&&u| func.inst(u).opcode != Opcode::Assign)
                .count();
            assert_eq!(non_assign_uses, 1);
        }
    }

    #[test]
    fn literals_move_into_assigns() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let (_, v) = func.append_inst(entry, Opcode::Callvalue, []);
        let (store, _) = func.append_inst(
            entry,
            Opcode::Mstore,
            [Operand::Var(v.unwrap()), Operand::lit(64u64)],
        );
        func.append_inst(entry, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();

        for op in &func.inst(store).operands {
            assert!(matches!(op, Operand::Var(_)));
        }
        // The single-use variable operand was not needlessly expanded.
        assert_eq!(func.inst(store).operands[0], Operand::Var(v.unwrap()));
    }

    #[test]
    fn jnz_labels_survive_but_conditions_expand() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let a = func.append_basic_block(Label::new("a"));
        let b = func.append_basic_block(Label::new("b"));
        let (jnz, _) = func.append_inst(
            entry,
            Opcode::Jnz,
            [
                Operand::lit(1u64),
                Operand::Label(Label::new("a")),
                Operand::Label(Label::new("b")),
            ],
        );
        func.append_inst(a, Opcode::Stop, []);
        func.append_inst(b, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();

        let data = func.inst(jnz);
        assert!(matches!(data.operands[0], Operand::Var(_)));
        assert!(matches!(data.operands[1], Operand::Label(_)));
        assert!(matches!(data.operands[2], Operand::Label(_)));
    }

    #[test]
    fn phi_inputs_forward_in_predecessors() {
        let mut func = Function::new(Label::new("entry"));
        let entry = func.entry();
        let loop_bb = func.append_basic_block(Label::new("loop"));
        let (_, init) = func.append_inst(entry, Opcode::Callvalue, []);
        func.append_inst(entry, Opcode::Jmp, [Operand::Label(Label::new("loop"))]);

        let i = func.new_variable();
        let next = func.new_variable();
        let phi = func.append_inst_with(
            loop_bb,
            Opcode::Phi,
            [
                Operand::Label(Label::new("entry")),
                Operand::Var(init.unwrap()),
                Operand::Label(Label::new("loop")),
                Operand::Var(next),
            ],
            Some(i),
        );
        func.append_inst_with(
            loop_bb,
            Opcode::Add,
            [Operand::Var(i), Operand::lit(1u64)],
            Some(next),
        );
        func.append_inst(loop_bb, Opcode::Jmp, [Operand::Label(Label::new("loop"))]);

        run(&mut func, &mut AnalysesCache::new()).unwrap();

        // Each phi arm now reads an assign emitted at its predecessor's
        // tail.
        let dfg = DfgAnalysis::compute(&func);
        for (_, var) in func.inst(phi).phi_operands() {
            let producer = dfg.get_producing_instruction(var).unwrap();
            assert_eq!(func.inst(producer).opcode, Opcode::Assign);
            let producer_block = func.inst(producer).parent().unwrap();
            let term = func.terminator(producer_block).unwrap();
            let pos_assign = func.position_in_block(producer).unwrap();
            let pos_term = func.position_in_block(term).unwrap();
            assert!(pos_assign < pos_term);
        }
    }
}
