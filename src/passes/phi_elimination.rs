//! Phi elimination: a phi whose distinct inputs, traced through assignment
//! chains, collapse to a single source value is replaced by an assignment
//! of that value.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::PanicResult;
use crate::fx::FxIndexSet;
use crate::ir::{Function, Inst, Opcode, Operand, Var};
use crate::passes::InstUpdater;

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    let dfg = cache.take_dfg(func);
    let mut updater = InstUpdater::new(func, dfg);

    let phis: Vec<Inst> = updater
        .dfg()
        .outputs()
        .filter(|&(_, inst)| updater.func.inst(inst).opcode == Opcode::Phi)
        .map(|(_, inst)| inst)
        .collect();
    for phi in phis {
        process_phi(&mut updater, phi);
    }

    let dfg = updater.finish();
    cache.put_dfg(dfg);
    cache.invalidate(AnalysisKind::Liveness);
    Ok(())
}

fn process_phi(updater: &mut InstUpdater, phi: Inst) {
    if updater.func.inst(phi).opcode != Opcode::Phi {
        return;
    }
    let inputs: FxIndexSet<Var> = updater
        .func
        .inst(phi)
        .phi_operands()
        .map(|(_, var)| var)
        .filter(|&var| Some(var) != updater.func.inst(phi).output)
        .collect();

    if inputs.len() == 1 {
        let only = *inputs.first().unwrap();
        updater.assign_to(phi, Operand::Var(only));
        return;
    }

    // Chase assignment chains: if every arm bottoms out at the same
    // producing instruction, the phi is a copy of it.
    let mut sources: FxIndexSet<Inst> = FxIndexSet::default();
    for &var in &inputs {
        let Some(src) = updater.dfg().get_producing_instruction(var) else {
            return;
        };
        sources.insert(src);
    }

    let mut guard = updater.func.num_vars() + 1;
    loop {
        let chased = sources.iter().copied().find(|&src| {
            updater.func.inst(src).opcode == Opcode::Assign
                && matches!(updater.func.inst(src).operands[0], Operand::Var(_))
        });
        let Some(src) = chased else { break };
        if guard == 0 {
            return;
        }
        guard -= 1;
        sources.shift_remove(&src);
        let next_var = updater.func.inst(src).operands[0]
            .as_var()
            .expect("assign chased above");
        let Some(next_src) = updater.dfg().get_producing_instruction(next_var) else {
            return;
        };
        sources.insert(next_src);
    }

    if sources.len() == 1 {
        let src = *sources.first().unwrap();
        if let Some(source_var) = updater.func.inst(src).output {
            updater.assign_to(phi, Operand::Var(source_var));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Label;

    fn label(s: &str) -> Operand {
        Operand::Label(Label::new(s))
    }

    #[test]
    fn copies_of_one_value_collapse() {
        // Both arms forward the same callvalue through assigns.
        let mut func = Function::new(Label::new("entry"));
        let entry = func.entry();
        let left = func.append_basic_block(Label::new("left"));
        let right = func.append_basic_block(Label::new("right"));
        let join = func.append_basic_block(Label::new("join"));

        let (_, base) = func.append_inst(entry, Opcode::Callvalue, []);
        let base = base.unwrap();
        let (_, cond) = func.append_inst(entry, Opcode::Calldatasize, []);
        func.append_inst(
            entry,
            Opcode::Jnz,
            [Operand::Var(cond.unwrap()), label("left"), label("right")],
        );
        let (_, l) = func.append_inst(left, Opcode::Assign, [Operand::Var(base)]);
        func.append_inst(left, Opcode::Jmp, [label("join")]);
        let (_, r) = func.append_inst(right, Opcode::Assign, [Operand::Var(base)]);
        func.append_inst(right, Opcode::Jmp, [label("join")]);

        let out = func.new_variable();
        let phi = func.append_inst_with(
            join,
            Opcode::Phi,
            [
                label("left"),
                Operand::Var(l.unwrap()),
                label("right"),
                Operand::Var(r.unwrap()),
            ],
            Some(out),
        );
        func.append_inst(join, Opcode::Mstore, [Operand::Var(out), Operand::lit(0u64)]);
        func.append_inst(join, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();

        assert_eq!(func.inst(phi).opcode, Opcode::Assign);
        assert_eq!(func.inst(phi).operands[0], Operand::Var(base));
    }

    #[test]
    fn genuine_joins_survive() {
        let mut func = Function::new(Label::new("entry"));
        let entry = func.entry();
        let left = func.append_basic_block(Label::new("left"));
        let right = func.append_basic_block(Label::new("right"));
        let join = func.append_basic_block(Label::new("join"));

        let (_, cond) = func.append_inst(entry, Opcode::Callvalue, []);
        func.append_inst(
            entry,
            Opcode::Jnz,
            [Operand::Var(cond.unwrap()), label("left"), label("right")],
        );
        let (_, l) = func.append_inst(left, Opcode::Calldatasize, []);
        func.append_inst(left, Opcode::Jmp, [label("join")]);
        let (_, r) = func.append_inst(right, Opcode::Codesize, []);
        func.append_inst(right, Opcode::Jmp, [label("join")]);

        let out = func.new_variable();
        let phi = func.append_inst_with(
            join,
            Opcode::Phi,
            [
                label("left"),
                Operand::Var(l.unwrap()),
                label("right"),
                Operand::Var(r.unwrap()),
            ],
            Some(out),
        );
        func.append_inst(join, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();
        assert_eq!(func.inst(phi).opcode, Opcode::Phi);
    }
}
