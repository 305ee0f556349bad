//! Assignment elimination: forward the source of every `assign` to its
//! uses and drop the assignment. Phi inputs are left alone — the stack
//! scheduler relies on phi operands being distinct forwarded copies — so
//! an assign is only removed when neither its output nor its source feeds
//! a phi. This is the inverse of single-use expansion and runs after most
//! other transformations.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::PanicResult;
use crate::fx::FxHashMap;
use crate::ir::{Function, Opcode, Operand};
use crate::passes::InstUpdater;

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    let dfg = cache.take_dfg(func);
    let mut updater = InstUpdater::new(func, dfg);

    let assigns: Vec<_> = updater
        .dfg()
        .outputs()
        .filter(|&(_, inst)| updater.func.inst(inst).opcode == Opcode::Assign)
        .collect();

    for (var, inst) in assigns {
        // The map is rebuilt lazily; an earlier forwarding may already
        // have rewritten this instruction away.
        if updater.func.inst(inst).opcode != Opcode::Assign {
            continue;
        }
        let source = updater.func.inst(inst).operands[0].clone();
        let Operand::Var(source_var) = source.clone() else {
            continue;
        };

        if updater
            .dfg()
            .get_uses(source_var)
            .iter()
            .any(|&u| updater.func.inst(u).opcode == Opcode::Phi)
        {
            continue;
        }
        let uses: Vec<_> = updater.dfg().get_uses(var).to_vec();
        if uses
            .iter()
            .any(|&u| updater.func.inst(u).opcode == Opcode::Phi)
        {
            continue;
        }

        let mapping: FxHashMap<Operand, Operand> =
            FxHashMap::from_iter([(Operand::Var(var), source)]);
        for user in uses {
            updater.replace_operands(user, &mapping);
        }
        updater.remove(inst);
    }

    let dfg = updater.finish();
    cache.put_dfg(dfg);
    cache.invalidate(AnalysisKind::Liveness);
    cache.invalidate(AnalysisKind::VarEquivalence);
    cache.invalidate(AnalysisKind::AvailableExpressions);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Label;

    #[test]
    fn forwards_through_assign_chains() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let (_, a) = func.append_inst(entry, Opcode::Callvalue, []);
        let a = a.unwrap();
        let (s1, b) = func.append_inst(entry, Opcode::Assign, [Operand::Var(a)]);
        let (s2, c) = func.append_inst(entry, Opcode::Assign, [Operand::Var(b.unwrap())]);
        let (user, _) = func.append_inst(
            entry,
            Opcode::Add,
            [Operand::Var(c.unwrap()), Operand::lit(1u64)],
        );
        func.append_inst(entry, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();

        assert_eq!(func.inst(user).operands[0], Operand::Var(a));
        assert_eq!(func.inst(s1).parent(), None);
        assert_eq!(func.inst(s2).parent(), None);
        assert_eq!(func.block(entry).len(), 3);
    }

    #[test]
    fn literal_assigns_are_kept() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let (s, v) = func.append_inst(entry, Opcode::Assign, [Operand::lit(7u64)]);
        func.append_inst(
            entry,
            Opcode::Mstore,
            [Operand::Var(v.unwrap()), Operand::lit(0u64)],
        );
        func.append_inst(entry, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();
        assert_eq!(func.inst(s).opcode, Opcode::Assign);
        assert_eq!(func.inst(s).parent(), Some(entry));
    }

    #[test]
    fn phi_feeding_assigns_survive() {
        let mut func = Function::new(Label::new("entry"));
        let entry = func.entry();
        let loop_bb = func.append_basic_block(Label::new("loop"));
        let (_, a) = func.append_inst(entry, Opcode::Callvalue, []);
        let (s, fwd) = func.append_inst(entry, Opcode::Assign, [Operand::Var(a.unwrap())]);
        func.append_inst(entry, Opcode::Jmp, [Operand::Label(Label::new("loop"))]);

        let out = func.new_variable();
        func.append_inst_with(
            loop_bb,
            Opcode::Phi,
            [
                Operand::Label(Label::new("entry")),
                Operand::Var(fwd.unwrap()),
                Operand::Label(Label::new("loop")),
                Operand::Var(out),
            ],
            Some(out),
        );
        func.append_inst(loop_bb, Opcode::Jmp, [Operand::Label(Label::new("loop"))]);

        run(&mut func, &mut AnalysesCache::new()).unwrap();
        // The assign feeds a phi; it must not be forwarded away.
        assert_eq!(func.inst(s).parent(), Some(entry));
    }
}
