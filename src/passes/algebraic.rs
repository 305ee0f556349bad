//! Algebraic peephole optimization: purely syntactic single-instruction
//! rewrites — neutral and absorbing elements, idempotence, iszero-chain
//! reduction, strength reduction of multiplication and division by powers
//! of two, oversized-shift cleanup, and comparison canonicalization.
//! Variable equivalence (assign chains) widens the `x - x`-style matches.

use crate::analysis::equivalent_vars::VarEquivalenceAnalysis;
use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::PanicResult;
use crate::ir::{Function, Inst, Literal, Opcode, Operand};
use crate::passes::InstUpdater;
use primitive_types::U256;

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    let equivalence = {
        let dfg = cache.request_dfg(func);
        VarEquivalenceAnalysis::compute(func, dfg)
    };
    let dfg = cache.take_dfg(func);
    let mut updater = InstUpdater::new(func, dfg);

    for block in updater.func.block_ids() {
        for inst in updater.func.block_insts(block) {
            rewrite(&mut updater, &equivalence, inst);
        }
    }

    let dfg = updater.finish();
    cache.put_dfg(dfg);
    cache.invalidate(AnalysisKind::Liveness);
    cache.invalidate(AnalysisKind::VarEquivalence);
    cache.invalidate(AnalysisKind::AvailableExpressions);
    Ok(())
}

fn rewrite(updater: &mut InstUpdater, equivalence: &VarEquivalenceAnalysis, inst: Inst) {
    use Opcode::*;
    let data = updater.func.inst(inst);
    if data.output.is_none() {
        return;
    }
    let opcode = data.opcode;
    let ops = data.operands.clone();

    // Binary EVM opcodes store `[b, a]` for `a op b`.
    let lit0 = ops.first().and_then(Operand::as_lit);
    let lit1 = ops.get(1).and_then(Operand::as_lit);
    let same = ops.len() == 2 && equivalence.equivalent(&ops[0], &ops[1]);

    match opcode {
        Add | Or | Xor => {
            // x + 0, x | 0, x ^ 0.
            if let Some(i) = zero_operand(lit0, lit1) {
                updater.assign_to(inst, ops[1 - i].clone());
                return;
            }
            if same && opcode == Xor {
                updater.assign_to(inst, Operand::Lit(Literal::ZERO));
                return;
            }
            if same && opcode == Or {
                updater.assign_to(inst, ops[0].clone());
                return;
            }
        }
        Sub => {
            if same {
                updater.assign_to(inst, Operand::Lit(Literal::ZERO));
                return;
            }
            if lit0 == Some(Literal::ZERO) {
                updater.assign_to(inst, ops[1].clone());
                return;
            }
        }
        Mul => {
            if lit0 == Some(Literal::ZERO) || lit1 == Some(Literal::ZERO) {
                updater.assign_to(inst, Operand::Lit(Literal::ZERO));
                return;
            }
            if let Some(i) = literal_matching(lit0, lit1, |l| l.0 == U256::one()) {
                updater.assign_to(inst, ops[1 - i].clone());
                return;
            }
            // x * 2^n -> x << n.
            if let Some(i) = literal_matching(lit0, lit1, |l| is_power_of_two(l.0)) {
                let n = power_of_two_exponent(match i {
                    0 => lit0.unwrap().0,
                    _ => lit1.unwrap().0,
                });
                let value = ops[1 - i].clone();
                updater.update(inst, Shl, [value, Operand::lit(n)]);
                return;
            }
        }
        Div => {
            if lit0.is_some_and(|l| l.0 == U256::one()) {
                updater.assign_to(inst, ops[1].clone());
                return;
            }
            // x / 2^n -> x >> n.
            if let Some(l) = lit0.filter(|l| is_power_of_two(l.0)) {
                let value = ops[1].clone();
                updater.update(inst, Shr, [value, Operand::lit(power_of_two_exponent(l.0))]);
                return;
            }
        }
        Mod => {
            // x % 2^n -> x & (2^n - 1).
            if let Some(l) = lit0.filter(|l| is_power_of_two(l.0)) {
                let mask = Literal(l.0 - U256::one());
                let value = ops[1].clone();
                updater.update(inst, And, [Operand::Lit(mask), value]);
                return;
            }
        }
        And => {
            if lit0 == Some(Literal::ZERO) || lit1 == Some(Literal::ZERO) {
                updater.assign_to(inst, Operand::Lit(Literal::ZERO));
                return;
            }
            if let Some(i) = literal_matching(lit0, lit1, |l| l.0 == U256::MAX) {
                updater.assign_to(inst, ops[1 - i].clone());
                return;
            }
            if same {
                updater.assign_to(inst, ops[0].clone());
                return;
            }
        }
        Eq => {
            if same {
                updater.assign_to(inst, Operand::Lit(Literal::from_bool(true)));
                return;
            }
            // eq x, 0 canonicalizes to iszero x.
            if let Some(i) = zero_operand(lit0, lit1) {
                let other = ops[1 - i].clone();
                updater.update(inst, Iszero, [other]);
                return;
            }
        }
        Lt | Gt | Slt | Sgt => {
            if same {
                updater.assign_to(inst, Operand::Lit(Literal::ZERO));
                return;
            }
            // Nothing is unsigned-below zero, nothing unsigned-above MAX.
            let impossible = match opcode {
                Lt => lit0 == Some(Literal::ZERO),
                Gt => lit0.is_some_and(|l| l.0 == U256::MAX),
                _ => false,
            };
            if impossible {
                updater.assign_to(inst, Operand::Lit(Literal::ZERO));
                return;
            }
        }
        Shl | Shr => {
            // `[value, shift]`; shifting a full word away leaves zero.
            if lit1.is_some_and(|l| l.0 >= U256::from(256u32)) {
                updater.assign_to(inst, Operand::Lit(Literal::ZERO));
                return;
            }
            if lit1 == Some(Literal::ZERO) {
                updater.assign_to(inst, ops[0].clone());
                return;
            }
        }
        Iszero => {
            // iszero(iszero(iszero x)) -> iszero x.
            if let Some(inner) = iszero_source(updater, &ops[0]) {
                if let Some(innermost) = iszero_source(updater, &inner) {
                    updater.update(inst, Iszero, [innermost]);
                    return;
                }
            }
        }
        _ => {}
    }
}

/// Index of a zero literal among two operands.
fn zero_operand(lit0: Option<Literal>, lit1: Option<Literal>) -> Option<usize> {
    literal_matching(lit0, lit1, |l| l.is_zero())
}

fn literal_matching(
    lit0: Option<Literal>,
    lit1: Option<Literal>,
    pred: impl Fn(Literal) -> bool,
) -> Option<usize> {
    if lit0.is_some_and(&pred) {
        Some(0)
    } else if lit1.is_some_and(&pred) {
        Some(1)
    } else {
        None
    }
}

fn is_power_of_two(v: U256) -> bool {
    !v.is_zero() && (v & (v - U256::one())).is_zero()
}

fn power_of_two_exponent(v: U256) -> u64 {
    debug_assert!(is_power_of_two(v));
    (256 - 1 - v.leading_zeros()) as u64
}

/// If the operand is produced by `iszero y`, return `y`.
fn iszero_source(updater: &InstUpdater, operand: &Operand) -> Option<Operand> {
    let var = operand.as_var()?;
    let producer = updater.dfg().get_producing_instruction(var)?;
    let data = updater.func.inst(producer);
    if data.opcode == Opcode::Iszero {
        Some(data.operands[0].clone())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Label;

    fn setup() -> (Function, crate::ir::Block, crate::ir::Var) {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let (_, x) = func.append_inst(entry, Opcode::Callvalue, []);
        (func, entry, x.unwrap())
    }

    #[test]
    fn neutral_and_absorbing_elements() {
        let (mut func, entry, x) = setup();
        let (add0, _) = func.append_inst(entry, Opcode::Add, [Operand::lit(0u64), Operand::Var(x)]);
        let (mul1, _) = func.append_inst(entry, Opcode::Mul, [Operand::Var(x), Operand::lit(1u64)]);
        let (mul0, _) = func.append_inst(entry, Opcode::Mul, [Operand::Var(x), Operand::lit(0u64)]);
        let (and_max, _) = func.append_inst(
            entry,
            Opcode::And,
            [Operand::Lit(Literal(U256::MAX)), Operand::Var(x)],
        );
        func.append_inst(entry, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();

        assert_eq!(func.inst(add0).opcode, Opcode::Assign);
        assert_eq!(func.inst(add0).operands[0], Operand::Var(x));
        assert_eq!(func.inst(mul1).opcode, Opcode::Assign);
        assert_eq!(func.inst(mul0).operands[0], Operand::lit(0u64));
        assert_eq!(func.inst(and_max).operands[0], Operand::Var(x));
    }

    #[test]
    fn sub_of_equivalent_values_is_zero() {
        let (mut func, entry, x) = setup();
        let (_, copy) = func.append_inst(entry, Opcode::Assign, [Operand::Var(x)]);
        let (sub, _) = func.append_inst(
            entry,
            Opcode::Sub,
            [Operand::Var(copy.unwrap()), Operand::Var(x)],
        );
        func.append_inst(entry, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();
        assert_eq!(func.inst(sub).opcode, Opcode::Assign);
        assert_eq!(func.inst(sub).operands[0], Operand::lit(0u64));
    }

    #[test]
    fn strength_reduction() {
        let (mut func, entry, x) = setup();
        let (mul8, _) = func.append_inst(entry, Opcode::Mul, [Operand::lit(8u64), Operand::Var(x)]);
        let (div4, _) = func.append_inst(entry, Opcode::Div, [Operand::lit(4u64), Operand::Var(x)]);
        let (mod32, _) = func.append_inst(entry, Opcode::Mod, [Operand::lit(32u64), Operand::Var(x)]);
        func.append_inst(entry, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();

        assert_eq!(func.inst(mul8).opcode, Opcode::Shl);
        assert_eq!(func.inst(mul8).operands[1], Operand::lit(3u64));
        assert_eq!(func.inst(div4).opcode, Opcode::Shr);
        assert_eq!(func.inst(div4).operands[1], Operand::lit(2u64));
        assert_eq!(func.inst(mod32).opcode, Opcode::And);
        assert_eq!(func.inst(mod32).operands[0], Operand::lit(31u64));
    }

    #[test]
    fn oversized_shifts_vanish() {
        let (mut func, entry, x) = setup();
        let (shl, _) = func.append_inst(
            entry,
            Opcode::Shl,
            [Operand::Var(x), Operand::lit(256u64)],
        );
        func.append_inst(entry, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();
        assert_eq!(func.inst(shl).opcode, Opcode::Assign);
        assert_eq!(func.inst(shl).operands[0], Operand::lit(0u64));
    }

    #[test]
    fn iszero_chain_reduction() {
        let (mut func, entry, x) = setup();
        let (_, i1) = func.append_inst(entry, Opcode::Iszero, [Operand::Var(x)]);
        let (_, i2) = func.append_inst(entry, Opcode::Iszero, [Operand::Var(i1.unwrap())]);
        let (i3, _) = func.append_inst(entry, Opcode::Iszero, [Operand::Var(i2.unwrap())]);
        func.append_inst(entry, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();
        assert_eq!(func.inst(i3).opcode, Opcode::Iszero);
        assert_eq!(func.inst(i3).operands[0], Operand::Var(x));
    }

    #[test]
    fn eq_with_zero_becomes_iszero() {
        let (mut func, entry, x) = setup();
        let (eq, _) = func.append_inst(entry, Opcode::Eq, [Operand::lit(0u64), Operand::Var(x)]);
        func.append_inst(entry, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();
        assert_eq!(func.inst(eq).opcode, Opcode::Iszero);
        assert_eq!(func.inst(eq).operands[0], Operand::Var(x));
    }
}
