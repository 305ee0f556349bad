//! Re-encode expensive literals in assignments.
//!
//! A PUSH of a mostly-ones word is cheaper as `not` of its (small)
//! complement, and a word with a long run of trailing zero bits is
//! cheaper as `shl` of its compact significant part. The break-even
//! thresholds are tunables.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::PanicResult;
use crate::ir::{Function, Literal, Opcode, Operand};
use crate::passes::InstUpdater;
use primitive_types::U256;

/// `not` pays off when the complement fits in fewer than three bytes.
pub const NOT_THRESHOLD_BITS: u32 = 24;
/// `shl` pays off past this many trailing zero bits.
pub const SHL_THRESHOLD_BITS: u32 = 24;

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    let dfg = cache.take_dfg(func);
    let mut updater = InstUpdater::new(func, dfg);
    let mut changed = false;

    for block in updater.func.block_ids() {
        for inst in updater.func.block_insts(block) {
            let data = updater.func.inst(inst);
            if data.opcode != Opcode::Assign {
                continue;
            }
            let Some(lit) = data.operands[0].as_lit() else {
                continue;
            };
            let value = lit.0;
            if value.is_zero() {
                continue;
            }

            let complement = !value;
            if complement < (U256::one() << NOT_THRESHOLD_BITS) {
                updater.update(inst, Opcode::Not, [Operand::Lit(Literal(complement))]);
                changed = true;
                continue;
            }

            let trailing = value.trailing_zeros();
            if trailing > SHL_THRESHOLD_BITS {
                // shl [value, shift].
                updater.update(
                    inst,
                    Opcode::Shl,
                    [
                        Operand::Lit(Literal(value >> trailing)),
                        Operand::lit(trailing as u64),
                    ],
                );
                changed = true;
            }
        }
    }

    let dfg = updater.finish();
    cache.put_dfg(dfg);
    if changed {
        cache.invalidate(AnalysisKind::Liveness);
        cache.invalidate(AnalysisKind::VarEquivalence);
        cache.invalidate(AnalysisKind::AvailableExpressions);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Label;

    #[test]
    fn mostly_ones_words_invert() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let minus_two = Literal::from(2u64).wrapping_neg();
        let (a, _) = func.append_inst(entry, Opcode::Assign, [Operand::Lit(minus_two)]);
        func.append_inst(entry, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();
        assert_eq!(func.inst(a).opcode, Opcode::Not);
        assert_eq!(func.inst(a).operands[0], Operand::lit(1u64));
    }

    #[test]
    fn shifted_words_compact() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let big = Literal(U256::from(0x1234u64) << 224);
        let (a, _) = func.append_inst(entry, Opcode::Assign, [Operand::Lit(big)]);
        func.append_inst(entry, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();
        let data = func.inst(a);
        assert_eq!(data.opcode, Opcode::Shl);
        // 0x1234 has two trailing zero bits of its own.
        assert_eq!(data.operands[0], Operand::lit(0x48du64));
        assert_eq!(data.operands[1], Operand::lit(226u64));
    }

    #[test]
    fn small_literals_are_untouched() {
        let mut func = Function::new(Label::new("main"));
        let entry = func.entry();
        let (a, _) = func.append_inst(entry, Opcode::Assign, [Operand::lit(1000u64)]);
        func.append_inst(entry, Opcode::Stop, []);

        run(&mut func, &mut AnalysesCache::new()).unwrap();
        assert_eq!(func.inst(a).opcode, Opcode::Assign);
    }
}
