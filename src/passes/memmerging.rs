//! Memory merging: collapse runs of 32-byte `mload`/`mstore` pairs that
//! copy a contiguous region into a single `mcopy`.
//!
//! Within a block, loads from literal addresses whose single consumer is a
//! literal-address store are collected into a copy interval; a pair that
//! extends the current interval contiguously (source and destination both
//! advancing in step) grows it, anything else — including any other
//! memory-writing instruction — flushes. Intervals whose source and
//! destination regions overlap are never merged, and a lone pair is left
//! as the cheaper load/store sequence.

use crate::analysis::{AnalysesCache, AnalysisKind};
use crate::errors::PanicResult;
use crate::fx::FxHashMap;
use crate::ir::{Effects, Function, Inst, Opcode, Operand, Var};
use crate::passes::InstUpdater;

const WORD: usize = 32;

#[derive(Clone, Debug)]
struct Interval {
    src_start: usize,
    src_end: usize,
    dst_start: usize,
    /// The load/store pairs, in order.
    insts: Vec<Inst>,
}

impl Interval {
    fn length(&self) -> usize {
        self.src_end - self.src_start
    }

    fn dst_end(&self) -> usize {
        self.dst_start + self.length()
    }

    fn overlaps(&self) -> bool {
        self.src_start < self.dst_end() && self.dst_start < self.src_end
    }

    /// Try to append a copy of `length` bytes at `(src, dst)`.
    fn extend(&mut self, src: usize, dst: usize, length: usize, insts: [Inst; 2]) -> bool {
        if src != self.src_end || dst != self.dst_end() {
            return false;
        }
        let widened = Interval {
            src_start: self.src_start,
            src_end: self.src_end + length,
            dst_start: self.dst_start,
            insts: Vec::new(),
        };
        if widened.overlaps() {
            return false;
        }
        self.src_end += length;
        self.insts.extend(insts);
        true
    }
}

pub fn run(func: &mut Function, cache: &mut AnalysesCache) -> PanicResult {
    let dfg = cache.take_dfg(func);
    let mut updater = InstUpdater::new(func, dfg);
    let mut changed = false;

    for block in updater.func.block_ids() {
        changed |= process_block(&mut updater, block);
    }

    let dfg = updater.finish();
    cache.put_dfg(dfg);
    if changed {
        cache.invalidate(AnalysisKind::Dfg);
        cache.invalidate(AnalysisKind::Liveness);
        cache.invalidate(AnalysisKind::MemSsa);
        cache.invalidate(AnalysisKind::AvailableExpressions);
    }
    Ok(())
}

fn process_block(updater: &mut InstUpdater, block: crate::ir::Block) -> bool {
    let mut loads: FxHashMap<Var, usize> = FxHashMap::default();
    let mut interval: Option<Interval> = None;
    let mut changed = false;

    for inst in updater.func.block_insts(block) {
        let data = updater.func.inst(inst);
        match data.opcode {
            Opcode::Mload => {
                let Some(src) = data.operands[0].as_lit().and_then(|l| l.to_usize()) else {
                    continue;
                };
                let Some(out) = data.output else { continue };
                if updater.dfg().get_uses(out).len() != 1 {
                    continue;
                }
                let only_use = updater.dfg().get_uses(out)[0];
                if updater.func.inst(only_use).opcode != Opcode::Mstore {
                    continue;
                }
                loads.insert(out, src);
            }
            Opcode::Mstore => {
                let value = data.operands[0].clone();
                let dst = data.operands[1].as_lit().and_then(|l| l.to_usize());
                let copied = value
                    .as_var()
                    .and_then(|v| loads.get(&v).map(|&src| (v, src)));
                let (Some(dst), Some((var, src))) = (dst, copied) else {
                    changed |= flush(updater, &mut interval);
                    loads.clear();
                    continue;
                };
                let load_inst = updater
                    .dfg()
                    .get_producing_instruction(var)
                    .expect("recorded load has a producer");

                let extended = interval
                    .as_mut()
                    .map_or(false, |current| current.extend(src, dst, WORD, [load_inst, inst]));
                if !extended {
                    changed |= flush(updater, &mut interval);
                    interval = Some(Interval {
                        src_start: src,
                        src_end: src + WORD,
                        dst_start: dst,
                        insts: vec![load_inst, inst],
                    });
                }
            }
            _ => {
                if data.opcode.writes().intersects(Effects::MEMORY) {
                    changed |= flush(updater, &mut interval);
                    loads.clear();
                }
            }
        }
    }
    changed |= flush(updater, &mut interval);
    changed
}

/// Emit the pending interval: two or more pairs become one `mcopy
/// [length, src, dst]`; a single pair is left alone.
fn flush(updater: &mut InstUpdater, interval: &mut Option<Interval>) -> bool {
    let Some(interval) = interval.take() else {
        return false;
    };
    if interval.insts.len() <= 2 {
        return false;
    }
    let first = interval.insts[0];
    updater.update_with_output(
        first,
        Opcode::Mcopy,
        [
            Operand::lit(interval.length() as u64),
            Operand::lit(interval.src_start as u64),
            Operand::lit(interval.dst_start as u64),
        ],
        None,
    );
    for &inst in &interval.insts[1..] {
        updater.remove(inst);
    }
    true
}
