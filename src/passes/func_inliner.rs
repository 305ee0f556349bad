//! Function inlining over the whole context.
//!
//! Walks the call graph bottom-up from the entry function and inlines a
//! callee into its call sites when it has a single call site or is small
//! by the codesize policy. At each site the callee's blocks are copied
//! into the caller with prefixed labels and fresh variables; `param`
//! pseudo-instructions become assignments of the call arguments, `palloca`
//! becomes an assignment of its placed offset, and `ret` jumps to the
//! split-off continuation of the call-site block.
//!
//! The only pass that crosses function boundaries; the driver runs it
//! serially before the per-function pipeline.

use crate::analysis::CallGraphAnalysis;
use crate::errors::{CompilerPanic, PanicResult};
use crate::fx::FxHashMap;
use crate::ir::{Block, Context, Function, Inst, Label, Opcode, Operand, OperandList, Var};

/// Callees at or below this codesize cost are inlined even with several
/// call sites. Tunable.
pub const SMALL_FUNCTION_COST: usize = 15;

pub fn run(ctx: &mut Context) -> PanicResult {
    let Some(entry) = ctx.entry_function().cloned() else {
        return Ok(());
    };
    let call_graph = CallGraphAnalysis::compute(ctx);
    let walk = call_graph.call_walk(&entry);

    let mut inline_count = 0usize;
    for callee_name in walk {
        if callee_name == entry {
            continue;
        }
        let sites = call_graph.call_sites(&callee_name).to_vec();
        if sites.is_empty() {
            continue;
        }
        let small = ctx
            .get_function(&callee_name)
            .is_some_and(|f| f.code_size_cost() <= SMALL_FUNCTION_COST);
        if sites.len() > 1 && !small {
            continue;
        }

        let callee = ctx
            .remove_function(&callee_name)
            .ok_or_else(|| CompilerPanic::new(format!("unknown callee {callee_name}")))?;
        for (caller_name, invoke) in sites {
            let mut caller = ctx.take_function(&caller_name).ok_or_else(|| {
                CompilerPanic::new(format!("unknown caller {caller_name}"))
            })?;
            let prefix = format!("inline_{inline_count}_");
            inline_count += 1;
            inline_call_site(&mut caller, &callee, invoke, &prefix, ctx)?;
            ctx.put_function(caller);
        }
    }
    Ok(())
}

fn inline_call_site(
    caller: &mut Function,
    callee: &Function,
    invoke: Inst,
    prefix: &str,
    ctx: &mut Context,
) -> PanicResult {
    let call_block = caller
        .inst(invoke)
        .parent()
        .ok_or_else(|| CompilerPanic::new("invoke instruction outside a block"))?;
    let call_index = caller
        .position_in_block(invoke)
        .ok_or_else(|| CompilerPanic::new("invoke not found in its block"))?;
    let args: Vec<Operand> = caller.inst(invoke).operands[1..].to_vec();

    // The continuation: everything after the invoke moves to a fresh
    // block the inlined `ret`s will jump to.
    let return_label = ctx.get_next_label(&format!("{prefix}inline_return"));
    let return_block = caller.append_basic_block(return_label.clone());
    let trailing: Vec<Inst> = caller.block_insts(call_block)[call_index + 1..].to_vec();
    for inst in trailing {
        caller.detach_inst(inst);
        let index = caller.block(return_block).len();
        caller.attach_inst(return_block, index, inst);
    }

    // Copy the callee body with prefixed labels and fresh variables.
    let mut var_map: FxHashMap<Var, Var> = FxHashMap::default();
    let mut block_map: FxHashMap<Block, Block> = FxHashMap::default();
    for old_block in callee.basic_blocks() {
        let new_label = Label::new(format!(
            "{prefix}{}",
            callee.label_of(old_block).as_str()
        ));
        block_map.insert(old_block, caller.append_basic_block(new_label));
    }

    let mut param_index = 0usize;
    for old_block in callee.basic_blocks() {
        let new_block = block_map[&old_block];
        for &old_inst in callee.block(old_block).insts() {
            let old_data = callee.inst(old_inst);
            let mut opcode = old_data.opcode;
            let mut operands: OperandList = old_data
                .operands
                .iter()
                .map(|op| match op {
                    Operand::Var(v) => Operand::Var(map_var(caller, callee, &mut var_map, prefix, *v)),
                    other => other.clone(),
                })
                .collect();
            let mut output = old_data
                .output
                .map(|v| map_var(caller, callee, &mut var_map, prefix, v));

            match opcode {
                Opcode::Param => {
                    if old_data.annotation.as_deref() == Some("return_pc") {
                        opcode = Opcode::Nop;
                        operands = OperandList::new();
                        output = None;
                    } else {
                        let arg = args.get(param_index).cloned().ok_or_else(|| {
                            CompilerPanic::new(format!(
                                "invoke of {} is missing argument {}",
                                callee.name, param_index
                            ))
                        })?;
                        param_index += 1;
                        opcode = Opcode::Assign;
                        operands = OperandList::from_iter([arg]);
                    }
                }
                Opcode::Palloca => {
                    // The placed offset becomes the pointer value.
                    opcode = Opcode::Assign;
                    operands = OperandList::from_iter([operands[0].clone()]);
                }
                Opcode::Ret => {
                    opcode = Opcode::Jmp;
                    operands = OperandList::from_iter([Operand::Label(return_label.clone())]);
                    output = None;
                }
                Opcode::Jmp | Opcode::Jnz | Opcode::Djmp | Opcode::Phi => {
                    for op in operands.iter_mut() {
                        if let Operand::Label(l) = op {
                            *op = Operand::Label(Label::new(format!("{prefix}{}", l.as_str())));
                        }
                    }
                }
                _ => {}
            }

            let new_inst = caller.make_inst(opcode, operands, output);
            {
                let src = old_data.ast_source;
                let msg = old_data.error_msg.clone();
                let ann = old_data.annotation.clone();
                let data = caller.inst_mut(new_inst);
                data.ast_source = src;
                data.error_msg = msg;
                data.annotation = ann;
            }
            let index = caller.block(new_block).len();
            caller.attach_inst(new_block, index, new_inst);
        }
    }

    // The call itself becomes a jump into the copied entry.
    let callee_entry_label = Label::new(format!(
        "{prefix}{}",
        callee.label_of(callee.entry()).as_str()
    ));
    let data = caller.inst_mut(invoke);
    data.opcode = Opcode::Jmp;
    data.operands = OperandList::from_iter([Operand::Label(callee_entry_label)]);
    data.output = None;
    Ok(())
}

fn map_var(
    caller: &mut Function,
    callee: &Function,
    var_map: &mut FxHashMap<Var, Var>,
    prefix: &str,
    var: Var,
) -> Var {
    if let Some(&mapped) = var_map.get(&var) {
        return mapped;
    }
    let name = format!("{prefix}{}", callee.var(var).name());
    let mapped = caller.named_variable(&name);
    var_map.insert(var, mapped);
    mapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CfgAnalysis;

    /// main invokes helper(x); helper stores its parameter and returns.
    fn build() -> (Context, Label, Label, Var) {
        let mut ctx = Context::new();
        let main = ctx.create_function("main");
        let helper = ctx.create_function("helper");

        let mut arg = None;
        {
            let func = ctx.get_function_mut(&main).unwrap();
            let entry = func.entry();
            let (_, x) = func.append_inst(entry, Opcode::Callvalue, []);
            arg = x;
            func.append_inst(
                entry,
                Opcode::Invoke,
                [Operand::Label(helper.clone()), Operand::Var(x.unwrap())],
            );
            func.append_inst(entry, Opcode::Stop, []);
        }
        {
            let func = ctx.get_function_mut(&helper).unwrap();
            let entry = func.entry();
            let (_, p) = func.append_inst(entry, Opcode::Param, []);
            func.append_inst(
                entry,
                Opcode::Mstore,
                [Operand::Var(p.unwrap()), Operand::lit(0u64)],
            );
            func.append_inst(entry, Opcode::Ret, []);
        }
        (ctx, main, helper, arg.unwrap())
    }

    #[test]
    fn single_site_callee_is_inlined_and_removed() {
        let (mut ctx, main, helper, arg) = build();
        run(&mut ctx).unwrap();

        assert!(ctx.get_function(&helper).is_none());
        let func = ctx.get_function(&main).unwrap();

        // No invoke remains; the call became a jump into the copy.
        for block in func.basic_blocks() {
            for &inst in func.block(block).insts() {
                assert_ne!(func.inst(inst).opcode, Opcode::Invoke);
            }
        }

        let copied_entry = func
            .get_basic_block(&Label::new("inline_0_helper"))
            .expect("inlined entry exists");
        let insts = func.block_insts(copied_entry);
        // param became an assignment of the argument.
        assert_eq!(func.inst(insts[0]).opcode, Opcode::Assign);
        assert_eq!(func.inst(insts[0]).operands[0], Operand::Var(arg));
        // ret became a jump to the continuation.
        let term = func.terminator(copied_entry).unwrap();
        assert_eq!(func.inst(term).opcode, Opcode::Jmp);

        // The whole function still has a coherent CFG.
        let cfg = CfgAnalysis::compute(func).unwrap();
        assert!(cfg.is_reachable(copied_entry));
    }

    #[test]
    fn multi_site_large_callees_stay() {
        let (mut ctx, main, helper, _) = build();
        // Add a second call site and enough bulk to defeat the small-
        // function policy.
        {
            let func = ctx.get_function_mut(&main).unwrap();
            let entry = func.entry();
            let term = func.terminator(entry).unwrap();
            func.detach_inst(term);
            let (_, y) = func.append_inst(entry, Opcode::Calldatasize, []);
            func.append_inst(
                entry,
                Opcode::Invoke,
                [Operand::Label(helper.clone()), Operand::Var(y.unwrap())],
            );
            func.attach_inst(entry, func.block(entry).len(), term);
        }
        {
            let func = ctx.get_function_mut(&helper).unwrap();
            let entry = func.entry();
            let term = func.terminator(entry).unwrap();
            func.detach_inst(term);
            for i in 0..SMALL_FUNCTION_COST as u64 {
                let (_, v) = func.append_inst(entry, Opcode::Calldataload, [Operand::lit(i * 32)]);
                func.append_inst(
                    entry,
                    Opcode::Mstore,
                    [Operand::Var(v.unwrap()), Operand::lit(i * 32)],
                );
            }
            func.attach_inst(entry, func.block(entry).len(), term);
        }

        run(&mut ctx).unwrap();
        assert!(ctx.get_function(&helper).is_some());
    }
}
