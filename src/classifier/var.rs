//! Method argument and local variable classifiers.

use crate::cache::CacheKey;
use crate::env::{ClassEnv, ClassEnvironment};
use crate::model::{Insn, InsnOperand, Side, VarId};

use super::util::{classes_potentially_equal, classify_position, compare_insns, vars_potentially_equal};
use super::{Classifier, ClassifierLevel, Ranker};
use ClassifierLevel::{Full, Initial, Intermediate};

pub fn ranker() -> Ranker<VarId> {
    Ranker::new(
        vec![
            Classifier::new("type", 10.0, Initial, var_type),
            Classifier::new("position", 3.0, Initial, position),
            Classifier::new("lvIndex", 2.0, Initial, lv_index),
            Classifier::new("startInsn", 2.0, Intermediate, lifetime_start),
            Classifier::new("usage", 4.0, Full, usage),
        ],
        vars_potentially_equal,
    )
}

fn var_type(env: &ClassEnvironment, a: VarId, b: VarId) -> f64 {
    if classes_potentially_equal(env, env.a().var(a).var_type, env.b().var(b).var_type) {
        1.0
    } else {
        0.0
    }
}

fn position(env: &ClassEnvironment, a: VarId, b: VarId) -> f64 {
    let (va, vb) = (env.a().var(a), env.b().var(b));
    classify_position(
        env,
        va.index,
        vb.index,
        env.a().method_vars(va.method, va.is_arg),
        env.b().method_vars(vb.method, vb.is_arg),
    )
}

fn lv_index(env: &ClassEnvironment, a: VarId, b: VarId) -> f64 {
    if env.a().var(a).lv_index == env.b().var(b).lv_index { 1.0 } else { 0.0 }
}

fn relative_start(classes: &ClassEnv, v: VarId) -> f64 {
    let var = classes.var(v);
    let len = classes.method(var.method).code.len();
    if len == 0 {
        return 0.0;
    }
    var.start_insn as f64 / len as f64
}

fn lifetime_start(env: &ClassEnvironment, a: VarId, b: VarId) -> f64 {
    (1.0 - (relative_start(env.a(), a) - relative_start(env.b(), b)).abs()).clamp(0.0, 1.0)
}

/// Instructions touching the variable's slot within its live range.
fn usage_insns(env: &ClassEnvironment, side: Side, v: VarId) -> Vec<Insn> {
    let classes = env.env(side);
    let var = classes.var(v);
    let code = &classes.method(var.method).code;
    let end = var.end_insn.min(code.len());
    let start = var.start_insn.min(end);
    code[start..end]
        .iter()
        .filter(|insn| matches!(insn.operand, InsnOperand::Local(slot) if slot == var.lv_index))
        .cloned()
        .collect()
}

fn usage(env: &ClassEnvironment, a: VarId, b: VarId) -> f64 {
    env.graph().cache().get_or_compute(CacheKey::VarUsage(a, b), || {
        compare_insns(env, &usage_insns(env, Side::A, a), &usage_insns(env, Side::B, b))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Operand, opcodes};
    use crate::classfile::{ClassMember, LocalVariable};
    use crate::classifier::fixtures::{class, code, environment, member};

    const IADD: u8 = 0x60;
    const ISTORE: u8 = 0x36;

    fn with_local(name: &str, desc: &str, insns: Vec<(u8, Operand)>, local: LocalVariable) -> ClassMember {
        let mut body = code(insns);
        body.local_variables.push(local);
        member(name, desc, Some(body))
    }

    fn local(index: u16, start_pc: u16) -> LocalVariable {
        LocalVariable {
            start_pc,
            length: 2,
            name: "t".into(),
            descriptor: "I".into(),
            index,
        }
    }

    /// A: `a.d(II)V` with local slot 3; B: `c.e(IJ)V` with local slot 4.
    fn sample() -> (ClassEnvironment, [VarId; 3], [VarId; 3]) {
        let env = environment(
            vec![class(
                "a",
                Vec::new(),
                vec![with_local(
                    "d",
                    "(II)V",
                    vec![
                        (opcodes::ILOAD, Operand::Local(1)),
                        (opcodes::ILOAD, Operand::Local(2)),
                        (IADD, Operand::None),
                        (ISTORE, Operand::Local(3)),
                        (opcodes::ILOAD, Operand::Local(3)),
                        (opcodes::RETURN, Operand::None),
                    ],
                    local(3, 3),
                )],
            )],
            vec![class(
                "c",
                Vec::new(),
                vec![with_local(
                    "e",
                    "(IJ)V",
                    vec![
                        (opcodes::ILOAD, Operand::Local(1)),
                        (opcodes::ILOAD, Operand::Local(1)),
                        (ISTORE, Operand::Local(4)),
                        (opcodes::ILOAD, Operand::Local(4)),
                        (opcodes::RETURN, Operand::None),
                    ],
                    local(4, 2),
                )],
            )],
        );
        let vars = |classes: &ClassEnv, owner: &str, id: &str| {
            let m = classes.method(classes.method_by_id(classes.class_by_name(owner).unwrap(), id).unwrap());
            [m.args[0], m.args[1], m.vars[0]]
        };
        let va = vars(env.a(), "a", "d(II)V");
        let vb = vars(env.b(), "c", "e(IJ)V");
        (env, va, vb)
    }

    #[test]
    fn type_and_slot_comparisons() {
        let (env, [a0, a1, at], [b0, b1, bt]) = sample();
        assert_eq!(var_type(&env, a0, b0), 1.0);
        assert_eq!(var_type(&env, a1, b1), 0.0);
        assert_eq!(var_type(&env, at, bt), 1.0);
        assert_eq!(lv_index(&env, a0, b0), 1.0);
        assert_eq!(lv_index(&env, at, bt), 0.0);
    }

    #[test]
    fn position_within_argument_list() {
        let (env, [a0, a1, _], [b0, b1, _]) = sample();
        assert_eq!(position(&env, a0, b0), 1.0);
        assert_eq!(position(&env, a1, b1), 1.0);
        assert_eq!(position(&env, a0, b1), 0.0);
    }

    #[test]
    fn usage_compares_slot_accesses_in_live_range() {
        let (env, [a0, _, at], [b0, _, bt]) = sample();
        assert_eq!(usage(&env, at, bt), 1.0);
        assert_eq!(usage(&env, a0, b0), 0.5);
    }

    #[test]
    fn ranker_weights_by_level() {
        let ranker = ranker();
        assert_eq!(ranker.max_score(Initial), 15.0);
        assert_eq!(ranker.max_score(Intermediate), 17.0);
        assert_eq!(ranker.max_score(Full), 21.0);
    }
}
