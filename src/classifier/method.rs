//! Method classifiers.

use crate::cache::CacheKey;
use crate::classfile::access;
use crate::env::ClassEnvironment;
use crate::model::{ClassId, MethodId};

use super::util::{
    classes_potentially_equal, classify_position, compare_bits, compare_identity_sets, compare_insns,
    compare_lists, compare_sets, compare_sites, fields_potentially_equal, methods_potentially_equal,
};
use super::{Classifier, ClassifierLevel, Ranker};
use ClassifierLevel::{Extra, Full, Initial, Intermediate};

const TYPE_MASK: u16 = access::STATIC | access::NATIVE | access::ABSTRACT;
const ACCESS_MASK: u16 = access::PUBLIC
    | access::PROTECTED
    | access::PRIVATE
    | access::FINAL
    | access::SYNCHRONIZED
    | access::BRIDGE
    | access::VARARGS
    | access::SYNTHETIC;

pub fn ranker() -> Ranker<MethodId> {
    Ranker::new(
        vec![
            Classifier::new("methodTypeCheck", 10.0, Initial, type_check),
            Classifier::new("accessFlags", 4.0, Initial, access_flags),
            Classifier::new("argTypes", 10.0, Initial, arg_types),
            Classifier::new("retType", 5.0, Initial, ret_type),
            Classifier::new("classRefs", 3.0, Initial, class_refs),
            Classifier::new("stringConstants", 5.0, Initial, string_constants),
            Classifier::new("numericConstants", 5.0, Initial, numeric_constants),
            Classifier::new("position", 3.0, Initial, position),
            Classifier::new("outReferences", 6.0, Intermediate, out_references),
            Classifier::new("inReferences", 6.0, Intermediate, in_references),
            Classifier::new("fieldReads", 5.0, Intermediate, field_reads),
            Classifier::new("fieldWrites", 5.0, Intermediate, field_writes),
            Classifier::new("code", 12.0, Full, code),
            Classifier::new("inRefsBci", 6.0, Extra, in_refs_bci),
        ],
        methods_potentially_equal,
    )
}

fn type_check(env: &ClassEnvironment, a: MethodId, b: MethodId) -> f64 {
    compare_bits(env.a().method(a).access, env.b().method(b).access, TYPE_MASK)
}

fn access_flags(env: &ClassEnvironment, a: MethodId, b: MethodId) -> f64 {
    compare_bits(env.a().method(a).access, env.b().method(b).access, ACCESS_MASK)
}

fn arg_types(env: &ClassEnvironment, a: MethodId, b: MethodId) -> f64 {
    let types_a: Vec<ClassId> = env.a().method(a).args.iter().map(|&v| env.a().var(v).var_type).collect();
    let types_b: Vec<ClassId> = env.b().method(b).args.iter().map(|&v| env.b().var(v).var_type).collect();
    compare_lists(&types_a, &types_b, |&x, &y| classes_potentially_equal(env, x, y))
}

fn ret_type(env: &ClassEnvironment, a: MethodId, b: MethodId) -> f64 {
    if classes_potentially_equal(env, env.a().method(a).ret_type, env.b().method(b).ret_type) {
        1.0
    } else {
        0.0
    }
}

fn class_refs(env: &ClassEnvironment, a: MethodId, b: MethodId) -> f64 {
    compare_identity_sets(
        env,
        &env.a().method(a).class_refs,
        &env.b().method(b).class_refs,
        classes_potentially_equal,
    )
}

fn string_constants(env: &ClassEnvironment, a: MethodId, b: MethodId) -> f64 {
    compare_sets(&env.a().method(a).strings, &env.b().method(b).strings)
}

fn numeric_constants(env: &ClassEnvironment, a: MethodId, b: MethodId) -> f64 {
    compare_sets(&env.a().method(a).numbers, &env.b().method(b).numbers)
}

fn position(env: &ClassEnvironment, a: MethodId, b: MethodId) -> f64 {
    let (ma, mb) = (env.a().method(a), env.b().method(b));
    classify_position(
        env,
        ma.position,
        mb.position,
        &env.a().class(ma.owner).methods,
        &env.b().class(mb.owner).methods,
    )
}

fn out_references(env: &ClassEnvironment, a: MethodId, b: MethodId) -> f64 {
    compare_identity_sets(env, &env.a().method(a).refs_out, &env.b().method(b).refs_out, methods_potentially_equal)
}

fn in_references(env: &ClassEnvironment, a: MethodId, b: MethodId) -> f64 {
    compare_identity_sets(env, &env.a().method(a).refs_in, &env.b().method(b).refs_in, methods_potentially_equal)
}

fn field_reads(env: &ClassEnvironment, a: MethodId, b: MethodId) -> f64 {
    compare_identity_sets(
        env,
        &env.a().method(a).field_reads,
        &env.b().method(b).field_reads,
        fields_potentially_equal,
    )
}

fn field_writes(env: &ClassEnvironment, a: MethodId, b: MethodId) -> f64 {
    compare_identity_sets(
        env,
        &env.a().method(a).field_writes,
        &env.b().method(b).field_writes,
        fields_potentially_equal,
    )
}

fn code(env: &ClassEnvironment, a: MethodId, b: MethodId) -> f64 {
    env.graph().cache().get_or_compute(CacheKey::MethodCode(a, b), || {
        compare_insns(env, &env.a().method(a).code, &env.b().method(b).code)
    })
}

fn in_refs_bci(env: &ClassEnvironment, a: MethodId, b: MethodId) -> f64 {
    compare_sites(env, &env.a().method(a).in_ref_sites, &env.b().method(b).in_ref_sites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Operand, opcodes};
    use crate::classifier::fixtures::{self, class, environment, member};

    const IADD: u8 = 0x60;
    const ICONST_1: u8 = 0x04;

    /// A: `a{d(IJ)V, e(I)I, f()V}`; B: `c{g(I)I, h(IJ)V}`.
    fn sample() -> (ClassEnvironment, [MethodId; 3], [MethodId; 2]) {
        let ret = || Some(fixtures::code(vec![(opcodes::RETURN, Operand::None)]));
        let env = environment(
            vec![class(
                "a",
                Vec::new(),
                vec![
                    member("d", "(IJ)V", ret()),
                    member(
                        "e",
                        "(I)I",
                        Some(fixtures::code(vec![(opcodes::ILOAD, Operand::Local(1)), (opcodes::IRETURN, Operand::None)])),
                    ),
                    member("f", "()V", ret()),
                ],
            )],
            vec![class(
                "c",
                Vec::new(),
                vec![
                    member(
                        "g",
                        "(I)I",
                        Some(fixtures::code(vec![
                            (opcodes::ILOAD, Operand::Local(1)),
                            (ICONST_1, Operand::None),
                            (IADD, Operand::None),
                            (opcodes::IRETURN, Operand::None),
                        ])),
                    ),
                    member("h", "(IJ)V", ret()),
                ],
            )],
        );
        let (a, c) = (env.a().class_by_name("a").unwrap(), env.b().class_by_name("c").unwrap());
        let ma = ["d(IJ)V", "e(I)I", "f()V"].map(|id| env.a().method_by_id(a, id).unwrap());
        let mb = ["g(I)I", "h(IJ)V"].map(|id| env.b().method_by_id(c, id).unwrap());
        (env, ma, mb)
    }

    #[test]
    fn position_compares_relative_declaration_order() {
        let (env, [d, e, f], [_, h]) = sample();
        assert_eq!(position(&env, d, h), 0.0);
        assert_eq!(position(&env, e, h), 0.5);
        assert_eq!(position(&env, f, h), 1.0);
    }

    #[test]
    fn arg_types_use_edit_distance() {
        let (env, [d, e, f], [g, h]) = sample();
        assert_eq!(arg_types(&env, d, h), 1.0);
        assert_eq!(arg_types(&env, e, h), 0.5);
        assert_eq!(arg_types(&env, f, g), 0.0);
        assert_eq!(ret_type(&env, e, g), 1.0);
        assert_eq!(ret_type(&env, f, g), 0.0);
    }

    #[test]
    fn code_similarity_counts_instruction_edits() {
        let (env, [d, e, _], [g, h]) = sample();
        assert_eq!(code(&env, d, h), 1.0);
        assert_eq!(code(&env, e, g), 0.5);
        assert_eq!(code(&env, d, g), 0.0);
    }

    #[test]
    fn ranker_weights_by_level() {
        let ranker = ranker();
        assert_eq!(ranker.max_score(Initial), 45.0);
        assert_eq!(ranker.max_score(Intermediate), 67.0);
        assert_eq!(ranker.max_score(Full), 79.0);
        assert_eq!(ranker.max_score(Extra), 85.0);
    }

    #[test]
    fn access_mask_covers_eight_flags() {
        assert_eq!(ACCESS_MASK.count_ones(), 8);
        assert_eq!(TYPE_MASK.count_ones(), 3);
    }
}
