//! Field classifiers.

use crate::cache::CacheKey;
use crate::classfile::access;
use crate::env::ClassEnvironment;
use crate::model::FieldId;

use super::util::{
    classes_potentially_equal, classify_position, compare_bits, compare_identity_sets, compare_insns,
    compare_sets, compare_sites, fields_potentially_equal, methods_potentially_equal,
};
use super::{Classifier, ClassifierLevel, Ranker};
use ClassifierLevel::{Extra, Full, Initial, Intermediate};

const TYPE_MASK: u16 = access::STATIC;
const ACCESS_MASK: u16 =
    access::PUBLIC | access::PROTECTED | access::PRIVATE | access::FINAL | access::VOLATILE | access::TRANSIENT;

pub fn ranker() -> Ranker<FieldId> {
    Ranker::new(
        vec![
            Classifier::new("fieldTypeCheck", 10.0, Initial, type_check),
            Classifier::new("accessFlags", 4.0, Initial, access_flags),
            Classifier::new("type", 10.0, Initial, field_type),
            Classifier::new("position", 3.0, Initial, position),
            Classifier::new("initValue", 7.0, Initial, init_value),
            Classifier::new("initStrings", 8.0, Initial, init_strings),
            Classifier::new("initNumbers", 8.0, Initial, init_numbers),
            Classifier::new("readReferences", 6.0, Intermediate, read_references),
            Classifier::new("writeReferences", 6.0, Intermediate, write_references),
            Classifier::new("initCode", 10.0, Full, init_code),
            Classifier::new("readRefsBci", 6.0, Extra, read_refs_bci),
            Classifier::new("writeRefsBci", 6.0, Extra, write_refs_bci),
        ],
        fields_potentially_equal,
    )
}

fn type_check(env: &ClassEnvironment, a: FieldId, b: FieldId) -> f64 {
    compare_bits(env.a().field(a).access, env.b().field(b).access, TYPE_MASK)
}

fn access_flags(env: &ClassEnvironment, a: FieldId, b: FieldId) -> f64 {
    compare_bits(env.a().field(a).access, env.b().field(b).access, ACCESS_MASK)
}

fn field_type(env: &ClassEnvironment, a: FieldId, b: FieldId) -> f64 {
    if classes_potentially_equal(env, env.a().field(a).field_type, env.b().field(b).field_type) {
        1.0
    } else {
        0.0
    }
}

fn position(env: &ClassEnvironment, a: FieldId, b: FieldId) -> f64 {
    let (fa, fb) = (env.a().field(a), env.b().field(b));
    classify_position(
        env,
        fa.position,
        fb.position,
        &env.a().class(fa.owner).fields,
        &env.b().class(fb.owner).fields,
    )
}

fn init_value(env: &ClassEnvironment, a: FieldId, b: FieldId) -> f64 {
    match (&env.a().field(a).init_value, &env.b().field(b).init_value) {
        (None, None) => 1.0,
        (Some(x), Some(y)) if x == y => 1.0,
        _ => 0.0,
    }
}

fn init_strings(env: &ClassEnvironment, a: FieldId, b: FieldId) -> f64 {
    compare_sets(&env.a().field(a).init_strings, &env.b().field(b).init_strings)
}

fn init_numbers(env: &ClassEnvironment, a: FieldId, b: FieldId) -> f64 {
    compare_sets(&env.a().field(a).init_numbers, &env.b().field(b).init_numbers)
}

fn read_references(env: &ClassEnvironment, a: FieldId, b: FieldId) -> f64 {
    compare_identity_sets(env, &env.a().field(a).read_refs, &env.b().field(b).read_refs, methods_potentially_equal)
}

fn write_references(env: &ClassEnvironment, a: FieldId, b: FieldId) -> f64 {
    compare_identity_sets(env, &env.a().field(a).write_refs, &env.b().field(b).write_refs, methods_potentially_equal)
}

fn init_code(env: &ClassEnvironment, a: FieldId, b: FieldId) -> f64 {
    env.graph().cache().get_or_compute(CacheKey::FieldInitCode(a, b), || {
        compare_insns(env, &env.a().field(a).init_code, &env.b().field(b).init_code)
    })
}

fn read_refs_bci(env: &ClassEnvironment, a: FieldId, b: FieldId) -> f64 {
    compare_sites(env, &env.a().field(a).read_sites, &env.b().field(b).read_sites)
}

fn write_refs_bci(env: &ClassEnvironment, a: FieldId, b: FieldId) -> f64 {
    compare_sites(env, &env.a().field(a).write_sites, &env.b().field(b).write_sites)
}
