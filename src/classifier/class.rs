//! Class classifiers.

use crate::cache::CacheKey;
use crate::classfile::access;
use crate::env::ClassEnvironment;
use crate::model::{ClassId, FieldId, MethodId, Side};

use super::util::{
    classes_potentially_equal, compare_bits, compare_counts, compare_identity_sets, compare_lists,
    compare_sets, compare_sites, fields_potentially_equal, methods_potentially_equal,
};
use super::{Classifier, ClassifierLevel, FIELD_RANKER, METHOD_RANKER, Ranker, check_rank, max_mismatch};
use ClassifierLevel::{Extra, Full, Initial, Intermediate};

const TYPE_MASK: u16 = access::ENUM | access::INTERFACE | access::ANNOTATION | access::ABSTRACT;

pub fn ranker() -> Ranker<ClassId> {
    Ranker::new(
        vec![
            Classifier::new("classTypeCheck", 20.0, Initial, class_type_check),
            Classifier::new("signature", 5.0, Initial, signature),
            Classifier::new("hierarchyDepth", 1.0, Initial, hierarchy_depth),
            Classifier::new("parentClass", 4.0, Initial, parent_class),
            Classifier::new("childClasses", 3.0, Initial, child_classes),
            Classifier::new("interfaces", 3.0, Initial, interfaces),
            Classifier::new("implementers", 2.0, Initial, implementers),
            Classifier::new("outerClass", 6.0, Initial, outer_class),
            Classifier::new("innerClasses", 5.0, Initial, inner_classes),
            Classifier::new("methodCount", 3.0, Initial, method_count),
            Classifier::new("fieldCount", 3.0, Initial, field_count),
            Classifier::new("hierarchySiblings", 2.0, Initial, hierarchy_siblings),
            Classifier::new("similarMethods", 10.0, Initial, similar_methods),
            Classifier::new("outReferences", 6.0, Initial, out_references),
            Classifier::new("inReferences", 6.0, Initial, in_references),
            Classifier::new("stringConstants", 8.0, Initial, string_constants),
            Classifier::new("numericConstants", 6.0, Initial, numeric_constants),
            Classifier::new("methodOutReferences", 5.0, Intermediate, method_out_references),
            Classifier::new("methodInReferences", 6.0, Intermediate, method_in_references),
            Classifier::new("fieldReadReferences", 5.0, Intermediate, field_read_references),
            Classifier::new("fieldWriteReferences", 5.0, Intermediate, field_write_references),
            Classifier::new("membersFull", 10.0, Full, members_full),
            Classifier::new("inRefsBci", 6.0, Extra, in_refs_bci),
        ],
        classes_potentially_equal,
    )
}

fn optional_class(env: &ClassEnvironment, a: Option<ClassId>, b: Option<ClassId>) -> f64 {
    match (a, b) {
        (None, None) => 1.0,
        (Some(a), Some(b)) if classes_potentially_equal(env, a, b) => 1.0,
        _ => 0.0,
    }
}

fn class_type_check(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    compare_bits(env.a().class(a).access, env.b().class(b).access, TYPE_MASK)
}

#[derive(Debug, PartialEq)]
enum SigToken<'a> {
    Class(&'a str),
    TypeVar,
    Other(char),
}

fn tokenize_signature(sig: &str) -> Vec<SigToken<'_>> {
    let mut tokens = Vec::new();
    let mut rest = sig;
    while let Some(c) = rest.chars().next() {
        match c {
            'L' | 'T' => {
                let end = rest.find([';', '<', ':']).unwrap_or(rest.len());
                // formal type parameters are followed by their bound
                if c == 'T' || rest[end..].starts_with(':') {
                    tokens.push(SigToken::TypeVar);
                } else {
                    tokens.push(SigToken::Class(&rest[1..end]));
                }
                rest = rest[end..].strip_prefix(';').unwrap_or(&rest[end..]);
            }
            _ => {
                tokens.push(SigToken::Other(c));
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    tokens
}

fn signature(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    let (Some(sig_a), Some(sig_b)) = (&env.a().class(a).signature, &env.b().class(b).signature) else {
        let (sa, sb) = (&env.a().class(a).signature, &env.b().class(b).signature);
        return if sa.is_none() && sb.is_none() { 1.0 } else { 0.0 };
    };
    let (tokens_a, tokens_b) = (tokenize_signature(sig_a), tokenize_signature(sig_b));
    compare_lists(&tokens_a, &tokens_b, |x, y| match (x, y) {
        (SigToken::Class(na), SigToken::Class(nb)) => {
            match (env.a().class_by_name(na), env.b().class_by_name(nb)) {
                (Some(ca), Some(cb)) => classes_potentially_equal(env, ca, cb),
                _ => na == nb,
            }
        }
        _ => x == y,
    })
}

fn hierarchy_depth(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    compare_counts(env.a().hierarchy_depth(a), env.b().hierarchy_depth(b))
}

fn parent_class(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    optional_class(env, env.a().class(a).super_class, env.b().class(b).super_class)
}

fn child_classes(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    compare_identity_sets(env, &env.a().class(a).children, &env.b().class(b).children, classes_potentially_equal)
}

fn interfaces(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    compare_identity_sets(env, &env.a().class(a).interfaces, &env.b().class(b).interfaces, classes_potentially_equal)
}

fn implementers(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    compare_identity_sets(
        env,
        &env.a().class(a).implementers,
        &env.b().class(b).implementers,
        classes_potentially_equal,
    )
}

fn outer_class(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    optional_class(env, env.a().class(a).outer, env.b().class(b).outer)
}

fn inner_classes(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    compare_identity_sets(env, &env.a().class(a).inner, &env.b().class(b).inner, classes_potentially_equal)
}

fn method_count(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    compare_counts(env.a().class(a).methods.len(), env.b().class(b).methods.len())
}

fn field_count(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    compare_counts(env.a().class(a).fields.len(), env.b().class(b).fields.len())
}

fn sibling_count(env: &ClassEnvironment, side: Side, cls: ClassId) -> usize {
    let classes = env.env(side);
    classes
        .class(cls)
        .super_class
        .map_or(0, |parent| classes.class(parent).children.len().saturating_sub(1))
}

fn hierarchy_siblings(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    compare_counts(sibling_count(env, Side::A, a), sibling_count(env, Side::B, b))
}

fn real_methods(env: &ClassEnvironment, side: Side, cls: ClassId) -> Vec<MethodId> {
    let classes = env.env(side);
    classes.class(cls).methods.iter().copied().filter(|&m| classes.method(m).real).collect()
}

fn similar_methods(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    let (methods_a, methods_b) = (real_methods(env, Side::A, a), real_methods(env, Side::B, b));
    let max = methods_a.len().max(methods_b.len());
    if max == 0 {
        return 1.0;
    }

    let mut total = 0.0;
    for &ma in &methods_a {
        let method_a = env.a().method(ma);
        let arg_types_a: Vec<ClassId> = method_a.args.iter().map(|&v| env.a().var(v).var_type).collect();
        let best = methods_b
            .iter()
            .filter(|&&mb| methods_potentially_equal(env, ma, mb))
            .map(|&mb| {
                let method_b = env.b().method(mb);
                let arg_types_b: Vec<ClassId> = method_b.args.iter().map(|&v| env.b().var(v).var_type).collect();
                let ret = if classes_potentially_equal(env, method_a.ret_type, method_b.ret_type) { 1.0 } else { 0.0 };
                let args = compare_lists(&arg_types_a, &arg_types_b, |&x, &y| classes_potentially_equal(env, x, y));
                (ret + args) / 2.0
            })
            .fold(0.0, f64::max);
        total += best;
    }
    (total / max as f64).clamp(0.0, 1.0)
}

fn referenced_classes(env: &ClassEnvironment, side: Side, cls: ClassId) -> Vec<ClassId> {
    let classes = env.env(side);
    let mut out = Vec::new();
    for &m in &classes.class(cls).methods {
        let method = classes.method(m);
        out.extend(method.class_refs.iter().copied());
        out.extend(method.refs_out.iter().map(|&t| classes.method(t).owner));
        out.extend(method.field_reads.iter().chain(&method.field_writes).map(|&f| classes.field(f).owner));
    }
    out.sort();
    out.dedup();
    out.retain(|&c| c != cls);
    out
}

fn referencing_classes(env: &ClassEnvironment, side: Side, cls: ClassId) -> Vec<ClassId> {
    let classes = env.env(side);
    let class = classes.class(cls);
    let mut out = Vec::new();
    for &m in &class.methods {
        out.extend(classes.method(m).refs_in.iter().map(|&s| classes.method(s).owner));
    }
    for &f in &class.fields {
        let field = classes.field(f);
        out.extend(field.read_refs.iter().chain(&field.write_refs).map(|&s| classes.method(s).owner));
    }
    out.sort();
    out.dedup();
    out.retain(|&c| c != cls);
    out
}

fn out_references(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    let (refs_a, refs_b) = (referenced_classes(env, Side::A, a), referenced_classes(env, Side::B, b));
    compare_identity_sets(env, &refs_a, &refs_b, classes_potentially_equal)
}

fn in_references(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    let (refs_a, refs_b) = (referencing_classes(env, Side::A, a), referencing_classes(env, Side::B, b));
    compare_identity_sets(env, &refs_a, &refs_b, classes_potentially_equal)
}

fn string_constants(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    compare_sets(&env.a().class(a).strings, &env.b().class(b).strings)
}

fn numeric_constants(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    compare_sets(&env.a().class(a).numbers, &env.b().class(b).numbers)
}

fn collect_methods(
    env: &ClassEnvironment,
    side: Side,
    cls: ClassId,
    select: impl Fn(&crate::model::MethodInstance) -> &[MethodId],
) -> Vec<MethodId> {
    let classes = env.env(side);
    let mut out: Vec<MethodId> = classes
        .class(cls)
        .methods
        .iter()
        .flat_map(|&m| select(classes.method(m)).iter().copied())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn method_out_references(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    let refs_a = collect_methods(env, Side::A, a, |m| &m.refs_out);
    let refs_b = collect_methods(env, Side::B, b, |m| &m.refs_out);
    compare_identity_sets(env, &refs_a, &refs_b, methods_potentially_equal)
}

fn method_in_references(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    let refs_a = collect_methods(env, Side::A, a, |m| &m.refs_in);
    let refs_b = collect_methods(env, Side::B, b, |m| &m.refs_in);
    compare_identity_sets(env, &refs_a, &refs_b, methods_potentially_equal)
}

fn collect_fields(
    env: &ClassEnvironment,
    side: Side,
    cls: ClassId,
    select: impl Fn(&crate::model::MethodInstance) -> &[FieldId],
) -> Vec<FieldId> {
    let classes = env.env(side);
    let mut out: Vec<FieldId> = classes
        .class(cls)
        .methods
        .iter()
        .flat_map(|&m| select(classes.method(m)).iter().copied())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn field_read_references(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    let reads_a = collect_fields(env, Side::A, a, |m| &m.field_reads);
    let reads_b = collect_fields(env, Side::B, b, |m| &m.field_reads);
    compare_identity_sets(env, &reads_a, &reads_b, fields_potentially_equal)
}

fn field_write_references(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    let writes_a = collect_fields(env, Side::A, a, |m| &m.field_writes);
    let writes_b = collect_fields(env, Side::B, b, |m| &m.field_writes);
    compare_identity_sets(env, &writes_a, &writes_b, fields_potentially_equal)
}

/// Share of members of `a` that rank confidently against the members of
/// `b` at the full level.
fn members_full(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    env.graph()
        .cache()
        .get_or_compute(CacheKey::MembersFull(a, b), || compute_members_full(env, a, b))
}

fn compute_members_full(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    let (class_a, class_b) = (env.a().class(a), env.b().class(b));
    let total = class_a.methods.len() + class_a.fields.len();
    if total == 0 {
        return 1.0;
    }

    let config = env.thresholds();
    let mut accepted = 0usize;

    let method_max = METHOD_RANKER.max_score(Full);
    let method_mismatch = max_mismatch(method_max, config.methods.absolute, config.methods.relative);
    for &m in &class_a.methods {
        match METHOD_RANKER.rank(env, m, &class_b.methods, Full, method_mismatch) {
            Ok(ranking) => {
                if check_rank(&ranking, config.methods.absolute, config.methods.relative, method_max) {
                    accepted += 1;
                }
            }
            Err(_) => return f64::NAN,
        }
    }

    let field_max = FIELD_RANKER.max_score(Full);
    let field_mismatch = max_mismatch(field_max, config.fields.absolute, config.fields.relative);
    for &f in &class_a.fields {
        match FIELD_RANKER.rank(env, f, &class_b.fields, Full, field_mismatch) {
            Ok(ranking) => {
                if check_rank(&ranking, config.fields.absolute, config.fields.relative, field_max) {
                    accepted += 1;
                }
            }
            Err(_) => return f64::NAN,
        }
    }

    accepted as f64 / total as f64
}

fn in_refs_bci(env: &ClassEnvironment, a: ClassId, b: ClassId) -> f64 {
    let sites = |side: Side, cls: ClassId| -> Vec<(MethodId, f64)> {
        let classes = env.env(side);
        classes
            .class(cls)
            .methods
            .iter()
            .flat_map(|&m| classes.method(m).in_ref_sites.iter().copied())
            .collect()
    };
    compare_sites(env, &sites(Side::A, a), &sites(Side::B, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Operand, opcodes};
    use crate::classifier::fixtures::{self, class, environment, member};
    use crate::config::{MatcherConfig, Thresholds};
    use crate::matcher::Matcher;

    fn single_method(name: &str) -> crate::classfile::ClassFile {
        let body = fixtures::code(vec![(opcodes::RETURN, Operand::None)]);
        class(name, Vec::new(), vec![member("d", "()V", Some(body))])
    }

    #[test]
    fn members_full_uses_configured_thresholds() {
        let members_full = |config: MatcherConfig| {
            let matcher = Matcher::new(environment(vec![single_method("a")], vec![single_method("c")]), config);
            let env = matcher.env();
            let (a, c) = (env.a().class_by_name("a").unwrap(), env.b().class_by_name("c").unwrap());
            compute_members_full(env, a, c)
        };

        assert_eq!(members_full(MatcherConfig::default()), 1.0);
        let unreachable = MatcherConfig {
            methods: Thresholds::new(1.1, 0.0),
            ..MatcherConfig::default()
        };
        assert_eq!(members_full(unreachable), 0.0);
    }

    #[test]
    fn signature_tokens_split_classes_and_type_vars() {
        let tokens = tokenize_signature("<T:Ljava/lang/Object;>Ljava/util/List<TT;>;");
        assert_eq!(
            tokens,
            vec![
                SigToken::Other('<'),
                SigToken::TypeVar,
                SigToken::Other(':'),
                SigToken::Class("java/lang/Object"),
                SigToken::Other('>'),
                SigToken::Class("java/util/List"),
                SigToken::Other('<'),
                SigToken::TypeVar,
                SigToken::Other('>'),
                SigToken::Other(';'),
            ]
        );
    }

    #[test]
    fn ranker_weights_by_level() {
        let ranker = ranker();
        assert_eq!(ranker.max_score(Initial), 93.0);
        assert_eq!(ranker.max_score(Intermediate), 114.0);
        assert_eq!(ranker.max_score(Full), 124.0);
        assert_eq!(ranker.max_score(Extra), 130.0);
    }
}
