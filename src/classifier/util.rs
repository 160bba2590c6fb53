//! Comparison helpers and potential-equality rules shared by all
//! classifiers. Subjects are always on side A, candidates on side B.

use std::collections::BTreeSet;

use crate::env::ClassEnvironment;
use crate::graph::EntityHandle;
use crate::model::{ClassId, FieldId, Insn, InsnOperand, MethodId, Side, VarId};

pub fn compare_counts(a: usize, b: usize) -> f64 {
    let max = a.max(b);
    if max == 0 {
        return 1.0;
    }
    1.0 - a.abs_diff(b) as f64 / max as f64
}

/// Jaccard similarity; two empty sets are identical.
pub fn compare_sets<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let shared = a.intersection(b).count();
    let total = a.len() + b.len() - shared;
    if total == 0 {
        return 1.0;
    }
    shared as f64 / total as f64
}

pub fn compare_bits(a: u16, b: u16, mask: u16) -> f64 {
    let bits = mask.count_ones();
    1.0 - ((a ^ b) & mask).count_ones() as f64 / bits as f64
}

/// Compares two entity sets: matched entries count as shared when their
/// match is present on the other side, unmatched ones when any entry on
/// the other side could still become their match.
pub fn compare_identity_sets<H: EntityHandle>(
    env: &ClassEnvironment,
    a: &[H],
    b: &[H],
    potentially_equal: fn(&ClassEnvironment, H, H) -> bool,
) -> f64 {
    if a.is_empty() || b.is_empty() {
        return if a.is_empty() && b.is_empty() { 1.0 } else { 0.0 };
    }

    let total = a.len() + b.len();
    let mut rest_b: Vec<H> = b.to_vec();
    let mut rest_a: Vec<H> = Vec::new();
    let mut mismatched = 0usize;

    for &x in a {
        match env.match_of(Side::A, x) {
            Some(m) => match rest_b.iter().position(|&y| y == m) {
                Some(pos) => {
                    rest_b.swap_remove(pos);
                }
                None => mismatched += 1,
            },
            None => rest_a.push(x),
        }
    }

    for &x in &rest_a {
        if !rest_b.iter().any(|&y| potentially_equal(env, x, y)) {
            mismatched += 1;
        }
    }
    for &y in &rest_b {
        if !rest_a.iter().any(|&x| potentially_equal(env, x, y)) {
            mismatched += 1;
        }
    }

    (total - mismatched) as f64 / total as f64
}

/// `1 - levenshtein / max_len` with a custom element equality.
pub fn compare_lists<T>(a: &[T], b: &[T], eq: impl Fn(&T, &T) -> bool) -> f64 {
    let max = a.len().max(b.len());
    if max == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b, eq) as f64 / max as f64
}

pub fn levenshtein<T>(a: &[T], b: &[T], eq: impl Fn(&T, &T) -> bool) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for (i, x) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            let cost = usize::from(!eq(x, y));
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

fn relative_position(position: usize, size: usize) -> f64 {
    if size <= 1 {
        return 0.5;
    }
    position as f64 / (size - 1) as f64
}

/// Compares declaration positions relative to the closest matched
/// neighbours, falling back to the whole sibling list.
pub fn classify_position<H: EntityHandle>(
    env: &ClassEnvironment,
    pos_a: usize,
    pos_b: usize,
    siblings_a: &[H],
    siblings_b: &[H],
) -> f64 {
    if pos_a == pos_b && siblings_a.len() == siblings_b.len() {
        return 1.0;
    }

    let position_in_b = |h: H| siblings_b.iter().position(|&x| x == h);
    let (mut start_a, mut start_b) = (0usize, 0usize);
    let (mut end_a, mut end_b) = (siblings_a.len(), siblings_b.len());

    if let Some((i, m)) = (0..pos_a)
        .rev()
        .find_map(|i| env.match_of(Side::A, siblings_a[i]).map(|m| (i, m)))
        && let Some(p) = position_in_b(m)
    {
        start_a = i + 1;
        start_b = p + 1;
    }
    if let Some((i, m)) = (pos_a + 1..siblings_a.len())
        .find_map(|i| env.match_of(Side::A, siblings_a[i]).map(|m| (i, m)))
        && let Some(p) = position_in_b(m)
    {
        end_a = i;
        end_b = p;
    }

    if start_b >= end_b || start_b > pos_b || end_b <= pos_b || start_a >= end_a {
        start_a = 0;
        start_b = 0;
        end_a = siblings_a.len();
        end_b = siblings_b.len();
    }

    let rel_a = relative_position(pos_a - start_a, end_a - start_a);
    let rel_b = relative_position(pos_b - start_b, end_b - start_b);
    (1.0 - (rel_a - rel_b).abs()).clamp(0.0, 1.0)
}

/// Instruction similarity with operands compared through the match graph.
pub fn compare_insns(env: &ClassEnvironment, a: &[Insn], b: &[Insn]) -> f64 {
    compare_lists(a, b, |x, y| insns_equal(env, x, y))
}

fn insns_equal(env: &ClassEnvironment, a: &Insn, b: &Insn) -> bool {
    if a.opcode != b.opcode {
        return false;
    }
    match (&a.operand, &b.operand) {
        (InsnOperand::Class(x), InsnOperand::Class(y)) => classes_potentially_equal(env, *x, *y),
        (InsnOperand::Method(x), InsnOperand::Method(y)) => methods_potentially_equal(env, *x, *y),
        (InsnOperand::Field(x), InsnOperand::Field(y)) => fields_potentially_equal(env, *x, *y),
        (InsnOperand::Jump(x), InsnOperand::Jump(y)) => x.signum() == y.signum(),
        (InsnOperand::Local(_), InsnOperand::Local(_)) => true,
        (x, y) => x == y,
    }
}

/// Name compatibility of two entities given their obfuscation flags.
pub fn names_compatible(env: &ClassEnvironment, obf_a: bool, obf_b: bool, name_a: &str, name_b: &str) -> bool {
    match (obf_a, obf_b) {
        (true, true) => true,
        (false, false) => name_a == name_b,
        _ => !env.options().assume_both_or_none_obfuscated,
    }
}

/// Match state check shared by every kind: `Some(verdict)` when the match
/// graph alone decides.
fn decided_by_graph<H: EntityHandle>(env: &ClassEnvironment, a: H, b: H) -> Option<bool> {
    if let Some(m) = env.match_of(Side::A, a) {
        return Some(m == b);
    }
    if env.match_of(Side::B, b).is_some() {
        return Some(false);
    }
    if !env.is_matchable(Side::A, a) || !env.is_matchable(Side::B, b) {
        return Some(false);
    }
    None
}

pub fn classes_potentially_equal(env: &ClassEnvironment, a: ClassId, b: ClassId) -> bool {
    if let Some(verdict) = decided_by_graph(env, a, b) {
        return verdict;
    }
    let (ca, cb) = (env.a().class(a), env.b().class(b));
    if ca.array_dims != cb.array_dims {
        return false;
    }
    if let (Some(ea), Some(eb)) = (ca.element, cb.element) {
        return classes_potentially_equal(env, ea, eb);
    }
    names_compatible(env, ca.name_obfuscated, cb.name_obfuscated, &ca.name, &cb.name)
}

pub fn methods_potentially_equal(env: &ClassEnvironment, a: MethodId, b: MethodId) -> bool {
    if let Some(verdict) = decided_by_graph(env, a, b) {
        return verdict;
    }
    let (ma, mb) = (env.a().method(a), env.b().method(b));
    if (!ma.is_static() || !mb.is_static()) && !classes_potentially_equal(env, ma.owner, mb.owner) {
        return false;
    }
    if !names_compatible(env, ma.name_obfuscated, mb.name_obfuscated, &ma.name, &mb.name) {
        return false;
    }
    if (ma.is_constructor_or_initializer() || mb.is_constructor_or_initializer()) && ma.name != mb.name {
        return false;
    }
    if let Some(hm) = env.hierarchy_match(Side::A, a)
        && !env.b().hierarchy_group(hm).contains(&b)
    {
        return false;
    }
    if let Some(hm) = env.hierarchy_match(Side::B, b)
        && !env.a().hierarchy_group(hm).contains(&a)
    {
        return false;
    }
    true
}

pub fn fields_potentially_equal(env: &ClassEnvironment, a: FieldId, b: FieldId) -> bool {
    if let Some(verdict) = decided_by_graph(env, a, b) {
        return verdict;
    }
    let (fa, fb) = (env.a().field(a), env.b().field(b));
    classes_potentially_equal(env, fa.owner, fb.owner)
        && names_compatible(env, fa.name_obfuscated, fb.name_obfuscated, &fa.name, &fb.name)
}

pub fn vars_potentially_equal(env: &ClassEnvironment, a: VarId, b: VarId) -> bool {
    if let Some(verdict) = decided_by_graph(env, a, b) {
        return verdict;
    }
    let (va, vb) = (env.a().var(a), env.b().var(b));
    let (name_a, name_b) = (va.name.as_deref().unwrap_or(""), vb.name.as_deref().unwrap_or(""));
    va.is_arg == vb.is_arg
        && methods_potentially_equal(env, va.method, vb.method)
        && names_compatible(env, va.name_obfuscated, vb.name_obfuscated, name_a, name_b)
}

/// Compares relative positions of reference sites whose referencing
/// methods are matched to each other.
pub fn compare_sites(env: &ClassEnvironment, a: &[(MethodId, f64)], b: &[(MethodId, f64)]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return if a.is_empty() && b.is_empty() { 1.0 } else { 0.0 };
    }

    let mut compared = 0usize;
    let mut similarity = 0.0;
    for &(caller_a, site_a) in a {
        let Some(caller_b) = env.match_of(Side::A, caller_a) else {
            continue;
        };
        let best = b
            .iter()
            .filter(|(caller, _)| *caller == caller_b)
            .map(|&(_, site_b)| 1.0 - (site_a - site_b).abs())
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |v| v.max(s))));
        compared += 1;
        similarity += best.unwrap_or(0.0);
    }

    if compared == 0 {
        return 0.5;
    }
    (similarity / compared as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_and_set_comparisons() {
        assert_eq!(compare_counts(0, 0), 1.0);
        assert_eq!(compare_counts(3, 4), 0.75);
        let a: BTreeSet<i32> = [1, 2, 3].into();
        let b: BTreeSet<i32> = [2, 3, 4].into();
        assert_eq!(compare_sets(&a, &b), 0.5);
        assert_eq!(compare_sets::<i32>(&BTreeSet::new(), &BTreeSet::new()), 1.0);
    }

    #[test]
    fn levenshtein_distance() {
        let eq = |x: &char, y: &char| x == y;
        let a: Vec<char> = "kitten".chars().collect();
        let b: Vec<char> = "sitting".chars().collect();
        assert_eq!(levenshtein(&a, &b, eq), 3);
        assert_eq!(levenshtein(&a, &[], eq), 6);
        assert!((compare_lists(&a, &b, eq) - (1.0 - 3.0 / 7.0)).abs() < 1e-12);
    }

    #[test]
    fn bit_comparison() {
        assert_eq!(compare_bits(0b0101, 0b0101, 0b1111), 1.0);
        assert_eq!(compare_bits(0b0001, 0b0100, 0b1111), 0.5);
        assert_eq!(relative_position(0, 1), 0.5);
        assert_eq!(relative_position(2, 5), 0.5);
    }
}
