//! Match graph mutation with propagation to array classes, hierarchy
//! groups, members and variables.
//!
//! Every public mutator validates its arguments before touching the graph,
//! so a returned error leaves the graph as it was.

use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use crate::config::MatcherConfig;
use crate::env::{ClassEnv, ClassEnvironment};
use crate::error::{MatchError, MatchResult};
use crate::graph::{EntityHandle, MatchGraph};
use crate::model::{ClassId, EntityKind, FieldId, MethodId, Side, VarId};

/// Matched/total counts over side A.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchingStatus {
    pub total_classes: usize,
    pub matched_classes: usize,
    pub total_methods: usize,
    pub matched_methods: usize,
    pub total_fields: usize,
    pub matched_fields: usize,
    pub total_args: usize,
    pub matched_args: usize,
    pub total_vars: usize,
    pub matched_vars: usize,
}

pub struct Matcher {
    env: ClassEnvironment,
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(mut env: ClassEnvironment, config: MatcherConfig) -> Self {
        env.thresholds = config.clone();
        Self { env, config }
    }

    pub fn env(&self) -> &ClassEnvironment {
        &self.env
    }

    pub(crate) fn env_mut(&mut self) -> &mut ClassEnvironment {
        &mut self.env
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn into_env(self) -> ClassEnvironment {
        self.env
    }

    pub fn graph(&self) -> &MatchGraph {
        &self.env.graph
    }

    fn side_env(&self, side: Side) -> &ClassEnv {
        self.env.env(side)
    }

    fn ensure_matchable<H: EntityHandle>(&self, side: Side, h: H) -> MatchResult<()> {
        if self.env.graph.is_matchable(side, h) {
            return Ok(());
        }
        let env = self.side_env(side);
        Err(MatchError::NotMatchable {
            kind: h.kind(env),
            side,
            id: h.id_in(env),
        })
    }

    pub fn match_classes(&mut self, a: ClassId, b: ClassId) -> MatchResult<()> {
        let (dims_a, dims_b) = (self.env.a().class(a).array_dims, self.env.b().class(b).array_dims);
        if dims_a != dims_b {
            return Err(MatchError::ArrayDimensionMismatch { a: dims_a, b: dims_b });
        }
        if self.env.graph.match_of(Side::A, a) == Some(b) {
            return Ok(());
        }
        self.ensure_matchable(Side::A, a)?;
        self.ensure_matchable(Side::B, b)?;

        if self.env.graph.match_of(Side::A, a).is_some() {
            self.unmatch_class(Side::A, a);
        }
        if self.env.graph.match_of(Side::B, b).is_some() {
            self.unmatch_class(Side::B, b);
        }
        self.env.graph.link(a, b);

        if dims_a > 0 {
            self.match_array_elements(a, b)?;
        } else {
            self.match_array_classes(a, b);
        }
        self.propagate_method_matches(a, b)?;
        self.propagate_field_matches(a, b)?;
        Ok(())
    }

    fn match_array_elements(&mut self, a: ClassId, b: ClassId) -> MatchResult<()> {
        let (Some(elem_a), Some(elem_b)) = (self.env.a().class(a).element, self.env.b().class(b).element) else {
            return Ok(());
        };
        let graph = &self.env.graph;
        if graph.match_of(Side::A, elem_a).is_none()
            && graph.is_matchable(Side::A, elem_a)
            && graph.is_matchable(Side::B, elem_b)
        {
            self.match_classes(elem_a, elem_b)?;
        }
        Ok(())
    }

    fn match_array_classes(&mut self, a: ClassId, b: ClassId) {
        let arrays_a = self.env.a().class(a).arrays.clone();
        for arr_a in arrays_a {
            let graph = &self.env.graph;
            if graph.match_of(Side::A, arr_a).is_some() || !graph.is_matchable(Side::A, arr_a) {
                continue;
            }
            let dims = self.env.a().class(arr_a).array_dims;
            let candidate = self.env.b().class(b).arrays.iter().copied().find(|&arr_b| {
                self.env.b().class(arr_b).array_dims == dims
                    && graph.match_of(Side::B, arr_b).is_none()
                    && graph.is_matchable(Side::B, arr_b)
            });
            if let Some(arr_b) = candidate {
                self.env.graph.link(arr_a, arr_b);
            }
        }
    }

    fn propagate_method_matches(&mut self, a: ClassId, b: ClassId) -> MatchResult<()> {
        let methods_a = self.env.a().class(a).methods.clone();
        for src in methods_a {
            if self.env.graph.match_of(Side::A, src).is_some() {
                continue;
            }
            let dst = if self.env.a().method(src).name_obfuscated {
                None
            } else {
                let m = self.env.a().method(src);
                self.env
                    .b()
                    .method_by_id(b, &m.id)
                    .or_else(|| unique_by_name(self.env.b(), &self.env.b().class(b).methods, &m.name, |e, h| &e.method(h).name))
            };
            let dst = match dst {
                Some(dst) => Some(dst),
                None => self.hierarchy_counterpart(src, b),
            };
            let Some(dst) = dst else { continue };
            if self.can_auto_link(src, dst) {
                self.match_methods(src, dst)?;
            }
        }
        Ok(())
    }

    /// Method of `dst_cls` in the group that `src`'s matched hierarchy
    /// members map to.
    fn hierarchy_counterpart(&self, src: MethodId, dst_cls: ClassId) -> Option<MethodId> {
        let target = self.hierarchy_match(Side::A, src)?;
        let group_b = self.env.b().hierarchy_group(target);
        if group_b.len() <= 1 {
            return None;
        }
        self.env
            .b()
            .class(dst_cls)
            .methods
            .iter()
            .copied()
            .find(|m| group_b.contains(m))
    }

    fn can_auto_link<H: EntityHandle>(&self, a: H, b: H) -> bool {
        let graph = &self.env.graph;
        graph.is_matchable(Side::A, a) && graph.is_matchable(Side::B, b) && graph.match_of(Side::B, b).is_none()
    }

    fn propagate_field_matches(&mut self, a: ClassId, b: ClassId) -> MatchResult<()> {
        let fields_a = self.env.a().class(a).fields.clone();
        for src in fields_a {
            let f = self.env.a().field(src);
            if f.name_obfuscated || self.env.graph.match_of(Side::A, src).is_some() {
                continue;
            }
            let dst = self
                .env
                .b()
                .field_by_id(b, &f.id)
                .or_else(|| unique_by_name(self.env.b(), &self.env.b().class(b).fields, &f.name, |e, h| &e.field(h).name));
            if let Some(dst) = dst
                && self.can_auto_link(src, dst)
            {
                self.match_fields(src, dst)?;
            }
        }
        Ok(())
    }

    pub fn match_methods(&mut self, a: MethodId, b: MethodId) -> MatchResult<()> {
        let (owner_a, owner_b) = (self.env.a().method(a).owner, self.env.b().method(b).owner);
        if self.env.graph.match_of(Side::A, owner_a) != Some(owner_b) {
            return Err(MatchError::OwnerNotMatched {
                kind: EntityKind::Method,
                a: self.env.a().method(a).id.clone(),
                b: self.env.b().method(b).id.clone(),
            });
        }
        self.ensure_matchable(Side::A, a)?;
        self.ensure_matchable(Side::B, b)?;
        if self.env.graph.match_of(Side::A, a) == Some(b) {
            return Ok(());
        }

        let group_a: Vec<MethodId> = self.env.a().hierarchy_group(a).to_vec();
        let group_b: Vec<MethodId> = self.env.b().hierarchy_group(b).to_vec();
        let linked = self.hierarchy_match(Side::A, a).is_some_and(|m| group_b.contains(&m));

        if linked {
            self.detach_method(Side::A, a);
            self.detach_method(Side::B, b);
        } else {
            for &m in &group_a {
                self.detach_method(Side::A, m);
            }
            for &m in &group_b {
                self.detach_method(Side::B, m);
            }
        }
        self.env.graph.link(a, b);

        let members_b: HashSet<MethodId> = group_b.into_iter().collect();
        for src in group_a {
            if src == a || self.env.graph.match_of(Side::A, src).is_some() {
                continue;
            }
            let Some(dst_cls) = self.env.graph.match_of(Side::A, self.env.a().method(src).owner) else {
                continue;
            };
            let dst = self
                .env
                .b()
                .class(dst_cls)
                .methods
                .iter()
                .copied()
                .find(|m| members_b.contains(m) && self.can_auto_link(src, *m));
            if let Some(dst) = dst {
                self.env.graph.link(src, dst);
            }
        }
        Ok(())
    }

    /// Unlinks one method and its variables without touching its group.
    pub fn detach_method(&mut self, side: Side, m: MethodId) {
        if self.env.graph.match_of(side, m).is_none() {
            return;
        }
        self.unmatch_method_vars(side, m);
        self.env.graph.unlink(side, m);
    }

    fn unmatch_method_vars(&mut self, side: Side, m: MethodId) {
        let method = self.side_env(side).method(m);
        let vars: Vec<VarId> = method.args.iter().chain(&method.vars).copied().collect();
        for v in vars {
            self.env.graph.unlink(side, v);
        }
    }

    pub fn match_fields(&mut self, a: FieldId, b: FieldId) -> MatchResult<()> {
        let (fa, fb) = (self.env.a().field(a), self.env.b().field(b));
        if self.env.graph.match_of(Side::A, fa.owner) != Some(fb.owner) {
            return Err(MatchError::OwnerNotMatched {
                kind: EntityKind::Field,
                a: fa.id.clone(),
                b: fb.id.clone(),
            });
        }
        self.ensure_matchable(Side::A, a)?;
        self.ensure_matchable(Side::B, b)?;
        if self.env.graph.match_of(Side::A, a) == Some(b) {
            return Ok(());
        }

        let accessors = (fa.record_accessor, fb.record_accessor);
        self.env.graph.link(a, b);

        if let (Some(acc_a), Some(acc_b)) = accessors
            && self.env.graph.match_of(Side::A, acc_a).is_none()
            && self.can_auto_link(acc_a, acc_b)
        {
            self.match_methods(acc_a, acc_b)?;
        }
        Ok(())
    }

    pub fn match_vars(&mut self, a: VarId, b: VarId) -> MatchResult<()> {
        let (va, vb) = (self.env.a().var(a), self.env.b().var(b));
        if va.is_arg != vb.is_arg {
            return Err(MatchError::VarKindMismatch {
                a: a.id_in(self.env.a()),
                b: b.id_in(self.env.b()),
                a_is_arg: va.is_arg,
                b_is_arg: vb.is_arg,
            });
        }
        if self.env.graph.match_of(Side::A, va.method) != Some(vb.method) {
            return Err(MatchError::OwnerNotMatched {
                kind: va.kind(),
                a: self.env.a().method(va.method).id.clone(),
                b: self.env.b().method(vb.method).id.clone(),
            });
        }
        self.ensure_matchable(Side::A, a)?;
        self.ensure_matchable(Side::B, b)?;
        if self.env.graph.match_of(Side::A, a) != Some(b) {
            self.env.graph.link(a, b);
        }
        Ok(())
    }

    /// Unmatches a class with all member matches; arrays unmatch their
    /// element class and every array built over it.
    pub fn unmatch_class(&mut self, side: Side, cls: ClassId) {
        let base = self.side_env(side).base_class(cls);
        if self.env.graph.match_of(side, base).is_some() {
            let (methods, fields) = {
                let c = self.side_env(side).class(base);
                (c.methods.clone(), c.fields.clone())
            };
            for m in methods {
                self.detach_method(side, m);
            }
            for f in fields {
                self.env.graph.unlink(side, f);
            }
            self.env.graph.unlink(side, base);
        }
        let arrays = self.side_env(side).class(base).arrays.clone();
        for arr in arrays {
            self.env.graph.unlink(side, arr);
        }
        if cls != base {
            self.env.graph.unlink(side, cls);
        }
    }

    /// Unmatches a method and every other member of its hierarchy group.
    pub fn unmatch_method(&mut self, side: Side, m: MethodId) {
        let group = self.side_env(side).hierarchy_group(m).to_vec();
        for member in group {
            self.detach_method(side, member);
        }
    }

    pub fn unmatch_field(&mut self, side: Side, f: FieldId) {
        self.env.graph.unlink(side, f);
    }

    pub fn unmatch_var(&mut self, side: Side, v: VarId) {
        self.env.graph.unlink(side, v);
    }

    /// Pins (`false`) or unpins an entity. Pinning requires it to be unmatched.
    pub fn set_matchable<H: EntityHandle>(&mut self, side: Side, h: H, matchable: bool) -> MatchResult<()> {
        if !matchable && self.env.graph.match_of(side, h).is_some() {
            let env = self.side_env(side);
            return Err(MatchError::AlreadyMatched {
                kind: h.kind(env),
                side,
                id: h.id_in(env),
            });
        }
        self.env.graph.set_matchable(side, h, matchable);
        Ok(())
    }

    pub fn hierarchy_match(&self, side: Side, m: MethodId) -> Option<MethodId> {
        self.env.hierarchy_match(side, m)
    }

    /// Pairs input classes whose names are not obfuscated with the B class
    /// of the same id. Returns the number of new class matches.
    pub fn match_unobfuscated(&mut self) -> MatchResult<usize> {
        let candidates: Vec<(ClassId, ClassId)> = self
            .env
            .a()
            .input_classes()
            .filter_map(|ca| {
                let cls = self.env.a().class(ca);
                if cls.name_obfuscated || cls.is_array() {
                    return None;
                }
                let cb = self.env.b().class_by_id(&cls.id)?;
                let other = self.env.b().class(cb);
                (other.real && other.input && !other.name_obfuscated).then_some((ca, cb))
            })
            .collect();

        let mut matched = 0;
        for (ca, cb) in candidates {
            let graph = &self.env.graph;
            if graph.match_of(Side::A, ca).is_some()
                || graph.match_of(Side::B, cb).is_some()
                || !graph.is_matchable(Side::A, ca)
                || !graph.is_matchable(Side::B, cb)
            {
                continue;
            }
            self.match_classes(ca, cb)?;
            matched += 1;
        }
        debug!(matched, "matched unobfuscated classes");
        Ok(matched)
    }

    /// Counts over real classes of side A; `inputs_only` skips classpath.
    pub fn status(&self, inputs_only: bool) -> MatchingStatus {
        let env = self.env.a();
        let graph = &self.env.graph;
        let mut status = MatchingStatus::default();

        for c in env.class_ids() {
            let cls = env.class(c);
            if !cls.real || (inputs_only && !cls.input) {
                continue;
            }
            status.total_classes += 1;
            status.matched_classes += usize::from(graph.match_of(Side::A, c).is_some());

            for &m in &cls.methods {
                status.total_methods += 1;
                status.matched_methods += usize::from(graph.match_of(Side::A, m).is_some());
                let method = env.method(m);
                for &v in &method.args {
                    status.total_args += 1;
                    status.matched_args += usize::from(graph.match_of(Side::A, v).is_some());
                }
                for &v in &method.vars {
                    status.total_vars += 1;
                    status.matched_vars += usize::from(graph.match_of(Side::A, v).is_some());
                }
            }
            for &f in &cls.fields {
                status.total_fields += 1;
                status.matched_fields += usize::from(graph.match_of(Side::A, f).is_some());
            }
        }
        status
    }

    pub fn check_consistency(&self) -> anyhow::Result<()> {
        self.env.check_consistency()
    }
}

/// The single entry of `pool` named `name`, if exactly one exists.
fn unique_by_name<H: Copy>(env: &ClassEnv, pool: &[H], name: &str, name_of: impl Fn(&ClassEnv, H) -> &String) -> Option<H> {
    let mut found = pool.iter().copied().filter(|&h| name_of(env, h) == name);
    let first = found.next()?;
    found.next().is_none().then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ClassEnvBuilder;
    use crate::classfile::{ClassFile, ClassMember};
    use crate::config::{EnvOptions, NamePatterns};
    use crate::input::InputSet;

    fn member(name: &str, desc: &str) -> ClassMember {
        ClassMember {
            name: name.to_string(),
            descriptor: desc.to_string(),
            ..ClassMember::default()
        }
    }

    fn class(name: &str, super_class: &str, methods: &[&str]) -> ClassFile {
        ClassFile {
            this_class: name.to_string(),
            super_class: Some(super_class.to_string()),
            methods: methods.iter().map(|m| member(m, "()V")).collect(),
            ..ClassFile::default()
        }
    }

    fn side(side: Side, classes: Vec<ClassFile>) -> ClassEnv {
        let mut builder = ClassEnvBuilder::new(side);
        for cf in classes {
            builder.add_class(cf, true);
        }
        builder.build(&NamePatterns::default()).unwrap()
    }

    /// `p <- {q, r}` overriding `m` on side A, `x <- {y, z}` overriding `n` on side B.
    fn hierarchy() -> Matcher {
        let a = side(
            Side::A,
            vec![
                class("p", "java/lang/Object", &["m"]),
                class("q", "p", &["m"]),
                class("r", "p", &["m"]),
            ],
        );
        let b = side(
            Side::B,
            vec![
                class("x", "java/lang/Object", &["n"]),
                class("y", "x", &["n"]),
                class("z", "x", &["n"]),
            ],
        );
        let env = ClassEnvironment::new(a, b, EnvOptions::default(), InputSet::default());
        Matcher::new(env, MatcherConfig::default())
    }

    fn cls(m: &Matcher, side: Side, name: &str) -> ClassId {
        m.env().env(side).class_by_name(name).unwrap()
    }

    fn method(m: &Matcher, side: Side, owner: &str, id: &str) -> MethodId {
        let owner = cls(m, side, owner);
        m.env().env(side).method_by_id(owner, id).unwrap()
    }

    #[test]
    fn rebinding_keeps_edges_mutual() {
        let mut m = hierarchy();
        let (p, x, y) = (cls(&m, Side::A, "p"), cls(&m, Side::B, "x"), cls(&m, Side::B, "y"));
        m.match_classes(p, x).unwrap();
        m.match_classes(p, y).unwrap();
        assert_eq!(m.env().match_of(Side::A, p), Some(y));
        assert_eq!(m.env().match_of(Side::B, y), Some(p));
        assert_eq!(m.env().match_of(Side::B, x), None);
        m.check_consistency().unwrap();
    }

    #[test]
    fn members_require_matched_owners() {
        let mut m = hierarchy();
        let (pm, xn) = (method(&m, Side::A, "p", "m()V"), method(&m, Side::B, "x", "n()V"));
        let err = m.match_methods(pm, xn).unwrap_err();
        assert!(matches!(err, MatchError::OwnerNotMatched { kind: EntityKind::Method, .. }));
        assert_eq!(m.env().match_of(Side::A, pm), None);
    }

    #[test]
    fn array_dimensions_must_agree() {
        let mut holder = class("p", "java/lang/Object", &[]);
        holder.fields.push(member("f", "[Lp;"));
        let a = side(Side::A, vec![holder]);
        let b = side(Side::B, vec![class("x", "java/lang/Object", &[])]);
        let mut m = Matcher::new(
            ClassEnvironment::new(a, b, EnvOptions::default(), InputSet::default()),
            MatcherConfig::default(),
        );
        let arr = m.env().a().class_by_id("[Lp;").unwrap();
        let x = cls(&m, Side::B, "x");
        assert_eq!(
            m.match_classes(arr, x),
            Err(MatchError::ArrayDimensionMismatch { a: 1, b: 0 })
        );
    }

    #[test]
    fn repeated_match_is_a_no_op() {
        let mut m = hierarchy();
        let (p, x) = (cls(&m, Side::A, "p"), cls(&m, Side::B, "x"));
        m.match_classes(p, x).unwrap();
        let clears = m.graph().cache().clear_count();
        m.match_classes(p, x).unwrap();
        assert_eq!(m.graph().cache().clear_count(), clears);
        assert_eq!(m.env().match_of(Side::A, p), Some(x));
    }

    #[test]
    fn method_match_pairs_the_whole_hierarchy_group() {
        let mut m = hierarchy();
        for (a, b) in [("p", "x"), ("q", "y"), ("r", "z")] {
            let (ca, cb) = (cls(&m, Side::A, a), cls(&m, Side::B, b));
            m.match_classes(ca, cb).unwrap();
        }
        let pm = method(&m, Side::A, "p", "m()V");
        m.match_methods(pm, method(&m, Side::B, "x", "n()V")).unwrap();

        for (a, b) in [("q", "y"), ("r", "z")] {
            let ma = method(&m, Side::A, a, "m()V");
            assert_eq!(m.env().match_of(Side::A, ma), Some(method(&m, Side::B, b, "n()V")));
        }
        m.check_consistency().unwrap();

        m.unmatch_method(Side::A, pm);
        let status = m.status(true);
        assert_eq!(status.matched_methods, 0);
        assert_eq!(status.matched_classes, 3);
    }

    #[test]
    fn class_match_follows_a_matched_hierarchy() {
        let mut m = hierarchy();
        let (p, x) = (cls(&m, Side::A, "p"), cls(&m, Side::B, "x"));
        m.match_classes(p, x).unwrap();
        m.match_methods(method(&m, Side::A, "p", "m()V"), method(&m, Side::B, "x", "n()V"))
            .unwrap();

        let (q, y) = (cls(&m, Side::A, "q"), cls(&m, Side::B, "y"));
        m.match_classes(q, y).unwrap();
        let qm = method(&m, Side::A, "q", "m()V");
        assert_eq!(m.env().match_of(Side::A, qm), Some(method(&m, Side::B, "y", "n()V")));

        m.unmatch_class(Side::B, y);
        assert_eq!(m.env().match_of(Side::A, q), None);
        assert_eq!(m.env().match_of(Side::A, qm), None);
        m.check_consistency().unwrap();
    }

    #[test]
    fn pinning_rejects_matched_entities() {
        let mut m = hierarchy();
        let (p, x, q) = (cls(&m, Side::A, "p"), cls(&m, Side::B, "x"), cls(&m, Side::A, "q"));
        m.match_classes(p, x).unwrap();
        assert!(matches!(
            m.set_matchable(Side::A, p, false),
            Err(MatchError::AlreadyMatched { .. })
        ));

        m.set_matchable(Side::A, q, false).unwrap();
        let y = cls(&m, Side::B, "y");
        assert!(matches!(m.match_classes(q, y), Err(MatchError::NotMatchable { .. })));
        m.set_matchable(Side::A, q, true).unwrap();
        m.match_classes(q, y).unwrap();
    }

    #[test]
    fn unobfuscated_classes_match_by_name() {
        let mut named_a = class("com/example/Service", "java/lang/Object", &["start"]);
        named_a.source_file = Some("Service.java".into());
        let mut named_b = named_a.clone();
        named_b.methods.push(member("stop", "()V"));
        let a = side(Side::A, vec![named_a, class("p", "java/lang/Object", &[])]);
        let b = side(Side::B, vec![named_b, class("x", "java/lang/Object", &[])]);
        let mut m = Matcher::new(
            ClassEnvironment::new(a, b, EnvOptions::default(), InputSet::default()),
            MatcherConfig::default(),
        );

        assert_eq!(m.match_unobfuscated().unwrap(), 1);
        let service = cls(&m, Side::A, "com/example/Service");
        let start = method(&m, Side::A, "com/example/Service", "start()V");
        assert!(m.env().is_matched(Side::A, service));
        assert_eq!(
            m.env().match_of(Side::A, start),
            Some(method(&m, Side::B, "com/example/Service", "start()V"))
        );
    }
}
