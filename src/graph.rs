//! The match graph: per-kind, per-side edge tables and matchable flags.
//!
//! `link`, `unlink` and `set_matchable` are the only mutators. Each one
//! keeps both directions of an edge in sync and clears the result cache.

use anyhow::{Result, bail};
use std::fmt;
use std::hash::Hash;

use crate::cache::ResultCache;
use crate::env::ClassEnv;
use crate::model::{ClassId, EntityKind, FieldId, MethodId, Side, VarId};

/// Match edges of one entity kind.
#[derive(Debug, Clone)]
pub struct EdgeTable<H> {
    matches: [Vec<Option<H>>; 2],
    matchable: [Vec<bool>; 2],
}

impl<H: Copy> EdgeTable<H> {
    fn new(len_a: usize, len_b: usize) -> Self {
        Self {
            matches: [vec![None; len_a], vec![None; len_b]],
            matchable: [vec![true; len_a], vec![true; len_b]],
        }
    }
}

/// A typed entity handle usable as a match graph node.
pub trait EntityHandle: Copy + Eq + Ord + Hash + fmt::Debug + Send + Sync + 'static {
    fn index(self) -> usize;
    fn from_index(index: usize) -> Self;
    fn count(env: &ClassEnv) -> usize;
    fn kind(self, env: &ClassEnv) -> EntityKind;
    /// Structural id as written to the match file.
    fn id_in(self, env: &ClassEnv) -> String;
    #[doc(hidden)]
    fn edges(graph: &MatchGraph) -> &EdgeTable<Self>;
    #[doc(hidden)]
    fn edges_mut(graph: &mut MatchGraph) -> &mut EdgeTable<Self>;
}

macro_rules! entity_handle {
    ($ty:ty, $table:ident, $count:ident, $kind:expr, $id:expr) => {
        impl EntityHandle for $ty {
            fn index(self) -> usize {
                self.0 as usize
            }

            fn from_index(index: usize) -> Self {
                Self::from_usize(index)
            }

            fn count(env: &ClassEnv) -> usize {
                env.$count()
            }

            fn kind(self, env: &ClassEnv) -> EntityKind {
                let kind: fn(Self, &ClassEnv) -> EntityKind = $kind;
                kind(self, env)
            }

            fn id_in(self, env: &ClassEnv) -> String {
                let id: fn(Self, &ClassEnv) -> String = $id;
                id(self, env)
            }

            fn edges(graph: &MatchGraph) -> &EdgeTable<Self> {
                &graph.$table
            }

            fn edges_mut(graph: &mut MatchGraph) -> &mut EdgeTable<Self> {
                &mut graph.$table
            }
        }
    };
}

entity_handle!(ClassId, classes, class_count, |_, _| EntityKind::Class, |c, env| env.class(c).id.clone());
entity_handle!(MethodId, methods, method_count, |_, _| EntityKind::Method, |m, env| env.method(m).id.clone());
entity_handle!(FieldId, fields, field_count, |_, _| EntityKind::Field, |f, env| env.field(f).id.clone());
entity_handle!(VarId, vars, var_count, |v, env| env.var(v).kind(), |v, env| env.var(v).index.to_string());

#[derive(Debug)]
pub struct MatchGraph {
    classes: EdgeTable<ClassId>,
    methods: EdgeTable<MethodId>,
    fields: EdgeTable<FieldId>,
    vars: EdgeTable<VarId>,
    cache: ResultCache,
}

impl MatchGraph {
    pub fn new(a: &ClassEnv, b: &ClassEnv) -> Self {
        Self {
            classes: EdgeTable::new(a.class_count(), b.class_count()),
            methods: EdgeTable::new(a.method_count(), b.method_count()),
            fields: EdgeTable::new(a.field_count(), b.field_count()),
            vars: EdgeTable::new(a.var_count(), b.var_count()),
            cache: ResultCache::new(),
        }
    }

    pub fn match_of<H: EntityHandle>(&self, side: Side, h: H) -> Option<H> {
        H::edges(self).matches[side.index()][h.index()]
    }

    pub fn is_matchable<H: EntityHandle>(&self, side: Side, h: H) -> bool {
        H::edges(self).matchable[side.index()][h.index()]
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// All matched pairs of one kind as (A, B), in A order.
    pub fn matched_pairs<H: EntityHandle>(&self) -> impl Iterator<Item = (H, H)> + '_ {
        H::edges(self).matches[0]
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.map(|b| (H::from_index(i), b)))
    }

    pub fn matched_count<H: EntityHandle>(&self, side: Side) -> usize {
        H::edges(self).matches[side.index()].iter().filter(|m| m.is_some()).count()
    }

    /// Links `a` (side A) with `b` (side B), dropping any other edge either
    /// endpoint had.
    pub(crate) fn link<H: EntityHandle>(&mut self, a: H, b: H) {
        self.unlink(Side::A, a);
        self.unlink(Side::B, b);
        let table = H::edges_mut(self);
        table.matches[0][a.index()] = Some(b);
        table.matches[1][b.index()] = Some(a);
        self.cache.clear();
    }

    /// Removes the edge of `h`, returning its former partner.
    pub(crate) fn unlink<H: EntityHandle>(&mut self, side: Side, h: H) -> Option<H> {
        let table = H::edges_mut(self);
        let partner = table.matches[side.index()][h.index()].take()?;
        table.matches[side.other().index()][partner.index()] = None;
        self.cache.clear();
        Some(partner)
    }

    pub(crate) fn set_matchable<H: EntityHandle>(&mut self, side: Side, h: H, matchable: bool) {
        let slot = &mut H::edges_mut(self).matchable[side.index()][h.index()];
        if *slot != matchable {
            *slot = matchable;
            self.cache.clear();
        }
    }

    /// Verifies mutuality, class scoping and array dimension agreement.
    pub fn check_consistency(&self, a: &ClassEnv, b: &ClassEnv) -> Result<()> {
        self.check_mutual::<ClassId>()?;
        self.check_mutual::<MethodId>()?;
        self.check_mutual::<FieldId>()?;
        self.check_mutual::<VarId>()?;

        for (ca, cb) in self.matched_pairs::<ClassId>() {
            if a.class(ca).array_dims != b.class(cb).array_dims {
                bail!("classes {} and {} differ in array dimensions", a.class(ca).id, b.class(cb).id);
            }
        }
        for (ma, mb) in self.matched_pairs::<MethodId>() {
            let (oa, ob) = (a.method(ma).owner, b.method(mb).owner);
            if self.match_of(Side::A, oa) != Some(ob) {
                bail!("methods {} and {} have unmatched owners", a.method(ma).id, b.method(mb).id);
            }
        }
        for (fa, fb) in self.matched_pairs::<FieldId>() {
            let (oa, ob) = (a.field(fa).owner, b.field(fb).owner);
            if self.match_of(Side::A, oa) != Some(ob) {
                bail!("fields {} and {} have unmatched owners", a.field(fa).id, b.field(fb).id);
            }
        }
        for (va, vb) in self.matched_pairs::<VarId>() {
            let (var_a, var_b) = (a.var(va), b.var(vb));
            if var_a.is_arg != var_b.is_arg || self.match_of(Side::A, var_a.method) != Some(var_b.method) {
                bail!("variables {va:?} and {vb:?} are not scoped to a matched method pair");
            }
        }
        Ok(())
    }

    fn check_mutual<H: EntityHandle>(&self) -> Result<()> {
        let table = H::edges(self);
        for side in [Side::A, Side::B] {
            for (i, m) in table.matches[side.index()].iter().enumerate() {
                let Some(partner) = m else { continue };
                let back = table.matches[side.other().index()][partner.index()];
                if back != Some(H::from_index(i)) {
                    bail!("edge {:?} -> {partner:?} on side {side:?} is not mutual", H::from_index(i));
                }
                if !table.matchable[side.index()][i] {
                    bail!("matched entity {:?} on side {side:?} is pinned unmatchable", H::from_index(i));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ClassEnvBuilder;
    use crate::classfile::ClassFile;
    use crate::config::NamePatterns;

    fn env(side: Side, names: &[&str]) -> ClassEnv {
        let mut builder = ClassEnvBuilder::new(side);
        for name in names {
            builder.add_class(
                ClassFile {
                    this_class: name.to_string(),
                    ..ClassFile::default()
                },
                true,
            );
        }
        builder.build(&NamePatterns::default()).unwrap()
    }

    #[test]
    fn link_replaces_previous_edges_on_both_sides() {
        let (a, b) = (env(Side::A, &["x", "y"]), env(Side::B, &["p", "q"]));
        let mut graph = MatchGraph::new(&a, &b);
        let (x, y) = (a.class_by_name("x").unwrap(), a.class_by_name("y").unwrap());
        let (p, q) = (b.class_by_name("p").unwrap(), b.class_by_name("q").unwrap());

        graph.link(x, p);
        graph.link(y, q);
        graph.link(x, q);
        assert_eq!(graph.match_of(Side::A, x), Some(q));
        assert_eq!(graph.match_of(Side::B, q), Some(x));
        assert_eq!(graph.match_of(Side::A, y), None);
        assert_eq!(graph.match_of(Side::B, p), None);
        graph.check_consistency(&a, &b).unwrap();
    }

    #[test]
    fn every_mutation_clears_the_cache() {
        let (a, b) = (env(Side::A, &["x"]), env(Side::B, &["p"]));
        let mut graph = MatchGraph::new(&a, &b);
        let (x, p) = (a.class_by_name("x").unwrap(), b.class_by_name("p").unwrap());

        graph.link(x, p);
        let after_link = graph.cache().clear_count();
        assert!(after_link >= 1);
        assert_eq!(graph.unlink(Side::B, p), Some(x));
        assert_eq!(graph.cache().clear_count(), after_link + 1);
        assert_eq!(graph.unlink(Side::B, p), None);
        assert_eq!(graph.cache().clear_count(), after_link + 1);

        graph.set_matchable(Side::A, x, false);
        assert!(!graph.is_matchable(Side::A, x));
        assert_eq!(graph.cache().clear_count(), after_link + 2);
    }
}
