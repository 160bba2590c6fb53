//! Stable numeric ids for obfuscated entities.
//!
//! UIDs let a name chosen for an obfuscated entity survive across
//! versions: matched entities inherit the UID of their counterpart from
//! the previous version, and whatever is left on side B gets a fresh one.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::env::{ClassEnv, ClassEnvironment};
use crate::model::{ClassId, FieldId, MethodId, Side};

/// UIDs of one side, indexed by entity handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UidTable {
    classes: Vec<Option<u32>>,
    methods: Vec<Option<u32>>,
    fields: Vec<Option<u32>>,
}

impl UidTable {
    pub fn new(env: &ClassEnv) -> Self {
        Self {
            classes: vec![None; env.class_count()],
            methods: vec![None; env.method_count()],
            fields: vec![None; env.field_count()],
        }
    }

    pub fn class(&self, c: ClassId) -> Option<u32> {
        self.classes[c.index()]
    }

    pub fn method(&self, m: MethodId) -> Option<u32> {
        self.methods[m.index()]
    }

    pub fn field(&self, f: FieldId) -> Option<u32> {
        self.fields[f.index()]
    }

    pub fn set_class(&mut self, c: ClassId, uid: u32) {
        self.classes[c.index()] = Some(uid);
    }

    pub fn set_method(&mut self, m: MethodId, uid: u32) {
        self.methods[m.index()] = Some(uid);
    }

    pub fn set_field(&mut self, f: FieldId, uid: u32) {
        self.fields[f.index()] = Some(uid);
    }

    /// Number of entities carrying a UID.
    pub fn assigned(&self) -> usize {
        let count = |v: &[Option<u32>]| v.iter().filter(|u| u.is_some()).count();
        count(&self.classes) + count(&self.methods) + count(&self.fields)
    }
}

/// Next free UID per entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UidCounters {
    pub next_class: u32,
    pub next_method: u32,
    pub next_field: u32,
}

impl Default for UidCounters {
    fn default() -> Self {
        Self {
            next_class: 1,
            next_method: 1,
            next_field: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UidAssignment {
    pub classes: usize,
    pub methods: usize,
    pub fields: usize,
}

impl UidAssignment {
    pub fn total(&self) -> usize {
        self.classes + self.methods + self.fields
    }
}

/// Copies UIDs of A entities onto their UID-less B matches.
pub fn propagate_uids(env: &mut ClassEnvironment) -> UidAssignment {
    let mut copied = UidAssignment::default();
    let graph = &env.graph;
    let [table_a, table_b] = &mut env.uids;

    for (a, b) in graph.matched_pairs::<ClassId>() {
        if let Some(uid) = table_a.class(a)
            && table_b.class(b).is_none()
        {
            table_b.set_class(b, uid);
            copied.classes += 1;
        }
    }
    for (a, b) in graph.matched_pairs::<MethodId>() {
        if let Some(uid) = table_a.method(a)
            && table_b.method(b).is_none()
        {
            table_b.set_method(b, uid);
            copied.methods += 1;
        }
    }
    for (a, b) in graph.matched_pairs::<FieldId>() {
        if let Some(uid) = table_a.field(a)
            && table_b.field(b).is_none()
        {
            table_b.set_field(b, uid);
            copied.fields += 1;
        }
    }

    debug!(?copied, "propagated uids");
    copied
}

/// Gives every obfuscated, UID-less input entity of side B a fresh UID.
///
/// Classes are visited by name, members by name within their class. The
/// obfuscated members of a method hierarchy group share one UID, reusing
/// one a member already has. Group members keeping a real name, e.g. an
/// override declared in a named class, get none.
pub fn assign_missing_uids(env: &mut ClassEnvironment, counters: &mut UidCounters) -> UidAssignment {
    let mut assigned = UidAssignment::default();
    let (classes, table) = env.env_and_uids_mut(Side::B);

    let mut sorted: Vec<ClassId> = classes.input_classes().collect();
    sorted.sort_by(|&x, &y| classes.class(x).name.cmp(&classes.class(y).name));

    for &c in &sorted {
        let cls = classes.class(c);
        if cls.name_obfuscated && table.class(c).is_none() {
            table.set_class(c, counters.next_class);
            counters.next_class += 1;
            assigned.classes += 1;
        }
    }

    let mut done_groups: HashSet<usize> = HashSet::new();
    for &c in &sorted {
        let cls = classes.class(c);

        let mut methods: Vec<MethodId> = cls
            .methods
            .iter()
            .copied()
            .filter(|&m| classes.method(m).name_obfuscated)
            .collect();
        methods.sort_by(|&x, &y| classes.method(x).id.cmp(&classes.method(y).id));
        for m in methods {
            let group_index = classes.method(m).group;
            if !done_groups.insert(group_index) {
                continue;
            }
            let group: Vec<MethodId> = classes
                .hierarchy_group(m)
                .iter()
                .copied()
                .filter(|&member| classes.method(member).name_obfuscated)
                .collect();
            let uid = match group.iter().find_map(|&member| table.method(member)) {
                Some(uid) => uid,
                None => {
                    let uid = counters.next_method;
                    counters.next_method += 1;
                    uid
                }
            };
            for member in group {
                if table.method(member).is_none() {
                    table.set_method(member, uid);
                    assigned.methods += 1;
                }
            }
        }

        let mut fields: Vec<FieldId> = cls
            .fields
            .iter()
            .copied()
            .filter(|&f| classes.field(f).name_obfuscated && table.field(f).is_none())
            .collect();
        fields.sort_by(|&x, &y| classes.field(x).id.cmp(&classes.field(y).id));
        for f in fields {
            table.set_field(f, counters.next_field);
            counters.next_field += 1;
            assigned.fields += 1;
        }
    }

    debug!(?assigned, "assigned missing uids");
    assigned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ClassEnvBuilder;
    use crate::classfile::{ClassFile, ClassMember};
    use crate::config::{EnvOptions, MatcherConfig, NamePattern, NamePatterns};
    use crate::input::InputSet;
    use crate::matcher::Matcher;

    fn class(name: &str, super_class: &str, methods: &[&str], fields: &[&str]) -> ClassFile {
        let member = |name: &&str, desc: &str| ClassMember {
            name: name.to_string(),
            descriptor: desc.to_string(),
            ..ClassMember::default()
        };
        ClassFile {
            this_class: name.to_string(),
            super_class: Some(super_class.to_string()),
            methods: methods.iter().map(|m| member(m, "()V")).collect(),
            fields: fields.iter().map(|f| member(f, "I")).collect(),
            ..ClassFile::default()
        }
    }

    fn environment() -> ClassEnvironment {
        let build = |side: Side| {
            let mut builder = ClassEnvBuilder::new(side);
            builder.add_class(class("x", "java/lang/Object", &["n", "o"], &["f"]), true);
            builder.add_class(class("y", "x", &["n"], &["g", "h"]), true);
            builder.build(&NamePatterns::default()).unwrap()
        };
        ClassEnvironment::new(build(Side::A), build(Side::B), EnvOptions::default(), InputSet::default())
    }

    #[test]
    fn assignment_is_stable_and_shares_group_uids() {
        let mut env = environment();
        let mut counters = UidCounters::default();

        let first = assign_missing_uids(&mut env, &mut counters);
        assert_eq!(first, UidAssignment { classes: 2, methods: 3, fields: 3 });
        assert_eq!(counters, UidCounters { next_class: 3, next_method: 3, next_field: 4 });

        let b = env.b();
        let (x, y) = (b.class_by_name("x").unwrap(), b.class_by_name("y").unwrap());
        let xn = b.method_by_id(x, "n()V").unwrap();
        let yn = b.method_by_id(y, "n()V").unwrap();
        let table = env.uids(Side::B);
        assert_eq!(table.class(x), Some(1));
        assert_eq!(table.class(y), Some(2));
        assert_eq!(table.method(xn), table.method(yn));

        let second = assign_missing_uids(&mut env, &mut counters);
        assert_eq!(second.total(), 0);
        assert_eq!(counters, UidCounters { next_class: 3, next_method: 3, next_field: 4 });
    }

    #[test]
    fn matched_entities_inherit_uids_from_side_a() {
        let env = environment();
        let mut matcher = Matcher::new(env, MatcherConfig::default());
        let (xa, xb) = (
            matcher.env().a().class_by_name("x").unwrap(),
            matcher.env().b().class_by_name("x").unwrap(),
        );
        matcher.match_classes(xa, xb).unwrap();

        let mut env = matcher.into_env();
        env.uids[Side::A.index()].set_class(xa, 42);
        let copied = propagate_uids(&mut env);
        assert_eq!(copied.classes, 1);
        assert_eq!(env.uids(Side::B).class(xb), Some(42));

        let mut counters = UidCounters::default();
        let assigned = assign_missing_uids(&mut env, &mut counters);
        assert_eq!(assigned.classes, 1);
        assert_eq!(env.uids(Side::B).class(xb), Some(42));
    }

    #[test]
    fn named_group_members_get_no_uid() {
        let patterns = NamePatterns {
            class: Some(NamePattern::new("net/.*").unwrap()),
            ..NamePatterns::default()
        };
        let build = |side: Side| {
            let mut builder = ClassEnvBuilder::new(side);
            builder.add_class(class("net/Base", "java/lang/Object", &["run"], &[]), true);
            builder.add_class(class("y", "net/Base", &["run"], &[]), true);
            builder.build(&patterns).unwrap()
        };
        let mut env = ClassEnvironment::new(build(Side::A), build(Side::B), EnvOptions::default(), InputSet::default());

        let b = env.b();
        let (base, y) = (b.class_by_name("net/Base").unwrap(), b.class_by_name("y").unwrap());
        let (base_run, y_run) = (b.method_by_id(base, "run()V").unwrap(), b.method_by_id(y, "run()V").unwrap());
        assert_eq!(b.hierarchy_group(y_run).len(), 2);
        assert!(!b.method(base_run).name_obfuscated);
        assert!(b.method(y_run).name_obfuscated);

        let assigned = assign_missing_uids(&mut env, &mut UidCounters::default());
        assert_eq!(assigned.methods, 1);
        assert_eq!(env.uids(Side::B).method(base_run), None);
        assert!(env.uids(Side::B).method(y_run).is_some());
    }
}
