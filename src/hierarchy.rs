//! Method hierarchy groups: sets of virtual methods that override each
//! other along super class and interface chains.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::model::{ClassId, ClassInstance, MethodId, MethodInstance};

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// All proper ancestors of `cls`, breadth first, each listed once.
pub(crate) fn ancestors(classes: &[ClassInstance], cls: ClassId) -> Vec<ClassId> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    let mut out = Vec::new();

    let push_parents = |c: &ClassInstance, queue: &mut VecDeque<ClassId>| {
        queue.extend(c.super_class);
        queue.extend(c.interfaces.iter().copied());
    };
    push_parents(&classes[cls.index()], &mut queue);

    while let Some(next) = queue.pop_front() {
        if next == cls || !seen.insert(next) {
            continue;
        }
        out.push(next);
        push_parents(&classes[next.index()], &mut queue);
    }
    out
}

/// Unions every virtual method with same-id virtual methods of its
/// ancestors, records the group index on each method and returns the
/// groups in method order.
pub(crate) fn compute_groups(classes: &[ClassInstance], methods: &mut [MethodInstance]) -> Vec<Vec<MethodId>> {
    let mut by_owner: HashMap<(ClassId, &str), usize> = HashMap::with_capacity(methods.len());
    for (idx, m) in methods.iter().enumerate() {
        by_owner.insert((m.owner, m.id.as_str()), idx);
    }

    let mut sets = DisjointSet::new(methods.len());
    for (cls_idx, cls) in classes.iter().enumerate() {
        if cls.methods.is_empty() {
            continue;
        }
        let parents = ancestors(classes, ClassId::from_usize(cls_idx));
        if parents.is_empty() {
            continue;
        }
        for &m in &cls.methods {
            let method = &methods[m.index()];
            if !method.is_virtual() {
                continue;
            }
            for &parent in &parents {
                if let Some(&other) = by_owner.get(&(parent, method.id.as_str()))
                    && methods[other].is_virtual()
                {
                    sets.union(m.index(), other);
                }
            }
        }
    }

    let mut group_of_root: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<Vec<MethodId>> = Vec::new();
    let mut assignment = Vec::with_capacity(methods.len());
    for idx in 0..methods.len() {
        let root = sets.find(idx);
        let group = *group_of_root.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[group].push(MethodId::from_usize(idx));
        assignment.push(group);
    }
    for (method, group) in methods.iter_mut().zip(assignment) {
        method.group = group;
    }
    groups
}
