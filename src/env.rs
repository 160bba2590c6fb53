//! Loaded programs: one [`ClassEnv`] arena per side, and the
//! [`ClassEnvironment`] pairing both with the match graph.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

use crate::builder::ClassEnvBuilder;
use crate::classfile::ClassFile;
use crate::config::{EnvOptions, MatcherConfig};
use crate::graph::{EntityHandle, MatchGraph};
use crate::input::{InputSet, RawClass, load_inputs};
use crate::model::{
    ClassId, ClassInstance, FieldId, FieldInstance, MethodId, MethodInstance, MethodVarInstance, Side,
    VarId,
};
use crate::uid::UidTable;

/// All entities of one program plus its classpath.
#[derive(Debug)]
pub struct ClassEnv {
    pub(crate) side: Side,
    pub(crate) classes: Vec<ClassInstance>,
    pub(crate) methods: Vec<MethodInstance>,
    pub(crate) fields: Vec<FieldInstance>,
    pub(crate) vars: Vec<MethodVarInstance>,
    pub(crate) groups: Vec<Vec<MethodId>>,
    pub(crate) by_id: HashMap<String, ClassId>,
}

impl ClassEnv {
    pub fn side(&self) -> Side {
        self.side
    }

    pub fn class(&self, id: ClassId) -> &ClassInstance {
        &self.classes[id.index()]
    }

    pub fn method(&self, id: MethodId) -> &MethodInstance {
        &self.methods[id.index()]
    }

    pub fn field(&self, id: FieldId) -> &FieldInstance {
        &self.fields[id.index()]
    }

    pub fn var(&self, id: VarId) -> &MethodVarInstance {
        &self.vars[id.index()]
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    pub fn class_ids(&self) -> impl Iterator<Item = ClassId> + '_ {
        (0..self.classes.len()).map(ClassId::from_usize)
    }

    /// Real classes parsed from this side's primary inputs.
    pub fn input_classes(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.class_ids().filter(|&c| {
            let cls = self.class(c);
            cls.real && cls.input
        })
    }

    /// Lookup by descriptor-form id (`Lpkg/Name;`, `[I`).
    pub fn class_by_id(&self, id: &str) -> Option<ClassId> {
        self.by_id.get(id).copied()
    }

    /// Lookup by internal name (`pkg/Name`).
    pub fn class_by_name(&self, name: &str) -> Option<ClassId> {
        self.class_by_id(&crate::descriptor::class_id_from_internal_name(name))
    }

    pub fn method_by_id(&self, cls: ClassId, id: &str) -> Option<MethodId> {
        self.class(cls)
            .methods
            .iter()
            .copied()
            .find(|&m| self.method(m).id == id)
    }

    pub fn field_by_id(&self, cls: ClassId, id: &str) -> Option<FieldId> {
        self.class(cls)
            .fields
            .iter()
            .copied()
            .find(|&f| self.field(f).id == id)
    }

    /// Argument (`is_arg`) or local variable list of a method.
    pub fn method_vars(&self, method: MethodId, is_arg: bool) -> &[VarId] {
        let m = self.method(method);
        if is_arg { &m.args } else { &m.vars }
    }

    pub fn hierarchy_group(&self, method: MethodId) -> &[MethodId] {
        &self.groups[self.method(method).group]
    }

    /// Innermost element for arrays, the class itself otherwise.
    pub fn base_class(&self, cls: ClassId) -> ClassId {
        self.class(cls).element.unwrap_or(cls)
    }

    /// Depth of the super class chain, `java/lang/Object` being 0.
    pub fn hierarchy_depth(&self, cls: ClassId) -> usize {
        let mut depth = 0;
        let mut cur = self.class(cls).super_class;
        while let Some(next) = cur {
            depth += 1;
            if depth > self.classes.len() {
                break;
            }
            cur = self.class(next).super_class;
        }
        depth
    }
}

/// Paths making up a matching project.
#[derive(Debug, Clone, Default)]
pub struct ProjectPaths {
    pub a: Vec<PathBuf>,
    pub b: Vec<PathBuf>,
    pub cp: Vec<PathBuf>,
    pub cp_a: Vec<PathBuf>,
    pub cp_b: Vec<PathBuf>,
}

/// Both programs, their match graph and UIDs.
#[derive(Debug)]
pub struct ClassEnvironment {
    envs: [ClassEnv; 2],
    pub(crate) graph: MatchGraph,
    options: EnvOptions,
    /// Member acceptance thresholds applied when class scores rank members.
    pub(crate) thresholds: MatcherConfig,
    inputs: InputSet,
    pub(crate) uids: [UidTable; 2],
}

impl ClassEnvironment {
    pub fn new(a: ClassEnv, b: ClassEnv, options: EnvOptions, inputs: InputSet) -> Self {
        let graph = MatchGraph::new(&a, &b);
        let uids = [UidTable::new(&a), UidTable::new(&b)];
        Self {
            envs: [a, b],
            graph,
            options,
            thresholds: MatcherConfig::default(),
            inputs,
            uids,
        }
    }

    /// Loads and parses every input of the project, in parallel per class.
    pub fn load(paths: &ProjectPaths, options: EnvOptions) -> Result<Self> {
        let a = load_inputs(&paths.a).context("Failed to load inputs a")?;
        let b = load_inputs(&paths.b).context("Failed to load inputs b")?;
        let cp = load_inputs(&paths.cp).context("Failed to load shared classpath")?;
        let cp_a = load_inputs(&paths.cp_a).context("Failed to load classpath a")?;
        let cp_b = load_inputs(&paths.cp_b).context("Failed to load classpath b")?;

        let parsed_cp = parse_all(&cp.classes)?;
        let env_a = build_side(Side::A, parse_all(&a.classes)?, &parsed_cp, parse_all(&cp_a.classes)?, &options)?;
        let env_b = build_side(Side::B, parse_all(&b.classes)?, &parsed_cp, parse_all(&cp_b.classes)?, &options)?;

        info!(
            classes_a = env_a.input_classes().count(),
            classes_b = env_b.input_classes().count(),
            "loaded class environments"
        );

        let inputs = InputSet {
            a: a.files,
            b: b.files,
            cp: cp.files,
            cp_a: cp_a.files,
            cp_b: cp_b.files,
        };
        Ok(Self::new(env_a, env_b, options, inputs))
    }

    pub fn env(&self, side: Side) -> &ClassEnv {
        &self.envs[side.index()]
    }

    pub fn a(&self) -> &ClassEnv {
        &self.envs[0]
    }

    pub fn b(&self) -> &ClassEnv {
        &self.envs[1]
    }

    pub fn classes_a(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.a().class_ids()
    }

    pub fn classes_b(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.b().class_ids()
    }

    pub fn graph(&self) -> &MatchGraph {
        &self.graph
    }

    pub fn options(&self) -> &EnvOptions {
        &self.options
    }

    pub fn thresholds(&self) -> &MatcherConfig {
        &self.thresholds
    }

    pub fn inputs(&self) -> &InputSet {
        &self.inputs
    }

    pub fn uids(&self, side: Side) -> &UidTable {
        &self.uids[side.index()]
    }

    pub(crate) fn env_and_uids_mut(&mut self, side: Side) -> (&ClassEnv, &mut UidTable) {
        (&self.envs[side.index()], &mut self.uids[side.index()])
    }

    pub fn match_of<H: EntityHandle>(&self, side: Side, h: H) -> Option<H> {
        self.graph.match_of(side, h)
    }

    pub fn is_matchable<H: EntityHandle>(&self, side: Side, h: H) -> bool {
        self.graph.is_matchable(side, h)
    }

    pub fn is_matched<H: EntityHandle>(&self, side: Side, h: H) -> bool {
        self.graph.match_of(side, h).is_some()
    }

    /// The other side's counterpart forced on `m` by an already matched
    /// member of its hierarchy group.
    pub fn hierarchy_match(&self, side: Side, m: MethodId) -> Option<MethodId> {
        let group = self.env(side).hierarchy_group(m);
        if group.len() <= 1 {
            return None;
        }
        group.iter().find_map(|&member| self.graph.match_of(side, member))
    }

    pub fn check_consistency(&self) -> Result<()> {
        self.graph.check_consistency(self.a(), self.b())
    }
}

fn parse_all(raw: &[RawClass]) -> Result<Vec<ClassFile>> {
    raw.par_iter()
        .map(|r| ClassFile::parse(&r.bytes).with_context(|| format!("Failed to parse class: {}", r.origin)))
        .collect()
}

fn build_side(
    side: Side,
    inputs: Vec<ClassFile>,
    shared_cp: &[ClassFile],
    own_cp: Vec<ClassFile>,
    options: &EnvOptions,
) -> Result<ClassEnv> {
    let mut builder = ClassEnvBuilder::new(side);
    for cf in inputs {
        builder.add_class(cf, true);
    }
    for cf in own_cp {
        builder.add_class(cf, false);
    }
    for cf in shared_cp {
        builder.add_class(cf.clone(), false);
    }
    builder
        .build(options.patterns(side))
        .with_context(|| format!("Failed to build class environment {}", side.label()))
}
