//! Automatic matching passes.
//!
//! A pass scores every unmatched subject of side A against a candidate
//! pool on side B in parallel, keeps the confidently ranked winners,
//! discards candidates claimed by more than one subject and commits the
//! rest through [`Matcher`] on the calling thread.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::classifier::{
    CLASS_RANKER, ClassifierLevel, FIELD_RANKER, METHOD_RANKER, Ranker, VAR_RANKER, check_rank, max_mismatch,
};
use crate::config::Thresholds;
use crate::env::ClassEnvironment;
use crate::error::MatchResult;
use crate::executor::{ProgressTracker, TaskContext};
use crate::graph::EntityHandle;
use crate::matcher::Matcher;
use crate::model::{ClassId, FieldId, MethodId, Side, VarId};

/// Subjects paired with the index of the candidate pool they rank against.
#[derive(Debug)]
pub struct WorkSet<H> {
    pools: Vec<Vec<H>>,
    items: Vec<(H, usize)>,
}

impl<H> Default for WorkSet<H> {
    fn default() -> Self {
        Self {
            pools: Vec::new(),
            items: Vec::new(),
        }
    }
}

impl<H: EntityHandle> WorkSet<H> {
    fn add_pool(&mut self, subjects: impl IntoIterator<Item = H>, pool: Vec<H>) {
        let index = self.pools.len();
        let before = self.items.len();
        self.items.extend(subjects.into_iter().map(|s| (s, index)));
        if self.items.len() > before {
            self.pools.push(pool);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn is_open<H: EntityHandle>(env: &ClassEnvironment, side: Side, h: H) -> bool {
    env.match_of(side, h).is_none() && env.is_matchable(side, h)
}

/// Real input classes of A against the unmatched real input classes of B.
pub fn class_work_set(env: &ClassEnvironment) -> WorkSet<ClassId> {
    let candidates: Vec<ClassId> = env.b().input_classes().filter(|&c| is_open(env, Side::B, c)).collect();
    let subjects: Vec<ClassId> = env.a().input_classes().filter(|&c| is_open(env, Side::A, c)).collect();
    let mut work = WorkSet::default();
    if !candidates.is_empty() {
        work.add_pool(subjects, candidates);
    }
    work
}

fn matched_input_classes(env: &ClassEnvironment) -> Vec<(ClassId, ClassId)> {
    env.a()
        .input_classes()
        .filter_map(|a| env.match_of(Side::A, a).map(|b| (a, b)))
        .collect()
}

pub fn method_work_set(env: &ClassEnvironment) -> WorkSet<MethodId> {
    let mut work = WorkSet::default();
    for (ca, cb) in matched_input_classes(env) {
        let subjects = env
            .a()
            .class(ca)
            .methods
            .iter()
            .copied()
            .filter(|&m| env.a().method(m).real && is_open(env, Side::A, m));
        let pool: Vec<MethodId> = env.b().class(cb).methods.iter().copied().filter(|&m| env.b().method(m).real).collect();
        if !pool.is_empty() {
            work.add_pool(subjects, pool);
        }
    }
    work
}

pub fn field_work_set(env: &ClassEnvironment) -> WorkSet<FieldId> {
    let mut work = WorkSet::default();
    for (ca, cb) in matched_input_classes(env) {
        let subjects = env
            .a()
            .class(ca)
            .fields
            .iter()
            .copied()
            .filter(|&f| env.a().field(f).real && is_open(env, Side::A, f));
        let pool: Vec<FieldId> = env.b().class(cb).fields.iter().copied().filter(|&f| env.b().field(f).real).collect();
        if !pool.is_empty() {
            work.add_pool(subjects, pool);
        }
    }
    work
}

pub fn var_work_set(env: &ClassEnvironment, is_arg: bool) -> WorkSet<VarId> {
    let mut work = WorkSet::default();
    for (ca, _) in matched_input_classes(env) {
        for &ma in &env.a().class(ca).methods {
            let Some(mb) = env.match_of(Side::A, ma) else {
                continue;
            };
            let subjects = env
                .a()
                .method_vars(ma, is_arg)
                .iter()
                .copied()
                .filter(|&v| is_open(env, Side::A, v));
            let pool = env.b().method_vars(mb, is_arg).to_vec();
            if !pool.is_empty() {
                work.add_pool(subjects, pool);
            }
        }
    }
    work
}

/// Drops every pair whose candidate was accepted for more than one subject.
pub fn sanitize<H: EntityHandle>(accepted: HashMap<H, H>) -> BTreeMap<H, H> {
    let mut claims: HashMap<H, usize> = HashMap::with_capacity(accepted.len());
    for b in accepted.values() {
        *claims.entry(*b).or_default() += 1;
    }
    accepted.into_iter().filter(|(_, b)| claims[b] == 1).collect()
}

/// Ranks every subject of `work` and returns the conflict-free accepted
/// pairs. Does not touch the match graph.
pub fn auto_match<H: EntityHandle>(
    env: &ClassEnvironment,
    ctx: &TaskContext<'_>,
    work: &WorkSet<H>,
    level: ClassifierLevel,
    thresholds: Thresholds,
    ranker: &Ranker<H>,
) -> MatchResult<BTreeMap<H, H>> {
    if work.is_empty() {
        return Ok(BTreeMap::new());
    }

    let max_score = ranker.max_score(level);
    let mismatch = max_mismatch(max_score, thresholds.absolute, thresholds.relative);
    let accepted: DashMap<H, H> = DashMap::new();
    let tracker = ProgressTracker::new(work.len(), ctx);

    ctx.executor.try_for_each(&work.items, |&(subject, pool)| {
        ctx.check_cancelled()?;
        let ranking = ranker.rank(env, subject, &work.pools[pool], level, mismatch)?;
        if check_rank(&ranking, thresholds.absolute, thresholds.relative, max_score) {
            accepted.insert(subject, ranking[0].candidate);
        }
        tracker.advance();
        Ok(())
    })?;
    ctx.check_cancelled()?;

    let accepted: HashMap<H, H> = accepted.into_iter().collect();
    let found = accepted.len();
    let sanitized = sanitize(accepted);
    if sanitized.len() < found {
        debug!(dropped = found - sanitized.len(), "discarded conflicting matches");
    }
    Ok(sanitized)
}

fn commit<H: EntityHandle>(
    matcher: &mut Matcher,
    pairs: BTreeMap<H, H>,
    apply: fn(&mut Matcher, H, H) -> MatchResult<()>,
) -> MatchResult<usize> {
    let mut committed = 0;
    for (a, b) in pairs {
        // earlier commits may already have propagated onto this pair
        let env = matcher.env();
        if env.match_of(Side::A, a).is_some() || env.match_of(Side::B, b).is_some() {
            continue;
        }
        apply(matcher, a, b)?;
        committed += 1;
    }
    Ok(committed)
}

/// Scores `work` and commits the result. Nothing is committed unless
/// every subject ranked without error or cancellation.
fn run_pass<H: EntityHandle>(
    matcher: &mut Matcher,
    ctx: &TaskContext<'_>,
    work: &WorkSet<H>,
    level: ClassifierLevel,
    thresholds: Thresholds,
    ranker: &Ranker<H>,
    apply: fn(&mut Matcher, H, H) -> MatchResult<()>,
) -> MatchResult<usize> {
    let pairs = auto_match(matcher.env(), ctx, work, level, thresholds, ranker)?;
    commit(matcher, pairs, apply)
}

pub fn auto_match_classes(matcher: &mut Matcher, ctx: &TaskContext<'_>, level: ClassifierLevel) -> MatchResult<usize> {
    let thresholds = matcher.config().classes;
    let work = class_work_set(matcher.env());
    let matched = run_pass(matcher, ctx, &work, level, thresholds, &CLASS_RANKER, Matcher::match_classes)?;
    debug!(?level, subjects = work.len(), matched, "class pass finished");
    Ok(matched)
}

pub fn auto_match_methods(matcher: &mut Matcher, ctx: &TaskContext<'_>, level: ClassifierLevel) -> MatchResult<usize> {
    let thresholds = matcher.config().methods;
    let work = method_work_set(matcher.env());
    let matched = run_pass(matcher, ctx, &work, level, thresholds, &METHOD_RANKER, Matcher::match_methods)?;
    debug!(?level, subjects = work.len(), matched, "method pass finished");
    Ok(matched)
}

pub fn auto_match_fields(matcher: &mut Matcher, ctx: &TaskContext<'_>, level: ClassifierLevel) -> MatchResult<usize> {
    let thresholds = matcher.config().fields;
    let work = field_work_set(matcher.env());
    let matched = run_pass(matcher, ctx, &work, level, thresholds, &FIELD_RANKER, Matcher::match_fields)?;
    debug!(?level, subjects = work.len(), matched, "field pass finished");
    Ok(matched)
}

pub fn auto_match_args(matcher: &mut Matcher, ctx: &TaskContext<'_>, level: ClassifierLevel) -> MatchResult<usize> {
    auto_match_vars_of_kind(matcher, ctx, level, true)
}

pub fn auto_match_vars(matcher: &mut Matcher, ctx: &TaskContext<'_>, level: ClassifierLevel) -> MatchResult<usize> {
    auto_match_vars_of_kind(matcher, ctx, level, false)
}

fn auto_match_vars_of_kind(
    matcher: &mut Matcher,
    ctx: &TaskContext<'_>,
    level: ClassifierLevel,
    is_arg: bool,
) -> MatchResult<usize> {
    let thresholds = if is_arg { matcher.config().args } else { matcher.config().vars };
    let work = var_work_set(matcher.env(), is_arg);
    let matched = run_pass(matcher, ctx, &work, level, thresholds, &VAR_RANKER, Matcher::match_vars)?;
    debug!(?level, is_arg, subjects = work.len(), matched, "variable pass finished");
    Ok(matched)
}

/// New matches per entity kind made by [`auto_match_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AutoMatchReport {
    pub classes: usize,
    pub methods: usize,
    pub fields: usize,
    pub args: usize,
    pub vars: usize,
}

impl AutoMatchReport {
    pub fn total(&self) -> usize {
        self.classes + self.methods + self.fields + self.args + self.vars
    }
}

/// Hands out progress spans to a loop whose round count is unknown up
/// front. Each round takes half of what is left of the stage.
struct Rounds<'c, 'a> {
    stage: &'c TaskContext<'a>,
    used: f64,
}

impl<'c, 'a> Rounds<'c, 'a> {
    fn new(stage: &'c TaskContext<'a>) -> Self {
        Self { stage, used: 0.0 }
    }

    fn next_round(&mut self) -> TaskContext<'a> {
        let start = self.used;
        self.used += (1.0 - start) / 2.0;
        self.stage.subrange(start, self.used)
    }
}

const LEVEL_STAGES: [(ClassifierLevel, f64, f64); 3] = [
    (ClassifierLevel::Intermediate, 0.1, 0.3),
    (ClassifierLevel::Full, 0.3, 0.5),
    (ClassifierLevel::Extra, 0.5, 0.7),
];

/// Runs class passes, then member passes at rising levels, then
/// argument and variable passes until nothing new matches.
///
/// Progress across all passes is reported as one non-decreasing fraction.
pub fn auto_match_all(matcher: &mut Matcher, ctx: &TaskContext<'_>) -> MatchResult<AutoMatchReport> {
    let mut report = AutoMatchReport::default();
    ctx.report(0.0);

    let initial = ctx.subrange(0.0, 0.1);
    let first = auto_match_classes(matcher, &initial.subrange(0.0, 0.5), ClassifierLevel::Initial)?;
    report.classes += first;
    if first > 0 {
        report.classes += auto_match_classes(matcher, &initial.subrange(0.5, 1.0), ClassifierLevel::Initial)?;
    }
    initial.report(1.0);

    for (level, start, end) in LEVEL_STAGES {
        let stage = ctx.subrange(start, end);
        let mut rounds = Rounds::new(&stage);
        loop {
            let round = rounds.next_round();
            let methods = auto_match_methods(matcher, &round.subrange(0.0, 1.0 / 3.0), level)?;
            let fields = auto_match_fields(matcher, &round.subrange(1.0 / 3.0, 2.0 / 3.0), level)?;
            let classes = auto_match_classes(matcher, &round.subrange(2.0 / 3.0, 1.0), level)?;
            report.methods += methods;
            report.fields += fields;
            report.classes += classes;
            if methods + fields + classes == 0 {
                break;
            }
        }
        stage.report(1.0);
    }

    let stage = ctx.subrange(0.7, 1.0);
    let mut rounds = Rounds::new(&stage);
    loop {
        let round = rounds.next_round();
        let args = auto_match_args(matcher, &round.subrange(0.0, 0.5), ClassifierLevel::Full)?;
        let vars = auto_match_vars(matcher, &round.subrange(0.5, 1.0), ClassifierLevel::Full)?;
        report.args += args;
        report.vars += vars;
        if args + vars == 0 {
            break;
        }
    }

    ctx.report(1.0);
    info!(
        classes = report.classes,
        methods = report.methods,
        fields = report.fields,
        args = report.args,
        vars = report.vars,
        "auto matching finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ClassEnvBuilder;
    use crate::classfile::ClassFile;
    use crate::classifier::Classifier;
    use crate::config::{EnvOptions, MatcherConfig, NamePatterns};
    use crate::env::ClassEnv;
    use crate::error::MatchError;
    use crate::executor::{Executor, quiet};
    use crate::input::InputSet;
    use std::sync::atomic::Ordering;

    fn side(side: Side, names: &[&str]) -> ClassEnv {
        let mut builder = ClassEnvBuilder::new(side);
        for name in names {
            builder.add_class(
                ClassFile {
                    this_class: name.to_string(),
                    super_class: Some("java/lang/Object".into()),
                    ..ClassFile::default()
                },
                true,
            );
        }
        builder.build(&NamePatterns::default()).unwrap()
    }

    fn matcher(names_a: &[&str], names_b: &[&str]) -> Matcher {
        let env = ClassEnvironment::new(
            side(Side::A, names_a),
            side(Side::B, names_b),
            EnvOptions::default(),
            InputSet::default(),
        );
        Matcher::new(env, MatcherConfig::default())
    }

    fn ranker(score: fn(&ClassEnvironment, ClassId, ClassId) -> f64) -> Ranker<ClassId> {
        Ranker::new(
            vec![Classifier::new("fixed", 1.0, ClassifierLevel::Initial, score)],
            |_, _, _| true,
        )
    }

    fn pass(matcher: &mut Matcher, ctx: &TaskContext<'_>, ranker: &Ranker<ClassId>) -> MatchResult<usize> {
        let work = class_work_set(matcher.env());
        let thresholds = matcher.config().classes;
        run_pass(matcher, ctx, &work, ClassifierLevel::Initial, thresholds, ranker, Matcher::match_classes)
    }

    fn matched_classes(matcher: &Matcher) -> usize {
        matcher.status(true).matched_classes
    }

    #[test]
    fn sanitize_drops_both_conflicting_claims() {
        let accepted: HashMap<ClassId, ClassId> = [
            (ClassId(0), ClassId(5)),
            (ClassId(1), ClassId(5)),
            (ClassId(2), ClassId(7)),
        ]
        .into_iter()
        .collect();
        let sanitized = sanitize(accepted);
        assert_eq!(sanitized.len(), 1);
        assert_eq!(sanitized.get(&ClassId(2)), Some(&ClassId(7)));
    }

    #[test]
    fn work_set_skips_empty_subject_lists() {
        let mut work: WorkSet<MethodId> = WorkSet::default();
        work.add_pool(Vec::new(), vec![MethodId(1)]);
        assert!(work.is_empty());
        assert!(work.pools.is_empty());
        work.add_pool(vec![MethodId(0), MethodId(2)], vec![MethodId(1)]);
        assert_eq!(work.len(), 2);
        assert_eq!(work.items[1], (MethodId(2), 0));
    }

    #[test]
    fn single_confident_candidate_is_committed() {
        let mut m = matcher(&["a"], &["c"]);
        let executor = Executor::sequential();
        let matched = pass(&mut m, &quiet(&executor), &ranker(|_, _, _| 1.0)).unwrap();
        assert_eq!(matched, 1);
        let (a, c) = (m.env().a().class_by_name("a").unwrap(), m.env().b().class_by_name("c").unwrap());
        assert_eq!(m.env().match_of(Side::A, a), Some(c));
    }

    #[test]
    fn candidate_claimed_twice_is_dropped_for_both() {
        let mut m = matcher(&["a", "b"], &["c"]);
        let executor = Executor::sequential();
        let matched = pass(&mut m, &quiet(&executor), &ranker(|_, _, _| 1.0)).unwrap();
        assert_eq!(matched, 0);
        assert_eq!(matched_classes(&m), 0);
    }

    #[test]
    fn cancelled_pass_commits_nothing() {
        let mut m = matcher(&["a"], &["c"]);
        let executor = Executor::sequential();
        let ctx = quiet(&executor);
        ctx.cancel.store(true, Ordering::Relaxed);

        let err = pass(&mut m, &ctx, &ranker(|_, _, _| 1.0)).unwrap_err();
        assert!(matches!(err, MatchError::Cancelled));
        let err = auto_match_classes(&mut m, &ctx, ClassifierLevel::Initial).unwrap_err();
        assert!(matches!(err, MatchError::Cancelled));
        assert_eq!(matched_classes(&m), 0);
    }

    #[test]
    fn out_of_range_score_fails_the_pass() {
        let mut m = matcher(&["a", "b"], &["c", "d"]);
        let executor = Executor::sequential();
        let err = pass(&mut m, &quiet(&executor), &ranker(|_, _, _| 1.5)).unwrap_err();
        assert!(matches!(err, MatchError::InvalidScore { classifier: "fixed", .. }));
        assert_eq!(matched_classes(&m), 0);
    }
}
