//! Structural classifiers and the ranker combining them.
//!
//! A classifier compares a subject from side A with a candidate from side
//! B and returns a similarity in `[0, 1]`. The ranker weights each
//! classifier, drops candidates whose accumulated mismatch already rules
//! them out and sorts the rest by combined score.

pub mod class;
pub mod field;
pub mod method;
pub mod util;
pub mod var;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::env::ClassEnvironment;
use crate::error::{MatchError, MatchResult};
use crate::graph::EntityHandle;
use crate::model::{ClassId, FieldId, MethodId, VarId};

/// Cumulative classifier tiers; higher levels add costlier classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ClassifierLevel {
    Initial,
    Intermediate,
    Full,
    Extra,
}

pub type ScoreFn<H> = fn(&ClassEnvironment, H, H) -> f64;

pub struct Classifier<H> {
    pub name: &'static str,
    pub weight: f64,
    pub min_level: ClassifierLevel,
    pub score: ScoreFn<H>,
}

impl<H> Classifier<H> {
    pub const fn new(name: &'static str, weight: f64, min_level: ClassifierLevel, score: ScoreFn<H>) -> Self {
        Self {
            name,
            weight,
            min_level,
            score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifierScore {
    pub classifier: &'static str,
    pub score: f64,
}

/// One ranked candidate with its combined raw score and breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct RankResult<H> {
    pub candidate: H,
    pub score: f64,
    pub results: Vec<ClassifierScore>,
}

pub struct Ranker<H> {
    classifiers: Vec<Classifier<H>>,
    prefilter: fn(&ClassEnvironment, H, H) -> bool,
}

impl<H: EntityHandle> Ranker<H> {
    pub fn new(classifiers: Vec<Classifier<H>>, prefilter: fn(&ClassEnvironment, H, H) -> bool) -> Self {
        Self { classifiers, prefilter }
    }

    pub fn classifiers(&self, level: ClassifierLevel) -> impl Iterator<Item = &Classifier<H>> {
        self.classifiers.iter().filter(move |c| c.min_level <= level)
    }

    /// Sum of the weights active at `level`.
    pub fn max_score(&self, level: ClassifierLevel) -> f64 {
        self.classifiers(level).map(|c| c.weight).sum()
    }

    /// Whether `candidate` passes the potential-equality pre-filter.
    pub fn admits(&self, env: &ClassEnvironment, subject: H, candidate: H) -> bool {
        (self.prefilter)(env, subject, candidate)
    }

    pub fn rank(
        &self,
        env: &ClassEnvironment,
        subject: H,
        candidates: &[H],
        level: ClassifierLevel,
        max_mismatch: f64,
    ) -> MatchResult<Vec<RankResult<H>>> {
        let mut ranked = Vec::new();

        'candidates: for &candidate in candidates {
            if !self.admits(env, subject, candidate) {
                continue;
            }

            let mut score = 0.0;
            let mut mismatch = 0.0;
            let mut results = Vec::with_capacity(self.classifiers.len());
            for classifier in self.classifiers(level) {
                let similarity = (classifier.score)(env, subject, candidate);
                if !(0.0..=1.0).contains(&similarity) {
                    return Err(MatchError::InvalidScore {
                        classifier: classifier.name,
                        score: similarity,
                    });
                }
                let weighted = similarity * classifier.weight;
                score += weighted;
                mismatch += classifier.weight - weighted;
                if mismatch >= max_mismatch {
                    continue 'candidates;
                }
                results.push(ClassifierScore {
                    classifier: classifier.name,
                    score: weighted,
                });
            }

            ranked.push(RankResult {
                candidate,
                score,
                results,
            });
        }

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(ranked)
    }
}

/// Squared fraction of the attainable score.
pub fn normalized_score(raw: f64, max_score: f64) -> f64 {
    if max_score <= 0.0 {
        return 0.0;
    }
    let ratio = raw / max_score;
    ratio * ratio
}

/// Raw score whose normalized value is `score`.
pub fn raw_score(score: f64, max_score: f64) -> f64 {
    score.sqrt() * max_score
}

/// Largest accumulated mismatch a candidate may have and still reach the
/// absolute threshold with the relative margin applied.
pub fn max_mismatch(max_score: f64, absolute: f64, relative: f64) -> f64 {
    max_score - raw_score(absolute * (1.0 - relative), max_score)
}

/// Accepts the top candidate if it clears `absolute` and beats the
/// runner-up by the `relative` margin.
pub fn check_rank<H>(ranking: &[RankResult<H>], absolute: f64, relative: f64, max_score: f64) -> bool {
    let Some(best) = ranking.first() else {
        return false;
    };
    let score = normalized_score(best.score, max_score);
    if score < absolute {
        return false;
    }
    match ranking.get(1) {
        None => true,
        Some(next) => normalized_score(next.score, max_score) < score * (1.0 - relative),
    }
}

pub static CLASS_RANKER: Lazy<Ranker<ClassId>> = Lazy::new(class::ranker);
pub static METHOD_RANKER: Lazy<Ranker<MethodId>> = Lazy::new(method::ranker);
pub static FIELD_RANKER: Lazy<Ranker<FieldId>> = Lazy::new(field::ranker);
pub static VAR_RANKER: Lazy<Ranker<VarId>> = Lazy::new(var::ranker);

/// Small two-sided environments for classifier tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use crate::builder::ClassEnvBuilder;
    use crate::bytecode::{Instruction, Operand};
    use crate::classfile::{ClassFile, ClassMember, Code};
    use crate::config::{EnvOptions, NamePatterns};
    use crate::env::{ClassEnv, ClassEnvironment};
    use crate::input::InputSet;
    use crate::model::Side;

    /// Code whose instruction offsets equal their indices.
    pub fn code(insns: Vec<(u8, Operand)>) -> Code {
        Code {
            instructions: insns
                .into_iter()
                .enumerate()
                .map(|(i, (opcode, operand))| Instruction {
                    offset: i as u32,
                    opcode,
                    operand,
                })
                .collect(),
            ..Code::default()
        }
    }

    pub fn member(name: &str, desc: &str, code: Option<Code>) -> ClassMember {
        ClassMember {
            name: name.to_string(),
            descriptor: desc.to_string(),
            code,
            ..ClassMember::default()
        }
    }

    pub fn class(name: &str, fields: Vec<ClassMember>, methods: Vec<ClassMember>) -> ClassFile {
        ClassFile {
            this_class: name.to_string(),
            super_class: Some("java/lang/Object".into()),
            fields,
            methods,
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

    pub fn environment(a: Vec<ClassFile>, b: Vec<ClassFile>) -> ClassEnvironment {
        ClassEnvironment::new(side(Side::A, a), side(Side::B, b), EnvOptions::default(), InputSet::default())
    }
}
