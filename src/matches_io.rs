//! Persisted match state: a line-oriented text file.
//!
//! ```text
//! Matches saved 2024-01-01 12:00:00, input files:
//! 	a:
//! 		1234	SHA-256	<base64>	app-1.0.jar
//! 	b:
//! 		1301	SHA-256	<base64>	app-1.1.jar
//! 	non-obf cls a	net/example/.*
//! c	La;	Lb;
//! 	m	a()V	b()V
//! 		ma	0	0
//! 	fu	b	c;;I
//! cu	a	Lq;
//! ```
//!
//! Reading replays the body through [`Matcher`]; entries that no longer
//! resolve against the loaded programs are logged and skipped.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

use crate::config::{NamePattern, NamePatterns};
use crate::env::{ClassEnv, ClassEnvironment};
use crate::error::MatchesFormatError;
use crate::graph::EntityHandle;
use crate::input::{InputFile, InputSet};
use crate::matcher::Matcher;
use crate::model::{ClassId, MethodId, Side, VarId};

const HEADER_PREFIX: &str = "Matches saved ";
const HEADER_SUFFIX: &str = ", input files:";

/// Everything above the first class entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchesHeader {
    pub saved: String,
    pub inputs: InputSet,
    pub a: NamePatterns,
    pub b: NamePatterns,
}

impl MatchesHeader {
    pub fn patterns(&self, side: Side) -> &NamePatterns {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }
}

/// Outcome of replaying a match file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReadSummary {
    pub classes: usize,
    pub methods: usize,
    pub fields: usize,
    pub vars: usize,
    pub pinned: usize,
    pub missing: usize,
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

pub fn write_file(env: &ClassEnvironment, path: &Path) -> Result<usize> {
    let file = File::create(path).with_context(|| format!("Failed to create match file: {}", path.display()))?;
    let mut out = BufWriter::new(file);
    let written = write(env, &mut out)?;
    out.flush()
        .with_context(|| format!("Failed to write match file: {}", path.display()))?;
    Ok(written)
}

/// Writes header and body, returning the number of class blocks.
pub fn write(env: &ClassEnvironment, out: &mut impl Write) -> Result<usize> {
    write_header(env, out)?;

    let mut blocks = 0;
    let mut classes_a: Vec<ClassId> = env.classes_a().filter(|&c| !env.a().class(c).is_array()).collect();
    classes_a.sort_by(|&x, &y| env.a().class(x).id.cmp(&env.a().class(y).id));
    for ca in classes_a {
        if let Some(cb) = env.match_of(Side::A, ca) {
            let (id_a, id_b) = (&env.a().class(ca).id, &env.b().class(cb).id);
            writeln!(out, "c\t{id_a}\t{id_b}")?;
            write_matched_members(env, out, ca, cb)?;
            blocks += 1;
        } else if !env.is_matchable(Side::A, ca) {
            writeln!(out, "cu\ta\t{}", env.a().class(ca).id)?;
            write_pinned_members(env, out, Side::A, ca)?;
            blocks += 1;
        }
    }

    let mut pinned_b: Vec<ClassId> = env
        .classes_b()
        .filter(|&c| !env.b().class(c).is_array() && !env.is_matchable(Side::B, c))
        .collect();
    pinned_b.sort_by(|&x, &y| env.b().class(x).id.cmp(&env.b().class(y).id));
    for cb in pinned_b {
        writeln!(out, "cu\tb\t{}", env.b().class(cb).id)?;
        write_pinned_members(env, out, Side::B, cb)?;
        blocks += 1;
    }

    debug!(blocks, "wrote match file");
    Ok(blocks)
}

fn write_header(env: &ClassEnvironment, out: &mut impl Write) -> Result<()> {
    let saved = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(out, "{HEADER_PREFIX}{saved}{HEADER_SUFFIX}")?;

    let inputs = env.inputs();
    let sections: [(&str, &[InputFile], bool); 5] = [
        ("a", &inputs.a, true),
        ("b", &inputs.b, true),
        ("cp", &inputs.cp, false),
        ("cp a", &inputs.cp_a, false),
        ("cp b", &inputs.cp_b, false),
    ];
    for (name, files, always) in sections {
        if files.is_empty() && !always {
            continue;
        }
        writeln!(out, "\t{name}:")?;
        for file in files {
            writeln!(
                out,
                "\t\t{}\t{}\t{}\t{}",
                file.size,
                file.hash_algorithm,
                file.hash_base64(),
                file.file_name
            )?;
        }
    }

    let options = env.options();
    let patterns = [
        ("cls a", &options.a.class),
        ("cls b", &options.b.class),
        ("mem a", &options.a.member),
        ("mem b", &options.b.member),
    ];
    for (name, pattern) in patterns {
        if let Some(pattern) = pattern {
            writeln!(out, "\tnon-obf {name}\t{}", pattern.source())?;
        }
    }
    Ok(())
}

fn write_matched_members(env: &ClassEnvironment, out: &mut impl Write, ca: ClassId, cb: ClassId) -> Result<()> {
    let (class_a, class_b) = (env.a().class(ca), env.b().class(cb));

    for &ma in &class_a.methods {
        let id_a = &env.a().method(ma).id;
        if let Some(mb) = env.match_of(Side::A, ma) {
            writeln!(out, "\tm\t{id_a}\t{}", env.b().method(mb).id)?;
            write_vars(env, out, ma, mb, true)?;
            write_vars(env, out, ma, mb, false)?;
        } else if !env.is_matchable(Side::A, ma) {
            writeln!(out, "\tmu\ta\t{id_a}")?;
        }
    }
    for &mb in &class_b.methods {
        if env.match_of(Side::B, mb).is_none() && !env.is_matchable(Side::B, mb) {
            writeln!(out, "\tmu\tb\t{}", env.b().method(mb).id)?;
        }
    }

    for &fa in &class_a.fields {
        let id_a = &env.a().field(fa).id;
        if let Some(fb) = env.match_of(Side::A, fa) {
            writeln!(out, "\tf\t{id_a}\t{}", env.b().field(fb).id)?;
        } else if !env.is_matchable(Side::A, fa) {
            writeln!(out, "\tfu\ta\t{id_a}")?;
        }
    }
    for &fb in &class_b.fields {
        if env.match_of(Side::B, fb).is_none() && !env.is_matchable(Side::B, fb) {
            writeln!(out, "\tfu\tb\t{}", env.b().field(fb).id)?;
        }
    }
    Ok(())
}

fn write_vars(env: &ClassEnvironment, out: &mut impl Write, ma: MethodId, mb: MethodId, is_arg: bool) -> Result<()> {
    let tag = if is_arg { "ma" } else { "mv" };
    for &va in env.a().method_vars(ma, is_arg) {
        let index_a = env.a().var(va).index;
        if let Some(vb) = env.match_of(Side::A, va) {
            writeln!(out, "\t\t{tag}\t{index_a}\t{}", env.b().var(vb).index)?;
        }
    }
    for (side, method) in [(Side::A, ma), (Side::B, mb)] {
        for &v in env.env(side).method_vars(method, is_arg) {
            if env.match_of(side, v).is_none() && !env.is_matchable(side, v) {
                writeln!(out, "\t\t{tag}u\t{}\t{}", side.label(), env.env(side).var(v).index)?;
            }
        }
    }
    Ok(())
}

fn write_pinned_members(env: &ClassEnvironment, out: &mut impl Write, side: Side, cls: ClassId) -> Result<()> {
    let classes = env.env(side);
    let class = classes.class(cls);
    for &m in &class.methods {
        if !env.is_matchable(side, m) {
            writeln!(out, "\tmu\t{}\t{}", side.label(), classes.method(m).id)?;
        }
    }
    for &f in &class.fields {
        if !env.is_matchable(side, f) {
            writeln!(out, "\tfu\t{}\t{}", side.label(), classes.field(f).id)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

pub fn read_header_file(path: &Path) -> Result<MatchesHeader> {
    let file = File::open(path).with_context(|| format!("Failed to open match file: {}", path.display()))?;
    read_header(BufReader::new(file))
}

/// Parses only the header, e.g. to configure name patterns before the
/// programs are loaded.
pub fn read_header(input: impl BufRead) -> Result<MatchesHeader> {
    let mut lines = numbered_lines(input);
    let mut header = MatchesHeader::default();
    parse_header(&mut lines, &mut header)?;
    Ok(header)
}

pub fn read_file(matcher: &mut Matcher, path: &Path) -> Result<ReadSummary> {
    let file = File::open(path).with_context(|| format!("Failed to open match file: {}", path.display()))?;
    read(matcher, BufReader::new(file)).with_context(|| format!("Failed to read match file: {}", path.display()))
}

/// Replays a match file against the loaded programs.
pub fn read(matcher: &mut Matcher, input: impl BufRead) -> Result<ReadSummary> {
    let mut lines = numbered_lines(input);
    let mut header = MatchesHeader::default();
    let first_body_line = parse_header(&mut lines, &mut header)?;
    warn_on_input_drift(&header.inputs, matcher.env().inputs());

    let mut replay = Replay {
        matcher,
        summary: ReadSummary::default(),
        class: ClassContext::None,
        method: MethodContext::None,
    };
    if let Some((number, line)) = first_body_line {
        replay.apply(number, &line)?;
    }
    for item in lines {
        let (number, line) = item?;
        replay.apply(number, &line)?;
    }

    let summary = replay.summary;
    debug!(?summary, "replayed match file");
    Ok(summary)
}

type NumberedLine = Result<(usize, String)>;

fn numbered_lines(input: impl BufRead) -> impl Iterator<Item = NumberedLine> {
    input.lines().enumerate().filter_map(|(i, line)| match line {
        Ok(line) if line.is_empty() => None,
        Ok(line) => Some(Ok((i + 1, line))),
        Err(e) => Some(Err(anyhow::Error::new(e).context(format!("Failed to read line {}", i + 1)))),
    })
}

fn malformed(line: usize, content: &str) -> anyhow::Error {
    MatchesFormatError::MalformedLine {
        line,
        content: content.to_string(),
    }
    .into()
}

/// Consumes header lines and returns the first body line, if any.
fn parse_header(
    lines: &mut impl Iterator<Item = NumberedLine>,
    header: &mut MatchesHeader,
) -> Result<Option<(usize, String)>> {
    let (number, first) = match lines.next() {
        Some(item) => item?,
        None => return Err(MatchesFormatError::MissingHeader { line: 1 }.into()),
    };
    let saved = first
        .strip_prefix(HEADER_PREFIX)
        .and_then(|rest| rest.strip_suffix(HEADER_SUFFIX))
        .ok_or(MatchesFormatError::MissingHeader { line: number })?;
    header.saved = saved.to_string();

    let mut section: Option<&mut Vec<InputFile>> = None;
    for item in lines {
        let (number, line) = item?;
        if let Some(file) = line.strip_prefix("\t\t") {
            let Some(files) = section.as_deref_mut() else {
                return Err(malformed(number, &line));
            };
            files.push(parse_input_file(number, file)?);
            continue;
        }
        let Some(entry) = line.strip_prefix('\t') else {
            return Ok(Some((number, line)));
        };

        if let Some(pattern_entry) = entry.strip_prefix("non-obf ") {
            section = None;
            let (kind, source) = pattern_entry.split_once('\t').ok_or_else(|| malformed(number, &line))?;
            let pattern = NamePattern::new(source).map_err(|_| MatchesFormatError::InvalidPattern {
                line: number,
                pattern: source.to_string(),
            })?;
            let slot = match kind {
                "cls a" => &mut header.a.class,
                "cls b" => &mut header.b.class,
                "mem a" => &mut header.a.member,
                "mem b" => &mut header.b.member,
                _ => {
                    return Err(MatchesFormatError::UnknownSection {
                        line: number,
                        name: kind.to_string(),
                    }
                    .into());
                }
            };
            *slot = Some(pattern);
            continue;
        }

        let name = entry.strip_suffix(':').ok_or_else(|| malformed(number, &line))?;
        let inputs = &mut header.inputs;
        section = Some(match name {
            "a" => &mut inputs.a,
            "b" => &mut inputs.b,
            "cp" => &mut inputs.cp,
            "cp a" => &mut inputs.cp_a,
            "cp b" => &mut inputs.cp_b,
            _ => {
                return Err(MatchesFormatError::UnknownSection {
                    line: number,
                    name: name.to_string(),
                }
                .into());
            }
        });
    }
    Ok(None)
}

fn parse_input_file(number: usize, entry: &str) -> Result<InputFile> {
    let parts: Vec<&str> = entry.splitn(4, '\t').collect();
    let [size, algorithm, hash, name] = parts[..] else {
        return Err(malformed(number, entry));
    };
    let size = size.parse().map_err(|_| MatchesFormatError::InvalidNumber {
        line: number,
        value: size.to_string(),
    })?;
    let hash = InputFile::decode_hash(hash).ok_or_else(|| malformed(number, entry))?;
    Ok(InputFile {
        size,
        hash_algorithm: algorithm.to_string(),
        hash,
        file_name: name.to_string(),
    })
}

fn warn_on_input_drift(saved: &InputSet, loaded: &InputSet) {
    let sections = [
        ("a", &saved.a, &loaded.a),
        ("b", &saved.b, &loaded.b),
        ("cp", &saved.cp, &loaded.cp),
        ("cp a", &saved.cp_a, &loaded.cp_a),
        ("cp b", &saved.cp_b, &loaded.cp_b),
    ];
    for (name, saved, loaded) in sections {
        if saved.is_empty() || loaded.is_empty() {
            continue;
        }
        let digest = |files: &[InputFile]| {
            let mut out: BTreeMap<(u64, Vec<u8>), usize> = BTreeMap::new();
            for f in files {
                *out.entry((f.size, f.hash.clone())).or_default() += 1;
            }
            out
        };
        if digest(saved) != digest(loaded) {
            warn!(section = name, "input files differ from the ones the matches were saved for");
        }
    }
}

enum ClassContext {
    None,
    Matched(ClassId, ClassId),
    Pinned(Side, ClassId),
    Skipped,
}

enum MethodContext {
    None,
    Matched(MethodId, MethodId),
    Skipped,
}

struct Replay<'m> {
    matcher: &'m mut Matcher,
    summary: ReadSummary,
    class: ClassContext,
    method: MethodContext,
}

fn parse_side(number: usize, label: &str) -> Result<Side> {
    Side::from_label(label).ok_or_else(|| {
        MatchesFormatError::InvalidSide {
            line: number,
            side: label.to_string(),
        }
        .into()
    })
}

fn parse_index(number: usize, value: &str) -> Result<usize> {
    value.parse().map_err(|_| {
        MatchesFormatError::InvalidNumber {
            line: number,
            value: value.to_string(),
        }
        .into()
    })
}

impl Replay<'_> {
    fn env(&self) -> &ClassEnvironment {
        self.matcher.env()
    }

    fn missing(&mut self, number: usize, what: &str, id: &str) {
        warn!(line = number, "{what} {id} not found, skipping");
        self.summary.missing += 1;
    }

    fn apply(&mut self, number: usize, line: &str) -> Result<()> {
        let depth = line.chars().take_while(|&c| c == '\t').count();
        let fields: Vec<&str> = line[depth..].split('\t').collect();
        let [tag, first, second] = fields[..] else {
            return Err(malformed(number, line));
        };

        match (depth, tag) {
            (0, "c") => self.class_match(number, first, second),
            (0, "cu") => self.class_pin(number, parse_side(number, first)?, second),
            (1, "m") => self.member_match(number, first, second, true),
            (1, "f") => self.member_match(number, first, second, false),
            (1, "mu") => self.member_pin(number, parse_side(number, first)?, second, true),
            (1, "fu") => self.member_pin(number, parse_side(number, first)?, second, false),
            (2, "ma") => self.var_match(number, parse_index(number, first)?, parse_index(number, second)?, true),
            (2, "mv") => self.var_match(number, parse_index(number, first)?, parse_index(number, second)?, false),
            (2, "mau") => self.var_pin(number, parse_side(number, first)?, parse_index(number, second)?, true),
            (2, "mvu") => self.var_pin(number, parse_side(number, first)?, parse_index(number, second)?, false),
            _ => Err(malformed(number, line)),
        }
    }

    fn class_match(&mut self, number: usize, id_a: &str, id_b: &str) -> Result<()> {
        self.class = ClassContext::Skipped;
        self.method = MethodContext::None;
        let (Some(ca), Some(cb)) = (self.env().a().class_by_id(id_a), self.env().b().class_by_id(id_b)) else {
            self.missing(number, "class", &format!("{id_a} -> {id_b}"));
            return Ok(());
        };
        if !self.env().is_matchable(Side::A, ca) || !self.env().is_matchable(Side::B, cb) {
            warn!(line = number, id_a, id_b, "class pinned unmatchable, skipping");
            return Ok(());
        }
        if self.env().a().class(ca).array_dims != self.env().b().class(cb).array_dims {
            warn!(line = number, id_a, id_b, "array dimensions differ, skipping");
            return Ok(());
        }
        self.matcher.match_classes(ca, cb)?;
        self.summary.classes += 1;
        self.class = ClassContext::Matched(ca, cb);
        Ok(())
    }

    fn class_pin(&mut self, number: usize, side: Side, id: &str) -> Result<()> {
        self.class = ClassContext::Skipped;
        self.method = MethodContext::None;
        let Some(cls) = self.env().env(side).class_by_id(id) else {
            self.missing(number, "class", id);
            return Ok(());
        };
        self.matcher.unmatch_class(side, cls);
        self.matcher.set_matchable(side, cls, false)?;
        self.summary.pinned += 1;
        self.class = ClassContext::Pinned(side, cls);
        Ok(())
    }

    /// Owner of a member entry on `side` within the current class block.
    fn member_owner(&self, number: usize, side: Side) -> Result<Option<ClassId>> {
        match self.class {
            ClassContext::None => Err(MatchesFormatError::MemberOutsideClass { line: number }.into()),
            ClassContext::Skipped => Ok(None),
            ClassContext::Matched(ca, cb) => Ok(Some(if side == Side::A { ca } else { cb })),
            ClassContext::Pinned(pinned, cls) => Ok((pinned == side).then_some(cls)),
        }
    }

    fn member_match(&mut self, number: usize, id_a: &str, id_b: &str, is_method: bool) -> Result<()> {
        self.method = MethodContext::Skipped;
        let (Some(ca), Some(cb)) = (self.member_owner(number, Side::A)?, self.member_owner(number, Side::B)?) else {
            return Ok(());
        };

        if is_method {
            let (Some(ma), Some(mb)) = (self.env().a().method_by_id(ca, id_a), self.env().b().method_by_id(cb, id_b))
            else {
                self.missing(number, "method", &format!("{id_a} -> {id_b}"));
                return Ok(());
            };
            if !self.can_match(number, ma, mb) || !self.in_matched_hierarchy(ma, mb) {
                return Ok(());
            }
            self.matcher.match_methods(ma, mb)?;
            self.summary.methods += 1;
            self.method = MethodContext::Matched(ma, mb);
        } else {
            let (Some(fa), Some(fb)) = (self.env().a().field_by_id(ca, id_a), self.env().b().field_by_id(cb, id_b))
            else {
                self.missing(number, "field", &format!("{id_a} -> {id_b}"));
                return Ok(());
            };
            if !self.can_match(number, fa, fb) {
                return Ok(());
            }
            self.matcher.match_fields(fa, fb)?;
            self.summary.fields += 1;
        }
        Ok(())
    }

    fn can_match<H: EntityHandle>(&self, number: usize, a: H, b: H) -> bool {
        let ok = self.env().is_matchable(Side::A, a) && self.env().is_matchable(Side::B, b);
        if !ok {
            warn!(line = number, "{a:?} or {b:?} is pinned unmatchable, skipping");
        }
        ok
    }

    /// A method whose group is already matched may only join the matched group.
    fn in_matched_hierarchy(&self, ma: MethodId, mb: MethodId) -> bool {
        let env = self.env();
        let fits = |side: Side, m: MethodId, other: &ClassEnv, target: MethodId| {
            env.hierarchy_match(side, m)
                .is_none_or(|hm| other.hierarchy_group(hm).contains(&target))
        };
        let ok = fits(Side::A, ma, env.b(), mb) && fits(Side::B, mb, env.a(), ma);
        if !ok {
            warn!(?ma, ?mb, "method conflicts with its matched hierarchy, skipping");
        }
        ok
    }

    fn member_pin(&mut self, number: usize, side: Side, id: &str, is_method: bool) -> Result<()> {
        self.method = MethodContext::Skipped;
        let Some(owner) = self.member_owner(number, side)? else {
            return Ok(());
        };
        let classes = self.env().env(side);
        if is_method {
            let Some(m) = classes.method_by_id(owner, id) else {
                self.missing(number, "method", id);
                return Ok(());
            };
            // the class line may have propagated a group match onto this
            // method; earlier blocks' pairs in the group must survive
            self.matcher.detach_method(side, m);
            self.matcher.set_matchable(side, m, false)?;
        } else {
            let Some(f) = classes.field_by_id(owner, id) else {
                self.missing(number, "field", id);
                return Ok(());
            };
            self.matcher.unmatch_field(side, f);
            self.matcher.set_matchable(side, f, false)?;
        }
        self.summary.pinned += 1;
        Ok(())
    }

    fn current_method(&self, number: usize) -> Result<Option<(MethodId, MethodId)>> {
        match self.method {
            MethodContext::None => Err(MatchesFormatError::VarOutsideMethod { line: number }.into()),
            MethodContext::Skipped => Ok(None),
            MethodContext::Matched(ma, mb) => Ok(Some((ma, mb))),
        }
    }

    fn var_at(&self, side: Side, method: MethodId, is_arg: bool, index: usize) -> Option<VarId> {
        self.env().env(side).method_vars(method, is_arg).get(index).copied()
    }

    fn var_match(&mut self, number: usize, index_a: usize, index_b: usize, is_arg: bool) -> Result<()> {
        let Some((ma, mb)) = self.current_method(number)? else {
            return Ok(());
        };
        let (Some(va), Some(vb)) = (self.var_at(Side::A, ma, is_arg, index_a), self.var_at(Side::B, mb, is_arg, index_b))
        else {
            self.missing(number, "variable", &format!("{index_a} -> {index_b}"));
            return Ok(());
        };
        if !self.can_match(number, va, vb) {
            return Ok(());
        }
        self.matcher.match_vars(va, vb)?;
        self.summary.vars += 1;
        Ok(())
    }

    fn var_pin(&mut self, number: usize, side: Side, index: usize, is_arg: bool) -> Result<()> {
        let Some((ma, mb)) = self.current_method(number)? else {
            return Ok(());
        };
        let method = if side == Side::A { ma } else { mb };
        let Some(v) = self.var_at(side, method, is_arg, index) else {
            self.missing(number, "variable", &index.to_string());
            return Ok(());
        };
        self.matcher.unmatch_var(side, v);
        self.matcher.set_matchable(side, v, false)?;
        self.summary.pinned += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ClassEnvBuilder;
    use crate::bytecode::{Instruction, Operand, opcodes};
    use crate::classfile::{ClassFile, ClassMember, Code, LocalVariable};
    use crate::config::{EnvOptions, MatcherConfig};
    use crate::model::FieldId;

    const HEADER: &str = "Matches saved 2024-05-01 10:00:00, input files:\n\
        \ta:\n\
        \t\t12\tSHA-256\tAAEC\tapp-1.0.jar\n\
        \tb:\n\
        \t\t14\tSHA-256\tAwQF\tapp-1.1.jar\n\
        \tcp:\n\
        \tnon-obf cls a\tnet/example/.*\n\
        \tnon-obf mem b\t[a-z]{4,}\n";

    #[test]
    fn header_lists_inputs_and_patterns() {
        let text = format!("{HEADER}c\tLa;\tLb;\n");
        let header = read_header(text.as_bytes()).unwrap();
        assert_eq!(header.saved, "2024-05-01 10:00:00");
        assert_eq!(header.inputs.a.len(), 1);
        assert_eq!(header.inputs.a[0].hash, vec![0, 1, 2]);
        assert_eq!(header.inputs.b[0].file_name, "app-1.1.jar");
        assert!(header.inputs.cp.is_empty());
        assert_eq!(header.a.class.as_ref().map(|p| p.source()), Some("net/example/.*"));
        assert_eq!(header.b.member.as_ref().map(|p| p.source()), Some("[a-z]{4,}"));
        assert!(header.patterns(Side::A).member.is_none());
    }

    #[test]
    fn header_errors_carry_line_numbers() {
        let err = read_header("Saved matches\n".as_bytes()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<MatchesFormatError>(),
            Some(&MatchesFormatError::MissingHeader { line: 1 })
        );

        let text = "Matches saved now, input files:\n\ta:\n\t\t12\tSHA-256\tAAEC\n";
        let err = read_header(text.as_bytes()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchesFormatError>(),
            Some(MatchesFormatError::MalformedLine { line: 3, .. })
        ));

        let text = "Matches saved now, input files:\n\tsomething:\n";
        let err = read_header(text.as_bytes()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchesFormatError>(),
            Some(MatchesFormatError::UnknownSection { line: 2, .. })
        ));
    }

    #[test]
    fn input_files_parse_sizes_and_hashes() {
        let file = parse_input_file(4, "99\tSHA-256\tAAEC\tlib with spaces.jar").unwrap();
        assert_eq!(file.size, 99);
        assert_eq!(file.file_name, "lib with spaces.jar");
        assert!(parse_input_file(4, "x\tSHA-256\tAAEC\tlib.jar").is_err());
    }

    fn member(name: &str, desc: &str) -> ClassMember {
        ClassMember {
            name: name.to_string(),
            descriptor: desc.to_string(),
            ..ClassMember::default()
        }
    }

    /// `k(II)V` with one local in slot 3.
    fn method_with_local() -> ClassMember {
        ClassMember {
            code: Some(Code {
                instructions: vec![Instruction {
                    offset: 0,
                    opcode: opcodes::RETURN,
                    operand: Operand::None,
                }],
                local_variables: vec![LocalVariable {
                    start_pc: 0,
                    length: 1,
                    name: "t".into(),
                    descriptor: "I".into(),
                    index: 3,
                }],
                ..Code::default()
            }),
            ..member("k", "(II)V")
        }
    }

    fn class(name: &str, super_class: &str, methods: Vec<ClassMember>, fields: &[&str]) -> ClassFile {
        ClassFile {
            this_class: name.to_string(),
            super_class: Some(super_class.to_string()),
            methods,
            fields: fields.iter().map(|f| member(f, "I")).collect(),
            ..ClassFile::default()
        }
    }

    fn side(side: Side, names: [&str; 3]) -> ClassEnv {
        let [base, sub, extra] = names;
        let mut builder = ClassEnvBuilder::new(side);
        builder.add_class(
            class(base, "java/lang/Object", vec![member("m", "()V"), method_with_local()], &["f", "g"]),
            true,
        );
        builder.add_class(class(sub, base, vec![member("m", "()V")], &[]), true);
        builder.add_class(class(extra, "java/lang/Object", vec![member("m", "()V")], &[]), true);
        builder.build(&NamePatterns::default()).unwrap()
    }

    /// A: `p{m, k, f, g}`, `q extends p{m}`, `r{m}`; B likewise with `x`, `y`, `s`.
    fn fixture() -> Matcher {
        let env = ClassEnvironment::new(
            side(Side::A, ["p", "q", "r"]),
            side(Side::B, ["x", "y", "s"]),
            EnvOptions::default(),
            InputSet::default(),
        );
        Matcher::new(env, MatcherConfig::default())
    }

    fn cls(m: &Matcher, side: Side, name: &str) -> ClassId {
        m.env().env(side).class_by_name(name).unwrap()
    }

    fn meth(m: &Matcher, side: Side, owner: &str, id: &str) -> MethodId {
        m.env().env(side).method_by_id(cls(m, side, owner), id).unwrap()
    }

    fn field(m: &Matcher, side: Side, owner: &str, id: &str) -> FieldId {
        m.env().env(side).field_by_id(cls(m, side, owner), id).unwrap()
    }

    fn push_states<H: EntityHandle>(env: &ClassEnvironment, side: Side, out: &mut Vec<String>) {
        for index in 0..H::count(env.env(side)) {
            let h = H::from_index(index);
            out.push(format!("{side:?} {h:?} -> {:?} matchable={}", env.match_of(side, h), env.is_matchable(side, h)));
        }
    }

    /// Match partner and matchable flag of every entity on both sides.
    fn states(env: &ClassEnvironment) -> Vec<String> {
        let mut out = Vec::new();
        for side in [Side::A, Side::B] {
            push_states::<ClassId>(env, side, &mut out);
            push_states::<MethodId>(env, side, &mut out);
            push_states::<FieldId>(env, side, &mut out);
            push_states::<VarId>(env, side, &mut out);
        }
        out
    }

    #[test]
    fn replay_restores_matches_and_every_pin_kind() {
        let mut m = fixture();
        let (p, q, r) = (cls(&m, Side::A, "p"), cls(&m, Side::A, "q"), cls(&m, Side::A, "r"));
        let (x, y, s) = (cls(&m, Side::B, "x"), cls(&m, Side::B, "y"), cls(&m, Side::B, "s"));
        m.match_classes(p, x).unwrap();
        m.match_classes(q, y).unwrap();

        // pin the subclass overrides first so the base match cannot spread to them
        let (qm, ym) = (meth(&m, Side::A, "q", "m()V"), meth(&m, Side::B, "y", "m()V"));
        m.unmatch_method(Side::A, qm);
        m.unmatch_method(Side::B, ym);
        m.set_matchable(Side::A, qm, false).unwrap();
        m.set_matchable(Side::B, ym, false).unwrap();
        m.match_methods(meth(&m, Side::A, "p", "m()V"), meth(&m, Side::B, "x", "m()V")).unwrap();

        let (pk, xk) = (meth(&m, Side::A, "p", "k(II)V"), meth(&m, Side::B, "x", "k(II)V"));
        m.match_methods(pk, xk).unwrap();
        let (args_a, args_b) = (m.env().a().method(pk).args.clone(), m.env().b().method(xk).args.clone());
        m.match_vars(args_a[0], args_b[0]).unwrap();
        m.set_matchable(Side::A, args_a[1], false).unwrap();
        let local_b = m.env().b().method(xk).vars[0];
        m.set_matchable(Side::B, local_b, false).unwrap();

        m.match_fields(field(&m, Side::A, "p", "f;;I"), field(&m, Side::B, "x", "f;;I")).unwrap();
        m.set_matchable(Side::A, field(&m, Side::A, "p", "g;;I"), false).unwrap();
        m.set_matchable(Side::B, field(&m, Side::B, "x", "g;;I"), false).unwrap();

        m.set_matchable(Side::A, r, false).unwrap();
        m.set_matchable(Side::A, meth(&m, Side::A, "r", "m()V"), false).unwrap();
        m.set_matchable(Side::B, s, false).unwrap();
        m.set_matchable(Side::B, meth(&m, Side::B, "s", "m()V"), false).unwrap();
        m.check_consistency().unwrap();

        let mut saved = Vec::new();
        write(m.env(), &mut saved).unwrap();
        let text = String::from_utf8(saved.clone()).unwrap();
        for line in [
            "\t\tma\t0\t0",
            "\t\tmau\ta\t1",
            "\t\tmvu\tb\t0",
            "\tfu\ta\tg;;I",
            "\tfu\tb\tg;;I",
            "c\tLq;\tLy;\n\tmu\ta\tm()V\n\tmu\tb\tm()V",
            "cu\ta\tLr;\n\tmu\ta\tm()V",
            "cu\tb\tLs;\n\tmu\tb\tm()V",
        ] {
            assert!(text.contains(line), "missing {line:?} in\n{text}");
        }

        let mut fresh = fixture();
        let summary = read(&mut fresh, saved.as_slice()).unwrap();
        assert_eq!(summary.missing, 0);
        assert_eq!(summary.pinned, 10);
        fresh.check_consistency().unwrap();
        assert_eq!(states(fresh.env()), states(m.env()));
    }

    #[test]
    fn member_pin_after_class_line_keeps_earlier_group_matches() {
        let mut m = fixture();
        let (p, q) = (cls(&m, Side::A, "p"), cls(&m, Side::A, "q"));
        let (x, y) = (cls(&m, Side::B, "x"), cls(&m, Side::B, "y"));
        m.match_classes(p, x).unwrap();
        m.match_classes(q, y).unwrap();
        let qm = meth(&m, Side::A, "q", "m()V");
        m.set_matchable(Side::A, qm, false).unwrap();
        let (pm, xm) = (meth(&m, Side::A, "p", "m()V"), meth(&m, Side::B, "x", "m()V"));
        m.match_methods(pm, xm).unwrap();

        let mut saved = Vec::new();
        write(m.env(), &mut saved).unwrap();
        let mut fresh = fixture();
        read(&mut fresh, saved.as_slice()).unwrap();

        assert_eq!(fresh.env().match_of(Side::A, pm), Some(xm));
        assert_eq!(fresh.env().match_of(Side::A, qm), None);
        assert!(!fresh.env().is_matchable(Side::A, qm));
        assert_eq!(states(fresh.env()), states(m.env()));
    }
}
