use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{EnvOptions, MatcherConfig, NamePattern, NamePatterns};
use crate::env::ProjectPaths;
use crate::matches_io::MatchesHeader;

#[derive(Debug, Clone, Parser)]
#[command(name = "class-matcher")]
#[command(about = "Match classes, methods, fields and variables between two builds of an obfuscated Java program")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Load both programs, match them and write the match file.
    Match {
        #[command(flatten)]
        project: ProjectArgs,

        #[arg(short = 'o', long, value_name = "FILE")]
        output: PathBuf,

        /// Only replay the match file and match unobfuscated names.
        #[arg(long)]
        no_auto: bool,
    },
    /// Print matched/total counts.
    Status {
        #[command(flatten)]
        project: ProjectArgs,

        /// Count classpath classes too.
        #[arg(long)]
        all: bool,
    },
    /// Carry UIDs over from the previous version and assign new ones.
    Uids {
        #[command(flatten)]
        project: ProjectArgs,

        #[arg(long, value_name = "FILE", env = "CLASS_MATCHER_UID_STORE")]
        store: Option<PathBuf>,

        /// Version label the A side's UIDs are stored under.
        #[arg(long, value_name = "LABEL")]
        label_a: String,

        /// Version label to store the B side's UIDs under.
        #[arg(long, value_name = "LABEL")]
        label_b: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ProjectArgs {
    #[arg(short = 'a', long = "a", value_name = "PATH", required = true)]
    pub inputs_a: Vec<PathBuf>,

    #[arg(short = 'b', long = "b", value_name = "PATH", required = true)]
    pub inputs_b: Vec<PathBuf>,

    /// Classpath shared by both sides.
    #[arg(long, value_name = "PATH")]
    pub cp: Vec<PathBuf>,

    #[arg(long, value_name = "PATH")]
    pub cp_a: Vec<PathBuf>,

    #[arg(long, value_name = "PATH")]
    pub cp_b: Vec<PathBuf>,

    /// Match file to replay before matching.
    #[arg(short = 'm', long, value_name = "FILE")]
    pub matches: Option<PathBuf>,

    #[arg(long, value_name = "REGEX")]
    pub non_obf_cls_a: Option<String>,

    #[arg(long, value_name = "REGEX")]
    pub non_obf_cls_b: Option<String>,

    #[arg(long, value_name = "REGEX")]
    pub non_obf_mem_a: Option<String>,

    #[arg(long, value_name = "REGEX")]
    pub non_obf_mem_b: Option<String>,

    #[arg(long)]
    pub assume_both_or_none_obfuscated: bool,

    /// Worker threads for auto matching, 0 for one per core.
    #[arg(long, value_name = "N", default_value_t = 0, env = "CLASS_MATCHER_THREADS")]
    pub threads: usize,
}

impl ProjectArgs {
    pub fn paths(&self) -> ProjectPaths {
        ProjectPaths {
            a: self.inputs_a.clone(),
            b: self.inputs_b.clone(),
            cp: self.cp.clone(),
            cp_a: self.cp_a.clone(),
            cp_b: self.cp_b.clone(),
        }
    }

    /// Name patterns from the flags, falling back to the ones recorded in
    /// the match file header.
    pub fn env_options(&self, header: Option<&MatchesHeader>) -> Result<EnvOptions> {
        let pick = |flag: &Option<String>, saved: Option<&NamePattern>| -> Result<Option<NamePattern>> {
            match flag {
                Some(source) => Ok(Some(NamePattern::new(source)?)),
                None => Ok(saved.cloned()),
            }
        };
        let saved = |f: fn(&MatchesHeader) -> Option<&NamePattern>| header.and_then(f);

        Ok(EnvOptions {
            a: NamePatterns {
                class: pick(&self.non_obf_cls_a, saved(|h| h.a.class.as_ref()))?,
                member: pick(&self.non_obf_mem_a, saved(|h| h.a.member.as_ref()))?,
            },
            b: NamePatterns {
                class: pick(&self.non_obf_cls_b, saved(|h| h.b.class.as_ref()))?,
                member: pick(&self.non_obf_mem_b, saved(|h| h.b.member.as_ref()))?,
            },
            assume_both_or_none_obfuscated: self.assume_both_or_none_obfuscated,
        })
    }

    pub fn matcher_config(&self) -> MatcherConfig {
        MatcherConfig {
            threads: self.threads,
            ..MatcherConfig::default()
        }
    }
}
