//! # class-matcher
//!
//! Matches classes, methods, fields and method variables between two
//! independently obfuscated builds of a Java program.
//!
//! ## Architecture
//!
//! - **reader** / **constant_pool** / **descriptor** / **bytecode** / **classfile**: class file parsing
//! - **scan** / **input**: input discovery, archive reading and content hashing
//! - **model**: handles and per-entity data for both sides
//! - **builder** / **hierarchy**: turning parsed class files into a linked class environment
//! - **env**: the two-sided environment, its match graph and UID tables
//! - **graph** / **cache**: match edges, matchable flags and the classifier result cache
//! - **matcher**: the mutation API for matching, unmatching and pinning
//! - **classifier**: weighted similarity classifiers, rankers and acceptance checks
//! - **auto** / **executor**: parallel auto-match passes with progress and cancellation
//! - **matches_io**: the persisted match file format
//! - **uid** / **uid_store**: stable UIDs for obfuscated names, persisted in LMDB
//! - **config** / **cli** / **error**: thresholds, name patterns, command line and error types

pub mod auto;
pub mod builder;
pub mod bytecode;
pub mod cache;
pub mod classfile;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod constant_pool;
pub mod descriptor;
pub mod env;
pub mod error;
pub mod executor;
pub mod graph;
pub mod hierarchy;
pub mod input;
pub mod matcher;
pub mod matches_io;
pub mod model;
pub mod reader;
pub mod scan;
pub mod uid;
pub mod uid_store;
