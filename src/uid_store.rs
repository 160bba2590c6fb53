//! Persistent UID storage backed by LMDB (via heed).
//!
//! UIDs are stored per version label, keyed by class name and member id,
//! so the B side of one session can be loaded as the A side of the next.
//! The shared [`UidCounters`] live under their own key.

use anyhow::{Context, Result};
use heed::types::Str;
use heed::{Database, Env, EnvFlags, EnvOpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::env::ClassEnvironment;
use crate::model::Side;
use crate::uid::UidCounters;

pub const UIDS_DB: &str = "uids";
pub const META_DB: &str = "meta";

const COUNTERS_KEY: &str = "counters";
const DEFAULT_MAP_SIZE: usize = 256 * 1024 * 1024;
const DEFAULT_MAX_DBS: u32 = 4;

type StrDb = Database<Str, Str>;

#[derive(Debug)]
pub struct UidStore {
    env: Env,
    db_path: PathBuf,
    uids: StrDb,
    meta: StrDb,
}

fn class_key(label: &str, class: &str) -> String {
    format!("{label}\tc\t{class}")
}

fn method_key(label: &str, class: &str, method: &str) -> String {
    format!("{label}\tm\t{class}\t{method}")
}

fn field_key(label: &str, class: &str, field: &str) -> String {
    format!("{label}\tf\t{class}\t{field}")
}

impl UidStore {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create uid store directory: {}", parent.display()))?;
        }

        let env = open_env(&db_path)?;
        let mut wtxn = env.write_txn()?;
        let uids = env.create_database::<Str, Str>(&mut wtxn, Some(UIDS_DB))?;
        let meta = env.create_database::<Str, Str>(&mut wtxn, Some(META_DB))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            db_path,
            uids,
            meta,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn counters(&self) -> Result<UidCounters> {
        let rtxn = self.env.read_txn()?;
        match self.meta.get(&rtxn, COUNTERS_KEY)? {
            Some(raw) => serde_json::from_str(raw).context("Failed to decode uid counters"),
            None => Ok(UidCounters::default()),
        }
    }

    pub fn save_counters(&self, counters: &UidCounters) -> Result<()> {
        let raw = serde_json::to_string(counters)?;
        let mut wtxn = self.env.write_txn()?;
        self.meta.put(&mut wtxn, COUNTERS_KEY, &raw)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Fills the UID table of `side` from the entries stored under `label`.
    /// Returns the number of UIDs loaded.
    pub fn load_into(&self, label: &str, env: &mut ClassEnvironment, side: Side) -> Result<usize> {
        let rtxn = self.env.read_txn()?;
        let (classes, table) = env.env_and_uids_mut(side);
        let mut loaded = 0;

        let lookup = |key: String| -> Result<Option<u32>> {
            match self.uids.get(&rtxn, &key)? {
                Some(raw) => {
                    let uid = raw.parse().with_context(|| format!("Invalid uid for {key}: {raw}"))?;
                    Ok(Some(uid))
                }
                None => Ok(None),
            }
        };

        for c in classes.input_classes() {
            let cls = classes.class(c);
            if let Some(uid) = lookup(class_key(label, &cls.name))? {
                table.set_class(c, uid);
                loaded += 1;
            }
            for &m in &cls.methods {
                if let Some(uid) = lookup(method_key(label, &cls.name, &classes.method(m).id))? {
                    table.set_method(m, uid);
                    loaded += 1;
                }
            }
            for &f in &cls.fields {
                if let Some(uid) = lookup(field_key(label, &cls.name, &classes.field(f).id))? {
                    table.set_field(f, uid);
                    loaded += 1;
                }
            }
        }

        debug!(label, side = side.label(), loaded, "loaded uids");
        Ok(loaded)
    }

    /// Stores every UID of `side` under `label`. Returns the number written.
    pub fn save_from(&self, label: &str, env: &ClassEnvironment, side: Side) -> Result<usize> {
        let classes = env.env(side);
        let table = env.uids(side);
        let mut entries: Vec<(String, u32)> = Vec::new();

        for c in classes.input_classes() {
            let cls = classes.class(c);
            if let Some(uid) = table.class(c) {
                entries.push((class_key(label, &cls.name), uid));
            }
            for &m in &cls.methods {
                if let Some(uid) = table.method(m) {
                    entries.push((method_key(label, &cls.name, &classes.method(m).id), uid));
                }
            }
            for &f in &cls.fields {
                if let Some(uid) = table.field(f) {
                    entries.push((field_key(label, &cls.name, &classes.field(f).id), uid));
                }
            }
        }

        let mut wtxn = self.env.write_txn()?;
        for (key, uid) in &entries {
            self.uids.put(&mut wtxn, key, &uid.to_string())?;
        }
        wtxn.commit()?;

        debug!(label, side = side.label(), saved = entries.len(), "saved uids");
        Ok(entries.len())
    }
}

fn open_env(db_path: &Path) -> Result<Env> {
    let mut options = EnvOpenOptions::new();
    options.map_size(DEFAULT_MAP_SIZE);
    options.max_dbs(DEFAULT_MAX_DBS);
    // SAFETY: default LMDB locking is kept; NO_SUB_DIR stores the env as a single file path.
    unsafe {
        options.flags(EnvFlags::NO_SUB_DIR);
        options
            .open(db_path)
            .with_context(|| format!("Failed to create/open uid store: {}", db_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ClassEnvBuilder;
    use crate::classfile::{ClassFile, ClassMember};
    use crate::config::{EnvOptions, NamePatterns};
    use crate::input::InputSet;
    use crate::uid::{UidCounters, assign_missing_uids};

    fn environment() -> ClassEnvironment {
        let build = |side: Side| {
            let mut builder = ClassEnvBuilder::new(side);
            builder.add_class(
                ClassFile {
                    this_class: "x".into(),
                    super_class: Some("java/lang/Object".into()),
                    methods: vec![ClassMember {
                        name: "a".into(),
                        descriptor: "()V".into(),
                        ..ClassMember::default()
                    }],
                    ..ClassFile::default()
                },
                true,
            );
            builder.build(&NamePatterns::default()).unwrap()
        };
        ClassEnvironment::new(build(Side::A), build(Side::B), EnvOptions::default(), InputSet::default())
    }

    #[test]
    fn uids_round_trip_between_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = UidStore::open(dir.path().join("nested").join("uids.lmdb")).unwrap();
        assert_eq!(store.counters().unwrap(), UidCounters::default());

        let mut env = environment();
        let mut counters = store.counters().unwrap();
        assign_missing_uids(&mut env, &mut counters);
        store.save_counters(&counters).unwrap();
        assert_eq!(store.save_from("1.1", &env, Side::B).unwrap(), 2);

        let mut next = environment();
        assert_eq!(store.load_into("1.1", &mut next, Side::A).unwrap(), 2);
        assert_eq!(store.load_into("1.0", &mut next, Side::B).unwrap(), 0);
        let x = next.a().class_by_name("x").unwrap();
        assert_eq!(next.uids(Side::A).class(x), Some(1));
        assert_eq!(store.counters().unwrap(), counters);
    }
}
