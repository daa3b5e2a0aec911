use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::config::{DataConfig, Task};
use crate::error::{Result, RfexError};
use crate::table::FeatureTable;

/// Matching train/test tables, one pair per fold.
#[derive(Debug, Clone, PartialEq)]
pub struct Folds {
    pub train: Vec<FeatureTable>,
    pub test: Vec<FeatureTable>,
}

impl Folds {
    pub fn len(&self) -> usize {
        self.train.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty()
    }

    pub fn first_train(&self) -> Result<&FeatureTable> {
        self.train.first().ok_or(RfexError::EmptyTable("folds"))
    }
}

/// On-disk fold store:
/// `<root>[_random]/<task>/<dataset_id>/seed<dset_seed>/{train,test}/fold{k}.bin`.
#[derive(Debug, Clone)]
pub struct FoldCache {
    dir: PathBuf,
}

impl FoldCache {
    pub fn new(root: &Path, with_random_features: bool, task: Task, dataset_id: u32, dset_seed: u64) -> Self {
        let mut base: OsString = root.as_os_str().to_owned();
        if with_random_features {
            base.push("_random");
        }
        let dir = PathBuf::from(base)
            .join(task.as_str())
            .join(dataset_id.to_string())
            .join(format!("seed{}", dset_seed));
        FoldCache { dir }
    }

    pub fn from_config(config: &DataConfig) -> Self {
        Self::new(
            &config.dataset_root,
            config.random_features > 0,
            config.task,
            config.dataset_id,
            config.dset_seed,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.join("train").exists()
    }

    /// Writes every fold; refuses to touch an existing cache.
    pub fn store(&self, folds: &Folds) -> Result<()> {
        if self.exists() {
            return Err(RfexError::CacheExists(self.dir.clone()));
        }
        if folds.train.len() != folds.test.len() {
            return Err(RfexError::FeatureCountMismatch {
                expected: folds.train.len(),
                found: folds.test.len(),
                context: "train/test fold count".into(),
            });
        }

        for (split, tables) in [("train", &folds.train), ("test", &folds.test)] {
            let split_dir = self.dir.join(split);
            fs::create_dir_all(&split_dir)?;
            for (k, table) in tables.iter().enumerate() {
                let path = split_dir.join(format!("fold{}.bin", k));
                let writer = BufWriter::new(File::create(&path)?);
                bincode::serialize_into(writer, table)?;
                log::debug!("[FoldCache] wrote {:?}", path);
            }
        }
        log::info!("[FoldCache] stored {} folds under {:?}", folds.len(), self.dir);
        Ok(())
    }

    pub fn load(&self) -> Result<Folds> {
        if !self.exists() {
            return Err(RfexError::CacheMissing(self.dir.clone()));
        }
        let train = self.load_split("train")?;
        let test = self.load_split("test")?;
        if train.len() != test.len() {
            return Err(RfexError::FeatureCountMismatch {
                expected: train.len(),
                found: test.len(),
                context: format!("cached test folds in {:?}", self.dir),
            });
        }
        log::info!("[FoldCache] loaded {} folds from {:?}", train.len(), self.dir);
        Ok(Folds { train, test })
    }

    fn load_split(&self, split: &str) -> Result<Vec<FeatureTable>> {
        let split_dir = self.dir.join(split);
        if !split_dir.is_dir() {
            return Err(RfexError::CacheMissing(split_dir));
        }
        let mut indices = Vec::new();
        for entry in fs::read_dir(&split_dir)? {
            let file_name = entry?.file_name();
            let name = file_name.to_string_lossy();
            if let Some(k) = name
                .strip_prefix("fold")
                .and_then(|rest| rest.strip_suffix(".bin"))
                .and_then(|k| k.parse::<usize>().ok())
            {
                indices.push(k);
            }
        }
        indices.sort_unstable();
        if indices.iter().enumerate().any(|(pos, &k)| pos != k) {
            return Err(RfexError::FeatureCountMismatch {
                expected: indices.len(),
                found: indices.last().map_or(0, |k| k + 1),
                context: format!("fold numbering in {:?}", split_dir),
            });
        }

        indices
            .into_iter()
            .map(|k| {
                let reader = BufReader::new(File::open(split_dir.join(format!("fold{}.bin", k)))?);
                let table: FeatureTable = bincode::deserialize_from(reader)?;
                Ok(table)
            })
            .collect()
    }
}
