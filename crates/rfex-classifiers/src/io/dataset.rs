//! Dataset acquisition, encoding and k-fold splitting.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::Value;
use statrs::distribution::Normal;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{DataConfig, Task};
use crate::error::{Result, RfexError};
use crate::io::fold_cache::Folds;
use crate::table::{CatDescriptor, ContDescriptor, FeatureTable};

const OPENML_API: &str = "https://www.openml.org/api/v1/json/data";
const OPENML_CSV: &str = "https://www.openml.org/data/get_csv";

/// Untyped table as delivered by a source.
#[derive(Debug, Clone)]
pub struct RawDataset {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub target: usize,
}

pub trait DatasetSource {
    fn fetch(&self) -> Result<RawDataset>;
}

/// Downloads a dataset by id from OpenML.
pub struct OpenMlSource {
    dataset_id: u32,
    client: reqwest::blocking::Client,
}

impl OpenMlSource {
    pub fn new(dataset_id: u32) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("rfex/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(OpenMlSource { dataset_id, client })
    }

    fn description(&self) -> Result<Value> {
        let url = format!("{}/{}", OPENML_API, self.dataset_id);
        log::info!("[OpenML] fetching description {}", url);
        let response = self.client.get(&url).send()?.error_for_status()?;
        let body: Value = response.json()?;
        body.get("data_set_description")
            .cloned()
            .ok_or_else(|| RfexError::Acquisition(format!("no description for dataset {}", self.dataset_id)))
    }
}

impl DatasetSource for OpenMlSource {
    fn fetch(&self) -> Result<RawDataset> {
        let description = self.description()?;
        let field = |key: &str| description.get(key).and_then(Value::as_str).map(str::to_string);

        let name = field("name").unwrap_or_else(|| format!("openml_{}", self.dataset_id));
        let file_id = field("file_id")
            .ok_or_else(|| RfexError::Acquisition(format!("dataset {} has no file_id", self.dataset_id)))?;
        let target_name = field("default_target_attribute").ok_or_else(|| {
            RfexError::Acquisition(format!("dataset {} has no default target", self.dataset_id))
        })?;
        let mut ignored = string_list(description.get("ignore_attribute"));
        ignored.extend(string_list(description.get("row_id_attribute")));

        let url = format!("{}/{}", OPENML_CSV, file_id);
        log::info!("[OpenML] downloading {} ({})", name, url);
        let text = self.client.get(&url).send()?.error_for_status()?.text()?;
        let raw = parse_csv(&name, text.as_bytes(), Some(&target_name))?;
        Ok(drop_columns(raw, &ignored))
    }
}

/// Reads a local CSV; the target is the named column or the last one.
pub struct CsvSource {
    path: PathBuf,
    target: Option<String>,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>, target: Option<String>) -> Self {
        CsvSource {
            path: path.into(),
            target,
        }
    }
}

impl DatasetSource for CsvSource {
    fn fetch(&self) -> Result<RawDataset> {
        let name = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "dataset".to_string());
        log::info!("[CsvSource] reading {:?}", self.path);
        let file = std::fs::File::open(&self.path)?;
        parse_csv(&name, file, self.target.as_deref())
    }
}

/// Picks the OpenML or CSV source from the configuration.
pub fn source_for(config: &DataConfig) -> Result<Box<dyn DatasetSource>> {
    match &config.csv_path {
        Some(path) => Ok(Box::new(CsvSource::new(path.clone(), config.target.clone()))),
        None => Ok(Box::new(OpenMlSource::new(config.dataset_id)?)),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    }
}

fn parse_csv<R: std::io::Read>(name: &str, reader: R, target: Option<&str>) -> Result<RawDataset> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(reader);
    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|h| h.trim().trim_matches('\'').to_string())
        .collect();
    if headers.is_empty() {
        return Err(RfexError::Acquisition(format!("{} has no columns", name)));
    }
    let target = match target {
        Some(t) => headers
            .iter()
            .position(|h| h == t)
            .ok_or_else(|| RfexError::Acquisition(format!("target column {:?} not found in {}", t, name)))?,
        None => headers.len() - 1,
    };
    let rows = csv_reader
        .records()
        .map(|r| r.map(|rec| rec.iter().map(|v| v.trim().trim_matches('\'').to_string()).collect()))
        .collect::<std::result::Result<Vec<Vec<String>>, csv::Error>>()?;
    Ok(RawDataset {
        name: name.to_string(),
        headers,
        rows,
        target,
    })
}

fn drop_columns(raw: RawDataset, names: &[String]) -> RawDataset {
    if names.is_empty() {
        return raw;
    }
    let target_name = raw.headers[raw.target].clone();
    let keep: Vec<usize> = (0..raw.headers.len())
        .filter(|&c| c == raw.target || !names.contains(&raw.headers[c]))
        .collect();
    let headers: Vec<String> = keep.iter().map(|&c| raw.headers[c].clone()).collect();
    let target = headers.iter().position(|h| *h == target_name).unwrap_or(0);
    let rows = raw
        .rows
        .into_iter()
        .map(|row| keep.iter().map(|&c| row[c].clone()).collect())
        .collect();
    RawDataset {
        name: raw.name,
        headers,
        rows,
        target,
    }
}

fn is_missing(value: &str) -> bool {
    value.is_empty() || value == "?" || value.eq_ignore_ascii_case("nan")
}

/// Parsed cell value; missing and infinite cells yield `None` and get imputed.
fn finite_value(value: &str) -> Option<f64> {
    if is_missing(value) {
        return None;
    }
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Level → code map; numeric levels sort numerically, others lexically.
fn encode_levels<'a>(values: impl Iterator<Item = &'a str>) -> HashMap<String, usize> {
    let levels: BTreeSet<&str> = values.collect();
    let mut levels: Vec<&str> = levels.into_iter().collect();
    if levels.iter().all(|l| l.parse::<f64>().is_ok()) {
        levels.sort_by(|a, b| {
            let (x, y) = (a.parse::<f64>().unwrap_or(0.0), b.parse::<f64>().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    levels.into_iter().enumerate().map(|(i, l)| (l.to_string(), i)).collect()
}

/// Encodes a raw dataset into a feature table.
///
/// Numeric columns become standardized continuous features with missing
/// values imputed by the mean; everything else is label-encoded as
/// categorical, with missing values as their own level.
pub fn prepare(raw: &RawDataset, task: Task) -> Result<FeatureTable> {
    let rows: Vec<&Vec<String>> = raw
        .rows
        .iter()
        .filter(|r| r.len() == raw.headers.len() && !is_missing(&r[raw.target]))
        .collect();
    if rows.is_empty() {
        return Err(RfexError::EmptyTable("rows with a target value"));
    }
    let dropped = raw.rows.len() - rows.len();
    if dropped > 0 {
        log::warn!("[prepare] dropped {} rows without a usable target", dropped);
    }
    let n = rows.len();

    let (labels, num_classes) = if task.is_classification() {
        let codes = encode_levels(rows.iter().map(|r| r[raw.target].as_str()));
        let labels: Array1<f64> = rows.iter().map(|r| codes[&r[raw.target]] as f64).collect();
        if task == Task::Binary && codes.len() != 2 {
            log::warn!("[prepare] binary task but {} target levels found", codes.len());
        }
        (labels, codes.len())
    } else {
        let labels = rows
            .iter()
            .map(|r| {
                r[raw.target]
                    .parse::<f64>()
                    .map_err(|_| RfexError::Acquisition(format!("non-numeric regression target {:?}", r[raw.target])))
            })
            .collect::<Result<Array1<f64>>>()?;
        (labels, 1)
    };

    let mut cat_columns: Vec<Vec<i64>> = Vec::new();
    let mut cat_features = Vec::new();
    let mut cont_columns: Vec<Vec<f64>> = Vec::new();
    let mut cont_features = Vec::new();

    for (col, header) in raw.headers.iter().enumerate() {
        if col == raw.target {
            continue;
        }
        let cells: Vec<&str> = rows.iter().map(|r| r[col].as_str()).collect();
        let numeric = cells.iter().all(|c| is_missing(c) || c.parse::<f64>().is_ok())
            && cells.iter().any(|c| finite_value(c).is_some());

        if numeric {
            let present: Vec<f64> = cells.iter().filter_map(|c| finite_value(c)).collect();
            let mean = present.iter().sum::<f64>() / present.len() as f64;
            let values: Vec<f64> = cells.iter().map(|c| finite_value(c).unwrap_or(mean)).collect();
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
            let std = if var > 0.0 { var.sqrt() } else { 1.0 };
            cont_columns.push(values.iter().map(|v| (v - mean) / std).collect());
            cont_features.push(ContDescriptor {
                index: col,
                name: header.clone(),
            });
        } else {
            let normalized: Vec<&str> = cells.iter().map(|c| if is_missing(c) { "?" } else { *c }).collect();
            let codes = encode_levels(normalized.iter().copied());
            cat_columns.push(normalized.iter().map(|c| codes[*c] as i64).collect());
            cat_features.push(CatDescriptor {
                index: col,
                name: header.clone(),
                cardinality: codes.len(),
            });
        }
    }

    let cat = columns_to_array(&cat_columns, n);
    let cont = columns_to_array(&cont_columns, n);
    log::info!(
        "[prepare] {}: {} rows, {} categorical + {} continuous features, {} classes",
        raw.name,
        n,
        cat_features.len(),
        cont_features.len(),
        num_classes
    );
    FeatureTable::new(
        raw.name.clone(),
        task,
        num_classes,
        cat,
        cont,
        labels,
        cat_features,
        cont_features,
    )
}

fn columns_to_array<T: Copy + Default>(columns: &[Vec<T>], n_rows: usize) -> Array2<T> {
    Array2::from_shape_fn((n_rows, columns.len()), |(r, c)| columns[c][r])
}

/// Appends `count` N(0,1) columns named `random_{i}`.
pub fn add_random_features(table: &FeatureTable, count: usize, seed: u64) -> Result<FeatureTable> {
    if count == 0 {
        return Ok(table.clone());
    }
    let normal = Normal::new(0.0, 1.0).map_err(|e| RfexError::InvalidConfig(e.to_string()))?;
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Array2::from_shape_simple_fn((table.n_rows(), count), || {
        rand::distributions::Distribution::sample(&normal, &mut rng)
    });
    let cont = ndarray::concatenate(Axis(1), &[table.cont().view(), noise.view()])
        .map_err(|e| RfexError::Model(e.to_string()))?;

    let next_index = table
        .cat_features()
        .iter()
        .map(|d| d.index)
        .chain(table.cont_features().iter().map(|d| d.index))
        .max()
        .map_or(0, |m| m + 1);
    let mut cont_features = table.cont_features().to_vec();
    cont_features.extend((0..count).map(|i| ContDescriptor {
        index: next_index + i,
        name: format!("random_{}", i),
    }));

    FeatureTable::new(
        table.name(),
        table.task(),
        table.num_classes(),
        table.cat().clone(),
        cont,
        table.labels().clone(),
        table.cat_features().to_vec(),
        cont_features,
    )
}

/// Shuffled k-fold split. Fold `i` tests on the `i`-th chunk of the shuffled
/// rows; the first `rows % k` chunks carry one extra row.
pub fn kfold(table: &FeatureTable, k: usize, seed: u64) -> Result<Folds> {
    let n = table.n_rows();
    if k < 2 || k > n {
        return Err(RfexError::InvalidConfig(format!(
            "cannot split {} rows into {} folds",
            n, k
        )));
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let base = n / k;
    let extra = n % k;
    let mut train = Vec::with_capacity(k);
    let mut test = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let size = base + usize::from(fold < extra);
        let test_rows = &order[start..start + size];
        let train_rows: Vec<usize> = order[..start].iter().chain(&order[start + size..]).copied().collect();
        test.push(table.select_rows(test_rows));
        train.push(table.select_rows(&train_rows));
        start += size;
    }
    Ok(Folds { train, test })
}

/// Fetch, encode, add probe columns and split, as configured.
pub fn build_folds(source: &dyn DatasetSource, config: &DataConfig) -> Result<Folds> {
    let raw = source.fetch()?;
    let table = prepare(&raw, config.task)?;
    let table = add_random_features(&table, config.random_features, config.dset_seed)?;
    kfold(&table, config.folds, config.dset_seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawDataset {
        let rows = vec![
            vec!["red", "1.0", "yes"],
            vec!["blue", "2.0", "no"],
            vec!["red", "?", "yes"],
            vec!["green", "4.0", "no"],
            vec!["?", "5.0", "yes"],
            vec!["blue", "6.0", "?"],
        ];
        RawDataset {
            name: "colors".into(),
            headers: vec!["color".into(), "size".into(), "label".into()],
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(String::from).collect())
                .collect(),
            target: 2,
        }
    }

    #[test]
    fn prepare_splits_numeric_and_categorical() {
        let table = prepare(&raw(), Task::Binary).unwrap();
        assert_eq!(table.n_rows(), 5);
        assert_eq!(table.feature_names(), vec!["color", "size"]);
        // levels sorted: "?", "blue", "green", "red"
        assert_eq!(table.cat_features()[0].cardinality, 4);
        assert_eq!(table.cat().column(0).to_vec(), vec![3, 1, 3, 2, 0]);
        assert_eq!(table.labels().to_vec(), vec![1.0, 0.0, 1.0, 0.0, 1.0]);
        assert_eq!(table.num_classes(), 2);
        let mean: f64 = table.cont().column(0).sum() / 5.0;
        assert!(mean.abs() < 1e-9);
    }

    #[test]
    fn regression_targets_must_be_numeric() {
        assert!(prepare(&raw(), Task::Regression).is_err());
    }

    #[test]
    fn nan_and_infinite_cells_are_mean_imputed() {
        let rows = [["1.0", "a"], ["nan", "b"], ["3.0", "a"], ["NaN", "b"], ["inf", "a"]];
        let raw = RawDataset {
            name: "gaps".into(),
            headers: vec!["x".into(), "label".into()],
            rows: rows.iter().map(|r| r.iter().map(|c| c.to_string()).collect()).collect(),
            target: 1,
        };
        let table = prepare(&raw, Task::Binary).unwrap();
        assert_eq!(table.n_cont(), 1);
        let x = table.cont().column(0).to_vec();
        assert!(x.iter().all(|v| v.is_finite()));
        // imputed cells sit at the column mean, i.e. zero after standardization
        assert!(x[1].abs() < 1e-12 && x[3].abs() < 1e-12 && x[4].abs() < 1e-12);
        assert!(x[0] < 0.0 && x[2] > 0.0);
    }

    #[test]
    fn repeated_headers_are_rejected() {
        let mut raw = raw();
        raw.headers[1] = "color".into();
        assert!(matches!(prepare(&raw, Task::Binary), Err(RfexError::DuplicateFeature(_))));
    }

    #[test]
    fn random_column_name_clash_is_rejected() {
        let mut raw = raw();
        raw.headers[1] = "random_0".into();
        let table = prepare(&raw, Task::Binary).unwrap();
        assert!(matches!(
            add_random_features(&table, 2, 5),
            Err(RfexError::DuplicateFeature(name)) if name == "random_0"
        ));
    }

    #[test]
    fn random_features_are_appended_last() {
        let table = prepare(&raw(), Task::Binary).unwrap();
        let probed = add_random_features(&table, 2, 5).unwrap();
        assert_eq!(probed.feature_names(), vec!["color", "size", "random_0", "random_1"]);
        assert_eq!(probed.cont_features()[1].index, 2);
        let again = add_random_features(&table, 2, 5).unwrap();
        assert_eq!(probed, again);
    }

    #[test]
    fn kfold_partitions_every_row_once() {
        let table = prepare(&raw(), Task::Binary).unwrap();
        let big = table.select_rows(&(0..23).map(|i| i % 5).collect::<Vec<_>>());
        let folds = kfold(&big, 5, 5).unwrap();
        assert_eq!(folds.len(), 5);
        let sizes: Vec<usize> = folds.test.iter().map(|t| t.n_rows()).collect();
        assert_eq!(sizes, vec![5, 5, 5, 4, 4]);
        for (tr, te) in folds.train.iter().zip(&folds.test) {
            assert_eq!(tr.n_rows() + te.n_rows(), 23);
            assert!(tr.same_features(te));
        }
        assert!(kfold(&big, 1, 5).is_err());
    }

    #[test]
    fn csv_source_defaults_to_last_column() {
        let text = "a,b,target\n1,x,0\n2,y,1\n";
        let parsed = parse_csv("inline", text.as_bytes(), None).unwrap();
        assert_eq!(parsed.target, 2);
        assert_eq!(parsed.rows.len(), 2);
        assert!(parse_csv("inline", text.as_bytes(), Some("missing")).is_err());
    }

    #[test]
    fn ignored_columns_are_dropped() {
        let dropped = drop_columns(raw(), &["size".to_string()]);
        assert_eq!(dropped.headers, vec!["color", "label"]);
        assert_eq!(dropped.target, 1);
        assert_eq!(dropped.rows[0], vec!["red", "yes"]);
    }
}
