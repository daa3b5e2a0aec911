use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Learning task of the dataset.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Binary,
    Multiclass,
    Regression,
}

impl Task {
    pub fn is_classification(&self) -> bool {
        !matches!(self, Task::Regression)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Binary => "binary",
            Task::Multiclass => "multiclass",
            Task::Regression => "regression",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Task {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binary" => Ok(Task::Binary),
            "multiclass" => Ok(Task::Multiclass),
            "regression" => Ok(Task::Regression),
            _ => Err(format!(
                "Unknown task: {}. Valid options are: binary, multiclass, regression",
                s
            )),
        }
    }
}

/// Execution mode of the command line tool.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    #[serde(rename = "loadData")]
    LoadData,
    #[serde(rename = "train")]
    Train,
    #[serde(rename = "explain")]
    Explain,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loadData" => Ok(Mode::LoadData),
            "train" => Ok(Mode::Train),
            "explain" => Ok(Mode::Explain),
            _ => Err(format!(
                "Unknown mode: {}. Valid options are: loadData, train, explain",
                s
            )),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    AdamW,
    Adam,
    SGD,
}

impl FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AdamW" => Ok(OptimizerKind::AdamW),
            "Adam" => Ok(OptimizerKind::Adam),
            "SGD" => Ok(OptimizerKind::SGD),
            _ => Err(format!("Unknown optimizer: {}", s)),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    Cosine,
    Linear,
}

impl SchedulerKind {
    /// Learning rate for `epoch` out of `total` epochs, decaying from `base`.
    pub fn learning_rate(&self, base: f64, epoch: usize, total: usize) -> f64 {
        if total == 0 {
            return base;
        }
        let progress = (epoch as f64 / total as f64).min(1.0);
        match self {
            SchedulerKind::Cosine => base * 0.5 * (1.0 + (std::f64::consts::PI * progress).cos()),
            SchedulerKind::Linear => base * (1.0 - progress),
        }
    }
}

impl FromStr for SchedulerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(SchedulerKind::Cosine),
            "linear" => Ok(SchedulerKind::Linear),
            _ => Err(format!("Unknown scheduler: {}", s)),
        }
    }
}

/// Which attention blocks the tabular transformer stacks.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttentionType {
    Col,
    ColRow,
    Row,
    JustMlp,
    Attn,
    AttnMlp,
}

impl FromStr for AttentionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "col" => Ok(AttentionType::Col),
            "colrow" => Ok(AttentionType::ColRow),
            "row" => Ok(AttentionType::Row),
            "justmlp" => Ok(AttentionType::JustMlp),
            "attn" => Ok(AttentionType::Attn),
            "attnmlp" => Ok(AttentionType::AttnMlp),
            _ => Err(format!(
                "Unknown attention type: {}. Valid options are: col, colrow, row, justmlp, attn, attnmlp",
                s
            )),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContEmbeddings {
    #[serde(rename = "MLP")]
    Mlp,
    #[serde(rename = "Noemb")]
    NoEmb,
    #[serde(rename = "pos_singleMLP")]
    PosSingleMlp,
}

impl FromStr for ContEmbeddings {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MLP" => Ok(ContEmbeddings::Mlp),
            "Noemb" => Ok(ContEmbeddings::NoEmb),
            "pos_singleMLP" => Ok(ContEmbeddings::PosSingleMlp),
            _ => Err(format!("Unknown continuous embedding: {}", s)),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FinalMlpStyle {
    Common,
    Sep,
}

impl FromStr for FinalMlpStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "common" => Ok(FinalMlpStyle::Common),
            "sep" => Ok(FinalMlpStyle::Sep),
            _ => Err(format!("Unknown final MLP style: {}", s)),
        }
    }
}

/// Where the data comes from and where artifacts are written.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct DataConfig {
    pub dataset_id: u32,
    pub task: Task,
    pub dataset_root: PathBuf,
    pub result_root: PathBuf,
    pub model_root: PathBuf,
    pub dset_seed: u64,
    pub folds: usize,
    /// Number of N(0,1) probe columns appended to every dataset.
    pub random_features: usize,
    /// Local CSV used instead of OpenML when set.
    pub csv_path: Option<PathBuf>,
    pub target: Option<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            dataset_id: 0,
            task: Task::Binary,
            dataset_root: PathBuf::from("./datasets/datasets_prepo"),
            result_root: PathBuf::from("./results"),
            model_root: PathBuf::from("./models/trained"),
            dset_seed: 5,
            folds: 5,
            random_features: 2,
            csv_path: None,
            target: None,
        }
    }
}

/// Mini-batch training settings shared by the candle models.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub optimizer: OptimizerKind,
    pub scheduler: SchedulerKind,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            epochs: 100,
            batch_size: 256,
            optimizer: OptimizerKind::AdamW,
            scheduler: SchedulerKind::Cosine,
            learning_rate: 1e-4,
            seed: 1,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct AttentionConfig {
    pub depth: usize,
    pub heads: usize,
    pub attention_dropout: f32,
    pub ff_dropout: f32,
    pub embedding_size: usize,
    pub attention_type: AttentionType,
    pub cont_embeddings: ContEmbeddings,
    pub final_mlp_style: FinalMlpStyle,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        AttentionConfig {
            depth: 6,
            heads: 8,
            attention_dropout: 0.1,
            ff_dropout: 0.1,
            embedding_size: 32,
            attention_type: AttentionType::ColRow,
            cont_embeddings: ContEmbeddings::Mlp,
            final_mlp_style: FinalMlpStyle::Common,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ExplainConfig {
    pub n_permutations: usize,
    pub background_rows: usize,
    pub max_explain_rows: usize,
    pub seed: u64,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        ExplainConfig {
            n_permutations: 10,
            background_rows: 50,
            max_explain_rows: 100,
            seed: 1,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct MlpConfig {
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
}

impl Default for MlpConfig {
    fn default() -> Self {
        MlpConfig {
            hidden_layers: vec![100],
            learning_rate: 1e-3,
            epochs: 200,
            batch_size: 200,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        ForestConfig {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            seed: 1,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ModelsConfig {
    pub knn_neighbors: usize,
    pub svm_c: f64,
    pub svm_eps: f64,
    pub forest: ForestConfig,
    pub mlp: MlpConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        ModelsConfig {
            knn_neighbors: 3,
            svm_c: 1.0,
            svm_eps: 1e-3,
            forest: ForestConfig::default(),
            mlp: MlpConfig::default(),
        }
    }
}

/// Immutable configuration of one experiment run.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ExperimentConfig {
    pub data: DataConfig,
    pub training: TrainingConfig,
    pub attention: AttentionConfig,
    pub explain: ExplainConfig,
    pub models: ModelsConfig,
    pub device: String,
    /// Subset of model families to run; empty runs all of them.
    pub families: Vec<String>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfig {
            data: DataConfig::default(),
            training: TrainingConfig::default(),
            attention: AttentionConfig::default(),
            explain: ExplainConfig::default(),
            models: ModelsConfig::default(),
            device: String::from("cpu"),
            families: Vec::new(),
        }
    }
}

impl ExperimentConfig {
    /// Returns a copy with the attention hyper-parameters shrunk for wide
    /// tables and non-column attention variants.
    pub fn adjusted_for(&self, n_features: usize) -> ExperimentConfig {
        let mut adjusted = self.clone();
        if n_features + 1 > 100 {
            adjusted.attention.embedding_size = adjusted.attention.embedding_size.min(8);
            adjusted.training.batch_size = adjusted.training.batch_size.min(64);
        }
        if adjusted.attention.attention_type != AttentionType::Col {
            adjusted.attention.depth = 1;
            adjusted.attention.heads = adjusted.attention.heads.min(4);
            adjusted.attention.attention_dropout = 0.8;
            adjusted.attention.ff_dropout = 0.8;
            adjusted.attention.embedding_size = adjusted.attention.embedding_size.min(32);
        }
        adjusted
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::RfexError;
        if self.data.folds < 2 {
            return Err(RfexError::InvalidConfig(format!(
                "at least 2 folds are required, got {}",
                self.data.folds
            )));
        }
        if self.training.batch_size == 0 {
            return Err(RfexError::InvalidConfig("batch_size must be positive".into()));
        }
        if self.attention.heads == 0 || self.attention.embedding_size == 0 {
            return Err(RfexError::InvalidConfig(
                "attention heads and embedding size must be positive".into(),
            ));
        }
        if self.models.knn_neighbors == 0 {
            return Err(RfexError::InvalidConfig("knn_neighbors must be positive".into()));
        }
        if self.explain.n_permutations == 0 || self.explain.background_rows == 0 {
            return Err(RfexError::InvalidConfig(
                "explainer needs at least one permutation and one background row".into(),
            ));
        }
        Ok(())
    }
}
