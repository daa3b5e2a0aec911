use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command, ValueHint};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use rfex_classifiers::config::{
    AttentionType, ContEmbeddings, ExperimentConfig, FinalMlpStyle, Mode, OptimizerKind, SchedulerKind, Task,
};

pub fn command() -> Command {
    let value = |id: &'static str, long: &'static str, help: &'static str| {
        Arg::new(id)
            .long(long)
            .help(help)
            .value_parser(clap::builder::NonEmptyStringValueParser::new())
    };

    Command::new("rfex")
        .version(clap::crate_version!())
        .author("Justin Sing <justincsing@gmail.com>")
        .about("Recursive feature elimination with explainability for tabular models")
        .arg_required_else_help(true)
        .arg(
            value("mode", "mode", "Execution mode")
                .required(true)
                .value_parser(["loadData", "train", "explain"]),
        )
        .arg(
            Arg::new("dataset_id")
                .long("dataset-id")
                .help("OpenML dataset id")
                .required(true)
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            value("task", "task", "Learning task")
                .required(true)
                .value_parser(["binary", "multiclass", "regression"]),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("JSON configuration file; command line flags take precedence")
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("epochs")
                .long("epochs")
                .help("Training epochs of the attention model")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("epochs_mlp")
                .long("epochs-mlp")
                .help("Training epochs of the multilayer perceptron")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("batch_size")
                .long("batch-size")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(value("optimizer", "optimizer", "Optimizer").value_parser(["AdamW", "Adam", "SGD"]))
        .arg(value("scheduler", "scheduler", "Learning rate schedule").value_parser(["cosine", "linear"]))
        .arg(Arg::new("lr").long("lr").help("Learning rate").value_parser(clap::value_parser!(f64)))
        .arg(
            Arg::new("model_root")
                .long("model-root")
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("dataset_root")
                .long("dataset-root")
                .help("Root directory of the fold cache")
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("result_root")
                .long("result-root")
                .help("Directory receiving the spreadsheets")
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::DirPath),
        )
        .arg(Arg::new("seed").long("seed").value_parser(clap::value_parser!(u64)))
        .arg(
            Arg::new("dset_seed")
                .long("dset-seed")
                .help("Seed of the fold split")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(Arg::new("folds").long("folds").value_parser(clap::value_parser!(usize)))
        .arg(
            Arg::new("transformer_depth")
                .long("transformer-depth")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("attention_heads")
                .long("attention-heads")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("attention_dropout")
                .long("attention-dropout")
                .value_parser(clap::value_parser!(f32)),
        )
        .arg(
            Arg::new("ff_dropout")
                .long("ff-dropout")
                .value_parser(clap::value_parser!(f32)),
        )
        .arg(
            Arg::new("embedding_size")
                .long("embedding-size")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            value("attention_type", "attention-type", "Attention variant")
                .value_parser(["col", "row", "colrow", "justmlp", "attn", "attnmlp"]),
        )
        .arg(
            value("cont_embeddings", "cont-embeddings", "Continuous feature embedding")
                .value_parser(["MLP", "Noemb", "pos_singleMLP"]),
        )
        .arg(value("final_mlp_style", "final-mlp-style", "Output head").value_parser(["common", "sep"]))
        .arg(
            Arg::new("random_features")
                .long("random-features")
                .help("Number of N(0,1) probe columns added to the dataset")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("csv")
                .long("csv")
                .help("Read a local CSV instead of downloading from OpenML")
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::FilePath),
        )
        .arg(value("target", "target", "Target column of the CSV (default: last column)"))
        .arg(value("device", "device", "cpu, cuda or cuda:N"))
        .arg(value(
            "families",
            "families",
            "Comma separated subset of Transformer,SVM,KNN,MLP,RandomForest",
        ))
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Written by {author-with-newline}Version {version}\n\n\
             {all-args}{after-help}",
        )
}

#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub mode: Mode,
    pub experiment: ExperimentConfig,
    /// Whether a configuration file was supplied.
    #[serde(skip)]
    pub from_file: bool,
}

fn parse<T: FromStr<Err = String>>(value: &str) -> Result<T> {
    T::from_str(value).map_err(anyhow::Error::msg)
}

impl RunConfig {
    pub fn from_arguments(matches: &ArgMatches) -> Result<Self> {
        let config_path = matches.get_one::<PathBuf>("config");
        let mut config = match config_path {
            Some(path) => {
                let json = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                serde_json::from_str::<ExperimentConfig>(&json)
                    .with_context(|| format!("Failed to parse config file: {:?}", path))?
            }
            None => ExperimentConfig::default(),
        };

        let mode: Mode = parse(required(matches, "mode")?)?;
        config.data.task = parse::<Task>(required(matches, "task")?)?;
        if let Some(id) = matches.get_one::<u32>("dataset_id") {
            config.data.dataset_id = *id;
        }

        // Data
        if let Some(v) = matches.get_one::<PathBuf>("dataset_root") {
            config.data.dataset_root = v.clone();
        }
        if let Some(v) = matches.get_one::<PathBuf>("result_root") {
            config.data.result_root = v.clone();
        }
        if let Some(v) = matches.get_one::<PathBuf>("model_root") {
            config.data.model_root = v.clone();
        }
        if let Some(v) = matches.get_one::<u64>("dset_seed") {
            config.data.dset_seed = *v;
        }
        if let Some(v) = matches.get_one::<usize>("folds") {
            config.data.folds = *v;
        }
        if let Some(v) = matches.get_one::<usize>("random_features") {
            config.data.random_features = *v;
        }
        if let Some(v) = matches.get_one::<PathBuf>("csv") {
            config.data.csv_path = Some(v.clone());
        }
        if let Some(v) = matches.get_one::<String>("target") {
            config.data.target = Some(v.clone());
        }

        // Training
        if let Some(v) = matches.get_one::<usize>("epochs") {
            config.training.epochs = *v;
        }
        if let Some(v) = matches.get_one::<usize>("epochs_mlp") {
            config.models.mlp.epochs = *v;
        }
        if let Some(v) = matches.get_one::<usize>("batch_size") {
            config.training.batch_size = *v;
        }
        if let Some(v) = matches.get_one::<String>("optimizer") {
            config.training.optimizer = parse::<OptimizerKind>(v)?;
        }
        if let Some(v) = matches.get_one::<String>("scheduler") {
            config.training.scheduler = parse::<SchedulerKind>(v)?;
        }
        if let Some(v) = matches.get_one::<f64>("lr") {
            config.training.learning_rate = *v;
        }
        if let Some(v) = matches.get_one::<u64>("seed") {
            config.training.seed = *v;
            config.explain.seed = *v;
            config.models.forest.seed = *v;
        }

        // Attention model
        if let Some(v) = matches.get_one::<usize>("transformer_depth") {
            config.attention.depth = *v;
        }
        if let Some(v) = matches.get_one::<usize>("attention_heads") {
            config.attention.heads = *v;
        }
        if let Some(v) = matches.get_one::<f32>("attention_dropout") {
            config.attention.attention_dropout = *v;
        }
        if let Some(v) = matches.get_one::<f32>("ff_dropout") {
            config.attention.ff_dropout = *v;
        }
        if let Some(v) = matches.get_one::<usize>("embedding_size") {
            config.attention.embedding_size = *v;
        }
        if let Some(v) = matches.get_one::<String>("attention_type") {
            config.attention.attention_type = parse::<AttentionType>(v)?;
        }
        if let Some(v) = matches.get_one::<String>("cont_embeddings") {
            config.attention.cont_embeddings = parse::<ContEmbeddings>(v)?;
        }
        if let Some(v) = matches.get_one::<String>("final_mlp_style") {
            config.attention.final_mlp_style = parse::<FinalMlpStyle>(v)?;
        }

        if let Some(v) = matches.get_one::<String>("device") {
            config.device = v.clone();
        }
        if let Some(v) = matches.get_one::<String>("families") {
            config.families = v
                .split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect();
        }

        config.validate()?;
        Ok(RunConfig {
            mode,
            experiment: config,
            from_file: config_path.is_some(),
        })
    }
}

fn required<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(id)
        .map(String::as_str)
        .with_context(|| format!("missing required argument --{}", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse_args(args: &[&str]) -> Result<RunConfig> {
        let mut full = vec!["rfex"];
        full.extend_from_slice(args);
        let matches = command().try_get_matches_from(full)?;
        RunConfig::from_arguments(&matches)
    }

    #[test]
    fn flags_override_defaults() {
        let run = parse_args(&[
            "--mode",
            "train",
            "--dataset-id",
            "31",
            "--task",
            "multiclass",
            "--epochs",
            "3",
            "--optimizer",
            "SGD",
            "--attention-type",
            "col",
            "--cont-embeddings",
            "pos_singleMLP",
            "--families",
            "SVM, KNN",
        ])
        .unwrap();
        assert_eq!(run.mode, Mode::Train);
        assert!(!run.from_file);
        let c = run.experiment;
        assert_eq!(c.data.dataset_id, 31);
        assert_eq!(c.data.task, Task::Multiclass);
        assert_eq!(c.training.epochs, 3);
        assert_eq!(c.training.optimizer, OptimizerKind::SGD);
        assert_eq!(c.attention.attention_type, AttentionType::Col);
        assert_eq!(c.attention.cont_embeddings, ContEmbeddings::PosSingleMlp);
        assert_eq!(c.families, vec!["SVM", "KNN"]);
        assert_eq!(c.training.batch_size, 256);
    }

    #[test]
    fn config_file_is_overridden_by_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"training": {{"epochs": 7, "batch_size": 16}}, "data": {{"folds": 3}}}}"#).unwrap();
        let path = file.path().to_string_lossy().to_string();
        let run = parse_args(&[
            "--mode", "loadData", "--dataset-id", "1", "--task", "binary", "--config", &path, "--epochs", "9",
        ])
        .unwrap();
        assert!(run.from_file);
        assert_eq!(run.experiment.training.epochs, 9);
        assert_eq!(run.experiment.training.batch_size, 16);
        assert_eq!(run.experiment.data.folds, 3);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(parse_args(&["--mode", "fit", "--dataset-id", "1", "--task", "binary"]).is_err());
    }

    #[test]
    fn invalid_fold_count_is_rejected() {
        assert!(parse_args(&["--mode", "train", "--dataset-id", "1", "--task", "binary", "--folds", "1"]).is_err());
    }
}
