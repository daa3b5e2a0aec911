//! Self-attention tabular model with column and intersample (row) attention.
//!
//! Every row becomes a token sequence `[CLS, categorical..., continuous...]`
//! of width `embedding_size`. Column layers attend across the features of a
//! row, row layers attend across the rows of a batch with each row flattened
//! into one token.

use anyhow::{Context, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::{Embedding, Module, VarBuilder, VarMap};
use ndarray::Array2;

use rfex_classifiers::config::{AttentionConfig, AttentionType, ContEmbeddings, ExperimentConfig, FinalMlpStyle, Task};
use rfex_classifiers::error::{Result as RfexResult, RfexError};
use rfex_classifiers::models::ModelAdapter;
use rfex_classifiers::table::{split_joined, FeatureTable};

use crate::building_blocks::nn::{SimpleMlp, TransformerEncoderLayer};
use crate::training::{fit, predict_scores, FitSettings, TabularNet};
use crate::utils::{array_to_tensor, get_device};
use crate::model_error;

const COLUMN_HEAD_DIM: usize = 16;
const ROW_HEAD_DIM: usize = 64;
const CONT_HIDDEN: usize = 100;
const HEAD_HIDDEN: usize = 1000;

enum ContEmbedding {
    PerColumn(Vec<SimpleMlp>),
    Shared(SimpleMlp),
    /// Values bypass the transformer and join the head input.
    Raw,
}

enum Block {
    Column(TransformerEncoderLayer),
    Row(TransformerEncoderLayer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readout {
    Cls,
    Flat,
}

enum Head {
    Common(SimpleMlp),
    Separate(Vec<SimpleMlp>),
}

pub struct TabAttentionModel {
    cardinalities: Vec<usize>,
    n_cont: usize,
    offsets: Vec<u32>,
    cat_embedding: Embedding,
    cont_embedding: ContEmbedding,
    blocks: Vec<Block>,
    readout: Readout,
    head: Head,
    device: Device,
}

impl TabAttentionModel {
    pub fn new(
        varbuilder: VarBuilder,
        config: &AttentionConfig,
        cardinalities: &[usize],
        n_cont: usize,
        y_dim: usize,
        device: &Device,
    ) -> Result<Self> {
        let emb = config.embedding_size;
        let cardinalities: Vec<usize> = cardinalities.iter().map(|&c| c.max(1)).collect();

        // CLS owns code 0; categorical column j starts right after column j-1
        let mut offsets = Vec::with_capacity(cardinalities.len());
        let mut next = 1u32;
        for &c in &cardinalities {
            offsets.push(next);
            next += c as u32;
        }
        let cat_embedding = candle_nn::embedding(next as usize, emb, varbuilder.pp("cat_embedding"))?;

        let cont_embedding = match config.cont_embeddings {
            ContEmbeddings::Mlp => ContEmbedding::PerColumn(
                (0..n_cont)
                    .map(|j| SimpleMlp::new(varbuilder.pp(format!("cont_mlp_{}", j)), 1, CONT_HIDDEN, emb))
                    .collect::<candle_core::Result<Vec<_>>>()?,
            ),
            ContEmbeddings::PosSingleMlp => {
                ContEmbedding::Shared(SimpleMlp::new(varbuilder.pp("cont_mlp"), 1, CONT_HIDDEN, emb)?)
            }
            ContEmbeddings::NoEmb => ContEmbedding::Raw,
        };
        let embedded_cont = match cont_embedding {
            ContEmbedding::Raw => 0,
            _ => n_cont,
        };
        let n_tokens = 1 + cardinalities.len() + embedded_cont;

        let heads = config.heads.max(1);
        let column = |name: String, with_ff: bool| {
            TransformerEncoderLayer::new(
                varbuilder.pp(name),
                emb,
                heads,
                COLUMN_HEAD_DIM,
                config.attention_dropout,
                with_ff.then_some(config.ff_dropout),
            )
        };
        let row = |name: String| {
            TransformerEncoderLayer::new(
                varbuilder.pp(name),
                emb * n_tokens,
                heads,
                ROW_HEAD_DIM,
                config.attention_dropout,
                Some(config.ff_dropout),
            )
        };

        let mut blocks = Vec::new();
        let readout = match config.attention_type {
            AttentionType::Col => {
                for i in 0..config.depth {
                    blocks.push(Block::Column(column(format!("col_{}", i), true)?));
                }
                Readout::Cls
            }
            AttentionType::Row => {
                for i in 0..config.depth {
                    blocks.push(Block::Row(row(format!("row_{}", i))?));
                }
                Readout::Cls
            }
            AttentionType::ColRow => {
                for i in 0..config.depth {
                    blocks.push(Block::Column(column(format!("col_{}", i), true)?));
                    blocks.push(Block::Row(row(format!("row_{}", i))?));
                }
                Readout::Cls
            }
            AttentionType::JustMlp => Readout::Flat,
            AttentionType::Attn => {
                blocks.push(Block::Column(column("attn".to_string(), false)?));
                Readout::Cls
            }
            AttentionType::AttnMlp => {
                blocks.push(Block::Column(column("attn".to_string(), false)?));
                Readout::Flat
            }
        };

        let mut head_in = match readout {
            Readout::Cls => emb,
            Readout::Flat => emb * n_tokens,
        };
        if matches!(cont_embedding, ContEmbedding::Raw) {
            head_in += n_cont;
        }
        let head = match config.final_mlp_style {
            FinalMlpStyle::Common => Head::Common(SimpleMlp::new(varbuilder.pp("head"), head_in, HEAD_HIDDEN, y_dim)?),
            FinalMlpStyle::Sep => Head::Separate(
                (0..y_dim)
                    .map(|k| SimpleMlp::new(varbuilder.pp(format!("head_{}", k)), head_in, 5 * emb, 1))
                    .collect::<candle_core::Result<Vec<_>>>()?,
            ),
        };

        log::debug!(
            "[TabAttention] {} tokens of width {}, {} blocks, head input {}",
            n_tokens,
            emb,
            blocks.len(),
            head_in
        );

        Ok(Self {
            cardinalities,
            n_cont,
            offsets,
            cat_embedding,
            cont_embedding,
            blocks,
            readout,
            head,
            device: device.clone(),
        })
    }

    /// Token tensor `(b, n_tokens, emb)` plus the raw continuous block when
    /// continuous values are not embedded.
    fn embed(&self, x: &Array2<f64>) -> Result<(Tensor, Option<Tensor>)> {
        let b = x.nrows();
        let (cat, cont) = split_joined(x, &self.cardinalities);

        let mut codes = Vec::with_capacity(b * (self.offsets.len() + 1));
        for row in cat.rows() {
            codes.push(0u32);
            codes.extend(row.iter().zip(&self.offsets).map(|(&c, &o)| c + o));
        }
        let codes = Tensor::from_vec(codes, (b, self.offsets.len() + 1), &self.device)?;
        let mut tokens = vec![self.cat_embedding.forward(&codes)?];

        let mut raw = None;
        if self.n_cont > 0 {
            let cont = array_to_tensor(&cont, &self.device)?;
            match &self.cont_embedding {
                ContEmbedding::PerColumn(mlps) => {
                    for (j, mlp) in mlps.iter().enumerate() {
                        tokens.push(mlp.forward(&cont.narrow(1, j, 1)?)?.unsqueeze(1)?);
                    }
                }
                ContEmbedding::Shared(mlp) => {
                    let flat = cont.reshape((b * self.n_cont, 1))?;
                    let emb = mlp.forward(&flat)?;
                    let d = emb.dim(1)?;
                    tokens.push(emb.reshape((b, self.n_cont, d))?);
                }
                ContEmbedding::Raw => raw = Some(cont),
            }
        }
        Ok((Tensor::cat(&tokens, 1)?, raw))
    }

    pub fn forward(&self, x: &Array2<f64>, training: bool) -> Result<Tensor> {
        let (mut h, raw) = self.embed(x)?;
        log::trace!("[TabAttention] embedded shape: {:?}", h.shape());

        for block in &self.blocks {
            h = match block {
                Block::Column(layer) => layer.forward(&h, training)?,
                Block::Row(layer) => {
                    let (b, n, d) = h.dims3()?;
                    let rows = h.reshape((1, b, n * d))?;
                    layer.forward(&rows, training)?.reshape((b, n, d))?
                }
            };
        }

        let mut features = match self.readout {
            Readout::Cls => h.i((.., 0))?.contiguous()?,
            Readout::Flat => h.flatten_from(1)?,
        };
        if let Some(raw) = raw {
            features = Tensor::cat(&[&features, &raw], 1)?;
        }

        let out = match &self.head {
            Head::Common(mlp) => mlp.forward(&features)?,
            Head::Separate(mlps) => {
                let outs = mlps
                    .iter()
                    .map(|m| m.forward(&features))
                    .collect::<candle_core::Result<Vec<_>>>()?;
                Tensor::cat(&outs, 1)?
            }
        };
        log::trace!("[TabAttention] output shape: {:?}", out.shape());
        Ok(out)
    }
}

impl TabularNet for TabAttentionModel {
    fn forward_rows(&self, x: &Array2<f64>, training: bool) -> Result<Tensor> {
        self.forward(x, training)
    }
}

struct FittedAttention {
    // owns the parameters referenced by `model`
    _varmap: VarMap,
    model: TabAttentionModel,
    task: Task,
    n_features: usize,
}

/// The attention model behind the [`ModelAdapter`] contract.
pub struct AttentionAdapter {
    name: String,
    config: ExperimentConfig,
    device: Device,
    fitted: Option<FittedAttention>,
}

impl AttentionAdapter {
    pub fn new(name: impl Into<String>, config: &ExperimentConfig) -> Result<Self> {
        let device = get_device(&config.device).with_context(|| format!("selecting device {}", config.device))?;
        Ok(Self {
            name: name.into(),
            config: config.clone(),
            device,
            fitted: None,
        })
    }

    fn fit_table(&self, train: &FeatureTable) -> Result<FittedAttention> {
        let task = train.task();
        let y_dim = if task.is_classification() {
            train.num_classes().max(2)
        } else {
            1
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
        let model = TabAttentionModel::new(
            vb,
            &self.config.attention,
            &train.cardinalities(),
            train.n_cont(),
            y_dim,
            &self.device,
        )?;

        let training = &self.config.training;
        let settings = FitSettings {
            epochs: training.epochs,
            batch_size: training.batch_size,
            learning_rate: training.learning_rate,
            optimizer: training.optimizer,
            scheduler: Some(training.scheduler),
            seed: training.seed,
        };
        let loss = fit(&model, &varmap, &train.joined(), train.labels(), task, &settings, &self.device)?;
        log::debug!("[{}] trained on {} rows, final loss {:.5}", self.name, train.n_rows(), loss);

        Ok(FittedAttention {
            _varmap: varmap,
            model,
            task,
            n_features: train.n_features(),
        })
    }
}

impl ModelAdapter for AttentionAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn train(&mut self, train: &FeatureTable) -> RfexResult<()> {
        self.fitted = None;
        let fitted = self.fit_table(train).map_err(|e| model_error(&self.name, e))?;
        self.fitted = Some(fitted);
        Ok(())
    }

    fn predict_scores(&self, x: &Array2<f64>) -> RfexResult<Array2<f64>> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| RfexError::Model(format!("{} used before training", self.name)))?;
        if x.ncols() != fitted.n_features {
            return Err(RfexError::FeatureCountMismatch {
                expected: fitted.n_features,
                found: x.ncols(),
                context: format!("{} query", self.name),
            });
        }
        predict_scores(&fitted.model, x, fitted.task, self.config.training.batch_size)
            .map_err(|e| model_error(&self.name, e))
    }

    fn release(&mut self) {
        self.fitted = None;
    }
}
