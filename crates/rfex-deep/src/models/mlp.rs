use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder, VarMap};
use ndarray::Array2;

use rfex_classifiers::config::{MlpConfig, OptimizerKind, Task};
use rfex_classifiers::error::{Result as RfexResult, RfexError};
use rfex_classifiers::models::ModelAdapter;
use rfex_classifiers::table::FeatureTable;

use crate::model_error;
use crate::training::{fit, predict_scores, FitSettings, TabularNet};
use crate::utils::{array_to_tensor, get_device};

/// Fully connected ReLU network over the joined feature matrix.
pub struct MlpNet {
    layers: Vec<Linear>,
    device: Device,
}

impl MlpNet {
    pub fn new(varbuilder: VarBuilder, n_in: usize, hidden: &[usize], n_out: usize, device: &Device) -> Result<Self> {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut width = n_in;
        for (i, &h) in hidden.iter().enumerate() {
            layers.push(candle_nn::linear(width, h, varbuilder.pp(format!("hidden_{}", i)))?);
            width = h;
        }
        layers.push(candle_nn::linear(width, n_out, varbuilder.pp("out"))?);
        Ok(Self {
            layers,
            device: device.clone(),
        })
    }
}

impl TabularNet for MlpNet {
    fn forward_rows(&self, x: &Array2<f64>, _training: bool) -> Result<Tensor> {
        let mut h = array_to_tensor(x, &self.device)?;
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h)?;
            if i < last {
                h = h.relu()?;
            }
        }
        Ok(h)
    }
}

struct FittedMlp {
    _varmap: VarMap,
    net: MlpNet,
    task: Task,
    n_features: usize,
}

pub struct MlpAdapter {
    name: String,
    config: MlpConfig,
    seed: u64,
    device: Device,
    fitted: Option<FittedMlp>,
}

impl MlpAdapter {
    pub fn new(name: impl Into<String>, config: &MlpConfig, seed: u64, device: &str) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            config: config.clone(),
            seed,
            device: get_device(device)?,
            fitted: None,
        })
    }

    fn fit_table(&self, train: &FeatureTable) -> Result<FittedMlp> {
        let task = train.task();
        let n_out = if task.is_classification() {
            train.num_classes().max(2)
        } else {
            1
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
        let net = MlpNet::new(vb, train.n_features(), &self.config.hidden_layers, n_out, &self.device)?;
        let settings = FitSettings {
            epochs: self.config.epochs,
            batch_size: self.config.batch_size.min(train.n_rows()),
            learning_rate: self.config.learning_rate,
            optimizer: OptimizerKind::Adam,
            scheduler: None,
            seed: self.seed,
        };
        fit(&net, &varmap, &train.joined(), train.labels(), task, &settings, &self.device)?;
        Ok(FittedMlp {
            _varmap: varmap,
            net,
            task,
            n_features: train.n_features(),
        })
    }
}

impl ModelAdapter for MlpAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn train(&mut self, train: &FeatureTable) -> RfexResult<()> {
        self.fitted = None;
        self.fitted = Some(self.fit_table(train).map_err(|e| model_error(&self.name, e))?);
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
        predict_scores(&fitted.net, x, fitted.task, self.config.batch_size.max(1))
            .map_err(|e| model_error(&self.name, e))
    }

    fn release(&mut self) {
        self.fitted = None;
    }
}
