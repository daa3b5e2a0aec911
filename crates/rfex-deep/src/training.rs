//! Mini-batch training shared by the neural adapters.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap, SGD};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use rfex_classifiers::config::{OptimizerKind, SchedulerKind, Task};

use crate::utils::tensor_to_array;

/// A network mapping joined feature rows to raw outputs (logits for
/// classification, one column for regression).
pub trait TabularNet: Send + Sync {
    fn forward_rows(&self, x: &Array2<f64>, training: bool) -> Result<Tensor>;
}

/// AdamW, Adam (AdamW without decay) or plain SGD behind one interface.
pub enum TrainOptimizer {
    AdamW(AdamW),
    Sgd(SGD),
}

impl TrainOptimizer {
    pub fn new(kind: OptimizerKind, vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        Ok(match kind {
            OptimizerKind::AdamW => TrainOptimizer::AdamW(AdamW::new(
                vars,
                ParamsAdamW {
                    lr: learning_rate,
                    ..Default::default()
                },
            )?),
            OptimizerKind::Adam => TrainOptimizer::AdamW(AdamW::new(
                vars,
                ParamsAdamW {
                    lr: learning_rate,
                    weight_decay: 0.0,
                    ..Default::default()
                },
            )?),
            OptimizerKind::SGD => TrainOptimizer::Sgd(SGD::new(vars, learning_rate)?),
        })
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        match self {
            TrainOptimizer::AdamW(opt) => opt.backward_step(loss)?,
            TrainOptimizer::Sgd(opt) => opt.backward_step(loss)?,
        }
        Ok(())
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            TrainOptimizer::AdamW(opt) => opt.set_learning_rate(lr),
            TrainOptimizer::Sgd(opt) => opt.set_learning_rate(lr),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FitSettings {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub optimizer: OptimizerKind,
    /// `None` keeps the learning rate constant.
    pub scheduler: Option<SchedulerKind>,
    pub seed: u64,
}

fn targets_tensor(y: &Array1<f64>, task: Task, device: &Device) -> Result<Tensor> {
    if task.is_classification() {
        let labels: Vec<u32> = y.iter().map(|&v| v.round().max(0.0) as u32).collect();
        Ok(Tensor::from_vec(labels, y.len(), device)?)
    } else {
        let values: Vec<f32> = y.iter().map(|&v| v as f32).collect();
        Ok(Tensor::from_vec(values, (y.len(), 1), device)?)
    }
}

fn batch_loss(output: &Tensor, targets: &Tensor, task: Task) -> Result<Tensor> {
    let loss = if task.is_classification() {
        candle_nn::loss::cross_entropy(output, targets)?
    } else {
        candle_nn::loss::mse(output, targets)?
    };
    Ok(loss)
}

/// Trains `net` on every row of `x`, shuffling with a seeded RNG each
/// epoch. Returns the mean batch loss of the last epoch.
pub fn fit(
    net: &dyn TabularNet,
    varmap: &VarMap,
    x: &Array2<f64>,
    y: &Array1<f64>,
    task: Task,
    settings: &FitSettings,
    device: &Device,
) -> Result<f32> {
    let n_rows = x.nrows();
    anyhow::ensure!(n_rows > 0, "cannot train on an empty table");
    let batch_size = settings.batch_size.clamp(1, n_rows);
    let num_batches = n_rows.div_ceil(batch_size);

    let mut opt = TrainOptimizer::new(settings.optimizer, varmap.all_vars(), settings.learning_rate)?;
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut order: Vec<usize> = (0..n_rows).collect();
    let mut last_loss = f32::NAN;

    log::debug!(
        "[fit] {} rows in {} batches for {} epochs",
        n_rows,
        num_batches,
        settings.epochs
    );

    for epoch in 0..settings.epochs {
        if let Some(scheduler) = settings.scheduler {
            opt.set_learning_rate(scheduler.learning_rate(settings.learning_rate, epoch, settings.epochs));
        }
        order.shuffle(&mut rng);

        let mut total = 0f32;
        for chunk in order.chunks(batch_size) {
            let xb = x.select(Axis(0), chunk);
            let yb = y.select(Axis(0), chunk);
            let output = net.forward_rows(&xb, true)?;
            let targets = targets_tensor(&yb, task, device)?;
            let loss = batch_loss(&output, &targets, task)?;
            opt.backward_step(&loss)?;
            total += loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
        }
        last_loss = total / num_batches as f32;
        log::trace!("[fit] epoch {}: mean batch loss {:.5}", epoch, last_loss);
    }
    log::debug!("[fit] final mean batch loss {:.5}", last_loss);
    Ok(last_loss)
}

/// Probabilities (classification) or predictions (regression), evaluated in
/// chunks of `batch_size` rows with dropout disabled.
pub fn predict_scores(net: &dyn TabularNet, x: &Array2<f64>, task: Task, batch_size: usize) -> Result<Array2<f64>> {
    let batch_size = batch_size.max(1);
    let mut parts = Vec::new();
    for start in (0..x.nrows()).step_by(batch_size) {
        let end = (start + batch_size).min(x.nrows());
        let xb = x.slice(ndarray::s![start..end, ..]).to_owned();
        let output = net.forward_rows(&xb, false)?;
        let output = if task.is_classification() {
            candle_nn::ops::softmax_last_dim(&output)?
        } else {
            output
        };
        parts.push(tensor_to_array(&output).context("reading model output")?);
    }
    if parts.is_empty() {
        return Ok(Array2::zeros((0, 0)));
    }
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    Ok(ndarray::concatenate(Axis(0), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::{Linear, Module, VarBuilder};

    struct Affine {
        linear: Linear,
        device: Device,
    }

    impl TabularNet for Affine {
        fn forward_rows(&self, x: &Array2<f64>, _training: bool) -> Result<Tensor> {
            let t = crate::utils::array_to_tensor(x, &self.device)?;
            Ok(self.linear.forward(&t)?)
        }
    }

    fn affine(varmap: &VarMap, outputs: usize) -> Result<Affine> {
        let device = Device::Cpu;
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &device);
        Ok(Affine {
            linear: candle_nn::linear(2, outputs, vb.pp("affine"))?,
            device,
        })
    }

    fn settings(optimizer: OptimizerKind, epochs: usize) -> FitSettings {
        FitSettings {
            epochs,
            batch_size: 4,
            learning_rate: 0.05,
            optimizer,
            scheduler: None,
            seed: 3,
        }
    }

    #[test]
    fn regression_loss_decreases() -> Result<()> {
        let x = Array2::from_shape_fn((16, 2), |(i, j)| (i as f64 / 8.0) - j as f64 * 0.5);
        let y = x.map_axis(Axis(1), |r| 2.0 * r[0] - r[1]);
        let varmap = VarMap::new();
        let net = affine(&varmap, 1)?;
        let early = fit(&net, &varmap, &x, &y, Task::Regression, &settings(OptimizerKind::SGD, 1), &Device::Cpu)?;
        let late = fit(&net, &varmap, &x, &y, Task::Regression, &settings(OptimizerKind::SGD, 200), &Device::Cpu)?;
        assert!(late < early);
        Ok(())
    }

    #[test]
    fn classifier_scores_are_probabilities() -> Result<()> {
        let x = Array2::from_shape_fn((12, 2), |(i, j)| if (i % 2 == 0) == (j == 0) { 1.0 } else { -1.0 });
        let y = Array1::from_shape_fn(12, |i| (i % 2) as f64);
        let varmap = VarMap::new();
        let net = affine(&varmap, 2)?;
        fit(&net, &varmap, &x, &y, Task::Binary, &settings(OptimizerKind::Adam, 100), &Device::Cpu)?;
        let scores = predict_scores(&net, &x, Task::Binary, 5)?;
        assert_eq!(scores.dim(), (12, 2));
        for (i, row) in scores.rows().into_iter().enumerate() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
            assert!(row[i % 2] > 0.5);
        }
        Ok(())
    }
}
