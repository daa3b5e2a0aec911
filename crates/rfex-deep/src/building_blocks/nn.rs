use candle_core::{Result, Tensor, D};
use candle_nn::{Dropout, LayerNorm, Linear, Module, VarBuilder};

/// Multi-head self-attention over the middle axis of a `(b, t, dim)` input.
///
/// `head_dim * num_heads` need not equal `model_dim`; the output projection
/// maps back to `model_dim`.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    proj_q: Linear,
    proj_k: Linear,
    proj_v: Linear,
    proj_out: Linear,
    attn_dropout: Dropout,
    num_heads: usize,
    head_dim: usize,
}

impl MultiHeadAttention {
    pub fn new(
        varbuilder: VarBuilder,
        model_dim: usize,
        num_heads: usize,
        head_dim: usize,
        dropout_prob: f32,
    ) -> Result<Self> {
        let inner = num_heads * head_dim;
        Ok(Self {
            proj_q: candle_nn::linear_no_bias(model_dim, inner, varbuilder.pp("proj_q"))?,
            proj_k: candle_nn::linear_no_bias(model_dim, inner, varbuilder.pp("proj_k"))?,
            proj_v: candle_nn::linear_no_bias(model_dim, inner, varbuilder.pp("proj_v"))?,
            proj_out: candle_nn::linear(inner, model_dim, varbuilder.pp("proj_out"))?,
            attn_dropout: Dropout::new(dropout_prob),
            num_heads,
            head_dim,
        })
    }

    pub fn forward(&self, x: &Tensor, training: bool) -> Result<Tensor> {
        let (b, t, _) = x.dims3()?;
        log::trace!(
            "[MultiHeadAttention] input b={}, t={}, head_dim={} (num_heads={})",
            b,
            t,
            self.head_dim,
            self.num_heads
        );

        let split_heads = |proj: &Linear| -> Result<Tensor> {
            proj.forward(x)?
                .reshape((b, t, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = split_heads(&self.proj_q)?;
        let k = split_heads(&self.proj_k)?;
        let v = split_heads(&self.proj_v)?;

        let k_t = k.transpose(2, 3)?.contiguous()?;
        let scores = (q.matmul(&k_t)? / (self.head_dim as f64).sqrt())?;
        let attn = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let attn = self.attn_dropout.forward(&attn, training)?;

        let context = attn
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b, t, self.num_heads * self.head_dim))?;
        log::trace!("[MultiHeadAttention] context shape: {:?}", context.shape());
        self.proj_out.forward(&context)
    }
}

#[derive(Debug, Clone)]
pub struct FeedForward {
    lin1: Linear,
    lin2: Linear,
    dropout: Dropout,
}

impl FeedForward {
    pub fn new(varbuilder: VarBuilder, model_dim: usize, ff_dim: usize, dropout_prob: f32) -> Result<Self> {
        Ok(Self {
            lin1: candle_nn::linear(model_dim, ff_dim, varbuilder.pp("lin1"))?,
            lin2: candle_nn::linear(ff_dim, model_dim, varbuilder.pp("lin2"))?,
            dropout: Dropout::new(dropout_prob),
        })
    }

    pub fn forward(&self, x: &Tensor, training: bool) -> Result<Tensor> {
        let x = self.lin1.forward(x)?.gelu()?;
        let x = self.dropout.forward(&x, training)?;
        self.lin2.forward(&x)
    }
}

/// Pre-norm encoder layer: `x + attn(norm(x))`, then `x + ff(norm(x))`.
/// Without a feed-forward block only the attention half is applied.
#[derive(Debug, Clone)]
pub struct TransformerEncoderLayer {
    self_attn: MultiHeadAttention,
    ff: Option<FeedForward>,
    norm1: LayerNorm,
    norm2: Option<LayerNorm>,
}

impl TransformerEncoderLayer {
    pub fn new(
        varbuilder: VarBuilder,
        model_dim: usize,
        num_heads: usize,
        head_dim: usize,
        attention_dropout: f32,
        ff_dropout: Option<f32>,
    ) -> Result<Self> {
        let self_attn = MultiHeadAttention::new(
            varbuilder.pp("self_attn"),
            model_dim,
            num_heads,
            head_dim,
            attention_dropout,
        )?;
        let norm1 = candle_nn::layer_norm(model_dim, 1e-5, varbuilder.pp("norm1"))?;
        let (ff, norm2) = match ff_dropout {
            Some(p) => (
                Some(FeedForward::new(varbuilder.pp("ff"), model_dim, model_dim * 4, p)?),
                Some(candle_nn::layer_norm(model_dim, 1e-5, varbuilder.pp("norm2"))?),
            ),
            None => (None, None),
        };
        Ok(Self {
            self_attn,
            ff,
            norm1,
            norm2,
        })
    }

    pub fn forward(&self, x: &Tensor, training: bool) -> Result<Tensor> {
        log::trace!("[TransformerEncoderLayer] input shape: {:?}", x.shape());
        let attn = self.self_attn.forward(&self.norm1.forward(x)?, training)?;
        let x = (x + attn)?;
        match (&self.ff, &self.norm2) {
            (Some(ff), Some(norm2)) => {
                let out = ff.forward(&norm2.forward(&x)?, training)?;
                x + out
            }
            _ => Ok(x),
        }
    }
}

/// `in -> hidden -> out` with a ReLU in between.
#[derive(Debug, Clone)]
pub struct SimpleMlp {
    lin1: Linear,
    lin2: Linear,
}

impl SimpleMlp {
    pub fn new(varbuilder: VarBuilder, in_dim: usize, hidden_dim: usize, out_dim: usize) -> Result<Self> {
        Ok(Self {
            lin1: candle_nn::linear(in_dim, hidden_dim, varbuilder.pp("lin1"))?,
            lin2: candle_nn::linear(hidden_dim, out_dim, varbuilder.pp("lin2"))?,
        })
    }
}

impl Module for SimpleMlp {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.lin1.forward(x)?.relu()?;
        self.lin2.forward(&x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn attention_keeps_shape() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mha = MultiHeadAttention::new(vb.pp("mha"), 12, 3, 5, 0.0)?;
        let x = Tensor::randn(0f32, 1.0, (2, 7, 12), &device)?;
        let out = mha.forward(&x, false)?;
        assert_eq!(out.dims(), &[2, 7, 12]);
        Ok(())
    }

    #[test]
    fn encoder_layer_with_and_without_ff() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let x = Tensor::randn(0f32, 1.0, (3, 4, 8), &device)?;

        let full = TransformerEncoderLayer::new(vb.pp("full"), 8, 2, 4, 0.1, Some(0.1))?;
        assert_eq!(full.forward(&x, true)?.dims(), &[3, 4, 8]);

        let attn_only = TransformerEncoderLayer::new(vb.pp("attn"), 8, 2, 4, 0.1, None)?;
        assert_eq!(attn_only.forward(&x, false)?.dims(), &[3, 4, 8]);
        Ok(())
    }

    #[test]
    fn eval_mode_is_deterministic() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let layer = TransformerEncoderLayer::new(vb, 8, 2, 4, 0.5, Some(0.5))?;
        let x = Tensor::randn(0f32, 1.0, (2, 3, 8), &device)?;
        let a = layer.forward(&x, false)?.flatten_all()?.to_vec1::<f32>()?;
        let b = layer.forward(&x, false)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(a, b);
        Ok(())
    }
}
