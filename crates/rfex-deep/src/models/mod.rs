pub mod attention;
pub mod mlp;

pub use attention::AttentionAdapter;
pub use mlp::MlpAdapter;
