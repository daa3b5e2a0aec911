pub mod adapter;
pub mod decision_tree;
pub mod knn;
pub mod random_forest;
pub mod svm;

pub use adapter::ModelAdapter;
