//! K-nearest-neighbours with Euclidean distance and uniform weights.

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::config::Task;
use crate::error::{Result, RfexError};
use crate::models::adapter::ModelAdapter;
use crate::table::FeatureTable;

struct Memory {
    x: Array2<f64>,
    y: Array1<f64>,
    task: Task,
    n_classes: usize,
}

pub struct KnnAdapter {
    name: String,
    k: usize,
    memory: Option<Memory>,
}

impl KnnAdapter {
    pub fn new(name: impl Into<String>, k: usize) -> Self {
        KnnAdapter {
            name: name.into(),
            k: k.max(1),
            memory: None,
        }
    }
}

impl ModelAdapter for KnnAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn train(&mut self, train: &FeatureTable) -> Result<()> {
        if train.n_rows() == 0 {
            return Err(RfexError::EmptyTable("training rows"));
        }
        self.memory = Some(Memory {
            x: train.joined(),
            y: train.labels().clone(),
            task: train.task(),
            n_classes: train.num_classes().max(1),
        });
        Ok(())
    }

    fn predict_scores(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let memory = self
            .memory
            .as_ref()
            .ok_or_else(|| RfexError::Model(format!("{} used before training", self.name)))?;
        if x.ncols() != memory.x.ncols() {
            return Err(RfexError::FeatureCountMismatch {
                expected: memory.x.ncols(),
                found: x.ncols(),
                context: "KNN query".into(),
            });
        }

        let width = if memory.task.is_classification() { memory.n_classes } else { 1 };
        let rows: Vec<Vec<f64>> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let neighbours = find_k_nearest(x.row(i), &memory.x, &memory.y, self.k);
                if memory.task.is_classification() {
                    vote_fractions(&neighbours, memory.n_classes)
                } else {
                    let mean = neighbours.iter().map(|&(_, y)| y).sum::<f64>() / neighbours.len().max(1) as f64;
                    vec![mean]
                }
            })
            .collect();

        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((x.nrows(), width), flat).map_err(|e| RfexError::Model(e.to_string()))
    }

    fn release(&mut self) {
        self.memory = None;
    }
}

/// Max-heap entry keyed on distance, so the farthest kept neighbour is on top.
#[derive(PartialEq)]
struct Neighbour(f64, f64);

impl Eq for Neighbour {}

impl PartialOrd for Neighbour {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbour {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

/// `(distance, label)` of the `k` closest training rows.
fn find_k_nearest(point: ArrayView1<f64>, x_train: &Array2<f64>, y_train: &Array1<f64>, k: usize) -> Vec<(f64, f64)> {
    let mut heap = BinaryHeap::with_capacity(k + 1);
    for (row, &label) in x_train.rows().into_iter().zip(y_train.iter()) {
        let dist = point
            .iter()
            .zip(row.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        if heap.len() < k {
            heap.push(Neighbour(dist, label));
        } else if let Some(top) = heap.peek() {
            if dist < top.0 {
                heap.pop();
                heap.push(Neighbour(dist, label));
            }
        }
    }
    heap.into_iter().map(|n| (n.0, n.1)).collect()
}

fn vote_fractions(neighbours: &[(f64, f64)], n_classes: usize) -> Vec<f64> {
    let mut counts = vec![0.0; n_classes];
    for &(_, label) in neighbours {
        let class = label.round().max(0.0) as usize;
        if class < n_classes {
            counts[class] += 1.0;
        }
    }
    let total: f64 = counts.iter().sum();
    if total > 0.0 {
        counts.iter_mut().for_each(|c| *c /= total);
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ContDescriptor;
    use ndarray::array;

    fn clusters(task: Task) -> FeatureTable {
        let cont = array![[0.0, 0.0], [0.1, 0.2], [0.2, 0.1], [5.0, 5.0], [5.1, 4.9], [4.8, 5.2]];
        let labels = match task {
            Task::Regression => array![1.0, 1.2, 1.4, 10.0, 11.0, 12.0],
            _ => array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
        };
        FeatureTable::new(
            "clusters",
            task,
            if task == Task::Regression { 1 } else { 2 },
            Array2::zeros((6, 0)),
            cont,
            labels,
            vec![],
            vec![
                ContDescriptor { index: 0, name: "x".into() },
                ContDescriptor { index: 1, name: "y".into() },
            ],
        )
        .unwrap()
    }

    #[test]
    fn classifies_by_majority_of_three() {
        let table = clusters(Task::Binary);
        let mut knn = KnnAdapter::new("KNN", 3);
        knn.train(&table).unwrap();
        assert_eq!(knn.evaluate(&table).unwrap(), 1.0);
        let scores = knn.predict_scores(&array![[0.05, 0.05], [4.0, 4.0]]).unwrap();
        assert_eq!(scores, array![[1.0, 0.0], [0.0, 1.0]]);
    }

    #[test]
    fn regression_averages_neighbours() {
        let table = clusters(Task::Regression);
        let mut knn = KnnAdapter::new("KNN", 3);
        knn.train(&table).unwrap();
        let scores = knn.predict_scores(&array![[5.0, 5.0]]).unwrap();
        assert!((scores[[0, 0]] - 11.0).abs() < 1e-12);
    }

    #[test]
    fn query_width_must_match() {
        let mut knn = KnnAdapter::new("KNN", 3);
        knn.train(&clusters(Task::Binary)).unwrap();
        assert!(knn.predict_scores(&array![[1.0, 2.0, 3.0]]).is_err());
    }
}
