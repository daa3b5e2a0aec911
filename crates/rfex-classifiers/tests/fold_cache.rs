use ndarray::{Array1, Array2};
use rfex_classifiers::config::Task;
use rfex_classifiers::io::dataset::kfold;
use rfex_classifiers::io::FoldCache;
use rfex_classifiers::table::{CatDescriptor, ContDescriptor, FeatureTable};
use rfex_classifiers::RfexError;

fn table() -> FeatureTable {
    let n = 12;
    FeatureTable::new(
        "cached",
        Task::Binary,
        2,
        Array2::from_shape_fn((n, 1), |(i, _)| (i % 3) as i64),
        Array2::from_shape_fn((n, 2), |(i, j)| i as f64 * 0.5 - j as f64),
        Array1::from_shape_fn(n, |i| (i % 2) as f64),
        vec![CatDescriptor { index: 0, name: "kind".into(), cardinality: 3 }],
        vec![
            ContDescriptor { index: 1, name: "width".into() },
            ContDescriptor { index: 2, name: "height".into() },
        ],
    )
    .expect("valid table")
}

#[test]
fn stored_folds_load_back_identically() {
    let root = tempfile::tempdir().unwrap();
    let cache = FoldCache::new(root.path(), false, Task::Binary, 31, 5);
    let folds = kfold(&table(), 3, 5).unwrap();

    cache.store(&folds).unwrap();
    assert!(cache.dir().join("train").join("fold2.bin").exists());
    assert!(cache.dir().join("test").join("fold0.bin").exists());

    let loaded = cache.load().unwrap();
    assert_eq!(loaded, folds);
}

#[test]
fn existing_cache_is_never_overwritten() {
    let root = tempfile::tempdir().unwrap();
    let cache = FoldCache::new(root.path(), false, Task::Binary, 31, 5);
    let folds = kfold(&table(), 3, 5).unwrap();
    cache.store(&folds).unwrap();

    let other = kfold(&table(), 4, 9).unwrap();
    let err = cache.store(&other).unwrap_err();
    assert!(matches!(err, RfexError::CacheExists(_)));
    assert_eq!(cache.load().unwrap(), folds);
}

#[test]
fn missing_cache_is_reported() {
    let root = tempfile::tempdir().unwrap();
    let cache = FoldCache::new(root.path(), false, Task::Regression, 1, 5);
    assert!(matches!(cache.load(), Err(RfexError::CacheMissing(_))));
}

#[test]
fn random_feature_caches_live_in_a_sibling_root() {
    let root = tempfile::tempdir().unwrap();
    let base = root.path().join("datasets");
    let plain = FoldCache::new(&base, false, Task::Multiclass, 7, 1);
    let probed = FoldCache::new(&base, true, Task::Multiclass, 7, 1);
    assert_eq!(plain.dir(), base.join("multiclass").join("7").join("seed1"));
    assert_eq!(
        probed.dir(),
        root.path().join("datasets_random").join("multiclass").join("7").join("seed1")
    );
}
