//! Integration tests for the zero library
//!
//! These tests drive every registered algorithm through the public trait
//! only, the way evaluation code does.

use tempfile::TempDir;
use zero::{
    Hyperparameters, Metric, Rating, RatingSet, RecommendRequest, RecommendationAlgorithm,
    Registry, Split, UserParameters, ZeroError,
};

const NB_USERS: usize = 5;
const NB_WORKS: usize = 10;

/// Entry of a rank-2 matrix with user factors `[[1,0],[0,1],[1,1],[1,2],[2,1]]`
/// and item factors `[j % 3, (j + 1) % 2]`
fn rank_two(user: usize, item: usize) -> f64 {
    let u = [[1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 2.0], [2.0, 1.0]][user];
    u[0] * (item % 3) as f64 + u[1] * ((item + 1) % 2) as f64
}

/// Four ratings only: users 0 and 4 and most items are never seen
fn scenario() -> RatingSet {
    [(1, 0), (2, 1), (3, 0), (3, 1)]
        .into_iter()
        .map(|(u, i)| Rating::new(u, i, rank_two(u, i)))
        .collect()
}

fn dense() -> RatingSet {
    (0..NB_USERS)
        .flat_map(|u| (0..NB_WORKS).map(move |i| (u, i)))
        .filter(|&(u, i)| (u + 2 * i) % 3 != 0)
        .map(|(u, i)| Rating::new(u, i, 1.0 + rank_two(u, i)))
        .collect()
}

fn all_pairs() -> Vec<(usize, usize)> {
    (0..NB_USERS)
        .flat_map(|u| (0..NB_WORKS).map(move |i| (u, i)))
        .collect()
}

fn fitted(
    registry: &Registry,
    name: &str,
    ratings: &RatingSet,
) -> Box<dyn RecommendationAlgorithm> {
    let mut model = registry.instantiate(name).expect("registered algorithm");
    model.set_parameters(NB_USERS, NB_WORKS);
    model
        .fit(ratings)
        .unwrap_or_else(|e| panic!("{name} failed to fit: {e}"));
    model
}

#[test]
fn test_every_algorithm_predicts_finite_values() {
    let registry = Registry::with_builtin();
    let pairs = all_pairs();

    for name in registry.list_available() {
        for ratings in [scenario(), dense()] {
            let model = fitted(&registry, name, &ratings);
            let predictions = model.predict(&pairs).unwrap();
            assert_eq!(predictions.len(), pairs.len(), "{name}");
            assert!(
                predictions.iter().all(|p| p.is_finite()),
                "{name} produced a non-finite prediction"
            );
        }
    }
}

#[test]
fn test_fit_requires_dimensions() {
    let registry = Registry::with_builtin();
    for name in registry.list_available() {
        let mut model = registry.instantiate(name).unwrap();
        assert!(
            matches!(model.fit(&scenario()), Err(ZeroError::DimensionsNotSet(_))),
            "{name} fitted without dimensions"
        );
    }
}

#[test]
fn test_cold_start_single_rating() {
    let registry = Registry::with_builtin();
    let items: Vec<usize> = (0..NB_WORKS).collect();

    let mut supported = Vec::new();
    for name in registry.list_available() {
        let model = fitted(&registry, name, &scenario());
        if !model.supports_single_user() {
            assert!(matches!(
                model.fit_single_user(&[1], &[2.0]),
                Err(ZeroError::UnsupportedOperation(_))
            ));
            continue;
        }
        let parameters = model.fit_single_user(&[1], &[2.0]).unwrap();
        let predictions = model.predict_single_user(&items, &parameters).unwrap();
        assert_eq!(predictions.len(), NB_WORKS, "{name}");
        assert!(predictions.iter().all(|p| p.is_finite()), "{name}");
        supported.push(name);
    }
    assert_eq!(supported, vec!["als", "knn", "sgd", "sgd2", "svd", "svdknn"]);
}

#[test]
fn test_single_user_fit_leaves_model_untouched() {
    let registry = Registry::with_builtin();
    let pairs = all_pairs();
    for name in ["als", "sgd", "svd", "svdknn", "knn"] {
        let model = fitted(&registry, name, &dense());
        let before = model.predict(&pairs).unwrap();
        model.fit_single_user(&[0, 3], &[4.0, 1.0]).unwrap();
        assert_eq!(model.predict(&pairs).unwrap(), before, "{name}");
    }
}

#[test]
fn test_wrong_user_parameters_are_rejected() {
    let registry = Registry::with_builtin();
    let knn = fitted(&registry, "knn", &dense());
    let latent = UserParameters::Latent {
        offset: 0.0,
        factors: vec![0.0; 3],
    };
    assert!(matches!(
        knn.predict_single_user(&[0], &latent),
        Err(ZeroError::InvalidParameter(_))
    ));

    let als = fitted(&registry, "als", &dense());
    assert!(matches!(
        als.predict_single_user(&[0], &UserParameters::Neighbors(vec![1])),
        Err(ZeroError::InvalidParameter(_))
    ));
}

#[test]
fn test_save_load_reproduces_predictions() {
    let registry = Registry::with_builtin();
    let folder = TempDir::new().unwrap();
    let pairs = all_pairs();

    for name in registry.list_available() {
        let model = fitted(&registry, name, &dense());
        if !model.is_serializable() {
            assert!(matches!(
                model.save(folder.path(), None),
                Err(ZeroError::NotSerializable(_))
            ));
            continue;
        }

        let path = model.save(folder.path(), None).unwrap();
        assert_eq!(path, folder.path().join(format!("{}.json", model.shortname())));

        let mut restored = registry.instantiate(name).unwrap();
        restored.load(folder.path(), None).unwrap();
        assert_eq!(
            restored.predict(&pairs).unwrap(),
            model.predict(&pairs).unwrap(),
            "{name} predictions changed across save/load"
        );

        restored.delete_snapshot(folder.path(), None).unwrap();
        assert!(!path.exists());
    }
}

#[test]
fn test_unzipped_models_reload_bit_identical() {
    let folder = TempDir::new().unwrap();
    let pairs = all_pairs();

    let mut als = zero::Als::new().with_components(3).with_iterations(5);
    als.set_parameters(NB_USERS, NB_WORKS);
    als.fit(&dense()).unwrap();
    als.unzip().unwrap();
    als.save(folder.path(), None).unwrap();
    let mut restored_als = zero::Als::new().with_components(3);
    restored_als.load(folder.path(), None).unwrap();

    let mut svd = zero::Svd::new().with_components(3);
    svd.set_parameters(NB_USERS, NB_WORKS);
    svd.fit(&dense()).unwrap();
    svd.unzip().unwrap();
    svd.save(folder.path(), None).unwrap();
    let mut restored_svd = zero::Svd::new().with_components(3);
    restored_svd.load(folder.path(), None).unwrap();

    let checks: [(&dyn RecommendationAlgorithm, &dyn RecommendationAlgorithm); 2] =
        [(&als, &restored_als), (&svd, &restored_svd)];
    for (model, restored) in checks {
        let expected = model.predict(&pairs).unwrap();
        let actual = restored.predict(&pairs).unwrap();
        let same_bits = expected
            .iter()
            .zip(&actual)
            .all(|(a, b)| a.to_bits() == b.to_bits());
        assert!(same_bits, "{} changed across save/load", model.shortname());
    }
}

#[test]
fn test_knn_anti_correlated_neighbor() {
    let registry = Registry::with_builtin();
    let ratings: RatingSet = [(0, 0, 1.0), (0, 1, 1.0), (1, 0, -1.0), (1, 1, -1.0), (1, 2, 3.0)]
        .into_iter()
        .map(|(u, i, r)| Rating::new(u, i, r))
        .collect();
    let params = Hyperparameters::new()
        .with("nb_neighbors", 1usize)
        .with("rated_by_neighbors_at_least", 1usize)
        .with("weighted_neighbors", true)
        .with("missing_is_mean", false);
    let mut knn = registry.instantiate_with("knn", &params).unwrap();
    knn.set_parameters(2, 3);
    knn.fit(&ratings).unwrap();

    let prediction = knn.predict(&[(0, 2)]).unwrap()[0];
    assert!((prediction - 3.0).abs() < 1e-12, "got {prediction}");
}

#[test]
fn test_load_missing_and_mismatched_snapshots() {
    let registry = Registry::with_builtin();
    let folder = TempDir::new().unwrap();

    let mut svd = registry.instantiate("svd").unwrap();
    assert!(matches!(
        svd.load(folder.path(), None),
        Err(ZeroError::SnapshotNotFound(_))
    ));

    let als = fitted(&registry, "als", &dense());
    als.save(folder.path(), Some("model.json")).unwrap();
    assert!(matches!(
        svd.load(folder.path(), Some("model.json")),
        Err(ZeroError::IncompatibleSnapshot(_))
    ));
}

#[test]
fn test_metrics_recorded_every_iteration() {
    let registry = Registry::with_builtin();
    let ratings = dense();
    let (train, test) = ratings.split(0.8).unwrap();

    let params = Hyperparameters::new().with("nb_iterations", 5usize);
    let mut als = registry.instantiate_with("als", &params).unwrap();
    als.set_parameters(NB_USERS, NB_WORKS);
    als.monitor_mut().set_metrics(vec![Metric::Rmse, Metric::Mae]);
    als.set_evaluation(Some(train.clone()), Some(test));
    als.fit(&train).unwrap();

    assert_eq!(als.metrics().history(Split::Train, Metric::Rmse).len(), 5);
    assert_eq!(als.metrics().history(Split::Test, Metric::Mae).len(), 5);

    // A second fit starts a fresh history
    als.fit(&train).unwrap();
    assert_eq!(als.metrics().history(Split::Test, Metric::Rmse).len(), 5);
}

#[test]
fn test_recommend_through_the_trait() {
    let registry = Registry::with_builtin();
    let svd = fitted(&registry, "svd", &dense());

    let top = svd
        .recommend(&RecommendRequest::new().with_users(vec![0, 1]).with_k(4))
        .unwrap();
    assert_eq!(top.len(), 4);
    assert!(top.windows(2).all(|w| w[0].score >= w[1].score));

    let items = vec![2, 7, 9];
    let top = svd
        .recommend(
            &RecommendRequest::new()
                .with_users(vec![3])
                .with_items(items.clone())
                .with_k(10),
        )
        .unwrap();
    assert_eq!(top.len(), 3);
    assert!(top.iter().all(|r| items.contains(&r.item_id)));

    assert!(svd.recommend(&RecommendRequest::new()).unwrap().is_empty());
}

#[test]
fn test_recommend_mixes_known_and_new_users() {
    let registry = Registry::with_builtin();
    let als = fitted(&registry, "als", &dense());
    let newcomer = als.fit_single_user(&[1, 4], &[5.0, 1.0]).unwrap();

    let top = als
        .recommend(
            &RecommendRequest::new()
                .with_users(vec![2])
                .with_extra_users(vec![newcomer])
                .with_k(3),
        )
        .unwrap();
    assert_eq!(top.len(), 3);

    let unsupported = RecommendRequest::new().with_users(vec![2]).with_method("max");
    assert!(matches!(
        als.recommend(&unsupported),
        Err(ZeroError::UnsupportedOperation(_))
    ));
}

#[test]
fn test_unknown_algorithm() {
    let registry = Registry::with_builtin();
    match registry.instantiate("nmf") {
        Err(ZeroError::UnknownAlgorithm(name)) => assert_eq!(name, "nmf"),
        _ => panic!("nmf should not be registered"),
    }
}
