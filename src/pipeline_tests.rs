//! End-to-end tests: sample files → training → parameter file → split → classification.

use crate::classify::{Classifier, UNCLASSIFIED};
use crate::cluster::{ClusterConfig, ClusterEngine, Order};
use crate::io::{read_manifest, read_signature_set, write_samples};
use crate::metrics::{accuracy, confusion_matrix};
use crate::point::{Point, SampleCollection};
use crate::signature::CovarianceStructure;
use crate::split::{SplitClasses, SplitConfig, SplitMode};
use rand::prelude::*;
use rand_distr::Normal;
use std::fs;

const CENTRES: [[f64; 2]; 2] = [[0.0, 0.0], [10.0, 10.0]];

fn blob(centre: [f64; 2], n: usize, rng: &mut StdRng) -> Vec<Point> {
    let noise = Normal::new(0.0, 1.0).unwrap();
    (0..n)
        .map(|_| {
            Point::from([
                centre[0] + noise.sample(rng),
                centre[1] + noise.sample(rng),
            ])
        })
        .collect()
}

fn dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn nearest_centre(x: &[f64]) -> usize {
    if dist(x, &CENTRES[0]) <= dist(x, &CENTRES[1]) {
        0
    } else {
        1
    }
}

#[test]
fn two_component_fit_recovers_centres_and_classifies() {
    let mut rng = StdRng::seed_from_u64(2024);
    let a = blob(CENTRES[0], 150, &mut rng);
    let b = blob(CENTRES[1], 150, &mut rng);
    let truth: Vec<usize> = [vec![0; a.len()], vec![1; b.len()]].concat();
    let points: Vec<Point> = a.into_iter().chain(b).collect();

    let mut samples = SampleCollection::new(2);
    samples.push_class("mixed", points.clone()).unwrap();
    let set = ClusterEngine::new(ClusterConfig::default().with_n_components(2).with_seed(5))
        .fit(&samples)
        .unwrap()
        .into_result()
        .unwrap();

    let sig = set.class(0).unwrap();
    assert_eq!(sig.n_components(), 2);
    assert!((sig.total_weight() - 1.0).abs() < 1e-9);
    for centre in CENTRES {
        let closest = sig
            .components
            .iter()
            .map(|c| dist(c.mean.as_slice().unwrap(), &centre))
            .fold(f64::INFINITY, f64::min);
        assert!(closest < 0.5, "no component near {centre:?}");
    }

    // one class per component, then label each class by its nearest centre
    let per_component = SplitClasses::new(SplitConfig::default().with_mode(SplitMode::Subclasses))
        .split(&set)
        .unwrap();
    let class_to_centre: Vec<usize> = per_component
        .signatures
        .classes()
        .iter()
        .map(|s| nearest_centre(s.components[0].mean.as_slice().unwrap()))
        .collect();
    assert_ne!(class_to_centre[0], class_to_centre[1]);

    let result = Classifier::new(&per_component.signatures)
        .unwrap()
        .classify(&points)
        .unwrap();
    let pred: Vec<usize> = result
        .assignments
        .iter()
        .map(|&a| if a == UNCLASSIFIED { a } else { class_to_centre[a] })
        .collect();
    assert!(accuracy(&pred, &truth) >= 0.95);
}

#[test]
fn labelled_classes_train_and_classify() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut samples = SampleCollection::new(2);
    samples.push_class("low", blob(CENTRES[0], 120, &mut rng)).unwrap();
    samples.push_class("high", blob(CENTRES[1], 120, &mut rng)).unwrap();

    let report = ClusterEngine::new(
        ClusterConfig::default()
            .with_n_components(4)
            .with_order(Order::Mdl)
            .with_seed(1),
    )
    .fit(&samples)
    .unwrap();
    assert!(report.is_complete());
    let set = report.into_result().unwrap();
    set.validate().unwrap();

    let truth: Vec<usize> = samples.iter_labelled().map(|(c, _)| c).collect();
    let result = Classifier::new(&set)
        .unwrap()
        .classify_collection(&samples)
        .unwrap();
    assert!(accuracy(&result.assignments, &truth) >= 0.99);
    let m = confusion_matrix(&result.assignments, &truth, 2);
    assert_eq!(m[0][2] + m[1][2], 0);
}

#[test]
fn manifest_to_parameter_file_to_classifier() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(77);
    let low = blob(CENTRES[0], 80, &mut rng);
    let high = blob(CENTRES[1], 80, &mut rng);
    write_samples(dir.path().join("low.txt"), &low).unwrap();
    write_samples(dir.path().join("high.txt"), &high).unwrap();

    // a malformed row is skipped, the rest of the file still loads
    let mut text = fs::read_to_string(dir.path().join("high.txt")).unwrap();
    text.push_str("1.0 abc\n4.0 5.0 6.0\n");
    fs::write(dir.path().join("high.txt"), text).unwrap();

    fs::write(
        dir.path().join("train.manifest"),
        "2\n2\nlow.txt low ground\nhigh.txt\n",
    )
    .unwrap();
    let samples = read_manifest(dir.path().join("train.manifest")).unwrap();
    assert_eq!(samples.class(0).unwrap().len(), 80);
    assert_eq!(samples.class(1).unwrap().len(), 80);
    assert_eq!(samples.class(0).unwrap().title, "low ground");
    assert_eq!(samples.class(1).unwrap().title, "high.txt");

    let params = dir.path().join("model.sig");
    let report = ClusterEngine::new(
        ClusterConfig::default()
            .with_n_components(2)
            .with_structure(CovarianceStructure::Diagonal)
            .with_seed(9),
    )
    .fit_to_file(&samples, "terrain", &params)
    .unwrap();

    let reloaded = read_signature_set(&params).unwrap();
    assert_eq!(reloaded, report.signatures);
    assert_eq!(reloaded.title, "terrain");

    let in_memory = Classifier::new(&report.signatures).unwrap();
    let from_file = Classifier::from_file(&params).unwrap();
    let queries: Vec<Point> = low.iter().chain(high.iter()).cloned().collect();
    let a = in_memory.classify(&queries).unwrap();
    let b = from_file.classify(&queries).unwrap();
    assert_eq!(a.assignments, b.assignments);
    assert_eq!(a.class_counts().iter().sum::<usize>(), queries.len());
}

#[test]
fn bimodal_class_is_split_into_its_modes() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut samples = SampleCollection::new(2);
    samples.push_class("compact", blob([20.0, -5.0], 100, &mut rng)).unwrap();
    let merged: Vec<Point> = blob(CENTRES[0], 100, &mut rng)
        .into_iter()
        .chain(blob(CENTRES[1], 100, &mut rng))
        .collect();
    samples.push_class("merged", merged).unwrap();

    let set = ClusterEngine::new(ClusterConfig::default().with_n_components(4).with_seed(8))
        .fit(&samples)
        .unwrap()
        .into_result()
        .unwrap();
    let original = set.class(1).unwrap().clone();

    let out = SplitClasses::default().split(&set).unwrap();
    assert!(out.split_classes().contains(&1));
    let halves: Vec<_> = out
        .origin
        .iter()
        .enumerate()
        .filter(|(_, &o)| o == 1)
        .map(|(i, _)| out.signatures.class(i).unwrap())
        .collect();
    assert_eq!(halves.len(), 2);
    assert_eq!(
        halves[0].n_components() + halves[1].n_components(),
        original.n_components()
    );
    let mut modes: Vec<usize> = halves
        .iter()
        .map(|s| {
            let (mean, _) = s.moments(2);
            let centre = nearest_centre(mean.as_slice().unwrap());
            assert!(dist(mean.as_slice().unwrap(), &CENTRES[centre]) < 1.0);
            centre
        })
        .collect();
    modes.sort_unstable();
    assert_eq!(modes, vec![0, 1]);
}

#[test]
fn failing_class_does_not_block_others() {
    let mut rng = StdRng::seed_from_u64(4);
    let mut samples = SampleCollection::new(2);
    samples.push_class("ok", blob(CENTRES[0], 60, &mut rng)).unwrap();
    samples
        .push_class("tiny", vec![Point::from([1.0, 1.0]), Point::from([2.0, 2.0])])
        .unwrap();
    samples.push_class("also ok", blob(CENTRES[1], 60, &mut rng)).unwrap();

    let report = ClusterEngine::new(ClusterConfig::default().with_n_components(2).with_seed(2))
        .fit(&samples)
        .unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.signatures.len(), 2);
    let failed: Vec<usize> = report.failures().map(|(c, _)| c).collect();
    assert_eq!(failed, vec![1]);

    let far = Classifier::new(&report.signatures)
        .unwrap()
        .with_rejection_threshold(Some(-50.0))
        .classify(&[Point::from([100.0, -100.0]), Point::from([0.0, 0.5])])
        .unwrap();
    assert_eq!(far.assignments, vec![UNCLASSIFIED, 0]);
}
