use std::collections::BTreeMap;
use std::fmt::Display;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::warn;

use crate::error::{EngineError, Result};

/// Row indices of a train/held-out partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffled split of `n` rows; the held-out side gets `ceil(n * fraction)`.
pub fn shuffle_split(n: usize, test_fraction: f64, seed: u64) -> Result<Split> {
    let n_test = (n as f64 * test_fraction).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(EngineError::InsufficientData(format!(
            "{n} rows cannot be split with test fraction {test_fraction}"
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let mut test = order[..n_test].to_vec();
    let mut train = order[n_test..].to_vec();
    test.sort_unstable();
    train.sort_unstable();
    Ok(Split { train, test })
}

/// Split that keeps each label's share equal on both sides.
///
/// Every label needs at least two rows so that it lands in both partitions.
pub fn stratified_split<L>(labels: &[L], test_fraction: f64, seed: u64) -> Result<Split>
where
    L: Ord + Copy + Display,
{
    let by_label = group(labels);
    if by_label.is_empty() {
        return Err(EngineError::InsufficientData("no labelled rows".to_string()));
    }
    if let Some((label, rows)) = by_label.iter().find(|(_, rows)| rows.len() < 2) {
        return Err(EngineError::InsufficientData(format!(
            "label `{label}` has {} example(s); at least 2 are needed to stratify",
            rows.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();

    for rows in by_label.into_values() {
        let mut rows = rows;
        rows.shuffle(&mut rng);
        let n_test = ((rows.len() as f64 * test_fraction).round() as usize).clamp(1, rows.len() - 1);
        test.extend_from_slice(&rows[..n_test]);
        train.extend_from_slice(&rows[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    Ok(Split { train, test })
}

/// Deals each label's rows round-robin over `k` folds, in input order.
///
/// Returned indices are positions within `labels`.
pub fn stratified_folds<L>(labels: &[L], k: usize) -> Result<Vec<Split>>
where
    L: Ord + Copy + Display,
{
    if k < 2 || labels.len() < k {
        return Err(EngineError::InsufficientData(format!(
            "{} rows cannot be divided into {k} folds",
            labels.len()
        )));
    }

    let mut fold_of = vec![0usize; labels.len()];
    let mut next_fold = 0usize;
    for (label, rows) in group(labels) {
        if rows.len() < k {
            warn!(%label, count = rows.len(), folds = k, "label is rarer than the number of folds");
        }
        for row in rows {
            fold_of[row] = next_fold % k;
            next_fold += 1;
        }
    }

    Ok((0..k)
        .map(|fold| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..labels.len()).partition(|&row| fold_of[row] == fold);
            Split { train, test }
        })
        .collect())
}

fn group<L: Ord + Copy>(labels: &[L]) -> BTreeMap<L, Vec<usize>> {
    let mut by_label: BTreeMap<L, Vec<usize>> = BTreeMap::new();
    for (row, label) in labels.iter().enumerate() {
        by_label.entry(*label).or_default().push(row);
    }
    by_label
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskLevel;

    fn labels(low: usize, medium: usize, high: usize) -> Vec<RiskLevel> {
        let mut out = vec![RiskLevel::Low; low];
        out.extend(vec![RiskLevel::Medium; medium]);
        out.extend(vec![RiskLevel::High; high]);
        out
    }

    #[test]
    fn stratified_split_preserves_proportions() {
        let labels = labels(50, 30, 20);
        let split = stratified_split(&labels, 0.2, 42).unwrap();
        assert_eq!(split.test.len(), 20);
        assert_eq!(split.train.len(), 80);

        let count = |rows: &[usize], level| rows.iter().filter(|&&r| labels[r] == level).count();
        assert_eq!(count(&split.test, RiskLevel::Low), 10);
        assert_eq!(count(&split.test, RiskLevel::Medium), 6);
        assert_eq!(count(&split.test, RiskLevel::High), 4);
    }

    #[test]
    fn stratified_split_is_deterministic_and_disjoint() {
        let labels = labels(10, 10, 10);
        let a = stratified_split(&labels, 0.2, 7).unwrap();
        let b = stratified_split(&labels, 0.2, 7).unwrap();
        assert_eq!(a, b);
        assert!(a.test.iter().all(|row| !a.train.contains(row)));
        assert_eq!(a.train.len() + a.test.len(), 30);
    }

    #[test]
    fn singleton_label_cannot_be_stratified() {
        let err = stratified_split(&labels(10, 10, 1), 0.2, 42).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData(_)));
        assert!(err.to_string().contains("high"));
    }

    #[test]
    fn rare_label_still_reaches_both_sides() {
        let labels = labels(20, 2, 0);
        let split = stratified_split(&labels, 0.2, 1).unwrap();
        assert_eq!(split.test.iter().filter(|&&r| labels[r] == RiskLevel::Medium).count(), 1);
        assert_eq!(split.train.iter().filter(|&&r| labels[r] == RiskLevel::Medium).count(), 1);
    }

    #[test]
    fn shuffle_split_rounds_test_side_up() {
        let split = shuffle_split(11, 0.2, 42).unwrap();
        assert_eq!(split.test.len(), 3);
        assert_eq!(split.train.len(), 8);
        assert!(shuffle_split(1, 0.2, 42).is_err());
    }

    #[test]
    fn folds_cover_every_row_once() {
        let labels = labels(12, 8, 5);
        let folds = stratified_folds(&labels, 5).unwrap();
        assert_eq!(folds.len(), 5);
        let mut seen: Vec<usize> = folds.iter().flat_map(|f| f.test.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..labels.len()).collect::<Vec<_>>());
        for fold in &folds {
            assert_eq!(fold.test.len(), 5);
            assert_eq!(fold.train.len() + fold.test.len(), labels.len());
        }
    }

    #[test]
    fn too_few_rows_for_folds() {
        assert!(stratified_folds(&labels(2, 1, 0), 5).is_err());
    }
}
