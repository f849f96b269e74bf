//! Diff cost on large reorderings grows close to linearly with list size.

use list_reconciler::{diff, Section, Snapshot};
use std::time::{Duration, Instant};

type Snap = Snapshot<u32, u32, ()>;

fn single_section(ids: impl IntoIterator<Item = u32>) -> Snap {
    Snapshot::new(vec![Section::with_ids(0, ids)]).unwrap()
}

fn two_sections(first: impl IntoIterator<Item = u32>, second: impl IntoIterator<Item = u32>) -> Snap {
    Snapshot::new(vec![Section::with_ids(0, first), Section::with_ids(1, second)]).unwrap()
}

/// Fastest of a few runs, to keep scheduler noise out of the comparison.
fn fastest(old: &Snap, new: &Snap) -> Duration {
    (0..3)
        .map(|_| {
            let started = Instant::now();
            let changeset = diff(old, new).unwrap();
            let elapsed = started.elapsed();
            assert!(!changeset.is_empty());
            elapsed
        })
        .min()
        .unwrap_or_default()
}

/// An 8x larger input may cost about 8x (n log n gives roughly 10x); a
/// quadratic pass would cost 64x.
fn assert_subquadratic(small: Duration, large: Duration) {
    let ratio = large.as_secs_f64() / small.as_secs_f64().max(1e-6);
    assert!(ratio < 32.0, "8x input took {ratio:.1}x as long ({small:?} -> {large:?})");
}

#[test]
fn reversing_a_section_scales_subquadratically() {
    let cost = |n: u32| fastest(&single_section(0..n), &single_section((0..n).rev()));
    assert_subquadratic(cost(4_000), cost(32_000));
}

#[test]
fn swapping_halves_across_sections_scales_subquadratically() {
    let cost = |n: u32| {
        let old = two_sections(0..n, n..2 * n);
        let new = two_sections((n..2 * n).rev(), (0..n).rev());
        fastest(&old, &new)
    };
    assert_subquadratic(cost(2_000), cost(16_000));
}

#[test]
fn inserting_in_front_of_a_long_tail_scales_subquadratically() {
    let cost = |n: u32| {
        let old = single_section(n..2 * n);
        let new = single_section(0..2 * n);
        fastest(&old, &new)
    };
    assert_subquadratic(cost(4_000), cost(32_000));
}
