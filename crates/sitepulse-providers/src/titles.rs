//! Best-effort pairing of page paths with page titles.
//!
//! Umami reports paths and titles as two independent breakdowns with no join
//! key, so the only available signal is the view count. Each path is paired
//! with the unclaimed title whose count is nearest, trying exact matches
//! first and then widening the tolerance to 5% and 15%.
//!
//! This is a heuristic with no correctness guarantee: two pages with similar
//! traffic can swap titles. Treat the result as a display nicety, never as
//! authoritative data.

use sitepulse_core::model::MetricItem;

const TOLERANCE_BANDS: &[f64] = &[0.0, 0.05, 0.15];

/// Pair each path with a title, or `None` when no title lands inside any
/// tolerance band. Each title is claimed at most once.
pub fn pair_titles(
    paths: &[MetricItem],
    titles: &[MetricItem],
) -> Vec<(MetricItem, Option<String>)> {
    let mut claimed = vec![false; titles.len()];
    paths
        .iter()
        .map(|path| {
            let matched = best_match(path.value, titles, &mut claimed);
            (path.clone(), matched)
        })
        .collect()
}

fn best_match(views: i64, titles: &[MetricItem], claimed: &mut [bool]) -> Option<String> {
    for tolerance in TOLERANCE_BANDS {
        let max_distance = (views as f64 * tolerance).abs();
        let candidate = titles
            .iter()
            .enumerate()
            .filter(|(idx, title)| {
                !claimed[*idx] && (title.value - views).abs() as f64 <= max_distance
            })
            .min_by_key(|(_, title)| (title.value - views).abs());
        if let Some((idx, title)) = candidate {
            claimed[idx] = true;
            return Some(title.name.clone());
        }
    }
    None
}
