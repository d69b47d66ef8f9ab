use pipewatch_common::ObservationWindow;

use crate::JobRunRecord;

/// Retains the records whose start lies inside `window`, both bounds included.
///
/// The result is exactly the subsequence of `records` in the window, in input order. Records are
/// borrowed, so several collectors can apply different windows to one fetched listing.
pub fn filter_runs<'a, I>(
    records: I,
    window: &'a ObservationWindow,
) -> impl Iterator<Item = &'a JobRunRecord> + 'a
where
    I: IntoIterator<Item = &'a JobRunRecord>,
    I::IntoIter: 'a,
{
    records
        .into_iter()
        .filter(move |record| window.contains(record.started_on))
}
