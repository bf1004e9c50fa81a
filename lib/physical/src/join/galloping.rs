use crate::join::ColumnSubsetView;
use sparql_exec_common::ExecutionResult;

/// Joins a small input with a much larger one. Both inputs must be sorted on their join columns
/// and must not contain UNDEF in them.
///
/// Instead of advancing through the larger input row by row, the algorithm searches the next
/// candidate for each row of the smaller input with an exponential search followed by a binary
/// search. `on_match` receives the row of the smaller input first.
pub fn galloping_join(
    smaller: &ColumnSubsetView<'_>,
    larger: &ColumnSubsetView<'_>,
    mut on_match: impl FnMut(usize, usize) -> ExecutionResult<()>,
    mut check_cancellation: impl FnMut() -> ExecutionResult<()>,
) -> ExecutionResult<()> {
    let (small_len, large_len) = (smaller.len(), larger.len());
    let (mut small, mut large) = (0, 0);

    while small < small_len && large < large_len {
        check_cancellation()?;

        while smaller.row(small) < larger.row(large) {
            small += 1;
            if small >= small_len {
                return Ok(());
            }
        }

        let needle = smaller.row(small);
        let mut step = 1;
        let mut last = large;
        while larger.row(large) < needle {
            last = large;
            large += step;
            step *= 2;
            if large >= large_len {
                large = large_len - 1;
                if larger.row(large) < needle {
                    return Ok(());
                }
            }
        }

        if larger.row(large) == needle {
            // We jumped into a block of equal rows. Move to its start.
            while large > last && larger.row(large - 1) == needle {
                large -= 1;
            }
        } else {
            // We jumped over the position where the needle would be.
            large = larger.lower_bound(needle, last, large);
        }

        let end_same_small = (small..small_len)
            .find(|&row| smaller.row(row) != larger.row(large))
            .unwrap_or(small_len);
        let end_same_large = (large..large_len)
            .find(|&row| larger.row(row) != needle)
            .unwrap_or(large_len);
        for row_small in small..end_same_small {
            for row_large in large..end_same_large {
                on_match(row_small, row_large)?;
            }
        }
        small = end_same_small;
        large = end_same_large;
    }
    Ok(())
}
