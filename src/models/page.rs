//! Offset-keyed page results

/// One loaded window of a result sequence.
///
/// Keys are offsets. `prev_key` is `None` only for the window starting at
/// offset 0; `next_key` is `None` once the window came back empty or reached
/// the total the server reported.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub prev_key: Option<u32>,
    pub next_key: Option<u32>,
}

impl<T> PageResult<T> {
    /// Build a page and derive its neighbour keys.
    pub fn from_window(items: Vec<T>, offset: u32, limit: u32, total: u32) -> Self {
        let (prev_key, next_key) = page_keys(offset, limit, items.len(), total);
        Self {
            items,
            prev_key,
            next_key,
        }
    }
}

/// `(prev_key, next_key)` for a window at `offset` of size `limit` that
/// returned `count` items out of `total`.
pub fn page_keys(offset: u32, limit: u32, count: usize, total: u32) -> (Option<u32>, Option<u32>) {
    let prev_key = (offset > 0).then(|| offset.saturating_sub(limit));

    let count = u32::try_from(count).unwrap_or(u32::MAX);
    let end = offset.saturating_add(count);
    let next_key = (count > 0 && end < total).then_some(end);

    (prev_key, next_key)
}
