//! Offset/limit cursors for paged lists.

/// How a fetched page is combined with what is already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadMode {
    /// Discard prior entries; the page becomes the whole list.
    Replace,
    /// Keep prior entries and add the page to them.
    Append,
}

/// Position of the next page to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaginationCursor {
    /// Rows already consumed.
    pub offset: usize,
    /// Page size.
    pub limit: usize,
}

impl PaginationCursor {
    /// Cursor before any page has been loaded.
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    /// Cursor after loading `limit` rows at `offset` in `mode`.
    ///
    /// `Replace` always resets to one page in; `Append` advances past the
    /// page that was requested.
    #[must_use]
    pub const fn after_load(offset: usize, limit: usize, mode: LoadMode) -> Self {
        match mode {
            LoadMode::Replace => Self {
                offset: limit,
                limit,
            },
            LoadMode::Append => Self {
                offset: offset.saturating_add(limit),
                limit,
            },
        }
    }
}
