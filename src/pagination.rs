//! Page math for the paginated list screens.
//!
//! `page_range` produces the markers a page-number control renders: the
//! first and last page, a window of pages around the current one, and an
//! ellipsis for every gap of two or more pages.

use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_SIBLING_COUNT: u32 = 1;

/// First page, last page, current page and two ellipsis slots.
const FIXED_MARKERS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PageMarker {
    Page { page: u32 },
    Ellipsis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaginationState {
    pub current_page: u32,
    pub total_page: u32,
    pub sibling_count: u32,
}

impl PaginationState {
    pub fn range(&self) -> Vec<PageMarker> {
        page_range(self.current_page, self.total_page, self.sibling_count)
    }
}

fn pages(from: u32, to: u32) -> impl Iterator<Item = PageMarker> {
    (from..=to).map(|page| PageMarker::Page { page })
}

/// Compute the page markers for `current_page` out of `total_page`.
///
/// Out-of-range pages are clamped into `[1, total_page]`. Returns an empty
/// list when there are no pages.
pub fn page_range(current_page: u32, total_page: u32, sibling_count: u32) -> Vec<PageMarker> {
    if total_page == 0 {
        return Vec::new();
    }
    let current = clamp_page(current_page, total_page);
    if current != current_page {
        tracing::debug!(current_page, total_page, clamped = current, "page clamped");
    }

    if sibling_count.saturating_add(FIXED_MARKERS) >= total_page {
        return pages(1, total_page).collect();
    }

    let width = sibling_count.saturating_mul(2);
    let max_start = total_page.saturating_sub(width).max(1);
    let mut start = current.saturating_sub(sibling_count).clamp(1, max_start);
    let mut end = start.saturating_add(width).min(total_page);

    // A gap of a single page is shown as that page.
    if start <= 3 {
        start = 1;
    }
    if end >= total_page.saturating_sub(2) {
        end = total_page;
    }

    let mut out = Vec::with_capacity((end - start + 1) as usize + 4);
    if start > 1 {
        out.push(PageMarker::Page { page: 1 });
        out.push(PageMarker::Ellipsis);
    }
    out.extend(pages(start, end));
    if end < total_page {
        out.push(PageMarker::Ellipsis);
        out.push(PageMarker::Page { page: total_page });
    }
    out
}

/// Whether a page control should be drawn at all.
pub fn should_render(total_page: u32, range: &[PageMarker]) -> bool {
    total_page > 0 && range.len() >= 2
}

pub fn total_pages(total_items: u64, per_page: u32) -> u32 {
    let per_page = u64::from(per_page.max(1));
    u32::try_from(total_items.div_ceil(per_page)).unwrap_or(u32::MAX)
}

pub fn clamp_page(page: u32, total_pages: u32) -> u32 {
    page.clamp(1, total_pages.max(1))
}

/// Row offset of the first item on a 1-based page.
pub fn page_offset(page: u32, per_page: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(per_page.max(1))
}

/// Cache of computed ranges keyed by their three inputs.
pub struct RangeMemo {
    entries: HashMap<PaginationState, Vec<PageMarker>>,
    capacity: usize,
}

impl RangeMemo {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&mut self, state: PaginationState) -> Vec<PageMarker> {
        if let Some(hit) = self.entries.get(&state) {
            return hit.clone();
        }
        if self.len() >= self.capacity {
            tracing::debug!(entries = self.len(), "range memo full, clearing");
            self.entries.clear();
        }
        let range = state.range();
        self.entries.insert(state, range.clone());
        range
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for RangeMemo {
    fn default() -> Self {
        Self::new(256)
    }
}
