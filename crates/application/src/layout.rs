//! Spread layout and page stepping for an open volume.

use comicshelf_core::{LayoutConfig, PageInfo, Progress, ReadingDirection};

/// Pages shown together for one layout step, as indices into the page list.
///
/// `right` holds the reading-order-first page of a pair (or a lone page that
/// could not be paired) and `left` the page after it. `center` is used for
/// pages that are always shown alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Spread {
    pub right: Option<usize>,
    pub left: Option<usize>,
    pub center: Option<usize>,
    pub step: usize,
}

impl Spread {
    fn center(index: usize) -> Self {
        Self {
            center: Some(index),
            step: 1,
            ..Self::default()
        }
    }

    fn lone(index: usize) -> Self {
        Self {
            right: Some(index),
            step: 1,
            ..Self::default()
        }
    }

    fn pair(first: usize, second: usize) -> Self {
        Self {
            right: Some(first),
            left: Some(second),
            center: None,
            step: 2,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.step == 0
    }

    pub fn is_pair(&self) -> bool {
        self.right.is_some() && self.left.is_some()
    }

    /// Page indices in reading order.
    pub fn pages(&self) -> Vec<usize> {
        [self.center, self.right, self.left]
            .into_iter()
            .flatten()
            .collect()
    }

    /// Physical placement for `direction`.
    pub fn on_screen(&self, direction: ReadingDirection) -> ScreenSpread {
        match direction {
            ReadingDirection::LeftToRight => ScreenSpread {
                left: self.right,
                right: self.left,
                center: self.center,
            },
            ReadingDirection::RightToLeft | ReadingDirection::Vertical => ScreenSpread {
                left: self.left,
                right: self.right,
                center: self.center,
            },
        }
    }
}

/// Where pages land on the display, left and right meaning physical sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreenSpread {
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub center: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PageLayoutEngine {
    config: LayoutConfig,
    pages: Vec<PageInfo>,
}

impl PageLayoutEngine {
    pub fn new(pages: Vec<PageInfo>, config: LayoutConfig) -> Self {
        Self { config, pages }
    }

    pub fn config(&self) -> LayoutConfig {
        self.config
    }

    pub fn set_config(&mut self, config: LayoutConfig) {
        self.config = config;
    }

    pub fn pages(&self) -> &[PageInfo] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn pairs_pages(&self) -> bool {
        self.config.two_page_mode && self.config.direction != ReadingDirection::Vertical
    }

    fn is_wide(&self, index: usize) -> bool {
        self.pages.get(index).is_some_and(PageInfo::is_wide)
    }

    pub fn compute_layout(&self, index: usize) -> Spread {
        if index >= self.pages.len() {
            return Spread::default();
        }
        if !self.pairs_pages() {
            return Spread::center(index);
        }
        if self.config.cover_offset && index == 0 {
            return Spread::center(index);
        }
        if self.is_wide(index) {
            return Spread::center(index);
        }
        let next = index + 1;
        if next >= self.pages.len() || self.is_wide(next) {
            return Spread::lone(index);
        }
        Spread::pair(index, next)
    }

    /// Index shown after stepping forward from `current`.
    pub fn next_index(&self, current: usize) -> usize {
        let Some(last) = self.pages.len().checked_sub(1) else {
            return 0;
        };
        let step = self.compute_layout(current).step;
        current.saturating_add(step).min(last)
    }

    /// Index shown after stepping back from `current`.
    ///
    /// In two-page mode the result is an index whose spread, stepped forward,
    /// lands on `current`. When both one and two pages back qualify, the one
    /// that starts a spread in the sequence read from page 0 wins; when
    /// neither does (`current` sits inside a spread), that sequence decides.
    pub fn previous_index(&self, current: usize) -> usize {
        if current == 0 || self.pages.is_empty() {
            return 0;
        }
        let current = current.min(self.pages.len() - 1);
        if current == 0 {
            return 0;
        }
        if !self.pairs_pages() {
            return current - 1;
        }

        // Cover offset at page 1 and a wide page just behind both land here.
        let one_back = self.compute_layout(current - 1).step == 1;
        let two_back = current >= 2 && self.compute_layout(current - 2).step == 2;
        match (one_back, two_back) {
            (true, false) => current - 1,
            (false, true) => current - 2,
            (true, true) => {
                if self.spread_start_before(current) == current - 1 {
                    current - 1
                } else {
                    current - 2
                }
            }
            (false, false) => self.spread_start_before(current),
        }
    }

    /// Last spread start below `index` when reading forward from page 0.
    fn spread_start_before(&self, index: usize) -> usize {
        let mut start = 0;
        loop {
            let step = self.compute_layout(start).step;
            if step == 0 || start + step >= index {
                return start;
            }
            start += step;
        }
    }
}

/// Navigation state of one open volume.
#[derive(Debug, Clone)]
pub struct ReaderSession {
    layout: PageLayoutEngine,
    current: usize,
}

impl ReaderSession {
    pub fn new(pages: Vec<PageInfo>, config: LayoutConfig, start: usize) -> Self {
        let layout = PageLayoutEngine::new(pages, config);
        let current = if start < layout.page_count() { start } else { 0 };
        Self { layout, current }
    }

    pub fn layout(&self) -> &PageLayoutEngine {
        &self.layout
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_spread(&self) -> Spread {
        self.layout.compute_layout(self.current)
    }

    pub fn set_config(&mut self, config: LayoutConfig) {
        self.layout.set_config(config);
    }

    /// Returns `true` when the index changed.
    pub fn navigate_next(&mut self) -> bool {
        self.move_to(self.layout.next_index(self.current))
    }

    pub fn navigate_previous(&mut self) -> bool {
        self.move_to(self.layout.previous_index(self.current))
    }

    /// Jumps to `index`, clamped to the last page.
    pub fn go_to(&mut self, index: usize) -> bool {
        let last = self.layout.page_count().saturating_sub(1);
        self.move_to(index.min(last))
    }

    pub fn progress(&self) -> Progress {
        let total = self.layout.page_count();
        let current = if total == 0 { 0 } else { self.current + 1 };
        Progress {
            current_page: u32::try_from(current).unwrap_or(u32::MAX),
            total_pages: u32::try_from(total).unwrap_or(u32::MAX),
        }
    }

    fn move_to(&mut self, index: usize) -> bool {
        if index == self.current {
            return false;
        }
        self.current = index;
        true
    }
}
