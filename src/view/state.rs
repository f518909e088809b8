/// Sequence-number bounds of the page currently on screen for a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewWindow {
    pub label: String,
    pub min_uid: u32,
    pub max_uid: u32,
}

impl ViewWindow {
    /// Bounds of the given UIDs, or `None` when there are none.
    pub fn from_uids(label: &str, uids: impl IntoIterator<Item = u32>) -> Option<Self> {
        let mut bounds: Option<(u32, u32)> = None;
        for uid in uids {
            bounds = Some(match bounds {
                Some((lo, hi)) => (lo.min(uid), hi.max(uid)),
                None => (uid, uid),
            });
        }
        bounds.map(|(min_uid, max_uid)| Self {
            label: label.to_string(),
            min_uid,
            max_uid,
        })
    }
}

/// Pagination state owned by the refresher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub label: String,
    pub page: usize,
    pub page_size: usize,
}

impl ViewState {
    pub fn new(label: &str, page_size: usize) -> Self {
        Self {
            label: label.to_string(),
            page: 0,
            page_size,
        }
    }

    pub fn skip(&self) -> usize {
        self.page * self.page_size
    }

    /// Advance unless the current page is already the last one.
    pub fn next_page(&mut self, total_threads: usize) {
        if self.skip() + self.page_size < total_threads {
            self.page += 1;
        }
    }

    pub fn prev_page(&mut self) {
        self.page = self.page.saturating_sub(1);
    }

    pub fn switch_label(&mut self, label: &str) {
        self.label = label.to_string();
        self.page = 0;
    }

    pub fn page_count(&self, total_threads: usize) -> usize {
        total_threads.div_ceil(self.page_size).max(1)
    }
}
