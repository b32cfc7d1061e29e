use serde::Serialize;

use crate::shard::ShardIndex;

/// One page of a merged, unsorted result list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// 1-based page number
    pub page_index: usize,
    /// Requested page size
    pub page_size: usize,
    /// Matches across every shard that answered
    pub total_count: usize,
    /// `ceil(total_count / page_size)`
    pub total_pages: usize,
    /// Shards missing from the result under best-effort
    pub unavailable_shards: Vec<ShardIndex>,
}

impl<T> Page<T> {
    /// Cuts page `page` out of `all`.
    ///
    /// Page and size below 1 are treated as 1. A page past the end is empty
    /// but still reports the total.
    pub fn paginate(all: Vec<T>, page: usize, page_size: usize) -> Self {
        let page_index = page.max(1);
        let page_size = page_size.max(1);
        let total_count = all.len();
        let total_pages = total_count / page_size + usize::from(total_count % page_size != 0);

        let skip = (page_index - 1).saturating_mul(page_size);
        let items = all.into_iter().skip(skip).take(page_size).collect();

        Self {
            items,
            page_index,
            page_size,
            total_count,
            total_pages,
            unavailable_shards: Vec::new(),
        }
    }

    /// Records shards that did not contribute
    pub fn with_unavailable(mut self, shards: Vec<ShardIndex>) -> Self {
        self.unavailable_shards = shards;
        self
    }

    /// Whether a page precedes this one
    pub fn has_previous_page(&self) -> bool {
        self.page_index > 1
    }

    /// Whether a page follows this one
    pub fn has_next_page(&self) -> bool {
        self.page_index < self.total_pages
    }

    /// Whether every shard contributed
    pub fn is_complete(&self) -> bool {
        self.unavailable_shards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_seven_items_in_pages_of_five() {
        let all: Vec<u32> = (1..=7).collect();

        let first = Page::paginate(all.clone(), 1, 5);
        assert_eq!(first.items, vec![1, 2, 3, 4, 5]);
        assert_eq!(first.total_count, 7);
        assert_eq!(first.total_pages, 2);
        assert!(!first.has_previous_page());
        assert!(first.has_next_page());

        let second = Page::paginate(all, 2, 5);
        assert_eq!(second.items, vec![6, 7]);
        assert!(second.has_previous_page());
        assert!(!second.has_next_page());
    }

    #[test]
    fn test_out_of_range_requests() {
        let page = Page::paginate(vec![1, 2, 3], 0, 0);
        assert_eq!(page.page_index, 1);
        assert_eq!(page.page_size, 1);
        assert_eq!(page.items, vec![1]);
        assert_eq!(page.total_pages, 3);

        let page = Page::paginate(vec![1, 2, 3], 9, 2);
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 3);

        let page = Page::paginate(Vec::<u8>::new(), 1, 10);
        assert_eq!(page.total_pages, 0);
        assert!(!page.has_next_page());

        let page = Page::paginate(vec![1], usize::MAX, usize::MAX);
        assert!(page.items.is_empty());
    }

    proptest! {
        #[test]
        fn pages_cover_every_item_once(len in 0usize..200, size in 1usize..20) {
            let all: Vec<usize> = (0..len).collect();
            let pages = Page::paginate(all.clone(), 1, size).total_pages;
            let mut seen = Vec::new();
            for page in 1..=pages + 1 {
                let p = Page::paginate(all.clone(), page, size);
                prop_assert!(p.items.len() <= size);
                seen.extend(p.items);
            }
            prop_assert_eq!(seen, all);
        }
    }
}
