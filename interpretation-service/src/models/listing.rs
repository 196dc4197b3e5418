//! Filters and pagination for task listings.

use super::TaskStatus;
use chrono::{DateTime, Days, Local, NaiveDate, TimeZone, Utc};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Listing filters. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Substring match.
    pub task_name: Option<String>,
    pub company: Option<String>,
    pub scene: Option<String>,
    pub status: Option<TaskStatus>,
    /// Tasks created on or before this calendar day, in server local time.
    pub created_on_or_before: Option<NaiveDate>,
}

impl TaskFilter {
    pub fn matches(&self, task: &super::Task) -> bool {
        self.task_name
            .as_deref()
            .map_or(true, |needle| task.task_name.contains(needle))
            && self.company.as_deref().map_or(true, |c| task.company == c)
            && self.scene.as_deref().map_or(true, |s| task.scene == s)
            && self.status.map_or(true, |s| task.status == s)
            && self
                .created_before_instant()
                .map_or(true, |bound| task.created_at < bound)
    }

    /// Exclusive upper bound for `created_at`: local midnight after
    /// `created_on_or_before`.
    pub fn created_before_instant(&self) -> Option<DateTime<Utc>> {
        let day = self.created_on_or_before?;
        let next = day.checked_add_days(Days::new(1))?.and_hms_opt(0, 0, 0)?;
        let bound = Local
            .from_local_datetime(&next)
            .earliest()
            .map(|at| at.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&next));
        Some(bound)
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /// Clamp raw query values: page >= 1, page size within 1..=100.
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(u64::from(self.page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_filter_includes_the_whole_local_day() {
        let filter = TaskFilter {
            created_on_or_before: NaiveDate::from_ymd_opt(2025, 3, 1),
            ..Default::default()
        };
        let bound = filter.created_before_instant().unwrap();
        let last_minute = Local.with_ymd_and_hms(2025, 3, 1, 23, 59, 0).unwrap();
        let next_morning = Local.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap();

        assert!(last_minute.with_timezone(&Utc) < bound);
        assert_eq!(next_morning.with_timezone(&Utc), bound);
        assert_eq!(TaskFilter::default().created_before_instant(), None);
    }

    #[test]
    fn page_request_clamps_inputs() {
        let page = PageRequest::new(Some(0), Some(1000));
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, MAX_PAGE_SIZE);
        assert_eq!(PageRequest::new(None, None), PageRequest::default());
    }

    #[test]
    fn offset_and_total_pages() {
        let page = PageRequest::new(Some(3), Some(10));
        assert_eq!(page.offset(), 20);
        assert_eq!(page.total_pages(0), 0);
        assert_eq!(page.total_pages(21), 3);
        assert_eq!(page.total_pages(20), 2);
    }
}
