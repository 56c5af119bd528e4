//! Maintenance-window suppression

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::models::MaintenanceWindow;

impl MaintenanceWindow {
    /// Whether this window covers `target` (an empty target covers all)
    pub fn matches_target(&self, target: &str) -> bool {
        self.target_name.is_empty() || self.target_name == target
    }

    /// Whether the window is in effect at `at`
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        if !self.recurring {
            return self.start_time <= at && at < self.end_time;
        }

        if !self.days_of_week.contains(&at.weekday()) {
            return false;
        }

        let now = minute_of_day(at);
        let start = minute_of_day(self.start_time);
        let end = minute_of_day(self.end_time);

        if start <= end {
            start <= now && now <= end
        } else {
            // Overnight window (e.g., 23:00 - 03:00)
            now >= start || now <= end
        }
    }
}

fn minute_of_day(t: DateTime<Utc>) -> u32 {
    t.hour() * 60 + t.minute()
}

/// Suppression check over one snapshot of maintenance windows
#[derive(Debug, Clone, Default)]
pub struct MaintenanceFilter {
    windows: Vec<MaintenanceWindow>,
}

impl MaintenanceFilter {
    /// Build a filter over the given windows
    pub fn new(windows: Vec<MaintenanceWindow>) -> Self {
        Self { windows }
    }

    /// Whether new alerts for `target` are withheld at `at`
    pub fn is_suppressed(&self, target: &str, at: DateTime<Utc>) -> bool {
        self.active_windows(target, at).next().is_some()
    }

    /// Windows currently in effect for `target`
    pub fn active_windows<'a>(
        &'a self,
        target: &'a str,
        at: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a MaintenanceWindow> + 'a {
        self.windows
            .iter()
            .filter(move |w| w.matches_target(target) && w.is_active_at(at))
    }

    /// Number of windows in the snapshot
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether the snapshot holds no windows
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Weekday};

    fn one_time(target: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> MaintenanceWindow {
        MaintenanceWindow {
            id: 1,
            name: "deploy".to_string(),
            description: None,
            target_name: target.to_string(),
            start_time: start,
            end_time: end,
            recurring: false,
            days_of_week: vec![],
        }
    }

    fn recurring(start: (u32, u32), end: (u32, u32), days: Vec<Weekday>) -> MaintenanceWindow {
        MaintenanceWindow {
            id: 2,
            name: "nightly".to_string(),
            description: Some("backup".to_string()),
            target_name: String::new(),
            // Dates are deliberately far from the evaluation instant
            start_time: Utc.with_ymd_and_hms(2020, 3, 3, start.0, start.1, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2019, 7, 9, end.0, end.1, 0).unwrap(),
            recurring: true,
            days_of_week: days,
        }
    }

    #[test]
    fn one_time_window_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let end = start + Duration::hours(1);
        let window = one_time("", start, end);

        assert!(window.is_active_at(start));
        assert!(window.is_active_at(start + Duration::minutes(30)));
        assert!(!window.is_active_at(end));
        assert!(!window.is_active_at(start - Duration::seconds(1)));
    }

    #[test]
    fn global_window_matches_every_target() {
        let now = Utc::now();
        let filter = MaintenanceFilter::new(vec![one_time(
            "",
            now - Duration::minutes(5),
            now + Duration::minutes(5),
        )]);

        assert!(filter.is_suppressed("user-service", now));
        assert!(filter.is_suppressed("billing", now));
    }

    #[test]
    fn targeted_window_only_matches_its_target() {
        let now = Utc::now();
        let filter = MaintenanceFilter::new(vec![one_time(
            "billing",
            now - Duration::minutes(5),
            now + Duration::minutes(5),
        )]);

        assert!(filter.is_suppressed("billing", now));
        assert!(!filter.is_suppressed("user-service", now));
    }

    #[test]
    fn recurring_window_uses_weekday_and_clock_time() {
        // 2024-01-01 is a Monday
        let window = recurring((2, 0), (4, 30), vec![Weekday::Mon, Weekday::Wed]);

        let monday_3am = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();
        let monday_end = Utc.with_ymd_and_hms(2024, 1, 1, 4, 30, 59).unwrap();
        let monday_5am = Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap();
        let tuesday_3am = Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap();

        assert!(window.is_active_at(monday_3am));
        assert!(window.is_active_at(monday_end));
        assert!(!window.is_active_at(monday_5am));
        assert!(!window.is_active_at(tuesday_3am));
    }

    #[test]
    fn recurring_window_can_wrap_midnight() {
        let window = recurring((23, 0), (1, 0), vec![Weekday::Fri]);

        // 2024-01-05 is a Friday
        let late = Utc.with_ymd_and_hms(2024, 1, 5, 23, 30, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2024, 1, 5, 0, 30, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap();

        assert!(window.is_active_at(late));
        assert!(window.is_active_at(early));
        assert!(!window.is_active_at(noon));
    }

    #[test]
    fn empty_filter_never_suppresses() {
        let filter = MaintenanceFilter::default();

        assert!(filter.is_empty());
        assert!(!filter.is_suppressed("user-service", Utc::now()));
    }
}
