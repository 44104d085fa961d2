//! Digest text for scheduled notifications.

use sitepulse_core::daterange::DateRange;
use sitepulse_core::model::{StatValue, Stats};
use sitepulse_core::notify::{NotificationDataSource, NotificationSetting};

/// Body shown when the stats fetch for a site failed; the trigger is still
/// registered so one transient failure never silences a site.
pub const UNAVAILABLE_BODY: &str = "Stats are currently unavailable.";

/// The date range a digest reports on.
///
/// Weekly digests always cover the last seven days regardless of the data
/// source policy. Daily digests follow the process-wide policy; `Auto` reads
/// yesterday's full day when the digest fires before noon and today-so-far
/// otherwise. Returns `None` for disabled sites.
pub fn effective_range(
    setting: NotificationSetting,
    source: NotificationDataSource,
    notification_hour: u32,
) -> Option<DateRange> {
    match setting {
        NotificationSetting::Disabled => None,
        NotificationSetting::Weekly => Some(DateRange::Last7Days),
        NotificationSetting::Daily => Some(match source {
            NotificationDataSource::Today => DateRange::Today,
            NotificationDataSource::Yesterday => DateRange::Yesterday,
            NotificationDataSource::Auto => {
                if notification_hour < 12 {
                    DateRange::Yesterday
                } else {
                    DateRange::Today
                }
            }
        }),
    }
}

pub fn digest_title(website_name: &str, setting: NotificationSetting) -> String {
    match setting {
        NotificationSetting::Weekly => format!("{website_name}: weekly summary"),
        _ => format!("{website_name}: daily summary"),
    }
}

/// One line per headline metric. A metric with a non-zero percentage change
/// gets an arrow and the absolute percentage, truncated to an integer.
pub fn digest_body(stats: &Stats) -> String {
    [
        ("Visitors", stats.visitors),
        ("Pageviews", stats.pageviews),
        ("Visits", stats.visits),
    ]
    .iter()
    .map(|(label, value)| metric_line(label, *value))
    .collect::<Vec<_>>()
    .join("\n")
}

fn metric_line(label: &str, stat: StatValue) -> String {
    let pct = stat.change_percentage();
    if pct == 0.0 {
        return format!("{label}: {}", format_count(stat.value));
    }
    let arrow = if stat.is_positive_change() { "↑" } else { "↓" };
    // Truncated, not rounded: 19.9% reads as 19%.
    let truncated = pct.abs().trunc() as i64;
    format!("{label}: {} {arrow}{truncated}%", format_count(stat.value))
}

/// Thousands-separated count, e.g. 12345 → "12,345".
fn format_count(value: i64) -> String {
    let digits = value.abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if value < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}
