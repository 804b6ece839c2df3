use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::runs::usage::UsageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsagePeriod {
    Day,
    Month,
    All,
}

impl UsagePeriod {
    /// Unknown labels report on the current month.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("day") => Self::Day,
            Some("all") => Self::All,
            _ => Self::Month,
        }
    }

    pub fn start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let date = match self {
            Self::Day => now.date_naive(),
            Self::Month => NaiveDate::from_ymd_opt(now.year(), now.month(), 1)?,
            Self::All => return None,
        };
        date.and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: String,
    pub calls: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerUsage {
    pub owner_id: String,
    pub calls: u64,
    pub successful_calls: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub period: UsagePeriod,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub fallback_calls: u64,
    pub total_cost_usd: f64,
    pub total_prompt_tokens: u64,
    pub total_candidates_tokens: u64,
    pub total_output_images: u64,
    /// Newest day first.
    pub daily: Vec<DailyUsage>,
    /// Most expensive owner first.
    pub per_owner: Vec<OwnerUsage>,
}

/// What the current month costs: a flat base fee plus converted usage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonthlyBill {
    pub base_eur: f64,
    pub total_usd: f64,
    pub total_eur: f64,
}

#[derive(Default)]
struct OwnerTotals {
    calls: u64,
    successful_calls: u64,
    cost_usd: f64,
}

pub fn summarize(records: &[UsageRecord], period: UsagePeriod, now: DateTime<Utc>) -> UsageSummary {
    let start = period.start(now);
    let mut summary = UsageSummary {
        period,
        total_calls: 0,
        successful_calls: 0,
        fallback_calls: 0,
        total_cost_usd: 0.0,
        total_prompt_tokens: 0,
        total_candidates_tokens: 0,
        total_output_images: 0,
        daily: Vec::new(),
        per_owner: Vec::new(),
    };
    let mut daily: BTreeMap<String, (u64, f64)> = BTreeMap::new();
    let mut owners: BTreeMap<String, OwnerTotals> = BTreeMap::new();

    for record in records
        .iter()
        .filter(|record| start.map(|start| record.ts >= start).unwrap_or(true))
    {
        let cost = record.estimated_cost_usd.unwrap_or(0.0);
        summary.total_calls += 1;
        if record.success {
            summary.successful_calls += 1;
        }
        if record.is_fallback {
            summary.fallback_calls += 1;
        }
        summary.total_cost_usd += cost;
        summary.total_prompt_tokens += record.prompt_token_count.unwrap_or(0);
        summary.total_candidates_tokens += record.candidates_token_count.unwrap_or(0);
        summary.total_output_images += u64::from(record.output_image_count);

        let day = daily
            .entry(record.ts.format("%Y-%m-%d").to_string())
            .or_insert((0, 0.0));
        day.0 += 1;
        day.1 += cost;

        let owner = owners.entry(record.owner_id.clone()).or_default();
        owner.calls += 1;
        owner.cost_usd += cost;
        if record.success {
            owner.successful_calls += 1;
        }
    }

    summary.total_cost_usd = round_micros(summary.total_cost_usd);
    summary.daily = daily
        .into_iter()
        .rev()
        .map(|(date, (calls, cost))| DailyUsage {
            date,
            calls,
            cost_usd: round_micros(cost),
        })
        .collect();
    summary.per_owner = owners
        .into_iter()
        .map(|(owner_id, totals)| OwnerUsage {
            owner_id,
            calls: totals.calls,
            successful_calls: totals.successful_calls,
            cost_usd: round_micros(totals.cost_usd),
        })
        .collect();
    summary
        .per_owner
        .sort_by(|a, b| b.cost_usd.total_cmp(&a.cost_usd));
    summary
}

pub fn monthly_bill(
    records: &[UsageRecord],
    now: DateTime<Utc>,
    base_eur: f64,
    usd_to_eur: f64,
) -> MonthlyBill {
    let total_usd = summarize(records, UsagePeriod::Month, now).total_cost_usd;
    MonthlyBill {
        base_eur,
        total_usd,
        total_eur: ((base_eur + total_usd * usd_to_eur) * 100.0).round() / 100.0,
    }
}

pub fn write_summary(path: &Path, summary: &UsageSummary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(summary)?)?;
    Ok(())
}

fn round_micros(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    use super::{monthly_bill, summarize, write_summary, UsagePeriod};
    use crate::config::ResolutionTier;
    use crate::request::Mode;
    use crate::runs::usage::UsageRecord;

    fn record(owner: &str, ts: (i32, u32, u32), cost: Option<f64>, success: bool) -> UsageRecord {
        UsageRecord {
            ts: Utc.with_ymd_and_hms(ts.0, ts.1, ts.2, 12, 0, 0).unwrap(),
            owner_id: owner.to_string(),
            project_id: None,
            mode: Mode::Initial,
            tier: ResolutionTier::High,
            variant_index: 1,
            input_image_count: 1,
            output_image_count: u32::from(success),
            prompt_token_count: Some(100),
            candidates_token_count: Some(2000),
            total_token_count: Some(2100),
            estimated_cost_usd: cost,
            is_fallback: false,
            success,
            empty_result: false,
            failure_kind: None,
        }
    }

    #[test]
    fn period_parse_defaults_to_month() {
        assert_eq!(UsagePeriod::parse(Some("DAY")), UsagePeriod::Day);
        assert_eq!(UsagePeriod::parse(Some("all")), UsagePeriod::All);
        assert_eq!(UsagePeriod::parse(Some("week")), UsagePeriod::Month);
        assert_eq!(UsagePeriod::parse(None), UsagePeriod::Month);
    }

    #[test]
    fn month_summary_excludes_older_records_and_orders_rows() {
        let now = Utc.with_ymd_and_hms(2026, 3, 15, 18, 0, 0).unwrap();
        let records = vec![
            record("alice", (2026, 2, 28), Some(1.0), true),
            record("alice", (2026, 3, 1), Some(0.25), true),
            record("bob", (2026, 3, 14), Some(0.5), true),
            record("bob", (2026, 3, 14), None, false),
            record("carol", (2026, 3, 15), Some(0.125), true),
        ];

        let summary = summarize(&records, UsagePeriod::Month, now);
        assert_eq!(summary.total_calls, 4);
        assert_eq!(summary.successful_calls, 3);
        assert_eq!(summary.total_cost_usd, 0.875);
        assert_eq!(summary.total_output_images, 3);
        assert_eq!(summary.total_prompt_tokens, 400);

        let days: Vec<&str> = summary.daily.iter().map(|row| row.date.as_str()).collect();
        assert_eq!(days, vec!["2026-03-15", "2026-03-14", "2026-03-01"]);
        assert_eq!(summary.daily[1].calls, 2);

        let owners: Vec<&str> = summary
            .per_owner
            .iter()
            .map(|row| row.owner_id.as_str())
            .collect();
        assert_eq!(owners, vec!["bob", "alice", "carol"]);
        assert_eq!(summary.per_owner[0].successful_calls, 1);
    }

    #[test]
    fn day_and_all_periods_bound_the_window() {
        let now = Utc.with_ymd_and_hms(2026, 3, 15, 18, 0, 0).unwrap();
        let records = vec![
            record("alice", (2025, 12, 31), Some(1.0), true),
            record("alice", (2026, 3, 15), Some(0.5), true),
        ];
        assert_eq!(summarize(&records, UsagePeriod::Day, now).total_calls, 1);
        assert_eq!(summarize(&records, UsagePeriod::All, now).total_calls, 2);
    }

    #[test]
    fn monthly_bill_adds_base_fee_to_converted_usage() {
        let now = Utc.with_ymd_and_hms(2026, 3, 15, 18, 0, 0).unwrap();
        let records = vec![record("alice", (2026, 3, 2), Some(10.0), true)];
        let bill = monthly_bill(&records, now, 18.0, 0.84);
        assert_eq!(bill.total_usd, 10.0);
        assert_eq!(bill.total_eur, 26.4);

        let empty = monthly_bill(&[], now, 18.0, 0.84);
        assert_eq!(empty.total_eur, 18.0);
    }

    #[test]
    fn write_summary_generates_expected_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("summary.json");
        let now = Utc.with_ymd_and_hms(2026, 3, 15, 18, 0, 0).unwrap();
        let summary = summarize(
            &[record("alice", (2026, 3, 2), Some(0.2), true)],
            UsagePeriod::All,
            now,
        );
        write_summary(&path, &summary)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(parsed["period"], json!("all"));
        assert_eq!(parsed["total_calls"], json!(1));
        assert_eq!(parsed["per_owner"][0]["owner_id"], json!("alice"));
        Ok(())
    }
}
