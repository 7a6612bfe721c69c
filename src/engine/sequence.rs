// ==========================================
// 生产执行控制引擎 - 序号作用域
// ==========================================
// scope_key = 作用域 + 重置周期桶
//   NEVER   -> "<scope>"
//   DAILY   -> "<scope>-<yyyyMMdd>"
//   MONTHLY -> "<scope>-<yyyyMM>"
//   YEARLY  -> "<scope>-<yyyy>"
// 计数器本身见 repository::sequence_counter_repo (原子自增)
// ==========================================

use crate::domain::types::ResetPeriod;
use chrono::NaiveDate;

pub struct SequenceScope;

impl SequenceScope {
    /// 重置周期桶
    pub fn bucket(reset_period: ResetPeriod, date: NaiveDate) -> String {
        match reset_period {
            ResetPeriod::Never => String::new(),
            ResetPeriod::Daily => date.format("%Y%m%d").to_string(),
            ResetPeriod::Monthly => date.format("%Y%m").to_string(),
            ResetPeriod::Yearly => date.format("%Y").to_string(),
        }
    }

    /// 计数器 scope_key
    pub fn key(scope: &str, reset_period: ResetPeriod, date: NaiveDate) -> String {
        let bucket = Self::bucket(reset_period, date);
        if bucket.is_empty() {
            scope.to_string()
        } else {
            format!("{}-{}", scope, bucket)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_keys_per_reset_period() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(SequenceScope::key("12", ResetPeriod::Never, date), "12");
        assert_eq!(SequenceScope::key("12", ResetPeriod::Daily, date), "12-20240307");
        assert_eq!(SequenceScope::key("12", ResetPeriod::Monthly, date), "12-202403");
        assert_eq!(SequenceScope::key("12", ResetPeriod::Yearly, date), "12-2024");
    }

    #[test]
    fn test_daily_buckets_differ_across_days() {
        let d1 = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert_ne!(
            SequenceScope::key("7", ResetPeriod::Daily, d1),
            SequenceScope::key("7", ResetPeriod::Daily, d2)
        );
        assert_ne!(
            SequenceScope::key("7", ResetPeriod::Yearly, d1),
            SequenceScope::key("7", ResetPeriod::Yearly, d2)
        );
    }
}
