use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

/// Billing cycle accepted in order creation and recorded on the order row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// Calendar end of a billing period starting at `start`: one month or
    /// one year later, not a fixed number of days.
    pub fn period_end(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Monthly => start + Months::new(1),
            Self::Yearly => start + Months::new(12),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_roundtrip() {
        assert_eq!(BillingCycle::parse("monthly"), Some(BillingCycle::Monthly));
        assert_eq!(BillingCycle::parse("yearly"), Some(BillingCycle::Yearly));
        assert_eq!(BillingCycle::parse("weekly"), None);
        assert_eq!(BillingCycle::parse(""), None);
    }

    #[test]
    fn monthly_period_adds_one_calendar_month() {
        let start = Utc.with_ymd_and_hms(2026, 3, 15, 9, 30, 0).unwrap();
        let end = BillingCycle::Monthly.period_end(start);
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 4, 15, 9, 30, 0).unwrap());
        assert!(end > start);
    }

    #[test]
    fn yearly_period_adds_one_year() {
        let start = Utc.with_ymd_and_hms(2026, 3, 15, 9, 30, 0).unwrap();
        let end = BillingCycle::Yearly.period_end(start);
        assert_eq!(end, Utc.with_ymd_and_hms(2027, 3, 15, 9, 30, 0).unwrap());
    }

    #[test]
    fn month_end_clamps_instead_of_overflowing() {
        // Jan 31 + 1 month clamps to the last day of February.
        let start = Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap();
        let end = BillingCycle::Monthly.period_end(start);
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap());
    }
}
