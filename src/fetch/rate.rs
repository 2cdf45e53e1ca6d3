use std::time::Duration;

/// Vendor plan tiers and their API budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RatePlan {
    Starter,
    #[default]
    Growth,
    Pro,
    Enterprise,
}

impl RatePlan {
    const ALL: [RatePlan; 4] = [RatePlan::Starter, RatePlan::Growth, RatePlan::Pro, RatePlan::Enterprise];

    /// Case-insensitive name lookup.
    pub fn parse(name: &str) -> Option<RatePlan> {
        let name = name.trim();
        Self::ALL.into_iter().find(|p| p.name().eq_ignore_ascii_case(name))
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|p| p.name()).collect()
    }

    pub fn name(&self) -> &'static str {
        match self {
            RatePlan::Starter => "starter",
            RatePlan::Growth => "growth",
            RatePlan::Pro => "pro",
            RatePlan::Enterprise => "enterprise",
        }
    }

    pub fn requests_per_minute(&self) -> u32 {
        match self {
            RatePlan::Starter => 100,
            RatePlan::Growth => 200,
            RatePlan::Pro => 400,
            RatePlan::Enterprise => 500,
        }
    }

    /// Spacing that keeps a sequential caller under the per-minute budget.
    pub fn page_delay(&self) -> Duration {
        let rpm = u64::from(self.requests_per_minute());
        Duration::from_millis(60_000_u64.div_ceil(rpm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(RatePlan::parse("Enterprise"), Some(RatePlan::Enterprise));
        assert_eq!(RatePlan::parse(" pro "), Some(RatePlan::Pro));
        assert_eq!(RatePlan::parse("gold"), None);
    }

    #[test]
    fn test_page_delay() {
        assert_eq!(RatePlan::Starter.page_delay(), Duration::from_millis(600));
        assert_eq!(RatePlan::Growth.page_delay(), Duration::from_millis(300));
        assert_eq!(RatePlan::Pro.page_delay(), Duration::from_millis(150));
        assert_eq!(RatePlan::Enterprise.page_delay(), Duration::from_millis(120));
    }
}
