//! Timezone representation of the system clock.
//!
//! Named zones map straight onto the zoneinfo database. Fixed offsets go
//! through the `Etc/GMT` zones, which only exist for whole hours and use the
//! POSIX sign convention (`Etc/GMT-2` is two hours east of UTC).

use sysconf_common::ClockOps;
use sysconf_shared::{ClockConfig, Domain, SysconfError, SystemConfig};

use super::{plan_error, Plan, PlanContext, Reconciler, Step};

/// Largest offset representable by an `Etc/GMT` zone, in hours.
const MAX_OFFSET_HOURS: i16 = 14;

/// Zone name implementing `clock`.
pub fn zone_for(clock: &ClockConfig) -> Result<String, SysconfError> {
    match clock {
        ClockConfig::TimezoneName(name) => Ok(name.clone()),
        ClockConfig::TimezoneUtcOffset(minutes) => {
            let path = format!("{}/clock/timezone-utc-offset", sysconf_shared::SYSTEM_ROOT);
            if minutes % 60 != 0 {
                return Err(SysconfError::validation(
                    path,
                    format!("offset {} is not a whole number of hours", minutes),
                ));
            }
            let hours = minutes / 60;
            if hours.abs() > MAX_OFFSET_HOURS {
                return Err(SysconfError::validation(
                    path,
                    format!("offset {} exceeds {} hours", minutes, MAX_OFFSET_HOURS),
                ));
            }
            Ok(match hours {
                0 => "Etc/UTC".to_string(),
                h if h > 0 => format!("Etc/GMT-{}", h),
                h => format!("Etc/GMT+{}", -h),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClockReconciler;

impl Reconciler for ClockReconciler {
    const DOMAIN: Domain = Domain::Clock;
    type Subtree = Option<ClockConfig>;

    fn select(config: &SystemConfig) -> Self::Subtree {
        config.clock.clone()
    }

    fn plan_changes(
        &self,
        _old: &Option<ClockConfig>,
        new: &Option<ClockConfig>,
        ctx: &PlanContext<'_>,
    ) -> Result<Plan, SysconfError> {
        let mut plan = Plan::empty(Self::DOMAIN);
        // Removing the clock configuration leaves the host as it is.
        let Some(clock) = new else {
            return Ok(plan);
        };
        let zone = zone_for(clock)?;
        let current = ctx
            .host
            .timezone()
            .map_err(|e| plan_error(Self::DOMAIN, e))?;
        if current.as_deref() != Some(zone.as_str()) {
            plan.push(Step::SetTimezone(Some(zone)), Step::SetTimezone(current));
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysconf_common::MemoryHost;

    #[test]
    fn test_offset_zones() {
        assert_eq!(zone_for(&ClockConfig::TimezoneUtcOffset(120)).unwrap(), "Etc/GMT-2");
        assert_eq!(zone_for(&ClockConfig::TimezoneUtcOffset(-300)).unwrap(), "Etc/GMT+5");
        assert_eq!(zone_for(&ClockConfig::TimezoneUtcOffset(0)).unwrap(), "Etc/UTC");
        assert!(zone_for(&ClockConfig::TimezoneUtcOffset(90)).is_err());
        assert!(zone_for(&ClockConfig::TimezoneUtcOffset(900)).is_err());
    }

    #[test]
    fn test_removal_leaves_clock() {
        let host = MemoryHost::new();
        let ctx = PlanContext {
            host: &host,
            tx_id: "t",
        };
        let old = SystemConfig {
            clock: Some(ClockConfig::TimezoneName("Europe/Stockholm".into())),
            ..Default::default()
        };
        let plan = ClockReconciler
            .plan(&old, &SystemConfig::default(), &ctx)
            .unwrap();
        assert!(plan.is_empty());

        let plan = ClockReconciler
            .plan(&SystemConfig::default(), &old, &ctx)
            .unwrap();
        assert_eq!(plan.steps[0].inverse, Step::SetTimezone(None));
    }
}
