//! Escalation policy: which roles hear about an unacknowledged alert, and when.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::identity::Role;
use crate::error::CoreError;

/// Channel over which a level is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    InApp,
    Push,
    Sms,
    Email,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::InApp => "in_app",
            DeliveryChannel::Push => "push",
            DeliveryChannel::Sms => "sms",
            DeliveryChannel::Email => "email",
        }
    }

    /// Whether the channel leaves the process through an external provider.
    pub fn is_external(&self) -> bool {
        !matches!(self, DeliveryChannel::InApp)
    }
}

impl fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tier of the policy. `activate_after_secs` is measured from alert creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationLevel {
    pub level: u32,
    pub activate_after_secs: u64,
    pub recipients: Vec<Role>,
    pub channels: Vec<DeliveryChannel>,
}

impl EscalationLevel {
    pub fn activate_after(&self) -> Duration {
        Duration::from_secs(self.activate_after_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscalationPolicy {
    levels: Vec<EscalationLevel>,
}

impl EscalationPolicy {
    /// Builds a policy, checking that levels are numbered 1..=n, that level 1
    /// fires immediately, and that activation offsets never go backwards.
    pub fn new(mut levels: Vec<EscalationLevel>) -> Result<Self, CoreError> {
        if levels.is_empty() {
            return Err(CoreError::Validation(
                "Escalation policy needs at least one level".to_string(),
            ));
        }
        levels.sort_by_key(|l| l.level);

        for (index, level) in levels.iter().enumerate() {
            let expected = index as u32 + 1;
            if level.level != expected {
                return Err(CoreError::Validation(format!(
                    "Escalation levels must be numbered consecutively from 1, found {} at position {}",
                    level.level, expected
                )));
            }
            if level.recipients.is_empty() || level.channels.is_empty() {
                return Err(CoreError::Validation(format!(
                    "Escalation level {} needs recipients and channels",
                    level.level
                )));
            }
        }
        if levels[0].activate_after_secs != 0 {
            return Err(CoreError::Validation(
                "Escalation level 1 must activate immediately".to_string(),
            ));
        }
        if levels
            .windows(2)
            .any(|w| w[1].activate_after_secs < w[0].activate_after_secs)
        {
            return Err(CoreError::Validation(
                "Escalation activation offsets must not decrease".to_string(),
            ));
        }

        Ok(Self { levels })
    }

    /// Supervisors at once, admins after five minutes, emergency contacts
    /// (with SMS) after fifteen.
    pub fn v1() -> Self {
        let both = vec![DeliveryChannel::InApp, DeliveryChannel::Push];
        Self {
            levels: vec![
                EscalationLevel {
                    level: 1,
                    activate_after_secs: 0,
                    recipients: vec![Role::Supervisor],
                    channels: both.clone(),
                },
                EscalationLevel {
                    level: 2,
                    activate_after_secs: 5 * 60,
                    recipients: vec![Role::Supervisor, Role::Admin],
                    channels: both,
                },
                EscalationLevel {
                    level: 3,
                    activate_after_secs: 15 * 60,
                    recipients: vec![Role::Supervisor, Role::Admin, Role::EmergencyContact],
                    channels: vec![
                        DeliveryChannel::InApp,
                        DeliveryChannel::Push,
                        DeliveryChannel::Sms,
                    ],
                },
            ],
        }
    }

    pub fn levels(&self) -> &[EscalationLevel] {
        &self.levels
    }

    pub fn level(&self, level: u32) -> Option<&EscalationLevel> {
        level
            .checked_sub(1)
            .and_then(|index| self.levels.get(index as usize))
    }

    pub fn max_level(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Time left until `level` should fire for an alert created at `created_at`.
    /// Saturates at zero; `None` when the policy has no such level.
    pub fn remaining_delay(
        &self,
        level: u32,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let target = self.level(level)?;
        let elapsed = (now - created_at).to_std().unwrap_or(Duration::ZERO);
        Some(target.activate_after().saturating_sub(elapsed))
    }
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self::v1()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_v1_policy_shape() {
        let policy = EscalationPolicy::v1();
        assert_eq!(policy.max_level(), 3);
        assert_eq!(policy.level(1).unwrap().recipients, vec![Role::Supervisor]);
        assert_eq!(
            policy.level(2).unwrap().activate_after(),
            Duration::from_secs(300)
        );
        assert!(policy
            .level(3)
            .unwrap()
            .channels
            .contains(&DeliveryChannel::Sms));
        assert!(policy.level(0).is_none());
        assert!(policy.level(4).is_none());
    }

    #[test]
    fn test_v1_passes_its_own_validation() {
        let policy = EscalationPolicy::v1();
        assert_eq!(EscalationPolicy::new(policy.levels().to_vec()).unwrap(), policy);
    }

    #[test]
    fn test_remaining_delay_measured_from_creation() {
        let policy = EscalationPolicy::v1();
        let created = Utc::now();

        let at_two_minutes = created + ChronoDuration::minutes(2);
        assert_eq!(
            policy.remaining_delay(2, created, at_two_minutes),
            Some(Duration::from_secs(180))
        );
        assert_eq!(
            policy.remaining_delay(3, created, created + ChronoDuration::minutes(5)),
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn test_remaining_delay_saturates() {
        let policy = EscalationPolicy::v1();
        let created = Utc::now();
        assert_eq!(
            policy.remaining_delay(2, created, created + ChronoDuration::hours(1)),
            Some(Duration::ZERO)
        );
        assert_eq!(policy.remaining_delay(9, created, created), None);
    }

    #[test]
    fn test_new_rejects_gaps_and_bad_offsets() {
        let mut levels = EscalationPolicy::v1().levels().to_vec();
        levels.remove(1);
        assert!(EscalationPolicy::new(levels).is_err());

        let mut levels = EscalationPolicy::v1().levels().to_vec();
        levels[0].activate_after_secs = 10;
        assert!(EscalationPolicy::new(levels).is_err());

        let mut levels = EscalationPolicy::v1().levels().to_vec();
        levels[2].activate_after_secs = 60;
        assert!(EscalationPolicy::new(levels).is_err());

        assert!(EscalationPolicy::new(Vec::new()).is_err());
    }

    #[test]
    fn test_new_sorts_levels() {
        let mut levels = EscalationPolicy::v1().levels().to_vec();
        levels.reverse();
        let policy = EscalationPolicy::new(levels).unwrap();
        assert_eq!(policy.level(1).unwrap().activate_after_secs, 0);
    }

    #[test]
    fn test_channel_wire_names() {
        assert_eq!(
            serde_json::to_string(&DeliveryChannel::InApp).unwrap(),
            "\"in_app\""
        );
        assert!(!DeliveryChannel::InApp.is_external());
        assert!(DeliveryChannel::Sms.is_external());
    }
}
