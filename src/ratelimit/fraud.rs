//! Fraud heuristics over a short in-process action log.
//!
//! Three rules, evaluated on every observed attempt:
//!   burst        — more than N distinct actions inside the burst window
//!   shared device — K consecutive actions, one device, different users
//!   new device   — a user whose recent history is single-device shows up
//!                  on a different device
//!
//! `high` severity rejects the action upstream; lower severities are
//! logged and let the action proceed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::DateTime;
use chrono::Utc;
use openpenpal_core::clock::Clock;
use openpenpal_core::ratelimit::{ActionContext, FraudSeverity};
use uuid::Uuid;

use crate::config::FraudConfig;

const USER_LOG_CAP: usize = 64;
const GLOBAL_LOG_CAP: usize = 256;

#[derive(Debug, Clone)]
pub struct FraudAssessment {
    pub severity: FraudSeverity,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct LoggedAction {
    at: DateTime<Utc>,
    device_id: Option<String>,
}

pub struct FraudDetector {
    clock: Arc<dyn Clock>,
    cfg: FraudConfig,
    user_logs: Mutex<HashMap<Uuid, VecDeque<LoggedAction>>>,
    global_log: Mutex<VecDeque<(Uuid, Option<String>)>>,
}

impl FraudDetector {
    pub fn new(clock: Arc<dyn Clock>, cfg: FraudConfig) -> Self {
        Self {
            clock,
            cfg,
            user_logs: Mutex::new(HashMap::new()),
            global_log: Mutex::new(VecDeque::new()),
        }
    }

    /// Log the attempt and evaluate the rules against the updated state.
    /// Attempts count whether or not the action is ultimately allowed.
    pub fn observe(
        &self,
        user_id: Uuid,
        action: &str,
        ctx: &ActionContext,
    ) -> Option<FraudAssessment> {
        let now = self.clock.now();
        let mut worst: Option<FraudAssessment> = None;
        let mut raise = |severity: FraudSeverity, reason: String| {
            if worst.as_ref().map(|w| severity > w.severity).unwrap_or(true) {
                worst = Some(FraudAssessment { severity, reason });
            }
        };

        // Burst rule: count this user's attempts inside the window,
        // including the current one.
        {
            let mut logs = self.user_logs.lock().expect("user log poisoned");
            let log = log_for(&mut logs, user_id);
            log.push_back(LoggedAction {
                at: now,
                device_id: ctx.device_id.clone(),
            });
            while log.len() > USER_LOG_CAP {
                log.pop_front();
            }
            let in_window = log
                .iter()
                .filter(|a| now - a.at <= self.cfg.burst_window)
                .count();
            if in_window > self.cfg.burst_limit {
                raise(
                    FraudSeverity::High,
                    format!(
                        "{in_window} actions of {action} within {}s",
                        self.cfg.burst_window.num_seconds()
                    ),
                );
            }

            // New-device rule: the user's prior history (excluding the
            // current attempt) is long enough, single-device, and the
            // current device differs.
            if let Some(device) = &ctx.device_id {
                let prior: Vec<&LoggedAction> =
                    log.iter().rev().skip(1).take(self.cfg.device_history).collect();
                if prior.len() >= self.cfg.device_history {
                    let prior_devices: HashSet<&str> = prior
                        .iter()
                        .filter_map(|a| a.device_id.as_deref())
                        .collect();
                    if prior_devices.len() == 1 && !prior_devices.contains(device.as_str()) {
                        raise(
                            FraudSeverity::Medium,
                            format!("new device {device} after single-device history"),
                        );
                    }
                }
            }
        }

        // Shared-device rule: the last K global actions share one device
        // across distinct users.
        {
            let mut global = self.global_log.lock().expect("global log poisoned");
            global.push_back((user_id, ctx.device_id.clone()));
            while global.len() > GLOBAL_LOG_CAP {
                global.pop_front();
            }
            let run = self.cfg.shared_device_run;
            if global.len() >= run {
                let tail: Vec<&(Uuid, Option<String>)> = global.iter().rev().take(run).collect();
                let devices: HashSet<&str> =
                    tail.iter().filter_map(|(_, d)| d.as_deref()).collect();
                let users: HashSet<Uuid> = tail.iter().map(|(u, _)| *u).collect();
                let all_have_device = tail.iter().all(|(_, d)| d.is_some());
                if all_have_device && devices.len() == 1 && users.len() == run {
                    raise(
                        FraudSeverity::High,
                        format!(
                            "device {} used by {run} different users consecutively",
                            devices.iter().next().unwrap()
                        ),
                    );
                }
            }
        }

        if let Some(assessment) = &worst {
            tracing::warn!(
                "anomalous activity for {user_id} on {action}: {} ({})",
                assessment.reason,
                assessment.severity
            );
        }
        worst
    }
}

fn log_for(
    logs: &mut HashMap<Uuid, VecDeque<LoggedAction>>,
    user_id: Uuid,
) -> &mut VecDeque<LoggedAction> {
    logs.entry(user_id).or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use openpenpal_core::clock::ManualClock;

    fn detector() -> (Arc<ManualClock>, FraudDetector) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let det = FraudDetector::new(Arc::clone(&clock) as Arc<dyn Clock>, FraudConfig::default());
        (clock, det)
    }

    fn ctx(device: &str) -> ActionContext {
        ActionContext {
            ip: Some("10.0.0.1".into()),
            device_id: Some(device.into()),
            user_agent: None,
        }
    }

    #[test]
    fn burst_trips_at_eleven_in_window() {
        let (clock, det) = detector();
        let user = Uuid::new_v4();
        for i in 0..10 {
            clock.advance(Duration::seconds(3));
            let device = if i % 2 == 0 { "d1" } else { "d2" };
            assert!(det.observe(user, "a", &ctx(device)).is_none(), "call {i}");
        }
        let hit = det.observe(user, "a", &ctx("d1")).expect("should flag");
        assert_eq!(hit.severity, FraudSeverity::High);
    }

    #[test]
    fn slow_actions_never_burst() {
        let (clock, det) = detector();
        let user = Uuid::new_v4();
        for _ in 0..30 {
            clock.advance(Duration::seconds(10));
            assert!(det.observe(user, "a", &ctx("d1")).is_none());
        }
    }

    #[test]
    fn shared_device_across_three_users() {
        let (clock, det) = detector();
        clock.advance(Duration::seconds(1));
        let (u1, u2, u3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        assert!(det.observe(u1, "a", &ctx("dev")).is_none());
        clock.advance(Duration::seconds(20));
        assert!(det.observe(u2, "a", &ctx("dev")).is_none());
        clock.advance(Duration::seconds(20));
        let hit = det.observe(u3, "a", &ctx("dev")).expect("should flag");
        assert_eq!(hit.severity, FraudSeverity::High);
    }

    #[test]
    fn new_device_after_single_device_history_is_medium() {
        let (clock, det) = detector();
        let user = Uuid::new_v4();
        for _ in 0..20 {
            clock.advance(Duration::minutes(5));
            assert!(det.observe(user, "a", &ctx("phone")).is_none());
        }
        clock.advance(Duration::minutes(5));
        let hit = det.observe(user, "a", &ctx("laptop")).expect("should flag");
        assert_eq!(hit.severity, FraudSeverity::Medium);
    }
}
