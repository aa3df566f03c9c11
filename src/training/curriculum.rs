//! Curriculum Scheduler: Growing Rollout Horizon
//!
//! `switch_steps[i]` epochs are spent at `horizon_list[i]`. The epoch axis is
//! partitioned into consecutive blocks:
//!
//! ```text
//! horizon_list = [50, 100]   switch_steps = [3, 2]
//! epoch    0   1   2 | 3   4 | 5 ...
//! horizon 50  50  50 |100 100|100 (held)
//! ```
//!
//! An epoch on a boundary belongs to the block that starts there.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the horizon evolves over training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HorizonPolicy {
    Constant {
        horizon: usize,
    },
    Scheduled {
        horizon_list: Vec<usize>,
        switch_steps: Vec<usize>,
    },
}

impl Default for HorizonPolicy {
    fn default() -> Self {
        HorizonPolicy::Scheduled {
            horizon_list: vec![50, 100, 150, 200, 250, 300],
            switch_steps: vec![200, 200, 200, 150, 150, 150],
        }
    }
}

/// Validated piecewise-constant horizon schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonSchedule {
    horizons: Vec<usize>,
    /// Cumulative block ends
    ends: Vec<usize>,
}

impl HorizonSchedule {
    pub fn new(horizons: Vec<usize>, switch_steps: &[usize]) -> Result<Self> {
        if horizons.is_empty() || horizons.len() != switch_steps.len() {
            return Err(Error::InvalidConfig(format!(
                "horizon schedule needs one switch step per horizon ({} horizons, {} switch steps)",
                horizons.len(),
                switch_steps.len()
            )));
        }
        if horizons.contains(&0) {
            return Err(Error::InvalidConfig("horizons must be positive".into()));
        }
        let ends = cumulative(switch_steps);
        Ok(Self { horizons, ends })
    }

    pub fn horizon_at(&self, epoch: usize) -> usize {
        self.ends
            .iter()
            .position(|&end| epoch < end)
            .map(|i| self.horizons[i])
            .unwrap_or(self.horizons[self.horizons.len() - 1])
    }

    /// Epochs covered by the schedule before the last horizon is held.
    pub fn total_epochs(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    pub fn max_horizon(&self) -> usize {
        self.horizons.iter().copied().max().unwrap_or(0)
    }
}

/// Running sums of `steps`.
pub(crate) fn cumulative(steps: &[usize]) -> Vec<usize> {
    steps
        .iter()
        .scan(0, |acc, &s| {
            *acc += s;
            Some(*acc)
        })
        .collect()
}

#[derive(Debug, Clone)]
enum Resolved {
    Constant(usize),
    Scheduled(HorizonSchedule),
}

#[derive(Debug, Clone)]
pub struct CurriculumScheduler {
    policy: Resolved,
    previous: Option<usize>,
}

impl CurriculumScheduler {
    pub fn new(policy: &HorizonPolicy) -> Result<Self> {
        let policy = match policy {
            HorizonPolicy::Constant { horizon: 0 } => {
                return Err(Error::InvalidConfig("horizons must be positive".into()))
            }
            HorizonPolicy::Constant { horizon } => Resolved::Constant(*horizon),
            HorizonPolicy::Scheduled {
                horizon_list,
                switch_steps,
            } => Resolved::Scheduled(HorizonSchedule::new(horizon_list.clone(), switch_steps)?),
        };
        Ok(Self {
            policy,
            previous: None,
        })
    }

    pub fn horizon_at(&self, epoch: usize) -> usize {
        match &self.policy {
            Resolved::Constant(h) => *h,
            Resolved::Scheduled(schedule) => schedule.horizon_at(epoch),
        }
    }

    /// Longest horizon the scheduler will ever return.
    pub fn max_horizon(&self) -> usize {
        match &self.policy {
            Resolved::Constant(h) => *h,
            Resolved::Scheduled(schedule) => schedule.max_horizon(),
        }
    }

    /// Horizon for `epoch` and whether it differs from the previous call's.
    pub fn select_horizon(&mut self, epoch: usize) -> (bool, usize) {
        let horizon = self.horizon_at(epoch);
        let changed = self.previous != Some(horizon);
        self.previous = Some(horizon);
        (changed, horizon)
    }
}
