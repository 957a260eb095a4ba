//! Run summary written as JSON at the end of a simulation

use rust_decimal::Decimal;
use serde::Serialize;

use super::simulator::StallRecord;
use crate::actions::Action;
use crate::execution::{contiguous_periods, Period};
use crate::model::GoalAchievement;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalReport {
    pub fraction: Decimal,
    pub achieved: usize,
    pub total: usize,
}

impl From<GoalAchievement> for GoalReport {
    fn from(achievement: GoalAchievement) -> Self {
        Self {
            fraction: achievement.fraction(),
            achieved: achievement.achieved,
            total: achievement.total,
        }
    }
}

/// How long an agent sat stalled before a plan could reach it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StalledPeriod {
    pub agent: String,
    pub time: Decimal,
    pub duration: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub goal_achieved: GoalReport,
    pub end_simulation_time: Decimal,
    pub time_allocating: Decimal,
    /// Summed duration of every planning action
    pub time_planning_total: Decimal,
    /// Time during which at least one planner was running
    pub time_planning_makespan: Decimal,
    pub time_waiting_for_actions_to_finish: Decimal,
    pub time_waiting_for_planner_to_finish: Decimal,
    pub stalled: Vec<StalledPeriod>,
    pub execution: Vec<Action>,
}

fn end(action: &Action) -> Decimal {
    Period::of(action).end
}

fn is_planner(action: &Action) -> bool {
    matches!(action, Action::Plan(_) | Action::LocalPlan(_))
}

impl SimulationReport {
    pub fn new(
        achievement: GoalAchievement,
        end_simulation_time: Decimal,
        executed: &[Action],
        stalls: &[StallRecord],
    ) -> Self {
        let planning: Vec<&Action> = executed.iter().filter(|a| is_planner(a)).collect();
        let physical: Vec<&Action> = executed.iter().filter(|a| a.is_physical()).collect();

        let time_allocating: Decimal = executed
            .iter()
            .filter(|a| matches!(a, Action::Allocate(_)))
            .map(Action::duration)
            .sum();
        let time_planning_total: Decimal = planning.iter().map(|a| a.duration()).sum();
        let time_planning_makespan: Decimal = contiguous_periods(planning.iter().copied())
            .iter()
            .map(Period::duration)
            .sum();

        let mut waiting_for_actions = Decimal::ZERO;
        let mut waiting_for_planner = Decimal::ZERO;
        for plan in &planning {
            let plan_end = end(plan);
            // Plan ready but agents still busy with earlier work
            waiting_for_actions += physical
                .iter()
                .filter(|a| a.start_time() < plan_end && plan_end <= end(a))
                .map(|a| end(a) - plan_end)
                .max()
                .unwrap_or(Decimal::ZERO);
            // Agents idle while the plan was still being computed
            waiting_for_planner += physical
                .iter()
                .filter(|a| end(a) <= plan_end)
                .map(|a| plan_end - end(a))
                .min()
                .unwrap_or_else(|| plan.duration());
        }

        let stalled = stalls
            .iter()
            .map(|stall| {
                let resumed = planning
                    .iter()
                    .map(|p| end(p))
                    .filter(|e| *e > stall.time)
                    .min()
                    .unwrap_or(end_simulation_time);
                StalledPeriod {
                    agent: stall.agent.clone(),
                    time: stall.time,
                    duration: (resumed - stall.time).max(Decimal::ZERO),
                }
            })
            .collect();

        Self {
            goal_achieved: achievement.into(),
            end_simulation_time,
            time_allocating,
            time_planning_total,
            time_planning_makespan,
            time_waiting_for_actions_to_finish: waiting_for_actions,
            time_waiting_for_planner_to_finish: waiting_for_planner,
            stalled,
            execution: executed.to_vec(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.goal_achieved.achieved == self.goal_achieved.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Allocate, Clean, LocalPlan, Move};

    fn d(n: i64) -> Decimal {
        Decimal::from(n)
    }

    fn local_plan(start: i64, duration: i64) -> Action {
        Action::LocalPlan(LocalPlan::new(d(start), d(duration), "agent1", Vec::new()))
    }

    fn executed() -> Vec<Action> {
        vec![
            Action::Allocate(Allocate::new(d(0), d(1))),
            local_plan(1, 2),
            Action::Move(Move::new(d(3), d(4), "agent1", "a", "b")),
            local_plan(5, 3),
            Action::Clean(Clean::new(d(7), d(2), "agent1", "b")),
        ]
    }

    #[test]
    fn test_planning_and_allocation_times() {
        let report = SimulationReport::new(
            GoalAchievement { achieved: 1, total: 2 },
            d(9),
            &executed(),
            &[],
        );
        assert_eq!(report.goal_achieved.fraction, Decimal::new(5, 1));
        assert_eq!(report.time_allocating, d(1));
        assert_eq!(report.time_planning_total, d(5));
        assert_eq!(report.time_planning_makespan, d(5));
        assert!(!report.is_success());
    }

    #[test]
    fn test_waiting_times() {
        let report = SimulationReport::new(
            GoalAchievement { achieved: 2, total: 2 },
            d(9),
            &executed(),
            &[],
        );
        // The clean started at 7 runs one second past the second plan's end
        assert_eq!(report.time_waiting_for_actions_to_finish, d(1));
        // Nothing ran before the first plan (2), the move ended 1 before the second
        assert_eq!(report.time_waiting_for_planner_to_finish, d(3));
    }

    #[test]
    fn test_stall_lasts_until_next_plan() {
        let stalls = [
            StallRecord {
                agent: "agent1".into(),
                time: d(4),
            },
            StallRecord {
                agent: "agent2".into(),
                time: d(8),
            },
        ];
        let report = SimulationReport::new(
            GoalAchievement { achieved: 0, total: 1 },
            d(12),
            &executed(),
            &stalls,
        );
        assert_eq!(report.stalled[0].duration, d(4));
        assert_eq!(report.stalled[1].duration, d(4));
    }

    #[test]
    fn test_report_serializes() {
        let report = SimulationReport::new(
            GoalAchievement { achieved: 1, total: 1 },
            d(9),
            &executed(),
            &[],
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["execution"].as_array().unwrap().len(), 5);
        assert_eq!(json["execution"][2]["type"], "Move");
        assert_eq!(json["goal_achieved"]["achieved"], 1);
    }
}
