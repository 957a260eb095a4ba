//! Spans of simulated time

use rust_decimal::Decimal;

use crate::actions::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub start: Decimal,
    pub end: Decimal,
}

impl Period {
    pub fn new(start: Decimal, end: Decimal) -> Self {
        Self { start, end }
    }

    pub fn of(action: &Action) -> Self {
        Self::new(action.start_time(), action.start_time() + action.duration())
    }

    pub fn duration(&self) -> Decimal {
        self.end - self.start
    }

    /// Overlapping or touching end to start
    pub fn is_contiguous(&self, other: &Period) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn union(&self, other: &Period) -> Period {
        Period::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// Sorted, merged periods covered by `actions`
pub fn contiguous_periods<'a>(actions: impl IntoIterator<Item = &'a Action>) -> Vec<Period> {
    let mut base: Vec<Period> = actions.into_iter().map(Period::of).collect();
    base.sort_by(|a, b| (a.start, a.end).cmp(&(b.start, b.end)));

    let mut periods: Vec<Period> = Vec::with_capacity(base.len());
    for period in base {
        match periods.last_mut() {
            Some(last) if last.is_contiguous(&period) => *last = last.union(&period),
            _ => periods.push(period),
        }
    }
    periods
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Plan;

    fn plan(start: i64, duration: i64) -> Action {
        Action::Plan(Plan::new(Decimal::from(start), Decimal::from(duration)))
    }

    #[test]
    fn test_contiguous_periods_merge_touching_and_overlapping() {
        let actions = [plan(2, 2), plan(0, 2), plan(5, 1), plan(5, 3)];
        let periods = contiguous_periods(&actions);
        assert_eq!(
            periods,
            vec![
                Period::new(Decimal::ZERO, Decimal::from(4)),
                Period::new(Decimal::from(5), Decimal::from(8)),
            ]
        );
        let total: Decimal = periods.iter().map(Period::duration).sum();
        assert_eq!(total, Decimal::from(7));
    }

    #[test]
    fn test_no_actions_no_periods() {
        assert!(contiguous_periods(&Vec::<Action>::new()).is_empty());
    }
}
