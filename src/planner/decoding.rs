//! Plan output decoding
//!
//! Solvers print plans as blocks of lines like
//! `0.000: (move agent1 n1 n2)  [10.000]` terminated by a blank line.
//! An anytime solver prints a sequence of improving plans; the last
//! complete block wins.

use std::iter::Peekable;
use std::str::FromStr;

use nom::bytes::complete::take_while1;
use nom::character::complete::{char, space0, space1};
use nom::combinator::map_res;
use nom::multi::many0;
use nom::sequence::{delimited, preceded};
use nom::{IResult, Parser};
use rust_decimal::Decimal;

use crate::actions::{Action, ActionCatalog};
use crate::core::accuracy::quantize;
use crate::core::error::{Result, SimError};

/// First line of every plan block
const PLAN_START: &str = "0.000: ";

/// One parsed plan line before it is turned into an action
#[derive(Debug, Clone, PartialEq)]
struct PlanLine<'a> {
    start: Decimal,
    name: &'a str,
    args: Vec<&'a str>,
    duration: Decimal,
}

fn decimal(input: &str) -> IResult<&str, Decimal> {
    map_res(
        take_while1(|c: char| c.is_ascii_digit() || c == '.'),
        Decimal::from_str,
    )
    .parse(input)
}

fn symbol(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && !"()[]".contains(c)).parse(input)
}

fn plan_line(input: &str) -> IResult<&str, PlanLine<'_>> {
    let (input, start) = decimal(input)?;
    let (input, _) = (char(':'), space0, char('(')).parse(input)?;
    let (input, name) = symbol(input)?;
    let (input, args) = many0(preceded(space1, symbol)).parse(input)?;
    let (input, _) = (space0, char(')'), space0).parse(input)?;
    let (input, duration) = delimited(char('['), decimal, char(']')).parse(input)?;
    Ok((
        input,
        PlanLine {
            start,
            name,
            args,
            duration,
        },
    ))
}

fn decode_line(line: &str, catalog: &ActionCatalog) -> Result<Action> {
    let trimmed = line.trim();
    let (rest, parsed) =
        plan_line(trimmed).map_err(|e| SimError::PlanDecode(format!("{}: {}", trimmed, e)))?;
    if !rest.trim().is_empty() {
        return Err(SimError::PlanDecode(format!("trailing input: {}", trimmed)));
    }
    let args: Vec<String> = parsed.args.iter().map(|a| a.to_string()).collect();
    catalog.build(
        parsed.name,
        quantize(parsed.start),
        quantize(parsed.duration),
        &args,
    )
}

enum Block {
    /// Terminated by a blank line
    Complete(Vec<Action>),
    /// Output stopped mid-block; holds the lines that were whole
    Incomplete(Vec<Action>),
}

fn read_block<'a, I>(lines: &mut Peekable<I>, catalog: &ActionCatalog) -> Result<Block>
where
    I: Iterator<Item = &'a str>,
{
    let mut actions = Vec::new();
    for line in lines.by_ref() {
        if !line.ends_with('\n') {
            return Ok(Block::Incomplete(actions));
        }
        if line.trim().is_empty() || line.starts_with(';') {
            return Ok(Block::Complete(actions));
        }
        actions.push(decode_line(line, catalog)?);
    }
    Ok(Block::Incomplete(actions))
}

/// Decode a single plan block that must end with a blank line
pub fn decode_plan_block(text: &str, catalog: &ActionCatalog) -> Result<Vec<Action>> {
    let mut lines = text.split_inclusive('\n').peekable();
    match read_block(&mut lines, catalog)? {
        Block::Complete(actions) => Ok(actions),
        Block::Incomplete(_) => Err(SimError::IncompletePlan(
            "plan block not terminated by a blank line".into(),
        )),
    }
}

/// Decode a solver's full standard output
///
/// Anything before the first `0.000: ` line is solver chatter. With
/// `first_plan_only` the first block is returned even if cut short, and no
/// output at all is an empty plan. Otherwise the last complete block is
/// returned, a trailing incomplete block is ignored, and no complete block
/// at all means no plan.
pub fn decode_plan_output(
    text: &str,
    catalog: &ActionCatalog,
    first_plan_only: bool,
) -> Result<Vec<Action>> {
    let mut lines = text
        .split_inclusive('\n')
        .skip_while(|line| !line.starts_with(PLAN_START))
        .peekable();
    let mut best = None;

    loop {
        while lines
            .peek()
            .is_some_and(|l| l.trim().is_empty() || l.starts_with(';'))
        {
            lines.next();
        }
        if lines.peek().is_none() {
            break;
        }
        match read_block(&mut lines, catalog)? {
            Block::Complete(actions) => {
                if first_plan_only {
                    return Ok(actions);
                }
                best = Some(actions);
            }
            Block::Incomplete(actions) => {
                if first_plan_only {
                    return Ok(actions);
                }
                break;
            }
        }
    }

    match best {
        Some(plan) => Ok(plan),
        None if first_plan_only => Ok(Vec::new()),
        None => Err(SimError::NoPlan),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionType, Clean, Move};

    fn catalog() -> ActionCatalog {
        ActionCatalog::new(&[ActionType::Move, ActionType::Clean, ActionType::ExtraClean])
    }

    const SOLVER_OUTPUT: &str = "; No metric specified - using make-span\n\
\n\
; Plan found with metric 52.007\n\
; Time 0.07\n\
0.000: (move agent2 n1 rm1)  [1.000]\n\
1.000: (clean agent2 rm1)  [5.000]\n\
\n\
; Plan found with metric 11.000\n\
0.000: (move agent1 n1 n2)  [10.000]\n\
\n";

    #[test]
    fn test_plan_line_parser() {
        let (rest, line) = plan_line("7.001: (move agent2 n1 n2)  [10.000]").unwrap();
        assert!(rest.is_empty());
        assert_eq!(line.start, Decimal::new(7001, 3));
        assert_eq!(line.name, "move");
        assert_eq!(line.args, vec!["agent2", "n1", "n2"]);
        assert_eq!(line.duration, Decimal::from(10));
    }

    #[test]
    fn test_decode_complete_block() {
        let text = "0.000: (move agent1 n1 n2)  [10.000]\n1.000: (clean agent2 rm1)  [5.000]\n\n";
        let plan = decode_plan_block(text, &catalog()).unwrap();
        assert_eq!(
            plan,
            vec![
                Action::Move(Move::new(Decimal::ZERO, Decimal::from(10), "agent1", "n1", "n2")),
                Action::Clean(Clean::new(Decimal::ONE, Decimal::from(5), "agent2", "rm1")),
            ]
        );
    }

    #[test]
    fn test_block_without_terminator_is_incomplete() {
        let text = "0.000: (move agent1 n1 n2)  [10.000]\n";
        assert!(matches!(
            decode_plan_block(text, &catalog()),
            Err(SimError::IncompletePlan(_))
        ));
    }

    #[test]
    fn test_cut_off_line_is_incomplete() {
        let text = "0.000: (move agent1 n1 n2)  [10.000]\n1.000: (clean agent2";
        assert!(matches!(
            decode_plan_block(text, &catalog()),
            Err(SimError::IncompletePlan(_))
        ));
    }

    #[test]
    fn test_empty_input_is_incomplete() {
        assert!(matches!(
            decode_plan_block("", &catalog()),
            Err(SimError::IncompletePlan(_))
        ));
    }

    #[test]
    fn test_unknown_action_name_fails() {
        let text = "0.000: (fly agent1 n1 n2)  [10.000]\n\n";
        assert!(matches!(
            decode_plan_block(text, &catalog()),
            Err(SimError::PlanDecode(_))
        ));
    }

    #[test]
    fn test_anytime_output_keeps_last_complete_plan() {
        let plan = decode_plan_output(SOLVER_OUTPUT, &catalog(), false).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].type_name(), "Move");
        assert_eq!(plan[0].duration(), Decimal::from(10));
    }

    #[test]
    fn test_anytime_output_ignores_trailing_incomplete_plan() {
        let text = format!("{}0.000: (move agent2 n1 rm1)  [1.000]\n1.000: (cle", SOLVER_OUTPUT);
        let plan = decode_plan_output(&text, &catalog(), false).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].args(), vec!["agent1", "n1", "n2"]);
    }

    #[test]
    fn test_anytime_output_without_plan() {
        let result = decode_plan_output("; Problem unsolvable!\n", &catalog(), false);
        assert!(matches!(result, Err(SimError::NoPlan)));
    }

    #[test]
    fn test_first_plan_mode() {
        let plan = decode_plan_output(SOLVER_OUTPUT, &catalog(), true).unwrap();
        assert_eq!(plan.len(), 2);

        let cut = "0.000: (move agent2 n1 rm1)  [1.000]\n1.000: (cle";
        assert_eq!(decode_plan_output(cut, &catalog(), true).unwrap().len(), 1);

        assert!(decode_plan_output("", &catalog(), true).unwrap().is_empty());
    }
}
