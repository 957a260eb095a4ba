//! PDDL problem encoding
//!
//! Objects become typed PDDL objects. Facts become init predicates or
//! numeric fluents, known future events become timed initial literals, and
//! goals become a conjunction.

use std::fmt::{self, Write};

use rust_decimal::Decimal;

use super::PlanRequest;
use crate::core::error::{Result, SimError};
use crate::model::{split_edge_id, Event, EventKind, Fact, Model, WorldObject};

/// Render a request as a PDDL problem
pub fn encode_problem(request: &PlanRequest) -> Result<String> {
    let mut out = String::new();
    write_problem(&mut out, request)
        .map_err(|e| SimError::Planner(format!("cannot encode problem: {}", e)))?;
    Ok(out)
}

fn write_problem(out: &mut String, request: &PlanRequest) -> fmt::Result {
    let model = request.model;
    writeln!(
        out,
        "(define (problem {}-problem) (:domain {})",
        request.agent.unwrap_or("all"),
        model.domain
    )?;

    write_objects(out, model)?;

    writeln!(out, "(:init")?;
    writeln!(out, "    ; objects")?;
    for objects in model.objects.values() {
        for (id, object) in objects {
            write_object_facts(out, model, &[id.as_str()], object)?;
        }
    }
    writeln!(out, "    ; events")?;
    for event in request.events {
        if !event.hidden && event.time >= request.origin {
            write_event(out, model, event, event.time - request.origin)?;
        }
    }
    writeln!(out, "    ; graph")?;
    for (id, edge) in &model.graph.edges {
        if let Some((start, end)) = split_edge_id(id) {
            write_object_facts(out, model, &[start, end], edge)?;
            if model.graph.bidirectional {
                write_object_facts(out, model, &[end, start], edge)?;
            }
        }
    }
    writeln!(out, ")")?;

    write!(out, "(:goal (and")?;
    for goal in request.goals {
        write!(out, " ({})", goal.predicate.join(" "))?;
    }
    writeln!(out, "))")?;

    if let Some(metric) = request.metric {
        writeln!(
            out,
            "(:metric {} ({}))",
            metric.direction,
            metric.predicate.join(" ")
        )?;
    }
    writeln!(out, ")")
}

fn write_objects(out: &mut String, model: &Model) -> fmt::Result {
    writeln!(out, "(:objects")?;
    for (kind, objects) in &model.objects {
        if objects.is_empty() {
            continue;
        }
        let ids: Vec<&str> = objects.keys().map(String::as_str).collect();
        writeln!(out, "    {} - {}", ids.join(" "), kind)?;
    }
    writeln!(out, ")")
}

fn write_object_facts(
    out: &mut String,
    model: &Model,
    subject: &[&str],
    object: &WorldObject,
) -> fmt::Result {
    for (name, fact) in &object.known {
        write_fact(out, name, subject, fact)?;
    }
    for (name, unknown) in &object.unknown {
        if let Some(fact) = unknown.assumed_value(model.assumed_values.get(name)) {
            write_fact(out, name, subject, &fact)?;
        }
    }
    Ok(())
}

/// Terms of a predicate, `true` standing for the subject
///
/// Returns the terms and the trailing numeric value if there is one.
fn terms(subject: &[&str], fact: &Fact) -> Option<(Vec<String>, Option<Decimal>)> {
    let subject_terms = || subject.iter().map(|s| s.to_string());
    match fact {
        Fact::Bool(true) => Some((subject_terms().collect(), None)),
        Fact::Bool(false) => None,
        Fact::Number(n) => Some((subject_terms().collect(), Some(*n))),
        Fact::Name(value) => Some((subject_terms().chain([value.clone()]).collect(), None)),
        Fact::List(items) => {
            let (value, items) = match items.split_last() {
                Some((Fact::Number(n), rest)) => (Some(*n), rest),
                _ => (None, items.as_slice()),
            };
            let mut list = Vec::new();
            for item in items {
                match item {
                    Fact::Bool(true) => list.extend(subject_terms()),
                    Fact::Bool(false) => return None,
                    Fact::Name(s) => list.push(s.clone()),
                    Fact::Number(n) => list.push(n.normalize().to_string()),
                    Fact::List(_) => return None,
                }
            }
            Some((list, value))
        }
    }
}

fn write_fact(out: &mut String, name: &str, subject: &[&str], fact: &Fact) -> fmt::Result {
    match terms(subject, fact) {
        Some((terms, None)) => writeln!(out, "    ({} {})", name, terms.join(" ")),
        Some((terms, Some(value))) => {
            writeln!(out, "    (= ({} {}) {})", name, terms.join(" "), value.normalize())
        }
        None => Ok(()),
    }
}

/// Current known value of `name` on the event's target, used to negate a fact
fn current_value<'a>(model: &'a Model, event: &Event, name: &str) -> Option<&'a Fact> {
    let target = match event.kind {
        EventKind::Object => model.find_object(&event.id),
        EventKind::Edge => model.graph.edges.get(&event.id),
    };
    target.and_then(|t| t.get(name))
}

fn write_event(out: &mut String, model: &Model, event: &Event, at: Decimal) -> fmt::Result {
    let subjects: Vec<Vec<&str>> = match event.kind {
        EventKind::Object => vec![vec![event.id.as_str()]],
        EventKind::Edge => match split_edge_id(&event.id) {
            Some((start, end)) if model.graph.bidirectional => {
                vec![vec![start, end], vec![end, start]]
            }
            Some((start, end)) => vec![vec![start, end]],
            None => Vec::new(),
        },
    };
    let at = at.normalize();

    for predicate in &event.predicates {
        for subject in &subjects {
            if predicate.becomes == Fact::Bool(false) {
                let previous = predicate
                    .was
                    .as_ref()
                    .or_else(|| current_value(model, event, &predicate.name))
                    .filter(|f| !matches!(f, Fact::Bool(false)))
                    .cloned()
                    .unwrap_or(Fact::Bool(true));
                if let Some((terms, None)) = terms(subject, &previous) {
                    writeln!(
                        out,
                        "    (at {} (not ({} {})))",
                        at,
                        predicate.name,
                        terms.join(" ")
                    )?;
                }
                continue;
            }
            match terms(subject, &predicate.becomes) {
                Some((terms, None)) => writeln!(
                    out,
                    "    (at {} ({} {}))",
                    at,
                    predicate.name,
                    terms.join(" ")
                )?,
                Some((terms, Some(value))) => writeln!(
                    out,
                    "    (at {} (= ({} {}) {}))",
                    at,
                    predicate.name,
                    terms.join(" "),
                    value.normalize()
                )?,
                None => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::Goal;
    use crate::core::types::Deadline;
    use crate::model::{Graph, Metric, UnknownFact};

    fn model() -> Model {
        let mut model = Model::new("janitor")
            .with_object(
                "agent",
                "agent1",
                WorldObject::new().with_fact("at", Fact::located("rm1")),
            )
            .with_object(
                "room",
                "rm1",
                WorldObject::new()
                    .with_fact("dirty", true)
                    .with_fact("dirtiness", Decimal::from(5))
                    .with_unknown("extra-dirty", UnknownFact::new(true)),
            )
            .with_object("room", "rm2", WorldObject::new().with_fact("cleaned", false));
        model.graph = Graph::new().with_edge("rm1", "rm2", Decimal::from(3));
        model.graph.bidirectional = true;
        model.assumed_values.insert("extra-dirty".into(), Fact::Bool(false));
        model
    }

    fn request<'a>(
        model: &'a Model,
        goals: &'a [Goal],
        events: &'a [Event],
        metric: Option<&'a Metric>,
    ) -> PlanRequest<'a> {
        PlanRequest {
            model,
            agent: Some("agent1"),
            goals,
            metric,
            planning_time: Decimal::from(10),
            origin: Decimal::from(4),
            events,
        }
    }

    #[test]
    fn test_objects_grouped_by_kind() {
        let model = model();
        let text = encode_problem(&request(&model, &[], &[], None)).unwrap();
        assert!(text.contains("(:objects\n    agent1 - agent\n    rm1 rm2 - room\n)"));
    }

    #[test]
    fn test_fact_encoding() {
        let model = model();
        let text = encode_problem(&request(&model, &[], &[], None)).unwrap();
        assert!(text.contains("    (at agent1 rm1)\n"));
        assert!(text.contains("    (dirty rm1)\n"));
        assert!(text.contains("    (= (dirtiness rm1) 5)\n"));
        assert!(!text.contains("cleaned"));
        // Unknown facts show their assumed value
        assert!(!text.contains("extra-dirty"));
    }

    #[test]
    fn test_graph_encoded_both_ways() {
        let model = model();
        let text = encode_problem(&request(&model, &[], &[], None)).unwrap();
        assert!(text.contains("    (edge rm1 rm2)\n"));
        assert!(text.contains("    (edge rm2 rm1)\n"));
        assert!(text.contains("    (= (distance rm2 rm1) 3)\n"));
    }

    #[test]
    fn test_goal_and_metric() {
        let model = model();
        let goals = vec![Goal::new(vec!["cleaned".into(), "rm2".into()], Deadline::Never)];
        let metric = Metric::default();
        let text = encode_problem(&request(&model, &goals, &[], Some(&metric))).unwrap();
        assert!(text.contains("(:goal (and (cleaned rm2)))"));
        assert!(text.contains("(:metric minimize (total-time))"));
        assert!(text.starts_with("(define (problem agent1-problem) (:domain janitor)"));
    }

    #[test]
    fn test_timed_initial_literals_relative_to_origin() {
        let model = model();
        let events = vec![
            Event::new(Decimal::from(9), EventKind::Object, "rm2").with_predicate("dirty", true),
            Event::new(Decimal::from(6), EventKind::Object, "rm1").with_predicate("dirty", false),
            Event::new(Decimal::from(2), EventKind::Object, "rm2").with_predicate("dirty", true),
            Event::new(Decimal::from(7), EventKind::Object, "rm2")
                .with_predicate("dirty", true)
                .hidden(),
        ];
        let text = encode_problem(&request(&model, &[], &events, None)).unwrap();
        assert!(text.contains("    (at 5 (dirty rm2))\n"));
        assert!(text.contains("    (at 2 (not (dirty rm1)))\n"));
        assert!(!text.contains("(at -2"));
        assert!(!text.contains("(at 3 "));
    }

    #[test]
    fn test_edge_event_written_in_both_directions() {
        let model = model();
        let events = vec![Event::edge_cleared(Decimal::from(4), "rm1", "rm2")];
        let text = encode_problem(&request(&model, &[], &events, None)).unwrap();
        assert!(text.contains("    (at 0 (edge rm1 rm2))\n"));
        assert!(text.contains("    (at 0 (edge rm2 rm1))\n"));
        assert!(text.contains("    (at 0 (not (blocked-edge rm2 rm1)))\n"));
    }
}
