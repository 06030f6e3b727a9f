//! Queue of pending model events, grouped by time.

use std::collections::VecDeque;

use crate::model::{EventAction, ModelEvent, Substitutions};

/// Events that fire at the same time.
#[derive(Debug, Clone, PartialEq)]
pub struct SimEvent {
    pub time: f64,
    /// `ModelEvent` ids, in model order
    pub ids: Vec<String>,
}

impl SimEvent {
    pub fn is_sentinel(&self) -> bool {
        self.time == f64::INFINITY
    }
}

/// Build the pending event queue for a simulation currently at `current_time`.
///
/// Parameter events before `current_time` have already happened; their
/// values go into `substitutions`. Species events before `current_time` are
/// already reflected in the recorded concentrations and are dropped. The
/// queue always ends with a sentinel at +∞.
pub(crate) fn init_events(
    events: &[ModelEvent],
    current_time: f64,
    substitutions: &mut Substitutions,
) -> VecDeque<SimEvent> {
    let mut sorted: Vec<&ModelEvent> = events.iter().collect();
    sorted.sort_by(|a, b| a.time.total_cmp(&b.time));

    let mut queue: VecDeque<SimEvent> = VecDeque::new();
    for event in sorted {
        if event.time < current_time {
            if let EventAction::SetParameter { parameter, value } = &event.action {
                log::debug!("past event '{}': {} = {}", event.id, parameter, value);
                substitutions.insert(parameter.clone(), *value);
            }
            continue;
        }
        match queue.back_mut() {
            Some(last) if last.time == event.time => last.ids.push(event.id.clone()),
            _ => queue.push_back(SimEvent {
                time: event.time,
                ids: vec![event.id.clone()],
            }),
        }
    }
    queue.push_back(SimEvent {
        time: f64::INFINITY,
        ids: Vec::new(),
    });
    queue
}
