//! Baseline-vs-current delta computation for the cross-session additive
//! merge protocol (spec §4.7): each save computes `delta = current -
//! baseline` for counters and `max(new, baseline)` for timestamps, so two
//! concurrent sessions' deltas are commutative and additive.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::knowledge_graph::CommandKnowledge;
use crate::sequence::NgramEntry;
use crate::workflow::WorkflowTransition;

#[derive(Debug, Clone)]
pub struct CommandRowDelta {
    pub command: String,
    pub usage_count_delta: i64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ArgumentRowDelta {
    pub command: String,
    pub argument: String,
    pub usage_count_delta: i64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub is_flag: bool,
}

#[derive(Debug, Clone)]
pub struct FlagComboRowDelta {
    pub command: String,
    pub flags_key: String,
    pub usage_count_delta: i64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SequenceRowDelta {
    pub command: String,
    pub first_argument: String,
    pub second_argument: String,
    pub usage_count_delta: i64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ParameterValueRowDelta {
    pub command: String,
    pub parameter: String,
    pub value: String,
    pub usage_count_delta: i64,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CoOccurrenceRowDelta {
    pub command: String,
    pub arg_a: String,
    pub arg_b: String,
    pub usage_count_delta: i64,
}

#[derive(Debug, Clone)]
pub struct WorkflowRowDelta {
    pub from_command: String,
    pub to_command: String,
    pub frequency_delta: i64,
    pub total_time_delta_ms_delta: i64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NgramRowDelta {
    pub prev_command: String,
    pub next_command: String,
    pub frequency_delta: i64,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct KnowledgeGraphDeltas {
    pub commands: Vec<CommandRowDelta>,
    pub arguments: Vec<ArgumentRowDelta>,
    pub flag_combinations: Vec<FlagComboRowDelta>,
    pub argument_sequences: Vec<SequenceRowDelta>,
    pub parameter_values: Vec<ParameterValueRowDelta>,
    pub co_occurrences: Vec<CoOccurrenceRowDelta>,
}

pub fn diff_knowledge_graph(
    baseline: &HashMap<String, CommandKnowledge>,
    current: &HashMap<String, CommandKnowledge>,
) -> KnowledgeGraphDeltas {
    let mut deltas = KnowledgeGraphDeltas::default();

    for (key, cur) in current {
        let base = baseline.get(key);
        let count_delta = cur.total_usage_count as i64 - base.map(|b| b.total_usage_count as i64).unwrap_or(0);
        if count_delta != 0 {
            deltas.commands.push(CommandRowDelta {
                command: cur.command.clone(),
                usage_count_delta: count_delta,
                first_seen: cur.first_seen,
                last_used: cur.last_used,
            });
        }

        for (arg_key, arg) in &cur.arguments {
            let base_arg = base.and_then(|b| b.arguments.get(arg_key));
            let delta = arg.usage_count as i64 - base_arg.map(|b| b.usage_count as i64).unwrap_or(0);
            if delta != 0 {
                deltas.arguments.push(ArgumentRowDelta {
                    command: cur.command.clone(),
                    argument: arg.argument.clone(),
                    usage_count_delta: delta,
                    first_seen: arg.first_seen,
                    last_used: arg.last_used,
                    is_flag: arg.is_flag,
                });
            }
        }

        for (flags, combo) in &cur.flag_combinations {
            let base_combo = base.and_then(|b| b.flag_combinations.get(flags));
            let delta = combo.usage_count as i64 - base_combo.map(|b| b.usage_count as i64).unwrap_or(0);
            if delta != 0 {
                deltas.flag_combinations.push(FlagComboRowDelta {
                    command: cur.command.clone(),
                    flags_key: flags.join(","),
                    usage_count_delta: delta,
                    first_seen: combo.first_seen,
                    last_used: combo.last_used,
                });
            }
        }

        for (seq_key, seq) in &cur.argument_sequences {
            let base_seq = base.and_then(|b| b.argument_sequences.get(seq_key));
            let delta = seq.usage_count as i64 - base_seq.map(|b| b.usage_count as i64).unwrap_or(0);
            if delta != 0 {
                deltas.argument_sequences.push(SequenceRowDelta {
                    command: cur.command.clone(),
                    first_argument: seq.first.clone(),
                    second_argument: seq.second.clone(),
                    usage_count_delta: delta,
                    first_seen: seq.first_seen,
                    last_used: seq.last_used,
                });
            }
        }

        for (pair_key, pair) in &cur.co_occurrences {
            let base_pair = base.and_then(|b| b.co_occurrences.get(pair_key));
            let delta = pair.usage_count as i64 - base_pair.map(|b| b.usage_count as i64).unwrap_or(0);
            if delta != 0 {
                deltas.co_occurrences.push(CoOccurrenceRowDelta {
                    command: cur.command.clone(),
                    arg_a: pair.arg_a.clone(),
                    arg_b: pair.arg_b.clone(),
                    usage_count_delta: delta,
                });
            }
        }

        for (param, values) in &cur.parameter_values {
            let base_values = base.and_then(|b| b.parameter_values.get(param));
            for value in values {
                let base_value = base_values.and_then(|vs| vs.iter().find(|v| v.value == value.value));
                let delta = value.usage_count as i64 - base_value.map(|b| b.usage_count as i64).unwrap_or(0);
                if delta != 0 {
                    deltas.parameter_values.push(ParameterValueRowDelta {
                        command: cur.command.clone(),
                        parameter: param.clone(),
                        value: value.value.clone(),
                        usage_count_delta: delta,
                        last_used: value.last_used,
                    });
                }
            }
        }
    }

    deltas
}

pub fn diff_workflow(
    baseline: &HashMap<String, HashMap<String, WorkflowTransition>>,
    current: &HashMap<String, HashMap<String, WorkflowTransition>>,
) -> Vec<WorkflowRowDelta> {
    let mut out = Vec::new();
    for (from, outgoing) in current {
        let base_outgoing = baseline.get(from);
        for (to, transition) in outgoing {
            let base_transition = base_outgoing.and_then(|o| o.get(to));
            let freq_delta =
                transition.frequency as i64 - base_transition.map(|b| b.frequency as i64).unwrap_or(0);
            let time_delta = transition.total_time_delta_ms as i64
                - base_transition.map(|b| b.total_time_delta_ms as i64).unwrap_or(0);
            if freq_delta != 0 || time_delta != 0 {
                out.push(WorkflowRowDelta {
                    from_command: from.clone(),
                    to_command: to.clone(),
                    frequency_delta: freq_delta,
                    total_time_delta_ms_delta: time_delta,
                    first_seen: transition.first_seen,
                    last_used: transition.last_used,
                });
            }
        }
    }
    out
}

pub fn diff_sequence(
    baseline: &HashMap<String, HashMap<String, NgramEntry>>,
    current: &HashMap<String, HashMap<String, NgramEntry>>,
) -> Vec<NgramRowDelta> {
    let mut out = Vec::new();
    for (prev, candidates) in current {
        let base_candidates = baseline.get(prev);
        for (next, entry) in candidates {
            let base_entry = base_candidates.and_then(|c| c.get(next));
            let delta = entry.frequency as i64 - base_entry.map(|b| b.frequency as i64).unwrap_or(0);
            if delta != 0 {
                out.push(NgramRowDelta {
                    prev_command: prev.clone(),
                    next_command: next.clone(),
                    frequency_delta: delta,
                    last_seen: entry.last_seen,
                });
            }
        }
    }
    out
}
