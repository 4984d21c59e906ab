// ABOUTME: Renders a run's step log into model messages and trims the oldest
// ABOUTME: rounds to fit a character budget, never dropping the latest round.

use crate::model::{ContentBlock, Decision, Message};

use super::{Step, StepPayload};

/// Build the history sent to the model: the task, then one message group per
/// round. When the groups exceed `budget` characters the oldest are replaced by
/// a single marker message; the task and the most recent round always survive.
pub fn build_history(task: &str, steps: &[Step], budget: usize) -> Vec<Message> {
    let mut rounds: Vec<(usize, Vec<Message>)> = Vec::new();
    let mut current_round = None;

    for step in steps {
        if current_round != Some(step.round) {
            rounds.push((0, Vec::new()));
            current_round = Some(step.round);
        }
        let Some((count, messages)) = rounds.last_mut() else {
            continue;
        };
        *count += 1;
        if let Some(message) = render(step) {
            messages.push(message);
        }
    }

    let size = |group: &[Message]| group.iter().map(Message::char_len).sum::<usize>();
    let mut total: usize = rounds.iter().map(|(_, group)| size(group)).sum();

    let mut omitted_steps = 0;
    let mut first_kept = 0;
    while total > budget && first_kept + 1 < rounds.len() {
        let (count, group) = &rounds[first_kept];
        total -= size(group);
        omitted_steps += count;
        first_kept += 1;
    }

    let mut history = vec![Message::user(task)];
    if omitted_steps > 0 {
        history.push(Message::user(format!(
            "[{} earlier steps omitted]",
            omitted_steps
        )));
    }
    history.extend(rounds.into_iter().skip(first_kept).flat_map(|(_, group)| group));
    history
}

fn render(step: &Step) -> Option<Message> {
    match &step.payload {
        StepPayload::ModelDecision {
            decision: Decision::ToolCall { id, name, args },
        } => Some(Message::tool_call(id, name, args.clone())),
        StepPayload::ModelDecision {
            decision: Decision::FinalAnswer { text },
        } => Some(Message::assistant(text)),
        // Already represented by the decision that requested it.
        StepPayload::ToolCall { .. } => None,
        StepPayload::ToolResult {
            call_id, result, ..
        } => {
            let block = if result.is_error {
                ContentBlock::tool_error(call_id, &result.content)
            } else {
                ContentBlock::tool_result(call_id, &result.content)
            };
            Some(Message::tool_results(vec![block]))
        }
        StepPayload::Error {
            message,
            call_id: Some(call_id),
            ..
        } => Some(Message::tool_results(vec![ContentBlock::tool_error(
            call_id, message,
        )])),
        StepPayload::Error { call_id: None, .. } => None,
    }
}
