//! Scoring outputs against the logic tasks.
//!
//! Each output is checked against the inputs read before it was written,
//! at most the [`INPUT_WINDOW`] most recent. An output performs a task when
//! it equals the task's function of one of those inputs (NOT) or of an
//! ordered pair of distinct ones.

use orgscope_types::{LogicTask, TaskCount};

/// How many recent inputs an output may combine.
pub const INPUT_WINDOW: usize = 3;

/// Count, for every task, the outputs that performed it.
///
/// `inputs` and `outputs` are the machine's buffers, oldest first. Output
/// `k` may use inputs read before it, which with `IO` are `inputs[..k]`.
pub fn task_counts(inputs: &[i32], outputs: &[i32]) -> Vec<TaskCount> {
    LogicTask::ALL
        .into_iter()
        .map(|task| {
            let performed = outputs
                .iter()
                .enumerate()
                .filter(|&(k, &output)| performs(task, output, window(inputs, k)))
                .count();
            TaskCount {
                task,
                count: u32::try_from(performed).unwrap_or(u32::MAX),
            }
        })
        .collect()
}

/// Inputs available to output `k`.
fn window(inputs: &[i32], k: usize) -> &[i32] {
    let end = k.min(inputs.len());
    inputs
        .get(end.saturating_sub(INPUT_WINDOW)..end)
        .unwrap_or_default()
}

fn performs(task: LogicTask, output: i32, inputs: &[i32]) -> bool {
    if task.arity() == 1 {
        return inputs.iter().any(|&a| task.apply(a, 0) == output);
    }
    inputs.iter().enumerate().any(|(i, &a)| {
        inputs
            .iter()
            .enumerate()
            .any(|(j, &b)| i != j && task.apply(a, b) == output)
    })
}
