//! Prompts and parsing for complexity triage and task decomposition.

/// Scratch prompt asking the model to split a task into steps.
pub(crate) fn decomposition_prompt(task_description: &str) -> String {
    format!(
        "Break down the following complex task into 5-10 short, actionable subtasks. \
         Provide the subtasks as a numbered list, one per line, in the order they should be done.\n\n\
         Task: {}\n\nSubtasks:",
        task_description
    )
}

/// Scratch prompt asking whether a query needs decomposing.
pub(crate) fn triage_prompt(query: &str) -> String {
    format!(
        "Analyze the following query and determine if it requires multiple steps or can be handled as a single task.\n\n\
         Query: {}\n\n\
         Is this a complex task that should be broken down? Answer with YES or NO, then briefly explain why.",
        query
    )
}

/// Whether a triage reply selects the complex path.
pub(crate) fn is_affirmative(reply: &str) -> bool {
    reply.to_uppercase().contains("YES")
}

/// Extract subtask descriptions from a model's list.
///
/// A line counts iff, once trimmed, it starts with a digit (everything up to
/// the first `.` is dropped) or a `-` bullet. Lines that are empty after
/// stripping are ignored.
pub fn parse_subtasks(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let first = line.chars().next()?;
            let body = if first.is_ascii_digit() {
                line.split_once('.').map_or(line, |(_, rest)| rest)
            } else {
                line.strip_prefix('-')?
            };
            let body = body.trim();
            (!body.is_empty()).then(|| body.to_string())
        })
        .collect()
}
