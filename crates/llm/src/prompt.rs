//! Prompt text sent to generative services.

use std::fmt::Write as _;

use pipeline::BacklogPrompt;

const INSTRUCTIONS: &str = "\
You are a senior product and engineering planner.
Given the project description, produce a concise backlog.

Answer with a single JSON object and nothing else. No prose, no code fences.
The object must have this shape:

{
  \"projectName\": string (optional),
  \"tasks\": [
    {
      \"title\": string (required, short),
      \"description\": string (optional),
      \"type\": \"Story\" | \"Task\" | \"Bug\" (optional, defaults to Task),
      \"priority\": \"Highest\" | \"High\" | \"Medium\" | \"Low\" | \"Lowest\" (optional),
      \"labels\": [string] (optional),
      \"storyPoints\": number >= 0 (optional),
      \"acceptanceCriteria\": [string] (optional, Given/When/Then)
    }
  ]
}

Enum values are case-sensitive. Omit a field rather than inventing a value.";

/// Renders the full prompt text.
///
/// A re-prompt lists the violations of the previous answer so the service
/// can correct them.
pub fn render_prompt(prompt: &BacklogPrompt) -> String {
    let mut text = String::from(INSTRUCTIONS);
    text.push_str("\n\nProject description:\n```\n");
    text.push_str(prompt.description.trim());
    text.push_str("\n```");

    if !prompt.previous_violations.is_empty() {
        text.push_str("\n\nYour previous answer was rejected. Fix these problems:\n");
        for violation in &prompt.previous_violations {
            let _ = writeln!(text, "- {violation}");
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use pipeline::FieldViolation;

    use super::*;

    #[test]
    fn first_prompt_embeds_the_description() {
        let text = render_prompt(&BacklogPrompt::new("  A todo app  "));
        assert!(text.contains("```\nA todo app\n```"));
        assert!(text.contains("\"tasks\""));
        assert!(!text.contains("previous answer"));
    }

    #[test]
    fn reprompt_lists_violations() {
        let prompt = BacklogPrompt::new("A todo app").with_violations(vec![FieldViolation {
            field: "tasks[0].priority".into(),
            reason: "must be one of Highest, High, Medium, Low, Lowest".into(),
        }]);
        let text = render_prompt(&prompt);
        assert!(text.contains("previous answer was rejected"));
        assert!(text.contains("- tasks[0].priority: must be one of"));
    }
}
