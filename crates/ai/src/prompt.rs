//! Prompt construction and reply post-processing shared by remote backends.

use std::fmt::Write as _;

use scrumai_standups::Standup;

use crate::result::{AiError, ParsedStandup};

pub const INSIGHT_SYSTEM_PROMPT: &str = "You are an expert Scrum Master and Agile Coach. \
Your goal is to analyze daily standups and provide actionable insights, identify blockers, \
and suggest efficiency improvements.";

pub const TRANSCRIPT_SYSTEM_PROMPT: &str = "You are a helpful assistant that extracts structured \
data from standup transcripts. You always output valid JSON.";

/// Sectioned prompt used by full chat models.
pub fn detailed_insight_prompt(standup: &Standup) -> String {
    let mut out = String::from("Please analyze the following daily standup submission:\n\n");

    section(&mut out, "Completed Tasks", &standup.completed);
    section(&mut out, "In Progress Tasks", &standup.in_progress);
    section(&mut out, "Planned Tasks", &standup.planned);
    section(&mut out, "Blockers", &standup.blockers);

    if !standup.notes.trim().is_empty() {
        let _ = writeln!(out, "### Notes:\n{}\n", standup.notes.trim());
    }

    out.push_str(
        "### Requirements:\n\
         1. Provide a concise summary of the progress.\n\
         2. Specifically call out any critical blockers or risks to the sprint goal.\n\
         3. Suggest a potential improvement or question for the team if any inefficiency is \
         spotted (e.g., too many in-progress tasks, vague descriptions).\n\
         4. Keep the tone professional but encouraging.",
    );
    out
}

/// One line per list, for small instruction-tuned models.
pub fn compact_insight_prompt(standup: &Standup) -> String {
    let mut out = String::from(
        "You are a Scrum Master. Analyze this standup and provide a concise summary, \
         call out blockers, and suggest an improvement:\n\n",
    );
    let _ = writeln!(out, "Completed: {}", standup.completed.join(", "));
    let _ = writeln!(out, "In Progress: {}", standup.in_progress.join(", "));
    let _ = writeln!(out, "Planned: {}", standup.planned.join(", "));
    let _ = writeln!(out, "Blockers: {}", standup.blockers.join(", "));
    if !standup.notes.trim().is_empty() {
        let _ = writeln!(out, "Notes: {}", standup.notes.trim());
    }
    out
}

pub fn transcript_prompt(raw: &str) -> String {
    format!(
        "Analyze the following standup transcript and extract the tasks into specific categories. \
Return ONLY a valid JSON object with the following structure:
{{
  \"completed_tasks\": [\"task 1\", \"task 2\"],
  \"in_progress_tasks\": [\"task 3\"],
  \"planned_tasks\": [\"task 4\"],
  \"blockers\": [\"blocker 1\"],
  \"notes\": \"any additional general notes\"
}}

Transcript:
{raw}"
    )
}

/// The outermost `{ ... }` span of a model reply, if any.
pub fn extract_json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

/// Parse a model reply into task lists, tolerating prose around the JSON.
pub fn parse_structured_reply(reply: &str) -> Result<ParsedStandup, AiError> {
    let json = extract_json_object(reply).ok_or_else(|| {
        AiError::InvalidResponse(format!("no JSON object in reply: {}", truncate(reply, 200)))
    })?;
    serde_json::from_str(json)
        .map_err(|e| AiError::InvalidResponse(format!("reply JSON does not match schema: {e}")))
}

fn section(out: &mut String, title: &str, items: &[String]) {
    let _ = writeln!(out, "### {title}:");
    for item in items {
        let _ = writeln!(out, "- {item}");
    }
    out.push('\n');
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
