//! LLM prompts for the extraction stage.

/// System prompt for job field extraction.
pub const EXTRACT_SYSTEM_PROMPT: &str = "You extract structured fields from job postings \
shared in messaging channels. Answer with a single JSON object and nothing else.";

/// Prompt for extracting job fields from one message.
pub const EXTRACT_JOB_PROMPT: &str = r#"Extract the job details from this message.

Use null for anything the message does not state. Do not guess.

Fields:
- company: hiring company name
- role: position or role title
- experience: experience requirement as written ("fresher", "0-1 years", "2 years")
- location: work location, or "remote"
- skills: required skills in the order they appear
- salary: salary, CTC or stipend text
- links: application links or emails

Output JSON:
{
    "company": "string or null",
    "role": "string or null",
    "experience": "string or null",
    "location": "string or null",
    "skills": ["skill", ...],
    "salary": "string or null",
    "links": ["url", ...]
}

Message:
{message}"#;

/// Messages longer than this are cut before they reach the model.
pub const MAX_PROMPT_MESSAGE_CHARS: usize = 4_000;

/// Format the extraction prompt for a message body.
pub fn format_extract_prompt(message: &str) -> String {
    let message = match message.char_indices().nth(MAX_PROMPT_MESSAGE_CHARS) {
        Some((idx, _)) => &message[..idx],
        None => message,
    };
    EXTRACT_JOB_PROMPT.replace("{message}", message)
}
