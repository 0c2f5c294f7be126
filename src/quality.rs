//! Content-quality heuristic used to decide content retries.

/// Responses at least this long are never judged as refusals.
const SHORT_RESPONSE_CHARS: usize = 200;

const REFUSAL_PHRASES: &[&str] = &[
    "i cannot assist",
    "i can't assist",
    "i cannot help",
    "i can't help",
    "i am unable to",
    "i'm unable to",
    "i am not able to",
    "i'm not able to",
    "as an ai",
    "i apologize, but",
    "i'm sorry, but",
];

/// True when a completed response looks unusable: empty, or a short refusal.
pub fn is_unsatisfactory(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }
    if trimmed.chars().count() >= SHORT_RESPONSE_CHARS {
        return false;
    }
    let lower = trimmed.to_lowercase();
    REFUSAL_PHRASES.iter().any(|p| lower.contains(p))
}
