/// Phrases that signal the caller wants to hang up.
pub const GOODBYE_PHRASES: &[&str] = &[
    "goodbye",
    "bye",
    "bye bye",
    "good bye",
    "thank you",
    "thanks",
    "that's all",
    "that is all",
    "nothing else",
    "i'm done",
    "im done",
    "done",
    "hang up",
    "end call",
];

/// Case-insensitive substring match against [`GOODBYE_PHRASES`].
pub fn is_goodbye(utterance: &str) -> bool {
    let lower = utterance.trim().to_lowercase();
    GOODBYE_PHRASES.iter().any(|phrase| lower.contains(phrase))
}
