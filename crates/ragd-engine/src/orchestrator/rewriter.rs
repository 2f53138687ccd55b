//! Query rewriting prompt construction and free-text judge-score parsing
//! (§4.4, §4.4.1).

use crate::types::ChatTurn;

const FOLLOW_UP_MARKERS: &[&str] = &[
    "tell me more",
    "what else",
    "go on",
    "more about",
    "elaborate",
    "continue",
    "and then",
    "what about it",
    "summarise",
    "summarize",
];

/// Heuristic: does `question` read like a follow-up that depends on prior
/// turns rather than a self-contained query?
pub fn looks_like_follow_up(question: &str) -> bool {
    let lower = question.to_lowercase();
    if FOLLOW_UP_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    // Bare-pronoun reference with no other content noun.
    let bare_pronouns = ["it", "this", "that", "them", "those", "these"];
    let words: Vec<&str> = lower.split_whitespace().collect();
    words.len() <= 6 && words.iter().any(|w| bare_pronouns.contains(w))
}

/// Builds the rewrite prompt: last `history_turns` turns, the set of cited
/// filenames across them, and the follow-up question (§4.4 step 1).
pub fn build_rewrite_prompt(question: &str, history: &[ChatTurn], history_turns: usize) -> String {
    let recent = if history.len() > history_turns {
        &history[history.len() - history_turns..]
    } else {
        history
    };

    let mut cited_files: Vec<String> = Vec::new();
    let mut transcript = String::new();
    for turn in recent {
        transcript.push_str(&format!("{:?}: {}\n", turn.role, turn.content));
        for citation in &turn.citations {
            if !cited_files.contains(&citation.filename) {
                cited_files.push(citation.filename.clone());
            }
        }
    }

    let documents_cited = if cited_files.is_empty() {
        "none".to_string()
    } else {
        cited_files.join(", ")
    };

    format!(
        "Conversation so far:\n{transcript}\nDocuments cited: {documents_cited}\n\n\
         Follow-up question: \"{question}\"\n\n\
         Rewrite the follow-up as a single self-contained search query that \
         preserves the original topic. Reply with only the rewritten query."
    )
}

/// Extracts the first decimal number in `reply`, clamped to `[0, 1]`.
/// Falls back to `default_score` when no number is found (§4.4.1).
pub fn parse_score(reply: &str, default_score: f32) -> f32 {
    let mut chars = reply.char_indices().peekable();
    while let Some((i, c)) = chars.peek().copied() {
        if c.is_ascii_digit() || (c == '.' && i + 1 < reply.len()) {
            let rest = &reply[i..];
            let end = rest
                .char_indices()
                .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
                .last()
                .map(|(idx, c)| idx + c.len_utf8())
                .unwrap_or(0);
            if end > 0 {
                if let Ok(value) = rest[..end].parse::<f32>() {
                    return value.clamp(0.0, 1.0);
                }
            }
        }
        chars.next();
    }
    default_score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_explicit_follow_up_markers() {
        assert!(looks_like_follow_up("tell me more about it"));
        assert!(looks_like_follow_up("what else do you know"));
    }

    #[test]
    fn detects_bare_pronoun_reference() {
        assert!(looks_like_follow_up("summarize that"));
        assert!(!looks_like_follow_up("what is the capital of France"));
    }

    #[test]
    fn parses_leading_number() {
        assert_eq!(parse_score("Relevance: 0.73 out of 1", 0.5), 0.73);
        assert_eq!(parse_score("no number here", 0.5), 0.5);
        assert_eq!(parse_score("score is 1.5", 0.5), 1.0);
    }
}
