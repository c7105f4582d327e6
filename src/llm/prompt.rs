use std::collections::BTreeMap;
use std::fmt::Write;

use crate::models::{ChatMessage, Chunk};

pub const MAX_QUESTION_LEN: usize = 2000;
pub const MAX_HISTORY_TURNS: usize = 10;

const CHATML_TOKENS: [&str; 3] = ["<|im_start|>", "<|im_end|>", "<|endoftext|>"];

/// Everything rendered into the question prompt.
pub struct PromptContext<'a> {
    pub repo_name: &'a str,
    pub repo_url: &'a str,
    pub file_type_counts: &'a BTreeMap<String, usize>,
    pub documents: &'a [Chunk],
    pub history: &'a [ChatMessage],
    pub question: &'a str,
}

/// Remove chat-template control tokens so user or repository text cannot
/// open a new turn.
pub fn sanitize_for_prompt(text: &str) -> String {
    let mut out = text.to_string();
    for token in CHATML_TOKENS {
        if out.contains(token) {
            out = out.replace(token, "");
        }
    }
    out
}

pub fn truncate_to_char_boundary(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    s.char_indices()
        .take_while(|(i, _)| *i < max_len)
        .map(|(_, c)| c)
        .collect()
}

/// Keep the last [`MAX_HISTORY_TURNS`] user/assistant turns, sanitized.
pub fn sanitize_history(history: Option<Vec<ChatMessage>>) -> Vec<ChatMessage> {
    let mut turns: Vec<ChatMessage> = history
        .unwrap_or_default()
        .into_iter()
        .filter(|m| m.role == "user" || m.role == "assistant")
        .map(|m| ChatMessage {
            role: m.role,
            content: sanitize_for_prompt(&truncate_to_char_boundary(
                &m.content,
                MAX_QUESTION_LEN,
            )),
        })
        .collect();
    let skip = turns.len().saturating_sub(MAX_HISTORY_TURNS);
    turns.drain(..skip);
    turns
}

pub fn build_prompt(ctx: &PromptContext<'_>) -> String {
    let mut prompt = String::from(
        "You are an expert code analyst assistant. You have access to the repository content and our conversation history.\n\n",
    );

    prompt.push_str("CONVERSATION HISTORY:\n");
    if ctx.history.is_empty() {
        prompt.push_str("(none)\n");
    } else {
        for turn in ctx.history {
            let _ = writeln!(prompt, "{}: {}", turn.role, sanitize_for_prompt(&turn.content));
        }
    }

    let _ = write!(
        prompt,
        "\nREPOSITORY: {}\nURL: {}\nFILE TYPES: {}\n\n",
        ctx.repo_name,
        ctx.repo_url,
        format_file_types(ctx.file_type_counts)
    );

    prompt.push_str("RELEVANT DOCUMENTS:\n");
    prompt.push_str(&format_documents(ctx.documents));

    let _ = write!(
        prompt,
        "\nUSER QUESTION: {}\n\n",
        sanitize_for_prompt(ctx.question)
    );

    prompt.push_str(
        "IMPORTANT INSTRUCTIONS:\n\
         - Base your answer ONLY on the documents provided above\n\
         - Only cite files that are explicitly shown in the RELEVANT DOCUMENTS section\n\
         - If a file is not in the documents above, do NOT mention it or claim information comes from it\n\
         - Be specific about which document number you're referencing when citing information\n\
         - If you don't have enough information in the provided documents, say so clearly\n\n\
         Please analyze the provided documents and conversation history to answer the question. \
         Cite specific files and code sections when relevant.",
    );
    prompt
}

/// `{"py": 3, "rs": 12}` style summary, sorted by extension.
fn format_file_types(counts: &BTreeMap<String, usize>) -> String {
    if counts.is_empty() {
        return "(none)".to_string();
    }
    let parts: Vec<String> = counts.iter().map(|(ext, n)| format!("{ext}: {n}")).collect();
    parts.join(", ")
}

fn format_documents(documents: &[Chunk]) -> String {
    if documents.is_empty() {
        return "(No relevant documents were found for this question.)\n".to_string();
    }
    let mut out = String::new();
    for (i, chunk) in documents.iter().enumerate() {
        let _ = write!(
            out,
            "Document {}: {}\n```\n{}\n```\n\n",
            i + 1,
            chunk.source_path,
            sanitize_for_prompt(&chunk.text)
        );
    }
    out
}
