//! Prompt construction for the chat-completions client.

use super::chat::ChatMessage;
use super::{ContentRequest, OutlineRequest, SummaryRequest};
use crate::store::ContentKind;
use std::fmt::Write as _;

fn document_noun(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Fiction => "novel",
        ContentKind::NonFiction => "book",
    }
}

pub fn outline_messages(request: &OutlineRequest) -> Vec<ChatMessage> {
    let unit = request.kind.unit_label();
    let system = format!(
        "You plan chapters of a {noun}. Reply with a JSON array only. Each element is an \
         object with \"title\", \"description\" and \"target_words\" describing one {unit}, \
         in reading order.",
        noun = document_noun(request.kind),
    );

    let mut user = String::new();
    let _ = writeln!(user, "Title: {}", request.project_title);
    let _ = writeln!(user, "Premise: {}", request.premise);
    let _ = writeln!(
        user,
        "Chapter {}: {}",
        request.chapter_number, request.chapter_title
    );
    if let Some(synopsis) = &request.chapter_synopsis {
        let _ = writeln!(user, "Chapter synopsis: {}", synopsis);
    }
    if !request.prior_chapters_summary.is_empty() {
        let _ = writeln!(user, "\nEarlier chapters:\n{}", request.prior_chapters_summary);
    }
    match &request.next_chapter_title {
        Some(next) => {
            let _ = writeln!(user, "\nThe following chapter is \"{}\"; end so it leads there.", next);
        }
        None => {
            let _ = writeln!(user, "\nThis is the final chapter.");
        }
    }
    let _ = write!(
        user,
        "\nBreak this chapter into {unit}s totalling about {} words.",
        request.target_words
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn content_messages(request: &ContentRequest) -> Vec<ChatMessage> {
    let unit = request.kind.unit_label();
    let system = format!(
        "You are writing a {noun} titled \"{title}\". Premise: {premise}\n\
         Write only the prose of the requested {unit}. Separate paragraphs with a blank line. \
         No headings, no commentary.",
        noun = document_noun(request.kind),
        title = request.project_title,
        premise = request.premise,
    );

    let mut user = String::new();
    let _ = writeln!(
        user,
        "Chapter {}: {}",
        request.chapter_number, request.chapter_title
    );
    let _ = writeln!(
        user,
        "{} {} of {}: {}",
        capitalize(unit),
        request.unit.seq,
        request.unit_count,
        request.unit.title
    );
    if !request.unit.description.is_empty() {
        let _ = writeln!(user, "What happens: {}", request.unit.description);
    }
    let _ = writeln!(user, "Length: about {} words.", request.unit.target_words);

    if !request.character_hints.is_empty() {
        let _ = writeln!(user, "\nWhat characters have done so far:");
        for hint in &request.character_hints {
            let _ = writeln!(user, "- {}: {}", hint.name, hint.recent_actions.join("; "));
        }
    }
    if !request.prior_prose.is_empty() {
        let _ = write!(
            user,
            "\nThe text so far ends with:\n\"\"\"\n{}\n\"\"\"\nContinue from there.",
            request.prior_prose
        );
    }

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn summary_messages(request: &SummaryRequest) -> Vec<ChatMessage> {
    let system = "Summarize the chapter you are given. Reply with a JSON object only: \
                  {\"summary\": string, \"characters\": [{\"name\": string, \"actions\": [string]}]}. \
                  List what each named character did in this chapter, in order."
        .to_string();
    let user = format!("Chapter: {}\n\n{}", request.chapter_title, request.text);
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
