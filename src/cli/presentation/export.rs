//! Markdown export of the written text.

use crate::store::{Block, Chapter, Project};

/// Render the project as Markdown: one heading per chapter, paragraphs in
/// block order. Chapters without text are listed with a placeholder.
pub fn render_markdown(project: &Project, chapters: &[(Chapter, Vec<Block>)]) -> String {
    let mut out = format!("# {}\n", project.title);
    for (chapter, blocks) in chapters {
        out.push_str(&format!("\n## {}. {}\n\n", chapter.position + 1, chapter.title));
        if blocks.is_empty() {
            out.push_str("_Not written yet._\n");
            continue;
        }
        let body = blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        out.push_str(&body);
        out.push('\n');
    }
    out
}
