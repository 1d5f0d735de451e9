//! Plain-text rendering of a research answer

use crate::pipeline::ResearchAnswer;
use paperscout_common::models::DocumentRecord;
use reqwest::Url;
use std::fmt::Write;

const SCHOLAR_SEARCH: &str = "https://scholar.google.com/scholar";

/// Google Scholar search link for a title
pub fn scholar_link(title: &str) -> Option<Url> {
    Url::parse_with_params(SCHOLAR_SEARCH, &[("q", title)]).ok()
}

/// Render the answer followed by its citation lists
pub fn render(answer: &ResearchAnswer) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "{}", answer.answer.trim());
    let _ = writeln!(out);
    let _ = writeln!(out, "PubMed query: {}", answer.seed_query);
    if answer.context.dropped > 0 {
        let _ = writeln!(
            out,
            "({} record(s) left out of the synthesis context)",
            answer.context.dropped
        );
    }

    section(&mut out, "Local library", &answer.local);
    section(&mut out, "PubMed", &answer.external);
    section(&mut out, "Not in your library", &answer.not_in_library);

    out
}

fn section(out: &mut String, heading: &str, records: &[DocumentRecord]) {
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", heading);
    let _ = writeln!(out, "{}", "-".repeat(heading.len()));

    if records.is_empty() {
        let _ = writeln!(out, "(none)");
        return;
    }

    for record in records {
        let _ = writeln!(out, "- {} ({}) [{}]", record.title, record.year, record.id);
        if record.has_title() {
            if let Some(link) = scholar_link(&record.title) {
                let _ = writeln!(out, "  {}", link);
            }
        }
    }
}
