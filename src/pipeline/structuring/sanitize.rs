// Clean OCR'd report text before it is embedded in a prompt.

/// Line prefixes that impersonate a chat role or an instruction block.
const ROLE_PREFIXES: &[&str] = &[
    "system:",
    "assistant:",
    "user:",
    "[system]",
    "[assistant]",
    "[inst]",
    "[/inst]",
    "<<sys>>",
    "<system",
    "</system",
    "<instruction",
    "</instruction",
    "note to ai:",
    "new instructions:",
];

/// Phrases that try to override the extraction prompt wherever they appear.
const OVERRIDE_PHRASES: &[&str] = &[
    "ignore previous instructions",
    "ignore all instructions",
    "ignore the above instructions",
    "disregard your instructions",
    "disregard all instructions",
    "forget your instructions",
];

/// Clean report text for prompting: drop invisible characters and injected
/// instruction lines, then collapse whitespace. Never logs content.
pub fn clean_report_text(raw: &str, report_id: &str) -> String {
    let visible = strip_invisible(raw);
    let mut dropped = 0usize;

    let kept: Vec<&str> = visible
        .lines()
        .filter(|line| {
            let lowered = line.trim().to_lowercase();
            let injected = ROLE_PREFIXES.iter().any(|p| lowered.starts_with(p))
                || OVERRIDE_PHRASES.iter().any(|p| lowered.contains(p));
            if injected {
                dropped += 1;
            }
            !injected
        })
        .collect();

    if dropped > 0 {
        tracing::warn!(
            report_id = %report_id,
            dropped_lines = dropped,
            "Removed instruction-like lines from report text"
        );
    }

    collapse_blank_lines(&kept)
}

/// Keep at most `max_chars` characters from the start of `text`, cutting on
/// a char boundary. Lab tables usually open a report, so the prefix wins.
pub fn truncate_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

fn strip_invisible(text: &str) -> String {
    text.chars()
        .filter(|c| match c {
            ' ' | '\n' | '\t' => true,
            '\r' => false,
            '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2060}'..='\u{2064}' => false,
            '\u{FEFF}' => false,
            c => !c.is_control(),
        })
        .collect()
}

/// Trim each line, keep at most one blank line in a row, and drop blank
/// lines at either end.
fn collapse_blank_lines(lines: &[&str]) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    for line in lines.iter().map(|l| l.trim()) {
        if line.is_empty() && matches!(out.last(), None | Some(&"")) {
            continue;
        }
        out.push(line);
    }
    while out.last() == Some(&"") {
        out.pop();
    }
    out.join("\n")
}
