//! Sanitizing of raw `psql` output before it enters the transport stream.
//!
//! Fields may contain any line terminator, but the transport treats `\n` as
//! a record break. The backends therefore ask `psql` to end rows with NUL
//! (`-0`). Sanitizing then
//!
//! 1. collapses every run of line terminators into a single space,
//! 2. turns each NUL into `\n`,
//! 3. strips trailing whitespace.
//!
//! Input without any NUL is taken to be newline-delimited already: its `\n`
//! are kept as row breaks and only the other terminators are collapsed.
//! This makes [`sanitize`] idempotent.

/// Characters treated as line terminators inside a field.
const LINE_TERMINATORS: &[char] = &[
    '\n', '\r', '\u{000B}', '\u{0085}', '\u{2028}', '\u{2029}',
];

/// Sanitizes raw output into newline separated rows.
pub fn sanitize(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let rows = if text.contains('\0') {
        collapse_terminators(&text, LINE_TERMINATORS).replace('\0', "\n")
    } else {
        text.split('\n')
            .map(|line| collapse_terminators(line, &LINE_TERMINATORS[1..]))
            .collect::<Vec<_>>()
            .join("\n")
    };
    rows.trim_end().to_string()
}

fn collapse_terminators(text: &str, terminators: &[char]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for c in text.chars() {
        if terminators.contains(&c) {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}
