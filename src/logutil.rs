//! Teacher-typed text: award reasons, notes and item names.
//!
//! Reasons and notes are normalised once on the way into the ledger with [`clean_text`],
//! so audit entries and daily records never carry line breaks or unbounded notes. Log
//! lines render any free text through [`escape_log`].

/// Longest reason kept on a daily record or audit entry.
pub const MAX_REASON_CHARS: usize = 64;
/// Longest note kept on an audit entry.
pub const MAX_NOTE_CHARS: usize = 280;

const MAX_PREVIEW: usize = 120;

/// Fold runs of whitespace (line breaks included) into one space, drop other control
/// characters, trim both ends and keep at most `limit` characters. The flag reports whether
/// anything past `limit` was cut.
fn fold(s: &str, limit: usize) -> (String, bool) {
    let mut out = String::with_capacity(s.len().min(limit));
    let mut kept = 0;
    let mut pending_space = false;
    for ch in s.trim().chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if ch.is_control() {
            continue;
        }
        let needed = if pending_space { 2 } else { 1 };
        if kept + needed > limit {
            return (out, true);
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(ch);
        kept += needed;
    }
    (out, false)
}

/// Normalised form of a reason or note for storage.
pub fn clean_text(s: &str, limit: usize) -> String {
    fold(s, limit).0
}

/// Single-line preview for log output, marked with `…` when cut.
pub fn escape_log(s: &str) -> String {
    let (mut out, cut) = fold(s, MAX_PREVIEW);
    if cut {
        out.push('…');
    }
    out
}
