// Report — Human-readable rendering of a parse failure
//
//   Parse error: [10:4] semantic error: undefined identifier 'x'
//   ... evaluated from [3:1]
//   ... evaluated from [1:1]
//
// The origin chain is walked innermost first. An error with no origin gets
// the offending source line with a caret under the column instead.

use std::io::{self, Write};

use crate::error::{Error, Position};

/// Render `err` as a report. `source` enables the excerpt.
pub fn format_report(err: &Error, source: Option<&str>) -> String {
    let mut lines = vec![format!("Parse error: {err}")];

    if let Some(position) = &err.position {
        if position.origin.is_none() {
            if let Some(excerpt) = source.and_then(|s| excerpt(s, position)) {
                lines.push(excerpt);
            }
        }
        lines.extend(
            position
                .origins()
                .map(|origin| format!("... evaluated from [{origin}]")),
        );
    }
    lines.join("\n")
}

/// Write the report to `out`, one line per entry.
pub fn write_report(out: &mut dyn Write, err: &Error, source: Option<&str>) -> io::Result<()> {
    writeln!(out, "{}", format_report(err, source))
}

fn excerpt(source: &str, position: &Position) -> Option<String> {
    let line = source.lines().nth(position.line.checked_sub(1)?)?;
    let pad: String = line
        .chars()
        .take(position.column.saturating_sub(1))
        .map(|c| if c == '\t' { '\t' } else { ' ' })
        .collect();
    Some(format!("    {line}\n    {pad}^"))
}
