//! Helpers for putting raw modem output into single-line log records.
//! AT responses are CR/LF framed and may carry stray control bytes from a
//! half-initialised USB serial bridge, so they are always escaped first.

/// Longest preview written for a single response.
pub const MAX_PREVIEW: usize = 200;

/// Escape a string for single-line logging:
/// - `\r`, `\n`, `\t` and backslash become their escaped forms
/// - other control characters become `\xNN`
/// - output is cut after `max_chars` characters with a trailing ellipsis
pub fn escape_log(s: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_chars) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= max_chars {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Collapse a modem reply into `line | line`, dropping blank lines, the
/// command echo and the final `OK`. Used for compact debug output.
pub fn summarize_response(command: &str, response: &str) -> String {
    let lines: Vec<&str> = response
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != "OK" && *l != command)
        .collect();
    if lines.is_empty() {
        if response.contains("OK") {
            return "OK".to_string();
        }
        return "<empty>".to_string();
    }
    escape_log(&lines.join(" | "), MAX_PREVIEW)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_framing_and_truncates() {
        assert_eq!(escape_log("+CSQ: 20,99\r\nOK\r\n", 100), "+CSQ: 20,99\\r\\nOK\\r\\n");
        assert_eq!(escape_log("\u{1}x", 100), "\\x01x");
        assert_eq!(escape_log("abcdef", 3), "abc…");
    }

    #[test]
    fn summary_drops_echo_and_ok() {
        let raw = "AT+CSQ\r\r\n+CSQ: 20,99\r\n\r\nOK\r\n";
        assert_eq!(summarize_response("AT+CSQ", raw), "+CSQ: 20,99");
        assert_eq!(summarize_response("AT", "AT\r\nOK\r\n"), "OK");
        assert_eq!(summarize_response("AT", ""), "<empty>");
    }
}
