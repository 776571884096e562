//! Removal of a shell's echo of the command that was just sent.
//!
//! Interactive shells re-transmit what they receive before the real output.
//! Over serial consoles and nested telnet/ssh hops that echo is unreliable:
//! terminals inject a carriage return where the line wraps, and a local plus
//! remote echo can show the command twice. The helpers here find where the
//! echo ends so the session engine only matches expects against genuine
//! output.

/// How far either side of the midpoint a doubled echo may be split.
const SPLIT_WINDOW: usize = 3;

/// Return the part of `out` that follows the echo of `sent`.
///
/// `None` means the echo could not be located. Callers then keep the whole
/// buffer: output that may still contain the echo is preferable to output
/// that had genuine text cut away.
pub fn strip_echo<'a>(sent: &str, out: &'a str) -> Option<&'a str> {
    let out = out.trim_start();

    if !sent.contains(['\r', '\n']) {
        return out.strip_prefix(sent);
    }

    if sent.contains('\n') || sent.matches('\r').count() != 1 {
        return None;
    }

    let (left, right) = sent.split_once('\r')?;
    let rest = out.strip_prefix(left)?;
    if right.chars().count() < 2 {
        return None;
    }

    if let Some(pos) = rest.find(right) {
        return Some(&rest[pos + right.len()..]);
    }

    // The carriage return landed at a later column than assumed: the echo
    // reads `left + right[..k] + "\r" + right[k..]`.
    let splits = right.char_indices().map(|(i, _)| i).skip(1).collect::<Vec<_>>();
    for &k in splits.iter().rev() {
        let (head, tail) = right.split_at(k);
        let Some(after) = rest.strip_prefix(head) else {
            continue;
        };
        let after = after
            .strip_prefix(" \r")
            .or_else(|| after.strip_prefix('\r'));
        if let Some(after) = after.and_then(|a| a.strip_prefix(tail)) {
            return Some(after);
        }
    }

    None
}

/// Byte length of the prefix of `out` that echoes `cmd`, tolerating line-wrap
/// artifacts (a bare `\r` or a `" \r"` pair) anywhere inside the echo.
///
/// Right after such an artifact a terminal may repeat the last character it
/// printed, so one character of backtracking is allowed there.
pub fn echo_prefix_len(cmd: &str, out: &str) -> Option<usize> {
    let lead = out.len() - out.trim_start().len();
    let trimmed = &out[lead..];
    let cmd: Vec<char> = cmd.chars().collect();
    let out: Vec<(usize, char)> = trimmed.char_indices().collect();

    let (mut i, mut j) = (0, 0);
    let mut after_skip = false;
    while i < cmd.len() {
        let (_, c) = *out.get(j)?;
        if c == cmd[i] {
            i += 1;
            j += 1;
            after_skip = false;
        } else if c == '\r' {
            j += 1;
            after_skip = true;
        } else if c == ' ' && out.get(j + 1).map(|&(_, n)| n) == Some('\r') {
            j += 2;
            after_skip = true;
        } else if after_skip && i > 0 && c == cmd[i - 1] {
            i -= 1;
            after_skip = false;
        } else {
            return None;
        }
    }

    let end = out.get(j).map_or(trimmed.len(), |&(pos, _)| pos);
    Some(lead + end)
}

/// Whether `out` begins with an echo of `cmd`.
pub fn echo_prefix_matches(cmd: &str, out: &str) -> bool {
    echo_prefix_len(cmd, out).is_some()
}

/// If `s` is one string printed twice (local plus remote echo), return the
/// single copy.
pub fn collapse_duplicate(s: &str) -> Option<&str> {
    let t = s.trim();
    let n = t.chars().count();
    if n < 2 {
        return None;
    }

    let byte_at = |chars: usize| t.char_indices().nth(chars).map_or(t.len(), |(i, _)| i);
    let mid = n / 2;
    let lo = mid.saturating_sub(SPLIT_WINDOW).max(1);
    for half in (lo..=mid).rev() {
        let left = t[..byte_at(half)].trim();
        let right = t[byte_at(n - half)..].trim();
        if !left.is_empty() && left == right {
            return Some(left);
        }
    }
    None
}

pub fn looks_duplicated(s: &str) -> bool {
    collapse_duplicate(s).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_echo() {
        assert_eq!(strip_echo("show version", "show version\r\nOK"), Some("\r\nOK"));
    }

    #[test]
    fn test_leading_whitespace_ignored() {
        assert_eq!(strip_echo("ls", "\r\nls\r\nfile"), Some("\r\nfile"));
    }

    #[test]
    fn test_wrap_at_expected_column() {
        assert_eq!(
            strip_echo("show \rversion", "show \rversion\r\nOK"),
            Some("\r\nOK")
        );
    }

    #[test]
    fn test_wrap_at_later_column() {
        assert_eq!(
            strip_echo("show \rversion", "show ver\rsion\r\nOK"),
            Some("\r\nOK")
        );
        assert_eq!(
            strip_echo("show \rversion", "show ver \rsion\r\nOK"),
            Some("\r\nOK")
        );
    }

    #[test]
    fn test_unresolved_echo() {
        assert_eq!(strip_echo("show version", "garbage\r\nOK"), None);
        assert_eq!(strip_echo("show \rversion", "garbage\r\nOK"), None);
        // right part too short to align on
        assert_eq!(strip_echo("show version\rx", "show version\r\nOK"), None);
    }

    #[test]
    fn test_multiline_sent_is_unresolved() {
        assert_eq!(strip_echo("a\nb", "a\nb\nOK"), None);
    }

    #[test]
    fn test_echo_prefix_plain() {
        assert!(echo_prefix_matches("uname -a", "uname -a\r\nLinux"));
        assert_eq!(echo_prefix_len("uname -a", "uname -a\r\nLinux"), Some(8));
        assert!(!echo_prefix_matches("uname -a", "uname\r\n"));
    }

    #[test]
    fn test_echo_prefix_skips_wrap_artifacts() {
        assert!(echo_prefix_matches("show version", "show ver\rsion\r\n"));
        assert!(echo_prefix_matches("show version", "show ver \rsion\r\n"));
        assert_eq!(echo_prefix_len("show version", "  show ver \rsion\r\n"), Some(16));
    }

    #[test]
    fn test_echo_prefix_backtracks_after_wrap() {
        // the terminal repeats `v` after the carriage return
        assert!(echo_prefix_matches("show version", "show v\rversion\r\n"));
        assert!(!echo_prefix_matches("show version", "show vx\rversion\r\n"));
    }

    #[test]
    fn test_duplicated_echo() {
        assert!(looks_duplicated("helloXhello"));
        assert!(!looks_duplicated("abcdef"));
        assert_eq!(collapse_duplicate("ls -l ls -l\r\n"), Some("ls -l"));
        assert_eq!(collapse_duplicate("dmesgdmesg"), Some("dmesg"));
    }

    #[test]
    fn test_duplicate_needs_content() {
        assert!(!looks_duplicated(""));
        assert!(!looks_duplicated("a"));
        assert!(!looks_duplicated("   "));
    }
}
