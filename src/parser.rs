//! Sequence-file parser.
//!
//! The top-level entry points are [`parse_str`] and [`parse_file`].
//!
//! A logical line is one or more physical lines joined by a trailing `\`,
//! with `#` comments removed (`\#` keeps a literal `#`). A line whose first
//! space-separated word is a builtin token becomes that builtin; any other
//! line is a shell command of the form
//!
//! ```text
//! command ; expect1, expect2 ; escape1, escape2 ; timeout
//! ```
//!
//! where `\;`, `\,` and `\ ` keep a literal delimiter.

use crate::command::{BuiltinCommand, Command, Region, ShellCommand};
use crate::commands::{
    Close, CtrlC, EndSubsequence, Enter, Find, Loop, Passwd, Pulse, Run, RunWait, SetPrompt,
    Subsequence, Wait,
};
use crate::error::{ParseError, SyntaxError};
use crate::pattern::Pattern;
use anyhow::bail;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

const CONTINUATION: char = '\\';
const COMMENT: char = '#';

// Stand-ins for escaped delimiters while a line is being split.
const ESCAPED_SEMICOLON: char = '\u{80}';
const ESCAPED_COMMA: char = '\u{81}';
const ESCAPED_SPACE: char = '\u{82}';

/// Most top-level fields a shell command line may have.
const MAX_SHELL_FIELDS: usize = 4;

/// The commands of one sequence file plus its named subsequences.
#[derive(Debug, Default)]
pub struct SequenceFile {
    pub path: PathBuf,
    pub commands: Vec<Arc<Command>>,
    pub subsequences: HashMap<String, Vec<Arc<Command>>>,
}

impl SequenceFile {
    /// Name reported to the supervisor: the file name without directory or extension.
    pub fn name(&self) -> String {
        sequence_name(&self.path)
    }

    pub fn subsequence(&self, symbol: &str) -> Option<&[Arc<Command>]> {
        self.subsequences.get(symbol).map(Vec::as_slice)
    }
}

/// Base file name of a sequence, without directory or extension.
pub fn sequence_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parse a sequence from a string slice.
///
/// # Errors
///
/// Returns [`ParseError::Syntax`] with the line number of the first malformed
/// logical line.
///
/// # Example
///
/// ```
/// use autoseq::parse_str;
///
/// let seq = parse_str("WAIT 1s\nuname -a ; Linux\n").unwrap();
/// assert_eq!(seq.commands.len(), 2);
/// ```
pub fn parse_str(content: &str) -> Result<SequenceFile, ParseError> {
    parse_with_path(content, PathBuf::new())
}

/// Parse a sequence file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or if the sequence is malformed.
pub fn parse_file(path: impl AsRef<Path>) -> Result<SequenceFile, ParseError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_with_path(&content, path.to_path_buf())
}

fn parse_with_path(content: &str, path: PathBuf) -> Result<SequenceFile, ParseError> {
    let mut builder = SequenceBuilder::new(path);
    let mut last_line = 0;
    for (line, text) in logical_lines(content) {
        last_line = line;
        builder
            .push(&text)
            .map_err(|source| ParseError::Syntax { line, source })?;
    }
    builder.finish().map_err(|source| ParseError::Syntax {
        line: last_line,
        source,
    })
}

struct SequenceBuilder {
    file: SequenceFile,
    open: Option<(String, usize)>,
}

impl SequenceBuilder {
    fn new(path: PathBuf) -> Self {
        Self {
            file: SequenceFile {
                path,
                ..Default::default()
            },
            open: None,
        }
    }

    fn push(&mut self, line: &str) -> Result<(), SyntaxError> {
        let Some(builtin) = parse_builtin(line)? else {
            let shell = parse_shell(line)?;
            self.file.commands.push(Arc::new(Command::Shell(shell)));
            return Ok(());
        };

        if let Some(symbol) = builtin.references() {
            if !self.file.subsequences.contains_key(symbol) {
                return Err(SyntaxError::UndefinedSymbol(symbol.to_string()));
            }
        }

        match builtin.region() {
            Some(Region::Open(symbol)) => {
                if let Some((open, _)) = &self.open {
                    return Err(SyntaxError::NestedSubsequence(open.clone()));
                }
                self.open = Some((symbol, self.file.commands.len()));
            }
            Some(Region::Close) => {
                let (symbol, start) = self.open.take().ok_or(SyntaxError::UnmatchedEnd)?;
                let range = self.file.commands[start..].to_vec();
                self.file.subsequences.insert(symbol, range);
            }
            None => {}
        }

        if builtin.is_sequenced() {
            self.file.commands.push(Arc::new(Command::Builtin(builtin)));
        }
        Ok(())
    }

    fn finish(self) -> Result<SequenceFile, SyntaxError> {
        match self.open {
            Some((symbol, _)) => Err(SyntaxError::UnclosedSubsequence(symbol)),
            None => Ok(self.file),
        }
    }
}

/// Join continuation lines and drop comments and blank lines. Each logical
/// line is paired with the 1-based number of the physical line it starts on.
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending = String::new();
    let mut start = 0;

    for (index, raw) in content.lines().enumerate() {
        let line = strip_comment(raw);
        if line.is_empty() {
            continue;
        }
        if pending.is_empty() {
            start = index + 1;
        }
        match line.strip_suffix(CONTINUATION) {
            Some(head) => pending.push_str(head),
            None => {
                pending.push_str(&line);
                lines.push((start, std::mem::take(&mut pending)));
            }
        }
    }

    if !pending.trim().is_empty() {
        lines.push((start, pending));
    }
    lines
}

/// Remove everything from the first unescaped `#`, and surrounding whitespace.
fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&COMMENT) {
            out.push(COMMENT);
            chars.next();
            continue;
        }
        if c == COMMENT {
            break;
        }
        out.push(c);
    }
    out.trim().to_string()
}

type ParseFn = fn(&[String]) -> Result<Box<dyn BuiltinCommand>, SyntaxError>;

/// One entry of the builtin catalog.
pub struct BuiltinEntry {
    pub token: &'static str,
    /// Accepted argument counts, not counting the token itself.
    pub argc: &'static [usize],
    pub usage: &'static str,
    pub parse: ParseFn,
}

macro_rules! builtin {
    ($cmd:ty) => {
        BuiltinEntry {
            token: <$cmd>::NAME,
            argc: <$cmd>::ARGC,
            usage: <$cmd>::USAGE,
            parse: <$cmd>::parse_boxed,
        }
    };
}

static REGISTRY: &[BuiltinEntry] = &[
    builtin!(CtrlC),
    builtin!(Run),
    builtin!(RunWait),
    builtin!(Close),
    builtin!(Enter),
    builtin!(Wait),
    builtin!(Pulse),
    builtin!(SetPrompt),
    builtin!(Find),
    builtin!(Subsequence),
    builtin!(EndSubsequence),
    builtin!(Loop),
    builtin!(Passwd),
];

/// The builtin catalog, in lookup order.
pub fn registry() -> &'static [BuiltinEntry] {
    REGISTRY
}

/// Make sure no two catalog entries claim the same token.
pub fn check_registry() -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for entry in REGISTRY {
        if !seen.insert(entry.token) {
            bail!("builtin token `{}` is registered twice", entry.token);
        }
    }
    Ok(())
}

/// Try the line as a builtin. `Ok(None)` means it is a shell command.
fn parse_builtin(line: &str) -> Result<Option<Box<dyn BuiltinCommand>>, SyntaxError> {
    let args = split_args(line);
    let Some((token, rest)) = args.split_first() else {
        return Ok(None);
    };
    let Some(entry) = REGISTRY.iter().find(|entry| entry.token == token) else {
        return Ok(None);
    };
    if !entry.argc.contains(&rest.len()) {
        return Err(SyntaxError::Usage { usage: entry.usage });
    }
    (entry.parse)(rest).map(Some)
}

/// Split builtin arguments on unescaped spaces.
fn split_args(line: &str) -> Vec<String> {
    line.replace("\\ ", &ESCAPED_SPACE.to_string())
        .split(' ')
        .filter(|arg| !arg.is_empty())
        .map(restore)
        .collect()
}

/// Split `text` on unescaped `delimiter`, dropping empty items.
pub(crate) fn split_list(text: &str, delimiter: char) -> Vec<String> {
    let escape = format!("\\{delimiter}");
    text.replace(&escape, &ESCAPED_COMMA.to_string())
        .split(delimiter)
        .map(|item| item.replace(ESCAPED_COMMA, &delimiter.to_string()))
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn escape(line: &str) -> String {
    line.replace("\\;", &ESCAPED_SEMICOLON.to_string())
        .replace("\\,", &ESCAPED_COMMA.to_string())
        .replace("\\ ", &ESCAPED_SPACE.to_string())
}

fn restore(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            ESCAPED_SEMICOLON => ';',
            ESCAPED_COMMA => ',',
            ESCAPED_SPACE => ' ',
            c => c,
        })
        .collect()
}

/// Parse `command ; expects ; escapes ; timeout`.
///
/// A trailing field holding a single number is the timeout in seconds; a
/// negative timeout means the command is sent without waiting for it.
pub fn parse_shell(line: &str) -> Result<ShellCommand, SyntaxError> {
    let escaped = escape(line);
    let fields: Vec<&str> = escaped
        .split(';')
        .filter(|f| !f.is_empty())
        .map(|f| f.trim_matches(' '))
        .collect();
    if fields.len() > MAX_SHELL_FIELDS {
        return Err(SyntaxError::TooManyFields(fields.len()));
    }

    let text = fields.first().map(|f| restore(f)).unwrap_or_default();
    let mut groups: Vec<Vec<String>> = fields
        .iter()
        .skip(1)
        .map(|field| {
            field
                .split(',')
                .map(|item| restore(item.trim_matches(' ')))
                .filter(|item| !item.is_empty())
                .collect()
        })
        .collect();

    let mut timeout = Some(crate::command::DEFAULT_SHELL_TIMEOUT);
    if let Some(secs) = groups.last().and_then(|g| single_number(g)) {
        let raw = groups.pop().unwrap_or_default().concat();
        timeout = if secs < 0.0 {
            None
        } else {
            let invalid = |_| SyntaxError::InvalidValue {
                what: "timeout",
                value: raw,
            };
            Some(Duration::try_from_secs_f64(secs).map_err(invalid)?)
        };
    }

    let mut groups = groups.into_iter();
    let expects = groups.next().unwrap_or_default();
    let escapes = groups.next().unwrap_or_default();

    Ok(ShellCommand {
        text,
        expects: expects.into_iter().map(Pattern::new).collect(),
        escapes: escapes.into_iter().map(Pattern::new).collect(),
        timeout,
        secret: false,
        args: fields.iter().map(|f| restore(f)).collect(),
    })
}

fn single_number(group: &[String]) -> Option<f64> {
    match group {
        [only] => only.parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

static DURATION_TOKENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z]+|\d*\.?\d+").expect("static duration regex"));

/// Parse a duration such as `90`, `5s`, `1h30m`, `2m30` or `500ms`.
///
/// Numbers followed by a unit are scaled (`h`, `m`, `s`, `ms`); a trailing bare
/// number counts as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, SyntaxError> {
    let invalid = || SyntaxError::InvalidValue {
        what: "duration",
        value: s.to_string(),
    };
    let text = s.trim().to_lowercase();

    let mut seconds = 0.0;
    let mut pending: Option<f64> = None;
    let mut any = false;
    for token in DURATION_TOKENS.find_iter(&text).map(|m| m.as_str()) {
        any = true;
        if let Ok(n) = token.parse::<f64>() {
            if pending.replace(n).is_some() {
                return Err(invalid());
            }
            continue;
        }
        let rate = unit_seconds(token).ok_or_else(invalid)?;
        let n = pending.take().ok_or_else(invalid)?;
        seconds += n * rate;
    }
    if !any {
        return Err(invalid());
    }
    if let Some(n) = pending {
        seconds += n;
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| invalid())
}

fn unit_seconds(unit: &str) -> Option<f64> {
    if unit == "ms" {
        return Some(0.001);
    }
    match unit.chars().next()? {
        'h' => Some(3600.0),
        'm' => Some(60.0),
        's' => Some(1.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(seq: &SequenceFile) -> Vec<Option<&'static str>> {
        seq.commands.iter().map(|c| c.builtin_name()).collect()
    }

    fn shell(cmd: &Command) -> &ShellCommand {
        match cmd {
            Command::Shell(shell) => shell,
            other => panic!("expected a shell command, got {other:?}"),
        }
    }

    #[test]
    fn test_registry_tokens_are_unique() {
        check_registry().unwrap();
        assert_eq!(registry().len(), 13);
    }

    #[test]
    fn test_subsequence_and_loop() {
        let seq = parse_str(
            "RUN a.seq 2\nENTER\nSUBSEQUENCE X\nWAIT 5s\nENDSUBSEQUENCE\nLOOP X 3\n",
        )
        .unwrap();
        assert_eq!(
            names(&seq),
            vec![Some("RUN"), Some("ENTER"), Some("WAIT"), Some("LOOP")]
        );
        assert_eq!(seq.subsequences.len(), 1);
        let x = seq.subsequence("X").unwrap();
        assert_eq!(x.len(), 1);
        assert_eq!(x[0].builtin_name(), Some("WAIT"));
        assert!(Arc::ptr_eq(&x[0], &seq.commands[2]));
    }

    #[test]
    fn test_loop_undefined_symbol() {
        let err = parse_str("LOOP X 3\n").unwrap_err();
        assert_eq!(
            err.syntax(),
            Some(&SyntaxError::UndefinedSymbol("X".to_string()))
        );
    }

    #[test]
    fn test_loop_inside_its_own_subsequence_is_rejected() {
        let err = parse_str("SUBSEQUENCE X\nls\nLOOP X 2\nENDSUBSEQUENCE\n").unwrap_err();
        assert!(matches!(
            err,
            ParseError::Syntax { line: 3, source: SyntaxError::UndefinedSymbol(_) }
        ));
    }

    #[test]
    fn test_nested_subsequence() {
        let err = parse_str("SUBSEQUENCE A\nSUBSEQUENCE B\n").unwrap_err();
        assert_eq!(
            err.syntax(),
            Some(&SyntaxError::NestedSubsequence("A".to_string()))
        );
    }

    #[test]
    fn test_unmatched_and_unclosed_regions() {
        assert_eq!(
            parse_str("ENDSUBSEQUENCE\n").unwrap_err().syntax(),
            Some(&SyntaxError::UnmatchedEnd)
        );
        assert_eq!(
            parse_str("SUBSEQUENCE A\nls\n").unwrap_err().syntax(),
            Some(&SyntaxError::UnclosedSubsequence("A".to_string()))
        );
    }

    #[test]
    fn test_builtin_argument_count() {
        let err = parse_str("ENTER now\n").unwrap_err();
        assert_eq!(err.syntax(), Some(&SyntaxError::Usage { usage: "ENTER" }));
        assert!(parse_str("RUN\n").is_err());
        assert!(parse_str("RUN a.seq 1 2\n").is_err());
        assert!(parse_str("FIND only_file\n").is_err());
    }

    #[test]
    fn test_error_reports_line_number() {
        let err = parse_str("ls\n\n# note\nCLOSE now\n").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { line: 4, .. }));
        assert!(err.to_string().starts_with("line 4:"));
    }

    #[test]
    fn test_shell_fields() {
        let cmd = parse_shell("show version ; Version, Uptime ; error, denied ; 10").unwrap();
        assert_eq!(cmd.text, "show version");
        assert_eq!(cmd.expects, vec![Pattern::new("Version"), Pattern::new("Uptime")]);
        assert_eq!(cmd.escapes, vec![Pattern::new("error"), Pattern::new("denied")]);
        assert_eq!(cmd.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_shell_default_timeout() {
        let cmd = parse_shell("uname -a ; Linux").unwrap();
        assert_eq!(cmd.expects, vec![Pattern::new("Linux")]);
        assert!(cmd.escapes.is_empty());
        assert_eq!(cmd.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_shell_timeout_only() {
        let cmd = parse_shell("reboot ; 300").unwrap();
        assert!(cmd.expects.is_empty());
        assert_eq!(cmd.timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_negative_timeout_is_fire_and_forget() {
        let cmd = parse_shell("tail -f /var/log/messages ; -1").unwrap();
        assert_eq!(cmd.timeout, None);
    }

    #[test]
    fn test_out_of_range_timeout() {
        assert_eq!(
            parse_shell("sleep 1 ; 1e20").unwrap_err(),
            SyntaxError::InvalidValue {
                what: "timeout",
                value: "1e20".to_string()
            }
        );
    }

    #[test]
    fn test_multi_item_numeric_field_is_not_a_timeout() {
        let cmd = parse_shell("cat count ; 1, 2").unwrap();
        assert_eq!(cmd.expects.len(), 2);
        assert_eq!(cmd.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_too_many_fields() {
        assert_eq!(
            parse_shell("a ; b ; c ; d ; e").unwrap_err(),
            SyntaxError::TooManyFields(5)
        );
    }

    #[test]
    fn test_escaped_delimiters() {
        let cmd = parse_shell(r"echo a\;b ; x\,y, z").unwrap();
        assert_eq!(cmd.text, "echo a;b");
        assert_eq!(cmd.expects, vec![Pattern::new("x,y"), Pattern::new("z")]);
    }

    #[test]
    fn test_continuation_and_comments() {
        let seq = parse_str("# header\nls -l \\\n  /tmp # listing\n\necho \\# not a comment\n").unwrap();
        assert_eq!(seq.commands.len(), 2);
        assert_eq!(shell(&seq.commands[0]).text, "ls -l /tmp");
        assert_eq!(shell(&seq.commands[1]).text, "echo # not a comment");
    }

    #[test]
    fn test_builtin_escaped_space() {
        let seq = parse_str(r"SETPROMPT Press\ any\ key").unwrap();
        assert_eq!(seq.commands[0].builtin_name(), Some("SETPROMPT"));
    }

    #[test]
    fn test_lowercase_token_is_a_shell_command() {
        let seq = parse_str("wait 5\n").unwrap();
        assert_eq!(shell(&seq.commands[0]).text, "wait 5");
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("/a, /b,,/c", ','), vec!["/a", "/b", "/c"]);
        assert_eq!(split_list(r"/x\,y,/z", ','), vec!["/x,y", "/z"]);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1m30").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2.5m").unwrap(), Duration::from_secs(150));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("5 weeks").is_err());
        assert!(parse_duration("1 2").is_err());
    }

    #[test]
    fn test_parse_duration_out_of_range() {
        assert!(matches!(
            parse_duration("99999999999999999999h"),
            Err(SyntaxError::InvalidValue { what: "duration", .. })
        ));
        let err = parse_str("WAIT 99999999999999999999h\n").unwrap_err();
        assert!(matches!(err.syntax(), Some(SyntaxError::InvalidValue { .. })));
    }

    #[test]
    fn test_loop_requires_count() {
        let err = parse_str("SUBSEQUENCE X\nENTER\nENDSUBSEQUENCE\nLOOP X\n").unwrap_err();
        assert_eq!(err.syntax(), Some(&SyntaxError::Usage { usage: Loop::USAGE }));
    }

    #[test]
    fn test_sequence_name() {
        assert_eq!(sequence_name(Path::new("/seq/bmc_boot.seq")), "bmc_boot");
        assert_eq!(sequence_name(Path::new("main")), "main");
    }
}
