//! Pattern-based boundary detection strategies.
//!
//! These are heuristics over raw lines, not parsers. Each detector returns
//! ordered, non-overlapping spans; anything it does not claim is covered by
//! line windows in the caller.

use std::sync::LazyLock;

use regex::Regex;

use super::ChunkKind;
use crate::languages::{BoundaryStyle, Lang};

/// 1-indexed inclusive line span with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub kind: ChunkKind,
}

/// Finds definition spans in a file's lines.
pub trait BoundaryDetector: Send + Sync {
    fn detect(&self, lines: &[&str]) -> Vec<Span>;
}

/// Pick the detector for a language.
#[must_use]
pub fn detector_for(lang: Lang, window_lines: usize) -> Box<dyn BoundaryDetector> {
    match lang.boundary_style() {
        BoundaryStyle::Indentation => Box::new(IndentationDetector),
        BoundaryStyle::Brace => Box::new(BraceDetector {
            single_quoted_strings: lang.has_single_quoted_strings(),
        }),
        BoundaryStyle::Windowed => Box::new(WindowedDetector::new(window_lines)),
    }
}

static PY_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:async\s+def|def|class)\s+\w").expect("valid regex")
});
static PY_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*class\s").expect("valid regex"));
static PY_DECORATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*@\w").expect("valid regex"));

/// Indentation-significant languages: a block ends at the first non-blank
/// line indented at or left of its header.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndentationDetector;

struct OpenIndent {
    start: usize,
    indent: usize,
    kind: ChunkKind,
    /// False while only decorators have been seen.
    header_seen: bool,
}

impl BoundaryDetector for IndentationDetector {
    fn detect(&self, lines: &[&str]) -> Vec<Span> {
        let mut spans = Vec::new();
        let mut open: Option<OpenIndent> = None;
        let mut last_nonblank = 0;

        for (idx, line) in lines.iter().enumerate() {
            let n = idx + 1;
            if line.trim().is_empty() {
                continue;
            }
            let indent = indent_width(line);

            if let Some(block) = open.as_mut() {
                if !block.header_seen && indent == block.indent {
                    if PY_HEADER.is_match(line) {
                        block.header_seen = true;
                        block.kind = python_kind(line);
                        last_nonblank = n;
                        continue;
                    }
                    if PY_DECORATOR.is_match(line) {
                        last_nonblank = n;
                        continue;
                    }
                }
                if indent <= block.indent {
                    spans.push(Span {
                        start: block.start,
                        end: last_nonblank,
                        kind: block.kind,
                    });
                    open = None;
                }
            }

            if open.is_none() {
                if PY_HEADER.is_match(line) {
                    open = Some(OpenIndent {
                        start: n,
                        indent,
                        kind: python_kind(line),
                        header_seen: true,
                    });
                } else if PY_DECORATOR.is_match(line) {
                    open = Some(OpenIndent {
                        start: n,
                        indent,
                        kind: ChunkKind::Function,
                        header_seen: false,
                    });
                }
            }
            last_nonblank = n;
        }

        if let Some(block) = open {
            spans.push(Span {
                start: block.start,
                end: last_nonblank,
                kind: block.kind,
            });
        }
        spans
    }
}

fn python_kind(line: &str) -> ChunkKind {
    if PY_CLASS.is_match(line) {
        ChunkKind::Class
    } else {
        ChunkKind::Function
    }
}

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

static BRACE_HEADERS: LazyLock<Vec<(Regex, ChunkKind)>> = LazyLock::new(|| {
    let table: &[(&str, ChunkKind)] = &[
        // JS/TS/PHP functions
        (
            r"^\s*(?:(?:export|default|async|public|private|protected|static)\s+)*function\b",
            ChunkKind::Function,
        ),
        // arrow-function assignment
        (
            r"^\s*(?:export\s+)?(?:const|let|var)\s+[\w$]+[^=]*=\s*(?:async\s+)?(?:\([^)]*\)|[\w$]+)[^=]*=>",
            ChunkKind::Function,
        ),
        // classes and class-like declarations across C-family languages
        (
            r"^\s*(?:(?:export|default|declare|public|private|protected|internal|static|final|abstract|sealed|open|data|partial)\s+)*(?:class|interface|enum|record|object|protocol|extension)\s+[\w$]+",
            ChunkKind::Class,
        ),
        (r"^\s*export\s+type\s+\w+", ChunkKind::Class),
        (r"^\s*export\s+(?:const|let|var)\s+\w+", ChunkKind::Function),
        // Rust
        (
            r#"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:(?:async|unsafe|const|extern(?:\s+"[^"]*")?)\s+)*fn\s+\w+"#,
            ChunkKind::Function,
        ),
        (
            r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:unsafe\s+)?(?:struct|enum|union|trait|impl|mod)\b",
            ChunkKind::Class,
        ),
        // Go
        (r"^func\b", ChunkKind::Function),
        (r"^type\s+\w+", ChunkKind::Class),
        // Kotlin/Swift
        (
            r"^\s*(?:(?:public|private|protected|internal|static|override|suspend|open|final)\s+)*(?:fun|func)\s+\w+",
            ChunkKind::Function,
        ),
        // C/C++/Java style top-level function definitions
        (
            r"^[A-Za-z_][\w\s\*&:<>,]*[\s\*&]+[\w:~]+\s*\([^;]*\)\s*(?:const\s*)?\{?\s*$",
            ChunkKind::Function,
        ),
    ];
    table
        .iter()
        .map(|(pattern, kind)| (Regex::new(pattern).expect("valid regex"), *kind))
        .collect()
});

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "switch", "return", "do", "try", "catch", "case",
];

fn brace_header_kind(line: &str) -> Option<ChunkKind> {
    let first_word = line
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .find(|w| !w.is_empty())
        .unwrap_or_default();
    if CONTROL_KEYWORDS.contains(&first_word) {
        return None;
    }
    BRACE_HEADERS
        .iter()
        .find(|(re, _)| re.is_match(line))
        .map(|(_, kind)| *kind)
}

/// Attribute, decorator, and doc-comment lines that belong to the next definition.
fn is_prefix_line(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("#[") || t.starts_with("///") || (t.starts_with('@') && !t.starts_with("@@"))
}

/// Brace-delimited languages: a block ends on the line where brace depth
/// returns to zero after its first opening brace.
#[derive(Debug, Clone, Copy, Default)]
pub struct BraceDetector {
    /// `'...'` is a string (JS, TS, PHP). Otherwise only short char
    /// literals such as `'{'` are skipped, leaving Rust lifetimes alone.
    pub single_quoted_strings: bool,
}

struct OpenBrace {
    start: usize,
    kind: ChunkKind,
    depth: i64,
    seen_brace: bool,
}

impl BoundaryDetector for BraceDetector {
    fn detect(&self, lines: &[&str]) -> Vec<Span> {
        let mut spans = Vec::new();
        let mut open: Option<OpenBrace> = None;
        let mut prefix_start: Option<usize> = None;
        let mut last_nonblank = 0;

        for (idx, line) in lines.iter().enumerate() {
            let n = idx + 1;
            if line.trim().is_empty() {
                continue;
            }

            // A header before the previous block saw any brace starts a new block.
            if let Some(block) = open.as_ref()
                && !block.seen_brace
                && let Some(kind) = brace_header_kind(line)
            {
                spans.push(Span {
                    start: block.start,
                    end: last_nonblank,
                    kind: block.kind,
                });
                open = Some(OpenBrace {
                    start: n,
                    kind,
                    depth: 0,
                    seen_brace: false,
                });
            } else if open.is_none() {
                if let Some(kind) = brace_header_kind(line) {
                    open = Some(OpenBrace {
                        start: prefix_start.take().unwrap_or(n),
                        kind,
                        depth: 0,
                        seen_brace: false,
                    });
                } else {
                    if is_prefix_line(line) {
                        prefix_start.get_or_insert(n);
                    } else {
                        prefix_start = None;
                    }
                    last_nonblank = n;
                    continue;
                }
            }

            last_nonblank = n;
            let Some(block) = open.as_mut() else {
                continue;
            };

            let closed = scan_braces(line, block, self.single_quoted_strings);
            let statement_end = !block.seen_brace && line.trim_end().ends_with(';');
            if closed || statement_end {
                spans.push(Span {
                    start: block.start,
                    end: n,
                    kind: block.kind,
                });
                open = None;
            }
        }

        if let Some(block) = open {
            spans.push(Span {
                start: block.start,
                end: last_nonblank,
                kind: block.kind,
            });
        }
        spans
    }
}

/// Update brace depth for one line. Returns true when the block closes.
///
/// String literals, char literals and `//` comments are skipped.
fn scan_braces(line: &str, block: &mut OpenBrace, single_quoted_strings: bool) -> bool {
    let chars: Vec<char> = line.chars().collect();
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        if let Some(q) = quote {
            if c == '\\' {
                i += 1;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '`' => quote = Some(c),
            '\'' if single_quoted_strings => quote = Some(c),
            '\'' => i += char_literal_len(&chars[i..]),
            '/' if chars.get(i) == Some(&'/') => break,
            '{' => {
                block.depth += 1;
                block.seen_brace = true;
            }
            '}' => {
                block.depth -= 1;
                if block.seen_brace && block.depth <= 0 {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

/// Length of a char literal body plus closing quote (`x'`, `\n'`,
/// `\u{7b}'`), or 0 when the quote opens a lifetime or label.
fn char_literal_len(rest: &[char]) -> usize {
    match rest {
        ['\\', ..] => rest
            .iter()
            .take(10)
            .skip(2)
            .position(|&c| c == '\'')
            .map_or(0, |pos| pos + 3),
        [_, '\'', ..] => 2,
        _ => 0,
    }
}

/// Fixed-size line windows from line 1 to the last non-blank line.
#[derive(Debug, Clone, Copy)]
pub struct WindowedDetector {
    window: usize,
}

impl WindowedDetector {
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    /// Window an arbitrary 1-indexed inclusive range.
    #[must_use]
    pub fn windows(&self, start: usize, end: usize) -> Vec<Span> {
        let mut spans = Vec::new();
        let mut s = start;
        while s <= end {
            let e = (s + self.window - 1).min(end);
            spans.push(Span {
                start: s,
                end: e,
                kind: ChunkKind::Lines,
            });
            s = e + 1;
        }
        spans
    }
}

impl BoundaryDetector for WindowedDetector {
    fn detect(&self, lines: &[&str]) -> Vec<Span> {
        match last_nonblank_line(lines) {
            Some(last) => self.windows(1, last),
            None => Vec::new(),
        }
    }
}

pub(crate) fn last_nonblank_line(lines: &[&str]) -> Option<usize> {
    lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map(|i| i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &str) -> Vec<&str> {
        src.lines().collect()
    }

    fn ranges(spans: &[Span]) -> Vec<(usize, usize)> {
        spans.iter().map(|s| (s.start, s.end)).collect()
    }

    #[test]
    fn python_two_functions() {
        let src = "def f():\n    return 1\n\ndef g():\n    return 2\n";
        let spans = IndentationDetector.detect(&lines(src));
        assert_eq!(ranges(&spans), vec![(1, 2), (4, 5)]);
        assert!(spans.iter().all(|s| s.kind == ChunkKind::Function));
    }

    #[test]
    fn python_class_keeps_methods_inside() {
        let src = "class A:\n    def a(self):\n        pass\n\n    def b(self):\n        pass\nx = 1\n";
        let spans = IndentationDetector.detect(&lines(src));
        assert_eq!(ranges(&spans), vec![(1, 6)]);
        assert_eq!(spans[0].kind, ChunkKind::Class);
    }

    #[test]
    fn python_decorator_joins_definition() {
        let src = "@app.route('/')\n@cache\ndef index():\n    return 'hi'\n";
        let spans = IndentationDetector.detect(&lines(src));
        assert_eq!(ranges(&spans), vec![(1, 4)]);
        assert_eq!(spans[0].kind, ChunkKind::Function);
    }

    #[test]
    fn python_async_def_detected() {
        let src = "async def fetch():\n    await x()\n";
        let spans = IndentationDetector.detect(&lines(src));
        assert_eq!(ranges(&spans), vec![(1, 2)]);
    }

    #[test]
    fn python_no_definitions_yields_nothing() {
        let src = "import os\nprint(os.getcwd())\n";
        assert!(IndentationDetector.detect(&lines(src)).is_empty());
    }

    #[test]
    fn js_function_and_class() {
        let src = "function a() {\n  return 1;\n}\n\nclass B {\n  m() {\n    return 2;\n  }\n}\n";
        let spans = BraceDetector::default().detect(&lines(src));
        assert_eq!(ranges(&spans), vec![(1, 3), (5, 9)]);
        assert_eq!(spans[0].kind, ChunkKind::Function);
        assert_eq!(spans[1].kind, ChunkKind::Class);
    }

    #[test]
    fn arrow_function_assignment() {
        let src = "export const add = (a, b) => {\n  return a + b;\n};\nconst sq = x => x * x;\n";
        let spans = BraceDetector::default().detect(&lines(src));
        assert_eq!(ranges(&spans), vec![(1, 3), (4, 4)]);
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let src = "function f() {\n  const s = \"}\";\n  // }\n  return s;\n}\n";
        let spans = BraceDetector::default().detect(&lines(src));
        assert_eq!(ranges(&spans), vec![(1, 5)]);
    }

    #[test]
    fn single_quoted_brace_does_not_swallow_next_function() {
        let src = "function a() {\n  const s = '{';\n  return s;\n}\n\nfunction b() {\n  return '}';\n}\n";
        let js = BraceDetector {
            single_quoted_strings: true,
        };
        assert_eq!(ranges(&js.detect(&lines(src))), vec![(1, 4), (6, 8)]);
    }

    #[test]
    fn rust_char_literals_and_lifetimes() {
        let src = "fn open(c: char) -> bool {\n    c == '{' || c == '\\''\n}\n\nimpl<'a> View<'a> {\n    fn get(&'a self) -> &'a str { self.s }\n}\n";
        let spans = BraceDetector::default().detect(&lines(src));
        assert_eq!(ranges(&spans), vec![(1, 3), (5, 7)]);
    }

    #[test]
    fn detector_for_js_skips_single_quoted_strings() {
        let src = "function a() {\n  return '{';\n}\nfunction b() {\n  return 1;\n}\n";
        let spans = detector_for(Lang::JavaScript, 40).detect(&lines(src));
        assert_eq!(ranges(&spans), vec![(1, 3), (4, 6)]);
    }

    #[test]
    fn multi_line_signature_opens_on_later_brace() {
        let src = "pub fn long(\n    a: u32,\n    b: u32,\n) -> u32 {\n    a + b\n}\n";
        let spans = BraceDetector::default().detect(&lines(src));
        assert_eq!(ranges(&spans), vec![(1, 6)]);
    }

    #[test]
    fn rust_attributes_attach_to_item() {
        let src = "#[derive(Debug)]\npub struct S {\n    x: u32,\n}\n\nimpl S {\n    fn get(&self) -> u32 { self.x }\n}\n";
        let spans = BraceDetector::default().detect(&lines(src));
        assert_eq!(ranges(&spans), vec![(1, 4), (6, 8)]);
        assert!(spans.iter().all(|s| s.kind == ChunkKind::Class));
    }

    #[test]
    fn go_functions() {
        let src = "package main\n\nfunc main() {\n\tfmt.Println(\"{\")\n}\n";
        let spans = BraceDetector::default().detect(&lines(src));
        assert_eq!(ranges(&spans), vec![(3, 5)]);
    }

    #[test]
    fn control_flow_is_not_a_header() {
        let src = "if (ready) {\n  go();\n}\n";
        assert!(BraceDetector::default().detect(&lines(src)).is_empty());
    }

    #[test]
    fn unclosed_block_runs_to_last_nonblank() {
        let src = "function broken() {\n  return 1;\n\n\n";
        let spans = BraceDetector::default().detect(&lines(src));
        assert_eq!(ranges(&spans), vec![(1, 2)]);
    }

    #[test]
    fn windowed_covers_to_last_nonblank() {
        let src = "a\nb\nc\nd\ne\n\n\n";
        let spans = WindowedDetector::new(2).detect(&lines(src));
        assert_eq!(ranges(&spans), vec![(1, 2), (3, 4), (5, 5)]);
        assert!(spans.iter().all(|s| s.kind == ChunkKind::Lines));
    }

    #[test]
    fn windowed_empty_input() {
        assert!(WindowedDetector::new(10).detect(&[]).is_empty());
        assert!(WindowedDetector::new(10).detect(&["  ", ""]).is_empty());
    }

    #[test]
    fn zero_window_is_clamped() {
        let spans = WindowedDetector::new(0).detect(&["x", "y"]);
        assert_eq!(ranges(&spans), vec![(1, 1), (2, 2)]);
    }
}
