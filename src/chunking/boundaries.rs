//! Pattern-based structure detection over a file's lines.
//!
//! Lines are the pieces produced by `split_inclusive('\n')`, so they still
//! carry their terminators. Spans are half-open ranges of line indices.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;
use std::path::Path;

/// How block extents are found for a language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    /// Blocks end at the first line dedented to the definition's indent
    Python,
    /// Indentation rules plus a closing `end` line
    Ruby,
    /// Blocks are delimited by braces
    CLike,
}

impl Language {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "py" | "pyi" | "pyw" => Some(Language::Python),
            "rb" | "rake" => Some(Language::Ruby),
            "rs" | "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" | "go" | "c" | "h" | "cc"
            | "cpp" | "cxx" | "hpp" | "hh" | "java" | "kt" | "kts" | "scala" | "cs" | "php"
            | "swift" | "m" | "mm" | "dart" | "groovy" | "gradle" => Some(Language::CLike),
            _ => None,
        }
    }

    /// Use the path when it is recognised, otherwise sniff the content
    pub fn detect(file_id: &str, lines: &[&str]) -> Self {
        if let Some(lang) = Self::from_path(Path::new(file_id)) {
            return lang;
        }
        let python_like = lines.iter().any(|line| {
            let text = strip_terminator(line);
            PY_FUNCTION.is_match(text) && text.trim_end().ends_with(':')
        });
        if python_like {
            Language::Python
        } else {
            Language::CLike
        }
    }
}

static PY_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:async\s+)?def\s+\w+\s*\(").unwrap());
static PY_CLASS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*class\s+\w+\s*[:(]").unwrap());

static RB_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*def\s+(?:self\.)?[\w?!=]+").unwrap());
static RB_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:class|module)\s+[A-Z]\w*").unwrap());

static C_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:(?:public|private|protected|internal|abstract|final|sealed|static|partial|export|default|data|open|pub(?:\([^)]*\))?)\s+)*(?:class|struct|interface|enum|trait|impl|object|record|protocol|extension|union)(?:\s|<|\{|$)",
    )
    .unwrap()
});
static GO_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*type\s+\w+\s+(?:struct|interface)\b").unwrap());

/// Definitions introduced by a keyword, safe to accept on sight
static C_KEYWORD_FUNCTIONS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // javascript, php
        r"^\s*(?:(?:export|default|async|public|private|protected|static|abstract|final)\s+)*function\b",
        // arrow functions and function expressions bound to a name
        r"^\s*(?:export\s+)?(?:const|let|var)\s+\w+\s*=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*(?::\s*[^=]+)?=>|\w+\s*=>)",
        // rust
        r#"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:(?:async|const|unsafe|extern(?:\s+"[^"]*")?)\s+)*fn\s+\w+"#,
        // go, swift
        r"^\s*(?:(?:public|private|internal|fileprivate|open|static|override|final|mutating)\s+)*func\s+",
        // kotlin, scala
        r"^\s*(?:(?:public|private|protected|internal|open|override|abstract|final|suspend|inline)\s+)*(?:fun|def)\s+\w+",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// `<type> name(` signatures (C, C++, Java, C#)
static C_TYPED_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?P<first>[\w:<>\[\],.*&?]+)\s+(?:[\w:<>\[\],.*&?]+\s+)*[*&]*(?P<name>[\w:~]+)\s*\([^;]*$")
        .unwrap()
});

/// `name(args) {` method shorthand (javascript/typescript classes)
static C_METHOD_SHORTHAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:(?:static|async|get|set|public|private|protected|readonly|override)\s+)*\*?(?P<name>[A-Za-z_$][\w$]*)\s*\([^;]*\)\s*(?::\s*[^{;]+)?\{\s*$",
    )
    .unwrap()
});

static MD_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s{0,3}#{1,6}(?:\s+|$)").unwrap());

/// Words that open statements or expressions, never definitions
const NON_DEFINITION_WORDS: &[&str] = &[
    "if", "else", "for", "while", "switch", "return", "catch", "new", "throw", "case", "do",
    "sizeof", "await", "yield", "delete", "typeof", "using", "goto", "defer", "go", "select",
    "match", "when", "try", "with", "elif", "print",
];

const RST_UNDERLINE_CHARS: &str = "=-~`#\"^+*";

pub(crate) fn strip_terminator(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn indent_of(line: &str) -> usize {
    line.chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn is_c_function(text: &str) -> bool {
    if C_KEYWORD_FUNCTIONS.iter().any(|re| re.is_match(text)) {
        return true;
    }
    if let Some(caps) = C_TYPED_FUNCTION.captures(text) {
        let first = caps.name("first").map_or("", |m| m.as_str());
        let name = caps.name("name").map_or("", |m| m.as_str());
        if !NON_DEFINITION_WORDS.contains(&first) && !NON_DEFINITION_WORDS.contains(&name) {
            return true;
        }
    }
    if let Some(caps) = C_METHOD_SHORTHAND.captures(text) {
        let name = caps.name("name").map_or("", |m| m.as_str());
        let first = text.split_whitespace().next().unwrap_or("");
        return !NON_DEFINITION_WORDS.contains(&name) && !NON_DEFINITION_WORDS.contains(&first);
    }
    false
}

fn is_function(text: &str, lang: Language) -> bool {
    match lang {
        Language::Python => PY_FUNCTION.is_match(text),
        Language::Ruby => RB_FUNCTION.is_match(text),
        Language::CLike => is_c_function(text),
    }
}

fn is_class(text: &str, lang: Language) -> bool {
    match lang {
        Language::Python => PY_CLASS.is_match(text),
        Language::Ruby => RB_CLASS.is_match(text),
        Language::CLike => C_CLASS.is_match(text) || GO_TYPE.is_match(text),
    }
}

/// Index one past the last line of the block opened at `start`
pub fn block_end(lines: &[&str], start: usize, lang: Language) -> usize {
    match lang {
        Language::Python => indent_block_end(lines, start, false),
        Language::Ruby => indent_block_end(lines, start, true),
        Language::CLike => brace_block_end(lines, start),
    }
}

fn bracket_delta(text: &str) -> i32 {
    text.chars().fold(0, |depth, c| match c {
        '(' | '[' | '{' => depth + 1,
        ')' | ']' | '}' => depth - 1,
        _ => depth,
    })
}

fn indent_block_end(lines: &[&str], start: usize, closing_end: bool) -> usize {
    let base = indent_of(lines[start]);

    // A signature may continue over several bracketed lines.
    let mut header_end = start;
    let mut depth = 0;
    while header_end < lines.len() {
        depth += bracket_delta(strip_terminator(lines[header_end]));
        if depth <= 0 || header_end + 1 == lines.len() {
            break;
        }
        header_end += 1;
    }

    let mut last_content = header_end;
    for (i, line) in lines.iter().enumerate().skip(header_end + 1) {
        if is_blank(line) {
            continue;
        }
        if indent_of(line) <= base {
            if closing_end && indent_of(line) == base && line.trim() == "end" {
                return i + 1;
            }
            return last_content + 1;
        }
        last_content = i;
    }
    last_content + 1
}

fn brace_block_end(lines: &[&str], start: usize) -> usize {
    let mut depth = 0i32;
    let mut parens = 0i32;
    let mut opened = false;

    for i in start..lines.len() {
        let text = strip_terminator(lines[i]);
        let code = text.split("//").next().unwrap_or(text);
        for c in code.chars() {
            match c {
                '(' => parens += 1,
                ')' => parens -= 1,
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => {
                    depth -= 1;
                    if opened && depth <= 0 {
                        return i + 1;
                    }
                }
                ';' if !opened && parens <= 0 => return i + 1,
                _ => {}
            }
        }

        if !opened && parens <= 0 {
            // Header is complete; only an opening brace on the next line keeps it going.
            let next = lines[i + 1..].iter().position(|l| !is_blank(l));
            match next {
                Some(offset) if lines[i + 1 + offset].trim_start().starts_with('{') => {}
                _ => return i + 1,
            }
        }
    }
    lines.len()
}

/// Pull decorators and attributes directly above `start` into the span
fn attach_decorators(lines: &[&str], start: usize, floor: usize) -> usize {
    let mut first = start;
    while first > floor {
        let prev = lines[first - 1].trim_start();
        if prev.starts_with('@') || prev.starts_with("#[") {
            first -= 1;
        } else {
            break;
        }
    }
    first
}

fn outermost(
    lines: &[&str],
    range: Range<usize>,
    lang: Language,
    matches: impl Fn(&str) -> bool,
) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut floor = range.start;
    let mut i = range.start;
    while i < range.end {
        if matches(strip_terminator(lines[i])) {
            let end = block_end(lines, i, lang).clamp(i + 1, range.end);
            let start = attach_decorators(lines, i, floor);
            spans.push(start..end);
            floor = end;
            i = end;
        } else {
            i += 1;
        }
    }
    spans
}

/// Outermost function definitions in the whole file
pub fn find_functions(lines: &[&str], lang: Language) -> Vec<Range<usize>> {
    find_functions_in(lines, lang, 0..lines.len())
}

/// Outermost function definitions inside `range`
pub fn find_functions_in(
    lines: &[&str],
    lang: Language,
    range: Range<usize>,
) -> Vec<Range<usize>> {
    outermost(lines, range, lang, |text| is_function(text, lang))
}

/// Outermost class/type definitions
pub fn find_classes(lines: &[&str], lang: Language) -> Vec<Range<usize>> {
    outermost(lines, 0..lines.len(), lang, |text| is_class(text, lang))
}

fn underline_char(text: &str) -> Option<char> {
    let text = text.trim_end();
    let first = text.chars().next()?;
    if text.chars().count() < 3 || !RST_UNDERLINE_CHARS.contains(first) {
        return None;
    }
    text.chars().all(|c| c == first).then_some(first)
}

/// Line indices where a document section starts.
///
/// Recognises `#` headers and underlined titles (setext and reStructuredText),
/// ignoring anything inside fenced code blocks.
pub fn find_sections(lines: &[&str]) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut fence: Option<char> = None;

    for (i, line) in lines.iter().enumerate() {
        let text = strip_terminator(line);
        let trimmed = text.trim_start();

        if let Some(marker) = fence {
            if trimmed.starts_with(&marker.to_string().repeat(3)) {
                fence = None;
            }
            continue;
        }
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            fence = trimmed.chars().next();
            continue;
        }

        if MD_HEADER.is_match(text) {
            starts.push(i);
            continue;
        }

        if i == 0 {
            continue;
        }
        let Some(marker) = underline_char(text) else {
            continue;
        };
        let title = strip_terminator(lines[i - 1]);
        if is_blank(title) || underline_char(title).is_some() {
            continue;
        }
        let mut start = i - 1;
        if start > 0 && underline_char(strip_terminator(lines[start - 1])) == Some(marker) {
            start -= 1;
        }
        if starts.last().is_some_and(|&last| last >= start) {
            continue;
        }
        starts.push(start);
    }
    starts
}

/// Split `range` into contiguous pieces cut at every span edge
pub fn cut_at(range: Range<usize>, spans: &[Range<usize>]) -> Vec<Range<usize>> {
    let mut points: Vec<usize> = vec![range.start, range.end];
    for span in spans {
        points.push(span.start.clamp(range.start, range.end));
        points.push(span.end.clamp(range.start, range.end));
    }
    points.sort_unstable();
    points.dedup();
    points
        .windows(2)
        .map(|w| w[0]..w[1])
        .filter(|r| !r.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(content: &str) -> Vec<&str> {
        content.split_inclusive('\n').collect()
    }

    #[test]
    fn test_python_functions_and_decorators() {
        let src = "import os\n\n@cache\ndef a(x):\n    return x\n\n\nasync def b(\n    y,\n):\n    pass\nprint(1)\n";
        let lines = split(src);
        let spans = find_functions(&lines, Language::Python);
        assert_eq!(spans, vec![2..5, 7..11]);
    }

    #[test]
    fn test_python_nested_functions_are_not_boundaries() {
        let src = "def outer():\n    def inner():\n        pass\n    return inner\n";
        let lines = split(src);
        assert_eq!(find_functions(&lines, Language::Python), vec![0..4]);
    }

    #[test]
    fn test_python_class_with_methods() {
        let src = "class A:\n    def f(self):\n        pass\n\n    def g(self):\n        pass\nx = 1\n";
        let lines = split(src);
        let classes = find_classes(&lines, Language::Python);
        assert_eq!(classes, vec![0..6]);
        let methods = find_functions_in(&lines, Language::Python, 1..6);
        assert_eq!(methods, vec![1..3, 4..6]);
    }

    #[test]
    fn test_ruby_blocks_include_end() {
        let src = "class Foo\n  def bar\n    1\n  end\nend\nputs 1\n";
        let lines = split(src);
        assert_eq!(find_classes(&lines, Language::Ruby), vec![0..5]);
        assert_eq!(find_functions_in(&lines, Language::Ruby, 1..5), vec![1..4]);
    }

    #[test]
    fn test_brace_blocks() {
        let src = "use std::io;\n\n#[inline]\npub fn a() -> u32 {\n    if true { 1 } else { 2 }\n}\n\nfn b();\nfn c()\n{\n}\n";
        let lines = split(src);
        assert_eq!(find_functions(&lines, Language::CLike), vec![2..6, 7..8, 8..11]);
    }

    #[test]
    fn test_control_flow_is_not_a_function() {
        for text in [
            "    if (x) {",
            "    return foo(a, b)",
            "    else if (y) {",
            "    while (true) {",
            "    new Thing(a,",
        ] {
            assert!(!is_c_function(text), "{text}");
        }
        for text in [
            "public static void main(String[] args) {",
            "int main(void)",
            "export async function load() {",
            "const handler = async (req) => {",
            "  render(props) {",
            "func (s *Server) Start() error {",
        ] {
            assert!(is_c_function(text), "{text}");
        }
    }

    #[test]
    fn test_brace_classes() {
        let src = "impl Foo {\n    fn a(&self) {}\n}\n\npub struct Bar {\n    x: u8,\n}\ntype S struct {\n}\n";
        let lines = split(src);
        assert_eq!(find_classes(&lines, Language::CLike), vec![0..3, 4..7, 7..9]);
    }

    #[test]
    fn test_markdown_sections_skip_fences() {
        let src = "intro\n# One\ntext\n```\n# not a header\n```\n## Two\nmore\n";
        let lines = split(src);
        assert_eq!(find_sections(&lines), vec![1, 6]);
    }

    #[test]
    fn test_underlined_titles() {
        let src = "Title\n=====\n\nbody\n\nSub\n---\nmore\n";
        let lines = split(src);
        assert_eq!(find_sections(&lines), vec![0, 5]);
    }

    #[test]
    fn test_cut_at_covers_range() {
        let pieces = cut_at(0..10, &[2..4, 4..7]);
        assert_eq!(pieces, vec![0..2, 2..4, 4..7, 7..10]);
        assert_eq!(cut_at(0..3, &[]), vec![0..3]);
    }

    #[test]
    fn test_detect_language() {
        let lines = split("def f():\n    pass\n");
        assert_eq!(Language::detect("snippet", &lines), Language::Python);
        assert_eq!(Language::detect("a.rs", &lines), Language::CLike);
        assert_eq!(Language::detect("b.rb", &[]), Language::Ruby);
    }
}
