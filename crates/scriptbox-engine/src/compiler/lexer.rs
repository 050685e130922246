//! Lexer and preprocessor for `.sbs` assembler sources
//!
//! `#if` / `#else` / `#endif` are resolved line by line before lexing.
//! Inactive lines are blanked so token positions still match the file.

use super::Diagnostic;
use logos::Logos;

/// Assembler tokens
///
/// Keywords and mnemonics are plain identifiers; the parser tells them apart.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    /// Identifier, possibly dotted (`Game.Enemy`)
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*", |lex| lex.slice().to_string())]
    Ident(String),

    /// Integer literal
    #[regex(r"-?[0-9]+", parse_int)]
    Int(i64),

    /// Float literal
    #[regex(r"-?[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", parse_float)]
    Float(f64),

    /// String literal
    #[regex(r#""([^"\\\n]|\\.)*""#, parse_string)]
    Str(String),

    /// `{`
    #[token("{")]
    LeftBrace,

    /// `}`
    #[token("}")]
    RightBrace,

    /// `(`
    #[token("(")]
    LeftParen,

    /// `)`
    #[token(")")]
    RightParen,

    /// `[`
    #[token("[")]
    LeftBracket,

    /// `]`
    #[token("]")]
    RightBracket,

    /// `:`
    #[token(":")]
    Colon,

    /// `,`
    #[token(",")]
    Comma,

    /// `=`
    #[token("=")]
    Equal,
}

impl Token {
    /// Short description for diagnostics
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("'{}'", s),
            Token::Int(i) => format!("'{}'", i),
            Token::Float(f) => format!("'{}'", f),
            Token::Str(_) => "string literal".to_string(),
            Token::LeftBrace => "'{'".to_string(),
            Token::RightBrace => "'}'".to_string(),
            Token::LeftParen => "'('".to_string(),
            Token::RightParen => "')'".to_string(),
            Token::LeftBracket => "'['".to_string(),
            Token::RightBracket => "']'".to_string(),
            Token::Colon => "':'".to_string(),
            Token::Comma => "','".to_string(),
            Token::Equal => "'='".to_string(),
        }
    }
}

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn parse_float(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let s = lex.slice();
    unescape(&s[1..s.len() - 1])
}

fn unescape(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        out.push(match chars.next()? {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '0' => '\0',
            '\\' => '\\',
            '"' => '"',
            _ => return None,
        });
    }
    Some(out)
}

/// A token with its source position
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    /// The token
    pub token: Token,
    /// Line (1-indexed)
    pub line: u32,
    /// Column (1-indexed)
    pub column: u32,
}

/// Byte offset to line/column mapping
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn position(&self, offset: usize) -> (u32, u32) {
        let line = match self.starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        ((line + 1) as u32, (offset - self.starts[line] + 1) as u32)
    }
}

/// Resolve conditional-compilation directives
///
/// Returns the source with directive and inactive lines blanked.
pub fn preprocess(source: &str, file: &str, defines: &[String]) -> (String, Vec<Diagnostic>) {
    // Each frame: (branch active, parent active, seen #else)
    let mut stack: Vec<(bool, bool, bool)> = Vec::new();
    let mut diagnostics = Vec::new();
    let mut out = String::with_capacity(source.len());

    for (idx, line) in source.split('\n').enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        let line_no = idx as u32 + 1;
        let active = stack.last().map_or(true, |&(active, _, _)| active);
        let trimmed = line.trim();

        if let Some(rest) = trimmed.strip_prefix("#if") {
            let symbol = rest.trim();
            if symbol.is_empty() {
                diagnostics.push(
                    Diagnostic::error("SB1517", "#if requires a symbol").at(file, line_no, 1),
                );
            }
            let (negate, symbol) = match symbol.strip_prefix('!') {
                Some(s) => (true, s.trim()),
                None => (false, symbol),
            };
            let defined = defines.iter().any(|d| d == symbol);
            stack.push((active && (defined != negate), active, false));
        } else if trimmed == "#else" {
            match stack.last_mut() {
                Some(frame) if !frame.2 => {
                    *frame = (frame.1 && !frame.0, frame.1, true);
                }
                _ => diagnostics.push(
                    Diagnostic::error("SB1028", "unexpected #else").at(file, line_no, 1),
                ),
            }
        } else if trimmed == "#endif" {
            if stack.pop().is_none() {
                diagnostics.push(
                    Diagnostic::error("SB1028", "unexpected #endif").at(file, line_no, 1),
                );
            }
        } else if active {
            out.push_str(line);
        }
    }

    if !stack.is_empty() {
        let last_line = source.split('\n').count() as u32;
        diagnostics.push(Diagnostic::error("SB1027", "#endif directive expected").at(file, last_line, 1));
    }

    (out, diagnostics)
}

/// Tokenize preprocessed source
///
/// Unrecognized input becomes an `SB0001` diagnostic and lexing continues.
pub fn tokenize(source: &str, file: &str) -> (Vec<Spanned>, Vec<Diagnostic>) {
    let index = LineIndex::new(source);
    let mut tokens = Vec::new();
    let mut diagnostics = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        let (line, column) = index.position(lexer.span().start);
        match result {
            Ok(token) => tokens.push(Spanned { token, line, column }),
            Err(()) => diagnostics.push(
                Diagnostic::error("SB0001", format!("unexpected input '{}'", lexer.slice()))
                    .at(file, line, column),
            ),
        }
    }

    (tokens, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        let (tokens, diags) = tokenize(source, "t.sbs");
        assert!(diags.is_empty(), "{:?}", diags);
        tokens.into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_tokens_and_literals() {
        assert_eq!(
            kinds(r#"field hp: int = -3 // comment
                     push_str "a\"b" push_float 2.5"#),
            vec![
                Token::Ident("field".to_string()),
                Token::Ident("hp".to_string()),
                Token::Colon,
                Token::Ident("int".to_string()),
                Token::Equal,
                Token::Int(-3),
                Token::Ident("push_str".to_string()),
                Token::Str("a\"b".to_string()),
                Token::Ident("push_float".to_string()),
                Token::Float(2.5),
            ]
        );
    }

    #[test]
    fn test_dotted_identifiers() {
        assert_eq!(
            kinds("call_static Game.Util helper 2"),
            vec![
                Token::Ident("call_static".to_string()),
                Token::Ident("Game.Util".to_string()),
                Token::Ident("helper".to_string()),
                Token::Int(2),
            ]
        );
    }

    #[test]
    fn test_positions() {
        let (tokens, _) = tokenize("a\n  b", "t.sbs");
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn test_lex_error_is_reported() {
        let (tokens, diags) = tokenize("a $ b", "t.sbs");
        assert_eq!(tokens.len(), 2);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "SB0001");
        assert_eq!(diags[0].column, 3);
    }

    #[test]
    fn test_preprocess_branches() {
        let source = "a\n#if DEBUG\nb\n#else\nc\n#endif\n#if !DEBUG\nd\n#endif";
        let (out, diags) = preprocess(source, "t.sbs", &["DEBUG".to_string()]);
        assert!(diags.is_empty());
        assert_eq!(out.lines().map(str::trim).filter(|l| !l.is_empty()).collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(out.split('\n').count(), source.split('\n').count());

        let (out, _) = preprocess(source, "t.sbs", &[]);
        assert_eq!(out.lines().filter(|l| !l.is_empty()).collect::<Vec<_>>(), ["a", "c", "d"]);
    }

    #[test]
    fn test_preprocess_unbalanced() {
        let (_, diags) = preprocess("#if X\na", "t.sbs", &[]);
        assert_eq!(diags[0].code, "SB1027");
        let (_, diags) = preprocess("#endif", "t.sbs", &[]);
        assert_eq!(diags[0].code, "SB1028");
    }
}
