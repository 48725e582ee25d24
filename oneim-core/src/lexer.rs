use crate::error::CoreError;

/// The closed set of token kinds. Literal and name tokens carry their text
/// in the token's lexeme slice, so every kind stays fieldless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Declaration keywords
    Set,
    To,
    With,
    As,
    Returns,
    Return,
    // Control flow keywords
    If,
    Then,
    Else,
    Loop,
    While,
    For,
    In,
    Break,
    Continue,
    // Error handling keywords
    Try,
    Catch,
    // Literal keywords
    True,
    False,
    Null,
    And,
    Or,
    Not,
    // Reserved keywords (module system / FFI); `parallel` and `fn` are the
    // only two the grammar uses today.
    Import,
    From,
    Parallel,
    Fn,
    // Type keywords
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Str,
    Void,
    // Literals and identifiers
    IntLit,
    FloatLit,
    StrLit,
    Name,
    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    DotDot,
    DotDotEq,
    Colon,
    Bang,
    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    // Structure
    Newline,
    Eof,
}

/// A token with its raw lexeme and 1-indexed source position. The column is
/// load-bearing: the parser delimits blocks by comparing statement start
/// columns, so every token must carry one.
#[derive(Debug, Clone, Copy)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub line: u32,
    pub col: u32,
}

pub fn lex(source: &str) -> Result<Vec<Token<'_>>, CoreError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0usize;
    let mut line = 1u32;
    let mut col = 1u32;

    while pos < bytes.len() {
        let start = pos;
        let start_line = line;
        let start_col = col;
        let b = bytes[pos];

        match b {
            b' ' | b'\t' | b'\r' => {
                pos += 1;
                col += 1;
            }
            b'#' => {
                // Line comment: consume up to but not including the newline.
                while pos < bytes.len() && bytes[pos] != b'\n' {
                    pos += 1;
                    col += 1;
                }
            }
            b'\n' => {
                tokens.push(Token {
                    kind: TokenKind::Newline,
                    lexeme: &source[pos..pos + 1],
                    line: start_line,
                    col: start_col,
                });
                pos += 1;
                line += 1;
                col = 1;
            }
            b'"' => {
                pos += 1;
                col += 1;
                let body_start = pos;
                let mut closed = false;
                while pos < bytes.len() {
                    match bytes[pos] {
                        b'"' => {
                            closed = true;
                            break;
                        }
                        b'\\' => {
                            // The escaped byte is carried raw; codegen passes
                            // the body straight into a C string literal.
                            pos += 1;
                            col += 1;
                            if pos < bytes.len() {
                                pos += 1;
                                col += 1;
                            }
                        }
                        b'\n' => {
                            pos += 1;
                            line += 1;
                            col = 1;
                        }
                        _ => {
                            pos += 1;
                            col += 1;
                        }
                    }
                }
                if !closed {
                    return Err(CoreError::Lex {
                        line: start_line,
                        col: start_col,
                        message: "unterminated string literal".to_string(),
                    });
                }
                let body_end = pos;
                pos += 1;
                col += 1;
                tokens.push(Token {
                    kind: TokenKind::StrLit,
                    lexeme: &source[body_start..body_end],
                    line: start_line,
                    col: start_col,
                });
            }
            b'0'..=b'9' => {
                while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                    pos += 1;
                    col += 1;
                }
                let mut kind = TokenKind::IntLit;
                // A dot joins the number only when a digit follows, so that
                // `1..3` stays IntLit DotDot IntLit.
                if pos + 1 < bytes.len() && bytes[pos] == b'.' && bytes[pos + 1].is_ascii_digit() {
                    pos += 1;
                    col += 1;
                    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                        pos += 1;
                        col += 1;
                    }
                    kind = TokenKind::FloatLit;
                }
                tokens.push(Token {
                    kind,
                    lexeme: &source[start..pos],
                    line: start_line,
                    col: start_col,
                });
            }
            _ if is_ident_start(b) => {
                while pos < bytes.len() && is_ident_continue(bytes[pos]) {
                    pos += 1;
                    col += 1;
                }
                let lexeme = &source[start..pos];
                tokens.push(Token {
                    kind: keyword_kind(lexeme).unwrap_or(TokenKind::Name),
                    lexeme,
                    line: start_line,
                    col: start_col,
                });
            }
            _ => {
                let rest = &bytes[pos..];
                // Two-character operators match greedily before the
                // single-character fallbacks.
                let (kind, len) = match b {
                    b'=' if rest.len() > 1 && rest[1] == b'=' => (TokenKind::EqEq, 2),
                    b'!' if rest.len() > 1 && rest[1] == b'=' => (TokenKind::NotEq, 2),
                    b'!' => (TokenKind::Bang, 1),
                    b'<' if rest.len() > 1 && rest[1] == b'=' => (TokenKind::Le, 2),
                    b'<' => (TokenKind::Lt, 1),
                    b'>' if rest.len() > 1 && rest[1] == b'=' => (TokenKind::Ge, 2),
                    b'>' => (TokenKind::Gt, 1),
                    b'.' if rest.len() > 2 && rest[1] == b'.' && rest[2] == b'=' => {
                        (TokenKind::DotDotEq, 3)
                    }
                    b'.' if rest.len() > 1 && rest[1] == b'.' => (TokenKind::DotDot, 2),
                    b'.' => (TokenKind::Dot, 1),
                    b'+' => (TokenKind::Plus, 1),
                    b'-' => (TokenKind::Minus, 1),
                    b'*' => (TokenKind::Star, 1),
                    b'/' => (TokenKind::Slash, 1),
                    b'%' => (TokenKind::Percent, 1),
                    b'(' => (TokenKind::LParen, 1),
                    b')' => (TokenKind::RParen, 1),
                    b'[' => (TokenKind::LBracket, 1),
                    b']' => (TokenKind::RBracket, 1),
                    b'{' => (TokenKind::LBrace, 1),
                    b'}' => (TokenKind::RBrace, 1),
                    b',' => (TokenKind::Comma, 1),
                    b':' => (TokenKind::Colon, 1),
                    _ => {
                        return Err(CoreError::Lex {
                            line: start_line,
                            col: start_col,
                            message: format!("unexpected character '{}'", b as char),
                        });
                    }
                };
                pos += len;
                col += len as u32;
                tokens.push(Token {
                    kind,
                    lexeme: &source[start..pos],
                    line: start_line,
                    col: start_col,
                });
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        lexeme: "",
        line,
        col,
    });
    Ok(tokens)
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn keyword_kind(ident: &str) -> Option<TokenKind> {
    use TokenKind::*;
    let kind = match ident {
        "set" => Set,
        "to" => To,
        "with" => With,
        "as" => As,
        "returns" => Returns,
        "return" => Return,
        "if" => If,
        "then" => Then,
        "else" => Else,
        "loop" => Loop,
        "while" => While,
        "for" => For,
        "in" => In,
        "break" => Break,
        "continue" => Continue,
        "try" => Try,
        "catch" => Catch,
        "true" => True,
        "false" => False,
        "null" => Null,
        "and" => And,
        "or" => Or,
        "not" => Not,
        "import" => Import,
        "from" => From,
        "parallel" => Parallel,
        "fn" => Fn,
        "i8" => I8,
        "i16" => I16,
        "i32" => I32,
        "i64" => I64,
        "u8" => U8,
        "u16" => U16,
        "u32" => U32,
        "u64" => U64,
        "f32" => F32,
        "f64" => F64,
        "bool" => Bool,
        "str" => Str,
        "void" => Void,
        _ => return None,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source)
            .expect("lex should succeed")
            .iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_assignment_statement() {
        assert_eq!(
            kinds("set age to 41"),
            vec![
                TokenKind::Set,
                TokenKind::Name,
                TokenKind::To,
                TokenKind::IntLit,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn ends_in_exactly_one_eof() {
        let tokens = lex("set x to 1\n").expect("lex");
        let eofs = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Eof)
            .count();
        assert_eq!(eofs, 1);
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn every_lexeme_respells_the_source() {
        let source = "set nums to [1, 2.5, \"hi\"]\nprint(nums)";
        for token in lex(source).expect("lex") {
            if token.kind == TokenKind::Eof {
                continue;
            }
            assert!(
                source.contains(token.lexeme),
                "lexeme {:?} not found in source",
                token.lexeme
            );
        }
    }

    #[test]
    fn tracks_lines_and_columns() {
        let tokens = lex("set x to 1\n    print(x)").expect("lex");
        let print = tokens
            .iter()
            .find(|t| t.lexeme == "print")
            .expect("print token");
        assert_eq!((print.line, print.col), (2, 5));
        let newline = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Newline)
            .expect("newline token");
        assert_eq!((newline.line, newline.col), (1, 11));
    }

    #[test]
    fn newlines_are_significant_other_whitespace_is_not() {
        let tokens = lex("a \t\r b\nc").expect("lex");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Name,
                TokenKind::Name,
                TokenKind::Newline,
                TokenKind::Name,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn comments_run_to_end_of_line() {
        assert_eq!(
            kinds("set x to 1 # trailing comment\nprint(x)"),
            vec![
                TokenKind::Set,
                TokenKind::Name,
                TokenKind::To,
                TokenKind::IntLit,
                TokenKind::Newline,
                TokenKind::Name,
                TokenKind::LParen,
                TokenKind::Name,
                TokenKind::RParen,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn distinguishes_int_and_float_literals() {
        let tokens = lex("1 2.5 3.").expect("lex");
        assert_eq!(tokens[0].kind, TokenKind::IntLit);
        assert_eq!(tokens[1].kind, TokenKind::FloatLit);
        assert_eq!(tokens[1].lexeme, "2.5");
        // A trailing dot is not part of the number.
        assert_eq!(tokens[2].kind, TokenKind::IntLit);
        assert_eq!(tokens[3].kind, TokenKind::Dot);
    }

    #[test]
    fn range_punctuation_does_not_swallow_digits() {
        assert_eq!(
            kinds("1..3"),
            vec![
                TokenKind::IntLit,
                TokenKind::DotDot,
                TokenKind::IntLit,
                TokenKind::Eof
            ]
        );
        assert_eq!(
            kinds("1..=3"),
            vec![
                TokenKind::IntLit,
                TokenKind::DotDotEq,
                TokenKind::IntLit,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn matches_two_character_operators_greedily() {
        assert_eq!(
            kinds("a == b != c <= d >= e"),
            vec![
                TokenKind::Name,
                TokenKind::EqEq,
                TokenKind::Name,
                TokenKind::NotEq,
                TokenKind::Name,
                TokenKind::Le,
                TokenKind::Name,
                TokenKind::Ge,
                TokenKind::Name,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn string_lexeme_is_raw_body_without_quotes() {
        let tokens = lex(r#"set s to "a \"quoted\" word""#).expect("lex");
        let lit = tokens
            .iter()
            .find(|t| t.kind == TokenKind::StrLit)
            .expect("string token");
        assert_eq!(lit.lexeme, r#"a \"quoted\" word"#);
    }

    #[test]
    fn recognizes_keywords_and_type_names() {
        assert_eq!(
            kinds("loop while true"),
            vec![
                TokenKind::Loop,
                TokenKind::While,
                TokenKind::True,
                TokenKind::Eof
            ]
        );
        assert_eq!(
            kinds("i32 u64 f32 bool str void"),
            vec![
                TokenKind::I32,
                TokenKind::U64,
                TokenKind::F32,
                TokenKind::Bool,
                TokenKind::Str,
                TokenKind::Void,
                TokenKind::Eof
            ]
        );
        // Near-keywords stay names.
        assert_eq!(kinds("settle")[0], TokenKind::Name);
    }

    #[test]
    fn error_union_type_syntax_lexes() {
        assert_eq!(
            kinds("i32!str"),
            vec![
                TokenKind::I32,
                TokenKind::Bang,
                TokenKind::Str,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn reports_unterminated_string() {
        let err = lex("set s to \"oops").unwrap_err();
        assert!(err.to_string().contains("unterminated string"));
    }

    #[test]
    fn reports_unexpected_character() {
        let err = lex("set x to 1 @").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unexpected character"), "{message}");
        assert!(message.contains("1:12"), "{message}");
    }
}
