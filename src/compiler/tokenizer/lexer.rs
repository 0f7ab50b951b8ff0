//! Source bytes -> token stream.
//!
//! The lexer consumes raw bytes. Outside of string literals, the source
//! must be valid UTF-8 (and identifiers plain ASCII); inside string
//! literals invalid bytes are escaped into the U+DC80..U+DCFF surrogate
//! range so they survive into the constant table.

use crate::compiler::compiler_messages::results::{ResultMessage, ResultMessages};
use crate::compiler::compiler_messages::warning_config::WarningConfig;
use crate::compiler::string_interning::StringTable;
use crate::compiler::tokenizer::tokens::{Keyword, Token, TokenKind};
use crate::settings::{IDENTIFIER_LEN_MAX, SRC_TO_TOKEN_RATIO};
use crate::{return_syntax_error, token_log};

struct ByteStream<'a> {
    source: &'a [u8],
    pos: usize,
    line: i64,
    column: i64,
}

impl<'a> ByteStream<'a> {
    fn new(source: &'a [u8]) -> ByteStream<'a> {
        ByteStream {
            source,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.source.get(self.pos + ahead).copied()
    }

    fn next(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(byte)
    }

    fn skip(&mut self, count: usize) {
        for _ in 0..count {
            self.next();
        }
    }

    /// Decode one UTF-8 sequence. Returns the code point and how many
    /// bytes it spans, or None for an invalid sequence.
    fn decode_utf8(&self) -> Option<(u32, usize)> {
        let first = self.peek()? as u32;
        if first < 0x80 {
            return Some((first, 1));
        }
        let (len, init) = match first {
            0xC2..=0xDF => (2, first & 0x1F),
            0xE0..=0xEF => (3, first & 0x0F),
            0xF0..=0xF4 => (4, first & 0x07),
            _ => return None,
        };
        let mut codepoint = init;
        for i in 1..len {
            let cont = self.peek_at(i)? as u32;
            if cont & 0xC0 != 0x80 {
                return None;
            }
            codepoint = (codepoint << 6) | (cont & 0x3F);
        }
        let valid = match len {
            2 => (0x80..=0x7FF).contains(&codepoint),
            3 => (0x800..=0xFFFF).contains(&codepoint) && !(0xD800..=0xDFFF).contains(&codepoint),
            _ => (0x10000..=0x10FFFF).contains(&codepoint),
        };
        if valid { Some((codepoint, len)) } else { None }
    }
}

pub fn tokenize(
    source: &[u8],
    warning_config: &WarningConfig,
    string_table: &mut StringTable,
    result: &mut ResultMessages,
) -> Result<Vec<Token>, ResultMessage> {
    let mut tokens: Vec<Token> = Vec::with_capacity(source.len() / SRC_TO_TOKEN_RATIO);
    let mut stream = ByteStream::new(source);

    loop {
        let token = get_next_token(&mut stream, warning_config, string_table, result)?;
        token_log!({ format!("{:?}", token) });
        let is_eof = token.kind == TokenKind::Eof;
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    Ok(tokens)
}

fn get_next_token(
    stream: &mut ByteStream,
    warning_config: &WarningConfig,
    string_table: &mut StringTable,
    result: &mut ResultMessages,
) -> Result<Token, ResultMessage> {
    // Skip whitespace and comments:
    loop {
        match stream.peek() {
            Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                stream.next();
            }
            Some(b'#') => {
                while let Some(byte) = stream.peek() {
                    if byte == b'\n' {
                        break;
                    }
                    stream.next();
                }
            }
            _ => break,
        }
    }

    let line = stream.line;
    let column = stream.column;
    let Some(byte) = stream.peek() else {
        return Ok(Token::new(TokenKind::Eof, line, column));
    };

    // Bytes literal prefix:
    if byte == b'b' && matches!(stream.peek_at(1), Some(b'"') | Some(b'\'')) {
        stream.next();
        let content = read_quoted(stream, warning_config, result, true)?;
        let bytes = content.iter().map(|&cp| cp as u8).collect();
        return Ok(Token::new(TokenKind::BytesLiteral(bytes), line, column));
    }

    if byte == b'"' || byte == b'\'' {
        let content = read_quoted(stream, warning_config, result, false)?;
        return Ok(Token::new(TokenKind::StrLiteral(content), line, column));
    }

    if byte.is_ascii_digit() {
        return read_number(stream, line, column);
    }

    if byte.is_ascii_alphabetic() || byte == b'_' {
        return read_identifier_or_keyword(stream, string_table, line, column);
    }

    // Multi-byte punctuation first:
    let two: [Option<u8>; 2] = [stream.peek(), stream.peek_at(1)];
    if two == [Some(b'.'), Some(b'.')] && stream.peek_at(2) == Some(b'.') {
        stream.skip(3);
        return Ok(Token::new(TokenKind::Ellipsis, line, column));
    }
    let two_char_kind = match two {
        [Some(b'='), Some(b'=')] => Some(TokenKind::CmpEqual),
        [Some(b'!'), Some(b'=')] => Some(TokenKind::CmpNotEqual),
        [Some(b'>'), Some(b'=')] => Some(TokenKind::CmpLargerOrEqual),
        [Some(b'<'), Some(b'=')] => Some(TokenKind::CmpSmallerOrEqual),
        [Some(b'+'), Some(b'=')] => Some(TokenKind::PlusAssign),
        [Some(b'-'), Some(b'=')] => Some(TokenKind::MinusAssign),
        [Some(b'*'), Some(b'=')] => Some(TokenKind::StarAssign),
        [Some(b'/'), Some(b'=')] => Some(TokenKind::SlashAssign),
        [Some(b'-'), Some(b'>')] => Some(TokenKind::MapArrow),
        [Some(b'*'), Some(b'*')] => Some(TokenKind::DoubleStar),
        _ => None,
    };
    if let Some(kind) = two_char_kind {
        stream.skip(2);
        return Ok(Token::new(kind, line, column));
    }

    let single_kind = match byte {
        b'(' => Some(TokenKind::ParenOpen),
        b')' => Some(TokenKind::ParenClose),
        b'[' => Some(TokenKind::BracketOpen),
        b']' => Some(TokenKind::BracketClose),
        b'{' => Some(TokenKind::BraceOpen),
        b'}' => Some(TokenKind::BraceClose),
        b',' => Some(TokenKind::Comma),
        b'+' => Some(TokenKind::Plus),
        b'-' => Some(TokenKind::Minus),
        b'*' => Some(TokenKind::Star),
        b'/' => Some(TokenKind::Slash),
        b'%' => Some(TokenKind::Percent),
        b'.' => Some(TokenKind::Dot),
        b'=' => Some(TokenKind::Assign),
        b'>' => Some(TokenKind::CmpLarger),
        b'<' => Some(TokenKind::CmpSmaller),
        _ => None,
    };
    if let Some(kind) = single_kind {
        stream.next();
        return Ok(Token::new(kind, line, column));
    }

    // Anything else must at least be valid UTF-8 to report it readably:
    match stream.decode_utf8() {
        Some((codepoint, _)) => {
            return_syntax_error!(
                line,
                column,
                "unexpected character U+{codepoint:04X} outside of any string literal"
            )
        }
        None => {
            return_syntax_error!(
                line,
                column,
                "invalid UTF-8 byte 0x{byte:02X} outside of any string literal"
            )
        }
    }
}

fn read_identifier_or_keyword(
    stream: &mut ByteStream,
    string_table: &mut StringTable,
    line: i64,
    column: i64,
) -> Result<Token, ResultMessage> {
    let mut word = String::new();
    while let Some(byte) = stream.peek() {
        if byte.is_ascii_alphanumeric() || byte == b'_' {
            word.push(byte as char);
            stream.next();
        } else {
            break;
        }
    }
    if word.len() > IDENTIFIER_LEN_MAX {
        return_syntax_error!(
            line,
            column,
            "identifier exceeds maximum length of {IDENTIFIER_LEN_MAX} characters"
        );
    }
    let kind = match word.as_str() {
        "true" => TokenKind::BoolLiteral(true),
        "false" => TokenKind::BoolLiteral(false),
        "none" => TokenKind::NoneLiteral,
        _ => match Keyword::from_identifier(&word) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Identifier(string_table.intern(&word)),
        },
    };
    Ok(Token::new(kind, line, column))
}

fn read_number(stream: &mut ByteStream, line: i64, column: i64) -> Result<Token, ResultMessage> {
    let mut text = String::new();

    if stream.peek() == Some(b'0')
        && matches!(stream.peek_at(1), Some(b'x') | Some(b'X'))
    {
        stream.skip(2);
        while let Some(byte) = stream.peek() {
            if byte.is_ascii_hexdigit() {
                text.push(byte as char);
                stream.next();
            } else {
                break;
            }
        }
        if text.is_empty() {
            return_syntax_error!(line, column, "expected hex digits after \"0x\"");
        }
        let Ok(value) = i64::from_str_radix(&text, 16) else {
            return_syntax_error!(line, column, "hex literal does not fit into 64bit integer");
        };
        return Ok(Token::new(TokenKind::IntLiteral(value), line, column));
    }

    while let Some(byte) = stream.peek() {
        if byte.is_ascii_digit() {
            text.push(byte as char);
            stream.next();
        } else {
            break;
        }
    }
    let is_float = stream.peek() == Some(b'.')
        && stream.peek_at(1).is_some_and(|b| b.is_ascii_digit());
    if is_float {
        text.push('.');
        stream.next();
        while let Some(byte) = stream.peek() {
            if byte.is_ascii_digit() {
                text.push(byte as char);
                stream.next();
            } else {
                break;
            }
        }
        let Ok(value) = text.parse::<f64>() else {
            return_syntax_error!(line, column, "invalid float literal \"{text}\"");
        };
        return Ok(Token::new(TokenKind::FloatLiteral(value), line, column));
    }
    let Ok(value) = text.parse::<i64>() else {
        return_syntax_error!(line, column, "integer literal does not fit into 64bit integer");
    };
    Ok(Token::new(TokenKind::IntLiteral(value), line, column))
}

/// Read a quoted literal's contents into UTF-32 code points, applying
/// escape sequences. Invalid UTF-8 bytes are surrogate-escaped rather than
/// rejected, so broken data in string constants still compiles.
fn read_quoted(
    stream: &mut ByteStream,
    warning_config: &WarningConfig,
    result: &mut ResultMessages,
    bytes_mode: bool,
) -> Result<Vec<u32>, ResultMessage> {
    let open_line = stream.line;
    let open_column = stream.column;
    let quote = stream.next().expect("caller checked the quote byte");
    let mut content: Vec<u32> = Vec::new();

    loop {
        let Some(byte) = stream.peek() else {
            return_syntax_error!(
                open_line,
                open_column,
                "unterminated string literal, missing closing quote"
            );
        };
        if byte == quote {
            stream.next();
            return Ok(content);
        }
        if byte == b'\n' {
            return_syntax_error!(
                open_line,
                open_column,
                "unterminated string literal, missing closing quote before line break"
            );
        }
        if byte == b'\\' {
            let escape_line = stream.line;
            let escape_column = stream.column;
            stream.next();
            let Some(escaped) = stream.next() else {
                return_syntax_error!(
                    open_line,
                    open_column,
                    "unterminated string literal, missing closing quote"
                );
            };
            match escaped {
                b'n' => content.push(b'\n' as u32),
                b't' => content.push(b'\t' as u32),
                b'r' => content.push(b'\r' as u32),
                b'0' => content.push(0),
                b'\\' => content.push(b'\\' as u32),
                b'"' => content.push(b'"' as u32),
                b'\'' => content.push(b'\'' as u32),
                b'x' | b'X' => {
                    let mut value: u32 = 0;
                    let mut digits = 0;
                    while digits < 2 {
                        let Some(digit) = stream.peek().and_then(|b| (b as char).to_digit(16))
                        else {
                            break;
                        };
                        value = value * 16 + digit;
                        stream.next();
                        digits += 1;
                    }
                    if digits == 0 {
                        return_syntax_error!(
                            escape_line,
                            escape_column,
                            "expected hex digits after \"\\x\" escape in string literal"
                        );
                    }
                    content.push(value);
                }
                b'u' | b'U' => {
                    let mut value: u32 = 0;
                    let mut digits = 0;
                    while digits < 6 {
                        let Some(digit) = stream.peek().and_then(|b| (b as char).to_digit(16))
                        else {
                            break;
                        };
                        value = value * 16 + digit;
                        stream.next();
                        digits += 1;
                    }
                    if digits == 0 {
                        return_syntax_error!(
                            escape_line,
                            escape_column,
                            "expected hex digits after \"\\u\" escape in string literal"
                        );
                    }
                    content.push(value);
                }
                other => {
                    if warning_config.unrecognized_escape_sequences {
                        result.add_warning(
                            format!(
                                "unrecognized escape sequence \"\\{}\" in string literal",
                                other as char
                            ),
                            None,
                            escape_line,
                            escape_column,
                        );
                    }
                    content.push(b'\\' as u32);
                    content.push(other as u32);
                }
            }
            continue;
        }
        if byte < 0x80 || bytes_mode {
            content.push(byte as u32);
            stream.next();
            continue;
        }
        match stream.decode_utf8() {
            Some((codepoint, len)) => {
                content.push(codepoint);
                stream.skip(len);
            }
            None => {
                // Surrogate-escape the broken byte so it round-trips.
                content.push(0xDC00 | byte as u32);
                stream.next();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tokenize_ok(source: &str) -> (Vec<Token>, StringTable, ResultMessages) {
        let mut string_table = StringTable::new();
        let mut result = ResultMessages::new();
        let tokens = tokenize(
            source.as_bytes(),
            &WarningConfig::default(),
            &mut string_table,
            &mut result,
        )
        .expect("tokenization should succeed");
        (tokens, string_table, result)
    }

    #[test]
    fn simple_vardef_tokenizes() {
        let (tokens, table, _) = tokenize_ok("var x = 1\n");
        let kinds: Vec<&TokenKind> = tokens.iter().map(|t| &t.kind).collect();
        assert!(matches!(kinds[0], TokenKind::Keyword(Keyword::Var)));
        match kinds[1] {
            TokenKind::Identifier(id) => assert_eq!(id.resolve(&table), "x"),
            other => panic!("expected identifier, got {other:?}"),
        }
        assert_eq!(*kinds[2], TokenKind::Assign);
        assert_eq!(*kinds[3], TokenKind::IntLiteral(1));
        assert_eq!(*kinds[4], TokenKind::Eof);
    }

    #[test]
    fn positions_are_one_based() {
        let (tokens, _, _) = tokenize_ok("var x\n  = 2");
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (1, 5));
        assert_eq!((tokens[2].line, tokens[2].column), (2, 3));
    }

    #[test]
    fn comments_are_skipped() {
        let (tokens, _, _) = tokenize_ok("# a comment\nreturn # trailing\n");
        assert!(matches!(
            tokens[0].kind,
            TokenKind::Keyword(Keyword::Return)
        ));
        assert_eq!(tokens[1].kind, TokenKind::Eof);
    }

    #[test]
    fn string_escapes_decode() {
        let (tokens, _, _) = tokenize_ok("\"a\\n\\x41\\u1F600\"");
        match &tokens[0].kind {
            TokenKind::StrLiteral(codepoints) => {
                assert_eq!(codepoints, &vec![97, 10, 0x41, 0x1F600]);
            }
            other => panic!("expected string literal, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_escape_warns_when_configured() {
        let mut string_table = StringTable::new();
        let mut result = ResultMessages::new();
        tokenize(
            b"\"\\q\"",
            &WarningConfig::default(),
            &mut string_table,
            &mut result,
        )
        .unwrap();
        assert_eq!(result.messages.len(), 1);
        assert!(result.success);

        let mut off = WarningConfig::default();
        off.apply_cli_flag("-Wno-unrecognized-escape-sequences");
        let mut result2 = ResultMessages::new();
        tokenize(b"\"\\q\"", &off, &mut string_table, &mut result2).unwrap();
        assert!(result2.messages.is_empty());
    }

    #[test]
    fn invalid_utf8_in_string_surrogate_escapes() {
        let mut string_table = StringTable::new();
        let mut result = ResultMessages::new();
        let tokens = tokenize(
            b"\"a\xFFb\"",
            &WarningConfig::default(),
            &mut string_table,
            &mut result,
        )
        .unwrap();
        match &tokens[0].kind {
            TokenKind::StrLiteral(codepoints) => {
                assert_eq!(codepoints, &vec![b'a' as u32, 0xDCFF, b'b' as u32]);
            }
            other => panic!("expected string literal, got {other:?}"),
        }
    }

    #[test]
    fn invalid_utf8_outside_strings_is_fatal() {
        let mut string_table = StringTable::new();
        let mut result = ResultMessages::new();
        let lexed = tokenize(
            b"var \xFF = 1",
            &WarningConfig::default(),
            &mut string_table,
            &mut result,
        );
        assert!(lexed.is_err());
    }

    #[test]
    fn oversized_identifier_is_rejected() {
        let source = format!("var {} = 1", "a".repeat(IDENTIFIER_LEN_MAX + 1));
        let mut string_table = StringTable::new();
        let mut result = ResultMessages::new();
        assert!(
            tokenize(
                source.as_bytes(),
                &WarningConfig::default(),
                &mut string_table,
                &mut result,
            )
            .is_err()
        );
    }

    #[test]
    fn operators_with_shared_prefixes_disambiguate() {
        let (tokens, _, _) = tokenize_ok("a -> b - c -= d ... **");
        let kinds: Vec<&TokenKind> = tokens.iter().map(|t| &t.kind).collect();
        assert_eq!(*kinds[1], TokenKind::MapArrow);
        assert_eq!(*kinds[3], TokenKind::Minus);
        assert_eq!(*kinds[5], TokenKind::MinusAssign);
        assert_eq!(*kinds[7], TokenKind::Ellipsis);
        assert_eq!(*kinds[8], TokenKind::DoubleStar);
    }

    proptest! {
        #[test]
        fn ascii_string_literals_round_trip(s in "[ a-zA-Z0-9_.,;:!?-]*") {
            let source = format!("\"{s}\"");
            let (tokens, _, _) = tokenize_ok(&source);
            match &tokens[0].kind {
                TokenKind::StrLiteral(codepoints) => {
                    let decoded: String =
                        codepoints.iter().map(|&cp| cp as u8 as char).collect();
                    prop_assert_eq!(decoded, s);
                }
                other => prop_assert!(false, "expected string literal, got {:?}", other),
            }
        }
    }
}
