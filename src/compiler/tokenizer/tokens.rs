use crate::compiler::string_interning::{StringId, StringTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Const,
    Func,
    Class,
    Extends,
    If,
    Elseif,
    Else,
    While,
    For,
    In,
    Import,
    From,
    As,
    Return,
    Do,
    Rescue,
    Finally,
    With,
    New,
    Not,
    And,
    Or,
    Async,
    Noasync,
    Await,
    Vector,
}

impl Keyword {
    pub fn from_identifier(word: &str) -> Option<Keyword> {
        Some(match word {
            "var" => Keyword::Var,
            "const" => Keyword::Const,
            "func" => Keyword::Func,
            "class" => Keyword::Class,
            "extends" => Keyword::Extends,
            "if" => Keyword::If,
            "elseif" => Keyword::Elseif,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "for" => Keyword::For,
            "in" => Keyword::In,
            "import" => Keyword::Import,
            "from" => Keyword::From,
            "as" => Keyword::As,
            "return" => Keyword::Return,
            "do" => Keyword::Do,
            "rescue" => Keyword::Rescue,
            "finally" => Keyword::Finally,
            "with" => Keyword::With,
            "new" => Keyword::New,
            "not" => Keyword::Not,
            "and" => Keyword::And,
            "or" => Keyword::Or,
            "async" => Keyword::Async,
            "noasync" => Keyword::Noasync,
            "await" => Keyword::Await,
            "vector" => Keyword::Vector,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(StringId),
    Keyword(Keyword),
    IntLiteral(i64),
    FloatLiteral(f64),
    BoolLiteral(bool),
    NoneLiteral,
    /// UTF-32 code points; invalid source bytes surrogate-escaped into
    /// U+DC80..U+DCFF.
    StrLiteral(Vec<u32>),
    BytesLiteral(Vec<u8>),

    ParenOpen,
    ParenClose,
    BracketOpen,
    BracketClose,
    BraceOpen,
    BraceClose,
    Comma,
    MapArrow,
    /// `...`, marking the last positional argument as multi-arg.
    Ellipsis,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    DoubleStar,
    Dot,

    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,

    CmpEqual,
    CmpNotEqual,
    CmpLargerOrEqual,
    CmpSmallerOrEqual,
    CmpLarger,
    CmpSmaller,

    Eof,
}

/// One token with its 1-based source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: i64,
    pub column: i64,
}

impl Token {
    pub fn new(kind: TokenKind, line: i64, column: i64) -> Token {
        Token { kind, line, column }
    }

    pub fn describe(&self, string_table: &StringTable) -> String {
        match &self.kind {
            TokenKind::Identifier(id) => format!("identifier \"{}\"", id.resolve(string_table)),
            TokenKind::Keyword(kw) => format!("keyword \"{kw:?}\"").to_lowercase(),
            TokenKind::IntLiteral(v) => format!("integer literal {v}"),
            TokenKind::FloatLiteral(v) => format!("float literal {v}"),
            TokenKind::BoolLiteral(v) => format!("boolean literal {v}"),
            TokenKind::NoneLiteral => "none literal".to_owned(),
            TokenKind::StrLiteral(_) => "string literal".to_owned(),
            TokenKind::BytesLiteral(_) => "bytes literal".to_owned(),
            TokenKind::Eof => "end of file".to_owned(),
            other => format!("\"{}\"", token_symbol_text(other)),
        }
    }
}

fn token_symbol_text(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::ParenOpen => "(",
        TokenKind::ParenClose => ")",
        TokenKind::BracketOpen => "[",
        TokenKind::BracketClose => "]",
        TokenKind::BraceOpen => "{",
        TokenKind::BraceClose => "}",
        TokenKind::Comma => ",",
        TokenKind::MapArrow => "->",
        TokenKind::Ellipsis => "...",
        TokenKind::Plus => "+",
        TokenKind::Minus => "-",
        TokenKind::Star => "*",
        TokenKind::Slash => "/",
        TokenKind::Percent => "%",
        TokenKind::DoubleStar => "**",
        TokenKind::Dot => ".",
        TokenKind::Assign => "=",
        TokenKind::PlusAssign => "+=",
        TokenKind::MinusAssign => "-=",
        TokenKind::StarAssign => "*=",
        TokenKind::SlashAssign => "/=",
        TokenKind::CmpEqual => "==",
        TokenKind::CmpNotEqual => "!=",
        TokenKind::CmpLargerOrEqual => ">=",
        TokenKind::CmpSmallerOrEqual => "<=",
        TokenKind::CmpLarger => ">",
        TokenKind::CmpSmaller => "<",
        _ => "?",
    }
}
