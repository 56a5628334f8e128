//! Pest-based SQL tokenizer
//!
//! Tokens keep their source text and offset, so concatenating every token of
//! a statement reproduces the input exactly.

use pest::Parser;
use pest_derive::Parser;
use serde::Serialize;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "sql.pest"]
pub struct SqlLexer;

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Pest error: {0}")]
    Pest(#[from] pest::error::Error<Rule>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenKind {
    Whitespace,
    Comment,
    String,
    QuotedIdent,
    Number,
    Word,
    Symbol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub offset: usize,
}

impl Token {
    /// Whitespace and comments
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_any_keyword(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.is_keyword(k))
    }

    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == symbol
    }

    /// Word that is not a reserved keyword, or any quoted identifier
    pub fn is_identifier(&self) -> bool {
        match self.kind {
            TokenKind::Word => !is_reserved(&self.text),
            TokenKind::QuotedIdent => true,
            _ => false,
        }
    }

    /// Identifier text with quoting removed
    pub fn ident(&self) -> Option<String> {
        match self.kind {
            TokenKind::Word => Some(self.text.clone()),
            TokenKind::QuotedIdent => {
                let inner = self
                    .text
                    .get(1..self.text.len().saturating_sub(1))
                    .unwrap_or_default();
                Some(inner.replace("\"\"", "\""))
            }
            _ => None,
        }
    }
}

const RESERVED: &[&str] = &[
    "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "BETWEEN", "BOTH", "BY", "CASE", "CAST", "COLLATE",
    "CREATE", "CROSS", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DATE", "DAY",
    "DELETE", "DESC", "DISTINCT", "DROP", "ELSE", "END", "ESCAPE", "EXCEPT", "EXISTS", "FALSE",
    "FETCH", "FILTER", "FIRST", "FOR", "FROM", "FULL", "GROUP", "HAVING", "HOUR", "ILIKE", "IN",
    "INNER", "INSERT", "INTERSECT", "INTERVAL", "INTO", "IS", "JOIN", "LAST", "LATERAL", "LEADING", "LEFT",
    "LIKE", "LIMIT", "LOCALTIME", "LOCALTIMESTAMP", "MATERIALIZED", "MINUTE", "MONTH",
    "NATURAL", "NEXT", "NOT", "NULL", "NULLS", "OFFSET", "ON", "ONLY", "OR", "ORDER", "OUTER",
    "OVER", "PARTITION", "QUALIFY", "QUARTER", "RECURSIVE", "RIGHT", "ROW", "ROWS", "SECOND",
    "SELECT", "SET", "SIMILAR", "SOME", "TABLE", "THEN", "TIME", "TIMESTAMP", "TRAILING", "TRUE", "UNION",
    "UPDATE", "USING", "VALUES", "WEEK", "WHEN", "WHERE", "WINDOW", "WITH", "YEAR",
];

/// Whether a bare word is an SQL keyword rather than a name
pub fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|k| k.eq_ignore_ascii_case(word))
}

/// Split SQL text into tokens. Never fails on well-formed UTF-8 input.
pub fn tokenize(sql: &str) -> Result<Vec<Token>, SqlError> {
    let mut pairs = SqlLexer::parse(Rule::tokens, sql)?;
    let root = pairs
        .next()
        .ok_or_else(|| SqlError::Syntax("Empty input".to_string()))?;

    let mut tokens = Vec::new();
    for pair in root.into_inner() {
        let kind = match pair.as_rule() {
            Rule::space => TokenKind::Whitespace,
            Rule::line_comment | Rule::block_comment => TokenKind::Comment,
            Rule::string => TokenKind::String,
            Rule::quoted_ident => TokenKind::QuotedIdent,
            Rule::number => TokenKind::Number,
            Rule::word => TokenKind::Word,
            Rule::symbol => TokenKind::Symbol,
            _ => continue,
        };
        tokens.push(Token {
            kind,
            text: pair.as_str().to_string(),
            offset: pair.as_span().start(),
        });
    }
    Ok(tokens)
}
