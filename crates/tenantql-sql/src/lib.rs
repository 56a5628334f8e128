//! tenantql SQL - tokenizer and structural extraction
//!
//! Used to classify canonical queries, rewrite identifiers token by token and
//! check generated SQL against a tenant schema.

mod lexer;
mod structure;

pub use lexer::{is_reserved, tokenize, Rule, SqlError, Token, TokenKind};
pub use structure::{
    contains_sequence, normalized_tokens, ColumnRef, SelectItem, Statement, TableRef,
};
