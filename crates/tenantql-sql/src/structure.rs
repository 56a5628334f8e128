//! Lightweight structural extraction over the token stream
//!
//! This is not a grammar-complete SQL parser. It tracks parenthesis nesting
//! and a handful of clause keywords, which is enough to find table
//! references, aliases, CTE names, qualified columns and select-list items.

use serde::Serialize;
use std::collections::HashSet;

use crate::lexer::{tokenize, SqlError, Token, TokenKind};

const AGGREGATES: &[&str] = &["COUNT", "SUM", "AVG", "MIN", "MAX"];
const SET_OPERATIONS: &[&str] = &["UNION", "INTERSECT", "EXCEPT"];
const CLAUSE_END: &[&str] = &[
    "FROM", "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "OFFSET", "UNION", "INTERSECT",
    "EXCEPT", "WINDOW", "QUALIFY", "FETCH",
];

/// Table named in a FROM or JOIN clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
    /// Token index of the (last segment of the) table name
    pub token: usize,
}

/// Column reference, qualified (`a.status`) or bare (`status`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub column: String,
    /// Token index of the column name
    pub token: usize,
    /// Token index of the qualifier, if any
    pub qualifier_token: Option<usize>,
}

/// One item of the top-level select list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectItem {
    /// Token range covering the item, trivia at the edges excluded
    pub start: usize,
    pub end: usize,
    /// Token index of the comma preceding this item
    pub comma_before: Option<usize>,
    /// Token indices of the item's significant tokens
    pub significant: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Paren {
    Query,
    Expr,
}

/// A tokenized statement plus the structure found in it
#[derive(Debug, Clone)]
pub struct Statement {
    tokens: Vec<Token>,
    sig: Vec<usize>,
    /// For each significant position: true when the token sits in a query
    /// context (top level or a parenthesised SELECT), not inside an expression
    in_query: Vec<bool>,
    depth: Vec<usize>,
    paren_kinds: Vec<Option<Paren>>,
    tables: Vec<TableRef>,
    ctes: Vec<String>,
    derived_aliases: Vec<String>,
    /// Significant positions consumed by table names, aliases and CTE names
    structural: HashSet<usize>,
}

impl Statement {
    pub fn parse(sql: &str) -> Result<Self, SqlError> {
        let tokens = tokenize(sql)?;
        let sig: Vec<usize> = tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_trivia())
            .map(|(i, _)| i)
            .collect();

        let mut statement = Statement {
            tokens,
            sig,
            in_query: Vec::new(),
            depth: Vec::new(),
            paren_kinds: Vec::new(),
            tables: Vec::new(),
            ctes: Vec::new(),
            derived_aliases: Vec::new(),
            structural: HashSet::new(),
        };
        statement.scan_nesting();
        statement.scan_ctes();
        statement.scan_tables();
        Ok(statement)
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Significant tokens (no whitespace or comments)
    pub fn significant(&self) -> impl Iterator<Item = &Token> + '_ {
        self.sig.iter().map(|&i| &self.tokens[i])
    }

    /// Significant token texts, for whitespace-insensitive comparison
    pub fn normalized(&self) -> Vec<String> {
        self.significant().map(|t| t.text.clone()).collect()
    }

    fn at(&self, pos: usize) -> Option<&Token> {
        self.sig.get(pos).map(|&i| &self.tokens[i])
    }

    fn kw(&self, pos: usize, keyword: &str) -> bool {
        self.at(pos).map(|t| t.is_keyword(keyword)).unwrap_or(false)
    }

    fn sym(&self, pos: usize, symbol: &str) -> bool {
        self.at(pos).map(|t| t.is_symbol(symbol)).unwrap_or(false)
    }

    fn is_ident_at(&self, pos: usize) -> bool {
        self.at(pos).map(|t| t.is_identifier()).unwrap_or(false)
    }

    fn scan_nesting(&mut self) {
        let mut stack: Vec<Paren> = Vec::new();
        for pos in 0..self.sig.len() {
            let in_query = matches!(stack.last(), None | Some(Paren::Query));
            self.in_query.push(in_query);
            self.depth.push(stack.len());

            let token = &self.tokens[self.sig[pos]];
            if token.is_symbol("(") {
                let kind = match self.at(pos + 1) {
                    Some(next) if next.is_any_keyword(&["SELECT", "WITH", "VALUES"]) => Paren::Query,
                    _ => Paren::Expr,
                };
                stack.push(kind);
                self.paren_kinds.push(Some(kind));
            } else {
                if token.is_symbol(")") {
                    stack.pop();
                }
                self.paren_kinds.push(None);
            }
        }
    }

    /// Position of the parenthesis closing the one opened at `open`
    fn matching_close(&self, open: usize) -> usize {
        let mut level = 0usize;
        for pos in open..self.sig.len() {
            if self.sym(pos, "(") {
                level += 1;
            } else if self.sym(pos, ")") {
                level = level.saturating_sub(1);
                if level == 0 {
                    return pos;
                }
            }
        }
        self.sig.len()
    }

    fn scan_ctes(&mut self) {
        for pos in 0..self.sig.len() {
            if !(self.kw(pos, "WITH") && self.in_query[pos]) {
                continue;
            }
            let mut q = pos + 1;
            if self.kw(q, "RECURSIVE") {
                q += 1;
            }
            while self.is_ident_at(q) {
                if let Some(name) = self.at(q).and_then(|t| t.ident()) {
                    self.ctes.push(name);
                }
                self.structural.insert(q);
                q += 1;
                if self.sym(q, "(") {
                    q = self.matching_close(q) + 1;
                }
                if self.kw(q, "AS") {
                    q += 1;
                }
                if self.kw(q, "NOT") {
                    q += 1;
                }
                if self.kw(q, "MATERIALIZED") {
                    q += 1;
                }
                if !self.sym(q, "(") {
                    break;
                }
                q = self.matching_close(q) + 1;
                if !self.sym(q, ",") {
                    break;
                }
                q += 1;
            }
        }
    }

    fn scan_tables(&mut self) {
        for pos in 0..self.sig.len() {
            if !self.in_query[pos] {
                continue;
            }
            let is_from = self.kw(pos, "FROM");
            if !(is_from || self.kw(pos, "JOIN")) {
                continue;
            }
            // `a IS [NOT] DISTINCT FROM b`
            if is_from
                && pos >= 2
                && self.kw(pos - 1, "DISTINCT")
                && (self.kw(pos - 2, "IS") || self.kw(pos - 2, "NOT"))
            {
                continue;
            }

            let mut q = pos + 1;
            loop {
                if self.kw(q, "LATERAL") || self.kw(q, "ONLY") {
                    q += 1;
                }
                if self.sym(q, "(") {
                    q = self.matching_close(q) + 1;
                    if let Some(alias) = self.read_alias(&mut q) {
                        self.derived_aliases.push(alias);
                    }
                } else if self.is_ident_at(q) {
                    let mut last = q;
                    self.structural.insert(q);
                    while self.sym(last + 1, ".") && self.at(last + 2).map(|t| t.ident().is_some()).unwrap_or(false) {
                        last += 2;
                        self.structural.insert(last);
                    }
                    q = last + 1;
                    if self.sym(q, "(") {
                        // table function such as read_csv(...)
                        q = self.matching_close(q) + 1;
                        if let Some(alias) = self.read_alias(&mut q) {
                            self.derived_aliases.push(alias);
                        }
                    } else {
                        let name = self.at(last).and_then(|t| t.ident()).unwrap_or_default();
                        let alias = self.read_alias(&mut q);
                        self.tables.push(TableRef {
                            name,
                            alias,
                            token: self.sig[last],
                        });
                    }
                } else {
                    break;
                }

                if is_from && self.sym(q, ",") {
                    q += 1;
                    continue;
                }
                break;
            }
        }
        // CTE names referenced in FROM are not schema tables
        let ctes = self.ctes.clone();
        let (virtual_refs, tables): (Vec<TableRef>, Vec<TableRef>) = std::mem::take(&mut self.tables)
            .into_iter()
            .partition(|t| ctes.iter().any(|c| c.eq_ignore_ascii_case(&t.name)));
        self.tables = tables;
        self.derived_aliases
            .extend(virtual_refs.into_iter().filter_map(|t| t.alias));
    }

    fn read_alias(&mut self, q: &mut usize) -> Option<String> {
        let explicit = self.kw(*q, "AS");
        let at = if explicit { *q + 1 } else { *q };
        if self.is_ident_at(at) {
            if explicit {
                self.structural.insert(*q);
            }
            self.structural.insert(at);
            *q = at + 1;
            // column alias list: `AS t(a, b)`
            if self.sym(*q, "(") {
                let close = self.matching_close(*q);
                for p in *q..=close.min(self.sig.len().saturating_sub(1)) {
                    self.structural.insert(p);
                }
                *q = close + 1;
            }
            return self.at(at).and_then(|t| t.ident());
        }
        None
    }

    /// Schema tables referenced in FROM/JOIN clauses (CTE names excluded)
    pub fn tables(&self) -> &[TableRef] {
        &self.tables
    }

    pub fn ctes(&self) -> &[String] {
        &self.ctes
    }

    /// Aliases given to subqueries and table functions
    pub fn derived_aliases(&self) -> &[String] {
        &self.derived_aliases
    }

    /// Resolve a qualifier (alias or table name) to the table it names
    pub fn resolve_qualifier(&self, qualifier: &str) -> Option<&TableRef> {
        self.tables
            .iter()
            .find(|t| {
                t.alias
                    .as_deref()
                    .map(|a| a.eq_ignore_ascii_case(qualifier))
                    .unwrap_or(false)
            })
            .or_else(|| {
                self.tables
                    .iter()
                    .find(|t| t.alias.is_none() && t.name.eq_ignore_ascii_case(qualifier))
            })
            .or_else(|| {
                self.tables
                    .iter()
                    .find(|t| t.name.eq_ignore_ascii_case(qualifier))
            })
    }

    /// Qualifier that names a CTE or derived table rather than a schema table
    pub fn is_virtual_qualifier(&self, qualifier: &str) -> bool {
        self.ctes
            .iter()
            .chain(self.derived_aliases.iter())
            .any(|n| n.eq_ignore_ascii_case(qualifier))
    }

    /// Every `qualifier.column` reference outside table clauses. Wildcards are skipped.
    pub fn qualified_columns(&self) -> Vec<ColumnRef> {
        self.columns().into_iter().filter(|c| c.qualifier.is_some()).collect()
    }

    /// Unqualified identifiers used as values: not keywords, functions, aliases or table names
    pub fn bare_columns(&self) -> Vec<ColumnRef> {
        self.columns().into_iter().filter(|c| c.qualifier.is_none()).collect()
    }

    fn columns(&self) -> Vec<ColumnRef> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < self.sig.len() {
            if self.structural.contains(&pos) || !self.is_ident_at(pos) {
                pos += 1;
                continue;
            }
            if self.sym(pos.wrapping_sub(1), ".") || self.sym(pos.wrapping_sub(1), "::") {
                pos += 1;
                continue;
            }

            // dotted chain: a.b or s.a.b
            if self.sym(pos + 1, ".") {
                let mut last = pos;
                while self.sym(last + 1, ".")
                    && self
                        .at(last + 2)
                        .map(|t| t.ident().is_some() || t.is_symbol("*"))
                        .unwrap_or(false)
                {
                    last += 2;
                }
                if last > pos && !self.sym(last, "*") && !self.sym(last + 1, "(") {
                    let qualifier_pos = last - 2;
                    out.push(ColumnRef {
                        qualifier: self.at(qualifier_pos).and_then(|t| t.ident()),
                        column: self.at(last).and_then(|t| t.ident()).unwrap_or_default(),
                        token: self.sig[last],
                        qualifier_token: Some(self.sig[qualifier_pos]),
                    });
                }
                pos = last + 1;
                continue;
            }

            let is_function = self.sym(pos + 1, "(");
            let is_alias = pos > 0 && self.kw(pos - 1, "AS");
            // EXTRACT(epoch FROM x); SUBSTRING(x FROM n) keeps x as a column
            let is_part = pos >= 2
                && self.sym(pos - 1, "(")
                && self.kw(pos - 2, "EXTRACT")
                && self.kw(pos + 1, "FROM");
            if !(is_function || is_alias || is_part) {
                if let Some(column) = self.at(pos).and_then(|t| t.ident()) {
                    out.push(ColumnRef {
                        qualifier: None,
                        column,
                        token: self.sig[pos],
                        qualifier_token: None,
                    });
                }
            }
            pos += 1;
        }
        out
    }

    /// Names introduced with `AS` outside table clauses (select-list aliases)
    pub fn output_aliases(&self) -> Vec<String> {
        (1..self.sig.len())
            .filter(|&p| self.kw(p - 1, "AS") && self.in_query[p] && !self.structural.contains(&p))
            .filter_map(|p| self.at(p).and_then(|t| t.ident()))
            .collect()
    }

    /// Whether the token at index `token` belongs to the outermost ORDER BY
    pub fn in_order_by(&self, token: usize) -> bool {
        let Some(pos) = self.sig.iter().position(|&i| i == token) else {
            return false;
        };
        let mut inside = false;
        for p in 0..pos {
            if self.depth[p] != 0 {
                continue;
            }
            if self.kw(p, "ORDER") && self.kw(p + 1, "BY") {
                inside = true;
            } else if self.kw(p, "LIMIT") || self.kw(p, "OFFSET") || self.kw(p, "FETCH") || self.sym(p, ";") {
                inside = false;
            } else if self.at(p).map(|t| t.is_any_keyword(SET_OPERATIONS)).unwrap_or(false) {
                inside = false;
            }
        }
        inside
    }

    pub fn has_join(&self) -> bool {
        self.significant().any(|t| t.is_keyword("JOIN"))
    }

    /// Aggregate function call or GROUP BY
    pub fn has_aggregation(&self) -> bool {
        (0..self.sig.len()).any(|p| {
            (self.at(p).map(|t| t.is_any_keyword(AGGREGATES)).unwrap_or(false) && self.sym(p + 1, "("))
                || (self.kw(p, "GROUP") && self.kw(p + 1, "BY"))
        })
    }

    pub fn has_subquery(&self) -> bool {
        self.paren_kinds.iter().any(|k| *k == Some(Paren::Query))
    }

    pub fn has_set_operation(&self) -> bool {
        self.significant().any(|t| t.is_any_keyword(SET_OPERATIONS))
    }

    /// LIMIT or FETCH at the outermost level
    pub fn has_limit(&self) -> bool {
        (0..self.sig.len())
            .any(|p| self.depth[p] == 0 && (self.kw(p, "LIMIT") || self.kw(p, "FETCH")))
    }

    /// `*` or `t.*` in the top-level select list
    pub fn has_wildcard(&self) -> bool {
        self.select_items().iter().any(|item| {
            item.significant
                .last()
                .map(|&i| self.tokens[i].is_symbol("*"))
                .unwrap_or(false)
        })
    }

    /// First keyword of the statement, upper-cased
    pub fn leading_keyword(&self) -> Option<String> {
        self.significant()
            .next()
            .filter(|t| t.kind == TokenKind::Word)
            .map(|t| t.text.to_ascii_uppercase())
    }

    /// Number of `;`-separated statements with significant content
    pub fn statement_count(&self) -> usize {
        let mut count = 0;
        let mut open = false;
        for token in self.significant() {
            if token.is_symbol(";") {
                if open {
                    count += 1;
                }
                open = false;
            } else {
                open = true;
            }
        }
        if open {
            count += 1;
        }
        count
    }

    /// Items of the outermost SELECT list (after any CTEs)
    pub fn select_items(&self) -> Vec<SelectItem> {
        let Some(select) = (0..self.sig.len()).find(|&p| self.depth[p] == 0 && self.kw(p, "SELECT")) else {
            return Vec::new();
        };
        let mut pos = select + 1;
        if self.kw(pos, "DISTINCT") || self.kw(pos, "ALL") {
            pos += 1;
        }

        let mut items = Vec::new();
        let mut current: Vec<usize> = Vec::new();
        let mut comma_before = None;
        while pos < self.sig.len() {
            let token = &self.tokens[self.sig[pos]];
            if self.depth[pos] == 0 && (token.is_any_keyword(CLAUSE_END) || token.is_symbol(";")) {
                break;
            }
            if self.depth[pos] == 0 && token.is_symbol(",") {
                if let (Some(&first), Some(&last)) = (current.first(), current.last()) {
                    items.push(SelectItem {
                        start: first,
                        end: last + 1,
                        comma_before,
                        significant: std::mem::take(&mut current),
                    });
                }
                comma_before = Some(self.sig[pos]);
            } else {
                current.push(self.sig[pos]);
            }
            pos += 1;
        }
        if let (Some(&first), Some(&last)) = (current.first(), current.last()) {
            items.push(SelectItem {
                start: first,
                end: last + 1,
                comma_before,
                significant: current,
            });
        }
        items
    }

    /// `(qualifier, column)` when the item is nothing but a column reference,
    /// optionally followed by an alias
    pub fn item_column(&self, item: &SelectItem) -> Option<(Option<String>, String)> {
        let body = self.item_body(item);
        let texts: Vec<&Token> = body.iter().map(|&i| &self.tokens[i]).collect();
        match texts.as_slice() {
            [col] if col.is_identifier() => Some((None, col.ident()?)),
            [q, dot, col] if q.is_identifier() && dot.is_symbol(".") && col.ident().is_some() => {
                Some((q.ident(), col.ident()?))
            }
            _ => None,
        }
    }

    /// Alias given to a select item with `AS`
    pub fn item_alias(&self, item: &SelectItem) -> Option<String> {
        let n = item.significant.len();
        if n >= 3 && self.tokens[item.significant[n - 2]].is_keyword("AS") {
            return self.tokens[item.significant[n - 1]].ident();
        }
        None
    }

    /// Significant token indices of the item without its alias
    pub fn item_body(&self, item: &SelectItem) -> Vec<usize> {
        let n = item.significant.len();
        if self.item_alias(item).is_some() {
            item.significant[..n - 2].to_vec()
        } else {
            item.significant.clone()
        }
    }
}

/// Significant token texts of an SQL fragment
pub fn normalized_tokens(sql: &str) -> Result<Vec<String>, SqlError> {
    Ok(tokenize(sql)?
        .into_iter()
        .filter(|t| !t.is_trivia())
        .map(|t| t.text)
        .collect())
}

/// Whether `needle` occurs as a contiguous run inside `haystack`
pub fn contains_sequence(haystack: &[String], needle: &[String]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}
