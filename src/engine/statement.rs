//! Statement text helpers shared by the drivers.
//!
//! Classification of a single statement as row-producing or not, batch
//! detection, command keywords for status messages, and identifier quoting
//! for the few catalog statements that cannot take a bound parameter.

use sqlparser::{
    ast::{Query, Select, SetExpr, Statement},
    dialect::{Dialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect},
    parser::Parser,
    tokenizer::{Token, Tokenizer, Word},
};

use crate::engine::types::EngineKind;

/// Leading keywords of T-SQL control flow, whose result shape is only known
/// once the server runs it
const CONTROL_FLOW_KEYWORDS: [&str; 4] = ["IF", "BEGIN", "DECLARE", "WHILE"];

/// Clauses that turn a write into a row-producing statement
const RETURNING_CLAUSES: [&str; 2] = ["OUTPUT", "RETURNING"];

/// Upper-cased first keyword of a statement, skipping leading comments
/// and parentheses
pub fn leading_keyword(sql: &str) -> String {
    let mut rest = sql.trim_start();
    loop {
        if let Some(stripped) = rest.strip_prefix("--") {
            rest = stripped.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(stripped) = rest.strip_prefix("/*") {
            rest = stripped.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(stripped) = rest.strip_prefix('(') {
            rest = stripped;
        } else {
            break;
        }
        rest = rest.trim_start();
    }

    rest.chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Command keyword of a statement, looking through a leading CTE.
///
/// `WITH d AS (...) UPDATE ...` reports `UPDATE`. Text the parser cannot
/// handle falls back to [`leading_keyword`].
pub fn command_keyword(engine: EngineKind, sql: &str) -> String {
    let dialect = dialect_for_engine(engine);
    if let Ok(statements) = Parser::parse_sql(&*dialect, sql.trim()) {
        if let Some(Statement::Query(query)) = statements.last() {
            let keyword = match query.body.as_ref() {
                SetExpr::Insert(_) => Some("INSERT"),
                SetExpr::Update(_) => Some("UPDATE"),
                SetExpr::Delete(_) => Some("DELETE"),
                SetExpr::Merge(_) => Some("MERGE"),
                _ => None,
            };
            if let Some(keyword) = keyword {
                return keyword.to_string();
            }
        }
    }
    leading_keyword(sql)
}

/// Decides whether a statement may return a result set.
///
/// Procedure calls, control flow, `OUTPUT`/`RETURNING` clauses and text the
/// parser cannot handle all count as row-producing; callers on that path
/// must cope with a statement that yields no columns. Parsed queries count
/// as row-producing unless they are `SELECT ... INTO`.
pub fn produces_rows(engine: EngineKind, sql: &str) -> bool {
    let keyword = leading_keyword(sql);
    if keyword.starts_with("EXEC") || CONTROL_FLOW_KEYWORDS.contains(&keyword.as_str()) {
        return true;
    }

    let dialect = dialect_for_engine(engine);
    let Some(tokens) = significant_tokens(&*dialect, sql) else {
        return true;
    };
    if tokens
        .iter()
        .any(|token| RETURNING_CLAUSES.iter().any(|clause| is_word(token, clause)))
    {
        return true;
    }

    match Parser::parse_sql(&*dialect, sql.trim()) {
        Ok(statements) => statements.last().map(statement_returns_rows).unwrap_or(false),
        Err(_) => true,
    }
}

/// True when the text holds more than one statement.
///
/// Semicolons inside literals, comments and `CREATE TRIGGER ... BEGIN ... END`
/// bodies do not separate statements. Text that cannot be tokenized is left
/// for the engine to reject.
pub fn is_batch(engine: EngineKind, sql: &str) -> bool {
    let dialect = dialect_for_engine(engine);
    let Some(tokens) = significant_tokens(&*dialect, sql) else {
        return false;
    };

    let mut completed = false;
    let mut in_statement = false;
    let mut in_trigger = false;
    let mut depth = 0usize;

    for token in &tokens {
        if matches!(token, Token::SemiColon) {
            if depth == 0 && in_statement {
                completed = true;
                in_statement = false;
                in_trigger = false;
            }
            continue;
        }
        if completed {
            return true;
        }
        in_statement = true;

        if is_word(token, "TRIGGER") {
            in_trigger = true;
        } else if in_trigger && (is_word(token, "BEGIN") || is_word(token, "CASE")) {
            depth += 1;
        } else if in_trigger && is_word(token, "END") {
            depth = depth.saturating_sub(1);
        }
    }
    false
}

/// Tokens without whitespace and comments, or `None` when tokenizing fails
fn significant_tokens(dialect: &dyn Dialect, sql: &str) -> Option<Vec<Token>> {
    let tokens = Tokenizer::new(dialect, sql).tokenize().ok()?;
    Some(
        tokens
            .into_iter()
            .filter(|token| !matches!(token, Token::Whitespace(_) | Token::EOF))
            .collect(),
    )
}

/// Unquoted word matching `keyword` case-insensitively
fn is_word(token: &Token, keyword: &str) -> bool {
    match token {
        Token::Word(Word {
            value, quote_style, ..
        }) => quote_style.is_none() && value.eq_ignore_ascii_case(keyword),
        _ => false,
    }
}

fn dialect_for_engine(engine: EngineKind) -> Box<dyn Dialect> {
    match engine {
        EngineKind::Postgres => Box::new(PostgreSqlDialect {}),
        EngineKind::Mysql => Box::new(MySqlDialect {}),
        EngineKind::Mssql => Box::new(MsSqlDialect {}),
        EngineKind::Sqlite => Box::new(SQLiteDialect {}),
        EngineKind::Oracle => Box::new(GenericDialect {}),
    }
}

fn statement_returns_rows(statement: &Statement) -> bool {
    match statement {
        Statement::Query(query) => query_returns_rows(query),
        Statement::Explain { .. }
        | Statement::ExplainTable { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowDatabases { .. }
        | Statement::ShowSchemas { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowViews { .. }
        | Statement::ShowCollation { .. } => true,
        _ => false,
    }
}

fn query_returns_rows(query: &Query) -> bool {
    set_expr_returns_rows(&query.body)
}

fn set_expr_returns_rows(expr: &SetExpr) -> bool {
    match expr {
        SetExpr::Select(select) => !select_has_into(select),
        SetExpr::Query(query) => query_returns_rows(query),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_returns_rows(left) || set_expr_returns_rows(right)
        }
        SetExpr::Insert(_)
        | SetExpr::Update(_)
        | SetExpr::Delete(_)
        | SetExpr::Merge(_) => false,
        SetExpr::Values(_) | SetExpr::Table(_) => true,
    }
}

fn select_has_into(select: &Select) -> bool {
    select.into.is_some()
}

/// Wraps an identifier in `quote`, doubling any embedded quote character
pub fn quote_identifier(name: &str, quote: char) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push(quote);
    for c in name.chars() {
        if c == quote {
            quoted.push(quote);
        }
        quoted.push(c);
    }
    quoted.push(quote);
    quoted
}

/// Splits `schema.table` into its parts. Names without a dot have no schema.
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((schema, table)) if !schema.is_empty() && !table.is_empty() => {
            (Some(schema), table)
        }
        _ => (None, name),
    }
}
