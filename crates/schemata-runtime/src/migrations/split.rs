//! Splitting migration scripts into individual statements.

use schemata_core::config::DbType;

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Normal,
    Quoted(char),
    LineComment,
    BlockComment(usize),
    DollarQuoted(String),
}

/// Split SQL into individual statements on `;`.
///
/// Semicolons inside quotes (`'`, `"`, backticks), comments and
/// dollar-quoted bodies (`$$ ... $$`, `$tag$ ... $tag$`) do not split.
/// A SQLite `CREATE TRIGGER ... BEGIN ... END;` body is kept whole.
/// Fragments that contain only comments or whitespace are dropped, and the
/// terminating `;` is not part of the returned text.
///
/// Backslash is an ordinary character inside quotes, as in SQLite and in
/// Postgres standard strings. Use [`split_statements_for`] for MySQL.
pub fn split_statements(sql: &str) -> Vec<String> {
    split(sql, false)
}

/// Split SQL the way `db_type` reads it. MySQL treats `\` inside quotes as
/// an escape for the next character.
pub fn split_statements_for(sql: &str, db_type: DbType) -> Vec<String> {
    split(sql, db_type == DbType::Mysql)
}

fn split(sql: &str, backslash_escapes: bool) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut words: Vec<String> = Vec::new();
    let mut word = String::new();
    let mut state = State::Normal;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match &state {
            State::Normal => {
                if c.is_alphanumeric() || c == '_' {
                    word.push(c.to_ascii_uppercase());
                } else if !word.is_empty() {
                    words.push(std::mem::take(&mut word));
                }

                match c {
                    '-' if next == Some('-') => {
                        state = State::LineComment;
                        current.push_str("--");
                        i += 2;
                        continue;
                    }
                    '/' if next == Some('*') => {
                        state = State::BlockComment(1);
                        current.push_str("/*");
                        i += 2;
                        continue;
                    }
                    '\'' | '"' | '`' => {
                        state = State::Quoted(c);
                        has_code = true;
                    }
                    '$' => {
                        if let Some(tag) = dollar_tag(&chars, i) {
                            has_code = true;
                            current.push_str(&tag);
                            i += tag.chars().count();
                            state = State::DollarQuoted(tag);
                            continue;
                        }
                        has_code = true;
                    }
                    ';' => {
                        if inside_trigger_body(&words) {
                            current.push(c);
                            i += 1;
                            continue;
                        }
                        finish(&mut statements, &mut current, has_code);
                        has_code = false;
                        words.clear();
                        i += 1;
                        continue;
                    }
                    c if !c.is_whitespace() => has_code = true,
                    _ => {}
                }
                current.push(c);
            }
            State::Quoted(quote) => {
                let quote = *quote;
                current.push(c);
                if backslash_escapes && c == '\\' && quote != '`' {
                    if let Some(escaped) = next {
                        current.push(escaped);
                        i += 2;
                        continue;
                    }
                } else if c == quote {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                current.push(c);
                if c == '\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                let depth = *depth;
                if c == '*' && next == Some('/') {
                    current.push_str("*/");
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    i += 2;
                    continue;
                }
                if c == '/' && next == Some('*') {
                    current.push_str("/*");
                    state = State::BlockComment(depth + 1);
                    i += 2;
                    continue;
                }
                current.push(c);
            }
            State::DollarQuoted(tag) => {
                if c == '$' && starts_with_at(&chars, i, tag) {
                    let len = tag.chars().count();
                    current.push_str(tag);
                    state = State::Normal;
                    i += len;
                    continue;
                }
                current.push(c);
            }
        }

        i += 1;
    }

    finish(&mut statements, &mut current, has_code);
    statements
}

/// Strip leading whitespace and comments from a statement.
pub fn strip_leading_comments(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start();
        if let Some(rest) = sql.strip_prefix("--") {
            sql = rest.split_once('\n').map(|(_, after)| after).unwrap_or("");
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = rest.split_once("*/").map(|(_, after)| after).unwrap_or("");
        } else {
            return sql;
        }
    }
}

/// Uppercased leading keyword of a statement, ignoring leading comments.
pub fn first_keyword(sql: &str) -> Option<String> {
    let keyword: String = strip_leading_comments(sql)
        .chars()
        .take_while(|c| c.is_ascii_alphabetic() || *c == '_')
        .collect();

    if keyword.is_empty() {
        None
    } else {
        Some(keyword.to_ascii_uppercase())
    }
}

fn finish(statements: &mut Vec<String>, current: &mut String, has_code: bool) {
    let stmt = current.trim();
    if has_code && !stmt.is_empty() {
        statements.push(stmt.to_string());
    }
    current.clear();
}

/// `$tag$` starting at `start`, if any. Tags follow identifier rules and may
/// not start with a digit, so `$1` placeholders are left alone.
fn dollar_tag(chars: &[char], start: usize) -> Option<String> {
    let mut end = start + 1;
    while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
        end += 1;
    }
    if end >= chars.len() || chars[end] != '$' {
        return None;
    }
    if chars.get(start + 1).is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(chars[start..=end].iter().collect())
}

fn starts_with_at(chars: &[char], at: usize, needle: &str) -> bool {
    let mut idx = at;
    for expected in needle.chars() {
        if chars.get(idx) != Some(&expected) {
            return false;
        }
        idx += 1;
    }
    true
}

/// Whether a `;` at this point falls inside a `CREATE TRIGGER ... BEGIN` body.
///
/// `CASE ... END` expressions nest inside the body, so only the `END` that
/// closes `BEGIN` ends it.
fn inside_trigger_body(words: &[String]) -> bool {
    let is_trigger = words.first().is_some_and(|w| w == "CREATE")
        && words.iter().take(4).any(|w| w == "TRIGGER");
    if !is_trigger {
        return false;
    }
    let Some(begin) = words.iter().position(|w| w == "BEGIN") else {
        return false;
    };

    let mut depth = 0usize;
    for word in &words[begin..] {
        match word.as_str() {
            "BEGIN" | "CASE" => depth += 1,
            "END" => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth > 0
}
