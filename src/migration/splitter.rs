//! Split a SQL script into single statements.
//!
//! Semicolons inside quoted strings, quoted identifiers, dollar-quoted bodies
//! and comments do not terminate a statement. Comments are dropped from the
//! output and empty statements are skipped.

pub fn split_statements(script: &str) -> Vec<String> {
    let chars: Vec<char> = script.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if next == Some('*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
                current.push(' ');
                continue;
            }
            '\'' | '"' => {
                let end = quoted_end(&chars, i, c);
                current.extend(&chars[i..end]);
                i = end;
                continue;
            }
            '$' => {
                if let Some(tag) = dollar_tag(&chars, i) {
                    let end = dollar_end(&chars, i + tag.len(), &tag);
                    current.extend(&chars[i..end]);
                    i = end;
                    continue;
                }
                current.push(c);
            }
            ';' => push_statement(&mut statements, &mut current),
            _ => current.push(c),
        }
        i += 1;
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

/// Index just past the closing quote; a doubled quote is an escape
fn quoted_end(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// `$tag$` opening at `start`, if any
fn dollar_tag(chars: &[char], start: usize) -> Option<Vec<char>> {
    let mut i = start + 1;
    while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
        i += 1;
    }
    if chars.get(i) == Some(&'$') {
        // `$1` is a positional parameter, not a tag
        if chars.get(start + 1).map_or(false, |c| c.is_ascii_digit()) {
            return None;
        }
        Some(chars[start..=i].to_vec())
    } else {
        None
    }
}

fn dollar_end(chars: &[char], from: usize, tag: &[char]) -> usize {
    let mut i = from;
    while i + tag.len() <= chars.len() {
        if chars[i..i + tag.len()] == *tag {
            return i + tag.len();
        }
        i += 1;
    }
    chars.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_and_skips_comments() {
        let script = "-- header\nCREATE TABLE a (x INTEGER);\n\n/* block; */ DROP TABLE b;\n-- trailing";
        assert_eq!(
            split_statements(script),
            vec!["CREATE TABLE a (x INTEGER)", "DROP TABLE b"]
        );
    }

    #[test]
    fn test_semicolons_inside_literals() {
        let script = "COMMENT ON TABLE wines IS 'a; b';\nSELECT \"we;ird\" FROM t;";
        assert_eq!(
            split_statements(script),
            vec!["COMMENT ON TABLE wines IS 'a; b'", "SELECT \"we;ird\" FROM t"]
        );
    }

    #[test]
    fn test_escaped_quote_and_dollar_body() {
        let script = "INSERT INTO t VALUES ('it''s; fine');\n\
                      CREATE FUNCTION f() RETURNS trigger AS $$ BEGIN x := 1; END; $$ LANGUAGE plpgsql;";
        let statements = split_statements(script);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "INSERT INTO t VALUES ('it''s; fine')");
        assert!(statements[1].ends_with("$$ LANGUAGE plpgsql"));
    }

    #[test]
    fn test_only_comments_is_empty() {
        assert!(split_statements("-- nothing to do\n").is_empty());
    }
}
