//! Lexical rules of the daemon configuration language.
//!
//! Values are either bare words or double-quoted strings. Changing any
//! keyword or escape here changes the artifact format and must bump
//! [`FORMAT_VERSION`].

use crate::error::ValidationError;

pub const FORMAT_VERSION: u32 = 1;

const INDENT: char = '\t';

/// Quotes a free-text value, escaping everything the parser treats as
/// structure. Control characters other than newline, carriage return and tab
/// have no escape and are rejected.
pub fn quoted(field: &str, value: &str) -> Result<String, ValidationError> {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            c if c.is_control() => {
                return Err(ValidationError::new(
                    field,
                    format!("U+{:04X} cannot be represented in the daemon configuration", c as u32),
                ));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    Ok(out)
}

/// Checks a value that is emitted unquoted, such as a name or an address.
pub fn bare<'a>(field: &str, value: &'a str) -> Result<&'a str, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new(field, "cannot be empty"));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@' | ':' | '/')))
    {
        return Err(ValidationError::new(
            field,
            format!("'{value}' contains '{}' and cannot be emitted unquoted", c.escape_default()),
        ));
    }
    Ok(value)
}

/// Accumulates one artifact as nested, tab-indented blocks.
pub struct Writer {
    out: String,
    depth: usize,
    blocks: usize,
}

impl Writer {
    #[must_use]
    pub fn new(artifact: &str) -> Self {
        let mut out = String::new();
        out.push_str("# generated by tacman; artifact=");
        out.push_str(artifact);
        out.push_str("; format=");
        out.push_str(&FORMAT_VERSION.to_string());
        out.push('\n');
        Self {
            out,
            depth: 0,
            blocks: 0,
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push(INDENT);
        }
    }

    /// Opens `keyword name {`. Top-level blocks are counted as records.
    pub fn open(&mut self, keyword: &str, name: &str) {
        if self.depth == 0 {
            self.out.push('\n');
            self.blocks += 1;
        }
        self.indent();
        self.out.push_str(keyword);
        self.out.push(' ');
        self.out.push_str(name);
        self.out.push_str(" {\n");
        self.depth += 1;
    }

    pub fn close(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        self.out.push_str("}\n");
    }

    pub fn line(&mut self, text: &str) {
        self.indent();
        self.out.push_str(text);
        self.out.push('\n');
    }

    /// `key = value`
    pub fn assign(&mut self, key: &str, value: &str) {
        self.indent();
        self.out.push_str(key);
        self.out.push_str(" = ");
        self.out.push_str(value);
        self.out.push('\n');
    }

    #[must_use]
    pub fn finish(self) -> (String, usize) {
        (self.out, self.blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_escapes_structure() {
        assert_eq!(quoted("d", "plain").unwrap(), "\"plain\"");
        assert_eq!(
            quoted("d", "say \"hi\" {x}\nback\\slash\t").unwrap(),
            r#""say \"hi\" \{x\}\nback\\slash\t""#
        );
    }

    #[test]
    fn test_quoted_rejects_unescapable() {
        let err = quoted("description", "bell\u{7}").unwrap_err();
        assert_eq!(err.field, "description");
        assert!(err.message.contains("U+0007"));
    }

    #[test]
    fn test_bare() {
        assert!(bare("address", "2001:db8::/32").is_ok());
        assert!(bare("name", "ops@corp").is_ok());
        assert!(bare("name", "").is_err());
        assert!(bare("name", "two words").is_err());
        assert!(bare("name", "x{").is_err());
    }

    #[test]
    fn test_writer_layout() {
        let mut w = Writer::new("hosts");
        w.open("host", "a");
        w.assign("address", "10.0.0.1");
        w.open("service", "exec");
        w.line("cmd default = deny");
        w.close();
        w.close();
        w.open("host", "b");
        w.close();

        let (text, records) = w.finish();
        assert_eq!(records, 2);
        assert_eq!(
            text,
            "# generated by tacman; artifact=hosts; format=1\n\
             \n\
             host a {\n\
             \taddress = 10.0.0.1\n\
             \tservice exec {\n\
             \t\tcmd default = deny\n\
             \t}\n\
             }\n\
             \n\
             host b {\n\
             }\n"
        );
    }
}
