//! Permissive object-literal parser
//!
//! Reads the JSON a bundle header starts as, and what it may become after a
//! minifier went over the bundle: unquoted keys, single-quoted strings,
//! trailing commas, `!0`/`!1` booleans and comments.

use serde_json::{Map, Number, Value};

/// Parses a JavaScript object-literal-ish value into JSON.
pub fn parse(content: &str) -> Result<Value, String> {
    let mut parser = RelaxedParser::new(content);
    let value = parser.parse()?;
    parser.skip_whitespace()?;
    if parser.pos < parser.chars.len() {
        return Err(format!("Unexpected trailing content at {}", parser.pos));
    }
    Ok(value)
}

struct RelaxedParser {
    chars: Vec<char>,
    pos: usize,
}

impl RelaxedParser {
    fn new(content: &str) -> Self {
        Self {
            chars: content.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn parse(&mut self) -> Result<Value, String> {
        self.skip_whitespace()?;
        self.parse_value()
    }

    fn parse_value(&mut self) -> Result<Value, String> {
        self.skip_whitespace()?;

        match self.peek() {
            None => Err("Unexpected end of input".to_string()),
            Some('{') => self.parse_object(),
            Some('[') => self.parse_array(),
            Some(quote @ ('"' | '\'')) => self.parse_string(quote).map(Value::String),
            Some('!') => self.parse_bang_bool(),
            Some('0'..='9' | '-' | '+' | '.') => self.parse_number(),
            Some(c) if is_identifier_start(c) => match self.parse_identifier().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" | "undefined" => Ok(Value::Null),
                other => Err(format!("Unexpected identifier: {other}")),
            },
            Some(c) => Err(format!("Unexpected character: {c}")),
        }
    }

    fn parse_object(&mut self) -> Result<Value, String> {
        let mut obj = Map::new();

        self.expect('{')?;

        loop {
            self.skip_whitespace()?;

            // Empty object, or a trailing comma before the brace
            if self.peek() == Some('}') {
                self.pos += 1;
                break;
            }

            let key = match self.peek() {
                Some(quote @ ('"' | '\'')) => self.parse_string(quote)?,
                Some(c) if is_identifier_start(c) || c.is_ascii_digit() => self.parse_identifier(),
                _ => return Err("Expected key in object".to_string()),
            };

            self.skip_whitespace()?;
            self.expect(':')?;

            let value = self.parse_value()?;
            obj.insert(key, value);

            self.skip_whitespace()?;

            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                None => return Err("Unexpected end in object".to_string()),
                Some(_) => return Err("Expected ',' or '}' in object".to_string()),
            }
        }

        Ok(Value::Object(obj))
    }

    fn parse_array(&mut self) -> Result<Value, String> {
        let mut arr = Vec::new();

        self.expect('[')?;

        loop {
            self.skip_whitespace()?;

            if self.peek() == Some(']') {
                self.pos += 1;
                break;
            }

            arr.push(self.parse_value()?);

            self.skip_whitespace()?;

            match self.peek() {
                Some(',') => self.pos += 1,
                Some(']') => {
                    self.pos += 1;
                    break;
                }
                None => return Err("Unexpected end in array".to_string()),
                Some(_) => return Err("Expected ',' or ']' in array".to_string()),
            }
        }

        Ok(Value::Array(arr))
    }

    fn parse_string(&mut self, quote: char) -> Result<String, String> {
        self.expect(quote)?;

        let mut s = String::new();

        while let Some(ch) = self.peek() {
            self.pos += 1;

            if ch == quote {
                return Ok(s);
            }
            if ch != '\\' {
                s.push(ch);
                continue;
            }

            let escaped = self.peek().ok_or("Unterminated string")?;
            self.pos += 1;
            match escaped {
                'n' => s.push('\n'),
                't' => s.push('\t'),
                'r' => s.push('\r'),
                'b' => s.push('\u{8}'),
                'f' => s.push('\u{c}'),
                '0' => s.push('\0'),
                'u' => s.push(self.parse_unicode_escape()?),
                // line continuation
                '\n' => {}
                other => s.push(other),
            }
        }

        Err("Unterminated string".to_string())
    }

    fn parse_unicode_escape(&mut self) -> Result<char, String> {
        let high = self.parse_hex4()?;
        if !(0xD800..0xDC00).contains(&high) {
            return char::from_u32(high).ok_or_else(|| format!("Invalid escape \\u{high:04x}"));
        }

        // Surrogate pair
        if self.peek() == Some('\\') && self.chars.get(self.pos + 1) == Some(&'u') {
            self.pos += 2;
            let low = self.parse_hex4()?;
            let code = 0x10000 + ((high - 0xD800) << 10) + (low.wrapping_sub(0xDC00) & 0x3FF);
            return char::from_u32(code).ok_or_else(|| "Invalid surrogate pair".to_string());
        }
        Err("Lone surrogate in string".to_string())
    }

    fn parse_hex4(&mut self) -> Result<u32, String> {
        let end = self.pos + 4;
        if end > self.chars.len() {
            return Err("Truncated unicode escape".to_string());
        }
        let hex: String = self.chars[self.pos..end].iter().collect();
        self.pos = end;
        u32::from_str_radix(&hex, 16).map_err(|_| format!("Invalid unicode escape: {hex}"))
    }

    /// `!0` is true and `!1` is false, as minifiers write them.
    fn parse_bang_bool(&mut self) -> Result<Value, String> {
        self.expect('!')?;
        match self.peek() {
            Some('0') => {
                self.pos += 1;
                Ok(Value::Bool(true))
            }
            Some('1') => {
                self.pos += 1;
                Ok(Value::Bool(false))
            }
            _ => Err("Expected '!0' or '!1'".to_string()),
        }
    }

    fn parse_number(&mut self) -> Result<Value, String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let num_str: String = self.chars[start..self.pos].iter().collect();
        let num_str = num_str.strip_prefix('+').unwrap_or(&num_str);

        if let Ok(int) = num_str.parse::<i64>() {
            return Ok(Value::Number(int.into()));
        }
        num_str
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("Invalid number: {num_str}"))
    }

    fn parse_identifier(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_identifier_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn expect(&mut self, ch: char) -> Result<(), String> {
        match self.peek() {
            None => Err(format!("Expected '{ch}' but got EOF")),
            Some(found) if found != ch => Err(format!("Expected '{ch}' but got '{found}'")),
            Some(_) => {
                self.pos += 1;
                Ok(())
            }
        }
    }

    /// Skips whitespace, line comments and block comments.
    fn skip_whitespace(&mut self) -> Result<(), String> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
                continue;
            }
            if c != '/' {
                break;
            }

            match self.chars.get(self.pos + 1) {
                Some('/') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                Some('*') => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        match self.peek() {
                            None => return Err(format!("Unterminated comment at {start}")),
                            Some('*') if self.chars.get(self.pos + 1) == Some(&'/') => {
                                self.pos += 2;
                                break;
                            }
                            Some(_) => self.pos += 1,
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_json() {
        let value = parse(r#"{"name":"app","version":null,"packages":[{"id":"/a"}],"n":-1.5}"#).unwrap();
        assert_eq!(
            value,
            json!({"name": "app", "version": null, "packages": [{"id": "/a"}], "n": -1.5})
        );
    }

    #[test]
    fn test_minified_literal() {
        let value = parse("{name:'app',exposeRequire:!0,execute:!1,globals:['x',],}").unwrap();
        assert_eq!(
            value,
            json!({"name": "app", "exposeRequire": true, "execute": false, "globals": ["x"]})
        );
    }

    #[test]
    fn test_comments_and_escapes() {
        let value = parse("/* header */ { // keys\n a: 'it\\'s', b: \"\\u00e9\\ud83d\\ude00\" }").unwrap();
        assert_eq!(value, json!({"a": "it's", "b": "é😀"}));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse("42").unwrap(), json!(42));
        assert_eq!(parse("1e3").unwrap(), json!(1000.0));
        assert!(parse("12abc").is_err());
    }

    #[test]
    fn test_errors() {
        assert!(parse("{a:1").is_err());
        assert!(parse("{a:'x}").is_err());
        assert!(parse("{a:1} extra").is_err());
        assert!(parse("{a: nope}").is_err());
        assert!(parse("/* open").is_err());
    }
}
