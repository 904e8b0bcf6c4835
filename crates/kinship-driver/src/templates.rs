//! Text templates wrapping module, package and bundle bodies
//!
//! Templates are plain JavaScript files with `/*=[name]=*/` placeholders,
//! so they stay valid (if useless) scripts on their own.

use regex::Regex;

use crate::error::{KinshipError, Result};

/// Every embedded template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Module,
    Json,
    Package,
    Buffer,
    Execute,
    ExposeMain,
    ExposeRequire,
    Esm,
    Pack,
}

impl Template {
    pub fn name(&self) -> &'static str {
        match self {
            Template::Module => "module",
            Template::Json => "json",
            Template::Package => "package",
            Template::Buffer => "buffer",
            Template::Execute => "execute",
            Template::ExposeMain => "expose-main",
            Template::ExposeRequire => "expose-require",
            Template::Esm => "esm",
            Template::Pack => "pack",
        }
    }

    fn source(&self) -> &'static str {
        match self {
            Template::Module => include_str!("../templates/module.js"),
            Template::Json => include_str!("../templates/json.js"),
            Template::Package => include_str!("../templates/package.js"),
            Template::Buffer => include_str!("../templates/buffer.js"),
            Template::Execute => include_str!("../templates/execute.js"),
            Template::ExposeMain => include_str!("../templates/expose-main.js"),
            Template::ExposeRequire => include_str!("../templates/expose-require.js"),
            Template::Esm => include_str!("../templates/esm.js"),
            Template::Pack => include_str!("../templates/pack.js"),
        }
    }
}

/// What a placeholder is replaced with.
#[derive(Debug, Clone, Copy)]
pub enum Binding<'a> {
    /// A single-quoted string literal, or `null`.
    Quoted(Option<&'a str>),
    /// Inserted verbatim.
    Raw(&'a str),
    /// Inserted verbatim when the flag is set, dropped otherwise.
    Gate(bool, &'a str),
}

impl Binding<'_> {
    fn render(&self, out: &mut String) {
        match self {
            Binding::Quoted(Some(value)) => out.push_str(&js_quote(value)),
            Binding::Quoted(None) => out.push_str("null"),
            Binding::Raw(text) | Binding::Gate(true, text) => out.push_str(text),
            Binding::Gate(false, _) => {}
        }
    }
}

pub struct Templates {
    placeholder: Regex,
}

impl Templates {
    pub fn new() -> Result<Self> {
        let placeholder = Regex::new(r"/\*=\[([a-zA-Z-]+)]=\*/")
            .map_err(|e| KinshipError::internal(format!("bad placeholder pattern: {e}")))?;
        Ok(Self { placeholder })
    }

    /// Renders a template. Every placeholder must be bound.
    pub fn render(&self, template: Template, bindings: &[(&str, Binding<'_>)]) -> Result<String> {
        let source = template.source();
        let mut out = String::with_capacity(source.len());
        let mut last = 0;

        for captures in self.placeholder.captures_iter(source) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let binding = bindings
                .iter()
                .find(|(key, _)| *key == name.as_str())
                .map(|(_, binding)| binding)
                .ok_or_else(|| {
                    KinshipError::internal(format!(
                        "template '{}' has an unbound placeholder '{}'",
                        template.name(),
                        name.as_str()
                    ))
                })?;

            out.push_str(&source[last..whole.start()]);
            binding.render(&mut out);
            last = whole.end();
        }

        out.push_str(&source[last..]);
        Ok(out)
    }

    /// Wraps `body` with a body-only template.
    pub fn wrap(&self, template: Template, body: &str) -> Result<String> {
        self.render(template, &[("body", Binding::Raw(body))])
    }
}

/// Single-quoted JavaScript string literal.
pub fn js_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
