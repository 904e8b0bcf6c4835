//! Bundle reader
//!
//! The inverse of the assembler. Only the header and the segment
//! declarations are parsed; module bodies are taken verbatim. Every pattern
//! tolerates what a minifier may do to the bundle: spacing, quote style,
//! arrow or `function` closures, renamed parameters.

use std::path::Path;

use regex::Regex;
use serde_json::Value;

use crate::bundle::{BundleHeader, ModuleSegment, PackageSegment, Segment};
use crate::dep_graph::ModuleKind;
use crate::error::{KinshipError, Result};
use crate::relaxed_json;

const SIGNATURE_PATTERN: &str = r"^(\(function\(\)\s?\{\s?)?let KINSHIP_BUNDLE\s?=";

/// A quoted string literal, either quote style, with escapes.
const STRING: &str = r#"(?:"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*')"#;

/// Reads the header of a bundle.
pub fn info(text: &str) -> Result<BundleHeader> {
    let (header, _) = read_header(text)?;
    Ok(header)
}

/// Extracts one segment by module id, package id, alias id or package name.
pub fn extract(text: &str, key: &str) -> Result<Segment> {
    BundleReader::new(text)?.find(key)
}

/// A parsed bundle: its header and where its segments begin.
pub struct BundleReader<'a> {
    header: BundleHeader,
    text: &'a str,
    /// Byte offset right after the header statement.
    body_start: usize,
}

impl<'a> BundleReader<'a> {
    pub fn new(text: &'a str) -> Result<Self> {
        let (header, body_start) = read_header(text)?;
        Ok(Self {
            header,
            text,
            body_start,
        })
    }

    pub fn header(&self) -> &BundleHeader {
        &self.header
    }

    /// Every package and module segment, in bundle order.
    pub fn segments(&self) -> Result<Vec<Segment>> {
        let boundary = regex::escape(&self.header.boundary);
        let marker = |edge: &str| {
            Regex::new(&format!(
                r#"KINSHIP_{edge}_(MODULE|PACKAGE)\(\s*["']{boundary}["']\s*\)\s*;?"#
            ))
            .map_err(|e| KinshipError::internal(format!("bad marker pattern: {e}")))
        };
        let start_marker = marker("START")?;
        let end_marker = marker("END")?;
        let declarations = Declarations::new()?;

        let body = &self.text[self.body_start..];
        let mut segments = Vec::new();
        let mut cursor = 0;

        while let Some(start) = start_marker.captures_at(body, cursor) {
            let (Some(whole), Some(kind)) = (start.get(0), start.get(1)) else {
                break;
            };

            let end = end_marker
                .captures_iter(&body[whole.end()..])
                .find(|end| end.get(1).map(|m| m.as_str()) == Some(kind.as_str()))
                .and_then(|end| end.get(0))
                .ok_or_else(|| {
                    KinshipError::MalformedBundle(format!(
                        "a {} segment is never closed",
                        kind.as_str().to_lowercase()
                    ))
                })?;

            let declaration = &body[whole.end()..whole.end() + end.start()];
            segments.push(match kind.as_str() {
                "PACKAGE" => Segment::Package(declarations.package(declaration)?),
                _ => Segment::Module(declarations.module(declaration)?),
            });
            cursor = whole.end() + end.end();
        }

        Ok(segments)
    }

    /// Finds a segment by id or alias id, then by package name.
    pub fn find(&self, key: &str) -> Result<Segment> {
        let segments = self.segments()?;

        let by_id = segments.iter().find(|segment| match segment {
            Segment::Module(module) => module.id == key || module.alias_id.as_deref() == Some(key),
            Segment::Package(package) => package.id == key || package.alias_id.as_deref() == Some(key),
        });
        if let Some(segment) = by_id {
            return Ok(segment.clone());
        }

        let package_id = self
            .header
            .packages
            .iter()
            .find(|package| package.name.as_deref() == Some(key))
            .map(|package| package.id.as_str());
        if let Some(package_id) = package_id {
            if let Some(segment) = segments.iter().find(|segment| {
                matches!(segment, Segment::Package(package) if package.id == package_id)
            }) {
                return Ok(segment.clone());
            }
        }

        Err(KinshipError::user(format!(
            "no module nor package '{key}' in this bundle"
        )))
    }
}

/// Parses the header statement, returning the header and the offset right
/// after its `;`.
fn read_header(text: &str) -> Result<(BundleHeader, usize)> {
    let signature = Regex::new(SIGNATURE_PATTERN)
        .map_err(|e| KinshipError::internal(format!("bad signature pattern: {e}")))?;
    let matched = signature
        .find(text)
        .ok_or_else(|| KinshipError::NotABundle("no KINSHIP_BUNDLE signature".to_string()))?;

    let start = matched.end();
    let end = find_statement_end(&text[start..])
        .map(|offset| start + offset)
        .ok_or_else(|| KinshipError::MalformedBundle("the header statement never ends".to_string()))?;

    let value = relaxed_json::parse(&text[start..end])
        .map_err(|e| KinshipError::MalformedBundle(format!("unreadable header: {e}")))?;
    let header: BundleHeader = serde_json::from_value(value)
        .map_err(|e| KinshipError::MalformedBundle(format!("unexpected header content: {e}")))?;

    Ok((header, end + 1))
}

/// Offset of the first `;` outside of quoted strings.
fn find_statement_end(text: &str) -> Option<usize> {
    let mut quote = None;
    let mut escaped = false;

    for (index, c) in text.char_indices() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == ';' => return Some(index),
            None => {}
        }
    }
    None
}

/// Patterns for `Package.prepare(...)` and `Module.prepare(...)` calls.
struct Declarations {
    package: Regex,
    module: Regex,
    strict: Regex,
}

impl Declarations {
    fn new() -> Result<Self> {
        let nullable = format!("(null|{STRING})");
        let package = format!(
            r"(?s)^\s*Package\.prepare\(\s*({STRING})\s*,\s*({STRING})\s*,\s*{nullable}\s*\)\s*;?\s*$"
        );
        let module = format!(
            r"(?s)^\s*Module\.prepare\(\s*({STRING})\s*,\s*{nullable}\s*,\s*{nullable}\s*,\s*(?:\(([^)]*)\)\s*=>|([A-Za-z_$][\w$]*)\s*=>|function\s*[\w$]*\s*\(([^)]*)\))\s*\{{(.*)\}}\s*\)\s*;?\s*$"
        );

        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| KinshipError::internal(format!("bad declaration pattern: {e}")))
        };
        Ok(Self {
            package: compile(&package)?,
            module: compile(&module)?,
            strict: compile(r#"^\s*(?:"use strict"|'use strict')\s*;?[ \t]*(?:\r?\n)?"#)?,
        })
    }

    fn package(&self, declaration: &str) -> Result<PackageSegment> {
        let captures = self
            .package
            .captures(declaration)
            .ok_or_else(|| malformed("package", declaration))?;

        Ok(PackageSegment {
            id: literal(captures.get(1).map(|m| m.as_str()))?.unwrap_or_default(),
            main_module_id: literal(captures.get(2).map(|m| m.as_str()))?.unwrap_or_default(),
            alias_id: literal(captures.get(3).map(|m| m.as_str()))?,
        })
    }

    fn module(&self, declaration: &str) -> Result<ModuleSegment> {
        let captures = self
            .module
            .captures(declaration)
            .ok_or_else(|| malformed("module", declaration))?;

        let id = literal(captures.get(1).map(|m| m.as_str()))?.unwrap_or_default();
        let package_id = literal(captures.get(2).map(|m| m.as_str()))?;
        let alias_id = literal(captures.get(3).map(|m| m.as_str()))?;
        let params: Vec<&str> = [4, 5, 6]
            .iter()
            .find_map(|&group| captures.get(group))
            .map(|m| m.as_str().split(',').map(str::trim).filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        let body = captures.get(7).map(|m| m.as_str()).unwrap_or("");

        // The kind follows the id: a minified code closure may look like data
        if ModuleKind::of(Path::new(&id)) == ModuleKind::Data {
            let data = match params.as_slice() {
                [module_param] => data_body(body, module_param),
                _ => None,
            };
            let data = data.ok_or_else(|| malformed("data module", declaration))?;
            return Ok(ModuleSegment {
                id,
                package_id,
                alias_id,
                kind: ModuleKind::Data,
                strict: false,
                body: data.to_string(),
            });
        }

        let (strict, body) = match self.strict.find(body.trim_start_matches(['\r', '\n'])) {
            Some(directive) => (true, &body.trim_start_matches(['\r', '\n'])[directive.end()..]),
            None => (false, body),
        };

        Ok(ModuleSegment {
            id,
            package_id,
            alias_id,
            kind: ModuleKind::Code,
            strict,
            body: body.trim().to_string(),
        })
    }
}

/// The value of a `<module>.exports=<value>;` closure body.
fn data_body<'b>(body: &'b str, module_param: &str) -> Option<&'b str> {
    let rest = body.trim().strip_prefix(module_param)?;
    let rest = rest.trim_start().strip_prefix('.')?;
    let rest = rest.trim_start().strip_prefix("exports")?;
    let rest = rest.trim_start().strip_prefix('=')?;
    let rest = rest.trim();
    Some(rest.strip_suffix(';').unwrap_or(rest).trim_end())
}

/// Decodes a captured string literal; `null` or no capture is `None`.
fn literal(captured: Option<&str>) -> Result<Option<String>> {
    match captured {
        None | Some("null") => Ok(None),
        Some(text) => match relaxed_json::parse(text) {
            Ok(Value::String(value)) => Ok(Some(value)),
            _ => Err(KinshipError::MalformedBundle(format!("bad string literal {text}"))),
        },
    }
}

fn malformed(what: &str, declaration: &str) -> KinshipError {
    let excerpt: String = declaration.trim().chars().take(80).collect();
    KinshipError::MalformedBundle(format!("unreadable {what} declaration: {excerpt}"))
}
