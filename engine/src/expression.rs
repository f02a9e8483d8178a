//! File expression templates.
//!
//! Templates such as `done/${file:name.noext}-${date:now:%Y%m%d}.txt` are
//! compiled once while the configuration is built and evaluated per file.
//! Unknown placeholders are rejected at compile time.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use regex::Regex;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::model::CandidateEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Name,
    NameNoExt,
    Ext,
    OnlyName,
    OnlyNameNoExt,
    Parent,
    AbsolutePath,
    Size,
    Modified,
    DateNow(String),
    DateFile(String),
    Uuid,
}

/// Values a template is evaluated against.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    /// Name relative to the endpoint directory, `/` separated
    pub name: String,
    /// Absolute path of the file
    pub absolute_path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

impl TemplateContext {
    pub fn from_entry(entry: &CandidateEntry) -> Self {
        Self {
            name: entry.relative_name(),
            absolute_path: entry.absolute_path.clone(),
            size: entry.size,
            modified: entry.last_modified,
        }
    }

    /// Context for a producer target that may not exist yet.
    pub fn for_target(directory: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            absolute_path: directory.join(name),
            size: 0,
            modified: SystemTime::now(),
        }
    }

    fn only_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// A compiled file expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    parts: Vec<Part>,
}

impl PathTemplate {
    /// Compile a template. `option` names the configuration option for errors.
    pub fn parse(option: &'static str, source: &str) -> EngineResult<Self> {
        let mut parts = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("${") {
            if start > 0 {
                parts.push(Part::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after.find('}').ok_or_else(|| {
                EngineError::config(option, format!("unterminated placeholder in '{source}'"))
            })?;
            parts.push(parse_placeholder(option, &after[..end])?);
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    /// Compile a move/preMove/moveFailed value.
    ///
    /// A value without placeholders names a directory: relative values are
    /// placed beside the file, absolute values are used as is. The file name
    /// is appended in both cases.
    pub fn parse_move(option: &'static str, source: &str) -> EngineResult<Self> {
        if source.contains("${") {
            return Self::parse(option, source);
        }
        let trimmed = source.trim_end_matches(['/', '\\']);
        if trimmed.is_empty() {
            return Err(EngineError::config(option, "empty directory"));
        }
        let expanded = if Path::new(trimmed).is_absolute() {
            format!("{trimmed}/${{file:onlyname}}")
        } else {
            format!("${{file:parent}}/{trimmed}/${{file:onlyname}}")
        };
        Self::parse(option, &expanded)
    }

    /// True when the template has no placeholders.
    pub fn is_constant(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Literal(_)))
    }

    /// The template text as configured.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate to a string.
    pub fn evaluate(&self, ctx: &TemplateContext) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Name => out.push_str(&ctx.name),
                Part::NameNoExt => out.push_str(strip_ext(&ctx.name)),
                Part::Ext => out.push_str(extension(ctx.only_name())),
                Part::OnlyName => out.push_str(ctx.only_name()),
                Part::OnlyNameNoExt => out.push_str(strip_ext(ctx.only_name())),
                Part::Parent => {
                    let parent = ctx.absolute_path.parent().unwrap_or_else(|| Path::new(""));
                    out.push_str(&parent.to_string_lossy());
                }
                Part::AbsolutePath => out.push_str(&ctx.absolute_path.to_string_lossy()),
                Part::Size => out.push_str(&ctx.size.to_string()),
                Part::Modified => {
                    let millis = DateTime::<Local>::from(ctx.modified).timestamp_millis();
                    out.push_str(&millis.to_string());
                }
                Part::DateNow(fmt) => out.push_str(&Local::now().format(fmt).to_string()),
                Part::DateFile(fmt) => {
                    out.push_str(&DateTime::<Local>::from(ctx.modified).format(fmt).to_string())
                }
                Part::Uuid => out.push_str(&Uuid::new_v4().to_string()),
            }
        }
        out
    }

    /// Anchored regex matching every file name this template can produce.
    pub fn name_pattern(&self) -> EngineResult<Regex> {
        let mut pattern = String::from("^");
        for part in &self.parts {
            match part {
                Part::Literal(text) => pattern.push_str(&regex::escape(text)),
                Part::Name | Part::NameNoExt | Part::OnlyName | Part::OnlyNameNoExt => {
                    pattern.push_str(".+")
                }
                _ => pattern.push_str(".*"),
            }
        }
        pattern.push('$');
        Regex::new(&pattern).map_err(|source| EngineError::Regex {
            option: "doneFileName",
            source,
        })
    }

    /// Evaluate to a path; relative results are resolved against `root`.
    pub fn resolve(&self, ctx: &TemplateContext, root: &Path) -> PathBuf {
        let value = PathBuf::from(self.evaluate(ctx));
        if value.is_absolute() {
            value
        } else {
            root.join(value)
        }
    }
}

fn parse_placeholder(option: &'static str, token: &str) -> EngineResult<Part> {
    let part = match token {
        "file:name" => Part::Name,
        "file:name.noext" => Part::NameNoExt,
        "file:name.ext" | "file:ext" => Part::Ext,
        "file:onlyname" => Part::OnlyName,
        "file:onlyname.noext" => Part::OnlyNameNoExt,
        "file:parent" => Part::Parent,
        "file:path" | "file:absolute.path" => Part::AbsolutePath,
        "file:size" | "file:length" => Part::Size,
        "file:modified" => Part::Modified,
        "uuid" => Part::Uuid,
        other => {
            if let Some(fmt) = other.strip_prefix("date:now:") {
                Part::DateNow(check_date_format(option, fmt)?)
            } else if let Some(fmt) = other.strip_prefix("date:file:") {
                Part::DateFile(check_date_format(option, fmt)?)
            } else {
                return Err(EngineError::config(
                    option,
                    format!("unknown placeholder '${{{other}}}'"),
                ));
            }
        }
    };
    Ok(part)
}

fn check_date_format(option: &'static str, fmt: &str) -> EngineResult<String> {
    if fmt.is_empty() || StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
        return Err(EngineError::config(option, format!("invalid date format '{fmt}'")));
    }
    Ok(fmt.to_string())
}

/// Strip the last extension, leaving any directory part intact.
pub(crate) fn strip_ext(name: &str) -> &str {
    let file_start = name.rfind('/').map_or(0, |i| i + 1);
    match name[file_start..].rfind('.') {
        Some(0) | None => name,
        Some(dot) => &name[..file_start + dot],
    }
}

fn extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => "",
        Some(dot) => &name[dot + 1..],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::entry;

    fn ctx(relative: &str) -> TemplateContext {
        TemplateContext::from_entry(&entry(Path::new("/in"), relative, 42))
    }

    #[test]
    fn test_file_placeholders() {
        let t = PathTemplate::parse("move", "${file:name.noext}.${file:ext}.bak").expect("parse");
        assert_eq!(t.evaluate(&ctx("sub/report.csv")), "sub/report.csv.bak");

        let t = PathTemplate::parse("move", "${file:onlyname.noext}-${file:size}").expect("parse");
        assert_eq!(t.evaluate(&ctx("sub/report.csv")), "report-42");

        let t = PathTemplate::parse("move", "${file:parent}/x").expect("parse");
        assert_eq!(t.evaluate(&ctx("sub/report.csv")), "/in/sub/x");
    }

    #[test]
    fn test_constant_template() {
        let t = PathTemplate::parse("doneFileName", "ready").expect("parse");
        assert!(t.is_constant());
        assert_eq!(t.evaluate(&ctx("a.txt")), "ready");
    }

    #[test]
    fn test_move_directory_shorthand() {
        let relative = PathTemplate::parse_move("move", "done/").expect("parse");
        assert_eq!(relative.evaluate(&ctx("sub/a.txt")), "/in/sub/done/a.txt");

        let absolute = PathTemplate::parse_move("move", "/archive").expect("parse");
        assert_eq!(absolute.evaluate(&ctx("sub/a.txt")), "/archive/a.txt");
    }

    #[test]
    fn test_date_placeholder_uses_file_time() {
        let t = PathTemplate::parse("move", "${date:file:%Y}").expect("parse");
        let year = t.evaluate(&ctx("a.txt"));
        assert!(year == "2023" || year == "2024", "unexpected year {year}");
    }

    #[test]
    fn test_unknown_placeholder_is_rejected() {
        let err = PathTemplate::parse("move", "${header:foo}").unwrap_err();
        assert!(err.is_configuration());
        assert!(PathTemplate::parse("move", "${file:name").is_err());
        assert!(PathTemplate::parse("move", "${date:now:}").is_err());
    }

    #[test]
    fn test_resolve_relative_against_root() {
        let t = PathTemplate::parse("move", "archive/${file:onlyname}").expect("parse");
        assert_eq!(
            t.resolve(&ctx("sub/a.txt"), Path::new("/in")),
            PathBuf::from("/in/archive/a.txt")
        );
    }

    #[test]
    fn test_name_pattern() {
        let t = PathTemplate::parse("doneFileName", "${file:name.noext}.done").expect("parse");
        let re = t.name_pattern().expect("pattern");
        assert!(re.is_match("a.done"));
        assert!(!re.is_match("a.txt"));
        assert!(!re.is_match(".done"));
    }

    #[test]
    fn test_strip_ext_keeps_directories_and_dotfiles() {
        assert_eq!(strip_ext("a/b.tar.gz"), "a/b.tar");
        assert_eq!(strip_ext("a.b/c"), "a.b/c");
        assert_eq!(strip_ext(".hidden"), ".hidden");
    }
}
