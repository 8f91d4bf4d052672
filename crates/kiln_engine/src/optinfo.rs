//! Parsing of LLVM optimization records (`-fsave-optimization-record`).
//!
//! The records are a stream of YAML documents, one per remark:
//!
//! ```text
//! --- !Missed
//! Pass:            inline
//! Name:            NoDefinition
//! DebugLoc:        { File: example.cpp, Line: 3, Column: 12 }
//! Function:        main
//! Args:
//!   - Callee:          foo
//!   - String:          ' will not be inlined into '
//!   - Caller:          main
//! ...
//! ```
//!
//! Only the subset of YAML the emitter produces is understood.

use serde::{Deserialize, Serialize};

/// A source position attached to a remark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugLoc {
    /// Source file.
    pub file: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column, 0 when unknown.
    pub column: u32,
}

/// One optimization remark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptRemark {
    /// Remark kind: `Passed`, `Missed`, `Analysis` and so on.
    pub kind: String,
    /// The pass that emitted the remark.
    pub pass: String,
    /// Remark name.
    pub name: String,
    /// Enclosing function.
    pub function: String,
    /// Where the remark applies.
    pub debug_loc: Option<DebugLoc>,
    /// The remark's arguments, joined into display text.
    pub args_text: String,
}

/// Parses every remark in `yaml`. Malformed documents are skipped.
pub fn parse_opt_records(yaml: &str) -> Vec<OptRemark> {
    let mut remarks = Vec::new();
    let mut current: Option<OptRemark> = None;
    let mut in_args = false;

    for line in yaml.lines() {
        if let Some(tag) = line.strip_prefix("--- !") {
            remarks.extend(current.take());
            current = Some(OptRemark {
                kind: tag.trim().to_string(),
                pass: String::new(),
                name: String::new(),
                function: String::new(),
                debug_loc: None,
                args_text: String::new(),
            });
            in_args = false;
            continue;
        }
        if line.starts_with("...") {
            remarks.extend(current.take());
            in_args = false;
            continue;
        }
        let Some(remark) = current.as_mut() else {
            continue;
        };

        if in_args {
            if let Some(item) = line.strip_prefix("  - ") {
                if let Some((_, value)) = item.split_once(':') {
                    remark.args_text.push_str(&unquote(value.trim()));
                }
                continue;
            }
            if line.starts_with(' ') {
                continue;
            }
            in_args = false;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "Pass" => remark.pass = unquote(value),
            "Name" => remark.name = unquote(value),
            "Function" => remark.function = unquote(value),
            "DebugLoc" => remark.debug_loc = parse_debug_loc(value),
            "Args" => in_args = true,
            _ => {}
        }
    }
    remarks.extend(current);
    remarks
}

/// Keeps the remarks located in `compile_filename`.
pub fn remarks_for_source(remarks: Vec<OptRemark>, compile_filename: &str) -> Vec<OptRemark> {
    remarks
        .into_iter()
        .filter(|r| {
            r.debug_loc
                .as_ref()
                .is_some_and(|loc| loc.file.ends_with(compile_filename))
        })
        .collect()
}

fn parse_debug_loc(value: &str) -> Option<DebugLoc> {
    let inner = value.strip_prefix('{')?.strip_suffix('}')?;
    let mut file = None;
    let mut line = None;
    let mut column = 0;
    for field in inner.split(',') {
        let (key, value) = field.split_once(':')?;
        let value = value.trim();
        match key.trim() {
            "File" => file = Some(unquote(value)),
            "Line" => line = value.parse().ok(),
            "Column" => column = value.parse().unwrap_or(0),
            _ => {}
        }
    }
    Some(DebugLoc {
        file: file?,
        line: line?,
        column,
    })
}

fn unquote(value: &str) -> String {
    if let Some(inner) = value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
        return inner.replace("''", "'");
    }
    if let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        return inner.replace("\\\"", "\"");
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORDS: &str = "--- !Missed
Pass:            inline
Name:            NoDefinition
DebugLoc:        { File: example.cpp, Line: 5, Column: 10 }
Function:        main
Args:
  - Callee:          foo
  - String:          ' will not be inlined into '
  - Caller:          main
    DebugLoc:        { File: example.cpp, Line: 4, Column: 0 }
  - String:          ' because its definition is unavailable'
...
--- !Passed
Pass:            licm
Name:            Hoisted
DebugLoc:        { File: '/usr/include/c++/vector', Line: 12, Column: 3 }
Function:        _Z3barv
Args:
  - String:          'hoisting '
  - Inst:            load
...
--- !Analysis
Pass:            prologepilog
Name:            StackSize
Function:        main
Args:
  - NumStackBytes:   '8'
  - String:          ' stack bytes in function'
...
";

    #[test]
    fn parses_all_documents() {
        let remarks = parse_opt_records(RECORDS);
        assert_eq!(remarks.len(), 3);

        let first = &remarks[0];
        assert_eq!(first.kind, "Missed");
        assert_eq!(first.pass, "inline");
        assert_eq!(first.name, "NoDefinition");
        assert_eq!(first.function, "main");
        assert_eq!(
            first.debug_loc,
            Some(DebugLoc {
                file: "example.cpp".into(),
                line: 5,
                column: 10,
            })
        );
        assert_eq!(
            first.args_text,
            "foo will not be inlined into main because its definition is unavailable"
        );

        assert_eq!(remarks[1].debug_loc.as_ref().unwrap().file, "/usr/include/c++/vector");
        assert_eq!(remarks[1].args_text, "hoisting load");
        assert!(remarks[2].debug_loc.is_none());
        assert_eq!(remarks[2].args_text, "8 stack bytes in function");
    }

    #[test]
    fn keeps_only_remarks_in_source() {
        let remarks = remarks_for_source(parse_opt_records(RECORDS), "example.cpp");
        assert_eq!(remarks.len(), 1);
        assert_eq!(remarks[0].pass, "inline");
    }

    #[test]
    fn unterminated_last_document_is_kept() {
        let remarks = parse_opt_records("--- !Passed\nPass: gvn\nName: LoadElim\n");
        assert_eq!(remarks.len(), 1);
        assert_eq!(remarks[0].pass, "gvn");
    }

    #[test]
    fn empty_input() {
        assert!(parse_opt_records("").is_empty());
    }

    #[test]
    fn unquote_escapes() {
        assert_eq!(unquote("'it''s'"), "it's");
        assert_eq!(unquote("\"a \\\"b\\\"\""), "a \"b\"");
        assert_eq!(unquote("plain"), "plain");
    }
}
