// src/model/mod.rs

//! System Model - Declarative OS State Management
//!
//! The system model describes the desired state of a system as an ordered
//! list of operations, one per line:
//!
//! ```text
//! # base packages
//! search group-os=conary.example.com@rpl:2
//! install group-os
//! erase sendmail
//! offer nginx
//! update 'openssl=repo@rpl:2-security'
//! ```
//!
//! Later lines win over earlier ones. Comments and blank lines are kept
//! so that reformatting an unmodified model reproduces the file exactly.
//! The model is compiled into an operation graph by [`ModelCompiler`].

mod compile;
mod file;
mod parser;

pub use compile::{CompiledModel, ModelCompiler};
pub use file::ModelFile;
pub use parser::{shell_quote, split_arguments};

use crate::error::Result;
use crate::label::Label;
use crate::trove::TroveSpec;
use std::collections::BTreeSet;
use std::fmt;
use strum_macros::{Display, EnumString, IntoStaticStr};

/// Default path for the system model file
pub const DEFAULT_MODEL_PATH: &str = "/etc/conary/system-model";

/// Suffix of the snapshot written while a model is being applied
pub const SNAPSHOT_SUFFIX: &str = ".next";

/// Verbs taking one or more trove specs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum TroveOpKind {
    Install,
    Offer,
    Update,
    Erase,
    Patch,
    Include,
}

/// Where a search line looks for troves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchItem {
    Label(Label),
    Trove(TroveSpec),
}

impl fmt::Display for SearchItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchItem::Label(label) => write!(f, "{}", label),
            SearchItem::Trove(spec) => write!(f, "{}", spec),
        }
    }
}

/// One model operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelOp {
    Search(SearchItem),
    Trove { kind: TroveOpKind, specs: Vec<TroveSpec> },
    Version(String),
    /// Comment or blank line
    NoOp(String),
}

impl ModelOp {
    pub fn install(specs: Vec<TroveSpec>) -> Self {
        ModelOp::Trove {
            kind: TroveOpKind::Install,
            specs,
        }
    }

    pub fn erase(specs: Vec<TroveSpec>) -> Self {
        ModelOp::Trove {
            kind: TroveOpKind::Erase,
            specs,
        }
    }

    /// Kind of a trove operation
    pub fn trove_kind(&self) -> Option<TroveOpKind> {
        match self {
            ModelOp::Trove { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Canonical text of this operation
    pub fn as_line(&self) -> String {
        match self {
            ModelOp::Search(item) => format!("search {}", shell_quote(&item.to_string())),
            ModelOp::Trove { kind, specs } => {
                let args: Vec<String> = specs.iter().map(|s| shell_quote(&s.to_string())).collect();
                format!("{} {}", kind, args.join(" "))
            }
            ModelOp::Version(version) => format!("version {}", version),
            ModelOp::NoOp(text) => text.clone(),
        }
    }
}

impl fmt::Display for ModelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_line())
    }
}

/// An operation and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelItem {
    pub op: ModelOp,
    /// 0-based source line, `None` for operations added after parsing
    pub line: Option<usize>,
    pub modified: bool,
}

impl ModelItem {
    fn parsed(op: ModelOp, line: usize) -> Self {
        Self {
            op,
            line: Some(line),
            modified: false,
        }
    }

    fn added(op: ModelOp) -> Self {
        Self {
            op,
            line: None,
            modified: true,
        }
    }
}

/// A parsed system model
#[derive(Debug, Clone, Default)]
pub struct SystemModel {
    /// Search and trove operations in declared order
    items: Vec<ModelItem>,
    /// Comments and blank lines
    noops: Vec<ModelItem>,
    version: Option<ModelItem>,
    /// Original text, one entry per line
    lines: Vec<String>,
    /// Terminator each original line ended with
    endings: Vec<&'static str>,
    /// Set when an operation was dropped
    dropped: bool,
}

impl SystemModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse model text
    pub fn parse(text: &str) -> Result<Self> {
        let mut model = Self::new();
        for (index, raw) in text.split_inclusive('\n').enumerate() {
            let (line, ending) = match raw.strip_suffix('\n') {
                Some(body) => match body.strip_suffix('\r') {
                    Some(body) => (body, "\r\n"),
                    None => (body, "\n"),
                },
                None => (raw, ""),
            };
            match parser::parse_line(line, index)? {
                op @ ModelOp::NoOp(_) => model.noops.push(ModelItem::parsed(op, index)),
                op @ ModelOp::Version(_) => model.version = Some(ModelItem::parsed(op, index)),
                op => model.items.push(ModelItem::parsed(op, index)),
            }
            model.lines.push(line.to_string());
            model.endings.push(ending);
        }
        Ok(model)
    }

    /// Search and trove operations in declared order
    pub fn ops(&self) -> impl Iterator<Item = &ModelOp> {
        self.items.iter().map(|item| &item.op)
    }

    pub fn items(&self) -> &[ModelItem] {
        &self.items
    }

    pub fn version(&self) -> Option<&str> {
        match self.version.as_ref().map(|item| &item.op) {
            Some(ModelOp::Version(v)) => Some(v),
            _ => None,
        }
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        let line = self.version.as_ref().and_then(|item| item.line);
        self.version = Some(ModelItem {
            op: ModelOp::Version(version.into()),
            line,
            modified: true,
        });
    }

    /// True when formatting would not reproduce the parsed text
    pub fn modified(&self) -> bool {
        self.dropped
            || self
                .items
                .iter()
                .chain(self.noops.iter())
                .chain(self.version.iter())
                .any(|item| item.modified)
    }

    /// Add a comment ahead of every parsed line
    pub fn append_noop(&mut self, text: impl Into<String>) {
        self.noops.push(ModelItem::added(ModelOp::NoOp(text.into())));
    }

    /// Add an operation after the last one
    ///
    /// Trove operations go through [`SystemModel::append_trove_op`].
    pub fn append_op(&mut self, op: ModelOp) {
        match op {
            ModelOp::Trove { kind, specs } => self.append_trove_op(kind, specs),
            ModelOp::Version(version) => self.set_version(version),
            ModelOp::NoOp(text) => self.append_noop(text),
            op @ ModelOp::Search(_) => self.items.push(ModelItem::added(op)),
        }
    }

    /// Add a trove operation, collapsing trivial duplication
    ///
    /// Erasing exactly what the previous install or update named drops
    /// that previous operation instead of adding an erase. An erase
    /// identical to the previous erase is not added again.
    pub fn append_trove_op(&mut self, kind: TroveOpKind, specs: Vec<TroveSpec>) {
        let previous = match self.items.last().map(|item| &item.op) {
            Some(ModelOp::Trove {
                kind: last_kind,
                specs: last_specs,
            }) if *last_specs == specs => Some(*last_kind),
            _ => None,
        };
        if kind == TroveOpKind::Erase {
            match previous {
                Some(TroveOpKind::Install | TroveOpKind::Update) => {
                    self.items.pop();
                    self.dropped = true;
                    return;
                }
                Some(TroveOpKind::Erase) => return,
                _ => {}
            }
        }
        self.items.push(ModelItem::added(ModelOp::Trove { kind, specs }));
    }

    /// Remove every trove operation equal to the given one
    pub fn remove_trove_op(&mut self, kind: TroveOpKind, specs: &[TroveSpec]) -> bool {
        let before = self.items.len();
        self.items.retain(|item| {
            !matches!(&item.op, ModelOp::Trove { kind: k, specs: s } if *k == kind && s == specs)
        });
        let removed = self.items.len() != before;
        self.dropped |= removed;
        removed
    }

    /// Names of every trove spec used by trove operations of `kind`
    pub fn spec_names(&self, kind: TroveOpKind) -> BTreeSet<&str> {
        self.items
            .iter()
            .filter_map(|item| match &item.op {
                ModelOp::Trove { kind: k, specs } if *k == kind => Some(specs),
                _ => None,
            })
            .flatten()
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Emit the model line by line
    ///
    /// New comments come first, then a new version line, then every
    /// original line in order. Unmodified lines are emitted exactly as
    /// read. New operations follow the last original operation, or end
    /// the file when it had none.
    pub fn iter_format(&self) -> Vec<String> {
        self.emit().into_iter().map(|(line, _)| line).collect()
    }

    /// Full model text, newline terminated
    ///
    /// Unmodified lines keep the terminator they were read with; other
    /// lines use the terminator of the first original line.
    pub fn format(&self) -> String {
        let default_ending = if self.endings.first() == Some(&"\r\n") { "\r\n" } else { "\n" };
        let mut text = String::new();
        for (line, original) in self.emit() {
            text.push_str(&line);
            match original.and_then(|index| self.endings.get(index)) {
                Some(ending) if !ending.is_empty() => text.push_str(ending),
                _ => text.push_str(default_ending),
            }
        }
        text
    }

    /// Output lines, each with the original line it reproduces verbatim
    fn emit(&self) -> Vec<(String, Option<usize>)> {
        let mut out = Vec::new();
        let last_op_line = self.items.iter().filter_map(|i| i.line).max();
        let last_line = self
            .items
            .iter()
            .chain(self.noops.iter())
            .chain(self.version.iter())
            .filter_map(|i| i.line)
            .max();

        out.extend(
            self.noops
                .iter()
                .filter(|i| i.line.is_none())
                .map(|i| (i.op.as_line(), None)),
        );
        if let Some(version) = self.version.as_ref().filter(|v| v.line.is_none()) {
            out.push((version.op.as_line(), None));
        }

        let mut by_line: Vec<Vec<&ModelItem>> = vec![Vec::new(); last_line.map_or(0, |l| l + 1)];
        for item in self.items.iter().chain(self.noops.iter()).chain(self.version.iter()) {
            if let Some(line) = item.line {
                by_line[line].push(item);
            }
        }

        let appended = || {
            self.items
                .iter()
                .filter(|i| i.line.is_none())
                .map(|i| (i.op.as_line(), None::<usize>))
        };
        for (index, items) in by_line.iter().enumerate() {
            for item in items {
                match self.lines.get(index) {
                    Some(original) if !item.modified => out.push((original.clone(), Some(index))),
                    _ => out.push((item.op.as_line(), None)),
                }
            }
            if last_op_line == Some(index) {
                out.extend(appended());
            }
        }
        if last_op_line.is_none() {
            out.extend(appended());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "\
# system model
search group-os=conary.example.com@rpl:2

install group-os   # base
offer \"nginx\"
erase sendmail  postfix
version 1.0
";

    fn specs(names: &[&str]) -> Vec<TroveSpec> {
        names.iter().map(|n| TroveSpec::parse(n).unwrap()).collect()
    }

    // === Parse tests ===

    #[test]
    fn test_parse_operations() {
        let model = SystemModel::parse(MODEL).unwrap();
        let ops: Vec<&ModelOp> = model.ops().collect();
        assert_eq!(ops.len(), 4);
        assert!(matches!(ops[0], ModelOp::Search(SearchItem::Trove(s)) if s.name == "group-os"));
        assert_eq!(ops[2], &ModelOp::Trove {
            kind: TroveOpKind::Offer,
            specs: specs(&["nginx"]),
        });
        assert_eq!(ops[3], &ModelOp::erase(specs(&["sendmail", "postfix"])));
        assert_eq!(model.version(), Some("1.0"));
        assert!(!model.modified());
    }

    #[test]
    fn test_parse_search_label() {
        let model = SystemModel::parse("search conary.example.com@rpl:2\n").unwrap();
        let op = model.ops().next().unwrap();
        assert!(matches!(op, ModelOp::Search(SearchItem::Label(l)) if l.tag == "2"));
    }

    #[test]
    fn test_parse_errors() {
        let err = SystemModel::parse("install foo\nfrobnicate bar\n").unwrap_err();
        assert_eq!(err.to_string(), "Unrecognized command \"frobnicate\" on line 2");

        let err = SystemModel::parse("install\n").unwrap_err();
        assert_eq!(err.to_string(), "Invalid statement on line 1");
    }

    // === Format tests ===

    #[test]
    fn test_round_trip_unmodified() {
        let model = SystemModel::parse(MODEL).unwrap();
        assert_eq!(model.format(), MODEL);
    }

    #[test]
    fn test_new_ops_follow_last_op() {
        let mut model = SystemModel::parse("install foo\n# trailing\n").unwrap();
        model.append_trove_op(TroveOpKind::Install, specs(&["bar=:devel"]));
        model.append_noop("# header");
        assert!(model.modified());
        assert_eq!(model.format(), "# header\ninstall foo\ninstall bar=:devel\n# trailing\n");
    }

    #[test]
    fn test_new_ops_end_comment_only_model() {
        let mut model = SystemModel::parse("# managed by hand\n\n# keep this\n").unwrap();
        model.append_trove_op(TroveOpKind::Install, specs(&["foo"]));
        assert_eq!(model.format(), "# managed by hand\n\n# keep this\ninstall foo\n");
    }

    #[test]
    fn test_crlf_endings_survive() {
        let text = "# base\r\ninstall foo\r\n\r\nerase bar\r\n";
        let model = SystemModel::parse(text).unwrap();
        assert_eq!(model.format(), text);

        let mut edited = SystemModel::parse(text).unwrap();
        edited.append_trove_op(TroveOpKind::Install, specs(&["baz"]));
        assert_eq!(edited.format(), "# base\r\ninstall foo\r\n\r\nerase bar\r\ninstall baz\r\n");
    }

    #[test]
    fn test_mixed_endings_kept_per_line() {
        let text = "install foo\r\n# unix comment\ninstall bar";
        let model = SystemModel::parse(text).unwrap();
        assert_eq!(model.format(), "install foo\r\n# unix comment\ninstall bar\r\n");
    }

    #[test]
    fn test_quoting_special_characters() {
        let mut model = SystemModel::new();
        model.append_trove_op(TroveOpKind::Install, specs(&["foo[ssl,!krb]"]));
        assert!(model.format().starts_with("install 'foo["));
        let reparsed = SystemModel::parse(&model.format()).unwrap();
        assert_eq!(reparsed.ops().next(), model.ops().next());
    }

    // === Edit tests ===

    #[test]
    fn test_erase_cancels_previous_install() {
        let mut model = SystemModel::parse("install foo\n").unwrap();
        model.append_trove_op(TroveOpKind::Erase, specs(&["foo"]));
        assert_eq!(model.ops().count(), 0);
        assert!(model.modified());
        assert_eq!(model.format(), "\n");
    }

    #[test]
    fn test_duplicate_erase_not_added() {
        let mut model = SystemModel::new();
        model.append_trove_op(TroveOpKind::Erase, specs(&["foo"]));
        model.append_trove_op(TroveOpKind::Erase, specs(&["foo"]));
        assert_eq!(model.ops().count(), 1);
    }

    #[test]
    fn test_set_version_replaces_in_place() {
        let mut model = SystemModel::parse("version 1.0\ninstall foo\n").unwrap();
        model.set_version("2.0");
        assert_eq!(model.format(), "version 2.0\ninstall foo\n");
    }
}
