use std::fmt::Write;

use serde::Serialize;

use crate::error::KiraError;
use crate::source::{ExpressionHandle, ExpressionSource, NodeKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub depth: usize,
    pub path: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl TreeEntry {
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Every group and dataset in the archive, depth-first, members sorted by name.
pub fn ls(source: &dyn ExpressionSource) -> Result<Vec<TreeEntry>, KiraError> {
    let handle = source.open()?;
    let mut out = Vec::new();
    walk(handle.as_ref(), "", 0, &mut out)?;
    Ok(out)
}

fn walk(
    handle: &dyn ExpressionHandle,
    group: &str,
    depth: usize,
    out: &mut Vec<TreeEntry>,
) -> Result<(), KiraError> {
    let mut entries = handle.entries(if group.is_empty() { "/" } else { group })?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    for entry in entries {
        let path = if group.is_empty() {
            entry.name.clone()
        } else {
            format!("{group}/{}", entry.name)
        };
        let is_group = matches!(entry.kind, NodeKind::Group);
        out.push(TreeEntry {
            depth,
            path: path.clone(),
            kind: entry.kind,
        });
        if is_group {
            walk(handle, &path, depth + 1, out)?;
        }
    }
    Ok(())
}

pub fn render_tree(entries: &[TreeEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let indent = "  ".repeat(entry.depth);
        let _ = match &entry.kind {
            NodeKind::Group => writeln!(out, "{indent}{}/", entry.name()),
            NodeKind::Dataset { shape, dtype } => {
                let dims = shape
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join(" x ");
                writeln!(out, "{indent}{:<28} {dtype:<16} ({dims})", entry.name())
            }
        };
    }
    out
}
