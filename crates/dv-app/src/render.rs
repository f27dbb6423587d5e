//! Text output for the browser

use std::io::Write;

use dv_core::{NodeId, RepoTree, RtiError};

/// One line per loaded node, indented by depth
pub fn print_tree(out: &mut impl Write, repo: &RepoTree) -> Result<(), RtiError> {
    for (id, depth) in repo.walk(repo.root())? {
        let item = repo.item(id)?;
        let indent = "  ".repeat(depth);
        let summary = item.summary();
        let mut line = format!("{indent}{}  [{}]", item.node_name(), item.type_name());
        if !summary.is_empty() {
            line.push_str(&format!("  {summary}"));
        }
        writeln!(out, "{line}")?;
        if let Some(error) = item.last_error() {
            writeln!(out, "{indent}  ! {error}")?;
        }
    }
    Ok(())
}

/// Describe a node's data and print the selected part of it
pub fn print_slice(out: &mut impl Write, repo: &RepoTree, id: NodeId, index_text: &str) -> Result<(), RtiError> {
    let item = repo.item(id)?;
    let index = dv_core::parse_index(index_text)?;
    let array = repo.get_item(id, &index)?;

    writeln!(out, "{} [{}]", repo.node_path(id)?, index_text)?;
    writeln!(
        out,
        "  {} {} ({})",
        item.element_type_name(),
        dv_core::shape_summary(&item.shape()?),
        item.dimension_names().join(", ")
    )?;
    let unit = item.unit();
    if !unit.is_empty() {
        writeln!(out, "  unit: {unit}")?;
    }
    if let Some(missing) = item.missing_data_value() {
        writeln!(out, "  missing: {missing}")?;
    }
    writeln!(out, "{array}")?;
    Ok(())
}
