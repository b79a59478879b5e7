//! DOT export of the citation graph and the tag implication graph.
//!
//! Output goes to any writer so it can be piped straight into Graphviz.
//! Cycles are reported on the log and returned, the offending edges are
//! still written.

use crate::db::{Database, PublicationFilter};
use crate::error::Result;
use crate::models::{Stage, Tag};
use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use tracing::{debug, warn};

/// Quote a node label for DOT.
pub fn quote(label: &str) -> String {
    let escaped = label.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn header(out: &mut impl Write) -> Result<()> {
    writeln!(out, "digraph G {{")?;
    writeln!(out, "\trankdir = RL;")?;
    Ok(())
}

fn footer(out: &mut impl Write) -> Result<()> {
    writeln!(out, "}}")?;
    Ok(())
}

/// Write the citation graph of relevant publications cited at least
/// `min_citations` times.
///
/// Only primary publications contribute edges, each to the relevant
/// publications it references. Nodes are cite keys, or ids with `use_ids`.
/// Returns the cite key pairs found to cite each other.
pub fn citation_graph(
    db: &Database,
    min_citations: i64,
    use_ids: bool,
    out: &mut impl Write,
) -> Result<Vec<(String, String)>> {
    let filter = PublicationFilter {
        relevant: Some(true),
        min_citations: Some(min_citations),
        ..Default::default()
    };
    let publications = db.summaries(&filter)?;
    let included: BTreeSet<i64> = publications.iter().map(|s| s.publication.id).collect();
    debug!(publications = included.len(), min_citations, "Building citation graph");

    header(out)?;
    let mut edges: HashSet<(i64, i64)> = HashSet::new();
    let mut cycles = Vec::new();

    for summary in publications.iter().filter(|s| s.stage == Some(Stage::Primary)) {
        let publication = &summary.publication;
        for reference in db.relevant_references(publication.id)? {
            if !included.contains(&reference.id) {
                continue;
            }
            edges.insert((publication.id, reference.id));
            if edges.contains(&(reference.id, publication.id)) {
                warn!("CYCLE: {} <-> {}", publication.cite_key, reference.cite_key);
                cycles.push((publication.cite_key.clone(), reference.cite_key.clone()));
            }
            if use_ids {
                writeln!(out, "\t\"{}\" -> \"{}\";", publication.id, reference.id)?;
            } else {
                writeln!(
                    out,
                    "\t{} -> {};",
                    quote(&publication.cite_key),
                    quote(&reference.cite_key)
                )?;
            }
        }
    }

    footer(out)?;
    Ok(cycles)
}

/// Write the tags implying `root`, recursively, as edges `child -> parent`.
///
/// Each edge is written once, after the subtree below it. Returns tag name
/// pairs that imply each other.
pub fn tag_dag(db: &Database, root: &Tag, out: &mut impl Write) -> Result<Vec<(String, String)>> {
    header(out)?;
    let mut edges = HashSet::new();
    let mut cycles = Vec::new();
    walk_tags(db, root, &mut edges, &mut cycles, out)?;
    footer(out)?;
    Ok(cycles)
}

fn walk_tags(
    db: &Database,
    root: &Tag,
    edges: &mut HashSet<(i64, i64)>,
    cycles: &mut Vec<(String, String)>,
    out: &mut impl Write,
) -> Result<()> {
    for tag in db.implied_by(root.id)? {
        let edge = (tag.id, root.id);
        if edges.contains(&edge) {
            continue;
        }
        if edges.contains(&(root.id, tag.id)) {
            warn!("CYCLE: '{}' <-> '{}'", root.name, tag.name);
            cycles.push((root.name.clone(), tag.name.clone()));
        }
        edges.insert(edge);
        walk_tags(db, &tag, edges, cycles, out)?;
        writeln!(out, "\t{} -> {};", quote(&tag.name), quote(&root.name))?;
    }
    Ok(())
}
