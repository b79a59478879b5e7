//! `stats`: how many publications each search term yields.

use crate::db::Database;
use crate::dblp::{self, DblpApi, MAX_HITS};
use crate::dump::DumpReader;
use crate::error::Result;
use std::collections::BTreeSet;
use std::io::Write;
use tracing::info;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// DBLP hits for any search term that are also in the dump
    pub found: usize,
    pub peer_reviewed: usize,
    /// Relevant stored publications found by any search term
    pub relevant: usize,
}

pub async fn run(db: &Database, dblp_api: &dyn DblpApi, dump: &DumpReader, out: &mut dyn Write) -> Result<Stats> {
    info!(path = %dump.path().display(), "Loading DBLP dump keys");
    let all_cite_keys = dump.all_cite_keys()?;

    let mut found = BTreeSet::new();
    let mut peer_reviewed = BTreeSet::new();
    let mut relevant = BTreeSet::new();

    for term in db.search_terms()? {
        writeln!(out, "Searching DBLP for '{}'", term.name)?;
        let page = dblp::search(dblp_api, &term.name, MAX_HITS, false).await?;
        for result in &page.results {
            let cite_key = result.cite_key();
            if !all_cite_keys.contains(&cite_key) {
                continue;
            }
            if result.is_peer_reviewed() == Some(true) {
                peer_reviewed.insert(cite_key.clone());
            }
            found.insert(cite_key);
        }
        relevant.extend(db.relevant_cite_keys_for_search_term(term.id)?);
    }

    let stats = Stats {
        found: found.len(),
        peer_reviewed: peer_reviewed.len(),
        relevant: relevant.len(),
    };
    writeln!(out, "Total publications: {:4}", stats.found)?;
    writeln!(out, "- peer reviewed:    {:4}", stats.peer_reviewed)?;
    writeln!(out, "- relevant:         {:4}", stats.relevant)?;
    Ok(stats)
}
