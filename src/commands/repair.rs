//! `repair`: fill gaps left by earlier imports.
//!
//! Steps, in order:
//! 1. references to a variant (e.g. a preprint) are mirrored onto its master,
//!    with the identifier marked by a trailing `*`
//! 2. `DBLP:` cite keys missing from the local dump are listed
//! 3. missing DOIs are taken from the dump
//! 4. missing Semantic Scholar IDs are looked up by DOI

use crate::db::Database;
use crate::dblp::CITE_KEY_PREFIX;
use crate::dump::DumpReader;
use crate::error::{Result, SokError};
use crate::semanticscholar::SemanticScholarApi;
use std::collections::BTreeSet;
use std::io::Write;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RepairOptions {
    /// Skip steps 2 and 3
    pub skip_dump: bool,
    /// Skip step 4
    pub skip_semanticscholar: bool,
    pub throttle: Duration,
}

#[derive(Debug, Default)]
pub struct RepairReport {
    pub references_added: usize,
    pub missing_from_dump: BTreeSet<String>,
    pub dois_added: usize,
    pub paper_ids_added: usize,
}

/// Mirror references to variants onto their masters.
pub fn fix_references(db: &Database, out: &mut dyn Write) -> Result<usize> {
    writeln!(out, "--- Searching for references to variants ---")?;
    db.atomic(|| {
        let mut added = 0;
        for variant in db.variants()? {
            let Some(master_id) = variant.variant_of else {
                continue;
            };
            let master = db.publication(master_id)?;
            for original in db.references_to(variant.id)? {
                if original.publication_id == master.id
                    || db.reference(original.publication_id, master.id)?.is_some()
                {
                    continue;
                }
                let identifier = format!("{}*", original.identifier.as_deref().unwrap_or_default());
                db.add_reference(original.publication_id, master.id, Some(&identifier))
                    .map_err(|e| {
                        SokError::Validation(format!("{variant} -- {identifier} -> {master}: {e}"))
                    })?;
                writeln!(out, "Added reference: {variant} -- {identifier} -> {master}")?;
                added += 1;
            }
        }
        Ok(added)
    })
}

/// `DBLP:` cite keys in the database that the dump does not know.
pub fn missing_from_dump(db: &Database, dump: &DumpReader, out: &mut dyn Write) -> Result<BTreeSet<String>> {
    writeln!(out, "--- Searching for entries not in the default DBLP dump ---")?;
    let in_db = db.cite_keys_with_prefix(CITE_KEY_PREFIX)?;
    let in_dump = dump.all_cite_keys()?;
    writeln!(out, "DB:   {:8}", in_db.len())?;
    writeln!(out, "DBLP: {:8}", in_dump.len())?;
    let missing: BTreeSet<String> = in_db.difference(&in_dump).cloned().collect();
    for key in &missing {
        writeln!(out, "{key}")?;
    }
    Ok(missing)
}

/// Take DOIs of `DBLP:` publications without one from the dump.
pub fn find_missing_dois(db: &Database, dump: &DumpReader, out: &mut dyn Write) -> Result<usize> {
    writeln!(out, "--- Searching for missing DOIs ---")?;
    let keys: Vec<String> = db
        .publications_missing_doi()?
        .into_iter()
        .map(|p| p.cite_key)
        .filter(|k| k.starts_with(CITE_KEY_PREFIX))
        .collect();
    if keys.is_empty() {
        return Ok(0);
    }

    let mut added = 0;
    for result in dump.records(&keys)? {
        let Some(doi) = result.doi() else {
            continue;
        };
        let Some(publication) = db.publication_by_cite_key(&result.cite_key())? else {
            continue;
        };
        if let Some(owner) = db.publication_by_doi(&doi)? {
            warn!(doi = %doi, owner = %owner, publication = %publication, "DOI already assigned");
            continue;
        }
        db.set_doi(publication.id, &doi)?;
        writeln!(out, "Added DOI '{doi}' to publication: {publication}")?;
        added += 1;
    }
    Ok(added)
}

/// Look up Semantic Scholar IDs for publications with a DOI but without ID.
pub async fn find_semanticscholar_ids(
    db: &Database,
    ss: &dyn SemanticScholarApi,
    throttle: Duration,
    out: &mut dyn Write,
) -> Result<usize> {
    writeln!(out, "--- Searching for paper IDs on Semantic Scholar ---")?;
    let mut added = 0;
    for publication in db.publications_missing_paper_id()? {
        let Some(doi) = publication.doi.as_deref() else {
            continue;
        };
        match ss.paper(doi, false).await {
            Ok(paper) => match paper.paper_id.as_deref() {
                Some(paper_id) => match db.publication_by_paper_id(paper_id)? {
                    Some(owner) => {
                        warn!(paper_id, owner = %owner, publication = %publication, "Paper ID already assigned");
                    }
                    None => {
                        db.add_semantic_scholar(paper_id, publication.id)?;
                        writeln!(out, "Set semanticscholar ID for publication '{publication}': {paper_id}")?;
                        added += 1;
                    }
                },
                None => warn!(doi, "Semantic Scholar returned no paper ID"),
            },
            Err(SokError::Api { code: 404, .. }) => {
                warn!(doi, publication = %publication, "Not found on Semantic Scholar");
            }
            Err(e) => return Err(e),
        }
        if !throttle.is_zero() {
            tokio::time::sleep(throttle).await;
        }
    }
    Ok(added)
}

pub async fn run(
    db: &Database,
    dump: &DumpReader,
    ss: &dyn SemanticScholarApi,
    out: &mut dyn Write,
    options: &RepairOptions,
) -> Result<RepairReport> {
    let mut report = RepairReport {
        references_added: fix_references(db, out)?,
        ..Default::default()
    };
    if options.skip_dump {
        info!("Skipping DBLP dump checks");
    } else {
        report.missing_from_dump = missing_from_dump(db, dump, out)?;
        report.dois_added = find_missing_dois(db, dump, out)?;
    }
    if options.skip_semanticscholar {
        info!("Skipping Semantic Scholar lookups");
    } else {
        report.paper_ids_added = find_semanticscholar_ids(db, ss, options.throttle, out).await?;
    }
    Ok(report)
}
