//! Operator commands.
//!
//! Every command writes its user-facing output to the given writer (stdout
//! in the binary) and logs progress through `tracing` on stderr.

pub mod cite;
pub mod import;
pub mod manage;
pub mod mergetags;
pub mod repair;
pub mod search;
pub mod snowball;
pub mod stats;

use crate::db::Database;
use crate::error::Result;
use crate::models::{Author, Publication, SearchTerm, Source};
use std::io::Write;
use tracing::debug;

/// Get or create one author per name, keeping their order.
pub(crate) fn store_authors(db: &Database, names: &[String], out: &mut dyn Write) -> Result<Vec<Author>> {
    let mut authors = Vec::with_capacity(names.len());
    for name in names {
        let (author, created) = db.get_or_create_author(name)?;
        if created {
            writeln!(out, "Added author: {}", author.name)?;
        } else {
            debug!(author = %author.name, "Author already known");
        }
        authors.push(author);
    }
    Ok(authors)
}

/// Assign `authors` to `publication` at positions 0, 1, ...
pub(crate) fn assign_authors(
    db: &Database,
    publication: &Publication,
    authors: &[Author],
    out: &mut dyn Write,
) -> Result<()> {
    for (position, author) in authors.iter().enumerate() {
        let position = u16::try_from(position).unwrap_or(u16::MAX);
        if db.assign_author(publication.id, author.id, position)? {
            writeln!(
                out,
                "Assigned author '{}' to publication '{}' at position {}",
                author.name, publication, position
            )?;
        } else {
            debug!(author = %author.name, publication = %publication, position, "Author already assigned");
        }
    }
    Ok(())
}

/// Record that `publication` was found in `source` with `term`.
pub(crate) fn attach_source(
    db: &Database,
    publication: &Publication,
    source: &Source,
    term: &SearchTerm,
    out: &mut dyn Write,
) -> Result<bool> {
    let created = db.add_publication_source(publication.id, source.id, term.id)?;
    if created {
        writeln!(
            out,
            "Assigned source '{}' to publication '{}' with search term '{}'",
            source.name, publication, term.name
        )?;
    } else {
        debug!(source = %source.name, publication = %publication, term = %term.name, "Source already assigned");
    }
    Ok(created)
}

/// DOI that may be stored for `publication_id` without clashing with
/// another publication.
pub(crate) fn free_doi(
    db: &Database,
    doi: Option<&str>,
    publication_id: Option<i64>,
    out: &mut dyn Write,
) -> Result<Option<String>> {
    let Some(doi) = doi else {
        return Ok(None);
    };
    match db.publication_by_doi(doi)? {
        Some(owner) if Some(owner.id) != publication_id => {
            tracing::warn!(doi, owner = %owner, "DOI already belongs to another publication");
            writeln!(out, "Dropped DOI '{doi}': already assigned to '{owner}'")?;
            Ok(None)
        }
        _ => Ok(Some(doi.to_string())),
    }
}
