//! `mergetags`: move every publication of one tag onto another.

use crate::db::Database;
use crate::error::{Result, SokError};
use crate::models::Tag;
use std::io::Write;

/// Resolve a tag by id, exact name, or unique case-insensitive substring.
pub fn resolve_tag(db: &Database, value: &str) -> Result<Tag> {
    if let Ok(id) = value.trim().parse::<i64>() {
        return db.tag(id);
    }
    if let Some(tag) = db.tag_by_name(value)? {
        return Ok(tag);
    }
    let mut candidates = db.tags_containing(value)?;
    match candidates.len() {
        0 => Err(SokError::NotFound(format!("tag matching '{value}'"))),
        1 => Ok(candidates.remove(0)),
        _ => {
            let names: Vec<&str> = candidates.iter().map(|t| t.name.as_str()).collect();
            Err(SokError::Validation(format!(
                "'{value}' matches several tags: {}",
                names.join(", ")
            )))
        }
    }
}

/// Combined comment after merging: both kept when they differ.
fn merge_comments(lhs: Option<&str>, rhs: Option<&str>) -> Option<String> {
    let lhs = lhs.filter(|c| !c.is_empty());
    let rhs = rhs.filter(|c| !c.is_empty());
    match (lhs, rhs) {
        (Some(l), Some(r)) if l != r => Some(format!("{l}; {r}")),
        (Some(l), _) => Some(l.to_string()),
        (None, r) => r.map(str::to_string),
    }
}

/// Merge `rhs` into `lhs`; returns the number of publications moved.
pub fn run(db: &Database, lhs: &str, rhs: &str, out: &mut dyn Write) -> Result<usize> {
    let lhs = resolve_tag(db, lhs)?;
    let rhs = resolve_tag(db, rhs)?;
    if lhs.id == rhs.id {
        return Err(SokError::Validation(format!(
            "Cannot merge tag with itself: {}",
            lhs.name
        )));
    }

    db.atomic(|| {
        let publications = db.tagged_publications(rhs.id)?;
        for publication in &publications {
            let rhs_comment = db
                .publication_tag(publication.id, rhs.id)?
                .and_then(|rel| rel.comment);
            let lhs_comment = match db.publication_tag(publication.id, lhs.id)? {
                Some(rel) => rel.comment,
                None => {
                    db.tag_publication(publication.id, lhs.id, None)?;
                    None
                }
            };

            let merged = merge_comments(lhs_comment.as_deref(), rhs_comment.as_deref());
            db.untag_publication(publication.id, rhs.id)?;

            if merged != lhs_comment {
                db.set_publication_tag_comment(publication.id, lhs.id, merged.as_deref())?;
                writeln!(
                    out,
                    "{} <- {} [{}]: {}",
                    lhs.name,
                    rhs.name,
                    publication.cite_key,
                    merged.as_deref().unwrap_or_default()
                )?;
            } else {
                writeln!(out, "{} <- {} [{}]", lhs.name, rhs.name, publication.cite_key)?;
            }
        }
        Ok(publications.len())
    })
}
