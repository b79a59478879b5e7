//! Manual editing from the command line: listings, tags and exclusions.

use crate::commands::mergetags::resolve_tag;
use crate::db::{Database, PublicationFilter};
use crate::error::Result;
use crate::models::{PublicationSummary, Stage, Tag};
use serde::Serialize;
use std::io::Write;
use tracing::info;

/// Flat row for CSV listings
#[derive(Debug, Serialize)]
struct ListRow<'a> {
    id: i64,
    cite_key: &'a str,
    title: &'a str,
    year: u16,
    venue: Option<&'a str>,
    doi: Option<&'a str>,
    peer_reviewed: Option<bool>,
    peer_reviewed_or_cited: bool,
    classified: bool,
    citations: i64,
    references: i64,
    pages: Option<i64>,
    stage: &'static str,
}

impl<'a> ListRow<'a> {
    fn new(summary: &'a PublicationSummary, peer_reviewed_or_cited: bool) -> Self {
        let p = &summary.publication;
        Self {
            id: p.id,
            cite_key: &p.cite_key,
            title: &p.title,
            year: p.year,
            venue: p.venue.as_deref(),
            doi: p.doi.as_deref(),
            peer_reviewed: p.peer_reviewed,
            peer_reviewed_or_cited,
            classified: p.classified,
            citations: summary.citation_count,
            references: summary.references_count,
            pages: summary.page_count,
            stage: Stage::label(summary.stage),
        }
    }
}

/// Print publications matching `filter`; returns how many were listed.
pub fn list(db: &Database, filter: &PublicationFilter, as_csv: bool, out: &mut dyn Write) -> Result<usize> {
    let summaries = db.summaries(filter)?;
    if as_csv {
        let mut wtr = csv::WriterBuilder::new().has_headers(true).from_writer(out);
        for summary in &summaries {
            let reviewed = db.is_peer_reviewed_or_cited_by_peer_reviewed(summary.publication.id)?;
            wtr.serialize(ListRow::new(summary, reviewed))?;
        }
        wtr.flush()?;
    } else {
        writeln!(
            out,
            "{:>5}  {:<40} {:>4} {:>3} {:>5} {:>5} {:>5}  {:<9}  Title",
            "ID", "Cite key", "Year", "PR", "Cit.", "Refs", "Pages", "Stage"
        )?;
        for summary in &summaries {
            let p = &summary.publication;
            let pages = summary.page_count.map(|n| n.to_string()).unwrap_or_default();
            // `*` marks publications only cited by peer-reviewed work.
            let reviewed = if p.peer_reviewed == Some(true) {
                "yes"
            } else if db.is_peer_reviewed_or_cited_by_peer_reviewed(p.id)? {
                "*"
            } else {
                ""
            };
            writeln!(
                out,
                "{:>5}  {:<40} {:>4} {:>3} {:>5} {:>5} {:>5}  {:<9}  {}",
                p.id,
                p.cite_key,
                p.year,
                reviewed,
                summary.citation_count,
                summary.references_count,
                pages,
                Stage::label(summary.stage),
                p.title
            )?;
        }
    }
    info!(count = summaries.len(), "Listed publications");
    Ok(summaries.len())
}

/// Create a tag, or update the criteria of an existing one.
pub fn tag_create(db: &Database, name: &str, criteria: Option<&str>, out: &mut dyn Write) -> Result<Tag> {
    db.atomic(|| {
        let (mut tag, created) = db.get_or_create_tag(name)?;
        if let Some(criteria) = criteria {
            db.set_tag_criteria(tag.id, criteria)?;
            tag.criteria = criteria.to_string();
        }
        if created {
            writeln!(out, "Created tag {}: {}", tag.id, tag.name)?;
        } else {
            writeln!(out, "Tag already exists {}: {}", tag.id, tag.name)?;
        }
        Ok(tag)
    })
}

/// Record that `tag` implies `implied`.
pub fn tag_imply(db: &Database, tag: &str, implied: &str, out: &mut dyn Write) -> Result<bool> {
    let tag = resolve_tag(db, tag)?;
    let implied = resolve_tag(db, implied)?;
    let added = db.add_tag_implication(tag.id, implied.id)?;
    if added {
        writeln!(out, "{} -> {}", tag.name, implied.name)?;
    }
    Ok(added)
}

/// Tag publications; an existing tag assignment gets the new comment.
pub fn tag_assign(
    db: &Database,
    tag: &str,
    ids: &[i64],
    comment: Option<&str>,
    out: &mut dyn Write,
) -> Result<usize> {
    let tag = resolve_tag(db, tag)?;
    db.atomic(|| {
        let mut added = 0;
        for id in ids {
            let publication = db.publication(*id)?;
            if db.tag_publication(publication.id, tag.id, comment)? {
                added += 1;
                writeln!(out, "{}: {}", publication, tag.name)?;
            } else if comment.is_some() {
                db.set_publication_tag_comment(publication.id, tag.id, comment)?;
                writeln!(out, "{}: {} (comment updated)", publication, tag.name)?;
            }
        }
        Ok(added)
    })
}

pub fn tag_list(db: &Database, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "{:>5}  {:>5} {:>5}  Name", "ID", "Pubs", "All")?;
    for row in db.tag_counts()? {
        writeln!(
            out,
            "{:>5}  {:>5} {:>5}  {}",
            row.id,
            row.publications,
            row.secondary.unwrap_or(row.publications),
            row.name
        )?;
    }
    Ok(())
}

/// Exclude publications by a criterion, created if unknown.
pub fn exclude(db: &Database, criterion: &str, ids: &[i64], out: &mut dyn Write) -> Result<usize> {
    db.atomic(|| {
        let (criterion, created) = db.get_or_create_exclusion_criterion(criterion)?;
        if created {
            info!(criterion = %criterion.name, "Created exclusion criterion");
        }
        let mut added = 0;
        for id in ids {
            let publication = db.publication(*id)?;
            if db.exclude(publication.id, criterion.id)? {
                added += 1;
                writeln!(out, "Excluded {publication}: {}", criterion.name)?;
            }
        }
        Ok(added)
    })
}
