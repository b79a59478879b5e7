//! `cite` and `bibtex`: output for the paper being written.

use crate::db::Database;
use crate::dblp::{strip_cite_key_prefix, DblpApi};
use crate::error::Result;

/// `\cite{k1,k2}` for the given publication ids, in the given order.
pub fn cite(db: &Database, ids: &[i64]) -> Result<String> {
    let keys = ids
        .iter()
        .map(|id| db.publication(*id).map(|p| p.cite_key))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("\\cite{{{}}}", keys.join(",")))
}

/// BibTeX entry from DBLP; the key may carry the `DBLP:` prefix.
pub async fn bibtex(dblp_api: &dyn DblpApi, key: &str) -> Result<String> {
    dblp_api.bibtex(strip_cite_key_prefix(key)).await
}
