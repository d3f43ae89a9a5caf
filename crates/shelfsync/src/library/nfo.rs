//! Kodi-style movie sidecars.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesText, Event};
use quick_xml::Writer;

use super::candidate::RecommendationCandidate;
use crate::error::LibraryError;

const INDENT: usize = 2;

/// Renders the sidecar for one candidate. `dateadded` carries the synthetic
/// recency that reproduces the ranking in the media server's sort, and
/// `sorttitle` carries the rank for clients that sort by title.
pub fn render_nfo(
    candidate: &RecommendationCandidate,
    added_at: DateTime<Utc>,
    include_explanation: bool,
) -> Result<String, LibraryError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', INDENT);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
        .map_err(LibraryError::Sidecar)?;

    let sort_title = format!("{:04} {}", candidate.rank, candidate.title);
    let date_added = added_at.format("%Y-%m-%d %H:%M:%S").to_string();
    let rank = candidate.rank.to_string();
    let score = format!("{:.3}", candidate.score);
    let plot = candidate
        .explanation
        .as_deref()
        .map(str::trim)
        .filter(|e| include_explanation && !e.is_empty());

    writer
        .create_element("movie")
        .write_inner_content(|w| {
            text_element(w, "title", &candidate.title)?;
            text_element(w, "sorttitle", &sort_title)?;
            if let Some(year) = candidate.year {
                text_element(w, "year", &year.to_string())?;
            }
            text_element(w, "dateadded", &date_added)?;
            w.create_element("uniqueid")
                .with_attribute(("type", "shelfsync"))
                .with_attribute(("default", "true"))
                .write_text_content(BytesText::new(&candidate.id))?;
            text_element(w, "rank", &rank)?;
            text_element(w, "score", &score)?;
            if let Some(plot) = plot {
                text_element(w, "plot", plot)?;
            }
            Ok(())
        })
        .map_err(LibraryError::Sidecar)?;

    let mut out = String::from_utf8_lossy(&writer.into_inner()).into_owned();
    out.push('\n');
    Ok(out)
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> std::io::Result<()> {
    writer
        .create_element(name)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}
