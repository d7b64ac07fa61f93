use crate::models::{OutputFormat, ResultsPage};

/// Decode one fetched page body into its output contribution.
///
/// Raw and csv decoding cannot fail; a json envelope that does not parse is
/// an error, so a malformed page surfaces instead of shrinking the output.
pub fn decode_page(
    body: String,
    format: OutputFormat,
    index: u64,
) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Raw => Ok(body),
        OutputFormat::Csv => Ok(strip_repeated_header(body, index)),
        OutputFormat::Ndjson => to_ndjson(&body),
    }
}

/// The upstream repeats the csv header row on every page; drop it from every
/// page except the first so concatenation yields a single-header file.
fn strip_repeated_header(body: String, index: u64) -> String {
    if index == 0 {
        return body;
    }
    match body.find('\n') {
        Some(pos) => body[pos + 1..].to_string(),
        None => body,
    }
}

/// Re-serialize the results envelope as one compact JSON object per line.
fn to_ndjson(body: &str) -> Result<String, serde_json::Error> {
    let page: ResultsPage = serde_json::from_str(body)?;

    let mut out = String::new();
    for result in &page.results {
        out.push_str(&serde_json::to_string(result)?);
        out.push('\n');
    }
    Ok(out)
}
