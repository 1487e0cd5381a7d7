use std::{borrow::Cow, sync::Arc};

use quick_xml::escape::resolve_html5_entity;
use serde::Serialize;
use serde_json::Value;

use crate::{
    connection::Connection,
    doc_id::RecordKey,
    error::{Error, Result},
    schema::fields,
    service::{SearchResponse, WireResponse},
};

/// Maximum number of hits returned by one query.
pub const PAGE_SIZE: usize = 25;

/// One ranked hit, in the order the service returned it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub file_name: String,
    pub file_tags: Vec<String>,
    /// Relevance score; only comparable within one result set.
    pub score: f64,
}

/// Results plus the exact number of matching records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultPage {
    pub total: u64,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: QueryClause<'a>,
    size: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum QueryClause<'a> {
    MultiMatch(MultiMatch<'a>),
}

#[derive(Debug, Serialize)]
struct MultiMatch<'a> {
    query: Cow<'a, str>,
    #[serde(rename = "type")]
    kind: &'static str,
    fields: &'a [&'a str],
}

/// Decode HTML entities in user input.
///
/// Each `&name;`, `&#n;` and `&#xh;` reference is decoded on its own.
/// A bare `&` or an unknown entity is copied through as written.
pub fn normalize_query(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        match tail.find(';').and_then(|end| {
            decode_entity(&tail[..end]).map(|decoded| (decoded, end))
        }) {
            Some((decoded, end)) => {
                out.push_str(&decoded);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Resolve the text between `&` and `;`.
fn decode_entity(entity: &str) -> Option<Cow<'static, str>> {
    if let Some(number) = entity.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse::<u32>().ok()?,
        };
        let c = char::from_u32(code)
            .filter(|&c| c != '\0')
            .unwrap_or(char::REPLACEMENT_CHARACTER);
        return Some(Cow::Owned(c.to_string()));
    }
    if entity.is_empty() || !entity.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    resolve_html5_entity(entity).map(Cow::Borrowed)
}

/// Build the search body for `text`.
///
/// The text is matched against the name and tags fields, scoring each
/// document by its single best field.
pub fn build_query(text: &str) -> Result<Value> {
    let request = SearchRequest {
        query: QueryClause::MultiMatch(MultiMatch {
            query: normalize_query(text),
            kind: "best_fields",
            fields: &fields::SEARCHABLE,
        }),
        size: PAGE_SIZE,
    };
    Ok(serde_json::to_value(request)?)
}

/// Map a successful search response to result entries.
pub fn parse_response(resp: &WireResponse) -> Result<ResultPage> {
    let body: SearchResponse = resp.decode()?;
    let hits = body.hits;

    let total = hits
        .total
        .map(|t| t.value)
        .unwrap_or(hits.hits.len() as u64);
    let results = hits
        .hits
        .into_iter()
        .map(|hit| {
            let file_name = match hit.source.name {
                Some(name) => name,
                None => RecordKey::from_raw(hit.id).decode()?,
            };
            Ok(SearchResult {
                file_name,
                file_tags: hit.source.tags.unwrap_or_default(),
                score: hit.score.unwrap_or(0.0),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ResultPage { total, results })
}

fn query_error(resp: &WireResponse) -> Error {
    match resp.service_error() {
        Some(err) => Error::Query {
            status: resp.status,
            kind: err.kind,
            reason: err.reason,
        },
        None => Error::Query {
            status: resp.status,
            kind: "unknown".to_string(),
            reason: resp.reason(),
        },
    }
}

/// Runs free-text queries against the catalog index.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    connection: Arc<Connection>,
}

impl QueryEngine {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    pub async fn search(&self, text: &str) -> Result<Vec<SearchResult>> {
        Ok(self.search_page(text).await?.results)
    }

    /// Execute the query pipeline.
    ///
    /// 1. Normalise HTML escapes in the input
    /// 2. Multi-field best-match query capped at [`PAGE_SIZE`]
    /// 3. Submit with exact total-hit tracking
    /// 4. Map hits in service order
    pub async fn search_page(&self, text: &str) -> Result<ResultPage> {
        let service = self.connection.service()?;
        let body = build_query(text)?;

        let resp = service
            .search(self.connection.index(), &body, true)
            .await?;
        if !resp.is_success() {
            let err = query_error(&resp);
            tracing::warn!(query = text, error = %err, "search rejected");
            return Err(err);
        }

        let page = parse_response(&resp)?;
        tracing::debug!(
            query = text,
            total = page.total,
            returned = page.results.len(),
            "search complete"
        );
        Ok(page)
    }
}

/// Format results for human-readable terminal output.
pub fn format_human(page: &ResultPage) {
    if page.results.is_empty() {
        println!("No results found.");
        return;
    }

    for (i, r) in page.results.iter().enumerate() {
        println!("{:>3}. [{:.3}] {}", i + 1, r.score, r.file_name);
        if !r.file_tags.is_empty() {
            println!("     tags: {}", r.file_tags.join(", "));
        }
    }
    println!(
        "\n{} result(s), {} match(es) in total",
        page.results.len(),
        page.total
    );
}

/// Format results as JSON output.
pub fn format_json(page: &ResultPage, query: &str) -> Result<()> {
    let doc = serde_json::json!({
        "query": query,
        "total": page.total,
        "result_count": page.results.len(),
        "results": page.results,
    });
    println!("{}", serde_json::to_string(&doc)?);
    Ok(())
}
