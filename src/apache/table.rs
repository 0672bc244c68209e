//! Connection table extraction from an Apache `server-status` page.

use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

/// Header text of the first column of the connection table.
pub const CONNECTION_TABLE_MARKER: &str = "Srv";

static TABLE: LazyLock<Selector> = LazyLock::new(|| selector("table"));
static ROW: LazyLock<Selector> = LazyLock::new(|| selector("tr"));
static HEADER_CELL: LazyLock<Selector> = LazyLock::new(|| selector("th"));
static DATA_CELL: LazyLock<Selector> = LazyLock::new(|| selector("td"));

fn selector(css: &str) -> Selector {
    // Only called with the literal tag names above.
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e}"))
}

/// One row of the connection table carrying the two columns classification
/// needs. Rows without both columns are never built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub client: String,
    pub request: String,
}

/// Column positions resolved from the table's header cells.
#[derive(Debug, Default)]
struct Columns {
    headers: Vec<String>,
}

impl Columns {
    fn position(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn record(&self, cells: &[String]) -> Option<ConnectionRecord> {
        let client = cells.get(self.position("Client")?)?;
        let request = cells.get(self.position("Request")?)?;
        Some(ConnectionRecord {
            client: client.clone(),
            request: request.clone(),
        })
    }
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

fn is_connection_table(table: ElementRef<'_>) -> bool {
    table
        .select(&HEADER_CELL)
        .next()
        .is_some_and(|th| cell_text(th) == CONNECTION_TABLE_MARKER)
}

/// Extracts connection records from the first connection table in `html`.
///
/// Tables before it are ignored, as is everything after it. Header cells are
/// collected in document order and data cells are matched to them by
/// position; cells past the last header are dropped.
pub fn connection_records(html: &str) -> Vec<ConnectionRecord> {
    let document = Html::parse_document(html);
    let Some(table) = document.select(&TABLE).find(|t| is_connection_table(*t)) else {
        return Vec::new();
    };

    let mut columns = Columns::default();
    let mut records = Vec::new();
    for row in table.select(&ROW) {
        columns.headers.extend(row.select(&HEADER_CELL).map(cell_text));
        let cells: Vec<String> = row.select(&DATA_CELL).map(cell_text).collect();
        if cells.is_empty() {
            continue;
        }
        if let Some(record) = columns.record(&cells) {
            records.push(record);
        }
    }
    records
}
