use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use crate::utils::normalize_whitespace;

pub const TABLE_CONTAINER: &str = "#table_block_n2_and_content_wrapper";

static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        "#table_block_n2_and_content_wrapper > table > tbody > tr:nth-of-type(2) \
         > td:nth-of-type(2) > table > tbody > tr > td > table:nth-of-type(2) > tbody > tr",
    )
    .expect("invalid selector: catalog rows")
});

static NAME_SELS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["td.width a", "td.width_85 a", "td:nth-child(2) a"]
        .iter()
        .map(|s| Selector::parse(s).expect("invalid selector: course name link"))
        .collect()
});

static PAGE_LABEL_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"[aria-label^="Page "]"#).expect("invalid selector: page label")
});

// Leading header rows and the trailing spacer row of each course table.
const LEADING_ROWS: usize = 3;
const TRAILING_ROWS: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    #[error("NameLinkNotFound")]
    NameLinkNotFound,
    #[error("EmptyNameText")]
    EmptyNameText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub index: usize,
    pub error: RowError,
    pub html: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CatalogPage {
    pub names: Vec<String>,
    pub failures: Vec<RowFailure>,
    pub rows_found: usize,
}

fn elem_text(element: ElementRef) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

fn row_name(row: ElementRef) -> Result<String, RowError> {
    let mut found_link = false;
    for sel in NAME_SELS.iter() {
        if let Some(link) = row.select(sel).next() {
            found_link = true;
            let text = elem_text(link);
            if !text.is_empty() {
                return Ok(text);
            }
        }
    }
    if found_link {
        Err(RowError::EmptyNameText)
    } else {
        Err(RowError::NameLinkNotFound)
    }
}

pub fn parse_catalog_page(html: &str) -> CatalogPage {
    let document = Html::parse_document(html);
    let rows: Vec<ElementRef> = document.select(&ROW_SEL).collect();

    let mut page = CatalogPage {
        rows_found: rows.len(),
        ..Default::default()
    };

    let end = rows.len().saturating_sub(TRAILING_ROWS);
    for (index, row) in rows.iter().enumerate().take(end).skip(LEADING_ROWS) {
        match row_name(*row) {
            Ok(name) => page.names.push(name),
            Err(error) => page.failures.push(RowFailure {
                index,
                error,
                html: row.html(),
            }),
        }
    }

    page
}

/// Highest `N` among the `aria-label="Page N"` pagination controls.
pub fn parse_last_page(html: &str) -> Option<u32> {
    let document = Html::parse_document(html);
    document
        .select(&PAGE_LABEL_SEL)
        .filter_map(|e| {
            e.value()
                .attr("aria-label")?
                .trim()
                .rsplit(' ')
                .next()?
                .parse::<u32>()
                .ok()
        })
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> String {
        fs::read_to_string("fixtures/catalog_page.html").expect("Failed to read fixture")
    }

    #[test]
    fn test_parse_catalog_page_from_fixture() {
        let page = parse_catalog_page(&fixture());

        assert_eq!(page.rows_found, 9);
        assert_eq!(
            page.names,
            vec![
                "ANTHROP 1AA3 - Introduction to Anthropology",
                "ARTHIST 1A03 - Art and Visual Culture",
                "ARTSSCI 1D06 A/B - Practical Logic",
                "MATH 1ZB3 - Engineering Mathematics II-A",
            ]
        );
    }

    #[test]
    fn test_parse_catalog_page_reports_row_failures() {
        let page = parse_catalog_page(&fixture());

        assert_eq!(page.failures.len(), 1);
        let failure = &page.failures[0];
        assert_eq!(failure.index, 7);
        assert_eq!(failure.error, RowError::NameLinkNotFound);
        assert!(failure.html.contains("No link here"));
    }

    #[test]
    fn test_empty_link_text_is_a_failure() {
        let html = r##"<div id="table_block_n2_and_content_wrapper"><table><tbody>
            <tr><td>top</td></tr>
            <tr><td>left</td><td><table><tbody><tr><td>
              <table><tr><td>intro</td></tr></table>
              <table>
                <tr><td>h1</td></tr><tr><td>h2</td></tr><tr><td>h3</td></tr>
                <tr><td class="width"><a href="#"> </a></td></tr>
                <tr><td>spacer</td></tr>
              </table>
            </td></tr></tbody></table></td></tr>
            </tbody></table></div>"##;
        let page = parse_catalog_page(html);
        assert!(page.names.is_empty());
        assert_eq!(page.failures[0].error, RowError::EmptyNameText);
    }

    #[test]
    fn test_parse_last_page() {
        assert_eq!(parse_last_page(&fixture()), Some(31));
        assert_eq!(parse_last_page("<html><body></body></html>"), None);
    }
}
