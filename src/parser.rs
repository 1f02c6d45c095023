//! HTML parsing utilities shared by the vendor extractors
//!
//! Vendor UIs carry their data in hidden `<input>` fields and in two-column
//! label/value tables. These helpers read both without caring where on the
//! page the fields sit, since firmware builds reorder them freely.

use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

static NAMED_INPUT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input[name]").expect("valid selector"));
static PASSWORD_INPUT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("input[type='password'], input[type='PASSWORD']").expect("valid selector")
});
static TABLE_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td, th").expect("valid selector"));

/// All named inputs in document order as `(name, trimmed value)`
pub fn named_inputs(doc: &Html) -> Vec<(String, String)> {
    doc.select(&NAMED_INPUT)
        .filter_map(|el| {
            let name = el.value().attr("name")?;
            let value = el.value().attr("value").unwrap_or("").trim();
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Value of the input with exactly this name, if present and non-empty
pub fn input_value(doc: &Html, name: &str) -> Option<String> {
    doc.select(&NAMED_INPUT)
        .find(|el| el.value().attr("name") == Some(name))
        .and_then(|el| el.value().attr("value"))
        .map(collapse_whitespace)
        .filter(|v| !v.is_empty())
}

/// First non-empty value among several candidate input names
pub fn first_input_value(doc: &Html, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| input_value(doc, name))
}

/// Find a table cell whose text is one of `labels` and return the next cell's text
///
/// Labels are compared after whitespace collapsing with a trailing colon
/// removed, so `"Serial Number:"` matches `"Serial Number"`.
pub fn labelled_value(doc: &Html, labels: &[&str]) -> Option<String> {
    doc.select(&TABLE_CELL)
        .filter(|cell| {
            let label = cell_label(cell);
            labels.iter().any(|l| l.eq_ignore_ascii_case(&label))
        })
        .find_map(|cell| {
            let value_cell = cell
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|e| matches!(e.value().name(), "td" | "th"))?;
            let value = cell_label(&value_cell);
            (!value.is_empty()).then_some(value)
        })
}

fn cell_label(cell: &ElementRef<'_>) -> String {
    let text = cell.text().collect::<Vec<_>>().join(" ");
    collapse_whitespace(&text).trim_end_matches(':').trim().to_string()
}

/// True when the document contains a password field anywhere
pub fn has_password_field(html: &str) -> bool {
    let doc = Html::parse_document(html);
    doc.select(&PASSWORD_INPUT).next().is_some()
}

/// Collapse runs of whitespace (including non-breaking spaces) into single spaces
pub fn collapse_whitespace(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize a MAC address to lower-case colon-hex
///
/// Accepts bare hex and `:`, `-` or `.` separated forms. Returns `None` for
/// anything that is not exactly six octets.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let hex: String = raw
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.') && !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let octets: Vec<&str> = (0..12).step_by(2).map(|i| &hex[i..i + 2]).collect();
    Some(octets.join(":"))
}

/// Decode HTML entities in a fragment of text (`&lt;Unknown&gt;` -> `<Unknown>`)
pub fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    Html::parse_fragment(raw).root_element().text().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mac() {
        assert_eq!(
            normalize_mac("000C29B294C0").as_deref(),
            Some("00:0c:29:b2:94:c0")
        );
        assert_eq!(
            normalize_mac("00-0C-29-B2-94-C0").as_deref(),
            Some("00:0c:29:b2:94:c0")
        );
        assert_eq!(
            normalize_mac("000c.29b2.94c0").as_deref(),
            Some("00:0c:29:b2:94:c0")
        );
        assert_eq!(normalize_mac("000C29B294"), None);
        assert_eq!(normalize_mac("zz0C29B294C0"), None);
        assert_eq!(normalize_mac(""), None);
    }

    #[test]
    fn test_input_value() {
        let doc = Html::parse_document(
            r#"<form>
                <input type="hidden" name="sysName" value=" GARAGE-SG200 ">
                <input type="hidden" name="sysContact" value="">
            </form>"#,
        );
        assert_eq!(input_value(&doc, "sysName").as_deref(), Some("GARAGE-SG200"));
        assert_eq!(input_value(&doc, "sysContact"), None);
        assert_eq!(input_value(&doc, "sysLocation"), None);
        assert_eq!(
            first_input_value(&doc, &["sysLocation", "sysName"]).as_deref(),
            Some("GARAGE-SG200")
        );
    }

    #[test]
    fn test_labelled_value() {
        let doc = Html::parse_document(
            r#"<table>
                <tr><td>Firmware&nbsp;Version:</td><td> 1.1.2.0 </td></tr>
                <tr><th>Serial Number</th><td>DNI161702F3</td></tr>
                <tr><td>Host Name</td><td></td></tr>
            </table>"#,
        );
        assert_eq!(
            labelled_value(&doc, &["Firmware Version"]).as_deref(),
            Some("1.1.2.0")
        );
        assert_eq!(
            labelled_value(&doc, &["Serial Number"]).as_deref(),
            Some("DNI161702F3")
        );
        assert_eq!(labelled_value(&doc, &["Host Name"]), None);
    }

    #[test]
    fn test_password_field_detection() {
        assert!(has_password_field(
            r#"<form><input type="text" name="u"><input type="password" name="p"></form>"#
        ));
        assert!(!has_password_field(r#"<input type="hidden" name="sysName">"#));
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("&lt;Unknown&gt;"), "<Unknown>");
        assert_eq!(decode_entities("Tom&amp;Jerry"), "Tom&Jerry");
        assert_eq!(decode_entities("plain"), "plain");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(
            collapse_whitespace("  26-port\u{a0}Gigabit \n Smart   Switch "),
            "26-port Gigabit Smart Switch"
        );
    }
}
