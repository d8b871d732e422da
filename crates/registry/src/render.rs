//! HTML for the public filter controls.

use serde::Serialize;

/// Props for a dropdown filter. Pure data; rendering keeps no state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DropdownFilter {
    pub id: String,
    pub label: Option<String>,
    pub selections: Vec<String>,
    pub extra_class: Option<String>,
    pub selected: Option<String>,
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// `<select>` with a leading blank option, then one option per selection.
pub fn render_dropdown(f: &DropdownFilter) -> String {
    let id = escape_html(&f.id);
    let mut class = String::from("ckan-dropdown-filter");
    if let Some(extra) = f.extra_class.as_deref() {
        for c in extra.split_whitespace() { class.push(' '); class.push_str(&escape_html(c)); }
    }
    let mut html = format!("<div class=\"{}\">", class);
    if let Some(label) = f.label.as_deref().filter(|l| !l.is_empty()) {
        html.push_str(&format!("<label for=\"{}\">{}</label>", id, escape_html(label)));
    }
    html.push_str(&format!("<select id=\"{}\" name=\"{}\">", id, id));
    html.push_str("<option value=\"\"></option>");
    for s in f.selections.iter() {
        let v = escape_html(s);
        let sel = if f.selected.as_deref() == Some(s.as_str()) { " selected" } else { "" };
        html.push_str(&format!("<option value=\"{}\"{}>{}</option>", v, sel, v));
    }
    html.push_str("</select></div>");
    html
}
