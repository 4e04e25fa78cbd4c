//! Inline footnote rewriting.
//!
//! The site embeds footnotes as paired elements: a marker with class
//! `modern-footnotes-footnote` holding the reference link, and a content
//! element with class `modern-footnotes-footnote__note`, both carrying the
//! same numeric `data-mfn` id. For a portable book the pair becomes a
//! cross-reference: the marker's trailing link gets `id="noteanchor-{n}"` and
//! points at `#note-{n}`; the content element is retagged as an
//! `<aside id="note-{n}">` landmark with a back-reference link prepended,
//! and all asides collect under a "Footnotes" heading after the last
//! paragraph.
//!
//! If any marker lacks its paired content element (or holds no link), the
//! rewrite aborts for the entire chapter and the input is returned
//! unchanged. That discards any pairs already matched in the same pass,
//! matching upstream behavior; the abort is logged.

use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;
use tracing::{debug, warn};

const MARKER_CLASS: &str = "modern-footnotes-footnote";
const NOTE_CLASS: &str = "modern-footnotes-footnote__note";

fn re_open_tag() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r#"(?s)<([a-zA-Z][a-zA-Z0-9]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#)
            .expect("compile re_open_tag")
    })
}

fn re_ws_between_tags() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r">[ \t]*\n[ \t\n]*<").expect("compile re_ws_between_tags"))
}

fn re_class_attr() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r#"(?:^|\s)class\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("compile re_class_attr")
    })
}

fn re_mfn_attr() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r#"(?:^|\s)data-mfn\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("compile re_mfn_attr")
    })
}

/// Rewrite footnote markup in one chapter. Returns the input unchanged when
/// the chapter has no footnote markers or when any marker is unpaired.
pub fn rewrite_footnotes(html: &str) -> String {
    let markers = collect_markers(html);
    if markers.is_empty() {
        return html.to_string();
    }

    // Validate every pair before touching anything: one unpaired marker
    // abandons the whole chapter's rewrite.
    for marker in &markers {
        if find_last_anchor(&html[marker.inner.clone()]).is_none() {
            warn!(
                "footnote {} has no reference link; leaving chapter footnotes untouched",
                marker.mfn
            );
            return html.to_string();
        }
        if find_note_element(html, &marker.mfn).is_none() {
            warn!(
                "footnote {} has no content element; leaving chapter footnotes untouched",
                marker.mfn
            );
            return html.to_string();
        }
    }

    let mut out = html.to_string();
    let mut asides = Vec::with_capacity(markers.len());

    // Offsets shift with every edit, so each step re-locates its element in
    // the current text rather than reusing the ranges captured above.
    for marker in &markers {
        let Some(note) = find_note_element(&out, &marker.mfn) else {
            return html.to_string();
        };
        let note_inner = out[note.inner.clone()].to_string();
        out.replace_range(note.outer.clone(), "");
        asides.push(format!(
            "<aside id=\"note-{n}\" epub:type=\"footnote\"><a href=\"#noteanchor-{n}\">{n}.</a>{body}</aside>",
            n = marker.mfn,
            body = note_inner,
        ));

        let Some(current) = find_marker_element(&out, &marker.mfn) else {
            return html.to_string();
        };
        let Some(anchor) = find_last_anchor(&out[current.inner.clone()]) else {
            return html.to_string();
        };
        let anchor_abs = current.inner.start + anchor.start..current.inner.start + anchor.end;
        let rewritten = retag_anchor(&out[anchor_abs.clone()], &marker.mfn);
        out.replace_range(anchor_abs, &rewritten);
    }

    let section = format!(
        "<h2 id=\"footnotes\">Footnotes</h2>\n{}",
        asides.join("\n")
    );
    match out.rfind("</p>") {
        Some(pos) => {
            let insert_at = pos + "</p>".len();
            out.insert_str(insert_at, &format!("\n{section}"));
        }
        None => {
            out.push('\n');
            out.push_str(&section);
        }
    }

    debug!("rewrote {} footnote(s)", asides.len());
    coalesce_whitespace(&out)
}

struct ElementSpan {
    mfn: String,
    /// The whole element including its tags.
    outer: Range<usize>,
    /// Just the content between the open and close tags.
    inner: Range<usize>,
}

fn collect_markers(html: &str) -> Vec<ElementSpan> {
    let mut markers = Vec::new();
    for caps in re_open_tag().captures_iter(html) {
        let attrs = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if !has_class(attrs, MARKER_CLASS) || has_class(attrs, NOTE_CLASS) {
            continue;
        }
        let Some(mfn) = attr_value(re_mfn_attr(), attrs) else {
            continue;
        };
        let tag = caps.get(1).map(|m| m.as_str()).unwrap_or("span");
        let open = caps.get(0).expect("whole match");
        if let Some((inner_end, outer_end)) = balanced_end(html, open.end(), tag) {
            markers.push(ElementSpan {
                mfn,
                outer: open.start()..outer_end,
                inner: open.end()..inner_end,
            });
        }
    }
    markers
}

fn find_marker_element(html: &str, mfn: &str) -> Option<ElementSpan> {
    collect_markers(html).into_iter().find(|m| m.mfn == mfn)
}

fn find_note_element(html: &str, mfn: &str) -> Option<ElementSpan> {
    for caps in re_open_tag().captures_iter(html) {
        let attrs = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if !has_class(attrs, NOTE_CLASS) {
            continue;
        }
        if attr_value(re_mfn_attr(), attrs).as_deref() != Some(mfn) {
            continue;
        }
        let tag = caps.get(1).map(|m| m.as_str()).unwrap_or("span");
        let open = caps.get(0).expect("whole match");
        let (inner_end, outer_end) = balanced_end(html, open.end(), tag)?;
        return Some(ElementSpan {
            mfn: mfn.to_string(),
            outer: open.start()..outer_end,
            inner: open.end()..inner_end,
        });
    }
    None
}

/// Byte range of the last `<a ...>` open tag within a marker's content.
fn find_last_anchor(inner: &str) -> Option<Range<usize>> {
    let mut last = None;
    for caps in re_open_tag().captures_iter(inner) {
        if caps
            .get(1)
            .is_some_and(|m| m.as_str().eq_ignore_ascii_case("a"))
        {
            let whole = caps.get(0).expect("whole match");
            last = Some(whole.start()..whole.end());
        }
    }
    last
}

/// Rewrite an `<a ...>` open tag into the cross-reference anchor, dropping
/// any pre-existing id/href/epub:type.
fn retag_anchor(open_tag: &str, mfn: &str) -> String {
    static RE_DROP: OnceLock<Regex> = OnceLock::new();
    let re_drop = RE_DROP.get_or_init(|| {
        Regex::new(r#"\s+(?:id|href|epub:type)\s*=\s*(?:"[^"]*"|'[^']*')"#)
            .expect("compile re_drop")
    });

    let attrs = open_tag
        .trim_start_matches("<a")
        .trim_start_matches("<A")
        .trim_end_matches('>');
    let kept = re_drop.replace_all(attrs, "");
    format!(
        "<a{kept} id=\"noteanchor-{mfn}\" href=\"#note-{mfn}\" epub:type=\"noteref\">",
        kept = kept.trim_end(),
    )
}

/// Scan forward from just after an open tag to the matching close tag,
/// tracking nesting. Returns (inner end, outer end).
fn balanced_end(html: &str, from: usize, tag: &str) -> Option<(usize, usize)> {
    let open_pat = format!("<{tag}");
    let close_pat = format!("</{tag}>");
    let mut depth = 1usize;
    let mut pos = from;

    while pos < html.len() {
        let next_open = html[pos..].find(&open_pat).map(|i| pos + i);
        let next_close = html[pos..].find(&close_pat).map(|i| pos + i);

        match (next_open, next_close) {
            (Some(open), Some(close)) if open < close && is_tag_start(html, open, tag) => {
                depth += 1;
                pos = open + open_pat.len();
            }
            (_, Some(close)) => {
                depth -= 1;
                if depth == 0 {
                    return Some((close, close + close_pat.len()));
                }
                pos = close + close_pat.len();
            }
            (Some(open), None) if is_tag_start(html, open, tag) => {
                // Unbalanced markup.
                return None;
            }
            _ => return None,
        }
    }
    None
}

/// Whether the `<tag` found at `pos` is a real tag start and not a prefix of
/// a longer name (e.g. `<span` when scanning for `<sp`).
fn is_tag_start(html: &str, pos: usize, tag: &str) -> bool {
    html[pos + 1 + tag.len()..]
        .chars()
        .next()
        .is_some_and(|c| c.is_whitespace() || c == '>' || c == '/')
}

fn has_class(attrs: &str, class: &str) -> bool {
    attr_value(re_class_attr(), attrs)
        .map(|value| value.split_whitespace().any(|c| c == class))
        .unwrap_or(false)
}

fn attr_value(re: &Regex, attrs: &str) -> Option<String> {
    let caps = re.captures(attrs)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// Collapse whitespace-only runs between tags to a single newline.
fn coalesce_whitespace(html: &str) -> String {
    re_ws_between_tags().replace_all(html, ">\n<").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(n: u32, text: &str) -> String {
        format!(
            "<span class=\"modern-footnotes-footnote\" data-mfn=\"{n}\"><a href=\"#\">{text}</a></span>"
        )
    }

    fn note(n: u32, body: &str) -> String {
        format!(
            "<span class=\"modern-footnotes-footnote__note\" data-mfn=\"{n}\">{body}</span>"
        )
    }

    #[test]
    fn zero_markers_leave_input_untouched() {
        let html = "<p>Nothing to see here.</p>\n<p>Truly nothing.</p>";
        assert_eq!(rewrite_footnotes(html), html);
    }

    #[test]
    fn single_pair_becomes_anchor_and_aside() {
        let html = format!(
            "<p>Some text{}{}</p><p>Last paragraph.</p>",
            marker(1, "1"),
            note(1, "The actual note."),
        );
        let out = rewrite_footnotes(&html);

        assert!(out.contains("id=\"noteanchor-1\""));
        assert!(out.contains("href=\"#note-1\""));
        assert!(out.contains("epub:type=\"noteref\""));
        assert!(out.contains("<aside id=\"note-1\" epub:type=\"footnote\">"));
        assert!(out.contains("<a href=\"#noteanchor-1\">1.</a>The actual note."));
        assert_eq!(out.matches("<h2 id=\"footnotes\">Footnotes</h2>").count(), 1);

        // The aside moved below the last paragraph.
        let aside_pos = out.find("<aside").expect("aside");
        let last_p = out.find("Last paragraph.").expect("last p");
        assert!(aside_pos > last_p);
    }

    #[test]
    fn n_pairs_produce_n_asides_and_one_header() {
        let html = format!(
            "<p>a{m1}{n1}</p><p>b{m2}{n2}</p><p>c{m3}{n3}</p>",
            m1 = marker(1, "1"),
            n1 = note(1, "first"),
            m2 = marker(2, "2"),
            n2 = note(2, "second"),
            m3 = marker(3, "3"),
            n3 = note(3, "third"),
        );
        let out = rewrite_footnotes(&html);

        assert_eq!(out.matches("<aside id=\"note-").count(), 3);
        assert_eq!(out.matches("id=\"noteanchor-").count(), 3);
        assert_eq!(out.matches("<h2 id=\"footnotes\">").count(), 1);
        // Asides keep marker order.
        let p1 = out.find("note-1\" epub").expect("1");
        let p2 = out.find("note-2\" epub").expect("2");
        let p3 = out.find("note-3\" epub").expect("3");
        assert!(p1 < p2 && p2 < p3);
    }

    #[test]
    fn unmatched_marker_aborts_whole_chapter() {
        // Pins the literal upstream behavior: a single unpaired marker
        // discards the rewrite for every footnote in the chapter.
        let html = format!(
            "<p>a{m1}{n1}</p><p>b{m2}</p>",
            m1 = marker(1, "1"),
            n1 = note(1, "first"),
            m2 = marker(2, "2"),
        );
        assert_eq!(rewrite_footnotes(&html), html);
    }

    #[test]
    fn marker_without_link_aborts_whole_chapter() {
        let html = format!(
            "<p><span class=\"modern-footnotes-footnote\" data-mfn=\"1\">1</span>{}</p>",
            note(1, "orphaned"),
        );
        assert_eq!(rewrite_footnotes(&html), html);
    }

    #[test]
    fn existing_anchor_attributes_are_replaced() {
        let html = format!(
            "<p>x<span class=\"modern-footnotes-footnote\" data-mfn=\"7\"><a class=\"mfn\" href=\"#old\" id=\"stale\">7</a></span>{}</p>",
            note(7, "keep class"),
        );
        let out = rewrite_footnotes(&html);
        assert!(out.contains("<a class=\"mfn\" id=\"noteanchor-7\" href=\"#note-7\" epub:type=\"noteref\">"));
        assert!(!out.contains("#old"));
        assert!(!out.contains("\"stale\""));
    }

    #[test]
    fn intertag_whitespace_is_coalesced() {
        let html = format!(
            "<p>a{}   \n\n   {}</p>",
            marker(1, "1"),
            note(1, "n"),
        );
        let out = rewrite_footnotes(&html);
        assert!(!out.contains("\n\n"));
    }
}
