//! Minimal tag scanner for pulling attributes out of fetched pages.
//!
//! Not a parser: it finds `<name ...>` openings outside comments and reads
//! their attributes, which is all the scraper and the probes need.

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct TagMatch {
    pub attrs: BTreeMap<String, String>,
}

impl TagMatch {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

pub fn scan_tags(html: &str, tag_name: &str) -> Vec<TagMatch> {
    let name = tag_name.to_ascii_lowercase();
    let mut output = Vec::new();
    let mut index = 0usize;

    while index < html.len() {
        let Some(lt) = html[index..].find('<') else {
            break;
        };
        let at = index + lt;
        if html[at..].starts_with("<!--") {
            index = match index_of_ignore_case(html, "-->", at + 4) {
                Some(end) => end + 3,
                None => html.len(),
            };
            continue;
        }
        if is_tag_at(html, at, &name) {
            let Some(end) = find_tag_end(html, at) else {
                break;
            };
            output.push(TagMatch {
                attrs: parse_attributes(&html[at..=end], &name),
            });
            index = end + 1;
            continue;
        }
        index = at + 1;
    }

    output
}

pub fn extract_title(html: &str) -> Option<String> {
    let start = find_tag_start(html, "title", 0)?;
    let open_end = find_tag_end(html, start)?;
    let close = index_of_ignore_case(html, "</title>", open_end + 1)?;
    let decoded = decode_html(&html[open_end + 1..close]);
    let trimmed = decoded.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn decode_html(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Every URL candidate in a `srcset` list, descriptors dropped.
pub fn srcset_urls(srcset: &str) -> Vec<String> {
    srcset
        .split(',')
        .filter_map(|candidate| candidate.split_whitespace().next())
        .filter(|url| !url.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn find_tag_start(html: &str, tag_name: &str, start: usize) -> Option<usize> {
    let mut index = start;
    while index < html.len() {
        let lt = html[index..].find('<')?;
        let at = index + lt;
        if is_tag_at(html, at, tag_name) {
            return Some(at);
        }
        index = at + 1;
    }
    None
}

fn is_tag_at(html: &str, at: usize, tag_name: &str) -> bool {
    let bytes = html.as_bytes();
    if bytes.get(at).copied() != Some(b'<') {
        return false;
    }
    let mut index = at + 1;
    for expected in tag_name.as_bytes() {
        let Some(actual) = bytes.get(index) else {
            return false;
        };
        if !actual.eq_ignore_ascii_case(expected) {
            return false;
        }
        index += 1;
    }
    matches!(
        bytes.get(index).copied(),
        Some(b' ' | b'\t' | b'\n' | b'\r' | b'>' | b'/')
    )
}

fn find_tag_end(html: &str, start: usize) -> Option<usize> {
    let bytes = html.as_bytes();
    let mut quote = None::<u8>;
    for (index, &byte) in bytes.iter().enumerate().skip(start) {
        match quote {
            Some(active) if byte == active => quote = None,
            Some(_) => {}
            None if byte == b'"' || byte == b'\'' => quote = Some(byte),
            None if byte == b'>' => return Some(index),
            None => {}
        }
    }
    None
}

fn parse_attributes(tag_raw: &str, tag_name: &str) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    let body = tag_raw.get(tag_name.len() + 1..).unwrap_or_default();
    let mut rest = body.strip_suffix('>').unwrap_or(body);

    loop {
        rest = rest.trim_start_matches(|ch: char| ch.is_ascii_whitespace() || ch == '/');
        let Some(first) = rest.chars().next() else {
            break;
        };
        let name_len = rest
            .find(|ch: char| ch.is_ascii_whitespace() || matches!(ch, '=' | '/' | '>'))
            .unwrap_or(rest.len());
        if name_len == 0 {
            // stray `=` or `>`
            rest = &rest[first.len_utf8()..];
            continue;
        }
        let name = rest[..name_len].to_ascii_lowercase();
        rest = rest[name_len..].trim_start();

        let value = match rest.strip_prefix('=') {
            Some(after) => {
                let (value, remaining) = split_attribute_value(after.trim_start());
                rest = remaining;
                value
            }
            None => "",
        };
        attrs.entry(name).or_insert_with(|| value.to_string());
    }

    attrs
}

/// Split `text` into a leading attribute value and whatever follows it.
fn split_attribute_value(text: &str) -> (&str, &str) {
    if let Some(quote) = text.chars().next().filter(|ch| matches!(*ch, '"' | '\'')) {
        let inner = &text[1..];
        return match inner.find(quote) {
            Some(end) => (&inner[..end], &inner[end + 1..]),
            None => (inner, ""),
        };
    }
    let end = text
        .find(|ch: char| ch.is_ascii_whitespace() || ch == '>')
        .unwrap_or(text.len());
    text.split_at(end)
}

fn index_of_ignore_case(text: &str, search: &str, start: usize) -> Option<usize> {
    let text_bytes = text.as_bytes();
    let search_bytes = search.as_bytes();
    if search_bytes.is_empty() {
        return Some(start);
    }
    if start >= text_bytes.len() || search_bytes.len() > text_bytes.len() - start {
        return None;
    }
    text_bytes[start..]
        .windows(search_bytes.len())
        .position(|window| window.eq_ignore_ascii_case(search_bytes))
        .map(|offset| start + offset)
}
