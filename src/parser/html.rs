use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::normalize::collapse_whitespace;

static OPEN_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([a-zA-Z][a-zA-Z0-9-]*)((?:\s[^<>]*)?)(/?)>").unwrap());
static ANY_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9-]*)(?:\s[^<>]*)?/?>").unwrap());
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
});
static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>").unwrap());
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b.*?</style\s*>").unwrap());
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static STRIP_TAGS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").unwrap());

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

#[derive(Debug, Clone, Copy)]
pub enum AttrMatch {
    Equals(&'static str),
    Contains(&'static str),
}

/// Tag name and/or a single attribute condition. Enough for the stable
/// `data-testid` hooks and the few class/href fallbacks the pages need.
#[derive(Debug, Clone, Copy)]
pub struct Selector {
    tag: Option<&'static str>,
    attr: Option<(&'static str, AttrMatch)>,
}

impl Selector {
    pub const fn tag(name: &'static str) -> Self {
        Self {
            tag: Some(name),
            attr: None,
        }
    }

    pub const fn attr_eq(name: &'static str, value: &'static str) -> Self {
        Self {
            tag: None,
            attr: Some((name, AttrMatch::Equals(value))),
        }
    }

    pub const fn attr_contains(name: &'static str, needle: &'static str) -> Self {
        Self {
            tag: None,
            attr: Some((name, AttrMatch::Contains(needle))),
        }
    }

    pub const fn testid(value: &'static str) -> Self {
        Self::attr_eq("data-testid", value)
    }

    pub const fn on(mut self, tag: &'static str) -> Self {
        self.tag = Some(tag);
        self
    }

    fn matches(&self, name: &str, attrs: &[(String, String)]) -> bool {
        if let Some(tag) = self.tag {
            if !tag.eq_ignore_ascii_case(name) {
                return false;
            }
        }
        match self.attr {
            None => true,
            Some((attr_name, cond)) => attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(attr_name))
                .is_some_and(|(_, v)| match cond {
                    AttrMatch::Equals(want) => v == want,
                    AttrMatch::Contains(needle) => v.contains(needle),
                }),
        }
    }
}

/// An element located in a document slice. Offsets are relative to the
/// slice the search ran over.
#[derive(Debug, Clone)]
pub struct Element<'a> {
    attrs: Vec<(String, String)>,
    pub inner: &'a str,
    pub start: usize,
    pub end: usize,
}

impl<'a> Element<'a> {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        html_to_text(self.inner)
    }

    pub fn find(&self, sel: &Selector) -> Option<Element<'a>> {
        find_first(self.inner, sel)
    }
}

/// Every element matching `sel`, in document order, descendants included.
pub fn find_all<'a>(html: &'a str, sel: &Selector) -> Vec<Element<'a>> {
    let mut out = Vec::new();
    for caps in OPEN_TAG_RE.captures_iter(html) {
        if let Some(el) = element_at(html, &caps, sel) {
            out.push(el);
        }
    }
    out
}

pub fn find_first<'a>(html: &'a str, sel: &Selector) -> Option<Element<'a>> {
    OPEN_TAG_RE
        .captures_iter(html)
        .find_map(|caps| element_at(html, &caps, sel))
}

fn element_at<'a>(html: &'a str, caps: &Captures<'_>, sel: &Selector) -> Option<Element<'a>> {
    let name = caps[1].to_ascii_lowercase();
    let raw_attrs = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    let attrs = parse_attrs(raw_attrs);
    if !sel.matches(&name, &attrs) {
        return None;
    }

    let whole = caps.get(0)?;
    let content_start = whole.end();
    let self_closing =
        closes_itself(raw_attrs, &caps[3]) || VOID_TAGS.contains(&name.as_str());
    let (inner_end, end) = if self_closing {
        (content_start, content_start)
    } else {
        matching_close(html, content_start, &name)
    };

    Some(Element {
        attrs,
        inner: &html[content_start..inner_end],
        start: whole.start(),
        end,
    })
}

/// `<br/>`, `<img src="x"/>` and `<a />` close themselves. A slash that ends an
/// unquoted value (`<a href=/title/tt1/>`) does not.
fn closes_itself(raw_attrs: &str, slash: &str) -> bool {
    let body = format!("{}{}", raw_attrs, slash);
    let Some(before) = body.strip_suffix('/') else {
        return false;
    };
    before.is_empty() || before.ends_with(|c: char| c.is_whitespace() || c == '"' || c == '\'')
}

/// Find the close tag balancing an open `name` tag whose content starts at
/// `from`. Unclosed elements run to the end of the document.
fn matching_close(html: &str, from: usize, name: &str) -> (usize, usize) {
    let mut depth = 1usize;
    for caps in ANY_TAG_RE.captures_iter(&html[from..]) {
        if !caps[2].eq_ignore_ascii_case(name) {
            continue;
        }
        let Some(m) = caps.get(0) else { continue };
        if !caps[1].is_empty() {
            depth -= 1;
            if depth == 0 {
                return (from + m.start(), from + m.end());
            }
        } else {
            let tag = m.as_str();
            if !closes_itself(&tag[1 + caps[2].len()..tag.len() - 1], "") {
                depth += 1;
            }
        }
    }
    (html.len(), html.len())
}

fn parse_attrs(raw: &str) -> Vec<(String, String)> {
    ATTR_RE
        .captures_iter(raw)
        .map(|c| {
            let value = c
                .get(2)
                .or_else(|| c.get(3))
                .or_else(|| c.get(4))
                .map(|m| decode_entities(m.as_str()))
                .unwrap_or_default();
            (c[1].to_ascii_lowercase(), value)
        })
        .collect()
}

/// Strip markup, decode entities, collapse whitespace.
pub fn html_to_text(fragment: &str) -> String {
    let no_scripts = SCRIPT_RE.replace_all(fragment, " ");
    let no_styles = STYLE_RE.replace_all(&no_scripts, " ");
    let no_comments = COMMENT_RE.replace_all(&no_styles, " ");
    let stripped = STRIP_TAGS_RE.replace_all(&no_comments, " ");
    collapse_whitespace(&decode_entities(&stripped))
}

/// Decode named and numeric character references in one pass.
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    ENTITY_RE
        .replace_all(s, |c: &Captures<'_>| {
            let body = &c[1];
            let decoded = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match body {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    "ndash" => Some('–'),
                    "mdash" => Some('—'),
                    "middot" => Some('·'),
                    _ => None,
                }
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| c[0].to_string())
        })
        .into_owned()
}

/// `content` of the first `<meta>` whose `property` or `name` is `key`.
pub fn meta_content(html: &str, key: &'static str) -> Option<String> {
    find_all(html, &Selector::tag("meta"))
        .into_iter()
        .find(|m| m.attr("property") == Some(key) || m.attr("name") == Some(key))
        .and_then(|m| m.attr("content").map(collapse_whitespace))
        .filter(|s| !s.is_empty())
}

// ── Tests ──
