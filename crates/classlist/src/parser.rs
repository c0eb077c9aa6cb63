use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use roxmltree::{Document, Node};

use crate::types::{Block, ClassData, Course, Selection, Timeblock};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("{0}")]
    Vendor(String),
    #[error("Missing required attribute: {element}@{attribute}")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
    #[error("Invalid number in {attribute}: {value:?}")]
    InvalidNumber {
        attribute: &'static str,
        value: String,
    },
    #[error("Course {0} has no selections")]
    NoSelections(String),
}

impl ParseError {
    /// A well-formed response that simply lists nothing to schedule.
    pub fn is_empty_course(&self) -> bool {
        matches!(self, ParseError::NoSelections(_))
    }
}

pub const FALLBACK_REASON: &str = "no_classdata_or_course";

const ONLINE_MODES: [&str; 4] = ["V", "PV", "TV", "ONL"];

static RE_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Z][A-Z0-9-]{1,6})\s+([A-Za-z0-9-]{1,10})\s*$")
        .expect("invalid regex: location")
});

fn find<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.descendants().find(|n| n.has_tag_name(tag))
}

fn children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    tag: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(move |n| n.has_tag_name(tag))
}

fn required<'a>(
    node: Node<'a, '_>,
    element: &'static str,
    attribute: &'static str,
) -> Result<&'a str, ParseError> {
    node.attribute(attribute)
        .ok_or(ParseError::MissingAttribute { element, attribute })
}

fn number<T: std::str::FromStr>(attribute: &'static str, value: &str) -> Result<T, ParseError> {
    value.trim().parse().map_err(|_| ParseError::InvalidNumber {
        attribute,
        value: value.to_string(),
    })
}

/// Collects the vendor error text: the `errors` node text followed by each nested `error`.
pub fn vendor_error(root: Node) -> Option<String> {
    let errors = find(root, "errors")?;
    let mut parts = Vec::new();
    if let Some(text) = errors.text().map(str::trim).filter(|t| !t.is_empty()) {
        parts.push(text.to_string());
    }
    for error in errors.descendants().filter(|n| n.has_tag_name("error")) {
        if let Some(text) = error.text().map(str::trim).filter(|t| !t.is_empty()) {
            parts.push(text.to_string());
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

/// Classifies a fetched body before normalization. `Err` carries the skip reason.
pub fn precheck(body: &str) -> Result<(), String> {
    if body.contains("<course ") && body.contains("<classdata ") {
        return Ok(());
    }
    match Document::parse(body) {
        Ok(doc) => Err(vendor_error(doc.root()).unwrap_or_else(|| "no_course_node".to_string())),
        Err(_) => Err("bad_xml".to_string()),
    }
}

/// Splits `"BSB 147"` into building and room. Anything else yields `(None, None)`.
pub fn split_location(location: &str) -> (Option<String>, Option<String>) {
    if location.is_empty() {
        return (None, None);
    }
    match RE_LOCATION.captures(&location.trim().to_uppercase()) {
        Some(caps) => (Some(caps[1].to_string()), Some(caps[2].to_string())),
        None => (None, None),
    }
}

pub fn is_online(instruction_mode: &str, location: &str) -> bool {
    ONLINE_MODES.contains(&instruction_mode) || location.is_empty()
}

pub fn parse_class_data(xml: &str) -> Result<ClassData, ParseError> {
    let doc = Document::parse(xml)?;
    let root = doc.root();

    let (Some(classdata), Some(course_el)) = (find(root, "classdata"), find(root, "course")) else {
        return Err(ParseError::Vendor(
            vendor_error(root).unwrap_or_else(|| FALLBACK_REASON.to_string()),
        ));
    };

    let term = children(classdata, "term").next();
    let course = Course {
        course_key: required(course_el, "course", "key")?.to_string(),
        code: course_el.attribute("code").unwrap_or_default().to_string(),
        number: course_el.attribute("number").unwrap_or_default().to_string(),
        title: course_el.attribute("title").unwrap_or_default().to_string(),
        term_label: term
            .and_then(|t| t.attribute("v"))
            .unwrap_or_default()
            .to_string(),
        raw_term: term
            .and_then(|t| t.attribute("n"))
            .unwrap_or_default()
            .to_string(),
    };

    let mut selections = Vec::new();
    for uselection in children(course_el, "uselection") {
        let Some(selection_el) = children(uselection, "selection").next() else {
            log::debug!("uselection without selection in {}", course.course_key);
            continue;
        };
        selections.push(parse_selection(uselection, selection_el)?);
    }

    if selections.is_empty() {
        return Err(ParseError::NoSelections(course.course_key));
    }

    Ok(ClassData { course, selections })
}

fn parse_timeblock(id: &str, tb: Node) -> Result<Timeblock, ParseError> {
    Ok(Timeblock {
        id: id.to_string(),
        day: number("timeblock@day", tb.attribute("day").unwrap_or_default())?,
        start_min: number("timeblock@t1", tb.attribute("t1").unwrap_or_default())?,
        end_min: number("timeblock@t2", tb.attribute("t2").unwrap_or_default())?,
    })
}

fn parse_selection(uselection: Node, selection_el: Node) -> Result<Selection, ParseError> {
    // Only timeblocks a block references are parsed; stray malformed ones are ignored.
    let timeblocks: HashMap<&str, Node> = children(uselection, "timeblock")
        .filter_map(|tb| Some((tb.attribute("id")?, tb)))
        .collect();

    let mut blocks = Vec::new();
    for block in children(selection_el, "block") {
        let location = block.attribute("location").unwrap_or_default().to_string();
        let instruction_mode = block
            .attribute("im")
            .unwrap_or_default()
            .trim()
            .to_uppercase();
        let (building, room) = split_location(&location);

        let mut resolved = Vec::new();
        for id in block.attribute("timeblockids").unwrap_or_default().split(',') {
            if let Some((id, tb)) = timeblocks.get_key_value(id) {
                resolved.push(parse_timeblock(id, *tb)?);
            }
        }

        blocks.push(Block {
            block_type: block.attribute("type").unwrap_or_default().to_string(),
            sec_no: block.attribute("secNo").unwrap_or_default().to_string(),
            is_online: is_online(&instruction_mode, &location),
            building,
            room,
            location,
            instruction_mode,
            timeblocks: resolved,
        });
    }

    Ok(Selection {
        selection_key: required(selection_el, "selection", "key")?.to_string(),
        variant_va: selection_el.attribute("va").unwrap_or_default().to_string(),
        blocks,
    })
}
