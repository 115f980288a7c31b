//! Accessors for KDL nodes of the shape `name <value>`.

use ::kdl::{KdlDocument, KdlNode};

/// First positional argument of a node as a string
pub(crate) fn get_first_arg_string(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(str::to_string)
}

/// First positional argument of a node as an integer
pub(crate) fn get_first_arg_int(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

/// First positional argument of a node as a bool
pub(crate) fn get_first_arg_bool(node: &KdlNode) -> Option<bool> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
}

/// Child node by name
pub(crate) fn find_node<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlNode> {
    doc.nodes().iter().find(|n| n.name().value() == name)
}

pub(crate) fn get_string_entry(doc: &KdlDocument, name: &str) -> Option<String> {
    find_node(doc, name).and_then(get_first_arg_string)
}

pub(crate) fn get_int_entry(doc: &KdlDocument, name: &str) -> Option<i128> {
    find_node(doc, name).and_then(get_first_arg_int)
}

pub(crate) fn get_bool_entry(doc: &KdlDocument, name: &str) -> Option<bool> {
    find_node(doc, name).and_then(get_first_arg_bool)
}
