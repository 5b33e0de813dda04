//! Dependency graph rendering — Graphviz DOT and Mermaid.

use super::resolver::DependencyGraph;
use super::types::Template;
use std::fmt::Write;

fn node_type<'a>(template: &'a Template, id: &str) -> &'a str {
    template
        .resources
        .get(id)
        .map(|r| r.resource_type.as_str())
        .unwrap_or("")
}

fn sorted_nodes(graph: &DependencyGraph) -> Vec<&String> {
    let mut nodes: Vec<&String> = graph.nodes().iter().collect();
    nodes.sort();
    nodes
}

/// Render as Graphviz DOT. Edges point from dependency to dependent.
pub fn render_dot(graph: &DependencyGraph, template: &Template) -> String {
    let mut out = String::from("digraph stack {\n    rankdir=LR;\n    node [shape=box];\n");
    for id in sorted_nodes(graph) {
        let _ = writeln!(
            out,
            "    \"{}\" [label=\"{}\\n{}\"];",
            id,
            id,
            node_type(template, id)
        );
    }
    for (dependency, dependent) in graph.edges() {
        let _ = writeln!(out, "    \"{}\" -> \"{}\";", dependency, dependent);
    }
    out.push_str("}\n");
    out
}

/// Render as a Mermaid flowchart.
pub fn render_mermaid(graph: &DependencyGraph, template: &Template) -> String {
    let mut out = String::from("graph LR\n");
    for id in sorted_nodes(graph) {
        let _ = writeln!(
            out,
            "    {}[\"{}<br/>{}\"]",
            id,
            id,
            node_type(template, id)
        );
    }
    for (dependency, dependent) in graph.edges() {
        let _ = writeln!(out, "    {} --> {}", dependency, dependent);
    }
    out
}
