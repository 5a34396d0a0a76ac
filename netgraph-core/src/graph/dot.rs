use std::fmt::{self, Write};

use super::net_graph::NetGraph;
use super::node::{NetGraphNode, OutputSlot};

/// Types that can describe themselves as a Graphviz DOT graph.
pub trait ToDot {
    fn to_dot(&self) -> String;
}

fn escape_label(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '{' | '}' | '|' | '<' | '>' | '"' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Quoted DOT identifier.
fn quote_id(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn write_slot(out: &mut impl Write, index: usize, slot: &OutputSlot) -> fmt::Result {
    write!(out, "<o{}> {}", index, escape_label(&slot.description))?;
    if let Some(buffer) = &slot.buffer {
        write!(out, " {}", buffer.borrow().data())?;
    }
    Ok(())
}

fn write_node(out: &mut impl Write, node: &NetGraphNode) -> fmt::Result {
    write!(out, "{} [shape=record,", quote_id(&node.unique_name))?;
    if node.is_input {
        out.write_str("color=red,")?;
    }
    if node.is_output {
        out.write_str("color=blue,")?;
    }
    write!(
        out,
        " label=\"{{ <i> {}: {}",
        escape_label(&node.unique_name),
        escape_label(&node.layer.description())
    )?;
    match node.output_buffers.as_slice() {
        [] => {}
        [slot] => {
            out.write_str("| ")?;
            write_slot(out, 0, slot)?;
        }
        slots => {
            out.write_str("| {")?;
            for (index, slot) in slots.iter().enumerate() {
                if index > 0 {
                    out.write_str("|")?;
                }
                write_slot(out, index, slot)?;
            }
            out.write_str("}")?;
        }
    }
    out.write_str("}\"];\n")
}

impl NetGraph {
    /// Writes the DOT statements describing nodes and forward connections.
    /// Connections without gradient flow are dotted.
    ///
    /// # Arguments
    /// * `out`: Receives the statements, without the enclosing `digraph`.
    pub fn print_graph(&self, out: &mut impl Write) -> fmt::Result {
        if self.nodes.is_empty() {
            return Ok(());
        }
        out.write_str("graph [ranksep=.75, esep=1];\n")?;
        for node in &self.nodes {
            write_node(out, node)?;
        }
        for node in &self.nodes {
            for connection in &node.input_connections {
                let source = &self.nodes[connection.node.0];
                write!(
                    out,
                    "{}:o{} -> {}:i [penwidth=2",
                    quote_id(&source.unique_name),
                    connection.buffer,
                    quote_id(&node.unique_name)
                )?;
                if !connection.backprop {
                    out.write_str(",style=dotted")?;
                }
                out.write_str("];\n")?;
            }
        }
        Ok(())
    }
}

impl ToDot for NetGraph {
    fn to_dot(&self) -> String {
        let mut dot = String::from("digraph netgraph {\n");
        // Writing into a String cannot fail.
        let _ = self.print_graph(&mut dot);
        dot.push_str("}\n");
        dot
    }
}
