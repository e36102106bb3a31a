//! Mermaid rendering of the object graph.
//!
//! Given a list of named mutator roots, the renderer emits a directed
//! multigraph: nodes show handle, kind and reference count, edges carry
//! field names, objects are grouped into subgraphs per region (each showing
//! its LRC/SBRC/PRC and parent link), and objects that no root reaches are
//! rendered in a distinct class. Rendering never mutates the heap; it walks
//! with its own worklist rather than the protocol visitor.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use itertools::Itertools;

use crate::object::{ObjectPtr, Tag, PROTOTYPE_FIELD};
use crate::region::RegionId;
use crate::runtime::Runtime;

enum EdgeSrc {
    Root(usize, String),
    Node(usize, String),
}

struct Renderer<'rt> {
    rt: &'rt Runtime,
    out: String,
    visited: BTreeMap<ObjectPtr, usize>,
    region_nodes: BTreeMap<RegionId, Vec<usize>>,
    immutable_nodes: Vec<usize>,
    cown_nodes: Vec<usize>,
    next_id: usize,
    unreachable: bool,
}

/// Render the heap as a fenced Mermaid `graph TD`.
pub fn render(rt: &Runtime, roots: &[(&str, ObjectPtr)]) -> String {
    let mut renderer = Renderer {
        rt,
        out: String::new(),
        visited: BTreeMap::new(),
        region_nodes: BTreeMap::new(),
        immutable_nodes: vec![0],
        cown_nodes: Vec::new(),
        next_id: 1,
        unreachable: false,
    };
    let _ = writeln!(renderer.out, "```mermaid");
    let _ = writeln!(renderer.out, "graph TD");
    let _ = writeln!(renderer.out, "  id0[null]");

    for (index, (name, obj)) in roots.iter().enumerate() {
        renderer.walk(EdgeSrc::Root(index, (*name).to_owned()), *obj);
    }

    // Anything not reached from the roots, interned globals aside.
    renderer.unreachable = true;
    let unvisited: Vec<ObjectPtr> = rt
        .objects
        .keys()
        .copied()
        .filter(|p| rt.is_tracked(*p))
        .collect();
    for obj in unvisited {
        if !renderer.visited.contains_key(&obj) {
            let id = renderer.visit_node(obj);
            let mut stack = Vec::new();
            Renderer::push_out_edges(rt, id, obj, &mut stack);
            renderer.drain(stack);
        }
    }

    renderer.finish()
}

impl<'rt> Renderer<'rt> {
    /// Walk from one edge, emitting every edge once and every node once.
    fn walk(&mut self, src: EdgeSrc, target: ObjectPtr) {
        self.drain(vec![(src, target)]);
    }

    fn drain(&mut self, mut stack: Vec<(EdgeSrc, ObjectPtr)>) {
        while let Some((src, target)) = stack.pop() {
            let arrow = match &src {
                EdgeSrc::Root(index, name) => format!("  root{}(({})) --> ", index, name),
                EdgeSrc::Node(id, key) => format!("  id{} -->|{}| ", id, key),
            };
            if let Some(&seen) = self.visited.get(&target) {
                let _ = writeln!(self.out, "{}id{}", arrow, seen);
                continue;
            }
            let id = self.visit_node(target);
            let _ = writeln!(self.out, "{}id{}", arrow, id);
            Self::push_out_edges(self.rt, id, target, &mut stack);
        }
    }

    fn push_out_edges(
        rt: &'rt Runtime,
        id: usize,
        obj: ObjectPtr,
        stack: &mut Vec<(EdgeSrc, ObjectPtr)>,
    ) {
        let o = rt.object(obj);
        let edges = o
            .fields
            .iter()
            .filter_map(|(key, slot)| slot.map(|t| (key.clone(), t)))
            .chain(o.prototype.map(|p| (PROTOTYPE_FIELD.to_owned(), p)))
            .collect::<Vec<_>>();
        // Reversed so the pop order matches field order.
        for (key, target) in edges.into_iter().rev() {
            stack.push((EdgeSrc::Node(id, key), target));
        }
    }

    /// Emit the node definition and record its grouping.
    fn visit_node(&mut self, obj: ObjectPtr) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.visited.insert(obj, id);
        let o = self.rt.object(obj);
        let class = if self.unreachable { ":::unreachable" } else { "" };
        let _ = writeln!(
            self.out,
            "  id{}[\"{}<br/>rc={}\"]{}",
            id,
            self.rt.object_name(obj),
            o.rc(),
            class
        );
        if o.is_cown() {
            self.cown_nodes.push(id);
        } else {
            match o.tag() {
                Tag::Mutable => {
                    let r = o.region_id().expect("mutable object outside any region");
                    self.region_nodes.entry(r).or_default().push(id);
                }
                Tag::Immutable | Tag::Cown => self.immutable_nodes.push(id),
            }
        }
        id
    }

    fn finish(mut self) -> String {
        let local = self.rt.local_region_id();

        // Parent links between regions.
        for (&r, region) in self.rt.regions.iter() {
            if let Some(parent) = region.parent() {
                let _ = writeln!(self.out, "  region_{} -.->|parent| region_{}", r, parent);
            }
        }

        // Region membership, with the counters on the region node.
        for (&r, region) in self.rt.regions.iter() {
            let members = self.region_nodes.get(&r).cloned().unwrap_or_default();
            if r == local {
                let _ = writeln!(self.out, "  subgraph localregion[\"local region\"]");
            } else {
                let _ = writeln!(self.out, "  subgraph group_{}[\" \"]", r);
                let _ = writeln!(
                    self.out,
                    "    region_{}[/\"{}<br/>lrc={}<br/>sbrc={}<br/>prc={}\"/]",
                    r,
                    r,
                    region.lrc(),
                    region.sbrc(),
                    region.prc()
                );
            }
            if !members.is_empty() {
                let _ = writeln!(
                    self.out,
                    "    {}",
                    members.iter().map(|id| format!("id{}", id)).join("\n    ")
                );
            }
            let _ = writeln!(self.out, "  end");
        }

        let _ = writeln!(self.out, "  subgraph immutable[Immutable]");
        for id in &self.immutable_nodes {
            let _ = writeln!(self.out, "    id{}", id);
        }
        let _ = writeln!(self.out, "  end");

        if !self.cown_nodes.is_empty() {
            let _ = writeln!(self.out, "  subgraph cowns[Cowns]");
            for id in &self.cown_nodes {
                let _ = writeln!(self.out, "    id{}", id);
            }
            let _ = writeln!(self.out, "  end");
        }

        let _ = writeln!(
            self.out,
            "  subgraph count[\"Objects: {}\"]",
            self.rt.object_count()
        );
        let _ = writeln!(self.out, "  end");
        let _ = writeln!(self.out, "  classDef unreachable stroke:red,stroke-width:2px");
        let _ = writeln!(self.out, "```");
        self.out
    }
}
