//! Explicit-stack traversal over the object graph.
//!
//! Graphs are arbitrary, so recursion is out; the work stack interleaves
//! edge visits with post entries so that callers can run code after a whole
//! subtree has been processed (the removal path deallocates in post-order).

use crate::object::{ObjectPtr, PROTOTYPE_FIELD};
use crate::runtime::Runtime;

/// A labeled edge in the object graph. A `None` source is a mutator root; a
/// `None` target is an empty slot.
#[derive(Clone, Debug)]
pub(crate) struct Edge {
    pub src: Option<ObjectPtr>,
    pub key: String,
    pub target: Option<ObjectPtr>,
}

enum Item {
    /// Visit the edge `(object, key)`.
    Visit(ObjectPtr, String),
    /// The subtree below this object is done.
    Post(ObjectPtr),
}

/// Walk the graph from `root`. `pre` runs on every edge in preorder and
/// decides whether to descend into the target; `post` runs for each
/// descended object once its whole subtree has been handled. Both callbacks
/// receive the runtime rather than capturing it, so they may mutate freely.
pub(crate) fn visit_edge<Pre, Post>(rt: &mut Runtime, root: Edge, pre: &mut Pre, post: &mut Post)
where
    Pre: FnMut(&mut Runtime, &Edge) -> bool,
    Post: FnMut(&mut Runtime, ObjectPtr),
{
    if !pre(rt, &root) {
        return;
    }
    let Some(start) = root.target else {
        return;
    };

    let mut stack: Vec<Item> = Vec::new();
    push_object(rt, start, &mut stack);

    while let Some(item) = stack.pop() {
        match item {
            Item::Post(obj) => post(rt, obj),
            Item::Visit(obj, key) => {
                let target = rt.get(obj, &key);
                let edge = Edge {
                    src: Some(obj),
                    key,
                    target,
                };
                if pre(rt, &edge) {
                    if let Some(next) = edge.target {
                        push_object(rt, next, &mut stack);
                    }
                }
            }
        }
    }
}

/// Walk from a single object with no post step.
pub(crate) fn visit_from<Pre>(rt: &mut Runtime, start: ObjectPtr, pre: &mut Pre)
where
    Pre: FnMut(&mut Runtime, &Edge) -> bool,
{
    visit_edge(
        rt,
        Edge {
            src: None,
            key: String::new(),
            target: Some(start),
        },
        pre,
        &mut |_: &mut Runtime, _| {},
    );
}

fn push_object(rt: &Runtime, obj: ObjectPtr, stack: &mut Vec<Item>) {
    stack.push(Item::Post(obj));
    let o = rt.object(obj);
    for key in o.fields.keys() {
        stack.push(Item::Visit(obj, key.clone()));
    }
    if o.prototype.is_some() {
        stack.push(Item::Visit(obj, PROTOTYPE_FIELD.to_owned()));
    }
}
