//! RegionRT is a didactic model of region-based memory management layered on
//! reference counting, in the spirit of the Verona isolation model: a heap
//! of mutable, dynamically typed objects is partitioned into disjoint
//! regions organized as a forest, counters prove when a region has become
//! unreachable, subgraphs can be frozen into a shared immutable heap, and
//! unreachable regions are collected deterministically. Cycles inside a
//! region are reclaimed wholesale, which plain reference counting cannot do.
//!
//! Logically, this crate includes these major parts:
//! * [The runtime instance](runtime/struct.Runtime.html): the object table,
//!   the region forest, the well-known heaps (local, immutable, cown) and
//!   the interned singletons, all behind one handle so independent heaps can
//!   coexist.
//! * [Objects](object/struct.DynObject.html): reference-counted dynamic
//!   objects with a tagged region pointer, a prototype link and an ordered
//!   field map.
//! * [Regions](region/struct.Region.html): per-region LRC/PRC/SBRC
//!   counters maintained edge-triggered, region nesting with forest
//!   enforcement, and the collection queue.
//! * The reference protocol: `add`/`remove`/`move` reference operations
//!   that drive every counter update, absorb local closures into regions
//!   and migrate them between regions.
//! * Interfaces: [the memory manager API](memory_manager/index.html) used
//!   by the mutator, [heap verification](sanity/index.html) for tests, and
//!   [Mermaid rendering](ui/mermaid/index.html) of the object graph.
//!
//! The mutator is single-threaded; the one concession to concurrency is
//! that immutable objects count references with relaxed atomics so a frozen
//! closure could legally be shared across threads.

#[macro_use]
extern crate log;

pub mod util;
pub mod memory_manager;
pub mod object;
mod reference;
pub mod region;
pub mod runtime;
pub mod sanity;
pub mod ui;
mod visit;

pub use crate::object::{ObjectPtr, Tag};
pub use crate::region::{RegionId, RegionState};
pub use crate::runtime::Runtime;
