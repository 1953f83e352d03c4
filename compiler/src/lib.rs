// stencilc — shape inference for stencil programs
//
// Library root. IR, analyses, and the pass pipeline driving them.

pub mod builder;
pub mod diag;
pub mod extent;
pub mod id;
pub mod index;
pub mod ir;
pub mod loader;
pub mod pass;
pub mod pipeline;
pub mod report;
pub mod shape_infer;
pub mod verify;
