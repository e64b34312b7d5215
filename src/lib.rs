//! Static shape inference for converter operator graphs.
//!
//! # About shape inference
//!
//! A model converter rewrites a source model into an operator graph before
//! later stages such as memory planning, validation and code generation run.
//! Those stages need the concrete shape of every tensor in the graph, but a
//! source model only records the shapes of its external inputs and of
//! constant tensors such as weights. This crate fills the gap: starting from
//! those known shapes it walks the graph's operators once, in stored order,
//! and computes each operator's output shapes from its input shapes and
//! attributes, without executing any numeric computation.
//!
//! Graphs handled here are fixed-shape CNN graphs in channel-first
//! `[batch, channel, height, width]` layout with output-channels-first
//! convolution filters. Operators whose kind has no shape formula, and
//! layouts other than this single combination, are rejected rather than
//! guessed at.
//!
//! Inferred shapes are attached to each operator's output-shape record and
//! collected in a [`ShapeCache`] keyed by tensor name. Shapes are plain
//! values: the pass never hands out a shape that aliases one stored
//! elsewhere, so a tensor consumed by several downstream operators always
//! observes the dimensions its producer computed.
//!
//! # Example
//!
//! ```
//! use nnc_shape_inference::{
//!     AttrValue, DataLayout, FilterLayout, Graph, OpKind, Operator, ShapeInference, ValueInfo,
//! };
//!
//! let mut graph = Graph::new();
//! graph.add_constant(ValueInfo::new("conv1_filter", [16, 3, 3, 3].into()));
//! graph.add_operator(
//!     Operator::new("conv1", OpKind::Conv2D, &["image", "conv1_filter"], &["conv1_out"])
//!         .with_attr("strides", AttrValue::IntList(vec![1, 1]))
//!         .with_attr("padding", AttrValue::IntList(vec![0, 0]))
//!         .with_attr("data_format", AttrValue::DataLayout(DataLayout::Nchw))
//!         .with_attr("filter_format", AttrValue::FilterLayout(FilterLayout::Oihw)),
//! );
//!
//! let inputs = [ValueInfo::new("image", [1, 3, 32, 32].into())];
//! let mut inference = ShapeInference::new(&graph, &inputs);
//! inference.run(&mut graph, None)?;
//!
//! let conv1 = &graph.operators()[0];
//! assert_eq!(conv1.output_shapes()[0].as_slice(), [1, 16, 30, 30].as_slice());
//! # Ok::<(), nnc_shape_inference::RunError>(())
//! ```
//!
//! # Crate overview
//!
//! [`ShapeInference`] is the entry point: it owns the per-run [`ShapeCache`]
//! and drives the forward pass over a [`Graph`]. The per-operator formulas
//! implement the [`InferShapes`] trait and live in [`ops`]; there is an M:1
//! mapping between operator kinds and formulas, since the elementwise and
//! activation kinds all share the passthrough rule.

mod cache;
mod graph;
mod infer_shapes;
pub mod ops;

pub use cache::ShapeCache;
pub use graph::{AttrValue, DataLayout, FilterLayout, Graph, OpKind, Operator, Shape, ValueInfo};
pub use infer_shapes::{
    InferShapes, InferShapesError, Passthrough, RunError, RunOptions, ShapeInference,
};
