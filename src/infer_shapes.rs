//! Shape inference trait, error types and the forward-pass driver.

use std::error::Error;
use std::fmt;
use std::iter::zip;

use crate::cache::ShapeCache;
use crate::graph::{Graph, OpKind, Operator, Shape, ValueInfo};
use crate::ops::{Concat, Conv, FullyConnected, Pool, Slice};

/// Reasons why computing an operator's output shapes may fail.
///
/// Every variant reflects a defect in the input graph rather than a transient
/// condition, so none of them is recoverable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InferShapesError {
    /// An operator references a tensor name with no recorded shape. The
    /// graph is out of order or refers to a value that is never produced.
    UnknownTensor(String),

    /// The operator has fewer inputs than its shape formula requires.
    MissingInput,

    /// An input's rank does not match that expected by the operator, or an
    /// axis attribute is out of range for the input's rank.
    IncorrectRank,

    /// A required attribute is absent.
    MissingAttribute(&'static str),

    /// An attribute is present but malformed.
    InvalidAttribute(&'static str),

    /// The data or filter layout is not the single combination supported by
    /// the formula.
    UnsupportedLayout(&'static str),

    /// The input shapes are incompatible with each other or with the
    /// operator's attributes.
    IncompatibleShapes(&'static str),

    /// A slice axis extent does not divide evenly into the declared number
    /// of outputs.
    NonDivisibleSlice { size: usize, outputs: usize },
}

impl fmt::Display for InferShapesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferShapesError::UnknownTensor(name) => {
                write!(f, "tensor \"{}\" does not exist", name)
            }
            InferShapesError::MissingInput => write!(f, "required input is missing"),
            InferShapesError::IncorrectRank => write!(f, "input rank or axis is incorrect"),
            InferShapesError::MissingAttribute(name) => {
                write!(f, "required attribute \"{}\" is missing", name)
            }
            InferShapesError::InvalidAttribute(name) => {
                write!(f, "attribute \"{}\" has an invalid value", name)
            }
            InferShapesError::UnsupportedLayout(details) => {
                write!(f, "unsupported layout: {}", details)
            }
            InferShapesError::IncompatibleShapes(details) => {
                write!(f, "incompatible input shapes: {}", details)
            }
            InferShapesError::NonDivisibleSlice { size, outputs } => {
                write!(
                    f,
                    "slice axis extent {} does not divide into {} outputs",
                    size, outputs
                )
            }
        }
    }
}

impl Error for InferShapesError {}

/// Infer the shapes of an operator's outputs given its inputs.
///
/// Implementations are pure: they read the resolved input shapes and the
/// attributes carried in the implementing struct, and return one new,
/// independently-owned shape per output. They never modify an input shape.
pub trait InferShapes {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError>;
}

/// Shape inference for operators whose output matches their first input.
///
/// This covers the elementwise family (Eltwise, AddN), activations, folded
/// batch-norm and softmax. Operators of these kinds may take further inputs
/// (eg. the addends of AddN beyond the first) which do not affect the output
/// shape.
pub struct Passthrough;

impl InferShapes for Passthrough {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let Some(first) = inputs.first() else {
            return Err(InferShapesError::MissingInput);
        };
        Ok([first.clone()].into())
    }
}

/// Resolve an index given as a value in `[-len, len-1]` to a positive index
/// in `[0, len)`, or return None if the index is out of bounds.
fn resolve_index(len: usize, index: i32) -> Option<usize> {
    let len = len.min(i32::MAX as usize) as i32;
    if index < -len || index >= len {
        return None;
    }

    if index >= 0 {
        Some(index as usize)
    } else {
        Some((len + index) as usize)
    }
}

/// Resolve an axis given as a value in `[-ndim, ndim-1]` to the zero-based
/// dimension of a tensor with `ndim` dimensions.
///
/// Negative axis values count backwards from the last dimension.
pub(crate) fn resolve_axis(ndim: usize, axis: i32) -> Result<usize, InferShapesError> {
    resolve_index(ndim, axis).ok_or(InferShapesError::IncorrectRank)
}

/// Reasons why an inference run over a whole graph failed.
///
/// Each variant identifies the failing operator. Inference stops at the first
/// failure; shapes attached to earlier operators remain valid and can be used
/// to diagnose the failure point.
#[derive(Debug, Eq, PartialEq)]
pub enum RunError {
    /// The operator's kind has no shape formula. The graph contains an
    /// operator this pass does not support.
    UnsupportedOperator { name: String, kind: OpKind },

    /// Computing the operator's output shapes failed.
    OperatorError {
        name: String,
        kind: OpKind,
        error: InferShapesError,
    },

    /// The formula produced a different number of shapes than the operator
    /// declares outputs.
    OutputCountMismatch {
        name: String,
        kind: OpKind,
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::UnsupportedOperator { name, kind } => {
                write!(
                    f,
                    "cannot infer shapes for operator \"{}\" of unsupported kind {}",
                    name, kind
                )
            }
            RunError::OperatorError { name, kind, error } => {
                write!(f, "operator \"{}\" ({}) failed: {}", name, kind, error)
            }
            RunError::OutputCountMismatch {
                name,
                kind,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "operator \"{}\" ({}) produced {} shapes but declares {} outputs",
                    name, kind, actual, expected
                )
            }
        }
    }
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RunError::OperatorError { error, .. } => Some(error),
            _ => None,
        }
    }
}

fn op_error(op: &Operator, error: InferShapesError) -> RunError {
    RunError::OperatorError {
        name: op.name().to_string(),
        kind: op.kind(),
        error,
    }
}

/// Options that control logging when running the inference pass.
#[derive(Default)]
pub struct RunOptions {
    /// Whether to log each operator as it is processed, including its
    /// resolved input shapes and inferred output shapes.
    pub verbose: bool,
}

/// The forward shape-inference pass.
///
/// Owns the [`ShapeCache`] for one run over a graph. Create it with the
/// graph's external input shapes, then call [`run`](Self::run) to attach
/// output shapes to every operator.
pub struct ShapeInference {
    cache: ShapeCache,
}

impl ShapeInference {
    /// Create a pass whose cache is seeded from `inputs` and from the
    /// graph's constant tensors.
    ///
    /// Input shapes must already be channel-first; layout conversion is the
    /// concern of an earlier converter stage.
    pub fn new(graph: &Graph, inputs: &[ValueInfo]) -> ShapeInference {
        let mut cache = ShapeCache::new();
        for input in inputs {
            cache.insert(input.name().to_string(), input.shape().clone());
        }
        for constant in graph.constants() {
            cache.insert(constant.name().to_string(), constant.shape().clone());
        }
        ShapeInference { cache }
    }

    /// Return the cache of shapes inferred so far.
    pub fn cache(&self) -> &ShapeCache {
        &self.cache
    }

    /// Infer output shapes for every operator in `graph`, in stored order.
    ///
    /// On success every operator's output-shape record is populated and the
    /// cache holds a shape for every tensor name in the graph. The pass stops
    /// at the first failure; operators before the failing one keep their
    /// inferred shapes.
    pub fn run(&mut self, graph: &mut Graph, opts: Option<RunOptions>) -> Result<(), RunError> {
        let opts = opts.unwrap_or_default();

        for (step, op) in graph.operators_mut().iter_mut().enumerate() {
            // Dispatch on the operator kind before touching inputs, so that
            // an unsupported operator is always reported as such. Kinds
            // without a formula are rejected by the single arm at the end.
            let formula: Box<dyn InferShapes> = match op.kind() {
                OpKind::Activation
                | OpKind::AddN
                | OpKind::Eltwise
                | OpKind::FoldedBatchNorm
                | OpKind::Softmax => Box::new(Passthrough),
                OpKind::Conv2D => Box::new(Conv::from_op(op).map_err(|e| op_error(op, e))?),
                OpKind::Pooling => Box::new(Pool::from_op(op).map_err(|e| op_error(op, e))?),
                OpKind::Concat => Box::new(Concat::from_op(op).map_err(|e| op_error(op, e))?),
                OpKind::Slice => Box::new(Slice::from_op(op).map_err(|e| op_error(op, e))?),
                OpKind::FullyConnected => Box::new(FullyConnected::from_op(op)),
                OpKind::Deconv2D | OpKind::Reshape => {
                    return Err(RunError::UnsupportedOperator {
                        name: op.name().to_string(),
                        kind: op.kind(),
                    });
                }
            };

            // Resolve input names to shapes, cloning each: formulas receive
            // independently-owned values, never references into the cache.
            let inputs: Vec<Shape> = op
                .inputs()
                .iter()
                .map(|name| self.cache.get(name).cloned())
                .collect::<Result<_, _>>()
                .map_err(|e| op_error(op, e))?;

            let result = formula.infer_shapes(&inputs);

            // Log before checking the result so that in the event of an
            // error, the log includes the failing operator's inputs.
            if opts.verbose {
                println!("#{} {} ({})", step, op.kind(), op.name());
                for (index, (name, shape)) in zip(op.inputs(), &inputs).enumerate() {
                    println!("  input {}: {} ({:?})", index, name, shape);
                }
                if let Ok(shapes) = result.as_ref() {
                    for (index, (name, shape)) in zip(op.outputs(), shapes).enumerate() {
                        println!("  output {}: {} ({:?})", index, name, shape);
                    }
                }
            }

            let shapes = result.map_err(|e| op_error(op, e))?;

            if shapes.len() != op.outputs().len() {
                return Err(RunError::OutputCountMismatch {
                    name: op.name().to_string(),
                    kind: op.kind(),
                    expected: op.outputs().len(),
                    actual: shapes.len(),
                });
            }

            for (name, shape) in zip(op.outputs(), &shapes) {
                self.cache.insert(name.clone(), shape.clone());
            }
            op.set_output_shapes(shapes);
        }

        Ok(())
    }
}
