//! Shape inference formulas for the supported operator kinds.
//!
//! Each formula is a struct holding the attributes that affect the output
//! shape, built from a graph operator with `from_op`. The passthrough rule
//! shared by the elementwise and activation kinds lives in
//! [`crate::infer_shapes`].

mod conv_pool;

pub use conv_pool::{Conv, Pool};

use std::iter::zip;

use crate::graph::{DataLayout, Operator, Shape};
use crate::infer_shapes::{resolve_axis, InferShapes, InferShapesError};

/// Concat operator.
///
/// Joins all inputs along `axis`. Inputs must agree on every other axis;
/// upstream graph construction is expected to guarantee this, but the formula
/// verifies it rather than producing a silently wrong shape for a malformed
/// graph.
pub struct Concat {
    pub axis: i32,
}

impl Concat {
    pub fn from_op(op: &Operator) -> Result<Concat, InferShapesError> {
        let axis = op
            .attr_int("axis")
            .ok_or(InferShapesError::MissingAttribute("axis"))?;
        Ok(Concat { axis })
    }
}

impl InferShapes for Concat {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [first, rest @ ..] = inputs else {
            return Err(InferShapesError::MissingInput);
        };

        let axis = resolve_axis(first.len(), self.axis)?;

        for other in rest {
            if other.len() != first.len() {
                return Err(InferShapesError::IncompatibleShapes(
                    "concat inputs have different ranks",
                ));
            }
            for (dim, (a, b)) in zip(first, other).enumerate() {
                if dim != axis && a != b {
                    return Err(InferShapesError::IncompatibleShapes(
                        "concat inputs disagree on a non-concatenated axis",
                    ));
                }
            }
        }

        let mut out_shape = first.clone();
        out_shape[axis] = inputs.iter().map(|shape| shape[axis]).sum();

        Ok([out_shape].into())
    }
}

/// Slice operator.
///
/// Splits the input evenly along `axis` into one piece per declared output.
pub struct Slice {
    pub axis: i32,

    /// Number of pieces to split the tensor into. Taken from the operator's
    /// declared output count.
    pub num_outputs: usize,
}

impl Slice {
    pub fn from_op(op: &Operator) -> Result<Slice, InferShapesError> {
        let axis = op
            .attr_int("axis")
            .ok_or(InferShapesError::MissingAttribute("axis"))?;
        Ok(Slice {
            axis,
            num_outputs: op.outputs().len(),
        })
    }
}

impl InferShapes for Slice {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let Some(data) = inputs.first() else {
            return Err(InferShapesError::MissingInput);
        };

        let axis = resolve_axis(data.len(), self.axis)?;
        let size = data[axis];

        // A slice into zero outputs is degenerate and treated as
        // non-divisible rather than producing no shapes at all.
        if self.num_outputs == 0 || size % self.num_outputs != 0 {
            return Err(InferShapesError::NonDivisibleSlice {
                size,
                outputs: self.num_outputs,
            });
        }

        let mut piece = data.clone();
        piece[axis] = size / self.num_outputs;

        // Each output gets its own copy, not a shared handle.
        Ok((0..self.num_outputs).map(|_| piece.clone()).collect())
    }
}

/// FullyConnected operator.
///
/// Collapses the input to `[batch, out_features, 1, 1]`, where `out_features`
/// is the first dimension of the weight shape taken from the second input.
pub struct FullyConnected {
    pub data_layout: Option<DataLayout>,
}

impl FullyConnected {
    pub fn from_op(op: &Operator) -> FullyConnected {
        FullyConnected {
            data_layout: op.data_layout(),
        }
    }
}

impl InferShapes for FullyConnected {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [data, weights, ..] = inputs else {
            return Err(InferShapesError::MissingInput);
        };

        if self.data_layout != Some(DataLayout::Nchw) {
            return Err(InferShapesError::UnsupportedLayout(
                "fully-connected input must be channel-first",
            ));
        }

        let (Some(&batch), Some(&out_features)) = (data.first(), weights.first()) else {
            return Err(InferShapesError::IncorrectRank);
        };

        Ok([Shape::from_slice(&[batch, out_features, 1, 1])].into())
    }
}

#[cfg(test)]
mod tests {
    use super::{Concat, FullyConnected, Slice};
    use crate::graph::{DataLayout, Shape};
    use crate::infer_shapes::{InferShapes, InferShapesError};

    fn shape(dims: &[usize]) -> Shape {
        Shape::from_slice(dims)
    }

    #[test]
    fn test_concat() {
        #[derive(Debug)]
        struct Case {
            inputs: Vec<Shape>,
            axis: i32,
            expected: Result<Vec<Shape>, InferShapesError>,
        }

        let cases = [
            Case {
                inputs: vec![shape(&[1, 3, 8, 8]), shape(&[1, 5, 8, 8])],
                axis: 1,
                expected: Ok(vec![shape(&[1, 8, 8, 8])]),
            },
            // Negative axis counts back from the last dimension.
            Case {
                inputs: vec![shape(&[1, 3, 8, 8]), shape(&[1, 5, 8, 8])],
                axis: -3,
                expected: Ok(vec![shape(&[1, 8, 8, 8])]),
            },
            Case {
                inputs: vec![shape(&[2, 4, 7, 7])],
                axis: 0,
                expected: Ok(vec![shape(&[2, 4, 7, 7])]),
            },
            Case {
                inputs: vec![shape(&[1, 3, 8, 8]), shape(&[1, 5, 8, 9])],
                axis: 1,
                expected: Err(InferShapesError::IncompatibleShapes(
                    "concat inputs disagree on a non-concatenated axis",
                )),
            },
            Case {
                inputs: vec![shape(&[1, 3, 8, 8]), shape(&[3, 8, 8])],
                axis: 1,
                expected: Err(InferShapesError::IncompatibleShapes(
                    "concat inputs have different ranks",
                )),
            },
            Case {
                inputs: vec![shape(&[1, 3, 8, 8])],
                axis: 4,
                expected: Err(InferShapesError::IncorrectRank),
            },
            Case {
                inputs: vec![],
                axis: 1,
                expected: Err(InferShapesError::MissingInput),
            },
        ];

        for case in cases {
            let op = Concat { axis: case.axis };
            let result = op.infer_shapes(&case.inputs);
            assert_eq!(result, case.expected);
        }
    }

    #[test]
    fn test_concat_does_not_modify_inputs() {
        let inputs = [shape(&[1, 3, 8, 8]), shape(&[1, 5, 8, 8])];
        let op = Concat { axis: 1 };
        op.infer_shapes(&inputs).unwrap();
        assert_eq!(inputs[0], shape(&[1, 3, 8, 8]));
        assert_eq!(inputs[1], shape(&[1, 5, 8, 8]));
    }

    #[test]
    fn test_slice() {
        #[derive(Debug)]
        struct Case {
            input: Shape,
            axis: i32,
            num_outputs: usize,
            expected: Result<Vec<Shape>, InferShapesError>,
        }

        let cases = [
            Case {
                input: shape(&[1, 8, 8, 8]),
                axis: 1,
                num_outputs: 4,
                expected: Ok(vec![shape(&[1, 2, 8, 8]); 4]),
            },
            Case {
                input: shape(&[1, 8, 8, 8]),
                axis: -3,
                num_outputs: 2,
                expected: Ok(vec![shape(&[1, 4, 8, 8]); 2]),
            },
            Case {
                input: shape(&[1, 8, 8, 8]),
                axis: 1,
                num_outputs: 3,
                expected: Err(InferShapesError::NonDivisibleSlice { size: 8, outputs: 3 }),
            },
            Case {
                input: shape(&[1, 8, 8, 8]),
                axis: 1,
                num_outputs: 0,
                expected: Err(InferShapesError::NonDivisibleSlice { size: 8, outputs: 0 }),
            },
            Case {
                input: shape(&[1, 8, 8, 8]),
                axis: 5,
                num_outputs: 2,
                expected: Err(InferShapesError::IncorrectRank),
            },
        ];

        for case in cases {
            let op = Slice {
                axis: case.axis,
                num_outputs: case.num_outputs,
            };
            let result = op.infer_shapes(std::slice::from_ref(&case.input));
            assert_eq!(result, case.expected);
        }
    }

    #[test]
    fn test_slice_outputs_are_independent() {
        let op = Slice {
            axis: 1,
            num_outputs: 4,
        };
        let mut result = op.infer_shapes(&[shape(&[1, 8, 8, 8])]).unwrap();

        result[0][1] = 99;
        assert_eq!(result[1], shape(&[1, 2, 8, 8]));
        assert_eq!(result[2], shape(&[1, 2, 8, 8]));
        assert_eq!(result[3], shape(&[1, 2, 8, 8]));
    }

    #[test]
    fn test_fully_connected() {
        #[derive(Debug)]
        struct Case {
            inputs: Vec<Shape>,
            data_layout: Option<DataLayout>,
            expected: Result<Vec<Shape>, InferShapesError>,
        }

        let cases = [
            Case {
                inputs: vec![shape(&[1, 512, 1, 1]), shape(&[10, 512])],
                data_layout: Some(DataLayout::Nchw),
                expected: Ok(vec![shape(&[1, 10, 1, 1])]),
            },
            Case {
                inputs: vec![shape(&[1, 512, 1, 1]), shape(&[10, 512])],
                data_layout: Some(DataLayout::Nhwc),
                expected: Err(InferShapesError::UnsupportedLayout(
                    "fully-connected input must be channel-first",
                )),
            },
            Case {
                inputs: vec![shape(&[1, 512, 1, 1]), shape(&[10, 512])],
                data_layout: None,
                expected: Err(InferShapesError::UnsupportedLayout(
                    "fully-connected input must be channel-first",
                )),
            },
            Case {
                inputs: vec![shape(&[1, 512, 1, 1])],
                data_layout: Some(DataLayout::Nchw),
                expected: Err(InferShapesError::MissingInput),
            },
        ];

        for case in cases {
            let op = FullyConnected {
                data_layout: case.data_layout,
            };
            let result = op.infer_shapes(&case.inputs);
            assert_eq!(result, case.expected);
        }
    }
}
