use crate::graph::{AttrValue, DataLayout, FilterLayout, Operator, Shape};
use crate::infer_shapes::{InferShapes, InferShapesError};

/// Rounding direction for the window-count division in [`output_size`].
///
/// Pooling windows may extend past the padded input bounds, so pooling rounds
/// up; convolution windows must fit entirely within them, so convolution
/// rounds down.
#[derive(Clone, Copy)]
enum Rounding {
    Floor,
    Ceil,
}

/// Return the output extent for one spatial dimension of a convolution or
/// pooling operator.
///
/// `padding` is the total padding applied along the dimension. The kernel
/// extent is inflated by the dilation before it is applied to the padded
/// input.
fn output_size(
    in_size: usize,
    kernel_size: usize,
    stride: usize,
    dilation: usize,
    padding: usize,
    round: Rounding,
) -> Result<usize, InferShapesError> {
    let in_size = in_size as i64;
    let kernel_size = kernel_size as i64;
    let stride = stride as i64;
    let dilation = dilation as i64;
    let padding = padding as i64;

    let span = in_size + padding - kernel_size - (kernel_size - 1) * (dilation - 1);
    let steps = match round {
        Rounding::Floor => span.div_euclid(stride),
        Rounding::Ceil => -(-span).div_euclid(stride),
    };

    let out_size = steps + 1;
    if out_size < 0 {
        return Err(InferShapesError::IncompatibleShapes(
            "window does not fit within the padded input",
        ));
    }
    Ok(out_size as usize)
}

/// Read a required `[h, w]` integer-list attribute with non-negative values.
fn int_pair(op: &Operator, name: &'static str) -> Result<[usize; 2], InferShapesError> {
    let Some(value) = op.attr(name) else {
        return Err(InferShapesError::MissingAttribute(name));
    };
    let AttrValue::IntList(values) = value else {
        return Err(InferShapesError::InvalidAttribute(name));
    };
    let &[h, w] = values.as_slice() else {
        return Err(InferShapesError::InvalidAttribute(name));
    };
    let h = usize::try_from(h).map_err(|_| InferShapesError::InvalidAttribute(name))?;
    let w = usize::try_from(w).map_err(|_| InferShapesError::InvalidAttribute(name))?;
    Ok([h, w])
}

/// Read a required `[h, w]` integer-list attribute with values of at least 1.
fn positive_pair(op: &Operator, name: &'static str) -> Result<[usize; 2], InferShapesError> {
    let [h, w] = int_pair(op, name)?;
    if h == 0 || w == 0 {
        return Err(InferShapesError::InvalidAttribute(name));
    }
    Ok([h, w])
}

/// Read the `dilations` attribute, which defaults to 1 per spatial dimension
/// when absent.
fn dilation_pair(op: &Operator) -> Result<[usize; 2], InferShapesError> {
    if !op.has_attr("dilations") {
        return Ok([1, 1]);
    }
    positive_pair(op, "dilations")
}

/// Convolution operator.
///
/// The filter shape is taken from the operator's second input, interpreted as
/// `[out_channels, in_channels, kernel_h, kernel_w]`.
#[derive(Clone, Debug)]
pub struct Conv {
    pub data_layout: Option<DataLayout>,
    pub filter_layout: Option<FilterLayout>,
    pub padding: [usize; 2],
    pub strides: [usize; 2],
    pub dilations: [usize; 2],
}

impl Conv {
    /// Build the formula from a graph operator's attributes.
    pub fn from_op(op: &Operator) -> Result<Conv, InferShapesError> {
        Ok(Conv {
            data_layout: op.data_layout(),
            filter_layout: op.filter_layout(),
            padding: int_pair(op, "padding")?,
            strides: positive_pair(op, "strides")?,
            dilations: dilation_pair(op)?,
        })
    }
}

impl InferShapes for Conv {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let [data, filter, ..] = inputs else {
            return Err(InferShapesError::MissingInput);
        };

        if self.data_layout != Some(DataLayout::Nchw) {
            return Err(InferShapesError::UnsupportedLayout(
                "convolution input must be channel-first",
            ));
        }
        if self.filter_layout != Some(FilterLayout::Oihw) {
            return Err(InferShapesError::UnsupportedLayout(
                "convolution filter must be output-channels-first",
            ));
        }

        let &[batch, _, in_h, in_w] = data.as_slice() else {
            return Err(InferShapesError::IncorrectRank);
        };
        let &[out_channels, _, kernel_h, kernel_w] = filter.as_slice() else {
            return Err(InferShapesError::IncorrectRank);
        };

        let out_h = output_size(
            in_h,
            kernel_h,
            self.strides[0],
            self.dilations[0],
            self.padding[0],
            Rounding::Floor,
        )?;
        let out_w = output_size(
            in_w,
            kernel_w,
            self.strides[1],
            self.dilations[1],
            self.padding[1],
            Rounding::Floor,
        )?;

        Ok([Shape::from_slice(&[batch, out_channels, out_h, out_w])].into())
    }
}

/// Pooling operator.
///
/// The pooling window is taken from the `kernel` attribute and behaves like a
/// `[C, C, kernel_h, kernel_w]` filter over a channel-first input. A present
/// `global_pooling` attribute overrides the window with the input's full
/// spatial extent, whatever kernel the operator states.
#[derive(Clone, Debug)]
pub struct Pool {
    pub data_layout: Option<DataLayout>,
    pub kernel: [usize; 2],
    pub global: bool,
    pub padding: [usize; 2],
    pub strides: [usize; 2],
    pub dilations: [usize; 2],
}

impl Pool {
    /// Build the formula from a graph operator's attributes.
    pub fn from_op(op: &Operator) -> Result<Pool, InferShapesError> {
        Ok(Pool {
            data_layout: op.data_layout(),
            kernel: positive_pair(op, "kernel")?,
            global: op.has_attr("global_pooling"),
            padding: int_pair(op, "padding")?,
            strides: positive_pair(op, "strides")?,
            dilations: dilation_pair(op)?,
        })
    }
}

impl InferShapes for Pool {
    fn infer_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>, InferShapesError> {
        let Some(data) = inputs.first() else {
            return Err(InferShapesError::MissingInput);
        };

        if self.data_layout != Some(DataLayout::Nchw) {
            return Err(InferShapesError::UnsupportedLayout(
                "pooling input must be channel-first",
            ));
        }

        let &[batch, channels, in_h, in_w] = data.as_slice() else {
            return Err(InferShapesError::IncorrectRank);
        };

        let [kernel_h, kernel_w] = if self.global {
            [in_h, in_w]
        } else {
            self.kernel
        };

        let out_h = output_size(
            in_h,
            kernel_h,
            self.strides[0],
            self.dilations[0],
            self.padding[0],
            Rounding::Ceil,
        )?;
        let out_w = output_size(
            in_w,
            kernel_w,
            self.strides[1],
            self.dilations[1],
            self.padding[1],
            Rounding::Ceil,
        )?;

        Ok([Shape::from_slice(&[batch, channels, out_h, out_w])].into())
    }
}
