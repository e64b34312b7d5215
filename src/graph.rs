//! Data model for converter operator graphs.

use std::fmt;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// A concrete tensor shape.
///
/// Graphs handled by this crate are fixed-shape, channel-first CNN graphs, so
/// every shape seen by the inference pass has four dimensions (batch, channel,
/// height, width) and the storage is inline. Shapes are values: deriving a new
/// shape always builds a new sequence rather than modifying one that has
/// already been recorded elsewhere.
pub type Shape = SmallVec<[usize; 4]>;

/// Layout of a data tensor's dimensions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataLayout {
    /// Channel-first, `[batch, channel, height, width]`.
    Nchw,

    /// Channel-last, `[batch, height, width, channel]`.
    Nhwc,
}

/// Layout of a convolution filter's dimensions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilterLayout {
    /// Output-channels-first, `[out_channels, in_channels, kernel_h, kernel_w]`.
    Oihw,

    /// `[kernel_h, kernel_w, in_channels, out_channels]`.
    Hwio,
}

/// Operator kinds in the converter IR.
///
/// This is the vocabulary produced by the graph-construction stage. The
/// inference pass has a shape formula for most kinds; the remainder are
/// rejected when encountered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpKind {
    Activation,
    AddN,
    Concat,
    Conv2D,
    Deconv2D,
    Eltwise,
    FoldedBatchNorm,
    FullyConnected,
    Pooling,
    Reshape,
    Slice,
    Softmax,
}

impl OpKind {
    /// Return the kind's name as it appears in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            OpKind::Activation => "Activation",
            OpKind::AddN => "AddN",
            OpKind::Concat => "Concat",
            OpKind::Conv2D => "Conv2D",
            OpKind::Deconv2D => "Deconv2D",
            OpKind::Eltwise => "Eltwise",
            OpKind::FoldedBatchNorm => "FoldedBatchNorm",
            OpKind::FullyConnected => "FullyConnected",
            OpKind::Pooling => "Pooling",
            OpKind::Reshape => "Reshape",
            OpKind::Slice => "Slice",
            OpKind::Softmax => "Softmax",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Value of an operator attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    Int(i32),
    IntList(Vec<i32>),
    DataLayout(DataLayout),
    FilterLayout(FilterLayout),
}

/// A named value with a concrete shape.
///
/// Used both for the graph's external inputs and for constant tensors such as
/// weights.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueInfo {
    name: String,
    shape: Shape,
}

impl ValueInfo {
    pub fn new(name: &str, shape: Shape) -> ValueInfo {
        ValueInfo {
            name: name.to_string(),
            shape,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }
}

/// A single operator in the converter IR.
///
/// Operators reference the tensors they consume and produce by name. The
/// attribute map holds whatever the graph-construction stage recorded for the
/// operator; for some attributes (eg. `global_pooling`) presence alone is
/// meaningful. Attribute names used by the shape formulas are `kernel`,
/// `strides`, `padding`, `dilations`, `axis`, `global_pooling`, `data_format`
/// and `filter_format`.
#[derive(Clone, Debug)]
pub struct Operator {
    name: String,
    kind: OpKind,
    inputs: Vec<String>,
    outputs: Vec<String>,
    attrs: FxHashMap<String, AttrValue>,
    output_shapes: Vec<Shape>,
}

impl Operator {
    pub fn new(name: &str, kind: OpKind, inputs: &[&str], outputs: &[&str]) -> Operator {
        Operator {
            name: name.to_string(),
            kind,
            inputs: inputs.iter().map(|name| name.to_string()).collect(),
            outputs: outputs.iter().map(|name| name.to_string()).collect(),
            attrs: FxHashMap::default(),
            output_shapes: Vec::new(),
        }
    }

    /// Add an attribute, replacing any existing value with the same name.
    pub fn with_attr(mut self, name: &str, value: AttrValue) -> Operator {
        self.attrs.insert(name.to_string(), value);
        self
    }

    /// Return the debug name of this operator.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// Names of the tensors this operator consumes, in order.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Names of the tensors this operator produces, in order.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn attr_int(&self, name: &str) -> Option<i32> {
        match self.attr(name) {
            Some(AttrValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn attr_ints(&self, name: &str) -> Option<&[i32]> {
        match self.attr(name) {
            Some(AttrValue::IntList(values)) => Some(values),
            _ => None,
        }
    }

    /// Return the operator's data layout, if one was recorded.
    pub fn data_layout(&self) -> Option<DataLayout> {
        match self.attr("data_format") {
            Some(AttrValue::DataLayout(layout)) => Some(*layout),
            _ => None,
        }
    }

    /// Return the operator's filter layout, if one was recorded.
    pub fn filter_layout(&self) -> Option<FilterLayout> {
        match self.attr("filter_format") {
            Some(AttrValue::FilterLayout(layout)) => Some(*layout),
            _ => None,
        }
    }

    /// Shapes of this operator's outputs, parallel to [`outputs`](Self::outputs).
    ///
    /// Empty until the inference pass has visited the operator.
    pub fn output_shapes(&self) -> &[Shape] {
        &self.output_shapes
    }

    pub(crate) fn set_output_shapes(&mut self, shapes: Vec<Shape>) {
        self.output_shapes = shapes;
    }
}

/// A converter operator graph.
///
/// Operators are stored in the order the graph-construction stage emitted
/// them. Every operator's inputs must be graph inputs, constants or outputs
/// of an operator earlier in the sequence; the inference pass relies on this
/// ordering rather than sorting the graph itself.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    operators: Vec<Operator>,
    constants: Vec<ValueInfo>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph {
            operators: Vec::new(),
            constants: Vec::new(),
        }
    }

    pub fn add_operator(&mut self, op: Operator) {
        self.operators.push(op);
    }

    /// Add a constant tensor, eg. convolution weights.
    pub fn add_constant(&mut self, value: ValueInfo) {
        self.constants.push(value);
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    pub(crate) fn operators_mut(&mut self) -> &mut [Operator] {
        &mut self.operators
    }

    pub fn constants(&self) -> &[ValueInfo] {
        &self.constants
    }
}

#[cfg(test)]
mod tests {
    use super::{AttrValue, DataLayout, FilterLayout, OpKind, Operator};

    #[test]
    fn test_attr_accessors() {
        let op = Operator::new("pool1", OpKind::Pooling, &["conv1_out"], &["pool1_out"])
            .with_attr("kernel", AttrValue::IntList(vec![2, 2]))
            .with_attr("axis", AttrValue::Int(1))
            .with_attr("global_pooling", AttrValue::Int(1))
            .with_attr("data_format", AttrValue::DataLayout(DataLayout::Nchw))
            .with_attr("filter_format", AttrValue::FilterLayout(FilterLayout::Oihw));

        assert_eq!(op.attr_ints("kernel"), Some([2, 2].as_slice()));
        assert_eq!(op.attr_int("axis"), Some(1));
        assert!(op.has_attr("global_pooling"));
        assert!(!op.has_attr("dilations"));
        assert_eq!(op.data_layout(), Some(DataLayout::Nchw));
        assert_eq!(op.filter_layout(), Some(FilterLayout::Oihw));

        // Accessors are typed: an attribute of the wrong variant reads as absent.
        assert_eq!(op.attr_int("kernel"), None);
        assert_eq!(op.attr_ints("axis"), None);
    }

    #[test]
    fn test_op_kind_name() {
        assert_eq!(OpKind::Conv2D.name(), "Conv2D");
        assert_eq!(OpKind::FullyConnected.to_string(), "FullyConnected");
    }
}
