//! Minimal ONNX graphs over the `[1, 7]` feature input

use crate::models::NUM_FEATURES;
use prost::Message;
use tract_onnx::pb::{
    attribute_proto::AttributeType,
    tensor_proto::DataType,
    tensor_shape_proto::{dimension, Dimension},
    type_proto, AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
    TensorShapeProto, TypeProto, ValueInfoProto,
};

const OPSET: i64 = 13;

/// Regression model: output 0 is the largest feature
pub fn regressor() -> Vec<u8> {
    encode(
        vec![node(
            "ReduceMax",
            "value",
            vec![ints_attr("axes", &[1]), int_attr("keepdims", 0)],
        )],
        &["value"],
    )
}

/// Classifier: output 0 is the index of the largest feature, output 1 the
/// softmax over all features
pub fn classifier() -> Vec<u8> {
    encode(
        vec![
            node(
                "ArgMax",
                "class_id",
                vec![int_attr("axis", 1), int_attr("keepdims", 0)],
            ),
            node("Softmax", "probabilities", vec![int_attr("axis", 1)]),
        ],
        &["class_id", "probabilities"],
    )
}

fn encode(nodes: Vec<NodeProto>, outputs: &[&str]) -> Vec<u8> {
    let graph = GraphProto {
        name: "test".to_string(),
        node: nodes,
        input: vec![feature_input()],
        output: outputs
            .iter()
            .map(|name| ValueInfoProto {
                name: name.to_string(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };
    ModelProto {
        ir_version: 7,
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: OPSET,
        }],
        graph: Some(graph),
        ..Default::default()
    }
    .encode_to_vec()
}

fn feature_input() -> ValueInfoProto {
    let dim = |size: i64| Dimension {
        value: Some(dimension::Value::DimValue(size)),
        ..Default::default()
    };
    ValueInfoProto {
        name: "features".to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: DataType::Float as i32,
                shape: Some(TensorShapeProto {
                    dim: vec![dim(1), dim(NUM_FEATURES as i64)],
                }),
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn node(op_type: &str, output: &str, attribute: Vec<AttributeProto>) -> NodeProto {
    NodeProto {
        name: output.to_string(),
        op_type: op_type.to_string(),
        input: vec!["features".to_string()],
        output: vec![output.to_string()],
        attribute,
        ..Default::default()
    }
}

fn int_attr(name: &str, value: i64) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Int as i32,
        i: value,
        ..Default::default()
    }
}

fn ints_attr(name: &str, values: &[i64]) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Ints as i32,
        ints: values.to_vec(),
        ..Default::default()
    }
}
