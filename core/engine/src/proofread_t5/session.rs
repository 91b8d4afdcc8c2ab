use std::borrow::Cow;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ndarray::ArrayD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::value::{Value, ValueType};

/// Raw tensor payload moved between graph runs.
#[derive(Debug, Clone)]
pub enum TensorData {
    I64(ArrayD<i64>),
    F32(ArrayD<f32>),
    Bool(ArrayD<bool>),
}

impl TensorData {
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::I64(a) => a.shape(),
            Self::F32(a) => a.shape(),
            Self::Bool(a) => a.shape(),
        }
    }
}

/// Owned tensor whose lifetime is observable.
///
/// When built via [`TensorHandle::tracked`], the shared counter is raised on
/// creation and lowered on drop, so tests can assert that every tensor a
/// decode loop produced was released when the loop ended, including loops
/// that bail out early.
pub struct TensorHandle {
    data: TensorData,
    tracker: Option<Arc<AtomicI64>>,
}

impl TensorHandle {
    pub fn new(data: TensorData) -> Self {
        Self {
            data,
            tracker: None,
        }
    }

    pub fn tracked(data: TensorData, tracker: Arc<AtomicI64>) -> Self {
        tracker.fetch_add(1, Ordering::SeqCst);
        Self {
            data,
            tracker: Some(tracker),
        }
    }

    pub fn i64_array(data: ArrayD<i64>) -> Self {
        Self::new(TensorData::I64(data))
    }

    pub fn f32_array(data: ArrayD<f32>) -> Self {
        Self::new(TensorData::F32(data))
    }

    pub fn bool_scalar(value: bool) -> Self {
        Self::new(TensorData::Bool(ArrayD::from_elem(
            ndarray::IxDyn(&[1]),
            value,
        )))
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match &self.data {
            TensorData::F32(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&ArrayD<i64>> {
        match &self.data {
            TensorData::I64(a) => Some(a),
            _ => None,
        }
    }
}

impl Drop for TensorHandle {
    fn drop(&mut self) {
        if let Some(tracker) = &self.tracker {
            tracker.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// One loaded graph. Sessions are stateful only in the ONNX Runtime sense;
/// all decode-loop state lives with the caller.
pub trait InferenceSession: Send {
    fn input_names(&self) -> &[String];
    fn output_names(&self) -> &[String];
    /// Declared (possibly symbolic, -1) dimensions for one input.
    fn input_dims(&self, name: &str) -> Option<&[i64]>;
    fn run(&mut self, inputs: &[(&str, &TensorHandle)]) -> Result<Vec<(String, TensorHandle)>>;
}

/// ONNX Runtime backed session.
pub struct OnnxSession {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
    input_dims: Vec<(String, Vec<i64>)>,
}

impl OnnxSession {
    pub fn from_file(path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(path)
            .with_context(|| format!("failed to load ONNX model from {}", path.display()))?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let input_dims = session
            .inputs
            .iter()
            .map(|i| {
                let dims = match &i.input_type {
                    ValueType::Tensor { shape, .. } => shape.iter().copied().collect(),
                    _ => Vec::new(),
                };
                (i.name.clone(), dims)
            })
            .collect();

        Ok(Self {
            session,
            input_names,
            output_names,
            input_dims,
        })
    }

    fn to_input_value(data: &TensorData) -> Result<SessionInputValue<'static>> {
        let value = match data {
            TensorData::I64(a) => {
                let shape: Vec<i64> = a.shape().iter().map(|&d| d as i64).collect();
                let flat: Vec<i64> = a.iter().copied().collect();
                Value::from_array((shape, flat))?.into_dyn()
            }
            TensorData::F32(a) => {
                let shape: Vec<i64> = a.shape().iter().map(|&d| d as i64).collect();
                let flat: Vec<f32> = a.iter().copied().collect();
                Value::from_array((shape, flat))?.into_dyn()
            }
            TensorData::Bool(a) => {
                let shape: Vec<i64> = a.shape().iter().map(|&d| d as i64).collect();
                let flat: Vec<bool> = a.iter().copied().collect();
                Value::from_array((shape, flat))?.into_dyn()
            }
        };
        Ok(SessionInputValue::from(value))
    }
}

impl InferenceSession for OnnxSession {
    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn input_dims(&self, name: &str) -> Option<&[i64]> {
        self.input_dims
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, dims)| dims.as_slice())
    }

    fn run(&mut self, inputs: &[(&str, &TensorHandle)]) -> Result<Vec<(String, TensorHandle)>> {
        let mut feed: Vec<(Cow<'static, str>, SessionInputValue<'static>)> =
            Vec::with_capacity(inputs.len());
        for (name, handle) in inputs {
            feed.push((
                Cow::Owned(name.to_string()),
                Self::to_input_value(handle.data())?,
            ));
        }

        let outputs = self.session.run(feed)?;

        let mut extracted = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let (shape, data) = outputs[name.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(|e| anyhow!("output {name} is not an f32 tensor: {e}"))?;
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            let array = ArrayD::from_shape_vec(ndarray::IxDyn(&dims), data.to_vec())
                .map_err(|e| anyhow!("output {name} shape mismatch: {e}"))?;
            extracted.push((name.clone(), TensorHandle::f32_array(array)));
        }
        Ok(extracted)
    }
}
