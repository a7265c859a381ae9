//! Silero-style neural speech scorer over ONNX Runtime.
//!
//! Consumes the LSTM interface of the Silero VAD family
//! (<https://github.com/snakers4/silero-vad>, v3/v4):
//!
//! | Name     | Shape      | DType | Direction |
//! |----------|------------|-------|-----------|
//! | `input`  | `[1, 512]` | f32   | in        |
//! | `sr`     | `[1]`      | i64   | in        |
//! | `h`      | `[2,1,64]` | f32   | in/out    |
//! | `c`      | `[2,1,64]` | f32   | in/out    |
//! | `output` | `[1, 1]`   | f32   | out       |
//! | `hn`     | `[2,1,64]` | f32   | out       |
//! | `cn`     | `[2,1,64]` | f32   | out       |
//!
//! The hidden tensors are owned here and nowhere else; `reset()` zeroes
//! them between utterances or sessions.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Array3};
use ort::session::builder::SessionBuilder;
use ort::session::SessionInputValue;
use ort::value::Value;
use tracing::info;

use crate::error::{Result, VelaError};
use crate::vad::{SpeechScorer, SAMPLE_RATE, WINDOW};

/// LSTM state size: 2 layers × 1 batch × 64 units = 128 floats each.
const LSTM_SIZE: usize = 128;

/// Neural speech scorer backed by a Silero VAD ONNX model.
pub struct SileroModel {
    session: ort::session::Session,
    input_name: String,
    sr_name: Option<String>,
    h_name: String,
    c_name: String,
    output_name: String,
    hn_name: String,
    cn_name: String,
    h: Vec<f32>,
    c: Vec<f32>,
}

impl SileroModel {
    /// Load the model from `path`. Failure here is fatal to the whole core.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VelaError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let session = SessionBuilder::new()
            .map_err(|e| VelaError::Init(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| VelaError::Init(e.to_string()))?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();

        let input_name = resolve_name(&input_names, &["input", "audio", "x"])
            .or_else(|| input_names.first().cloned())
            .ok_or_else(|| VelaError::Init("vad model has no inputs".into()))?;
        let sr_name = resolve_name(&input_names, &["sr", "sample_rate"]);
        let output_name = resolve_name(&output_names, &["output", "speech_prob", "prob"])
            .or_else(|| output_names.first().cloned())
            .ok_or_else(|| VelaError::Init("vad model has no outputs".into()))?;

        // The recurrent tensors are not optional for this scorer.
        let h_name = resolve_name(&input_names, &["h", "state_h"]);
        let c_name = resolve_name(&input_names, &["c", "state_c"]);
        let hn_name = resolve_name(&output_names, &["hn", "state_hn", "h_out"]);
        let cn_name = resolve_name(&output_names, &["cn", "state_cn", "c_out"]);
        let (Some(h_name), Some(c_name), Some(hn_name), Some(cn_name)) =
            (h_name, c_name, hn_name, cn_name)
        else {
            return Err(VelaError::Init(
                "vad model does not expose the expected h/c recurrent tensors".into(),
            ));
        };

        info!(
            path = %path.display(),
            input = input_name.as_str(),
            output = output_name.as_str(),
            "silero vad model loaded"
        );

        Ok(Self {
            session,
            input_name,
            sr_name,
            h_name,
            c_name,
            output_name,
            hn_name,
            cn_name,
            h: vec![0.0; LSTM_SIZE],
            c: vec![0.0; LSTM_SIZE],
        })
    }

    /// Default model location relative to a models directory.
    pub fn default_model_path(models_dir: impl AsRef<Path>) -> PathBuf {
        models_dir.as_ref().join("silero_vad.onnx")
    }
}

fn resolve_name(candidates: &[String], preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}

fn session_err(e: ort::Error) -> VelaError {
    VelaError::Inference(e.to_string())
}

fn shape_err(e: ndarray::ShapeError) -> VelaError {
    VelaError::Inference(e.to_string())
}

impl SpeechScorer for SileroModel {
    fn score(&mut self, window: &[f32]) -> Result<f32> {
        debug_assert_eq!(window.len(), WINDOW);

        let input_arr =
            Array2::<f32>::from_shape_vec((1, WINDOW), window.to_vec()).map_err(shape_err)?;
        let h_arr = Array3::<f32>::from_shape_vec((2, 1, 64), self.h.clone()).map_err(shape_err)?;
        let c_arr = Array3::<f32>::from_shape_vec((2, 1, 64), self.c.clone()).map_err(shape_err)?;

        let mut input_values: Vec<(String, SessionInputValue<'_>)> = vec![
            (
                self.input_name.clone(),
                Value::from_array(input_arr).map_err(session_err)?.into(),
            ),
            (
                self.h_name.clone(),
                Value::from_array(h_arr).map_err(session_err)?.into(),
            ),
            (
                self.c_name.clone(),
                Value::from_array(c_arr).map_err(session_err)?.into(),
            ),
        ];
        if let Some(sr_name) = &self.sr_name {
            let sr_arr = Array1::<i64>::from_elem(1, i64::from(SAMPLE_RATE));
            input_values.push((
                sr_name.clone(),
                Value::from_array(sr_arr).map_err(session_err)?.into(),
            ));
        }

        let outputs = self.session.run(input_values).map_err(session_err)?;

        let prob_output = outputs
            .get(self.output_name.as_str())
            .unwrap_or(&outputs[0]);
        let (_, prob_data) = prob_output
            .try_extract_tensor::<f32>()
            .map_err(session_err)?;
        let probability = prob_data.first().copied().unwrap_or(0.0);

        let hn_out = outputs
            .get(self.hn_name.as_str())
            .ok_or_else(|| VelaError::Inference("vad model output hn missing".into()))?;
        let cn_out = outputs
            .get(self.cn_name.as_str())
            .ok_or_else(|| VelaError::Inference("vad model output cn missing".into()))?;
        let (_, hn_data) = hn_out.try_extract_tensor::<f32>().map_err(session_err)?;
        let (_, cn_data) = cn_out.try_extract_tensor::<f32>().map_err(session_err)?;
        self.h = hn_data.to_vec();
        self.c = cn_data.to_vec();

        Ok(probability)
    }

    fn reset(&mut self) {
        self.h.iter_mut().for_each(|v| *v = 0.0);
        self.c.iter_mut().for_each(|v| *v = 0.0);
    }
}
