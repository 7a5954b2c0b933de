// SYNOID SR Inference Session
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Owns exactly one configured engine instance for the lifetime of a run.
// The session validates shapes at its boundary so a misconfigured model is
// reported at open time and a bad input is reported before the engine runs.

use crate::accel::{select_device, Acceleration};
use crate::config::ModelConfig;
use crate::engine::codec::InputShape;
use crate::engine::espcn::EspcnEngine;
use crate::engine::{FrameTensor, TensorShape};
use crate::error::{Result, SrError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Spatial size used to probe engines that accept any input size.
const NATIVE_PROBE_SIZE: usize = 16;

/// An opaque `infer(tensor) -> tensor` backend.
///
/// Implementations are driven by one thread at a time through `&mut self`.
pub trait InferenceEngine: Send {
    /// Human-readable identity, recorded in run manifests.
    fn name(&self) -> String;

    /// Run one forward pass.
    fn forward(&mut self, input: &FrameTensor) -> Result<FrameTensor>;

    /// Release device resources. Called once, when the session closes.
    fn release(&mut self) {}
}

/// What the session promises about its model's tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub input: InputShape,
    pub scale: u32,
}

/// Output of one `infer` call plus its end-to-end latency.
#[derive(Debug, Clone)]
pub struct Inference {
    pub tensor: FrameTensor,
    pub elapsed: Duration,
}

pub struct InferenceSession {
    engine: Option<Box<dyn InferenceEngine>>,
    spec: ModelSpec,
    acceleration: Acceleration,
    fingerprint: String,
    calls: u64,
}

impl InferenceSession {
    /// Load the configured model on the preferred device and verify its
    /// output shape.
    pub fn open(config: &ModelConfig) -> Result<Self> {
        let selection = select_device(config.prefer_acceleration, config.strict_acceleration)?;
        info!(
            "[SESSION] Opening {:?} on {}",
            config.path, selection.acceleration
        );

        let engine = EspcnEngine::load(&config.path, selection.device)?;
        if engine.scale() != config.scale as usize {
            return Err(SrError::ShapeMismatch {
                expected: format!("x{} model", config.scale),
                actual: format!("x{} model at {:?}", engine.scale(), config.path),
            });
        }

        let spec = ModelSpec {
            input: config.input,
            scale: config.scale,
        };
        Self::with_engine(Box::new(engine), spec, selection.acceleration)
    }

    /// Wrap an already-built engine. A probe pass runs on zeros so a
    /// declared/actual output mismatch fails here, not on the first frame.
    pub fn with_engine(
        mut engine: Box<dyn InferenceEngine>,
        spec: ModelSpec,
        acceleration: Acceleration,
    ) -> Result<Self> {
        if spec.scale == 0 {
            return Err(SrError::Config("upscale factor must be at least 1".into()));
        }

        let probe_shape = match spec.input {
            InputShape::Native => TensorShape::rgb(NATIVE_PROBE_SIZE, NATIVE_PROBE_SIZE),
            InputShape::Fixed { width, height } => {
                TensorShape::rgb(width as usize, height as usize)
            }
        };
        let expected = probe_shape.scaled(spec.scale as usize);

        let probe = FrameTensor::zeros(probe_shape).and_then(|t| engine.forward(&t));
        let verdict = match probe {
            Ok(out) if out.shape() == expected => Ok(()),
            Ok(out) => Err(SrError::ShapeMismatch {
                expected: expected.to_string(),
                actual: out.shape().to_string(),
            }),
            Err(e) => Err(e),
        };
        if let Err(e) = verdict {
            engine.release();
            return Err(e);
        }

        let fingerprint = engine.name();
        info!(
            "[SESSION] Ready: {} (x{}, {})",
            fingerprint, spec.scale, acceleration
        );
        Ok(Self {
            engine: Some(engine),
            spec,
            acceleration,
            fingerprint,
            calls: 0,
        })
    }

    pub fn spec(&self) -> ModelSpec {
        self.spec
    }

    pub fn acceleration(&self) -> &Acceleration {
        &self.acceleration
    }

    /// Engine identity, stable for the same model file.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_none()
    }

    /// Whether `shape` is a valid input for this session's model.
    pub fn accepts(&self, shape: TensorShape) -> bool {
        if shape.channels != 3 || shape.width == 0 || shape.height == 0 {
            return false;
        }
        match self.spec.input {
            InputShape::Native => true,
            InputShape::Fixed { width, height } => {
                shape.width == width as usize && shape.height == height as usize
            }
        }
    }

    /// Run one blocking forward pass.
    pub fn infer(&mut self, input: &FrameTensor) -> Result<Inference> {
        let accepts = self.accepts(input.shape());
        let spec = self.spec;
        let engine = self.engine.as_mut().ok_or(SrError::SessionClosed)?;

        if !accepts {
            return Err(SrError::InferenceFault(format!(
                "input shape {} does not match model input {:?}",
                input.shape(),
                spec.input
            )));
        }

        let started = Instant::now();
        let tensor = engine.forward(input)?;
        let elapsed = started.elapsed();

        let expected = input.shape().scaled(spec.scale as usize);
        if tensor.shape() != expected {
            return Err(SrError::ShapeMismatch {
                expected: expected.to_string(),
                actual: tensor.shape().to_string(),
            });
        }

        self.calls += 1;
        debug!("[SESSION] infer #{} took {:?}", self.calls, elapsed);
        Ok(Inference { tensor, elapsed })
    }

    /// Release the engine. Closing an already-closed session is a no-op.
    pub fn close(&mut self) {
        match self.engine.take() {
            Some(mut engine) => {
                engine.release();
                info!(
                    "[SESSION] Closed {} after {} inference call(s)",
                    self.fingerprint, self.calls
                );
            }
            None => debug!("[SESSION] close() on an already closed session"),
        }
    }
}

impl Drop for InferenceSession {
    fn drop(&mut self) {
        if self.engine.is_some() {
            warn!("[SESSION] Session dropped without close(); releasing engine");
            self.close();
        }
    }
}
