use anyhow::{anyhow, Result};

/// Initialize the process-global ONNX Runtime environment.
/// Every session construction should go through this once first.
pub fn init_onnx_runtime() -> Result<()> {
    ort::init()
        .commit()
        .map_err(|e| anyhow!("failed to init ONNX Runtime: {e}"))?;

    Ok(())
}
