//! Compute device selection
//!
//! Deterministic, no retries: an accelerator when the runtime reports one,
//! otherwise the CPU. Selection happens once during bundle construction and
//! is fixed for the bundle's lifetime.

use crate::error::{EngineError, Result};
use candle_core::Device;
use tracing::info;

/// Select the compute device for the given preference (`auto`, `cpu`,
/// `cuda`).
pub fn select_device(preference: &str) -> Result<Device> {
    let device = match preference {
        "cpu" => Device::Cpu,
        "cuda" => Device::new_cuda(0)
            .map_err(|e| EngineError::config(format!("CUDA device unavailable: {}", e)))?,
        _ => Device::cuda_if_available(0).unwrap_or(Device::Cpu),
    };

    if device.is_cuda() {
        info!("Selected CUDA device for inference");
    } else {
        info!("Selected CPU device for inference");
    }
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_preference_is_honored() {
        let device = select_device("cpu").unwrap();
        assert!(matches!(device, Device::Cpu));
    }

    #[test]
    fn test_auto_always_selects_something() {
        // Either an accelerator or the CPU fallback; never an error.
        assert!(select_device("auto").is_ok());
    }
}
